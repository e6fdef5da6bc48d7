//! # 📡 THE RIAK BACKEND
//!
//! 🎬 COLD OPEN — INT. SERVER ROOM — 3:47 AM
//!
//! Five nodes. One ring. A bucket nobody has listed since the intern left.
//! "Just stream the keys," they said. "It's one GET," they said.
//! The listing walks every vnode in the cluster and mails the results back
//! in chunks, whenever it feels like it. We wait. We parse. We cope.
//!
//! 🚀 This module speaks Riak's HTTP dialect:
//! - `GET /buckets/{bucket}/keys?keys=stream` → concatenated `{"keys":[...]}` chunks
//! - `GET /riak/{bucket}/{key}` → one object, headers and all
//! - `PUT /riak/{bucket}/{key}` → one object back where it belongs
//!
//! 🦆 (mandatory duck, no context provided, none shall be requested)

mod riak_client;
mod riak_key_stream;

pub(crate) use riak_client::RiakClient;
pub(crate) use riak_key_stream::RiakKeyStream;

/// 🧪 A client pointed at a wiremock server, for any test that needs Riak on speed dial.
#[cfg(test)]
pub(crate) fn client_for_mock(server: &wiremock::MockServer) -> RiakClient {
    let address = server.address();
    RiakClient::new(&crate::app_config::RiakConfig {
        host: address.ip().to_string(),
        port: address.port(),
        request_timeout_secs: Some(5),
    })
    .expect("💀 a client for the mock server should build")
}
