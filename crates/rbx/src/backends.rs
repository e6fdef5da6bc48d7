//! 🔌 Backends — where the real I/O happens.
//!
//! 🚰 Key sources pour key names, stores hand out (and take back) values,
//! and record sinks slurp up the rendered lines. In between, we panic!
//! (kidding, we use anyhow)
//!
//! 🎭 This module is the casting agency. Need keys from a live Riak ring?
//! Values over HTTP? A file that only ever grows? We've got a backend for that.
//! And for the tests, we've got RAM, which is the cheapest actor in town.
//!
//! 🦆 The duck is here because every file must have one. This is law. Do not question the duck.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::common::{FetchedObject, WriteMeta};

pub(crate) mod file;
#[cfg(test)]
pub(crate) mod in_mem;
pub(crate) mod riak;

// ===== Key Source =====

/// 🚰 A source of key names, one batch at a time.
///
/// # Contract 📜
/// - `Ok(Some(keys))` while keys flow. A batch is never empty.
/// - `Ok(None)` = the listing is over. The well is dry. 🏁
/// - `Err(...)` when the listing itself broke. Callers decide how loud to be about it.
#[async_trait]
pub(crate) trait KeySource: std::fmt::Debug + Send {
    async fn next_batch(&mut self) -> Result<Option<Vec<String>>>;
}

/// 🎭 The many faces of a key source. Callers never need to know if the keys
/// came from a ring of overworked vnodes or from a `Vec` in a test.
#[derive(Debug)]
pub(crate) enum KeySourceBackend {
    Riak(riak::RiakKeyStream),
    #[cfg(test)]
    InMemory(in_mem::InMemoryKeySource),
}

#[async_trait]
impl KeySource for KeySourceBackend {
    async fn next_batch(&mut self) -> Result<Option<Vec<String>>> {
        match self {
            KeySourceBackend::Riak(stream) => stream.next_batch().await,
            #[cfg(test)]
            KeySourceBackend::InMemory(source) => source.next_batch().await,
        }
    }
}

// ===== Bucket Store =====

/// 🪣 Per-key reads and writes against one store. Shared by every worker, hence `&self`.
///
/// # Contract 📜
/// - `fetch` succeeds only for a found object (HTTP 200). Anything else is an `Err`
///   whose message carries the status and the URL, because that's what you grep for at 3am.
/// - `save` succeeds only when the store acknowledged the write.
/// - Neither retries. Retries are somebody else's product.
#[async_trait]
pub(crate) trait BucketStore: std::fmt::Debug + Send + Sync {
    async fn fetch(&self, bucket: &str, key: &str) -> Result<FetchedObject>;
    async fn save(&self, bucket: &str, key: &str, data: &Value, meta: &WriteMeta) -> Result<()>;
}

#[derive(Debug, Clone)]
pub(crate) enum StoreBackend {
    Riak(riak::RiakClient),
    #[cfg(test)]
    InMemory(in_mem::InMemoryStore),
}

#[async_trait]
impl BucketStore for StoreBackend {
    async fn fetch(&self, bucket: &str, key: &str) -> Result<FetchedObject> {
        match self {
            StoreBackend::Riak(client) => client.fetch(bucket, key).await,
            #[cfg(test)]
            StoreBackend::InMemory(store) => store.fetch(bucket, key).await,
        }
    }

    async fn save(&self, bucket: &str, key: &str, data: &Value, meta: &WriteMeta) -> Result<()> {
        match self {
            StoreBackend::Riak(client) => client.save(bucket, key, data, meta).await,
            #[cfg(test)]
            StoreBackend::InMemory(store) => store.save(bucket, key, data, meta).await,
        }
    }
}

// ===== Record Sink =====

/// 🕳️ A sink that appends fully rendered record lines — pure I/O, zero logic.
///
/// # Contract 📜
/// - `send` appends one complete line in one write. Never half a record.
/// - `close` flushes, finalizes, and bids the data a fond farewell. MUST be called.
///   Skipping `close` is a bug. It is also considered rude.
#[async_trait]
pub(crate) trait RecordSink: std::fmt::Debug + Send {
    async fn send(&mut self, line: String) -> Result<()>;
    async fn close(&mut self) -> Result<()>;
}

#[derive(Debug)]
pub(crate) enum SinkBackend {
    File(file::FileSink),
    #[cfg(test)]
    InMemory(in_mem::InMemorySink),
}

#[async_trait]
impl RecordSink for SinkBackend {
    async fn send(&mut self, line: String) -> Result<()> {
        match self {
            SinkBackend::File(sink) => sink.send(line).await,
            #[cfg(test)]
            SinkBackend::InMemory(sink) => sink.send(line).await,
        }
    }

    async fn close(&mut self) -> Result<()> {
        match self {
            SinkBackend::File(sink) => sink.close().await,
            #[cfg(test)]
            SinkBackend::InMemory(sink) => sink.close().await,
        }
    }
}
