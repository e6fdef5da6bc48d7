use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use serde_json::Value;
use tracing::trace;

use crate::backends::KeySource;

/// 📦 One chunk of the listing. Riak sends `{"keys":[...]}` until it runs out,
/// and occasionally `{"error": ...}` when a vnode has a bad night.
#[derive(Debug, Deserialize)]
struct KeyChunk {
    #[serde(default)]
    keys: Vec<String>,
    #[serde(default)]
    error: Option<Value>,
}

/// 🚰 The streaming key listing, parsed as the bytes trickle in.
///
/// The body is a run of concatenated JSON objects with no separators, split across
/// HTTP chunks wherever the network felt like splitting them. We keep a buffer,
/// peel complete objects off the front, and read more only when the buffer holds
/// nothing but a half-finished object.
#[derive(Debug)]
pub(crate) struct RiakKeyStream {
    response: reqwest::Response,
    url: Url,
    pending: Vec<u8>,
    exhausted: bool,
}

impl RiakKeyStream {
    pub(crate) fn new(response: reqwest::Response, url: Url) -> Self {
        Self {
            response,
            url,
            pending: Vec::new(),
            exhausted: false,
        }
    }

    /// 🔪 Peel one complete chunk off the front of the buffer, if there is one.
    /// A truncated object is not an error yet; it's a cliffhanger.
    fn take_chunk(&mut self) -> Result<Option<KeyChunk>> {
        let (next, consumed) = {
            let mut stream =
                serde_json::Deserializer::from_slice(&self.pending).into_iter::<KeyChunk>();
            let next = stream.next();
            (next, stream.byte_offset())
        };

        match next {
            Some(Ok(chunk)) => {
                self.pending.drain(..consumed);
                Ok(Some(chunk))
            }
            Some(Err(err)) if err.is_eof() => Ok(None),
            Some(Err(err)) => Err(err).with_context(|| {
                format!("💀 the key stream from {} sent something that isn't a key chunk", self.url)
            }),
            None => {
                // -- 🧹 nothing but whitespace left. sweep it up.
                self.pending.clear();
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl KeySource for RiakKeyStream {
    async fn next_batch(&mut self) -> Result<Option<Vec<String>>> {
        loop {
            while let Some(chunk) = self.take_chunk()? {
                if let Some(error) = chunk.error {
                    anyhow::bail!("💀 the key stream from {} reported an error: {}", self.url, error);
                }
                // -- 🫥 empty chunks are Riak clearing its throat. keep listening.
                if !chunk.keys.is_empty() {
                    trace!("🔑 {} keys arrived from the stream", chunk.keys.len());
                    return Ok(Some(chunk.keys));
                }
            }

            if self.exhausted {
                if !self.pending.is_empty() {
                    anyhow::bail!(
                        "💀 the key stream from {} ended mid-chunk with {} bytes unparsed",
                        self.url,
                        self.pending.len()
                    );
                }
                return Ok(None);
            }

            match self
                .response
                .chunk()
                .await
                .with_context(|| format!("💀 the key stream from {} broke off", self.url))?
            {
                Some(bytes) => self.pending.extend_from_slice(&bytes),
                None => self.exhausted = true,
            }
        }
    }
}
