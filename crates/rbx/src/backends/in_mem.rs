//! # Previously, on rbx...
//!
//! 🎬 The keys were trapped. Stranded in a Riak ring that didn't exist, because
//! this is a unit test and nobody wanted to boot five Erlang VMs to check a counter.
//! Someone had to pretend to be the cluster. Someone had to be brave.
//!
//! That someone was this module.
//!
//! `in_mem` provides an in-memory [`KeySource`], [`BucketStore`] and [`RecordSink`]
//! for tests. The store keeps bodies the way Riak would after a write, so an export
//! can read back exactly what an import put in. Keys can be marked as failing, for
//! when a test needs the cluster to have a bad day on cue.
//!
//! 🦆
//!
//! ⚠️ This is NOT for production. It's compiled for tests only, and it knows it.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::backends::{BucketStore, KeySource, RecordSink};
use crate::common::{FetchedObject, HeaderValue, Headers, WriteMeta};

/// 🚰 Hands out pre-baked key batches, then `None`. Empty batches are skipped, like Riak's.
#[derive(Debug, Default)]
pub(crate) struct InMemoryKeySource {
    batches: VecDeque<Vec<String>>,
    /// 💥 after the batches run out, fail instead of ending cleanly
    fail_at_end: bool,
    /// 🐌 a nap before every batch, so the queue can run dry between them
    pause: Option<Duration>,
}

impl InMemoryKeySource {
    pub(crate) fn new(batches: Vec<Vec<&str>>) -> Self {
        Self {
            batches: batches
                .into_iter()
                .map(|batch| batch.into_iter().map(str::to_string).collect())
                .collect(),
            fail_at_end: false,
            pause: None,
        }
    }

    pub(crate) fn failing_at_end(mut self) -> Self {
        self.fail_at_end = true;
        self
    }

    pub(crate) fn pausing(mut self, pause: Duration) -> Self {
        self.pause = Some(pause);
        self
    }
}

#[async_trait]
impl KeySource for InMemoryKeySource {
    async fn next_batch(&mut self) -> Result<Option<Vec<String>>> {
        if let Some(pause) = self.pause {
            tokio::time::sleep(pause).await;
        }
        while let Some(batch) = self.batches.pop_front() {
            if !batch.is_empty() {
                return Ok(Some(batch));
            }
        }
        if self.fail_at_end {
            anyhow::bail!("💀 the pretend key stream fell over, as scripted");
        }
        Ok(None)
    }
}

/// 📦 One stored object: the body bytes and what it was written with.
#[derive(Debug, Clone)]
pub(crate) struct StoredObject {
    pub body: Vec<u8>,
    pub content_type: String,
    pub meta: WriteMeta,
}

/// 🪣 A bucket-store that lives and dies in RAM. Clone it freely; clones share the data.
#[derive(Debug, Default, Clone)]
pub(crate) struct InMemoryStore {
    objects: Arc<Mutex<BTreeMap<(String, String), StoredObject>>>,
    failing_keys: Arc<BTreeSet<String>>,
}

impl InMemoryStore {
    /// 🧪 Keys in `failing_keys` answer every fetch and save with a 500-flavoured error.
    pub(crate) fn with_failing_keys(failing_keys: &[&str]) -> Self {
        Self {
            objects: Arc::default(),
            failing_keys: Arc::new(failing_keys.iter().map(|key| key.to_string()).collect()),
        }
    }

    /// 🌱 Seed an object directly, as if someone had written it long ago.
    pub(crate) async fn put_raw(&self, bucket: &str, key: &str, body: &[u8], content_type: &str) {
        self.objects.lock().await.insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                body: body.to_vec(),
                content_type: content_type.to_string(),
                meta: WriteMeta::default(),
            },
        );
    }

    pub(crate) async fn get(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        self.objects
            .lock()
            .await
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    pub(crate) async fn keys(&self, bucket: &str) -> Vec<String> {
        self.objects
            .lock()
            .await
            .keys()
            .filter(|(stored_bucket, _)| stored_bucket == bucket)
            .map(|(_, key)| key.clone())
            .collect()
    }
}

#[async_trait]
impl BucketStore for InMemoryStore {
    async fn fetch(&self, bucket: &str, key: &str) -> Result<FetchedObject> {
        if self.failing_keys.contains(key) {
            anyhow::bail!("💀 GET /riak/{bucket}/{key} answered 500 Internal Server Error");
        }
        let Some(stored) = self.get(bucket, key).await else {
            anyhow::bail!("💀 GET /riak/{bucket}/{key} answered 404 Not Found");
        };
        let mut headers = Headers::new();
        headers.insert(
            "content-type".to_string(),
            HeaderValue::Single(stored.content_type.clone()),
        );
        Ok(FetchedObject {
            headers,
            body: stored.body,
        })
    }

    async fn save(&self, bucket: &str, key: &str, data: &Value, meta: &WriteMeta) -> Result<()> {
        if self.failing_keys.contains(key) {
            anyhow::bail!("💀 PUT /riak/{bucket}/{key} answered 500 Internal Server Error");
        }
        // -- 🪞 same body rules as the HTTP client
        let (body, content_type) = meta.encode_body(data)?;
        self.objects.lock().await.insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                body,
                content_type,
                meta: meta.clone(),
            },
        );
        Ok(())
    }
}

/// 📦 A sink that never forgets. Clone-able so tests can peek after handing it off.
#[derive(Debug, Default, Clone)]
pub(crate) struct InMemorySink {
    pub(crate) lines: Arc<Mutex<Vec<String>>>,
    pub(crate) closed: Arc<Mutex<bool>>,
}

#[async_trait]
impl RecordSink for InMemorySink {
    async fn send(&mut self, line: String) -> Result<()> {
        self.lines.lock().await.push(line);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        *self.closed.lock().await = true;
        Ok(())
    }
}
