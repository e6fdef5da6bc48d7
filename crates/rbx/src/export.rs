// ai
//! 🎬 *[the key stream opens. keys arrive in clumps, whenever the ring feels like it.]*
//! *[twenty fetchers lean forward. one writer sharpens its pencil.]*
//! *[nobody knows when it ends. the tracker knows. the tracker always knows.]*
//!
//! 🪣 → 📄 The export pipeline:
//!
//! ```text
//!   KeySource ──keys──▶ WorkQueue ──N × KeyFetcher──▶ channel ──▶ RecordWriter ──▶ sink
//!   (lister task)        (bounded)   (GET per key)     (bounded)   (one owner)
//! ```
//!
//! 🧠 The only hard question is "are we done?". The queue going empty doesn't answer
//! it, because the stream may still be mid-listing. The stream ending doesn't answer
//! it, because fetches may still be in flight. [`ExportTracker`] answers it: done is
//! the stream having ended AND the queue being idle, whichever of the two happens last.
//!
//! 🦆 (the duck exported itself once. the file was empty. we don't talk about it.)

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_channel::{Receiver, Sender};
use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::app_config::AppConfig;
use crate::backends::{BucketStore, KeySource, KeySourceBackend, RecordSink, SinkBackend, StoreBackend};
use crate::common::Record;
use crate::progress::{ProgressMetrics, render_export_summary};
use crate::queue::{Handler, Pusher, QueueStats, WorkQueue};

// ⏲️ how often the progress bar gets fresh numbers
const PROGRESS_TICK: Duration = Duration::from_millis(250);

/// 🧭 Where an export is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ExportPhase {
    /// 🚰 keys still arriving
    Streaming,
    /// 🏁 listing over, fetches possibly still in flight
    StreamDone,
    /// ✅ listing over AND nothing left to fetch. Terminal.
    Finished,
}

/// 🧭 Two events, one verdict. Reaches `Finished` exactly once, and only after the
/// stream has ended while (or before) the queue sits idle.
#[derive(Debug)]
pub(crate) struct ExportTracker {
    phase: ExportPhase,
}

impl Default for ExportTracker {
    fn default() -> Self {
        Self {
            phase: ExportPhase::Streaming,
        }
    }
}

impl ExportTracker {
    pub(crate) fn phase(&self) -> ExportPhase {
        self.phase
    }

    /// 🏁 The key stream said it's done. If the queue is already idle, so are we.
    pub(crate) fn on_stream_end(&mut self, queue_idle: bool) -> ExportPhase {
        if self.phase == ExportPhase::Streaming {
            self.phase = ExportPhase::StreamDone;
        }
        self.settle(queue_idle)
    }

    /// 🔔 The queue went quiet. Only counts once the stream is over.
    pub(crate) fn on_queue_drained(&mut self, queue_idle: bool) -> ExportPhase {
        self.settle(queue_idle)
    }

    fn settle(&mut self, queue_idle: bool) -> ExportPhase {
        if self.phase == ExportPhase::StreamDone && queue_idle {
            self.phase = ExportPhase::Finished;
        }
        self.phase
    }
}

/// 🎛️ The slice of [`AppConfig`] an export actually reads.
#[derive(Debug, Clone)]
pub(crate) struct ExportSettings {
    pub bucket: String,
    pub file: PathBuf,
    pub pretty: bool,
    pub concurrency: usize,
    pub record_queue_capacity: usize,
    pub progress_bar: bool,
}

impl ExportSettings {
    pub(crate) fn from_config(app_config: &AppConfig) -> Self {
        Self {
            bucket: app_config.bucket.clone(),
            file: app_config.data_file(),
            pretty: app_config.pretty,
            concurrency: app_config.runtime.concurrency,
            record_queue_capacity: app_config.runtime.record_queue_capacity,
            progress_bar: app_config.runtime.progress_bar,
        }
    }
}

/// 🧾 How it went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ExportSummary {
    pub keys_discovered: usize,
    pub records_written: u64,
    pub keys_skipped: usize,
    pub peak_in_flight: usize,
}

impl ExportSummary {
    pub(crate) fn nothing_exported(&self) -> bool {
        self.keys_discovered == 0
    }
}

/// 📡 The per-key job: GET the object, wrap it up, hand it to the writer.
/// Errors bubble to the queue, which logs them and moves on to the next key.
#[derive(Debug)]
struct KeyFetcher {
    store: StoreBackend,
    bucket: String,
    records: Sender<Record>,
}

#[async_trait]
impl Handler<String> for KeyFetcher {
    async fn handle(&self, key: String) -> Result<()> {
        info!("📡 exporting key {}", key);
        let fetched = self
            .store
            .fetch(&self.bucket, &key)
            .await
            .with_context(|| format!("💀 could not fetch key '{}'", key))?;
        let record = Record::from_fetched(&self.bucket, &key, fetched);
        self.records
            .send(record)
            .await
            .map_err(|_| anyhow!("💀 the record writer hung up before key '{}' could be written", key))
    }
}

/// 🖋️ The RecordWriter: the one and only owner of the sink.
///
/// Takes records off a channel, renders each to a single line, hands it to the sink.
/// Every record goes through this one task, so lines never interleave.
#[derive(Debug)]
pub(crate) struct RecordWriter {
    rx: Receiver<Record>,
    sink: SinkBackend,
    pretty: bool,
}

impl RecordWriter {
    pub(crate) fn new(rx: Receiver<Record>, sink: SinkBackend, pretty: bool) -> Self {
        Self { rx, sink, pretty }
    }

    /// 🚀 Drain until every sender is gone, then close the sink. Resolves to the line count.
    pub(crate) fn start(mut self) -> JoinHandle<Result<u64>> {
        tokio::spawn(async move {
            debug!("📥 RecordWriter started draining channel...");
            let mut records_written = 0u64;
            while let Ok(record) = self.rx.recv().await {
                let line = record.render_line(self.pretty)?;
                self.sink
                    .send(line)
                    .await
                    .context("💀 RecordWriter failed to append a record")?;
                records_written += 1;
            }
            debug!("🏁 RecordWriter: channel closed after {} records. Shutting down.", records_written);
            self.sink.close().await.context("💀 RecordWriter failed to close the sink")?;
            Ok(records_written)
        })
    }
}

/// 🚰 The lister: read batches until the stream ends or breaks, pushing every key.
async fn list_keys(mut source: KeySourceBackend, pusher: Pusher<String>) -> Result<()> {
    while let Some(keys) = source.next_batch().await? {
        for key in keys {
            pusher.push(key)?;
        }
        info!("🔑 queue size: {}", pusher.pending());
    }
    info!("🏁 received all keys");
    Ok(())
}

/// 🚀 Run one export from an already-open key stream into an already-created sink.
///
/// Fetch failures skip the key. A broken key stream stops the discovery of new keys,
/// lets the ones already queued finish, and then comes back as an `Err`.
pub(crate) async fn export_bucket(
    settings: &ExportSettings,
    source: KeySourceBackend,
    store: StoreBackend,
    sink: SinkBackend,
) -> Result<ExportSummary> {
    let (record_tx, record_rx) = async_channel::bounded(settings.record_queue_capacity.max(1));
    let writer = RecordWriter::new(record_rx, sink, settings.pretty).start();

    // -- 🧵 the fetcher (and its Sender) lives only inside the workers. when they go, the writer goes.
    let fetcher = Arc::new(KeyFetcher {
        store,
        bucket: settings.bucket.clone(),
        records: record_tx,
    });
    let queue = WorkQueue::start(settings.concurrency, fetcher);
    let mut lister = tokio::spawn(list_keys(source, queue.pusher()));

    let mut tracker = ExportTracker::default();
    let mut progress = ProgressMetrics::new(&settings.bucket, settings.progress_bar);
    let mut ticker = tokio::time::interval(PROGRESS_TICK);
    let mut stream_failure: Option<anyhow::Error> = None;

    while tracker.phase() != ExportPhase::Finished {
        tokio::select! {
            listed = &mut lister, if tracker.phase() == ExportPhase::Streaming => {
                match listed {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        error!("💀 failed to fetch keys: {:#}", err);
                        stream_failure = Some(err);
                    }
                    Err(join_err) => {
                        error!("💀 the key lister died: {}", join_err);
                        stream_failure = Some(anyhow!(join_err).context("💀 the key lister task panicked"));
                    }
                }
                tracker.on_stream_end(queue.is_idle());
            }
            _ = queue.drained() => {
                tracker.on_queue_drained(queue.is_idle());
            }
            _ = ticker.tick() => {
                progress.update(&queue.stats());
            }
        }
    }

    progress.update(&queue.stats());
    progress.finish();

    let stats = queue.shutdown().await?;
    let records_written = writer
        .await
        .context("💀 the RecordWriter task panicked")??;
    let summary = summarize(&stats, records_written);

    if summary.nothing_exported() {
        info!("🫙 nothing exported");
    } else {
        info!(
            "✅ finished export of {} keys to {}",
            summary.keys_discovered,
            settings.file.display()
        );
        info!(
            "\n{}",
            render_export_summary(
                &settings.bucket,
                &settings.file,
                &stats,
                records_written,
                progress.elapsed()
            )
        );
    }

    match stream_failure {
        Some(err) => Err(err.context(format!(
            "💀 export of bucket '{}' is incomplete: the key listing broke off after {} keys",
            settings.bucket, summary.keys_discovered
        ))),
        None => Ok(summary),
    }
}

fn summarize(stats: &QueueStats, records_written: u64) -> ExportSummary {
    debug!(
        "📒 {} fetched, {} skipped, {} written",
        stats.succeeded(),
        stats.failed,
        records_written
    );
    ExportSummary {
        keys_discovered: stats.pushed,
        records_written,
        keys_skipped: stats.failed,
        peak_in_flight: stats.peak_in_flight,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::file::FileSink;
    use crate::backends::in_mem::{InMemoryKeySource, InMemorySink, InMemoryStore};
    use crate::backends::riak::client_for_mock;
    use serde_json::{Value, json};
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings(concurrency: usize) -> ExportSettings {
        ExportSettings {
            bucket: "users".to_string(),
            file: PathBuf::from("users.json"),
            pretty: false,
            concurrency,
            record_queue_capacity: 4,
            progress_bar: false,
        }
    }

    async fn seeded_store(failing: &[&str], keys: &[&str]) -> InMemoryStore {
        let store = InMemoryStore::with_failing_keys(failing);
        for key in keys {
            store
                .put_raw("users", key, format!("{{\"name\":\"{key}\"}}").as_bytes(), "application/json")
                .await;
        }
        store
    }

    async fn exported_keys(sink: &InMemorySink) -> Vec<String> {
        let mut keys: Vec<String> = sink
            .lines
            .lock()
            .await
            .iter()
            .map(|line| {
                let record: Value = serde_json::from_str(line).expect("every line is one JSON record");
                record["key"][1].as_str().unwrap_or_default().to_string()
            })
            .collect();
        keys.sort();
        keys
    }

    #[test]
    fn the_one_where_the_stream_ends_while_fetches_are_still_out() {
        let mut tracker = ExportTracker::default();
        assert_eq!(tracker.on_stream_end(false), ExportPhase::StreamDone);
        assert_eq!(tracker.on_queue_drained(true), ExportPhase::Finished);
    }

    #[test]
    fn the_one_where_the_queue_empties_before_the_stream_ends() {
        let mut tracker = ExportTracker::default();
        // -- 🫣 idle mid-listing is just a lull, not the end
        assert_eq!(tracker.on_queue_drained(true), ExportPhase::Streaming);
        assert_eq!(tracker.on_queue_drained(true), ExportPhase::Streaming);
        assert_eq!(tracker.on_stream_end(true), ExportPhase::Finished);
    }

    #[test]
    fn the_one_where_a_stale_drain_signal_does_not_finish_early() {
        let mut tracker = ExportTracker::default();
        tracker.on_stream_end(false);
        // -- 🔔 a permit left over from earlier, but there's still work in flight
        assert_eq!(tracker.on_queue_drained(false), ExportPhase::StreamDone);
        assert_eq!(tracker.on_queue_drained(true), ExportPhase::Finished);
        assert_eq!(tracker.on_stream_end(true), ExportPhase::Finished, "finished is terminal");
    }

    #[tokio::test]
    async fn the_one_where_one_bad_key_does_not_sink_the_export() -> Result<()> {
        let store = seeded_store(&["b"], &["a", "b", "c"]).await;
        let sink = InMemorySink::default();

        let summary = export_bucket(
            &settings(20),
            KeySourceBackend::InMemory(InMemoryKeySource::new(vec![vec!["a", "b", "c"]])),
            StoreBackend::InMemory(store),
            SinkBackend::InMemory(sink.clone()),
        )
        .await?;

        assert_eq!(summary.keys_discovered, 3);
        assert_eq!(summary.records_written, 2);
        assert_eq!(summary.keys_skipped, 1);
        assert_eq!(exported_keys(&sink).await, vec!["a", "c"]);
        assert!(*sink.closed.lock().await, "the sink must be closed on the way out");
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_queue_runs_dry_between_batches() -> Result<()> {
        let keys = ["a", "b", "c", "d"];
        let store = seeded_store(&[], &keys).await;
        let sink = InMemorySink::default();
        let source = InMemoryKeySource::new(vec![vec!["a"], vec!["b", "c"], vec![], vec!["d"]])
            .pausing(Duration::from_millis(30));

        let summary = export_bucket(
            &settings(2),
            KeySourceBackend::InMemory(source),
            StoreBackend::InMemory(store),
            SinkBackend::InMemory(sink.clone()),
        )
        .await?;

        assert_eq!(summary.keys_discovered, 4);
        assert_eq!(summary.records_written, 4);
        assert_eq!(exported_keys(&sink).await, keys.to_vec());
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_bucket_is_empty() -> Result<()> {
        let sink = InMemorySink::default();
        let summary = export_bucket(
            &settings(20),
            KeySourceBackend::InMemory(InMemoryKeySource::new(vec![vec![]])),
            StoreBackend::InMemory(InMemoryStore::default()),
            SinkBackend::InMemory(sink.clone()),
        )
        .await?;

        assert!(summary.nothing_exported());
        assert!(sink.lines.lock().await.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_listing_breaks_but_queued_keys_still_land() -> Result<()> {
        let store = seeded_store(&[], &["a", "b"]).await;
        let sink = InMemorySink::default();

        let err = export_bucket(
            &settings(1),
            KeySourceBackend::InMemory(InMemoryKeySource::new(vec![vec!["a", "b"]]).failing_at_end()),
            StoreBackend::InMemory(store),
            SinkBackend::InMemory(sink.clone()),
        )
        .await
        .expect_err("a broken listing must fail the export");

        assert!(format!("{err:#}").contains("incomplete"));
        assert_eq!(exported_keys(&sink).await, vec!["a", "b"]);
        assert!(*sink.closed.lock().await);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_ceiling_holds_under_a_crowd() -> Result<()> {
        let keys: Vec<String> = (0..60).map(|n| format!("k{n:02}")).collect();
        let key_refs: Vec<&str> = keys.iter().map(String::as_str).collect();
        let store = seeded_store(&[], &key_refs).await;
        let sink = InMemorySink::default();
        let batches = key_refs.chunks(7).map(|chunk| chunk.to_vec()).collect();

        let summary = export_bucket(
            &settings(3),
            KeySourceBackend::InMemory(InMemoryKeySource::new(batches)),
            StoreBackend::InMemory(store),
            SinkBackend::InMemory(sink.clone()),
        )
        .await?;

        assert_eq!(summary.records_written, 60);
        assert!(summary.peak_in_flight <= 3);
        assert_eq!(exported_keys(&sink).await, keys);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_pretty_records_still_end_in_one_newline() -> Result<()> {
        let store = seeded_store(&[], &["a"]).await;
        let sink = InMemorySink::default();
        let pretty = ExportSettings {
            pretty: true,
            ..settings(1)
        };

        export_bucket(
            &pretty,
            KeySourceBackend::InMemory(InMemoryKeySource::new(vec![vec!["a"]])),
            StoreBackend::InMemory(store),
            SinkBackend::InMemory(sink.clone()),
        )
        .await?;

        let lines = sink.lines.lock().await;
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("\n\t\"key\""));
        assert!(lines[0].ends_with("}\n"));
        assert!(!lines[0].ends_with("\n\n"));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_real_http_export_lands_in_a_real_file() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/buckets/users/keys"))
            .and(query_param("keys", "stream"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                "{\"keys\":[\"a\",\"b\"]}{\"keys\":[]}{\"keys\":[\"c\"]}",
                "application/json",
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/riak/users/a"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw("{\"name\":\"ada\"}", "application/json")
                    .insert_header("x-riak-vclock", "a85hYGBgzGDKBVIc"),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/riak/users/b"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/riak/users/c"))
            .respond_with(ResponseTemplate::new(200).set_body_raw("not json{", "text/plain"))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir()?;
        let file = dir.path().join("users.json");
        let client = client_for_mock(&server);
        let source = client.stream_keys("users").await?;
        let sink = FileSink::create(&file).await?;
        let export_settings = ExportSettings {
            file: file.clone(),
            ..settings(20)
        };

        let summary = export_bucket(
            &export_settings,
            KeySourceBackend::Riak(source),
            StoreBackend::Riak(client),
            SinkBackend::File(sink),
        )
        .await?;
        assert_eq!(summary.keys_discovered, 3);
        assert_eq!(summary.records_written, 2);

        let mut records: Vec<Value> = std::fs::read_to_string(&file)?
            .lines()
            .map(serde_json::from_str)
            .collect::<std::result::Result<_, _>>()?;
        records.sort_by_key(|record| record["key"][1].as_str().unwrap_or_default().to_string());

        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["key"], json!(["users", "a"]));
        assert_eq!(records[0]["data"], json!({"name": "ada"}));
        assert_eq!(records[0]["headers"]["x-riak-vclock"], json!("a85hYGBgzGDKBVIc"));
        assert_eq!(records[1]["key"], json!(["users", "c"]));
        assert_eq!(records[1]["data"], json!("bm90IGpzb257"));
        Ok(())
    }
}
