//! 🪣 rbx — Riak bucket export, and import back again.
//!
//! 🚀 One entry point, [`run`], two directions:
//! - export: stream a bucket's keys, fetch every value, append one JSON line per record
//! - import: read those lines (or a JSON array) and write every entry back
//!
//! Everything else in here is plumbing for those two sentences. 🦆

pub mod app_config;
mod backends;
mod common;
mod export;
mod import;
mod progress;
mod queue;

use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::app_config::{AppConfig, Mode};
use crate::backends::file::FileSink;
use crate::backends::riak::RiakClient;
use crate::backends::{KeySourceBackend, SinkBackend, StoreBackend};
use crate::export::{ExportSettings, export_bucket};
use crate::import::{ImportSettings, import_bucket};

/// 🚀 Run one export or one import, as the config says.
pub async fn run(app_config: AppConfig) -> Result<()> {
    info!(
        "🪣 bucket {} on {} ({:?}, concurrency {}, meta {})",
        app_config.bucket,
        app_config.riak.base_url(),
        app_config.mode,
        app_config.runtime.concurrency,
        app_config.meta
    );

    let client = RiakClient::new(&app_config.riak)?;
    match app_config.mode {
        Mode::Export => run_export(&app_config, client).await,
        Mode::Import => {
            let settings = ImportSettings::from_config(&app_config);
            let summary = import_bucket(&settings, StoreBackend::Riak(client)).await?;
            debug!("📥 import of {} done, {} entries in", settings.file.display(), summary.entries_inserted);
            Ok(())
        }
    }
}

async fn run_export(app_config: &AppConfig, client: RiakClient) -> Result<()> {
    let settings = ExportSettings::from_config(app_config);

    // -- 🛑 the file comes first. if it already exists, Riak never hears from us.
    let sink = FileSink::create(&settings.file).await?;

    if app_config.delete {
        warn!(
            "⚠️ DANGER: --delete was given. rbx does not delete exported keys; \
             they stay in bucket {} exactly as they were.",
            app_config.bucket
        );
    }

    let source = match client.stream_keys(&app_config.bucket).await {
        Ok(source) => source,
        Err(err) => {
            discard_empty_output(sink.path()).await;
            return Err(err).context("💀 failed to fetch keys");
        }
    };

    let exported = export_bucket(
        &settings,
        KeySourceBackend::Riak(source),
        StoreBackend::Riak(client),
        SinkBackend::File(sink),
    )
    .await;
    let summary = match exported {
        Ok(summary) => summary,
        Err(err) => {
            // -- 🧹 a listing that broke before its first key leaves nothing worth keeping
            discard_empty_output(&settings.file).await;
            return Err(err);
        }
    };

    if summary.nothing_exported() {
        discard_empty_output(&settings.file).await;
    } else if summary.keys_skipped > 0 {
        warn!(
            "⚠️ {} of {} keys were skipped and are NOT in {} ({} records written, peak {} in flight). \
             The warnings above name them.",
            summary.keys_skipped,
            summary.keys_discovered,
            settings.file.display(),
            summary.records_written,
            summary.peak_in_flight
        );
    }
    Ok(())
}

/// 🧹 Remove an output file we created, but only while it's still empty.
async fn discard_empty_output(path: &Path) {
    let is_empty = matches!(tokio::fs::metadata(path).await, Ok(metadata) if metadata.len() == 0);
    if !is_empty {
        return;
    }
    if let Err(err) = tokio::fs::remove_file(path).await {
        warn!("⚠️ could not remove the empty export file '{}': {}", path.display(), err);
    }
}
