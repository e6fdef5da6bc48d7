//! 📄 → 🪣 The import side. Read the file, write every entry back, stop at the first no.
//!
//! 🧠 Unlike export, import is all-or-nothing-ish: entries go out `concurrency` at a time,
//! and the first failed write ends the run with an error. Writes already in flight may
//! still land; nothing new starts. There is no "skipped" column here.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Context, Result};
use futures::{StreamExt, TryStreamExt};
use tracing::info;

use crate::app_config::AppConfig;
use crate::backends::{BucketStore, StoreBackend};
use crate::common::parse_import_entries;

/// 🎛️ What an import needs to know, and nothing it doesn't.
#[derive(Debug, Clone)]
pub(crate) struct ImportSettings {
    pub bucket: String,
    pub file: PathBuf,
    pub concurrency: usize,
}

impl ImportSettings {
    pub(crate) fn from_config(app_config: &AppConfig) -> Self {
        Self {
            bucket: app_config.bucket.clone(),
            file: app_config.data_file(),
            concurrency: app_config.runtime.concurrency,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ImportSummary {
    pub entries_inserted: usize,
}

/// 🚀 Replay an import file into the bucket.
///
/// 💀 Fails before touching the store if the file is missing or doesn't parse.
/// Fails after touching it if any single write is refused.
pub(crate) async fn import_bucket(settings: &ImportSettings, store: StoreBackend) -> Result<ImportSummary> {
    let file_exists = tokio::fs::try_exists(&settings.file)
        .await
        .with_context(|| format!("💀 could not check whether '{}' exists", settings.file.display()))?;
    if !file_exists {
        anyhow::bail!(
            "💀 the import file does not exist: '{}'",
            settings.file.display()
        );
    }

    let contents = tokio::fs::read_to_string(&settings.file)
        .await
        .with_context(|| format!("💀 could not read the import file '{}'", settings.file.display()))?;
    let entries = parse_import_entries(&contents)
        .with_context(|| format!("💀 '{}' is not an import file we can read", settings.file.display()))?;
    info!("📖 {} entries read from {}", entries.len(), settings.file.display());

    let inserted = AtomicUsize::new(0);
    futures::stream::iter(entries)
        .map(Ok::<_, anyhow::Error>)
        .try_for_each_concurrent(Some(settings.concurrency.max(1)), |entry| {
            let store = &store;
            let inserted = &inserted;
            async move {
                let key = entry.key.name();
                info!("📥 inserting entry with key {}", key);
                store
                    .save(&settings.bucket, key, &entry.data, &entry.write_meta())
                    .await
                    .with_context(|| format!("💀 failed to insert key '{}'", key))?;
                inserted.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await
        .with_context(|| format!("💀 import into bucket '{}' stopped early", settings.bucket))?;

    let entries_inserted = inserted.into_inner();
    info!("✅ {} entries inserted into bucket {}", entries_inserted, settings.bucket);
    Ok(ImportSummary { entries_inserted })
}
