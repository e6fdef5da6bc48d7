use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::{
    fs::{File, OpenOptions},
    io::{self, AsyncWriteExt},
};
use tracing::trace;

use crate::backends::RecordSink;

/// 🚰 FileSink — appends fully rendered record lines to a brand-new file. I/O only.
///
/// It's a BufWriter around a tokio `File`. Simple. Honest. Does not complain.
/// Does not retry. Does not have opinions about your data. It writes what you give it.
///
/// 🧠 Knowledge graph: exactly one `FileSink` exists per export and exactly one task
/// (the `RecordWriter`) owns it. One owner, one `write_all` per record, so two records'
/// bytes can never braid together no matter how many fetchers are racing upstream.
///
/// ⚠️ Unlike its ancestors, this sink does NOT truncate. It creates, or it refuses.
#[derive(Debug)]
pub(crate) struct FileSink {
    file_buf: io::BufWriter<File>,
    path: PathBuf,
    bytes_written: u64,
}

impl FileSink {
    /// 🚀 Create the output file, atomically refusing if anything already lives at `path`.
    ///
    /// `create_new` is the check AND the create in one syscall, so there is no window
    /// where someone else's file can sneak in between "does it exist?" and "open it".
    pub(crate) async fn create(path: &Path) -> Result<Self> {
        let file_handle = OpenOptions::new()
            .append(true)
            .create_new(true)
            .open(path)
            .await;

        let file_handle = match file_handle {
            Ok(handle) => handle,
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                anyhow::bail!(
                    "💀 the output file '{}' already exists. We don't overwrite exports. \
                     Move it, rename it, or pick another --file.",
                    path.display()
                );
            }
            Err(err) => {
                return Err(err).with_context(|| {
                    format!(
                        "💀 The sink file '{}' could not be conjured into existence. \
                         We stared at the path. The path stared back. \
                         One of us was wrong about whether the parent directory existed.",
                        path.display()
                    )
                });
            }
        };

        Ok(Self {
            file_buf: io::BufWriter::new(file_handle),
            path: path.to_path_buf(),
            bytes_written: 0,
        })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl RecordSink for FileSink {
    /// 📡 One line, one `write_all`. That's the whole job.
    async fn send(&mut self, line: String) -> Result<()> {
        trace!(
            "📬 record of {} bytes walked into the file sink — writing it all down",
            line.len()
        );
        self.file_buf
            .write_all(line.as_bytes())
            .await
            .with_context(|| format!("💀 failed to append a record to '{}'", self.path.display()))?;
        self.bytes_written += line.len() as u64;
        Ok(())
    }

    /// 🗑️ Flush the BufWriter. async Drop is not a thing, so this is not optional.
    async fn close(&mut self) -> Result<()> {
        trace!(
            "🎬 final flush of '{}' after {} bytes. the BufWriter empties its soul to disk",
            self.path.display(),
            self.bytes_written
        );
        self.file_buf.flush().await.with_context(|| {
            format!(
                "💀 Error flushing '{}' — the bytes are still in memory, the disk remains unwritten.",
                self.path.display()
            )
        })
    }
}
