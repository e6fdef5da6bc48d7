// AI
//! 📊 progress.rs — "Are we there yet?" — every export, every time, forever.
//!
//! 🚀 Two jobs:
//! - a live progress bar (when asked for), fed with queue stats on a tick, and
//! - a summary table at the end, so the last thing you see is a number you can trust.
//!
//! ⚠️  Warning: Watching this progress bar will not make it go faster.
//! Neither will refreshing it. We've tried. Science says no.
//!
//! 🦆 The duck has nothing to do with this module. It's just vibing.

use std::collections::VecDeque;
use std::path::Path;
use std::time::{Duration, Instant};

use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets::NOTHING};
use indicatif::{ProgressBar, ProgressStyle};

use crate::queue::QueueStats;

/// 🔢 Formats a number with commas for the 3 people in the audience who like readability.
/// "1000000 keys" → "1,000,000 keys" — you're welcome, eyes.
fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().enumerate() {
        if i > 0 && (s.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result
}

/// ⏱️ Formats a Duration into MM:SS or HH:MM:SS.
/// If it shows HH:MM:SS, you should probably call your mom. It's been a while.
fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}", minutes, seconds)
    }
}

/// 📊 The brains behind the progress display. Tracks keys, rates, and your sanity.
///
/// Uses a sliding 5-second window for the rate so a slow vnode doesn't scare you.
///
/// # Ancient Proverb
/// "He who lists a bucket without a progress bar, lists alone and in darkness."
pub(crate) struct ProgressMetrics {
    /// 🏷️ what are we even exporting? a name to display in the UI
    bucket: String,
    progress_bar: ProgressBar,
    /// 🔄 sliding window of (timestamp, completed) for rate calculation
    rate_samples: VecDeque<(Instant, u64)>,
    start_time: Instant,
}

impl std::fmt::Debug for ProgressMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // -- 🎭 custom Debug impl because ProgressBar is a diva and doesn't derive Debug
        f.debug_struct("ProgressMetrics")
            .field("bucket", &self.bucket)
            .field("elapsed", &self.start_time.elapsed())
            .finish()
    }
}

impl ProgressMetrics {
    /// 🚀 Spin up a new ProgressMetrics. `visible = false` keeps the bar hidden so
    /// the per-key log lines have the terminal to themselves.
    pub(crate) fn new(bucket: &str, visible: bool) -> Self {
        // -- 📏 length 0: nobody knows how many keys a bucket holds until it stops listing them
        let progress_bar = if visible {
            ProgressBar::new(0)
        } else {
            ProgressBar::hidden()
        };
        // -- 🐛 the template is hardcoded; if indicatif ever disagrees, the plain bar will do
        let style = ProgressStyle::default_bar()
            .template("{msg}\n| [{bar:40.cyan/blue}] {pos}/{len}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-");
        progress_bar.set_style(style);

        let start_time = Instant::now();
        let mut rate_samples = VecDeque::new();
        rate_samples.push_back((start_time, 0u64));

        Self {
            bucket: bucket.to_string(),
            progress_bar,
            rate_samples,
            start_time,
        }
    }

    /// 🔄 Feed the metrics with the queue's books. Discovered keys stretch the bar,
    /// completed keys move it.
    pub(crate) fn update(&mut self, stats: &QueueStats) {
        self.progress_bar.set_length(stats.pushed as u64);
        self.progress_bar.set_position(stats.completed as u64);
        let keys_per_sec = self.keys_per_sec(stats.completed as u64);
        self.progress_bar.set_message(format!(
            "bucket: {}\n{}",
            self.bucket,
            render_live_table(stats, keys_per_sec, self.start_time.elapsed())
        ));
    }

    /// ✅ Mark the progress bar done. Ring the bell. We made it.
    pub(crate) fn finish(&self) {
        self.progress_bar.finish();
    }

    pub(crate) fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// 📈 Completed keys per second over the last five seconds.
    fn keys_per_sec(&mut self, completed: u64) -> f64 {
        let now = Instant::now();
        let window = Duration::from_secs(5);
        while let Some(&(timestamp, _)) = self.rate_samples.front() {
            if now.duration_since(timestamp) > window {
                self.rate_samples.pop_front();
            } else {
                break;
            }
        }
        self.rate_samples.push_back((now, completed));

        match self.rate_samples.front() {
            Some(&(oldest_time, oldest_completed)) => {
                let elapsed = now.duration_since(oldest_time).as_secs_f64();
                if elapsed > 0.0 {
                    completed.saturating_sub(oldest_completed) as f64 / elapsed
                } else {
                    0.0
                }
            }
            None => 0.0,
        }
    }
}

// 🍽️ two columns, right-aligned, no borders (preset: NOTHING). we're minimalists.
fn borderless_table() -> Table {
    let mut table = Table::new();
    table.load_preset(NOTHING);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table
}

fn render_live_table(stats: &QueueStats, keys_per_sec: f64, elapsed: Duration) -> Table {
    let mut table = borderless_table();
    table.add_row(vec![
        Cell::new(format!("{} keys/s", format_number(keys_per_sec as u64)))
            .set_alignment(CellAlignment::Right),
        Cell::new(format!("{} in flight", stats.in_flight)).set_alignment(CellAlignment::Right),
    ]);
    table.add_row(vec![
        Cell::new(format!("{} failed", format_number(stats.failed as u64)))
            .set_alignment(CellAlignment::Right),
        Cell::new(format!("{} elapsed", format_duration(elapsed)))
            .set_alignment(CellAlignment::Right),
    ]);
    table
}

/// 🧾 The closing credits of an export.
pub(crate) fn render_export_summary(
    bucket: &str,
    file: &Path,
    stats: &QueueStats,
    records_written: u64,
    elapsed: Duration,
) -> String {
    let mut table = borderless_table();
    let rows: [(&str, String); 7] = [
        ("bucket", bucket.to_string()),
        ("file", file.display().to_string()),
        ("keys discovered", format_number(stats.pushed as u64)),
        ("records written", format_number(records_written)),
        ("keys skipped", format_number(stats.failed as u64)),
        ("peak in flight", stats.peak_in_flight.to_string()),
        ("elapsed", format_duration(elapsed)),
    ];
    for (label, value) in rows {
        table.add_row(vec![
            Cell::new(label).set_alignment(CellAlignment::Right),
            Cell::new(value),
        ]);
    }
    table.to_string()
}
