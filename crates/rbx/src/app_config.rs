//! 🔧 App Configuration — the sacred defaults-to-env-to-TOML-to-flags pipeline.
//!
//! 📡 "Bucket not found: We looked everywhere. Under the couch. Behind the fridge.
//! In the ring. Nothing." — every Riak operator at 3am 🦆
//!
//! 🏗️ Powered by Figment, because manually parsing env vars is a form of
//! self-harm that even the borrow checker wouldn't approve of.
//!
//! 🧠 Layering, lowest to highest precedence:
//!   serde defaults → `RBX_*` env vars → optional TOML file → CLI overrides.
//! The CLI wins every argument. Like a toddler. A very well-typed toddler.

use std::path::{Path, PathBuf};

use anyhow::Context;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use tracing::info;

// -- 🎯 the numbers nobody argues with, because the original tool picked them first
const DEFAULT_HOST: &str = "localhost";
const DEFAULT_PORT: u16 = 8098;
pub const DEFAULT_CONCURRENCY: usize = 20;

/// 🔀 Which way the data flows this run. Out of the bucket, or back into it.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// 🪣 → 📄 stream keys, fetch values, append JSON lines
    #[default]
    Export,
    /// 📄 → 🪣 read entries, write them back
    Import,
}

/// 📦 The AppConfig: one struct to rule them all, one bucket per run.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    /// 🪣 The one and only bucket this run touches.
    pub bucket: String,
    /// 📄 Data file. `None` means `{bucket}.json`, resolved by [`AppConfig::data_file`].
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub mode: Mode,
    /// 🎨 Tab-indented records in the export file. Readable. Large. Your call.
    #[serde(default)]
    pub pretty: bool,
    /// 🏷️ The `--meta` switch. Parsed, carried, logged. That's the whole arc.
    #[serde(default)]
    pub meta: bool,
    /// ⚠️ The `--delete` switch. Warns loudly, deletes nothing.
    #[serde(default)]
    pub delete: bool,
    #[serde(default)]
    pub riak: RiakConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

impl AppConfig {
    /// 📄 The file we read from or append to. Falls back to `{bucket}.json`.
    pub fn data_file(&self) -> PathBuf {
        match &self.file {
            Some(file_name) => PathBuf::from(file_name),
            None => PathBuf::from(format!("{}.json", self.bucket)),
        }
    }
}

/// 📡 Where the Riak node lives and how patient we are with it.
#[derive(Debug, Deserialize, Clone)]
pub struct RiakConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// ⏱️ Per-request timeout. `None` = whatever reqwest thinks is reasonable (it waits).
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
}

impl RiakConfig {
    /// 🔗 `http://host:port` — no trailing slash, the paths bring their own.
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl Default for RiakConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: None,
        }
    }
}

/// 🧵 How hard we lean on the cluster, and how we watch ourselves do it.
#[derive(Debug, Deserialize, Clone)]
pub struct RuntimeConfig {
    /// 🚦 Ceiling of in-flight fetches (export) or writes (import).
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// 📬 Records waiting for the writer before fetchers start to wait too.
    #[serde(default = "default_record_queue_capacity")]
    pub record_queue_capacity: usize,
    /// 📊 Draw the live progress bar. Off by default so per-key logs stay readable.
    #[serde(default)]
    pub progress_bar: bool,
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

// 📬 256 records in the mailbox — enough to keep 20 fetchers busy without hoarding RAM
fn default_record_queue_capacity() -> usize {
    256
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            record_queue_capacity: default_record_queue_capacity(),
            progress_bar: false,
        }
    }
}

/// 🎛️ Values handed down from the command line. `None` = "I have no opinion, ask the env".
///
/// Serialized straight into Figment as the top layer, so every `Some` wins.
#[derive(Debug, Default, Serialize, Clone)]
pub struct ConfigOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<Mode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pretty: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delete: Option<bool>,
    pub riak: RiakOverrides,
    pub runtime: RuntimeOverrides,
}

#[derive(Debug, Default, Serialize, Clone)]
pub struct RiakOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

#[derive(Debug, Default, Serialize, Clone)]
pub struct RuntimeOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<usize>,
}

/// 🔢 Concurrency the forgiving way: the leading integer counts (`2.5` → 2, `8x` → 8),
/// no leading digits means 20, and zero or less is promoted to one because a queue
/// with no workers is a hostage situation.
pub fn lenient_concurrency(raw: &str) -> usize {
    let trimmed = raw.trim_start();
    let (negative, unsigned) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    let digits_end = unsigned
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(unsigned.len());
    let digits = &unsigned[..digits_end];
    if digits.is_empty() {
        return DEFAULT_CONCURRENCY;
    }
    if negative {
        return 1;
    }
    // -- 🐘 more digits than a usize holds is still "a lot"
    digits.parse::<usize>().unwrap_or(usize::MAX).max(1)
}

/// ✅ String switches are only true when they literally say `true`. Not `yes`. Not `1`. `true`.
pub fn literal_true(raw: Option<&str>) -> bool {
    raw == Some("true")
}

/// 🚀 Load the config — defaults, then `RBX_*` env vars, then the TOML file, then the CLI.
///
/// 📐 Nested env keys split on `__`: `RBX_RIAK__HOST=riak-1` lands in `riak.host`.
///
/// 💀 Returns an error if the layers don't add up to an `AppConfig`, most likely
/// because nobody told us which bucket to touch.
pub fn load_config(
    config_file_name: Option<&Path>,
    overrides: ConfigOverrides,
) -> anyhow::Result<AppConfig> {
    info!(
        "🔧 Loading configuration: {:#?}",
        config_file_name.unwrap_or(Path::new(""))
    );

    // 🏗️ env vars are the sourdough starter. Everything else is toppings.
    let config = Figment::new().merge(Env::prefixed("RBX_").split("__"));

    // 🎯 TOML only if someone actually handed us a file.
    let config = match config_file_name {
        Some(file_name) => config.merge(Toml::file(file_name)),
        None => config,
    };

    // 🎛️ the command line gets the last word, as is tradition
    let config = config.merge(Serialized::defaults(overrides));

    let context_msg = match config_file_name {
        Some(path) => format!(
            "💀 Failed to assemble configuration from flags, file '{}' and environment variables (RBX_*). \
             One of them is lying, and it's probably the one you edited last.",
            path.display()
        ),
        None => "💀 Failed to assemble configuration from flags and environment variables (RBX_*). \
                 Did anyone mention which bucket?"
            .to_string(),
    };

    config.extract().context(context_msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_test_config(contents: &str) -> tempfile::NamedTempFile {
        let mut the_file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("💀 Failed to make a temp config. The filesystem said 'new phone who dis'.");
        the_file
            .write_all(contents.as_bytes())
            .expect("💀 Failed to write test config.");
        the_file
    }

    fn bucket_only(bucket: &str) -> ConfigOverrides {
        ConfigOverrides {
            bucket: Some(bucket.to_string()),
            ..ConfigOverrides::default()
        }
    }

    #[test]
    fn the_one_where_defaults_match_the_old_tool() {
        let app_config = load_config(None, bucket_only("users"))
            .expect("💀 A bucket alone should be a complete config.");

        assert_eq!(app_config.bucket, "users");
        assert_eq!(app_config.mode, Mode::Export);
        assert_eq!(app_config.riak.base_url(), "http://localhost:8098");
        assert_eq!(app_config.runtime.concurrency, 20);
        assert_eq!(app_config.data_file(), PathBuf::from("users.json"));
        assert!(!app_config.pretty);
        assert!(!app_config.delete);
    }

    #[test]
    fn the_one_where_flags_beat_the_toml_file() {
        let the_file = write_test_config(
            r#"
            file = "from-toml.json"

            [riak]
            host = "riak-from-toml"
            port = 9000

            [runtime]
            concurrency = 3
            record_queue_capacity = 8
            "#,
        );

        let overrides = ConfigOverrides {
            bucket: Some("orders".to_string()),
            mode: Some(Mode::Import),
            riak: RiakOverrides {
                host: Some("riak-from-flags".to_string()),
                port: None,
            },
            ..ConfigOverrides::default()
        };

        let app_config = load_config(Some(the_file.path()), overrides)
            .expect("💀 TOML + flags should merge. The schema drift goblin does not get this win.");

        assert_eq!(app_config.riak.host, "riak-from-flags");
        assert_eq!(app_config.riak.port, 9000);
        assert_eq!(app_config.mode, Mode::Import);
        assert_eq!(app_config.runtime.concurrency, 3);
        assert_eq!(app_config.runtime.record_queue_capacity, 8);
        assert_eq!(app_config.data_file(), PathBuf::from("from-toml.json"));
    }

    #[test]
    fn the_one_where_no_bucket_means_no_config() {
        let result = load_config(None, ConfigOverrides::default());
        assert!(result.is_err(), "a config without a bucket must not extract");
    }

    #[test]
    fn the_one_where_concurrency_forgives_garbage() {
        assert_eq!(lenient_concurrency("7"), 7);
        assert_eq!(lenient_concurrency(" 12 "), 12);
        assert_eq!(lenient_concurrency("lots"), DEFAULT_CONCURRENCY);
        assert_eq!(lenient_concurrency("0"), 1);
    }

    #[test]
    fn the_one_where_only_the_leading_integer_counts() {
        assert_eq!(lenient_concurrency("2.5"), 2);
        assert_eq!(lenient_concurrency("8 workers"), 8);
        assert_eq!(lenient_concurrency("+4"), 4);
        assert_eq!(lenient_concurrency("-3"), 1);
        assert_eq!(lenient_concurrency(".5"), DEFAULT_CONCURRENCY);
        assert_eq!(lenient_concurrency(""), DEFAULT_CONCURRENCY);
    }

    #[test]
    fn the_one_where_only_true_is_true() {
        assert!(literal_true(Some("true")));
        assert!(!literal_true(Some("TRUE")));
        assert!(!literal_true(Some("yes")));
        assert!(!literal_true(Some("")));
        assert!(!literal_true(None));
    }
}
