//! 🚀 rbx-cli — the front door, the bouncer, the maitre d' of rbx.
//!
//! 🎬 *[narrator voice]* "It all started with a bucket name and a dream..."
//! 📦 This binary crate is the thin CLI wrapper that parses flags, loads config,
//! sets up logging, and then lets the library do the heavy lifting.
//! Like a manager. 🦆

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use rbx::app_config::{
    ConfigOverrides, Mode, RiakOverrides, RuntimeOverrides, lenient_concurrency, literal_true,
};
use tracing::error;
use tracing_subscriber::EnvFilter;

/// 🪣 Export a Riak bucket to JSON lines, or import it back.
#[derive(Debug, Parser)]
#[command(name = "rbx-cli", version, about)]
struct Cli {
    /// Bucket to export from (or import into)
    bucket: Option<String>,

    /// Riak host
    #[arg(short = 'H', long)]
    host: Option<String>,

    /// Riak HTTP port
    #[arg(short, long)]
    port: Option<u16>,

    /// Data file [default: <bucket>.json]
    #[arg(short, long)]
    file: Option<String>,

    /// Import the file into the bucket instead of exporting
    #[arg(short, long)]
    import: bool,

    /// Max in-flight requests; the leading integer counts, non-numbers mean 20, zero means 1
    #[arg(short, long)]
    concurrency: Option<String>,

    /// Carry object metadata (only the literal `true` turns it on)
    #[arg(short, long, num_args = 0..=1, default_missing_value = "")]
    meta: Option<String>,

    /// Pretty-print exported records with tabs
    #[arg(short = 'P', long, num_args = 0..=1, default_missing_value = "true")]
    pretty: Option<String>,

    /// Delete keys after export (not implemented: logs a warning and deletes nothing)
    #[arg(long)]
    delete: bool,

    /// Optional TOML config file
    #[arg(long, env = "RBX_CONFIG")]
    config: Option<PathBuf>,
}

impl Cli {
    /// 🎛️ Flags → the top layer of the config. Unset flags stay `None` so env and TOML get a say.
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            bucket: self.bucket.clone(),
            file: self.file.clone(),
            mode: self.import.then_some(Mode::Import),
            pretty: self.pretty.as_deref().map(|raw| literal_true(Some(raw))),
            meta: self.meta.as_deref().map(|raw| literal_true(Some(raw))),
            delete: self.delete.then_some(true),
            riak: RiakOverrides {
                host: self.host.clone(),
                port: self.port,
            },
            runtime: RuntimeOverrides {
                concurrency: self.concurrency.as_deref().map(lenient_concurrency),
            },
        }
    }
}

/// 🚀 main() — where it all begins. The genesis. The big bang.
///
/// 🔧 Steps:
/// 1. Init tracing (so we can see what goes wrong, and when)
/// 2. Parse flags (no bucket, no party: print help and leave)
/// 3. Load config (the moment of truth)
/// 4. Run the thing (send it and pray 🙏)
/// 5. Handle errors (cry, then exit 1)
#[tokio::main]
async fn main() -> Result<()> {
    // 📡 Set up tracing — info by default, RUST_LOG for the curious
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    if cli.bucket.is_none() {
        // -- 🙋 a bucket is the one thing we can't guess
        Cli::command()
            .print_help()
            .context("💀 could not even print the help. the terminal has left the chat")?;
        return Ok(());
    }

    let app_config = rbx::app_config::load_config(cli.config.as_deref(), cli.overrides())
        .context("💀 In rbx-cli, main, we couldn't assemble the config. Check the flags, the RBX_* env vars and the --config file")?;

    // 🚀 SEND IT. No take-backs.
    if let Err(err) = rbx::run(app_config).await {
        report_failure(&err);
        // 🗑️ Exit with prejudice. Process exitus maximus.
        std::process::exit(1);
    }

    // ✅ If we got here, everything worked. Pop the champagne. 🍾
    Ok(())
}

/// 🧅 Peel the onion of sadness, one layer at a time, and sniff for connection trouble.
fn report_failure(err: &anyhow::Error) {
    error!("💀 error: {}", err);
    let mut the_vibes_are_giving_connection_issues = false;
    for cause in err.chain().skip(1) {
        error!("⚠️  cause: {}", cause);
        if looks_like_connection_trouble(&cause.to_string()) {
            the_vibes_are_giving_connection_issues = true;
        }
    }

    // -- 📡 if it smells like a connection problem, it's probably a connection problem
    if the_vibes_are_giving_connection_issues {
        error!(
            "🔧 hint: looks like Riak isn't reachable. \
            Double-check that the node is running and that --host/--port point at its HTTP listener \
            (8098 by default). If you're using Docker, `docker ps` knows more than we do. ☕"
        );
    }
}

fn looks_like_connection_trouble(cause: &str) -> bool {
    ["error sending request", "connection refused", "Connection refused", "tcp connect error", "dns error"]
        .iter()
        .any(|needle| cause.contains(needle))
}
