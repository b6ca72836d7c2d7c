//! sarcd: session archive daemon
//!
//! Usage:
//!   sarcd [--config /etc/sarc/config.toml] [serve|sweep|keygen]
//!
//! Commands:
//!   serve   - HTTP API + periodic sweeps + metrics [default]
//!   sweep   - Run one reconciliation/lifecycle sweep and exit
//!   keygen  - Write a fresh random master key file

mod api;
mod daemon;
mod metrics;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "sarcd", version, about = "Session archive daemon")]
struct Cli {
    /// Path to sarc.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "SARC_CONFIG",
        default_value = "/etc/sarc/config.toml"
    )]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides daemon.log_level
    #[arg(long, env = "SARC_LOG")]
    log: Option<String>,

    /// Log format; overrides daemon.log_format
    #[arg(long, env = "SARC_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Command {
    /// Serve the archive API (default)
    Serve,
    /// Run a single sweep and print the report as JSON
    Sweep {
        /// Delete expired standard/extended archives instead of only reporting them
        #[arg(long)]
        purge_expired: bool,
    },
    /// Generate a new master key file
    Keygen {
        #[arg(long)]
        out: PathBuf,
    },
}

#[derive(Clone, Debug, ValueEnum, PartialEq)]
enum LogFormat {
    Json,
    Text,
}

impl LogFormat {
    fn from_config(s: &str) -> Self {
        if s.eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Text
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(Command::Keygen { out }) = &cli.command {
        sarc_secrets::generate_master_key_file(out)?;
        println!("wrote master key: {}", out.display());
        return Ok(());
    }

    let (config, found) = load_config(&cli.config).await?;

    let level = cli.log.as_deref().unwrap_or(&config.daemon.log_level);
    let format = cli
        .log_format
        .clone()
        .unwrap_or_else(|| LogFormat::from_config(&config.daemon.log_format));
    init_logging(level, &format);

    if !found {
        tracing::warn!(
            "config file not found: {}  (using defaults)",
            cli.config.display()
        );
    }
    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "sarcd starting"
    );

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => daemon::run(config).await,
        Command::Sweep { purge_expired } => {
            let report = daemon::sweep_once(config, purge_expired).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::Keygen { .. } => Ok(()),
    }
}

/// Returns the parsed config and whether the file existed.
async fn load_config(path: &Path) -> Result<(sarc_core::config::SarcConfig, bool)> {
    if path.exists() {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| anyhow::anyhow!("reading config {}: {e}", path.display()))?;
        let config = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("parsing config {}: {e}", path.display()))?;
        Ok((config, true))
    } else {
        Ok((sarc_core::config::SarcConfig::default(), false))
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json())
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer())
                .init();
        }
    }
}
