use advisor::api;
use advisor::config::Config;
use advisor::engine::AdvisoryEngine;
use advisor::error::ConfigError;
use advisor::store::SqliteStore;
use advisor::worker::Workers;
use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, warn};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;

/// Command-line arguments for the advisory engine
#[derive(Parser)]
#[command(
    name = "advisor",
    about = "Log-based advisory engine",
    long_about = "Ingests structured log events from many services, detects recurring fault \
                  and performance patterns, and keeps a prioritized queue of actionable \
                  advisories behind an HTTP/JSON API."
)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "Configuration file path (TOML format)"
    )]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(
        short,
        long,
        help = "Enable verbose logging output (sets RUST_LOG=debug)"
    )]
    verbose: bool,

    /// Database file, overriding `store.path`
    #[arg(long, value_name = "FILE")]
    db: Option<PathBuf>,

    /// Listen address, overriding `server.bind`
    #[arg(long, value_name = "ADDR")]
    bind: Option<SocketAddr>,
}

impl Cli {
    /// Reject config paths that exist but are not files
    ///
    /// Missing files are fine; [`load_config`] falls back to defaults.
    fn validate(&self) -> Result<(), String> {
        if let Some(path) = &self.config {
            if path.exists() && !path.is_file() {
                return Err(format!(
                    "Configuration path is not a file: {}",
                    path.display()
                ));
            }
            if path.extension().is_some_and(|ext| ext != "toml") {
                warn!(
                    "Configuration file does not have .toml extension: {}",
                    path.display()
                );
            }
        }
        Ok(())
    }

    /// Apply command-line overrides on top of the loaded configuration
    fn apply_overrides(&self, config: &mut Config) {
        if let Some(db) = &self.db {
            config.store.path = db.clone();
        }
        if let Some(bind) = self.bind {
            config.server.bind = bind.to_string();
        }
    }
}

/// Load configuration from file or use defaults
///
/// A missing or unreadable file and an invalid file both fall back to the
/// defaults; only the log level differs.
fn load_config(path: Option<&Path>) -> Config {
    let Some(path) = path else {
        info!("Using default configuration");
        return Config::default();
    };

    info!("Loading configuration from: {}", path.display());
    match Config::from_file(path) {
        Ok(config) => config,
        Err(ConfigError::ReadError(reason)) => {
            warn!("Configuration file unreadable ({}), using defaults", reason);
            Config::default()
        }
        Err(e) => {
            error!("Configuration error in '{}': {}", path.display(), e);
            warn!("Using default configuration due to invalid config file");
            Config::default()
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    cli.validate().map_err(anyhow::Error::msg)?;

    let mut config = load_config(cli.config.as_deref());
    cli.apply_overrides(&mut config);

    let bind: SocketAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("Invalid listen address '{}'", config.server.bind))?;

    // The only fatal startup failure
    let store = SqliteStore::open(&config.store.path).with_context(|| {
        format!(
            "Failed to initialize store at {}",
            config.store.path.display()
        )
    })?;

    let engine = Arc::new(AdvisoryEngine::new(config, Arc::new(store)));
    info!(
        "Advisory engine initialized with agents: {}",
        engine.health().agents.join(", ")
    );

    let mut workers =
        Workers::start(Arc::clone(&engine)).context("Failed to start background workers")?;

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    ctrlc::set_handler(move || {
        info!("Received interrupt signal, shutting down gracefully...");
        let _ = shutdown_tx.send(true);
    })
    .context("Failed to install interrupt handler")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build async runtime")?;

    let served = runtime.block_on(api::serve(engine, bind, async move {
        // The sender only ever flips false -> true
        let _ = shutdown_rx.changed().await;
    }));

    // Finish the in-flight batch before exiting
    workers.stop();
    served
}

fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        std::env::set_var("RUST_LOG", "debug");
    }
    env_logger::init();

    info!("Starting advisory engine");

    if let Err(e) = run(cli) {
        error!("{:#}", e);
        std::process::exit(1);
    }

    info!("Advisory engine shutdown complete");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn cli(config: Option<PathBuf>) -> Cli {
        Cli {
            config,
            verbose: false,
            db: None,
            bind: None,
        }
    }

    #[test]
    fn test_cli_validation_accepts_missing_file() {
        assert!(cli(Some(PathBuf::from("/nonexistent/advisor.toml")))
            .validate()
            .is_ok());
        assert!(cli(None).validate().is_ok());
    }

    #[test]
    fn test_cli_validation_rejects_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(cli(Some(dir.path().to_path_buf())).validate().is_err());
    }

    #[test]
    fn test_load_config_falls_back_to_defaults() {
        assert_eq!(
            load_config(Some(Path::new("/nonexistent/advisor.toml"))),
            Config::default()
        );

        let mut invalid = NamedTempFile::new().unwrap();
        writeln!(invalid, "[processing]\nbatch_size = 0").unwrap();
        assert_eq!(load_config(Some(invalid.path())), Config::default());
    }

    #[test]
    fn test_load_config_reads_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[processing]\nbatch_size = 42").unwrap();
        assert_eq!(load_config(Some(file.path())).processing.batch_size, 42);
    }

    #[test]
    fn test_overrides_replace_file_values() {
        let mut args = cli(None);
        args.db = Some(PathBuf::from("/tmp/other.db"));
        args.bind = Some("0.0.0.0:9000".parse().unwrap());

        let mut config = Config::default();
        args.apply_overrides(&mut config);

        assert_eq!(config.store.path, PathBuf::from("/tmp/other.db"));
        assert_eq!(config.server.bind, "0.0.0.0:9000");
    }
}
