//! inkseal demo entry point
//!
//! Creates two parties with file-backed storage, exchanges keys between them,
//! verifies both contacts by short code and sends a message each way.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use inkseal_core::harness::{run_conversation, Party};
use inkseal_core::{Channel, Config, FileStore, SecretStore, Session};

#[derive(Parser, Debug)]
#[command(name = "inkseal-demo", version, about = "Two-party inkseal exchange and message round trip")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "INKSEAL_CONFIG")]
    config: Option<PathBuf>,

    /// Data directory (overrides config; the platform data directory when neither is set)
    #[arg(short, long, env = "INKSEAL_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Message the first party sends
    #[arg(short, long, default_value = "hello")]
    message: String,

    /// Passphrase-protect the first party's keys
    #[arg(long)]
    passphrase: Option<String>,

    /// Enable debug output
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    let config = match Config::load_from(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: Config error: {e}");
            return std::process::ExitCode::from(2);
        }
    };

    // RUST_LOG wins over the configured level
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&config.logging.level))
            .unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match run(cli, config).await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::ExitCode::FAILURE
        }
    }
}

/// `--data-dir`, then `storage.dir`, then the platform data directory.
fn data_root(cli_dir: Option<PathBuf>, config: &Config) -> Option<PathBuf> {
    cli_dir.or_else(|| config.storage.resolve_dir())
}

async fn run(cli: Cli, config: Config) -> anyhow::Result<()> {
    // keep the guard alive until both parties are done
    let scratch;
    let root = match data_root(cli.data_dir, &config) {
        Some(dir) => dir,
        None => {
            warn!("no platform data directory, using a temporary one");
            scratch = tempfile::tempdir().context("creating scratch data directory")?;
            scratch.path().to_path_buf()
        }
    };
    info!(dir = %root.display(), "using data directory");

    let alice_store: Arc<dyn SecretStore> = Arc::new(FileStore::new(root.join("alice")));
    let bob_store: Arc<dyn SecretStore> = Arc::new(FileStore::new(root.join("bob")));

    let mut alice = Party::new("alice", alice_store, &config, Channel::new("demo.local", "bob"));
    let bob = Party::new("bob", bob_store, &config, Channel::new("demo.local", "alice"));
    if let Some(pass) = cli.passphrase {
        alice.session = Session::with_passphrase(pass);
    }

    let report = run_conversation(&alice, &bob, &cli.message).await?;

    println!("alice verified bob:   {}", report.codes.0);
    println!("bob verified alice:   {}", report.codes.1);
    println!("bob received:         {}", report.delivered);
    println!("alice received:       {}", report.reply);
    println!("alice read back:      {}", report.read_back);
    Ok(())
}
