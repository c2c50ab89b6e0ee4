//! ironircd - Main binary

use clap::{Parser, Subcommand};
use ironircd_core::{network, Config, Pool};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// ironircd - A modular IRC daemon with server-to-server linking
#[derive(Parser)]
#[command(name = "ironircd")]
#[command(about = "A modular IRC daemon implementation in Rust")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "ironircd.toml")]
    config: PathBuf,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Test configuration and exit
    #[arg(long)]
    test_config: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a default configuration file
    Config {
        /// Output file path
        #[arg(short, long, default_value = "ironircd.toml")]
        output: PathBuf,
    },
    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    if let Some(command) = cli.command {
        match command {
            Commands::Config { output } => {
                Config::default().to_file(&output)?;
                println!("Generated default configuration file: {:?}", output);
                return Ok(());
            }
            Commands::Version => {
                println!("ironircd {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
        }
    }

    let config = if cli.config.exists() {
        info!("Loading configuration from {:?}", cli.config);
        Config::from_file(&cli.config)?
    } else {
        info!("Configuration file not found, using defaults");
        Config::default()
    };
    config.validate()?;

    if cli.test_config {
        info!("Configuration is valid");
        return Ok(());
    }

    let pool = Pool::init(Arc::new(config));
    ironircd_modules::register_all(&pool);

    info!("Starting ironircd...");
    network::run(pool.clone()).await?;

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    pool.shutdown();
    Ok(())
}

/// Initialize logging
fn init_logging(level: &str) {
    let log_level = match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();
}
