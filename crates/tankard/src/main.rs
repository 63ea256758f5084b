//! tankard - namespaced cache inspection tool
//!
//! Main entry point for the tankard CLI.

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};

mod commands;

use commands::{cache, config};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// tankard - inspect and manipulate namespaced caches
#[derive(Parser)]
#[command(name = "tankard")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output as JSON (for scripting)
    #[arg(long, global = true)]
    pub json: bool,

    /// User config directory (default: platform config dir/tankard)
    #[arg(long, global = true, env = "TANKARD_CONFIG_DIR")]
    pub config_dir: Option<PathBuf>,

    /// Backend type, overriding the config file
    #[arg(long = "type", global = true, value_name = "TYPE")]
    pub backend: Option<String>,

    /// Data directory for file and dbm backends
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Server list or database location for memcached and database backends
    #[arg(long, global = true)]
    pub url: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print the value stored under a key
    Get(cache::GetArgs),

    /// Store a JSON value under a key
    Set(cache::SetArgs),

    /// Remove a key
    Remove(cache::RemoveArgs),

    /// Remove every key in a namespace
    Clear(cache::NamespaceArgs),

    /// List the keys in a namespace
    Keys(cache::NamespaceArgs),

    /// Configuration management
    Config(config::ConfigArgs),
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_dir = cli
        .config_dir
        .clone()
        .or_else(tankard_config::xdg_config_dir);

    // Initialize tracing: console (human-readable) + rotating JSON file
    let filter = if cli.verbose {
        "tankard=debug,tankard_cache=debug,tankard_config=debug,info"
    } else {
        "tankard=info,tankard_cache=warn,tankard_config=warn,warn"
    };

    let (file_writer, _guard) = match file_log_writer(config_dir.as_deref()) {
        Some((writer, guard)) => (Some(writer), Some(guard)),
        None => (None, None),
    };

    use tracing_subscriber::prelude::*;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
                .with_filter(tracing_subscriber::EnvFilter::new(filter)),
        )
        .with(file_writer.map(|writer| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(writer)
                .with_filter(tracing_subscriber::EnvFilter::new(
                    "tankard=trace,tankard_cache=trace,tankard_config=trace,info",
                ))
        }))
        .init();

    let loaded = tankard_config::load_config_with_options(None, config_dir.as_deref())?;

    // Command-line backend options form the last config layer.
    let overrides = tankard_config::CacheSection {
        backend: cli.backend,
        data_dir: cli.data_dir,
        url: cli.url,
        ..Default::default()
    };

    let ctx = commands::Context::new(loaded, config_dir, overrides, cli.json, cli.verbose);

    match cli.command {
        Commands::Get(args) => cache::get(args, &ctx),
        Commands::Set(args) => cache::set(args, &ctx),
        Commands::Remove(args) => cache::remove(args, &ctx),
        Commands::Clear(args) => cache::clear(args, &ctx),
        Commands::Keys(args) => cache::keys(args, &ctx),
        Commands::Config(args) => config::run(args, &ctx),
    }
}

/// Daily-rolling JSON log under `<config dir>/logs`. Without a config
/// directory there is no log file.
fn file_log_writer(config_dir: Option<&Path>) -> Option<(NonBlocking, WorkerGuard)> {
    let log_dir = config_dir?.join("logs");
    let file_appender = tracing_appender::rolling::daily(log_dir, "tankard.log");
    Some(tracing_appender::non_blocking(file_appender))
}
