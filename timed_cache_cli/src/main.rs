mod commands;
mod directory;
mod output;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use timed_cache::CacheConfig;

use crate::output::OutputFormat;

/// Prefix of the cache settings read from the environment, e.g. `TIMED_CACHE_REFRESH_MS`.
const ENV_PREFIX: &str = "TIMED_CACHE";

#[derive(Parser)]
#[command(name = "timed-cache")]
#[command(about = "Serve a project directory through self-refreshing caches")]
struct Cli {
    /// Cache settings file (YAML). Falls back to TIMED_CACHE_* environment variables
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format: table or json
    #[arg(long, default_value = "table", global = true)]
    output: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Look up project members through the cache
    Lookup(commands::lookup::LookupArgs),
    /// Hammer the caches with concurrent readers and report refresh counters
    Stress(commands::stress::StressArgs),
}

fn load_config(path: Option<&Path>) -> Result<CacheConfig> {
    let config = match path {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            CacheConfig::from_yaml_str(&content)
                .with_context(|| format!("Invalid config file {}", path.display()))?
        }
        None => CacheConfig::from_env(ENV_PREFIX)?,
    };
    tracing::debug!(?config, "loaded cache config");
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("timed_cache=info".parse()?),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let format = match cli.output.as_str() {
        "json" => OutputFormat::Json,
        _ => OutputFormat::Table,
    };

    let config = load_config(cli.config.as_deref())?;

    match &cli.command {
        Commands::Lookup(args) => commands::lookup::run(args, &config, &format)?,
        Commands::Stress(args) => commands::stress::run(args, &config, &format).await?,
    }

    Ok(())
}
