use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use varsync_core::config::Config;
use varsync_core::logging::{init_logging_with_config, LogConfig, LogLevel};

mod simulate;

#[derive(Parser, Debug)]
#[command(name = "varsync")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Set the log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short, long)]
    log_level: Option<String>,

    /// Enable JSON formatted logging
    #[arg(long)]
    json_logs: bool,

    /// TOML configuration file; VARSYNC_* variables are applied on top
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run an in-memory match where every player bumps a shared score
    Simulate {
        /// Number of players
        #[arg(short, long, default_value_t = 3)]
        peers: usize,

        /// Rounds of edits; every player writes once per round
        #[arg(short, long, default_value_t = 5)]
        rounds: usize,

        /// Delay between rounds in milliseconds
        #[arg(long, default_value_t = 50)]
        tick_ms: u64,

        /// Make the host leave halfway through
        #[arg(long)]
        migrate: bool,
    },
    /// Print the effective configuration as TOML
    Config,
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    let mut config = match path {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => Config::default(),
    };
    config.apply_env()?;
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(args.config.as_ref())?;

    let mut log_config = LogConfig::try_from(&config.logging)?;
    if let Some(level) = &args.log_level {
        log_config.level = level.parse::<LogLevel>()?;
    }
    if args.json_logs {
        log_config = log_config.json_format(true);
    }
    init_logging_with_config(log_config)?;
    varsync_core::metrics::init_metrics();

    match args.command {
        Some(Command::Simulate {
            peers,
            rounds,
            tick_ms,
            migrate,
        }) => {
            let options = simulate::Options {
                peers,
                rounds,
                tick_ms,
                migrate,
            };
            let report = simulate::run(&config, &options).await?;
            println!("{}", serde_json::to_string_pretty(&report.to_json())?);
        }
        Some(Command::Config) => {
            print!("{}", config.to_toml()?);
        }
        None => {
            info!("No command specified. Use --help for usage information.");
        }
    }

    Ok(())
}
