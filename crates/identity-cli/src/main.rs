//! Steps Toward identity CLI - runs identity scenarios against the in-memory backend.

mod scenarios;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use identity_config::{init_logging, Config, Paths};
use scenarios::Scenario;

/// Identity engine command-line interface.
#[derive(Parser)]
#[command(name = "steps-identity")]
#[command(about = "Drive the identity session engine from the command line")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error). Defaults to the configured level
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Base directory for config and logs. Defaults to ~/.steps-toward
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,

    /// Also append structured JSONL logs under <base>/logs
    #[arg(long, global = true)]
    log_file: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scenario and print its transcript as JSON
    Demo {
        #[arg(value_enum)]
        scenario: Scenario,
    },
    /// Print the effective configuration
    Config {
        /// Write the effective configuration to <base>/config.json
        #[arg(long)]
        write: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let paths = match cli.base_dir {
        Some(base) => Paths::with_base_dir(base),
        None => Paths::new()?,
    };
    let config = Config::load(&paths)?;

    let level = cli.log_level.as_deref().unwrap_or(&config.log_level);
    let log_path = if cli.log_file {
        paths.ensure_dirs()?;
        Some(paths.log_file())
    } else {
        None
    };
    init_logging(level, log_path)?;

    match cli.command {
        Commands::Demo { scenario } => {
            tracing::info!(scenario = ?scenario, "Running identity scenario");
            let transcript = scenarios::run(scenario, config.engine_settings()).await?;
            println!("{}", serde_json::to_string_pretty(&transcript)?);
        }
        Commands::Config { write } => {
            if write {
                config.save(&paths)?;
                tracing::info!(path = %paths.config_file().display(), "Configuration written");
            }
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
