//! adaptload CLI - inspect and exercise device-aware loading decisions.

mod commands;
mod error;

use std::path::PathBuf;
use std::process::ExitCode;

use adaptload::config::AdaptloadConfig;
use adaptload::logging;
use clap::{Parser, Subcommand};
use console::style;

use commands::common::DeviceArgs;
use commands::simulate::SimulateArgs;
use error::CliError;

#[derive(Debug, Parser)]
#[command(name = "adaptload", version, about = "Device-aware progressive content loading")]
struct Cli {
    /// Configuration file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Sample capabilities and show the device tier
    Classify {
        #[command(flatten)]
        device: DeviceArgs,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the loading strategy generated for a device
    Strategy {
        #[command(flatten)]
        device: DeviceArgs,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the content-loading plan for a device
    Plan {
        #[command(flatten)]
        device: DeviceArgs,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Load every unit against a simulated backend and report metrics
    Simulate(SimulateArgs),
}

fn main() -> ExitCode {
    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("error:").red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let config = AdaptloadConfig::load_or_default(cli.config.as_deref())?;

    let mut logging_config = config.logging.clone();
    if cli.verbose {
        logging_config.level = "debug".to_string();
    }
    let _log_guard = logging::init(&logging_config)?;

    match cli.command {
        Commands::Classify { device, json } => commands::classify::run(&device, json),
        Commands::Strategy { device, json } => commands::strategy::run(&device, &config, json),
        Commands::Plan { device, json } => commands::plan::run(&device, &config, json),
        Commands::Simulate(args) => commands::simulate::run(args, &config),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["adaptload", "plan", "--network", "2g", "--verbose", "--json"]).unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Plan { device, json } => {
                assert!(json);
                assert_eq!(device.network.as_deref(), Some("2g"));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_simulate_defaults() {
        let cli = Cli::try_parse_from(["adaptload", "simulate"]).unwrap();
        match cli.command {
            Commands::Simulate(args) => {
                assert_eq!(args.min_latency_ms, 50);
                assert_eq!(args.max_latency_ms, 400);
                assert_eq!(args.failure_rate, 0.1);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_heap_flags_require_each_other() {
        assert!(Cli::try_parse_from(["adaptload", "classify", "--heap-used-mb", "100"]).is_err());
    }
}
