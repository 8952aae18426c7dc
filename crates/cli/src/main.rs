//! signalgate CLI - run and exercise a signal/door event network

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use signalgate::config::Config;

mod commands;
mod logging;

use commands::{cmd_config_init, cmd_config_show, cmd_fire, cmd_run, cmd_validate};
use logging::init_logging;

#[derive(Parser)]
#[command(name = "signalgate")]
#[command(about = "Event network of signals and doors")]
#[command(after_help = "\
QUICK START:
  signalgate config init                        # Create a user config
  signalgate validate network.toml              # Check a definitions file
  signalgate fire network.toml --signal order   # Fire once, print door emissions
  signalgate run --definitions network.toml     # Run a node until ctrl-c")]
struct Cli {
  /// Config file (default: user config, else built-in defaults)
  #[arg(long, global = true, value_name = "FILE")]
  config: Option<PathBuf>,

  /// Also write logs to this file, rotated per `logging.rotation`
  #[arg(long, global = true, value_name = "FILE")]
  log_file: Option<PathBuf>,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum ConfigCommand {
  /// Write a commented config template to the user config path
  Init {
    /// Overwrite an existing file
    #[arg(long)]
    force: bool,
  },
  /// Show the effective configuration
  Show,
}

#[derive(Subcommand)]
enum Commands {
  /// Start a node and run until ctrl-c
  Run {
    /// Definitions file (overrides `node.definitions`)
    #[arg(short, long, value_name = "FILE")]
    definitions: Option<PathBuf>,
    /// Do not reload the definitions file when it changes
    #[arg(long)]
    no_watch: bool,
  },
  /// Validate a definitions file
  Validate {
    /// Definitions file
    file: PathBuf,
    /// Treat warnings as errors
    #[arg(long)]
    strict: bool,
    /// Output as JSON
    #[arg(long)]
    json: bool,
  },
  /// Fire a signal once against an in-memory node and print every door emission
  #[command(after_help = "\
EXAMPLES:
  signalgate fire network.toml --signal order
  signalgate fire network.toml --signal order --data '{\"total\": 250}'")]
  Fire {
    /// Definitions file
    file: PathBuf,
    /// Signal name or uid
    #[arg(short, long)]
    signal: String,
    /// JSON payload attached to the fire
    #[arg(long)]
    data: Option<String>,
  },
  /// Manage configuration
  Config {
    #[command(subcommand)]
    command: ConfigCommand,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  let cli = Cli::parse();
  let config = Config::load(cli.config.as_deref())?;

  let _guard = init_logging(&config.logging, cli.log_file.as_deref());

  match cli.command {
    Commands::Run { definitions, no_watch } => cmd_run(config, definitions, no_watch).await,
    Commands::Validate { file, strict, json } => cmd_validate(&file, strict, json).await,
    Commands::Fire { file, signal, data } => cmd_fire(config, &file, &signal, data.as_deref()).await,
    Commands::Config { command } => match command {
      ConfigCommand::Init { force } => cmd_config_init(force).await,
      ConfigCommand::Show => cmd_config_show(cli.config.as_deref()).await,
    },
  }
}
