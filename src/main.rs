use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use glu::config::{DEFAULT_CONFIG_FILE, GluConfig};

mod cmd;

#[derive(Parser)]
#[command(name = "glu")]
#[command(version, about = "GitOps promotion engine")]
pub struct Cli {
    /// Path to glu.toml
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// View, validate or scaffold configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
    /// Print the recorded version history of a phase
    History {
        pipeline: String,
        phase: String,
        /// Show at most this many versions, newest first
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        /// Print states as JSON lines
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Write an example glu.toml
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.command {
        // `config` reports load errors itself
        Commands::Config { .. } => None,
        _ => Some(GluConfig::load_or_default(&cli.config)?),
    };
    glu::logging::init(&config.as_ref().map(|c| c.log.clone()).unwrap_or_default());

    match &cli.command {
        Commands::Config { command } => cmd::cmd_config(&cli.config, command.clone())?,
        Commands::History {
            pipeline,
            phase,
            limit,
            json,
        } => {
            let config = config.unwrap_or_default();
            let mut stdout = std::io::stdout().lock();
            cmd::cmd_history(&config, pipeline, phase, *limit, *json, &mut stdout)?;
        }
    }

    Ok(())
}
