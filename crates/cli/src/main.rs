//! Chorus CLI: the main entry point.
//!
//! Commands:
//! - `config`: Show the resolved configuration or its path
//! - `relay` : Interactive stdin relay through the full request pipeline

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "chorus",
    about = "Chorus: persona relay for chat platforms",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the resolved configuration
    Config {
        /// Print the config file path instead
        #[arg(long)]
        path: bool,

        /// Print a default config file
        #[arg(long, conflicts_with = "path")]
        default: bool,
    },

    /// Relay stdin lines through the backend and deliver them as a persona
    Relay {
        /// Persona definition file (TOML or JSON)
        #[arg(short, long)]
        persona: Option<PathBuf>,

        /// Name the requests are attributed to
        #[arg(short, long, default_value = "you")]
        caller: String,

        /// Destination the persona posts to
        #[arg(short, long, default_value = "terminal")]
        destination: String,

        /// Use permissive content filtering
        #[arg(long)]
        nsfw: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Config { path, default } => {
            if path {
                commands::config_cmd::path()?
            } else if default {
                commands::config_cmd::default()?
            } else {
                commands::config_cmd::show()?
            }
        }
        Commands::Relay {
            persona,
            caller,
            destination,
            nsfw,
        } => commands::relay::run(persona, caller, destination, nsfw).await?,
    }

    Ok(())
}
