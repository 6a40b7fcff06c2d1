use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod commands;

#[derive(Parser)]
#[command(name = "recipes")]
#[command(about = "Run recipe plans one at a time and stream every state change")]
#[command(long_about = "Recipes accepts ordered step lists over HTTP, drives them through a \
                       state machine one instance at a time, and streams each state change to \
                       subscribers over server-sent events. Start with 'recipes serve'.")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the control server (default when no subcommand is given)
    Serve {
        /// Interface to bind
        #[arg(long, help = "Override server.host from configuration")]
        host: Option<String>,
        /// Port to bind
        #[arg(long, short = 'p', help = "Override server.port from configuration")]
        port: Option<u16>,
        /// Site root that steps write into
        #[arg(long, help = "Override the site root (defaults to the nearest package.json)")]
        root: Option<PathBuf>,
    },
    /// Decode and validate a plan file without running it
    Check {
        /// Path to a JSON array of steps
        plan: PathBuf,
    },
    /// Print the effective configuration as TOML
    Config,
}
