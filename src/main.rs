use anyhow::Result;
use clap::Parser;

use recipes::cli::commands::{
    check::CheckCommand, config::ConfigCommand, serve::ServeCommand, Command,
};
use recipes::cli::{Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        // Default behavior: no subcommand serves with configured settings
        None => tokio::runtime::Runtime::new()?.block_on(async {
            ServeCommand::new().execute().await
        }),
        Some(Commands::Serve { host, port, root }) => {
            tokio::runtime::Runtime::new()?.block_on(async {
                ServeCommand::new()
                    .with_host(host)
                    .with_port(port)
                    .with_root(root)
                    .execute()
                    .await
            })
        }
        Some(Commands::Check { plan }) => tokio::runtime::Runtime::new()?.block_on(async {
            CheckCommand::new(plan).execute().await
        }),
        Some(Commands::Config) => tokio::runtime::Runtime::new()?.block_on(async {
            ConfigCommand.execute().await
        }),
    }
}
