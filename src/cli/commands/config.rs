use anyhow::Result;

use super::Command;
use crate::config::RecipesConfig;

/// Prints the configuration after files and environment are applied
pub struct ConfigCommand;

impl Command for ConfigCommand {
    async fn execute(&self) -> Result<()> {
        RecipesConfig::load_env_file()?;
        let config = RecipesConfig::load()?;
        print!("{}", config.to_toml()?);
        Ok(())
    }
}
