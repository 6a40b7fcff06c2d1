use anyhow::Result;
use std::path::PathBuf;
use tracing::info;

use super::Command;
use crate::config::RecipesConfig;
use crate::server::RecipeServer;
use crate::telemetry::init_telemetry;

#[derive(Debug, Default)]
pub struct ServeCommand {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub root: Option<PathBuf>,
}

impl ServeCommand {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_host(mut self, host: Option<String>) -> Self {
        self.host = host;
        self
    }

    pub fn with_port(mut self, port: Option<u16>) -> Self {
        self.port = port;
        self
    }

    pub fn with_root(mut self, root: Option<PathBuf>) -> Self {
        self.root = root;
        self
    }

    /// Command-line flags win over files and environment
    pub fn apply_overrides(&self, config: &mut RecipesConfig) {
        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(root) = &self.root {
            config.site.root = Some(root.clone());
        }
    }
}

impl Command for ServeCommand {
    async fn execute(&self) -> Result<()> {
        RecipesConfig::load_env_file()?;
        let mut config = RecipesConfig::load()?;
        self.apply_overrides(&mut config);
        init_telemetry(&config.observability)?;

        let root = config.resolve_site_root(&std::env::current_dir()?);
        let server = RecipeServer::new(config, root);
        info!(url = %server.server_url(), "Starting recipes server");
        server.run().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let mut config = RecipesConfig::default();
        ServeCommand::new()
            .with_port(Some(8080))
            .with_root(Some(PathBuf::from("site")))
            .apply_overrides(&mut config);

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.site.root, Some(PathBuf::from("site")));
    }
}
