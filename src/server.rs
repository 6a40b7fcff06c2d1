//! Server instance management

use anyhow::{Context, Result};
use axum::Router;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

use crate::config::RecipesConfig;
use crate::control::http::{create_router, AppState};
use crate::control::ControlChannel;
use crate::recipes::{BuiltinRegistry, EngineBuilder, EngineSettings, StepRegistry};
use crate::shutdown::wait_for_shutdown;

/// Recipes HTTP/SSE server
///
/// Owns the engine (through its control channel) and the axum lifecycle.
/// Must be created inside a tokio runtime, since the engine task is spawned
/// immediately.
pub struct RecipeServer {
    config: RecipesConfig,
    root: PathBuf,
    channel: ControlChannel,
}

impl RecipeServer {
    /// Create a server running built-in steps against `root`
    pub fn new(config: RecipesConfig, root: PathBuf) -> Self {
        let registry: Arc<dyn StepRegistry> = Arc::new(BuiltinRegistry::new());
        Self::with_registry(config, root, registry)
    }

    pub fn with_registry(
        config: RecipesConfig,
        root: PathBuf,
        registry: Arc<dyn StepRegistry>,
    ) -> Self {
        let engine = EngineBuilder::new(Arc::clone(&registry))
            .with_settings(EngineSettings {
                root: root.clone(),
                command_buffer: config.engine.command_buffer,
            })
            .spawn();

        Self {
            config,
            root,
            channel: ControlChannel::new(engine, registry),
        }
    }

    pub fn channel(&self) -> &ControlChannel {
        &self.channel
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn router(&self) -> Router {
        create_router(AppState::new(self.channel.clone()))
    }

    #[must_use]
    pub fn server_url(&self) -> String {
        format!("http://{}", self.config.bind_address())
    }

    /// Bind the configured address
    pub async fn bind(&self) -> Result<TcpListener> {
        let addr = self.config.bind_address();
        TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind to {addr}"))
    }

    /// Serve on `listener` until `shutdown` resolves
    pub async fn serve_with_shutdown<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let local = listener.local_addr()?;
        info!(
            address = %local,
            root = %self.root.display(),
            "Recipes server listening"
        );

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await
            .context("Server error")?;

        info!("Recipes server stopped");
        Ok(())
    }

    /// Bind and serve until Ctrl+C or SIGTERM
    pub async fn run(self) -> Result<()> {
        let listener = self.bind().await?;
        self.serve_with_shutdown(listener, wait_for_shutdown()).await
    }
}
