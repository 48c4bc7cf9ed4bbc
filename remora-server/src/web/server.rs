use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tower_http::services::ServeDir;
use tracing::{info, warn};

use super::{router, AppState};
use crate::config::WebConfig;

pub struct WebServer {
    state: AppState,
    config: WebConfig,
    running: Arc<AtomicBool>,
}

impl WebServer {
    pub fn new(state: AppState, config: WebConfig) -> Self {
        Self {
            state,
            config,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub async fn start(&self) -> Result<()> {
        let static_dir = PathBuf::from(&self.config.static_dir);
        if !static_dir.exists() {
            warn!("Static directory does not exist at {:?}", static_dir);
        }

        let app = router(self.state.clone())
            .nest_service("/static", ServeDir::new(&static_dir));

        self.running.store(true, Ordering::SeqCst);

        let host = &self.config.host;
        let port = self.config.port;
        info!("Starting web server on http://{}:{}", host, port);

        let listener = tokio::net::TcpListener::bind(format!("{}:{}", host, port))
            .await
            .context(format!("Failed to bind to port {}", port))?;

        axum::serve(listener, app)
            .with_graceful_shutdown(Self::shutdown_signal(self.running.clone()))
            .await
            .context("Failed to serve")?;

        info!("Web server stopped");
        Ok(())
    }

    /// Serves until `shutdown` completes or the server fails, whichever
    /// comes first. A server that cannot start returns its error right away.
    pub async fn run_until(&self, shutdown: impl Future<Output = ()>) -> Result<()> {
        tokio::select! {
            result = self.start() => result,
            _ = shutdown => {
                info!("Shutting down web server...");
                self.stop().await;
                Ok(())
            }
        }
    }

    async fn shutdown_signal(running: Arc<AtomicBool>) {
        while running.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.state.registry.shutdown();
    }
}
