use std::sync::Arc;

use anyhow::Result;
use tokio::signal;
use tracing::{error, info};

use remora_common::util;
use remora_server::config::CONFIG;
use remora_server::pilot::PilotRegistry;
use remora_server::registry::VehicleRegistry;
use remora_server::session::fs::FsSessionStore;
use remora_server::web::server::WebServer;
use remora_server::web::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    let _log_guard = util::setup_logging(&CONFIG.log_level, "server");
    info!("Starting remora-server...");
    info!("Default vehicle: {}", util::get_vehicle_id(&CONFIG.base));

    let sessions = Arc::new(FsSessionStore::new(CONFIG.sessions.resolved_path())?);
    info!("Recording sessions to {:?}", sessions.root());

    let pilots = Arc::new(PilotRegistry::from_config(&CONFIG.pilots));
    info!("Available pilots: {:?}", pilots.names());

    let registry = Arc::new(VehicleRegistry::new(
        pilots,
        sessions.clone(),
        CONFIG.control.clone(),
    ));
    // the default vehicle is ready before it first connects
    registry.get_or_create(&util::get_vehicle_id(&CONFIG.base))?;

    let state = AppState {
        registry,
        sessions,
        video_interval: CONFIG.video.interval(),
    };
    let web_server = WebServer::new(state, CONFIG.web.clone());

    let shutdown_signal = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received, stopping services..."),
            Err(err) => {
                error!("Failed to listen for shutdown signal: {}", err);
                // without a signal handler, keep serving until the process is killed
                std::future::pending::<()>().await;
            }
        }
    };

    let result = web_server.run_until(shutdown_signal).await;
    if let Err(e) = &result {
        error!("Web server error: {:#}", e);
    }

    info!("All services stopped, shutting down");
    result
}
