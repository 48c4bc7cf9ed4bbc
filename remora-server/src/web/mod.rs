pub mod api;
pub mod index_page;
pub mod server;
pub mod ws;

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::registry::VehicleRegistry;
use crate::session::fs::FsSessionStore;

/// Shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<VehicleRegistry>,
    pub sessions: Arc<FsSessionStore>,
    pub video_interval: Duration,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(index_page::routes())
        .merge(api::routes())
        .merge(ws::routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn error_response(status: StatusCode, message: impl ToString) -> Response {
    (status, Json(json!({ "error": message.to_string() }))).into_response()
}
