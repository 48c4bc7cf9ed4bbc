use askama::Template;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tracing::error;

use super::AppState;
use crate::session::fs::SessionSummary;
use crate::vehicle::VehicleStatus;

#[derive(Template)]
#[template(path = "index.html")]
struct IndexPage {
    version: &'static str,
    vehicles: Vec<VehicleStatus>,
    pilots: Vec<String>,
    sessions: Vec<SessionSummary>,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/", get(index_page))
}

async fn index_page(State(state): State<AppState>) -> Response {
    let vehicles = state
        .registry
        .list()
        .map(|vehicles| {
            vehicles
                .iter()
                .filter_map(|vehicle| vehicle.status().ok())
                .collect()
        })
        .unwrap_or_default();
    let sessions = state.sessions.list_sessions().unwrap_or_default();

    let page = IndexPage {
        version: env!("CARGO_PKG_VERSION"),
        vehicles,
        pilots: state.registry.pilots().names(),
        sessions,
    };
    match page.render() {
        Ok(html) => Html(html).into_response(),
        Err(e) => {
            error!("Failed to render index page: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
