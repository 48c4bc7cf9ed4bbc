use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use remora_common::drive::DriveMode;
use remora_common::frame::Frame;
use remora_common::wire::{UploadRequest, WireResponse};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use super::{error_response, AppState};
use crate::control::ingress::{self, LiveControl};
use crate::control::rendezvous::RendezvousError;
use crate::vehicle::{Telemetry, VehicleStatus};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/vehicles", get(list_vehicles))
        .route("/api/vehicles/control/:vehicle_id/", post(control))
        .route("/api/vehicles/:vehicle_id/", post(select_pilot))
        .route("/api/vehicles/:vehicle_id/status", get(vehicle_status))
        .route("/api/vehicles/:vehicle_id/frame", get(vehicle_frame))
        .route("/api/drive/:vehicle_id", post(drive))
        .route("/api/pilots", get(list_pilots))
        .route("/api/sessions", get(list_sessions))
        .route(
            "/api/sessions/:session_id",
            get(session_frames).delete(delete_session),
        )
        .route("/api/sessions/:session_id/delete_frames", post(delete_frames))
        .route("/api/sessions/:session_id/frames/:frame", get(session_frame))
        .route(
            "/api/sessions/:session_id/tags/:tag",
            put(add_tag).delete(remove_tag),
        )
        .route("/api/tags", get(list_tags))
}

/// Frames of the last session removed by `DELETE /api/sessions/3s`.
const RECENT_FRAMES_WINDOW: Duration = Duration::from_secs(3);

/// One upload/response cycle for a vehicle.
///
/// Anything that goes wrong still answers with a zero command so the vehicle
/// always has something safe to act on.
async fn control(
    State(state): State<AppState>,
    Path(vehicle_id): Path<String>,
    body: Bytes,
) -> Response {
    let vehicle = match state.registry.get_or_create(&vehicle_id) {
        Ok(vehicle) => vehicle,
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    };

    let upload = match UploadRequest::from_slice(&body) {
        Ok(upload) => upload,
        Err(e) => {
            warn!("Rejected upload from vehicle {}: {}", vehicle_id, e);
            return zero_command(StatusCode::BAD_REQUEST, vehicle.drive_mode());
        }
    };
    if let Err(e) = upload.image.validate() {
        warn!("Rejected frame from vehicle {}: {}", vehicle_id, e);
        return zero_command(StatusCode::BAD_REQUEST, vehicle.drive_mode());
    }

    let telemetry = Telemetry {
        angle: upload.angle,
        throttle: upload.throttle,
        milliseconds: upload.milliseconds,
    };
    let budget = state.registry.control().response_timeout();
    match vehicle
        .exchange(Arc::new(upload.image), telemetry, budget)
        .await
    {
        Ok(response) => {
            Json(WireResponse::encode(response.command, response.drive_mode)).into_response()
        }
        Err(RendezvousError::Timeout) => {
            warn!("Vehicle {} cycle timed out after {:?}", vehicle_id, budget);
            zero_command(StatusCode::GATEWAY_TIMEOUT, vehicle.drive_mode())
        }
        Err(RendezvousError::Closed) => {
            zero_command(StatusCode::SERVICE_UNAVAILABLE, vehicle.drive_mode())
        }
    }
}

fn zero_command(status: StatusCode, mode: DriveMode) -> Response {
    (status, Json(WireResponse::zero(mode))).into_response()
}

#[derive(Debug, Deserialize)]
struct PilotSelection {
    pilot: String,
}

async fn select_pilot(
    State(state): State<AppState>,
    Path(vehicle_id): Path<String>,
    Json(selection): Json<PilotSelection>,
) -> Response {
    let pilot = match state.registry.pilots().get(&selection.pilot) {
        Ok(pilot) => pilot,
        Err(e) => return error_response(StatusCode::NOT_FOUND, e),
    };
    let result = state
        .registry
        .get_or_create(&vehicle_id)
        .and_then(|vehicle| {
            vehicle.set_pilot(pilot)?;
            vehicle.status()
        });
    match result {
        Ok(status) => {
            info!("Vehicle {} now uses pilot {}", vehicle_id, status.pilot);
            Json(status).into_response()
        }
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

async fn list_vehicles(State(state): State<AppState>) -> Response {
    let statuses = state.registry.list().and_then(|vehicles| {
        vehicles
            .iter()
            .map(|vehicle| vehicle.status())
            .collect::<anyhow::Result<Vec<VehicleStatus>>>()
    });
    match statuses {
        Ok(statuses) => Json(statuses).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

async fn vehicle_status(
    State(state): State<AppState>,
    Path(vehicle_id): Path<String>,
) -> Response {
    match state.registry.get(&vehicle_id) {
        Ok(Some(vehicle)) => match vehicle.status() {
            Ok(status) => Json(status).into_response(),
            Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
        },
        Ok(None) => error_response(
            StatusCode::NOT_FOUND,
            format!("Unknown vehicle {}", vehicle_id),
        ),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

/// Latest uploaded frame as a binary PNM image.
async fn vehicle_frame(
    State(state): State<AppState>,
    Path(vehicle_id): Path<String>,
) -> Response {
    let frame = state
        .registry
        .get(&vehicle_id)
        .and_then(|vehicle| match vehicle {
            Some(vehicle) => vehicle.last_image(),
            None => Ok(None),
        });
    match frame {
        Ok(Some(frame)) => pnm_response(&frame),
        Ok(None) => error_response(
            StatusCode::NOT_FOUND,
            format!("No frame from vehicle {}", vehicle_id),
        ),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

const PNM_CONTENT_TYPE: &str = "image/x-portable-anymap";

pub(super) fn pnm_response(frame: &Frame) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, PNM_CONTENT_TYPE)],
        frame.to_pnm(),
    )
        .into_response()
}

/// Live control over plain HTTP, same message as the drive socket.
async fn drive(
    State(state): State<AppState>,
    Path(vehicle_id): Path<String>,
    body: Bytes,
) -> Response {
    let message = match std::str::from_utf8(&body)
        .map_err(anyhow::Error::from)
        .and_then(LiveControl::from_json)
    {
        Ok(message) => message,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e),
    };
    let result = state
        .registry
        .get_or_create(&vehicle_id)
        .and_then(|vehicle| ingress::apply(&vehicle, &message, state.registry.sessions()));
    match result {
        Ok(status) => Json(status).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

async fn list_pilots(State(state): State<AppState>) -> Response {
    Json(state.registry.pilots().names()).into_response()
}

async fn list_sessions(State(state): State<AppState>) -> Response {
    match state.sessions.list_sessions() {
        Ok(sessions) => Json(sessions).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

async fn session_frames(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    match state.sessions.session_frames(&session_id) {
        Ok(frames) => Json(frames).into_response(),
        Err(e) => error_response(StatusCode::NOT_FOUND, e),
    }
}

/// Deletes one session. `last` names the most recently written session and
/// `3s` trims the final seconds of frames from it.
async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    let shortcut = matches!(session_id.as_str(), "last" | "3s");
    let name = if shortcut {
        match state.sessions.last_session() {
            Ok(Some(name)) => name,
            Ok(None) => return error_response(StatusCode::NOT_FOUND, "No sessions recorded"),
            Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
        }
    } else {
        session_id.clone()
    };
    if session_id == "3s" {
        return match state.sessions.delete_recent_frames(&name, RECENT_FRAMES_WINDOW) {
            Ok(removed) => Json(json!({ "session": name, "removed": removed })).into_response(),
            Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
        };
    }
    match state.sessions.delete_session(&name) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(StatusCode::NOT_FOUND, e),
    }
}

async fn session_frame(
    State(state): State<AppState>,
    Path((session_id, frame)): Path<(String, String)>,
) -> Response {
    match state.sessions.frame_bytes(&session_id, &frame) {
        Ok(bytes) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, PNM_CONTENT_TYPE)],
            bytes,
        )
            .into_response(),
        Err(e) => error_response(StatusCode::NOT_FOUND, e),
    }
}

async fn add_tag(
    State(state): State<AppState>,
    Path((session_id, tag)): Path<(String, String)>,
) -> Response {
    if let Err(e) = state.sessions.session_tags(&session_id) {
        return error_response(StatusCode::NOT_FOUND, e);
    }
    match state.sessions.add_tag(&session_id, &tag) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(StatusCode::BAD_REQUEST, e),
    }
}

async fn remove_tag(
    State(state): State<AppState>,
    Path((session_id, tag)): Path<(String, String)>,
) -> Response {
    match state.sessions.remove_tag(&session_id, &tag) {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => error_response(
            StatusCode::NOT_FOUND,
            format!("Session {} has no tag {:?}", session_id, tag),
        ),
        Err(e) => error_response(StatusCode::NOT_FOUND, e),
    }
}

async fn list_tags(State(state): State<AppState>) -> Response {
    match state.sessions.all_tags() {
        Ok(tags) => Json(tags).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

#[derive(Debug, Deserialize)]
struct FrameSelection {
    frames: Vec<String>,
}

async fn delete_frames(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(selection): Json<FrameSelection>,
) -> Response {
    match state.sessions.delete_frames(&session_id, &selection.frames) {
        Ok(removed) => Json(json!({ "removed": removed })).into_response(),
        Err(e) => error_response(StatusCode::BAD_REQUEST, e),
    }
}
