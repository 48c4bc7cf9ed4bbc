use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use remora_common::frame::Frame;
use serde_json::json;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, warn};

use super::{error_response, AppState};
use crate::control::ingress::{self, LiveControl};
use crate::vehicle::Vehicle;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/ws/drives/:vehicle_id/", get(drive_socket))
        .route("/ws/video/:vehicle_id", get(video_socket))
}

async fn drive_socket(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(vehicle_id): Path<String>,
) -> Response {
    match state.registry.get_or_create(&vehicle_id) {
        Ok(vehicle) => ws.on_upgrade(move |socket| handle_drive_socket(socket, vehicle, state)),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

/// Applies every text message as a [`LiveControl`] and answers with the
/// resulting status, or an error object.
async fn handle_drive_socket(socket: WebSocket, vehicle: Arc<Vehicle>, state: AppState) {
    let (mut ws_sink, mut ws_stream) = socket.split();
    debug!("Drive socket opened for vehicle {}", vehicle.id());

    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                let applied = LiveControl::from_json(&text).and_then(|message| {
                    ingress::apply(&vehicle, &message, state.registry.sessions())
                });
                let reply = applied.and_then(|status| Ok(serde_json::to_string(&status)?));
                let reply = match reply {
                    Ok(reply) => reply,
                    Err(e) => {
                        warn!("Drive message for vehicle {} rejected: {}", vehicle.id(), e);
                        json!({ "error": e.to_string() }).to_string()
                    }
                };
                if let Err(e) = ws_sink.send(Message::Text(reply)).await {
                    error!("Failed to answer drive socket: {}", e);
                    break;
                }
            }
            Ok(Message::Close(reason)) => {
                debug!("Client requested close: {:?}", reason);
                break;
            }
            Ok(_) => debug!("Ignoring non-text message"),
            Err(e) => {
                error!("WebSocket error: {}", e);
                break;
            }
        }
    }

    debug!("Drive socket closed for vehicle {}", vehicle.id());
}

async fn video_socket(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(vehicle_id): Path<String>,
) -> Response {
    let interval = state.video_interval;
    match state.registry.get_or_create(&vehicle_id) {
        Ok(vehicle) => {
            ws.on_upgrade(move |socket| handle_video_socket(socket, vehicle, interval))
        }
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

/// Polls the vehicle's latest frame every `interval` and sends it as a binary
/// PNM message whenever it changed.
async fn handle_video_socket(socket: WebSocket, vehicle: Arc<Vehicle>, interval: Duration) {
    let (mut ws_sink, mut ws_stream) = socket.split();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_sent: Option<Arc<Frame>> = None;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let frame = match vehicle.last_image() {
                    Ok(frame) => frame,
                    Err(e) => {
                        error!("Video frame unavailable for vehicle {}: {}", vehicle.id(), e);
                        break;
                    }
                };
                let Some(frame) = frame else { continue };
                if last_sent.as_ref().is_some_and(|sent| Arc::ptr_eq(sent, &frame)) {
                    continue;
                }
                if let Err(e) = ws_sink.send(Message::Binary(frame.to_pnm())).await {
                    debug!("Video consumer for vehicle {} went away: {}", vehicle.id(), e);
                    break;
                }
                last_sent = Some(frame);
            }
            incoming = ws_stream.next() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            }
        }
    }

    debug!("Video socket closed for vehicle {}", vehicle.id());
}
