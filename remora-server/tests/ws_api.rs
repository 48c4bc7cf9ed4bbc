use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use remora_common::drive::DriveMode;
use remora_common::frame::Frame;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use remora_server::config::ControlConfig;
use remora_server::pilot::PilotRegistry;
use remora_server::registry::VehicleRegistry;
use remora_server::session::fs::FsSessionStore;
use remora_server::web::{router, AppState};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const VIDEO_INTERVAL: Duration = Duration::from_millis(50);

/// Serves the full router on an ephemeral port, returning its address.
async fn serve() -> (tempfile::TempDir, Arc<VehicleRegistry>, String) {
    let dir = tempfile::tempdir().unwrap();
    let sessions = Arc::new(FsSessionStore::new(dir.path().join("sessions")).unwrap());
    let registry = Arc::new(VehicleRegistry::new(
        Arc::new(PilotRegistry::from_config(&[])),
        sessions.clone(),
        ControlConfig {
            response_timeout_ms: 2000,
            publish_timeout_ms: 200,
        },
    ));
    let state = AppState {
        registry: registry.clone(),
        sessions,
        video_interval: VIDEO_INTERVAL,
    };
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(state)).await.unwrap();
    });
    (dir, registry, addr.to_string())
}

async fn connect(addr: &str, path: &str) -> Socket {
    let (socket, _) = connect_async(format!("ws://{}{}", addr, path))
        .await
        .unwrap();
    socket
}

async fn next_text(socket: &mut Socket) -> Value {
    let message = tokio::time::timeout(Duration::from_secs(2), socket.next())
        .await
        .expect("no reply")
        .unwrap()
        .unwrap();
    match message {
        Message::Text(text) => serde_json::from_str(&text).unwrap(),
        other => panic!("unexpected message {:?}", other),
    }
}

async fn next_frame(socket: &mut Socket) -> Option<Frame> {
    let message = tokio::time::timeout(VIDEO_INTERVAL * 5, socket.next()).await.ok()?;
    match message.unwrap().unwrap() {
        Message::Binary(bytes) => Some(Frame::from_pnm(&bytes).unwrap()),
        other => panic!("unexpected message {:?}", other),
    }
}

#[tokio::test]
async fn drive_socket_applies_commands_and_replies_with_status() {
    let (_dir, registry, addr) = serve().await;
    let mut socket = connect(&addr, "/ws/drives/mycar/").await;

    socket
        .send(Message::Text(
            json!({"angle": 0.4, "throttle": "0.2", "drive_mode": "auto_angle"}).to_string(),
        ))
        .await
        .unwrap();
    let status = next_text(&mut socket).await;
    assert_eq!(status["id"], "mycar");
    assert_eq!(status["user_angle"].as_f64().unwrap() as f32, 0.4);
    assert_eq!(status["user_throttle"].as_f64().unwrap() as f32, 0.2);

    let vehicle = registry.get("mycar").unwrap().expect("created by the socket");
    assert_eq!(vehicle.drive_mode(), DriveMode::AutoAngle);

    socket.send(Message::Text("not json".to_string())).await.unwrap();
    let reply = next_text(&mut socket).await;
    assert!(reply["error"].is_string());

    // the socket stays usable after a rejected message
    socket
        .send(Message::Text(json!({"throttle": 0.1}).to_string()))
        .await
        .unwrap();
    let status = next_text(&mut socket).await;
    assert_eq!(status["user_throttle"].as_f64().unwrap() as f32, 0.1);
    assert_eq!(status["user_angle"], 0.0);
    assert_eq!(status["drive_mode"], "auto_angle");
}

#[tokio::test]
async fn video_socket_sends_each_frame_once() {
    let (_dir, registry, addr) = serve().await;
    let vehicle = registry.get_or_create("mycar").unwrap();
    let mut socket = connect(&addr, "/ws/video/mycar").await;

    assert!(next_frame(&mut socket).await.is_none());

    let first = Frame::new(1, 1, 3, vec![1, 2, 3]).unwrap();
    vehicle
        .with_state(|state| state.last_image = Some(Arc::new(first.clone())))
        .unwrap();
    assert_eq!(next_frame(&mut socket).await, Some(first));
    assert!(next_frame(&mut socket).await.is_none());

    let second = Frame::new(1, 1, 3, vec![4, 5, 6]).unwrap();
    vehicle
        .with_state(|state| state.last_image = Some(Arc::new(second.clone())))
        .unwrap();
    assert_eq!(next_frame(&mut socket).await, Some(second));
    assert!(next_frame(&mut socket).await.is_none());
}
