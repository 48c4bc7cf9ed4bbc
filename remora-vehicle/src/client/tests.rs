use super::*;

use std::sync::LazyLock;

use axum::extract::Path;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use remora_common::drive::Command;

static TRACING: LazyLock<()> = LazyLock::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("remora_vehicle=debug")
        .with_test_writer()
        .try_init();
});

type Uploads = Arc<Mutex<Vec<(String, UploadRequest)>>>;

async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

/// Answers every upload with `status` and `answer`, keeping what it received.
async fn stub_server(status: StatusCode, answer: WireResponse) -> (String, Uploads) {
    let uploads: Uploads = Arc::default();
    let seen = uploads.clone();
    let router = Router::new().route(
        "/api/vehicles/control/:vehicle_id/",
        post(
            move |Path(vehicle_id): Path<String>, Json(upload): Json<UploadRequest>| {
                let seen = seen.clone();
                let answer = answer.clone();
                async move {
                    seen.lock().unwrap().push((vehicle_id, upload));
                    (status, Json(answer)).into_response()
                }
            },
        ),
    );
    (serve(router).await, uploads)
}

fn client(url: &str) -> RemoteClient {
    LazyLock::force(&TRACING);
    RemoteClient::new(url, "mycar", Duration::from_secs(2)).unwrap()
}

#[tokio::test]
async fn decide_posts_the_upload_and_decodes_the_answer() {
    let answer = WireResponse::encode(Command::new(0.25, 0.5), DriveMode::Auto);
    let (url, uploads) = stub_server(StatusCode::OK, answer).await;
    let client = client(&format!("{}/", url));
    assert_eq!(
        client.control_url(),
        format!("{}/api/vehicles/control/mycar/", url)
    );

    let frame = Frame::new(2, 2, 1, vec![9, 8, 7, 6]).unwrap();
    let decision = client.decide(frame.clone(), 0.1, 0.2, 35.0).await.unwrap();
    assert_eq!(decision, (0.25, 0.5, DriveMode::Auto));

    let uploads = uploads.lock().unwrap();
    assert_eq!(uploads.len(), 1);
    let (vehicle_id, upload) = &uploads[0];
    assert_eq!(vehicle_id, "mycar");
    assert_eq!(upload.image, frame);
    assert_eq!(
        (upload.angle, upload.throttle, upload.milliseconds),
        (0.1, 0.2, 35.0)
    );
}

#[tokio::test]
async fn zero_command_in_an_error_status_is_still_a_decision() {
    let (url, _) = stub_server(
        StatusCode::GATEWAY_TIMEOUT,
        WireResponse::zero(DriveMode::AutoAngle),
    )
    .await;
    let decision = client(&url)
        .decide(Frame::default(), 0.0, 0.0, 0.0)
        .await
        .unwrap();
    assert_eq!(decision, (0.0, 0.0, DriveMode::AutoAngle));
}

#[tokio::test]
async fn answers_without_a_command_are_errors() {
    let router = Router::new().route(
        "/api/vehicles/control/:vehicle_id/",
        post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
    );
    let url = serve(router).await;
    assert!(client(&url)
        .decide(Frame::default(), 0.0, 0.0, 0.0)
        .await
        .is_err());

    let unreachable = client("http://127.0.0.1:9");
    let missing = unreachable.decide(Frame::default(), 0.0, 0.0, 0.0);
    assert!(missing.await.is_err());
}

#[tokio::test]
async fn lag_is_logged_per_cycle() {
    let (url, _) = stub_server(StatusCode::OK, WireResponse::zero(DriveMode::User)).await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lag_log.csv");
    let client = client(&url).with_lag_log(LagLog::create(&path).unwrap());

    client.decide(Frame::default(), 0.0, 0.0, 0.0).await.unwrap();
    client.decide(Frame::default(), 0.0, 0.0, 0.0).await.unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    assert_eq!(text.lines().count(), 3);
}

#[tokio::test]
async fn threaded_mode_returns_the_last_answer_without_waiting() {
    let answer = WireResponse::encode(Command::new(-0.5, 0.3), DriveMode::Auto);
    let (url, uploads) = stub_server(StatusCode::OK, answer).await;
    let client = client(&url);

    let frame = Frame::new(1, 1, 1, vec![42]).unwrap();
    let first = client.decide_threaded(frame.clone(), 0.0, 0.0, 5.0).unwrap();
    assert_eq!(first, (0.0, 0.0, DriveMode::User));

    let handle = client.start();
    let mut decision = first;
    for _ in 0..100 {
        decision = client.decide_threaded(frame.clone(), 0.0, 0.0, 5.0).unwrap();
        if decision != first {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(decision, (-0.5, 0.3, DriveMode::Auto));

    client.stop();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
    assert!(!client.is_running());

    let uploads = uploads.lock().unwrap();
    assert!(!uploads.is_empty());
    assert!(uploads.iter().all(|(_, upload)| upload.image == frame));
}

#[tokio::test]
async fn threaded_mode_stops_the_vehicle_when_the_server_is_gone() {
    let client = client("http://127.0.0.1:9");
    let handle = client.start();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let decision = client.decide_threaded(Frame::default(), 0.4, 0.4, 0.0).unwrap();
    assert_eq!(decision, (0.0, 0.0, DriveMode::User));

    client.stop();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
}
