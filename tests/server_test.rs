use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use crabgate::camera::CameraSourceFactory;
use crabgate::platform::PlatformDetector;
use crabgate::server::{self, AppState};
use crabgate::session::{MediaTransport, SessionManager};
use crabgate::testing::{FakeTransport, SyntheticDrivers};
use crabgate::types::{CameraBackend, CameraConfig};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tower::ServiceExt;

const OFFER_SDP: &str = "v=0\r\no=- 7 1 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n";

fn state(drivers: SyntheticDrivers, static_dir: Option<PathBuf>) -> AppState {
    let detector =
        PlatformDetector::new(Arc::new(drivers)).with_host_info("Generic PC", "x86_64");
    let transport: Arc<dyn MediaTransport> = Arc::new(FakeTransport::new());
    let manager = SessionManager::new(
        CameraConfig::new(CameraBackend::Auto, 64, 48, 30),
        CameraSourceFactory::new(detector.clone()),
        transport,
    );
    AppState {
        manager,
        detector,
        static_dir,
    }
}

fn working_state() -> AppState {
    state(SyntheticDrivers::new().with_generic_devices([0]), None)
}

fn post_json(uri: &str, body: String) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, body.to_vec())
}

async fn send_json(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let (status, body) = send(app, request).await;
    (status, serde_json::from_slice(&body).unwrap())
}

fn offer_body() -> String {
    json!({ "offer": { "sdp": OFFER_SDP, "type": "offer" } }).to_string()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_offer_returns_answer() {
    let state = working_state();
    let manager = state.manager.clone();

    let (status, body) = send_json(server::router(state), post_json("/offer", offer_body())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["answer"]["type"], "answer");
    assert!(body["answer"]["sdp"].as_str().unwrap().starts_with("v=0"));
    assert_eq!(manager.active_count().await, 1);

    manager.shutdown_all().await;
}

#[tokio::test]
async fn test_malformed_json_is_bad_request() {
    let (status, body) =
        send_json(server::router(working_state()), post_json("/offer", "{not json".into())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_answer_type_is_bad_request() {
    let state = working_state();
    let manager = state.manager.clone();
    let body = json!({ "offer": { "sdp": OFFER_SDP, "type": "answer" } }).to_string();

    let (status, body) = send_json(server::router(state), post_json("/offer", body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("offer"));
    assert_eq!(manager.active_count().await, 0);
}

#[tokio::test]
async fn test_missing_camera_is_server_error() {
    let (status, body) = send_json(
        server::router(state(SyntheticDrivers::new(), None)),
        post_json("/offer", offer_body()),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].as_str().unwrap().contains("camera"));
}

#[tokio::test]
async fn test_invalid_camera_override_is_bad_request() {
    let body = json!({
        "offer": { "sdp": OFFER_SDP, "type": "offer" },
        "camera": { "backend": "generic", "width": 0, "height": 48, "fps": 30 }
    })
    .to_string();
    let (status, _) = send_json(server::router(working_state()), post_json("/offer", body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_oversized_camera_override_is_bad_request() {
    let state = working_state();
    let manager = state.manager.clone();
    let body = json!({
        "offer": { "sdp": OFFER_SDP, "type": "offer" },
        "camera": { "backend": "generic", "width": 1048576, "height": 1048576, "fps": 30 }
    })
    .to_string();

    let (status, body) = send_json(server::router(state), post_json("/offer", body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("exceeds"));
    assert_eq!(manager.active_count().await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_generic_vga_offer_end_to_end() {
    let detector = PlatformDetector::new(Arc::new(SyntheticDrivers::new().with_generic_devices([0])))
        .with_host_info("Generic PC", "x86_64");
    let transport = Arc::new(FakeTransport::new());
    let manager = SessionManager::new(
        CameraConfig::new(CameraBackend::Generic, 640, 480, 30),
        CameraSourceFactory::new(detector.clone()),
        transport.clone() as Arc<dyn MediaTransport>,
    );
    let app = server::router(AppState {
        manager: manager.clone(),
        detector,
        static_dir: None,
    });

    let (status, body) = send_json(app.clone(), post_json("/offer", offer_body())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["answer"]["type"], "answer");

    let (status, info) = send_json(app.clone(), get("/camera-info")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(info["current_config"]["backend"], "generic");
    assert_eq!(info["current_config"]["width"], 640);
    assert_eq!(info["current_config"]["height"], 480);
    assert_eq!(info["current_config"]["fps"], 30);

    let (_, sessions) = send_json(app, get("/sessions")).await;
    assert_eq!(sessions["active"], 1);
    assert_eq!(sessions["sessions"][0]["backend"], "generic");

    for _ in 0..200 {
        if transport.stats().frames_written.load(Ordering::SeqCst) > 0 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert!(transport.stats().frames_written.load(Ordering::SeqCst) > 0);

    manager.shutdown_all().await;
    assert_eq!(manager.active_count().await, 0);
}

#[tokio::test]
async fn test_camera_info_reports_capabilities() {
    let (status, body) = send_json(server::router(working_state()), get("/camera-info")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["platform"], "generic_computer");
    assert_eq!(body["board_library_available"], false);
    assert_eq!(body["recommended_backend"], "generic");
    assert_eq!(body["available_cameras"].as_array().unwrap().len(), 1);
    assert_eq!(body["current_config"]["width"], 64);
    assert_eq!(body["current_config"]["backend"], "auto");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_sessions_lists_active() {
    let state = working_state();
    let manager = state.manager.clone();
    let app = server::router(state);

    let (status, _) = send(app.clone(), post_json("/offer", offer_body())).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send_json(app, get("/sessions")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["active"], 1);
    assert_eq!(body["sessions"][0]["state"], "active");
    assert_eq!(body["sessions"][0]["backend"], "generic");

    manager.shutdown_all().await;
}

#[tokio::test]
async fn test_builtin_index_page() {
    let (status, body) = send(server::router(working_state()), get("/")).await;
    assert_eq!(status, StatusCode::OK);
    let page = String::from_utf8(body).unwrap();
    assert!(page.contains("/offer"));
}

#[tokio::test]
async fn test_static_dir_serves_files() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("index.html"), "<h1>custom client</h1>").unwrap();
    std::fs::write(dir.path().join("client.js"), "console.log('hi');").unwrap();

    let app = server::router(state(
        SyntheticDrivers::new().with_generic_devices([0]),
        Some(dir.path().to_path_buf()),
    ));

    let (status, body) = send(app.clone(), get("/")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"<h1>custom client</h1>");

    let (status, body) = send(app.clone(), get("/client.js")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"console.log('hi');");

    let (status, _) = send(app, get("/missing.css")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_offer_after_shutdown_is_unavailable() {
    let state = working_state();
    state.manager.shutdown_all().await;

    let (status, body) = send_json(server::router(state), post_json("/offer", offer_body())).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["error"].is_string());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_run_closes_sessions_on_shutdown() {
    let state = working_state();
    let manager = state.manager.clone();
    manager
        .create_session(crabgate::session::SessionDescription::offer(OFFER_SDP))
        .await
        .unwrap();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    server::run(listener, state, async {}).await.unwrap();

    assert_eq!(manager.active_count().await, 0);
    assert!(manager.is_shutting_down());
}
