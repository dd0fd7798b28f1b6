use std::io::Cursor;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use image::{DynamicImage, GrayImage, ImageBuffer, ImageFormat, Rgb};
use lookalike_core::{
    extract_center_square, ChannelOrder, DetectError, EmbedError, Embedder, EmbedderConfig,
    FaceBox, FaceDetector, FeatureBackbone, FeatureLayer, IndexBuilder, InputTensor, Pipeline,
    ResizeFilter,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use crate::build_app;
use crate::config::AppConfig;
use crate::handlers::SESSION_TOKEN_HEADER;
use crate::state::AppState;

const SMALL_CONFIG: EmbedderConfig = EmbedderConfig {
    input_size: 32,
    resize_filter: ResizeFilter::Triangle,
    channel_order: ChannelOrder::Rgb,
    mean: [127.5, 127.5, 127.5],
    scale: [1.0 / 127.5, 1.0 / 127.5, 1.0 / 127.5],
    layer: FeatureLayer::Block5Pool,
};

const CATALOG: [&str; 4] = [
    "n02085620-Chihuahua/a.jpg",
    "n02085620-Chihuahua/b.jpg",
    "n02088364-beagle/c.jpg",
    "n02108089-boxer/d.jpg",
];

/// Reports the whole frame as a single face.
struct WholeFrameDetector;

impl FaceDetector for WholeFrameDetector {
    fn detect(&self, gray: &GrayImage) -> Result<Vec<FaceBox>, DetectError> {
        let (width, height) = gray.dimensions();
        Ok(vec![FaceBox::new(0, 0, width, height)])
    }
}

/// Stands in for a detector whose worker has gone away.
struct StoppedDetector;

impl FaceDetector for StoppedDetector {
    fn detect(&self, _gray: &GrayImage) -> Result<Vec<FaceBox>, DetectError> {
        Err(DetectError::Unavailable("detector worker stopped".to_string()))
    }
}

/// Averages equal slices of the input tensor.
struct SliceMeanBackbone;

impl FeatureBackbone for SliceMeanBackbone {
    fn config(&self) -> &EmbedderConfig {
        &SMALL_CONFIG
    }

    fn forward(&self, input: &InputTensor) -> Result<Vec<f32>, EmbedError> {
        let outputs = SMALL_CONFIG.output_len();
        let chunk = (input.data.len() / outputs).max(1);
        Ok(input
            .data
            .chunks(chunk)
            .take(outputs)
            .map(|values| values.iter().sum::<f32>() / values.len() as f32 + 2.0)
            .collect())
    }
}

fn portrait(seed: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(ImageBuffer::from_fn(40, 40, |x, y| {
        let mixed = (x * (seed + 2)) ^ (y * (3 * seed + 1)) ^ (seed * 53);
        Rgb([(mixed % 256) as u8, ((mixed / 5) % 256) as u8, ((mixed / 11) % 256) as u8])
    }))
}

fn png_bytes(image: &DynamicImage) -> Vec<u8> {
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .expect("png encode must succeed");
    bytes
}

fn test_config() -> AppConfig {
    AppConfig {
        bind: "127.0.0.1:0".parse().expect("socket addr must parse"),
        index_path: std::path::PathBuf::from("unused_index.json"),
        weights_path: std::path::PathBuf::from("unused_weights.safetensors"),
        detector_model_path: std::path::PathBuf::from("unused_detector.bin"),
        catalog_dir: None,
        request_timeout_ms: 5_000,
        max_body_bytes: 1_048_576,
        max_concurrency: 16,
        session_ttl_seconds: 60,
        max_sessions: 100,
        require_non_empty_index: true,
        runners_up: 2,
    }
}

fn test_state_with(config: AppConfig, catalog: &[&str]) -> AppState {
    test_state_detected_by(config, catalog, Arc::new(WholeFrameDetector))
}

fn test_state_detected_by(
    config: AppConfig,
    catalog: &[&str],
    detector: Arc<dyn FaceDetector>,
) -> AppState {
    let embedder = Embedder::new(Box::new(SliceMeanBackbone)).expect("embedder must build");
    let mut builder = IndexBuilder::new(SMALL_CONFIG);
    for (seed, identifier) in catalog.iter().enumerate() {
        let crop = extract_center_square(&portrait(seed as u32));
        let embedding = embedder
            .embed(crop.as_ref())
            .expect("catalog embed must succeed");
        builder
            .insert(*identifier, embedding)
            .expect("insert must succeed");
    }

    let pipeline = Pipeline::new(detector, Arc::new(embedder), Arc::new(builder.finish()))
        .expect("pipeline must build");
    AppState::new(config, pipeline).expect("state must build")
}

fn test_state() -> AppState {
    test_state_with(test_config(), &CATALOG)
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body must be readable");
    serde_json::from_slice(&bytes).expect("response body must be valid json")
}

fn match_request(body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/match")
        .header("content-type", "application/octet-stream")
        .body(Body::from(body))
        .expect("request must build")
}

#[tokio::test]
async fn live_and_ready_report_the_loaded_index() {
    let app = build_app(test_state());

    let live_req = Request::builder()
        .uri("/live")
        .body(Body::empty())
        .expect("request must build");
    let live_resp = app
        .clone()
        .oneshot(live_req)
        .await
        .expect("response expected");
    assert_eq!(live_resp.status(), StatusCode::OK);
    assert_eq!(json_body(live_resp).await["status"], "live");

    let ready_req = Request::builder()
        .uri("/ready")
        .body(Body::empty())
        .expect("request must build");
    let ready_resp = app
        .clone()
        .oneshot(ready_req)
        .await
        .expect("response expected");
    assert_eq!(ready_resp.status(), StatusCode::OK);
    let ready_json = json_body(ready_resp).await;
    assert_eq!(ready_json["status"], "ready");
    assert_eq!(ready_json["checks"]["entries"], 4);
    assert_eq!(ready_json["checks"]["dimension"], 512);
    assert_eq!(ready_json["checks"]["categories"], 3);
}

#[tokio::test]
async fn ready_fails_on_empty_index() {
    let mut config = test_config();
    config.require_non_empty_index = false;
    let app = build_app(test_state_with(config, &[]));

    let req = Request::builder()
        .uri("/ready")
        .body(Body::empty())
        .expect("request must build");
    let resp = app.oneshot(req).await.expect("response expected");
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json_body(resp).await["code"], "not_ready");
}

#[tokio::test]
async fn match_returns_best_entry_and_session() {
    let app = build_app(test_state());

    let resp = app
        .oneshot(match_request(png_bytes(&portrait(2))))
        .await
        .expect("response expected");
    assert_eq!(resp.status(), StatusCode::OK);

    let body = json_body(resp).await;
    assert_eq!(body["identifier"], "n02088364-beagle/c.jpg");
    assert_eq!(body["category"], "Beagle");
    let distance = body["distance"]
        .as_f64()
        .expect("distance must be a number");
    assert!(distance.abs() < 1e-4);
    assert!(!body["session_token"]
        .as_str()
        .expect("token must be a string")
        .is_empty());

    let runners_up = body["runners_up"]
        .as_array()
        .expect("runners_up must be an array");
    assert_eq!(runners_up.len(), 2);
    let first_runner = runners_up[0]["distance"]
        .as_f64()
        .expect("distance must be a number");
    let second_runner = runners_up[1]["distance"]
        .as_f64()
        .expect("distance must be a number");
    assert!(first_runner <= second_runner);
}

#[tokio::test]
async fn match_rejects_unreadable_images() {
    let app = build_app(test_state());

    let resp = app
        .oneshot(match_request(b"definitely not an image".to_vec()))
        .await
        .expect("response expected");
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json_body(resp).await["code"], "face_not_found");
}

#[tokio::test]
async fn detector_outage_is_a_server_error() {
    let app = build_app(test_state_detected_by(
        test_config(),
        &CATALOG,
        Arc::new(StoppedDetector),
    ));

    let resp = app
        .oneshot(match_request(png_bytes(&portrait(1))))
        .await
        .expect("response expected");
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json_body(resp).await["code"], "internal");
}

#[tokio::test]
async fn match_rejects_empty_body() {
    let app = build_app(test_state());

    let resp = app
        .oneshot(match_request(Vec::new()))
        .await
        .expect("response expected");
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(resp).await["code"], "invalid_argument");
}

#[tokio::test]
async fn next_continues_a_matched_session() {
    let app = build_app(test_state());

    let match_resp = app
        .clone()
        .oneshot(match_request(png_bytes(&portrait(0))))
        .await
        .expect("response expected");
    assert_eq!(match_resp.status(), StatusCode::OK);
    let match_json = json_body(match_resp).await;
    assert_eq!(match_json["identifier"], "n02085620-Chihuahua/a.jpg");
    let token = match_json["session_token"]
        .as_str()
        .expect("token must be a string")
        .to_string();

    let next_req = Request::builder()
        .method("POST")
        .uri("/next")
        .header(SESSION_TOKEN_HEADER, token.as_str())
        .header("content-type", "application/json")
        .body(Body::from(
            json!({"query_image": "uploads/me.png"}).to_string(),
        ))
        .expect("request must build");
    let next_resp = app
        .clone()
        .oneshot(next_req)
        .await
        .expect("response expected");
    assert_eq!(next_resp.status(), StatusCode::OK);

    let next_json = json_body(next_resp).await;
    assert_eq!(next_json["session_token"], token.as_str());
    assert_eq!(next_json["status"], "ranked");
    // the only other chihuahua is the one alternate in that category
    assert_eq!(next_json["identifier"], "n02085620-Chihuahua/b.jpg");
    assert_eq!(next_json["category"], "Chihuahua");
    assert_eq!(next_json["query_image"], "uploads/me.png");
}

#[tokio::test]
async fn next_without_session_recovers_with_new_token() {
    let app = build_app(test_state());

    let req = Request::builder()
        .method("POST")
        .uri("/next")
        .body(Body::empty())
        .expect("request must build");
    let resp = app.clone().oneshot(req).await.expect("response expected");
    assert_eq!(resp.status(), StatusCode::OK);

    let body = json_body(resp).await;
    assert_eq!(body["status"], "recovered_fallback");
    assert_eq!(body["query_image"], Value::Null);
    let token = body["session_token"]
        .as_str()
        .expect("token must be a string")
        .to_string();
    assert!(!token.is_empty());

    let follow_req = Request::builder()
        .method("POST")
        .uri("/next")
        .header(SESSION_TOKEN_HEADER, token.as_str())
        .body(Body::empty())
        .expect("request must build");
    let follow_resp = app.oneshot(follow_req).await.expect("response expected");
    let follow = json_body(follow_resp).await;
    assert_eq!(follow["status"], "fallback");
    assert_eq!(follow["session_token"], token.as_str());
}

#[tokio::test]
async fn next_with_unknown_token_issues_a_fresh_one() {
    let app = build_app(test_state());

    let req = Request::builder()
        .method("POST")
        .uri("/next")
        .header(SESSION_TOKEN_HEADER, "expired-token")
        .body(Body::empty())
        .expect("request must build");
    let resp = app.oneshot(req).await.expect("response expected");
    assert_eq!(resp.status(), StatusCode::OK);

    let body = json_body(resp).await;
    assert_eq!(body["status"], "recovered_fallback");
    assert_ne!(body["session_token"], "expired-token");
}

#[tokio::test]
async fn next_after_session_expiry_recovers_with_new_token() {
    let mut config = test_config();
    config.session_ttl_seconds = 0;
    let app = build_app(test_state_with(config, &CATALOG));

    let match_resp = app
        .clone()
        .oneshot(match_request(png_bytes(&portrait(0))))
        .await
        .expect("response expected");
    assert_eq!(match_resp.status(), StatusCode::OK);
    let token = json_body(match_resp).await["session_token"]
        .as_str()
        .expect("token must be a string")
        .to_string();

    let req = Request::builder()
        .method("POST")
        .uri("/next")
        .header(SESSION_TOKEN_HEADER, token.as_str())
        .body(Body::empty())
        .expect("request must build");
    let resp = app.oneshot(req).await.expect("response expected");
    assert_eq!(resp.status(), StatusCode::OK);

    let body = json_body(resp).await;
    assert_eq!(body["status"], "recovered_fallback");
    assert_ne!(body["session_token"], token.as_str());
}

#[tokio::test]
async fn next_rejects_malformed_json() {
    let app = build_app(test_state());

    let req = Request::builder()
        .method("POST")
        .uri("/next")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .expect("request must build");
    let resp = app.oneshot(req).await.expect("response expected");
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn oversized_upload_is_rejected() {
    let mut config = test_config();
    config.max_body_bytes = 64;
    let app = build_app(test_state_with(config, &CATALOG));

    let resp = app
        .oneshot(match_request(vec![0u8; 4096]))
        .await
        .expect("response expected");
    assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn catalog_images_are_served_when_configured() {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock must be monotonic")
        .as_nanos();
    let root = std::env::temp_dir().join(format!("lookalike_catalog_{timestamp}"));
    let breed_dir = root.join("n02088364-beagle");
    std::fs::create_dir_all(&breed_dir).expect("mkdir must succeed");
    let image_bytes = png_bytes(&portrait(5));
    std::fs::write(breed_dir.join("c.png"), &image_bytes).expect("write must succeed");

    let mut config = test_config();
    config.catalog_dir = Some(root.clone());
    let app = build_app(test_state_with(config, &CATALOG));

    let req = Request::builder()
        .uri("/catalog/n02088364-beagle/c.png")
        .body(Body::empty())
        .expect("request must build");
    let resp = app.clone().oneshot(req).await.expect("response expected");
    assert_eq!(resp.status(), StatusCode::OK);
    let served = to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("response body must be readable");
    assert_eq!(served.as_ref(), image_bytes.as_slice());

    let missing_req = Request::builder()
        .uri("/catalog/n02088364-beagle/missing.png")
        .body(Body::empty())
        .expect("request must build");
    let missing_resp = app.oneshot(missing_req).await.expect("response expected");
    assert_eq!(missing_resp.status(), StatusCode::NOT_FOUND);

    std::fs::remove_dir_all(&root).expect("temp directory should be removable");
}
