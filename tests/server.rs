mod common;

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::{json, Value};
use tower::ServiceExt;

use closet_vision_lib::color::MedianCutExtractor;
use closet_vision_lib::indexing::{DisabledIndexer, IndexDocument, ItemIndexer};
use closet_vision_lib::ml::{CpuBackend, InferenceEngine};
use closet_vision_lib::model::LabelTranslator;
use closet_vision_lib::server::{router, AppState};
use closet_vision_lib::{AnalysisService, IndexError};

struct UnavailableIndexer;

#[async_trait]
impl ItemIndexer for UnavailableIndexer {
    fn is_enabled(&self) -> bool {
        true
    }

    async fn upsert(&self, _document: &IndexDocument) -> Result<(), IndexError> {
        Err(IndexError::Response("503 Service Unavailable".to_string()))
    }
}

struct StalledIndexer;

#[async_trait]
impl ItemIndexer for StalledIndexer {
    fn is_enabled(&self) -> bool {
        true
    }

    fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(100)
    }

    async fn upsert(&self, _document: &IndexDocument) -> Result<(), IndexError> {
        std::future::pending().await
    }
}

fn ready_state(indexer: Arc<dyn ItemIndexer>) -> Arc<AppState> {
    let labels = LabelTranslator::default()
        .translate(&["Celana_Panjang", "Kaos", "Mantel"])
        .unwrap();
    let engine = InferenceEngine::<CpuBackend>::from_model(
        common::tiny_model(labels.len()),
        labels,
        Default::default(),
        3,
    )
    .unwrap();
    let service = AnalysisService::new(Arc::new(engine), Arc::new(MedianCutExtractor::default()));
    Arc::new(AppState::new(service, indexer, 10 * 1024 * 1024))
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn json_predict(image: &[u8]) -> Request<Body> {
    let payload = json!({ "image": format!("data:image/png;base64,{}", STANDARD.encode(image)) });
    Request::builder()
        .method("POST")
        .uri("/predict")
        .header("content-type", "application/json")
        .body(Body::from(payload.to_string()))
        .unwrap()
}

#[tokio::test]
async fn health_reports_ready() {
    let response = router(ready_state(Arc::new(DisabledIndexer)))
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_json(response).await,
        json!({"status": "ready", "model_loaded": true})
    );
}

#[tokio::test]
async fn predict_with_base64_json() {
    let image = common::png_bytes([15, 15, 15], 40, 60);
    let response = router(ready_state(Arc::new(DisabledIndexer)))
        .oneshot(json_predict(&image))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["clothing"]["top_predictions"].as_array().unwrap().len(), 3);
    assert_eq!(body["colors"]["dominant_color"]["name"], "Black");
    assert_eq!(body["index"]["status"], "skipped");
    assert!(body["index"]["id"].as_str().unwrap().starts_with("item_"));
}

#[tokio::test]
async fn predict_with_raw_body() {
    let image = common::png_bytes([230, 230, 230], 32, 32);
    let request = Request::builder()
        .method("POST")
        .uri("/predict")
        .header("content-type", "image/png")
        .body(Body::from(image))
        .unwrap();
    let response = router(ready_state(Arc::new(DisabledIndexer)))
        .oneshot(request)
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["colors"]["dominant_color"]["name"], "White");
}

#[tokio::test]
async fn indexing_failure_keeps_status_ok() {
    let image = common::png_bytes([20, 30, 200], 32, 32);
    let response = router(ready_state(Arc::new(UnavailableIndexer)))
        .oneshot(json_predict(&image))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["index"]["status"], "failed");
    assert!(body["index"]["warning"].as_str().unwrap().contains("503"));
}

#[tokio::test]
async fn stalled_index_does_not_hold_the_response() {
    let image = common::png_bytes([20, 30, 200], 32, 32);
    let response = tokio::time::timeout(
        std::time::Duration::from_secs(10),
        router(ready_state(Arc::new(StalledIndexer))).oneshot(json_predict(&image)),
    )
    .await
    .expect("/predict should answer without waiting on the index")
    .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["index"]["status"], "failed");
    assert!(body["index"]["warning"].as_str().unwrap().contains("timed out"));
}

#[tokio::test]
async fn undecodable_image_is_server_error() {
    let response = router(ready_state(Arc::new(DisabledIndexer)))
        .oneshot(json_predict(b"garbage"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let body = body_json(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "Prediction failed");
    assert!(body.get("index").is_none());
}

#[tokio::test]
async fn cors_allows_any_origin() {
    let request = Request::builder()
        .uri("/health")
        .header("origin", "https://example.com")
        .body(Body::empty())
        .unwrap();
    let response = router(ready_state(Arc::new(DisabledIndexer)))
        .oneshot(request)
        .await
        .unwrap();
    assert_eq!(
        response.headers().get("access-control-allow-origin").unwrap(),
        "*"
    );
}
