//! HTTP ルーター
//!
//! 同じルーターを通常のHTTPサーバーとサーバーレス（lambda_http）の両方で使います。

pub mod extract;

use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Request, State},
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};

use crate::indexing::{index_record, DisabledIndexer, ItemIndexer, PineconeIndexer};
use crate::model::{AppConfig, IndexSettings};
use crate::service::{AnalysisService, PREDICTION_FAILED};
use crate::types::AnalysisRecord;

pub use extract::{image_from_request, ImageInputError};

/// ハンドラ間で共有する状態
pub struct AppState {
    pub service: AnalysisService,
    pub indexer: Arc<dyn ItemIndexer>,
    pub max_upload_bytes: usize,
}

impl AppState {
    pub fn new(service: AnalysisService, indexer: Arc<dyn ItemIndexer>, max_upload_bytes: usize) -> Self {
        Self {
            service,
            indexer,
            max_upload_bytes,
        }
    }

    /// 設定からモデルとインデクサを用意する
    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            AnalysisService::from_config(config),
            build_indexer(&config.indexing),
            config.server.max_upload_bytes,
        )
    }
}

/// 設定に従ってインデクサを作る
pub fn build_indexer(settings: &IndexSettings) -> Arc<dyn ItemIndexer> {
    if !settings.enabled {
        info!("インデックス登録は無効です");
        return Arc::new(DisabledIndexer);
    }
    if settings.api_key.is_none() {
        warn!("PINECONE_API_KEY が未設定です。登録はすべて失敗として注記されます");
    }
    info!(index = %settings.index_name, model = %settings.embed_model, "Pinecone へ登録します");
    Arc::new(PineconeIndexer::new(settings))
}

/// ルーターを構築
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    let limit = state.max_upload_bytes;

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/predict", post(predict))
        .layer(DefaultBodyLimit::max(limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn root() -> Json<Value> {
    Json(json!({ "message": "Closet vision classifier is running" }))
}

async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    let ready = state.service.is_ready();
    Json(json!({
        "status": if ready { "ready" } else { "unready" },
        "model_loaded": ready,
    }))
}

fn failure(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(AnalysisRecord::failure(message))).into_response()
}

async fn predict(State(state): State<Arc<AppState>>, request: Request) -> Response {
    let image = match image_from_request(request, state.max_upload_bytes).await {
        Ok(image) => image,
        Err(e) => {
            warn!(error = %e, "画像を受け取れませんでした");
            return failure(StatusCode::BAD_REQUEST, e.to_string());
        }
    };

    let service = state.service.clone();
    let record = match tokio::task::spawn_blocking(move || service.analyze(&image)).await {
        Ok(record) => record,
        Err(e) => {
            error!(error = %e, "解析タスクが異常終了しました");
            return failure(StatusCode::INTERNAL_SERVER_ERROR, PREDICTION_FAILED);
        }
    };

    if !record.is_success() {
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(record)).into_response();
    }

    let outcome = index_record(state.indexer.as_ref(), &record).await;

    let mut body = match serde_json::to_value(&record) {
        Ok(body) => body,
        Err(e) => {
            error!(error = %e, "レスポンスのシリアライズに失敗しました");
            return failure(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
        }
    };
    if let (Some(outcome), Some(map)) = (outcome, body.as_object_mut()) {
        map.insert("index".to_string(), json!(outcome));
    }

    (StatusCode::OK, Json(body)).into_response()
}
