//! サーバーレス（AWS Lambda）のエントリポイント
//!
//! HTTPサーバーと同じルーターを lambda_http で動かします。
//! モデルはコールドスタート時に一度だけ読み込まれます。

use std::sync::Arc;

use lambda_http::{run, Error};
use tracing::info;

use closet_vision_lib::{
    init_tracing,
    model::AppConfig,
    server::{router, AppState},
};

#[tokio::main]
async fn main() -> Result<(), Error> {
    init_tracing("info");

    let config = AppConfig::load_or_default();
    config.log_summary();

    let state = Arc::new(AppState::from_config(&config));
    info!(model_loaded = state.service.is_ready(), "Lambda ハンドラを起動します");

    run(router(state)).await
}
