//! 解析APIのHTTPサーバー

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use closet_vision_lib::{
    init_tracing,
    model::AppConfig,
    server::{router, AppState},
};

#[derive(Debug, Parser)]
#[command(name = "closet_vision", about = "衣類分類・色抽出APIサーバー")]
struct Args {
    /// 設定ファイル（省略時は CLOSET_VISION_CONFIG または closet_vision.json）
    #[arg(long)]
    config: Option<std::path::PathBuf>,

    /// チェックポイントのパス
    #[arg(long)]
    checkpoint: Option<String>,

    #[arg(long)]
    host: Option<String>,

    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing("info,tower_http=debug");
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => {
            let mut config = AppConfig::load(path)?;
            config.apply_env_overrides(|key| std::env::var(key).ok());
            config
        }
        None => AppConfig::load_or_default(),
    };
    if let Some(checkpoint) = args.checkpoint {
        config.model.checkpoint_path = checkpoint;
    }
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    config.log_summary();

    let state = Arc::new(AppState::from_config(&config));
    let app = router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("{addr} にバインドできません"))?;
    info!(%addr, "サーバーを起動しました");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("シャットダウンします");
        })
        .await
        .context("サーバーが異常終了しました")?;

    Ok(())
}
