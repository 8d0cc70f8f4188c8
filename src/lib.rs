//! 衣類の分類と色パレット抽出
//!
//! 1枚の画像から衣類カテゴリ（上位3件の信頼度付き）と代表色・パレットを求めます。
//! HTTPサーバー、サーバーレス、学習CLIはすべてこのライブラリを使います。

pub mod color;
pub mod error;
pub mod indexing;
pub mod ml;
pub mod model;
pub mod server;
pub mod service;
pub mod types;

pub use error::{CheckpointError, IndexError, LabelError, VisionError};
pub use service::AnalysisService;
pub use types::{AnalysisRecord, ClassConfidence, ColorResult, NamedColor, PredictionResult};

use tracing_subscriber::EnvFilter;

/// ログ出力を初期化（`RUST_LOG` が優先、2回目以降の呼び出しは無視）
pub fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
