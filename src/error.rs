//! エラー型の定義
//!
//! リクエスト単位のエラー（[`VisionError`]）と、起動時にのみ発生する
//! ラベル・チェックポイント関連のエラーを分けて定義します。

use std::path::PathBuf;

use thiserror::Error;

/// 1リクエストの解析中に発生するエラー
#[derive(Debug, Error)]
pub enum VisionError {
    /// 画像バイト列をデコードできない
    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),

    /// 起動時のモデル読み込みに失敗している（または未実行）
    #[error("Model not loaded")]
    ModelNotLoaded,

    /// 順伝播中の数値エラー・形状エラー
    #[error("inference failed: {0}")]
    Inference(String),

    /// パレット量子化の失敗
    #[error("color extraction failed: {0}")]
    ColorExtraction(String),
}

/// ラベル変換のエラー（起動時のみ、致命的）
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LabelError {
    #[error("class token `{0}` has no entry in the translation table")]
    UnknownClassToken(String),

    #[error("class label set is empty")]
    Empty,

    #[error("class token `{0}` appears more than once")]
    Duplicate(String),
}

/// チェックポイントの読み書きエラー
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("`{0}` not found in checkpoint archive")]
    MissingEntry(&'static str),

    #[error("invalid checkpoint metadata: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("failed to restore model weights: {0}")]
    Record(String),

    #[error(transparent)]
    Labels(#[from] LabelError),

    /// 前処理・ラベルの契約とチェックポイントの内容が一致しない
    #[error("checkpoint contract violated: {0}")]
    Contract(String),
}

impl CheckpointError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// 埋め込み・インデックス登録のエラー（レスポンスのステータスには影響しない）
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("indexing is disabled")]
    Disabled,

    #[error("PINECONE_API_KEY is not set")]
    MissingApiKey,

    #[error("request to vector index failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected response from vector index: {0}")]
    Response(String),

    #[error("indexing timed out after {0:?}")]
    Timeout(std::time::Duration),
}
