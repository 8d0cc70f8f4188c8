//! 解析結果のベクトルインデックス登録
//!
//! 成功した解析結果から短いテキスト（クラス名 + 代表色名）を作って埋め込み、外部インデックスに登録します。
//! 登録の失敗はレスポンスに注記として付けるだけで、HTTPステータスは変えません。

pub mod pinecone;

pub use pinecone::PineconeIndexer;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::IndexError;
use crate::types::{AnalysisRecord, ColorResult, PredictionResult};

/// 登録の既定のタイムアウト
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// インデックスに登録するメタデータ
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexMetadata {
    #[serde(rename = "type")]
    pub item_type: String,
    pub confidence: f64,
    pub dominant_color: String,
    /// 例: "[153, 138, 119]"（色が取れなかった場合は "[]"）
    pub dominant_color_rgb: String,
}

/// 登録する1件分のドキュメント
#[derive(Debug, Clone, PartialEq)]
pub struct IndexDocument {
    pub id: String,
    /// 埋め込み対象のテキスト
    pub text: String,
    pub metadata: IndexMetadata,
}

impl IndexDocument {
    /// `item_<uuid>` 形式のIDを新しく作る
    pub fn new_id() -> String {
        format!("item_{}", uuid::Uuid::new_v4().simple())
    }

    pub fn from_analysis(id: String, clothing: &PredictionResult, colors: Option<&ColorResult>) -> Self {
        let dominant = colors.map(|c| c.dominant_color);
        let dominant_name = dominant
            .map(|c| c.name.to_string())
            .unwrap_or_else(|| "Unknown".to_string());
        let dominant_rgb = dominant
            .map(|c| format!("[{}, {}, {}]", c.rgb[0], c.rgb[1], c.rgb[2]))
            .unwrap_or_else(|| "[]".to_string());

        Self {
            id,
            text: format!("{} {}", clothing.predicted_class, dominant_name)
                .trim()
                .to_string(),
            metadata: IndexMetadata {
                item_type: clothing.predicted_class.clone(),
                confidence: clothing.confidence,
                dominant_color: dominant_name,
                dominant_color_rgb: dominant_rgb,
            },
        }
    }
}

/// 登録結果の状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexStatus {
    Indexed,
    Skipped,
    Failed,
}

/// レスポンスに付ける登録結果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexOutcome {
    pub status: IndexStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// ベクトルインデックスへの登録
#[async_trait]
pub trait ItemIndexer: Send + Sync {
    /// 無効な場合は登録せず、IDだけを返す（ドライラン）
    fn is_enabled(&self) -> bool;

    /// 1件の登録にかけてよい時間（超えたら失敗として扱う）
    fn timeout(&self) -> Duration {
        DEFAULT_TIMEOUT
    }

    async fn upsert(&self, document: &IndexDocument) -> Result<(), IndexError>;
}

/// 何もしないインデクサ
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledIndexer;

#[async_trait]
impl ItemIndexer for DisabledIndexer {
    fn is_enabled(&self) -> bool {
        false
    }

    async fn upsert(&self, _document: &IndexDocument) -> Result<(), IndexError> {
        Err(IndexError::Disabled)
    }
}

/// 成功した解析結果を登録する
///
/// 失敗した解析結果は登録せず `None` を返します。
pub async fn index_record(indexer: &dyn ItemIndexer, record: &AnalysisRecord) -> Option<IndexOutcome> {
    let clothing = record.clothing()?;
    let document = IndexDocument::from_analysis(IndexDocument::new_id(), clothing, record.colors());

    if !indexer.is_enabled() {
        info!(id = %document.id, text = %document.text, "インデックス登録は無効です（ドライラン）");
        return Some(IndexOutcome {
            status: IndexStatus::Skipped,
            id: Some(document.id),
            warning: None,
        });
    }

    let limit = indexer.timeout();
    let result = tokio::time::timeout(limit, indexer.upsert(&document))
        .await
        .unwrap_or(Err(IndexError::Timeout(limit)));

    let outcome = match result {
        Ok(()) => {
            info!(id = %document.id, text = %document.text, "インデックスに登録しました");
            IndexOutcome {
                status: IndexStatus::Indexed,
                id: Some(document.id),
                warning: None,
            }
        }
        Err(e) => {
            warn!(id = %document.id, error = %e, "インデックス登録に失敗しました");
            IndexOutcome {
                status: IndexStatus::Failed,
                id: None,
                warning: Some(e.to_string()),
            }
        }
    };
    Some(outcome)
}
