//! 解析サービス
//!
//! プロセス起動時に一度だけ構築し、各リクエストのハンドラに渡します。
//! 分類は必須、色抽出はベストエフォートという非対称な失敗ポリシーをここで実装します。

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use crate::color::{ColorExtractor, MedianCutExtractor};
use crate::error::VisionError;
use crate::ml::{load_classifier, GarmentClassifier};
use crate::model::{AppConfig, ClassLabelSet};
use crate::types::AnalysisRecord;

/// 未ロード時に返すメッセージ
pub const MODEL_NOT_LOADED: &str = "Model not loaded";

/// 分類失敗時のメッセージ（原因はログにのみ出す）
pub const PREDICTION_FAILED: &str = "Prediction failed";

/// モデルの状態（起動時に一度だけ決まる）
#[derive(Clone)]
pub enum ModelState {
    Ready(Arc<dyn GarmentClassifier>),
    Unloaded { reason: String },
}

/// 解析サービス
#[derive(Clone)]
pub struct AnalysisService {
    model: ModelState,
    colors: Arc<dyn ColorExtractor>,
}

impl AnalysisService {
    pub fn new(classifier: Arc<dyn GarmentClassifier>, colors: Arc<dyn ColorExtractor>) -> Self {
        Self {
            model: ModelState::Ready(classifier),
            colors,
        }
    }

    /// モデルなしで起動する（全リクエストが "Model not loaded" で失敗する）
    pub fn unloaded(reason: impl Into<String>, colors: Arc<dyn ColorExtractor>) -> Self {
        Self {
            model: ModelState::Unloaded {
                reason: reason.into(),
            },
            colors,
        }
    }

    /// 設定に従ってチェックポイントを読み込む
    ///
    /// 読み込みに失敗してもプロセスは落とさず、未ロード状態で起動します。再試行はしません。
    pub fn from_config(config: &AppConfig) -> Self {
        let colors: Arc<dyn ColorExtractor> = Arc::new(MedianCutExtractor::new(
            config.colors.palette_size,
            config.colors.sample_step,
        ));

        match load_classifier(config) {
            Ok(classifier) => {
                info!(
                    classes = classifier.labels().len(),
                    device = %config.device_type,
                    "モデルの準備ができました"
                );
                Self::new(classifier, colors)
            }
            Err(e) => {
                error!(
                    path = %config.model.checkpoint_path,
                    error = %e,
                    "モデルを読み込めませんでした。未ロード状態で起動します"
                );
                Self::unloaded(e.to_string(), colors)
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.model, ModelState::Ready(_))
    }

    /// 未ロードの理由
    pub fn unloaded_reason(&self) -> Option<&str> {
        match &self.model {
            ModelState::Ready(_) => None,
            ModelState::Unloaded { reason } => Some(reason),
        }
    }

    pub fn labels(&self) -> Option<&ClassLabelSet> {
        match &self.model {
            ModelState::Ready(classifier) => Some(classifier.labels()),
            ModelState::Unloaded { .. } => None,
        }
    }

    /// 1画像を解析する
    ///
    /// 色抽出は別スレッドで分類と並行に走らせ、両方の完了を待ってから結果をまとめます。
    /// どちらかが失敗しても、もう一方は最後まで実行されます。
    pub fn analyze(&self, image_bytes: &[u8]) -> AnalysisRecord {
        let classifier = match &self.model {
            ModelState::Ready(classifier) => classifier,
            ModelState::Unloaded { reason } => {
                debug!(%reason, "モデル未ロードのためリクエストを拒否します");
                return AnalysisRecord::failure(VisionError::ModelNotLoaded.to_string());
            }
        };

        let started = Instant::now();
        let colors = self.colors.as_ref();

        let (prediction, color_result) = std::thread::scope(|scope| {
            let color_task = scope.spawn(|| colors.extract(image_bytes));
            let prediction = classifier.classify(image_bytes);
            let color_result = color_task.join();
            (prediction, color_result)
        });

        let clothing = match prediction {
            Ok(clothing) => clothing,
            Err(e) => {
                warn!(error = %e, bytes = image_bytes.len(), "分類に失敗しました");
                return AnalysisRecord::failure(PREDICTION_FAILED);
            }
        };

        let colors = match color_result {
            Ok(Ok(colors)) => Some(colors),
            Ok(Err(e)) => {
                warn!(error = %e, "色抽出に失敗しました。colors を null にします");
                None
            }
            Err(_) => {
                warn!("色抽出スレッドが panic しました。colors を null にします");
                None
            }
        };

        info!(
            class = %clothing.predicted_class,
            confidence = clothing.confidence,
            dominant = colors.as_ref().map(|c| c.dominant_color.name.as_str()).unwrap_or("-"),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "解析完了"
        );

        AnalysisRecord::Success { clothing, colors }
    }
}
