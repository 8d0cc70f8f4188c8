//! チェックポイントのメタデータ
//!
//! tar.gz 内の `metadata.json` として保存されます。
//! クラス一覧を重みと同じファイルに入れることで、モデルとラベルが食い違う余地をなくしています。
//!
//! ## 読み込み時の検証
//! - `raw_class_tokens` を再変換でき、結果が `class_labels` と一致すること
//! - `architecture.num_classes` がラベル数と一致すること
//! - `input_size` と `normalization` が現在の前処理定数と一致すること

use serde::{Deserialize, Serialize};

use crate::error::CheckpointError;
use crate::ml::preprocess::{IMAGENET_MEAN, IMAGENET_STD, INPUT_SIZE};
use crate::model::labels::{ClassLabelSet, LabelTranslator};

/// メタデータ形式のバージョン
pub const FORMAT_VERSION: u32 = 1;

/// ネットワーク構成
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchitectureInfo {
    /// 各ステージのブロック数
    pub layers: [usize; 4],
    /// 最初のステージの幅
    pub base_width: usize,
    /// 出力クラス数
    pub num_classes: usize,
}

/// 正規化パラメータ
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizationInfo {
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

impl Default for NormalizationInfo {
    fn default() -> Self {
        Self {
            mean: IMAGENET_MEAN,
            std: IMAGENET_STD,
        }
    }
}

/// 学習時の指標
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingMetrics {
    /// この重みを保存したエポック（1始まり）
    pub epoch: usize,
    /// 予定エポック数
    pub num_epochs: usize,
    /// 検証精度（0〜1）
    pub validation_accuracy: f64,
    /// 学習精度（0〜1）
    pub train_accuracy: f64,
    /// 学習損失の平均
    pub train_loss: f64,
}

/// チェックポイントのメタデータ
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    pub format_version: u32,

    pub architecture: ArchitectureInfo,

    /// データセット列挙時のディレクトリ名（この順序がクラスインデックス）
    /// 例: ["Blazer", "Celana_Panjang", "Kaos"]
    pub raw_class_tokens: Vec<String>,

    /// 変換後の正規ラベル
    /// 例: ["Blazer", "Trousers/Long Pants", "T-Shirt"]
    pub class_labels: ClassLabelSet,

    /// モデル入力サイズ（正方形）
    pub input_size: u32,

    pub normalization: NormalizationInfo,

    #[serde(flatten)]
    pub metrics: TrainingMetrics,

    /// 学習時刻（RFC 3339）
    pub trained_at: String,
}

impl CheckpointMetadata {
    /// 新しいメタデータを作成
    pub fn new(
        architecture: ArchitectureInfo,
        raw_class_tokens: Vec<String>,
        class_labels: ClassLabelSet,
        metrics: TrainingMetrics,
    ) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            architecture,
            raw_class_tokens,
            class_labels,
            input_size: INPUT_SIZE,
            normalization: NormalizationInfo::default(),
            metrics,
            trained_at: chrono::Local::now().to_rfc3339(),
        }
    }

    pub fn to_json_string(&self) -> Result<String, CheckpointError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json_string(json: &str) -> Result<Self, CheckpointError> {
        Ok(serde_json::from_str(json)?)
    }

    /// 読み込んだメタデータが現在のビルドで使えるか検証する
    pub fn validate(&self, translator: &LabelTranslator) -> Result<(), CheckpointError> {
        if self.format_version != FORMAT_VERSION {
            return Err(CheckpointError::Contract(format!(
                "unsupported format_version {} (expected {})",
                self.format_version, FORMAT_VERSION
            )));
        }

        let retranslated = translator.translate(&self.raw_class_tokens)?;
        if retranslated != self.class_labels {
            return Err(CheckpointError::Contract(
                "class_labels do not match the translation of raw_class_tokens".to_string(),
            ));
        }

        if self.architecture.num_classes != self.class_labels.len() {
            return Err(CheckpointError::Contract(format!(
                "model has {} outputs but {} class labels",
                self.architecture.num_classes,
                self.class_labels.len()
            )));
        }

        if self.input_size != INPUT_SIZE {
            return Err(CheckpointError::Contract(format!(
                "checkpoint expects {0}x{0} input, preprocessing produces {1}x{1}",
                self.input_size, INPUT_SIZE
            )));
        }

        if self.normalization != NormalizationInfo::default() {
            return Err(CheckpointError::Contract(
                "checkpoint normalization differs from the preprocessing constants".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LabelError;

    fn sample() -> CheckpointMetadata {
        let tokens = vec!["Kaos".to_string(), "Rok".to_string()];
        let labels = LabelTranslator::default().translate(&tokens).unwrap();
        CheckpointMetadata::new(
            ArchitectureInfo {
                layers: [3, 4, 6, 3],
                base_width: 64,
                num_classes: 2,
            },
            tokens,
            labels,
            TrainingMetrics {
                epoch: 2,
                num_epochs: 5,
                validation_accuracy: 0.75,
                train_accuracy: 0.8,
                train_loss: 0.4,
            },
        )
    }

    #[test]
    fn test_json_round_trip_and_layout() {
        let metadata = sample();
        let json = metadata.to_json_string().unwrap();

        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["class_labels"][0], "T-Shirt");
        assert_eq!(value["validation_accuracy"], 0.75);
        assert_eq!(value["input_size"], 224);

        let restored = CheckpointMetadata::from_json_string(&json).unwrap();
        assert_eq!(restored, metadata);
    }

    #[test]
    fn test_valid_metadata_passes() {
        sample().validate(&LabelTranslator::default()).unwrap();
    }

    #[test]
    fn test_class_count_mismatch_is_rejected() {
        let mut metadata = sample();
        metadata.architecture.num_classes = 3;
        let err = metadata.validate(&LabelTranslator::default()).unwrap_err();
        assert!(matches!(err, CheckpointError::Contract(_)));
    }

    #[test]
    fn test_unknown_token_is_rejected() {
        let mut metadata = sample();
        metadata.raw_class_tokens[1] = "Sepatu".to_string();
        let err = metadata.validate(&LabelTranslator::default()).unwrap_err();
        assert!(matches!(
            err,
            CheckpointError::Labels(LabelError::UnknownClassToken(ref t)) if t == "Sepatu"
        ));
    }

    #[test]
    fn test_reordered_labels_are_rejected() {
        let mut metadata = sample();
        metadata.class_labels =
            ClassLabelSet::new(vec!["Skirt".to_string(), "T-Shirt".to_string()]).unwrap();
        assert!(metadata.validate(&LabelTranslator::default()).is_err());
    }

    #[test]
    fn test_changed_normalization_is_rejected() {
        let mut metadata = sample();
        metadata.normalization.mean = [0.5, 0.5, 0.5];
        assert!(metadata.validate(&LabelTranslator::default()).is_err());
    }
}
