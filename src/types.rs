use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

use crate::color::ColorName;

/// 名前付きの色（RGB + 粗い色名）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedColor {
    pub rgb: [u8; 3],
    pub name: ColorName,
}

impl NamedColor {
    pub fn new(rgb: [u8; 3]) -> Self {
        Self {
            rgb,
            name: ColorName::from_rgb(rgb),
        }
    }
}

/// 色抽出の結果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorResult {
    pub dominant_color: NamedColor,
    /// 最大5色、population × volume の降順
    pub palette: Vec<NamedColor>,
}

/// クラス名と信頼度（0〜100、小数点以下2桁）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassConfidence {
    #[serde(rename = "class")]
    pub class_name: String,
    pub confidence: f64,
}

/// 分類結果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub predicted_class: String,
    pub confidence: f64,
    pub top_predictions: Vec<ClassConfidence>,
}

/// 1リクエスト分の解析結果
///
/// JSON表現:
/// - 成功: `{"success": true, "clothing": {...}, "colors": {...} | null}`
/// - 失敗: `{"success": false, "error": "..."}`
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisRecord {
    Success {
        clothing: PredictionResult,
        colors: Option<ColorResult>,
    },
    Failure {
        error: String,
    },
}

impl AnalysisRecord {
    pub fn failure(error: impl Into<String>) -> Self {
        Self::Failure {
            error: error.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn clothing(&self) -> Option<&PredictionResult> {
        match self {
            Self::Success { clothing, .. } => Some(clothing),
            Self::Failure { .. } => None,
        }
    }

    pub fn colors(&self) -> Option<&ColorResult> {
        match self {
            Self::Success { colors, .. } => colors.as_ref(),
            Self::Failure { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { error } => Some(error),
        }
    }
}

impl Serialize for AnalysisRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Success { clothing, colors } => {
                let mut map = serializer.serialize_map(Some(3))?;
                map.serialize_entry("success", &true)?;
                map.serialize_entry("clothing", clothing)?;
                map.serialize_entry("colors", colors)?;
                map.end()
            }
            Self::Failure { error } => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("success", &false)?;
                map.serialize_entry("error", error)?;
                map.end()
            }
        }
    }
}
