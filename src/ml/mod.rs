//! 衣類分類モデルと学習・推論
//!
//! 前処理、ResNetモデル、推論エンジン、学習手順をまとめています。

pub mod augment;
pub mod dataset;
pub mod inference;
pub mod model;
pub mod prediction;
pub mod preprocess;
pub mod training;

pub use inference::{load_classifier, InferenceEngine};
pub use model::{ResNet, ResNetConfig};
pub use training::{train, TrainingOptions, TrainingReport};

use crate::error::VisionError;
use crate::model::ClassLabelSet;
use crate::types::PredictionResult;

/// CPU推論用バックエンド
pub type CpuBackend = burn::backend::NdArray<f32>;

/// GPU推論用バックエンド
#[cfg(feature = "wgpu")]
pub type GpuBackend = burn::backend::Wgpu;

/// 衣類分類の抽象
///
/// 実装は読み込み後に変更されず、複数スレッドから同時に呼ばれます。
pub trait GarmentClassifier: Send + Sync {
    fn classify(&self, image_bytes: &[u8]) -> Result<PredictionResult, VisionError>;

    fn labels(&self) -> &ClassLabelSet;
}
