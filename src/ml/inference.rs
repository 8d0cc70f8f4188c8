//! モデル推論機能
//!
//! チェックポイントから重みとクラス一覧を読み込み、1画像ずつ分類します。
//! 読み込み後のモデルは変更されません。

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use burn::{
    module::Module,
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::{activation::softmax, backend::Backend, Tensor, TensorData},
};
use tracing::{debug, info};

use crate::error::{CheckpointError, VisionError};
use crate::ml::model::{ResNet, ResNetConfig};
use crate::ml::prediction::{build_prediction, check_distribution, TOP_K};
use crate::ml::preprocess::{self, INPUT_SIZE};
use crate::ml::{CpuBackend, GarmentClassifier};
use crate::model::{
    load_checkpoint, AppConfig, CheckpointMetadata, ClassLabelSet, DeviceType, LabelTranslator,
};
use crate::types::PredictionResult;

/// 推論エンジン
///
/// burn のモジュールは `Sync` とは限らないため `Mutex` で保持し、
/// 推論のたびに短時間だけロックしてクローンします（重みは参照カウントで共有される）。
pub struct InferenceEngine<B: Backend> {
    model: Mutex<ResNet<B>>,
    labels: ClassLabelSet,
    metadata: Option<CheckpointMetadata>,
    device: B::Device,
    top_k: usize,
}

impl<B: Backend> InferenceEngine<B> {
    /// チェックポイントを読み込んで推論エンジンを初期化
    ///
    /// メタデータの検証に失敗した場合は重みを読み込まずにエラーを返します。
    pub fn load<P: AsRef<Path>>(
        checkpoint_path: P,
        device: B::Device,
        top_k: usize,
    ) -> Result<Self, CheckpointError> {
        let path = checkpoint_path.as_ref();
        let started = Instant::now();

        let (metadata, model_binary) = load_checkpoint(path)?;
        metadata.validate(&LabelTranslator::default())?;

        let arch = &metadata.architecture;
        let model = ResNetConfig::new(arch.layers, arch.num_classes)
            .with_base_width(arch.base_width)
            .init::<B>(&device);

        let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
        let record = recorder
            .load(model_binary, &device)
            .map_err(|e| CheckpointError::Record(format!("{e:?}")))?;
        let model = model.load_record(record);

        info!(
            path = %path.display(),
            classes = metadata.class_labels.len(),
            epoch = metadata.metrics.epoch,
            validation_accuracy = metadata.metrics.validation_accuracy,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "チェックポイントを読み込みました"
        );

        Ok(Self {
            model: Mutex::new(model),
            labels: metadata.class_labels.clone(),
            metadata: Some(metadata),
            device,
            top_k: top_k.clamp(1, TOP_K),
        })
    }

    /// 学習済み（またはテスト用）のモデルから直接作成
    pub fn from_model(
        model: ResNet<B>,
        labels: ClassLabelSet,
        device: B::Device,
        top_k: usize,
    ) -> Result<Self, CheckpointError> {
        if model.num_classes() != labels.len() {
            return Err(CheckpointError::Contract(format!(
                "model has {} outputs but {} class labels",
                model.num_classes(),
                labels.len()
            )));
        }
        Ok(Self {
            model: Mutex::new(model),
            labels,
            metadata: None,
            device,
            top_k: top_k.clamp(1, TOP_K),
        })
    }

    /// チェックポイントのメタデータ（チェックポイントから読み込んだ場合のみ）
    pub fn metadata(&self) -> Option<&CheckpointMetadata> {
        self.metadata.as_ref()
    }

    /// 正規化済み入力を分類
    fn predict(&self, input: Vec<f32>) -> Result<PredictionResult, VisionError> {
        let probabilities = self.probabilities(input)?;
        build_prediction(&probabilities, &self.labels, self.top_k).ok_or_else(|| {
            VisionError::Inference(format!(
                "model produced {} probabilities for {} classes",
                probabilities.len(),
                self.labels.len()
            ))
        })
    }

    /// 正規化済み入力 (3x224x224) → クラス確率
    fn probabilities(&self, input: Vec<f32>) -> Result<Vec<f32>, VisionError> {
        let model = self
            .model
            .lock()
            .map_err(|_| VisionError::Inference("model lock poisoned".to_string()))?
            .clone();
        let device = self.device.clone();
        let size = INPUT_SIZE as usize;

        // 形状不一致などはバックエンド側で panic するため、ここで受け止める
        let outcome = catch_unwind(AssertUnwindSafe(move || {
            let tensor = Tensor::<B, 4>::from_data(TensorData::new(input, [1, 3, size, size]), &device);
            let logits = model.forward(tensor);
            softmax(logits, 1).into_data().convert::<f32>().to_vec::<f32>()
        }));

        match outcome {
            Ok(Ok(probabilities)) => validated(probabilities),
            Ok(Err(e)) => Err(VisionError::Inference(format!("{e:?}"))),
            Err(panic) => Err(VisionError::Inference(panic_message(panic.as_ref()))),
        }
    }
}

/// NaN などが伝播した分布は推論失敗として扱う
fn validated(probabilities: Vec<f32>) -> Result<Vec<f32>, VisionError> {
    check_distribution(&probabilities).map_err(VisionError::Inference)?;
    Ok(probabilities)
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "forward pass panicked".to_string()
    }
}

impl<B: Backend> GarmentClassifier for InferenceEngine<B> {
    fn classify(&self, image_bytes: &[u8]) -> Result<PredictionResult, VisionError> {
        let started = Instant::now();
        let input = preprocess::preprocess_bytes(image_bytes)?;
        let prediction = self.predict(input)?;
        debug!(
            class = %prediction.predicted_class,
            confidence = prediction.confidence,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "分類しました"
        );
        Ok(prediction)
    }

    fn labels(&self) -> &ClassLabelSet {
        &self.labels
    }
}

/// 設定に従ってバックエンドを選び、チェックポイントを読み込む
pub fn load_classifier(config: &AppConfig) -> Result<Arc<dyn GarmentClassifier>, CheckpointError> {
    let path = Path::new(&config.model.checkpoint_path);
    let top_k = config.model.top_k;

    match config.device_type {
        DeviceType::Cpu => Ok(Arc::new(InferenceEngine::<CpuBackend>::load(
            path,
            Default::default(),
            top_k,
        )?)),
        #[cfg(feature = "wgpu")]
        DeviceType::Wgpu => Ok(Arc::new(InferenceEngine::<crate::ml::GpuBackend>::load(
            path,
            Default::default(),
            top_k,
        )?)),
        #[cfg(not(feature = "wgpu"))]
        DeviceType::Wgpu => {
            tracing::warn!("wgpu フィーチャなしでビルドされています。CPU で推論します");
            Ok(Arc::new(InferenceEngine::<CpuBackend>::load(
                path,
                Default::default(),
                top_k,
            )?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        save_checkpoint, ArchitectureInfo, TrainingMetrics,
    };
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    fn tiny_model(num_classes: usize) -> ResNet<CpuBackend> {
        ResNetConfig::new([1, 1, 1, 1], num_classes)
            .with_base_width(4)
            .init::<CpuBackend>(&Default::default())
    }

    fn png_bytes() -> Vec<u8> {
        let img = RgbImage::from_pixel(40, 30, Rgb([120, 80, 40]));
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    fn write_checkpoint(dir: &Path, tokens: &[&str]) -> std::path::PathBuf {
        let tokens: Vec<String> = tokens.iter().map(|t| t.to_string()).collect();
        let labels = LabelTranslator::default().translate(&tokens).unwrap();
        let model = tiny_model(tokens.len());
        let binary = BinBytesRecorder::<FullPrecisionSettings>::default()
            .record(model.into_record(), ())
            .unwrap();
        let metadata = CheckpointMetadata::new(
            ArchitectureInfo {
                layers: [1, 1, 1, 1],
                base_width: 4,
                num_classes: tokens.len(),
            },
            tokens,
            labels,
            TrainingMetrics::default(),
        );
        save_checkpoint(&dir.join("tiny.tar.gz"), &metadata, &binary).unwrap()
    }

    #[test]
    fn test_classify_returns_ranked_predictions() {
        let labels = LabelTranslator::default()
            .translate(&["Kaos", "Rok", "Jeans", "Polo"])
            .unwrap();
        let engine =
            InferenceEngine::from_model(tiny_model(4), labels.clone(), Default::default(), 3)
                .unwrap();

        let result = engine.classify(&png_bytes()).unwrap();
        assert_eq!(result.top_predictions.len(), 3);
        assert_eq!(result.predicted_class, result.top_predictions[0].class_name);
        assert!(labels.position(&result.predicted_class).is_some());
        for pair in result.top_predictions.windows(2) {
            assert!(pair[0].confidence >= pair[1].confidence);
        }
        assert!(result.confidence > 0.0 && result.confidence <= 100.0);
    }

    #[test]
    fn test_classify_is_deterministic() {
        let labels = LabelTranslator::default().translate(&["Kaos", "Rok"]).unwrap();
        let engine =
            InferenceEngine::from_model(tiny_model(2), labels, Default::default(), 3).unwrap();
        let bytes = png_bytes();
        assert_eq!(engine.classify(&bytes).unwrap(), engine.classify(&bytes).unwrap());
    }

    #[test]
    fn test_garbage_bytes_are_decode_errors() {
        let labels = LabelTranslator::default().translate(&["Kaos", "Rok"]).unwrap();
        let engine =
            InferenceEngine::from_model(tiny_model(2), labels, Default::default(), 3).unwrap();
        assert!(matches!(engine.classify(b"nope"), Err(VisionError::Decode(_))));
    }

    #[test]
    fn test_label_count_must_match_head() {
        let labels = LabelTranslator::default().translate(&["Kaos", "Rok"]).unwrap();
        let err = InferenceEngine::from_model(tiny_model(3), labels, Default::default(), 3)
            .err()
            .unwrap();
        assert!(matches!(err, CheckpointError::Contract(_)));
    }

    #[test]
    fn test_load_from_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_checkpoint(dir.path(), &["Gaun", "Mantel", "Sweter"]);

        let engine = InferenceEngine::<CpuBackend>::load(&path, Default::default(), 3).unwrap();
        assert_eq!(engine.labels().as_slice(), &["Dress", "Coat", "Sweater"]);
        assert!(engine.metadata().is_some());

        let result = engine.classify(&png_bytes()).unwrap();
        assert!(["Dress", "Coat", "Sweater"].contains(&result.predicted_class.as_str()));
    }

    #[test]
    fn test_probabilities_sum_to_one() {
        let labels = LabelTranslator::default()
            .translate(&["Kaos", "Rok", "Jeans", "Polo", "Mantel"])
            .unwrap();
        let engine =
            InferenceEngine::from_model(tiny_model(5), labels, Default::default(), 3).unwrap();
        let input = preprocess::preprocess_bytes(&png_bytes()).unwrap();

        let probabilities = engine.probabilities(input).unwrap();
        assert_eq!(probabilities.len(), 5);
        assert!(probabilities.iter().all(|p| (0.0..=1.0).contains(p)));
        let sum: f32 = probabilities.iter().sum();
        assert!((sum - 1.0).abs() < 1e-4, "sum = {sum}");
    }

    #[test]
    fn test_nan_distribution_is_inference_error() {
        let err = validated(vec![f32::NAN, f32::NAN]).unwrap_err();
        assert!(matches!(err, VisionError::Inference(ref msg) if msg.contains("non-finite")));
        assert_eq!(validated(vec![0.75, 0.25]).unwrap(), vec![0.75, 0.25]);
    }

    #[test]
    fn test_top_k_is_capped_at_three() {
        let labels = LabelTranslator::default()
            .translate(&["Kaos", "Rok", "Jeans", "Polo", "Mantel"])
            .unwrap();
        let engine =
            InferenceEngine::from_model(tiny_model(5), labels, Default::default(), 10).unwrap();
        assert_eq!(engine.classify(&png_bytes()).unwrap().top_predictions.len(), TOP_K);
    }

    #[test]
    fn test_load_missing_checkpoint_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result =
            InferenceEngine::<CpuBackend>::load(dir.path().join("none.tar.gz"), Default::default(), 3);
        assert!(matches!(result, Err(CheckpointError::Io { .. })));
    }
}
