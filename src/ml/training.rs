//! モデル学習
//!
//! 事前学習済みバックボーン（任意）の全結合層をクラス数に合わせて差し替え、Adam で微調整します。
//! エポックごとに検証精度を測り、これまでの最良値を厳密に上回ったときだけチェックポイントを書き込みます
//! （同値では上書きしない。最初のエポックは必ず書き込む）。

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use burn::{
    data::{dataloader::DataLoaderBuilder, dataset::Dataset},
    module::{AutodiffModule, Module},
    optim::{AdamConfig, GradientsParams, Optimizer},
    record::{BinBytesRecorder, FullPrecisionSettings, NamedMpkFileRecorder, Recorder},
    tensor::{
        backend::{AutodiffBackend, Backend},
        ElementConversion, Int, Tensor,
    },
};
use tracing::{info, warn};

use crate::ml::augment::AugmentationConfig;
use crate::ml::dataset::{GarmentBatcher, GarmentDataset};
use crate::ml::model::{ResNet, ResNetConfig, IMAGENET_CLASSES, RESNET50_LAYERS};
use crate::model::{
    save_checkpoint, ArchitectureInfo, CheckpointMetadata, ClassLabelSet, LabelTranslator,
    TrainingMetrics, TrainingSettings,
};

/// 学習の設定
#[derive(Debug, Clone)]
pub struct TrainingOptions {
    pub data_dir: PathBuf,
    /// チェックポイントの保存先（`.tar.gz`）
    pub output_path: PathBuf,
    pub num_epochs: usize,
    pub batch_size: usize,
    pub num_workers: usize,
    pub learning_rate: f64,
    pub seed: u64,
    pub train_ratio: f32,
    /// ResNetのステージ構成
    pub layers: [usize; 4],
    pub base_width: usize,
    /// 事前学習済みバックボーン（ImageNetヘッド付きの named mpk）
    pub backbone_path: Option<PathBuf>,
    pub augmentation: AugmentationConfig,
}

impl TrainingOptions {
    pub fn from_settings(settings: &TrainingSettings, output_path: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: PathBuf::from(&settings.data_dir),
            output_path: output_path.into(),
            num_epochs: settings.num_epochs,
            batch_size: settings.batch_size,
            num_workers: settings.num_workers,
            learning_rate: settings.learning_rate,
            seed: settings.seed,
            train_ratio: settings.train_ratio,
            layers: RESNET50_LAYERS,
            base_width: 64,
            backbone_path: settings.backbone_path.as_ref().map(PathBuf::from),
            augmentation: AugmentationConfig::default(),
        }
    }
}

/// 1エポック分の結果
#[derive(Debug, Clone, PartialEq)]
pub struct EpochReport {
    pub epoch: usize,
    pub train_loss: f64,
    pub train_accuracy: f64,
    pub validation_accuracy: f64,
    /// このエポックでチェックポイントを書き込んだか
    pub saved: bool,
}

/// 学習全体の結果
#[derive(Debug, Clone)]
pub struct TrainingReport {
    pub class_labels: ClassLabelSet,
    pub epochs: Vec<EpochReport>,
    pub best_epoch: usize,
    pub best_validation_accuracy: f64,
    pub checkpoint_path: PathBuf,
}

/// 予測が正解した数
fn count_correct<B: Backend>(logits: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> usize {
    let [batch_size, _] = logits.dims();
    logits
        .argmax(1)
        .reshape([batch_size])
        .equal(targets)
        .int()
        .sum()
        .into_scalar()
        .elem::<i64>() as usize
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// 学習の初期モデルを作る
fn initial_model<B: Backend>(
    options: &TrainingOptions,
    num_classes: usize,
    device: &B::Device,
) -> Result<ResNet<B>> {
    let Some(backbone) = &options.backbone_path else {
        warn!("バックボーンが指定されていません。ランダム初期化から学習します");
        return Ok(ResNetConfig::new(options.layers, num_classes)
            .with_base_width(options.base_width)
            .init(device));
    };

    let record = NamedMpkFileRecorder::<FullPrecisionSettings>::new()
        .load(backbone.clone(), device)
        .map_err(|e| anyhow::anyhow!("バックボーンを読み込めません {}: {:?}", backbone.display(), e))?;

    info!(path = %backbone.display(), "事前学習済みバックボーンを読み込みました");

    Ok(ResNetConfig::new(options.layers, IMAGENET_CLASSES)
        .with_base_width(options.base_width)
        .init::<B>(device)
        .load_record(record)
        .with_num_classes(num_classes, device))
}

fn encode_model<B: Backend>(model: ResNet<B>) -> Result<Vec<u8>> {
    BinBytesRecorder::<FullPrecisionSettings>::default()
        .record(model.into_record(), ())
        .map_err(|e| anyhow::anyhow!("モデル重みのシリアライズに失敗しました: {:?}", e))
}

/// モデル学習を実行
///
/// データセットを列挙した時点でクラス順序を確定し、以後のチェックポイントすべてに書き込みます。
pub fn train<B: AutodiffBackend>(options: &TrainingOptions, device: B::Device) -> Result<TrainingReport> {
    let started = Instant::now();

    let dataset = GarmentDataset::from_directory(&options.data_dir, &LabelTranslator::default())?;
    let raw_class_tokens = dataset.raw_class_tokens().to_vec();
    let class_labels = dataset.class_labels().clone();
    let num_classes = class_labels.len();

    let (dataset_train, dataset_valid) = dataset.split(options.train_ratio, options.seed)?;
    info!(
        classes = num_classes,
        train = dataset_train.len(),
        valid = dataset_valid.len(),
        "データセットを分割しました"
    );

    let batch_size = options.batch_size.max(1);
    let dataloader_train = DataLoaderBuilder::new(GarmentBatcher::<B>::train(
        device.clone(),
        options.augmentation.clone(),
        options.seed,
    ))
    .batch_size(batch_size)
    .shuffle(options.seed)
    .num_workers(options.num_workers)
    .build(dataset_train);

    let dataloader_valid = DataLoaderBuilder::new(GarmentBatcher::<B::InnerBackend>::valid(device.clone()))
        .batch_size(batch_size)
        .num_workers(options.num_workers)
        .build(dataset_valid);

    let mut model = initial_model::<B>(options, num_classes, &device)?;
    let mut optim = AdamConfig::new().init();

    let architecture = ArchitectureInfo {
        layers: options.layers,
        base_width: options.base_width,
        num_classes,
    };

    info!(
        epochs = options.num_epochs,
        batch_size,
        learning_rate = options.learning_rate,
        "学習を開始します"
    );

    let mut epochs = Vec::with_capacity(options.num_epochs);
    let mut best: Option<(usize, f64)> = None;
    let mut checkpoint_path = None;

    for epoch in 1..=options.num_epochs {
        let epoch_started = Instant::now();

        let mut loss_sum = 0.0;
        let mut train_correct = 0;
        let mut train_total = 0;

        for batch in dataloader_train.iter() {
            let output = model.forward_classification(batch.images, batch.targets);
            let [n] = output.targets.dims();

            loss_sum += output.loss.clone().into_scalar().elem::<f64>() * n as f64;
            train_correct += count_correct(output.output.clone(), output.targets.clone());
            train_total += n;

            let grads = GradientsParams::from_grads(output.loss.backward(), &model);
            model = optim.step(options.learning_rate, model, grads);
        }

        let model_valid = model.valid();
        let mut valid_correct = 0;
        let mut valid_total = 0;
        for batch in dataloader_valid.iter() {
            let [n] = batch.targets.dims();
            let logits = model_valid.forward(batch.images);
            valid_correct += count_correct(logits, batch.targets);
            valid_total += n;
        }

        let train_loss = loss_sum / train_total.max(1) as f64;
        let train_accuracy = ratio(train_correct, train_total);
        let validation_accuracy = ratio(valid_correct, valid_total);

        let improved = best.map_or(true, |(_, best_acc)| validation_accuracy > best_acc);
        if improved {
            let metadata = CheckpointMetadata::new(
                architecture.clone(),
                raw_class_tokens.clone(),
                class_labels.clone(),
                TrainingMetrics {
                    epoch,
                    num_epochs: options.num_epochs,
                    validation_accuracy,
                    train_accuracy,
                    train_loss,
                },
            );
            let path = save_checkpoint(&options.output_path, &metadata, &encode_model(model_valid)?)
                .context("チェックポイントの保存に失敗しました")?;
            checkpoint_path = Some(path);
            best = Some((epoch, validation_accuracy));
        }

        info!(
            epoch,
            train_loss,
            train_accuracy,
            validation_accuracy,
            saved = improved,
            elapsed_ms = epoch_started.elapsed().as_millis() as u64,
            "エポック完了"
        );

        epochs.push(EpochReport {
            epoch,
            train_loss,
            train_accuracy,
            validation_accuracy,
            saved: improved,
        });
    }

    let (best_epoch, best_validation_accuracy) =
        best.context("エポック数が0のため、チェックポイントは作成されませんでした")?;
    let checkpoint_path = checkpoint_path.unwrap_or_else(|| options.output_path.clone());

    info!(
        best_epoch,
        best_validation_accuracy,
        path = %checkpoint_path.display(),
        elapsed_s = started.elapsed().as_secs(),
        "学習完了"
    );

    Ok(TrainingReport {
        class_labels,
        epochs,
        best_epoch,
        best_validation_accuracy,
        checkpoint_path,
    })
}

/// バックボーンが存在するか事前に確認する（CLI用）
pub fn check_backbone(path: &Path) -> Result<()> {
    let candidate = if path.extension().is_some() {
        path.to_path_buf()
    } else {
        path.with_extension("mpk")
    };
    anyhow::ensure!(
        candidate.exists(),
        "バックボーンが見つかりません: {}",
        candidate.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    #[test]
    fn test_count_correct() {
        let device = Default::default();
        let logits = Tensor::<NdArray<f32>, 2>::from_floats([[0.1, 0.9], [0.8, 0.2], [0.3, 0.7]], &device);
        let targets = Tensor::<NdArray<f32>, 1, Int>::from_ints([1, 1, 1], &device);
        assert_eq!(count_correct(logits, targets), 2);
    }

    #[test]
    fn test_ratio_handles_empty() {
        assert_eq!(ratio(0, 0), 0.0);
        assert_eq!(ratio(3, 4), 0.75);
    }

    #[test]
    fn test_options_from_settings() {
        let settings = TrainingSettings {
            backbone_path: Some("weights/resnet50".to_string()),
            ..TrainingSettings::default()
        };
        let options = TrainingOptions::from_settings(&settings, "out.tar.gz");
        assert_eq!(options.layers, RESNET50_LAYERS);
        assert_eq!(options.num_epochs, 5);
        assert_eq!(options.backbone_path, Some(PathBuf::from("weights/resnet50")));
    }

    #[test]
    fn test_missing_backbone_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        assert!(check_backbone(&dir.path().join("resnet50")).is_err());
    }
}
