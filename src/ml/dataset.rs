//! 学習用データセット
//!
//! データセットのルート直下のディレクトリ名を生のクラストークンとし、
//! バイト順に並べた順序をクラスインデックスとして確定します。
//! この順序は列挙した時点でチェックポイントに書き込まれ、以後再列挙されることはありません。

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context, Result};
use burn::{
    data::{dataloader::batcher::Batcher, dataset::Dataset},
    tensor::{backend::Backend, Int, Tensor, TensorData},
};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::{info, warn};

use crate::ml::augment::{augment, AugmentationConfig};
use crate::ml::preprocess::{self, INPUT_LEN, INPUT_SIZE};
use crate::model::{ClassLabelSet, LabelTranslator};

/// 学習に使う画像の拡張子
pub const IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "webp", "bmp"];

fn is_image(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

/// 学習データセット（パスのリストのみ保持）
#[derive(Debug, Clone)]
pub struct GarmentDataset {
    samples: Vec<(PathBuf, usize)>, // (画像パス, クラスID)
    raw_class_tokens: Vec<String>,
    class_labels: ClassLabelSet,
}

impl GarmentDataset {
    /// ディレクトリから学習データを読み込む
    ///
    /// クラストークンは列挙直後に変換され、変換表にないトークンがあれば学習前にエラーになります。
    pub fn from_directory(data_dir: &Path, translator: &LabelTranslator) -> Result<Self> {
        let mut class_dirs = Vec::new();
        for entry in std::fs::read_dir(data_dir)
            .with_context(|| format!("データセットを開けません: {}", data_dir.display()))?
        {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                class_dirs.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        class_dirs.sort();

        let class_labels = translator
            .translate(&class_dirs)
            .context("クラストークンを変換できません")?;

        let mut samples = Vec::new();
        for (class_id, token) in class_dirs.iter().enumerate() {
            let mut images: Vec<PathBuf> = std::fs::read_dir(data_dir.join(token))?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|path| path.is_file() && is_image(path))
                .collect();
            images.sort();

            if images.is_empty() {
                warn!(class = %token, "画像がありません");
            }
            samples.extend(images.into_iter().map(|path| (path, class_id)));
        }

        if samples.is_empty() {
            bail!("学習画像が見つかりません: {}", data_dir.display());
        }

        info!(
            classes = class_dirs.len(),
            samples = samples.len(),
            "データセットを読み込みました"
        );

        Ok(Self {
            samples,
            raw_class_tokens: class_dirs,
            class_labels,
        })
    }

    pub fn raw_class_tokens(&self) -> &[String] {
        &self.raw_class_tokens
    }

    pub fn class_labels(&self) -> &ClassLabelSet {
        &self.class_labels
    }

    /// シード付きシャッフルで学習用と検証用に分割
    pub fn split(self, train_ratio: f32, seed: u64) -> Result<(Self, Self)> {
        let mut samples = self.samples;
        let mut rng = StdRng::seed_from_u64(seed);
        samples.shuffle(&mut rng);

        let train_len = (samples.len() as f32 * train_ratio) as usize;
        if train_len == 0 || train_len >= samples.len() {
            bail!(
                "{} 枚を比率 {} で分割すると学習用か検証用が空になります",
                samples.len(),
                train_ratio
            );
        }
        let valid_samples = samples.split_off(train_len);

        let valid = Self {
            samples: valid_samples,
            raw_class_tokens: self.raw_class_tokens.clone(),
            class_labels: self.class_labels.clone(),
        };
        let train = Self {
            samples,
            raw_class_tokens: self.raw_class_tokens,
            class_labels: self.class_labels,
        };
        Ok((train, valid))
    }
}

/// データセットアイテム（画像パスのみ保持）
#[derive(Clone, Debug)]
pub struct GarmentItem {
    pub path: PathBuf,
    pub label: usize,
}

impl Dataset<GarmentItem> for GarmentDataset {
    fn get(&self, index: usize) -> Option<GarmentItem> {
        let (path, label) = self.samples.get(index)?;
        Some(GarmentItem {
            path: path.clone(),
            label: *label,
        })
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

/// バッチデータ
#[derive(Clone, Debug)]
pub struct GarmentBatch<B: Backend> {
    pub images: Tensor<B, 4>,
    pub targets: Tensor<B, 1, Int>,
}

/// バッチャー
///
/// 学習用はデータ拡張付き、検証用は推論と同じ前処理のみ。
#[derive(Clone)]
pub struct GarmentBatcher<B: Backend> {
    device: B::Device,
    augmentation: Option<(AugmentationConfig, Arc<Mutex<StdRng>>)>,
}

impl<B: Backend> GarmentBatcher<B> {
    /// 学習用（データ拡張あり）
    pub fn train(device: B::Device, config: AugmentationConfig, seed: u64) -> Self {
        Self {
            device,
            augmentation: Some((config, Arc::new(Mutex::new(StdRng::seed_from_u64(seed))))),
        }
    }

    /// 検証用（決定的な前処理のみ）
    pub fn valid(device: B::Device) -> Self {
        Self {
            device,
            augmentation: None,
        }
    }

    fn load(&self, path: &Path) -> Result<Vec<f32>> {
        let image = image::open(path)?;
        let data = match &self.augmentation {
            Some((config, rng)) => {
                let mut rng = rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                preprocess::normalize(&augment(&image, config, &mut *rng))
            }
            None => preprocess::preprocess_image(&image),
        };
        Ok(data)
    }
}

impl<B: Backend> Batcher<B, GarmentItem, GarmentBatch<B>> for GarmentBatcher<B> {
    fn batch(&self, items: Vec<GarmentItem>, _device: &B::Device) -> GarmentBatch<B> {
        let batch_size = items.len();
        let size = INPUT_SIZE as usize;
        let mut all_pixels = Vec::with_capacity(batch_size * INPUT_LEN);
        let mut targets = Vec::with_capacity(batch_size);

        for item in items {
            match self.load(&item.path) {
                Ok(image_data) => all_pixels.extend_from_slice(&image_data),
                Err(e) => {
                    // 読めない画像はゼロで埋めて学習を続ける
                    warn!(path = %item.path.display(), error = %e, "画像読み込み失敗");
                    all_pixels.extend(std::iter::repeat(0.0f32).take(INPUT_LEN));
                }
            }
            targets.push(item.label as i64);
        }

        let images = Tensor::<B, 4>::from_data(
            TensorData::new(all_pixels, [batch_size, 3, size, size]),
            &self.device,
        );
        let targets =
            Tensor::<B, 1, Int>::from_data(TensorData::new(targets, [batch_size]), &self.device);

        GarmentBatch { images, targets }
    }
}
