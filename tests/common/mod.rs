#![allow(dead_code)]

use std::io::Cursor;
use std::path::{Path, PathBuf};

use burn::module::Module;
use burn::record::{BinBytesRecorder, FullPrecisionSettings, Recorder};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};

use closet_vision_lib::ml::{CpuBackend, ResNet, ResNetConfig};
use closet_vision_lib::model::{
    save_checkpoint, ArchitectureInfo, CheckpointMetadata, LabelTranslator, TrainingMetrics,
};

pub const TINY_LAYERS: [usize; 4] = [1, 1, 1, 1];
pub const TINY_WIDTH: usize = 4;

pub fn tiny_model(num_classes: usize) -> ResNet<CpuBackend> {
    ResNetConfig::new(TINY_LAYERS, num_classes)
        .with_base_width(TINY_WIDTH)
        .init::<CpuBackend>(&Default::default())
}

/// 単色のPNG
pub fn png_bytes(rgb: [u8; 3], width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_pixel(width, height, Rgb(rgb));
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}

/// 小さなResNetのチェックポイントを書き出す
pub fn write_tiny_checkpoint(dir: &Path, tokens: &[&str]) -> PathBuf {
    let tokens: Vec<String> = tokens.iter().map(|t| t.to_string()).collect();
    let labels = LabelTranslator::default().translate(&tokens).unwrap();
    let binary = BinBytesRecorder::<FullPrecisionSettings>::default()
        .record(tiny_model(tokens.len()).into_record(), ())
        .unwrap();
    let metadata = CheckpointMetadata::new(
        ArchitectureInfo {
            layers: TINY_LAYERS,
            base_width: TINY_WIDTH,
            num_classes: tokens.len(),
        },
        tokens,
        labels,
        TrainingMetrics::default(),
    );
    save_checkpoint(&dir.join("tiny.tar.gz"), &metadata, &binary).unwrap()
}

/// クラスごとのサブディレクトリに単色画像を並べる
pub fn write_dataset(root: &Path, classes: &[(&str, [u8; 3])], per_class: usize) {
    for (token, rgb) in classes {
        let dir = root.join(token);
        std::fs::create_dir_all(&dir).unwrap();
        for i in 0..per_class {
            let shade = (i as u8).wrapping_mul(7);
            let pixel = [
                rgb[0].saturating_add(shade),
                rgb[1].saturating_add(shade),
                rgb[2].saturating_add(shade),
            ];
            std::fs::write(dir.join(format!("{i:03}.png")), png_bytes(pixel, 32, 32)).unwrap();
        }
    }
}
