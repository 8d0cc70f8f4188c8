//! 画像の前処理
//!
//! 学習時と推論時で完全に同じ手順を使います（順序も含めて）。
//! 1. 3チャネルRGBに変換（グレースケール・アルファ付きも）
//! 2. 224x224 へ縦横比を保たずにリサイズ
//! 3. 画素値を [0, 1] にスケール
//! 4. ImageNetの平均と標準偏差でチャネルごとに標準化
//!
//! 定数はバックボーンの事前学習に合わせたもので、再学習なしに変更してはいけません。

use image::{imageops::FilterType, DynamicImage, RgbImage};

use crate::error::VisionError;

/// モデル入力サイズ（正方形）
pub const INPUT_SIZE: u32 = 224;

/// ImageNetの平均
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];

/// ImageNetの標準偏差
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// 1画像分のテンソル要素数 (C, H, W)
pub const INPUT_LEN: usize = 3 * (INPUT_SIZE as usize) * (INPUT_SIZE as usize);

/// バイト列を画像としてデコード
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage, VisionError> {
    Ok(image::load_from_memory(bytes)?)
}

/// RGB化と 224x224 へのリサイズ
pub fn resize_for_model(image: &DynamicImage) -> RgbImage {
    let rgb = image.to_rgb8();
    if rgb.dimensions() == (INPUT_SIZE, INPUT_SIZE) {
        return rgb;
    }
    image::imageops::resize(&rgb, INPUT_SIZE, INPUT_SIZE, FilterType::Triangle)
}

/// 224x224 のRGB画像を正規化し、(C, H, W) の順で平坦化する
///
/// 学習時のデータ拡張後もこの関数を通します。
pub fn normalize(rgb: &RgbImage) -> Vec<f32> {
    let (width, height) = rgb.dimensions();
    let mut data = Vec::with_capacity(3 * width as usize * height as usize);

    for channel in 0..3 {
        for y in 0..height {
            for x in 0..width {
                let value = rgb.get_pixel(x, y)[channel] as f32 / 255.0;
                data.push((value - IMAGENET_MEAN[channel]) / IMAGENET_STD[channel]);
            }
        }
    }

    data
}

/// デコード済み画像 → モデル入力
pub fn preprocess_image(image: &DynamicImage) -> Vec<f32> {
    normalize(&resize_for_model(image))
}

/// バイト列 → モデル入力
pub fn preprocess_bytes(bytes: &[u8]) -> Result<Vec<f32>, VisionError> {
    let image = decode_image(bytes)?;
    Ok(preprocess_image(&image))
}
