//! 学習時のデータ拡張
//!
//! 学習用パーティションにのみ適用します。検証用には使わないこと（エポック間で精度を比較できなくなる）。
//! 出力は 224x224 のRGB画像で、この後に推論と同じ正規化を通します。

use image::{imageops, imageops::FilterType, DynamicImage, Rgb, RgbImage};
use imageproc::geometric_transformations::{rotate_about_center, Interpolation};
use rand::Rng;

use crate::ml::preprocess::INPUT_SIZE;

/// データ拡張の設定
#[derive(Debug, Clone)]
pub struct AugmentationConfig {
    /// 切り抜き前に引き伸ばすサイズ
    pub resize: u32,
    /// 左右反転の確率
    pub flip_probability: f64,
    /// 回転角の最大値（度）
    pub max_rotation_degrees: f32,
    /// 明るさ・コントラスト・彩度の変動幅（1 ± jitter）
    pub color_jitter: f32,
    /// 切り抜き面積の範囲（元画像比）
    pub crop_scale: (f32, f32),
    /// 切り抜きの縦横比の範囲
    pub crop_ratio: (f32, f32),
}

impl Default for AugmentationConfig {
    fn default() -> Self {
        Self {
            resize: 256,
            flip_probability: 0.5,
            max_rotation_degrees: 10.0,
            color_jitter: 0.2,
            crop_scale: (0.6, 1.0),
            crop_ratio: (3.0 / 4.0, 4.0 / 3.0),
        }
    }
}

/// データ拡張を適用する
///
/// 順序: 引き伸ばし → 左右反転 → 回転 → 色の揺らぎ → ランダム切り抜き（224x224）
pub fn augment<R: Rng>(image: &DynamicImage, config: &AugmentationConfig, rng: &mut R) -> RgbImage {
    let mut rgb = imageops::resize(&image.to_rgb8(), config.resize, config.resize, FilterType::Triangle);

    if rng.gen_bool(config.flip_probability.clamp(0.0, 1.0)) {
        imageops::flip_horizontal_in_place(&mut rgb);
    }

    if config.max_rotation_degrees > 0.0 {
        let degrees = rng.gen_range(-config.max_rotation_degrees..=config.max_rotation_degrees);
        rgb = rotate_about_center(&rgb, degrees.to_radians(), Interpolation::Bilinear, Rgb([0, 0, 0]));
    }

    if config.color_jitter > 0.0 {
        let range = (1.0 - config.color_jitter)..=(1.0 + config.color_jitter);
        let brightness = rng.gen_range(range.clone());
        let contrast = rng.gen_range(range.clone());
        let saturation = rng.gen_range(range);
        jitter_colors(&mut rgb, brightness, contrast, saturation);
    }

    let (x, y, w, h) = random_crop_box(rgb.width(), rgb.height(), config, rng);
    let cropped = imageops::crop_imm(&rgb, x, y, w, h).to_image();
    imageops::resize(&cropped, INPUT_SIZE, INPUT_SIZE, FilterType::Triangle)
}

fn luma(p: &Rgb<u8>) -> f32 {
    0.299 * p[0] as f32 + 0.587 * p[1] as f32 + 0.114 * p[2] as f32
}

/// 明るさ → コントラスト → 彩度の順に係数を掛ける
pub fn jitter_colors(rgb: &mut RgbImage, brightness: f32, contrast: f32, saturation: f32) {
    for p in rgb.pixels_mut() {
        for c in 0..3 {
            p[c] = (p[c] as f32 * brightness).round().clamp(0.0, 255.0) as u8;
        }
    }

    let pixel_count = (rgb.width() as f32 * rgb.height() as f32).max(1.0);
    let mean = rgb.pixels().map(luma).sum::<f32>() / pixel_count;
    for p in rgb.pixels_mut() {
        for c in 0..3 {
            p[c] = ((p[c] as f32 - mean) * contrast + mean).round().clamp(0.0, 255.0) as u8;
        }
    }

    for p in rgb.pixels_mut() {
        let gray = luma(p);
        for c in 0..3 {
            p[c] = ((p[c] as f32 - gray) * saturation + gray).round().clamp(0.0, 255.0) as u8;
        }
    }
}

/// 面積と縦横比をランダムに選んだ切り抜き範囲 (x, y, w, h)
///
/// 10回試して収まらなければ画像全体を返します。
fn random_crop_box<R: Rng>(
    width: u32,
    height: u32,
    config: &AugmentationConfig,
    rng: &mut R,
) -> (u32, u32, u32, u32) {
    let area = width as f32 * height as f32;
    let (min_scale, max_scale) = config.crop_scale;
    let (log_lo, log_hi) = (config.crop_ratio.0.ln(), config.crop_ratio.1.ln());

    for _ in 0..10 {
        let target_area = area * rng.gen_range(min_scale..=max_scale);
        let ratio = rng.gen_range(log_lo..=log_hi).exp();
        let w = (target_area * ratio).sqrt().round() as u32;
        let h = (target_area / ratio).sqrt().round() as u32;

        if w > 0 && h > 0 && w <= width && h <= height {
            let x = rng.gen_range(0..=width - w);
            let y = rng.gen_range(0..=height - h);
            return (x, y, w, h);
        }
    }

    (0, 0, width, height)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_output_is_model_input_size() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(300, 180, Rgb([90, 120, 200])));
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..5 {
            let out = augment(&img, &AugmentationConfig::default(), &mut rng);
            assert_eq!(out.dimensions(), (INPUT_SIZE, INPUT_SIZE));
        }
    }

    #[test]
    fn test_same_seed_same_output() {
        let mut img = RgbImage::new(64, 64);
        for (x, y, p) in img.enumerate_pixels_mut() {
            *p = Rgb([(x * 4) as u8, (y * 4) as u8, 128]);
        }
        let img = DynamicImage::ImageRgb8(img);

        let a = augment(&img, &AugmentationConfig::default(), &mut StdRng::seed_from_u64(9));
        let b = augment(&img, &AugmentationConfig::default(), &mut StdRng::seed_from_u64(9));
        assert_eq!(a, b);
    }

    #[test]
    fn test_crop_box_stays_inside_image() {
        let config = AugmentationConfig::default();
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..100 {
            let (x, y, w, h) = random_crop_box(256, 256, &config, &mut rng);
            assert!(x + w <= 256 && y + h <= 256);
            assert!(w as f32 * h as f32 >= 0.5 * 256.0 * 256.0);
        }
    }

    #[test]
    fn test_neutral_jitter_keeps_pixels() {
        let mut img = RgbImage::from_pixel(4, 4, Rgb([100, 150, 200]));
        let before = img.clone();
        jitter_colors(&mut img, 1.0, 1.0, 1.0);
        for (a, b) in img.pixels().zip(before.pixels()) {
            for c in 0..3 {
                assert!((a[c] as i32 - b[c] as i32).abs() <= 1);
            }
        }
    }
}
