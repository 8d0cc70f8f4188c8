//! 色抽出
//!
//! 画像バイト列から代表色と最大5色のパレットを求め、各色に粗い色名を付けます。
//! 分類とは独立して動作し、失敗しても解析全体は失敗させません。

pub mod naming;
pub mod quantize;

pub use naming::ColorName;

use tracing::debug;

use crate::error::VisionError;
use crate::types::{ColorResult, NamedColor};

/// ワイヤ契約上のパレット上限
pub const MAX_PALETTE_SIZE: usize = 5;

/// 色抽出の抽象
pub trait ColorExtractor: Send + Sync {
    fn extract(&self, image_bytes: &[u8]) -> Result<ColorResult, VisionError>;
}

/// メディアンカットによる色抽出器
#[derive(Debug, Clone)]
pub struct MedianCutExtractor {
    palette_size: usize,
    sample_step: usize,
}

impl Default for MedianCutExtractor {
    fn default() -> Self {
        Self::new(MAX_PALETTE_SIZE, 10)
    }
}

impl MedianCutExtractor {
    /// `palette_size` は 1〜5 に、`sample_step` は 1 以上に丸められます。
    pub fn new(palette_size: usize, sample_step: usize) -> Self {
        Self {
            palette_size: palette_size.clamp(1, MAX_PALETTE_SIZE),
            sample_step: sample_step.max(1),
        }
    }

    /// デコード済みの画像から抽出する
    pub fn extract_from_image(&self, image: &image::DynamicImage) -> Result<ColorResult, VisionError> {
        let rgba = image.to_rgba8();
        if rgba.width() == 0 || rgba.height() == 0 {
            return Err(VisionError::ColorExtraction("image has no pixels".to_string()));
        }

        let pixels: Vec<[u8; 4]> = rgba.pixels().map(|p| p.0).collect();
        let sampled = quantize::sample_pixels(&pixels, self.sample_step);
        let palette: Vec<NamedColor> = quantize::quantize(&sampled, self.palette_size)
            .into_iter()
            .map(NamedColor::new)
            .collect();

        let dominant_color = *palette.first().ok_or_else(|| {
            VisionError::ColorExtraction("quantization produced an empty palette".to_string())
        })?;

        debug!(
            dominant = %dominant_color.name,
            palette_len = palette.len(),
            sampled = sampled.len(),
            "パレットを抽出しました"
        );

        Ok(ColorResult {
            dominant_color,
            palette,
        })
    }
}

impl ColorExtractor for MedianCutExtractor {
    fn extract(&self, image_bytes: &[u8]) -> Result<ColorResult, VisionError> {
        let image = image::load_from_memory(image_bytes)
            .map_err(|e| VisionError::ColorExtraction(format!("unreadable image: {e}")))?;
        self.extract_from_image(&image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};
    use std::io::Cursor;

    fn encode(image: DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut buf = Vec::new();
        image.write_to(&mut Cursor::new(&mut buf), format).unwrap();
        buf
    }

    #[test]
    fn test_solid_png_has_single_entry_palette() {
        let img = RgbImage::from_pixel(64, 64, Rgb([30, 40, 200]));
        let bytes = encode(DynamicImage::ImageRgb8(img), ImageFormat::Png);

        let result = MedianCutExtractor::default().extract(&bytes).unwrap();
        assert_eq!(result.palette.len(), 1);
        assert_eq!(result.dominant_color, result.palette[0]);
        assert_eq!(result.dominant_color.name, ColorName::Blue);
    }

    #[test]
    fn test_gray_jpeg_is_named_gray() {
        let img = RgbImage::from_pixel(300, 300, Rgb([128, 128, 128]));
        let bytes = encode(DynamicImage::ImageRgb8(img), ImageFormat::Jpeg);

        let result = MedianCutExtractor::default().extract(&bytes).unwrap();
        assert_eq!(result.dominant_color.name, ColorName::Gray);
    }

    #[test]
    fn test_dominant_is_largest_region() {
        let mut img = RgbImage::from_pixel(100, 100, Rgb([200, 20, 20]));
        for y in 0..20 {
            for x in 0..100 {
                img.put_pixel(x, y, Rgb([20, 200, 20]));
            }
        }
        let bytes = encode(DynamicImage::ImageRgb8(img), ImageFormat::Png);

        let result = MedianCutExtractor::new(5, 1).extract(&bytes).unwrap();
        assert_eq!(result.dominant_color.name, ColorName::Red);
        assert!(result.palette.iter().any(|c| c.name == ColorName::Green));
        assert!(result.palette.len() <= MAX_PALETTE_SIZE);
    }

    #[test]
    fn test_transparent_background_is_ignored() {
        let mut img = RgbaImage::from_pixel(50, 50, Rgba([0, 0, 0, 0]));
        for y in 10..40 {
            for x in 10..40 {
                img.put_pixel(x, y, Rgba([220, 220, 30, 255]));
            }
        }
        let bytes = encode(DynamicImage::ImageRgba8(img), ImageFormat::Png);

        let result = MedianCutExtractor::new(5, 1).extract(&bytes).unwrap();
        assert_eq!(result.palette.len(), 1);
        assert_eq!(result.dominant_color.name, ColorName::Yellow);
    }

    #[test]
    fn test_white_garment_still_has_palette() {
        let img = RgbImage::from_pixel(32, 32, Rgb([255, 255, 255]));
        let bytes = encode(DynamicImage::ImageRgb8(img), ImageFormat::Png);

        let result = MedianCutExtractor::default().extract(&bytes).unwrap();
        assert_eq!(result.dominant_color.name, ColorName::White);
    }

    #[test]
    fn test_corrupt_bytes_fail_with_color_error() {
        let err = MedianCutExtractor::default()
            .extract(b"definitely not an image")
            .unwrap_err();
        assert!(matches!(err, VisionError::ColorExtraction(_)));
    }

    #[test]
    fn test_extraction_is_deterministic() {
        let mut img = RgbImage::new(80, 80);
        for (x, y, p) in img.enumerate_pixels_mut() {
            *p = Rgb([(x * 3) as u8, (y * 3) as u8, ((x + y) % 256) as u8]);
        }
        let bytes = encode(DynamicImage::ImageRgb8(img), ImageFormat::Png);

        let extractor = MedianCutExtractor::default();
        let first = extractor.extract(&bytes).unwrap();
        let second = extractor.extract(&bytes).unwrap();
        assert_eq!(first, second);
        assert!(first.palette.len() <= MAX_PALETTE_SIZE);
    }
}
