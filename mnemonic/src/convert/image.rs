//! Image converter: decodes CodecA (TLG) via our own decoder, or opens
//! PNG/JPEG/BMP through the host image library, and re-encodes as WebP.
//! Alpha-carrying images are encoded lossless when `lossless_alpha` is set;
//! everything else goes through the lossy encoder at `quality`.

use std::path::Path;

use image::{ColorType, DynamicImage, RgbImage, RgbaImage};
use webp::Encoder;

use crate::codeca;

use super::{ConversionResult, Converter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quality {
    Low,
    Medium,
    High,
}

impl Quality {
    pub fn as_u8(self) -> u8 {
        match self {
            Quality::Low => 70,
            Quality::Medium => 85,
            Quality::High => 95,
        }
    }
}

pub struct ImageConverter {
    pub quality: Quality,
    pub lossless_alpha: bool,
}

impl Default for ImageConverter {
    fn default() -> Self {
        ImageConverter {
            quality: Quality::High,
            lossless_alpha: true,
        }
    }
}

fn decode_tlg(bytes: &[u8]) -> Result<DynamicImage, String> {
    let decoded = codeca::decode(bytes).map_err(|e| e.to_string())?;
    if decoded.channels == 4 {
        let image = RgbaImage::from_raw(decoded.width, decoded.height, decoded.pixels)
            .ok_or_else(|| "pixel buffer size mismatch".to_string())?;
        Ok(DynamicImage::ImageRgba8(image))
    } else {
        let image = RgbImage::from_raw(decoded.width, decoded.height, decoded.pixels)
            .ok_or_else(|| "pixel buffer size mismatch".to_string())?;
        Ok(DynamicImage::ImageRgb8(image))
    }
}

impl Converter for ImageConverter {
    fn name(&self) -> &'static str {
        "image"
    }

    fn supported_extensions(&self) -> &[&'static str] {
        &["tlg", "bmp", "jpg", "jpeg", "png"]
    }

    fn convert(&self, source: &Path, dest: &Path) -> ConversionResult {
        let bytes_before = match std::fs::metadata(source) {
            Ok(m) => m.len(),
            Err(e) => return ConversionResult::failed(source, e.to_string()),
        };

        let ext = source
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_lowercase();

        let decoded = if ext == "tlg" {
            let raw = match std::fs::read(source) {
                Ok(b) => b,
                Err(e) => return ConversionResult::failed(source, e.to_string()),
            };
            match decode_tlg(&raw) {
                Ok(img) => img,
                Err(msg) => return ConversionResult::failed(source, msg),
            }
        } else {
            match image::open(source) {
                Ok(img) => img,
                Err(e) => return ConversionResult::failed(source, e.to_string()),
            }
        };

        if let Some(parent) = dest.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                return ConversionResult::failed(source, e.to_string());
            }
        }

        let has_alpha = matches!(
            decoded.color(),
            ColorType::Rgba8 | ColorType::La8 | ColorType::Rgba16
        );

        let buffer: Vec<u8> = if has_alpha && self.lossless_alpha {
            let rgba = decoded.to_rgba8();
            Encoder::from_rgba(rgba.as_raw(), rgba.width(), rgba.height())
                .encode_lossless()
                .to_vec()
        } else if has_alpha {
            let rgba = decoded.to_rgba8();
            Encoder::from_rgba(rgba.as_raw(), rgba.width(), rgba.height())
                .encode(self.quality.as_u8() as f32)
                .to_vec()
        } else {
            let rgb = decoded.to_rgb8();
            Encoder::from_rgb(rgb.as_raw(), rgb.width(), rgb.height())
                .encode(self.quality.as_u8() as f32)
                .to_vec()
        };

        if let Err(e) = std::fs::write(dest, &buffer) {
            return ConversionResult::failed(source, e.to_string());
        }

        ConversionResult::success(source, dest, bytes_before, buffer.len() as u64)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn quality_presets_map_to_expected_values() {
        assert_eq!(Quality::Low.as_u8(), 70);
        assert_eq!(Quality::Medium.as_u8(), 85);
        assert_eq!(Quality::High.as_u8(), 95);
    }

    #[test]
    fn converts_opaque_png_to_lossy_webp() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.png");
        let img = RgbImage::from_pixel(2, 2, image::Rgb([10, 20, 30]));
        DynamicImage::ImageRgb8(img).save(&src).unwrap();

        let dest = dir.path().join("out/a.webp");
        let converter = ImageConverter {
            quality: Quality::Low,
            lossless_alpha: true,
        };
        let result = converter.convert(&src, &dest);
        assert_eq!(result.status, super::super::ConversionStatus::Success);
        assert!(dest.exists());
    }

    #[test]
    fn alpha_png_is_encoded_lossless_when_requested() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.png");
        let img = RgbaImage::from_pixel(2, 2, image::Rgba([10, 20, 30, 128]));
        DynamicImage::ImageRgba8(img).save(&src).unwrap();

        let dest = dir.path().join("out/a.webp");
        let converter = ImageConverter {
            quality: Quality::Low,
            lossless_alpha: true,
        };
        let result = converter.convert(&src, &dest);
        assert_eq!(result.status, super::super::ConversionStatus::Success);
        assert!(dest.exists());
        assert!(std::fs::metadata(&dest).unwrap().len() > 0);
    }

    #[test]
    fn alpha_png_goes_lossy_when_lossless_alpha_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.png");
        let img = RgbaImage::from_pixel(4, 4, image::Rgba([200, 50, 10, 255]));
        DynamicImage::ImageRgba8(img).save(&src).unwrap();

        let dest = dir.path().join("out/a.webp");
        let converter = ImageConverter {
            quality: Quality::Medium,
            lossless_alpha: false,
        };
        let result = converter.convert(&src, &dest);
        assert_eq!(result.status, super::super::ConversionStatus::Success);
        assert!(dest.exists());
    }
}
