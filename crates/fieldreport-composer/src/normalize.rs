//! Photo normalization: decode, downscale, re-encode as JPEG.

use bytes::Bytes;
use fieldreport_common::ComposerConfig;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::DynamicImage;

use crate::error::NormalizeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Normalizer {
    pub max_width: u32,
    pub quality: u8,
    pub preview_width: u32,
}

impl Normalizer {
    pub fn new(max_width: u32, quality: u8, preview_width: u32) -> Self {
        Self {
            max_width,
            quality,
            preview_width,
        }
    }

    pub fn from_config(config: &ComposerConfig) -> Self {
        Self::new(
            config.max_image_width,
            config.jpeg_quality,
            config.preview_width,
        )
    }

    /// Decode any supported format and return a JPEG no wider than
    /// `max_width`. Narrower images keep their size.
    pub fn normalize(&self, raw: &[u8]) -> Result<Bytes, NormalizeError> {
        let img = decode(raw)?;
        encode_jpeg(&fit_width(img, self.max_width), self.quality)
    }

    /// Small JPEG for the stock panel.
    pub fn thumbnail(&self, jpeg: &[u8]) -> Result<Bytes, NormalizeError> {
        let img = decode(jpeg)?;
        encode_jpeg(&fit_width(img, self.preview_width), self.quality)
    }
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::from_config(&ComposerConfig::default())
    }
}

fn decode(raw: &[u8]) -> Result<DynamicImage, NormalizeError> {
    if raw.is_empty() {
        return Err(NormalizeError::Empty);
    }
    Ok(image::load_from_memory(raw)?)
}

fn fit_width(img: DynamicImage, max_width: u32) -> DynamicImage {
    if img.width() <= max_width {
        return img;
    }
    // height bound left open so only the width constrains, aspect kept
    img.resize(max_width, u32::MAX, FilterType::Lanczos3)
}

fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Bytes, NormalizeError> {
    // JPEG has no alpha channel
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
    let mut out = Vec::new();
    rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut out, quality))?;
    Ok(Bytes::from(out))
}
