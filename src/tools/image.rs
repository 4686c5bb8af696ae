//! Raster image optimizer backed by the `image` crate.

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{ColorType, ImageEncoder, ImageFormat};
use std::path::Path;

use super::{ImageOptimizer, ToolError};
use crate::config::ImagesConfig;

/// Recompresses PNG losslessly and re-encodes JPEG at a fixed quality.
///
/// Other formats (SVG, GIF, WebP, ...) pass through unchanged. The original
/// bytes are kept whenever the re-encoded file is not smaller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RasterOptimizer {
    /// 0..=7, mapped onto the PNG encoder's compression presets
    pub optimization_level: u8,
    /// 1..=100
    pub jpeg_quality: u8,
}

impl Default for RasterOptimizer {
    fn default() -> Self {
        Self::from_config(&ImagesConfig::default())
    }
}

impl RasterOptimizer {
    pub fn from_config(config: &ImagesConfig) -> Self {
        Self { optimization_level: config.optimization_level, jpeg_quality: config.jpeg_quality }
    }

    fn compression(&self) -> CompressionType {
        match self.optimization_level {
            0..=1 => CompressionType::Fast,
            2..=4 => CompressionType::Default,
            _ => CompressionType::Best,
        }
    }

    fn encode_png(&self, bytes: &[u8]) -> Result<Vec<u8>, ToolError> {
        let img = image::load_from_memory_with_format(bytes, ImageFormat::Png)
            .map_err(|e| ToolError::Message(e.to_string()))?
            .to_rgba8();

        let mut out = Vec::new();
        PngEncoder::new_with_quality(&mut out, self.compression(), FilterType::Adaptive)
            .write_image(img.as_raw(), img.width(), img.height(), ColorType::Rgba8)
            .map_err(|e| ToolError::Message(e.to_string()))?;
        Ok(out)
    }

    fn encode_jpeg(&self, bytes: &[u8]) -> Result<Vec<u8>, ToolError> {
        let img = image::load_from_memory_with_format(bytes, ImageFormat::Jpeg)
            .map_err(|e| ToolError::Message(e.to_string()))?
            .to_rgb8();

        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, self.jpeg_quality.clamp(1, 100))
            .encode(img.as_raw(), img.width(), img.height(), ColorType::Rgb8)
            .map_err(|e| ToolError::Message(e.to_string()))?;
        Ok(out)
    }
}

impl ImageOptimizer for RasterOptimizer {
    fn optimize(&self, path: &Path, bytes: &[u8]) -> Result<Vec<u8>, ToolError> {
        let optimized = match image::guess_format(bytes) {
            Ok(ImageFormat::Png) => self.encode_png(bytes)?,
            Ok(ImageFormat::Jpeg) => self.encode_jpeg(bytes)?,
            _ => {
                tracing::debug!("{}: format not optimized, copying", path.display());
                return Ok(bytes.to_vec());
            }
        };

        if optimized.len() < bytes.len() {
            Ok(optimized)
        } else {
            Ok(bytes.to_vec())
        }
    }
}
