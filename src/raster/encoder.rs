//! JPEG encoding of extracted regions.
//!
//! Every uploaded raster is baseline JPEG at one configured quality; the
//! encoder first normalizes the buffer to RGB or grayscale.

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;

use super::pixels::{ChannelLayout, PixelBuffer};
use crate::error::EncodeError;

pub const DEFAULT_JPEG_QUALITY: u8 = 90;
pub const MIN_JPEG_QUALITY: u8 = 1;
pub const MAX_JPEG_QUALITY: u8 = 100;

/// Largest edge baseline JPEG can represent.
pub const MAX_JPEG_DIMENSION: u32 = 65_535;

pub const JPEG_MIME_TYPE: &str = "image/jpeg";

/// An encoded raster ready for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedAsset {
    pub bytes: Bytes,
    pub mime_type: &'static str,
    pub width: u32,
    pub height: u32,
}

impl EncodedAsset {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageEncoder {
    quality: u8,
}

impl Default for ImageEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_JPEG_QUALITY)
    }
}

impl ImageEncoder {
    /// Create an encoder; quality is clamped to 1..=100.
    pub fn new(quality: u8) -> Self {
        Self {
            quality: clamp_quality(quality),
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Normalize and JPEG-encode `buffer`, consuming it.
    pub fn encode(&self, buffer: PixelBuffer) -> Result<EncodedAsset, EncodeError> {
        let buffer = buffer.normalize()?;
        let (width, height) = (buffer.width, buffer.height);
        if width == 0 || height == 0 || width > MAX_JPEG_DIMENSION || height > MAX_JPEG_DIMENSION {
            return Err(EncodeError::Encode(format!(
                "{width}x{height} is outside the JPEG size range"
            )));
        }

        let color = match buffer.layout {
            ChannelLayout::Gray => ExtendedColorType::L8,
            _ => ExtendedColorType::Rgb8,
        };

        let mut output = Vec::new();
        JpegEncoder::new_with_quality(&mut output, self.quality)
            .encode(&buffer.data, width, height, color)
            .map_err(|e| EncodeError::Encode(e.to_string()))?;

        Ok(EncodedAsset {
            bytes: Bytes::from(output),
            mime_type: JPEG_MIME_TYPE,
            width,
            height,
        })
    }
}

#[inline]
pub fn clamp_quality(quality: u8) -> u8 {
    quality.clamp(MIN_JPEG_QUALITY, MAX_JPEG_QUALITY)
}
