//! Decoded pixel buffers and channel-layout normalization.

use image::imageops::{self, FilterType};
use image::{ImageBuffer, Luma, LumaA, Pixel, Rgb, Rgba};

use crate::error::EncodeError;

/// Channel count and order of an interleaved 8-bit buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelLayout {
    Gray,
    GrayAlpha,
    Rgb,
    Rgba,
    Bgr,
    Bgra,
}

impl ChannelLayout {
    pub const fn channels(self) -> usize {
        match self {
            ChannelLayout::Gray => 1,
            ChannelLayout::GrayAlpha => 2,
            ChannelLayout::Rgb | ChannelLayout::Bgr => 3,
            ChannelLayout::Rgba | ChannelLayout::Bgra => 4,
        }
    }

    /// Layout for a sample count in RGB order, as TIFF stores it.
    pub fn from_channel_count(channels: u8) -> Result<Self, EncodeError> {
        match channels {
            1 => Ok(ChannelLayout::Gray),
            2 => Ok(ChannelLayout::GrayAlpha),
            3 => Ok(ChannelLayout::Rgb),
            4 => Ok(ChannelLayout::Rgba),
            other => Err(EncodeError::UnsupportedChannels { channels: other }),
        }
    }
}

/// An owned, interleaved 8-bit raster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    pub width: u32,
    pub height: u32,
    pub layout: ChannelLayout,
    pub data: Vec<u8>,
}

impl PixelBuffer {
    pub fn new(width: u32, height: u32, layout: ChannelLayout, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            layout,
            data,
        }
    }

    /// A buffer with every pixel set to `pixel` (which must match `layout`).
    pub fn filled(width: u32, height: u32, layout: ChannelLayout, pixel: &[u8]) -> Self {
        let count = width as usize * height as usize;
        let data = pixel.iter().copied().cycle().take(count * pixel.len()).collect();
        Self::new(width, height, layout, data)
    }

    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * self.layout.channels()
    }

    pub fn validate(&self) -> Result<(), EncodeError> {
        let expected = self.expected_len();
        if self.data.len() != expected {
            return Err(EncodeError::BufferSize {
                expected,
                actual: self.data.len(),
            });
        }
        Ok(())
    }

    /// Convert to `Rgb` or `Gray`: swap BGR order, composite alpha over white.
    pub fn normalize(self) -> Result<Self, EncodeError> {
        self.validate()?;
        let PixelBuffer {
            width,
            height,
            layout,
            data,
        } = self;

        let (layout, data) = match layout {
            ChannelLayout::Rgb | ChannelLayout::Gray => (layout, data),
            ChannelLayout::Bgr => (
                ChannelLayout::Rgb,
                data.chunks_exact(3).flat_map(|p| [p[2], p[1], p[0]]).collect(),
            ),
            ChannelLayout::Rgba => (
                ChannelLayout::Rgb,
                data.chunks_exact(4)
                    .flat_map(|p| {
                        let a = p[3];
                        [over_white(p[0], a), over_white(p[1], a), over_white(p[2], a)]
                    })
                    .collect(),
            ),
            ChannelLayout::Bgra => (
                ChannelLayout::Rgb,
                data.chunks_exact(4)
                    .flat_map(|p| {
                        let a = p[3];
                        [over_white(p[2], a), over_white(p[1], a), over_white(p[0], a)]
                    })
                    .collect(),
            ),
            ChannelLayout::GrayAlpha => (
                ChannelLayout::Gray,
                data.chunks_exact(2).map(|p| over_white(p[0], p[1])).collect(),
            ),
        };

        Ok(PixelBuffer::new(width, height, layout, data))
    }

    /// Scale down (bilinear) so the buffer fits in `max_width` x `max_height`,
    /// keeping the aspect ratio. Buffers that already fit are returned as-is.
    pub fn resize_to_fit(self, max_width: u32, max_height: u32) -> Result<Self, EncodeError> {
        self.validate()?;
        let Some((width, height)) = fit_dimensions(self.width, self.height, max_width, max_height)
        else {
            return Ok(self);
        };

        let layout = self.layout;
        let (w, h) = (self.width, self.height);
        let data = match layout {
            ChannelLayout::Gray => resize_raw::<Luma<u8>>(w, h, self.data, width, height),
            ChannelLayout::GrayAlpha => resize_raw::<LumaA<u8>>(w, h, self.data, width, height),
            ChannelLayout::Rgb | ChannelLayout::Bgr => {
                resize_raw::<Rgb<u8>>(w, h, self.data, width, height)
            }
            ChannelLayout::Rgba | ChannelLayout::Bgra => {
                resize_raw::<Rgba<u8>>(w, h, self.data, width, height)
            }
        };
        let data = data.ok_or(EncodeError::BufferSize {
            expected: w as usize * h as usize * layout.channels(),
            actual: 0,
        })?;

        Ok(PixelBuffer::new(width, height, layout, data))
    }
}

/// Target size for fitting `width` x `height` into the given box, or `None`
/// if no downscale is needed.
pub fn fit_dimensions(
    width: u32,
    height: u32,
    max_width: u32,
    max_height: u32,
) -> Option<(u32, u32)> {
    if width <= max_width && height <= max_height {
        return None;
    }
    let scale = (max_width as f64 / width as f64).min(max_height as f64 / height as f64);
    let scaled = |len: u32, max: u32| ((len as f64 * scale).round() as u32).clamp(1, max.max(1));
    Some((scaled(width, max_width), scaled(height, max_height)))
}

fn resize_raw<P>(width: u32, height: u32, data: Vec<u8>, new_width: u32, new_height: u32) -> Option<Vec<u8>>
where
    P: Pixel<Subpixel = u8> + 'static,
{
    let image = ImageBuffer::<P, Vec<u8>>::from_raw(width, height, data)?;
    Some(imageops::resize(&image, new_width, new_height, FilterType::Triangle).into_raw())
}

#[inline]
fn over_white(value: u8, alpha: u8) -> u8 {
    let (v, a) = (value as u32, alpha as u32);
    ((v * a + 255 * (255 - a) + 127) / 255) as u8
}
