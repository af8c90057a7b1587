//! Pixel buffers and the JPEG encoder that turns them into upload assets.

mod encoder;
mod pixels;

pub use encoder::{
    clamp_quality, EncodedAsset, ImageEncoder, DEFAULT_JPEG_QUALITY, JPEG_MIME_TYPE,
    MAX_JPEG_DIMENSION,
};
pub use pixels::{fit_dimensions, ChannelLayout, PixelBuffer};
