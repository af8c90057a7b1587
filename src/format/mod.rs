//! Slide container formats: TIFF structure, Aperio metadata and JPEG tile
//! preparation.

pub mod detect;
pub mod jpeg;
pub mod svs;
pub mod tiff;

pub use detect::{detect_format, is_tiff_header, SlideFormat};
pub use svs::SvsMetadata;
