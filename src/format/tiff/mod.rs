//! TIFF and BigTIFF structure parsing for pyramidal slides.
//!
//! Handles both byte orders, inline and out-of-line entry values, and the
//! identification of pyramid levels among the file's IFDs.

mod parser;
mod pyramid;
mod tags;
mod validation;
mod values;

pub use parser::{ByteOrder, Ifd, IfdEntry, TiffHeader, BIGTIFF_HEADER_SIZE, TIFF_HEADER_SIZE};
pub use pyramid::{PyramidLevel, TiffPyramid, TileData};
pub use tags::{
    Compression, FieldType, TiffTag, PHOTOMETRIC_MIN_IS_BLACK, PHOTOMETRIC_RGB,
    PHOTOMETRIC_YCBCR, PLANAR_CHUNKY,
};
pub use validation::{validate_pyramid, ValidationReport};
pub use values::ValueReader;
