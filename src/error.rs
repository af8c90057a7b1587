use serde::Serialize;
use thiserror::Error;

/// I/O errors that can occur when reading slide bytes
#[derive(Debug, Clone, Error)]
pub enum IoError {
    /// Error from the local filesystem
    #[error("File error on {path}: {message}")]
    File { path: String, message: String },

    /// Requested range exceeds resource bounds
    #[error("Range out of bounds: requested {requested} bytes at offset {offset}, size is {size}")]
    RangeOutOfBounds {
        offset: u64,
        requested: u64,
        size: u64,
    },

    /// File does not exist
    #[error("File not found: {0}")]
    NotFound(String),
}

/// Errors that can occur when parsing TIFF files
#[derive(Debug, Clone, Error)]
pub enum TiffError {
    /// I/O error while reading the file
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// Invalid TIFF magic bytes (not II or MM)
    #[error("Invalid TIFF magic bytes: expected 0x4949 (II) or 0x4D4D (MM), got 0x{0:04X}")]
    InvalidMagic(u16),

    /// Invalid TIFF version number
    #[error("Invalid TIFF version: expected 42 (TIFF) or 43 (BigTIFF), got {0}")]
    InvalidVersion(u16),

    /// Invalid BigTIFF offset byte size (must be 8)
    #[error("Invalid BigTIFF offset byte size: expected 8, got {0}")]
    InvalidBigTiffOffsetSize(u16),

    /// Not enough bytes to hold the structure being parsed
    #[error("File too small: need at least {required} bytes, got {actual}")]
    FileTooSmall { required: u64, actual: u64 },

    /// IFD offset points outside the file or back into the chain
    #[error("Invalid IFD offset: {0}")]
    InvalidIfdOffset(u64),

    /// IFD declares an implausible number of entries
    #[error("IFD declares {0} entries")]
    TooManyEntries(u64),

    /// Required tag is missing from IFD
    #[error("Missing required tag: {0}")]
    MissingTag(&'static str),

    /// Tag has unexpected type or count
    #[error("Invalid tag value for {tag}: {message}")]
    InvalidTagValue { tag: &'static str, message: String },

    /// Unsupported compression scheme
    #[error("Unsupported compression: {0} (only JPEG and uncompressed tiles are supported)")]
    UnsupportedCompression(String),

    /// File uses strips instead of tiles
    #[error("Unsupported organization: file uses strips instead of tiles")]
    StripOrganization,

    /// No IFD qualifies as a pyramid level
    #[error("No pyramid levels found")]
    NoPyramidLevels,

    /// Unknown field type in IFD entry
    #[error("Unknown field type: {0}")]
    UnknownFieldType(u16),
}

/// A slide that cannot be opened, planned or decoded.
///
/// Any record hitting this error is marked failed; the run continues.
#[derive(Debug, Clone, Error)]
pub enum SlideError {
    #[error("Unreadable slide {path}: {reason}")]
    Unreadable { path: String, reason: String },
}

impl SlideError {
    pub fn unreadable(path: impl Into<String>, reason: impl ToString) -> Self {
        SlideError::Unreadable {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// Errors produced while turning a pixel buffer into an uploadable raster
#[derive(Debug, Clone, Error)]
pub enum EncodeError {
    /// Channel count has no RGB or grayscale interpretation
    #[error("Unsupported channel count: {channels}")]
    UnsupportedChannels { channels: u8 },

    /// Buffer length does not match width x height x channels
    #[error("Pixel buffer size mismatch: expected {expected} bytes, got {actual}")]
    BufferSize { expected: usize, actual: usize },

    /// Underlying codec failure
    #[error("JPEG encoding failed: {0}")]
    Encode(String),
}

/// Reasons an upload ends without the asset being accepted.
#[derive(Debug, Clone, Error, Serialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UploadError {
    /// Rejected locally before any network call. Sizes are base64 bytes.
    #[error("Asset too large: {size} encoded bytes exceeds limit of {limit} bytes")]
    AssetTooLarge { size: usize, limit: usize },

    /// Authentication or malformed-request rejection; never retried.
    ///
    /// `systemic` is set when the cause applies to every request of the run
    /// (a rejected credential).
    #[error("Upload rejected with status {status}: {message}")]
    Fatal {
        status: u16,
        message: String,
        systemic: bool,
    },

    /// Rate-limit or transient failures persisted through every attempt
    #[error("Gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },
}

impl UploadError {
    /// Whether this failure should stop the whole run.
    pub fn is_systemic(&self) -> bool {
        matches!(self, UploadError::Fatal { systemic: true, .. })
    }
}

/// Non-fatal problems found while scanning the slide root.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScanWarning {
    #[error("{path}: extension is not a recognized slide format")]
    UnrecognizedExtension { path: String },

    #[error("{path}: no label ({reason})")]
    NoLabel { path: String, reason: String },

    #[error("{path}: symbolic link cycle")]
    SymlinkLoop { path: String },

    #[error("{path}: {message}")]
    Unreadable { path: String, message: String },
}

impl ScanWarning {
    pub fn path(&self) -> &str {
        match self {
            ScanWarning::UnrecognizedExtension { path }
            | ScanWarning::NoLabel { path, .. }
            | ScanWarning::SymlinkLoop { path }
            | ScanWarning::Unreadable { path, .. } => path,
        }
    }
}
