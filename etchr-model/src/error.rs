//! Error types for `etchr-model`.
use thiserror::Error;

/// Errors produced by the store and by image inspection.
///
/// Classification never fails, so nothing in [`crate::formats`] returns this type.
#[derive(Debug, Error)]
pub enum Error {
    /// A flash state percentage above 100.
    #[error("Excessive state percentage: {0}")]
    ExcessivePercentage(f64),

    /// A flash state percentage below 0.
    #[error("Deficient state percentage: {0}")]
    DeficientPercentage(f64),

    /// A flash state percentage that is not a number at all.
    #[error("Invalid state percentage: {0}")]
    InvalidPercentage(f64),

    /// A flash state update arrived while no flash is in progress.
    #[error("Can't set the flashing state when not flashing")]
    NotFlashing,

    /// The image is wrapped in a compression format we can name but not decode.
    #[error("Unsupported compression format: {0}")]
    UnsupportedCompression(String),

    /// Reading the image or decoding one of its compression layers failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A serialized action or format registry could not be decoded.
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether this is an out-of-range progress value.
    pub fn is_range_fault(&self) -> bool {
        matches!(
            self,
            Error::ExcessivePercentage(_) | Error::DeficientPercentage(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
