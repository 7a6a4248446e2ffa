//! Error types for percibir operations.
//!
//! One enum covers the whole engine: image construction, model loading,
//! inference, and the trainer/predictor file formats.

use std::fmt;

/// Main error type for percibir operations.
///
/// # Examples
///
/// ```
/// use percibir::error::PercibirError;
///
/// let err = PercibirError::DimensionMismatch {
///     expected: "4096".to_string(),
///     actual: "2048".to_string(),
/// };
/// assert!(err.to_string().contains("dimension mismatch"));
/// ```
#[derive(Debug)]
pub enum PercibirError {
    /// An image source could not be decoded.
    DecodeFailure {
        /// What went wrong with the source
        message: String,
    },

    /// A raw-pixel description is malformed (zero dimensions, bad channel
    /// count, stride/buffer inconsistencies).
    InvalidDimensions {
        /// Description of the offending field
        message: String,
    },

    /// A network model file is malformed or internally inconsistent.
    CorruptModel {
        /// Error description
        message: String,
    },

    /// The network model file declares a version this build cannot read.
    UnsupportedVersion {
        /// Version found in the file
        found: u16,
        /// Maximum supported version
        supported: u16,
    },

    /// Feature-vector length doesn't match what the trainer or predictor
    /// was built with.
    DimensionMismatch {
        /// Expected dimension description
        expected: String,
        /// Actual dimension found
        actual: String,
    },

    /// A predictor file is malformed or internally inconsistent.
    CorruptFile {
        /// Error description
        message: String,
    },

    /// Persisting an artifact failed.
    WriteFailure {
        /// Error description
        message: String,
    },

    /// I/O error (file not found, permission denied, etc.).
    Io(std::io::Error),
}

impl fmt::Display for PercibirError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PercibirError::DecodeFailure { message } => {
                write!(f, "Image decode failure: {message}")
            }
            PercibirError::InvalidDimensions { message } => {
                write!(f, "Invalid image dimensions: {message}")
            }
            PercibirError::CorruptModel { message } => {
                write!(f, "Corrupt network model: {message}")
            }
            PercibirError::UnsupportedVersion { found, supported } => {
                write!(
                    f,
                    "Unsupported model version: found {found}, max supported {supported}"
                )
            }
            PercibirError::DimensionMismatch { expected, actual } => {
                write!(
                    f,
                    "Feature dimension mismatch: expected {expected}, got {actual}"
                )
            }
            PercibirError::CorruptFile { message } => {
                write!(f, "Corrupt predictor file: {message}")
            }
            PercibirError::WriteFailure { message } => {
                write!(f, "Write failure: {message}")
            }
            PercibirError::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for PercibirError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PercibirError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for PercibirError {
    fn from(err: std::io::Error) -> Self {
        PercibirError::Io(err)
    }
}

impl PercibirError {
    /// Create a dimension mismatch error with numeric context.
    #[must_use]
    pub fn dimension_mismatch(expected: usize, actual: usize) -> Self {
        Self::DimensionMismatch {
            expected: format!("{expected}"),
            actual: format!("{actual}"),
        }
    }

    /// Create a corrupt-model error.
    #[must_use]
    pub fn corrupt_model(message: impl Into<String>) -> Self {
        Self::CorruptModel {
            message: message.into(),
        }
    }

    /// Create a corrupt-predictor-file error.
    #[must_use]
    pub fn corrupt_file(message: impl Into<String>) -> Self {
        Self::CorruptFile {
            message: message.into(),
        }
    }
}

/// Convenience type alias for Results.
pub type Result<T> = std::result::Result<T, PercibirError>;
