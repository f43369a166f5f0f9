//! Error types for tensor decoding and validation

use thiserror::Error;

/// Errors that can occur while validating or decoding tensors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TensorError {
    /// The dims of a tensor are unusable
    #[error("Invalid shape [{code}]: {message}\nShape: {shape}\nReason: {reason}")]
    InvalidShape {
        /// Error code for programmatic handling
        code: &'static str,
        /// Human-readable error message
        message: String,
        /// String representation of the offending dims
        shape: String,
        /// Reason why the shape is invalid
        reason: String,
    },

    /// The raw payload does not match `product(dims) * width(dtype)`
    #[error("Content length mismatch [{code}]: {message}\nExpected: {expected} bytes\nActual: {actual} bytes")]
    ContentLength {
        /// Error code for programmatic handling
        code: &'static str,
        /// Human-readable error message
        message: String,
        /// Number of bytes the dims and dtype call for
        expected: usize,
        /// Number of bytes received
        actual: usize,
    },

    /// A dtype tag that this crate does not know about
    #[error("Unsupported dtype [{code}]: {message}\nData type: {dtype}")]
    UnsupportedDType {
        /// Error code for programmatic handling
        code: &'static str,
        /// Human-readable error message
        message: String,
        /// The unrecognized dtype name or tag
        dtype: String,
    },

    /// Malformed element encoding inside an otherwise well-sized payload
    #[error("Encoding error [{code}]: {message}")]
    Encoding {
        /// Error code for programmatic handling
        code: &'static str,
        /// Human-readable error message
        message: String,
    },
}

/// Result type for tensor operations
pub type Result<T> = std::result::Result<T, TensorError>;

impl TensorError {
    /// Create an invalid shape error
    pub fn invalid_shape<S1, S2, S3>(code: &'static str, message: S1, shape: S2, reason: S3) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
        S3: Into<String>,
    {
        Self::InvalidShape {
            code,
            message: message.into(),
            shape: shape.into(),
            reason: reason.into(),
        }
    }

    /// Create a content length error
    pub fn content_length<S: Into<String>>(
        code: &'static str,
        message: S,
        expected: usize,
        actual: usize,
    ) -> Self {
        Self::ContentLength {
            code,
            message: message.into(),
            expected,
            actual,
        }
    }

    /// Create an unsupported dtype error
    pub fn unsupported_dtype<S1, S2>(code: &'static str, message: S1, dtype: S2) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
    {
        Self::UnsupportedDType {
            code,
            message: message.into(),
            dtype: dtype.into(),
        }
    }

    /// Create an encoding error
    pub fn encoding<S: Into<String>>(code: &'static str, message: S) -> Self {
        Self::Encoding {
            code,
            message: message.into(),
        }
    }

    /// Get the error code for programmatic handling
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidShape { code, .. } => code,
            Self::ContentLength { code, .. } => code,
            Self::UnsupportedDType { code, .. } => code,
            Self::Encoding { code, .. } => code,
        }
    }
}
