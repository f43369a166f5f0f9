//! Nexon Core - model session cache and inference orchestrator
//!
//! This crate is shared by every protocol front end. It keeps a bounded set
//! of loaded model sessions resident, collapses concurrent loads of the same
//! model into one, and runs validated tensor requests against leased
//! sessions. All failures cross the crate boundary as [`InferenceError`].

pub mod cache;
pub mod config;
pub mod loader;
pub mod orchestrator;
pub mod runtime;
pub mod singleflight;
pub mod store;

use std::fmt;
use thiserror::Error;

/// Closed error taxonomy seen by protocol adapters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed or shape-mismatched request; the client must fix its input
    InvalidArgument,
    /// Model unknown to the store
    NotFound,
    /// Model exists but is not deployed
    FailedPrecondition,
    /// Cache shutting down, load timed out or store outage; retryable
    Unavailable,
    /// Runtime or unexpected failure
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidArgument => "INVALID_ARGUMENT",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::FailedPrecondition => "FAILED_PRECONDITION",
            ErrorKind::Unavailable => "UNAVAILABLE",
            ErrorKind::Internal => "INTERNAL",
        }
    }

    /// Whether a client may retry the same request
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Unavailable)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by [`InferenceOrchestrator::predict`](orchestrator::InferenceOrchestrator::predict)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InferenceError {
    #[error("Invalid argument [{code}]: {message}")]
    InvalidArgument { code: &'static str, message: String },

    #[error("Not found [{code}]: {message}")]
    NotFound { code: &'static str, message: String },

    #[error("Failed precondition [{code}]: {message}")]
    FailedPrecondition { code: &'static str, message: String },

    #[error("Unavailable [{code}]: {message}")]
    Unavailable { code: &'static str, message: String },

    #[error("Internal error [{code}]: {message}")]
    Internal { code: &'static str, message: String },
}

impl InferenceError {
    pub fn invalid_argument<S: Into<String>>(code: &'static str, message: S) -> Self {
        Self::InvalidArgument {
            code,
            message: message.into(),
        }
    }

    pub fn not_found<S: Into<String>>(code: &'static str, message: S) -> Self {
        Self::NotFound {
            code,
            message: message.into(),
        }
    }

    pub fn failed_precondition<S: Into<String>>(code: &'static str, message: S) -> Self {
        Self::FailedPrecondition {
            code,
            message: message.into(),
        }
    }

    pub fn unavailable<S: Into<String>>(code: &'static str, message: S) -> Self {
        Self::Unavailable {
            code,
            message: message.into(),
        }
    }

    pub fn internal<S: Into<String>>(code: &'static str, message: S) -> Self {
        Self::Internal {
            code,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument { .. } => ErrorKind::InvalidArgument,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::FailedPrecondition { .. } => ErrorKind::FailedPrecondition,
            Self::Unavailable { .. } => ErrorKind::Unavailable,
            Self::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Get the error code for programmatic handling
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidArgument { code, .. }
            | Self::NotFound { code, .. }
            | Self::FailedPrecondition { code, .. }
            | Self::Unavailable { code, .. }
            | Self::Internal { code, .. } => code,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::InvalidArgument { message, .. }
            | Self::NotFound { message, .. }
            | Self::FailedPrecondition { message, .. }
            | Self::Unavailable { message, .. }
            | Self::Internal { message, .. } => message,
        }
    }
}

impl From<nexon_tensor::TensorError> for InferenceError {
    fn from(err: nexon_tensor::TensorError) -> Self {
        Self::invalid_argument(err.code(), err.to_string())
    }
}

/// Result type alias for orchestrator operations
pub type Result<T> = std::result::Result<T, InferenceError>;

// Re-export main types
pub use cache::{CacheError, CacheStats, SessionCache, SessionLease, SweepReport};
pub use config::{CacheConfig, OrchestratorConfig};
pub use loader::{LoadError, SessionLoader, StoreSessionLoader};
pub use orchestrator::{InferenceOrchestrator, TensorRequest, TensorResponse};
pub use runtime::{ModelSession, ReferenceRuntime, Runtime, RuntimeError, SessionSignature, TensorSpec};
pub use singleflight::Singleflight;
pub use store::{DeploymentStatus, InMemoryModelStore, ModelRecord, ModelStore, StoreError};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        CacheConfig, DeploymentStatus, ErrorKind, InMemoryModelStore, InferenceError, InferenceOrchestrator,
        ModelStore, OrchestratorConfig, ReferenceRuntime, Result, SessionCache, TensorRequest, TensorResponse,
    };
    pub use nexon_tensor::{DType, Shape, Tensor, TensorData, WireTensor};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_and_code() {
        let err = InferenceError::failed_precondition("MODEL_NOT_DEPLOYED", "model 'm' is not deployed");
        assert_eq!(err.kind(), ErrorKind::FailedPrecondition);
        assert_eq!(err.code(), "MODEL_NOT_DEPLOYED");
        assert_eq!(err.kind().as_str(), "FAILED_PRECONDITION");
        assert!(!err.kind().is_retryable());
        assert!(err.to_string().contains("MODEL_NOT_DEPLOYED"));
    }

    #[test]
    fn test_tensor_errors_are_invalid_arguments() {
        let err: InferenceError = nexon_tensor::TensorError::encoding("TENSOR_STRING_UTF8", "bad bytes").into();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(err.code(), "TENSOR_STRING_UTF8");
    }
}
