//! Runtime seam
//!
//! The numerical execution of a model graph is opaque to the core. A
//! [`Runtime`] turns model bytes into a [`ModelSession`]; the cache owns the
//! session and callers only reach it through a lease.

pub mod reference;

use nexon_tensor::{DType, Shape, Tensor};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use reference::ReferenceRuntime;

/// Errors raised while initializing or running a session
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("Invalid model '{model}': {message}")]
    InvalidModel { model: String, message: String },

    #[error("Execution failed: {0}")]
    Execution(String),

    #[error("Session for '{0}' is closed")]
    Closed(String),
}

impl RuntimeError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidModel { .. } => "RUNTIME_INVALID_MODEL",
            Self::Execution(_) => "RUNTIME_EXECUTION_FAILED",
            Self::Closed(_) => "RUNTIME_SESSION_CLOSED",
        }
    }
}

/// Declared input or output of a model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorSpec {
    pub name: String,
    pub dtype: DType,
    /// Declared dims, `None` entries are dynamic. `None` overall accepts any rank.
    pub dims: Option<Vec<Option<usize>>>,
}

impl TensorSpec {
    /// Whether a tensor of `shape` fits this declaration
    pub fn accepts(&self, shape: &Shape) -> bool {
        match &self.dims {
            Some(declared) => shape.is_compatible_with(declared),
            None => true,
        }
    }

    /// Declared dims rendered for error messages, `?` for dynamic
    pub fn dims_display(&self) -> String {
        match &self.dims {
            Some(dims) => {
                let parts: Vec<String> = dims
                    .iter()
                    .map(|d| d.map_or_else(|| "?".to_string(), |d| d.to_string()))
                    .collect();
                format!("({})", parts.join(", "))
            }
            None => "(*)".to_string(),
        }
    }
}

/// Declared inputs and outputs of a loaded model
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSignature {
    pub inputs: Vec<TensorSpec>,
    pub outputs: Vec<TensorSpec>,
}

/// A loaded, initialized model
pub trait ModelSession: Send + Sync {
    fn signature(&self) -> &SessionSignature;

    /// Run the model on one input tensor. May block.
    fn run(&self, input: &Tensor) -> Result<Vec<Tensor>, RuntimeError>;

    /// Release runtime resources. Only the cache calls this, exactly once.
    fn close(&self);
}

/// Turns model bytes into sessions
pub trait Runtime: Send + Sync {
    fn initialize(&self, model: &str, bytes: &[u8]) -> Result<Box<dyn ModelSession>, RuntimeError>;
}
