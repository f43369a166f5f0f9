//! Reference runtime for element-wise graphs
//!
//! A model is a small TOML descriptor:
//!
//! ```toml
//! op = "sigmoid"
//!
//! [input]
//! name = "x"
//! dtype = "float32"
//! dims = [3, 4, 5]   # -1 marks a dynamic dimension, omit for any rank
//!
//! [output]
//! name = "y"
//! ```
//!
//! The output has the input's dims and dtype.

use nexon_tensor::{DType, Tensor, TensorData};
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

use super::{ModelSession, Runtime, RuntimeError, SessionSignature, TensorSpec};

/// Element-wise operations understood by the reference runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementOp {
    Identity,
    Sigmoid,
    Relu,
    Tanh,
    Neg,
    Not,
}

impl ElementOp {
    fn supports(&self, dtype: DType) -> bool {
        match self {
            ElementOp::Identity => true,
            ElementOp::Sigmoid | ElementOp::Tanh => dtype.is_float(),
            ElementOp::Relu | ElementOp::Neg => {
                matches!(dtype, DType::Float32 | DType::Float64 | DType::Int32 | DType::Int64)
            }
            ElementOp::Not => dtype == DType::Bool,
        }
    }

    fn apply(&self, data: &TensorData) -> Result<TensorData, RuntimeError> {
        let out = match (self, data) {
            (ElementOp::Identity, data) => data.clone(),
            (ElementOp::Sigmoid, TensorData::Float32(v)) => {
                TensorData::Float32(v.iter().map(|x| 1.0 / (1.0 + (-x).exp())).collect())
            }
            (ElementOp::Sigmoid, TensorData::Float64(v)) => {
                TensorData::Float64(v.iter().map(|x| 1.0 / (1.0 + (-x).exp())).collect())
            }
            (ElementOp::Tanh, TensorData::Float32(v)) => TensorData::Float32(v.iter().map(|x| x.tanh()).collect()),
            (ElementOp::Tanh, TensorData::Float64(v)) => TensorData::Float64(v.iter().map(|x| x.tanh()).collect()),
            (ElementOp::Relu, TensorData::Float32(v)) => TensorData::Float32(v.iter().map(|x| x.max(0.0)).collect()),
            (ElementOp::Relu, TensorData::Float64(v)) => TensorData::Float64(v.iter().map(|x| x.max(0.0)).collect()),
            (ElementOp::Relu, TensorData::Int32(v)) => TensorData::Int32(v.iter().map(|x| (*x).max(0)).collect()),
            (ElementOp::Relu, TensorData::Int64(v)) => TensorData::Int64(v.iter().map(|x| (*x).max(0)).collect()),
            (ElementOp::Neg, TensorData::Float32(v)) => TensorData::Float32(v.iter().map(|x| -x).collect()),
            (ElementOp::Neg, TensorData::Float64(v)) => TensorData::Float64(v.iter().map(|x| -x).collect()),
            (ElementOp::Neg, TensorData::Int32(v)) => TensorData::Int32(v.iter().map(|x| x.wrapping_neg()).collect()),
            (ElementOp::Neg, TensorData::Int64(v)) => TensorData::Int64(v.iter().map(|x| x.wrapping_neg()).collect()),
            (ElementOp::Not, TensorData::Bool(v)) => TensorData::Bool(v.iter().map(|x| !x).collect()),
            (op, data) => {
                return Err(RuntimeError::Execution(format!(
                    "{:?} is not defined for {}",
                    op,
                    data.dtype()
                )))
            }
        };
        Ok(out)
    }
}

#[derive(Debug, Deserialize)]
struct Descriptor {
    op: ElementOp,
    input: PortDescriptor,
    #[serde(default)]
    output: Option<OutputDescriptor>,
}

#[derive(Debug, Deserialize)]
struct PortDescriptor {
    #[serde(default = "default_input_name")]
    name: String,
    #[serde(default = "default_dtype")]
    dtype: DType,
    #[serde(default)]
    dims: Option<Vec<i64>>,
}

#[derive(Debug, Deserialize)]
struct OutputDescriptor {
    #[serde(default = "default_output_name")]
    name: String,
}

fn default_input_name() -> String {
    "input".to_string()
}

fn default_output_name() -> String {
    "output".to_string()
}

fn default_dtype() -> DType {
    DType::Float32
}

/// Runtime for TOML-described element-wise models
#[derive(Debug, Default, Clone)]
pub struct ReferenceRuntime;

impl ReferenceRuntime {
    pub fn new() -> Self {
        Self
    }
}

impl Runtime for ReferenceRuntime {
    fn initialize(&self, model: &str, bytes: &[u8]) -> Result<Box<dyn ModelSession>, RuntimeError> {
        let invalid = |message: String| RuntimeError::InvalidModel {
            model: model.to_string(),
            message,
        };

        let text = std::str::from_utf8(bytes).map_err(|e| invalid(format!("descriptor is not UTF-8: {}", e)))?;
        let descriptor: Descriptor = toml::from_str(text).map_err(|e| invalid(e.to_string()))?;

        let dtype = descriptor.input.dtype;
        if !descriptor.op.supports(dtype) {
            return Err(invalid(format!("{:?} is not defined for {}", descriptor.op, dtype)));
        }

        let dims = match descriptor.input.dims {
            Some(dims) => {
                if dims.is_empty() {
                    return Err(invalid("declared dims must not be empty".to_string()));
                }
                let mut declared = Vec::with_capacity(dims.len());
                for d in dims {
                    match d {
                        -1 => declared.push(None),
                        d if d > 0 => declared.push(Some(d as usize)),
                        d => return Err(invalid(format!("invalid declared dimension {}", d))),
                    }
                }
                Some(declared)
            }
            None => None,
        };

        let output_name = descriptor
            .output
            .map(|o| o.name)
            .unwrap_or_else(default_output_name);

        let signature = SessionSignature {
            inputs: vec![TensorSpec {
                name: descriptor.input.name,
                dtype,
                dims: dims.clone(),
            }],
            outputs: vec![TensorSpec {
                name: output_name,
                dtype,
                dims,
            }],
        };

        debug!(model = %model, op = ?descriptor.op, "Initialized reference session");
        Ok(Box::new(ReferenceSession {
            model: model.to_string(),
            op: descriptor.op,
            signature,
            closed: AtomicBool::new(false),
        }))
    }
}

struct ReferenceSession {
    model: String,
    op: ElementOp,
    signature: SessionSignature,
    closed: AtomicBool,
}

impl ModelSession for ReferenceSession {
    fn signature(&self) -> &SessionSignature {
        &self.signature
    }

    fn run(&self, input: &Tensor) -> Result<Vec<Tensor>, RuntimeError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(RuntimeError::Closed(self.model.clone()));
        }
        let data = self.op.apply(input.data())?;
        let output = Tensor::new(input.shape().clone(), data)
            .map_err(|e| RuntimeError::Execution(e.to_string()))?;

        let name = self
            .signature
            .outputs
            .first()
            .map(|spec| spec.name.clone())
            .unwrap_or_else(default_output_name);
        Ok(vec![output.with_name(name)])
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!(model = %self.model, "Closed reference session");
        }
    }
}
