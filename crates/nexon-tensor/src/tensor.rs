//! Typed tensors and their wire representation

use serde::{Deserialize, Serialize};

use crate::dtype::DType;
use crate::error::{Result, TensorError};
use crate::shape::Shape;
use crate::wire;

/// Flattened row-major element storage, one variant per dtype
#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    /// 32-bit floats
    Float32(Vec<f32>),
    /// 64-bit floats
    Float64(Vec<f64>),
    /// 32-bit integers
    Int32(Vec<i32>),
    /// 64-bit integers
    Int64(Vec<i64>),
    /// Booleans
    Bool(Vec<bool>),
    /// UTF-8 strings
    String(Vec<String>),
}

impl TensorData {
    /// The dtype tag of this storage
    pub fn dtype(&self) -> DType {
        match self {
            TensorData::Float32(_) => DType::Float32,
            TensorData::Float64(_) => DType::Float64,
            TensorData::Int32(_) => DType::Int32,
            TensorData::Int64(_) => DType::Int64,
            TensorData::Bool(_) => DType::Bool,
            TensorData::String(_) => DType::String,
        }
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        match self {
            TensorData::Float32(v) => v.len(),
            TensorData::Float64(v) => v.len(),
            TensorData::Int32(v) => v.len(),
            TensorData::Int64(v) => v.len(),
            TensorData::Bool(v) => v.len(),
            TensorData::String(v) => v.len(),
        }
    }

    /// Returns whether there are no elements
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A decoded tensor
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    name: Option<String>,
    shape: Shape,
    data: TensorData,
}

impl Tensor {
    /// Creates a tensor, checking that the element count matches the shape
    pub fn new(shape: Shape, data: TensorData) -> Result<Self> {
        shape.validate()?;
        if shape.numel() != data.len() {
            return Err(TensorError::invalid_shape(
                "TENSOR_ELEMENT_COUNT",
                format!("Shape {} holds {} elements, data has {}", shape, shape.numel(), data.len()),
                shape.to_string(),
                "Element count must equal the product of dims",
            ));
        }
        Ok(Self {
            name: None,
            shape,
            data,
        })
    }

    /// Sets the tensor name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Decodes a tensor from wire dims, dtype and raw bytes
    pub fn from_wire(dims: &[i64], dtype: DType, content: &[u8]) -> Result<Self> {
        let shape = Shape::from_wire_dims(dims)?;
        wire::validate_content_length(&shape, dtype, content)?;
        let data = wire::decode(dtype, shape.numel(), content)?;
        Ok(Self {
            name: None,
            shape,
            data,
        })
    }

    /// Encodes this tensor into its wire representation
    pub fn to_wire(&self) -> WireTensor {
        WireTensor {
            name: self.name.clone(),
            dims: self.shape.to_wire_dims(),
            dtype: self.dtype(),
            content: wire::encode(&self.data),
        }
    }

    /// Tensor name, if any
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Tensor shape
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Element dtype
    pub fn dtype(&self) -> DType {
        self.data.dtype()
    }

    /// Element storage
    pub fn data(&self) -> &TensorData {
        &self.data
    }

    /// Consumes the tensor, returning its storage
    pub fn into_data(self) -> TensorData {
        self.data
    }
}

/// A tensor as it travels between protocol adapters and the core: signed
/// dims, a dtype tag and the raw little-endian payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireTensor {
    /// Optional tensor name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Ordered dimensions
    pub dims: Vec<i64>,
    /// Element dtype
    pub dtype: DType,
    /// Flattened row-major little-endian payload
    #[serde(rename = "tensor_content")]
    pub content: Vec<u8>,
}

impl WireTensor {
    /// Creates an unnamed wire tensor
    pub fn new(dims: Vec<i64>, dtype: DType, content: Vec<u8>) -> Self {
        Self {
            name: None,
            dims,
            dtype,
            content,
        }
    }

    /// Sets the tensor name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Validates dims and payload size without decoding
    pub fn validate(&self) -> Result<Shape> {
        let shape = Shape::from_wire_dims(&self.dims)?;
        wire::validate_content_length(&shape, self.dtype, &self.content)?;
        Ok(shape)
    }

    /// Decodes into a typed tensor
    pub fn decode(&self) -> Result<Tensor> {
        let tensor = Tensor::from_wire(&self.dims, self.dtype, &self.content)?;
        Ok(match &self.name {
            Some(name) => tensor.with_name(name.clone()),
            None => tensor,
        })
    }
}

impl From<&Tensor> for WireTensor {
    fn from(tensor: &Tensor) -> Self {
        tensor.to_wire()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tensor_new_checks_count() {
        let err = Tensor::new(Shape::new(vec![2, 2]), TensorData::Int32(vec![1, 2, 3])).unwrap_err();
        assert_eq!(err.code(), "TENSOR_ELEMENT_COUNT");
    }

    #[test]
    fn test_wire_tensor_decode_keeps_name() {
        let tensor = Tensor::new(Shape::new(vec![2]), TensorData::Float64(vec![0.5, -2.0]))
            .unwrap()
            .with_name("x");
        let wire = tensor.to_wire();
        assert_eq!(wire.name.as_deref(), Some("x"));
        assert_eq!(wire.decode().unwrap(), tensor);
    }

    #[test]
    fn test_wire_tensor_validate() {
        let wire = WireTensor::new(vec![9, 9, 9], DType::Float32, vec![0u8; 240]);
        assert_eq!(wire.validate().unwrap_err().code(), "TENSOR_CONTENT_LENGTH");
    }
}
