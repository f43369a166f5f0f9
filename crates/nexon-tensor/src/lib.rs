//! Nexon Tensor: dtypes, shapes and the tensor wire codec
//!
//! Both protocol front ends exchange tensors as ordered dims, a dtype tag and
//! a flattened row-major little-endian payload. This crate owns that
//! representation and its validation so the two front ends cannot drift.
//!
//! # Example
//!
//! ```rust
//! use nexon_tensor::{DType, Shape, Tensor, TensorData};
//!
//! let tensor = Tensor::new(Shape::new(vec![2, 2]), TensorData::Float32(vec![1.0, 2.0, 3.0, 4.0]))?;
//! let wire = tensor.to_wire();
//! assert_eq!(wire.content.len(), 16);
//! assert_eq!(wire.decode()?, tensor);
//! # Ok::<(), nexon_tensor::TensorError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod dtype;
pub mod error;
pub mod shape;
pub mod tensor;
pub mod wire;

// Re-export main types
pub use dtype::DType;
pub use error::{Result, TensorError};
pub use shape::Shape;
pub use tensor::{Tensor, TensorData, WireTensor};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{DType, Result, Shape, Tensor, TensorData, TensorError, WireTensor};
}
