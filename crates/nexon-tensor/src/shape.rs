//! Shape type for tensor dimensions

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Index;

use crate::error::{Result, TensorError};

/// Represents the shape of a tensor. Request shapes always have at least one
/// dimension and every dimension is positive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Shape {
    dims: Vec<usize>,
}

impl Shape {
    /// Creates a new shape from a vector of dimensions
    pub fn new(dims: Vec<usize>) -> Self {
        Self { dims }
    }

    /// Creates a shape from a slice of dimensions
    pub fn from_slice(dims: &[usize]) -> Self {
        Self { dims: dims.to_vec() }
    }

    /// Builds a validated shape from signed wire dims
    pub fn from_wire_dims(dims: &[i64]) -> Result<Self> {
        if dims.is_empty() {
            return Err(TensorError::invalid_shape(
                "SHAPE_EMPTY",
                "Input dims must be provided (non-empty)",
                "[]",
                "A tensor request needs at least one dimension",
            ));
        }

        let mut converted = Vec::with_capacity(dims.len());
        for &dim in dims {
            if dim <= 0 {
                return Err(TensorError::invalid_shape(
                    "SHAPE_NON_POSITIVE_DIMENSION",
                    format!("Dimension {} is not positive", dim),
                    format!("{:?}", dims),
                    "All dimensions must be positive integers",
                ));
            }
            let dim = usize::try_from(dim).map_err(|_| {
                TensorError::invalid_shape(
                    "SHAPE_TOO_LARGE",
                    format!("Dimension {} does not fit in memory", dim),
                    format!("{:?}", dims),
                    "Dimension exceeds the platform address width",
                )
            })?;
            converted.push(dim);
        }

        let shape = Self::new(converted);
        shape.validate()?;
        Ok(shape)
    }

    /// Returns the number of dimensions (rank)
    pub fn ndim(&self) -> usize {
        self.dims.len()
    }

    /// Returns the dimensions as a slice
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Returns the total number of elements
    pub fn numel(&self) -> usize {
        self.dims.iter().product()
    }

    /// Returns the total number of elements, `None` on overflow
    pub fn checked_numel(&self) -> Option<usize> {
        self.dims
            .iter()
            .try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
    }

    /// Signed dims as carried on the wire
    pub fn to_wire_dims(&self) -> Vec<i64> {
        self.dims.iter().map(|&d| d as i64).collect()
    }

    /// Checks this shape against a declared shape where `None` is a dynamic dimension
    pub fn is_compatible_with(&self, declared: &[Option<usize>]) -> bool {
        if declared.len() != self.dims.len() {
            return false;
        }
        declared
            .iter()
            .zip(self.dims.iter())
            .all(|(expected, actual)| expected.map_or(true, |e| e == *actual))
    }

    /// Validates that the shape is non-empty, has no zero dims and does not overflow
    pub fn validate(&self) -> Result<()> {
        if self.dims.is_empty() {
            return Err(TensorError::invalid_shape(
                "SHAPE_EMPTY",
                "Shape has no dimensions",
                format!("{}", self),
                "A tensor request needs at least one dimension",
            ));
        }
        if self.dims.contains(&0) {
            return Err(TensorError::invalid_shape(
                "SHAPE_ZERO_DIMENSION",
                "Shape contains zero dimension",
                format!("{}", self),
                "All shape dimensions must be positive",
            ));
        }
        if self.checked_numel().is_none() {
            return Err(TensorError::invalid_shape(
                "SHAPE_TOO_LARGE",
                "Shape is too large",
                format!("{}", self),
                "Overflow in element count",
            ));
        }
        Ok(())
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, dim) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", dim)?;
        }
        write!(f, ")")
    }
}

impl Index<usize> for Shape {
    type Output = usize;

    fn index(&self, index: usize) -> &Self::Output {
        &self.dims[index]
    }
}

impl From<Vec<usize>> for Shape {
    fn from(dims: Vec<usize>) -> Self {
        Self::new(dims)
    }
}

impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Self {
        Self::from_slice(dims)
    }
}
