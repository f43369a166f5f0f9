//! Element type tags carried by every tensor on the wire

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, TensorError};

/// Data types a tensor may carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    /// 32-bit floating point
    Float32,
    /// 64-bit floating point
    Float64,
    /// 32-bit signed integer
    Int32,
    /// 64-bit signed integer
    Int64,
    /// Boolean, one byte per element
    Bool,
    /// UTF-8 string, length-prefixed per element
    String,
}

impl DType {
    /// All supported dtypes, in wire tag order
    pub const ALL: [DType; 6] = [
        DType::Float32,
        DType::Float64,
        DType::Int32,
        DType::Int64,
        DType::Bool,
        DType::String,
    ];

    /// Fixed width of one element in bytes, `None` for variable-width strings
    pub fn element_width(&self) -> Option<usize> {
        match self {
            DType::Float32 | DType::Int32 => Some(4),
            DType::Float64 | DType::Int64 => Some(8),
            DType::Bool => Some(1),
            DType::String => None,
        }
    }

    /// Canonical lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            DType::Float32 => "float32",
            DType::Float64 => "float64",
            DType::Int32 => "int32",
            DType::Int64 => "int64",
            DType::Bool => "bool",
            DType::String => "string",
        }
    }

    /// Whether the dtype is a floating point type
    pub fn is_float(&self) -> bool {
        matches!(self, DType::Float32 | DType::Float64)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DType {
    type Err = TensorError;

    /// Accepts canonical names as well as ONNX-style type strings
    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase();
        let inner = normalized
            .strip_prefix("tensor(")
            .and_then(|rest| rest.strip_suffix(')'))
            .unwrap_or(&normalized);

        match inner {
            "float" | "float32" | "f32" => Ok(DType::Float32),
            "double" | "float64" | "f64" => Ok(DType::Float64),
            "int32" | "i32" => Ok(DType::Int32),
            "int64" | "i64" => Ok(DType::Int64),
            "bool" | "boolean" => Ok(DType::Bool),
            "string" | "str" => Ok(DType::String),
            _ => Err(TensorError::unsupported_dtype(
                "DTYPE_UNKNOWN",
                format!("Unrecognized dtype '{}'", s),
                s,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_element_widths() {
        assert_eq!(DType::Float32.element_width(), Some(4));
        assert_eq!(DType::Int32.element_width(), Some(4));
        assert_eq!(DType::Float64.element_width(), Some(8));
        assert_eq!(DType::Int64.element_width(), Some(8));
        assert_eq!(DType::Bool.element_width(), Some(1));
        assert_eq!(DType::String.element_width(), None);
    }

    #[test]
    fn test_parse_aliases() {
        assert_eq!("tensor(float)".parse::<DType>().unwrap(), DType::Float32);
        assert_eq!("tensor(double)".parse::<DType>().unwrap(), DType::Float64);
        assert_eq!("Boolean".parse::<DType>().unwrap(), DType::Bool);
        assert_eq!("int64".parse::<DType>().unwrap(), DType::Int64);
        assert!("complex64".parse::<DType>().is_err());
    }

    #[test]
    fn test_display_matches_serde() {
        for dtype in DType::ALL {
            let json = serde_json::to_string(&dtype).unwrap();
            assert_eq!(json, format!("\"{}\"", dtype));
        }
    }
}
