//! Little-endian wire codec
//!
//! `tensor_content` is the flattened row-major element array. Numeric dtypes
//! are encoded little-endian at their natural width, booleans take one byte
//! each, and strings are written as a `u32` little-endian byte length followed
//! by the UTF-8 bytes of the element.

use byteorder::{ByteOrder, LittleEndian};

use crate::dtype::DType;
use crate::error::{Result, TensorError};
use crate::shape::Shape;
use crate::tensor::TensorData;

/// Number of bytes a fixed-width payload must have, `None` for strings or overflow
pub fn expected_content_length(shape: &Shape, dtype: DType) -> Option<usize> {
    let width = dtype.element_width()?;
    shape.checked_numel()?.checked_mul(width)
}

/// Checks that `content` holds exactly `product(dims)` elements of `dtype`
pub fn validate_content_length(shape: &Shape, dtype: DType, content: &[u8]) -> Result<()> {
    let numel = shape.checked_numel().ok_or_else(|| {
        TensorError::invalid_shape(
            "SHAPE_TOO_LARGE",
            "Shape is too large",
            shape.to_string(),
            "Overflow in element count",
        )
    })?;

    match dtype.element_width() {
        Some(width) => {
            let expected = numel.checked_mul(width).ok_or_else(|| {
                TensorError::invalid_shape(
                    "SHAPE_TOO_LARGE",
                    "Payload size overflows",
                    shape.to_string(),
                    "Overflow in byte count",
                )
            })?;
            if content.len() != expected {
                return Err(TensorError::content_length(
                    "TENSOR_CONTENT_LENGTH",
                    format!(
                        "tensor_content size {} != prod(dims) {} * elem_size {}",
                        content.len(),
                        numel,
                        width
                    ),
                    expected,
                    content.len(),
                ));
            }
            Ok(())
        }
        None => {
            let count = count_string_elements(content)?;
            if count != numel {
                return Err(TensorError::encoding(
                    "TENSOR_STRING_COUNT",
                    format!(
                        "tensor_content holds {} string elements, dims {} require {}",
                        count, shape, numel
                    ),
                ));
            }
            Ok(())
        }
    }
}

/// Encodes typed element data into wire bytes
pub fn encode(data: &TensorData) -> Vec<u8> {
    match data {
        TensorData::Float32(values) => {
            let mut out = vec![0u8; values.len() * 4];
            LittleEndian::write_f32_into(values, &mut out);
            out
        }
        TensorData::Float64(values) => {
            let mut out = vec![0u8; values.len() * 8];
            LittleEndian::write_f64_into(values, &mut out);
            out
        }
        TensorData::Int32(values) => {
            let mut out = vec![0u8; values.len() * 4];
            LittleEndian::write_i32_into(values, &mut out);
            out
        }
        TensorData::Int64(values) => {
            let mut out = vec![0u8; values.len() * 8];
            LittleEndian::write_i64_into(values, &mut out);
            out
        }
        TensorData::Bool(values) => values.iter().map(|&b| u8::from(b)).collect(),
        TensorData::String(values) => {
            let total: usize = values.iter().map(|s| 4 + s.len()).sum();
            let mut out = Vec::with_capacity(total);
            let mut len_buf = [0u8; 4];
            for value in values {
                LittleEndian::write_u32(&mut len_buf, value.len() as u32);
                out.extend_from_slice(&len_buf);
                out.extend_from_slice(value.as_bytes());
            }
            out
        }
    }
}

/// Decodes wire bytes into typed element data. The caller is expected to have
/// run [`validate_content_length`] first; a size mismatch is still reported.
pub fn decode(dtype: DType, numel: usize, content: &[u8]) -> Result<TensorData> {
    if let Some(width) = dtype.element_width() {
        if numel.checked_mul(width) != Some(content.len()) {
            return Err(TensorError::content_length(
                "TENSOR_CONTENT_LENGTH",
                format!("cannot decode {} {} elements", numel, dtype),
                numel.saturating_mul(width),
                content.len(),
            ));
        }
    }

    let data = match dtype {
        DType::Float32 => {
            let mut values = vec![0f32; numel];
            LittleEndian::read_f32_into(content, &mut values);
            TensorData::Float32(values)
        }
        DType::Float64 => {
            let mut values = vec![0f64; numel];
            LittleEndian::read_f64_into(content, &mut values);
            TensorData::Float64(values)
        }
        DType::Int32 => {
            let mut values = vec![0i32; numel];
            LittleEndian::read_i32_into(content, &mut values);
            TensorData::Int32(values)
        }
        DType::Int64 => {
            let mut values = vec![0i64; numel];
            LittleEndian::read_i64_into(content, &mut values);
            TensorData::Int64(values)
        }
        DType::Bool => TensorData::Bool(content.iter().map(|&b| b != 0).collect()),
        DType::String => {
            let values = decode_strings(content)?;
            if values.len() != numel {
                return Err(TensorError::encoding(
                    "TENSOR_STRING_COUNT",
                    format!("expected {} string elements, found {}", numel, values.len()),
                ));
            }
            TensorData::String(values)
        }
    };
    Ok(data)
}

fn count_string_elements(content: &[u8]) -> Result<usize> {
    let mut offset = 0usize;
    let mut count = 0usize;
    while offset < content.len() {
        let len = read_string_len(content, offset)?;
        offset += 4;
        let end = offset.checked_add(len).filter(|&end| end <= content.len()).ok_or_else(|| {
            TensorError::encoding(
                "TENSOR_STRING_TRUNCATED",
                format!("string element {} runs past the end of tensor_content", count),
            )
        })?;
        offset = end;
        count += 1;
    }
    Ok(count)
}

fn decode_strings(content: &[u8]) -> Result<Vec<String>> {
    let mut offset = 0usize;
    let mut values = Vec::new();
    while offset < content.len() {
        let len = read_string_len(content, offset)?;
        offset += 4;
        let end = offset.checked_add(len).filter(|&end| end <= content.len()).ok_or_else(|| {
            TensorError::encoding(
                "TENSOR_STRING_TRUNCATED",
                format!("string element {} runs past the end of tensor_content", values.len()),
            )
        })?;
        let value = std::str::from_utf8(&content[offset..end]).map_err(|e| {
            TensorError::encoding(
                "TENSOR_STRING_UTF8",
                format!("string element {} is not valid UTF-8: {}", values.len(), e),
            )
        })?;
        values.push(value.to_owned());
        offset = end;
    }
    Ok(values)
}

fn read_string_len(content: &[u8], offset: usize) -> Result<usize> {
    if content.len() - offset < 4 {
        return Err(TensorError::encoding(
            "TENSOR_STRING_TRUNCATED",
            "truncated string length prefix",
        ));
    }
    Ok(LittleEndian::read_u32(&content[offset..offset + 4]) as usize)
}
