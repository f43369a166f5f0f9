//! REST inference handler
//!
//! The input is either a nested JSON array (dims inferred from nesting) or
//! an already encoded tensor with a base64 payload. Both forms become the
//! same [`TensorRequest`] the RPC front end produces.

use crate::{
    error::{ServerError, ServerResult},
    server::ServerState,
};
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Json,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use nexon_core::TensorRequest;
use nexon_tensor::{DType, Shape, Tensor, TensorData, WireTensor};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::instrument;

/// Body of `POST /inference/infer/{model}`
#[derive(Debug, Clone, Deserialize)]
pub struct InferRequest {
    pub input: InferInput,
    /// Element type of a nested-array input; float32 if absent
    #[serde(default)]
    pub dtype: Option<DType>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum InferInput {
    Encoded(EncodedTensor),
    Values(Value),
}

/// Tensor in wire form with a base64 payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodedTensor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub dims: Vec<i64>,
    pub dtype: DType,
    pub tensor_content: String,
}

impl From<WireTensor> for EncodedTensor {
    fn from(tensor: WireTensor) -> Self {
        Self {
            name: tensor.name,
            dims: tensor.dims,
            dtype: tensor.dtype,
            tensor_content: STANDARD.encode(&tensor.content),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferResponse {
    pub outputs: Vec<EncodedTensor>,
    /// Output values as nested arrays, one entry per output
    pub results: Vec<Value>,
}

/// `POST /inference/infer/{model}`
#[instrument(skip(state, payload), fields(model = %model_name))]
pub async fn infer(
    State(state): State<ServerState>,
    Path(model_name): Path<String>,
    payload: Result<Json<InferRequest>, JsonRejection>,
) -> ServerResult<Json<InferResponse>> {
    let Json(request) = payload?;
    let tensor = request.into_tensor_request()?;
    let response = state.orchestrator.predict(&model_name, tensor).await?;

    let results = response.outputs.iter().map(nested_values).collect::<ServerResult<Vec<_>>>()?;
    Ok(Json(InferResponse {
        outputs: response.outputs.into_iter().map(EncodedTensor::from).collect(),
        results,
    }))
}

impl InferRequest {
    pub fn into_tensor_request(self) -> ServerResult<TensorRequest> {
        match self.input {
            InferInput::Encoded(encoded) => {
                if self.dtype.is_some_and(|dtype| dtype != encoded.dtype) {
                    return Err(ServerError::InvalidRequest(
                        "top-level dtype disagrees with the encoded tensor dtype".to_string(),
                    ));
                }
                let content = STANDARD
                    .decode(encoded.tensor_content.as_bytes())
                    .map_err(|e| ServerError::InvalidRequest(format!("tensor_content is not base64: {}", e)))?;
                let wire = WireTensor::new(encoded.dims, encoded.dtype, content);
                Ok(match encoded.name {
                    Some(name) => wire.with_name(name),
                    None => wire,
                })
            }
            InferInput::Values(values) => {
                let dtype = self.dtype.unwrap_or(DType::Float32);
                let tensor = tensor_from_values(&values, dtype)?;
                Ok(tensor.to_wire())
            }
        }
    }
}

/// Build a tensor from a rectangular nested JSON array
pub fn tensor_from_values(values: &Value, dtype: DType) -> ServerResult<Tensor> {
    if !values.is_array() {
        return Err(ServerError::InvalidRequest("input must be a JSON array".to_string()));
    }

    let mut dims = Vec::new();
    let mut cursor = values;
    while let Value::Array(items) = cursor {
        dims.push(items.len());
        match items.first() {
            Some(first) => cursor = first,
            None => break,
        }
    }

    // dims come from the first-element chain only; flatten checks the rest
    let mut leaves = Vec::new();
    flatten(values, &dims, &mut leaves)?;

    let data = match dtype {
        DType::Float32 => TensorData::Float32(convert(&leaves, |v| v.as_f64().map(|f| f as f32))?),
        DType::Float64 => TensorData::Float64(convert(&leaves, Value::as_f64)?),
        DType::Int32 => TensorData::Int32(convert(&leaves, |v| v.as_i64().and_then(|i| i32::try_from(i).ok()))?),
        DType::Int64 => TensorData::Int64(convert(&leaves, Value::as_i64)?),
        DType::Bool => TensorData::Bool(convert(&leaves, Value::as_bool)?),
        DType::String => TensorData::String(convert(&leaves, |v| v.as_str().map(str::to_string))?),
    };

    Ok(Tensor::new(Shape::new(dims), data).map_err(nexon_core::InferenceError::from)?)
}

fn flatten<'a>(value: &'a Value, dims: &[usize], out: &mut Vec<&'a Value>) -> ServerResult<()> {
    match (value, dims.split_first()) {
        (Value::Array(items), Some((&expected, rest))) => {
            if items.len() != expected {
                return Err(ServerError::InvalidRequest(
                    "input is a ragged array; every row must have the same length".to_string(),
                ));
            }
            items.iter().try_for_each(|item| flatten(item, rest, out))
        }
        (Value::Array(_), None) => Err(ServerError::InvalidRequest(
            "input nesting depth is inconsistent".to_string(),
        )),
        (leaf, None) => {
            out.push(leaf);
            Ok(())
        }
        (_, Some(_)) => Err(ServerError::InvalidRequest(
            "input nesting depth is inconsistent".to_string(),
        )),
    }
}

fn convert<T>(leaves: &[&Value], f: impl Fn(&Value) -> Option<T>) -> ServerResult<Vec<T>> {
    leaves
        .iter()
        .map(|leaf| {
            f(*leaf).ok_or_else(|| ServerError::InvalidRequest(format!("value {} does not fit the requested dtype", leaf)))
        })
        .collect()
}

/// Decode an output tensor into nested JSON arrays shaped by its dims
pub fn nested_values(tensor: &WireTensor) -> ServerResult<Value> {
    let decoded = tensor.decode().map_err(nexon_core::InferenceError::from)?;
    let flat: Vec<Value> = match decoded.data() {
        TensorData::Float32(v) => v.iter().map(|x| Value::from(*x)).collect(),
        TensorData::Float64(v) => v.iter().map(|x| Value::from(*x)).collect(),
        TensorData::Int32(v) => v.iter().map(|x| Value::from(*x)).collect(),
        TensorData::Int64(v) => v.iter().map(|x| Value::from(*x)).collect(),
        TensorData::Bool(v) => v.iter().map(|x| Value::from(*x)).collect(),
        TensorData::String(v) => v.iter().map(|x| Value::from(x.as_str())).collect(),
    };
    Ok(nest(&flat, decoded.shape().dims()))
}

fn nest(values: &[Value], dims: &[usize]) -> Value {
    match dims.split_first() {
        None => values.first().cloned().unwrap_or(Value::Null),
        Some((_, [])) => Value::Array(values.to_vec()),
        Some((_, rest)) => {
            let stride = rest.iter().product::<usize>().max(1);
            Value::Array(values.chunks(stride).map(|chunk| nest(chunk, rest)).collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_nested_array_dims() {
        let tensor = tensor_from_values(&json!([[1, 2, 3], [4, 5, 6]]), DType::Float32).unwrap();
        assert_eq!(tensor.shape().dims(), &[2, 3]);
        assert_eq!(tensor.dtype(), DType::Float32);
    }

    #[test]
    fn test_ragged_array_rejected() {
        let err = tensor_from_values(&json!([[1, 2], [3]]), DType::Float32).unwrap_err();
        assert!(matches!(err, ServerError::InvalidRequest(_)));

        let err = tensor_from_values(&json!([[1, 2], 3]), DType::Float32).unwrap_err();
        assert!(matches!(err, ServerError::InvalidRequest(_)));
    }

    /// Every level holds `width` items but only the first one nests further
    fn wide_first_chain(depth: usize, width: usize) -> Value {
        if depth == 0 {
            return json!(0.0);
        }
        let mut items = vec![wide_first_chain(depth - 1, width)];
        items.extend(std::iter::repeat(json!(0.0)).take(width - 1));
        Value::Array(items)
    }

    #[test]
    fn test_deep_ragged_array_rejected_without_presizing() {
        // Claims 1000^6 and 1000^8 elements through the first-element chain
        for depth in [6, 8] {
            let err = tensor_from_values(&wide_first_chain(depth, 1000), DType::Float32).unwrap_err();
            assert!(matches!(err, ServerError::InvalidRequest(_)), "depth {}", depth);
        }
    }

    #[test]
    fn test_scalar_and_type_mismatch_rejected() {
        assert!(tensor_from_values(&json!(1.5), DType::Float32).is_err());
        assert!(tensor_from_values(&json!([1.5]), DType::Int32).is_err());
        assert!(tensor_from_values(&json!(["a"]), DType::Float32).is_err());
        assert!(tensor_from_values(&json!([true, false]), DType::Bool).is_ok());
    }

    #[test]
    fn test_empty_array_rejected() {
        let err = tensor_from_values(&json!([]), DType::Float32).unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_nested_values_follow_dims() {
        let tensor = Tensor::new(Shape::new(vec![2, 2]), TensorData::Int64(vec![1, 2, 3, 4])).unwrap();
        assert_eq!(nested_values(&tensor.to_wire()).unwrap(), json!([[1, 2], [3, 4]]));
    }

    #[test]
    fn test_encoded_input_decodes_base64() {
        let request: InferRequest = serde_json::from_value(json!({
            "input": {
                "dims": [1],
                "dtype": "int32",
                "tensor_content": STANDARD.encode(7i32.to_le_bytes()),
                "name": "x"
            }
        }))
        .unwrap();
        let wire = request.into_tensor_request().unwrap();
        assert_eq!(wire.dtype, DType::Int32);
        assert_eq!(wire.content, 7i32.to_le_bytes().to_vec());
        assert_eq!(wire.name.as_deref(), Some("x"));
    }
}
