//! RPC front end
//!
//! Messages are declared with `prost` derives and every failure leaves this
//! module as a [`tonic::Status`]. The service is exposed over plain HTTP at
//! `POST /rpc/predict`: the body is a protobuf-encoded [`PredictRequest`],
//! the reply a protobuf-encoded [`PredictReply`], and the outcome is carried
//! in `grpc-status` / `grpc-message` headers.

use crate::server::ServerState;
use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use nexon_core::{ErrorKind, InferenceError, InferenceOrchestrator, TensorRequest};
use nexon_tensor::{DType, WireTensor};
use prost::Message;
use std::sync::Arc;
use tonic::{Code, Status};
use tracing::{debug, instrument};

/// Content type of protobuf request and reply bodies
pub const PROTOBUF_CONTENT_TYPE: &str = "application/x-protobuf";

/// Element type tag on the RPC wire
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum DataType {
    Unspecified = 0,
    Float32 = 1,
    Float64 = 2,
    Int32 = 3,
    Int64 = 4,
    Bool = 5,
    String = 6,
}

impl From<DType> for DataType {
    fn from(dtype: DType) -> Self {
        match dtype {
            DType::Float32 => DataType::Float32,
            DType::Float64 => DataType::Float64,
            DType::Int32 => DataType::Int32,
            DType::Int64 => DataType::Int64,
            DType::Bool => DataType::Bool,
            DType::String => DataType::String,
        }
    }
}

impl DataType {
    fn to_dtype(self) -> Option<DType> {
        match self {
            DataType::Unspecified => None,
            DataType::Float32 => Some(DType::Float32),
            DataType::Float64 => Some(DType::Float64),
            DataType::Int32 => Some(DType::Int32),
            DataType::Int64 => Some(DType::Int64),
            DataType::Bool => Some(DType::Bool),
            DataType::String => Some(DType::String),
        }
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct RequestTensor {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(int64, repeated, tag = "2")]
    pub dims: Vec<i64>,
    #[prost(bytes = "vec", tag = "3")]
    pub tensor_content: Vec<u8>,
    #[prost(enumeration = "DataType", tag = "4")]
    pub data_type: i32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct PredictRequest {
    #[prost(string, tag = "1")]
    pub model_name: String,
    #[prost(message, optional, tag = "2")]
    pub input: Option<RequestTensor>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ResponseTensor {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(int64, repeated, tag = "2")]
    pub dims: Vec<i64>,
    #[prost(bytes = "vec", tag = "3")]
    pub tensor_content: Vec<u8>,
    #[prost(enumeration = "DataType", tag = "4")]
    pub data_type: i32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct PredictReply {
    #[prost(message, repeated, tag = "1")]
    pub outputs: Vec<ResponseTensor>,
}

impl TryFrom<RequestTensor> for TensorRequest {
    type Error = Status;

    fn try_from(tensor: RequestTensor) -> Result<Self, Status> {
        let dtype = DataType::try_from(tensor.data_type)
            .ok()
            .and_then(DataType::to_dtype)
            .ok_or_else(|| {
                Status::invalid_argument(format!(
                    "[DTYPE_UNKNOWN] unsupported data_type {}",
                    tensor.data_type
                ))
            })?;

        let wire = WireTensor::new(tensor.dims, dtype, tensor.tensor_content);
        Ok(if tensor.name.is_empty() {
            wire
        } else {
            wire.with_name(tensor.name)
        })
    }
}

impl From<WireTensor> for ResponseTensor {
    fn from(tensor: WireTensor) -> Self {
        Self {
            name: tensor.name.unwrap_or_default(),
            dims: tensor.dims,
            tensor_content: tensor.content,
            data_type: DataType::from(tensor.dtype) as i32,
        }
    }
}

/// Map an orchestrator error onto the RPC status space
pub fn inference_error_to_status(err: &InferenceError) -> Status {
    let code = match err.kind() {
        ErrorKind::InvalidArgument => Code::InvalidArgument,
        ErrorKind::NotFound => Code::NotFound,
        ErrorKind::FailedPrecondition => Code::FailedPrecondition,
        ErrorKind::Unavailable => Code::Unavailable,
        ErrorKind::Internal => Code::Internal,
    };

    // Internal causes are logged by the orchestrator and not sent to clients
    let message = match err.kind() {
        ErrorKind::Internal => format!("[{}] internal error", err.code()),
        _ => format!("[{}] {}", err.code(), err.message()),
    };
    Status::new(code, message)
}

/// Inference service shared by the RPC transport
#[derive(Clone)]
pub struct InferenceRpc {
    orchestrator: Arc<InferenceOrchestrator>,
}

impl InferenceRpc {
    pub fn new(orchestrator: Arc<InferenceOrchestrator>) -> Self {
        Self { orchestrator }
    }

    #[instrument(skip_all, fields(model = %request.get_ref().model_name))]
    pub async fn predict(
        &self,
        request: tonic::Request<PredictRequest>,
    ) -> Result<tonic::Response<PredictReply>, Status> {
        let PredictRequest { model_name, input } = request.into_inner();
        let input = input.ok_or_else(|| Status::invalid_argument("[INPUT_MISSING] request has no input tensor"))?;
        let tensor = TensorRequest::try_from(input)?;

        let response = self
            .orchestrator
            .predict(&model_name, tensor)
            .await
            .map_err(|e| inference_error_to_status(&e))?;

        Ok(tonic::Response::new(PredictReply {
            outputs: response.outputs.into_iter().map(ResponseTensor::from).collect(),
        }))
    }
}

/// HTTP status used alongside `grpc-status` on the HTTP transport
fn http_status_for(code: Code) -> StatusCode {
    match code {
        Code::Ok => StatusCode::OK,
        Code::InvalidArgument => StatusCode::BAD_REQUEST,
        Code::NotFound => StatusCode::NOT_FOUND,
        Code::FailedPrecondition => StatusCode::CONFLICT,
        Code::Unavailable | Code::DeadlineExceeded => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Header values must be visible ASCII
fn grpc_message_header(message: &str) -> HeaderValue {
    let sanitized: String = message
        .chars()
        .map(|c| if c == ' ' || c.is_ascii_graphic() { c } else { '?' })
        .collect();
    HeaderValue::from_str(&sanitized).unwrap_or_else(|_| HeaderValue::from_static("invalid message"))
}

fn grpc_headers(code: Code, message: Option<&str>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(PROTOBUF_CONTENT_TYPE));
    headers.insert("grpc-status", HeaderValue::from(code as i32));
    if let Some(message) = message {
        headers.insert("grpc-message", grpc_message_header(message));
    }
    headers
}

fn status_response(status: &Status) -> Response {
    debug!(code = ?status.code(), message = %status.message(), "RPC call failed");
    (
        http_status_for(status.code()),
        grpc_headers(status.code(), Some(status.message())),
    )
        .into_response()
}

/// `POST /rpc/predict`
pub async fn predict_handler(State(state): State<ServerState>, body: Bytes) -> Response {
    let request = match PredictRequest::decode(body) {
        Ok(request) => request,
        Err(e) => {
            return status_response(&Status::invalid_argument(format!(
                "[RPC_DECODE] malformed PredictRequest: {}",
                e
            )))
        }
    };

    match state.rpc.predict(tonic::Request::new(request)).await {
        Ok(reply) => (
            StatusCode::OK,
            grpc_headers(Code::Ok, None),
            reply.into_inner().encode_to_vec(),
        )
            .into_response(),
        Err(status) => status_response(&status),
    }
}
