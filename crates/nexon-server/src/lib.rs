//! Nexon Server - REST and RPC front ends for the inference core
//!
//! Both front ends translate their wire payloads into the protocol-neutral
//! [`TensorRequest`](nexon_core::TensorRequest) and share one
//! [`InferenceOrchestrator`](nexon_core::InferenceOrchestrator), so the same
//! request yields the same output tensor bytes over either protocol.

/// Version of the nexon-server crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod rpc;
pub mod server;

// Re-export commonly used types
pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use rpc::InferenceRpc;
pub use server::{create_router, NexonServer, ServerState};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        config::*,
        error::*,
        rpc::{InferenceRpc, PredictReply, PredictRequest},
        server::*,
    };
}
