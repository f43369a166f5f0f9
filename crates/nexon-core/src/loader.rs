//! Session loader
//!
//! Turns a model name into a ready session: resolve deployment status, fetch
//! the bytes of the deployed version, initialize the runtime. Every failure is
//! terminal for the call; retry policy belongs to the caller.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::runtime::{ModelSession, Runtime, RuntimeError};
use crate::store::{DeploymentStatus, ModelStore, StoreError};

/// Why a load failed. Cloned to every waiter of a shared load.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    #[error("Model '{0}' does not exist")]
    NotFound(String),

    #[error("Model '{0}' is not deployed")]
    NotDeployed(String),

    #[error("Model store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Model store error: {0}")]
    Store(String),

    #[error("Runtime initialization failed: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("Load aborted: {0}")]
    Aborted(String),
}

impl LoadError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "LOAD_NOT_FOUND",
            Self::NotDeployed(_) => "LOAD_NOT_DEPLOYED",
            Self::StoreUnavailable(_) => "LOAD_STORE_UNAVAILABLE",
            Self::Store(_) => "LOAD_STORE_ERROR",
            Self::Runtime(_) => "LOAD_RUNTIME_ERROR",
            Self::Aborted(_) => "LOAD_ABORTED",
        }
    }

    fn from_store(model: &str, err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => Self::NotFound(model.to_string()),
            StoreError::Unavailable(msg) => Self::StoreUnavailable(msg),
            other => Self::Store(other.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for LoadError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_panic() {
            Self::Aborted("loader panicked".to_string())
        } else {
            Self::Aborted("loader was cancelled".to_string())
        }
    }
}

/// Produces sessions for cache misses
#[async_trait]
pub trait SessionLoader: Send + Sync {
    async fn load(&self, model: &str) -> Result<Box<dyn ModelSession>, LoadError>;
}

/// Loader backed by a model store and a runtime
pub struct StoreSessionLoader {
    store: Arc<dyn ModelStore>,
    runtime: Arc<dyn Runtime>,
}

impl StoreSessionLoader {
    pub fn new(store: Arc<dyn ModelStore>, runtime: Arc<dyn Runtime>) -> Self {
        Self { store, runtime }
    }
}

#[async_trait]
impl SessionLoader for StoreSessionLoader {
    #[instrument(skip(self), level = "debug")]
    async fn load(&self, model: &str) -> Result<Box<dyn ModelSession>, LoadError> {
        let status = self
            .store
            .model_status(model)
            .await
            .map_err(|e| LoadError::from_store(model, e))?;

        match status {
            DeploymentStatus::Deployed => {}
            DeploymentStatus::NotUploaded => return Err(LoadError::NotFound(model.to_string())),
            DeploymentStatus::Uploaded => return Err(LoadError::NotDeployed(model.to_string())),
        }

        let bytes = self
            .store
            .fetch_model_bytes(model)
            .await
            .map_err(|e| match e {
                // Undeployed between the status check and the fetch
                StoreError::Conflict(_) => LoadError::NotDeployed(model.to_string()),
                other => LoadError::from_store(model, other),
            })?;
        debug!(model = %model, bytes = bytes.len(), "Fetched model bytes");

        let runtime = Arc::clone(&self.runtime);
        let name = model.to_string();
        let session = tokio::task::spawn_blocking(move || runtime.initialize(&name, &bytes)).await??;
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::ReferenceRuntime;
    use crate::store::InMemoryModelStore;

    fn loader(store: Arc<InMemoryModelStore>) -> StoreSessionLoader {
        StoreSessionLoader::new(store, Arc::new(ReferenceRuntime::new()))
    }

    #[tokio::test]
    async fn test_load_failures_are_typed() {
        let store = Arc::new(InMemoryModelStore::new());
        store.upload("staged", b"op = \"identity\"\n[input]\n".to_vec()).unwrap();
        store.upload_and_deploy("broken", b"op = \"explode\"".to_vec()).unwrap();
        let loader = loader(Arc::clone(&store));

        assert_eq!(
            loader.load("missing").await.err().unwrap(),
            LoadError::NotFound("missing".to_string())
        );
        assert_eq!(
            loader.load("staged").await.err().unwrap(),
            LoadError::NotDeployed("staged".to_string())
        );
        assert_eq!(loader.load("broken").await.err().unwrap().code(), "LOAD_RUNTIME_ERROR");

        store.set_reachable(false);
        assert_eq!(loader.load("staged").await.err().unwrap().code(), "LOAD_STORE_UNAVAILABLE");
    }

    #[tokio::test]
    async fn test_load_deployed_model() {
        let store = Arc::new(InMemoryModelStore::new());
        store
            .upload_and_deploy("neg", b"op = \"neg\"\n[input]\nname = \"x\"\n".to_vec())
            .unwrap();
        let session = loader(store).load("neg").await.ok().unwrap();
        assert_eq!(session.signature().inputs[0].name, "x");
    }
}
