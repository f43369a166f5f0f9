//! Inference orchestrator
//!
//! Protocol-neutral request path shared by every front end:
//! validate the request, resolve deployment status, lease a session, check
//! the request against the model signature, execute, and map every failure
//! into [`InferenceError`]. The lease is a drop guard, so it is released on
//! every exit path including a runtime panic.

use nexon_tensor::{Tensor, WireTensor};
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, instrument, warn};

use crate::cache::{CacheError, CacheStats, SessionCache, SessionLease};
use crate::config::{CacheConfig, OrchestratorConfig};
use crate::loader::{LoadError, StoreSessionLoader};
use crate::runtime::{Runtime, RuntimeError};
use crate::store::{DeploymentStatus, ModelStore, StoreError};
use crate::InferenceError;

/// Request tensor as handed over by a protocol adapter
pub type TensorRequest = WireTensor;

/// Ordered output tensors of one prediction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorResponse {
    pub outputs: Vec<WireTensor>,
}

impl TensorResponse {
    pub fn first(&self) -> Option<&WireTensor> {
        self.outputs.first()
    }
}

pub struct InferenceOrchestrator {
    store: Arc<dyn ModelStore>,
    cache: SessionCache,
    config: OrchestratorConfig,
}

impl InferenceOrchestrator {
    pub fn new(store: Arc<dyn ModelStore>, cache: SessionCache, config: OrchestratorConfig) -> Self {
        Self { store, cache, config }
    }

    /// Build the orchestrator together with a store-backed cache
    pub fn with_runtime(
        store: Arc<dyn ModelStore>,
        runtime: Arc<dyn Runtime>,
        cache_config: CacheConfig,
        config: OrchestratorConfig,
    ) -> Self {
        let loader = Arc::new(StoreSessionLoader::new(Arc::clone(&store), runtime));
        let cache = SessionCache::new(cache_config, loader);
        Self::new(store, cache, config)
    }

    pub fn cache(&self) -> &SessionCache {
        &self.cache
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Retire the cached session for `model_name`
    pub fn invalidate(&self, model_name: &str) -> bool {
        self.cache.invalidate(model_name)
    }

    /// Store reachability; does not depend on anything being cached
    pub async fn is_ready(&self) -> bool {
        !self.cache.is_shutting_down() && self.store.ping().await
    }

    pub fn shutdown(&self) {
        self.cache.shutdown();
    }

    #[instrument(skip(self, model_name, request), fields(model = %model_name))]
    pub async fn predict(&self, model_name: &str, request: TensorRequest) -> Result<TensorResponse, InferenceError> {
        let result = self.predict_inner(model_name, request).await;
        match &result {
            Ok(response) => debug!(outputs = response.outputs.len(), "Prediction succeeded"),
            Err(e @ InferenceError::Internal { .. }) => {
                error!(code = e.code(), error = %e, "Prediction failed")
            }
            Err(e) => debug!(kind = %e.kind(), code = e.code(), "Prediction rejected"),
        }
        result
    }

    async fn predict_inner(&self, model_name: &str, request: TensorRequest) -> Result<TensorResponse, InferenceError> {
        if model_name.trim().is_empty() {
            return Err(InferenceError::invalid_argument(
                "MODEL_NAME_EMPTY",
                "model name must be non-empty",
            ));
        }

        request.validate()?;
        let tensor = request.decode()?;

        if self.config.verify_deployment {
            self.check_deployment(model_name).await?;
        }

        let lease = self.cache.acquire(model_name).await.map_err(|e| map_cache_error(model_name, e))?;
        check_signature(&lease, &tensor)?;

        let outputs = self.execute(lease, tensor).await?;
        if outputs.is_empty() {
            return Err(InferenceError::internal(
                "MODEL_NO_OUTPUT",
                format!("model '{}' produced no outputs", model_name),
            ));
        }

        let outputs = if self.config.all_outputs {
            outputs.iter().map(Tensor::to_wire).collect()
        } else {
            outputs.iter().take(1).map(Tensor::to_wire).collect()
        };
        Ok(TensorResponse { outputs })
    }

    async fn check_deployment(&self, model_name: &str) -> Result<(), InferenceError> {
        match self.store.model_status(model_name).await {
            Ok(DeploymentStatus::Deployed) => Ok(()),
            Ok(DeploymentStatus::NotUploaded) | Err(StoreError::NotFound(_)) => Err(not_found(model_name)),
            Ok(DeploymentStatus::Uploaded) => {
                if self.cache.invalidate(model_name) {
                    debug!("Retired cached session of undeployed model");
                }
                Err(not_deployed(model_name))
            }
            Err(StoreError::Unavailable(message)) => {
                warn!(error = %message, "Model store unavailable");
                Err(InferenceError::unavailable("STORE_UNAVAILABLE", message))
            }
            Err(other) => Err(InferenceError::internal(other.code(), other.to_string())),
        }
    }

    async fn execute(&self, lease: SessionLease, tensor: Tensor) -> Result<Vec<Tensor>, InferenceError> {
        let result = if self.config.blocking_execution {
            // The lease moves into the closure and drops with it, panic or not
            tokio::task::spawn_blocking(move || lease.session().run(&tensor))
                .await
                .map_err(|e| {
                    InferenceError::internal(
                        "RUNTIME_PANIC",
                        if e.is_panic() {
                            "model runtime panicked".to_string()
                        } else {
                            "model execution was cancelled".to_string()
                        },
                    )
                })?
        } else {
            std::panic::catch_unwind(AssertUnwindSafe(|| lease.session().run(&tensor)))
                .map_err(|_| InferenceError::internal("RUNTIME_PANIC", "model runtime panicked"))?
        };

        result.map_err(|e: RuntimeError| InferenceError::internal(e.code(), e.to_string()))
    }
}

fn not_found(model_name: &str) -> InferenceError {
    InferenceError::not_found("MODEL_NOT_FOUND", format!("model '{}' does not exist", model_name))
}

fn not_deployed(model_name: &str) -> InferenceError {
    InferenceError::failed_precondition(
        "MODEL_NOT_DEPLOYED",
        format!("model '{}' is not deployed", model_name),
    )
}

fn map_cache_error(model_name: &str, err: CacheError) -> InferenceError {
    match err {
        CacheError::LoadFailed(LoadError::NotFound(_)) => not_found(model_name),
        CacheError::LoadFailed(LoadError::NotDeployed(_)) => not_deployed(model_name),
        CacheError::LoadFailed(LoadError::StoreUnavailable(message)) => {
            InferenceError::unavailable("STORE_UNAVAILABLE", message)
        }
        CacheError::LoadFailed(other) => InferenceError::internal(other.code(), other.to_string()),
        CacheError::Unavailable(message) => InferenceError::unavailable("CACHE_UNAVAILABLE", message),
    }
}

fn check_signature(lease: &SessionLease, tensor: &Tensor) -> Result<(), InferenceError> {
    let Some(spec) = lease.signature().inputs.first() else {
        return Ok(());
    };

    if let Some(name) = tensor.name() {
        if name != spec.name {
            return Err(InferenceError::invalid_argument(
                "INPUT_NAME_MISMATCH",
                format!("input name '{}' does not match model input '{}'", name, spec.name),
            ));
        }
    }

    if tensor.dtype() != spec.dtype {
        return Err(InferenceError::invalid_argument(
            "INPUT_DTYPE_MISMATCH",
            format!("input dtype {} does not match model input dtype {}", tensor.dtype(), spec.dtype),
        ));
    }

    if !spec.accepts(tensor.shape()) {
        return Err(InferenceError::invalid_argument(
            "INPUT_SHAPE_MISMATCH",
            format!(
                "input shape {} does not match model input shape {}",
                tensor.shape(),
                spec.dims_display()
            ),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::ReferenceRuntime;
    use crate::store::InMemoryModelStore;
    use crate::ErrorKind;
    use nexon_tensor::{DType, Shape, TensorData};

    const SIGMOID: &[u8] = b"op = \"sigmoid\"\n[input]\nname = \"x\"\ndtype = \"float32\"\ndims = [3, 4, 5]\n[output]\nname = \"y\"\n";

    fn orchestrator() -> (InferenceOrchestrator, Arc<InMemoryModelStore>) {
        let store = Arc::new(InMemoryModelStore::new());
        store.upload_and_deploy("sigmoid", SIGMOID.to_vec()).unwrap();
        let orchestrator = InferenceOrchestrator::with_runtime(
            store.clone(),
            Arc::new(ReferenceRuntime::new()),
            CacheConfig::default(),
            OrchestratorConfig::default(),
        );
        (orchestrator, store)
    }

    fn float_request(dims: Vec<usize>) -> TensorRequest {
        let numel = dims.iter().product();
        Tensor::new(Shape::new(dims), TensorData::Float32(vec![0.0; numel]))
            .unwrap()
            .to_wire()
    }

    #[tokio::test]
    async fn test_empty_model_name() {
        let (orchestrator, _) = orchestrator();
        let err = orchestrator.predict("  ", float_request(vec![3, 4, 5])).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(err.code(), "MODEL_NAME_EMPTY");
    }

    #[tokio::test]
    async fn test_signature_mismatches() {
        let (orchestrator, _) = orchestrator();

        let err = orchestrator.predict("sigmoid", float_request(vec![5, 4, 3])).await.unwrap_err();
        assert_eq!(err.code(), "INPUT_SHAPE_MISMATCH");

        let ints = Tensor::new(Shape::new(vec![3, 4, 5]), TensorData::Int32(vec![0; 60])).unwrap();
        let err = orchestrator.predict("sigmoid", ints.to_wire()).await.unwrap_err();
        assert_eq!(err.code(), "INPUT_DTYPE_MISMATCH");

        let named = float_request(vec![3, 4, 5]).with_name("input_0");
        let err = orchestrator.predict("sigmoid", named).await.unwrap_err();
        assert_eq!(err.code(), "INPUT_NAME_MISMATCH");

        assert_eq!(orchestrator.cache().ref_count("sigmoid"), Some(0));
    }

    #[tokio::test]
    async fn test_undeploy_invalidates_cached_session() {
        let (orchestrator, store) = orchestrator();
        orchestrator.predict("sigmoid", float_request(vec![3, 4, 5])).await.unwrap();
        assert!(orchestrator.cache().contains("sigmoid"));

        store.undeploy("sigmoid", 1).unwrap();
        let err = orchestrator.predict("sigmoid", float_request(vec![3, 4, 5])).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FailedPrecondition);
        assert!(!orchestrator.cache().contains("sigmoid"));
    }

    #[tokio::test]
    async fn test_store_outage_is_unavailable() {
        let (orchestrator, store) = orchestrator();
        assert!(orchestrator.is_ready().await);
        store.set_reachable(false);
        assert!(!orchestrator.is_ready().await);
        let err = orchestrator.predict("sigmoid", float_request(vec![3, 4, 5])).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unavailable);
    }

    #[tokio::test]
    async fn test_unverified_path_maps_load_errors() {
        let store = Arc::new(InMemoryModelStore::new());
        store.upload("staged", SIGMOID.to_vec()).unwrap();
        let orchestrator = InferenceOrchestrator::with_runtime(
            store,
            Arc::new(ReferenceRuntime::new()),
            CacheConfig::default(),
            OrchestratorConfig {
                verify_deployment: false,
                blocking_execution: false,
                all_outputs: false,
            },
        );

        let err = orchestrator.predict("staged", float_request(vec![3, 4, 5])).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FailedPrecondition);
        let err = orchestrator.predict("ghost", float_request(vec![3, 4, 5])).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_string_request_against_float_model() {
        let (orchestrator, _) = orchestrator();
        let strings = Tensor::new(Shape::new(vec![1]), TensorData::String(vec!["hi".into()])).unwrap();
        let err = orchestrator.predict("sigmoid", strings.to_wire()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(strings.dtype(), DType::String);
    }
}
