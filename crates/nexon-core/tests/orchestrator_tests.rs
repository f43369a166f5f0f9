//! End-to-end tests for the inference orchestrator against the in-memory
//! store and the reference runtime

mod common;

use common::{float_request, CountingRuntime, Fault, FaultyRuntime, SIGMOID};
use nexon_core::prelude::*;
use nexon_core::runtime::Runtime;
use std::sync::Arc;
use std::time::Duration;

fn build(runtime: Arc<dyn Runtime>, config: OrchestratorConfig) -> (Arc<InferenceOrchestrator>, Arc<InMemoryModelStore>) {
    let store = Arc::new(InMemoryModelStore::new());
    store.upload_and_deploy("sigmoid", SIGMOID.as_bytes().to_vec()).unwrap();
    store
        .upload("uploaded_not_deployed_model", SIGMOID.as_bytes().to_vec())
        .unwrap();
    let orchestrator = InferenceOrchestrator::with_runtime(store.clone(), runtime, CacheConfig::default(), config);
    (Arc::new(orchestrator), store)
}

fn reference() -> (Arc<InferenceOrchestrator>, Arc<InMemoryModelStore>) {
    build(Arc::new(ReferenceRuntime::new()), OrchestratorConfig::default())
}

#[tokio::test]
async fn test_scenario_a_well_formed_request() {
    let (orchestrator, _) = reference();
    let response = orchestrator.predict("sigmoid", float_request(&[3, 4, 5])).await.unwrap();

    assert_eq!(response.outputs.len(), 1);
    let output = response.first().unwrap();
    assert_eq!(output.dims, vec![3, 4, 5]);
    assert_eq!(output.dtype, DType::Float32);
    assert_eq!(output.name.as_deref(), Some("y"));
    assert_eq!(output.content.len(), 60 * 4);

    let tensor = output.decode().unwrap();
    match tensor.data() {
        TensorData::Float32(values) => {
            assert!((values[0] - 0.5).abs() < 1e-6);
            assert!(values.iter().all(|v| *v > 0.0 && *v < 1.0));
        }
        other => panic!("unexpected output {:?}", other),
    }
}

#[tokio::test]
async fn test_scenario_b_wrong_dims() {
    let (orchestrator, _) = reference();
    let mut request = float_request(&[3, 4, 5]);
    request.dims = vec![9, 9, 9];

    let err = orchestrator.predict("sigmoid", request).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert_eq!(err.code(), "TENSOR_CONTENT_LENGTH");
    // Rejected before any session was loaded
    assert_eq!(orchestrator.cache_stats().loads, 0);
}

#[tokio::test]
async fn test_scenario_c_not_deployed() {
    let (orchestrator, _) = reference();
    let err = orchestrator
        .predict("uploaded_not_deployed_model", float_request(&[3, 4, 5]))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FailedPrecondition);
}

#[tokio::test]
async fn test_scenario_d_unknown_model() {
    let (orchestrator, _) = reference();
    let err = orchestrator
        .predict("does_not_exist", float_request(&[1]))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_scenario_e_cold_model_under_concurrency() {
    let runtime = Arc::new(CountingRuntime::with_delay(Duration::from_millis(100)));
    let (orchestrator, _) = build(runtime.clone(), OrchestratorConfig::default());
    let size_before = orchestrator.cache_stats().size;

    let mut handles = Vec::new();
    for _ in 0..50 {
        let orchestrator = Arc::clone(&orchestrator);
        handles.push(tokio::spawn(async move {
            orchestrator.predict("sigmoid", float_request(&[3, 4, 5])).await
        }));
    }

    for handle in handles {
        let response = handle.await.unwrap().unwrap();
        assert_eq!(response.outputs[0].dims, vec![3, 4, 5]);
    }

    assert_eq!(runtime.count(), 1);
    let stats = orchestrator.cache_stats();
    assert_eq!(stats.loads, 1);
    assert_eq!(stats.size, size_before + 1);
    assert_eq!(orchestrator.cache().ref_count("sigmoid"), Some(0));
}

#[tokio::test]
async fn test_lease_released_on_runtime_error() {
    let (orchestrator, _) = build(Arc::new(FaultyRuntime(Fault::Error)), OrchestratorConfig::default());
    let err = orchestrator.predict("sigmoid", float_request(&[3, 4, 5])).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Internal);
    assert_eq!(err.code(), "RUNTIME_EXECUTION_FAILED");
    assert_eq!(orchestrator.cache().ref_count("sigmoid"), Some(0));
}

#[tokio::test]
async fn test_lease_released_on_missing_output() {
    let (orchestrator, _) = build(Arc::new(FaultyRuntime(Fault::NoOutput)), OrchestratorConfig::default());
    let err = orchestrator.predict("sigmoid", float_request(&[2])).await.unwrap_err();
    assert_eq!(err.code(), "MODEL_NO_OUTPUT");
    assert_eq!(orchestrator.cache().ref_count("sigmoid"), Some(0));
}

#[tokio::test]
async fn test_lease_released_on_panic() {
    for blocking_execution in [true, false] {
        let config = OrchestratorConfig {
            blocking_execution,
            ..OrchestratorConfig::default()
        };
        let (orchestrator, _) = build(Arc::new(FaultyRuntime(Fault::Panic)), config);
        let err = orchestrator.predict("sigmoid", float_request(&[3])).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert_eq!(err.code(), "RUNTIME_PANIC");
        assert_eq!(orchestrator.cache().ref_count("sigmoid"), Some(0));

        // The session stays usable for the next caller
        assert!(orchestrator.predict("sigmoid", float_request(&[3])).await.is_err());
        assert_eq!(orchestrator.cache_stats().loads, 1);
    }
}

#[tokio::test]
async fn test_redeploy_picks_up_new_version() {
    let (orchestrator, store) = reference();
    orchestrator.predict("sigmoid", float_request(&[3, 4, 5])).await.unwrap();

    let relu = b"op = \"relu\"\n[input]\nname = \"x\"\ndims = [-1]\n".to_vec();
    let version = store.upload("sigmoid", relu).unwrap().version;
    store.undeploy("sigmoid", 1).unwrap();
    store.deploy("sigmoid", version).unwrap();
    orchestrator.invalidate("sigmoid");

    let response = orchestrator.predict("sigmoid", float_request(&[4])).await.unwrap();
    assert_eq!(response.outputs[0].dims, vec![4]);
    assert_eq!(orchestrator.cache_stats().loads, 2);
}

#[tokio::test]
async fn test_readiness_independent_of_cache() {
    let (orchestrator, store) = reference();
    assert!(orchestrator.cache().is_empty());
    assert!(orchestrator.is_ready().await);

    store.set_reachable(false);
    assert!(!orchestrator.is_ready().await);
    let err = orchestrator.predict("sigmoid", float_request(&[3, 4, 5])).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unavailable);
    assert!(err.kind().is_retryable());
}

#[tokio::test]
async fn test_shutdown_rejects_predictions() {
    let (orchestrator, _) = reference();
    orchestrator.predict("sigmoid", float_request(&[3, 4, 5])).await.unwrap();
    orchestrator.shutdown();

    assert!(!orchestrator.is_ready().await);
    let err = orchestrator.predict("sigmoid", float_request(&[3, 4, 5])).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unavailable);
    assert_eq!(err.code(), "CACHE_UNAVAILABLE");
}

#[tokio::test]
async fn test_all_outputs_flag() {
    let config = OrchestratorConfig {
        all_outputs: true,
        ..OrchestratorConfig::default()
    };
    let (orchestrator, _) = build(Arc::new(ReferenceRuntime::new()), config);
    let response = orchestrator.predict("sigmoid", float_request(&[3, 4, 5])).await.unwrap();
    assert_eq!(response.outputs.len(), 1);
}
