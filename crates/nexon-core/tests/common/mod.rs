//! Shared fixtures for nexon-core integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use nexon_core::runtime::{ModelSession, Runtime, RuntimeError, SessionSignature, TensorSpec};
use nexon_core::{LoadError, ReferenceRuntime, SessionLoader};
use nexon_tensor::{DType, Shape, Tensor, TensorData, WireTensor};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const SIGMOID: &str = r#"
op = "sigmoid"

[input]
name = "x"
dtype = "float32"
dims = [3, 4, 5]

[output]
name = "y"
"#;

/// Route cache and orchestrator logs to the test harness; `RUST_LOG` selects the level
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn float_request(dims: &[usize]) -> WireTensor {
    let numel = dims.iter().product();
    let values = (0..numel).map(|i| i as f32 / 10.0).collect();
    Tensor::new(Shape::from_slice(dims), TensorData::Float32(values))
        .unwrap()
        .to_wire()
}

/// Reference runtime that counts initializations and can be slowed down
#[derive(Default)]
pub struct CountingRuntime {
    pub initializations: AtomicUsize,
    pub delay: Duration,
}

impl CountingRuntime {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            initializations: AtomicUsize::new(0),
            delay,
        }
    }

    pub fn count(&self) -> usize {
        self.initializations.load(Ordering::SeqCst)
    }
}

impl Runtime for CountingRuntime {
    fn initialize(&self, model: &str, bytes: &[u8]) -> Result<Box<dyn ModelSession>, RuntimeError> {
        self.initializations.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        ReferenceRuntime::new().initialize(model, bytes)
    }
}

/// How a [`FaultySession`] misbehaves on `run`
#[derive(Debug, Clone, Copy)]
pub enum Fault {
    Error,
    Panic,
    NoOutput,
}

pub struct FaultySession {
    signature: SessionSignature,
    fault: Fault,
}

impl ModelSession for FaultySession {
    fn signature(&self) -> &SessionSignature {
        &self.signature
    }

    fn run(&self, _input: &Tensor) -> Result<Vec<Tensor>, RuntimeError> {
        match self.fault {
            Fault::Error => Err(RuntimeError::Execution("kernel exploded".to_string())),
            Fault::Panic => panic!("session run panicked"),
            Fault::NoOutput => Ok(Vec::new()),
        }
    }

    fn close(&self) {}
}

/// Runtime whose sessions fail on every run
pub struct FaultyRuntime(pub Fault);

impl Runtime for FaultyRuntime {
    fn initialize(&self, _model: &str, _bytes: &[u8]) -> Result<Box<dyn ModelSession>, RuntimeError> {
        Ok(Box::new(FaultySession {
            signature: SessionSignature {
                inputs: vec![TensorSpec {
                    name: "x".to_string(),
                    dtype: DType::Float32,
                    dims: None,
                }],
                outputs: Vec::new(),
            },
            fault: self.0,
        }))
    }
}

/// Session that records how often it was closed
pub struct TrackedSession {
    signature: SessionSignature,
    closes: Arc<AtomicUsize>,
}

impl ModelSession for TrackedSession {
    fn signature(&self) -> &SessionSignature {
        &self.signature
    }

    fn run(&self, input: &Tensor) -> Result<Vec<Tensor>, RuntimeError> {
        Ok(vec![input.clone()])
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Loader with a configurable async delay; names starting with `fail`
/// fail to load
#[derive(Default)]
pub struct ScriptedLoader {
    pub loads: AtomicUsize,
    pub closes: Arc<AtomicUsize>,
    pub delay: Duration,
}

impl ScriptedLoader {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionLoader for ScriptedLoader {
    async fn load(&self, model: &str) -> Result<Box<dyn ModelSession>, LoadError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if model.starts_with("fail") {
            return Err(LoadError::Store(format!("cannot fetch '{}'", model)));
        }
        Ok(Box::new(TrackedSession {
            signature: SessionSignature::default(),
            closes: Arc::clone(&self.closes),
        }))
    }
}

/// Loader whose loads block until the test opens the gate
pub struct GatedLoader {
    pub loads: AtomicUsize,
    pub closes: Arc<AtomicUsize>,
    gate: tokio::sync::Semaphore,
    started: tokio::sync::Notify,
}

impl Default for GatedLoader {
    fn default() -> Self {
        Self {
            loads: AtomicUsize::new(0),
            closes: Arc::new(AtomicUsize::new(0)),
            gate: tokio::sync::Semaphore::new(0),
            started: tokio::sync::Notify::new(),
        }
    }
}

impl GatedLoader {
    /// Wait until a load has entered the loader
    pub async fn load_started(&self) {
        self.started.notified().await;
    }

    /// Let `n` blocked or future loads finish
    pub fn open(&self, n: usize) {
        self.gate.add_permits(n);
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionLoader for GatedLoader {
    async fn load(&self, model: &str) -> Result<Box<dyn ModelSession>, LoadError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.started.notify_one();
        self.gate
            .acquire()
            .await
            .map_err(|e| LoadError::Store(format!("gate closed for '{}': {}", model, e)))?
            .forget();
        Ok(Box::new(TrackedSession {
            signature: SessionSignature::default(),
            closes: Arc::clone(&self.closes),
        }))
    }
}
