//! Core server implementation

use crate::{
    config::ServerConfig,
    error::{ServerError, ServerResult},
    handlers, middleware, rpc,
    rpc::InferenceRpc,
};
use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post, put},
    Router,
};
use nexon_core::{InMemoryModelStore, InferenceOrchestrator, ReferenceRuntime, Runtime};
use std::{future::Future, sync::Arc, time::Instant};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Main server state
#[derive(Clone)]
pub struct ServerState {
    pub config: Arc<ServerConfig>,
    pub store: Arc<InMemoryModelStore>,
    pub orchestrator: Arc<InferenceOrchestrator>,
    pub rpc: InferenceRpc,
    pub started_at: Instant,
}

impl ServerState {
    pub fn new(config: ServerConfig, store: Arc<InMemoryModelStore>, runtime: Arc<dyn Runtime>) -> Self {
        let orchestrator = Arc::new(InferenceOrchestrator::with_runtime(
            store.clone(),
            runtime,
            config.cache.clone(),
            config.orchestrator.clone(),
        ));
        Self {
            config: Arc::new(config),
            store,
            rpc: InferenceRpc::new(Arc::clone(&orchestrator)),
            orchestrator,
            started_at: Instant::now(),
        }
    }
}

/// Build the router with all routes and middleware
pub fn create_router(state: ServerState) -> Router {
    let limits = Arc::new(state.config.limits.clone());

    Router::new()
        // Health endpoints
        .route("/health", get(handlers::health::health_check))
        .route("/health/live", get(handlers::health::liveness_check))
        .route("/health/ready", get(handlers::health::readiness_check))
        // Inference endpoints
        .route("/inference/infer/:model_name", post(handlers::inference::infer))
        .route("/rpc/predict", post(rpc::predict_handler))
        // Model registry
        .route("/upload/:name", post(handlers::models::upload_model))
        .route("/deployment/deploy", post(handlers::models::deploy_model))
        .route("/deployment/deploy-file/:name", post(handlers::models::deploy_file))
        .route("/deployment/undeploy/:name", put(handlers::models::undeploy_model))
        .route("/models", get(handlers::models::list_models))
        .route("/models/:name", delete(handlers::models::delete_model))
        .route("/cache/stats", get(handlers::models::cache_stats))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(axum::middleware::from_fn(middleware::logging_middleware))
                .layer(axum::middleware::from_fn_with_state(
                    Arc::clone(&limits),
                    middleware::timeout_middleware,
                ))
                .layer(axum::middleware::from_fn_with_state(
                    Arc::clone(&limits),
                    middleware::request_size_middleware,
                ))
                .layer(DefaultBodyLimit::max(limits.max_body_size)),
        )
        .with_state(state)
}

/// Nexon HTTP server
pub struct NexonServer {
    config: Arc<ServerConfig>,
    state: ServerState,
}

impl NexonServer {
    /// Create a server backed by an empty in-memory store and the reference runtime
    pub fn new(config: ServerConfig) -> ServerResult<Self> {
        Self::with_runtime(config, Arc::new(InMemoryModelStore::new()), Arc::new(ReferenceRuntime::new()))
    }

    pub fn with_runtime(
        config: ServerConfig,
        store: Arc<InMemoryModelStore>,
        runtime: Arc<dyn Runtime>,
    ) -> ServerResult<Self> {
        config.validate().map_err(ServerError::Config)?;
        let state = ServerState::new(config, store, runtime);
        Ok(Self {
            config: Arc::clone(&state.config),
            state,
        })
    }

    /// Deploy every model found in the configured seed directory
    pub async fn seed(&self) -> ServerResult<usize> {
        match &self.config.store.seed_dir {
            Some(dir) => Ok(self.state.store.seed_from_dir(dir).await?),
            None => Ok(0),
        }
    }

    pub fn router(&self) -> Router {
        create_router(self.state.clone())
    }

    /// Serve until `shutdown` resolves, then drain in-flight requests and
    /// shut the session cache down
    pub async fn start<F>(self, shutdown: F) -> ServerResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let seeded = self.seed().await?;
        if seeded > 0 {
            info!(seeded, "Seeded models from disk");
        }

        self.state.orchestrator.cache().start_sweeper();

        let addr = self.config.bind;
        let listener = TcpListener::bind(addr).await?;
        info!("Nexon server listening on {}", addr);

        let served = axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| ServerError::Internal(format!("Server error: {}", e)));

        self.state.orchestrator.shutdown();
        info!("Nexon server stopped");
        served
    }

    /// Get server configuration
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Get server state
    pub fn state(&self) -> &ServerState {
        &self.state
    }
}

/// Run server until Ctrl-C
pub async fn run_server(server: NexonServer) -> ServerResult<()> {
    server.start(shutdown_signal()).await
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received, draining requests"),
        Err(e) => {
            warn!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
    }
}
