//! Server module for the churn service.
//!
//! This module wires the HTTP routes, the job queue, and the training worker pool.

pub mod handlers;

use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use churn_training::{ForestTrainer, ModelRegistry, TracingProgressSink, TrainingHyperParams};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::Config;
use crate::error::Result;
use crate::queue::{InMemoryJobQueue, JobQueue};
use crate::worker::WorkerPool;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<dyn JobQueue>,
    pub registry: ModelRegistry,
    pub uploads_dir: PathBuf,
    pub hyperparams: TrainingHyperParams,
}

/// A running service: handler state plus the worker pool behind it.
pub struct App {
    state: AppState,
    workers: WorkerPool,
    max_upload_bytes: usize,
}

impl App {
    /// Create storage directories, open the registry, and spawn workers.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(config: &Config) -> Result<Self> {
        std::fs::create_dir_all(&config.storage.uploads_dir)?;
        let registry = ModelRegistry::open(config.storage.models_dir.clone())?;

        let queue: Arc<dyn JobQueue> = Arc::new(InMemoryJobQueue::new(config.queue.retry_policy()));
        let trainer = Arc::new(ForestTrainer::new(registry.clone()));
        let workers = WorkerPool::spawn(config.queue.workers, Arc::clone(&queue), trainer, Arc::new(TracingProgressSink));

        info!(
            uploads_dir = %config.storage.uploads_dir.display(),
            models_dir = %config.storage.models_dir.display(),
            workers = workers.size(),
            "Churn service initialized"
        );

        Ok(Self {
            state: AppState {
                queue,
                registry,
                uploads_dir: config.storage.uploads_dir.clone(),
                hyperparams: config.training.clone(),
            },
            workers,
            max_upload_bytes: config.server.max_upload_bytes,
        })
    }

    #[must_use]
    pub fn state(&self) -> &AppState {
        &self.state
    }

    #[must_use]
    pub fn router(&self) -> Router {
        router(self.state.clone(), self.max_upload_bytes)
    }

    /// Stop accepting jobs and wait for running ones.
    pub async fn shutdown(self) {
        self.workers.shutdown().await;
    }
}

/// Build the HTTP router.
pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/train", post(handlers::train))
        .route("/predict", post(handlers::predict))
        .route("/jobs/:id", get(handlers::job_status))
        .route("/models/latest", get(handlers::latest_model))
        .route("/health", get(handlers::health))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
        .with_state(state)
}

/// Start the churn HTTP server and block until Ctrl-C.
///
/// # Errors
///
/// Returns an error if storage cannot be prepared or the server fails to bind.
pub async fn run(config: &Config) -> Result<()> {
    let app = App::start(config)?;
    let listener = TcpListener::bind(config.server.address).await?;
    info!(addr = %listener.local_addr()?, "Starting churn server");

    axum::serve(listener, app.router()).with_graceful_shutdown(shutdown_signal()).await?;

    info!("Server stopped, draining training workers");
    app.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
}
