//! HTTP API.
//!
//! # Routes
//! - `POST /v1/synthesize`: protocol envelope in, envelope out
//! - `POST /v1/negotiate`: `{"version": "<requirement>"}` → agreed version
//! - `GET /health`: liveness
//! - `GET /admin/status`: full status, bearer token required

pub mod auth;
pub mod handlers;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::manager::Orchestrator;
use self::auth::admin_auth_middleware;

/// State injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

/// Build the router with its middleware layers.
#[allow(deprecated)]
pub fn build_router(orchestrator: Arc<Orchestrator>) -> Router {
    let timeout = Duration::from_secs(orchestrator.config().api.request_timeout_secs);
    let state = AppState { orchestrator };

    let admin = Router::new()
        .route("/admin/status", get(handlers::get_status))
        .route_layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware));

    Router::new()
        .route("/v1/synthesize", post(handlers::synthesize))
        .route("/v1/negotiate", post(handlers::negotiate))
        .route("/health", get(handlers::health))
        .merge(admin)
        .with_state(state)
        .layer(TimeoutLayer::new(timeout))
        .layer(TraceLayer::new_for_http())
}

/// Serve the API until `shutdown` resolves.
pub async fn serve(
    orchestrator: Arc<Orchestrator>,
    listener: TcpListener,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), std::io::Error> {
    let addr = listener.local_addr()?;
    tracing::info!(address = %addr, "API server starting");

    axum::serve(listener, build_router(orchestrator))
        .with_graceful_shutdown(shutdown)
        .await?;

    tracing::info!("API server stopped");
    Ok(())
}
