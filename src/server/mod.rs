//! HTTP surface
//!
//! JSON API over the engine: ingest, run retrieval, incident lifecycle,
//! entity risk and metrics. The framing layer is deliberately thin; all
//! behavior lives in the core components.

pub mod error;
pub mod handlers;
pub mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::Engine;
use state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Ingest
        .route("/ingest/", post(handlers::ingest::ingest))
        // Run artifacts
        .route("/runs/", get(handlers::runs::list_runs))
        .route("/runs/{run_id}/meta", get(handlers::runs::get_meta))
        .route("/runs/{run_id}/normalized", get(handlers::runs::get_normalized))
        .route("/runs/{run_id}/incidents", get(handlers::runs::get_incidents))
        // Incident registry
        .route("/incidents/", get(handlers::incidents::list_incidents))
        .route(
            "/incidents/{incident_id}",
            get(handlers::incidents::get_incident).patch(handlers::incidents::patch_incident),
        )
        // Derived views
        .route("/entity-risk/", get(handlers::entity_risk::get_entity_risk))
        .route("/metrics/", get(handlers::metrics::get_metrics))
        .route("/health", get(handlers::health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until the process is stopped.
pub async fn serve(engine: Engine) -> anyhow::Result<()> {
    let bind = engine.config().server.bind.clone();
    let port = engine.config().server.port;

    let state = Arc::new(AppState::new(engine));
    let app = router(state);

    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    info!("authsift API listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
