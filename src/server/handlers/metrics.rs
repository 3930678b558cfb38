use std::sync::Arc;

use axum::extract::State;
use axum::Json;

use crate::metrics::MetricsSnapshot;
use crate::server::state::AppState;

pub async fn get_metrics(State(state): State<Arc<AppState>>) -> Json<MetricsSnapshot> {
    Json(state.engine.metrics().snapshot())
}
