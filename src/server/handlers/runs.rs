use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde_json::{json, Value};

use crate::runstore::RunMeta;
use crate::server::error::ApiResult;
use crate::server::state::AppState;

pub async fn list_runs(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<String>>> {
    Ok(Json(state.engine.runs().list_runs()?))
}

pub async fn get_meta(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<String>,
) -> ApiResult<Json<RunMeta>> {
    Ok(Json(state.engine.runs().read_meta(&run_id)?))
}

pub async fn get_normalized(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let events = state.engine.runs().read_normalized(&run_id)?;
    Ok(Json(json!({
        "event_count": events.len(),
        "events": events,
    })))
}

pub async fn get_incidents(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let incidents = state.engine.runs().read_incidents(&run_id)?;
    Ok(Json(json!({
        "incident_count": incidents.len(),
        "incidents": incidents,
    })))
}
