use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::EngineError;
use crate::models::{Incident, IncidentStatus};
use crate::server::error::ApiResult;
use crate::server::state::AppState;
use crate::Engine;

/// Incident plus the derived `is_stale` flag.
pub(crate) fn incident_response(engine: &Engine, incident: &Incident) -> Value {
    let mut value = serde_json::to_value(incident).unwrap_or_else(|_| json!({}));
    if let Some(obj) = value.as_object_mut() {
        obj.insert(
            "is_stale".into(),
            Value::Bool(engine.registry().is_stale(incident)),
        );
    }
    value
}

pub async fn list_incidents(State(state): State<Arc<AppState>>) -> Json<Value> {
    let incidents = state.engine.registry().list();
    let rendered: Vec<Value> = incidents
        .iter()
        .map(|incident| incident_response(&state.engine, incident))
        .collect();
    Json(json!({
        "incident_count": rendered.len(),
        "incidents": rendered,
    }))
}

pub async fn get_incident(
    State(state): State<Arc<AppState>>,
    Path(incident_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let incident = state
        .engine
        .registry()
        .get(&incident_id)
        .ok_or_else(|| EngineError::NotFound(format!("incident {incident_id}")))?;
    Ok(Json(incident_response(&state.engine, &incident)))
}

#[derive(Debug, Deserialize)]
pub struct IncidentPatchRequest {
    pub status: IncidentStatus,
    #[serde(default)]
    pub resolution_reason: Option<String>,
}

pub async fn patch_incident(
    State(state): State<Arc<AppState>>,
    Path(incident_id): Path<String>,
    Json(payload): Json<IncidentPatchRequest>,
) -> ApiResult<Json<Value>> {
    let updated = state.engine.transition_incident(
        &incident_id,
        payload.status,
        payload.resolution_reason,
    )?;
    Ok(Json(incident_response(&state.engine, &updated)))
}
