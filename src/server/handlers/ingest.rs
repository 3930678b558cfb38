use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::server::error::{bad_request, ApiError};
use crate::server::handlers::incidents::incident_response;
use crate::server::state::AppState;

#[derive(Debug, Deserialize)]
pub struct IngestQuery {
    /// Optional batch-level source profile hint.
    pub source: Option<String>,
}

pub async fn ingest(
    State(state): State<Arc<AppState>>,
    Query(query): Query<IngestQuery>,
    Json(body): Json<Value>,
) -> Response {
    let Some(batch) = body.as_array() else {
        return bad_request("request body must be a JSON array of events");
    };
    if batch.is_empty() {
        return bad_request("no events provided");
    }

    let report = match state.engine.ingest(batch, query.source.as_deref()) {
        Ok(report) => report,
        Err(err) => return ApiError(err).into_response(),
    };

    let incidents: Vec<Value> = report
        .incidents
        .iter()
        .map(|incident| incident_response(&state.engine, incident))
        .collect();

    Json(json!({
        "run_id": report.run_id,
        "event_count": report.event_count,
        "normalization_status": report.normalization_status,
        "detection_status": report.detection_status,
        "incident_count": report.incident_count,
        "incidents": incidents,
    }))
    .into_response()
}
