pub mod entity_risk;
pub mod incidents;
pub mod ingest;
pub mod metrics;
pub mod runs;

use axum::Json;
use serde_json::{json, Value};

pub async fn health() -> Json<Value> {
    Json(json!({"ok": true}))
}
