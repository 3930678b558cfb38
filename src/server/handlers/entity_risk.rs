use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde_json::{json, Value};

use crate::models::ts;
use crate::risk::{BRUTE_FORCE_WEIGHT, CREDENTIAL_ABUSE_WEIGHT, DECAY_HALF_LIFE_HOURS};
use crate::server::state::AppState;

pub async fn get_entity_risk(State(state): State<Arc<AppState>>) -> Json<Value> {
    let rows = state.engine.entity_risk();
    Json(json!({
        "generated_at": ts::format(&Utc::now()),
        "decay_half_life_hours": DECAY_HALF_LIFE_HOURS,
        "increment_weights": {
            "brute_force": BRUTE_FORCE_WEIGHT,
            "credential_abuse": CREDENTIAL_ABUSE_WEIGHT,
        },
        "entities": rows,
    }))
}
