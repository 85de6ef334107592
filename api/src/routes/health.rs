// api/src/routes/health.rs

use axum::Json;
use chrono::Utc;
use serde_json::{json, Value};

/// Liveness check, exempt from the API-key gate.
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "timestamp": Utc::now() }))
}
