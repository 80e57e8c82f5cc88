use axum::{extract::State, Json};
use chrono::Utc;
use serde_json::json;

use crate::{models::HealthResponse, server::AppState};

pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let kv_ok = state.kv.get("health:ping").await.is_ok();
    let bus_ok = state.bus.is_configured();
    let provider_ok = state.provider.is_configured();

    Json(HealthResponse {
        status: if kv_ok { "healthy".to_string() } else { "degraded".to_string() },
        service: state.config.service_name.clone(),
        version: state.config.version.clone(),
        timestamp: Utc::now(),
        components: Some(json!({ "kv": kv_ok, "bus": bus_ok, "provider": provider_ok })),
    })
}

pub async fn liveness() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "timestamp": Utc::now().to_rfc3339() }))
}
