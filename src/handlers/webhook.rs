//! Inbound webhook endpoint: `POST /helius-webhook`. Acknowledges
//! receipt with HTTP 200 before the batch is classified and fanned out —
//! processing failures after that point are visible only in logs, never
//! surfaced back to the caller. Accepted as intentional: the provider
//! retries independently on its own heuristics.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde_json::json;

use crate::server::AppState;
use crate::webhook::WebhookBatch;

pub async fn handle_webhook(State(state): State<AppState>, body: Bytes) -> (StatusCode, Json<serde_json::Value>) {
    let batch: WebhookBatch = match serde_json::from_slice(&body) {
        Ok(batch) => batch,
        Err(err) => {
            tracing::error!(error = %err, "pre-dispatch error decoding webhook payload");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "success": false,
                    "message": err.to_string(),
                    "timestamp": Utc::now().to_rfc3339(),
                })),
            );
        }
    };

    let batch_size = batch.len();
    if !batch.is_empty() {
        let dispatcher = state.dispatcher.clone();
        tokio::spawn(async move {
            dispatcher.process_batch(batch).await;
        });
    }

    (
        StatusCode::OK,
        Json(json!({
            "success": true,
            "message": format!("accepted {batch_size} transactions"),
            "timestamp": Utc::now().to_rfc3339(),
        })),
    )
}
