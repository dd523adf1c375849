//! API route definitions.

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};

use super::state::AppState;
use crate::events::RawRecord;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/detect", post(detect))
        .route("/config", get(config))
}

async fn health() -> Json<Value> {
    Json(json!({
        "data": {
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION")
        },
        "meta": {
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "version": env!("CARGO_PKG_VERSION")
        }
    }))
}

async fn detect(State(state): State<AppState>, Json(records): Json<Vec<RawRecord>>) -> Json<Value> {
    tracing::info!(records = records.len(), "detect request");
    let report = state.pipeline.run(&records).await;
    Json(json!({
        "meta": {
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "degraded": report.is_degraded(),
            "schema_mismatch": report.schema_mismatch(),
        },
        "data": report,
    }))
}

async fn config(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "data": state.pipeline.config() }))
}
