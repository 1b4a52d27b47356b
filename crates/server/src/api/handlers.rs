use axum::{
    extract::State,
    http::header,
    response::IntoResponse,
    Json,
};
use photozip_core::SanitizedConfig;
use serde::Serialize;
use std::sync::Arc;

use crate::metrics::{collect_dynamic_metrics, encode_metrics};
use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    /// "running", "stopped" or "disabled"
    pub dispatcher: String,
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let dispatcher = match state.dispatcher() {
        Some(d) if d.is_running() => "running",
        Some(_) => "stopped",
        None => "disabled",
    };
    Json(HealthResponse {
        status: "ok".to_string(),
        dispatcher: dispatcher.to_string(),
    })
}

pub async fn get_config(State(state): State<Arc<AppState>>) -> Json<SanitizedConfig> {
    Json(state.sanitized_config())
}

/// Prometheus scrape endpoint.
pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    collect_dynamic_metrics(&state).await;
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        encode_metrics(),
    )
}
