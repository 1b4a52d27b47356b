//! Zip request submission, gated by the admission controller.

use axum::{
    extract::{Query, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use photozip_core::{publish_zip_request, AdmissionOutcome, AuditEvent};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use super::middleware::ClientIp;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ZipParams {
    /// Comma-separated tag list
    pub tags: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ZipResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RateLimitedResponse {
    pub error: String,
    pub retry_after_secs: u64,
}

fn rate_limit_headers(limit: u32, outcome: &AdmissionOutcome) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        HeaderName::from_static("x-ratelimit-limit"),
        HeaderValue::from(limit),
    );
    if let Some(remaining) = outcome.remaining() {
        headers.insert(
            HeaderName::from_static("x-ratelimit-remaining"),
            HeaderValue::from(remaining),
        );
    }
    if let Some(retry_after) = outcome.retry_after_secs() {
        headers.insert(axum::http::header::RETRY_AFTER, HeaderValue::from(retry_after));
    }
    headers
}

fn failure(status: StatusCode, headers: HeaderMap, message: String) -> Response {
    (
        status,
        headers,
        Json(ZipResponse {
            success: false,
            message,
            tags: None,
            message_id: None,
        }),
    )
        .into_response()
}

/// Queue a zip request for `?tags=`.
pub async fn submit_zip(
    State(state): State<Arc<AppState>>,
    ClientIp(client): ClientIp,
    Query(params): Query<ZipParams>,
) -> Response {
    let admission = state.admission();
    let outcome = admission.check(&client);
    let headers = rate_limit_headers(admission.limit(), &outcome);

    if let Some(retry_after_secs) = outcome.retry_after_secs() {
        return (
            StatusCode::TOO_MANY_REQUESTS,
            headers,
            Json(RateLimitedResponse {
                error: "Too many requests".to_string(),
                retry_after_secs,
            }),
        )
            .into_response();
    }

    let Some(tags) = params.tags.filter(|t| !t.trim().is_empty()) else {
        return failure(
            StatusCode::BAD_REQUEST,
            headers,
            "Missing required query parameter: tags".to_string(),
        );
    };

    match publish_zip_request(state.publisher(), &tags).await {
        Ok(message_id) => {
            info!(tags = %tags, client = %client, message_id = %message_id, "Zip request accepted");
            state
                .audit()
                .emit(AuditEvent::ZipRequestPublished {
                    tags: tags.clone(),
                    message_id: message_id.clone(),
                })
                .await;
            (
                StatusCode::ACCEPTED,
                headers,
                Json(ZipResponse {
                    success: true,
                    message: "Zip request queued".to_string(),
                    tags: Some(tags),
                    message_id: Some(message_id),
                }),
            )
                .into_response()
        }
        Err(e) => {
            warn!(tags = %tags, error = %e, "Failed to publish zip request");
            failure(
                StatusCode::SERVICE_UNAVAILABLE,
                headers,
                format!("Failed to queue zip request: {}", e),
            )
        }
    }
}
