use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use photozip_core::JobOutcome;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::state::AppState;

/// Response for the job listing endpoint
#[derive(Debug, Serialize)]
pub struct JobsResponse {
    /// Latest outcome per tag string
    pub jobs: HashMap<String, JobOutcome>,
    pub total: usize,
}

#[derive(Debug, Deserialize)]
pub struct JobStatusParams {
    /// Must match the submitted tag string exactly
    pub tags: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    pub tags: String,
    #[serde(flatten)]
    pub outcome: JobOutcome,
}

#[derive(Debug, Serialize)]
pub struct JobErrorResponse {
    pub error: String,
}

/// All recorded job outcomes.
pub async fn list_jobs(State(state): State<Arc<AppState>>) -> Json<JobsResponse> {
    let jobs = state.status().list_all().await;
    Json(JobsResponse {
        total: jobs.len(),
        jobs,
    })
}

/// Latest outcome for one tag string.
pub async fn job_status(
    State(state): State<Arc<AppState>>,
    Query(params): Query<JobStatusParams>,
) -> Response {
    let Some(tags) = params.tags.filter(|t| !t.trim().is_empty()) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(JobErrorResponse {
                error: "Missing required query parameter: tags".to_string(),
            }),
        )
            .into_response();
    };

    match state.status().get(&tags).await {
        Some(outcome) => Json(JobStatusResponse { tags, outcome }).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(JobErrorResponse {
                error: format!("No job found for tags: {}", tags),
            }),
        )
            .into_response(),
    }
}
