//! Audit log queries.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use photozip_core::{AuditError, AuditFilter, AuditRecord, AuditStore};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::state::AppState;

const MAX_LIMIT: i64 = 1000;
const DEFAULT_LIMIT: i64 = 100;

#[derive(Debug, Deserialize)]
pub struct AuditQueryParams {
    /// Exact tag string of a job
    pub tags: Option<String>,
    /// One event type, or several separated by commas
    pub event_type: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl AuditQueryParams {
    fn filter(&self) -> AuditFilter {
        let mut filter = AuditFilter::new().with_time_range(self.from, self.to);
        if let Some(tags) = &self.tags {
            filter = filter.with_job_key(tags);
        }
        let event_types = self.event_type.as_deref().unwrap_or_default();
        for event_type in event_types.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            filter = filter.with_event_type(event_type);
        }
        filter
    }
}

#[derive(Debug, Serialize)]
pub struct AuditQueryResponse {
    pub events: Vec<AuditRecord>,
    /// Matching events across all pages
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Serialize)]
pub struct AuditErrorResponse {
    pub error: String,
}

fn page(
    store: &dyn AuditStore,
    filter: &AuditFilter,
    limit: i64,
    offset: i64,
) -> Result<AuditQueryResponse, AuditError> {
    Ok(AuditQueryResponse {
        events: store.query(&filter.page(limit, offset))?,
        total: store.count(filter)?,
        limit,
        offset,
    })
}

/// Newest audit events matching the query parameters.
pub async fn query_audit(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AuditQueryParams>,
) -> Response {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = params.offset.unwrap_or(0).max(0);

    match page(state.audit_store(), &params.filter(), limit, offset) {
        Ok(response) => Json(response).into_response(),
        Err(e) => {
            error!(error = %e, "Audit query failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(AuditErrorResponse {
                    error: format!("Failed to query audit events: {}", e),
                }),
            )
                .into_response()
        }
    }
}
