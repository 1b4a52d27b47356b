//! Signed archive downloads for the filesystem object store.

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use photozip_core::storage::StorageError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use tracing::{debug, error};

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SignedParams {
    pub expires: i64,
    pub signature: String,
}

#[derive(Debug, Serialize)]
pub struct ArtifactErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, error: impl Into<String>) -> Response {
    (
        status,
        Json(ArtifactErrorResponse {
            error: error.into(),
        }),
    )
        .into_response()
}

/// Stream a stored archive if the link's signature and expiry check out.
pub async fn download_artifact(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
    Query(params): Query<SignedParams>,
) -> Response {
    let Some(store) = state.artifacts() else {
        return error_response(StatusCode::NOT_FOUND, "Artifacts are not served by this instance");
    };

    let (file, len) = match store
        .open_signed(&path, params.expires, &params.signature)
        .await
    {
        Ok(opened) => opened,
        Err(e) => {
            debug!(path = %path, error = %e, "Rejected artifact download");
            let status = match e {
                StorageError::Expired => StatusCode::GONE,
                StorageError::InvalidSignature => StatusCode::FORBIDDEN,
                StorageError::NotFound(_) | StorageError::InvalidPath(_) => StatusCode::NOT_FOUND,
                _ => {
                    error!(path = %path, error = %e, "Failed to open artifact");
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            };
            return error_response(status, e.to_string());
        }
    };

    let filename = path.rsplit('/').next().unwrap_or("archive.zip").to_string();
    (
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (header::CONTENT_LENGTH, len.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        Body::from_stream(ReaderStream::new(file)),
    )
        .into_response()
}
