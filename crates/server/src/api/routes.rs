use axum::{
    http::Method,
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::{artifacts, audit, handlers, jobs, middleware::metrics_middleware, zip};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // API routes
    let api_routes = Router::new()
        // Health and config
        .route("/health", get(handlers::health))
        .route("/config", get(handlers::get_config))
        // Audit
        .route("/audit", get(audit::query_audit))
        // Jobs
        .route("/jobs", get(jobs::list_jobs))
        .route("/jobs/status", get(jobs::job_status))
        .route("/zip", post(zip::submit_zip))
        .with_state(Arc::clone(&state));

    // The zip endpoint is called from browsers on other origins
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST]);

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/artifacts/{*path}", get(artifacts::download_artifact))
        .route("/metrics", get(handlers::metrics))
        .with_state(state)
        .layer(middleware::from_fn(metrics_middleware))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
