//! axum router for the report endpoints.

mod handlers;

use std::sync::Arc;

use axum::routing::post;
use axum::Router;
use services::ReportService;
use tower_http::trace::TraceLayer;

/// State shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub reports: Arc<ReportService>,
}

impl AppState {
    pub fn new(reports: ReportService) -> Self {
        Self {
            reports: Arc::new(reports),
        }
    }
}

/// Builds the router. Only `POST` on the two report paths is handled;
/// everything else falls through to axum's defaults.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/report/{*plugin}", post(handlers::report_by_path))
        // The wildcard never matches an empty suffix.
        .route("/report/", post(handlers::report_by_path))
        .route("/report.php", post(handlers::report_by_query))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
