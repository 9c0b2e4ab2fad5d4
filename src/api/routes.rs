//! v2 API route table.

use axum::routing::{get, post};
use axum::Router;

use super::handlers::{self, ApiState};

/// Build the v2 API router.
pub fn v2_api_routes(state: ApiState) -> Router {
    Router::new()
        .route("/system/health", get(handlers::system_health))
        .route("/capture-sets", get(handlers::list_capture_sets))
        // Score history
        .route("/rms/:capture_set_id", get(handlers::get_rms))
        .route("/rms/:capture_set_id/delta", get(handlers::get_rms_delta))
        // Thresholds
        .route(
            "/thresholds",
            get(handlers::get_thresholds).post(handlers::update_thresholds),
        )
        // Ingest
        .route("/recordings", post(handlers::submit_recording))
        .with_state(state)
}
