//! REST API module using Axum
//!
//! Read access to the score ledger, threshold adjustment and recording
//! ingest under `/api/v2`, every response wrapped in the v2 envelope.

pub mod envelope;
pub mod handlers;
mod routes;

pub use handlers::ApiState;

use axum::http::{header, Method};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Environment variable with comma-separated allowed CORS origins.
pub const CORS_ENV_VAR: &str = "QRM_CORS_ORIGINS";

/// Restrictive by default (same-origin only).
fn build_cors_layer() -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);
    match std::env::var(CORS_ENV_VAR) {
        Ok(origins) => {
            let allowed: Vec<_> = origins
                .split(',')
                .filter_map(|o| o.trim().parse().ok())
                .collect();
            tracing::info!(origins = %origins, "CORS: allowing configured origins");
            base.allow_origin(allowed)
        }
        Err(_) => base,
    }
}

/// Create the complete application router.
pub fn create_app(state: ApiState) -> Router {
    Router::new()
        .nest("/api/v2", routes::v2_api_routes(state))
        .layer(TraceLayer::new_for_http())
        .layer(build_cors_layer())
}
