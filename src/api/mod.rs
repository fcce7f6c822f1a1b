//! REST API module using Axum
//!
//! Read-only browse API of the ingestion server: gate status, the upload
//! directory and file downloads under `/api/v1`.

pub mod envelope;
pub mod handlers;
mod routes;

pub use handlers::AppState;

use axum::http::{header, Method};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Same-origin by default. `AEROSURVEY_CORS_ORIGINS` takes a
/// comma-separated list of allowed origins.
fn build_cors_layer() -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET])
        .allow_headers([header::CONTENT_TYPE]);
    match std::env::var("AEROSURVEY_CORS_ORIGINS") {
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
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", routes::api_routes(state))
        .layer(TraceLayer::new_for_http())
        .layer(build_cors_layer())
}
