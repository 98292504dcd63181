//! HTTP application wiring (Axum router + service wiring).
//!
//! - `services.rs`: infrastructure wiring (event store, bus, read models, jobs)
//! - `routes/`: HTTP routes + handlers, one file per area
//! - `dto.rs`: request/response bodies
//! - `errors.rs`: error-to-status mapping

use std::sync::Arc;

use axum::{Extension, Router, routing::get};

use crate::config::ApiConfig;
use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Build the full router with fresh in-memory services.
pub fn build_app(config: ApiConfig) -> Router {
    build_app_with(Arc::new(services::build_services(config)))
}

/// Build the router over existing services (the binary keeps a handle for
/// the delivery worker).
pub fn build_app_with(services: Arc<services::AppServices>) -> Router {
    let max_upload_bytes = services.config.max_upload_bytes;

    // Tenant-scoped routes: require gateway context headers.
    let protected = routes::router(max_upload_bytes)
        .layer(Extension(services))
        .layer(axum::middleware::from_fn(middleware::context_middleware));

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(protected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn health_skips_context_but_tenant_routes_do_not() {
        let app = build_app(ApiConfig::default());

        let res = app
            .clone()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        let res = app
            .oneshot(Request::get("/invoices/abc").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }
}
