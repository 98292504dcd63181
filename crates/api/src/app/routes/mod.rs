use axum::{Router, routing::get};

pub mod allocations;
pub mod bank_imports;
pub mod common;
pub mod invoices;
pub mod settlements;
pub mod system;

/// Router for all tenant-scoped endpoints.
pub fn router(max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .nest("/settlements", settlements::router())
        .nest("/allocations", allocations::router())
        .nest("/invoices", invoices::router())
        .nest("/bank-imports", bank_imports::router(max_upload_bytes))
}
