//! Bank statement upload.
//!
//! One multipart file field (any name). The file name must carry an allowed
//! extension and the content must fit the configured size cap.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Extension, Multipart},
    http::StatusCode,
    response::IntoResponse,
    routing::post,
};
use tracing::warn;

use crate::app::errors::{self, ApiResult};
use crate::app::services::AppServices;
use crate::context::TenantContext;

/// Room for multipart boundaries and headers on top of the file itself.
const MULTIPART_OVERHEAD: usize = 16 * 1024;

pub fn router(max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/", post(import_statement))
        .layer(DefaultBodyLimit::max(max_upload_bytes.saturating_add(MULTIPART_OVERHEAD)))
}

pub async fn import_statement(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    mut multipart: Multipart,
) -> ApiResult {
    let limits = &services.config;

    let field = multipart
        .next_field()
        .await
        .map_err(|e| errors::json_error(e.status(), "invalid_upload", e.body_text()))?
        .ok_or_else(|| errors::bad_request("missing_file", "no file in upload"))?;

    let file_name = field.file_name().unwrap_or_default().to_string();
    if !limits.extension_allowed(&file_name) {
        return Err(errors::bad_request(
            "unsupported_file_type",
            format!(
                "file extension not allowed; expected one of: {}",
                limits.allowed_extensions.join(", ")
            ),
        ));
    }

    let bytes = field
        .bytes()
        .await
        .map_err(|e| errors::json_error(e.status(), "invalid_upload", e.body_text()))?;
    if bytes.len() > limits.max_upload_bytes {
        warn!(tenant_id = %tenant.tenant_id(), size = bytes.len(), "bank statement too large");
        return Err(errors::json_error(
            StatusCode::PAYLOAD_TOO_LARGE,
            "upload_too_large",
            format!("file exceeds {} bytes", limits.max_upload_bytes),
        ));
    }
    if bytes.is_empty() {
        return Err(errors::bad_request("empty_file", "uploaded file is empty"));
    }

    let text = String::from_utf8_lossy(&bytes);
    let report = services
        .billing
        .import_bank_statement(tenant.tenant_id(), &text)
        .map_err(errors::service_error_to_response)?;

    Ok(Json(serde_json::json!({
        "file_name": file_name,
        "format": report.format,
        "transaction_count": report.transaction_count,
        "skipped_records": report.skipped_records,
        "issues": report.issues,
        "matches": report.matches,
    }))
    .into_response())
}
