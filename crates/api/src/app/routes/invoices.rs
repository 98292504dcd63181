use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde_json::json;

use windledger_infra::services::InvoiceDraft;
use windledger_invoicing::InvoiceId;

use crate::app::dto::{
    CancelRequest, CancellationResponse, CorrectionBody, CorrectionResponse, InvoiceResponse,
    PartialCancelBody, SendInvoicesRequest, SendResult,
};
use crate::app::errors::{self, ApiResult};
use crate::app::routes::common::parse_id;
use crate::app::services::AppServices;
use crate::context::TenantContext;

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_invoice))
        .route("/send", post(send_invoices))
        .route("/:id", get(get_invoice))
        .route("/:id/paid", post(mark_paid))
        .route("/:id/cancel", post(cancel))
        .route("/:id/partial-cancel", post(partial_cancel))
        .route("/:id/correct", post(correct))
}

fn invoice_id(raw: &str) -> Result<InvoiceId, axum::response::Response> {
    parse_id(raw, "invoice").map(InvoiceId::new)
}

pub async fn create_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Json(body): Json<InvoiceDraft>,
) -> ApiResult {
    let invoice = services
        .billing
        .create_invoice(tenant.tenant_id(), body)
        .map_err(errors::service_error_to_response)?;
    Ok((StatusCode::CREATED, Json(InvoiceResponse::from(&invoice))).into_response())
}

/// Always 200; each entry carries its own outcome.
pub async fn send_invoices(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Json(body): Json<SendInvoicesRequest>,
) -> ApiResult {
    if body.invoice_ids.is_empty() {
        return Err(errors::bad_request("validation_error", "invoice_ids must not be empty"));
    }
    let outcomes = services
        .billing
        .send_invoices(tenant.tenant_id(), &body.invoice_ids);
    let results: Vec<SendResult> = outcomes.iter().map(SendResult::from).collect();
    let sent = results.iter().filter(|r| r.ok).count();

    Ok(Json(json!({
        "sent": sent,
        "failed": results.len() - sent,
        "results": results,
    }))
    .into_response())
}

pub async fn get_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> ApiResult {
    let id = invoice_id(&id)?;
    let invoice = services
        .billing
        .get_invoice(tenant.tenant_id(), id)
        .map_err(errors::service_error_to_response)?;
    Ok(Json(InvoiceResponse::from(&invoice)).into_response())
}

pub async fn mark_paid(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> ApiResult {
    let id = invoice_id(&id)?;
    let invoice = services
        .billing
        .mark_invoice_paid(tenant.tenant_id(), id)
        .map_err(errors::service_error_to_response)?;
    Ok(Json(InvoiceResponse::from(&invoice)).into_response())
}

pub async fn cancel(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
    Json(body): Json<CancelRequest>,
) -> ApiResult {
    let id = invoice_id(&id)?;
    let outcome = services
        .billing
        .cancel_invoice(tenant.tenant_id(), id, &body.reason)
        .map_err(errors::service_error_to_response)?;
    Ok((StatusCode::CREATED, Json(CancellationResponse::from(&outcome))).into_response())
}

pub async fn partial_cancel(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
    Json(body): Json<PartialCancelBody>,
) -> ApiResult {
    let id = invoice_id(&id)?;
    let outcome = services
        .billing
        .partial_cancel_invoice(tenant.tenant_id(), id, &body.positions, &body.reason)
        .map_err(errors::service_error_to_response)?;
    Ok((StatusCode::CREATED, Json(CancellationResponse::from(&outcome))).into_response())
}

pub async fn correct(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
    Json(body): Json<CorrectionBody>,
) -> ApiResult {
    let id = invoice_id(&id)?;
    let outcome = services
        .billing
        .correct_invoice(tenant.tenant_id(), id, &body.corrections, &body.reason)
        .map_err(errors::service_error_to_response)?;
    Ok((StatusCode::CREATED, Json(CorrectionResponse::from(&outcome))).into_response())
}
