use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};

use windledger_allocation::AllocationId;

use crate::app::dto::{AllocationInvoicesRequest, AllocationInvoicesResponse, AllocationResponse};
use crate::app::errors::{self, ApiResult};
use crate::app::routes::common::parse_id;
use crate::app::services::AppServices;
use crate::context::TenantContext;

pub fn router() -> Router {
    Router::new()
        .route("/:id", get(get_allocation))
        .route("/:id/invoices", post(generate_invoices))
        .route("/:id/close", post(close))
}

fn allocation_id(raw: &str) -> Result<AllocationId, axum::response::Response> {
    parse_id(raw, "allocation").map(AllocationId::new)
}

pub async fn get_allocation(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> ApiResult {
    let id = allocation_id(&id)?;
    let allocation = services
        .billing
        .get_allocation(tenant.tenant_id(), id)
        .map_err(errors::service_error_to_response)?;
    Ok(Json(AllocationResponse::from(&allocation)).into_response())
}

pub async fn generate_invoices(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
    body: Option<Json<AllocationInvoicesRequest>>,
) -> ApiResult {
    let id = allocation_id(&id)?;
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let invoice_date = body
        .invoice_date
        .unwrap_or_else(|| services.billing.config().clock.today());

    let result = services
        .billing
        .generate_allocation_invoices(tenant.tenant_id(), id, invoice_date, body.due_date)
        .map_err(errors::service_error_to_response)?;
    Ok((StatusCode::CREATED, Json(AllocationInvoicesResponse::from(&result))).into_response())
}

pub async fn close(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> ApiResult {
    let id = allocation_id(&id)?;
    let allocation = services
        .billing
        .close_allocation(tenant.tenant_id(), id)
        .map_err(errors::service_error_to_response)?;
    Ok(Json(AllocationResponse::from(&allocation)).into_response())
}
