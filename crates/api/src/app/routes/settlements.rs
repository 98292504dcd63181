use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};

use windledger_infra::services::{CalculationRequest, RevenueUpdate};
use windledger_settlement::SettlementId;

use crate::app::dto::{
    AllocateRequest, AllocationResponse, CreditNotesRequest, LessorCreditNotesResponse,
    ReviewRequest, SettlementResponse,
};
use crate::app::errors::{self, ApiResult};
use crate::app::routes::common::parse_id;
use crate::app::services::AppServices;
use crate::context::{ActorContext, TenantContext};

pub fn router() -> Router {
    Router::new()
        .route("/calculate", post(calculate))
        .route("/:id", get(get_settlement))
        .route("/:id/calculate", post(recalculate))
        .route("/:id/review", post(review))
        .route("/:id/close", post(close))
        .route("/:id/credit-notes", post(generate_credit_notes))
        .route("/:id/allocations", post(allocate))
}

fn settlement_id(raw: &str) -> Result<SettlementId, axum::response::Response> {
    parse_id(raw, "settlement").map(SettlementId::new)
}

pub async fn calculate(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(actor): Extension<ActorContext>,
    Json(body): Json<CalculationRequest>,
) -> ApiResult {
    let settlement = services
        .billing
        .calculate_settlement(tenant.tenant_id(), actor.user_id(), body)
        .map_err(errors::service_error_to_response)?;
    Ok(Json(SettlementResponse::from(&settlement)).into_response())
}

pub async fn recalculate(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<String>,
    Json(body): Json<RevenueUpdate>,
) -> ApiResult {
    let id = settlement_id(&id)?;
    let settlement = services
        .billing
        .recalculate_settlement(tenant.tenant_id(), actor.user_id(), id, body)
        .map_err(errors::service_error_to_response)?;
    Ok(Json(SettlementResponse::from(&settlement)).into_response())
}

pub async fn review(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<String>,
    Json(body): Json<ReviewRequest>,
) -> ApiResult {
    let id = settlement_id(&id)?;
    let settlement = services
        .billing
        .review_settlement(tenant.tenant_id(), actor.user_id(), id, body.action, body.notes)
        .map_err(errors::service_error_to_response)?;
    Ok(Json(SettlementResponse::from(&settlement)).into_response())
}

pub async fn close(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<String>,
) -> ApiResult {
    let id = settlement_id(&id)?;
    let settlement = services
        .billing
        .close_settlement(tenant.tenant_id(), actor.user_id(), id)
        .map_err(errors::service_error_to_response)?;
    Ok(Json(SettlementResponse::from(&settlement)).into_response())
}

pub async fn get_settlement(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> ApiResult {
    let id = settlement_id(&id)?;
    let settlement = services
        .billing
        .get_settlement(tenant.tenant_id(), id)
        .map_err(errors::service_error_to_response)?;
    Ok(Json(SettlementResponse::from(&settlement)).into_response())
}

pub async fn generate_credit_notes(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
    body: Option<Json<CreditNotesRequest>>,
) -> ApiResult {
    let id = settlement_id(&id)?;
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let document_date = body
        .document_date
        .unwrap_or_else(|| services.billing.config().clock.today());

    let result = services
        .billing
        .generate_lessor_credit_notes(tenant.tenant_id(), id, document_date)
        .map_err(errors::service_error_to_response)?;
    Ok((StatusCode::CREATED, Json(LessorCreditNotesResponse::from(&result))).into_response())
}

pub async fn allocate(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<String>,
    Json(body): Json<AllocateRequest>,
) -> ApiResult {
    let id = settlement_id(&id)?;
    let allocation = services
        .billing
        .allocate_costs(
            tenant.tenant_id(),
            actor.user_id(),
            id,
            body.entities,
            body.label,
            body.notes,
        )
        .map_err(errors::service_error_to_response)?;
    Ok((StatusCode::CREATED, Json(AllocationResponse::from(&allocation))).into_response())
}
