use axum::{Json, extract::Extension, http::StatusCode, response::IntoResponse};

use crate::context::{ActorContext, TenantContext};

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn whoami(
    Extension(tenant): Extension<TenantContext>,
    Extension(actor): Extension<ActorContext>,
) -> impl IntoResponse {
    Json(serde_json::json!({
        "tenant_id": tenant.tenant_id().to_string(),
        "user_id": actor.user_id().to_string(),
    }))
}
