//! Request context from gateway headers.
//!
//! Authentication happens upstream. The gateway forwards the tenant and the
//! user as UUID headers; requests without both are rejected.

use axum::{
    http::{HeaderMap, Request, StatusCode},
    middleware::Next,
    response::Response,
};
use tracing::debug;

use windledger_core::{TenantId, UserId};

use crate::context::{ActorContext, TenantContext};

pub const TENANT_HEADER: &str = "x-tenant-id";
pub const USER_HEADER: &str = "x-user-id";

pub async fn context_middleware(
    mut req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let tenant_id: TenantId = header_uuid(req.headers(), TENANT_HEADER)?;
    let user_id: UserId = header_uuid(req.headers(), USER_HEADER)?;

    req.extensions_mut().insert(TenantContext::new(tenant_id));
    req.extensions_mut().insert(ActorContext::new(user_id));

    Ok(next.run(req).await)
}

fn header_uuid<T: std::str::FromStr>(headers: &HeaderMap, name: &str) -> Result<T, StatusCode> {
    let value = headers
        .get(name)
        .ok_or(StatusCode::UNAUTHORIZED)?
        .to_str()
        .map_err(|_| StatusCode::UNAUTHORIZED)?
        .trim();

    value.parse().map_err(|_| {
        debug!(header = name, "malformed context header");
        StatusCode::UNAUTHORIZED
    })
}
