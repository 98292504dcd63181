use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::error;

use windledger_core::{DomainError, ErrorKind};
use windledger_infra::{EventStoreError, ServiceError};

/// Handler result: both arms are finished responses.
pub type ApiResult = Result<Response, Response>;

pub fn service_error_to_response(err: ServiceError) -> Response {
    match err {
        ServiceError::Domain(e) => domain_error_to_response(e),
        ServiceError::Concurrency(msg) => {
            error!(conflict = %msg, "commit retries exhausted");
            json_error(
                StatusCode::SERVICE_UNAVAILABLE,
                "concurrent_modification",
                "the resource is busy, retry the request",
            )
        }
        ServiceError::Store(EventStoreError::Unavailable(msg)) => {
            error!(error = %msg, "event store unavailable");
            json_error(StatusCode::SERVICE_UNAVAILABLE, "unavailable", "storage unavailable")
        }
        other => {
            error!(error = %other, "infrastructure failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", "internal error")
        }
    }
}

/// Status code by error kind; business rules carry the rule code and any
/// status detail.
pub fn domain_error_to_response(err: DomainError) -> Response {
    let code = err.code();
    let message = err.to_string();

    let status = match (&err, err.kind()) {
        (DomainError::NotFound, _) => StatusCode::NOT_FOUND,
        (DomainError::Unauthorized, _) => StatusCode::FORBIDDEN,
        (_, ErrorKind::Validation) => StatusCode::BAD_REQUEST,
        (
            DomainError::InvalidStatus { .. }
            | DomainError::InvalidTransition { .. }
            | DomainError::AlreadyInvoiced
            | DomainError::Conflict(_),
            _,
        ) => StatusCode::CONFLICT,
        _ => StatusCode::UNPROCESSABLE_ENTITY,
    };

    let mut body = json!({ "error": code, "message": message });
    match &err {
        DomainError::InvalidStatus { current, required } => {
            body["current"] = json!(current);
            body["required"] = json!(required);
        }
        DomainError::InvalidTransition {
            action,
            current,
            required,
        } => {
            body["action"] = json!(action);
            body["current"] = json!(current);
            body["required"] = json!(required);
        }
        DomainError::QuantityExceedsOriginal {
            position,
            requested,
            available,
        } => {
            body["position"] = json!(position);
            body["requested"] = json!(requested);
            body["available"] = json!(available);
        }
        DomainError::InvalidPosition { position, .. }
        | DomainError::PositionAlreadyCancelled { position } => {
            body["position"] = json!(position);
        }
        _ => {}
    }

    (status, axum::Json(body)).into_response()
}

pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

pub fn bad_request(code: &'static str, message: impl Into<String>) -> Response {
    json_error(StatusCode::BAD_REQUEST, code, message)
}
