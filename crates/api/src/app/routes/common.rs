use axum::response::Response;

use windledger_core::AggregateId;

use crate::app::errors;

pub fn parse_id(raw: &str, what: &str) -> Result<AggregateId, Response> {
    raw.parse()
        .map_err(|_| errors::bad_request("invalid_id", format!("invalid {what} id")))
}
