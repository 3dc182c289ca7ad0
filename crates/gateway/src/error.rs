//! HTTP-facing error type (§7): request-handling failures the handlers
//! themselves can name (malformed form body, missing/invalid cookie) map to
//! 4xx; anything surfaced from a lower layer (`sa_domain::error::Error`,
//! i.e. the "SessionInternal" case) is never swallowed and maps to 5xx.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

#[derive(thiserror::Error, Debug)]
pub enum GatewayError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Internal(#[from] sa_domain::error::Error),
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            GatewayError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            GatewayError::Internal(e) => {
                tracing::error!(error = %e, "session internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
        };
        (status, message).into_response()
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
