//! Per-dialect error envelopes (spec.md §6 "Error envelope per dialect",
//! §7 error taxonomy → HTTP status mapping).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use gateway_core::GatewayError;
use serde_json::json;

/// Which client dialect a request arrived in, so a [`GatewayError`] is
/// rendered in the caller's own envelope shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    OpenAi,
    Anthropic,
    Responses,
}

fn status_for(err: &GatewayError) -> StatusCode {
    match err {
        GatewayError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        GatewayError::ModelNotFound(_) => StatusCode::NOT_FOUND,
        GatewayError::ResponseNotFound(_) => StatusCode::NOT_FOUND,
        GatewayError::AuthFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
        GatewayError::ConnectionError(_) => StatusCode::BAD_GATEWAY,
        GatewayError::UpstreamHttpError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        GatewayError::StreamAborted(_) => StatusCode::INTERNAL_SERVER_ERROR,
        GatewayError::Json(_) | GatewayError::Http(_) => StatusCode::BAD_REQUEST,
        GatewayError::Transport(_) | GatewayError::ConfigIo(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Anthropic's `error.type` vocabulary (spec.md §6): `invalid_request_error`,
/// `authentication_error`, `not_found_error`, `rate_limit_error`, `api_error`.
fn anthropic_error_type(err: &GatewayError) -> &'static str {
    match err {
        GatewayError::InvalidRequest(_) | GatewayError::Json(_) | GatewayError::Http(_) => {
            "invalid_request_error"
        }
        GatewayError::AuthFailure(_) => "authentication_error",
        GatewayError::ModelNotFound(_) | GatewayError::ResponseNotFound(_) => "not_found_error",
        _ => "api_error",
    }
}

/// Render a [`GatewayError`] into the dialect-appropriate JSON error
/// envelope and status code.
pub struct DialectError {
    pub dialect: Dialect,
    pub err: GatewayError,
}

impl DialectError {
    pub fn new(dialect: Dialect, err: GatewayError) -> Self {
        Self { dialect, err }
    }
}

impl IntoResponse for DialectError {
    fn into_response(self) -> Response {
        let status = status_for(&self.err);
        let message = self.err.to_string();

        let body = match self.dialect {
            Dialect::OpenAi => json!({
                "error": { "message": message, "type": openai_error_type(&self.err) }
            }),
            Dialect::Anthropic => json!({
                "type": "error",
                "error": { "type": anthropic_error_type(&self.err), "message": message }
            }),
            Dialect::Responses => json!({
                "type": "error",
                "error": { "type": anthropic_error_type(&self.err), "message": message }
            }),
        };

        tracing::warn!(status = status.as_u16(), dialect = ?self.dialect, %message, "request failed");
        (status, Json(body)).into_response()
    }
}

fn openai_error_type(err: &GatewayError) -> &'static str {
    match err {
        GatewayError::InvalidRequest(_) | GatewayError::Json(_) | GatewayError::Http(_) => {
            "invalid_request_error"
        }
        GatewayError::AuthFailure(_) => "authentication_error",
        GatewayError::ModelNotFound(_) => "not_found_error",
        _ => "server_error",
    }
}
