//! Shared error taxonomy for the gateway.

use thiserror::Error;

/// Errors that can occur anywhere in the gateway, from token refresh through
/// dialect conversion to upstream transport.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Request parse/validation failure in a handler or converter.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The requested model id is not present in the upstream's model list.
    #[error("model not found: {0}")]
    ModelNotFound(String),

    /// OAuth2 token refresh was rejected by the authorization server.
    #[error("auth failure: {0}")]
    AuthFailure(String),

    /// Both direct and proxy transport attempts failed.
    #[error("connection error: {0}")]
    ConnectionError(String),

    /// Upstream returned a non-2xx status.
    #[error("upstream http error {status}: {body}")]
    UpstreamHttpError { status: u16, body: String },

    /// A referenced `previous_response_id` is not present in the
    /// response-retrieval cache.
    #[error("response not found: {0}")]
    ResponseNotFound(String),

    /// The upstream stream was interrupted after the opening event was
    /// already emitted to the client.
    #[error("stream aborted: {0}")]
    StreamAborted(String),

    /// JSON (de)serialization failure.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed outbound HTTP request construction.
    #[error("http error: {0}")]
    Http(#[from] http::Error),

    /// Transport-level failure from the HTTP client.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Config file I/O failure.
    #[error("config io error: {0}")]
    ConfigIo(#[from] std::io::Error),
}

impl GatewayError {
    /// True for transport-level failures that should trigger direct↔proxy
    /// failover: any connect, TLS, read-timeout, or DNS error.
    pub fn is_transport_failure(&self) -> bool {
        match self {
            GatewayError::Transport(e) => {
                e.is_connect() || e.is_timeout() || e.is_request() || e.is_redirect()
            }
            GatewayError::ConnectionError(_) => true,
            _ => false,
        }
    }
}
