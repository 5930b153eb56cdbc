use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Unified error type for the Shroud proxy
#[derive(Error, Debug)]
pub enum ShroudError {
    // Request validation
    #[error("Missing target URL (?url=)")]
    MissingTarget,

    #[error("Invalid target URL: {0}")]
    InvalidTarget(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Host not allowed: {host}")]
    HostNotAllowed { host: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    // Upstream errors
    #[error("Upstream request timed out")]
    UpstreamTimeout { detail: Option<String> },

    #[error("Upstream request failed")]
    UpstreamUnreachable { detail: String },

    #[error("Proxy connection failed: {0}")]
    ProxyConnectionFailed(String),

    #[error("Operation timed out")]
    Timeout,

    #[error("Upstream response exceeds {limit} bytes")]
    ResponseTooLarge { limit: usize },

    // Content rewriting (recovered by the handler)
    #[error("Content transform failed: {0}")]
    TransformFailure(String),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid proxy address: {0}")]
    InvalidProxyAddress(String),

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for Shroud operations
pub type Result<T> = std::result::Result<T, ShroudError>;

impl ShroudError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            ShroudError::MissingTarget
            | ShroudError::InvalidTarget(_)
            | ShroudError::InvalidRequest(_)
            | ShroudError::InvalidProxyAddress(_)
            | ShroudError::InvalidConfig(_) => StatusCode::BAD_REQUEST,

            // 403 Forbidden
            ShroudError::Unauthorized | ShroudError::HostNotAllowed { .. } => {
                StatusCode::FORBIDDEN
            }

            // 413 Payload Too Large
            ShroudError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,

            // 502 Bad Gateway
            ShroudError::UpstreamUnreachable { .. }
            | ShroudError::ProxyConnectionFailed(_)
            | ShroudError::ResponseTooLarge { .. } => StatusCode::BAD_GATEWAY,

            // 504 Gateway Timeout
            ShroudError::UpstreamTimeout { .. } | ShroudError::Timeout => {
                StatusCode::GATEWAY_TIMEOUT
            }

            // 500 Internal Server Error
            ShroudError::TransformFailure(_)
            | ShroudError::Io(_)
            | ShroudError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Extra context shown to the caller next to the stable `error` message
    pub fn detail(&self) -> Option<String> {
        match self {
            ShroudError::UpstreamTimeout { detail } => detail.clone(),
            ShroudError::UpstreamUnreachable { detail } => Some(detail.clone()),
            ShroudError::ProxyConnectionFailed(detail) => Some(detail.clone()),
            _ => None,
        }
    }

    /// A hint on how the caller can fix the request
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            ShroudError::MissingTarget => {
                Some("Pass the target as ?url=<absolute-url> or in the x-target-url header")
            }
            ShroudError::InvalidTarget(_) => Some("Use an absolute http:// or https:// URL"),
            ShroudError::Unauthorized => Some("Send a valid API key"),
            ShroudError::HostNotAllowed { .. } => {
                Some("Ask the operator to add this host to ALLOWED_HOSTS")
            }
            ShroudError::UpstreamTimeout { .. } | ShroudError::Timeout => {
                Some("The target did not answer in time; retry later")
            }
            ShroudError::UpstreamUnreachable { .. } => {
                Some("Check that the target is reachable from the proxy")
            }
            _ => None,
        }
    }

    /// Whether another transport may succeed where this attempt failed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ShroudError::ProxyConnectionFailed(_)
                | ShroudError::Timeout
                | ShroudError::Io(_)
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ShroudError::Timeout | ShroudError::UpstreamTimeout { .. })
    }

    /// Check if this is a server error (5xx)
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    suggestion: Option<&'static str>,
}

impl IntoResponse for ShroudError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorBody {
            error: self.to_string(),
            detail: self.detail(),
            suggestion: self.suggestion(),
        };

        (status, Json(body)).into_response()
    }
}

impl From<url::ParseError> for ShroudError {
    fn from(err: url::ParseError) -> Self {
        ShroudError::InvalidTarget(err.to_string())
    }
}
