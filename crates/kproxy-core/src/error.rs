use http::StatusCode;
use serde_json::Value as JsonValue;
use thiserror::Error;

/// Failure taxonomy for the dispatch path.
///
/// Credential-level failures are recovered locally by the retry loop and only
/// surface here once the pool is exhausted. Anything unexpected is wrapped as
/// `Internal` and never leaks detail to the caller.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("unsupported mode: {0}")]
    UnsupportedMode(String),

    /// Error envelope received from the provider, surfaced verbatim after the
    /// pool is exhausted.
    #[error("upstream rejected the request")]
    Upstream { payload: JsonValue },

    #[error("internal gateway error")]
    Internal(#[from] anyhow::Error),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::Authentication(_) => StatusCode::UNAUTHORIZED,
            GatewayError::UnsupportedMode(_) => StatusCode::BAD_REQUEST,
            GatewayError::Upstream { .. } => StatusCode::BAD_GATEWAY,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
