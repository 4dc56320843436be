//! Typed error taxonomy for Viport API calls
//!
//! Every failure surfaced to a caller is one of these variants, each carrying
//! a stable machine-readable code so callers can branch on `code()` instead of
//! parsing message strings. Envelope-provided codes are preserved verbatim;
//! synthesized errors (no usable envelope) use the fixed codes below.

use serde_json::Value;

/// Error returned by every client operation.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// 401 with no usable refresh path, or the refresh itself failed.
    #[error("unauthorized: {message}")]
    Unauthorized { code: String, message: String },

    /// 429 after the rate-limit replay budget was exhausted.
    #[error("rate limited: {message}")]
    RateLimited { code: String, message: String },

    /// No HTTP response was received (DNS/connection/reset), retries exhausted.
    #[error("network error: {message}")]
    Network { message: String },

    /// Client-side timeout; never retried.
    #[error("request timed out")]
    Timeout,

    /// HTTP 400.
    #[error("validation failed: {message}")]
    Validation {
        code: String,
        message: String,
        details: Option<Value>,
    },

    /// HTTP 404.
    #[error("not found: {message}")]
    NotFound { code: String, message: String },

    /// HTTP 5xx.
    #[error("server error ({status}): {message}")]
    Server {
        code: String,
        status: u16,
        message: String,
    },

    /// Envelope error with a status outside the dedicated variants above.
    #[error("{code}: {message}")]
    Api {
        code: String,
        message: String,
        status: u16,
        details: Option<Value>,
    },

    /// Body did not match the success/error envelope. Defensive fallback.
    #[error("invalid response format: {message}")]
    MalformedResponse { message: String },

    /// Construction-time misuse: bad base URL, unparsable header, etc.
    #[error("client configuration error: {message}")]
    Config { message: String },
}

impl ApiError {
    /// Machine-readable code for branching. Envelope errors keep the server's
    /// code; locally detected conditions use fixed codes.
    pub fn code(&self) -> &str {
        match self {
            ApiError::Unauthorized { code, .. }
            | ApiError::RateLimited { code, .. }
            | ApiError::Validation { code, .. }
            | ApiError::NotFound { code, .. }
            | ApiError::Server { code, .. }
            | ApiError::Api { code, .. } => code,
            ApiError::Network { .. } => "NETWORK_ERROR",
            ApiError::Timeout => "TIMEOUT",
            ApiError::MalformedResponse { .. } => "MALFORMED_RESPONSE",
            ApiError::Config { .. } => "CONFIG_ERROR",
        }
    }

    /// HTTP status associated with the error, where one exists.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Unauthorized { .. } => Some(401),
            ApiError::RateLimited { .. } => Some(429),
            ApiError::Validation { .. } => Some(400),
            ApiError::NotFound { .. } => Some(404),
            ApiError::Server { status, .. } | ApiError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Structured details attached by the server, if any.
    pub fn details(&self) -> Option<&Value> {
        match self {
            ApiError::Validation { details, .. } | ApiError::Api { details, .. } => {
                details.as_ref()
            }
            _ => None,
        }
    }

    pub(crate) fn unauthorized(message: impl Into<String>) -> Self {
        ApiError::Unauthorized {
            code: "UNAUTHORIZED".to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        ApiError::Config {
            message: message.into(),
        }
    }

    /// Map a transport-level reqwest failure into the taxonomy.
    pub(crate) fn from_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Timeout
        } else if err.is_builder() {
            ApiError::Config {
                message: err.to_string(),
            }
        } else {
            ApiError::Network {
                message: err.to_string(),
            }
        }
    }
}

/// Result alias for client operations.
pub type Result<T> = std::result::Result<T, ApiError>;
