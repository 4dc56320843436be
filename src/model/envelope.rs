//! Response envelope and header-derived models
//!
//! Every REST response body is a tagged envelope: `{ "success": true, "data": T }`
//! or `{ "success": false, "error": { code, message, statusCode, details? } }`.
//! `normalize` is the single place that unwraps it into either a plain value
//! or a typed [`ApiError`].

use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ApiError, Result};

/// Error payload inside a failed envelope
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(default)]
    pub status_code: Option<u16>,
    #[serde(default)]
    pub details: Option<Value>,
}

/// Raw envelope as it appears on the wire
///
/// The `success` tag is mandatory; a body without it is malformed. Exactly
/// one of `data`/`error` is populated in well-formed responses.
#[derive(Debug, Deserialize)]
struct RawEnvelope {
    success: bool,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    error: Option<ErrorBody>,
}

/// Unwrap a response body into its payload or a typed error
///
/// Success envelopes return `data` without transformation. Error envelopes
/// map into the taxonomy keyed by the envelope's `statusCode` (falling back
/// to the HTTP status), preserving the server's `code` verbatim. Bodies that
/// are not valid envelopes are synthesized from the HTTP status alone.
pub fn normalize<T: serde::de::DeserializeOwned>(status: StatusCode, body: &[u8]) -> Result<T> {
    let raw: RawEnvelope = match serde_json::from_slice(body) {
        Ok(raw) => raw,
        Err(_) => return Err(synthesize(status, body)),
    };

    if raw.success {
        let data = raw.data.unwrap_or(Value::Null);
        serde_json::from_value(data).map_err(|e| ApiError::MalformedResponse {
            message: format!("success envelope data did not match expected type: {e}"),
        })
    } else if let Some(error) = raw.error {
        Err(classify(status, error))
    } else {
        Err(ApiError::MalformedResponse {
            message: "error envelope is missing the error object".to_string(),
        })
    }
}

/// Map an envelope error into the taxonomy, keeping the server's code
fn classify(status: StatusCode, error: ErrorBody) -> ApiError {
    let status_code = error.status_code.unwrap_or(status.as_u16());
    match status_code {
        400 => ApiError::Validation {
            code: error.code,
            message: error.message,
            details: error.details,
        },
        401 => ApiError::Unauthorized {
            code: error.code,
            message: error.message,
        },
        404 => ApiError::NotFound {
            code: error.code,
            message: error.message,
        },
        429 => ApiError::RateLimited {
            code: error.code,
            message: error.message,
        },
        500..=599 => ApiError::Server {
            code: error.code,
            status: status_code,
            message: error.message,
        },
        _ => ApiError::Api {
            code: error.code,
            message: error.message,
            status: status_code,
            details: error.details,
        },
    }
}

/// Build an error from the HTTP status when the body is not a valid envelope
fn synthesize(status: StatusCode, body: &[u8]) -> ApiError {
    let message = String::from_utf8_lossy(body).trim().to_string();
    let message = if message.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("unknown error")
            .to_string()
    } else {
        message
    };

    match status.as_u16() {
        400 => ApiError::Validation {
            code: "VALIDATION_ERROR".to_string(),
            message,
            details: None,
        },
        401 => ApiError::Unauthorized {
            code: "UNAUTHORIZED".to_string(),
            message,
        },
        404 => ApiError::NotFound {
            code: "NOT_FOUND".to_string(),
            message,
        },
        429 => ApiError::RateLimited {
            code: "RATE_LIMIT_EXCEEDED".to_string(),
            message,
        },
        500..=599 => ApiError::Server {
            code: "SERVER_ERROR".to_string(),
            status: status.as_u16(),
            message,
        },
        // a 2xx that is not an envelope is a broken response, not an API error
        _ if status.is_success() => ApiError::MalformedResponse {
            message: "body is not a success/error envelope".to_string(),
        },
        code => ApiError::Api {
            code: "UNKNOWN_ERROR".to_string(),
            message,
            status: code,
            details: None,
        },
    }
}

/// Rate limit snapshot derived from response headers
///
/// Recomputed per response; has no independent lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitInfo {
    pub limit: u32,
    pub remaining: u32,
    /// Unix timestamp at which the window resets
    pub reset_at: i64,
}

impl RateLimitInfo {
    /// Parse `X-RateLimit-*` headers; `None` when the limit header is absent
    /// or not a valid count
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        Some(Self {
            limit: header_number::<u32>(headers, "x-ratelimit-limit")?,
            remaining: header_number::<u32>(headers, "x-ratelimit-remaining").unwrap_or(0),
            reset_at: header_number::<i64>(headers, "x-ratelimit-reset").unwrap_or(0),
        })
    }
}

fn header_number<T: std::str::FromStr>(headers: &HeaderMap, name: &str) -> Option<T> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

/// Request body for `POST /auth/refresh`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Payload returned by the refresh endpoint inside the success envelope
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub token_type: Option<String>,
}
