//! Session credentials data model
//!
//! The access/refresh token pair handed out by the auth endpoints. Owned by
//! the token store; mutated only by login, refresh and logout.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Access/refresh token pair with optional absolute expiry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub access_token: String,
    pub refresh_token: String,

    /// Absolute expiry of the access token (RFC3339)
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credentials {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            expires_at: None,
        }
    }

    /// Set expiry from a relative `expiresIn` delta in seconds
    pub fn with_expires_in(mut self, seconds: i64) -> Self {
        self.expires_at = Some(Utc::now() + Duration::seconds(seconds));
        self
    }

    /// Check if the access token expires within the given number of seconds
    ///
    /// Returns `None` when no expiry is recorded.
    pub fn expires_within(&self, seconds: i64) -> Option<bool> {
        self.expires_at
            .map(|expires| expires <= Utc::now() + Duration::seconds(seconds))
    }

    /// Check if the access token is expired (with a 30 second buffer)
    ///
    /// Unknown expiry counts as not expired; the server is the authority and
    /// answers with 401 either way.
    pub fn is_expired(&self) -> bool {
        self.expires_within(30).unwrap_or(false)
    }

    /// Parse credentials from a JSON string
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serialize to formatted JSON string
    pub fn to_pretty_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
