use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::error::{ApiError, Result};
use crate::http_client::ProxyConfig;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum TlsBackend {
    Rustls,
    NativeTls,
}

impl Default for TlsBackend {
    fn default() -> Self {
        Self::Rustls
    }
}

/// Client configuration
///
/// Supplied as a whole at construction time; the client never reads global
/// state for any of these values.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    /// REST API base URL, e.g. `https://api.viport.io/v1`
    pub base_url: String,

    /// Realtime events WebSocket URL, e.g. `wss://api.viport.io/ws`
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub websocket_url: Option<String>,

    /// Per-request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Maximum replay attempts for network errors and 429s
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base retry delay in milliseconds (doubles per network attempt)
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Extra headers attached to every request
    #[serde(default)]
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,

    /// HTTP proxy URL (optional)
    /// Supported formats: http://host:port, https://host:port, socks5://host:port
    #[serde(default)]
    pub proxy_url: Option<String>,

    /// Proxy authentication username (optional)
    #[serde(default)]
    pub proxy_username: Option<String>,

    /// Proxy authentication password (optional)
    #[serde(default)]
    pub proxy_password: Option<String>,

    #[serde(default = "default_tls_backend")]
    pub tls_backend: TlsBackend,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1_000
}

fn default_tls_backend() -> TlsBackend {
    TlsBackend::Rustls
}

impl ClientConfig {
    /// Create a configuration with defaults for everything but the base URL
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            websocket_url: None,
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            headers: HashMap::new(),
            proxy_url: None,
            proxy_username: None,
            proxy_password: None,
            tls_backend: default_tls_backend(),
        }
    }

    /// Set the WebSocket URL for the realtime event bus
    pub fn with_websocket_url(mut self, url: impl Into<String>) -> Self {
        self.websocket_url = Some(url.into());
        self
    }

    /// Load configuration from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            ApiError::config(format!("failed to read config file {}: {e}", path.display()))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            ApiError::config(format!("failed to parse config file {}: {e}", path.display()))
        })
    }

    /// Build the proxy configuration, if a proxy URL is set
    pub fn proxy_config(&self) -> Option<ProxyConfig> {
        self.proxy_url.as_ref().map(|url| {
            let mut proxy = ProxyConfig::new(url);
            if let (Some(username), Some(password)) = (&self.proxy_username, &self.proxy_password) {
                proxy = proxy.with_auth(username, password);
            }
            proxy
        })
    }
}
