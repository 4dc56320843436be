//! Connection pool construction
//!
//! `ApiClient` builds its `reqwest::Client` once at construction from the
//! values in `ClientConfig`: the client-wide timeout, the TLS backend, and
//! an optional proxy. Per-call timeout overrides happen later, in the
//! request pipeline, against this shared pool.

use std::time::Duration;

use reqwest::{Client, Proxy};

use crate::error::{ApiError, Result};
use crate::model::config::TlsBackend;

/// Outbound proxy settings, assembled by `ClientConfig::proxy_config`
///
/// The URL scheme picks the protocol: `http`, `https` or `socks5`.
#[derive(Debug, Clone, Default)]
pub struct ProxyConfig {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl ProxyConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            username: None,
            password: None,
        }
    }

    pub fn with_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }
}

/// Build the shared connection pool
///
/// Fails with `ApiError::Config` when the proxy URL does not parse or the
/// TLS backend cannot be initialized.
pub fn build_client(
    proxy: Option<&ProxyConfig>,
    timeout_secs: u64,
    tls_backend: TlsBackend,
) -> Result<Client> {
    let mut builder = Client::builder().timeout(Duration::from_secs(timeout_secs));

    if tls_backend == TlsBackend::Rustls {
        builder = builder.use_rustls_tls();
    }

    if let Some(proxy_config) = proxy {
        let mut proxy = Proxy::all(&proxy_config.url)
            .map_err(|e| ApiError::config(format!("invalid proxy URL: {e}")))?;
        if let (Some(username), Some(password)) = (&proxy_config.username, &proxy_config.password)
        {
            proxy = proxy.basic_auth(username, password);
        }
        builder = builder.proxy(proxy);
        tracing::debug!("routing requests through proxy {}", proxy_config.url);
    }

    builder
        .build()
        .map_err(|e| ApiError::config(format!("failed to build HTTP client: {e}")))
}
