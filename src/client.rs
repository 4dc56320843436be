//! Viport API client
//!
//! One `ApiClient` owns the HTTP connection pool, the token store, and the
//! refresh guard. Every request goes through [`ApiClient::send`], which
//! attaches the bearer token and a correlation id, replays once after a
//! successful token refresh, waits out 429s, and retries network failures
//! with exponential backoff before handing the body to the envelope
//! normalizer.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use reqwest::header::{HeaderName, HeaderValue};
use reqwest::multipart::{Form, Part};
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{ApiError, Result};
use crate::http_client::build_client;
use crate::model::config::ClientConfig;
use crate::model::credentials::Credentials;
use crate::model::envelope::{self, RateLimitInfo};
use crate::refresh::{RefreshGuard, TokenRefreshHook, UnauthorizedHook};
use crate::retry::RetryPolicy;
use crate::token_store::{MemoryTokenStore, SharedTokenStore};

/// Per-request knobs; the zero value is right for almost every call
#[derive(Debug, Default, Clone)]
pub struct RequestOptions {
    /// Send without a bearer token even when one is stored
    pub skip_auth: bool,
    /// Extra headers for this request only
    pub headers: Vec<(String, String)>,
    /// Query string parameters
    pub query: Vec<(String, String)>,
    /// Override the client-wide timeout for this request only
    pub timeout: Option<Duration>,
}

impl RequestOptions {
    pub fn unauthenticated() -> Self {
        Self {
            skip_auth: true,
            ..Self::default()
        }
    }
}

/// One file in a multipart upload
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub field_name: String,
    pub file_name: String,
    pub mime_type: String,
    pub data: Bytes,
}

/// Invoked with `(bytes_sent, bytes_total)` as upload body chunks go out
pub type ProgressCallback = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// Payload of `GET /health`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub status: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

pub struct ApiClient {
    config: ClientConfig,
    http: reqwest::Client,
    store: SharedTokenStore,
    guard: RefreshGuard,
    retry: RetryPolicy,
    rate_limit: parking_lot::Mutex<Option<RateLimitInfo>>,
}

impl ApiClient {
    /// Client with an in-memory token store and no lifecycle hooks
    pub fn new(config: ClientConfig) -> Result<Self> {
        Self::with_hooks(config, Arc::new(MemoryTokenStore::new()), None, None)
    }

    /// Client over a caller-provided token store
    pub fn with_store(config: ClientConfig, store: SharedTokenStore) -> Result<Self> {
        Self::with_hooks(config, store, None, None)
    }

    /// Full constructor with refresh/unauthorized notification hooks
    pub fn with_hooks(
        config: ClientConfig,
        store: SharedTokenStore,
        on_token_refresh: Option<TokenRefreshHook>,
        on_unauthorized: Option<UnauthorizedHook>,
    ) -> Result<Self> {
        let proxy = config.proxy_config();
        let http = build_client(proxy.as_ref(), config.timeout_secs, config.tls_backend)?;
        let retry = RetryPolicy::new(
            config.max_retries,
            Duration::from_millis(config.retry_delay_ms),
        );
        let guard = RefreshGuard::new(store.clone(), on_token_refresh, on_unauthorized);
        Ok(Self {
            config,
            http,
            store,
            guard,
            retry,
            rate_limit: parking_lot::Mutex::new(None),
        })
    }

    /// Store credentials, typically after a login response
    pub fn set_credentials(&self, credentials: Credentials) {
        self.store.set(credentials);
    }

    /// Drop stored credentials, logging the session out locally
    pub fn clear_credentials(&self) {
        self.store.clear();
    }

    /// Currently stored credentials, if any
    pub fn credentials(&self) -> Option<Credentials> {
        self.store.get()
    }

    /// Rate limit headers from the most recent response that carried them
    pub fn rate_limit(&self) -> Option<RateLimitInfo> {
        *self.rate_limit.lock()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.send(Method::GET, path, None, RequestOptions::default())
            .await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        self.send_json(Method::POST, path, body, RequestOptions::default())
            .await
    }

    pub async fn put<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        self.send_json(Method::PUT, path, body, RequestOptions::default())
            .await
    }

    pub async fn patch<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        self.send_json(Method::PATCH, path, body, RequestOptions::default())
            .await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.send(Method::DELETE, path, None, RequestOptions::default())
            .await
    }

    /// Serialize the body up front so it can be replayed across retries
    pub async fn send_json<T: DeserializeOwned, B: Serialize>(
        &self,
        method: Method,
        path: &str,
        body: &B,
        options: RequestOptions,
    ) -> Result<T> {
        let body = serde_json::to_value(body)
            .map_err(|e| ApiError::config(format!("unserializable request body: {e}")))?;
        self.send(method, path, Some(body), options).await
    }

    /// Issue a request and normalize its response envelope
    ///
    /// A 401 triggers one single-flight refresh and one replay. A 429 waits
    /// out `Retry-After` up to the retry budget. Network failures back off
    /// exponentially up to the same budget. Timeouts fail immediately.
    pub async fn send<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        options: RequestOptions,
    ) -> Result<T> {
        let url = self.url_for(path);
        let request_id = generate_request_id();
        let mut network_attempt = 0u32;
        let mut rate_limit_attempt = 0u32;
        let mut refreshed = false;

        loop {
            let token = if options.skip_auth {
                None
            } else {
                self.store.get().map(|c| c.access_token)
            };

            let request = self.build_request(&method, &url, &request_id, token.as_deref(), &body, &options)?;
            let response = match request.send().await {
                Ok(response) => response,
                Err(e) => {
                    let err = ApiError::from_transport(e);
                    if !matches!(err, ApiError::Network { .. }) {
                        return Err(err);
                    }
                    network_attempt += 1;
                    if self.retry.is_exhausted(network_attempt) {
                        return Err(err);
                    }
                    let delay = self.retry.backoff_delay(network_attempt);
                    warn!(
                        attempt = network_attempt,
                        delay_ms = delay.as_millis() as u64,
                        "network error, retrying: {}",
                        err
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
            };

            if let Some(info) = RateLimitInfo::from_headers(response.headers()) {
                *self.rate_limit.lock() = Some(info);
            }

            let status = response.status();
            if status == StatusCode::UNAUTHORIZED && !options.skip_auth && !refreshed {
                let Some(stale) = token else {
                    return Err(ApiError::unauthorized("no credentials stored"));
                };
                debug!(%request_id, "401 received, refreshing token");
                self.guard
                    .refresh(&self.http, &self.config.base_url, &stale)
                    .await?;
                refreshed = true;
                continue;
            }

            if status == StatusCode::TOO_MANY_REQUESTS {
                rate_limit_attempt += 1;
                if !self.retry.is_exhausted(rate_limit_attempt) {
                    let delay = self.retry.rate_limit_delay(response.headers());
                    warn!(
                        attempt = rate_limit_attempt,
                        delay_ms = delay.as_millis() as u64,
                        "rate limited, waiting before replay"
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
                // budget spent, surface the 429 itself
            }

            let bytes = response.bytes().await.map_err(ApiError::from_transport)?;
            return envelope::normalize(status, &bytes);
        }
    }

    /// Multipart upload with byte-level progress reporting
    ///
    /// Uploads are never retried on network failure: the server may have a
    /// partial body. A 401 still gets the one refresh-and-replay, with the
    /// form and progress counter rebuilt from scratch.
    pub async fn upload<T: DeserializeOwned>(
        &self,
        path: &str,
        files: &[UploadFile],
        fields: &[(String, String)],
        progress: Option<ProgressCallback>,
    ) -> Result<T> {
        let url = self.url_for(path);
        let request_id = generate_request_id();
        let total: u64 = files.iter().map(|f| f.data.len() as u64).sum();
        let mut refreshed = false;

        loop {
            let token = self.store.get().map(|c| c.access_token);
            let form = build_upload_form(files, fields, total, progress.clone())?;
            let mut request = self
                .http
                .request(Method::POST, &url)
                .header("X-Request-ID", &request_id)
                .multipart(form);
            for (name, value) in &self.config.headers {
                request = request.header(as_header_name(name)?, as_header_value(value)?);
            }
            if let Some(token) = &token {
                request = request.bearer_auth(token);
            }

            let response = request.send().await.map_err(ApiError::from_transport)?;
            if let Some(info) = RateLimitInfo::from_headers(response.headers()) {
                *self.rate_limit.lock() = Some(info);
            }

            let status = response.status();
            if status == StatusCode::UNAUTHORIZED && !refreshed {
                let Some(stale) = token else {
                    return Err(ApiError::unauthorized("no credentials stored"));
                };
                debug!(%request_id, "401 during upload, refreshing token");
                self.guard
                    .refresh(&self.http, &self.config.base_url, &stale)
                    .await?;
                refreshed = true;
                continue;
            }

            let bytes = response.bytes().await.map_err(ApiError::from_transport)?;
            return envelope::normalize(status, &bytes);
        }
    }

    /// Event bus bound to this client's token store
    ///
    /// Requires `websocket_url` in the configuration.
    pub fn events(&self) -> Result<crate::events::EventBus> {
        let url = self
            .config
            .websocket_url
            .as_deref()
            .ok_or_else(|| ApiError::config("websocket_url is not configured"))?;
        Ok(crate::events::EventBus::new(url, self.store.clone()))
    }

    /// `GET /health`, unauthenticated
    pub async fn health_check(&self) -> Result<HealthStatus> {
        self.send(
            Method::GET,
            "/health",
            None,
            RequestOptions::unauthenticated(),
        )
        .await
    }

    fn url_for(&self, path: &str) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        if path.starts_with('/') {
            format!("{base}{path}")
        } else {
            format!("{base}/{path}")
        }
    }

    fn build_request(
        &self,
        method: &Method,
        url: &str,
        request_id: &str,
        token: Option<&str>,
        body: &Option<Value>,
        options: &RequestOptions,
    ) -> Result<reqwest::RequestBuilder> {
        let mut request = self
            .http
            .request(method.clone(), url)
            .header("X-Request-ID", request_id);
        for (name, value) in &self.config.headers {
            request = request.header(as_header_name(name)?, as_header_value(value)?);
        }
        for (name, value) in &options.headers {
            request = request.header(as_header_name(name)?, as_header_value(value)?);
        }
        if !options.query.is_empty() {
            request = request.query(&options.query);
        }
        if let Some(timeout) = options.timeout {
            request = request.timeout(timeout);
        }
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }
        Ok(request)
    }
}

fn build_upload_form(
    files: &[UploadFile],
    fields: &[(String, String)],
    total: u64,
    progress: Option<ProgressCallback>,
) -> Result<Form> {
    let sent = Arc::new(AtomicU64::new(0));
    let mut form = Form::new();
    for (name, value) in fields {
        form = form.text(name.clone(), value.clone());
    }
    for file in files {
        let part = progress_part(file, total, sent.clone(), progress.clone())?;
        form = form.part(file.field_name.clone(), part);
    }
    Ok(form)
}

/// Wrap a file's bytes in a chunked stream that reports cumulative progress
fn progress_part(
    file: &UploadFile,
    total: u64,
    sent: Arc<AtomicU64>,
    progress: Option<ProgressCallback>,
) -> Result<Part> {
    const CHUNK_SIZE: usize = 64 * 1024;

    let len = file.data.len() as u64;
    let data = file.data.clone();
    let chunks: Vec<Bytes> = (0..data.len())
        .step_by(CHUNK_SIZE)
        .map(|start| data.slice(start..usize::min(start + CHUNK_SIZE, data.len())))
        .collect();

    let stream = futures::stream::iter(chunks.into_iter().map(move |chunk| {
        let now = sent.fetch_add(chunk.len() as u64, Ordering::SeqCst) + chunk.len() as u64;
        if let Some(cb) = &progress {
            cb(now, total);
        }
        Ok::<Bytes, std::convert::Infallible>(chunk)
    }));

    Part::stream_with_length(reqwest::Body::wrap_stream(stream), len)
        .file_name(file.file_name.clone())
        .mime_str(&file.mime_type)
        .map_err(|e| ApiError::config(format!("invalid mime type {}: {e}", file.mime_type)))
}

fn as_header_name(name: &str) -> Result<HeaderName> {
    name.parse::<HeaderName>()
        .map_err(|_| ApiError::config(format!("invalid header name: {name}")))
}

fn as_header_value(value: &str) -> Result<HeaderValue> {
    value
        .parse::<HeaderValue>()
        .map_err(|_| ApiError::config("invalid header value"))
}

/// Correlation id: random base36 followed by the current millis in base36
pub(crate) fn generate_request_id() -> String {
    format!(
        "{}-{}",
        to_base36(fastrand::u64(..)),
        to_base36(Utc::now().timestamp_millis() as u64)
    )
}

fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize] as char);
        n /= 36;
    }
    out.iter().rev().collect()
}
