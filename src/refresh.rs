//! Single-flight token refresh
//!
//! Any number of requests can hit a 401 at the same moment; exactly one of
//! them performs the `POST /auth/refresh` exchange. The rest queue on the
//! guard's mutex and, once inside, re-read the store: if the token changed
//! while they waited, someone else already refreshed and they reuse the
//! result. If the store is empty the refresh failed and the session is over.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{ApiError, Result};
use crate::model::credentials::Credentials;
use crate::model::envelope::{self, RefreshRequest, RefreshResponse};
use crate::token_store::SharedTokenStore;

/// Called with the new credentials after every successful refresh
pub type TokenRefreshHook = Arc<dyn Fn(&Credentials) + Send + Sync>;

/// Called when the session is unrecoverable (refresh failed or no tokens)
pub type UnauthorizedHook = Arc<dyn Fn() + Send + Sync>;

pub(crate) struct RefreshGuard {
    lock: Mutex<()>,
    store: SharedTokenStore,
    on_token_refresh: Option<TokenRefreshHook>,
    on_unauthorized: Option<UnauthorizedHook>,
}

impl RefreshGuard {
    pub(crate) fn new(
        store: SharedTokenStore,
        on_token_refresh: Option<TokenRefreshHook>,
        on_unauthorized: Option<UnauthorizedHook>,
    ) -> Self {
        Self {
            lock: Mutex::new(()),
            store,
            on_token_refresh,
            on_unauthorized,
        }
    }

    /// Obtain fresh credentials after a 401 observed with `stale_token`
    ///
    /// Holds the guard for the duration of the exchange, so concurrent
    /// callers collapse into one network request. On failure the store is
    /// cleared and every queued caller gets `Unauthorized` without issuing
    /// its own refresh.
    pub(crate) async fn refresh(
        &self,
        http: &reqwest::Client,
        base_url: &str,
        stale_token: &str,
    ) -> Result<Credentials> {
        let _guard = self.lock.lock().await;

        // re-check under the lock: another caller may have finished first
        let current = match self.store.get() {
            Some(creds) => creds,
            None => {
                self.notify_unauthorized();
                return Err(ApiError::unauthorized("session expired"));
            }
        };
        if current.access_token != stale_token {
            debug!("token already refreshed by a concurrent request");
            return Ok(current);
        }
        if current.refresh_token.is_empty() {
            warn!("401 with no refresh token, ending session");
            self.store.clear();
            self.notify_unauthorized();
            return Err(ApiError::unauthorized("no refresh token available"));
        }

        match self.exchange(http, base_url, &current.refresh_token).await {
            Ok(response) => {
                let mut creds =
                    Credentials::new(response.access_token, response.refresh_token);
                if let Some(seconds) = response.expires_in {
                    creds = creds.with_expires_in(seconds);
                }
                self.store.set(creds.clone());
                info!("access token refreshed");
                if let Some(hook) = &self.on_token_refresh {
                    hook(&creds);
                }
                Ok(creds)
            }
            Err(e) => {
                warn!("token refresh failed: {}", e);
                self.store.clear();
                self.notify_unauthorized();
                Err(ApiError::unauthorized(format!("token refresh failed: {e}")))
            }
        }
    }

    async fn exchange(
        &self,
        http: &reqwest::Client,
        base_url: &str,
        refresh_token: &str,
    ) -> Result<RefreshResponse> {
        let url = format!("{}/auth/refresh", base_url.trim_end_matches('/'));
        let response = http
            .post(&url)
            .header("X-Request-ID", crate::client::generate_request_id())
            .json(&RefreshRequest {
                refresh_token: refresh_token.to_string(),
            })
            .send()
            .await
            .map_err(ApiError::from_transport)?;

        let status = response.status();
        let body = response.bytes().await.map_err(ApiError::from_transport)?;
        envelope::normalize(status, &body)
    }

    fn notify_unauthorized(&self) {
        if let Some(hook) = &self.on_unauthorized {
            hook();
        }
    }
}
