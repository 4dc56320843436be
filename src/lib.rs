//! Typed client for the Viport API
//!
//! The crate wraps the REST surface behind [`ApiClient`] and the real-time
//! surface behind [`events::EventBus`]. Responses arrive in a tagged
//! success/error envelope; callers see plain payloads or an [`ApiError`]
//! from a fixed taxonomy, never raw bodies. Token refresh is single-flight
//! and transparent, with configurable storage behind [`TokenStore`].
//!
//! ```no_run
//! use viport_client::{ApiClient, ClientConfig};
//!
//! # async fn demo() -> viport_client::Result<()> {
//! let client = ApiClient::new(ClientConfig::new("https://api.viport.example"))?;
//! let health = client.health_check().await?;
//! println!("api is {}", health.status);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod events;
pub mod http_client;
pub mod model;
mod refresh;
pub mod retry;
pub mod token_store;

pub use client::{
    ApiClient, HealthStatus, ProgressCallback, RequestOptions, UploadFile,
};
pub use error::{ApiError, Result};
pub use events::{ConnectionState, EventBus, EventHandler, EventType, Subscription};
pub use http_client::ProxyConfig;
pub use model::config::{ClientConfig, TlsBackend};
pub use model::credentials::Credentials;
pub use model::envelope::RateLimitInfo;
pub use refresh::{TokenRefreshHook, UnauthorizedHook};
pub use retry::RetryPolicy;
pub use token_store::{FileTokenStore, MemoryTokenStore, SharedTokenStore, TokenStore};

pub use reqwest::Method;
