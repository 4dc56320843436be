//! Credential storage
//!
//! The client reads tokens through the [`TokenStore`] trait so callers can
//! keep them in memory, on disk, or in whatever their platform provides.
//! Implementations replace the whole credential pair atomically; partial
//! updates are not expressible through this interface.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

use crate::error::{ApiError, Result};
use crate::model::credentials::Credentials;

/// Pluggable credential storage
pub trait TokenStore: Send + Sync {
    /// Current credentials, if any
    fn get(&self) -> Option<Credentials>;

    /// Replace the stored pair
    fn set(&self, credentials: Credentials);

    /// Drop the stored pair
    fn clear(&self);
}

/// In-memory store, the default
#[derive(Default)]
pub struct MemoryTokenStore {
    inner: Mutex<Option<Credentials>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenStore for MemoryTokenStore {
    fn get(&self) -> Option<Credentials> {
        self.inner.lock().clone()
    }

    fn set(&self, credentials: Credentials) {
        *self.inner.lock() = Some(credentials);
    }

    fn clear(&self) {
        *self.inner.lock() = None;
    }
}

/// File-backed store persisting credentials as pretty-printed JSON
///
/// Writes go through the in-memory copy first; persistence failures are
/// logged and do not fail the request that triggered them.
pub struct FileTokenStore {
    path: PathBuf,
    cached: Mutex<Option<Credentials>>,
}

impl FileTokenStore {
    /// Open the store, loading any credentials already on disk
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let cached = match std::fs::read_to_string(&path) {
            Ok(content) => Some(Credentials::from_json(&content).map_err(|e| {
                ApiError::config(format!(
                    "invalid credentials file {}: {e}",
                    path.display()
                ))
            })?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                return Err(ApiError::config(format!(
                    "failed to read credentials from {}: {e}",
                    path.display()
                )));
            }
        };
        Ok(Self {
            path,
            cached: Mutex::new(cached),
        })
    }

    fn persist(&self, credentials: Option<&Credentials>) {
        let result = match credentials {
            Some(creds) => match creds.to_pretty_json() {
                Ok(json) => std::fs::write(&self.path, json),
                Err(e) => {
                    warn!("failed to serialize credentials: {}", e);
                    return;
                }
            },
            None => match std::fs::remove_file(&self.path) {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
                _ => Ok(()),
            },
        };
        if let Err(e) = result {
            warn!("failed to persist credentials to {}: {}", self.path.display(), e);
        }
    }
}

impl TokenStore for FileTokenStore {
    fn get(&self) -> Option<Credentials> {
        self.cached.lock().clone()
    }

    fn set(&self, credentials: Credentials) {
        let mut cached = self.cached.lock();
        self.persist(Some(&credentials));
        *cached = Some(credentials);
    }

    fn clear(&self) {
        let mut cached = self.cached.lock();
        self.persist(None);
        *cached = None;
    }
}

/// Shared handle used throughout the client
pub type SharedTokenStore = Arc<dyn TokenStore>;
