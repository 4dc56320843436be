//! Handler registry and the public bus surface

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde_json::{Value, json};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use crate::error::{ApiError, Result};
use crate::events::{ConnectionState, EventType};
use crate::events::connection;
use crate::token_store::SharedTokenStore;

/// Subscriber callback, invoked with the event's `data` payload
pub type EventHandler = Arc<dyn Fn(&Value) + Send + Sync>;

pub(crate) struct HandlerRegistry {
    next_id: AtomicU64,
    handlers: RwLock<HashMap<EventType, Vec<(u64, EventHandler)>>>,
}

impl HandlerRegistry {
    fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            handlers: RwLock::new(HashMap::new()),
        }
    }

    fn add(&self, event_type: EventType, handler: EventHandler) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers
            .write()
            .entry(event_type)
            .or_default()
            .push((id, handler));
        id
    }

    fn remove(&self, event_type: EventType, id: u64) {
        if let Some(list) = self.handlers.write().get_mut(&event_type) {
            list.retain(|(handler_id, _)| *handler_id != id);
        }
    }

    /// Fire every handler for the type; a panicking handler is dropped from
    /// the dispatch, not the registry, and never takes the connection down
    pub(crate) fn dispatch(&self, event_type: EventType, payload: &Value) {
        // clone out of the lock so handlers can subscribe/unsubscribe freely
        let handlers: Vec<EventHandler> = self
            .handlers
            .read()
            .get(&event_type)
            .map(|list| list.iter().map(|(_, h)| h.clone()).collect())
            .unwrap_or_default();

        for handler in handlers {
            if std::panic::catch_unwind(AssertUnwindSafe(|| handler(payload))).is_err() {
                warn!(event = event_type.as_str(), "event handler panicked");
            }
        }
    }

    #[cfg(test)]
    fn count(&self, event_type: EventType) -> usize {
        self.handlers
            .read()
            .get(&event_type)
            .map(|l| l.len())
            .unwrap_or(0)
    }
}

/// Handle returned by [`EventBus::subscribe`]; consume it to detach
pub struct Subscription {
    registry: Arc<HandlerRegistry>,
    event_type: EventType,
    id: u64,
}

impl Subscription {
    /// Detach the handler. Dropping the handle without calling this keeps
    /// the handler registered for the life of the bus.
    pub fn unsubscribe(self) {
        self.registry.remove(self.event_type, self.id);
    }
}

pub(crate) struct BusShared {
    pub(crate) registry: Arc<HandlerRegistry>,
    pub(crate) state: watch::Sender<ConnectionState>,
    pub(crate) outbound: RwLock<Option<mpsc::UnboundedSender<Message>>>,
    pub(crate) url: String,
    pub(crate) store: SharedTokenStore,
    pub(crate) reconnect_base: Duration,
}

/// Typed publish/subscribe over a managed WebSocket connection
pub struct EventBus {
    shared: Arc<BusShared>,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl EventBus {
    pub fn new(url: impl Into<String>, store: SharedTokenStore) -> Self {
        Self::with_reconnect_base(url, store, Duration::from_secs(1))
    }

    /// Bus with a custom base delay for the reconnect backoff
    pub fn with_reconnect_base(
        url: impl Into<String>,
        store: SharedTokenStore,
        reconnect_base: Duration,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            shared: Arc::new(BusShared {
                registry: Arc::new(HandlerRegistry::new()),
                state,
                outbound: RwLock::new(None),
                url: url.into(),
                store,
                reconnect_base,
            }),
            shutdown: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    /// Register a handler for one event type
    pub fn subscribe(&self, event_type: EventType, handler: EventHandler) -> Subscription {
        let id = self.shared.registry.add(event_type, handler);
        Subscription {
            registry: self.shared.registry.clone(),
            event_type,
            id,
        }
    }

    /// Send an event to the server; fails when not connected
    pub fn publish(&self, event_type: EventType, data: Value) -> Result<()> {
        let message = json!({"type": event_type.as_str(), "data": data});
        let sender = self.shared.outbound.read().clone();
        match sender {
            Some(sender) => sender
                .send(Message::Text(message.to_string()))
                .map_err(|_| ApiError::Network {
                    message: "websocket connection closed".to_string(),
                }),
            None => Err(ApiError::Network {
                message: "websocket not connected".to_string(),
            }),
        }
    }

    /// Start the connection task; a no-op while one is already running
    pub fn connect(&self) {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            debug!("event bus already connected");
            return;
        }
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        *self.shutdown.lock() = Some(shutdown_tx);
        *task = Some(tokio::spawn(connection::run(
            self.shared.clone(),
            shutdown_rx,
        )));
    }

    /// Stop the connection task and wait for it to wind down
    pub async fn disconnect(&self) {
        if let Some(shutdown) = self.shutdown.lock().take() {
            let _ = shutdown.send(true);
        }
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        self.shared
            .state
            .send_replace(ConnectionState::Disconnected);
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Watch channel mirroring [`EventBus::state`], for callers that want to
    /// await transitions instead of polling
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }
}
