//! Real-time event bus
//!
//! Typed publish/subscribe over the Viport WebSocket endpoint. Handlers are
//! registered per event type and fired from the connection task; the
//! connection reconnects with capped exponential backoff and gives up after
//! a bounded number of attempts.

mod bus;
mod connection;

pub use bus::{EventBus, EventHandler, Subscription};

use serde::{Deserialize, Serialize};

/// Event categories carried on the wire in the message's `type` field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Notification,
    Like,
    Comment,
    Follow,
    System,
}

impl EventType {
    /// Wire name, matching the serde representation
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Notification => "notification",
            EventType::Like => "like",
            EventType::Comment => "comment",
            EventType::Follow => "follow",
            EventType::System => "system",
        }
    }

    pub(crate) fn parse(s: &str) -> Option<Self> {
        match s {
            "notification" => Some(EventType::Notification),
            "like" => Some(EventType::Like),
            "comment" => Some(EventType::Comment),
            "follow" => Some(EventType::Follow),
            "system" => Some(EventType::System),
            _ => None,
        }
    }
}

/// Lifecycle of the underlying WebSocket connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected and not trying to be
    Disconnected,
    /// Connection or reconnection in progress
    Connecting,
    Connected,
    /// Reconnect attempts exhausted; stays here until `connect` is called
    Error,
}
