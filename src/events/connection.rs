//! WebSocket connection task
//!
//! Owns the socket for the life of the bus: authenticates, pumps inbound
//! frames into the handler registry, drains the outbound queue, and
//! reconnects with capped exponential backoff. After
//! `MAX_RECONNECT_ATTEMPTS` consecutive failures the bus parks in the
//! `Error` state until `connect` is called again.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use crate::error::{ApiError, Result};
use crate::events::bus::BusShared;
use crate::events::{ConnectionState, EventType};

pub(crate) const MAX_RECONNECT_ATTEMPTS: u32 = 5;
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Delay before reconnect attempt `attempt` (1-based), capped at 30s
pub(crate) fn reconnect_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    base.saturating_mul(factor).min(MAX_RECONNECT_DELAY)
}

pub(crate) async fn run(shared: Arc<BusShared>, mut shutdown: watch::Receiver<bool>) {
    let mut attempt = 0u32;

    loop {
        shared.state.send_replace(ConnectionState::Connecting);

        match open(&shared).await {
            Ok(ws) => {
                attempt = 0;
                info!("websocket connected");
                shared.state.send_replace(ConnectionState::Connected);
                let finished = pump(&shared, ws, &mut shutdown).await;
                *shared.outbound.write() = None;
                if finished {
                    shared.state.send_replace(ConnectionState::Disconnected);
                    return;
                }
                warn!("websocket connection lost");
            }
            Err(e) => {
                warn!("websocket connect failed: {}", e);
            }
        }

        attempt += 1;
        if attempt > MAX_RECONNECT_ATTEMPTS {
            warn!(
                attempts = MAX_RECONNECT_ATTEMPTS,
                "giving up on websocket reconnection"
            );
            shared.state.send_replace(ConnectionState::Error);
            return;
        }

        let delay = reconnect_delay(shared.reconnect_base, attempt);
        debug!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            "websocket reconnecting"
        );
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => {
                shared.state.send_replace(ConnectionState::Disconnected);
                return;
            }
        }
    }
}

/// Dial the endpoint and send the auth frame
async fn open(shared: &BusShared) -> Result<WsStream> {
    let token = shared
        .store
        .get()
        .map(|c| c.access_token)
        .ok_or_else(|| ApiError::unauthorized("no credentials for websocket"))?;

    let url = format!("{}?token={}", shared.url, urlencoding::encode(&token));
    let (mut ws, _) = connect_async(&url).await.map_err(|e| ApiError::Network {
        message: format!("websocket handshake failed: {e}"),
    })?;

    let auth = json!({"type": "auth", "token": token});
    ws.send(Message::Text(auth.to_string()))
        .await
        .map_err(|e| ApiError::Network {
            message: format!("websocket auth frame failed: {e}"),
        })?;

    Ok(ws)
}

/// Drive one live connection. Returns true on orderly shutdown, false when
/// the socket dropped and a reconnect should follow.
async fn pump(
    shared: &Arc<BusShared>,
    ws: WsStream,
    shutdown: &mut watch::Receiver<bool>,
) -> bool {
    let (mut sink, mut stream) = ws.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
    *shared.outbound.write() = Some(outbound_tx);

    loop {
        tokio::select! {
            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => handle_frame(shared, &text),
                    Some(Ok(Message::Ping(payload))) => {
                        if sink.send(Message::Pong(payload)).await.is_err() {
                            return false;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => return false,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("websocket read error: {}", e);
                        return false;
                    }
                }
            }
            outgoing = outbound_rx.recv() => {
                // sender lives in BusShared, the channel cannot close here
                if let Some(message) = outgoing {
                    if let Err(e) = sink.send(message).await {
                        warn!("websocket write error: {}", e);
                        return false;
                    }
                }
            }
            _ = shutdown.changed() => {
                let _ = sink.send(Message::Close(None)).await;
                return true;
            }
        }
    }
}

/// Parse a text frame and dispatch it to subscribers
fn handle_frame(shared: &BusShared, text: &str) {
    let value: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(_) => {
            debug!("ignoring non-JSON websocket frame");
            return;
        }
    };
    let Some(kind) = value.get("type").and_then(Value::as_str) else {
        debug!("ignoring websocket frame without a type");
        return;
    };
    let Some(event_type) = EventType::parse(kind) else {
        debug!(kind, "ignoring unknown event type");
        return;
    };
    let data = value.get("data").cloned().unwrap_or(Value::Null);
    shared.registry.dispatch(event_type, &data);
}
