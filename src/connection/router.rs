//! OPACK message dispatch
//!
//! The router is the sole listener of a connection's frames. It correlates
//! responses to requests by transaction id, matches pairing replies by
//! their frame type, and fans events out to subscribers.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::{Mutex, oneshot};

use super::transport::{Connection, FrameListener};
use super::{Frame, FrameType, message_type};
use crate::error::CompanionError;
use crate::protocol::opack::{self, Value};

type PendingSender = oneshot::Sender<Result<Value, CompanionError>>;

/// Callback invoked with the full message map of a matching event.
pub type EventHandler = Box<dyn Fn(&Value) + Send + Sync>;

/// Message router for one Companion connection.
pub struct Router {
    connection: Connection,
    command_timeout: Duration,
    /// In-flight requests keyed by transaction id.
    pending_requests: Mutex<HashMap<u32, PendingSender>>,
    /// In-flight pairing exchanges keyed by the expected reply frame type.
    pending_auth: Mutex<HashMap<FrameType, PendingSender>>,
    /// Event subscribers keyed by message identifier.
    listeners: Mutex<HashMap<String, Vec<EventHandler>>>,
    next_xid: AtomicU32,
}

impl Router {
    /// Create a router and install it as the connection's listener.
    pub async fn attach(connection: Connection, command_timeout: Duration) -> Arc<Self> {
        // Start somewhere random so ids rarely collide across reconnects.
        let start_xid = rand::thread_rng().gen_range(0..0x1_0000u32);

        let router = Arc::new(Self {
            connection,
            command_timeout,
            pending_requests: Mutex::new(HashMap::new()),
            pending_auth: Mutex::new(HashMap::new()),
            listeners: Mutex::new(HashMap::new()),
            next_xid: AtomicU32::new(start_xid),
        });

        router
            .connection
            .set_listener(Arc::clone(&router) as Arc<dyn FrameListener>)
            .await;
        router
    }

    /// The connection this router listens on.
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    fn next_xid(&self) -> u32 {
        self.next_xid.fetch_add(1, Ordering::Relaxed)
    }

    /// Send an OPACK-encoded pairing payload and await the reply frame.
    ///
    /// # Errors
    ///
    /// Returns error on send failure, timeout, connection loss, or a
    /// concurrent exchange awaiting the same reply type.
    pub async fn exchange_auth(
        &self,
        frame_type: FrameType,
        content: &Value,
    ) -> Result<Value, CompanionError> {
        let reply_type = frame_type
            .expected_reply()
            .ok_or_else(|| CompanionError::Protocol(format!("{frame_type:?} is not an auth frame")))?;

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending_auth.lock().await;
            if pending.contains_key(&reply_type) {
                return Err(CompanionError::Protocol(format!(
                    "auth exchange already awaiting {reply_type:?}"
                )));
            }
            pending.insert(reply_type, tx);
        }

        let payload = opack::pack(content);
        if let Err(e) = self.connection.send_frame(frame_type, &payload).await {
            self.pending_auth.lock().await.remove(&reply_type);
            return Err(e.into());
        }

        match tokio::time::timeout(self.command_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(CompanionError::ConnectionLost),
            Err(_) => {
                self.pending_auth.lock().await.remove(&reply_type);
                Err(CompanionError::frame_timeout(reply_type))
            }
        }
    }

    /// Send a request and await the response with the matching `_x`.
    ///
    /// Returns the full response message map.
    ///
    /// # Errors
    ///
    /// Returns error on send failure, timeout, or connection loss.
    pub async fn send_command(
        &self,
        identifier: &str,
        content: Value,
    ) -> Result<Value, CompanionError> {
        let xid = self.next_xid();
        let message = Value::Dict(vec![
            ("_i".to_string(), Value::String(identifier.to_string())),
            ("_t".to_string(), Value::Int(message_type::REQUEST)),
            ("_c".to_string(), content),
            ("_x".to_string(), Value::Int(u64::from(xid))),
        ]);

        let (tx, rx) = oneshot::channel();
        // Register before sending so the response cannot win the race.
        self.pending_requests.lock().await.insert(xid, tx);

        let payload = opack::pack(&message);
        if let Err(e) = self
            .connection
            .send_frame(FrameType::EOpack, &payload)
            .await
        {
            self.pending_requests.lock().await.remove(&xid);
            return Err(e.into());
        }

        match tokio::time::timeout(self.command_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(CompanionError::ConnectionLost),
            Err(_) => {
                self.pending_requests.lock().await.remove(&xid);
                Err(CompanionError::timeout(format!(
                    "response to {identifier} (_x={xid})"
                )))
            }
        }
    }

    /// Fire-and-forget event message.
    ///
    /// # Errors
    ///
    /// Returns error if the send fails.
    pub async fn send_event(&self, identifier: &str, content: Value) -> Result<(), CompanionError> {
        let message = Value::Dict(vec![
            ("_i".to_string(), Value::String(identifier.to_string())),
            ("_t".to_string(), Value::Int(message_type::EVENT)),
            ("_c".to_string(), content),
            ("_x".to_string(), Value::Int(u64::from(self.next_xid()))),
        ]);

        let payload = opack::pack(&message);
        self.connection
            .send_frame(FrameType::EOpack, &payload)
            .await?;
        Ok(())
    }

    /// Register interest in a named event with the device.
    ///
    /// # Errors
    ///
    /// Returns error if the send fails.
    pub async fn subscribe_event(&self, name: &str) -> Result<(), CompanionError> {
        let content = Value::Dict(vec![(
            "_regEvents".to_string(),
            Value::Array(vec![Value::String(name.to_string())]),
        )]);
        self.send_event("_interest", content).await
    }

    /// Attach a local handler for events with the given identifier.
    pub async fn add_event_handler(&self, identifier: &str, handler: EventHandler) {
        self.listeners
            .lock()
            .await
            .entry(identifier.to_string())
            .or_default()
            .push(handler);
    }

    async fn handle_auth_frame(&self, frame: Frame) {
        let value = match opack::unpack(&frame.payload) {
            Ok(value) => value,
            Err(e) => {
                tracing::debug!(error = %e, frame_type = ?frame.frame_type, "dropping undecodable auth frame");
                return;
            }
        };

        if let Some(tx) = self.pending_auth.lock().await.remove(&frame.frame_type) {
            let _ = tx.send(Ok(value));
        } else {
            tracing::debug!(frame_type = ?frame.frame_type, "auth frame with no pending exchange");
        }
    }

    async fn handle_message_frame(&self, frame: Frame) {
        let message = match opack::unpack(&frame.payload) {
            Ok(value) => value,
            Err(e) => {
                tracing::debug!(error = %e, "dropping undecodable message frame");
                return;
            }
        };

        let message_kind = message.get("_t").and_then(Value::as_u64);
        match message_kind {
            Some(message_type::RESPONSE) => {
                let Some(xid) = message.get("_x").and_then(Value::as_u64) else {
                    tracing::debug!("response without transaction id");
                    return;
                };
                #[allow(clippy::cast_possible_truncation)]
                let xid = xid as u32;
                if let Some(tx) = self.pending_requests.lock().await.remove(&xid) {
                    let _ = tx.send(Ok(message));
                } else {
                    tracing::debug!(xid, "response with no pending request");
                }
            }
            Some(message_type::EVENT) => {
                let Some(identifier) = message.get("_i").and_then(Value::as_str) else {
                    tracing::debug!("event without identifier");
                    return;
                };
                let listeners = self.listeners.lock().await;
                if let Some(handlers) = listeners.get(identifier) {
                    for handler in handlers {
                        handler(&message);
                    }
                }
            }
            Some(message_type::REQUEST) => {
                tracing::debug!(
                    identifier = message.get("_i").and_then(|v| v.as_str()),
                    "ignoring device-initiated request"
                );
            }
            _ => tracing::debug!("message with unknown _t"),
        }
    }
}

#[cfg(test)]
impl Router {
    pub(crate) async fn pending_request_count(&self) -> usize {
        self.pending_requests.lock().await.len()
    }

    pub(crate) async fn pending_auth_count(&self) -> usize {
        self.pending_auth.lock().await.len()
    }
}

#[async_trait]
impl FrameListener for Router {
    async fn on_frame(&self, frame: Frame) {
        if frame.frame_type.is_auth() {
            self.handle_auth_frame(frame).await;
        } else if frame.frame_type.is_opack_message() {
            self.handle_message_frame(frame).await;
        } else {
            tracing::debug!(frame_type = ?frame.frame_type, "ignoring frame");
        }
    }

    async fn on_close(&self) {
        // Reject everything in flight exactly once; listeners go silently.
        for (_, tx) in self.pending_requests.lock().await.drain() {
            let _ = tx.send(Err(CompanionError::ConnectionLost));
        }
        for (_, tx) in self.pending_auth.lock().await.drain() {
            let _ = tx.send(Err(CompanionError::ConnectionLost));
        }
        self.listeners.lock().await.clear();
    }
}
