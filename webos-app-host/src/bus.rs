//! In-process message bus between running apps.
//!
//! One `MessageBus` exists per desktop session. It is created at bootstrap
//! and handed to every container, which registers an [`AppCommunication`]
//! endpoint under its app id.
//!
//! Delivery is synchronous and best-effort:
//! - a message reaches every live endpoint registered under its `to` id
//! - within an endpoint, every handler for the message type runs, in
//!   registration order
//! - messages with no endpoint or no matching handler are dropped
//!
//! Every published message is also copied to a broadcast tap (the
//! `app-message` stream) for observers such as dev tools.

use crate::error::{AppHostError, AppHostResult};
use crate::lock;
use crate::permissions::operations;
use crate::sandbox::{OperationContext, SandboxPolicy};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use tokio::sync::broadcast;
use tracing::{debug, trace};
use webos_types::{AppId, MessageId, Timestamp};

/// Capacity of the observer tap. Slow observers miss old messages.
pub const TAP_CAPACITY: usize = 256;

/// A message passed between apps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppMessage {
    pub id: MessageId,
    pub from: AppId,
    pub to: AppId,
    #[serde(rename = "type")]
    pub message_type: String,
    pub data: Value,
    pub timestamp: Timestamp,
}

/// Handle for removing one message handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

type Handler = Arc<dyn Fn(&AppMessage) + Send + Sync>;

struct EndpointHandlers {
    by_type: Mutex<HashMap<String, Vec<(HandlerId, Handler)>>>,
}

impl EndpointHandlers {
    fn handlers_for(&self, message_type: &str) -> Vec<Handler> {
        lock(&self.by_type)
            .get(message_type)
            .map(|hs| hs.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default()
    }
}

type EndpointList = Vec<(u64, Weak<EndpointHandlers>)>;

pub struct MessageBus {
    endpoints: RwLock<HashMap<AppId, EndpointList>>,
    tap: broadcast::Sender<AppMessage>,
    next_endpoint: AtomicU64,
    clock: Mutex<Option<Timestamp>>,
}

impl std::fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let apps: Vec<AppId> = self
            .endpoints
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        f.debug_struct("MessageBus").field("apps", &apps).finish()
    }
}

impl MessageBus {
    pub fn new() -> Arc<Self> {
        let (tap, _) = broadcast::channel(TAP_CAPACITY);
        Arc::new(Self {
            endpoints: RwLock::new(HashMap::new()),
            tap,
            next_endpoint: AtomicU64::new(0),
            clock: Mutex::new(None),
        })
    }

    /// Registers a new endpoint for `app_id`. Sending through it is gated by
    /// `sandbox`.
    pub fn endpoint(self: &Arc<Self>, app_id: AppId, sandbox: Arc<SandboxPolicy>) -> AppCommunication {
        let handlers = Arc::new(EndpointHandlers {
            by_type: Mutex::new(HashMap::new()),
        });
        let endpoint_id = self.next_endpoint.fetch_add(1, Ordering::Relaxed);
        self.endpoints
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(app_id.clone())
            .or_default()
            .push((endpoint_id, Arc::downgrade(&handlers)));
        debug!(app_id = %app_id, endpoint_id, "Communication endpoint registered");

        AppCommunication {
            app_id,
            endpoint_id,
            bus: Arc::clone(self),
            handlers,
            sandbox,
            next_handler: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Subscribes to the `app-message` stream of every published message.
    pub fn tap(&self) -> broadcast::Receiver<AppMessage> {
        self.tap.subscribe()
    }

    /// Number of live endpoints registered for `app_id`.
    pub fn endpoint_count(&self, app_id: &AppId) -> usize {
        self.endpoints
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(app_id)
            .map(|list| list.iter().filter(|(_, w)| w.strong_count() > 0).count())
            .unwrap_or(0)
    }

    /// Drops every endpoint registration. Endpoints still held by callers
    /// stop receiving messages.
    pub fn shutdown(&self) {
        self.endpoints
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        debug!("Message bus shut down");
    }

    fn next_timestamp(&self) -> Timestamp {
        let mut clock = lock(&self.clock);
        let ts = match *clock {
            Some(last) => last.tick(),
            None => Timestamp::now(),
        };
        *clock = Some(ts);
        ts
    }

    /// Delivers `message` and returns how many handlers ran.
    fn publish(&self, message: &AppMessage) -> usize {
        let _ = self.tap.send(message.clone());

        let targets: Vec<Arc<EndpointHandlers>> = self
            .endpoints
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&message.to)
            .map(|list| list.iter().filter_map(|(_, w)| w.upgrade()).collect())
            .unwrap_or_default();

        let mut delivered = 0;
        for endpoint in targets {
            for handler in endpoint.handlers_for(&message.message_type) {
                handler(message);
                delivered += 1;
            }
        }

        if delivered == 0 {
            trace!(
                to = %message.to,
                message_type = %message.message_type,
                "Message dropped: no matching handler"
            );
        }
        delivered
    }

    fn unregister(&self, app_id: &AppId, endpoint_id: u64) {
        let mut endpoints = self.endpoints.write().unwrap_or_else(|e| e.into_inner());
        if let Some(list) = endpoints.get_mut(app_id) {
            list.retain(|(id, w)| *id != endpoint_id && w.strong_count() > 0);
            if list.is_empty() {
                endpoints.remove(app_id);
            }
        }
    }
}

/// One app instance's connection to the message bus.
pub struct AppCommunication {
    app_id: AppId,
    endpoint_id: u64,
    bus: Arc<MessageBus>,
    handlers: Arc<EndpointHandlers>,
    sandbox: Arc<SandboxPolicy>,
    next_handler: AtomicU64,
    closed: AtomicBool,
}

impl std::fmt::Debug for AppCommunication {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppCommunication")
            .field("app_id", &self.app_id)
            .field("endpoint_id", &self.endpoint_id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl AppCommunication {
    pub fn app_id(&self) -> &AppId {
        &self.app_id
    }

    /// Sends `data` to every endpoint of `target`. Requires the
    /// `app_communication` permission. Returns the new message's id; an
    /// unknown target is not an error.
    pub fn send_message(
        &self,
        target: &AppId,
        message_type: impl Into<String>,
        data: impl Into<Value>,
    ) -> AppHostResult<MessageId> {
        if self.is_closed() {
            return Err(AppHostError::EndpointClosed(self.app_id.clone()));
        }
        let message_type = message_type.into();
        let context = OperationContext::new()
            .with("target", target.as_str())
            .with("type", message_type.as_str());
        self.sandbox
            .validate_operation(operations::INTER_APP_COMMUNICATION, &context)?;

        let message = AppMessage {
            id: MessageId::new(),
            from: self.app_id.clone(),
            to: target.clone(),
            message_type,
            data: data.into(),
            timestamp: self.bus.next_timestamp(),
        };
        let delivered = self.bus.publish(&message);
        trace!(
            from = %message.from,
            to = %message.to,
            message_type = %message.message_type,
            delivered,
            "Message sent"
        );
        Ok(message.id)
    }

    /// Registers a handler for one message type. Several handlers per type
    /// are allowed; all of them run.
    pub fn on_message<F>(&self, message_type: impl Into<String>, handler: F) -> HandlerId
    where
        F: Fn(&AppMessage) + Send + Sync + 'static,
    {
        let id = HandlerId(self.next_handler.fetch_add(1, Ordering::Relaxed));
        lock(&self.handlers.by_type)
            .entry(message_type.into())
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Removes one handler. Returns false if it was not registered.
    pub fn off_message(&self, message_type: &str, id: HandlerId) -> bool {
        let mut by_type = lock(&self.handlers.by_type);
        let Some(list) = by_type.get_mut(message_type) else {
            return false;
        };
        let before = list.len();
        list.retain(|(hid, _)| *hid != id);
        let removed = list.len() != before;
        if list.is_empty() {
            by_type.remove(message_type);
        }
        removed
    }

    pub fn handler_count(&self, message_type: &str) -> usize {
        lock(&self.handlers.by_type)
            .get(message_type)
            .map_or(0, Vec::len)
    }

    /// Unsubscribes from the bus and drops all handlers.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.bus.unregister(&self.app_id, self.endpoint_id);
        lock(&self.handlers.by_type).clear();
        debug!(app_id = %self.app_id, endpoint_id = self.endpoint_id, "Communication endpoint closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Drop for AppCommunication {
    fn drop(&mut self) {
        self.close();
    }
}
