//! In-memory protocol stack: a scriptable loopback link.
//!
//! Stands in for the real wire stack in tests and in the CLI's loopback
//! mode. By default the link accepts any credentials and acknowledges
//! every text message it is handed; auth rejection and dropped acks can be
//! scripted per instance. A cloneable [`MemoryHandle`] lets other threads
//! inject inbound entities and inspect what was sent.

use chrono::Utc;
use lib::config::Credentials;
use lib::entity::{
    AckClass, IncomingAck, IncomingMessage, IncomingReceipt, InboundEntity, OutboundEntity,
};
use lib::transport::{ConnectionInfo, StackEvent, Transport};
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

const AUTH_REJECT_REASON: &str = "Auth incorrect";

#[derive(Default)]
struct Inner {
    connected: bool,
    events: VecDeque<StackEvent>,
    sent: Vec<OutboundEntity>,
}

#[derive(Default)]
struct Shared {
    inner: Mutex<Inner>,
    wake: Condvar,
}

impl Shared {
    fn lock(&self) -> Result<MutexGuard<'_, Inner>, String> {
        self.inner
            .lock()
            .map_err(|_| "memory transport state poisoned".to_string())
    }

    fn push_event(&self, event: StackEvent) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.events.push_back(event);
            self.wake.notify_all();
        }
    }
}

/// Loopback transport implementing [`Transport`] over a queue of scripted
/// and injected events.
pub struct MemoryTransport {
    shared: Arc<Shared>,
    fail_auth: bool,
    auto_ack: bool,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    /// A link that accepts any credentials and acks every sent message.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared::default()),
            fail_auth: false,
            auto_ack: true,
        }
    }

    /// Script the link to reject the connect attempt.
    pub fn with_auth_failure(mut self) -> Self {
        self.fail_auth = true;
        self
    }

    /// Script the link to never acknowledge sent messages.
    pub fn with_dropped_acks(mut self) -> Self {
        self.auto_ack = false;
        self
    }

    /// Producer-side handle: inject inbound entities, inspect sent ones.
    pub fn handle(&self) -> MemoryHandle {
        MemoryHandle {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Transport for MemoryTransport {
    fn connect(&mut self, credentials: &Credentials, _encryption: bool) -> Result<(), String> {
        let mut inner = self.shared.lock()?;
        if self.fail_auth {
            log::debug!("memory transport: rejecting connect for {}", credentials.address);
            inner.connected = false;
            inner.events.push_back(StackEvent::ConnectFailed {
                reason: AUTH_REJECT_REASON.to_string(),
            });
        } else {
            log::debug!("memory transport: link up for {}", credentials.address);
            inner.connected = true;
            inner.events.push_back(StackEvent::Connected(ConnectionInfo {
                kind: Some("free".to_string()),
                expiration: None,
            }));
        }
        self.shared.wake.notify_all();
        Ok(())
    }

    fn disconnect(&mut self) {
        if let Ok(mut inner) = self.shared.inner.lock() {
            inner.connected = false;
            self.shared.wake.notify_all();
        }
    }

    fn send(&mut self, entity: &OutboundEntity) -> Result<(), String> {
        let mut inner = self.shared.lock()?;
        inner.sent.push(entity.clone());
        if self.auto_ack {
            if let OutboundEntity::Message(msg) = entity {
                inner.events.push_back(StackEvent::Entity(InboundEntity::Ack(IncomingAck {
                    id: msg.id.clone(),
                    from: msg.to.clone(),
                    class: AckClass::Text,
                    timestamp: Utc::now(),
                })));
            }
        }
        self.shared.wake.notify_all();
        Ok(())
    }

    fn pump(&mut self, timeout: Duration) -> Result<Vec<StackEvent>, String> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.shared.lock()?;
        while inner.events.is_empty() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let (guard, wait) = self
                .shared
                .wake
                .wait_timeout(inner, deadline - now)
                .map_err(|_| "memory transport state poisoned".to_string())?;
            inner = guard;
            if wait.timed_out() {
                break;
            }
        }
        Ok(inner.events.drain(..).collect())
    }

    fn active_connections(&self) -> usize {
        self.shared
            .inner
            .lock()
            .map(|inner| usize::from(inner.connected))
            .unwrap_or(0)
    }
}

/// Cloneable, thread-safe handle onto a [`MemoryTransport`].
#[derive(Clone)]
pub struct MemoryHandle {
    shared: Arc<Shared>,
}

impl MemoryHandle {
    pub fn is_connected(&self) -> bool {
        self.shared
            .inner
            .lock()
            .map(|inner| inner.connected)
            .unwrap_or(false)
    }

    /// Inject an inbound text message; returns its generated id.
    pub fn deliver_message(&self, from: &str, body: &str) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        self.shared
            .push_event(StackEvent::Entity(InboundEntity::Message(IncomingMessage {
                id: id.clone(),
                from: from.to_string(),
                body: body.to_string(),
                timestamp: Utc::now(),
            })));
        id
    }

    /// Inject an inbound delivery receipt.
    pub fn deliver_receipt(&self, id: &str, from: &str) {
        self.shared
            .push_event(StackEvent::Entity(InboundEntity::Receipt(IncomingReceipt {
                id: id.to_string(),
                from: from.to_string(),
                timestamp: Utc::now(),
            })));
    }

    /// Inject an inbound acknowledgement.
    pub fn deliver_ack(&self, id: &str, from: &str, class: AckClass) {
        self.shared
            .push_event(StackEvent::Entity(InboundEntity::Ack(IncomingAck {
                id: id.to_string(),
                from: from.to_string(),
                class,
                timestamp: Utc::now(),
            })));
    }

    /// Snapshot of everything the gateway handed to the link so far.
    pub fn sent(&self) -> Vec<OutboundEntity> {
        self.shared
            .inner
            .lock()
            .map(|inner| inner.sent.clone())
            .unwrap_or_default()
    }
}
