//! Transport seam: the interface to the external protocol stack.
//!
//! The stack owns the wire format, sockets, authentication handshake, and
//! encryption; the gateway only hands it entities and pumps it for events.
//! Adapters (e.g. `memory-transport`) implement [`Transport`].

use crate::config::Credentials;
use crate::entity::{InboundEntity, OutboundEntity};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Session metadata reported by the stack on a successful connect.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    /// Account kind (e.g. "free").
    pub kind: Option<String>,
    /// Account expiration, unix seconds.
    pub expiration: Option<i64>,
}

/// Events surfaced by the protocol stack when pumped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackEvent {
    /// The link is up and authenticated.
    Connected(ConnectionInfo),
    /// The server rejected the connect attempt.
    ConnectFailed { reason: String },
    /// The link went down. `detached` is true when the close was requested
    /// rather than caused by the remote end.
    Disconnected { reason: String, detached: bool },
    /// A protocol entity arrived.
    Entity(InboundEntity),
}

/// Handle to a protocol stack driving one link.
///
/// All methods are called from the driver thread only. `pump` must block at
/// most `timeout` so the driver loop stays responsive to its idle and
/// wall-clock checks.
pub trait Transport {
    /// Begin connecting with the given credentials. Completion (or
    /// rejection) is reported via [`StackEvent`]s from `pump`.
    fn connect(&mut self, credentials: &Credentials, encryption: bool) -> Result<(), String>;

    /// Close the link. Idempotent.
    fn disconnect(&mut self);

    /// Hand an entity to the stack for delivery.
    fn send(&mut self, entity: &OutboundEntity) -> Result<(), String>;

    /// Drive the stack's sockets until quiescent, waiting at most `timeout`
    /// for activity. Returns the events that surfaced, in arrival order.
    fn pump(&mut self, timeout: Duration) -> Result<Vec<StackEvent>, String>;

    /// Number of live connections the stack is multiplexing. Zero means
    /// the link is idle and the unit of work can be wound down.
    fn active_connections(&self) -> usize;
}

/// Optional layer inserted between the gateway and the protocol core.
///
/// Layers observe or rewrite entities in flight; the default hooks pass
/// entities through unchanged.
pub trait StackLayer: Send {
    /// Layer name, unique within one gateway.
    fn name(&self) -> &str;

    /// Called for each entity arriving from the stack, bottom-up.
    fn on_inbound(&mut self, entity: InboundEntity) -> InboundEntity {
        entity
    }

    /// Called for each entity leaving the gateway, top-down.
    fn on_outbound(&mut self, entity: OutboundEntity) -> OutboundEntity {
        entity
    }
}

/// Validate an extra-layer list: names must be non-empty and unique.
pub fn validate_layers(layers: &[Box<dyn StackLayer>]) -> Result<(), String> {
    let mut seen: Vec<&str> = Vec::with_capacity(layers.len());
    for layer in layers {
        let name = layer.name();
        if name.trim().is_empty() {
            return Err("stack layer with empty name".to_string());
        }
        if seen.contains(&name) {
            return Err(format!("duplicate stack layer name: {}", name));
        }
        seen.push(name);
    }
    Ok(())
}

/// A core transport wrapped with the configured extra layers.
///
/// Outbound entities run through the layers in insertion order before
/// reaching the core; inbound entities run through them in reverse order.
pub struct LayeredTransport<T: Transport> {
    core: T,
    layers: Vec<Box<dyn StackLayer>>,
}

impl<T: Transport> LayeredTransport<T> {
    pub fn new(core: T, layers: Vec<Box<dyn StackLayer>>) -> Self {
        Self { core, layers }
    }
}

impl<T: Transport> Transport for LayeredTransport<T> {
    fn connect(&mut self, credentials: &Credentials, encryption: bool) -> Result<(), String> {
        self.core.connect(credentials, encryption)
    }

    fn disconnect(&mut self) {
        self.core.disconnect();
    }

    fn send(&mut self, entity: &OutboundEntity) -> Result<(), String> {
        let mut entity = entity.clone();
        for layer in self.layers.iter_mut() {
            entity = layer.on_outbound(entity);
        }
        self.core.send(&entity)
    }

    fn pump(&mut self, timeout: Duration) -> Result<Vec<StackEvent>, String> {
        let events = self.core.pump(timeout)?;
        if self.layers.is_empty() {
            return Ok(events);
        }
        Ok(events
            .into_iter()
            .map(|event| match event {
                StackEvent::Entity(mut entity) => {
                    for layer in self.layers.iter_mut().rev() {
                        entity = layer.on_inbound(entity);
                    }
                    StackEvent::Entity(entity)
                }
                other => other,
            })
            .collect())
    }

    fn active_connections(&self) -> usize {
        self.core.active_connections()
    }
}
