//! Protocol entity value objects exchanged with the external protocol stack.
//!
//! Entities are immutable snapshots: a stable id, directional addressing
//! (`to` for outbound, `from` for inbound), and a discriminator tag. The
//! wire encoding is entirely the transport's concern.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Domain suffix for group conversations.
const GROUP_DOMAIN: &str = "g.us";
/// Domain suffix for direct (one-to-one) conversations.
const USER_DOMAIN: &str = "s.whatsapp.net";

/// Normalize a raw address into a fully-qualified JID.
///
/// Contains `@` → already qualified, passed through unchanged. Contains
/// `-` → group address, suffixed with the group domain. Otherwise →
/// direct-message address, suffixed with the user domain. Idempotent.
pub fn normalize_jid(raw: &str) -> String {
    if raw.contains('@') {
        raw.to_string()
    } else if raw.contains('-') {
        format!("{}@{}", raw, GROUP_DOMAIN)
    } else {
        format!("{}@{}", raw, USER_DOMAIN)
    }
}

/// Delivery class carried by acknowledgements: what kind of entity the ack
/// answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckClass {
    /// Acknowledges a text message.
    Text,
    /// Acknowledges a delivery receipt.
    Receipt,
}

impl AckClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            AckClass::Text => "text",
            AckClass::Receipt => "receipt",
        }
    }
}

/// Outbound text message addressed to a normalized JID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextMessage {
    pub id: String,
    pub to: String,
    pub body: String,
}

impl TextMessage {
    /// Build a message with a generated id, normalizing the address.
    pub fn new(to: &str, body: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            to: normalize_jid(to),
            body: body.into(),
        }
    }
}

/// Outbound acknowledgement answering an inbound message or receipt,
/// correlated by the same id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingAck {
    pub id: String,
    pub to: String,
    pub class: AckClass,
}

/// Inbound text message from a remote JID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingMessage {
    pub id: String,
    pub from: String,
    pub body: String,
    pub timestamp: DateTime<Utc>,
}

impl IncomingMessage {
    /// Synthesize the acknowledgement for this message, addressed back to
    /// the sender with the same id.
    pub fn ack(&self) -> OutgoingAck {
        OutgoingAck {
            id: self.id.clone(),
            to: self.from.clone(),
            class: AckClass::Text,
        }
    }
}

/// Inbound acknowledgement for an entity we sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingAck {
    pub id: String,
    pub from: String,
    pub class: AckClass,
    pub timestamp: DateTime<Utc>,
}

/// Inbound delivery receipt for a message we sent earlier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingReceipt {
    pub id: String,
    pub from: String,
    pub timestamp: DateTime<Utc>,
}

impl IncomingReceipt {
    /// Synthesize the acknowledgement for this receipt.
    pub fn ack(&self) -> OutgoingAck {
        OutgoingAck {
            id: self.id.clone(),
            to: self.from.clone(),
            class: AckClass::Receipt,
        }
    }
}

/// Any entity arriving from the protocol stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum InboundEntity {
    Message(IncomingMessage),
    Ack(IncomingAck),
    Receipt(IncomingReceipt),
}

impl InboundEntity {
    pub fn id(&self) -> &str {
        match self {
            InboundEntity::Message(m) => &m.id,
            InboundEntity::Ack(a) => &a.id,
            InboundEntity::Receipt(r) => &r.id,
        }
    }

    pub fn from(&self) -> &str {
        match self {
            InboundEntity::Message(m) => &m.from,
            InboundEntity::Ack(a) => &a.from,
            InboundEntity::Receipt(r) => &r.from,
        }
    }

    /// Discriminator tag, matching the wire entity name.
    pub fn tag(&self) -> &'static str {
        match self {
            InboundEntity::Message(_) => "message",
            InboundEntity::Ack(_) => "ack",
            InboundEntity::Receipt(_) => "receipt",
        }
    }
}

/// Any entity handed to the protocol stack for delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum OutboundEntity {
    Message(TextMessage),
    Ack(OutgoingAck),
}

impl OutboundEntity {
    pub fn id(&self) -> &str {
        match self {
            OutboundEntity::Message(m) => &m.id,
            OutboundEntity::Ack(a) => &a.id,
        }
    }

    pub fn to(&self) -> &str {
        match self {
            OutboundEntity::Message(m) => &m.to,
            OutboundEntity::Ack(a) => &a.to,
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            OutboundEntity::Message(_) => "message",
            OutboundEntity::Ack(_) => "ack",
        }
    }
}
