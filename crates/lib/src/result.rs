//! Exchange result: the snapshot returned from a completed gateway call.

use crate::entity::{InboundEntity, OutboundEntity};
use serde::{Deserialize, Serialize};

/// Everything exchanged during one `send_messages` / `receive_messages`
/// call: the ordered inbound and outbound logs, in observation order.
///
/// Constructed exactly once per completed unit of work; a gateway error
/// means no result at all, never a partial one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeResult {
    pub inbox: Vec<InboundEntity>,
    pub outbox: Vec<OutboundEntity>,
    pub success: bool,
}

impl ExchangeResult {
    /// Snapshot of a normally completed unit of work.
    pub fn completed(inbox: Vec<InboundEntity>, outbox: Vec<OutboundEntity>) -> Self {
        Self {
            inbox,
            outbox,
            success: true,
        }
    }
}
