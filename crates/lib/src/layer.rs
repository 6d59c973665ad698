//! Gateway state machine: tracks the link state, the pending-ack set, and
//! the inbound/outbound logs for one unit of work, and decides when the
//! driver loop is done.
//!
//! Handlers are an explicit match over [`StackEvent`]; each returns
//! [`Flow`] (keep pumping, or finished with a result) and failures travel
//! as the `Err` arm, so loop exit never rides on a control-flow exception.

use crate::entity::{InboundEntity, OutboundEntity, TextMessage};
use crate::error::GatewayError;
use crate::result::ExchangeResult;
use crate::transport::{StackEvent, Transport};

/// Link state, owned exclusively by the layer. Transitions only through
/// the connect-success, connect-failure, and disconnect handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
}

/// Outcome of handling one stack event.
#[derive(Debug)]
pub enum Flow {
    /// Keep pumping.
    Continue,
    /// The unit of work completed; the driver loop returns this result.
    Finished(ExchangeResult),
}

/// A batch of (address, text) pairs to send once the link is up.
#[derive(Debug, Clone, Default)]
pub struct SendRequest {
    pub messages: Vec<(String, String)>,
}

impl SendRequest {
    pub fn new(messages: Vec<(String, String)>) -> Self {
        Self { messages }
    }
}

/// The bridging state machine between the event-driven stack and the
/// synchronous facade.
///
/// The same instance is reused across calls; [`GatewayLayer::begin`]
/// resets the per-call state at the start of each unit of work.
pub struct GatewayLayer {
    state: ConnectionState,
    /// Ids of dispatched messages whose ack has not arrived yet, in
    /// dispatch order. Added exactly once before handing a message to the
    /// transport, removed exactly once on the matching ack.
    ack_pending: Vec<String>,
    inbox: Vec<InboundEntity>,
    outbox: Vec<OutboundEntity>,
    /// Send request dispatched once connect succeeds. Set per unit of
    /// work; `None` for receive calls.
    on_connected: Option<SendRequest>,
}

impl Default for GatewayLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl GatewayLayer {
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            ack_pending: Vec::new(),
            inbox: Vec::new(),
            outbox: Vec::new(),
            on_connected: None,
        }
    }

    /// Reset per-call state for a new unit of work.
    pub fn begin(&mut self, on_connected: Option<SendRequest>) {
        self.state = ConnectionState::Disconnected;
        self.ack_pending.clear();
        self.inbox.clear();
        self.outbox.clear();
        self.on_connected = on_connected;
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn pending(&self) -> &[String] {
        &self.ack_pending
    }

    pub fn inbox(&self) -> &[InboundEntity] {
        &self.inbox
    }

    pub fn outbox(&self) -> &[OutboundEntity] {
        &self.outbox
    }

    /// Dispatch one stack event to its handler.
    pub fn handle(
        &mut self,
        event: StackEvent,
        transport: &mut dyn Transport,
    ) -> Result<Flow, GatewayError> {
        match event {
            StackEvent::Connected(_info) => self.on_connect_success(transport),
            StackEvent::ConnectFailed { reason } => self.on_connect_failure(reason),
            StackEvent::Disconnected { reason, detached } => {
                self.on_disconnected(&reason, detached)
            }
            StackEvent::Entity(InboundEntity::Ack(ack)) => {
                self.on_ack(InboundEntity::Ack(ack), transport)
            }
            StackEvent::Entity(InboundEntity::Message(msg)) => self.on_message(msg, transport),
            StackEvent::Entity(InboundEntity::Receipt(receipt)) => {
                self.on_receipt(receipt, transport)
            }
        }
    }

    /// Handle a disconnect request, from ack quiescence or from the
    /// driver's idle/timeout policy: close the link and run the final
    /// disconnected handler with `detached = true`.
    pub fn handle_disconnect_request(
        &mut self,
        transport: &mut dyn Transport,
    ) -> Result<Flow, GatewayError> {
        transport.disconnect();
        self.on_disconnected("connection closed", true)
    }

    /// Precondition for handlers that assume an established link.
    fn require_connected(&self, operation: &str) -> Result<(), GatewayError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(GatewayError::Connection(format!(
                "{} requires an established connection",
                operation
            )))
        }
    }

    /// Append to the outbound log and hand the entity to the transport.
    /// The log and the transport call always happen together.
    fn send_entity(
        &mut self,
        entity: OutboundEntity,
        transport: &mut dyn Transport,
    ) -> Result<(), GatewayError> {
        self.outbox.push(entity.clone());
        transport.send(&entity).map_err(GatewayError::Unexpected)
    }

    fn on_connect_success(&mut self, transport: &mut dyn Transport) -> Result<Flow, GatewayError> {
        log::info!("logged in");
        self.state = ConnectionState::Connected;
        match self.on_connected.take() {
            Some(request) => self.on_send_messages(request, transport),
            None => Ok(Flow::Continue),
        }
    }

    fn on_connect_failure(&mut self, reason: String) -> Result<Flow, GatewayError> {
        log::error!("login failed, reason: {}", reason);
        self.state = ConnectionState::Disconnected;
        Err(GatewayError::Authentication(reason))
    }

    fn on_send_messages(
        &mut self,
        request: SendRequest,
        transport: &mut dyn Transport,
    ) -> Result<Flow, GatewayError> {
        self.require_connected("send_messages")?;
        for (address, content) in request.messages {
            let message = TextMessage::new(&address, content);
            // The id goes on the pending list before the transport sees
            // the message, so an ack can never race the bookkeeping.
            self.ack_pending.push(message.id.clone());
            self.send_entity(OutboundEntity::Message(message), transport)?;
        }
        if self.ack_pending.is_empty() {
            // Nothing to wait for; wind the unit of work down now.
            return self.handle_disconnect_request(transport);
        }
        Ok(Flow::Continue)
    }

    fn on_ack(
        &mut self,
        ack: InboundEntity,
        transport: &mut dyn Transport,
    ) -> Result<Flow, GatewayError> {
        self.require_connected("ack")?;
        let id = ack.id().to_string();
        self.inbox.push(ack);
        if let Some(pos) = self.ack_pending.iter().position(|pending| *pending == id) {
            self.ack_pending.remove(pos);
            log::info!("message sent: {}", id);
        }
        if self.ack_pending.is_empty() {
            log::info!("disconnect");
            return self.handle_disconnect_request(transport);
        }
        Ok(Flow::Continue)
    }

    fn on_message(
        &mut self,
        message: crate::entity::IncomingMessage,
        transport: &mut dyn Transport,
    ) -> Result<Flow, GatewayError> {
        self.require_connected("message")?;
        let ack = message.ack();
        self.inbox.push(InboundEntity::Message(message));
        self.send_entity(OutboundEntity::Ack(ack), transport)?;
        Ok(Flow::Continue)
    }

    fn on_receipt(
        &mut self,
        receipt: crate::entity::IncomingReceipt,
        transport: &mut dyn Transport,
    ) -> Result<Flow, GatewayError> {
        self.require_connected("receipt")?;
        let ack = receipt.ack();
        self.inbox.push(InboundEntity::Receipt(receipt));
        self.send_entity(OutboundEntity::Ack(ack), transport)?;
        Ok(Flow::Continue)
    }

    /// Final handler for the current unit of work: verify nothing is still
    /// pending and snapshot the logs.
    fn on_disconnected(&mut self, reason: &str, detached: bool) -> Result<Flow, GatewayError> {
        log::debug!("disconnected, reason: {} (detached: {})", reason, detached);
        self.require_connected("disconnect")?;
        self.state = ConnectionState::Disconnected;
        if !self.ack_pending.is_empty() {
            return Err(GatewayError::Connection(format!(
                "pending acknowledgements not received: {}",
                self.ack_pending.join(", ")
            )));
        }
        let result = ExchangeResult::completed(
            std::mem::take(&mut self.inbox),
            std::mem::take(&mut self.outbox),
        );
        Ok(Flow::Finished(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Credentials;
    use crate::entity::{AckClass, IncomingAck, IncomingMessage, IncomingReceipt};
    use crate::transport::ConnectionInfo;
    use chrono::Utc;
    use std::time::Duration;

    /// Records sends and the disconnect call; pumps nothing.
    #[derive(Default)]
    struct StubTransport {
        sent: Vec<OutboundEntity>,
        connected: bool,
    }

    impl Transport for StubTransport {
        fn connect(&mut self, _credentials: &Credentials, _encryption: bool) -> Result<(), String> {
            self.connected = true;
            Ok(())
        }

        fn disconnect(&mut self) {
            self.connected = false;
        }

        fn send(&mut self, entity: &OutboundEntity) -> Result<(), String> {
            self.sent.push(entity.clone());
            Ok(())
        }

        fn pump(&mut self, _timeout: Duration) -> Result<Vec<StackEvent>, String> {
            Ok(Vec::new())
        }

        fn active_connections(&self) -> usize {
            usize::from(self.connected)
        }
    }

    fn connected_layer(
        transport: &mut StubTransport,
        request: Option<SendRequest>,
    ) -> GatewayLayer {
        let mut layer = GatewayLayer::new();
        layer.begin(request);
        transport.connected = true;
        let flow = layer
            .handle(StackEvent::Connected(ConnectionInfo::default()), transport)
            .expect("connect");
        assert!(matches!(flow, Flow::Continue));
        layer
    }

    fn incoming_ack(id: &str, from: &str) -> StackEvent {
        StackEvent::Entity(InboundEntity::Ack(IncomingAck {
            id: id.to_string(),
            from: from.to_string(),
            class: AckClass::Text,
            timestamp: Utc::now(),
        }))
    }

    #[test]
    fn connect_success_sets_connected() {
        let mut transport = StubTransport::default();
        let layer = connected_layer(&mut transport, None);
        assert!(layer.is_connected());
        assert!(transport.sent.is_empty());
    }

    #[test]
    fn connect_failure_is_authentication_error() {
        let mut transport = StubTransport::default();
        let mut layer = GatewayLayer::new();
        layer.begin(None);
        let err = layer
            .handle(
                StackEvent::ConnectFailed {
                    reason: "Auth incorrect".to_string(),
                },
                &mut transport,
            )
            .unwrap_err();
        assert!(matches!(err, GatewayError::Authentication(_)));
        assert!(!layer.is_connected());
    }

    #[test]
    fn connect_dispatches_deferred_send_request() {
        let mut transport = StubTransport::default();
        let request = SendRequest::new(vec![("341111111".to_string(), "Hello world".to_string())]);
        let layer = connected_layer(&mut transport, Some(request));

        assert_eq!(layer.outbox().len(), 1);
        assert_eq!(transport.sent.len(), 1);
        let OutboundEntity::Message(msg) = &transport.sent[0] else {
            panic!("expected a text message");
        };
        assert_eq!(msg.to, "341111111@s.whatsapp.net");
        assert_eq!(msg.body, "Hello world");
        assert_eq!(layer.pending(), [msg.id.clone()]);
    }

    #[test]
    fn send_while_disconnected_fails_without_log_mutation() {
        let mut transport = StubTransport::default();
        let mut layer = GatewayLayer::new();
        layer.begin(None);
        let request = SendRequest::new(vec![("341111111".to_string(), "hi".to_string())]);
        let err = layer.on_send_messages(request, &mut transport).unwrap_err();
        match err {
            GatewayError::Connection(msg) => assert!(msg.contains("send_messages"), "{}", msg),
            other => panic!("expected connection error, got {:?}", other),
        }
        assert!(layer.outbox().is_empty());
        assert!(layer.pending().is_empty());
        assert!(transport.sent.is_empty());
    }

    #[test]
    fn ack_drains_pending_and_finishes() {
        let mut transport = StubTransport::default();
        let request = SendRequest::new(vec![("341111111".to_string(), "Hello world".to_string())]);
        let mut layer = connected_layer(&mut transport, Some(request));
        let id = layer.pending()[0].clone();

        let flow = layer
            .handle(incoming_ack(&id, "341111111@s.whatsapp.net"), &mut transport)
            .expect("ack");
        let Flow::Finished(result) = flow else {
            panic!("expected the unit of work to finish");
        };
        assert!(result.success);
        assert_eq!(result.outbox.len(), 1);
        assert_eq!(result.inbox.len(), 1);
        assert_eq!(result.inbox[0].id(), result.outbox[0].id());
        assert!(!transport.connected);
    }

    #[test]
    fn unmatched_ack_is_logged_but_keeps_pending() {
        let mut transport = StubTransport::default();
        let request = SendRequest::new(vec![("341111111".to_string(), "Hello world".to_string())]);
        let mut layer = connected_layer(&mut transport, Some(request));

        let flow = layer
            .handle(incoming_ack("unrelated", "x@s.whatsapp.net"), &mut transport)
            .expect("ack");
        assert!(matches!(flow, Flow::Continue));
        assert_eq!(layer.pending().len(), 1);
        assert_eq!(layer.inbox().len(), 1);
    }

    #[test]
    fn ack_while_disconnected_is_connection_error() {
        let mut transport = StubTransport::default();
        let mut layer = GatewayLayer::new();
        layer.begin(None);
        let err = layer
            .handle(incoming_ack("123", "x@s.whatsapp.net"), &mut transport)
            .unwrap_err();
        assert!(matches!(err, GatewayError::Connection(_)));
        assert!(layer.inbox().is_empty());
    }

    #[test]
    fn inbound_message_is_acked_with_same_id() {
        let mut transport = StubTransport::default();
        let mut layer = connected_layer(&mut transport, None);
        let msg = IncomingMessage {
            id: "msg-1".to_string(),
            from: "bbb@s.whatsapp.net".to_string(),
            body: "received message".to_string(),
            timestamp: Utc::now(),
        };
        let flow = layer
            .handle(
                StackEvent::Entity(InboundEntity::Message(msg.clone())),
                &mut transport,
            )
            .expect("message");
        assert!(matches!(flow, Flow::Continue));
        assert_eq!(layer.inbox(), [InboundEntity::Message(msg.clone())]);
        let OutboundEntity::Ack(ack) = &transport.sent[0] else {
            panic!("expected an ack");
        };
        assert_eq!(ack.id, msg.id);
        assert_eq!(ack.to, msg.from);
        assert_eq!(ack.class, AckClass::Text);
    }

    #[test]
    fn inbound_receipt_is_acked_with_receipt_class() {
        let mut transport = StubTransport::default();
        let mut layer = connected_layer(&mut transport, None);
        let receipt = IncomingReceipt {
            id: "123".to_string(),
            from: "sender@s.whatsapp.net".to_string(),
            timestamp: Utc::now(),
        };
        layer
            .handle(
                StackEvent::Entity(InboundEntity::Receipt(receipt.clone())),
                &mut transport,
            )
            .expect("receipt");
        let OutboundEntity::Ack(ack) = &transport.sent[0] else {
            panic!("expected an ack");
        };
        assert_eq!(ack.id, receipt.id);
        assert_eq!(ack.class, AckClass::Receipt);
    }

    #[test]
    fn disconnect_with_pending_names_the_missing_ids() {
        let mut transport = StubTransport::default();
        let request = SendRequest::new(vec![("341111111".to_string(), "Hello world".to_string())]);
        let mut layer = connected_layer(&mut transport, Some(request));
        let id = layer.pending()[0].clone();

        let err = layer
            .handle_disconnect_request(&mut transport)
            .unwrap_err();
        match err {
            GatewayError::Connection(msg) => assert!(msg.contains(&id), "{}", msg),
            other => panic!("expected connection error, got {:?}", other),
        }
    }

    #[test]
    fn disconnect_before_connect_is_connection_error() {
        let mut transport = StubTransport::default();
        let mut layer = GatewayLayer::new();
        layer.begin(None);
        let err = layer
            .handle_disconnect_request(&mut transport)
            .unwrap_err();
        assert!(matches!(err, GatewayError::Connection(_)));
    }

    #[test]
    fn disconnect_finalizes_the_exchange() {
        let mut transport = StubTransport::default();
        let mut layer = connected_layer(&mut transport, None);
        let flow = layer
            .handle(
                StackEvent::Disconnected {
                    reason: "connection closed".to_string(),
                    detached: true,
                },
                &mut transport,
            )
            .expect("disconnect");
        let Flow::Finished(result) = flow else {
            panic!("expected the unit of work to finish");
        };
        assert!(result.success);
        assert!(result.inbox.is_empty());
        assert!(result.outbox.is_empty());
        assert!(!layer.is_connected());
    }

    #[test]
    fn empty_send_request_completes_immediately() {
        let mut transport = StubTransport::default();
        let mut layer = GatewayLayer::new();
        layer.begin(Some(SendRequest::default()));
        transport.connected = true;
        let flow = layer
            .handle(
                StackEvent::Connected(ConnectionInfo::default()),
                &mut transport,
            )
            .expect("connect");
        let Flow::Finished(result) = flow else {
            panic!("expected immediate completion");
        };
        assert!(result.outbox.is_empty());
        assert!(result.inbox.is_empty());
    }
}
