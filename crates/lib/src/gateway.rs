//! Synchronous gateway facade and driver loop.
//!
//! `send_messages` and `receive_messages` each run one unit of work:
//! connect, pump the transport until the state machine reports completion,
//! and return the exchange snapshot. All state machine mutation happens on
//! the calling (driver) thread; other threads inject work through the
//! detached queue only.

use crate::config::{resolve_secret, Config, Credentials};
use crate::error::GatewayError;
use crate::layer::{Flow, GatewayLayer, SendRequest};
use crate::result::ExchangeResult;
use crate::transport::{validate_layers, LayeredTransport, StackLayer, Transport};
use std::sync::mpsc;
use std::time::{Duration, Instant};

type DetachedCallback = Box<dyn FnOnce() + Send + 'static>;

/// Cloneable handle for scheduling work onto the driver thread.
///
/// Callbacks run between pump iterations, outside the transport's call
/// stack, so producers on other threads never touch the gateway state
/// directly. Pushes after the gateway is dropped are silently discarded.
#[derive(Clone)]
pub struct DetachedQueue {
    tx: mpsc::Sender<DetachedCallback>,
}

impl DetachedQueue {
    pub fn push(&self, callback: impl FnOnce() + Send + 'static) {
        let _ = self.tx.send(Box::new(callback));
    }
}

/// Synchronous gateway over an event-driven protocol stack.
///
/// One credential set per instance; the instance is reusable across calls.
pub struct Gateway<T: Transport> {
    transport: LayeredTransport<T>,
    layer: GatewayLayer,
    credentials: Credentials,
    encryption: bool,
    poll_timeout: Duration,
    idle_budget: Duration,
    detached_tx: mpsc::Sender<DetachedCallback>,
    detached_rx: mpsc::Receiver<DetachedCallback>,
}

impl<T: Transport> Gateway<T> {
    /// Build a gateway with no extra stack layers.
    pub fn new(config: &Config, transport: T) -> Result<Self, GatewayError> {
        Self::with_layers(config, Vec::new(), transport)
    }

    /// Build a gateway with extra layers between it and the protocol core.
    /// Configuration problems surface here, before any connection attempt.
    pub fn with_layers(
        config: &Config,
        layers: Vec<Box<dyn StackLayer>>,
        transport: T,
    ) -> Result<Self, GatewayError> {
        if config.credentials.address.trim().is_empty() {
            return Err(GatewayError::Configuration(
                "credential address must not be empty".to_string(),
            ));
        }
        if config.timing.poll_timeout_ms == 0 {
            return Err(GatewayError::Configuration(
                "pollTimeoutMs must be positive".to_string(),
            ));
        }
        if config.timing.poll_timeout_ms >= config.timing.idle_budget_ms {
            return Err(GatewayError::Configuration(
                "pollTimeoutMs must be smaller than idleBudgetMs".to_string(),
            ));
        }
        validate_layers(&layers).map_err(GatewayError::Configuration)?;

        let credentials = Credentials::new(
            config.credentials.address.trim(),
            resolve_secret(config).unwrap_or_default(),
        );
        let (detached_tx, detached_rx) = mpsc::channel();
        Ok(Self {
            transport: LayeredTransport::new(transport, layers),
            layer: GatewayLayer::new(),
            credentials,
            encryption: config.encryption,
            poll_timeout: config.timing.poll_timeout(),
            idle_budget: config.timing.idle_budget(),
            detached_tx,
            detached_rx,
        })
    }

    /// Handle for scheduling callbacks onto the driver thread.
    pub fn detached_queue(&self) -> DetachedQueue {
        DetachedQueue {
            tx: self.detached_tx.clone(),
        }
    }

    /// Send a batch of (address, text) messages and block until every one
    /// is acknowledged (or the unit of work fails).
    pub fn send_messages(
        &mut self,
        messages: Vec<(String, String)>,
    ) -> Result<ExchangeResult, GatewayError> {
        self.execute(Some(SendRequest::new(messages)))
    }

    /// Block until a terminal disconnect and return whatever arrived.
    /// Inbound messages and receipts are acknowledged as they come in.
    pub fn receive_messages(&mut self) -> Result<ExchangeResult, GatewayError> {
        self.execute(None)
    }

    fn execute(&mut self, request: Option<SendRequest>) -> Result<ExchangeResult, GatewayError> {
        self.layer.begin(request);
        self.transport
            .connect(&self.credentials, self.encryption)
            .map_err(GatewayError::Unexpected)?;
        self.drive()
    }

    /// The driver loop. Exits only through the layer reporting completion
    /// or an error propagating out.
    fn drive(&mut self) -> Result<ExchangeResult, GatewayError> {
        let start = Instant::now();
        loop {
            let events = self
                .transport
                .pump(self.poll_timeout)
                .map_err(GatewayError::Unexpected)?;
            for event in events {
                if let Flow::Finished(result) = self.layer.handle(event, &mut self.transport)? {
                    return Ok(result);
                }
            }
            if let Ok(callback) = self.detached_rx.try_recv() {
                callback();
            }
            if self.transport.active_connections() == 0 {
                log::debug!("driver loop: no active connections, winding down");
                if let Flow::Finished(result) =
                    self.layer.handle_disconnect_request(&mut self.transport)?
                {
                    return Ok(result);
                }
            }
            if start.elapsed() > self.idle_budget {
                log::debug!("driver loop: idle budget exceeded, winding down");
                if let Flow::Finished(result) =
                    self.layer.handle_disconnect_request(&mut self.transport)?
                {
                    return Ok(result);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::OutboundEntity;
    use crate::transport::{ConnectionInfo, StackEvent};

    struct NullTransport;

    impl Transport for NullTransport {
        fn connect(&mut self, _credentials: &Credentials, _encryption: bool) -> Result<(), String> {
            Ok(())
        }

        fn disconnect(&mut self) {}

        fn send(&mut self, _entity: &OutboundEntity) -> Result<(), String> {
            Ok(())
        }

        fn pump(&mut self, _timeout: Duration) -> Result<Vec<StackEvent>, String> {
            Ok(Vec::new())
        }

        fn active_connections(&self) -> usize {
            1
        }
    }

    fn valid_config() -> Config {
        let mut config = Config::default();
        config.credentials = Credentials::new("341111111", "password");
        config
    }

    #[test]
    fn rejects_empty_address() {
        let mut config = valid_config();
        config.credentials.address = "  ".to_string();
        let err = Gateway::new(&config, NullTransport).err().expect("error");
        assert!(matches!(err, GatewayError::Configuration(_)));
    }

    #[test]
    fn rejects_zero_poll_timeout() {
        let mut config = valid_config();
        config.timing.poll_timeout_ms = 0;
        let err = Gateway::new(&config, NullTransport).err().expect("error");
        assert!(matches!(err, GatewayError::Configuration(_)));
    }

    #[test]
    fn rejects_poll_timeout_at_or_above_budget() {
        let mut config = valid_config();
        config.timing.poll_timeout_ms = 1000;
        config.timing.idle_budget_ms = 1000;
        let err = Gateway::new(&config, NullTransport).err().expect("error");
        assert!(matches!(err, GatewayError::Configuration(_)));
    }

    #[test]
    fn accepts_valid_config() {
        let config = valid_config();
        assert!(Gateway::new(&config, NullTransport).is_ok());
    }

    /// Pump fails once the link is supposedly up.
    struct BrokenPumpTransport;

    impl Transport for BrokenPumpTransport {
        fn connect(&mut self, _credentials: &Credentials, _encryption: bool) -> Result<(), String> {
            Ok(())
        }

        fn disconnect(&mut self) {}

        fn send(&mut self, _entity: &OutboundEntity) -> Result<(), String> {
            Ok(())
        }

        fn pump(&mut self, _timeout: Duration) -> Result<Vec<StackEvent>, String> {
            Err("socket closed by peer".to_string())
        }

        fn active_connections(&self) -> usize {
            1
        }
    }

    /// Connects fine but refuses to deliver anything.
    #[derive(Default)]
    struct BrokenSendTransport {
        connected: bool,
    }

    impl Transport for BrokenSendTransport {
        fn connect(&mut self, _credentials: &Credentials, _encryption: bool) -> Result<(), String> {
            Ok(())
        }

        fn disconnect(&mut self) {
            self.connected = false;
        }

        fn send(&mut self, _entity: &OutboundEntity) -> Result<(), String> {
            Err("wire jammed".to_string())
        }

        fn pump(&mut self, _timeout: Duration) -> Result<Vec<StackEvent>, String> {
            if self.connected {
                return Ok(Vec::new());
            }
            self.connected = true;
            Ok(vec![StackEvent::Connected(ConnectionInfo::default())])
        }

        fn active_connections(&self) -> usize {
            1
        }
    }

    #[test]
    fn pump_failure_surfaces_as_unexpected_with_description() {
        let config = valid_config();
        let mut gateway = Gateway::new(&config, BrokenPumpTransport).expect("gateway");
        let err = gateway
            .send_messages(vec![("341234567".to_string(), "hi".to_string())])
            .unwrap_err();
        match err {
            GatewayError::Unexpected(msg) => {
                assert!(msg.contains("socket closed by peer"), "{}", msg)
            }
            other => panic!("expected unexpected error, got {:?}", other),
        }
    }

    #[test]
    fn send_failure_surfaces_as_unexpected_with_description() {
        let config = valid_config();
        let mut gateway =
            Gateway::new(&config, BrokenSendTransport::default()).expect("gateway");
        let err = gateway
            .send_messages(vec![("341234567".to_string(), "hi".to_string())])
            .unwrap_err();
        match err {
            GatewayError::Unexpected(msg) => assert!(msg.contains("wire jammed"), "{}", msg),
            other => panic!("expected unexpected error, got {:?}", other),
        }
    }

    #[test]
    fn rejects_duplicate_layer_names() {
        struct Named;
        impl StackLayer for Named {
            fn name(&self) -> &str {
                "trace"
            }
        }
        let config = valid_config();
        let layers: Vec<Box<dyn StackLayer>> = vec![Box::new(Named), Box::new(Named)];
        let err = Gateway::with_layers(&config, layers, NullTransport)
            .err()
            .expect("error");
        match err {
            GatewayError::Configuration(msg) => assert!(msg.contains("trace"), "{}", msg),
            other => panic!("expected configuration error, got {:?}", other),
        }
    }
}
