//! Shared test doubles for the gateway scenario tests.
#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;

use embassy_time::{Duration, Instant};
use myrtio_gateway::config::{Broker, GatewayConfig};
use myrtio_gateway::session::{InboundHandler, Session, SessionOptions};
use myrtio_gateway::transport::{MqttTransport, TransportError};
use myrtio_gateway::{
    GatewayTransport, ManualClock, MessageOutbox, MqttClient, NoPresentation, Presenter,
    SessionError, SimulatedLink,
};

/// A publish seen by the [`ScriptedSession`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub topic: String,
    pub payload: String,
    pub retain: bool,
}

/// A broker session driven entirely by the test.
#[derive(Default)]
pub struct ScriptedSession {
    connected: Cell<bool>,
    open_failures: RefCell<VecDeque<SessionError>>,
    subscribe_failure: Cell<Option<SessionError>>,
    reject_publish: Cell<bool>,
    inbound: RefCell<VecDeque<(String, Vec<u8>)>>,
    opens: Cell<u32>,
    closes: Cell<u32>,
    events: RefCell<Vec<String>>,
    published: RefCell<Vec<Published>>,
    last_keep_alive: Cell<Option<Duration>>,
}

impl ScriptedSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_open(&self, err: SessionError) {
        self.open_failures.borrow_mut().push_back(err);
    }

    pub fn fail_next_subscribe(&self, err: SessionError) {
        self.subscribe_failure.set(Some(err));
    }

    pub fn reject_publish(&self, reject: bool) {
        self.reject_publish.set(reject);
    }

    /// Simulates the broker dropping the connection.
    pub fn drop_connection(&self) {
        self.connected.set(false);
    }

    pub fn push_inbound(&self, topic: &str, payload: &[u8]) {
        self.inbound
            .borrow_mut()
            .push_back((topic.to_string(), payload.to_vec()));
    }

    pub fn opens(&self) -> u32 {
        self.opens.get()
    }

    pub fn closes(&self) -> u32 {
        self.closes.get()
    }

    /// `open`, `publish <topic>` and `subscribe <filter>` in call order.
    pub fn events(&self) -> Vec<String> {
        self.events.borrow().clone()
    }

    pub fn published(&self) -> Vec<Published> {
        self.published.borrow().clone()
    }

    pub fn last_keep_alive(&self) -> Option<Duration> {
        self.last_keep_alive.get()
    }
}

impl Session for &ScriptedSession {
    async fn open(&mut self, options: &SessionOptions<'_>) -> Result<(), SessionError> {
        self.opens.set(self.opens.get() + 1);
        self.events.borrow_mut().push("open".to_string());
        self.last_keep_alive.set(Some(options.keep_alive));
        if let Some(err) = self.open_failures.borrow_mut().pop_front() {
            return Err(err);
        }
        self.connected.set(true);
        Ok(())
    }

    async fn subscribe(&mut self, filter: &str) -> Result<(), SessionError> {
        if !self.connected.get() {
            return Err(SessionError::NotConnected);
        }
        self.events.borrow_mut().push(format!("subscribe {filter}"));
        match self.subscribe_failure.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        retain: bool,
    ) -> Result<(), SessionError> {
        if !self.connected.get() {
            return Err(SessionError::NotConnected);
        }
        if self.reject_publish.get() {
            return Err(SessionError::Transport);
        }
        self.events.borrow_mut().push(format!("publish {topic}"));
        self.published.borrow_mut().push(Published {
            topic: topic.to_string(),
            payload: String::from_utf8_lossy(payload).into_owned(),
            retain,
        });
        Ok(())
    }

    async fn poll(
        &mut self,
        _now: Instant,
        inbound: &mut InboundHandler<'_>,
    ) -> Result<(), SessionError> {
        if !self.connected.get() {
            return Err(SessionError::NotConnected);
        }
        while let Some((topic, payload)) = self.inbound.borrow_mut().pop_front() {
            inbound(topic.as_str(), payload.as_slice());
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.get()
    }

    async fn close(&mut self) {
        self.closes.set(self.closes.get() + 1);
        self.connected.set(false);
    }
}

/// Stream error of the [`ScriptedBroker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrokerClosed;

impl TransportError for BrokerClosed {}

/// An MQTT broker on the far side of a byte stream, answering the packets
/// the client writes.
///
/// CONNECT gets an accepting CONNACK and SUBSCRIBE gets a SUBACK carrying the
/// configured return code followed by any retained traffic. PINGREQ is
/// answered unless pings are muted.
pub struct ScriptedBroker {
    incoming: RefCell<VecDeque<u8>>,
    grant: Cell<u8>,
    answer_pings: Cell<bool>,
    retained: RefCell<Vec<u8>>,
    opens: Cell<u32>,
    pings: Cell<u32>,
}

impl Default for ScriptedBroker {
    fn default() -> Self {
        Self {
            incoming: RefCell::default(),
            grant: Cell::new(0x00),
            answer_pings: Cell::new(true),
            retained: RefCell::default(),
            opens: Cell::new(0),
            pings: Cell::new(0),
        }
    }
}

impl ScriptedBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers every SUBSCRIBE with the failure return code.
    pub fn refuse_subscriptions(&self, refuse: bool) {
        self.grant.set(if refuse { 0x80 } else { 0x00 });
    }

    pub fn answer_pings(&self, answer: bool) {
        self.answer_pings.set(answer);
    }

    /// Raw bytes delivered right after each SUBACK.
    pub fn retain(&self, frame: &[u8]) {
        self.retained.borrow_mut().extend_from_slice(frame);
    }

    pub fn opens(&self) -> u32 {
        self.opens.get()
    }

    pub fn pings(&self) -> u32 {
        self.pings.get()
    }
}

impl MqttTransport for &ScriptedBroker {
    type Error = BrokerClosed;

    async fn open(&mut self, _options: &SessionOptions<'_>) -> Result<(), BrokerClosed> {
        self.opens.set(self.opens.get() + 1);
        self.incoming.borrow_mut().clear();
        Ok(())
    }

    async fn send(&mut self, buf: &[u8]) -> Result<(), BrokerClosed> {
        let mut incoming = self.incoming.borrow_mut();
        match buf.first().copied() {
            Some(0x10) => incoming.extend([0x20, 2, 0, 0]),
            Some(0x82) => {
                let id = buf.get(2..4).ok_or(BrokerClosed)?;
                incoming.extend([0x90, 3, id[0], id[1], self.grant.get()]);
                incoming.extend(self.retained.borrow().iter().copied());
            }
            Some(0xC0) => {
                self.pings.set(self.pings.get() + 1);
                if self.answer_pings.get() {
                    incoming.extend([0xD0, 0]);
                }
            }
            _ => {}
        }
        Ok(())
    }

    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize, BrokerClosed> {
        let mut incoming = self.incoming.borrow_mut();
        if incoming.is_empty() {
            return Err(BrokerClosed);
        }
        let n = buf.len().min(incoming.len());
        for (slot, byte) in buf.iter_mut().zip(incoming.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn has_pending(&self) -> bool {
        !self.incoming.borrow().is_empty()
    }

    fn close(&mut self) {
        self.incoming.borrow_mut().clear();
    }
}

/// A QoS 0 PUBLISH frame as the broker would send it.
pub fn publish_frame(topic: &str, payload: &[u8], retain: bool) -> Vec<u8> {
    let mut frame = vec![if retain { 0x31 } else { 0x30 }];
    let mut remaining = 2 + topic.len() + payload.len();
    loop {
        let mut byte = (remaining % 128) as u8;
        remaining /= 128;
        if remaining > 0 {
            byte |= 0x80;
        }
        frame.push(byte);
        if remaining == 0 {
            break;
        }
    }
    frame.extend((topic.len() as u16).to_be_bytes());
    frame.extend_from_slice(topic.as_bytes());
    frame.extend_from_slice(payload);
    frame
}

pub type MqttGateway<'t> = GatewayTransport<
    'static,
    &'t SimulatedLink,
    MqttClient<&'t ScriptedBroker, 128>,
    NoPresentation,
    &'t ManualClock,
>;

/// A gateway running the real MQTT client against `broker`.
pub fn mqtt_gateway<'t>(
    config: GatewayConfig<'static>,
    link: &'t SimulatedLink,
    broker: &'t ScriptedBroker,
    clock: &'t ManualClock,
) -> MqttGateway<'t> {
    GatewayTransport::new(config, link, MqttClient::new(broker), NoPresentation, clock)
}

pub type TestGateway<'t, P = NoPresentation> =
    GatewayTransport<'static, &'t SimulatedLink, &'t ScriptedSession, P, &'t ManualClock>;

pub fn config() -> GatewayConfig<'static> {
    GatewayConfig::new(Broker::Host("broker.local"), "gw-test").unwrap()
}

pub fn gateway<'t>(
    link: &'t SimulatedLink,
    session: &'t ScriptedSession,
    clock: &'t ManualClock,
) -> TestGateway<'t> {
    GatewayTransport::new(config(), link, session, NoPresentation, clock)
}

pub fn gateway_with<'t, P: Presenter>(
    config: GatewayConfig<'static>,
    link: &'t SimulatedLink,
    session: &'t ScriptedSession,
    presenter: P,
    clock: &'t ManualClock,
) -> TestGateway<'t, P> {
    GatewayTransport::new(config, link, session, presenter, clock)
}

/// Drives a fresh gateway until its session is connected.
pub fn connect<P: Presenter>(gateway: &mut TestGateway<'_, P>, link: &SimulatedLink) {
    assert!(gateway.initialize());
    link.set_up(true);
    assert!(gateway.connect());
    assert!(!embassy_futures::block_on(gateway.poll_available()));
    assert!(gateway.is_connected());
}

/// Presenter queueing a fixed list of messages.
pub fn presenter_of(
    messages: Vec<myrtio_gateway::SensorMessage>,
) -> impl FnMut(&mut dyn MessageOutbox) {
    move |outbox: &mut dyn MessageOutbox| {
        for message in &messages {
            outbox.push(message.clone());
        }
    }
}
