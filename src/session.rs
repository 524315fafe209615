//! # Session Capability
//!
//! The publish/subscribe session the gateway drives. The connection state
//! machine only talks to this trait, so it can run against the bundled
//! [`crate::client::MqttClient`] on a device and against a scripted double in
//! tests.

use embassy_time::{Duration, Instant};

use crate::config::{Broker, ClientIdentity, Credentials, GatewayConfig, Security};
use crate::error::SessionError;

/// Parameters for opening a session, borrowed from the [`GatewayConfig`].
#[derive(Debug, Clone, Copy)]
pub struct SessionOptions<'a> {
    pub broker: Broker<'a>,
    pub port: u16,
    pub client_id: &'a str,
    pub credentials: Option<Credentials<'a>>,
    pub keep_alive: Duration,
    pub clean_session: bool,
    pub security: &'a Security<'a>,
    pub client_identity: Option<ClientIdentity<'a>>,
}

impl<'a> SessionOptions<'a> {
    pub fn from_config(config: &'a GatewayConfig<'a>) -> Self {
        Self {
            broker: config.broker,
            port: config.port,
            client_id: config.client_id,
            credentials: config.credentials,
            keep_alive: config.keep_alive,
            clean_session: true,
            security: &config.security,
            client_identity: config.client_identity,
        }
    }
}

/// Callback receiving every inbound publish as `(topic, payload)`.
pub type InboundHandler<'h> = dyn FnMut(&str, &[u8]) + 'h;

/// An MQTT-like session with a broker.
///
/// No method may retry internally or wait longer than the bound of a single
/// network primitive.
#[allow(async_fn_in_trait)]
pub trait Session {
    /// Opens the session: stream, handshake and authentication.
    async fn open(&mut self, options: &SessionOptions<'_>) -> Result<(), SessionError>;

    /// Subscribes to a topic filter.
    async fn subscribe(&mut self, filter: &str) -> Result<(), SessionError>;

    /// Publishes a message.
    async fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        retain: bool,
    ) -> Result<(), SessionError>;

    /// Performs pending session maintenance (keep-alive) and hands every
    /// inbound publish that already arrived to `inbound`.
    async fn poll(&mut self, now: Instant, inbound: &mut InboundHandler<'_>)
    -> Result<(), SessionError>;

    /// Whether the session is currently open.
    fn is_connected(&self) -> bool;

    /// Whether a subscription is still waiting for the broker's verdict.
    ///
    /// Sessions that learn the outcome synchronously in
    /// [`Session::subscribe`] keep the default.
    fn is_subscription_pending(&self) -> bool {
        false
    }

    /// Number of inbound frames discarded since the last call because they
    /// did not fit the session's buffers. The session stays open.
    fn take_dropped_frames(&mut self) -> u32 {
        0
    }

    /// Sends a best-effort disconnect and drops the session.
    async fn close(&mut self);
}
