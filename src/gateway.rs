//! # Gateway Transport
//!
//! The contract the rest of the node firmware talks to. Only booleans and
//! [`SensorMessage`] values cross this boundary; failures below it are turned
//! into retries or a `false` result and recorded as the last
//! [`GatewayFault`].
//!
//! ```ignore
//! let config = GatewayConfig::new(Broker::Host("broker.local"), "gw-1")?;
//! let mut gateway = GatewayTransport::new(
//!     config,
//!     StackLink::new(stack),
//!     MqttClient::<_, 512>::new(TcpTransport::new(stack, socket, Duration::from_secs(5))),
//!     NoPresentation,
//!     SystemClock,
//! );
//! gateway.initialize();
//! loop {
//!     if gateway.poll_available().await {
//!         let message = gateway.receive_last();
//!         // route the message into the sensor network
//!     }
//! }
//! ```

use crate::clock::Clock;
use crate::config::GatewayConfig;
use crate::connection::{ConnectionMachine, ConnectionState};
use crate::error::GatewayFault;
use crate::link::NetworkLink;
use crate::message::SensorMessage;
use crate::outbox::Presenter;
use crate::session::Session;

pub struct GatewayTransport<'a, L, S, P, C> {
    machine: ConnectionMachine<'a, L, S, P>,
    clock: C,
}

impl<'a, L, S, P, C> GatewayTransport<'a, L, S, P, C>
where
    L: NetworkLink,
    S: Session,
    P: Presenter,
    C: Clock,
{
    pub fn new(config: GatewayConfig<'a>, link: L, session: S, presenter: P, clock: C) -> Self {
        Self {
            machine: ConnectionMachine::new(config, link, session, presenter),
            clock,
        }
    }

    /// Starts the link bring-up sequence. Returns whether it could be issued.
    pub fn initialize(&mut self) -> bool {
        let now = self.clock.now();
        self.machine.initialize(now)
    }

    /// Returns `true` once link-level connectivity is available. Re-issues a
    /// bring-up that could not be issued earlier, at most once per backoff
    /// interval.
    pub fn connect(&mut self) -> bool {
        let now = self.clock.now();
        self.machine.connect(now)
    }

    /// Advances reconnection and keep-alive, then reports whether a fresh
    /// inbound message is waiting.
    pub async fn poll_available(&mut self) -> bool {
        let now = self.clock.now();
        self.machine.poll(now).await
    }

    /// Publishes `message`. Returns `false` and drops it when the session is
    /// down or refuses the publish.
    pub async fn send(&mut self, message: &SensorMessage) -> bool {
        self.machine.send(message).await
    }

    /// Returns the last inbound message and clears its freshness flag.
    ///
    /// Without a fresh message this returns the previous one again, so gate
    /// calls on [`GatewayTransport::poll_available`].
    pub fn receive_last(&mut self) -> SensorMessage {
        self.machine.receive_last()
    }

    pub fn state(&self) -> ConnectionState {
        self.machine.state()
    }

    pub fn is_connected(&self) -> bool {
        self.machine.is_connected()
    }

    pub fn has_fresh(&self) -> bool {
        self.machine.has_fresh()
    }

    /// The most recent failure absorbed below the facade, for diagnostics.
    pub fn last_fault(&self) -> Option<GatewayFault> {
        self.machine.last_fault()
    }
}
