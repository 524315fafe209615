//! # Connection State Machine
//!
//! Owns the session lifecycle: brings up the network link, opens the broker
//! session, presents the node, subscribes to the inbound wildcard and keeps
//! the session alive. It retries forever and never blocks beyond a single
//! network primitive; session attempts are gated by [`Backoff`] instead of
//! sleeping. An attempt only counts as successful once the broker has granted
//! the inbound subscription, so a broker that accepts the session but refuses
//! the subscription is retried once per interval like any other failure.
//!
//! ```text
//! Disconnected --initialize--> InterfaceConnecting --link up--> SessionConnecting
//!                                     ^                             |      ^
//!                                     |                     open +  |      | session lost
//!                                     +------ link down ----- subscribe    |
//!                                                                 v       |
//!                                                              Connected --+
//! ```

mod backoff;
mod slot;

pub use backoff::Backoff;
pub use slot::InboundSlot;

use embassy_time::Instant;

use crate::codec;
use crate::config::GatewayConfig;
use crate::error::{DecodeError, GatewayFault, SessionError};
use crate::link::NetworkLink;
use crate::message::SensorMessage;
use crate::outbox::{BufferedOutbox, Presenter};
use crate::session::{Session, SessionOptions};

/// Upper bound of messages a [`Presenter`] may queue per session.
pub const MAX_PRESENTATION_MESSAGES: usize = 32;

/// Lifecycle phase of the gateway uplink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConnectionState {
    /// Nothing has been started yet.
    Disconnected,
    /// Link bring-up has been issued; waiting for the interface.
    InterfaceConnecting,
    /// The link is up; the broker session is being (re)opened or its
    /// inbound subscription has not been granted yet.
    SessionConnecting,
    /// Session open and inbound subscription established.
    Connected,
}

/// The connection lifecycle, owning the link, the session and the inbound slot.
pub struct ConnectionMachine<'a, L, S, P> {
    config: GatewayConfig<'a>,
    link: L,
    session: S,
    presenter: P,
    state: ConnectionState,
    backoff: Backoff,
    link_backoff: Backoff,
    link_requested: bool,
    awaiting_subscription: bool,
    slot: InboundSlot,
    last_fault: Option<GatewayFault>,
}

impl<'a, L, S, P> ConnectionMachine<'a, L, S, P>
where
    L: NetworkLink,
    S: Session,
    P: Presenter,
{
    pub fn new(config: GatewayConfig<'a>, link: L, session: S, presenter: P) -> Self {
        let backoff = Backoff::new(config.reconnect_backoff);
        Self {
            config,
            link,
            session,
            presenter,
            state: ConnectionState::Disconnected,
            backoff,
            link_backoff: backoff,
            link_requested: false,
            awaiting_subscription: false,
            slot: InboundSlot::new(),
            last_fault: None,
        }
    }

    /// Issues the link bring-up sequence.
    ///
    /// Only the first call leaves [`ConnectionState::Disconnected`]; later
    /// calls report success without re-issuing anything. A request that could
    /// not be issued is retried by [`ConnectionMachine::connect`] once per
    /// backoff interval.
    pub fn initialize(&mut self, now: Instant) -> bool {
        if self.state != ConnectionState::Disconnected {
            return true;
        }
        self.state = ConnectionState::InterfaceConnecting;
        self.request_link(now)
    }

    /// Checks link-level connectivity, advancing to
    /// [`ConnectionState::SessionConnecting`] once the link is up.
    pub fn connect(&mut self, now: Instant) -> bool {
        if self.state == ConnectionState::Disconnected {
            return false;
        }
        if !self.link.is_up() {
            if self.state != ConnectionState::InterfaceConnecting {
                self.enter_interface_connecting(now);
            } else if !self.link_requested && self.link_backoff.is_ready(now) {
                self.request_link(now);
            }
            return false;
        }
        if self.state == ConnectionState::InterfaceConnecting {
            info!("gwt: link up");
            self.state = ConnectionState::SessionConnecting;
        }
        true
    }

    /// Drives the machine one step.
    ///
    /// Returns `true` only when the session is connected and a fresh inbound
    /// message is waiting in the slot.
    pub async fn poll(&mut self, now: Instant) -> bool {
        if self.state == ConnectionState::Disconnected {
            return false;
        }
        if !self.connect(now) {
            self.awaiting_subscription = false;
            if self.session.is_connected() {
                self.session.close().await;
            }
            return false;
        }
        if !self.session.is_connected() {
            if self.state == ConnectionState::Connected {
                warn!("gwt: session lost");
                self.state = ConnectionState::SessionConnecting;
            }
            if self.awaiting_subscription {
                self.fail_subscription();
            }
        }
        if self.state == ConnectionState::SessionConnecting && !self.awaiting_subscription {
            self.open_session(now).await;
            return false;
        }

        let prefix = &self.config.subscribe_prefix;
        let slot = &mut self.slot;
        let last_fault = &mut self.last_fault;
        let mut inbound = |topic: &str, payload: &[u8]| {
            debug!("gwt: inbound {}", topic);
            match codec::decode(prefix, topic, payload) {
                Ok(message) => slot.store(message),
                Err(err) => {
                    warn!("gwt: dropped malformed frame on {}: {:?}", topic, err);
                    *last_fault = Some(GatewayFault::MalformedInboundFrame(err));
                }
            }
        };
        if let Err(err) = self.session.poll(now, &mut inbound).await {
            warn!("gwt: session poll failed: {:?}", err);
            self.last_fault = Some(GatewayFault::from(err));
        }
        let dropped = self.session.take_dropped_frames();
        if dropped > 0 {
            warn!("gwt: dropped {} oversized inbound frame(s)", dropped);
            self.last_fault = Some(GatewayFault::MalformedInboundFrame(
                DecodeError::PayloadTooLarge,
            ));
        }

        if !self.session.is_connected() {
            self.state = ConnectionState::SessionConnecting;
            if self.awaiting_subscription {
                self.fail_subscription();
            }
            return false;
        }
        if self.awaiting_subscription && !self.session.is_subscription_pending() {
            self.awaiting_subscription = false;
            self.enter_connected();
        }
        self.state == ConnectionState::Connected && self.slot.is_fresh()
    }

    /// Publishes a message under the publish prefix.
    ///
    /// Returns `false` without queueing anything when not connected or when
    /// the session refuses the publish.
    pub async fn send(&mut self, message: &SensorMessage) -> bool {
        if !self.is_connected() {
            debug!("gwt: send while disconnected, dropping");
            return false;
        }
        match self.publish(message).await {
            Ok(()) => true,
            Err(err) => {
                warn!("gwt: publish rejected: {:?}", err);
                self.last_fault = Some(GatewayFault::PublishRejected);
                if !self.session.is_connected() {
                    self.state = ConnectionState::SessionConnecting;
                }
                false
            }
        }
    }

    /// Returns the last inbound message and clears its freshness flag.
    pub fn receive_last(&mut self) -> SensorMessage {
        self.slot.take()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Liveness: the session is open and subscribed.
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected && self.session.is_connected()
    }

    /// Freshness: an inbound message arrived since the last read.
    pub fn has_fresh(&self) -> bool {
        self.slot.is_fresh()
    }

    pub fn last_fault(&self) -> Option<GatewayFault> {
        self.last_fault
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    pub fn config(&self) -> &GatewayConfig<'a> {
        &self.config
    }

    fn request_link(&mut self, now: Instant) -> bool {
        self.link_backoff.record_attempt(now);
        self.link_requested = self.link.bring_up();
        if self.link_requested {
            info!("gwt: link bring-up issued");
            self.link_backoff.reset();
        } else {
            error!("gwt: link bring-up could not be issued");
            self.link_backoff.record_failure();
            self.last_fault = Some(GatewayFault::InterfaceDown);
        }
        self.link_requested
    }

    fn enter_interface_connecting(&mut self, now: Instant) {
        warn!("gwt: link down");
        self.state = ConnectionState::InterfaceConnecting;
        self.last_fault = Some(GatewayFault::InterfaceDown);
        self.request_link(now);
    }

    fn enter_connected(&mut self) {
        info!("gwt: session connected");
        self.state = ConnectionState::Connected;
        self.backoff.reset();
    }

    /// The session went away before the broker granted the subscription.
    fn fail_subscription(&mut self) {
        warn!("gwt: session lost before subscription was granted");
        self.awaiting_subscription = false;
        self.backoff.record_failure();
    }

    async fn open_session(&mut self, now: Instant) {
        if !self.backoff.is_ready(now) {
            return;
        }
        info!(
            "gwt: opening session (attempt {})",
            self.backoff.attempts() + 1
        );
        self.backoff.record_attempt(now);
        let Err(err) = self.handshake().await else {
            if self.session.is_subscription_pending() {
                debug!("gwt: waiting for subscription grant");
                self.awaiting_subscription = true;
            } else {
                self.enter_connected();
            }
            return;
        };

        self.backoff.record_failure();
        match err {
            SessionError::Security(code) => {
                error!("gwt: broker certificate rejected (code {})", code)
            }
            other => warn!("gwt: session open failed: {:?}", other),
        }
        self.last_fault = Some(GatewayFault::from(err));
        if self.session.is_connected() {
            self.session.close().await;
        }
    }

    /// Opens the session, publishes the node presentation and subscribes to
    /// the inbound wildcard, in that order.
    async fn handshake(&mut self) -> Result<(), SessionError> {
        let options = SessionOptions::from_config(&self.config);
        self.session.open(&options).await?;

        let mut outbox = BufferedOutbox::<MAX_PRESENTATION_MESSAGES>::new();
        self.presenter.present(&mut outbox);
        for message in outbox.iter() {
            self.publish(message).await?;
        }

        let filter = codec::subscription_filter(&self.config.subscribe_prefix);
        info!("gwt: subscribing to {}", filter.as_str());
        self.session.subscribe(&filter).await
    }

    async fn publish(&mut self, message: &SensorMessage) -> Result<(), SessionError> {
        let topic = codec::encode(&self.config.publish_prefix, message);
        let retain = self.config.retain && message.is_retained();
        debug!("gwt: publish {} (retain {})", topic.as_str(), retain);
        self.session
            .publish(&topic, message.payload.as_bytes(), retain)
            .await
    }
}
