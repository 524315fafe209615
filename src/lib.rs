//! # MQTT Gateway Transport for Sensor Networks
//!
//! `myrtio-gateway` bridges a compact sensor-network message protocol and an
//! MQTT broker on microcontroller-class devices. It is `no_std`, never
//! allocates and is built on the [Embassy](https://embassy.dev/) async
//! ecosystem.
//!
//! ## Layers
//!
//! - [`codec`]: converts a [`SensorMessage`] to and from
//!   `prefix/node/sensor/command/ack/sub_type` topic paths.
//! - [`connection`]: the lifecycle state machine. Brings the link up, opens
//!   and presents the session, subscribes to `prefix/+/+/+/+/+` and
//!   reconnects forever behind a fixed backoff.
//! - [`gateway`]: [`GatewayTransport`], the facade the firmware uses:
//!   `initialize`, `connect`, `poll_available`, `send`, `receive_last`.
//! - [`scheduler`]: fixed-quantum loops running network processing, the
//!   application and the watchdog in one task or split across two.
//!
//! The broker session is abstracted by the [`Session`] trait. [`MqttClient`]
//! implements it with MQTT 3.1.1 over any [`MqttTransport`], for example
//! [`TcpTransport`] on an `embassy-net` stack.
//!
//! ## Diagnostics
//!
//! Enable one of the `log`, `defmt` or `esp32-log` features to get the
//! gateway's `gwt:` log lines. The most recent absorbed failure is always
//! available through [`GatewayTransport::last_fault`].

#![cfg_attr(not(test), no_std)]

mod fmt;

pub mod client;
pub mod clock;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod gateway;
pub mod link;
pub mod message;
pub mod outbox;
pub mod packet;
pub mod scheduler;
pub mod session;
pub mod transport;
pub mod util;

// Re-export key types for easier access at the crate root.
pub use client::MqttClient;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Broker, GatewayConfig, Security, TopicPrefix};
pub use connection::ConnectionState;
pub use error::{DecodeError, GatewayFault, SessionError};
pub use gateway::GatewayTransport;
pub use link::{NetworkLink, SimulatedLink, StackLink};
pub use message::{Command, SensorMessage};
pub use outbox::{MessageOutbox, NoPresentation, Presenter};
pub use scheduler::{GatewayNode, InitSignal, MessageRouter, NoWatchdog, QUANTUM};
pub use session::Session;
pub use transport::{MqttTransport, TcpTransport};
