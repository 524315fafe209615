//! # Sensor Messages
//!
//! The unit of exchange between the sensor network and the MQTT side of the
//! gateway. A message is a plain value: it is built on the stack, copied into
//! the inbound slot and never shared by reference across components.

use heapless::String;

/// Maximum payload length carried by a single sensor message.
pub const MAX_PAYLOAD_SIZE: usize = 25;

/// Node id of the gateway itself.
pub const GATEWAY_ADDRESS: u8 = 0;

/// Sensor id used for messages that concern the node as a whole.
pub const NODE_SENSOR_ID: u8 = 255;

/// Sub-types of [`Command::Internal`] messages the bridge cares about.
pub mod internal {
    /// Battery level report, in percent.
    pub const I_BATTERY_LEVEL: u8 = 0;
    /// Time request / response.
    pub const I_TIME: u8 = 1;
    /// Library version request / response.
    pub const I_VERSION: u8 = 2;
    /// Gateway startup complete.
    pub const I_GATEWAY_READY: u8 = 14;
}

/// The command class of a message. The discriminant is the wire code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Command {
    /// Sent by a node when presenting its attached sensors.
    Presentation = 0,
    /// Carries a new value for a sensor or actuator.
    Set = 1,
    /// Asks for the current value of a variable.
    Request = 2,
    /// Library-internal traffic (battery, time, configuration, ...).
    Internal = 3,
    /// Firmware and bulk data streams.
    Stream = 4,
}

impl Command {
    /// Maps a wire code back to a command, `None` for unknown codes.
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Presentation),
            1 => Some(Self::Set),
            2 => Some(Self::Request),
            3 => Some(Self::Internal),
            4 => Some(Self::Stream),
            _ => None,
        }
    }

    /// The integer used for this command in topic paths.
    pub const fn code(self) -> u8 {
        self as u8
    }
}

/// Error returned when a payload does not fit into [`MAX_PAYLOAD_SIZE`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PayloadTooLarge;

/// A decoded sensor network message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorMessage {
    pub node_id: u8,
    pub sensor_id: u8,
    pub command: Command,
    pub ack_requested: bool,
    pub sub_type: u8,
    pub payload: String<MAX_PAYLOAD_SIZE>,
}

impl SensorMessage {
    /// Creates a message with an empty payload and no ack request.
    pub const fn new(node_id: u8, sensor_id: u8, command: Command, sub_type: u8) -> Self {
        Self {
            node_id,
            sensor_id,
            command,
            ack_requested: false,
            sub_type,
            payload: String::new(),
        }
    }

    /// Sets the ack flag.
    pub fn with_ack(mut self, ack_requested: bool) -> Self {
        self.ack_requested = ack_requested;
        self
    }

    /// Replaces the payload, failing if it is longer than [`MAX_PAYLOAD_SIZE`].
    pub fn with_payload(mut self, payload: &str) -> Result<Self, PayloadTooLarge> {
        self.set_payload(payload)?;
        Ok(self)
    }

    /// Replaces the payload in place. On failure the old payload is kept.
    pub fn set_payload(&mut self, payload: &str) -> Result<(), PayloadTooLarge> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(PayloadTooLarge);
        }
        self.payload.clear();
        self.payload.push_str(payload).map_err(|_| PayloadTooLarge)
    }

    /// Whether the broker should keep this message for late subscribers.
    ///
    /// Actuator values and battery reports are retained so that a controller
    /// that connects later immediately sees the last known state.
    pub fn is_retained(&self) -> bool {
        match self.command {
            Command::Set => true,
            Command::Internal => self.sub_type == internal::I_BATTERY_LEVEL,
            _ => false,
        }
    }
}

impl Default for SensorMessage {
    fn default() -> Self {
        Self::new(GATEWAY_ADDRESS, NODE_SENSOR_ID, Command::Internal, 0)
    }
}
