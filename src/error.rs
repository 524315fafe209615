//! # Error Types
//!
//! Errors produced below the gateway facade. None of them escape it: the
//! connection state machine absorbs every failure and turns it into a retry or
//! a `false` result, keeping only the most recent [`GatewayFault`] around for
//! diagnostics.

use crate::transport::TransportError;

/// Errors raised by the MQTT packet encoder and decoder. These never involve
/// I/O, so they carry no transport error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PacketError {
    /// The bytes do not form a valid packet.
    Protocol(ProtocolError),
    /// The buffer provided for an operation was too small.
    BufferTooSmall,
}

/// Errors of the MQTT client, generic over the transport error type `T`.
#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MqttError<T> {
    /// An error occurred in the underlying transport layer.
    Transport(T),
    /// A protocol-level error occurred.
    Protocol(ProtocolError),
    /// The connection was refused by the broker.
    ConnectionRefused(ConnectReasonCode),
    /// The buffer provided for an operation was too small.
    BufferTooSmall,
    /// The broker did not answer in time.
    Timeout,
    /// The broker refused a subscription.
    SubscriptionRejected,
}

impl<T: TransportError> From<T> for MqttError<T> {
    fn from(err: T) -> Self {
        MqttError::Transport(err)
    }
}

impl<T> From<PacketError> for MqttError<T> {
    fn from(err: PacketError) -> Self {
        match err {
            PacketError::Protocol(p) => MqttError::Protocol(p),
            PacketError::BufferTooSmall => MqttError::BufferTooSmall,
        }
    }
}

/// Reason codes for a connection refusal (`CONNACK`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConnectReasonCode {
    Success,
    UnacceptableProtocolVersion,
    IdentifierRejected,
    ServerUnavailable,
    BadUserNameOrPassword,
    NotAuthorized,
    Other(u8),
}

impl From<u8> for ConnectReasonCode {
    fn from(val: u8) -> Self {
        match val {
            0 => Self::Success,
            1 => Self::UnacceptableProtocolVersion,
            2 => Self::IdentifierRejected,
            3 => Self::ServerUnavailable,
            4 => Self::BadUserNameOrPassword,
            5 => Self::NotAuthorized,
            _ => Self::Other(val),
        }
    }
}

/// Specific MQTT protocol violations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProtocolError {
    /// An invalid packet type was received.
    InvalidPacketType(u8),
    /// The server sent an invalid or unexpected response.
    InvalidResponse,
    /// The connection was closed by the broker.
    ConnectionClosed,
    /// A packet was received that was not correctly formed.
    MalformedPacket,
    /// A string or payload exceeds what the packet can carry.
    PayloadTooLarge,
    /// A string was not valid UTF-8.
    InvalidUtf8String,
}

/// Why an inbound topic/payload pair could not be turned into a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DecodeError {
    /// The topic does not start with the subscribe prefix.
    MissingPrefix,
    /// Fewer than five fields follow the prefix.
    MissingField,
    /// More than five fields follow the prefix.
    TrailingField,
    /// A field is not a decimal `u8`, or the ack flag is not `0`/`1`.
    InvalidField,
    /// The command field holds an unknown code.
    UnknownCommand(u8),
    /// The payload does not fit into a sensor message.
    PayloadTooLarge,
    /// The payload is not valid UTF-8.
    InvalidPayload,
}

/// Failures reported by a [`crate::session::Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SessionError {
    /// The stream to the broker failed or could not be opened.
    Transport,
    /// The broker certificate or fingerprint was rejected. The code is the
    /// diagnostic reported by the security layer.
    Security(i32),
    /// The broker refused the connection.
    Refused(ConnectReasonCode),
    /// The broker answered with something unexpected.
    Protocol(ProtocolError),
    /// The broker did not answer in time.
    Timeout,
    /// The operation needs an open session.
    NotConnected,
    /// The broker rejected a subscription.
    Rejected,
    /// Topic or payload too large for the session buffers.
    BufferTooSmall,
}

impl SessionError {
    pub fn is_security(&self) -> bool {
        matches!(self, SessionError::Security(_))
    }
}

impl<T: TransportError> From<MqttError<T>> for SessionError {
    fn from(err: MqttError<T>) -> Self {
        match err {
            MqttError::Transport(e) => match e.security_code() {
                Some(code) => SessionError::Security(code),
                None => SessionError::Transport,
            },
            MqttError::Protocol(p) => SessionError::Protocol(p),
            MqttError::ConnectionRefused(code) => SessionError::Refused(code),
            MqttError::BufferTooSmall => SessionError::BufferTooSmall,
            MqttError::Timeout => SessionError::Timeout,
            MqttError::SubscriptionRejected => SessionError::Rejected,
        }
    }
}

/// The gateway level classification of the last failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum GatewayFault {
    /// The network link is not associated.
    InterfaceDown,
    /// Opening or subscribing the session failed.
    SessionOpenFailed(SessionError),
    /// The broker certificate could not be validated.
    SecurityValidationFailed(i32),
    /// An inbound frame was discarded.
    MalformedInboundFrame(DecodeError),
    /// The session refused an outbound publish.
    PublishRejected,
}

impl From<SessionError> for GatewayFault {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Security(code) => GatewayFault::SecurityValidationFailed(code),
            other => GatewayFault::SessionOpenFailed(other),
        }
    }
}
