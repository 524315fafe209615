//! # Topic Codec
//!
//! Converts sensor messages to and from MQTT topics of the form
//!
//! ```text
//! <prefix>/<node-id>/<sensor-id>/<command>/<ack>/<sub-type>
//! ```
//!
//! The payload is carried verbatim as the MQTT message body. All functions are
//! pure: decoding either yields a complete message or an error, never a
//! partially filled one.

use core::fmt::Write;

use heapless::String;

use crate::config::{MAX_PREFIX_LEN, TopicPrefix};
use crate::error::DecodeError;
use crate::message::{Command, MAX_PAYLOAD_SIZE, SensorMessage};

/// Number of numeric fields following the prefix.
pub const FIELD_COUNT: usize = 5;

/// Room for the prefix plus five `/<u8>` segments.
pub const MAX_TOPIC_LEN: usize = MAX_PREFIX_LEN + FIELD_COUNT * 4;

/// An encoded topic or topic filter.
pub type TopicPath = String<MAX_TOPIC_LEN>;

/// Builds the topic for an outbound message.
pub fn encode(prefix: &TopicPrefix, msg: &SensorMessage) -> TopicPath {
    let mut topic = TopicPath::new();
    // Cannot overflow: the prefix length is bounded by `TopicPrefix`.
    let _ = write!(
        topic,
        "{}/{}/{}/{}/{}/{}",
        prefix.as_str(),
        msg.node_id,
        msg.sensor_id,
        msg.command.code(),
        u8::from(msg.ack_requested),
        msg.sub_type
    );
    topic
}

/// Builds the wildcard filter matching every topic [`decode`] accepts.
pub fn subscription_filter(prefix: &TopicPrefix) -> TopicPath {
    let mut filter = TopicPath::new();
    let _ = write!(filter, "{}/+/+/+/+/+", prefix.as_str());
    filter
}

/// Parses an inbound topic and payload into a message.
pub fn decode(
    prefix: &TopicPrefix,
    topic: &str,
    payload: &[u8],
) -> Result<SensorMessage, DecodeError> {
    let fields = topic
        .strip_prefix(prefix.as_str())
        .and_then(|rest| rest.strip_prefix('/'))
        .ok_or(DecodeError::MissingPrefix)?;

    let mut values = [0u8; FIELD_COUNT];
    let mut parts = fields.split('/');
    for value in values.iter_mut() {
        let part = parts.next().ok_or(DecodeError::MissingField)?;
        *value = parse_field(part)?;
    }
    if parts.next().is_some() {
        return Err(DecodeError::TrailingField);
    }

    let [node_id, sensor_id, command, ack, sub_type] = values;
    let command = Command::from_code(command).ok_or(DecodeError::UnknownCommand(command))?;
    let ack_requested = match ack {
        0 => false,
        1 => true,
        _ => return Err(DecodeError::InvalidField),
    };

    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(DecodeError::PayloadTooLarge);
    }
    let text = core::str::from_utf8(payload).map_err(|_| DecodeError::InvalidPayload)?;

    let mut msg = SensorMessage::new(node_id, sensor_id, command, sub_type).with_ack(ack_requested);
    msg.set_payload(text)
        .map_err(|_| DecodeError::PayloadTooLarge)?;
    Ok(msg)
}

fn parse_field(part: &str) -> Result<u8, DecodeError> {
    if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
        return Err(DecodeError::InvalidField);
    }
    part.parse().map_err(|_| DecodeError::InvalidField)
}
