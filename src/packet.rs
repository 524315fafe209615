//! # MQTT Packet Structures and Serialization
//!
//! The MQTT 3.1.1 control packets the gateway session needs, and the traits for
//! encoding them to and decoding them from a byte buffer. Only QoS 0 traffic is
//! produced; inbound QoS 1 publishes are decoded so that they can be acked.

use crate::config::Credentials;
use crate::error::{PacketError, ProtocolError};
use crate::util::{
    self, BODY_OFFSET, finish_packet, read_u8, read_u16, read_utf8_string, write_bytes, write_u8,
    write_u16, write_utf8_string,
};

const CONNECT: u8 = 0x10;
const PUBLISH: u8 = 0x30;
const PUBACK: u8 = 0x40;
const SUBSCRIBE: u8 = 0x82;
const PINGREQ: u8 = 0xC0;
const DISCONNECT: u8 = 0xE0;

/// Protocol level byte for MQTT 3.1.1.
const PROTOCOL_LEVEL: u8 = 4;

/// SUBACK return code signalling a refused subscription.
pub const SUBACK_FAILURE: u8 = 0x80;

/// Represents the Quality of Service (QoS) levels for MQTT messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum QoS {
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

/// A trait for packets that can be encoded into a byte buffer.
pub trait EncodePacket {
    fn encode(&self, buf: &mut [u8]) -> Result<usize, PacketError>;
}

/// A trait for packets that can be decoded from a byte buffer.
pub trait DecodePacket<'a>: Sized {
    fn decode(buf: &'a [u8]) -> Result<Self, PacketError>;
}

/// Packets a client can receive from the broker.
#[derive(Debug)]
pub enum MqttPacket<'a> {
    ConnAck(ConnAck),
    Publish(Publish<'a>),
    PubAck(u16),
    SubAck(SubAck),
    PingResp,
}

/// Decodes one complete packet. `buf` must hold exactly one frame.
pub fn decode(buf: &[u8]) -> Result<MqttPacket<'_>, PacketError> {
    let packet_type = *buf
        .first()
        .ok_or(PacketError::Protocol(ProtocolError::MalformedPacket))?
        >> 4;
    let packet = match packet_type {
        2 => MqttPacket::ConnAck(ConnAck::decode(buf)?),
        3 => MqttPacket::Publish(Publish::decode(buf)?),
        4 => {
            let mut cursor = body_start(buf)?;
            MqttPacket::PubAck(read_u16(&mut cursor, buf)?)
        }
        9 => MqttPacket::SubAck(SubAck::decode(buf)?),
        13 => MqttPacket::PingResp,
        _ => {
            return Err(PacketError::Protocol(ProtocolError::InvalidPacketType(
                packet_type,
            )));
        }
    };
    Ok(packet)
}

/// Skips the fixed header, returning the offset of the variable header.
fn body_start(buf: &[u8]) -> Result<usize, PacketError> {
    let mut cursor = 1;
    util::read_variable_byte_integer(&mut cursor, buf)?;
    Ok(cursor)
}

// --- CONNECT Packet ---
#[derive(Debug)]
pub struct Connect<'a> {
    pub clean_session: bool,
    pub keep_alive: u16,
    pub client_id: &'a str,
    pub credentials: Option<Credentials<'a>>,
}

impl<'a> Connect<'a> {
    pub fn new(client_id: &'a str, keep_alive: u16, clean_session: bool) -> Self {
        Self {
            client_id,
            keep_alive,
            clean_session,
            credentials: None,
        }
    }

    pub fn with_credentials(mut self, credentials: Option<Credentials<'a>>) -> Self {
        self.credentials = credentials;
        self
    }
}

impl EncodePacket for Connect<'_> {
    fn encode(&self, buf: &mut [u8]) -> Result<usize, PacketError> {
        let mut cursor = BODY_OFFSET;
        write_utf8_string(&mut cursor, buf, "MQTT")?;
        write_u8(&mut cursor, buf, PROTOCOL_LEVEL)?;
        let mut flags = 0;
        if self.clean_session {
            flags |= 0x02;
        }
        if self.credentials.is_some() {
            flags |= 0x80 | 0x40;
        }
        write_u8(&mut cursor, buf, flags)?;
        write_u16(&mut cursor, buf, self.keep_alive)?;
        write_utf8_string(&mut cursor, buf, self.client_id)?;
        if let Some(credentials) = &self.credentials {
            write_utf8_string(&mut cursor, buf, credentials.username)?;
            write_utf8_string(&mut cursor, buf, credentials.password)?;
        }
        finish_packet(buf, CONNECT, cursor)
    }
}

// --- CONNACK Packet ---
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnAck {
    pub session_present: bool,
    pub reason_code: u8,
}

impl DecodePacket<'_> for ConnAck {
    fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        let mut cursor = body_start(buf)?;
        let session_present = (read_u8(&mut cursor, buf)? & 0x01) != 0;
        let reason_code = read_u8(&mut cursor, buf)?;
        Ok(Self {
            session_present,
            reason_code,
        })
    }
}

// --- PUBLISH Packet ---
#[derive(Debug)]
pub struct Publish<'a> {
    pub topic: &'a str,
    pub qos: QoS,
    pub retain: bool,
    pub payload: &'a [u8],
    pub packet_id: Option<u16>,
}

impl<'a> Publish<'a> {
    /// A QoS 0 publish.
    pub fn new(topic: &'a str, payload: &'a [u8], retain: bool) -> Self {
        Self {
            topic,
            qos: QoS::AtMostOnce,
            retain,
            payload,
            packet_id: None,
        }
    }
}

impl<'a> DecodePacket<'a> for Publish<'a> {
    fn decode(buf: &'a [u8]) -> Result<Self, PacketError> {
        let flags = *buf
            .first()
            .ok_or(PacketError::Protocol(ProtocolError::MalformedPacket))?
            & 0x0F;
        let qos = match (flags >> 1) & 0x03 {
            0 => QoS::AtMostOnce,
            1 => QoS::AtLeastOnce,
            2 => QoS::ExactlyOnce,
            _ => return Err(PacketError::Protocol(ProtocolError::MalformedPacket)),
        };
        let retain = flags & 0x01 != 0;

        let mut cursor = body_start(buf)?;
        let topic = read_utf8_string(&mut cursor, buf)?;
        let packet_id = if qos != QoS::AtMostOnce {
            Some(read_u16(&mut cursor, buf)?)
        } else {
            None
        };

        Ok(Publish {
            topic,
            qos,
            retain,
            payload: &buf[cursor..],
            packet_id,
        })
    }
}

impl EncodePacket for Publish<'_> {
    fn encode(&self, buf: &mut [u8]) -> Result<usize, PacketError> {
        let mut cursor = BODY_OFFSET;
        write_utf8_string(&mut cursor, buf, self.topic)?;
        if self.qos != QoS::AtMostOnce {
            let id = self
                .packet_id
                .ok_or(PacketError::Protocol(ProtocolError::MalformedPacket))?;
            write_u16(&mut cursor, buf, id)?;
        }
        write_bytes(&mut cursor, buf, self.payload)?;

        let header = PUBLISH | ((self.qos as u8) << 1) | u8::from(self.retain);
        finish_packet(buf, header, cursor)
    }
}

// --- PUBACK Packet ---
#[derive(Debug)]
pub struct PubAck {
    pub packet_id: u16,
}

impl EncodePacket for PubAck {
    fn encode(&self, buf: &mut [u8]) -> Result<usize, PacketError> {
        let mut cursor = BODY_OFFSET;
        write_u16(&mut cursor, buf, self.packet_id)?;
        finish_packet(buf, PUBACK, cursor)
    }
}

// --- SUBSCRIBE Packet ---
#[derive(Debug)]
pub struct Subscribe<'a> {
    pub packet_id: u16,
    pub topic: &'a str,
    pub qos: QoS,
}

impl<'a> Subscribe<'a> {
    /// Creates a new Subscribe packet with a single topic filter.
    pub fn new(packet_id: u16, topic: &'a str, qos: QoS) -> Self {
        Self {
            packet_id,
            topic,
            qos,
        }
    }
}

impl EncodePacket for Subscribe<'_> {
    fn encode(&self, buf: &mut [u8]) -> Result<usize, PacketError> {
        let mut cursor = BODY_OFFSET;
        write_u16(&mut cursor, buf, self.packet_id)?;
        write_utf8_string(&mut cursor, buf, self.topic)?;
        write_u8(&mut cursor, buf, self.qos as u8)?;
        finish_packet(buf, SUBSCRIBE, cursor)
    }
}

// --- SUBACK Packet ---
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubAck {
    pub packet_id: u16,
    /// Return code of the first (and only) topic filter.
    pub return_code: u8,
}

impl SubAck {
    pub fn is_granted(&self) -> bool {
        self.return_code != SUBACK_FAILURE
    }
}

impl DecodePacket<'_> for SubAck {
    fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        let mut cursor = body_start(buf)?;
        let packet_id = read_u16(&mut cursor, buf)?;
        let return_code = read_u8(&mut cursor, buf)?;
        Ok(SubAck {
            packet_id,
            return_code,
        })
    }
}

// --- PINGREQ Packet ---
#[derive(Debug)]
pub struct PingReq;

impl EncodePacket for PingReq {
    fn encode(&self, buf: &mut [u8]) -> Result<usize, PacketError> {
        encode_empty(buf, PINGREQ)
    }
}

// --- DISCONNECT Packet ---
#[derive(Debug)]
pub struct Disconnect;

impl EncodePacket for Disconnect {
    fn encode(&self, buf: &mut [u8]) -> Result<usize, PacketError> {
        encode_empty(buf, DISCONNECT)
    }
}

fn encode_empty(buf: &mut [u8], header: u8) -> Result<usize, PacketError> {
    let out = buf.get_mut(..2).ok_or(PacketError::BufferTooSmall)?;
    out[0] = header;
    out[1] = 0x00;
    Ok(2)
}
