//! # MQTT Serialization Utilities
//!
//! This module provides helper functions for reading and writing MQTT-specific data types
//! from and to byte buffers, such as variable-byte integers and length-prefixed strings.
//! All helpers are bounds checked and advance a caller-owned cursor.

use crate::error::{PacketError, ProtocolError};

const MALFORMED: PacketError = PacketError::Protocol(ProtocolError::MalformedPacket);

/// Offset at which packet bodies are assembled before the fixed header is known.
///
/// One byte for the packet type plus the longest variable-byte length.
pub const BODY_OFFSET: usize = 5;

/// Reads a variable-byte integer from the buffer, advancing the cursor.
///
/// This is a common encoding scheme in MQTT for packet lengths.
pub fn read_variable_byte_integer(cursor: &mut usize, buf: &[u8]) -> Result<usize, PacketError> {
    match peek_variable_byte_integer(&buf[(*cursor).min(buf.len())..])? {
        Some((value, len)) => {
            *cursor += len;
            Ok(value)
        }
        None => Err(MALFORMED),
    }
}

/// Decodes a variable-byte integer at the start of `buf`.
///
/// Returns the value and the number of bytes it occupies, or `None` when the
/// buffer ends before the integer does.
fn peek_variable_byte_integer(buf: &[u8]) -> Result<Option<(usize, usize)>, PacketError> {
    let mut multiplier = 1;
    let mut value = 0;
    for (i, encoded_byte) in buf.iter().enumerate() {
        if i >= 4 {
            return Err(MALFORMED);
        }
        value += (encoded_byte & 127) as usize * multiplier;
        if (encoded_byte & 128) == 0 {
            return Ok(Some((value, i + 1)));
        }
        multiplier *= 128;
    }
    if buf.len() >= 4 {
        return Err(MALFORMED);
    }
    Ok(None)
}

/// Writes a variable-byte integer to the start of `buf`, returning the byte count.
pub fn write_variable_byte_integer_len(buf: &mut [u8], mut val: usize) -> Result<usize, PacketError> {
    let mut i = 0;
    loop {
        let mut encoded_byte = (val % 128) as u8;
        val /= 128;
        if val > 0 {
            encoded_byte |= 128;
        }
        *buf.get_mut(i).ok_or(PacketError::BufferTooSmall)? = encoded_byte;
        i += 1;
        if val == 0 {
            break;
        }
    }
    Ok(i)
}

/// Total length announced by the fixed header at the start of `buf`, or
/// `None` while the header itself is incomplete.
pub fn announced_length(buf: &[u8]) -> Result<Option<usize>, PacketError> {
    let Some(rest) = buf.get(1..) else {
        return Ok(None);
    };
    Ok(peek_variable_byte_integer(rest)?.map(|(remaining, len)| 1 + len + remaining))
}

/// Length of the first complete packet in `buf`, or `None` if more bytes are needed.
pub fn frame_length(buf: &[u8]) -> Result<Option<usize>, PacketError> {
    Ok(announced_length(buf)?.filter(|total| buf.len() >= *total))
}

/// Writes the fixed header in front of a body assembled at [`BODY_OFFSET`]
/// and moves the body right behind it. Returns the total packet length.
pub fn finish_packet(buf: &mut [u8], header: u8, body_end: usize) -> Result<usize, PacketError> {
    if buf.len() < BODY_OFFSET || body_end < BODY_OFFSET || body_end > buf.len() {
        return Err(PacketError::BufferTooSmall);
    }
    let remaining_len = body_end - BODY_OFFSET;
    let len_bytes = write_variable_byte_integer_len(&mut buf[1..BODY_OFFSET], remaining_len)?;
    buf[0] = header;
    let header_len = 1 + len_bytes;
    buf.copy_within(BODY_OFFSET..body_end, header_len);
    Ok(header_len + remaining_len)
}

pub fn read_u8(cursor: &mut usize, buf: &[u8]) -> Result<u8, PacketError> {
    let byte = *buf.get(*cursor).ok_or(MALFORMED)?;
    *cursor += 1;
    Ok(byte)
}

pub fn read_u16(cursor: &mut usize, buf: &[u8]) -> Result<u16, PacketError> {
    let bytes = buf.get(*cursor..*cursor + 2).ok_or(MALFORMED)?;
    *cursor += 2;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}

/// Reads a UTF-8 encoded string (prefixed with a 2-byte length) from the buffer.
pub fn read_utf8_string<'a>(cursor: &mut usize, buf: &'a [u8]) -> Result<&'a str, PacketError> {
    let len = read_u16(cursor, buf)? as usize;
    let bytes = buf.get(*cursor..*cursor + len).ok_or(MALFORMED)?;
    let s = core::str::from_utf8(bytes)
        .map_err(|_| PacketError::Protocol(ProtocolError::InvalidUtf8String))?;
    *cursor += len;
    Ok(s)
}

pub fn write_u8(cursor: &mut usize, buf: &mut [u8], val: u8) -> Result<(), PacketError> {
    *buf.get_mut(*cursor).ok_or(PacketError::BufferTooSmall)? = val;
    *cursor += 1;
    Ok(())
}

pub fn write_u16(cursor: &mut usize, buf: &mut [u8], val: u16) -> Result<(), PacketError> {
    write_bytes(cursor, buf, &val.to_be_bytes())
}

pub fn write_bytes(cursor: &mut usize, buf: &mut [u8], bytes: &[u8]) -> Result<(), PacketError> {
    buf.get_mut(*cursor..*cursor + bytes.len())
        .ok_or(PacketError::BufferTooSmall)?
        .copy_from_slice(bytes);
    *cursor += bytes.len();
    Ok(())
}

/// Writes a UTF-8 encoded string (prefixed with a 2-byte length) to the buffer.
pub fn write_utf8_string(cursor: &mut usize, buf: &mut [u8], s: &str) -> Result<(), PacketError> {
    let len = u16::try_from(s.len())
        .map_err(|_| PacketError::Protocol(ProtocolError::PayloadTooLarge))?;
    write_u16(cursor, buf, len)?;
    write_bytes(cursor, buf, s.as_bytes())
}
