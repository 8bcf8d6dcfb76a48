//! MQTT 3.x CONNECT packet decoding.
//!
//! Wire layout of the decoded portion:
//! - byte 0: packet type in the high nibble (CONNECT = 1)
//! - bytes 1+: remaining length, 7-bit groups with a continuation bit,
//!   at most 4 bytes
//! - 2-byte big-endian length + protocol name ("MQTT")
//! - 1 byte: protocol level
//! - 1 byte: connect flags (bit 7 = username present, bit 6 = password present)
//! - 2-byte big-endian keep-alive seconds
//! - 2-byte length + client identifier
//! - 2-byte length + username, only when the username flag is set and bytes
//!   remain in the buffer
//!
//! The remaining-length field is parsed but never checked against the
//! buffer's actual length; every field read is bounds-checked individually,
//! so a lying length cannot cause an out-of-bounds access. Will topic,
//! will message, and password payload fields are not decoded; none of them
//! carry routing information.

use crate::error::DecodeError;
use crate::hostname::derive_hub_hostname;

/// Packet-type nibble of a CONNECT packet.
pub const CONNECT_PACKET_TYPE: u8 = 1;

/// Protocol name a conforming 3.1.1 client sends in the variable header.
/// A mismatch does not fail decoding; callers log it.
pub const EXPECTED_PROTOCOL_NAME: &str = "MQTT";

/// Connect-flags bit indicating a username field follows the client id.
pub const USERNAME_FLAG: u8 = 0x80;

/// Connect-flags bit indicating a password field is present.
pub const PASSWORD_FLAG: u8 = 0x40;

/// Routing-relevant fields decoded from a CONNECT packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeInfo {
    /// Protocol name as sent ("MQTT" for 3.1.1 clients).
    pub protocol_name: String,
    /// Protocol level byte (4 for 3.1.1, 3 for 3.1).
    pub protocol_level: u8,
    /// Raw connect-flags byte.
    pub flags: u8,
    /// Keep-alive interval in seconds.
    pub keep_alive_secs: u16,
    /// Client identifier from the payload.
    pub client_id: String,
    /// Username, when the username flag was set and the field was present.
    pub username: Option<String>,
    /// Whether the password flag was set (the password itself is not decoded).
    pub has_password: bool,
    /// Hub hostname derived from the username (preferred) or client id.
    /// `None` when neither field embeds a name under the configured suffix.
    pub derived_hostname: Option<String>,
}

/// Decode the CONNECT packet at the start of `buf`.
///
/// `domain_suffix` is the hub domain (without a leading dot) used for
/// hostname derivation, e.g. `example-iot.net`. String fields decode
/// lossily; invalid UTF-8 becomes replacement characters rather than an
/// error.
pub fn decode_connect_packet(
    buf: &[u8],
    domain_suffix: &str,
) -> Result<HandshakeInfo, DecodeError> {
    let mut pos = 0usize;

    let first = read_u8(buf, &mut pos)?;
    let packet_type = first >> 4;
    if packet_type != CONNECT_PACKET_TYPE {
        return Err(DecodeError::NotAConnectPacket(packet_type));
    }

    // Informational only; see the module docs.
    let _remaining_len = read_remaining_length(buf, &mut pos)?;

    let protocol_name = read_lp_string(buf, &mut pos)?;
    let protocol_level = read_u8(buf, &mut pos)?;
    let flags = read_u8(buf, &mut pos)?;
    let keep_alive_secs = read_u16_be(buf, &mut pos)?;
    let client_id = read_lp_string(buf, &mut pos)?;

    let username = if flags & USERNAME_FLAG != 0 && pos < buf.len() {
        Some(read_lp_string(buf, &mut pos)?)
    } else {
        None
    };

    let derived_hostname = username
        .as_deref()
        .and_then(|name| derive_hub_hostname(name, domain_suffix))
        .or_else(|| derive_hub_hostname(&client_id, domain_suffix));

    Ok(HandshakeInfo {
        protocol_name,
        protocol_level,
        flags,
        keep_alive_secs,
        client_id,
        username,
        has_password: flags & PASSWORD_FLAG != 0,
        derived_hostname,
    })
}

fn read_u8(buf: &[u8], pos: &mut usize) -> Result<u8, DecodeError> {
    let byte = *buf.get(*pos).ok_or(DecodeError::Truncated)?;
    *pos += 1;
    Ok(byte)
}

fn read_u16_be(buf: &[u8], pos: &mut usize) -> Result<u16, DecodeError> {
    let hi = read_u8(buf, pos)?;
    let lo = read_u8(buf, pos)?;
    Ok(u16::from_be_bytes([hi, lo]))
}

/// Read a 2-byte length-prefixed UTF-8 string, decoding lossily.
fn read_lp_string(buf: &[u8], pos: &mut usize) -> Result<String, DecodeError> {
    let len = read_u16_be(buf, pos)? as usize;
    let bytes = buf
        .get(*pos..*pos + len)
        .ok_or(DecodeError::Truncated)?;
    *pos += len;
    Ok(String::from_utf8_lossy(bytes).into_owned())
}

/// Decode the variable-length remaining-length field (7 bits per byte,
/// high bit continues). A continuation bit still set after four bytes means
/// the field never terminated, reported as truncation.
fn read_remaining_length(buf: &[u8], pos: &mut usize) -> Result<u32, DecodeError> {
    let mut value: u32 = 0;
    let mut shift = 0u32;
    for _ in 0..4 {
        let byte = read_u8(buf, pos)?;
        value |= u32::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
    }
    Err(DecodeError::Truncated)
}
