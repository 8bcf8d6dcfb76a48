//! Control-packet classification from a packet's first byte.
//!
//! Used for diagnostics only, e.g. logging what a client actually sent
//! when a handshake cannot be routed. The low nibble (DUP/QoS/RETAIN on
//! PUBLISH) is ignored.

use std::fmt;

/// MQTT 3.x control-packet type, or `Unknown` for reserved nibbles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    Connect,
    ConnAck,
    Publish,
    PubAck,
    PubRec,
    PubRel,
    PubComp,
    Subscribe,
    SubAck,
    Unsubscribe,
    UnsubAck,
    PingReq,
    PingResp,
    Disconnect,
    /// Reserved or unrecognized type nibble (0 or 15, or an empty buffer).
    Unknown(u8),
}

/// Classify the control packet starting at `buffer[0]`.
///
/// An empty buffer classifies as `Unknown(0)`.
pub fn classify_packet_type(buffer: &[u8]) -> PacketType {
    let nibble = buffer.first().map(|b| b >> 4).unwrap_or(0);
    match nibble {
        1 => PacketType::Connect,
        2 => PacketType::ConnAck,
        3 => PacketType::Publish,
        4 => PacketType::PubAck,
        5 => PacketType::PubRec,
        6 => PacketType::PubRel,
        7 => PacketType::PubComp,
        8 => PacketType::Subscribe,
        9 => PacketType::SubAck,
        10 => PacketType::Unsubscribe,
        11 => PacketType::UnsubAck,
        12 => PacketType::PingReq,
        13 => PacketType::PingResp,
        14 => PacketType::Disconnect,
        other => PacketType::Unknown(other),
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketType::Connect => write!(f, "CONNECT"),
            PacketType::ConnAck => write!(f, "CONNACK"),
            PacketType::Publish => write!(f, "PUBLISH"),
            PacketType::PubAck => write!(f, "PUBACK"),
            PacketType::PubRec => write!(f, "PUBREC"),
            PacketType::PubRel => write!(f, "PUBREL"),
            PacketType::PubComp => write!(f, "PUBCOMP"),
            PacketType::Subscribe => write!(f, "SUBSCRIBE"),
            PacketType::SubAck => write!(f, "SUBACK"),
            PacketType::Unsubscribe => write!(f, "UNSUBSCRIBE"),
            PacketType::UnsubAck => write!(f, "UNSUBACK"),
            PacketType::PingReq => write!(f, "PINGREQ"),
            PacketType::PingResp => write!(f, "PINGRESP"),
            PacketType::Disconnect => write!(f, "DISCONNECT"),
            PacketType::Unknown(nibble) => write!(f, "UNKNOWN({nibble})"),
        }
    }
}
