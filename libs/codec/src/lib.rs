//! Binary decoding for MQTT 3.x control packets.
//!
//! This crate extracts the routing-relevant fields of a CONNECT packet
//! (client identifier, username, derived hub hostname) without performing
//! any socket I/O, and classifies arbitrary first bytes into control-packet
//! names for diagnostics. Everything here is a pure function of its inputs:
//! callers decide what to log and when to give up on a stream.

pub mod connect;
pub mod error;
pub mod hostname;
pub mod packet;

pub use connect::{
    decode_connect_packet, HandshakeInfo, CONNECT_PACKET_TYPE, EXPECTED_PROTOCOL_NAME,
    PASSWORD_FLAG, USERNAME_FLAG,
};
pub use error::DecodeError;
pub use hostname::derive_hub_hostname;
pub use packet::{classify_packet_type, PacketType};
