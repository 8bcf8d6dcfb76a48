//! Decoder error types.

use thiserror::Error;

/// Failure modes of CONNECT packet decoding.
///
/// Both variants are recoverable: the caller closes or keeps feeding the
/// connection, nothing here is process-fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The buffer ended before a required field could be fully read, or a
    /// length field never terminated. More bytes may make the packet
    /// decodable.
    #[error("truncated CONNECT packet")]
    Truncated,

    /// The leading packet-type nibble is not CONNECT. Carries the nibble
    /// that was found so callers can report what the client actually sent.
    #[error("not a CONNECT packet (type nibble {0})")]
    NotAConnectPacket(u8),
}
