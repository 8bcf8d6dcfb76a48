//! Gateway error taxonomy.

use hubward_codec::DecodeError;
use thiserror::Error;

/// Errors a tunnel session can fail with, with standardized reason codes.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The sniffed handshake could not be decoded.
    #[error("handshake decode failed: {0}")]
    Decode(#[from] DecodeError),

    /// The handshake decoded but named no routable hub.
    #[error("no route found for session")]
    NoRouteFound,

    /// A CONNECT request carried a malformed target.
    #[error("invalid tunnel target: {0}")]
    InvalidTarget(String),

    /// The upstream dial failed or timed out.
    #[error("upstream dial failed: {0}")]
    Dial(String),

    /// Tunnel credentials were missing or wrong.
    #[error("proxy authentication failed")]
    Auth,

    /// A socket failed during handshake or relay.
    #[error("relay error: {0}")]
    Relay(#[from] std::io::Error),
}

impl GatewayError {
    /// Get the standardized reason code for this error.
    ///
    /// Reason codes are stable identifiers carried by logs and
    /// `session.failed` events; display strings are not.
    pub fn reason_code(&self) -> &'static str {
        match self {
            GatewayError::Decode(DecodeError::Truncated) => "decode_truncated",
            GatewayError::Decode(DecodeError::NotAConnectPacket(_)) => "decode_not_connect",
            GatewayError::NoRouteFound => "no_route_found",
            GatewayError::InvalidTarget(_) => "invalid_target",
            GatewayError::Dial(_) => "dial_failure",
            GatewayError::Auth => "auth_failure",
            GatewayError::Relay(_) => "relay_failure",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_codes_distinguish_decode_failures() {
        let truncated = GatewayError::Decode(DecodeError::Truncated);
        let wrong_type = GatewayError::Decode(DecodeError::NotAConnectPacket(3));
        assert_eq!(truncated.reason_code(), "decode_truncated");
        assert_eq!(wrong_type.reason_code(), "decode_not_connect");
    }

    #[test]
    fn io_errors_convert_to_relay_failures() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let err = GatewayError::from(io);
        assert_eq!(err.reason_code(), "relay_failure");
    }
}
