//! Event frame - the common wrapper for all broadcast events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EventError;
use crate::types::TunnelEvent;

/// The frame every broadcast event ships in.
///
/// `seq` is monotonic per process; a consumer that observes a gap knows it
/// lagged and missed frames, since the broadcaster drops oldest-first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventFrame {
    /// Process-monotonic sequence number.
    pub seq: u64,

    /// When the event occurred.
    pub occurred_at: DateTime<Utc>,

    /// The event itself, flattened next to the frame fields.
    #[serde(flatten)]
    pub event: TunnelEvent,
}

impl EventFrame {
    /// Frame an event with the given sequence number, stamped now.
    pub fn new(seq: u64, event: TunnelEvent) -> Self {
        Self {
            seq,
            occurred_at: Utc::now(),
            event,
        }
    }

    /// Serialize to a single newline-terminated JSON line.
    pub fn to_json_line(&self) -> Result<String, EventError> {
        let mut line =
            serde_json::to_string(self).map_err(|err| EventError::Encode(err.to_string()))?;
        line.push('\n');
        Ok(line)
    }

    /// Parse one line of a newline-delimited JSON stream.
    pub fn from_json_line(line: &str) -> Result<Self, EventError> {
        serde_json::from_str(line.trim_end()).map_err(|err| EventError::Decode(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{kinds, Direction, SessionTrafficPayload};

    #[test]
    fn test_frame_flattens_event_fields() {
        let frame = EventFrame::new(
            9,
            TunnelEvent::SessionTraffic(SessionTrafficPayload {
                session_id: 2,
                direction: Direction::UpstreamToClient,
                bytes: 512,
            }),
        );
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains("\"seq\":9"));
        assert!(json.contains("\"event\":\"session.traffic\""));
        assert!(json.contains("\"bytes\":512"));
        // Flattened, not nested under a payload key.
        assert!(!json.contains("\"payload\""));
    }

    #[test]
    fn test_json_line_roundtrip() {
        let frame = EventFrame::new(
            1,
            TunnelEvent::SessionTraffic(SessionTrafficPayload {
                session_id: 11,
                direction: Direction::ClientToUpstream,
                bytes: 64,
            }),
        );
        let line = frame.to_json_line().unwrap();
        assert!(line.ends_with('\n'));
        let parsed = EventFrame::from_json_line(&line).unwrap();
        assert_eq!(parsed.seq, 1);
        assert_eq!(parsed.event.kind(), kinds::SESSION_TRAFFIC);
    }

    #[test]
    fn test_malformed_line_is_an_error() {
        let err = EventFrame::from_json_line("{not json").unwrap_err();
        assert!(matches!(err, EventError::Decode(_)));
    }
}
