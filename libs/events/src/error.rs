//! Failures on the event stream boundary.

use thiserror::Error;

/// Errors producing or consuming event frames.
#[derive(Debug, Error, Clone)]
pub enum EventError {
    /// A frame could not be encoded for the stream.
    #[error("encoding event frame: {0}")]
    Encode(String),

    /// An incoming line was not a valid frame.
    #[error("decoding event frame: {0}")]
    Decode(String),
}
