//! # hubward-events
//!
//! Session lifecycle event types and serialization for the hubward gateway.
//!
//! ## Design Principles
//!
//! - Events are immutable records of things a session already did
//! - Events never contain relayed payload bytes, only counts and metadata
//! - Every event names exactly one session
//! - Frames carry a process-monotonic sequence number so consumers can
//!   detect gaps after lagging
//!
//! ## Event Frame
//!
//! All events ship inside [`EventFrame`], which adds:
//! - Ordering (`seq`, monotonic per process)
//! - Timing (`occurred_at`, UTC)
//!
//! ## Event Kinds
//!
//! - `session.opened` / `session.routed` / `session.established`
//! - `session.traffic` (one per relayed chunk, per direction)
//! - `session.closed` / `session.failed`

mod envelope;
mod error;
mod types;

pub use envelope::EventFrame;
pub use error::EventError;
pub use types::*;
