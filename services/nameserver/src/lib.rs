//! Split-horizon DNS for hub-bound devices.
//!
//! Devices on the managed network resolve their hub's published FQDN
//! through this resolver. The one overridden name gets an
//! authoritative A answer pointing at the gateway; every other query
//! is relayed verbatim to a real upstream resolver, so the override
//! never degrades general name resolution.

pub mod codec;
pub mod config;
pub mod server;

pub use config::Config;
pub use server::Nameserver;
