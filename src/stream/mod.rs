//! Streaming rate and event feeds.
//!
//! - `proto`: line messages and the per-feed heartbeat rule.
//! - `decoder`: line-delimited JSON decoding over the response body.
//! - `session`: session lifecycle, read-loop, and listener fan-out, plus the
//!   rates and events specializations.

/// Line-delimited JSON decoder.
pub mod decoder;
/// Stream message types.
pub mod proto;
/// Session lifecycle and listener registration.
pub mod session;
