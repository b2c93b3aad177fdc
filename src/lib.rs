//! Rust SDK for the OANDA REST API streaming endpoints.
//!
//! The crate is organized by concern:
//! - `config`: environments, server table, and credentials.
//! - `rest`: HTTP client that opens the streaming responses.
//! - `stream`: line decoder and the rates/events streaming sessions.

/// Environment and credential configuration.
pub mod config;
/// HTTP client for opening streams.
pub mod rest;
/// Streaming sessions, decoder, and message types.
pub mod stream;

