//! rsmsl - Rust MSL (Message Security Layer) client.
//!
//! This crate provides:
//! - Key exchange with a software (RSA/AES/HMAC) or hardware Widevine crypto backend.
//! - MSL envelope encoding, chunked response decoding and verification.
//! - Persisted session state with transparent master token refresh.
//! - Manifest and license requests, and manifest to DASH MPD translation.
//!
//! Feature flags:
//! - `cli`: enable the CLI binary.
//! - `tracing`: enable tracing macros.
#![allow(clippy::result_large_err)]

#[macro_use]
mod macros;

/// Request orchestration (handshake, token refresh, manifest and license).
pub mod client;
/// Client configuration.
pub mod config;
/// Crypto backends.
pub mod crypto;
/// Wire framing and authenticated envelopes.
pub mod envelope;
/// Common error types and Result alias.
pub mod error;
/// Manifest to DASH MPD translation.
pub mod mpd;
/// Profile lists and service request bodies.
pub mod profiles;
/// Session keys and tokens.
pub mod session;
/// Persistence for the session state.
pub mod store;
/// Master token parsing.
pub mod token;
/// HTTPS transport.
pub mod transport;
/// Shared helper utilities.
pub mod utils;

#[cfg(test)]
mod testing;

pub use client::{MslClient, SessionStatus};
pub use config::MslConfig;
pub use error::{Error, Result};
pub use profiles::ManifestCapabilities;
