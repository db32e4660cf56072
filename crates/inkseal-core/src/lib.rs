//! inkseal core - key custody, trust and the message flow.
//!
//! This crate implements:
//! - Key custody with device and passphrase protection
//! - The contact directory and key exchange protocol
//! - Bundle encoding of wire payloads as prefixed text tokens
//! - The messenger facade tying the pieces together
//! - Persistent storage abstraction
//! - Configuration loading

#![forbid(unsafe_code)]

// Protocol
pub mod payload;
pub mod bundle;
pub mod custody;
pub mod trust;
pub mod messenger;

// Infrastructure
pub mod store;
pub mod device_key;
pub mod config;

// Supporting modules
pub mod errors;
pub mod harness;

#[cfg(test)]
mod proptests;

pub use bundle::Prefixes;
pub use config::{Config, IntegrityPolicy};
pub use custody::{ImportOutcome, KeyCustody, Protection, PublicIdentity, Session};
pub use errors::{Error, ErrorCode, Result};
pub use messenger::{Decrypted, Incoming, Messenger};
pub use payload::{Channel, Payload};
pub use store::{FileStore, InMemoryStore, SecretStore};
pub use trust::{Contact, TrustStore};

/// Milliseconds since the Unix epoch.
pub(crate) fn now_ms() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or_default()
}
