#![forbid(unsafe_code)]

//! Cryptographic building blocks for inkseal.
//!
//! Everything in this crate is synchronous and storage-free: key types,
//! the per-message hybrid envelope, public-key fingerprints and the
//! at-rest vault used to protect private key material.

pub mod codec;
pub mod hash;
pub mod transcript;
pub mod utils;

pub mod keys;
pub mod identity;
pub mod sas;

pub mod envelope;
pub mod vault;

#[cfg(test)]
mod proptests;

pub use envelope::{Envelope, EnvelopeError, Opened, OpenedVia};
pub use identity::Fingerprint;
pub use keys::{KeyError, PrivateKeys, PublicKeys};
pub use vault::{CustodyMode, KdfParams, ProtectedBlob, VaultError};
