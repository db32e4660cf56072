//! Error types for inkseal core.
//!
//! Each module has its own typed error; [`Error`] collects them and maps
//! every failure onto the stable [`ErrorCode`] vocabulary that callers use
//! to decide whether to prompt, warn or drop.
//!
//! Malformed or foreign tokens are not errors anywhere in this crate: they
//! classify to `None`.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use inkseal_crypto::codec::CodecError;
use inkseal_crypto::{EnvelopeError, KeyError, VaultError};

pub use crate::config::ConfigError;
pub use crate::store::StoreError;

// ============================================================================
// Stable codes
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    NeedPassphrase,
    BadPassphrase,
    NoPrivateKeys,
    DecryptFail,
    IntegrityFail,
    FingerprintMismatch,
    OwnRequest,
    CodeMismatch,
    UnknownContact,
    Storage,
    InvalidInput,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::NeedPassphrase => "NEED_PASSPHRASE",
            ErrorCode::BadPassphrase => "BAD_PASSPHRASE",
            ErrorCode::NoPrivateKeys => "NO_PRIVATE_KEYS",
            ErrorCode::DecryptFail => "DECRYPT_FAIL",
            ErrorCode::IntegrityFail => "INTEGRITY_FAIL",
            ErrorCode::FingerprintMismatch => "FINGERPRINT_MISMATCH",
            ErrorCode::OwnRequest => "OWN_REQUEST",
            ErrorCode::CodeMismatch => "CODE_MISMATCH",
            ErrorCode::UnknownContact => "UNKNOWN_CONTACT",
            ErrorCode::Storage => "STORAGE",
            ErrorCode::InvalidInput => "INVALID_INPUT",
        }
    }

    /// Passphrase failures are fixed by prompting and repeating the call.
    pub fn is_recoverable(self) -> bool {
        matches!(self, ErrorCode::NeedPassphrase | ErrorCode::BadPassphrase)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Module errors
// ============================================================================

/// Key custody errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CustodyError {
    #[error("passphrase required")]
    NeedPassphrase,

    #[error("wrong passphrase")]
    BadPassphrase,

    #[error("no usable private keys")]
    NoPrivateKeys,

    #[error("device-mode blobs cannot be imported on another installation")]
    NotPortable,

    #[error("custody record corrupt: {0}")]
    Corrupt(String),

    #[error("invalid custody parameters: {0}")]
    InvalidParams(String),

    #[error("key derivation task failed: {0}")]
    Task(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Trust store and key exchange errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TrustError {
    #[error("exchange fingerprint does not match its public keys")]
    FingerprintMismatch,

    #[error("exchange request is our own")]
    OwnRequest,

    #[error("short code does not match")]
    CodeMismatch,

    #[error("unknown contact: {0}")]
    UnknownContact(String),

    #[error("invalid public keys: {0}")]
    InvalidKeys(#[from] KeyError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

// ============================================================================
// Crate error
// ============================================================================

#[derive(Debug, Error)]
pub enum Error {
    #[error("custody: {0}")]
    Custody(#[from] CustodyError),

    #[error("trust: {0}")]
    Trust(#[from] TrustError),

    #[error("envelope: {0}")]
    Envelope(#[from] EnvelopeError),

    #[error("vault: {0}")]
    Vault(#[from] VaultError),

    #[error("codec: {0}")]
    Codec(#[from] CodecError),

    #[error("store: {0}")]
    Store(#[from] StoreError),

    #[error("config: {0}")]
    Config(#[from] ConfigError),

    #[error("integrity check failed")]
    IntegrityFail,

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::Custody(e) => e.code(),
            Error::Trust(e) => e.code(),
            Error::Envelope(EnvelopeError::DecryptFailed) => ErrorCode::DecryptFail,
            Error::Envelope(EnvelopeError::InvalidKeyBytes) => ErrorCode::InvalidInput,
            Error::Envelope(EnvelopeError::UnsupportedSuite(_)) => ErrorCode::DecryptFail,
            Error::Envelope(_) => ErrorCode::DecryptFail,
            Error::Vault(VaultError::AuthFailed) => ErrorCode::BadPassphrase,
            Error::Vault(_) => ErrorCode::InvalidInput,
            Error::Codec(_) => ErrorCode::InvalidInput,
            Error::Store(_) => ErrorCode::Storage,
            Error::Config(_) => ErrorCode::InvalidInput,
            Error::IntegrityFail => ErrorCode::IntegrityFail,
            Error::InvalidInput(_) => ErrorCode::InvalidInput,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        self.code().is_recoverable()
    }
}

impl CustodyError {
    pub fn code(&self) -> ErrorCode {
        match self {
            CustodyError::NeedPassphrase => ErrorCode::NeedPassphrase,
            CustodyError::BadPassphrase => ErrorCode::BadPassphrase,
            CustodyError::NoPrivateKeys | CustodyError::Corrupt(_) => ErrorCode::NoPrivateKeys,
            CustodyError::NotPortable | CustodyError::InvalidParams(_) => ErrorCode::InvalidInput,
            CustodyError::Store(_) | CustodyError::Task(_) => ErrorCode::Storage,
        }
    }
}

impl TrustError {
    pub fn code(&self) -> ErrorCode {
        match self {
            TrustError::FingerprintMismatch => ErrorCode::FingerprintMismatch,
            TrustError::OwnRequest => ErrorCode::OwnRequest,
            TrustError::CodeMismatch => ErrorCode::CodeMismatch,
            TrustError::UnknownContact(_) => ErrorCode::UnknownContact,
            TrustError::InvalidKeys(_) => ErrorCode::InvalidInput,
            TrustError::Store(_) => ErrorCode::Storage,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_strings_match_serde() {
        for code in [
            ErrorCode::NeedPassphrase,
            ErrorCode::BadPassphrase,
            ErrorCode::NoPrivateKeys,
            ErrorCode::DecryptFail,
            ErrorCode::IntegrityFail,
            ErrorCode::FingerprintMismatch,
            ErrorCode::OwnRequest,
            ErrorCode::CodeMismatch,
            ErrorCode::UnknownContact,
            ErrorCode::Storage,
            ErrorCode::InvalidInput,
        ] {
            let json = serde_json::to_string(&code).unwrap();
            assert_eq!(json, format!("\"{}\"", code.as_str()));
        }
    }

    #[test]
    fn test_only_passphrase_errors_recoverable() {
        assert!(Error::from(CustodyError::NeedPassphrase).is_recoverable());
        assert!(Error::from(CustodyError::BadPassphrase).is_recoverable());
        assert!(!Error::from(CustodyError::NoPrivateKeys).is_recoverable());
        assert!(!Error::from(EnvelopeError::DecryptFailed).is_recoverable());
        assert!(!Error::IntegrityFail.is_recoverable());
    }

    #[test]
    fn test_codes() {
        assert_eq!(Error::from(EnvelopeError::DecryptFailed).code(), ErrorCode::DecryptFail);
        assert_eq!(Error::from(TrustError::OwnRequest).code(), ErrorCode::OwnRequest);
        assert_eq!(
            Error::from(TrustError::UnknownContact("x".into())).code(),
            ErrorCode::UnknownContact
        );
        assert_eq!(
            Error::from(StoreError::Io("disk".into())).code(),
            ErrorCode::Storage
        );
        assert_eq!(
            Error::from(CustodyError::Store(StoreError::Io("disk".into()))).code(),
            ErrorCode::Storage
        );
    }
}
