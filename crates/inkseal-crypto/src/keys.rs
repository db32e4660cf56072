//! Long-term key pairs.
//!
//! Every identity has an X25519 encryption pair (used to wrap message keys)
//! and an Ed25519 signing pair, generated together from independent
//! randomness. Private halves are zeroized when dropped.

use std::fmt;

use ed25519_dalek::{SigningKey, VerifyingKey};
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::codec::b64_array;
use crate::identity::Fingerprint;

pub const KEY_LEN: usize = 32;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("invalid signing public key")]
    InvalidSigningKey,
    #[error("invalid encryption public key")]
    InvalidEncryptionKey,
    #[error("malformed private key document")]
    MalformedDocument,
}

/// Public halves of an identity. Safe to publish.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKeys {
    /// X25519 encryption public key
    #[serde(with = "b64_array")]
    pub enc: [u8; KEY_LEN],
    /// Ed25519 verifying key
    #[serde(with = "b64_array")]
    pub sig: [u8; KEY_LEN],
}

impl PublicKeys {
    /// Reject key material no honest peer would publish: a signing key that
    /// is not a valid Ed25519 point, or an all-zero encryption key.
    pub fn validate(&self) -> Result<(), KeyError> {
        self.verifying_key()?;
        if self.enc.iter().all(|b| *b == 0) {
            return Err(KeyError::InvalidEncryptionKey);
        }
        Ok(())
    }

    pub fn verifying_key(&self) -> Result<VerifyingKey, KeyError> {
        VerifyingKey::from_bytes(&self.sig).map_err(|_| KeyError::InvalidSigningKey)
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(self)
    }
}

/// Serialized form of the private halves; only ever exists inside
/// `Zeroizing` buffers or a sealed vault blob.
#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
struct PrivateDocument {
    #[serde(with = "b64_array")]
    enc: [u8; KEY_LEN],
    #[serde(with = "b64_array")]
    sig: [u8; KEY_LEN],
}

/// Private halves of an identity.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct PrivateKeys {
    #[zeroize(skip)] // StaticSecret zeroizes itself
    enc: StaticSecret,
    #[zeroize(skip)] // SigningKey zeroizes itself
    sig: SigningKey,
}

impl PrivateKeys {
    /// Generate a fresh key pair from the OS RNG.
    pub fn generate() -> Self {
        let enc = StaticSecret::random_from_rng(OsRng);
        let sig = SigningKey::generate(&mut OsRng);
        Self { enc, sig }
    }

    pub fn from_bytes(enc: &[u8; KEY_LEN], sig: &[u8; KEY_LEN]) -> Self {
        Self {
            enc: StaticSecret::from(*enc),
            sig: SigningKey::from_bytes(sig),
        }
    }

    /// Derive the matching public halves.
    pub fn public(&self) -> PublicKeys {
        PublicKeys {
            enc: X25519PublicKey::from(&self.enc).to_bytes(),
            sig: self.sig.verifying_key().to_bytes(),
        }
    }

    pub fn enc_secret(&self) -> &StaticSecret {
        &self.enc
    }

    pub fn signing_key(&self) -> &SigningKey {
        &self.sig
    }

    /// Serialize to the JSON document stored inside protected blobs.
    pub fn to_document(&self) -> Zeroizing<Vec<u8>> {
        let doc = PrivateDocument {
            enc: self.enc.to_bytes(),
            sig: self.sig.to_bytes(),
        };
        // Two fixed-size byte arrays always serialize.
        Zeroizing::new(serde_json::to_vec(&doc).unwrap_or_default())
    }

    pub fn from_document(bytes: &[u8]) -> Result<Self, KeyError> {
        let doc: PrivateDocument =
            serde_json::from_slice(bytes).map_err(|_| KeyError::MalformedDocument)?;
        Ok(Self::from_bytes(&doc.enc, &doc.sig))
    }

    /// Whether both private halves are identical to `other`'s.
    pub fn same_material(&self, other: &PrivateKeys) -> bool {
        let a = Zeroizing::new([self.enc.to_bytes(), self.sig.to_bytes()].concat());
        let b = Zeroizing::new([other.enc.to_bytes(), other.sig.to_bytes()].concat());
        crate::utils::constant_time_compare(&a, &b)
    }
}

impl fmt::Debug for PrivateKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKeys")
            .field("public", &self.public())
            .finish_non_exhaustive()
    }
}
