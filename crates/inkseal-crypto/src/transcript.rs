//! Deterministic, domain-separated byte transcripts.
//!
//! Used to build KDF salts for key wrapping so that the derived keys are
//! bound to both the ephemeral and the recipient public key.

use bytes::{BufMut, BytesMut};
use sha2::{Digest, Sha256};

/// Tag reserved for the domain separator.
pub const DOMAIN_TAG: u32 = 0;

/// Appends (tag, len, bytes) tuples so the same logical data hashes the same everywhere.
#[derive(Clone, Debug, Default)]
pub struct Transcript {
    buf: BytesMut,
}

impl Transcript {
    /// Create a new transcript with the given domain separator.
    pub fn new(domain: &'static str) -> Self {
        let mut t = Self { buf: BytesMut::with_capacity(128) };
        t.append_bytes(DOMAIN_TAG, domain.as_bytes());
        t
    }

    /// Append raw bytes with a tag.
    pub fn append_bytes(&mut self, tag: u32, data: &[u8]) -> &mut Self {
        // tag (u32 be) + len (u32 be) + data
        self.buf.put_u32(tag);
        self.buf.put_u32(data.len() as u32);
        self.buf.extend_from_slice(data);
        self
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// SHA-256 of the transcript contents.
    pub fn digest(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(&self.buf);
        hasher.finalize().into()
    }
}
