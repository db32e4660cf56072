//! Public-key fingerprints and short verification codes.
//!
//! A fingerprint is a pure function of the two public keys:
//! `sha256(canonical_json({enc, sig}))`, rendered as
//! - `display`: first 6 bytes as colon-separated hex
//! - `short_code`: first 4 bytes big-endian mod 1,000,000, zero padded

use serde::{Deserialize, Serialize};

use crate::codec::b64url_encode;
use crate::hash::{colon_hex, sha256};
use crate::keys::PublicKeys;
use crate::sas::sas_6digit_from_digest;
use crate::utils::constant_time_compare;

/// Number of digest bytes shown in the display form.
pub const DISPLAY_BYTES: usize = 6;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fingerprint {
    pub display: String,
    pub short_code: String,
}

/// Canonical JSON of the public keys. Field order is fixed (`enc`, `sig`)
/// and matches what serde emits for [`PublicKeys`].
pub fn canonical_public_json(keys: &PublicKeys) -> Vec<u8> {
    format!(
        r#"{{"enc":"{}","sig":"{}"}}"#,
        b64url_encode(&keys.enc),
        b64url_encode(&keys.sig)
    )
    .into_bytes()
}

pub fn fingerprint(enc_pub: &[u8; 32], sig_pub: &[u8; 32]) -> Fingerprint {
    Fingerprint::of(&PublicKeys { enc: *enc_pub, sig: *sig_pub })
}

impl Fingerprint {
    pub fn of(keys: &PublicKeys) -> Self {
        let digest = sha256(&canonical_public_json(keys));
        Self {
            display: colon_hex(&digest[..DISPLAY_BYTES]),
            short_code: sas_6digit_from_digest(&digest),
        }
    }

    /// Constant-time equality on both components.
    pub fn matches(&self, other: &Fingerprint) -> bool {
        let display = constant_time_compare(self.display.as_bytes(), other.display.as_bytes());
        let code = self.short_code_matches(&other.short_code);
        display & code
    }

    /// Compare a code read aloud or typed by the user. Surrounding
    /// whitespace is ignored.
    pub fn short_code_matches(&self, code: &str) -> bool {
        constant_time_compare(self.short_code.as_bytes(), code.trim().as_bytes())
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.display, self.short_code)
    }
}
