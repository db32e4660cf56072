//! Per-message hybrid encryption.
//!
//! A fresh ChaCha20Poly1305 key and nonce encrypt the plaintext. The key is
//! wrapped twice with an X25519 sealed box (ephemeral DH + HKDF +
//! ChaCha20Poly1305): once to the recipient, once to the sender ("self-wrap")
//! so the sender can read back what they sent. An optional Ed25519
//! signature covers `iv || ct || hash`.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Key, Nonce,
};
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use hkdf::Hkdf;
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use x25519_dalek::{EphemeralSecret, PublicKey as X25519PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::codec::{b64, b64_array, b64_opt};
use crate::hash::sha256;
use crate::identity::Fingerprint;
use crate::transcript::Transcript;
use crate::utils::constant_time_compare_array;

pub const ENVELOPE_VERSION: u8 = 1;

pub const SYM_ALG: &str = "CHACHA20-POLY1305";
pub const WRAP_ALG: &str = "X25519-HKDF-SHA256-CHACHA20POLY1305";
pub const SIG_ALG: &str = "ED25519";
pub const HASH_ALG: &str = "SHA-256";

pub const IV_LEN: usize = 12;
const MSG_KEY_LEN: usize = 32;
const AEAD_TAG_LEN: usize = 16;
/// eph_pub || AEAD(msg_key)
pub const WRAPPED_KEY_LEN: usize = 32 + MSG_KEY_LEN + AEAD_TAG_LEN;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("invalid key bytes")]
    InvalidKeyBytes,
    #[error("unsupported suite: {0}")]
    UnsupportedSuite(String),
    #[error("random source unavailable")]
    Rng,
    #[error("encryption failed")]
    EncryptFailed,
    #[error("decryption failed")]
    DecryptFailed,
}

/// Algorithm identifiers carried in every envelope.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Algorithms {
    pub sym: String,
    pub wrap: String,
    pub sig: String,
    pub hash: String,
}

impl Algorithms {
    pub fn current() -> Self {
        Self {
            sym: SYM_ALG.to_string(),
            wrap: WRAP_ALG.to_string(),
            sig: SIG_ALG.to_string(),
            hash: HASH_ALG.to_string(),
        }
    }

    fn check(&self) -> Result<(), EnvelopeError> {
        for (got, want) in [
            (&self.sym, SYM_ALG),
            (&self.wrap, WRAP_ALG),
            (&self.sig, SIG_ALG),
            (&self.hash, HASH_ALG),
        ] {
            if got != want {
                return Err(EnvelopeError::UnsupportedSuite(got.clone()));
            }
        }
        Ok(())
    }
}

/// One encrypted message. Immutable once sealed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub v: u8,
    #[serde(with = "b64_array")]
    pub iv: [u8; IV_LEN],
    #[serde(with = "b64")]
    pub ct: Vec<u8>,
    /// Message key wrapped to the recipient.
    #[serde(with = "b64")]
    pub ek: Vec<u8>,
    /// Message key wrapped to the sender.
    #[serde(with = "b64")]
    pub ek_self: Vec<u8>,
    #[serde(with = "b64_array")]
    pub hash: [u8; 32],
    #[serde(with = "b64_opt", default)]
    pub sig: Option<Vec<u8>>,
    pub alg: Algorithms,
    /// Milliseconds since the Unix epoch.
    pub time: u64,
    pub from: Fingerprint,
}

/// Which wrapped copy of the message key opened the envelope.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpenedVia {
    /// The caller sealed this envelope.
    SelfWrap,
    /// The envelope was addressed to the caller.
    RecipientWrap,
}

/// Result of a successful [`open`]. `hash_ok` and `sig_ok` are advisory.
#[derive(Debug)]
pub struct Opened {
    pub plaintext: Zeroizing<Vec<u8>>,
    pub hash_ok: bool,
    /// `None` when the envelope is unsigned or no signer key was supplied.
    pub sig_ok: Option<bool>,
    pub opened_via: OpenedVia,
}

fn random_bytes<const N: usize>() -> Result<Zeroizing<[u8; N]>, EnvelopeError> {
    let mut out = Zeroizing::new([0u8; N]);
    getrandom::getrandom(out.as_mut()).map_err(|_| EnvelopeError::Rng)?;
    Ok(out)
}

fn wrap_kdf(
    shared_secret: &[u8; 32],
    eph_pub: &[u8; 32],
    recipient_pub: &[u8; 32],
) -> Result<(Zeroizing<[u8; 32]>, [u8; 12]), EnvelopeError> {
    let mut t = Transcript::new("inkseal_wrap_v1");
    t.append_bytes(1, eph_pub);
    t.append_bytes(2, recipient_pub);
    let salt = t.digest();

    let hk = Hkdf::<Sha256>::new(Some(&salt), shared_secret);
    let mut key = Zeroizing::new([0u8; 32]);
    hk.expand(b"inkseal_wrap_v1_key", key.as_mut())
        .map_err(|_| EnvelopeError::EncryptFailed)?;
    let mut nonce = [0u8; 12];
    hk.expand(b"inkseal_wrap_v1_nonce", &mut nonce)
        .map_err(|_| EnvelopeError::EncryptFailed)?;
    Ok((key, nonce))
}

/// Seal `msg_key` to `recipient_pub` with a fresh ephemeral X25519 key.
fn wrap_key(recipient_pub: &[u8; 32], msg_key: &[u8; MSG_KEY_LEN]) -> Result<Vec<u8>, EnvelopeError> {
    let eph = EphemeralSecret::random_from_rng(OsRng);
    let eph_pub = X25519PublicKey::from(&eph);
    let shared = eph.diffie_hellman(&X25519PublicKey::from(*recipient_pub));
    if !shared.was_contributory() {
        return Err(EnvelopeError::InvalidKeyBytes);
    }

    let (key, nonce) = wrap_kdf(shared.as_bytes(), eph_pub.as_bytes(), recipient_pub)?;
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_ref()));
    let ct = cipher
        .encrypt(
            Nonce::from_slice(&nonce),
            Payload { msg: msg_key, aad: eph_pub.as_bytes() },
        )
        .map_err(|_| EnvelopeError::EncryptFailed)?;

    let mut out = Vec::with_capacity(WRAPPED_KEY_LEN);
    out.extend_from_slice(eph_pub.as_bytes());
    out.extend_from_slice(&ct);
    Ok(out)
}

/// Try to recover the message key from one wrapped copy.
fn unwrap_key(my_secret: &StaticSecret, wrapped: &[u8]) -> Option<Zeroizing<[u8; MSG_KEY_LEN]>> {
    if wrapped.len() != WRAPPED_KEY_LEN {
        return None;
    }
    let (eph_bytes, ct) = wrapped.split_at(32);
    let eph_pub: [u8; 32] = eph_bytes.try_into().ok()?;
    let my_pub = X25519PublicKey::from(my_secret).to_bytes();

    let shared = my_secret.diffie_hellman(&X25519PublicKey::from(eph_pub));
    if !shared.was_contributory() {
        return None;
    }
    let (key, nonce) = wrap_kdf(shared.as_bytes(), &eph_pub, &my_pub).ok()?;
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_ref()));
    let pt = Zeroizing::new(
        cipher
            .decrypt(Nonce::from_slice(&nonce), Payload { msg: ct, aad: &eph_pub })
            .ok()?,
    );

    let mut msg_key = Zeroizing::new([0u8; MSG_KEY_LEN]);
    if pt.len() != MSG_KEY_LEN {
        return None;
    }
    msg_key.copy_from_slice(&pt);
    Some(msg_key)
}

/// Bytes covered by the envelope signature: `iv || ct || hash`.
pub fn signed_bytes(iv: &[u8], ct: &[u8], hash: &[u8]) -> Vec<u8> {
    let mut data = Vec::with_capacity(iv.len() + ct.len() + hash.len());
    data.extend_from_slice(iv);
    data.extend_from_slice(ct);
    data.extend_from_slice(hash);
    data
}

fn verify_sig(sender_sign_pub: &[u8; 32], data: &[u8], sig: &[u8]) -> bool {
    let Ok(vk) = VerifyingKey::from_bytes(sender_sign_pub) else {
        return false;
    };
    let Ok(sig_bytes) = <[u8; 64]>::try_from(sig) else {
        return false;
    };
    vk.verify_strict(data, &Signature::from_bytes(&sig_bytes)).is_ok()
}

/// Encrypt `plaintext` to `recipient_enc_pub`, with a self-wrap to
/// `self_enc_pub`. Signs when `sender_sign` is supplied.
pub fn seal(
    recipient_enc_pub: &[u8; 32],
    self_enc_pub: &[u8; 32],
    sender_sign: Option<&SigningKey>,
    from: Fingerprint,
    plaintext: &[u8],
    now_ms: u64,
) -> Result<Envelope, EnvelopeError> {
    let msg_key = random_bytes::<MSG_KEY_LEN>()?;
    let iv = *random_bytes::<IV_LEN>()?;

    let cipher = ChaCha20Poly1305::new(Key::from_slice(msg_key.as_ref()));
    let ct = cipher
        .encrypt(Nonce::from_slice(&iv), plaintext)
        .map_err(|_| EnvelopeError::EncryptFailed)?;

    let ek = wrap_key(recipient_enc_pub, &msg_key)?;
    let ek_self = wrap_key(self_enc_pub, &msg_key)?;

    let hash = sha256(plaintext);
    let sig = sender_sign.map(|sk| {
        let s: Signature = sk.sign(&signed_bytes(&iv, &ct, &hash));
        s.to_bytes().to_vec()
    });

    Ok(Envelope {
        v: ENVELOPE_VERSION,
        iv,
        ct,
        ek,
        ek_self,
        hash,
        sig,
        alg: Algorithms::current(),
        time: now_ms,
        from,
    })
}

/// Decrypt an envelope with the caller's X25519 secret.
///
/// The self-wrap is tried before the recipient wrap. If neither unwraps, or
/// the ciphertext fails authentication, the result is `DecryptFailed` and no
/// plaintext is released.
pub fn open(
    my_enc_secret: &StaticSecret,
    sender_sign_pub: Option<&[u8; 32]>,
    env: &Envelope,
) -> Result<Opened, EnvelopeError> {
    if env.v != ENVELOPE_VERSION {
        return Err(EnvelopeError::UnsupportedSuite(format!("v{}", env.v)));
    }
    env.alg.check()?;

    let (msg_key, opened_via) = [
        (&env.ek_self, OpenedVia::SelfWrap),
        (&env.ek, OpenedVia::RecipientWrap),
    ]
    .into_iter()
    .find_map(|(wrapped, via)| unwrap_key(my_enc_secret, wrapped).map(|k| (k, via)))
    .ok_or(EnvelopeError::DecryptFailed)?;

    let cipher = ChaCha20Poly1305::new(Key::from_slice(msg_key.as_ref()));
    let plaintext = Zeroizing::new(
        cipher
            .decrypt(Nonce::from_slice(&env.iv), env.ct.as_slice())
            .map_err(|_| EnvelopeError::DecryptFailed)?,
    );

    let hash_ok = constant_time_compare_array(&sha256(&plaintext), &env.hash);
    let sig_ok = match (&env.sig, sender_sign_pub) {
        (Some(sig), Some(pk)) => Some(verify_sig(pk, &signed_bytes(&env.iv, &env.ct, &env.hash), sig)),
        _ => None,
    };

    Ok(Opened { plaintext, hash_ok, sig_ok, opened_via })
}
