//! At-rest protection for private key material.
//!
//! A [`ProtectedBlob`] is ChaCha20Poly1305 ciphertext tagged with how its key
//! was obtained: a device key held by the platform, or a passphrase run
//! through Argon2id. The KDF parameters travel inside `pass` blobs so a
//! backup made under one configuration opens under another.

use argon2::{Algorithm, Argon2, Params, Version};
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Key, Nonce,
};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::codec::b64;
use crate::codec::b64_array;

pub const BLOB_VERSION: u8 = 1;
pub const SALT_LEN: usize = 16;
pub const NONCE_LEN: usize = 12;
pub const KDF_ALG: &str = "argon2id";

const AAD_DEVICE: &[u8] = b"inkseal_vault_v1:device";
const AAD_PASS: &[u8] = b"inkseal_vault_v1:pass";

const MIN_MEMORY_KIB: u32 = 8;
// bounds what a hostile backup can make us spend: 1 GiB, 10 passes
const MAX_MEMORY_KIB: u32 = 1024 * 1024;
const MAX_ITERATIONS: u32 = 10;
const MAX_PARALLELISM: u32 = 16;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum VaultError {
    /// Wrong passphrase or device key, or tampered ciphertext.
    #[error("authentication failed")]
    AuthFailed,
    #[error("invalid kdf parameters: {0}")]
    InvalidKdfParams(String),
    #[error("unsupported blob version {0}")]
    UnsupportedVersion(u8),
    #[error("blob is protected by {0:?}, not the requested mode")]
    WrongMode(CustodyMode),
    #[error("key derivation failed")]
    KdfFailed,
    #[error("random source unavailable")]
    Rng,
    #[error("encryption failed")]
    EncryptFailed,
}

/// Argon2id cost parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KdfParams {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: 19_456,
            iterations: 2,
            parallelism: 1,
        }
    }
}

impl KdfParams {
    pub fn validate(&self) -> Result<(), VaultError> {
        if self.parallelism == 0 || self.parallelism > MAX_PARALLELISM {
            return Err(VaultError::InvalidKdfParams(format!(
                "parallelism must be in 1..={MAX_PARALLELISM}"
            )));
        }
        if self.iterations == 0 || self.iterations > MAX_ITERATIONS {
            return Err(VaultError::InvalidKdfParams(format!(
                "iterations must be in 1..={MAX_ITERATIONS}"
            )));
        }
        // argon2 needs at least 8 KiB per lane
        if self.memory_kib < MIN_MEMORY_KIB * self.parallelism || self.memory_kib > MAX_MEMORY_KIB {
            return Err(VaultError::InvalidKdfParams(format!(
                "memory_kib must be in {}..={MAX_MEMORY_KIB}",
                MIN_MEMORY_KIB * self.parallelism
            )));
        }
        Ok(())
    }
}

/// KDF description stored in a `pass` blob.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfSpec {
    pub alg: String,
    pub m: u32,
    pub t: u32,
    pub p: u32,
}

impl KdfSpec {
    fn from_params(params: &KdfParams) -> Self {
        Self {
            alg: KDF_ALG.to_string(),
            m: params.memory_kib,
            t: params.iterations,
            p: params.parallelism,
        }
    }

    fn params(&self) -> Result<KdfParams, VaultError> {
        if self.alg != KDF_ALG {
            return Err(VaultError::InvalidKdfParams(format!("unknown kdf {}", self.alg)));
        }
        let params = KdfParams {
            memory_kib: self.m,
            iterations: self.t,
            parallelism: self.p,
        };
        params.validate()?;
        Ok(params)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CustodyMode {
    Device,
    #[serde(rename = "pass")]
    Passphrase,
}

/// Sealed private key material, tagged by custody mode.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode")]
pub enum ProtectedBlob {
    #[serde(rename = "device")]
    Device {
        v: u8,
        #[serde(with = "b64_array")]
        iv: [u8; NONCE_LEN],
        #[serde(with = "b64")]
        ct: Vec<u8>,
    },
    #[serde(rename = "pass")]
    Passphrase {
        v: u8,
        #[serde(with = "b64_array")]
        salt: [u8; SALT_LEN],
        #[serde(with = "b64_array")]
        iv: [u8; NONCE_LEN],
        #[serde(with = "b64")]
        ct: Vec<u8>,
        kdf: KdfSpec,
    },
}

impl ProtectedBlob {
    pub fn mode(&self) -> CustodyMode {
        match self {
            ProtectedBlob::Device { .. } => CustodyMode::Device,
            ProtectedBlob::Passphrase { .. } => CustodyMode::Passphrase,
        }
    }

    pub fn seal_device(device_key: &[u8; 32], plaintext: &[u8]) -> Result<Self, VaultError> {
        let (iv, ct) = seal_with_aad(device_key, plaintext, AAD_DEVICE)?;
        Ok(ProtectedBlob::Device { v: BLOB_VERSION, iv, ct })
    }

    pub fn seal_passphrase(
        passphrase: &str,
        params: &KdfParams,
        plaintext: &[u8],
    ) -> Result<Self, VaultError> {
        params.validate()?;
        let salt = random_salt()?;
        let key = derive_passphrase_key(passphrase, &salt, params)?;
        let (iv, ct) = seal_with_aad(&key, plaintext, AAD_PASS)?;
        Ok(ProtectedBlob::Passphrase {
            v: BLOB_VERSION,
            salt,
            iv,
            ct,
            kdf: KdfSpec::from_params(params),
        })
    }

    pub fn open_device(&self, device_key: &[u8; 32]) -> Result<Zeroizing<Vec<u8>>, VaultError> {
        match self {
            ProtectedBlob::Device { v, iv, ct } => {
                check_version(*v)?;
                open_with_aad(device_key, iv, ct, AAD_DEVICE)
            }
            ProtectedBlob::Passphrase { .. } => Err(VaultError::WrongMode(CustodyMode::Passphrase)),
        }
    }

    pub fn open_passphrase(&self, passphrase: &str) -> Result<Zeroizing<Vec<u8>>, VaultError> {
        match self {
            ProtectedBlob::Passphrase { v, salt, iv, ct, kdf } => {
                check_version(*v)?;
                let key = derive_passphrase_key(passphrase, salt, &kdf.params()?)?;
                open_with_aad(&key, iv, ct, AAD_PASS)
            }
            ProtectedBlob::Device { .. } => Err(VaultError::WrongMode(CustodyMode::Device)),
        }
    }
}

fn check_version(v: u8) -> Result<(), VaultError> {
    if v != BLOB_VERSION {
        return Err(VaultError::UnsupportedVersion(v));
    }
    Ok(())
}

/// Argon2id over the UTF-8 passphrase.
pub fn derive_passphrase_key(
    passphrase: &str,
    salt: &[u8; SALT_LEN],
    params: &KdfParams,
) -> Result<Zeroizing<[u8; 32]>, VaultError> {
    let argon_params = Params::new(
        params.memory_kib,
        params.iterations,
        params.parallelism,
        Some(32),
    )
    .map_err(|e| VaultError::InvalidKdfParams(e.to_string()))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon_params);

    let mut key = Zeroizing::new([0u8; 32]);
    argon2
        .hash_password_into(passphrase.as_bytes(), salt, key.as_mut())
        .map_err(|_| VaultError::KdfFailed)?;
    Ok(key)
}

pub fn random_key() -> Result<Zeroizing<[u8; 32]>, VaultError> {
    let mut key = Zeroizing::new([0u8; 32]);
    getrandom::getrandom(key.as_mut()).map_err(|_| VaultError::Rng)?;
    Ok(key)
}

pub fn random_salt() -> Result<[u8; SALT_LEN], VaultError> {
    let mut salt = [0u8; SALT_LEN];
    getrandom::getrandom(&mut salt).map_err(|_| VaultError::Rng)?;
    Ok(salt)
}

/// Encrypt under `key` with a fresh random nonce.
pub fn seal_at_rest(key: &[u8; 32], plaintext: &[u8]) -> Result<([u8; NONCE_LEN], Vec<u8>), VaultError> {
    seal_with_aad(key, plaintext, &[])
}

pub fn open_at_rest(
    key: &[u8; 32],
    nonce: &[u8; NONCE_LEN],
    ciphertext: &[u8],
) -> Result<Zeroizing<Vec<u8>>, VaultError> {
    open_with_aad(key, nonce, ciphertext, &[])
}

fn seal_with_aad(
    key: &[u8; 32],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<([u8; NONCE_LEN], Vec<u8>), VaultError> {
    let mut nonce = [0u8; NONCE_LEN];
    getrandom::getrandom(&mut nonce).map_err(|_| VaultError::Rng)?;
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    let ct = cipher
        .encrypt(Nonce::from_slice(&nonce), Payload { msg: plaintext, aad })
        .map_err(|_| VaultError::EncryptFailed)?;
    Ok((nonce, ct))
}

fn open_with_aad(
    key: &[u8; 32],
    nonce: &[u8; NONCE_LEN],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Zeroizing<Vec<u8>>, VaultError> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    cipher
        .decrypt(Nonce::from_slice(nonce), Payload { msg: ciphertext, aad })
        .map(Zeroizing::new)
        .map_err(|_| VaultError::AuthFailed)
}
