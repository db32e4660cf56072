//! Long-term key custody.
//!
//! The identity lives in two records:
//! - `identity.public`: public keys, fingerprint and creation time, in clear
//! - `identity.private`: a [`ProtectedBlob`] holding the private keys, sealed
//!   either under the device key or under a passphrase-derived key
//!
//! The blob carries its own mode tag, so switching custody mode is a single
//! `set` of one record. Every read-modify-write runs under one async mutex.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};
use zeroize::Zeroizing;

use inkseal_crypto::codec::b64_array;
use inkseal_crypto::{CustodyMode, Fingerprint, KdfParams, PrivateKeys, ProtectedBlob, PublicKeys, VaultError};

use crate::device_key::DeviceKeyProvider;
use crate::errors::CustodyError;
use crate::now_ms;
use crate::store::{load_json, save_json, SecretStore, StoreError, KEY_IDENTITY_PRIVATE, KEY_IDENTITY_PUBLIC};

// ============================================================================
// Session
// ============================================================================

/// Caller-owned unlock context.
///
/// Holds the passphrase for `pass` custody in zeroizing memory for as long
/// as the caller keeps the session. It is never written to storage.
#[derive(Default)]
pub struct Session {
    passphrase: Option<Zeroizing<String>>,
}

impl Session {
    pub fn locked() -> Self {
        Self::default()
    }

    pub fn with_passphrase(passphrase: impl Into<String>) -> Self {
        Self {
            passphrase: Some(Zeroizing::new(passphrase.into())),
        }
    }

    pub fn set_passphrase(&mut self, passphrase: impl Into<String>) {
        self.passphrase = Some(Zeroizing::new(passphrase.into()));
    }

    pub fn clear(&mut self) {
        self.passphrase = None;
    }

    pub fn passphrase(&self) -> Option<&str> {
        self.passphrase.as_ref().map(|p| p.as_str())
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("has_passphrase", &self.passphrase.is_some())
            .finish()
    }
}

// ============================================================================
// Records
// ============================================================================

/// The published half of the identity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicIdentity {
    #[serde(rename = "pub")]
    pub keys: PublicKeys,
    pub fingerprint: Fingerprint,
    pub created_at: u64,
}

impl PublicIdentity {
    fn new(keys: PublicKeys, created_at: u64) -> Self {
        Self {
            fingerprint: keys.fingerprint(),
            keys,
            created_at,
        }
    }
}

/// Older installs kept the private keys inside the public record.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyPublicRecord {
    #[serde(rename = "pub")]
    keys: PublicKeys,
    #[serde(default)]
    fingerprint: Option<Fingerprint>,
    #[serde(default)]
    created_at: Option<u64>,
    #[serde(with = "b64_array")]
    enc_priv: [u8; 32],
    #[serde(with = "b64_array")]
    sig_priv: [u8; 32],
}

/// Result of [`KeyCustody::ensure_identity`].
pub struct IdentityKeys {
    pub public: PublicIdentity,
    /// `None` when the session could not unlock the private blob.
    pub private: Option<PrivateKeys>,
}

/// Target custody mode for [`KeyCustody::set_custody_mode`].
pub enum Protection {
    Device,
    Passphrase(String),
}

impl fmt::Debug for Protection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protection::Device => f.write_str("Device"),
            Protection::Passphrase(_) => f.write_str("Passphrase(..)"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ImportOutcome {
    /// The backup holds the keys already in use.
    SameIdentity,
    /// The backup holds different keys; contacts pinned to `previous` will
    /// no longer recognize this installation.
    IdentityReplaced {
        previous: Option<Fingerprint>,
        current: Fingerprint,
    },
}

// ============================================================================
// KeyCustody
// ============================================================================

pub struct KeyCustody {
    store: Arc<dyn SecretStore>,
    device: Arc<dyn DeviceKeyProvider>,
    kdf: KdfParams,
    lock: Mutex<()>,
}

impl KeyCustody {
    pub fn new(
        store: Arc<dyn SecretStore>,
        device: Arc<dyn DeviceKeyProvider>,
        kdf: KdfParams,
    ) -> Self {
        Self {
            store,
            device,
            kdf,
            lock: Mutex::new(()),
        }
    }

    /// Return the identity, creating it on first use.
    ///
    /// An existing identity is never regenerated. The private half is
    /// included when `session` unlocks it; otherwise the reason is logged
    /// and can be obtained from [`unlock`](Self::unlock).
    pub async fn ensure_identity(&self, session: &Session) -> Result<IdentityKeys, CustodyError> {
        let _guard = self.lock.lock().await;
        self.migrate_legacy().await?;

        if let Some(public) = self.load_public().await? {
            let private = match self.unlock_inner(session).await {
                Ok(keys) => Some(keys),
                Err(CustodyError::Store(e)) => return Err(CustodyError::Store(e)),
                Err(e) => {
                    warn!(code = %e.code(), "identity present but locked: {}", e);
                    None
                }
            };
            return Ok(IdentityKeys { public, private });
        }

        let keys = PrivateKeys::generate();
        let blob = match session.passphrase() {
            Some(pass) => self.seal_passphrase(&keys, pass).await?,
            None => self.seal_device(&keys).await?,
        };
        let public = PublicIdentity::new(keys.public(), now_ms());

        // private first: a crash in between leaves no public identity and
        // the next call starts over
        save_json(self.store.as_ref(), KEY_IDENTITY_PRIVATE, &blob).await?;
        save_json(self.store.as_ref(), KEY_IDENTITY_PUBLIC, &public).await?;

        info!(
            fingerprint = %public.fingerprint.display,
            mode = ?blob.mode(),
            "generated new identity"
        );
        Ok(IdentityKeys {
            public,
            private: Some(keys),
        })
    }

    /// Decrypt the private blob with whatever `session` provides.
    pub async fn unlock(&self, session: &Session) -> Result<PrivateKeys, CustodyError> {
        let _guard = self.lock.lock().await;
        self.migrate_legacy().await?;
        self.unlock_inner(session).await
    }

    /// Re-wrap the existing private keys under a new protection.
    ///
    /// The key pair is unchanged. On success the session is updated to match
    /// (passphrase stored for `Passphrase`, cleared for `Device`).
    pub async fn set_custody_mode(
        &self,
        session: &mut Session,
        protection: Protection,
    ) -> Result<CustodyMode, CustodyError> {
        let _guard = self.lock.lock().await;
        self.migrate_legacy().await?;

        let keys = self.unlock_inner(session).await?;
        let blob = match &protection {
            Protection::Device => self.seal_device(&keys).await?,
            Protection::Passphrase(pass) => self.seal_passphrase(&keys, pass).await?,
        };
        save_json(self.store.as_ref(), KEY_IDENTITY_PRIVATE, &blob).await?;

        match protection {
            Protection::Device => session.clear(),
            Protection::Passphrase(pass) => session.set_passphrase(pass),
        }
        info!(mode = ?blob.mode(), "custody mode changed");
        Ok(blob.mode())
    }

    pub async fn custody_mode(&self) -> Result<Option<CustodyMode>, CustodyError> {
        let _guard = self.lock.lock().await;
        self.migrate_legacy().await?;
        Ok(self.load_private_blob().await?.map(|b| b.mode()))
    }

    /// Public identity without touching the private record.
    pub async fn public_identity(&self) -> Result<Option<PublicIdentity>, CustodyError> {
        let _guard = self.lock.lock().await;
        self.migrate_legacy().await?;
        self.load_public().await
    }

    /// Portable passphrase-protected copy of the private keys.
    pub async fn export_backup(
        &self,
        session: &Session,
        passphrase: &str,
    ) -> Result<ProtectedBlob, CustodyError> {
        let keys = self.unlock(session).await?;
        let blob = self.seal_passphrase(&keys, passphrase).await?;
        info!(fingerprint = %keys.public().fingerprint().display, "exported backup");
        Ok(blob)
    }

    /// Take custody of the keys in a backup. Storage ends up in device mode.
    pub async fn import_backup(
        &self,
        backup: &ProtectedBlob,
        passphrase: &str,
    ) -> Result<ImportOutcome, CustodyError> {
        if backup.mode() != CustodyMode::Passphrase {
            return Err(CustodyError::NotPortable);
        }
        let doc = open_passphrase_blocking(backup.clone(), passphrase).await?;
        let keys = PrivateKeys::from_document(&doc).map_err(|e| CustodyError::Corrupt(e.to_string()))?;
        let imported = keys.public();

        let _guard = self.lock.lock().await;
        self.migrate_legacy().await?;
        let previous = self.load_public().await?;

        let blob = self.seal_device(&keys).await?;
        save_json(self.store.as_ref(), KEY_IDENTITY_PRIVATE, &blob).await?;

        match previous {
            Some(prev) if prev.keys == imported => {
                info!(fingerprint = %prev.fingerprint.display, "imported backup of current identity");
                Ok(ImportOutcome::SameIdentity)
            }
            prev => {
                let public = PublicIdentity::new(imported, now_ms());
                save_json(self.store.as_ref(), KEY_IDENTITY_PUBLIC, &public).await?;
                let previous = prev.map(|p| p.fingerprint);
                warn!(
                    previous = ?previous.as_ref().map(|f| f.display.as_str()),
                    current = %public.fingerprint.display,
                    "imported backup replaced the identity"
                );
                Ok(ImportOutcome::IdentityReplaced {
                    previous,
                    current: public.fingerprint,
                })
            }
        }
    }

    // -------------------------------------------------------------------------
    // internals, called with the lock held
    // -------------------------------------------------------------------------

    async fn load_public(&self) -> Result<Option<PublicIdentity>, CustodyError> {
        Ok(load_json(self.store.as_ref(), KEY_IDENTITY_PUBLIC).await?)
    }

    async fn load_private_blob(&self) -> Result<Option<ProtectedBlob>, CustodyError> {
        Ok(load_json(self.store.as_ref(), KEY_IDENTITY_PRIVATE).await?)
    }

    async fn unlock_inner(&self, session: &Session) -> Result<PrivateKeys, CustodyError> {
        let blob: ProtectedBlob = load_json(self.store.as_ref(), KEY_IDENTITY_PRIVATE)
            .await
            .map_err(unreadable_as_missing)?
            .ok_or(CustodyError::NoPrivateKeys)?;

        let doc = match blob.mode() {
            CustodyMode::Device => {
                let key = self.device.device_key().await.map_err(unreadable_as_missing)?;
                blob.open_device(&key).map_err(|e| {
                    warn!("device blob failed to open: {}", e);
                    CustodyError::NoPrivateKeys
                })?
            }
            CustodyMode::Passphrase => {
                let pass = session.passphrase().ok_or(CustodyError::NeedPassphrase)?;
                open_passphrase_blocking(blob, pass).await?
            }
        };

        let keys = PrivateKeys::from_document(&doc).map_err(|e| CustodyError::Corrupt(e.to_string()))?;
        if let Some(public) = self.load_public().await? {
            if public.keys != keys.public() {
                return Err(CustodyError::Corrupt(
                    "private keys do not match the public record".into(),
                ));
            }
        }
        Ok(keys)
    }

    async fn seal_device(&self, keys: &PrivateKeys) -> Result<ProtectedBlob, CustodyError> {
        let key = self.device.device_key().await?;
        ProtectedBlob::seal_device(&key, &keys.to_document())
            .map_err(|e| CustodyError::Corrupt(e.to_string()))
    }

    async fn seal_passphrase(&self, keys: &PrivateKeys, passphrase: &str) -> Result<ProtectedBlob, CustodyError> {
        if passphrase.is_empty() {
            return Err(CustodyError::InvalidParams("passphrase must not be empty".into()));
        }
        let doc = keys.to_document();
        let passphrase = Zeroizing::new(passphrase.to_string());
        let kdf = self.kdf;
        tokio::task::spawn_blocking(move || ProtectedBlob::seal_passphrase(&passphrase, &kdf, &doc))
            .await
            .map_err(|e| CustodyError::Task(e.to_string()))?
            .map_err(|e| CustodyError::InvalidParams(e.to_string()))
    }

    /// Split private keys out of a legacy public record. The stored
    /// fingerprint is kept as is.
    async fn migrate_legacy(&self) -> Result<(), CustodyError> {
        let Some(raw) = self.store.get(KEY_IDENTITY_PUBLIC).await? else {
            return Ok(());
        };
        let raw = Zeroizing::new(raw);
        let is_legacy = serde_json::from_slice::<serde_json::Value>(&raw)
            .map(|v| v.get("encPriv").is_some() || v.get("sigPriv").is_some())
            .unwrap_or(false);
        if !is_legacy {
            return Ok(());
        }

        let legacy: LegacyPublicRecord = serde_json::from_slice(&raw)
            .map_err(|e| CustodyError::Corrupt(format!("legacy identity record: {e}")))?;
        let keys = PrivateKeys::from_bytes(&legacy.enc_priv, &legacy.sig_priv);
        if keys.public() != legacy.keys {
            return Err(CustodyError::Corrupt(
                "legacy private keys do not match public keys".into(),
            ));
        }

        let blob = self.seal_device(&keys).await?;
        save_json(self.store.as_ref(), KEY_IDENTITY_PRIVATE, &blob).await?;

        let public = PublicIdentity {
            fingerprint: legacy.fingerprint.unwrap_or_else(|| legacy.keys.fingerprint()),
            keys: legacy.keys.clone(),
            created_at: legacy.created_at.unwrap_or_else(now_ms),
        };
        save_json(self.store.as_ref(), KEY_IDENTITY_PUBLIC, &public).await?;
        info!(fingerprint = %public.fingerprint.display, "migrated legacy identity record");
        Ok(())
    }
}

/// Argon2 is memory- and CPU-hard; run it on the blocking pool.
async fn open_passphrase_blocking(
    blob: ProtectedBlob,
    passphrase: &str,
) -> Result<Zeroizing<Vec<u8>>, CustodyError> {
    let passphrase = Zeroizing::new(passphrase.to_string());
    tokio::task::spawn_blocking(move || blob.open_passphrase(&passphrase))
        .await
        .map_err(|e| CustodyError::Task(e.to_string()))?
        .map_err(|e| match e {
            VaultError::AuthFailed => CustodyError::BadPassphrase,
            VaultError::InvalidKdfParams(reason) => CustodyError::InvalidParams(reason),
            other => CustodyError::Corrupt(other.to_string()),
        })
}

/// A key record that exists but cannot be read leaves no usable private keys.
fn unreadable_as_missing(e: StoreError) -> CustodyError {
    match e {
        StoreError::DataCorruption { key, reason } => {
            warn!(record = %key, "unreadable key record: {}", reason);
            CustodyError::NoPrivateKeys
        }
        other => CustodyError::Store(other),
    }
}
