//! Device-mode key source.
//!
//! Device-mode custody needs a key that unlocks without user input. Platform
//! keystores can provide one behind [`DeviceKeyProvider`]; the portable
//! default [`StoredDeviceKey`] keeps a random key in a `SecretStore`.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::info;
use zeroize::Zeroizing;

use crate::store::{SecretStore, StoreError, KEY_DEVICE_KEK};

#[async_trait]
pub trait DeviceKeyProvider: Send + Sync {
    /// Return the device key, creating it on first use.
    async fn device_key(&self) -> Result<Zeroizing<[u8; 32]>, StoreError>;
}

/// Random 256-bit key persisted under `device.kek` and cached in memory.
pub struct StoredDeviceKey {
    store: Arc<dyn SecretStore>,
    cached: Mutex<Option<Zeroizing<[u8; 32]>>>,
}

impl StoredDeviceKey {
    pub fn new(store: Arc<dyn SecretStore>) -> Self {
        Self {
            store,
            cached: Mutex::new(None),
        }
    }
}

#[async_trait]
impl DeviceKeyProvider for StoredDeviceKey {
    async fn device_key(&self) -> Result<Zeroizing<[u8; 32]>, StoreError> {
        let mut cached = self.cached.lock().await;
        if let Some(key) = cached.as_ref() {
            return Ok(key.clone());
        }

        let key = match self.store.get(KEY_DEVICE_KEK).await? {
            Some(bytes) => {
                let bytes = Zeroizing::new(bytes);
                let arr: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
                    StoreError::DataCorruption {
                        key: KEY_DEVICE_KEK.to_string(),
                        reason: format!("expected 32 bytes, got {}", bytes.len()),
                    }
                })?;
                Zeroizing::new(arr)
            }
            None => {
                let key = inkseal_crypto::vault::random_key()
                    .map_err(|e| StoreError::Io(e.to_string()))?;
                self.store.set(KEY_DEVICE_KEK, key.as_ref()).await?;
                info!("generated new device key");
                key
            }
        };

        *cached = Some(key.clone());
        Ok(key)
    }
}
