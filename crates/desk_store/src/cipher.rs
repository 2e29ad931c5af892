//! Sealed records over the key-value substrate.

use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use tracing::warn;

use desk_crypto::{aead, EnvironmentProbe};

use crate::error::StoreError;
use crate::keys::FingerprintKeyDeriver;
use crate::kv::KeyValueStore;

/// Associated data bound into every sealed record.
pub const RECORD_AAD: &[u8] = b"desk-store-v1";

pub struct CipherStore {
    kv: Arc<dyn KeyValueStore>,
    keys: FingerprintKeyDeriver,
}

impl CipherStore {
    pub fn new(kv: Arc<dyn KeyValueStore>, probe: Arc<dyn EnvironmentProbe>) -> Self {
        let keys = FingerprintKeyDeriver::new(kv.clone(), probe);
        Self { kv, keys }
    }

    /// Seal `plaintext` under the device key. Only fails when the key slot
    /// itself is unusable.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, StoreError> {
        let key = self.keys.derive_or_load()?;
        Ok(aead::seal_str(key.as_bytes(), plaintext, RECORD_AAD)?)
    }

    /// Open a sealed record. Any failure is logged and reported as `None`.
    pub fn decrypt(&self, ciphertext: &str) -> Option<String> {
        let key = match self.keys.derive_or_load() {
            Ok(key) => key,
            Err(e) => {
                warn!("[store] cannot load device key for decryption: {e}");
                return None;
            }
        };
        match aead::open_str(key.as_bytes(), ciphertext, RECORD_AAD) {
            Ok(plaintext) => Some(plaintext),
            Err(e) => {
                warn!("[store] record decryption failed: {e}");
                None
            }
        }
    }

    pub fn seal_json<T: Serialize>(&self, value: &T) -> Result<String, StoreError> {
        let json = serde_json::to_string(value)?;
        self.encrypt(&json)
    }

    pub fn open_json<T: DeserializeOwned>(&self, record: &str) -> Option<T> {
        let json = self.decrypt(record)?;
        match serde_json::from_str(&json) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("[store] decrypted record is not valid JSON for its slot: {e}");
                None
            }
        }
    }

    /// Seal and write `value` under `slot`.
    pub fn put<T: Serialize>(&self, slot: &str, value: &T) -> bool {
        let result = self
            .seal_json(value)
            .and_then(|sealed| self.kv.set(slot, &sealed));
        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(slot, "[store] write failed: {e}");
                false
            }
        }
    }

    pub fn get<T: DeserializeOwned>(&self, slot: &str) -> Option<T> {
        match self.kv.get(slot) {
            Ok(Some(record)) => self.open_json(&record),
            Ok(None) => None,
            Err(e) => {
                warn!(slot, "[store] read failed: {e}");
                None
            }
        }
    }

    pub fn remove(&self, slot: &str) -> bool {
        match self.kv.remove(slot) {
            Ok(()) => true,
            Err(e) => {
                warn!(slot, "[store] remove failed: {e}");
                false
            }
        }
    }
}
