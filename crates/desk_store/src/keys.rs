//! Device key slot: derive once, then load forever.
//!
//! Regenerating the key would orphan every record sealed under the old one,
//! so a persisted value is returned as-is even when the environment signals
//! have drifted since it was derived.

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{error, info, warn};

use desk_crypto::fingerprint::{derive_key, DeviceFingerprintKey, EnvironmentProbe};

use crate::error::StoreError;
use crate::kv::KeyValueStore;

pub const KEY_SLOT: &str = "deskline.device.key";

pub struct FingerprintKeyDeriver {
    kv: Arc<dyn KeyValueStore>,
    probe: Arc<dyn EnvironmentProbe>,
    cached: Mutex<Option<DeviceFingerprintKey>>,
}

impl FingerprintKeyDeriver {
    pub fn new(kv: Arc<dyn KeyValueStore>, probe: Arc<dyn EnvironmentProbe>) -> Self {
        Self {
            kv,
            probe,
            cached: Mutex::new(None),
        }
    }

    /// Return the device key, deriving and persisting it on first use.
    pub fn derive_or_load(&self) -> Result<DeviceFingerprintKey, StoreError> {
        let mut cached = self.cached.lock();
        if let Some(key) = cached.as_ref() {
            return Ok(key.clone());
        }

        let key = match self.kv.get(KEY_SLOT)? {
            Some(stored) => DeviceFingerprintKey::from_hex(&stored).map_err(|e| {
                // Never overwrite: the slot may still match records we cannot read yet.
                error!("[keys] persisted device key is malformed, refusing to regenerate: {e}");
                StoreError::KeySlot(e.to_string())
            })?,
            None => {
                let fresh = derive_key(self.probe.as_ref());
                match self.kv.set(KEY_SLOT, &fresh.to_hex()) {
                    Ok(()) => info!("[keys] derived and stored new device key"),
                    Err(e) => warn!("[keys] device key derived but not persisted: {e}"),
                }
                fresh
            }
        };

        *cached = Some(key.clone());
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;
    use desk_crypto::FixedProbe;

    fn probe(width: u32) -> Arc<FixedProbe> {
        Arc::new(FixedProbe {
            user_agent: Some("deskline-test".into()),
            locale: Some("en-GB".into()),
            display_width: Some(width),
            display_height: Some(900),
            timezone_offset_minutes: Some(0),
        })
    }

    #[test]
    fn first_call_persists_hex_digest() {
        let kv = Arc::new(MemoryKv::new());
        let deriver = FingerprintKeyDeriver::new(kv.clone(), probe(1440));
        let key = deriver.derive_or_load().unwrap();
        let stored = kv.get(KEY_SLOT).unwrap().unwrap();
        assert_eq!(stored, key.to_hex());
        assert_eq!(stored, derive_key(probe(1440).as_ref()).to_hex());
    }

    #[test]
    fn persisted_key_survives_signal_drift() {
        let kv = Arc::new(MemoryKv::new());
        let first = FingerprintKeyDeriver::new(kv.clone(), probe(1440))
            .derive_or_load()
            .unwrap();

        // New process, display resized.
        let second = FingerprintKeyDeriver::new(kv.clone(), probe(800))
            .derive_or_load()
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(kv.get(KEY_SLOT).unwrap().unwrap(), first.to_hex());
    }

    #[test]
    fn malformed_slot_is_not_overwritten() {
        let kv = Arc::new(MemoryKv::new());
        kv.set(KEY_SLOT, "not-a-key").unwrap();
        let deriver = FingerprintKeyDeriver::new(kv.clone(), probe(1440));
        assert!(matches!(deriver.derive_or_load(), Err(StoreError::KeySlot(_))));
        assert_eq!(kv.get(KEY_SLOT).unwrap().as_deref(), Some("not-a-key"));
    }

    #[test]
    fn unpersistable_key_is_still_usable() {
        let kv = Arc::new(MemoryKv::new());
        kv.set_fail_writes(true);
        let deriver = FingerprintKeyDeriver::new(kv.clone(), probe(1440));
        let key = deriver.derive_or_load().unwrap();
        assert!(kv.get(KEY_SLOT).unwrap().is_none());
        assert_eq!(deriver.derive_or_load().unwrap(), key);
    }
}
