//! desk_store: Encrypted session storage for Deskline clients
//!
//! # Encryption strategy
//! - Records are JSON, sealed with XChaCha20-Poly1305 under the device
//!   fingerprint key and stored as base64 strings in a key-value substrate.
//! - The fingerprint key is derived once from environment signals and kept
//!   in plaintext in the same substrate (`deskline.device.key`). This is a
//!   known limitation: anyone who can read the substrate can read the
//!   session. It protects against casual inspection, not a local attacker.
//! - Decryption failures degrade to "absent", storage failures to `false`;
//!   nothing here panics on bad data.
//!
//! # Layers
//! `kv` (substrate) → `keys` (fingerprint key) → `cipher` (sealed records)
//! → `repository` (token + user slots).

pub mod cipher;
pub mod clock;
pub mod error;
pub mod keys;
pub mod kv;
pub mod repository;

pub use cipher::CipherStore;
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::StoreError;
pub use keys::FingerprintKeyDeriver;
pub use kv::{FileKv, KeyValueStore, MemoryKv};
pub use repository::SessionRepository;
