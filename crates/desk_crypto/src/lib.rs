//! desk_crypto: Deskline client-side cryptographic primitives
//!
//! # Design principles
//! - NO custom crypto; all primitives come from audited Rust crates.
//! - Zeroize secret material on drop.
//! - Environment access goes through [`fingerprint::EnvironmentProbe`] so the
//!   key derivation is deterministic under test.
//!
//! # Module layout
//! - `fingerprint`: environment probe + SHA-256 device fingerprint key
//! - `aead`: XChaCha20-Poly1305 sealing of session records
//! - `error`: unified error type

pub mod aead;
pub mod error;
pub mod fingerprint;

pub use error::CryptoError;
pub use fingerprint::{DeviceFingerprintKey, EnvironmentProbe, FixedProbe, SystemProbe};
