//! Device fingerprint key derivation.
//!
//! The fingerprint key is SHA-256 over a fixed, ordered list of environment
//! signals joined with `|`:
//!
//! ```text
//! user_agent | locale | display_width | display_height | timezone_offset
//! ```
//!
//! A missing signal contributes an empty string. Persisting the result and
//! never regenerating it is the caller's job (see `desk_store::keys`).

use sha2::{Digest, Sha256};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;

pub const SIGNAL_SEPARATOR: &str = "|";
pub const KEY_HEX_LEN: usize = 64;

/// Capability surface for the environment signals feeding the fingerprint.
pub trait EnvironmentProbe: Send + Sync {
    fn user_agent(&self) -> Option<String>;
    fn locale(&self) -> Option<String>;
    fn display_width(&self) -> Option<u32>;
    fn display_height(&self) -> Option<u32>;
    /// Local offset from UTC, minutes east.
    fn timezone_offset_minutes(&self) -> Option<i32>;
}

/// Reads signals from the running process and host.
#[derive(Debug, Clone, Default)]
pub struct SystemProbe;

impl EnvironmentProbe for SystemProbe {
    fn user_agent(&self) -> Option<String> {
        let host = hostname::get()
            .ok()
            .map(|h| h.to_string_lossy().into_owned())
            .filter(|h| !h.is_empty());
        let mut ua = format!(
            "deskline/{} ({}; {}",
            env!("CARGO_PKG_VERSION"),
            std::env::consts::OS,
            std::env::consts::ARCH
        );
        if let Some(host) = host {
            ua.push_str("; ");
            ua.push_str(&host);
        }
        ua.push(')');
        Some(ua)
    }

    fn locale(&self) -> Option<String> {
        ["LC_ALL", "LC_MESSAGES", "LANG"]
            .iter()
            .filter_map(|var| std::env::var(var).ok())
            .find(|v| !v.trim().is_empty())
    }

    fn display_width(&self) -> Option<u32> {
        env_u32("COLUMNS")
    }

    fn display_height(&self) -> Option<u32> {
        env_u32("LINES")
    }

    fn timezone_offset_minutes(&self) -> Option<i32> {
        Some(chrono::Local::now().offset().local_minus_utc() / 60)
    }
}

fn env_u32(var: &str) -> Option<u32> {
    std::env::var(var).ok()?.trim().parse().ok()
}

/// Probe with injected values. Used by tests and by hosts that already know
/// their display/locale (e.g. an embedding UI shell).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FixedProbe {
    pub user_agent: Option<String>,
    pub locale: Option<String>,
    pub display_width: Option<u32>,
    pub display_height: Option<u32>,
    pub timezone_offset_minutes: Option<i32>,
}

impl EnvironmentProbe for FixedProbe {
    fn user_agent(&self) -> Option<String> {
        self.user_agent.clone()
    }

    fn locale(&self) -> Option<String> {
        self.locale.clone()
    }

    fn display_width(&self) -> Option<u32> {
        self.display_width
    }

    fn display_height(&self) -> Option<u32> {
        self.display_height
    }

    fn timezone_offset_minutes(&self) -> Option<i32> {
        self.timezone_offset_minutes
    }
}

/// 256-bit key derived from the device fingerprint. Zeroized on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct DeviceFingerprintKey([u8; 32]);

impl DeviceFingerprintKey {
    /// Parse the persisted hex form. Only a 64-char hex digest is accepted.
    pub fn from_hex(hex_key: &str) -> Result<Self, CryptoError> {
        let hex_key = hex_key.trim();
        if hex_key.len() != KEY_HEX_LEN {
            return Err(CryptoError::InvalidKey(format!(
                "expected {KEY_HEX_LEN} hex chars, got {}",
                hex_key.len()
            )));
        }
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(hex_key, &mut bytes)?;
        Ok(Self(bytes))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for DeviceFingerprintKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DeviceFingerprintKey(<redacted>)")
    }
}

/// Ordered signal concatenation fed to the hash.
pub fn fingerprint_material(probe: &dyn EnvironmentProbe) -> String {
    let parts = [
        probe.user_agent().unwrap_or_default(),
        probe.locale().unwrap_or_default(),
        probe.display_width().map(|w| w.to_string()).unwrap_or_default(),
        probe.display_height().map(|h| h.to_string()).unwrap_or_default(),
        probe
            .timezone_offset_minutes()
            .map(|o| o.to_string())
            .unwrap_or_default(),
    ];
    parts.join(SIGNAL_SEPARATOR)
}

/// Hash the current environment signals into a fresh key.
pub fn derive_key(probe: &dyn EnvironmentProbe) -> DeviceFingerprintKey {
    let digest = Sha256::digest(fingerprint_material(probe).as_bytes());
    DeviceFingerprintKey(digest.into())
}
