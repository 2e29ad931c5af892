//! Typed access to the two session slots.
//!
//! All mutation of the token and user records goes through here so that the
//! seal → write sequence for one logical update is never interleaved with
//! another.

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

use desk_crypto::EnvironmentProbe;
use desk_proto::{AuthToken, UserProfile};

use crate::cipher::CipherStore;
use crate::clock::Clock;
use crate::kv::KeyValueStore;

pub const TOKEN_SLOT: &str = "deskline.session.token";
pub const USER_SLOT: &str = "deskline.session.user";

/// Lead time before expiry at which a token is renewed.
pub const REFRESH_WINDOW_MS: i64 = 5 * 60 * 1000;

pub struct SessionRepository {
    cipher: CipherStore,
    clock: Arc<dyn Clock>,
    write_lock: Mutex<()>,
}

impl SessionRepository {
    pub fn new(
        kv: Arc<dyn KeyValueStore>,
        probe: Arc<dyn EnvironmentProbe>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            cipher: CipherStore::new(kv, probe),
            clock,
            write_lock: Mutex::new(()),
        }
    }

    pub fn now_millis(&self) -> i64 {
        self.clock.now_millis()
    }

    pub fn save_token(&self, token: &AuthToken) -> bool {
        let _guard = self.write_lock.lock();
        self.cipher.put(TOKEN_SLOT, token)
    }

    pub fn get_token(&self) -> Option<AuthToken> {
        self.cipher.get(TOKEN_SLOT)
    }

    pub fn save_user(&self, user: &UserProfile) -> bool {
        let _guard = self.write_lock.lock();
        self.cipher.put(USER_SLOT, user)
    }

    pub fn get_user(&self) -> Option<UserProfile> {
        self.cipher.get(USER_SLOT)
    }

    /// Write both slots. If the second write fails the first is rolled back
    /// so a half-written session never survives.
    pub fn save_session(&self, user: &UserProfile, token: &AuthToken) -> bool {
        let _guard = self.write_lock.lock();
        if !self.cipher.put(USER_SLOT, user) {
            return false;
        }
        if !self.cipher.put(TOKEN_SLOT, token) {
            warn!("[store] token write failed after user write, rolling back");
            self.cipher.remove(USER_SLOT);
            return false;
        }
        true
    }

    /// A token record exists and decrypts.
    pub fn has_token(&self) -> bool {
        self.get_token().is_some()
    }

    pub fn is_authenticated(&self) -> bool {
        let now = self.clock.now_millis();
        self.get_token().is_some_and(|t| t.is_valid_at(now))
    }

    pub fn needs_refresh(&self) -> bool {
        let now = self.clock.now_millis();
        self.get_token()
            .is_some_and(|t| t.expires_within(now, REFRESH_WINDOW_MS))
    }

    /// Milliseconds left on the stored token; negative once expired.
    pub fn millis_until_expiry(&self) -> Option<i64> {
        let now = self.clock.now_millis();
        self.get_token().map(|t| t.expires_at.saturating_sub(now))
    }

    /// Remove the token and user slots. The device key slot is kept so the
    /// next session is sealed under the same key.
    pub fn clear_all(&self) -> bool {
        let _guard = self.write_lock.lock();
        let token_removed = self.cipher.remove(TOKEN_SLOT);
        let user_removed = self.cipher.remove(USER_SLOT);
        debug!(token_removed, user_removed, "[store] session slots cleared");
        token_removed && user_removed
    }
}
