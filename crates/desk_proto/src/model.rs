//! Session records owned by the repository.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const DEFAULT_TOKEN_TYPE: &str = "Bearer";

/// Account type. Unrecognised wire values land in `Unknown` so access
/// decisions stay total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    #[serde(alias = "staff")]
    Agent,
    Customer,
    #[serde(other)]
    Unknown,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Agent => "agent",
            Role::Customer => "customer",
            Role::Unknown => "unknown",
        }
    }

    /// Lenient parse used for CLI input and loosely typed sources.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "admin" => Role::Admin,
            "agent" | "staff" => Role::Agent,
            "customer" => Role::Customer,
            _ => Role::Unknown,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    pub email: String,
    pub name: String,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferences: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_login: Option<DateTime<Utc>>,
}

/// Access/refresh token pair. `expires_at` is an absolute instant in epoch
/// milliseconds, never a duration.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthToken {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub expires_at: i64,
    #[serde(default = "default_token_type")]
    pub token_type: String,
}

fn default_token_type() -> String {
    DEFAULT_TOKEN_TYPE.to_string()
}

impl AuthToken {
    pub fn bearer(access_token: String, refresh_token: Option<String>, expires_at: i64) -> Self {
        Self {
            access_token,
            refresh_token,
            expires_at,
            token_type: default_token_type(),
        }
    }

    pub fn is_valid_at(&self, now_ms: i64) -> bool {
        self.expires_at > now_ms
    }

    /// True once `now_ms` is within `window_ms` of expiry (or past it).
    pub fn expires_within(&self, now_ms: i64, window_ms: i64) -> bool {
        self.expires_at <= now_ms.saturating_add(window_ms)
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthToken")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("expires_at", &self.expires_at)
            .field("token_type", &self.token_type)
            .finish()
    }
}

/// Partial profile update. Identity (`id`) and `role` are server-owned and
/// cannot be changed locally.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferences: Option<serde_json::Value>,
}

impl ProfileUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.email.is_none()
            && self.avatar.is_none()
            && self.preferences.is_none()
    }

    /// Merge set fields into `user`. Object-valued preferences are merged
    /// key by key; any other preferences value replaces the old one.
    pub fn apply_to(&self, user: &mut UserProfile) {
        if let Some(name) = &self.name {
            user.name = name.clone();
        }
        if let Some(email) = &self.email {
            user.email = email.clone();
        }
        if let Some(avatar) = &self.avatar {
            user.avatar = Some(avatar.clone());
        }
        if let Some(prefs) = &self.preferences {
            match (user.preferences.as_mut(), prefs) {
                (Some(serde_json::Value::Object(current)), serde_json::Value::Object(incoming)) => {
                    for (k, v) in incoming {
                        current.insert(k.clone(), v.clone());
                    }
                }
                _ => user.preferences = Some(prefs.clone()),
            }
        }
    }
}
