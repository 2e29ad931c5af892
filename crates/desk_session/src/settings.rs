use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::controller::{ControllerOptions, MAX_TOKEN_TTL};
use crate::error::SessionError;
use crate::paths;

pub const API_URL_ENV: &str = "DESKLINE_API_URL";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Auth service base URL. Unset means the built-in demo accounts.
    pub api_base_url: Option<String>,
    /// Token lifetime assumed when the service omits `expiresAt`.
    pub default_token_ttl_secs: u64,
    pub refresh_check_interval_secs: u64,
    /// Session store location; `<data_dir>/session.json` when unset.
    pub store_file: Option<PathBuf>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            api_base_url: None,
            default_token_ttl_secs: 3600,
            refresh_check_interval_secs: 60,
            store_file: None,
        }
    }
}

impl SessionSettings {
    /// Read `<data_dir>/settings.json`; a missing file yields defaults.
    pub fn load(data_dir: &Path) -> Result<Self, SessionError> {
        let path = paths::settings_path(data_dir);
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(&path)?;
        let settings: Self = serde_json::from_str(&raw)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn save(&self, data_dir: &Path) -> Result<(), SessionError> {
        self.validate()?;
        std::fs::create_dir_all(data_dir)?;
        let raw = serde_json::to_string_pretty(self)?;
        std::fs::write(paths::settings_path(data_dir), raw)?;
        Ok(())
    }

    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(API_URL_ENV).filter(|v| !v.trim().is_empty()) {
            self.api_base_url = Some(url);
        }
    }

    pub fn validate(&self) -> Result<(), SessionError> {
        if self.default_token_ttl_secs == 0 {
            return Err(SessionError::InvalidSetting(
                "default_token_ttl_secs must be positive".into(),
            ));
        }
        if self.default_token_ttl_secs > MAX_TOKEN_TTL.as_secs() {
            return Err(SessionError::InvalidSetting(format!(
                "default_token_ttl_secs must not exceed {}",
                MAX_TOKEN_TTL.as_secs()
            )));
        }
        if self.refresh_check_interval_secs == 0 {
            return Err(SessionError::InvalidSetting(
                "refresh_check_interval_secs must be positive".into(),
            ));
        }
        if let Some(url) = &self.api_base_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(SessionError::InvalidSetting(format!(
                    "api_base_url must be an http(s) URL, got {url}"
                )));
            }
        }
        Ok(())
    }

    pub fn store_path(&self, data_dir: &Path) -> PathBuf {
        self.store_file
            .clone()
            .unwrap_or_else(|| paths::session_store_path(data_dir))
    }

    pub fn controller_options(&self) -> ControllerOptions {
        ControllerOptions::new(
            Duration::from_secs(self.default_token_ttl_secs),
            Duration::from_secs(self.refresh_check_interval_secs),
        )
    }
}
