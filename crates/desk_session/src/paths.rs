use directories::ProjectDirs;
use std::path::{Path, PathBuf};

use crate::error::SessionError;

pub const APP_QUALIFIER: &str = "com";
pub const APP_ORG: &str = "deskline";
pub const APP_NAME: &str = "desk";

pub const DATA_DIR_ENV: &str = "DESKLINE_DATA_DIR";

pub fn data_dir() -> Result<PathBuf, SessionError> {
    if let Ok(override_dir) = std::env::var(DATA_DIR_ENV) {
        if !override_dir.trim().is_empty() {
            return Ok(PathBuf::from(override_dir));
        }
    }
    let dirs = ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME).ok_or(SessionError::NoDataDir)?;
    Ok(dirs.data_dir().to_path_buf())
}

pub fn settings_path(data_dir: &Path) -> PathBuf {
    data_dir.join("settings.json")
}

pub fn session_store_path(data_dir: &Path) -> PathBuf {
    data_dir.join("session.json")
}
