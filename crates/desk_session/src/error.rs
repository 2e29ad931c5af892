use thiserror::Error;

use desk_store::StoreError;

/// Failure talking to the authentication service. Never carries credentials.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("auth service returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("malformed auth response: {0}")]
    Decode(String),
    #[error("auth service unreachable")]
    Offline,
}

#[derive(Debug, Error)]
pub enum LoginError {
    #[error("a login attempt is already in progress")]
    InProgress,
    #[error("{0}")]
    Rejected(String),
    #[error("login request failed: {0}")]
    Transport(#[from] ClientError),
    #[error("session could not be stored")]
    Storage,
    #[error("login cancelled by logout")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("cannot determine data directory")]
    NoDataDir,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("settings error: {0}")]
    Settings(#[from] serde_json::Error),
    #[error("invalid setting: {0}")]
    InvalidSetting(String),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("client error: {0}")]
    Client(#[from] ClientError),
}
