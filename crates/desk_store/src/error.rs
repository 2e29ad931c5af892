use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),

    #[error("Crypto error: {0}")]
    Crypto(#[from] desk_crypto::CryptoError),

    #[error("Device key slot unusable: {0}")]
    KeySlot(String),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}
