//! Bridge error types.

use thiserror::Error;

/// Failures raised by a bridge session.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// HTTP transport failure.
    #[error("bridge HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Event stream parse failure.
    #[error("bridge event stream error: {0}")]
    Stream(String),

    /// Encryption or decryption failure.
    #[error("session crypto error: {0}")]
    Crypto(String),

    /// Malformed key material (bad hex or wrong length).
    #[error("invalid key material: {0}")]
    InvalidKey(String),

    /// Payload (de)serialization failure.
    #[error("bridge serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
