//! # tonconnect-bridge
//!
//! One encrypted bridge session per connected wallet app.
//!
//! A [`BridgeSession`] registers with the wallet's SSE bridge, decrypts
//! inbound relay events into [`BridgeMessage`](tonconnect_core::BridgeMessage)s
//! pushed onto the connector's shared queue, sends encrypted outbound
//! requests, and builds the connect URL presented to the user.
//!
//! The session encryption ([`SessionCrypto`]) follows the NaCl-box shape:
//! x25519 ECDH, SHA-256 key derivation, XChaCha20-Poly1305 with a random
//! 24-byte nonce prepended to the ciphertext, base64 on the wire.

#![deny(unsafe_code)]

pub mod crypto;
pub mod errors;
pub mod session;

pub use crypto::SessionCrypto;
pub use errors::BridgeError;
pub use session::{BridgeSendResponse, BridgeSession};

/// Result alias for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;
