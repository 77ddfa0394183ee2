//! Connector error types.
//!
//! Three families, mirroring how failures surface:
//!
//! - user/state errors raised synchronously to the calling operation
//! - transport/RPC errors raised to the `send` caller
//! - loop-internal errors, which are logged and swallowed by the dispatch
//!   loop and never appear here

use thiserror::Error;

use tonconnect_bridge::{BridgeError, BridgeSendResponse};
use tonconnect_core::WalletEventName;
use tonconnect_storage::StorageError;

/// Failures raised by connector operations.
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// A completed connection is already persisted for the app.
    #[error("connection already exists for {0}; use restore_connection")]
    ConnectionExists(String),

    /// No live bridge session is registered for the app.
    #[error("bridge not found for {0}")]
    BridgeNotFound(String),

    /// No connection is persisted for the app.
    #[error("connection not found for {0}")]
    ConnectionNotFound(String),

    /// The wallet has not completed the handshake yet, so there is no key
    /// to encrypt requests to.
    #[error("connection for {0} has no wallet key yet")]
    NotConnected(String),

    /// A persisted record is structurally incomplete. Fatal, not retried.
    #[error("persisted connection for {app} is corrupt: {reason}")]
    CorruptedConnection {
        /// App name of the corrupt record.
        app: String,
        /// What is missing.
        reason: String,
    },

    /// A listener is already registered for the event kind.
    #[error("listener already registered for {0:?}")]
    ListenerExists(WalletEventName),

    /// The wallet descriptor lacks an SSE bridge or universal link.
    #[error("wallet {0} cannot be used over an SSE bridge")]
    UnsupportedWallet(String),

    /// The bridge reported a non-success status for an outbound request.
    #[error("bridge rejected request with status {}", .0.status_code)]
    Rpc(BridgeSendResponse),

    /// No correlated response arrived within the request time-to-live.
    #[error("timed out waiting for response to request {0}")]
    Timeout(String),

    /// Wallet directory fetch failure.
    #[error("wallet directory error: {0}")]
    Directory(#[from] reqwest::Error),

    /// Storage adapter failure.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Bridge session failure.
    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

/// Result alias for connector operations.
pub type ConnectorResult<T> = Result<T, ConnectorError>;
