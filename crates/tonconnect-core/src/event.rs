//! Wallet-originated events and correlated RPC responses.
//!
//! Everything a bridge session can deliver on the shared queue is a
//! [`BridgeMessage`]: a relay heartbeat, a [`WalletEvent`] (connect success,
//! connect error, disconnect), or an [`RpcResponse`] correlated to an earlier
//! [`AppRequest`](crate::request::AppRequest) by id.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ─────────────────────────────────────────────────────────────────────────────
// Wallet events
// ─────────────────────────────────────────────────────────────────────────────

/// Error payload carried by connect-error events and RPC error responses.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Protocol error code.
    pub code: u32,
    /// Human-readable message.
    #[serde(default)]
    pub message: String,
}

/// `ton_addr` item of a connect-success payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TonAddressItem {
    /// Raw wallet address (`workchain:hex`).
    pub address: String,
    /// Network id (`-239` mainnet, `-3` testnet).
    pub network: String,
    /// Wallet public key, hex.
    #[serde(default)]
    pub public_key: Option<String>,
    /// Base64 state init of the wallet contract.
    #[serde(default)]
    pub wallet_state_init: Option<String>,
}

/// A data item of a connect-success payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum ConnectItem {
    /// Wallet address and key material.
    TonAddr(TonAddressItem),
    /// Ownership proof over the requested challenge.
    TonProof {
        /// Proof body (signature, timestamp, domain).
        proof: Value,
    },
}

/// Payload of a connect-success event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConnectPayload {
    /// Granted data items.
    #[serde(default)]
    pub items: Vec<ConnectItem>,
    /// Wallet device information.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<Value>,
}

impl ConnectPayload {
    /// The `ton_addr` item, if the wallet granted one.
    #[must_use]
    pub fn ton_addr(&self) -> Option<&TonAddressItem> {
        self.items.iter().find_map(|item| match item {
            ConnectItem::TonAddr(addr) => Some(addr),
            ConnectItem::TonProof { .. } => None,
        })
    }
}

/// An asynchronous event pushed by the wallet.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WalletEvent {
    /// The wallet accepted the connect handshake.
    Connect {
        /// Monotonic wallet event id.
        id: u64,
        /// Granted items and device info.
        payload: ConnectPayload,
    },
    /// The wallet rejected the connect handshake.
    ConnectError {
        /// Monotonic wallet event id.
        id: u64,
        /// Rejection reason.
        payload: ErrorPayload,
    },
    /// The wallet terminated the session.
    Disconnect {
        /// Monotonic wallet event id.
        id: u64,
        /// Unused; present on the wire.
        #[serde(default)]
        payload: Value,
    },
}

impl WalletEvent {
    /// The event kind, used as the listener registry key.
    #[must_use]
    pub fn name(&self) -> WalletEventName {
        match self {
            Self::Connect { .. } => WalletEventName::Connect,
            Self::ConnectError { .. } => WalletEventName::ConnectError,
            Self::Disconnect { .. } => WalletEventName::Disconnect,
        }
    }

    /// The wallet event id.
    #[must_use]
    pub fn id(&self) -> u64 {
        match self {
            Self::Connect { id, .. }
            | Self::ConnectError { id, .. }
            | Self::Disconnect { id, .. } => *id,
        }
    }
}

/// Wallet event kinds an application can listen for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletEventName {
    /// Connect handshake accepted.
    Connect,
    /// Connect handshake rejected.
    ConnectError,
    /// Session terminated by the wallet.
    Disconnect,
}

// ─────────────────────────────────────────────────────────────────────────────
// RPC responses
// ─────────────────────────────────────────────────────────────────────────────

/// A wallet reply correlated to an [`AppRequest`](crate::request::AppRequest).
///
/// The wire shape carries no method name; send-transaction and sign-data
/// replies are distinguished only by the request id they answer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcResponse {
    /// The wallet executed the request.
    Success {
        /// Method-specific result (BOC, signature, ...).
        result: Value,
        /// Id of the request this answers.
        id: String,
    },
    /// The wallet rejected or failed the request.
    Error {
        /// Failure reason.
        error: ErrorPayload,
        /// Id of the request this answers.
        id: String,
    },
}

impl RpcResponse {
    /// Id of the request this response answers.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Success { id, .. } | Self::Error { id, .. } => id,
        }
    }

    /// Whether the wallet executed the request.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Queue envelope
// ─────────────────────────────────────────────────────────────────────────────

/// Event variants a bridge session can deliver.
#[derive(Clone, Debug, PartialEq)]
pub enum BridgeEvent {
    /// Relay liveness signal; not a wallet event.
    Heartbeat,
    /// Wallet lifecycle event.
    Wallet(WalletEvent),
    /// Correlated RPC reply.
    Response(RpcResponse),
}

/// Envelope delivered on the shared dispatch queue.
#[derive(Clone, Debug, PartialEq)]
pub struct BridgeMessage {
    /// Owning app name (bridge registry key).
    pub app_name: String,
    /// Sender public key from the relay envelope, hex.
    pub wallet_key: Option<String>,
    /// The decoded event.
    pub event: BridgeEvent,
}
