//! Application-originated requests.
//!
//! Two families:
//!
//! - [`ConnectRequest`]: the connect handshake, embedded in the connect URL
//!   presented to the user (QR code / deep link).
//! - [`AppRequest`]: RPC calls sent over an established session
//!   (send-transaction, sign-data). The connector assigns the request `id`
//!   from the connection's monotonic counter just before sending.

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Connect handshake
// ─────────────────────────────────────────────────────────────────────────────

/// Payload for a `ton_proof` handshake item.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TonProofRequest {
    /// Challenge payload the wallet signs.
    pub payload: String,
}

/// A data item requested during the connect handshake.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum ConnectRequestItem {
    /// Request the wallet's address.
    TonAddr,
    /// Request an ownership proof over a challenge payload.
    TonProof(TonProofRequest),
}

/// The connect handshake request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectRequest {
    /// URL of the application manifest shown to the user.
    pub manifest_url: String,
    /// Requested data items. Always contains at least `ton_addr`.
    pub items: Vec<ConnectRequestItem>,
}

impl ConnectRequest {
    /// Build a handshake requesting the wallet address and, optionally, a proof.
    #[must_use]
    pub fn new(manifest_url: impl Into<String>, ton_proof: Option<TonProofRequest>) -> Self {
        let mut items = vec![ConnectRequestItem::TonAddr];
        if let Some(proof) = ton_proof {
            items.push(ConnectRequestItem::TonProof(proof));
        }
        Self {
            manifest_url: manifest_url.into(),
            items,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// RPC requests
// ─────────────────────────────────────────────────────────────────────────────

/// RPC method names understood by wallets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AppMethod {
    /// Ask the wallet to sign and broadcast a transaction.
    SendTransaction,
    /// Ask the wallet to sign an arbitrary payload.
    SignData,
}

/// An RPC request sent to the wallet over the bridge session.
///
/// `params` entries are JSON-encoded strings, as mandated by the protocol.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AppRequest {
    /// RPC method.
    pub method: AppMethod,
    /// JSON-encoded parameter strings.
    pub params: Vec<String>,
    /// Correlation id, assigned by the connector at send time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl AppRequest {
    /// Build a `sendTransaction` request from a JSON-encoded transaction.
    #[must_use]
    pub fn send_transaction(transaction: impl Into<String>) -> Self {
        Self {
            method: AppMethod::SendTransaction,
            params: vec![transaction.into()],
            id: None,
        }
    }

    /// Build a `signData` request from a JSON-encoded payload.
    #[must_use]
    pub fn sign_data(payload: impl Into<String>) -> Self {
        Self {
            method: AppMethod::SignData,
            params: vec![payload.into()],
            id: None,
        }
    }
}
