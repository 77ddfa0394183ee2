//! Persisted per-app connection state.
//!
//! A [`Connection`] is the unit of persistence: created on first successful
//! `connect`, mutated by the dispatch loop as events arrive, and removed when
//! the wallet disconnects or rejects the handshake.

use serde::{Deserialize, Serialize};

use crate::event::WalletEvent;

/// Session key material bound to a bridge.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Session private key, hex.
    pub private_key: String,
    /// Bridge URL the session is registered with.
    pub bridge_url: String,
    /// Wallet public key, hex. Absent until the handshake completes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wallet_key: Option<String>,
}

/// Persisted connection record for one app.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    /// App name the record belongs to.
    pub source: String,
    /// Session key material. `None` only in corrupt records.
    #[serde(default)]
    pub session: Option<Session>,
    /// The connect-success event, once observed. Its presence is the
    /// "connected" flag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_event: Option<WalletEvent>,
    /// Id of the last wallet-originated event applied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_wallet_event_id: Option<u64>,
    /// Id of the last RPC response observed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_rpc_event_id: Option<String>,
    /// Next outgoing RPC request id. Strictly increasing, never reused,
    /// survives restores because the counter is persisted.
    #[serde(default)]
    pub next_rpc_request_id: u64,
}

impl Connection {
    /// Create a fresh record for a newly registered session.
    #[must_use]
    pub fn new(source: impl Into<String>, session: Session) -> Self {
        Self {
            source: source.into(),
            session: Some(session),
            connect_event: None,
            last_wallet_event_id: None,
            last_rpc_event_id: None,
            next_rpc_request_id: 0,
        }
    }

    /// Whether the wallet completed the handshake.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connect_event.is_some()
    }

    /// Take the next RPC request id, advancing the counter.
    pub fn take_rpc_request_id(&mut self) -> String {
        let id = self.next_rpc_request_id;
        self.next_rpc_request_id += 1;
        id.to_string()
    }
}
