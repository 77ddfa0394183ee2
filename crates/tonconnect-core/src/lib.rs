//! # tonconnect-core
//!
//! Foundation types for the TON Connect client connector.
//!
//! This crate provides the shared vocabulary that the storage, bridge, and
//! connector crates depend on:
//!
//! - **Wallet descriptors**: [`WalletApp`] entries from the wallets directory
//! - **App requests**: [`ConnectRequest`] handshake and [`AppRequest`] RPC calls
//! - **Wallet events**: [`WalletEvent`] (connect, connect error, disconnect)
//!   and [`RpcResponse`] correlated replies
//! - **Persisted state**: [`Session`] key material and the per-app
//!   [`Connection`] record
//! - **Queue envelope**: [`BridgeMessage`] as delivered by bridge sessions

#![deny(unsafe_code)]

pub mod connection;
pub mod event;
pub mod request;
pub mod wallet;

pub use connection::{Connection, Session};
pub use event::{
    BridgeEvent, BridgeMessage, ConnectItem, ConnectPayload, ErrorPayload, RpcResponse,
    TonAddressItem, WalletEvent, WalletEventName,
};
pub use request::{AppMethod, AppRequest, ConnectRequest, ConnectRequestItem, TonProofRequest};
pub use wallet::{BridgeEndpoint, WalletApp};
