//! # tonconnect
//!
//! TON Connect client connector.
//!
//! The [`TonConnect`] façade manages the full lifecycle of wallet
//! connections over SSE bridges:
//!
//! - **Lifecycle**: [`TonConnect::connect`] / [`TonConnect::restore_connection`]
//!   create or resume one encrypted bridge session per wallet app
//! - **Dispatch**: a single lazily started loop drains the shared queue fed
//!   by all sessions and advances persisted [`Connection`] state
//! - **Correlation**: [`TonConnect::send`] assigns monotonic request ids and
//!   awaits the matching wallet response with a fixed time-to-live
//! - **Listeners**: [`TonConnect::listen`] registers one handler per wallet
//!   event kind (connect, connect error, disconnect)
//! - **Directory**: [`WalletDirectory`] is a TTL-cached view of the
//!   published wallets list
//!
//! ```no_run
//! use std::sync::Arc;
//! use tonconnect::{TonConnect, WalletDirectory, WalletsFilter};
//! use tonconnect_storage::MemoryStorage;
//!
//! # async fn example() -> Result<(), tonconnect::ConnectorError> {
//! let connector = TonConnect::new(
//!     "https://app.example/tonconnect-manifest.json",
//!     Arc::new(MemoryStorage::new()),
//! );
//!
//! let directory = WalletDirectory::default();
//! let wallets = directory.get_wallets(&WalletsFilter::default()).await?;
//! let url = connector.connect(&wallets[0], None).await?;
//! // Present `url` to the user as a QR code or deep link.
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]

pub mod connector;
pub mod errors;
pub mod wallets;

pub use connector::{EventListener, TonConnect};
pub use errors::{ConnectorError, ConnectorResult};
pub use wallets::{WALLETS_CACHE_TTL, WALLETS_URL, WalletDirectory, WalletsFilter};

pub use tonconnect_core::{
    AppMethod, AppRequest, BridgeEvent, BridgeMessage, ConnectRequest, Connection, RpcResponse,
    Session, TonProofRequest, WalletApp, WalletEvent, WalletEventName,
};
