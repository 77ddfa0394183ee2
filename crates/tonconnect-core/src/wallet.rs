//! Wallet descriptors from the wallets directory.
//!
//! Entries are sourced from the TON wallets-list JSON and are immutable once
//! fetched. The connector only needs the SSE bridge URL, the universal URL,
//! and the filterable metadata (app name, display name, DNS, platforms).

use serde::{Deserialize, Serialize};

/// Bridge endpoint advertised by a wallet.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeEndpoint {
    /// Endpoint type (`sse` or `js`).
    #[serde(rename = "type")]
    pub kind: String,
    /// Bridge base URL. Absent for `js` injected bridges.
    #[serde(default)]
    pub url: Option<String>,
}

/// Static descriptor of a wallet application.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WalletApp {
    /// Stable identifier, e.g. `tonkeeper`.
    pub app_name: String,
    /// Human-readable display name.
    pub name: String,
    /// Wallet icon URL.
    #[serde(default)]
    pub image: Option<String>,
    /// About page URL.
    #[serde(default)]
    pub about_url: Option<String>,
    /// Universal link base used to build connect URLs.
    #[serde(default)]
    pub universal_url: Option<String>,
    /// Advertised bridge endpoints.
    #[serde(default)]
    pub bridge: Vec<BridgeEndpoint>,
    /// Supported platforms (`ios`, `android`, `chrome`, ...).
    #[serde(default)]
    pub platforms: Vec<String>,
    /// TON DNS name, if the wallet registered one.
    #[serde(default)]
    pub dns: Option<String>,
}

impl WalletApp {
    /// URL of the wallet's SSE bridge, if it advertises one.
    #[must_use]
    pub fn bridge_url(&self) -> Option<&str> {
        self.bridge
            .iter()
            .find(|b| b.kind == "sse")
            .and_then(|b| b.url.as_deref())
    }

    /// Whether this wallet can be driven by the connector.
    ///
    /// Requires an SSE bridge and a universal link.
    #[must_use]
    pub fn is_supported(&self) -> bool {
        self.bridge_url().is_some() && self.universal_url.is_some()
    }
}
