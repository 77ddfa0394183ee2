//! Wallet directory cache.
//!
//! An explicit process-wide cache over the wallets-list JSON endpoint. Own
//! one [`WalletDirectory`] per process, share it where needed, and drop it to
//! tear the cache down; there is no hidden global state.

use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::debug;

use tonconnect_core::WalletApp;

use crate::errors::ConnectorResult;

/// Published list of TON wallets.
pub const WALLETS_URL: &str =
    "https://raw.githubusercontent.com/ton-blockchain/wallets-list/main/wallets-v2.json";

/// How long a fetched directory stays fresh.
pub const WALLETS_CACHE_TTL: Duration = Duration::from_secs(10 * 60);

/// Filters applied to the wallet list.
#[derive(Clone, Debug)]
pub struct WalletsFilter {
    /// Keep wallets whose `app_name` is listed.
    pub app_names: Option<Vec<String>>,
    /// Keep wallets whose display name is listed.
    pub names: Option<Vec<String>>,
    /// Keep wallets whose TON DNS name is listed.
    pub ton_dns: Option<Vec<String>>,
    /// Keep wallets supporting at least one listed platform.
    pub platforms: Option<Vec<String>>,
    /// Keep only wallets the connector can drive (SSE bridge + universal link).
    pub only_supported: bool,
}

impl Default for WalletsFilter {
    fn default() -> Self {
        Self {
            app_names: None,
            names: None,
            ton_dns: None,
            platforms: None,
            only_supported: true,
        }
    }
}

impl WalletsFilter {
    fn matches(&self, wallet: &WalletApp) -> bool {
        if let Some(names) = &self.names {
            if !names.iter().any(|n| n == &wallet.name) {
                return false;
            }
        }
        if let Some(platforms) = &self.platforms {
            if !wallet.platforms.iter().any(|p| platforms.contains(p)) {
                return false;
            }
        }
        if self.only_supported && !wallet.is_supported() {
            return false;
        }
        if let Some(app_names) = &self.app_names {
            if !app_names.iter().any(|n| n == &wallet.app_name) {
                return false;
            }
        }
        if let Some(ton_dns) = &self.ton_dns {
            match &wallet.dns {
                Some(dns) => {
                    if !ton_dns.iter().any(|d| d == dns) {
                        return false;
                    }
                }
                None => return false,
            }
        }
        true
    }
}

struct CacheEntry {
    fetched_at: Instant,
    wallets: Vec<WalletApp>,
}

/// TTL-cached view of the wallets directory.
pub struct WalletDirectory {
    url: String,
    ttl: Duration,
    client: reqwest::Client,
    cache: RwLock<Option<CacheEntry>>,
}

impl Default for WalletDirectory {
    fn default() -> Self {
        Self::new(WALLETS_URL, WALLETS_CACHE_TTL)
    }
}

impl WalletDirectory {
    /// Create a directory over a custom endpoint and TTL.
    #[must_use]
    pub fn new(url: impl Into<String>, ttl: Duration) -> Self {
        Self {
            url: url.into(),
            ttl,
            client: reqwest::Client::new(),
            cache: RwLock::new(None),
        }
    }

    /// List wallets matching the filter, refreshing the cache when stale.
    pub async fn get_wallets(&self, filter: &WalletsFilter) -> ConnectorResult<Vec<WalletApp>> {
        let wallets = self.cached_wallets().await?;
        Ok(wallets.into_iter().filter(|w| filter.matches(w)).collect())
    }

    /// Drop the cached list; the next call refetches.
    pub async fn invalidate(&self) {
        let mut cache = self.cache.write().await;
        *cache = None;
    }

    async fn cached_wallets(&self) -> ConnectorResult<Vec<WalletApp>> {
        {
            let cache = self.cache.read().await;
            if let Some(entry) = cache.as_ref() {
                if entry.fetched_at.elapsed() < self.ttl {
                    return Ok(entry.wallets.clone());
                }
            }
        }

        let mut cache = self.cache.write().await;
        // Another caller may have refreshed while we waited for the lock.
        if let Some(entry) = cache.as_ref() {
            if entry.fetched_at.elapsed() < self.ttl {
                return Ok(entry.wallets.clone());
            }
        }

        debug!(url = %self.url, "refreshing wallet directory");
        let wallets: Vec<WalletApp> = self
            .client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        *cache = Some(CacheEntry {
            fetched_at: Instant::now(),
            wallets: wallets.clone(),
        });
        Ok(wallets)
    }
}
