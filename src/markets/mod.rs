// src/markets/mod.rs
//! Prediction-market adapters (Polymarket, Kalshi).
//!
//! Each adapter fetches raw vendor JSON through a [`Transport`], normalizes it
//! into [`MarketListing`], and caches per request key with an absolute TTL.
//! On a failed fetch a cached entry for the same key is served even if expired;
//! with nothing cached the [`FetchError`] propagates.

pub mod fixtures;
pub mod kalshi;
pub mod polymarket;
pub mod transport;

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::cache::{CacheStats, TtlCache};
use crate::categories;
use crate::error::FetchError;

pub use kalshi::{KalshiClient, OrderBook};
pub use polymarket::PolymarketClient;
pub use transport::{FixtureTransport, HttpTransport, SharedTransport, Transport, TransportError};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Platform {
    Polymarket,
    Kalshi,
}

impl Platform {
    /// Merge order used by the matcher.
    pub const ALL: [Platform; 2] = [Platform::Polymarket, Platform::Kalshi];

    pub fn slug(self) -> &'static str {
        match self {
            Platform::Polymarket => "polymarket",
            Platform::Kalshi => "kalshi",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Platform::Polymarket => "Polymarket",
            Platform::Kalshi => "Kalshi",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Vendor listing normalized to a common shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MarketListing {
    pub id: String,
    pub title: String,
    pub platform: Platform,
    pub url: String,
    /// Implied probability in [0, 1].
    pub price: f64,
    pub volume: f64,
    pub category: String,
    pub end_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticker: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub liquidity: f64,
}

fn default_active() -> bool {
    true
}

impl MarketListing {
    /// Title, subtitle/description, ticker and tags joined by spaces, lowercased.
    pub fn searchable_text(&self) -> String {
        let mut parts: Vec<&str> = vec![self.title.as_str()];
        if let Some(s) = self.subtitle.as_deref() {
            parts.push(s);
        }
        if let Some(s) = self.description.as_deref() {
            parts.push(s);
        }
        if let Some(s) = self.ticker.as_deref() {
            parts.push(s);
        }
        parts.extend(self.tags.iter().map(String::as_str));
        parts.join(" ").to_lowercase()
    }
}

/// Query options for listing fetches. Unset fields take the platform defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FilterOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Vendor-specific parameters passed through as-is (e.g. `order`, `cursor`).
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl FilterOptions {
    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// `method:` + JSON of the options. Field order is fixed and `extra` is a
    /// BTreeMap, so equal options always produce equal keys.
    pub fn cache_key(&self, method: &str) -> String {
        let json = serde_json::to_string(self).unwrap_or_default();
        format!("{method}:{json}")
    }

    /// Query pairs: `defaults` first, overridden by whatever is set here.
    pub(crate) fn query_pairs(&self, defaults: &[(&str, &str)]) -> Vec<(String, String)> {
        let mut merged: BTreeMap<String, String> = defaults
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        if let Some(l) = self.limit {
            merged.insert("limit".into(), l.to_string());
        }
        if let Some(o) = self.offset {
            merged.insert("offset".into(), o.to_string());
        }
        if let Some(s) = &self.status {
            merged.insert("status".into(), s.clone());
        }
        for (k, v) in &self.extra {
            let s = match v {
                Value::String(s) => s.clone(),
                Value::Null => continue,
                other => other.to_string(),
            };
            merged.insert(k.clone(), s);
        }
        merged.into_iter().collect()
    }
}

#[async_trait]
pub trait MarketSource: Send + Sync {
    fn platform(&self) -> Platform;

    async fn fetch_listings(&self, opts: &FilterOptions) -> Result<Vec<MarketListing>, FetchError>;

    async fn get_listing(&self, id: &str) -> Result<MarketListing, FetchError>;

    /// Fetches with `opts` and filters by `query`. Queries shorter than two
    /// characters return everything fetched.
    async fn search(
        &self,
        query: &str,
        opts: &FilterOptions,
    ) -> Result<Vec<MarketListing>, FetchError> {
        let all = self.fetch_listings(opts).await?;
        Ok(filter_by_query(all, query))
    }

    fn detect_category(&self, listing: &MarketListing) -> String {
        categories::shared().detect(&listing.searchable_text())
    }

    /// Highest-volume open listings.
    async fn trending(&self) -> Result<Vec<MarketListing>, FetchError>;

    async fn listings_by_category(&self, category: &str)
        -> Result<Vec<MarketListing>, FetchError>;

    /// Re-fetches the default listing set, bypassing freshness.
    async fn refresh(&self) -> Result<Vec<MarketListing>, FetchError>;

    fn clear_cache(&self);

    fn cache_stats(&self) -> CacheStats;
}

pub fn filter_by_query(listings: Vec<MarketListing>, query: &str) -> Vec<MarketListing> {
    if query.chars().count() < 2 {
        return listings;
    }
    let q = query.to_lowercase();
    listings
        .into_iter()
        .filter(|l| l.searchable_text().contains(&q))
        .collect()
}

pub fn filter_by_category(listings: Vec<MarketListing>, category: &str) -> Vec<MarketListing> {
    if category.trim().is_empty() {
        return listings;
    }
    let table = categories::shared();
    listings
        .into_iter()
        .filter(|l| table.matches_category(&l.searchable_text(), category))
        .collect()
}

/// Lookup-before-fetch with stale fallback.
///
/// * fresh entry and `!force` → served without I/O
/// * fetch ok → cached under `now_ms()` taken after the call
/// * fetch err → any cached entry, else the error
pub(crate) async fn cached_fetch<T, F, Fut>(
    cache: &TtlCache<T>,
    key: &str,
    now_ms: impl Fn() -> i64,
    platform: Platform,
    force: bool,
    fetch: F,
) -> Result<T, FetchError>
where
    T: Clone,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    if !force {
        if let Some(hit) = cache.get_fresh(key, now_ms()) {
            debug!(target: "markets", platform = %platform, key, "cache hit");
            crate::metrics::record_cache_lookup(platform, true);
            return Ok(hit);
        }
    }
    crate::metrics::record_cache_lookup(platform, false);

    match fetch().await {
        Ok(v) => {
            cache.insert(key, v.clone(), now_ms());
            crate::metrics::record_fetch(platform, "ok");
            Ok(v)
        }
        Err(e) => {
            if let Some(stale) = cache.get_any(key) {
                warn!(target: "markets", platform = %platform, key, error = %e, "fetch failed, serving stale cache");
                crate::metrics::record_fetch(platform, "stale");
                Ok(stale)
            } else {
                warn!(target: "markets", platform = %platform, key, error = %e, "fetch failed, nothing cached");
                crate::metrics::record_fetch(platform, "error");
                Err(e)
            }
        }
    }
}

// --- JSON helpers shared by the normalizers ---

/// Number or numeric string.
pub(crate) fn num(v: Option<&Value>) -> Option<f64> {
    match v? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// First value that is a number (or numeric string) greater than zero.
pub(crate) fn first_positive(vals: &[Option<&Value>]) -> Option<f64> {
    vals.iter().filter_map(|v| num(*v)).find(|n| *n > 0.0)
}

pub(crate) fn text(v: Option<&Value>) -> Option<String> {
    match v? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
