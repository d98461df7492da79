// src/markets/kalshi.rs
//! Kalshi trade API v2 adapter.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use super::{
    cached_fetch, filter_by_category, first_positive, num, text, FilterOptions, MarketListing,
    MarketSource, Platform, SharedTransport,
};
use crate::cache::{CacheStats, SharedClock, SystemClock, TtlCache};
use crate::categories;
use crate::error::FetchError;

pub const DEFAULT_BASE_URL: &str = "https://trading-api.kalshi.com/trade-api/v2";
pub const LISTINGS_TTL: Duration = Duration::from_secs(5 * 60);
pub const ORDERBOOK_TTL: Duration = Duration::from_secs(30);

const DEFAULT_QUERY: &[(&str, &str)] = &[("limit", "100"), ("status", "open")];
const PLATFORM: Platform = Platform::Kalshi;

/// Resting orders as `[price, quantity]` levels per side.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct OrderBook {
    pub yes: Vec<[f64; 2]>,
    pub no: Vec<[f64; 2]>,
}

impl OrderBook {
    fn from_response(v: &Value) -> Self {
        let book = v.get("orderbook").unwrap_or(v);
        Self {
            yes: levels(book.get("yes")),
            no: levels(book.get("no")),
        }
    }
}

fn levels(v: Option<&Value>) -> Vec<[f64; 2]> {
    v.and_then(Value::as_array)
        .map(|rows| {
            rows.iter()
                .filter_map(|r| {
                    let r = r.as_array()?;
                    Some([num(r.first())?, num(r.get(1))?])
                })
                .collect()
        })
        .unwrap_or_default()
}

pub struct KalshiClient {
    base_url: String,
    transport: SharedTransport,
    clock: SharedClock,
    listings: TtlCache<Vec<MarketListing>>,
    details: TtlCache<MarketListing>,
    books: TtlCache<OrderBook>,
    token: Mutex<Option<String>>,
}

impl KalshiClient {
    pub fn new(transport: SharedTransport) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            transport,
            clock: Arc::new(SystemClock),
            listings: TtlCache::new(LISTINGS_TTL),
            details: TtlCache::new(LISTINGS_TTL),
            books: TtlCache::new(ORDERBOOK_TTL),
            token: Mutex::new(None),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn is_authenticated(&self) -> bool {
        self.bearer().is_some()
    }

    /// Logs in and keeps the returned token for subsequent requests.
    pub async fn authenticate(&self, email: &str, password: &str) -> Result<(), FetchError> {
        let url = format!("{}/login", self.base_url);
        let body = json!({ "email": email, "password": password });
        let resp = self
            .transport
            .post_json(&url, &body)
            .await
            .map_err(|e| e.into_fetch(PLATFORM))?;
        let token = text(resp.get("token"))
            .ok_or_else(|| FetchError::parse(PLATFORM.name(), "login response without token"))?;
        *self.lock_token() = Some(token);
        info!(target: "markets", platform = %PLATFORM, "authenticated");
        Ok(())
    }

    /// Order book for `ticker`, cached for 30 seconds.
    pub async fn orderbook(&self, ticker: &str) -> Result<OrderBook, FetchError> {
        let key = format!("orderbook:{ticker}");
        cached_fetch(
            &self.books,
            &key,
            || self.clock.now_ms(),
            PLATFORM,
            false,
            || async {
                let v = self.get(&format!("/markets/{ticker}/orderbook"), &[]).await?;
                Ok(OrderBook::from_response(&v))
            },
        )
        .await
    }

    /// Raw vendor market → listing. `None` when the market has no ticker.
    pub fn normalize(raw: &Value) -> Option<MarketListing> {
        let ticker = text(raw.get("ticker"))?;
        let title = text(raw.get("title")).unwrap_or_else(|| ticker.clone());

        let price = yes_probability(raw).unwrap_or(0.5).clamp(0.0, 1.0);

        let status = raw.get("status").and_then(Value::as_str).unwrap_or("open");

        let mut listing = MarketListing {
            id: ticker.clone(),
            url: format!("https://kalshi.com/markets/{ticker}"),
            title,
            platform: PLATFORM,
            price,
            volume: first_positive(&[raw.get("volume"), raw.get("volume_24h")]).unwrap_or(0.0),
            category: String::new(),
            end_date: text(raw.get("close_time")),
            subtitle: text(raw.get("subtitle")),
            description: None,
            ticker: Some(ticker),
            tags: Vec::new(),
            active: matches!(status, "open" | "active"),
            liquidity: num(raw.get("open_interest")).unwrap_or(0.0),
        };
        listing.category = categories::shared().detect(&listing.searchable_text());
        Some(listing)
    }

    fn bearer(&self) -> Option<String> {
        self.lock_token().clone()
    }

    fn lock_token(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        match self.token.lock() {
            Ok(g) => g,
            Err(poison) => poison.into_inner(),
        }
    }

    async fn get(&self, path: &str, query: &[(String, String)]) -> Result<Value, FetchError> {
        let url = format!("{}{}", self.base_url, path);
        let bearer = self.bearer();
        self.transport
            .get_json(&url, query, bearer.as_deref())
            .await
            .map_err(|e| e.into_fetch(PLATFORM))
    }

    async fn fetch_remote(&self, opts: &FilterOptions) -> Result<Vec<MarketListing>, FetchError> {
        let v = self.get("/markets", &opts.query_pairs(DEFAULT_QUERY)).await?;
        let markets = match v.get("markets") {
            None | Some(Value::Null) => return Ok(Vec::new()),
            Some(Value::Array(a)) => a,
            Some(_) => {
                return Err(FetchError::parse(PLATFORM.name(), "`markets` is not an array"))
            }
        };
        let out: Vec<MarketListing> = markets.iter().filter_map(Self::normalize).collect();
        if out.len() < markets.len() {
            warn!(target: "markets", platform = %PLATFORM, skipped = markets.len() - out.len(), "markets without ticker");
        }
        Ok(out)
    }

    async fn listings(&self, opts: &FilterOptions, force: bool) -> Result<Vec<MarketListing>, FetchError> {
        let key = opts.cache_key("markets");
        cached_fetch(
            &self.listings,
            &key,
            || self.clock.now_ms(),
            PLATFORM,
            force,
            || self.fetch_remote(opts),
        )
        .await
    }
}

#[async_trait]
impl MarketSource for KalshiClient {
    fn platform(&self) -> Platform {
        PLATFORM
    }

    async fn fetch_listings(&self, opts: &FilterOptions) -> Result<Vec<MarketListing>, FetchError> {
        self.listings(opts, false).await
    }

    async fn get_listing(&self, id: &str) -> Result<MarketListing, FetchError> {
        let key = format!("market:{id}");
        cached_fetch(
            &self.details,
            &key,
            || self.clock.now_ms(),
            PLATFORM,
            false,
            || async {
                let v = self.get(&format!("/markets/{id}"), &[]).await?;
                v.get("market")
                    .and_then(Self::normalize)
                    .ok_or_else(|| FetchError::parse(PLATFORM.name(), "response without `market`"))
            },
        )
        .await
    }

    async fn trending(&self) -> Result<Vec<MarketListing>, FetchError> {
        self.fetch_listings(&FilterOptions::default().with_limit(20).with_status("open"))
            .await
    }

    async fn listings_by_category(&self, category: &str) -> Result<Vec<MarketListing>, FetchError> {
        let all = self
            .fetch_listings(&FilterOptions::default().with_limit(200))
            .await?;
        Ok(filter_by_category(all, category))
    }

    async fn refresh(&self) -> Result<Vec<MarketListing>, FetchError> {
        self.listings(&FilterOptions::default(), true).await
    }

    fn clear_cache(&self) {
        self.listings.clear();
        self.details.clear();
        self.books.clear();
    }

    fn cache_stats(&self) -> CacheStats {
        let mut keys = self.listings.stats().keys;
        keys.extend(self.details.stats().keys);
        keys.extend(self.books.stats().keys);
        keys.sort();
        CacheStats {
            size: keys.len(),
            keys,
        }
    }
}

/// Yes price as a probability. `*_dollars` fields are dollar amounts; the
/// plain v2 fields are integer cents. A fractional plain value is already a
/// probability (older payloads and the offline fixtures).
fn yes_probability(raw: &Value) -> Option<f64> {
    if let Some(p) = first_positive(&[raw.get("last_price_dollars"), raw.get("yes_price_dollars")]) {
        return Some(p);
    }
    ["last_price", "yes_price"].iter().find_map(|key| {
        let v = raw.get(*key)?;
        let p = num(Some(v)).filter(|p| *p > 0.0)?;
        let cents = v.as_u64().is_some() || p > 1.0;
        Some(if cents { p / 100.0 } else { p })
    })
}
