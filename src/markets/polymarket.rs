// src/markets/polymarket.rs
//! Polymarket Gamma API adapter.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::{
    cached_fetch, filter_by_category, first_positive, num, text, FilterOptions, MarketListing,
    MarketSource, Platform, SharedTransport,
};
use crate::cache::{CacheStats, SharedClock, SystemClock, TtlCache};
use crate::categories;
use crate::error::FetchError;

pub const DEFAULT_BASE_URL: &str = "https://gamma-api.polymarket.com";
pub const LISTINGS_TTL: Duration = Duration::from_secs(5 * 60);

const DEFAULT_QUERY: &[(&str, &str)] = &[
    ("limit", "20"),
    ("offset", "0"),
    ("active", "true"),
    ("closed", "false"),
    ("order", "volume24hr"),
    ("ascending", "false"),
];
const PLATFORM: Platform = Platform::Polymarket;

pub struct PolymarketClient {
    base_url: String,
    transport: SharedTransport,
    clock: SharedClock,
    listings: TtlCache<Vec<MarketListing>>,
    details: TtlCache<MarketListing>,
}

impl PolymarketClient {
    pub fn new(transport: SharedTransport) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            transport,
            clock: Arc::new(SystemClock),
            listings: TtlCache::new(LISTINGS_TTL),
            details: TtlCache::new(LISTINGS_TTL),
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

    /// Raw Gamma market → listing. `None` when the market has neither id nor slug.
    pub fn normalize(raw: &Value) -> Option<MarketListing> {
        let slug = text(raw.get("slug"));
        let id = text(raw.get("id")).or_else(|| slug.clone())?;
        let title = text(raw.get("question"))
            .or_else(|| text(raw.get("title")))
            .unwrap_or_else(|| id.clone());

        let mut listing = MarketListing {
            url: format!(
                "https://polymarket.com/market/{}",
                slug.as_deref().unwrap_or(&id)
            ),
            id,
            title,
            platform: PLATFORM,
            price: first_price(raw).unwrap_or(0.5).clamp(0.0, 1.0),
            volume: first_positive(&[raw.get("volume"), raw.get("volume24hr")]).unwrap_or(0.0),
            category: String::new(),
            end_date: text(raw.get("endDate")).or_else(|| text(raw.get("end_date"))),
            subtitle: None,
            description: text(raw.get("description")),
            ticker: None,
            tags: tags(raw.get("tags")),
            active: raw.get("active").and_then(Value::as_bool) != Some(false),
            liquidity: num(raw.get("liquidity")).unwrap_or(0.0),
        };
        listing.category = categories::shared().detect(&listing.searchable_text());
        Some(listing)
    }

    async fn get(&self, path: &str, query: &[(String, String)]) -> Result<Value, FetchError> {
        let url = format!("{}{}", self.base_url, path);
        self.transport
            .get_json(&url, query, None)
            .await
            .map_err(|e| e.into_fetch(PLATFORM))
    }

    async fn fetch_remote(&self, opts: &FilterOptions) -> Result<Vec<MarketListing>, FetchError> {
        let v = self.get("/markets", &opts.query_pairs(DEFAULT_QUERY)).await?;
        // Gamma answers with a bare array; some deployments wrap it
        let arr = match &v {
            Value::Array(a) => a,
            Value::Object(o) => match o.get("markets").or_else(|| o.get("data")) {
                Some(Value::Array(a)) => a,
                _ => return Err(FetchError::parse(PLATFORM.name(), "expected an array of markets")),
            },
            _ => return Err(FetchError::parse(PLATFORM.name(), "expected an array of markets")),
        };
        Ok(arr.iter().filter_map(Self::normalize).collect())
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

/// `outcomePrices` (JSON-encoded string or array), then `outcomes[0].price`,
/// then `prices[0].price`.
fn first_price(raw: &Value) -> Option<f64> {
    if let Some(op) = raw.get("outcomePrices") {
        let parsed;
        let arr = match op {
            Value::String(s) => {
                parsed = serde_json::from_str::<Value>(s).ok();
                parsed.as_ref().and_then(Value::as_array)
            }
            Value::Array(a) => Some(a),
            _ => None,
        };
        if let Some(p) = arr.and_then(|a| num(a.first())) {
            return Some(p);
        }
    }
    ["outcomes", "prices"].iter().find_map(|k| {
        let first = raw.get(*k)?.as_array()?.first()?;
        num(first.get("price"))
    })
}

fn tags(v: Option<&Value>) -> Vec<String> {
    let Some(Value::Array(items)) = v else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|t| match t {
            Value::String(s) => Some(s.clone()),
            Value::Object(o) => text(o.get("label")).or_else(|| text(o.get("name"))),
            _ => None,
        })
        .collect()
}

#[async_trait]
impl MarketSource for PolymarketClient {
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
                Self::normalize(&v)
                    .ok_or_else(|| FetchError::parse(PLATFORM.name(), "market without id"))
            },
        )
        .await
    }

    async fn trending(&self) -> Result<Vec<MarketListing>, FetchError> {
        let opts = FilterOptions::default()
            .with_limit(10)
            .with_param("order", "volume24hr")
            .with_param("ascending", false);
        self.fetch_listings(&opts).await
    }

    async fn listings_by_category(&self, category: &str) -> Result<Vec<MarketListing>, FetchError> {
        let all = self
            .fetch_listings(&FilterOptions::default().with_limit(100))
            .await?;
        Ok(filter_by_category(all, category))
    }

    async fn refresh(&self) -> Result<Vec<MarketListing>, FetchError> {
        self.listings(&FilterOptions::default(), true).await
    }

    fn clear_cache(&self) {
        self.listings.clear();
        self.details.clear();
    }

    fn cache_stats(&self) -> CacheStats {
        let mut keys = self.listings.stats().keys;
        keys.extend(self.details.stats().keys);
        keys.sort();
        CacheStats {
            size: keys.len(),
            keys,
        }
    }
}
