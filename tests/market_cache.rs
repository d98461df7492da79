// tests/market_cache.rs
//
// Adapter caching against a counting, switchable transport:
// - repeated fetches inside the TTL hit the network once
// - expired entries are served when the vendor is down
// - with nothing cached the vendor error propagates
// - the Kalshi order book has its own, shorter TTL

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use bet_scraper::cache::ManualClock;
use bet_scraper::markets::{
    FilterOptions, FixtureTransport, KalshiClient, MarketSource, Platform, PolymarketClient,
    Transport, TransportError,
};
use bet_scraper::FetchError;

struct Counting {
    inner: FixtureTransport,
    calls: AtomicUsize,
    down: AtomicBool,
}

impl Counting {
    fn new(platform: Platform) -> Arc<Self> {
        Arc::new(Self {
            inner: FixtureTransport::new(platform),
            calls: AtomicUsize::new(0),
            down: AtomicBool::new(false),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for Counting {
    async fn get_json(
        &self,
        url: &str,
        query: &[(String, String)],
        bearer: Option<&str>,
    ) -> Result<Value, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.down.load(Ordering::SeqCst) {
            return Err(TransportError::Status(503));
        }
        self.inner.get_json(url, query, bearer).await
    }

    async fn post_json(&self, url: &str, body: &Value) -> Result<Value, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.post_json(url, body).await
    }
}

#[tokio::test]
async fn listings_are_fetched_once_within_ttl() {
    let transport = Counting::new(Platform::Kalshi);
    let clock = Arc::new(ManualClock::new(1_000_000));
    let kalshi = KalshiClient::new(transport.clone()).with_clock(clock.clone());

    let opts = FilterOptions::default();
    let first = kalshi.fetch_listings(&opts).await.expect("first fetch");
    assert_eq!(first.len(), 3);

    clock.advance(Duration::from_secs(60));
    let second = kalshi.fetch_listings(&opts).await.expect("cached fetch");
    assert_eq!(first, second);
    assert_eq!(transport.calls(), 1, "second call must be served from cache");

    // a different key is a different entry
    kalshi
        .fetch_listings(&opts.clone().with_limit(5))
        .await
        .expect("other key");
    assert_eq!(transport.calls(), 2);

    // past 5 minutes the entry is stale and refetched
    clock.advance(Duration::from_secs(5 * 60));
    kalshi.fetch_listings(&opts).await.expect("refetch");
    assert_eq!(transport.calls(), 3);
}

#[tokio::test]
async fn stale_entry_is_served_when_vendor_fails() {
    let transport = Counting::new(Platform::Polymarket);
    let clock = Arc::new(ManualClock::new(0));
    let poly = PolymarketClient::new(transport.clone()).with_clock(clock.clone());

    let opts = FilterOptions::default();
    let fresh = poly.fetch_listings(&opts).await.expect("warm cache");
    assert_eq!(fresh.len(), 3);

    clock.advance(Duration::from_secs(60 * 60));
    transport.set_down(true);
    let stale = poly.fetch_listings(&opts).await.expect("stale fallback");
    assert_eq!(stale, fresh);
    assert_eq!(transport.calls(), 2, "expired entry still triggers a fetch attempt");
}

#[tokio::test]
async fn error_propagates_without_cache() {
    let transport = Counting::new(Platform::Kalshi);
    transport.set_down(true);
    let kalshi = KalshiClient::new(transport.clone()).with_clock(Arc::new(ManualClock::new(0)));

    let err = kalshi
        .fetch_listings(&FilterOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err, FetchError::status("Kalshi", 503));
    assert_eq!(err.http_status(), Some(503));
}

#[tokio::test]
async fn refresh_bypasses_freshness() {
    let transport = Counting::new(Platform::Polymarket);
    let poly = PolymarketClient::new(transport.clone()).with_clock(Arc::new(ManualClock::new(0)));

    poly.fetch_listings(&FilterOptions::default()).await.unwrap();
    poly.refresh().await.unwrap();
    assert_eq!(transport.calls(), 2);

    let stats = poly.cache_stats();
    assert_eq!(stats.size, 1);
    poly.clear_cache();
    assert_eq!(poly.cache_stats().size, 0);
}

#[tokio::test]
async fn orderbook_has_short_ttl() {
    let transport = Counting::new(Platform::Kalshi);
    let clock = Arc::new(ManualClock::new(0));
    let kalshi = KalshiClient::new(transport.clone()).with_clock(clock.clone());

    kalshi.orderbook("FED-DEC24").await.expect("book");
    clock.advance(Duration::from_secs(29));
    kalshi.orderbook("FED-DEC24").await.expect("cached book");
    assert_eq!(transport.calls(), 1);

    clock.advance(Duration::from_secs(2));
    kalshi.orderbook("FED-DEC24").await.expect("refetched book");
    assert_eq!(transport.calls(), 2);
}

#[tokio::test]
async fn login_token_is_kept() {
    let transport = Counting::new(Platform::Kalshi);
    let kalshi = KalshiClient::new(transport);
    assert!(!kalshi.is_authenticated());
    kalshi.authenticate("me@example.com", "pw").await.expect("login");
    assert!(kalshi.is_authenticated());
}

#[tokio::test]
async fn search_and_category_views_use_the_cache() {
    let transport = Counting::new(Platform::Kalshi);
    let kalshi = KalshiClient::new(transport.clone()).with_clock(Arc::new(ManualClock::new(0)));

    let hits = kalshi
        .search("recession", &FilterOptions::default())
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].ticker.as_deref(), Some("RECESSION-24"));

    let everything = kalshi.search("r", &FilterOptions::default()).await.unwrap();
    assert_eq!(everything.len(), 3, "one-char query filters nothing");
    assert_eq!(transport.calls(), 1);

    let politics = kalshi.listings_by_category("politics").await.unwrap();
    assert!(politics.iter().all(|l| l.category == "politics"));
    assert!(!politics.is_empty());
}
