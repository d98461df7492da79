// src/cache.rs
//! In-memory TTL cache used by the market adapters.
//!
//! Entries are stamped with epoch milliseconds on insert. An entry is fresh iff
//! `now - timestamp < ttl` (absolute TTL, no sliding refresh). Expired entries
//! are kept so callers can serve them as a degraded result when the upstream
//! call fails.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Source of "now" in epoch milliseconds.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Hand-driven clock for tests and replay tooling.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now: AtomicI64::new(start_ms),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(by.as_millis() as i64, Ordering::SeqCst);
    }

    pub fn set(&self, ms: i64) {
        self.now.store(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

pub type SharedClock = Arc<dyn Clock>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheEntry<T> {
    pub data: T,
    pub timestamp: i64,
}

impl<T> CacheEntry<T> {
    pub fn is_fresh(&self, now_ms: i64, ttl: Duration) -> bool {
        now_ms.saturating_sub(self.timestamp) < ttl.as_millis() as i64
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CacheStats {
    pub size: usize,
    pub keys: Vec<String>,
}

/// Keyed TTL cache. The map sits behind a `Mutex`: tokio may poll adapter
/// futures from several worker threads.
#[derive(Debug)]
pub struct TtlCache<T> {
    ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry<T>>>,
}

impl<T: Clone> TtlCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the value only if the entry is fresh at `now_ms`.
    pub fn get_fresh(&self, key: &str, now_ms: i64) -> Option<T> {
        let guard = self.lock();
        guard
            .get(key)
            .filter(|e| e.is_fresh(now_ms, self.ttl))
            .map(|e| e.data.clone())
    }

    /// Returns the value regardless of age.
    pub fn get_any(&self, key: &str) -> Option<T> {
        self.lock().get(key).map(|e| e.data.clone())
    }

    pub fn insert(&self, key: impl Into<String>, data: T, now_ms: i64) {
        self.lock().insert(
            key.into(),
            CacheEntry {
                data,
                timestamp: now_ms,
            },
        );
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn stats(&self) -> CacheStats {
        let guard = self.lock();
        let mut keys: Vec<String> = guard.keys().cloned().collect();
        keys.sort();
        CacheStats {
            size: keys.len(),
            keys,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CacheEntry<T>>> {
        // A panic while holding the lock leaves the map itself intact.
        match self.entries.lock() {
            Ok(g) => g,
            Err(poison) => poison.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTINGS_TTL: Duration = Duration::from_secs(5 * 60);
    const BOOK_TTL: Duration = Duration::from_secs(30);

    #[test]
    fn freshness_is_strictly_less_than_ttl() {
        let e = CacheEntry {
            data: 1u8,
            timestamp: 1_000,
        };
        assert!(e.is_fresh(1_000, BOOK_TTL));
        assert!(e.is_fresh(1_000 + 29_999, BOOK_TTL));
        assert!(!e.is_fresh(1_000 + 30_000, BOOK_TTL));
    }

    #[test]
    fn two_ttls_are_honored_independently() {
        let listings: TtlCache<&str> = TtlCache::new(LISTINGS_TTL);
        let books: TtlCache<&str> = TtlCache::new(BOOK_TTL);
        listings.insert("markets", "l", 0);
        books.insert("orderbook_FED", "b", 0);

        // 45s later: order book stale, listings still fresh
        let t = 45_000;
        assert_eq!(listings.get_fresh("markets", t), Some("l"));
        assert_eq!(books.get_fresh("orderbook_FED", t), None);
        // stale value is still reachable for degraded reads
        assert_eq!(books.get_any("orderbook_FED"), Some("b"));

        // 5 minutes later: both stale
        let t = 300_000;
        assert_eq!(listings.get_fresh("markets", t), None);
    }

    #[test]
    fn stats_and_clear() {
        let c: TtlCache<u32> = TtlCache::new(LISTINGS_TTL);
        c.insert("b", 2, 0);
        c.insert("a", 1, 0);
        let s = c.stats();
        assert_eq!(s.size, 2);
        assert_eq!(s.keys, vec!["a".to_string(), "b".to_string()]);
        c.clear();
        assert_eq!(c.stats().size, 0);
    }

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new(10);
        clock.advance(Duration::from_millis(15));
        assert_eq!(clock.now_ms(), 25);
    }
}
