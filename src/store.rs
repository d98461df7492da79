// src/store.rs
//! Key-value persistence for settings and results.
//!
//! Two namespaces are used: settings (long-lived user configuration) and
//! results (recommendations per tab, "latest", last error, last analysis,
//! market snapshots). Each namespace is one `KeyValueStore` instance.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::markets::{MarketListing, Platform};
use crate::matcher::Recommendation;

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;
    async fn set(&self, key: &str, value: Value) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;
    async fn snapshot(&self) -> Result<BTreeMap<String, Value>>;
    async fn clear(&self) -> Result<()>;
}

pub type SharedStore = Arc<dyn KeyValueStore>;

/// Process-local store; contents vanish with the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<BTreeMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.inner.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.inner.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.inner.write().await.remove(key);
        Ok(())
    }

    async fn snapshot(&self) -> Result<BTreeMap<String, Value>> {
        Ok(self.inner.read().await.clone())
    }

    async fn clear(&self) -> Result<()> {
        self.inner.write().await.clear();
        Ok(())
    }
}

/// Whole-namespace JSON file. Every write rewrites the file via tmp + rename.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    inner: RwLock<BTreeMap<String, Value>>,
}

impl JsonFileStore {
    /// Opens (or lazily creates) the store at `path`. A missing file is an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let map = if path.exists() {
            let s = fs::read_to_string(&path)
                .with_context(|| format!("reading store {}", path.display()))?;
            if s.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&s)
                    .with_context(|| format!("parsing store {}", path.display()))?
            }
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            path,
            inner: RwLock::new(map),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, map: &BTreeMap<String, Value>) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)
                    .with_context(|| format!("creating store dir {}", dir.display()))?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(map).context("serializing store")?;
        let mut f = fs::File::create(&tmp)
            .with_context(|| format!("creating {}", tmp.display()))?;
        f.write_all(&json)
            .with_context(|| format!("writing {}", tmp.display()))?;
        f.sync_all()
            .with_context(|| format!("syncing {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("replacing {}", self.path.display()))?;
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for JsonFileStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.inner.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut g = self.inner.write().await;
        g.insert(key.to_string(), value);
        self.persist(&g)
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut g = self.inner.write().await;
        if g.remove(key).is_some() {
            self.persist(&g)?;
        }
        Ok(())
    }

    async fn snapshot(&self) -> Result<BTreeMap<String, Value>> {
        Ok(self.inner.read().await.clone())
    }

    async fn clear(&self) -> Result<()> {
        let mut g = self.inner.write().await;
        g.clear();
        self.persist(&g)
    }
}

// ------------------------------------------------------------
// Result namespace
// ------------------------------------------------------------

pub const KEY_LATEST: &str = "latestRecommendations";
pub const KEY_LAST_ERROR: &str = "lastError";
pub const KEY_LAST_ANALYSIS: &str = "lastAnalysis";

fn tab_key(tab_id: Option<u64>) -> String {
    match tab_id {
        Some(id) => format!("recommendations_{id}"),
        None => "recommendations_none".to_string(),
    }
}

fn market_cache_key(platform: Platform) -> String {
    format!("{}Cache", platform.slug())
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoredRecommendations {
    pub recommendations: Vec<Recommendation>,
    pub timestamp: i64,
    pub tab_id: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LastAnalysis {
    pub url: String,
    pub title: String,
    pub timestamp: i64,
    pub recommendation_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LastError {
    pub message: String,
    pub timestamp: i64,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MarketSnapshot {
    pub data: Vec<MarketListing>,
    pub timestamp: i64,
}

/// Typed view over the result namespace.
#[derive(Clone)]
pub struct ResultStore {
    kv: SharedStore,
}

impl ResultStore {
    pub fn new(kv: SharedStore) -> Self {
        Self { kv }
    }

    /// Persists per tab and as the global "latest" slot.
    pub async fn store_recommendations(
        &self,
        tab_id: Option<u64>,
        recommendations: &[Recommendation],
        now_ms: i64,
    ) -> Result<()> {
        let stored = StoredRecommendations {
            recommendations: recommendations.to_vec(),
            timestamp: now_ms,
            tab_id,
        };
        self.put(&tab_key(tab_id), &stored).await?;
        self.put(KEY_LATEST, recommendations).await
    }

    pub async fn latest(&self) -> Result<Vec<Recommendation>> {
        Ok(self.fetch(KEY_LATEST).await?.unwrap_or_default())
    }

    pub async fn for_tab(&self, tab_id: u64) -> Result<Option<StoredRecommendations>> {
        self.fetch(&tab_key(Some(tab_id))).await
    }

    pub async fn set_last_analysis(&self, v: &LastAnalysis) -> Result<()> {
        self.put(KEY_LAST_ANALYSIS, v).await
    }

    pub async fn last_analysis(&self) -> Result<Option<LastAnalysis>> {
        self.fetch(KEY_LAST_ANALYSIS).await
    }

    pub async fn set_last_error(&self, v: &LastError) -> Result<()> {
        self.put(KEY_LAST_ERROR, v).await
    }

    pub async fn last_error(&self) -> Result<Option<LastError>> {
        self.fetch(KEY_LAST_ERROR).await
    }

    pub async fn store_market_snapshot(
        &self,
        platform: Platform,
        data: &[MarketListing],
        now_ms: i64,
    ) -> Result<()> {
        let snap = MarketSnapshot {
            data: data.to_vec(),
            timestamp: now_ms,
        };
        self.put(&market_cache_key(platform), &snap).await
    }

    pub async fn market_snapshot(&self, platform: Platform) -> Result<Option<MarketSnapshot>> {
        self.fetch(&market_cache_key(platform)).await
    }

    /// Drops recommendations (all tabs), last analysis and last error.
    pub async fn clear_recommendations(&self) -> Result<()> {
        let keys: Vec<String> = self
            .kv
            .snapshot()
            .await?
            .into_keys()
            .filter(|k| {
                k.starts_with("recommendations_")
                    || k == KEY_LATEST
                    || k == KEY_LAST_ANALYSIS
                    || k == KEY_LAST_ERROR
            })
            .collect();
        for k in keys {
            self.kv.remove(&k).await?;
        }
        Ok(())
    }

    async fn put<T: Serialize + ?Sized>(&self, key: &str, v: &T) -> Result<()> {
        let value = serde_json::to_value(v).with_context(|| format!("serializing {key}"))?;
        self.kv.set(key, value).await
    }

    async fn fetch<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.kv.get(key).await? {
            Some(v) => Ok(Some(
                serde_json::from_value(v).with_context(|| format!("decoding {key}"))?,
            )),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("nested").join("settings.json");
        {
            let s = JsonFileStore::open(&p).unwrap();
            s.set("enabled", json!(false)).await.unwrap();
            s.set("maxRecommendations", json!(7)).await.unwrap();
        }
        let s = JsonFileStore::open(&p).unwrap();
        assert_eq!(s.get("enabled").await.unwrap(), Some(json!(false)));
        assert_eq!(s.get("maxRecommendations").await.unwrap(), Some(json!(7)));
        assert!(!p.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn failed_write_names_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("results.json");
        // a directory where the temp file should go makes the write fail
        std::fs::create_dir(p.with_extension("json.tmp")).unwrap();
        let s = JsonFileStore::open(&p).unwrap();
        let err = s.set("latest", json!([])).await.unwrap_err();
        assert!(format!("{err:#}").contains("results.json.tmp"), "{err:#}");
        assert!(!p.exists());
    }

    #[tokio::test]
    async fn result_store_writes_tab_and_latest() {
        let rs = ResultStore::new(Arc::new(MemoryStore::new()));
        rs.store_recommendations(Some(4), &[], 1_000).await.unwrap();
        let tab = rs.for_tab(4).await.unwrap().expect("tab entry");
        assert_eq!(tab.timestamp, 1_000);
        assert_eq!(tab.tab_id, Some(4));
        assert!(rs.latest().await.unwrap().is_empty());

        rs.set_last_error(&LastError {
            message: "boom".into(),
            timestamp: 5,
            url: None,
        })
        .await
        .unwrap();
        rs.clear_recommendations().await.unwrap();
        assert!(rs.for_tab(4).await.unwrap().is_none());
        assert!(rs.last_error().await.unwrap().is_none());
    }
}
