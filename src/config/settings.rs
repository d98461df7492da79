// src/config/settings.rs
//! User settings.
//!
//! Lifecycle: loaded once at startup from the settings store, replaced only by
//! explicit `updateSettings` (partial patch) or `resetSettings`. Each top-level
//! field is persisted under its own camelCase key.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::PipelineError;
use crate::markets::Platform;
use crate::store::KeyValueStore;

pub const DEFAULT_ANALYSIS_DELAY_MS: u64 = 5_000;
pub const DEFAULT_MAX_RECOMMENDATIONS: usize = 5;
pub const MAX_RECOMMENDATIONS_CAP: usize = 50;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PlatformToggles {
    pub polymarket: bool,
    pub kalshi: bool,
}

impl Default for PlatformToggles {
    fn default() -> Self {
        Self {
            polymarket: true,
            kalshi: true,
        }
    }
}

#[derive(Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub openai_api_key: String,
    pub llm_model: String,
    pub enabled: bool,
    pub auto_analyze: bool,
    #[serde(alias = "analysisDelay")]
    pub analysis_delay_ms: u64,
    pub max_recommendations: usize,
    pub platforms: PlatformToggles,
    /// Category → shown. Categories not listed are shown.
    pub categories: BTreeMap<String, bool>,
}

impl Default for Settings {
    fn default() -> Self {
        let categories = [
            ("politics", true),
            ("crypto", true),
            ("finance", true),
            ("sports", true),
            ("weather", true),
            ("entertainment", false),
            ("tech", true),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        Self {
            openai_api_key: String::new(),
            llm_model: crate::config::llm::DEFAULT_MODEL.to_string(),
            enabled: true,
            auto_analyze: true,
            analysis_delay_ms: DEFAULT_ANALYSIS_DELAY_MS,
            max_recommendations: DEFAULT_MAX_RECOMMENDATIONS,
            platforms: PlatformToggles::default(),
            categories,
        }
    }
}

// Never print the key itself.
impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("openai_api_key_len", &self.openai_api_key.len())
            .field("llm_model", &self.llm_model)
            .field("enabled", &self.enabled)
            .field("auto_analyze", &self.auto_analyze)
            .field("analysis_delay_ms", &self.analysis_delay_ms)
            .field("max_recommendations", &self.max_recommendations)
            .field("platforms", &self.platforms)
            .field("categories", &self.categories)
            .finish()
    }
}

impl Settings {
    /// Reads every known key from `store`; missing keys take defaults, unknown keys are ignored.
    pub async fn load(store: &dyn KeyValueStore) -> anyhow::Result<Self> {
        let snap = store.snapshot().await?;
        let mut obj: Map<String, Value> = Map::new();
        for (k, v) in snap {
            let key = canonical_key(&k);
            // the canonical key wins over a legacy alias written by older clients
            if key != k && obj.contains_key(key) {
                continue;
            }
            obj.insert(key.to_string(), v);
        }
        let s: Settings = serde_json::from_value(Value::Object(obj))?;
        Ok(s.sanitized())
    }

    pub async fn persist(&self, store: &dyn KeyValueStore) -> anyhow::Result<()> {
        if let Value::Object(map) = serde_json::to_value(self)? {
            for (k, v) in map {
                store.set(&k, v).await?;
            }
        }
        for alias in ALIAS_KEYS {
            store.remove(alias).await?;
        }
        Ok(())
    }

    /// Returns a new value with `patch` overlaid. Nested `platforms` / `categories`
    /// objects are merged key-by-key rather than replaced.
    pub fn apply_update(&self, patch: &Value) -> Result<Settings, PipelineError> {
        let Value::Object(patch) = patch else {
            return Err(PipelineError::Config(
                "settings update must be a JSON object".into(),
            ));
        };
        let mut base = match serde_json::to_value(self) {
            Ok(Value::Object(m)) => m,
            _ => return Err(PipelineError::Config("settings not serializable".into())),
        };

        for (k, v) in patch {
            let key = canonical_key(k);
            match (base.get_mut(key), v) {
                (Some(Value::Object(dst)), Value::Object(src))
                    if key == "platforms" || key == "categories" =>
                {
                    for (ik, iv) in src {
                        dst.insert(ik.clone(), iv.clone());
                    }
                }
                _ => {
                    base.insert(key.to_string(), v.clone());
                }
            }
        }

        let next: Settings = serde_json::from_value(Value::Object(base))
            .map_err(|e| PipelineError::Config(format!("invalid settings: {e}")))?;
        next.validate()?;
        Ok(next.sanitized())
    }

    /// API keys must look like OpenAI keys when present.
    pub fn validate(&self) -> Result<(), PipelineError> {
        let key = self.openai_api_key.trim();
        if !key.is_empty() && !(key.starts_with("sk-") && key.len() >= 20) {
            return Err(PipelineError::Config(
                "invalid OpenAI API key format".into(),
            ));
        }
        if self.max_recommendations == 0 {
            return Err(PipelineError::Config(
                "maxRecommendations must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Wire form with the API key replaced by `hasApiKey`.
    pub fn public_view(&self) -> Value {
        let mut v = serde_json::to_value(self).unwrap_or(Value::Null);
        if let Value::Object(map) = &mut v {
            map.remove("openaiApiKey");
            map.insert("hasApiKey".into(), Value::Bool(self.has_api_key()));
        }
        v
    }

    pub fn has_api_key(&self) -> bool {
        !self.openai_api_key.trim().is_empty()
    }

    pub fn is_platform_enabled(&self, p: Platform) -> bool {
        match p {
            Platform::Polymarket => self.platforms.polymarket,
            Platform::Kalshi => self.platforms.kalshi,
        }
    }

    pub fn is_category_enabled(&self, category: &str) -> bool {
        self.categories
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(category))
            .map(|(_, v)| *v)
            .unwrap_or(true)
    }

    fn sanitized(mut self) -> Self {
        self.openai_api_key = self.openai_api_key.trim().to_string();
        if self.llm_model.trim().is_empty() {
            self.llm_model = crate::config::llm::DEFAULT_MODEL.to_string();
        }
        self.max_recommendations = self
            .max_recommendations
            .clamp(1, MAX_RECOMMENDATIONS_CAP);
        self
    }
}

/// Options-page keys that map onto nested fields.
const ALIAS_KEYS: &[&str] = &["analysisDelay"];

fn canonical_key(k: &str) -> &str {
    match k {
        "analysisDelay" => "analysisDelayMs",
        other => other,
    }
}
