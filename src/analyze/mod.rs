// src/analyze/mod.rs
//! Content analysis: LLM first, keyword fallback on any failure.
//!
//! `ContentAnalyzer::analyze` never fails. Missing key, HTTP errors, empty or
//! unparseable replies all degrade to [`fallback::classify`].

pub mod fallback;
pub mod llm;
pub mod prompt;

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::categories::{self, CategoryTable};
use crate::config::{LlmConfig, Settings};
use crate::extract::ExtractedContent;
use crate::telemetry::anon_hash;

pub use llm::{DisabledClient, LlmClient, LlmError, MockClient, OpenAiClient, SharedLlm};

/// Relevance used when the model gives neither `relevance_score` nor per-topic relevance.
pub const DEFAULT_LLM_RELEVANCE: f64 = 0.5;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AnalysisResult {
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub entities: Vec<String>,
    #[serde(default)]
    pub events: Vec<String>,
    #[serde(default)]
    pub predictions: Vec<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub relevance_score: f64,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub betting_angles: Vec<String>,
}

impl AnalysisResult {
    /// Topics and categories become sets: case-insensitive dedup keeping the
    /// first spelling and order. Blank entries are dropped.
    pub fn deduplicated(mut self) -> Self {
        self.topics = dedup_ci(self.topics);
        self.categories = dedup_ci(self.categories);
        self.relevance_score = self.relevance_score.clamp(0.0, 1.0);
        self
    }
}

fn dedup_ci(items: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty() && seen.insert(s.to_lowercase()))
        .collect()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisSource {
    Llm,
    Fallback,
}

impl AnalysisSource {
    pub fn as_str(self) -> &'static str {
        match self {
            AnalysisSource::Llm => "llm",
            AnalysisSource::Fallback => "fallback",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Analysis {
    pub result: AnalysisResult,
    pub source: AnalysisSource,
}

pub struct ContentAnalyzer {
    client: SharedLlm,
    config: LlmConfig,
    table: Arc<CategoryTable>,
}

impl ContentAnalyzer {
    pub fn new(client: SharedLlm, config: LlmConfig) -> Self {
        Self {
            client,
            config,
            table: Arc::new(categories::shared().clone()),
        }
    }

    pub fn with_table(mut self, table: CategoryTable) -> Self {
        self.table = Arc::new(table);
        self
    }

    pub fn config(&self) -> &LlmConfig {
        &self.config
    }

    /// API key from settings, else the one from the LLM config.
    fn api_key<'a>(&'a self, settings: &'a Settings) -> &'a str {
        if settings.has_api_key() {
            settings.openai_api_key.as_str()
        } else {
            self.config.api_key.trim()
        }
    }

    pub async fn analyze(
        &self,
        content: &ExtractedContent,
        screenshot: Option<&str>,
        settings: &Settings,
    ) -> Analysis {
        let page = anon_hash(&content.url);
        let key = self.api_key(settings);

        if key.is_empty() {
            info!(target: "analyze", %page, "no API key, using keyword fallback");
            return self.fallback(content);
        }

        let req = prompt::build_request(content, screenshot, &settings.llm_model, &self.config);
        match self.client.complete(key, &req).await {
            Ok(reply) => match parse_reply(&reply) {
                Some(result) => {
                    info!(
                        target: "analyze",
                        %page,
                        provider = self.client.provider_name(),
                        topics = result.topics.len(),
                        categories = ?result.categories,
                        relevance = result.relevance_score,
                        "llm analysis"
                    );
                    crate::metrics::record_analysis(AnalysisSource::Llm.as_str());
                    Analysis {
                        result,
                        source: AnalysisSource::Llm,
                    }
                }
                None => {
                    warn!(target: "analyze", %page, reply_len = reply.len(), "llm reply not in expected shape, using fallback");
                    self.fallback(content)
                }
            },
            Err(e) => {
                warn!(target: "analyze", %page, error = %e, "llm call failed, using fallback");
                self.fallback(content)
            }
        }
    }

    fn fallback(&self, content: &ExtractedContent) -> Analysis {
        crate::metrics::record_analysis(AnalysisSource::Fallback.as_str());
        Analysis {
            result: fallback::classify(content, &self.table),
            source: AnalysisSource::Fallback,
        }
    }
}

/// Parses the model's reply. Accepts bare JSON or JSON wrapped in prose /
/// code fences: the first `{` that starts an object with a `topics` array
/// wins. Topics may be strings or `{name, keywords, relevance}` objects.
pub fn parse_reply(reply: &str) -> Option<AnalysisResult> {
    let v = reply
        .char_indices()
        .filter(|(_, c)| *c == '{')
        .find_map(|(i, _)| analysis_object_at(&reply[i..]))?;
    let obj = v.as_object()?;
    let raw_topics = obj.get("topics")?.as_array()?;

    let mut topics = Vec::new();
    let mut topic_relevance: Option<f64> = None;
    for t in raw_topics {
        match t {
            Value::String(s) => topics.push(s.clone()),
            Value::Object(o) => {
                if let Some(name) = o.get("name").and_then(Value::as_str) {
                    topics.push(name.to_string());
                }
                topics.extend(strings(o.get("keywords")));
                if let Some(r) = o.get("relevance").and_then(Value::as_f64) {
                    topic_relevance = Some(topic_relevance.map_or(r, |m: f64| m.max(r)));
                }
            }
            _ => {}
        }
    }

    let relevance_score = obj
        .get("relevance_score")
        .or_else(|| obj.get("relevanceScore"))
        .and_then(Value::as_f64)
        .or(topic_relevance)
        .unwrap_or(DEFAULT_LLM_RELEVANCE);

    Some(
        AnalysisResult {
            topics,
            entities: strings(obj.get("entities")),
            events: strings(obj.get("events")),
            predictions: strings(obj.get("predictions")),
            categories: strings(obj.get("categories"))
                .into_iter()
                .map(|c| c.to_lowercase())
                .collect(),
            relevance_score,
            summary: obj
                .get("summary")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            betting_angles: strings(obj.get("betting_angles")),
        }
        .deduplicated(),
    )
}

/// First JSON value in `s` if it is an object carrying a `topics` array.
/// Trailing prose after the value is ignored.
fn analysis_object_at(s: &str) -> Option<Value> {
    let v = serde_json::Deserializer::from_str(s)
        .into_iter::<Value>()
        .next()?
        .ok()?;
    v.get("topics").is_some_and(Value::is_array).then_some(v)
}

/// String items of an array; objects contribute their `name`.
fn strings(v: Option<&Value>) -> Vec<String> {
    v.and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|i| match i {
                    Value::String(s) => Some(s.clone()),
                    Value::Object(o) => o.get("name").and_then(Value::as_str).map(str::to_string),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default()
}
