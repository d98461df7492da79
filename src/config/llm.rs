// src/config/llm.rs
use serde::{Deserialize, Serialize};
use std::{env, fs, path::Path};

pub const DEFAULT_LLM_CONFIG_PATH: &str = "config/llm.json";
pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
/// Used when settings carry no model name.
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}
fn default_max_tokens() -> u32 {
    1000
}
fn default_vision_max_tokens() -> u32 {
    1500
}
fn default_temperature() -> f32 {
    0.3
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LlmConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// "ENV" means: read from OPENAI_API_KEY. Empty means "no key" (fallback classifier only).
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Used when a screenshot is attached.
    #[serde(default = "default_vision_max_tokens")]
    pub vision_max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            api_key: String::new(),
            max_tokens: default_max_tokens(),
            vision_max_tokens: default_vision_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl LlmConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let data = fs::read_to_string(path)?;
        let cfg: LlmConfig = serde_json::from_str(&data)?;
        cfg.resolved()
    }

    /// `config/llm.json` if present, else defaults with the key taken from `OPENAI_API_KEY`.
    pub fn load_default() -> anyhow::Result<Self> {
        if Path::new(DEFAULT_LLM_CONFIG_PATH).exists() {
            return Self::load_from_file(DEFAULT_LLM_CONFIG_PATH);
        }
        Ok(Self {
            api_key: env::var("OPENAI_API_KEY").unwrap_or_default(),
            ..Self::default()
        })
    }

    fn resolved(mut self) -> anyhow::Result<Self> {
        if self.api_key.trim().eq_ignore_ascii_case("env") {
            self.api_key = env::var("OPENAI_API_KEY")
                .map_err(|_| anyhow::anyhow!("Missing OPENAI_API_KEY env var"))?;
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            self.temperature = default_temperature();
        }
        if self.max_tokens == 0 {
            self.max_tokens = default_max_tokens();
        }
        if self.vision_max_tokens == 0 {
            self.vision_max_tokens = default_vision_max_tokens();
        }
        Ok(self)
    }
}
