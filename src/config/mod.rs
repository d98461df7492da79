// src/config/mod.rs
//! Runtime configuration: user settings (persisted in the settings store) and
//! the LLM endpoint config (file + env).

pub mod llm;
pub mod settings;

pub use llm::LlmConfig;
pub use settings::{PlatformToggles, Settings};
