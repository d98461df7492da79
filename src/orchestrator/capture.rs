// src/orchestrator/capture.rs
//! Visible-tab screenshots.
//!
//! The host decides how a tab is captured; without a host the capability is
//! simply absent and requests report it as unavailable.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CaptureError {
    #[error("tab capture is not available")]
    Unavailable,
    #[error("capture failed: {0}")]
    Failed(String),
}

#[async_trait]
pub trait TabCapture: Send + Sync {
    /// PNG data URL of the visible part of the tab.
    async fn capture_visible(&self, tab_id: Option<u64>) -> Result<String, CaptureError>;
}

pub struct NoCapture;

#[async_trait]
impl TabCapture for NoCapture {
    async fn capture_visible(&self, _tab_id: Option<u64>) -> Result<String, CaptureError> {
        Err(CaptureError::Unavailable)
    }
}

/// Returns the same image for every tab.
pub struct StaticCapture {
    data_url: String,
}

impl StaticCapture {
    pub fn new(data_url: impl Into<String>) -> Self {
        Self {
            data_url: data_url.into(),
        }
    }
}

#[async_trait]
impl TabCapture for StaticCapture {
    async fn capture_visible(&self, _tab_id: Option<u64>) -> Result<String, CaptureError> {
        Ok(self.data_url.clone())
    }
}
