// src/orchestrator/message.rs
//! Wire messages between the UI side and the orchestrator.
//!
//! Requests are tagged by `action`, replies by `status`; both use camelCase
//! so the extension-style payloads (`{"action":"analyzeContent", ...}`) map
//! one to one.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::extract::ExtractedContent;
use crate::matcher::Recommendation;
use crate::store::{LastAnalysis, LastError};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    /// Page monitor fired.
    #[default]
    Auto,
    /// User pressed "analyze".
    Manual,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Request {
    #[serde(rename_all = "camelCase")]
    AnalyzeContent {
        data: ExtractedContent,
        #[serde(default)]
        tab_id: Option<u64>,
        /// Data URL of the visible tab, for the vision prompt.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        screenshot: Option<String>,
        #[serde(default)]
        trigger: Trigger,
    },
    #[serde(rename_all = "camelCase")]
    GetRecommendations {
        #[serde(default)]
        tab_id: Option<u64>,
    },
    GetAnalysisStatus,
    #[serde(rename_all = "camelCase")]
    CaptureTab {
        #[serde(default)]
        tab_id: Option<u64>,
    },
    RefreshMarkets,
    GetSettings,
    UpdateSettings {
        settings: Value,
    },
    ResetSettings,
    ClearRecommendations,
}

impl Request {
    pub fn action(&self) -> &'static str {
        match self {
            Request::AnalyzeContent { .. } => "analyzeContent",
            Request::GetRecommendations { .. } => "getRecommendations",
            Request::GetAnalysisStatus => "getAnalysisStatus",
            Request::CaptureTab { .. } => "captureTab",
            Request::RefreshMarkets => "refreshMarkets",
            Request::GetSettings => "getSettings",
            Request::UpdateSettings { .. } => "updateSettings",
            Request::ResetSettings => "resetSettings",
            Request::ClearRecommendations => "clearRecommendations",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum DropReason {
    Disabled,
    AutoAnalyzeOff,
    RateLimited,
}

impl DropReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DropReason::Disabled => "disabled",
            DropReason::AutoAnalyzeOff => "autoAnalyzeOff",
            DropReason::RateLimited => "rateLimited",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Idle,
    Processing,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisStatus {
    pub state: RunState,
    pub queue_length: usize,
    pub enabled: bool,
    pub last_analysis: Option<LastAnalysis>,
    pub last_error: Option<LastError>,
}

impl AnalysisStatus {
    pub fn is_processing(&self) -> bool {
        self.state == RunState::Processing
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum Response {
    /// Accepted; `position` 0 means the run started right away.
    Queued { position: usize },
    Dropped { reason: DropReason },
    #[serde(rename_all = "camelCase")]
    Recommendations {
        recommendations: Vec<Recommendation>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<i64>,
    },
    Status(AnalysisStatus),
    Screenshot { screenshot: String },
    /// Listing counts per platform slug; failed platforms appear in `errors`.
    Refreshed {
        markets: BTreeMap<String, usize>,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        errors: BTreeMap<String, String>,
    },
    Settings { settings: Value },
    Updated { settings: Value },
    Reset,
    Cleared,
    Error { error: String },
}

impl Response {
    pub fn error(e: impl ToString) -> Self {
        Response::Error {
            error: e.to_string(),
        }
    }
}

/// Pushed to every subscriber when a run finishes, successful or not.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Notification {
    #[serde(rename_all = "camelCase")]
    NewRecommendations {
        tab_id: Option<u64>,
        recommendations: Vec<Recommendation>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn analyze_request_parses_extension_payload() {
        let req: Request = serde_json::from_value(json!({
            "action": "analyzeContent",
            "data": {"url": "https://e.com", "title": "T", "text": "body"},
            "tabId": 7
        }))
        .unwrap();
        match req {
            Request::AnalyzeContent {
                data,
                tab_id,
                screenshot,
                trigger,
            } => {
                assert_eq!(data.title, "T");
                assert_eq!(tab_id, Some(7));
                assert!(screenshot.is_none());
                assert_eq!(trigger, Trigger::Auto);
            }
            other => panic!("unexpected {other:?}"),
        }

        let req: Request = serde_json::from_value(json!({"action": "refreshMarkets"})).unwrap();
        assert_eq!(req, Request::RefreshMarkets);
        assert_eq!(req.action(), "refreshMarkets");
    }

    #[test]
    fn responses_are_status_tagged() {
        let v = serde_json::to_value(Response::Queued { position: 0 }).unwrap();
        assert_eq!(v, json!({"status": "queued", "position": 0}));

        let v = serde_json::to_value(Response::Dropped {
            reason: DropReason::RateLimited,
        })
        .unwrap();
        assert_eq!(v, json!({"status": "dropped", "reason": "rateLimited"}));

        let v = serde_json::to_value(Response::Status(AnalysisStatus {
            state: RunState::Idle,
            queue_length: 0,
            enabled: true,
            last_analysis: None,
            last_error: None,
        }))
        .unwrap();
        assert_eq!(v["status"], "status");
        assert_eq!(v["state"], "idle");
        assert_eq!(v["queueLength"], 0);
    }

    #[test]
    fn notification_matches_popup_listener() {
        let v = serde_json::to_value(Notification::NewRecommendations {
            tab_id: Some(3),
            recommendations: vec![],
        })
        .unwrap();
        assert_eq!(
            v,
            json!({"action": "newRecommendations", "tabId": 3, "recommendations": []})
        );
    }
}
