// tests/api_http.rs
//
// HTTP-level tests for the public API Router without opening sockets.
// We exercise the router directly via tower::ServiceExt::oneshot.
//
// Covered:
// - GET /health
// - POST /message (analyzeContent, getRecommendations, updateSettings, bad action)
// - POST /extract
// - GET /status, /settings, /recommendations?wait=true
// - GET /markets/{platform}

use std::sync::Arc;

use serde_json::json;
use serde_json::Value as Json;
use shuttle_axum::axum::{
    body::{self, Body},
    http::{Request, StatusCode},
    Router,
};
use tower::ServiceExt as _; // for `oneshot`

use bet_scraper::analyze::{ContentAnalyzer, DisabledClient};
use bet_scraper::api::{self, AppState};
use bet_scraper::cache::SystemClock;
use bet_scraper::config::{LlmConfig, Settings};
use bet_scraper::markets::{FixtureTransport, KalshiClient, MarketSource, Platform, PolymarketClient};
use bet_scraper::orchestrator::{NoCapture, Orchestrator, OrchestratorConfig, Services};
use bet_scraper::store::{MemoryStore, ResultStore};

const BODY_LIMIT: usize = 1024 * 1024; // 1MB, safe for tests

/// Same wiring as the binary, with fixture markets and no LLM.
fn test_router() -> Router {
    let sources: Vec<Arc<dyn MarketSource>> = vec![
        Arc::new(PolymarketClient::new(Arc::new(FixtureTransport::new(
            Platform::Polymarket,
        )))),
        Arc::new(KalshiClient::new(Arc::new(FixtureTransport::new(
            Platform::Kalshi,
        )))),
    ];
    let services = Services {
        analyzer: Arc::new(ContentAnalyzer::new(
            Arc::new(DisabledClient),
            LlmConfig::default(),
        )),
        sources: sources.clone(),
        settings_store: Arc::new(MemoryStore::new()),
        results: ResultStore::new(Arc::new(MemoryStore::new())),
        capture: Arc::new(NoCapture),
        clock: Arc::new(SystemClock),
    };
    let settings = Settings {
        analysis_delay_ms: 0,
        ..Settings::default()
    };
    let (handle, _task) = Orchestrator::spawn(services, settings, OrchestratorConfig::default());
    api::router(AppState::new(handle, sources))
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Vec<u8>) {
    let resp = app.clone().oneshot(req).await.expect("oneshot");
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body")
        .to_vec();
    (status, bytes)
}

async fn post_json(app: &Router, uri: &str, payload: Json) -> (StatusCode, Json) {
    let req = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(payload.to_string()))
        .expect("build POST");
    let (status, bytes) = send(app, req).await;
    (status, serde_json::from_slice(&bytes).unwrap_or(Json::Null))
}

async fn get_json(app: &Router, uri: &str) -> (StatusCode, Json) {
    let req = Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .expect("build GET");
    let (status, bytes) = send(app, req).await;
    (status, serde_json::from_slice(&bytes).unwrap_or(Json::Null))
}

#[tokio::test]
async fn api_health_returns_200_and_ok_body() {
    let app = test_router();
    let req = Request::builder()
        .method("GET")
        .uri("/health")
        .body(Body::empty())
        .expect("build GET /health");
    let (status, bytes) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK, "health should be 200");
    assert_eq!(String::from_utf8(bytes).expect("utf8").trim(), "OK");
}

#[tokio::test]
async fn analyze_message_then_wait_for_recommendations() {
    let app = test_router();

    let (status, v) = post_json(
        &app,
        "/message",
        json!({
            "action": "analyzeContent",
            "tabId": 5,
            "trigger": "manual",
            "data": {
                "url": "https://news.example.com/fed",
                "title": "Will the Fed cut rates in December?",
                "text": "Policy makers meet next week."
            }
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["status"], "queued");

    let (status, v) = get_json(&app, "/recommendations?tabId=5&wait=true").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["status"], "recommendations");
    let recs = v["recommendations"].as_array().expect("array");
    assert!(!recs.is_empty());
    assert_eq!(recs[0]["ticker"], "FED-DEC24");
    assert_eq!(recs[0]["platform"], "Kalshi");
    assert!(recs[0]["relevance"].as_f64().unwrap() >= 0.6);

    let (_, v) = post_json(&app, "/message", json!({"action": "getRecommendations", "tabId": 5})).await;
    assert_eq!(v["recommendations"].as_array().map(Vec::len), Some(recs.len()));
    assert!(v["timestamp"].is_i64());
}

#[tokio::test]
async fn settings_update_is_validated_and_redacted() {
    let app = test_router();

    let (_, v) = post_json(
        &app,
        "/message",
        json!({"action": "updateSettings", "settings": {"openaiApiKey": "not-a-key"}}),
    )
    .await;
    assert_eq!(v["status"], "error");

    let (_, v) = post_json(
        &app,
        "/message",
        json!({"action": "updateSettings", "settings": {
            "openaiApiKey": "sk-0123456789abcdefghij",
            "maxRecommendations": 3
        }}),
    )
    .await;
    assert_eq!(v["status"], "updated");
    assert_eq!(v["settings"]["hasApiKey"], true);
    assert!(v["settings"].get("openaiApiKey").is_none());

    let (_, v) = get_json(&app, "/settings").await;
    assert_eq!(v["settings"]["maxRecommendations"], 3);
}

#[tokio::test]
async fn unknown_action_is_rejected() {
    let app = test_router();
    let (status, _) = post_json(&app, "/message", json!({"action": "launchRockets"})).await;
    assert!(status.is_client_error(), "got {status}");
}

#[tokio::test]
async fn capture_is_unavailable_without_host() {
    let app = test_router();
    let (_, v) = post_json(&app, "/message", json!({"action": "captureTab"})).await;
    assert_eq!(v["status"], "error");
    assert!(v["error"].as_str().unwrap().contains("not available"));
}

#[tokio::test]
async fn status_starts_idle() {
    let app = test_router();
    let (status, v) = get_json(&app, "/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["state"], "idle");
    assert_eq!(v["queueLength"], 0);
    assert!(v["lastError"].is_null());
}

#[tokio::test]
async fn extract_endpoint_returns_main_text() {
    let app = test_router();
    let html = r#"<html><head><title>Hello</title><meta name="description" content="d"></head>
        <body><nav>menu</nav><main><h1>Headline</h1><p>Body text here.</p></main></body></html>"#;
    let (status, v) = post_json(
        &app,
        "/extract",
        json!({"url": "https://e.com/a", "html": html}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["title"], "Hello");
    assert!(v["text"].as_str().unwrap().contains("Body text here."));
    assert!(!v["text"].as_str().unwrap().contains("menu"));
    assert_eq!(v["metadata"]["description"], "d");
    assert_eq!(v["metadata"]["headings"][0], "Headline");
}

#[tokio::test]
async fn markets_endpoint_searches_one_platform() {
    let app = test_router();

    let (status, v) = get_json(&app, "/markets/kalshi?q=recession").await;
    assert_eq!(status, StatusCode::OK);
    let arr = v.as_array().expect("array");
    assert_eq!(arr.len(), 1);
    assert_eq!(arr[0]["ticker"], "RECESSION-24");

    let (status, v) = get_json(&app, "/markets/polymarket?category=crypto").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v[0]["title"], "Will Bitcoin reach $100,000 by end of 2024?");

    let (status, _) = get_json(&app, "/markets/betfair").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn metrics_endpoint_is_mounted() {
    let app = test_router();
    let req = Request::builder()
        .method("GET")
        .uri("/metrics")
        .body(Body::empty())
        .expect("build GET /metrics");
    let (status, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
}
