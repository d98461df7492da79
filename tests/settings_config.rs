// tests/settings_config.rs
//
// Settings and config files on disk:
// - settings survive a restart through the JSON file store
// - reset restores defaults in memory and on disk
// - the legacy analysisDelay key never breaks a reload
// - LLM config file with "ENV" key and category table overrides

use std::sync::Arc;

use serde_json::json;

use bet_scraper::analyze::{ContentAnalyzer, DisabledClient};
use bet_scraper::cache::SystemClock;
use bet_scraper::categories::{load_table_from, CategoryTable};
use bet_scraper::config::{LlmConfig, Settings};
use bet_scraper::orchestrator::{NoCapture, Orchestrator, OrchestratorConfig, Request, Response, Services};
use bet_scraper::store::{JsonFileStore, KeyValueStore, MemoryStore, ResultStore};

fn services(settings_store: Arc<JsonFileStore>) -> Services {
    Services {
        analyzer: Arc::new(ContentAnalyzer::new(
            Arc::new(DisabledClient),
            LlmConfig::default(),
        )),
        sources: vec![],
        settings_store,
        results: ResultStore::new(Arc::new(MemoryStore::new())),
        capture: Arc::new(NoCapture),
        clock: Arc::new(SystemClock),
    }
}

#[tokio::test]
async fn settings_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.json");

    {
        let store = Arc::new(JsonFileStore::open(&path).unwrap());
        let (h, _task) = Orchestrator::start(services(store), OrchestratorConfig::default())
            .await
            .unwrap();
        let resp = h
            .request(Request::UpdateSettings {
                settings: json!({
                    "maxRecommendations": 8,
                    "analysisDelay": 2500,
                    "categories": {"entertainment": true}
                }),
            })
            .await
            .unwrap();
        assert!(matches!(resp, Response::Updated { .. }));
    }

    let store = Arc::new(JsonFileStore::open(&path).unwrap());
    let loaded = Settings::load(store.as_ref()).await.unwrap();
    assert_eq!(loaded.max_recommendations, 8);
    assert_eq!(loaded.analysis_delay_ms, 2500);
    assert!(loaded.is_category_enabled("entertainment"));
    assert!(loaded.is_category_enabled("politics"));

    let (h, _task) = Orchestrator::start(services(store.clone()), OrchestratorConfig::default())
        .await
        .unwrap();
    let Response::Settings { settings } = h.request(Request::GetSettings).await.unwrap() else {
        panic!("expected settings");
    };
    assert_eq!(settings["maxRecommendations"], 8);

    assert_eq!(h.request(Request::ResetSettings).await.unwrap(), Response::Reset);
    let reopened = JsonFileStore::open(&path).unwrap();
    assert_eq!(reopened.get("maxRecommendations").await.unwrap(), Some(json!(5)));
    assert_eq!(Settings::load(&reopened).await.unwrap(), Settings::default());
}

#[tokio::test]
async fn legacy_analysis_delay_key_survives_repeated_saves() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.json");
    std::fs::write(&path, r#"{"analysisDelay": 3000, "enabled": true}"#).unwrap();

    let store = JsonFileStore::open(&path).unwrap();
    let first = Settings::load(&store).await.unwrap();
    assert_eq!(first.analysis_delay_ms, 3000);
    first.persist(&store).await.unwrap();
    assert_eq!(store.get("analysisDelay").await.unwrap(), None);

    let reopened = JsonFileStore::open(&path).unwrap();
    let second = Settings::load(&reopened).await.unwrap();
    assert_eq!(second.analysis_delay_ms, 3000);

    // both spellings present: the canonical key wins
    reopened.set("analysisDelay", json!(9000)).await.unwrap();
    let third = Settings::load(&reopened).await.unwrap();
    assert_eq!(third.analysis_delay_ms, 3000);

    let (h, _task) = Orchestrator::start(services(Arc::new(reopened)), OrchestratorConfig::default())
        .await
        .unwrap();
    assert!(matches!(
        h.request(Request::GetSettings).await.unwrap(),
        Response::Settings { .. }
    ));
}

#[test]
fn oversized_max_recommendations_is_capped() {
    let s = Settings::default()
        .apply_update(&json!({"maxRecommendations": 500}))
        .unwrap();
    assert_eq!(s.max_recommendations, 50);
}

#[serial_test::serial]
#[test]
fn llm_config_file_reads_key_from_env() {
    let dir = tempfile::tempdir().unwrap();
    let p = dir.path().join("llm.json");
    std::fs::write(
        &p,
        r#"{"endpoint": "http://localhost:9/v1/chat/completions", "api_key": "ENV", "max_tokens": 400}"#,
    )
    .unwrap();

    std::env::set_var("OPENAI_API_KEY", "sk-env-0123456789abcdef");
    let cfg = LlmConfig::load_from_file(&p).unwrap();
    std::env::remove_var("OPENAI_API_KEY");

    assert_eq!(cfg.api_key, "sk-env-0123456789abcdef");
    assert_eq!(cfg.endpoint, "http://localhost:9/v1/chat/completions");
    assert_eq!(cfg.max_tokens, 400);
    assert_eq!(cfg.vision_max_tokens, 1500);
}

#[test]
fn category_table_override_from_toml() {
    let dir = tempfile::tempdir().unwrap();
    let p = dir.path().join("categories.toml");
    std::fs::write(
        &p,
        r#"
[[category]]
name = "Esports"
keywords = ["League of  Legends", "dota"]

[[category]]
name = "finance"
keywords = ["fed"]
"#,
    )
    .unwrap();

    let table: CategoryTable = load_table_from(&p).unwrap();
    assert_eq!(table.detect("Worlds: league of legends final"), "esports");
    assert_eq!(table.detect("Fed minutes"), "finance");
    assert_eq!(table.detect("Weather"), "other");

    let empty = dir.path().join("empty.toml");
    std::fs::write(&empty, "category = []\n").unwrap();
    assert!(load_table_from(&empty).is_err());
}
