// src/main.rs
//! Bet Scraper service entrypoint.
//! Wires stores, market adapters, the LLM client and the orchestrator, then
//! serves the Axum router.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use shuttle_axum::ShuttleAxum;
use tracing::{info, warn};

use bet_scraper::analyze::{llm::build_client, ContentAnalyzer};
use bet_scraper::api::{self, AppState};
use bet_scraper::cache::{SharedClock, SystemClock};
use bet_scraper::config::LlmConfig;
use bet_scraper::markets::{
    FixtureTransport, HttpTransport, KalshiClient, MarketSource, Platform, PolymarketClient,
    SharedTransport,
};
use bet_scraper::orchestrator::{
    spawn_refresh_scheduler, NoCapture, Orchestrator, OrchestratorConfig, RefreshSchedulerCfg,
    Services,
};
use bet_scraper::store::{JsonFileStore, ResultStore};
use bet_scraper::telemetry::init_tracing;

const DEFAULT_DATA_DIR: &str = "data";

fn transport_for(platform: Platform, fixtures: bool) -> anyhow::Result<SharedTransport> {
    if fixtures {
        Ok(Arc::new(FixtureTransport::new(platform)))
    } else {
        Ok(Arc::new(HttpTransport::new()?))
    }
}

async fn build_sources(clock: SharedClock) -> anyhow::Result<Vec<Arc<dyn MarketSource>>> {
    let fixtures = std::env::var("MARKETS_MODE")
        .map(|v| v.eq_ignore_ascii_case("fixture"))
        .unwrap_or(false);
    if fixtures {
        info!("MARKETS_MODE=fixture, serving embedded market listings");
    }

    let mut polymarket =
        PolymarketClient::new(transport_for(Platform::Polymarket, fixtures)?).with_clock(clock.clone());
    if let Ok(url) = std::env::var("POLYMARKET_BASE_URL") {
        polymarket = polymarket.with_base_url(url);
    }

    let mut kalshi = KalshiClient::new(transport_for(Platform::Kalshi, fixtures)?).with_clock(clock);
    if let Ok(url) = std::env::var("KALSHI_BASE_URL") {
        kalshi = kalshi.with_base_url(url);
    }
    if let (Ok(email), Ok(password)) = (std::env::var("KALSHI_EMAIL"), std::env::var("KALSHI_PASSWORD")) {
        if let Err(e) = kalshi.authenticate(&email, &password).await {
            warn!(error = %e, "Kalshi login failed, continuing unauthenticated");
        }
    }

    Ok(vec![Arc::new(polymarket), Arc::new(kalshi)])
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // .env is optional
    let _ = dotenvy::dotenv();
    init_tracing();

    let data_dir = std::env::var("BETSCRAPER_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_DATA_DIR));
    let settings_store = Arc::new(
        JsonFileStore::open(data_dir.join("settings.json")).context("opening settings store")?,
    );
    let results = ResultStore::new(Arc::new(
        JsonFileStore::open(data_dir.join("results.json")).context("opening results store")?,
    ));

    let llm_cfg = LlmConfig::load_default().context("loading LLM config")?;
    let client = build_client(&llm_cfg).context("building LLM client")?;
    info!(provider = client.provider_name(), endpoint = %llm_cfg.endpoint, "LLM client ready");

    let clock: SharedClock = Arc::new(SystemClock);
    let sources = build_sources(clock.clone()).await?;

    let services = Services {
        analyzer: Arc::new(ContentAnalyzer::new(client, llm_cfg)),
        sources: sources.clone(),
        settings_store,
        results,
        capture: Arc::new(NoCapture),
        clock,
    };
    let (handle, _task) = Orchestrator::start(services, OrchestratorConfig::default()).await?;
    spawn_refresh_scheduler(handle.clone(), RefreshSchedulerCfg::default());

    info!(data_dir = %data_dir.display(), "bet-scraper started");
    Ok(api::router(AppState::new(handle, sources)).into())
}
