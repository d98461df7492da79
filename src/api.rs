// src/api.rs
//! HTTP surface for the UI side.
//!
//! `/message` carries the same `{action: ...}` envelopes the extension sends
//! over its runtime channel; the other routes are read-only conveniences.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use shuttle_axum::axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response as HttpResponse},
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::CorsLayer;
use tracing::warn;

use crate::error::{FetchError, PipelineError};
use crate::extract::{self, ExtractedContent};
use crate::markets::{filter_by_category, filter_by_query, FilterOptions, MarketSource};
use crate::metrics::Metrics;
use crate::orchestrator::{OrchestratorHandle, Request, Response, Trigger};

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: OrchestratorHandle,
    pub sources: Arc<Vec<Arc<dyn MarketSource>>>,
}

impl AppState {
    pub fn new(orchestrator: OrchestratorHandle, sources: Vec<Arc<dyn MarketSource>>) -> Self {
        Self {
            orchestrator,
            sources: Arc::new(sources),
        }
    }
}

pub fn router(state: AppState) -> Router {
    let app = Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/message", post(message))
        .route("/analyze", post(analyze_page))
        .route("/extract", post(extract_page))
        .route("/recommendations", get(recommendations))
        .route("/status", get(status))
        .route("/settings", get(settings))
        .route("/markets/{platform}", get(markets))
        .layer(CorsLayer::very_permissive())
        .with_state(state);

    match Metrics::install() {
        Ok(m) => app.merge(m.router()),
        Err(e) => {
            warn!(target: "api", error = %e, "metrics exporter unavailable, /metrics disabled");
            app
        }
    }
}

struct ApiError(StatusCode, String);

impl IntoResponse for ApiError {
    fn into_response(self) -> HttpResponse {
        (self.0, Json(json!({"status": "error", "error": self.1}))).into_response()
    }
}

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        let code = match e {
            PipelineError::Closed => StatusCode::SERVICE_UNAVAILABLE,
            PipelineError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            PipelineError::Config(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError(code, e.to_string())
    }
}

impl From<FetchError> for ApiError {
    fn from(e: FetchError) -> Self {
        ApiError(StatusCode::BAD_GATEWAY, e.to_string())
    }
}

async fn message(
    State(state): State<AppState>,
    Json(req): Json<Request>,
) -> Result<Json<Response>, ApiError> {
    Ok(Json(state.orchestrator.request(req).await?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageReq {
    url: String,
    html: String,
    #[serde(default)]
    tab_id: Option<u64>,
    #[serde(default)]
    screenshot: Option<String>,
}

/// Extracts server-side and submits as a manual analysis.
async fn analyze_page(
    State(state): State<AppState>,
    Json(body): Json<PageReq>,
) -> Result<Json<Response>, ApiError> {
    let data = extract::extract(&body.url, &body.html);
    let req = Request::AnalyzeContent {
        data,
        tab_id: body.tab_id,
        screenshot: body.screenshot,
        trigger: Trigger::Manual,
    };
    Ok(Json(state.orchestrator.request(req).await?))
}

async fn extract_page(Json(body): Json<PageReq>) -> Json<ExtractedContent> {
    Json(extract::extract(&body.url, &body.html))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TabQuery {
    #[serde(default)]
    tab_id: Option<u64>,
    /// Block until the pipeline is idle (bounded polling).
    #[serde(default)]
    wait: bool,
}

async fn recommendations(
    State(state): State<AppState>,
    Query(q): Query<TabQuery>,
) -> Result<Json<Response>, ApiError> {
    if q.wait {
        let recommendations = state
            .orchestrator
            .wait_for_recommendations(
                q.tab_id,
                crate::orchestrator::STATUS_POLL_INTERVAL,
                crate::orchestrator::STATUS_MAX_POLLS,
            )
            .await?;
        return Ok(Json(Response::Recommendations {
            recommendations,
            timestamp: None,
        }));
    }
    let req = Request::GetRecommendations { tab_id: q.tab_id };
    Ok(Json(state.orchestrator.request(req).await?))
}

async fn status(State(state): State<AppState>) -> Result<Json<Response>, ApiError> {
    Ok(Json(state.orchestrator.request(Request::GetAnalysisStatus).await?))
}

async fn settings(State(state): State<AppState>) -> Result<Json<Response>, ApiError> {
    Ok(Json(state.orchestrator.request(Request::GetSettings).await?))
}

#[derive(Deserialize, Default)]
struct MarketQuery {
    #[serde(default)]
    q: Option<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    trending: bool,
    #[serde(default)]
    limit: Option<u32>,
}

/// Listing lookup straight from one adapter (cached).
async fn markets(
    State(state): State<AppState>,
    Path(platform): Path<String>,
    Query(q): Query<MarketQuery>,
) -> Result<HttpResponse, ApiError> {
    let Some(src) = state
        .sources
        .iter()
        .find(|s| s.platform().slug().eq_ignore_ascii_case(&platform))
    else {
        return Err(ApiError(
            StatusCode::NOT_FOUND,
            format!("unknown platform '{platform}'"),
        ));
    };

    let mut listings = if q.trending {
        src.trending().await?
    } else if let Some(cat) = q.category.as_deref().filter(|c| !c.trim().is_empty()) {
        src.listings_by_category(cat).await?
    } else {
        let mut opts = FilterOptions::default();
        if let Some(limit) = q.limit {
            opts = opts.with_limit(limit);
        }
        src.fetch_listings(&opts).await?
    };
    if let Some(query) = q.q.as_deref() {
        listings = filter_by_query(listings, query);
    }
    if q.trending {
        if let Some(cat) = q.category.as_deref() {
            listings = filter_by_category(listings, cat);
        }
    }
    Ok(Json(listings).into_response())
}
