// src/orchestrator/mod.rs
//! Pipeline coordinator.
//!
//! A single task owns the run state, the FIFO of pending analyses, the rate
//! limiter and the current settings. Everything else talks to it through
//! [`OrchestratorHandle`] (request + oneshot reply) and receives
//! [`Notification`]s over a broadcast channel.
//!
//! At most one analysis runs at a time. A run executes on its own task and
//! reports back; the next queued job starts only after a cooldown following
//! the previous run, and the state returns to `Idle` only once the queue is
//! drained.

pub mod capture;
pub mod message;
pub mod rate_limit;
pub mod refresh;

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

use crate::analyze::ContentAnalyzer;
use crate::cache::SharedClock;
use crate::config::Settings;
use crate::error::PipelineError;
use crate::extract::ExtractedContent;
use crate::markets::MarketSource;
use crate::matcher::{self, Recommendation};
use crate::store::{LastAnalysis, LastError, ResultStore, SharedStore};
use crate::telemetry::anon_hash;

pub use capture::{CaptureError, NoCapture, StaticCapture, TabCapture};
pub use message::{
    AnalysisStatus, DropReason, Notification, Request, Response, RunState, Trigger,
};
pub use rate_limit::RateLimiter;
pub use refresh::{spawn_refresh_scheduler, RefreshSchedulerCfg, REFRESH_INTERVAL};

/// Pause between the end of one run and the start of the next queued one.
pub const RUN_COOLDOWN: Duration = Duration::from_secs(1);
pub const STATUS_POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const STATUS_MAX_POLLS: u32 = 30;

const REQUEST_BUFFER: usize = 64;
const NOTIFY_BUFFER: usize = 32;

#[derive(Clone, Copy, Debug)]
pub struct OrchestratorConfig {
    pub cooldown: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            cooldown: RUN_COOLDOWN,
        }
    }
}

/// Collaborators shared between the coordinator and its run tasks.
pub struct Services {
    pub analyzer: Arc<ContentAnalyzer>,
    /// Queried in this order; the order breaks relevance ties.
    pub sources: Vec<Arc<dyn MarketSource>>,
    pub settings_store: SharedStore,
    pub results: ResultStore,
    pub capture: Arc<dyn TabCapture>,
    pub clock: SharedClock,
}

impl Services {
    /// Analyze → match → persist. Any error aborts the run.
    async fn execute(
        &self,
        job: &Job,
        settings: &Settings,
    ) -> Result<Vec<Recommendation>, PipelineError> {
        let analysis = self
            .analyzer
            .analyze(&job.content, job.screenshot.as_deref(), settings)
            .await;
        debug!(
            target: "orchestrator",
            source = analysis.source.as_str(),
            topics = ?analysis.result.topics,
            categories = ?analysis.result.categories,
            "analysis done"
        );

        let recs = matcher::match_markets(&analysis.result, &self.sources, settings).await?;

        let now = self.clock.now_ms();
        self.results
            .store_recommendations(job.tab_id, &recs, now)
            .await?;
        self.results
            .set_last_analysis(&LastAnalysis {
                url: job.content.url.clone(),
                title: job.content.title.clone(),
                timestamp: now,
                recommendation_count: recs.len(),
            })
            .await?;
        Ok(recs)
    }

    /// Runs one job to completion, applying the failure policy: an empty
    /// result set is stored, the error is recorded and subscribers still hear
    /// about the (empty) outcome.
    async fn process(
        &self,
        job: Job,
        settings: &Settings,
        notify: &broadcast::Sender<Notification>,
    ) -> &'static str {
        let page = anon_hash(&job.content.url);
        match self.execute(&job, settings).await {
            Ok(recommendations) => {
                info!(target: "orchestrator", %page, tab = ?job.tab_id, count = recommendations.len(), "recommendations ready");
                // no receivers is fine
                let _ = notify.send(Notification::NewRecommendations {
                    tab_id: job.tab_id,
                    recommendations,
                });
                "ok"
            }
            Err(e) => {
                warn!(target: "orchestrator", %page, tab = ?job.tab_id, error = %e, "analysis run failed");
                self.record_failure(job.tab_id, &job.content.url, e.to_string(), notify)
                    .await;
                "error"
            }
        }
    }

    /// Failure policy: empty result for the tab, `lastError`, empty broadcast.
    async fn record_failure(
        &self,
        tab_id: Option<u64>,
        url: &str,
        message: String,
        notify: &broadcast::Sender<Notification>,
    ) {
        let now = self.clock.now_ms();
        if let Err(se) = self.results.store_recommendations(tab_id, &[], now).await {
            warn!(target: "orchestrator", error = %se, "could not store empty result");
        }
        let record = LastError {
            message,
            timestamp: now,
            url: Some(url.to_string()),
        };
        if let Err(se) = self.results.set_last_error(&record).await {
            warn!(target: "orchestrator", error = %se, "could not record last error");
        }
        let _ = notify.send(Notification::NewRecommendations {
            tab_id,
            recommendations: Vec::new(),
        });
    }

    /// Forced re-fetch of every source; each success is snapshotted.
    pub async fn refresh_all(&self) -> Response {
        let mut markets = BTreeMap::new();
        let mut errors = BTreeMap::new();
        for src in &self.sources {
            let platform = src.platform();
            match src.refresh().await {
                Ok(listings) => {
                    let now = self.clock.now_ms();
                    if let Err(e) = self
                        .results
                        .store_market_snapshot(platform, &listings, now)
                        .await
                    {
                        warn!(target: "refresh", %platform, error = %e, "snapshot not stored");
                    }
                    markets.insert(platform.slug().to_string(), listings.len());
                }
                Err(e) => {
                    warn!(target: "refresh", %platform, error = %e, "refresh failed");
                    errors.insert(platform.slug().to_string(), e.to_string());
                }
            }
        }
        crate::metrics::mark_refresh(chrono::Utc::now().timestamp());
        Response::Refreshed { markets, errors }
    }
}

#[derive(Debug)]
struct Job {
    content: ExtractedContent,
    tab_id: Option<u64>,
    screenshot: Option<String>,
}

#[derive(Debug)]
enum Internal {
    RunFinished {
        tab_id: Option<u64>,
        outcome: &'static str,
    },
    CooldownElapsed,
}

type Envelope = (Request, oneshot::Sender<Response>);

/// Cheap to clone; every clone talks to the same coordinator.
#[derive(Clone)]
pub struct OrchestratorHandle {
    tx: mpsc::Sender<Envelope>,
    notify: broadcast::Sender<Notification>,
}

impl OrchestratorHandle {
    pub async fn request(&self, req: Request) -> Result<Response, PipelineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send((req, reply_tx))
            .await
            .map_err(|_| PipelineError::Closed)?;
        reply_rx.await.map_err(|_| PipelineError::Closed)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notify.subscribe()
    }

    pub async fn status(&self) -> Result<AnalysisStatus, PipelineError> {
        match self.request(Request::GetAnalysisStatus).await? {
            Response::Status(s) => Ok(s),
            other => Err(PipelineError::Parse(format!(
                "unexpected reply to getAnalysisStatus: {other:?}"
            ))),
        }
    }

    pub async fn recommendations(
        &self,
        tab_id: Option<u64>,
    ) -> Result<Vec<Recommendation>, PipelineError> {
        match self.request(Request::GetRecommendations { tab_id }).await? {
            Response::Recommendations {
                recommendations, ..
            } => Ok(recommendations),
            Response::Error { error } => Err(PipelineError::Store(error)),
            other => Err(PipelineError::Parse(format!(
                "unexpected reply to getRecommendations: {other:?}"
            ))),
        }
    }

    /// Polls the run state every `interval` until idle, then reads the
    /// recommendations for `tab_id`. Gives up after `max_polls` busy polls.
    pub async fn wait_for_recommendations(
        &self,
        tab_id: Option<u64>,
        interval: Duration,
        max_polls: u32,
    ) -> Result<Vec<Recommendation>, PipelineError> {
        for _ in 0..max_polls {
            if !self.status().await?.is_processing() {
                return self.recommendations(tab_id).await;
            }
            sleep(interval).await;
        }
        Err(PipelineError::Timeout { polls: max_polls })
    }

    /// Feeds every item from a page monitor into the pipeline as an
    /// auto-triggered analysis for `tab_id`.
    pub fn attach_monitor(
        &self,
        tab_id: Option<u64>,
        mut contents: mpsc::Receiver<ExtractedContent>,
    ) -> JoinHandle<()> {
        let handle = self.clone();
        tokio::spawn(async move {
            while let Some(data) = contents.recv().await {
                let req = Request::AnalyzeContent {
                    data,
                    tab_id,
                    screenshot: None,
                    trigger: Trigger::Auto,
                };
                match handle.request(req).await {
                    Ok(reply) => debug!(target: "orchestrator", tab = ?tab_id, ?reply, "monitor content submitted"),
                    Err(_) => break,
                }
            }
        })
    }
}

pub struct Orchestrator {
    services: Arc<Services>,
    settings: Settings,
    cfg: OrchestratorConfig,
    state: RunState,
    queue: VecDeque<Job>,
    limiter: RateLimiter,
    notify: broadcast::Sender<Notification>,
    internal: mpsc::UnboundedSender<Internal>,
}

impl Orchestrator {
    /// Loads settings from the settings store, then spawns.
    pub async fn start(
        services: Services,
        cfg: OrchestratorConfig,
    ) -> anyhow::Result<(OrchestratorHandle, JoinHandle<()>)> {
        let settings = Settings::load(services.settings_store.as_ref()).await?;
        Ok(Self::spawn(services, settings, cfg))
    }

    /// The coordinator stops once every handle is dropped.
    pub fn spawn(
        services: Services,
        settings: Settings,
        cfg: OrchestratorConfig,
    ) -> (OrchestratorHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(REQUEST_BUFFER);
        let (internal, internal_rx) = mpsc::unbounded_channel();
        let (notify, _) = broadcast::channel(NOTIFY_BUFFER);

        let actor = Orchestrator {
            services: Arc::new(services),
            limiter: RateLimiter::from_millis(settings.analysis_delay_ms),
            settings,
            cfg,
            state: RunState::Idle,
            queue: VecDeque::new(),
            notify: notify.clone(),
            internal,
        };
        let task = tokio::spawn(actor.run(rx, internal_rx));
        (OrchestratorHandle { tx, notify }, task)
    }

    async fn run(
        mut self,
        mut rx: mpsc::Receiver<Envelope>,
        mut internal_rx: mpsc::UnboundedReceiver<Internal>,
    ) {
        info!(target: "orchestrator", settings = ?self.settings, "orchestrator started");
        loop {
            tokio::select! {
                msg = rx.recv() => match msg {
                    Some((req, reply)) => self.handle_request(req, reply).await,
                    None => break,
                },
                Some(ev) = internal_rx.recv() => self.handle_internal(ev),
            }
        }
        info!(target: "orchestrator", "orchestrator stopped");
    }

    async fn handle_request(&mut self, req: Request, reply: oneshot::Sender<Response>) {
        debug!(target: "orchestrator", action = req.action(), "request");
        let resp = match req {
            Request::AnalyzeContent {
                data,
                tab_id,
                screenshot,
                trigger,
            } => self.admit(
                Job {
                    content: data,
                    tab_id,
                    screenshot,
                },
                trigger,
            ),
            Request::GetRecommendations { tab_id } => self.stored_recommendations(tab_id).await,
            Request::GetAnalysisStatus => Response::Status(self.status().await),
            Request::CaptureTab { tab_id } => {
                let capture = self.services.capture.clone();
                tokio::spawn(async move {
                    let resp = match capture.capture_visible(tab_id).await {
                        Ok(screenshot) => Response::Screenshot { screenshot },
                        Err(e) => Response::error(e),
                    };
                    let _ = reply.send(resp);
                });
                return;
            }
            Request::RefreshMarkets => {
                let services = self.services.clone();
                tokio::spawn(async move {
                    let _ = reply.send(services.refresh_all().await);
                });
                return;
            }
            Request::GetSettings => Response::Settings {
                settings: self.settings.public_view(),
            },
            Request::UpdateSettings { settings } => self.update_settings(&settings).await,
            Request::ResetSettings => self.reset_settings().await,
            Request::ClearRecommendations => {
                match self.services.results.clear_recommendations().await {
                    Ok(()) => Response::Cleared,
                    Err(e) => Response::error(format!("{e:#}")),
                }
            }
        };
        // caller may have given up
        let _ = reply.send(resp);
    }

    /// Gatekeeping order: enabled, auto-analyze (auto triggers only), rate limit.
    fn admit(&mut self, job: Job, trigger: Trigger) -> Response {
        let reason = if !self.settings.enabled {
            Some(DropReason::Disabled)
        } else if trigger == Trigger::Auto && !self.settings.auto_analyze {
            Some(DropReason::AutoAnalyzeOff)
        } else if !self.limiter.try_acquire(Instant::now()) {
            Some(DropReason::RateLimited)
        } else {
            None
        };
        if let Some(reason) = reason {
            debug!(target: "orchestrator", reason = reason.as_str(), tab = ?job.tab_id, "analysis request dropped");
            crate::metrics::record_dropped(reason.as_str());
            return Response::Dropped { reason };
        }

        match self.state {
            RunState::Idle => {
                self.start_run(job);
                Response::Queued { position: 0 }
            }
            RunState::Processing => {
                self.queue.push_back(job);
                crate::metrics::set_queue_depth(self.queue.len());
                Response::Queued {
                    position: self.queue.len(),
                }
            }
        }
    }

    fn start_run(&mut self, job: Job) {
        self.state = RunState::Processing;
        let services = self.services.clone();
        let settings = self.settings.clone();
        let notify = self.notify.clone();
        let internal = self.internal.clone();
        let cooldown = self.cfg.cooldown;

        tokio::spawn(async move {
            let started = Instant::now();
            let tab_id = job.tab_id;
            let url = job.content.url.clone();
            let run = {
                let services = services.clone();
                let notify = notify.clone();
                tokio::spawn(async move { services.process(job, &settings, &notify).await })
            };
            // panics in the run still end in RunFinished
            let outcome = match run.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(target: "orchestrator", tab = ?tab_id, error = %e, "analysis run aborted");
                    services
                        .record_failure(tab_id, &url, format!("analysis run aborted: {e}"), &notify)
                        .await;
                    "aborted"
                }
            };
            crate::metrics::record_run(outcome, started.elapsed().as_secs_f64() * 1_000.0);
            let _ = internal.send(Internal::RunFinished { tab_id, outcome });
            sleep(cooldown).await;
            let _ = internal.send(Internal::CooldownElapsed);
        });
    }

    fn handle_internal(&mut self, ev: Internal) {
        match ev {
            Internal::RunFinished { tab_id, outcome } => {
                debug!(target: "orchestrator", tab = ?tab_id, outcome, "run finished");
            }
            Internal::CooldownElapsed => match self.queue.pop_front() {
                Some(job) => {
                    crate::metrics::set_queue_depth(self.queue.len());
                    self.start_run(job);
                }
                None => {
                    self.state = RunState::Idle;
                }
            },
        }
    }

    async fn status(&self) -> AnalysisStatus {
        let results = &self.services.results;
        let last_analysis = results.last_analysis().await.unwrap_or_else(|e| {
            warn!(target: "orchestrator", error = %e, "last analysis unreadable");
            None
        });
        let last_error = results.last_error().await.unwrap_or_else(|e| {
            warn!(target: "orchestrator", error = %e, "last error unreadable");
            None
        });
        AnalysisStatus {
            state: self.state,
            queue_length: self.queue.len(),
            enabled: self.settings.enabled,
            last_analysis,
            last_error,
        }
    }

    /// Per-tab entry when a tab is given, else the global latest slot.
    async fn stored_recommendations(&self, tab_id: Option<u64>) -> Response {
        let results = &self.services.results;
        let found = match tab_id {
            Some(id) => results.for_tab(id).await.map(|stored| match stored {
                Some(s) => (s.recommendations, Some(s.timestamp)),
                None => (Vec::new(), None),
            }),
            None => results.latest().await.map(|recs| (recs, None)),
        };
        match found {
            Ok((recommendations, timestamp)) => Response::Recommendations {
                recommendations,
                timestamp,
            },
            Err(e) => Response::error(format!("{e:#}")),
        }
    }

    async fn update_settings(&mut self, patch: &serde_json::Value) -> Response {
        let next = match self.settings.apply_update(patch) {
            Ok(s) => s,
            Err(e) => {
                warn!(target: "orchestrator", error = %e, "settings update rejected");
                return Response::error(e);
            }
        };
        if let Err(e) = next.persist(self.services.settings_store.as_ref()).await {
            return Response::error(format!("{e:#}"));
        }
        self.apply_settings(next);
        info!(target: "orchestrator", settings = ?self.settings, "settings updated");
        Response::Updated {
            settings: self.settings.public_view(),
        }
    }

    async fn reset_settings(&mut self) -> Response {
        let store = self.services.settings_store.as_ref();
        let defaults = Settings::default();
        let cleared = async {
            store.clear().await?;
            defaults.persist(store).await
        };
        if let Err(e) = cleared.await {
            return Response::error(format!("{e:#}"));
        }
        self.apply_settings(defaults);
        info!(target: "orchestrator", "settings reset to defaults");
        Response::Reset
    }

    fn apply_settings(&mut self, next: Settings) {
        self.limiter
            .set_interval(Duration::from_millis(next.analysis_delay_ms));
        self.settings = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::DisabledClient;
    use crate::cache::SystemClock;
    use crate::config::LlmConfig;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn services() -> Services {
        Services {
            analyzer: Arc::new(ContentAnalyzer::new(
                Arc::new(DisabledClient),
                LlmConfig::default(),
            )),
            sources: vec![],
            settings_store: Arc::new(MemoryStore::new()),
            results: ResultStore::new(Arc::new(MemoryStore::new())),
            capture: Arc::new(NoCapture),
            clock: Arc::new(SystemClock),
        }
    }

    #[tokio::test]
    async fn capture_without_host_reports_unavailable() {
        let (h, _task) = Orchestrator::spawn(services(), Settings::default(), OrchestratorConfig::default());
        let resp = h.request(Request::CaptureTab { tab_id: Some(1) }).await.unwrap();
        assert_eq!(resp, Response::error(CaptureError::Unavailable));
    }

    #[tokio::test]
    async fn update_then_reset_settings() {
        let (h, _task) = Orchestrator::spawn(services(), Settings::default(), OrchestratorConfig::default());
        let resp = h
            .request(Request::UpdateSettings {
                settings: json!({"maxRecommendations": 2, "platforms": {"kalshi": false}}),
            })
            .await
            .unwrap();
        let Response::Updated { settings } = resp else {
            panic!("expected updated, got {resp:?}");
        };
        assert_eq!(settings["maxRecommendations"], 2);
        assert_eq!(settings["platforms"]["polymarket"], true);

        let bad = h
            .request(Request::UpdateSettings {
                settings: json!({"openaiApiKey": "bogus"}),
            })
            .await
            .unwrap();
        assert!(matches!(bad, Response::Error { .. }));

        assert_eq!(h.request(Request::ResetSettings).await.unwrap(), Response::Reset);
        let Response::Settings { settings } = h.request(Request::GetSettings).await.unwrap() else {
            panic!("expected settings");
        };
        assert_eq!(settings["maxRecommendations"], 5);
    }

    #[tokio::test]
    async fn handle_reports_closed_after_shutdown() {
        let (h, task) = Orchestrator::spawn(services(), Settings::default(), OrchestratorConfig::default());
        task.abort();
        let _ = task.await;
        let err = h.request(Request::GetAnalysisStatus).await.unwrap_err();
        assert!(matches!(err, PipelineError::Closed));
    }
}
