// src/extract/monitor.rs
//! Debounced page monitoring.
//!
//! Page snapshots (one per DOM mutation batch) arrive on a channel. Each one
//! restarts a trailing timer; only after `delay` without mutations is the
//! latest snapshot extracted and, if it passes the [`ChangeGate`], forwarded.

use std::future;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::debug;

use super::{extract, ExtractedContent};

pub const DEBOUNCE_DELAY: Duration = Duration::from_secs(2);
pub const MIN_TEXT_CHARS: usize = 100;

/// Current DOM of a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageSnapshot {
    pub url: String,
    pub html: String,
}

/// Trailing-edge debounce timer.
#[derive(Debug)]
pub struct Debouncer {
    delay: Duration,
    deadline: Option<Instant>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            deadline: None,
        }
    }

    /// (Re)starts the timer.
    pub fn poke(&mut self) {
        self.deadline = Some(Instant::now() + self.delay);
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Resolves once the armed deadline passes; pending forever when disarmed.
    /// Cancel-safe: the deadline is cleared only after it has elapsed.
    pub async fn fired(&mut self) {
        match self.deadline {
            Some(d) => {
                sleep_until(d).await;
                self.deadline = None;
            }
            None => future::pending::<()>().await,
        }
    }
}

/// Forwards only substantial text that differs from the last forwarded one.
#[derive(Debug, Default)]
pub struct ChangeGate {
    last_text: Option<String>,
}

impl ChangeGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn admit(&mut self, content: &ExtractedContent) -> bool {
        let len = content.text.chars().count();
        if len <= MIN_TEXT_CHARS {
            return false;
        }
        if self.last_text.as_deref() == Some(content.text.as_str()) {
            return false;
        }
        self.last_text = Some(content.text.clone());
        true
    }
}

pub struct ContentMonitor {
    pub snapshots: mpsc::Sender<PageSnapshot>,
    pub task: JoinHandle<()>,
}

impl ContentMonitor {
    /// Starts monitoring with `initial` as the current DOM; the first
    /// extraction is scheduled right away (after one debounce window).
    /// The task ends when every snapshot sender is dropped or `out` closes.
    pub fn spawn(
        initial: PageSnapshot,
        delay: Duration,
        out: mpsc::Sender<ExtractedContent>,
    ) -> Self {
        let (tx, mut rx) = mpsc::channel::<PageSnapshot>(64);
        let task = tokio::spawn(async move {
            let mut latest = initial;
            let mut debounce = Debouncer::new(delay);
            let mut gate = ChangeGate::new();
            debounce.poke();

            loop {
                tokio::select! {
                    snap = rx.recv() => match snap {
                        Some(s) => {
                            latest = s;
                            debounce.poke();
                        }
                        None => break,
                    },
                    _ = debounce.fired() => {
                        let content = extract(&latest.url, &latest.html);
                        if gate.admit(&content) {
                            debug!(target: "extract", url = %content.url, chars = content.text.len(), "content forwarded");
                            if out.send(content).await.is_err() {
                                break;
                            }
                        } else {
                            debug!(target: "extract", url = %latest.url, "content unchanged or too short");
                        }
                    }
                }
            }
        });
        Self {
            snapshots: tx,
            task,
        }
    }
}
