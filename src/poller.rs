//! Parse-progress poller.
//!
//! After a parse job is submitted, [`Poller`] repeatedly queries the
//! backend's progress endpoint until the job reaches a terminal state,
//! recording deduplicated, timestamped status messages for display.
//!
//! # Loop contract
//!
//! Each tick calls [`ProgressSource::fetch_progress`] once:
//!
//! - `Pending` (`code = 202`) consumes one attempt and nothing else.
//! - `Report` updates the document's progress unconditionally and pushes a
//!   [`LogEntry`] to the front of its log when the message is non-empty and
//!   differs from the newest entry. The log keeps at most `log_capacity`
//!   entries, most recent first.
//! - A failed call is logged and counts as "no update"; polling continues.
//!
//! The loop stops without error when the backend reports a terminal run
//! state, when progress reaches 1.0, or after `max_attempts` ticks. It waits
//! `interval` between ticks and never after the last one. Only a `running`
//! flag of done (`"3"`) invalidates the document list; other exits force no
//! refresh.
//!
//! At most one loop runs per document id. Loops for different documents are
//! independent and may run concurrently.
//!
//! Board entries outlive their loop so results stay readable;
//! [`ProgressBoard::evict_finished`] drops them after a retention period.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

use crate::api::{ApiClient, ProgressReport, ProgressResponse};
use crate::cache::{QueryCache, QueryKey};
use crate::config::PollingConfig;
use crate::error::{ApiError, PollError};
use crate::models::{format_parse_status, LogEntry, RunStatus};
use crate::progress::{NoProgress, ProgressEvent, ProgressReporter};

/// Anything that can answer a progress query for a document.
#[async_trait]
pub trait ProgressSource: Send + Sync {
    async fn fetch_progress(&self, doc_id: &str) -> Result<ProgressResponse, ApiError>;
}

#[async_trait]
impl ProgressSource for ApiClient {
    async fn fetch_progress(&self, doc_id: &str) -> Result<ProgressResponse, ApiError> {
        ApiClient::fetch_progress(self, doc_id).await
    }
}

/// Polling cadence and log bound.
#[derive(Debug, Clone)]
pub struct PollOptions {
    pub interval: Duration,
    pub max_attempts: u32,
    pub log_capacity: usize,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(2000),
            max_attempts: 60,
            log_capacity: 20,
        }
    }
}

impl From<&PollingConfig> for PollOptions {
    fn from(cfg: &PollingConfig) -> Self {
        Self {
            interval: cfg.interval(),
            max_attempts: cfg.max_attempts,
            log_capacity: cfg.log_capacity,
        }
    }
}

/// Client-side view of one document's parse state.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentProgress {
    pub doc_id: String,
    pub progress: f64,
    pub running: RunStatus,
    pub status: RunStatus,
    /// Most recent first.
    pub logs: VecDeque<LogEntry>,
    /// Set when the last poll loop for this document stopped.
    #[serde(skip)]
    finished_at: Option<Instant>,
}

impl DocumentProgress {
    fn new(doc_id: &str) -> Self {
        Self {
            doc_id: doc_id.to_string(),
            progress: 0.0,
            running: RunStatus::Unstarted,
            status: RunStatus::Unstarted,
            logs: VecDeque::new(),
            finished_at: None,
        }
    }

    pub fn label(&self) -> String {
        format_parse_status(self.progress)
    }

    /// Apply one report. Returns the log entry if one was appended.
    fn apply(&mut self, report: &ProgressReport, now: String, capacity: usize) -> Option<LogEntry> {
        self.progress = report.progress;
        self.running = report.running.clone();
        self.status = report.status.clone();

        let message = report.message.as_str();
        if message.is_empty() {
            return None;
        }
        if self.logs.front().is_some_and(|last| last.message == message) {
            return None;
        }
        let entry = LogEntry {
            time: now,
            message: message.to_string(),
        };
        self.logs.push_front(entry.clone());
        self.logs.truncate(capacity);
        Some(entry)
    }
}

/// Per-document progress shared between pollers and readers.
///
/// Each document's entry is written only by that document's poller.
#[derive(Default)]
pub struct ProgressBoard {
    docs: RwLock<HashMap<String, DocumentProgress>>,
}

impl ProgressBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, doc_id: &str) -> Option<DocumentProgress> {
        let docs = self.docs.read().unwrap_or_else(|e| e.into_inner());
        docs.get(doc_id).cloned()
    }

    /// All tracked documents, ordered by id.
    pub fn all(&self) -> Vec<DocumentProgress> {
        let docs = self.docs.read().unwrap_or_else(|e| e.into_inner());
        let mut all: Vec<DocumentProgress> = docs.values().cloned().collect();
        all.sort_by(|a, b| a.doc_id.cmp(&b.doc_id));
        all
    }

    /// Make sure `doc_id` has an entry and mark it as being polled again.
    fn ensure(&self, doc_id: &str) {
        let mut docs = self.docs.write().unwrap_or_else(|e| e.into_inner());
        docs.entry(doc_id.to_string())
            .or_insert_with(|| DocumentProgress::new(doc_id))
            .finished_at = None;
    }

    /// Drop documents whose polling stopped at least `retention` ago.
    /// Documents still being polled are kept. Returns how many were removed.
    pub fn evict_finished(&self, retention: Duration) -> usize {
        let mut docs = self.docs.write().unwrap_or_else(|e| e.into_inner());
        let before = docs.len();
        docs.retain(|_, doc| !matches!(doc.finished_at, Some(t) if t.elapsed() >= retention));
        before - docs.len()
    }

    fn update<R>(&self, doc_id: &str, f: impl FnOnce(&mut DocumentProgress) -> R) -> R {
        let mut docs = self.docs.write().unwrap_or_else(|e| e.into_inner());
        let doc = docs
            .entry(doc_id.to_string())
            .or_insert_with(|| DocumentProgress::new(doc_id));
        f(doc)
    }
}

/// Why a poll loop stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "status", rename_all = "snake_case")]
pub enum StopReason {
    /// Progress reached 1.0 without a terminal run state.
    Completed,
    /// The backend reported a terminal run state.
    Terminal(RunStatus),
    /// `max_attempts` ticks were issued.
    Exhausted,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Completed => f.write_str("completed"),
            StopReason::Terminal(status) => write!(f, "{}", status),
            StopReason::Exhausted => f.write_str("gave up"),
        }
    }
}

/// Result of one finished poll loop.
#[derive(Debug, Clone, Serialize)]
pub struct PollOutcome {
    pub doc_id: String,
    pub attempts: u32,
    pub progress: f64,
    pub reason: StopReason,
    /// Whether the document list was invalidated.
    pub refreshed: bool,
}

type Clock = Arc<dyn Fn() -> String + Send + Sync>;

fn wall_clock() -> String {
    chrono::Local::now().format("%H:%M:%S").to_string()
}

/// Removes its document id from the active set when dropped.
struct ActiveGuard {
    active: Arc<Mutex<HashSet<String>>>,
    doc_id: String,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        active.remove(&self.doc_id);
    }
}

/// Runs parse-progress poll loops.
#[derive(Clone)]
pub struct Poller {
    source: Arc<dyn ProgressSource>,
    board: Arc<ProgressBoard>,
    cache: Arc<QueryCache>,
    reporter: Arc<dyn ProgressReporter>,
    options: PollOptions,
    active: Arc<Mutex<HashSet<String>>>,
    clock: Clock,
}

impl Poller {
    pub fn new(
        source: Arc<dyn ProgressSource>,
        board: Arc<ProgressBoard>,
        cache: Arc<QueryCache>,
        options: PollOptions,
    ) -> Self {
        Self {
            source,
            board,
            cache,
            reporter: Arc::new(NoProgress),
            options,
            active: Arc::new(Mutex::new(HashSet::new())),
            clock: Arc::new(wall_clock),
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Replace the `HH:MM:SS` timestamp source.
    pub fn with_clock(mut self, clock: impl Fn() -> String + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn board(&self) -> &Arc<ProgressBoard> {
        &self.board
    }

    pub fn is_polling(&self, doc_id: &str) -> bool {
        let active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        active.contains(doc_id)
    }

    fn claim(&self, doc_id: &str) -> Result<ActiveGuard, PollError> {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if !active.insert(doc_id.to_string()) {
            return Err(PollError::AlreadyPolling(doc_id.to_string()));
        }
        self.board.ensure(doc_id);
        Ok(ActiveGuard {
            active: self.active.clone(),
            doc_id: doc_id.to_string(),
        })
    }

    /// Poll `doc_id` on the current task until the loop stops.
    pub async fn poll_progress(&self, doc_id: &str) -> Result<PollOutcome, PollError> {
        let guard = self.claim(doc_id)?;
        let outcome = self.run(doc_id).await;
        drop(guard);
        Ok(outcome)
    }

    /// Start a background poll loop for `doc_id`.
    ///
    /// The id is claimed before this returns, so a second call for the same
    /// document fails immediately with [`PollError::AlreadyPolling`].
    pub fn spawn(&self, doc_id: &str) -> Result<JoinHandle<PollOutcome>, PollError> {
        let guard = self.claim(doc_id)?;
        let poller = self.clone();
        let doc_id = doc_id.to_string();
        Ok(tokio::spawn(async move {
            let _guard = guard;
            poller.run(&doc_id).await
        }))
    }

    async fn run(&self, doc_id: &str) -> PollOutcome {
        let max_attempts = self.options.max_attempts;
        tracing::debug!(doc_id, max_attempts, "polling parse progress");

        let mut attempts = 0u32;
        let mut refreshed = false;
        let reason = loop {
            attempts += 1;
            match self.source.fetch_progress(doc_id).await {
                Ok(ProgressResponse::Pending) => {
                    tracing::debug!(doc_id, attempts, "parse pending");
                    self.reporter.report(ProgressEvent::Pending {
                        doc_id: doc_id.to_string(),
                        attempt: attempts,
                        max_attempts,
                    });
                }
                Ok(ProgressResponse::Report(report)) => {
                    let now = (self.clock)();
                    let appended = self.board.update(doc_id, |doc| {
                        doc.apply(&report, now, self.options.log_capacity)
                    });
                    self.reporter.report(ProgressEvent::Progress {
                        doc_id: doc_id.to_string(),
                        attempt: attempts,
                        max_attempts,
                        progress: report.progress,
                    });
                    if let Some(entry) = appended {
                        self.reporter.report(ProgressEvent::Log {
                            doc_id: doc_id.to_string(),
                            entry,
                        });
                    }
                    if let Some(reason) = stop_reason(&report) {
                        if report.running == RunStatus::Done {
                            self.cache.invalidate(&QueryKey::document_list());
                            refreshed = true;
                        }
                        break reason;
                    }
                }
                Err(e) => {
                    tracing::warn!(doc_id, attempts, error = %e, "progress poll failed");
                    self.reporter.report(ProgressEvent::TickFailed {
                        doc_id: doc_id.to_string(),
                        attempt: attempts,
                        error: e.to_string(),
                    });
                }
            }

            if attempts >= max_attempts {
                break StopReason::Exhausted;
            }
            tokio::time::sleep(self.options.interval).await;
        };

        let progress = self.board.update(doc_id, |doc| {
            doc.finished_at = Some(Instant::now());
            doc.progress
        });
        tracing::info!(doc_id, attempts, progress, reason = %reason, "polling stopped");
        self.reporter.report(ProgressEvent::Finished {
            doc_id: doc_id.to_string(),
            attempts,
            progress,
            reason: reason.to_string(),
        });

        PollOutcome {
            doc_id: doc_id.to_string(),
            attempts,
            progress,
            reason,
            refreshed,
        }
    }
}

/// Terminal check for one report.
///
/// A done flag in either field wins; cancelled and failed states end the
/// loop too; otherwise progress 1.0 ends it.
fn stop_reason(report: &ProgressReport) -> Option<StopReason> {
    if report.running == RunStatus::Done || report.status == RunStatus::Done {
        return Some(StopReason::Terminal(RunStatus::Done));
    }
    for state in [&report.running, &report.status] {
        if state.is_terminal() {
            return Some(StopReason::Terminal(state.clone()));
        }
    }
    if report.progress >= 1.0 {
        return Some(StopReason::Completed);
    }
    None
}
