//! Poll and upload progress reporting.
//!
//! Reports observable progress while `kf doc watch` polls parse jobs and
//! while `kf doc upload` sends batches, so users see status text as it
//! changes. Progress is emitted on **stderr** so stdout remains parseable
//! for scripts.

use std::io::Write;

use crate::models::{format_parse_status, LogEntry};

/// A single progress event.
#[derive(Clone, Debug)]
pub enum ProgressEvent {
    /// Backend answered "still running" without a payload.
    Pending {
        doc_id: String,
        attempt: u32,
        max_attempts: u32,
    },
    /// Backend reported a progress value.
    Progress {
        doc_id: String,
        attempt: u32,
        max_attempts: u32,
        progress: f64,
    },
    /// A new (deduplicated) log line was recorded.
    Log { doc_id: String, entry: LogEntry },
    /// A poll tick failed; polling continues.
    TickFailed {
        doc_id: String,
        attempt: u32,
        error: String,
    },
    /// Polling stopped.
    Finished {
        doc_id: String,
        attempts: u32,
        progress: f64,
        reason: String,
    },
    /// Upload phase: `n` batches sent out of `total`.
    Uploading {
        kb_id: String,
        n: u64,
        total: u64,
        files: u64,
    },
}

/// Reports progress. Implementations write to stderr (human or JSON).
pub trait ProgressReporter: Send + Sync {
    /// Emit a progress event. Called from the poller and the uploader.
    fn report(&self, event: ProgressEvent);
}

/// Human-friendly progress on stderr: "doc-1  parsing 50%  (2/60)".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let line = match &event {
            ProgressEvent::Pending {
                doc_id,
                attempt,
                max_attempts,
            } => format!("{}  queued  ({}/{})\n", doc_id, attempt, max_attempts),
            ProgressEvent::Progress {
                doc_id,
                attempt,
                max_attempts,
                progress,
            } => format!(
                "{}  {}  ({}/{})\n",
                doc_id,
                format_parse_status(*progress),
                attempt,
                max_attempts
            ),
            ProgressEvent::Log { doc_id, entry } => {
                format!("{}  {} {}\n", doc_id, entry.time, entry.message)
            }
            ProgressEvent::TickFailed {
                doc_id,
                attempt,
                error,
            } => format!("{}  poll {} failed: {}\n", doc_id, attempt, error),
            ProgressEvent::Finished {
                doc_id,
                attempts,
                progress,
                reason,
            } => format!(
                "{}  {} after {} polls ({})\n",
                doc_id,
                reason,
                attempts,
                format_parse_status(*progress)
            ),
            ProgressEvent::Uploading {
                kb_id,
                n,
                total,
                files,
            } => format!(
                "upload {}  batch {} / {}  ({} files)\n",
                kb_id,
                format_number(*n),
                format_number(*total),
                format_number(*files)
            ),
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        let obj = match &event {
            ProgressEvent::Pending {
                doc_id,
                attempt,
                max_attempts,
            } => serde_json::json!({
                "event": "pending",
                "doc_id": doc_id,
                "attempt": attempt,
                "max_attempts": max_attempts
            }),
            ProgressEvent::Progress {
                doc_id,
                attempt,
                max_attempts,
                progress,
            } => serde_json::json!({
                "event": "progress",
                "doc_id": doc_id,
                "attempt": attempt,
                "max_attempts": max_attempts,
                "progress": progress
            }),
            ProgressEvent::Log { doc_id, entry } => serde_json::json!({
                "event": "log",
                "doc_id": doc_id,
                "time": entry.time,
                "message": entry.message
            }),
            ProgressEvent::TickFailed {
                doc_id,
                attempt,
                error,
            } => serde_json::json!({
                "event": "tick_failed",
                "doc_id": doc_id,
                "attempt": attempt,
                "error": error
            }),
            ProgressEvent::Finished {
                doc_id,
                attempts,
                progress,
                reason,
            } => serde_json::json!({
                "event": "finished",
                "doc_id": doc_id,
                "attempts": attempts,
                "progress": progress,
                "reason": reason
            }),
            ProgressEvent::Uploading {
                kb_id,
                n,
                total,
                files,
            } => serde_json::json!({
                "event": "uploading",
                "kb_id": kb_id,
                "n": n,
                "total": total,
                "files": files
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    /// Build a reporter for this mode.
    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
