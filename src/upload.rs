//! Batched document upload.
//!
//! Files are sent to a knowledge base in batches of `upload.batch_size`
//! (default 20), one multipart request per batch. A batch whose request
//! fails outright is recorded as code 500 and the remaining batches are
//! still sent. Batch results fold into a single [`UploadSummary`].

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::api::{ApiClient, UploadFile, UploadReply};
use crate::cache::QueryKey;
use crate::progress::{ProgressEvent, ProgressReporter};

/// Code recorded for a batch whose request never got an answer.
pub const CODE_BATCH_FAILED: i64 = 500;

/// Folded result of all batches.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadSummary {
    /// 500 if any batch hit 500, 0 if all succeeded, else the first non-zero code.
    pub code: i64,
    pub succeeded: bool,
    /// Non-empty batch messages, one per line.
    pub message: String,
    pub batches: usize,
    pub files: usize,
}

impl UploadSummary {
    /// Whether the document list should be refreshed after this upload.
    pub fn needs_refresh(&self) -> bool {
        self.succeeded || self.code == CODE_BATCH_FAILED
    }
}

/// Expand `paths` into a flat list of files. Directories are walked
/// recursively; only regular files are kept, in walk order.
pub fn collect_files(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        let meta = std::fs::metadata(path)
            .with_context(|| format!("Cannot read upload path: {}", path.display()))?;
        if meta.is_file() {
            files.push(path.clone());
            continue;
        }
        let mut found: Vec<PathBuf> = Vec::new();
        for entry in WalkDir::new(path) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            found.push(entry.into_path());
        }
        found.sort();
        files.extend(found);
    }
    Ok(files)
}

/// Read each file into memory, named by its file name.
pub fn read_files(paths: &[PathBuf]) -> Result<Vec<UploadFile>> {
    paths
        .iter()
        .map(|path| {
            let bytes = std::fs::read(path)
                .with_context(|| format!("Failed to read file: {}", path.display()))?;
            Ok(UploadFile {
                name: file_name(path),
                bytes,
            })
        })
        .collect()
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Fold per-batch replies into one summary.
pub fn aggregate(replies: &[UploadReply], files: usize) -> UploadSummary {
    let succeeded = replies.iter().all(|r| r.code == 0);
    let any_failed = replies.iter().any(|r| r.code == CODE_BATCH_FAILED);
    let code = if any_failed {
        CODE_BATCH_FAILED
    } else if succeeded {
        0
    } else {
        replies
            .iter()
            .map(|r| r.code)
            .find(|c| *c != 0)
            .unwrap_or(0)
    };
    let message = replies
        .iter()
        .filter_map(|r| r.message.as_deref())
        .filter(|m| !m.is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    UploadSummary {
        code,
        succeeded,
        message,
        batches: replies.len(),
        files,
    }
}

/// Upload `files` into `kb_id` in batches of `batch_size`.
pub async fn upload_files(
    client: &ApiClient,
    kb_id: &str,
    files: &[UploadFile],
    batch_size: usize,
    reporter: &dyn ProgressReporter,
) -> UploadSummary {
    let batch_size = batch_size.max(1);
    let total = files.len().div_ceil(batch_size);
    let mut replies = Vec::with_capacity(total);
    let mut sent = 0usize;

    for (i, batch) in files.chunks(batch_size).enumerate() {
        let reply = match client.upload_batch(kb_id, batch).await {
            Ok(reply) => reply,
            Err(e) => {
                let names: Vec<&str> = batch.iter().map(|f| f.name.as_str()).collect();
                tracing::warn!(kb_id, files = %names.join(", "), error = %e, "upload batch failed");
                UploadReply {
                    code: CODE_BATCH_FAILED,
                    message: Some(e.to_string()),
                }
            }
        };
        replies.push(reply);
        sent += batch.len();
        reporter.report(ProgressEvent::Uploading {
            kb_id: kb_id.to_string(),
            n: (i + 1) as u64,
            total: total as u64,
            files: sent as u64,
        });
    }

    let summary = aggregate(&replies, files.len());
    if summary.needs_refresh() {
        client.cache().invalidate(&QueryKey::document_list());
    }
    tracing::info!(
        kb_id,
        code = summary.code,
        batches = summary.batches,
        files = summary.files,
        "upload finished"
    );
    summary
}
