//! Command implementations behind the `kf` CLI.
//!
//! Each `run_*` function performs one user action against the backend and
//! prints its result to stdout. Notifications and progress go to stderr.

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::api::ApiClient;
use crate::cache::QueryCache;
use crate::chunking::ChunkingDraft;
use crate::config::Config;
use crate::models::{format_parse_status, NewKnowledgeBase, NewUser, UserUpdate};
use crate::parse::{run_documents, RunAction};
use crate::poller::{PollOptions, PollOutcome, Poller, ProgressBoard};
use crate::progress::ProgressReporter;
use crate::server;
use crate::upload;

/// Everything a command needs: config, client and the shared poller.
pub struct Session {
    pub config: Config,
    pub client: ApiClient,
    pub poller: Poller,
    reporter: Arc<dyn ProgressReporter>,
}

impl Session {
    pub fn new(config: Config, reporter: Arc<dyn ProgressReporter>) -> Result<Self> {
        let cache = Arc::new(QueryCache::new());
        let client = ApiClient::new(&config, cache.clone()).context("Failed to build HTTP client")?;
        let poller = Poller::new(
            Arc::new(client.clone()),
            Arc::new(ProgressBoard::new()),
            cache,
            PollOptions::from(&config.polling),
        )
        .with_reporter(reporter.clone());
        Ok(Self {
            config,
            client,
            poller,
            reporter,
        })
    }
}

// ============ Knowledge bases ============

pub async fn run_kb_list(s: &Session, name: Option<&str>, page: u32, size: u32) -> Result<()> {
    let kbs = s.client.list_knowledge_bases(page, size, name).await?;
    if kbs.list.is_empty() {
        println!("No knowledge bases.");
        return Ok(());
    }
    println!("{:<34} {:<24} {:>6} {:>8}", "ID", "NAME", "DOCS", "CHUNKS");
    for kb in &kbs.list {
        println!(
            "{:<34} {:<24} {:>6} {:>8}",
            kb.id, kb.name, kb.doc_num, kb.chunk_num
        );
    }
    println!("({} of {})", kbs.list.len(), kbs.total);
    Ok(())
}

pub async fn run_kb_create(s: &Session, kb: NewKnowledgeBase) -> Result<()> {
    s.client.create_knowledge_base(&kb).await?;
    println!("Created knowledge base '{}'.", kb.name);
    Ok(())
}

pub async fn run_kb_delete(s: &Session, ids: &[String]) -> Result<()> {
    match ids {
        [id] => s.client.delete_knowledge_base(id).await?,
        _ => s.client.delete_knowledge_bases(ids).await?,
    }
    println!("Deleted {} knowledge base(s).", ids.len());
    Ok(())
}

pub async fn run_kb_docs(s: &Session, kb_id: &str, page: u32, size: u32) -> Result<()> {
    let docs = s.client.list_documents(kb_id, page, size).await?;
    if docs.list.is_empty() {
        println!("No documents.");
        return Ok(());
    }
    println!(
        "{:<34} {:<32} {:>7} {:<12} CREATED",
        "ID", "NAME", "CHUNKS", "STATUS"
    );
    for doc in &docs.list {
        println!(
            "{:<34} {:<32} {:>7} {:<12} {}",
            doc.id,
            doc.name,
            doc.chunk_count,
            format_parse_status(doc.progress),
            doc.created_at
        );
    }
    println!("({} of {})", docs.list.len(), docs.total);
    Ok(())
}

// ============ Documents ============

pub async fn run_parse(s: &Session, ids: &[String], cancel: bool, watch: bool) -> Result<()> {
    let action = if cancel {
        RunAction::Cancel
    } else {
        RunAction::Start
    };
    let report = run_documents(&s.client, &s.config.parser, ids, action, false).await?;

    for failure in report.failures() {
        eprintln!(
            "Parse submission failed for {}: {}",
            failure.doc_id,
            failure.error.as_deref().unwrap_or_default()
        );
    }
    let accepted = report.submissions.len() - report.failures().count();
    println!("Submitted {} of {} document(s).", accepted, ids.len());

    if watch && action == RunAction::Start {
        let watchable = report.watchable();
        if !watchable.is_empty() {
            run_watch(s, &watchable).await?;
        }
    }
    Ok(())
}

/// Poll every document concurrently and print one line per outcome.
///
/// Repeated ids are polled once.
pub async fn run_watch(s: &Session, ids: &[String]) -> Result<()> {
    let ids = unique(ids);
    let mut handles = Vec::with_capacity(ids.len());
    for id in ids {
        handles.push(s.poller.spawn(id)?);
    }
    let mut outcomes: Vec<PollOutcome> = Vec::with_capacity(handles.len());
    for handle in handles {
        outcomes.push(handle.await.context("poll task panicked")?);
    }

    for outcome in &outcomes {
        println!(
            "{:<34} {:<12} {:<10} after {} poll(s)",
            outcome.doc_id,
            format_parse_status(outcome.progress),
            outcome.reason.to_string(),
            outcome.attempts
        );
        if let Some(doc) = s.poller.board().get(&outcome.doc_id) {
            for entry in doc.logs.iter().rev() {
                println!("    {} {}", entry.time, entry.message);
            }
        }
    }
    Ok(())
}

/// `ids` without repeats, in first-seen order.
fn unique(ids: &[String]) -> Vec<&str> {
    let mut seen = HashSet::new();
    ids.iter()
        .map(String::as_str)
        .filter(|id| seen.insert(*id))
        .collect()
}

pub async fn run_rename(s: &Session, id: &str, name: &str) -> Result<()> {
    s.client.rename_document(id, name).await?;
    println!("Renamed {} to '{}'.", id, name);
    Ok(())
}

pub async fn run_remove(s: &Session, ids: &[String]) -> Result<()> {
    s.client.remove_documents(ids).await?;
    println!("Removed {} document(s).", ids.len());
    Ok(())
}

pub async fn run_upload(s: &Session, kb_id: &str, paths: &[PathBuf]) -> Result<()> {
    let paths = upload::collect_files(paths)?;
    if paths.is_empty() {
        println!("No files to upload.");
        return Ok(());
    }
    let files = upload::read_files(&paths)?;
    let summary = upload::upload_files(
        &s.client,
        kb_id,
        &files,
        s.config.upload.batch_size,
        s.reporter.as_ref(),
    )
    .await;

    if !summary.message.is_empty() {
        eprintln!("{}", summary.message);
    }
    if !summary.succeeded {
        anyhow::bail!(
            "upload finished with code {} ({} file(s) in {} batch(es))",
            summary.code,
            summary.files,
            summary.batches
        );
    }
    println!(
        "Uploaded {} file(s) in {} batch(es).",
        summary.files, summary.batches
    );
    Ok(())
}

// ============ Chunking ============

pub async fn run_chunking_get(s: &Session, doc_id: &str) -> Result<()> {
    let cfg = s.client.get_chunking_config(doc_id).await?;
    println!("strategy:         {}", cfg.strategy);
    println!("chunk_token_num:  {}", cfg.chunk_token_num);
    println!("min_chunk_tokens: {}", cfg.min_chunk_tokens);
    if let Some(pattern) = &cfg.regex_pattern {
        println!("regex_pattern:    {}", pattern);
    }
    Ok(())
}

/// Validate the given options, fill the rest from the document's current
/// config, then save the whole config.
///
/// The current config is fetched only when a field is actually missing, so
/// a bad option fails before any request.
pub async fn run_chunking_set(s: &Session, doc_id: &str, mut draft: ChunkingDraft) -> Result<()> {
    draft.validate_present()?;
    if !draft.is_complete() {
        let current = s.client.get_chunking_config(doc_id).await?;
        draft.fill_from(&current);
    }
    let cfg = draft.validate()?;
    s.client.save_chunking_config(doc_id, &cfg).await?;
    println!("Saved chunking config for {} ({}).", doc_id, cfg.strategy);
    Ok(())
}

// ============ Users ============

pub async fn run_user_list(
    s: &Session,
    username: Option<&str>,
    email: Option<&str>,
    page: u32,
    size: u32,
) -> Result<()> {
    let users = s.client.list_users(page, size, username, email).await?;
    println!("{:<12} {:<24} {:<32} CREATED", "ID", "USERNAME", "EMAIL");
    for u in &users.list {
        println!(
            "{:<12} {:<24} {:<32} {}",
            u.id,
            u.username,
            u.email.as_deref().unwrap_or("-"),
            u.create_time.as_deref().unwrap_or("-")
        );
    }
    println!("({} of {})", users.list.len(), users.total);
    Ok(())
}

pub async fn run_user_create(s: &Session, user: NewUser) -> Result<()> {
    s.client.create_user(&user).await?;
    println!("Created user '{}'.", user.username);
    Ok(())
}

pub async fn run_user_edit(s: &Session, id: &str, update: UserUpdate) -> Result<()> {
    if update.is_empty() {
        anyhow::bail!("nothing to change; pass --username and/or --email");
    }
    s.client.update_user(id, &update).await?;
    println!("Updated user {}.", id);
    Ok(())
}

pub async fn run_user_delete(s: &Session, ids: &[String]) -> Result<()> {
    match ids {
        [id] => s.client.delete_user(id).await?,
        _ => s.client.delete_users(ids).await?,
    }
    println!("Deleted {} user(s).", ids.len());
    Ok(())
}

pub async fn run_reset_password(s: &Session, id: &str, password: &str) -> Result<()> {
    if password.is_empty() {
        anyhow::bail!("password must not be empty");
    }
    s.client.reset_password(id, password).await?;
    println!("Password reset for user {}.", id);
    Ok(())
}

// ============ Teams ============

pub async fn run_team_list(
    s: &Session,
    name: Option<&str>,
    owner: Option<&str>,
    page: u32,
    size: u32,
) -> Result<()> {
    let teams = s.client.list_teams(page, size, name, owner).await?;
    println!("{:<12} {:<24} {:<20} {:>7}", "ID", "NAME", "OWNER", "MEMBERS");
    for t in &teams.list {
        println!(
            "{:<12} {:<24} {:<20} {:>7}",
            t.id,
            t.name,
            t.owner_name.as_deref().unwrap_or("-"),
            t.member_count
        );
    }
    println!("({} of {})", teams.list.len(), teams.total);
    Ok(())
}

pub async fn run_team_delete(s: &Session, id: &str) -> Result<()> {
    s.client.delete_team(id).await?;
    println!("Deleted team {}.", id);
    Ok(())
}

pub async fn run_team_members(s: &Session, team_id: &str) -> Result<()> {
    let members = s.client.list_team_members(team_id).await?;
    if members.is_empty() {
        println!("No members.");
        return Ok(());
    }
    println!("{:<12} {:<24} {:<10} JOINED", "USER", "USERNAME", "ROLE");
    for m in &members {
        println!(
            "{:<12} {:<24} {:<10} {}",
            m.user_id,
            m.username,
            m.role.as_deref().unwrap_or("-"),
            m.join_time.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

pub async fn run_team_add_member(s: &Session, team_id: &str, email: &str) -> Result<()> {
    s.client.add_team_member(team_id, email).await?;
    println!("Added {} to team {}.", email, team_id);
    Ok(())
}

pub async fn run_team_remove_member(s: &Session, team_id: &str, user_id: &str) -> Result<()> {
    s.client.remove_team_member(team_id, user_id).await?;
    println!("Removed user {} from team {}.", user_id, team_id);
    Ok(())
}

// ============ Files ============

pub async fn run_files(s: &Session, name: Option<&str>, page: u32, size: u32) -> Result<()> {
    let files = s.client.list_files(page, size, name).await?;
    println!("{:<34} {:<32} {:>10} TYPE", "ID", "NAME", "SIZE");
    for f in &files.list {
        println!(
            "{:<34} {:<32} {:>10} {}",
            f.id,
            f.name,
            f.size,
            f.kind.as_deref().unwrap_or("-")
        );
    }
    println!("({} of {})", files.list.len(), files.total);
    Ok(())
}

pub async fn run_file_upload(s: &Session, paths: &[PathBuf]) -> Result<()> {
    let paths = upload::collect_files(paths)?;
    if paths.is_empty() {
        println!("No files to upload.");
        return Ok(());
    }
    let files = upload::read_files(&paths)?;
    s.client.upload_stored_files(&files).await?;
    println!("Stored {} file(s).", files.len());
    Ok(())
}

pub async fn run_file_download(s: &Session, id: &str, dest: &Path) -> Result<()> {
    let bytes = s.client.download_file(id).await?;
    std::fs::write(dest, &bytes)
        .with_context(|| format!("Failed to write {}", dest.display()))?;
    println!("Downloaded {} ({} bytes) to {}.", id, bytes.len(), dest.display());
    Ok(())
}

pub async fn run_file_delete(s: &Session, ids: &[String]) -> Result<()> {
    match ids {
        [id] => s.client.delete_file(id).await?,
        _ => s.client.delete_files(ids).await?,
    }
    println!("Deleted {} file(s).", ids.len());
    Ok(())
}

// ============ Server ============

pub async fn run_serve(s: &Session) -> Result<()> {
    server::run_server(&s.config, s.poller.clone()).await
}
