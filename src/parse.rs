//! Parse dispatch by parser type.
//!
//! Documents whose `parser_id` is `mineru` are parsed by the external
//! KnowFlow service, one submission per document. Every other document goes
//! to the backend's built-in run endpoint in a single call.
//!
//! `parse_method`, `language` and the default chunking config come from the
//! document's knowledge base when it sets them, else from `[parser]`.
//!
//! When every routed group succeeds the document list is invalidated once.
//! Individual submission failures are recorded in the [`DispatchReport`]
//! and never retried.

use serde::Serialize;
use std::collections::HashMap;

use crate::api::{ApiClient, ParseRequest};
use crate::cache::QueryKey;
use crate::config::ParserConfig;
use crate::error::ApiError;
use crate::models::{DocumentInfo, KbParserSettings};

/// `parser_id` of documents handled by the KnowFlow (MinerU) parser.
pub const MINERU_PARSER: &str = "mineru";

/// What to do with the selected documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunAction {
    Start,
    Cancel,
}

impl RunAction {
    /// Wire value of the `run` field.
    pub fn code(self) -> u8 {
        match self {
            RunAction::Start => 1,
            RunAction::Cancel => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    Mineru,
    Builtin,
}

/// Outcome of one document's submission.
#[derive(Debug, Clone, Serialize)]
pub struct Submission {
    pub doc_id: String,
    pub route: Route,
    /// `None` when accepted, otherwise the failure message.
    pub error: Option<String>,
}

impl Submission {
    pub fn accepted(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DispatchReport {
    pub submissions: Vec<Submission>,
    pub refreshed: bool,
}

impl DispatchReport {
    pub fn all_accepted(&self) -> bool {
        self.submissions.iter().all(Submission::accepted)
    }

    pub fn failures(&self) -> impl Iterator<Item = &Submission> {
        self.submissions.iter().filter(|s| !s.accepted())
    }

    /// Accepted KnowFlow submissions, the ones worth polling.
    pub fn watchable(&self) -> Vec<String> {
        self.submissions
            .iter()
            .filter(|s| s.accepted() && s.route == Route::Mineru)
            .map(|s| s.doc_id.clone())
            .collect()
    }
}

/// Documents split by the parser that will handle them.
#[derive(Debug, Default)]
struct Plan {
    mineru: Vec<DocumentInfo>,
    builtin: Vec<String>,
}

fn plan(infos: Vec<DocumentInfo>) -> Plan {
    let mut plan = Plan::default();
    for info in infos {
        if info.parser_id == MINERU_PARSER {
            plan.mineru.push(info);
        } else {
            plan.builtin.push(info.id);
        }
    }
    plan
}

/// The configured parser settings with a knowledge base's own values on top.
fn effective_parser(base: &ParserConfig, kb: Option<&KbParserSettings>) -> ParserConfig {
    let Some(kb) = kb else {
        return base.clone();
    };
    let set = |v: &Option<String>| {
        v.as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(String::from)
    };
    ParserConfig {
        knowflow_api_url: base.knowflow_api_url.clone(),
        parse_method: set(&kb.parse_method).unwrap_or_else(|| base.parse_method.clone()),
        language: set(&kb.language).unwrap_or_else(|| base.language.clone()),
        chunking: kb.chunking_config.clone().or_else(|| base.chunking.clone()),
    }
}

/// Body for one KnowFlow submission. The document's own chunking config
/// wins over the configured default.
fn parse_request(info: &DocumentInfo, parser: &ParserConfig) -> ParseRequest {
    ParseRequest {
        parse_method: parser.parse_method.clone(),
        language: parser.language.clone(),
        chunking_config: info
            .parser_config
            .chunking_config
            .clone()
            .or_else(|| parser.chunking.clone()),
    }
}

/// Start or cancel parsing for `doc_ids`, routing each by parser type.
///
/// Fails as a whole only when the document lookup fails or KnowFlow
/// documents are present without a configured KnowFlow URL.
pub async fn run_documents(
    client: &ApiClient,
    parser: &ParserConfig,
    doc_ids: &[String],
    action: RunAction,
    delete: bool,
) -> Result<DispatchReport, ApiError> {
    let infos = client.document_infos(doc_ids).await?;
    let plan = plan(infos);
    tracing::debug!(
        mineru = plan.mineru.len(),
        builtin = plan.builtin.len(),
        "dispatching parse"
    );

    if !plan.mineru.is_empty() && !client.has_knowflow() {
        return Err(ApiError::NotConfigured(
            "parser.knowflow_api_url is required for mineru documents".to_string(),
        ));
    }

    let mut report = DispatchReport::default();
    let mut per_kb: HashMap<String, ParserConfig> = HashMap::new();

    for info in &plan.mineru {
        let error = match action {
            // KnowFlow has no cancel; nothing to send.
            RunAction::Cancel => None,
            RunAction::Start => {
                if !per_kb.contains_key(&info.kb_id) {
                    let settings = kb_settings(client, &info.kb_id).await;
                    per_kb.insert(info.kb_id.clone(), effective_parser(parser, settings.as_ref()));
                }
                let effective = per_kb.get(&info.kb_id).unwrap_or(parser);
                let body = parse_request(info, effective);
                match client.submit_parse(&info.id, &body).await {
                    Ok(()) => None,
                    Err(e) => {
                        tracing::warn!(doc_id = %info.id, error = %e, "parse submission failed");
                        Some(e.to_string())
                    }
                }
            }
        };
        report.submissions.push(Submission {
            doc_id: info.id.clone(),
            route: Route::Mineru,
            error,
        });
    }

    if !plan.builtin.is_empty() {
        let error = match client.run_builtin(&plan.builtin, action.code(), delete).await {
            Ok(()) => None,
            Err(e) => {
                tracing::warn!(count = plan.builtin.len(), error = %e, "built-in run failed");
                Some(e.to_string())
            }
        };
        report
            .submissions
            .extend(plan.builtin.iter().map(|id| Submission {
                doc_id: id.clone(),
                route: Route::Builtin,
                error: error.clone(),
            }));
    }

    if report.all_accepted() {
        client.cache().invalidate(&QueryKey::document_list());
        report.refreshed = true;
    }
    Ok(report)
}

/// A knowledge base's parser settings, or `None` when they cannot be read.
async fn kb_settings(client: &ApiClient, kb_id: &str) -> Option<KbParserSettings> {
    if kb_id.is_empty() {
        return None;
    }
    match client.kb_parser_settings(kb_id).await {
        Ok(settings) => Some(settings),
        Err(e) => {
            tracing::warn!(kb_id, error = %e, "knowledge base parser settings unavailable");
            None
        }
    }
}
