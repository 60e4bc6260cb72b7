//! HTTP client for the knowledge-base admin API and the KnowFlow parse API.
//!
//! Every admin endpoint answers with the same envelope:
//!
//! ```json
//! { "code": 0, "message": "success", "data": { ... } }
//! ```
//!
//! [`ApiClient`] decodes that envelope once, at the boundary, into either
//! the typed payload or an [`ApiError`]. Callers never dig through optional JSON
//! paths. The parse-progress endpoint has its own tagged decoding
//! ([`ProgressResponse`]) because `code = 202` is a normal "no payload yet"
//! answer rather than an error.
//!
//! List calls go through the shared [`QueryCache`]; successful mutations
//! invalidate the matching list prefix.
//!
//! # Endpoints
//!
//! | Call | Method | Path |
//! |------|--------|------|
//! | [`fetch_progress`](ApiClient::fetch_progress) | `GET` | `{knowflow}/api/v1/knowledgebases/documents/{id}/parse/progress` |
//! | [`submit_parse`](ApiClient::submit_parse) | `POST` | `{knowflow}/api/v1/knowledgebases/documents/{id}/parse` |
//! | [`get_chunking_config`](ApiClient::get_chunking_config) | `GET` | `/api/v1/knowledgebases/documents/{id}/chunking-config` |
//! | [`save_chunking_config`](ApiClient::save_chunking_config) | `PUT` | `/api/v1/knowledgebases/documents/{id}/chunking-config` |
//! | [`document_infos`](ApiClient::document_infos) | `POST` | `/v1/document/infos` |
//! | [`kb_parser_settings`](ApiClient::kb_parser_settings) | `GET` | `/v1/kb/detail?kb_id` |
//! | [`run_builtin`](ApiClient::run_builtin) | `POST` | `/v1/document/run` |
//! | [`upload_batch`](ApiClient::upload_batch) | `POST` | `/v1/document/upload` |
//! | [`list_users`](ApiClient::list_users) | `GET` | `/api/v1/users?currentPage&size&username&email` |
//! | [`list_team_members`](ApiClient::list_team_members) | `GET` | `/api/v1/teams/{id}/members` |
//! | [`add_team_member`](ApiClient::add_team_member) | `POST` | `/v1/tenant/{team}/user` |
//! | [`upload_stored_files`](ApiClient::upload_stored_files) | `POST` | `/api/v1/files/upload` |
//! | [`download_file`](ApiClient::download_file) | `GET` | `/api/v1/files/{id}/download` |

use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{QueryCache, QueryKey};
use crate::chunking::ChunkingConfig;
use crate::config::Config;
use crate::error::ApiError;
use crate::models::{
    Document, DocumentInfo, FileRecord, KbParserSettings, KnowledgeBase, NewKnowledgeBase, NewUser,
    Page, RunStatus, Team, TeamMember, User, UserUpdate,
};

/// Envelope code meaning "parse still running, nothing to report yet".
pub const CODE_PENDING: i64 = 202;

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: i64,
    message: Option<String>,
    data: Option<T>,
}

/// Decoded answer of the progress endpoint.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressResponse {
    /// `code = 202`: job accepted but no progress payload yet.
    Pending,
    /// `code = 0` with a payload.
    Report(ProgressReport),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressReport {
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub message: String,
    #[serde(default = "unstarted")]
    pub running: RunStatus,
    #[serde(default = "unstarted")]
    pub status: RunStatus,
}

fn unstarted() -> RunStatus {
    RunStatus::Unstarted
}

/// Body of a KnowFlow parse submission.
#[derive(Debug, Clone, Serialize)]
pub struct ParseRequest {
    pub parse_method: String,
    pub language: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunking_config: Option<ChunkingConfig>,
}

/// One file of an upload batch.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

/// Raw code and message of an upload batch; non-zero codes are not errors here.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadReply {
    pub code: i64,
    pub message: Option<String>,
}

/// Client for the admin and parse APIs.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    knowflow_url: Option<String>,
    token: Option<String>,
    cache: Arc<QueryCache>,
}

impl ApiClient {
    /// Build a client from configuration, sharing `cache` with its callers.
    pub fn new(config: &Config, cache: Arc<QueryCache>) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.api.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url().to_string(),
            knowflow_url: config.knowflow_url().map(String::from),
            token: config.api.token.clone(),
            cache,
        })
    }

    pub fn cache(&self) -> &Arc<QueryCache> {
        &self.cache
    }

    /// Whether parse calls have a KnowFlow URL to go to.
    pub fn has_knowflow(&self) -> bool {
        self.knowflow_url.is_some()
    }

    fn knowflow(&self) -> Result<&str, ApiError> {
        self.knowflow_url.as_deref().ok_or_else(|| {
            ApiError::NotConfigured("parser.knowflow_api_url is not set".to_string())
        })
    }

    fn request(&self, method: Method, url: String) -> RequestBuilder {
        let req = self.http.request(method, url);
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    fn admin(&self, method: Method, path: &str) -> RequestBuilder {
        self.request(method, format!("{}{}", self.base_url, path))
    }

    /// Send a request and decode the envelope, requiring `code == 0`.
    async fn send<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<Option<T>, ApiError> {
        let envelope: Envelope<T> = read_envelope(req).await?;
        if envelope.code != 0 {
            return Err(ApiError::Backend {
                code: envelope.code,
                message: envelope.message.unwrap_or_default(),
            });
        }
        Ok(envelope.data)
    }

    async fn send_data<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, ApiError> {
        self.send(req)
            .await?
            .ok_or_else(|| ApiError::Decode("missing data field".to_string()))
    }

    async fn send_unit(&self, req: RequestBuilder) -> Result<(), ApiError> {
        self.send::<Value>(req).await.map(|_| ())
    }

    // ============ Parse API ============

    /// Poll the parse progress of one document.
    pub async fn fetch_progress(&self, doc_id: &str) -> Result<ProgressResponse, ApiError> {
        let url = format!(
            "{}/api/v1/knowledgebases/documents/{}/parse/progress",
            self.knowflow()?,
            doc_id
        );
        let envelope: Envelope<ProgressReport> =
            read_envelope(self.request(Method::GET, url)).await?;
        decode_progress(envelope)
    }

    /// Submit one document to the KnowFlow parser.
    pub async fn submit_parse(&self, doc_id: &str, body: &ParseRequest) -> Result<(), ApiError> {
        let url = format!(
            "{}/api/v1/knowledgebases/documents/{}/parse",
            self.knowflow()?,
            doc_id
        );
        self.send_unit(self.request(Method::POST, url).json(body))
            .await
    }

    // ============ Chunking config ============

    pub async fn get_chunking_config(&self, doc_id: &str) -> Result<ChunkingConfig, ApiError> {
        #[derive(Deserialize)]
        struct Payload {
            #[serde(default)]
            chunking_config: ChunkingConfig,
        }
        let path = format!("/api/v1/knowledgebases/documents/{}/chunking-config", doc_id);
        let key = QueryKey::chunking_config(doc_id);
        let cache = self.cache.clone();
        cache
            .get_or_fetch(&key, || async {
                let payload: Payload = self.send_data(self.admin(Method::GET, &path)).await?;
                Ok(payload.chunking_config)
            })
            .await
    }

    /// Validate and persist a full chunking config for a document.
    ///
    /// Validation happens first; an invalid config never reaches the network.
    pub async fn save_chunking_config(
        &self,
        doc_id: &str,
        config: &ChunkingConfig,
    ) -> Result<(), ApiError> {
        config.validate()?;
        let path = format!("/api/v1/knowledgebases/documents/{}/chunking-config", doc_id);
        self.send_unit(
            self.admin(Method::PUT, &path)
                .json(&json!({ "chunking_config": config })),
        )
        .await?;
        self.cache.invalidate(&QueryKey::chunking_config(doc_id));
        Ok(())
    }

    // ============ Documents ============

    pub async fn document_infos(&self, doc_ids: &[String]) -> Result<Vec<DocumentInfo>, ApiError> {
        self.send_data(
            self.admin(Method::POST, "/v1/document/infos")
                .json(&json!({ "doc_ids": doc_ids })),
        )
        .await
    }

    /// Start (`run = 1`) or cancel (`run = 2`) parsing with the built-in parser.
    pub async fn run_builtin(&self, doc_ids: &[String], run: u8, delete: bool) -> Result<(), ApiError> {
        self.send_unit(
            self.admin(Method::POST, "/v1/document/run")
                .json(&json!({ "doc_ids": doc_ids, "run": run, "delete": delete })),
        )
        .await
    }

    pub async fn rename_document(&self, doc_id: &str, name: &str) -> Result<(), ApiError> {
        self.send_unit(
            self.admin(Method::POST, "/v1/document/rename")
                .json(&json!({ "doc_id": doc_id, "name": name })),
        )
        .await?;
        self.cache.invalidate(&QueryKey::document_list());
        Ok(())
    }

    pub async fn remove_documents(&self, doc_ids: &[String]) -> Result<(), ApiError> {
        self.send_unit(
            self.admin(Method::POST, "/v1/document/rm")
                .json(&json!({ "doc_id": doc_ids })),
        )
        .await?;
        self.cache.invalidate(&QueryKey::document_list());
        Ok(())
    }

    /// Upload one batch of files into a knowledge base as a single multipart request.
    ///
    /// Transport and HTTP failures are errors; a non-zero envelope code is
    /// returned in the reply so batch results can be aggregated.
    pub async fn upload_batch(&self, kb_id: &str, files: &[UploadFile]) -> Result<UploadReply, ApiError> {
        let mut form = reqwest::multipart::Form::new().text("kb_id", kb_id.to_string());
        for file in files {
            let part = reqwest::multipart::Part::bytes(file.bytes.clone()).file_name(file.name.clone());
            form = form.part("file", part);
        }
        let envelope: Envelope<Value> =
            read_envelope(self.admin(Method::POST, "/v1/document/upload").multipart(form)).await?;
        Ok(UploadReply {
            code: envelope.code,
            message: envelope.message,
        })
    }

    // ============ Knowledge bases ============

    pub async fn list_knowledge_bases(
        &self,
        page: u32,
        size: u32,
        name: Option<&str>,
    ) -> Result<Page<KnowledgeBase>, ApiError> {
        let key = QueryKey::knowledge_bases().join([
            page.to_string(),
            size.to_string(),
            name.unwrap_or_default().to_string(),
        ]);
        let cache = self.cache.clone();
        cache
            .get_or_fetch(&key, || async {
                let req = self.admin(Method::GET, "/api/v1/knowledgebases").query(&[
                    ("currentPage", page.to_string()),
                    ("size", size.to_string()),
                    ("name", name.unwrap_or_default().to_string()),
                ]);
                self.send_data(req).await
            })
            .await
    }

    pub async fn create_knowledge_base(&self, kb: &NewKnowledgeBase) -> Result<(), ApiError> {
        self.send_unit(self.admin(Method::POST, "/api/v1/knowledgebases").json(kb))
            .await?;
        self.cache.invalidate(&QueryKey::knowledge_bases());
        Ok(())
    }

    pub async fn delete_knowledge_base(&self, kb_id: &str) -> Result<(), ApiError> {
        let path = format!("/api/v1/knowledgebases/{}", kb_id);
        self.send_unit(self.admin(Method::DELETE, &path)).await?;
        self.cache.invalidate(&QueryKey::knowledge_bases());
        Ok(())
    }

    pub async fn delete_knowledge_bases(&self, kb_ids: &[String]) -> Result<(), ApiError> {
        self.send_unit(
            self.admin(Method::DELETE, "/api/v1/knowledgebases/batch")
                .json(&json!({ "kbIds": kb_ids })),
        )
        .await?;
        self.cache.invalidate(&QueryKey::knowledge_bases());
        Ok(())
    }

    /// Parser settings of one knowledge base (`/v1/kb/detail`).
    pub async fn kb_parser_settings(&self, kb_id: &str) -> Result<KbParserSettings, ApiError> {
        #[derive(Deserialize)]
        struct Detail {
            #[serde(default)]
            parser_config: Option<KbParserSettings>,
        }
        let key = QueryKey::knowledge_bases().join([kb_id, "parser"]);
        let cache = self.cache.clone();
        cache
            .get_or_fetch(&key, || async {
                let req = self
                    .admin(Method::GET, "/v1/kb/detail")
                    .query(&[("kb_id", kb_id)]);
                let detail: Detail = self.send_data(req).await?;
                Ok(detail.parser_config.unwrap_or_default())
            })
            .await
    }

    pub async fn list_documents(
        &self,
        kb_id: &str,
        page: u32,
        size: u32,
    ) -> Result<Page<Document>, ApiError> {
        let key = QueryKey::document_list_for(kb_id).join([page.to_string(), size.to_string()]);
        let path = format!("/api/v1/knowledgebases/{}/documents", kb_id);
        let cache = self.cache.clone();
        cache
            .get_or_fetch(&key, || async {
                let req = self.admin(Method::GET, &path).query(&[
                    ("currentPage", page.to_string()),
                    ("size", size.to_string()),
                ]);
                self.send_data(req).await
            })
            .await
    }

    // ============ Users ============

    pub async fn list_users(
        &self,
        page: u32,
        size: u32,
        username: Option<&str>,
        email: Option<&str>,
    ) -> Result<Page<User>, ApiError> {
        self.list_paged(
            QueryKey::users(),
            "/api/v1/users",
            page,
            size,
            &[("username", username), ("email", email)],
        )
        .await
    }

    pub async fn create_user(&self, user: &NewUser) -> Result<(), ApiError> {
        self.send_unit(self.admin(Method::POST, "/api/v1/users").json(user))
            .await?;
        self.cache.invalidate(&QueryKey::users());
        Ok(())
    }

    pub async fn update_user(&self, user_id: &str, update: &UserUpdate) -> Result<(), ApiError> {
        let path = format!("/api/v1/users/{}", user_id);
        self.send_unit(self.admin(Method::PUT, &path).json(update))
            .await?;
        self.cache.invalidate(&QueryKey::users());
        Ok(())
    }

    pub async fn delete_user(&self, user_id: &str) -> Result<(), ApiError> {
        let path = format!("/api/v1/users/{}", user_id);
        self.send_unit(self.admin(Method::DELETE, &path)).await?;
        self.cache.invalidate(&QueryKey::users());
        Ok(())
    }

    /// Delete several users, one request each.
    ///
    /// Every id is attempted; the first failure is returned afterwards. The
    /// user list is invalidated whenever at least one delete went through.
    pub async fn delete_users(&self, user_ids: &[String]) -> Result<(), ApiError> {
        let mut first_error = None;
        let mut deleted = 0usize;
        for id in user_ids {
            let path = format!("/api/v1/users/{}", id);
            match self.send_unit(self.admin(Method::DELETE, &path)).await {
                Ok(()) => deleted += 1,
                Err(e) => {
                    tracing::warn!(user_id = %id, error = %e, "user delete failed");
                    first_error.get_or_insert(e);
                }
            }
        }
        if deleted > 0 {
            self.cache.invalidate(&QueryKey::users());
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub async fn reset_password(&self, user_id: &str, password: &str) -> Result<(), ApiError> {
        let path = format!("/api/v1/users/{}/reset-password", user_id);
        self.send_unit(
            self.admin(Method::PUT, &path)
                .json(&json!({ "password": password })),
        )
        .await
    }

    // ============ Teams ============

    pub async fn list_teams(
        &self,
        page: u32,
        size: u32,
        name: Option<&str>,
        owner_name: Option<&str>,
    ) -> Result<Page<Team>, ApiError> {
        self.list_paged(
            QueryKey::teams(),
            "/api/v1/teams",
            page,
            size,
            &[("name", name), ("ownerName", owner_name)],
        )
        .await
    }

    pub async fn delete_team(&self, team_id: &str) -> Result<(), ApiError> {
        let path = format!("/api/v1/teams/{}", team_id);
        self.send_unit(self.admin(Method::DELETE, &path)).await?;
        self.cache.invalidate(&QueryKey::teams());
        Ok(())
    }

    pub async fn list_team_members(&self, team_id: &str) -> Result<Vec<TeamMember>, ApiError> {
        let path = format!("/api/v1/teams/{}/members", team_id);
        let key = QueryKey::team_members(team_id);
        let cache = self.cache.clone();
        cache
            .get_or_fetch(&key, || async {
                let members: Option<Vec<TeamMember>> =
                    self.send(self.admin(Method::GET, &path)).await?;
                Ok(members.unwrap_or_default())
            })
            .await
    }

    /// Add a user to a team by email. Member counts change, so every team
    /// query is invalidated.
    pub async fn add_team_member(&self, team_id: &str, email: &str) -> Result<(), ApiError> {
        let path = format!("/v1/tenant/{}/user", team_id);
        self.send_unit(
            self.admin(Method::POST, &path)
                .json(&json!({ "email": email })),
        )
        .await?;
        self.cache.invalidate(&QueryKey::teams());
        Ok(())
    }

    pub async fn remove_team_member(&self, team_id: &str, user_id: &str) -> Result<(), ApiError> {
        let path = format!("/api/v1/teams/{}/members/{}", team_id, user_id);
        self.send_unit(self.admin(Method::DELETE, &path)).await?;
        self.cache.invalidate(&QueryKey::teams());
        Ok(())
    }

    // ============ Files ============

    pub async fn list_files(
        &self,
        page: u32,
        size: u32,
        name: Option<&str>,
    ) -> Result<Page<FileRecord>, ApiError> {
        self.list_paged(
            QueryKey::files(),
            "/api/v1/files",
            page,
            size,
            &[("name", name)],
        )
        .await
    }

    /// Store files outside any knowledge base, all in one multipart request.
    pub async fn upload_stored_files(&self, files: &[UploadFile]) -> Result<(), ApiError> {
        let mut form = reqwest::multipart::Form::new();
        for file in files {
            let part = reqwest::multipart::Part::bytes(file.bytes.clone()).file_name(file.name.clone());
            form = form.part("files", part);
        }
        self.send_unit(self.admin(Method::POST, "/api/v1/files/upload").multipart(form))
            .await?;
        self.cache.invalidate(&QueryKey::files());
        Ok(())
    }

    /// Raw contents of a stored file. An empty body is an error.
    pub async fn download_file(&self, file_id: &str) -> Result<Vec<u8>, ApiError> {
        let path = format!("/api/v1/files/{}/download", file_id);
        let response = self
            .admin(Method::GET, &path)
            .header(reqwest::header::ACCEPT, "application/octet-stream")
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Err(ApiError::Decode(format!("file {} is empty", file_id)));
        }
        Ok(bytes.to_vec())
    }

    pub async fn delete_file(&self, file_id: &str) -> Result<(), ApiError> {
        let path = format!("/api/v1/files/{}", file_id);
        self.send_unit(self.admin(Method::DELETE, &path)).await?;
        self.cache.invalidate(&QueryKey::files());
        Ok(())
    }

    pub async fn delete_files(&self, file_ids: &[String]) -> Result<(), ApiError> {
        self.send_unit(
            self.admin(Method::DELETE, "/api/v1/files/batch")
                .json(&json!({ "ids": file_ids })),
        )
        .await?;
        self.cache.invalidate(&QueryKey::files());
        Ok(())
    }

    /// Paged list with optional search filters. Unset or blank filters are
    /// left out of the query string.
    async fn list_paged<T>(
        &self,
        prefix: QueryKey,
        path: &str,
        page: u32,
        size: u32,
        filters: &[(&str, Option<&str>)],
    ) -> Result<Page<T>, ApiError>
    where
        T: Serialize + DeserializeOwned,
    {
        let filters: Vec<(&str, &str)> = filters
            .iter()
            .filter_map(|(name, value)| {
                value
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .map(|v| (*name, v))
            })
            .collect();
        let key = prefix.join(
            [page.to_string(), size.to_string()]
                .into_iter()
                .chain(filters.iter().map(|(name, value)| format!("{}={}", name, value))),
        );
        let cache = self.cache.clone();
        cache
            .get_or_fetch(&key, || async {
                let mut query = vec![
                    ("currentPage", page.to_string()),
                    ("size", size.to_string()),
                ];
                query.extend(filters.iter().map(|(name, value)| (*name, value.to_string())));
                let req = self.admin(Method::GET, path).query(&query);
                self.send_data(req).await
            })
            .await
    }
}

/// Send `req`, reject non-2xx statuses and decode the JSON envelope.
async fn read_envelope<T: DeserializeOwned>(req: RequestBuilder) -> Result<Envelope<T>, ApiError> {
    let response = req.send().await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ApiError::Status {
            status: status.as_u16(),
            body,
        });
    }
    let text = response.text().await?;
    if status == StatusCode::ACCEPTED && text.trim().is_empty() {
        return Ok(Envelope {
            code: CODE_PENDING,
            message: None,
            data: None,
        });
    }
    serde_json::from_str(&text).map_err(|e| ApiError::Decode(e.to_string()))
}

fn decode_progress(envelope: Envelope<ProgressReport>) -> Result<ProgressResponse, ApiError> {
    match envelope.code {
        CODE_PENDING => Ok(ProgressResponse::Pending),
        0 => envelope
            .data
            .map(ProgressResponse::Report)
            .ok_or_else(|| ApiError::Decode("progress payload missing".to_string())),
        code => Err(ApiError::Backend {
            code,
            message: envelope.message.unwrap_or_default(),
        }),
    }
}
