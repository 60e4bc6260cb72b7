//! End-to-end tests of the client against an in-process mock backend.
//!
//! The mock serves both the admin API and the KnowFlow parse API on one
//! `127.0.0.1:0` listener and records every request it receives.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use serde_json::{json, Value};
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use knowflow::api::{ApiClient, UploadFile};
use knowflow::cache::{QueryCache, QueryKey};
use knowflow::chunking::{ChunkingConfig, ChunkingDraft, ChunkingStrategy};
use knowflow::config::Config;
use knowflow::error::ApiError;
use knowflow::commands::{run_chunking_set, run_watch, Session};
use knowflow::models::{NewKnowledgeBase, NewUser, RunStatus, UserUpdate};
use knowflow::parse::{run_documents, Route, RunAction};
use knowflow::poller::{PollOptions, Poller, ProgressBoard, StopReason};
use knowflow::progress::NoProgress;
use knowflow::upload::upload_files;

// ─── Mock backend ───────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Recorded {
    method: Method,
    path: String,
    query: String,
    body: Bytes,
}

impl Recorded {
    fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap_or(Value::Null)
    }
}

#[derive(Default)]
struct Mock {
    requests: Mutex<Vec<Recorded>>,
    progress: Mutex<VecDeque<Value>>,
    infos: Mutex<Value>,
    chunking: Mutex<Option<Value>>,
    failing_parse: Mutex<HashSet<String>>,
    failing_upload_batch: Mutex<Option<usize>>,
    failing_user_delete: Mutex<HashSet<String>>,
    kb_parser: Mutex<Option<Value>>,
}

impl Mock {
    fn record(&self, method: Method, uri: &Uri, body: Bytes) {
        self.requests.lock().unwrap().push(Recorded {
            method,
            path: uri.path().to_string(),
            query: uri.query().unwrap_or_default().to_string(),
            body,
        });
    }

    fn requests_to(&self, method: Method, suffix: &str) -> Vec<Recorded> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.method == method && r.path.ends_with(suffix))
            .cloned()
            .collect()
    }

    fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

type Shared = Arc<Mock>;

async fn progress(State(mock): State<Shared>, method: Method, uri: Uri) -> Json<Value> {
    mock.record(method, &uri, Bytes::new());
    let next = mock.progress.lock().unwrap().pop_front();
    Json(next.unwrap_or_else(|| json!({ "code": 202 })))
}

async fn parse(
    State(mock): State<Shared>,
    Path(id): Path<String>,
    method: Method,
    uri: Uri,
    body: Bytes,
) -> Json<Value> {
    mock.record(method, &uri, body);
    if mock.failing_parse.lock().unwrap().contains(&id) {
        Json(json!({ "code": 500, "message": "parser busy" }))
    } else {
        Json(json!({ "code": 0, "message": "accepted" }))
    }
}

async fn chunking(State(mock): State<Shared>, method: Method, uri: Uri, body: Bytes) -> Json<Value> {
    mock.record(method.clone(), &uri, body.clone());
    if method == Method::PUT {
        let stored: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
        *mock.chunking.lock().unwrap() = Some(stored["chunking_config"].clone());
        return Json(json!({ "code": 0 }));
    }
    let stored = mock.chunking.lock().unwrap().clone();
    Json(json!({ "code": 0, "data": { "chunking_config": stored.unwrap_or(json!({})) } }))
}

async fn infos(State(mock): State<Shared>, method: Method, uri: Uri, body: Bytes) -> Json<Value> {
    mock.record(method, &uri, body);
    let infos = mock.infos.lock().unwrap().clone();
    Json(json!({ "code": 0, "data": infos }))
}

async fn ok(State(mock): State<Shared>, method: Method, uri: Uri, body: Bytes) -> Json<Value> {
    mock.record(method, &uri, body);
    Json(json!({ "code": 0, "message": "success" }))
}

async fn upload(State(mock): State<Shared>, method: Method, uri: Uri, body: Bytes) -> Response {
    mock.record(method, &uri, body);
    let batch = mock.requests_to(Method::POST, "/v1/document/upload").len();
    if *mock.failing_upload_batch.lock().unwrap() == Some(batch) {
        return (StatusCode::INTERNAL_SERVER_ERROR, "storage offline").into_response();
    }
    Json(json!({ "code": 0, "message": format!("batch {} stored", batch) })).into_response()
}

async fn knowledge_bases(State(mock): State<Shared>, method: Method, uri: Uri, body: Bytes) -> Json<Value> {
    mock.record(method.clone(), &uri, body);
    if method == Method::POST {
        return Json(json!({ "code": 0 }));
    }
    Json(json!({
        "code": 0,
        "data": {
            "list": [{ "id": "kb-1", "name": "papers", "doc_num": 3, "chunk_num": 40 }],
            "total": 1
        }
    }))
}

async fn kb_detail(State(mock): State<Shared>, method: Method, uri: Uri) -> Json<Value> {
    mock.record(method, &uri, Bytes::new());
    let parser = mock.kb_parser.lock().unwrap().clone();
    Json(json!({ "code": 0, "data": { "id": "kb", "parser_config": parser } }))
}

async fn users(State(mock): State<Shared>, method: Method, uri: Uri, body: Bytes) -> Json<Value> {
    mock.record(method.clone(), &uri, body);
    if method == Method::POST {
        return Json(json!({ "code": 0 }));
    }
    Json(json!({
        "code": 0,
        "data": {
            "list": [{ "id": 7, "username": "ann", "email": "ann@example.com" }],
            "total": 1
        }
    }))
}

async fn user(
    State(mock): State<Shared>,
    Path(id): Path<String>,
    method: Method,
    uri: Uri,
    body: Bytes,
) -> Json<Value> {
    mock.record(method.clone(), &uri, body);
    if method == Method::DELETE && mock.failing_user_delete.lock().unwrap().contains(&id) {
        return Json(json!({ "code": 1, "message": "cannot delete admin" }));
    }
    Json(json!({ "code": 0 }))
}

async fn teams(State(mock): State<Shared>, method: Method, uri: Uri) -> Json<Value> {
    mock.record(method, &uri, Bytes::new());
    Json(json!({
        "code": 0,
        "data": {
            "list": [{ "id": "t1", "name": "ops", "ownerName": "ann", "memberCount": 2 }],
            "total": 1
        }
    }))
}

async fn team_members(State(mock): State<Shared>, method: Method, uri: Uri) -> Json<Value> {
    mock.record(method, &uri, Bytes::new());
    Json(json!({
        "code": 0,
        "data": [
            { "userId": 7, "username": "ann", "role": "owner", "joinTime": "2024-05-01" },
            { "userId": "9", "username": "bo", "role": "normal" }
        ]
    }))
}

async fn stored_files(State(mock): State<Shared>, method: Method, uri: Uri) -> Json<Value> {
    mock.record(method, &uri, Bytes::new());
    Json(json!({
        "code": 0,
        "data": {
            "list": [{ "id": "f1", "name": "report.pdf", "size": 2048, "type": "pdf" }],
            "total": 1
        }
    }))
}

async fn download(
    State(mock): State<Shared>,
    Path(id): Path<String>,
    method: Method,
    uri: Uri,
) -> Vec<u8> {
    mock.record(method, &uri, Bytes::new());
    if id == "empty" {
        Vec::new()
    } else {
        b"%PDF-1.4 demo".to_vec()
    }
}

async fn start_mock(mock: Shared) -> String {
    let app = Router::new()
        .route(
            "/api/v1/knowledgebases/documents/{id}/parse/progress",
            get(progress),
        )
        .route("/api/v1/knowledgebases/documents/{id}/parse", post(parse))
        .route(
            "/api/v1/knowledgebases/documents/{id}/chunking-config",
            get(chunking).put(chunking),
        )
        .route(
            "/api/v1/knowledgebases",
            get(knowledge_bases).post(knowledge_bases),
        )
        .route("/v1/document/infos", post(infos))
        .route("/v1/document/run", post(ok))
        .route("/v1/document/rename", post(ok))
        .route("/v1/document/upload", post(upload))
        .route("/v1/kb/detail", get(kb_detail))
        .route("/api/v1/users", get(users).post(users))
        .route("/api/v1/users/{id}", put(user).delete(user))
        .route("/api/v1/users/{id}/reset-password", put(user))
        .route("/api/v1/teams", get(teams))
        .route("/api/v1/teams/{id}", delete(ok))
        .route("/api/v1/teams/{id}/members", get(team_members))
        .route("/api/v1/teams/{id}/members/{user_id}", delete(ok))
        .route("/v1/tenant/{id}/user", post(ok))
        .route("/api/v1/files", get(stored_files))
        .route("/api/v1/files/upload", post(ok))
        .route("/api/v1/files/batch", delete(ok))
        .route("/api/v1/files/{id}", delete(ok))
        .route("/api/v1/files/{id}/download", get(download))
        .with_state(mock);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    format!("http://{}", addr)
}

fn config_for(base: &str, knowflow: bool) -> Config {
    let mut cfg = Config::minimal();
    cfg.api.base_url = format!("{}/", base);
    if knowflow {
        cfg.parser.knowflow_api_url = Some(base.to_string());
    }
    cfg.polling.interval_ms = 5;
    cfg
}

async fn setup(knowflow: bool) -> (Shared, ApiClient, Config) {
    let mock: Shared = Arc::new(Mock::default());
    let base = start_mock(mock.clone()).await;
    let cfg = config_for(&base, knowflow);
    let client = ApiClient::new(&cfg, Arc::new(QueryCache::new())).unwrap();
    (mock, client, cfg)
}

// ─── Parse progress ─────────────────────────────────────────────────

/// Document "doc-1": 202, then 0.5 "OCR running", then done.
#[tokio::test]
async fn test_poll_doc_scenario_over_http() {
    let (mock, client, cfg) = setup(true).await;
    mock.progress.lock().unwrap().extend([
        json!({ "code": 202 }),
        json!({ "code": 0, "data": { "progress": 0.5, "message": "OCR running", "running": "1", "status": "1" } }),
        json!({ "code": 0, "data": { "progress": 1.0, "message": "OCR running", "running": "3", "status": "3" } }),
    ]);

    let cache = client.cache().clone();
    let poller = Poller::new(
        Arc::new(client),
        Arc::new(ProgressBoard::new()),
        cache.clone(),
        PollOptions::from(&cfg.polling),
    );
    let outcome = poller.poll_progress("doc-1").await.unwrap();

    assert_eq!(outcome.attempts, 3);
    assert_eq!(outcome.reason, StopReason::Terminal(RunStatus::Done));
    assert!(outcome.refreshed);
    assert_eq!(cache.invalidation_count(&QueryKey::document_list()), 1);

    let doc = poller.board().get("doc-1").unwrap();
    assert_eq!(doc.progress, 1.0);
    assert_eq!(doc.logs.len(), 1);
    assert_eq!(doc.logs[0].message, "OCR running");
    assert_eq!(doc.logs[0].time.len(), 8, "expected HH:MM:SS");

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(mock.requests_to(Method::GET, "/parse/progress").len(), 3);
}

#[tokio::test]
async fn test_poll_survives_backend_errors() {
    let (mock, client, _cfg) = setup(true).await;
    mock.progress.lock().unwrap().extend([
        json!({ "code": 0, "data": { "progress": 0.3, "message": "layout", "running": "1", "status": "1" } }),
        json!({ "code": 500, "message": "temporarily unavailable" }),
        json!({ "code": 0, "data": { "progress": 0.9, "message": "embedding", "running": "1", "status": "1" } }),
    ]);

    let cache = client.cache().clone();
    let poller = Poller::new(
        Arc::new(client),
        Arc::new(ProgressBoard::new()),
        cache,
        PollOptions {
            interval: Duration::from_millis(5),
            max_attempts: 3,
            log_capacity: 20,
        },
    );
    let outcome = poller.poll_progress("doc-2").await.unwrap();

    assert_eq!(outcome.reason, StopReason::Exhausted);
    assert_eq!(outcome.progress, 0.9);
    assert!(!outcome.refreshed);
    let messages: Vec<String> = poller
        .board()
        .get("doc-2")
        .unwrap()
        .logs
        .iter()
        .map(|l| l.message.clone())
        .collect();
    assert_eq!(messages, vec!["embedding", "layout"]);
}

// ─── Chunking config ────────────────────────────────────────────────

#[tokio::test]
async fn test_invalid_chunking_never_reaches_network() {
    let (mock, client, _cfg) = setup(false).await;

    let draft = ChunkingDraft {
        strategy: Some("strict_regex".into()),
        chunk_token_num: Some(256),
        min_chunk_tokens: Some(10),
        regex_pattern: Some(String::new()),
    };
    let errors = draft.validate().unwrap_err();
    assert_eq!(errors.for_field("regex_pattern"), Some("regex required"));

    let bad = ChunkingConfig {
        strategy: ChunkingStrategy::Basic,
        chunk_token_num: 10,
        min_chunk_tokens: 10,
        regex_pattern: None,
    };
    let err = client.save_chunking_config("doc-1", &bad).await.unwrap_err();
    match err {
        ApiError::Validation(v) => assert_eq!(
            v.for_field("chunk_token_num"),
            Some("chunk size must be in [50,2048]")
        ),
        other => panic!("expected validation error, got {:?}", other),
    }

    assert_eq!(mock.request_count(), 0);
}

#[tokio::test]
async fn test_chunking_roundtrip_and_cache() {
    let (mock, client, _cfg) = setup(false).await;

    let initial = client.get_chunking_config("doc-1").await.unwrap();
    assert_eq!(initial, ChunkingConfig::default());
    let _ = client.get_chunking_config("doc-1").await.unwrap();
    assert_eq!(mock.requests_to(Method::GET, "/chunking-config").len(), 1);

    let cfg = ChunkingConfig {
        strategy: ChunkingStrategy::StrictRegex,
        chunk_token_num: 512,
        min_chunk_tokens: 20,
        regex_pattern: Some(r"^Article \d+".into()),
    };
    client.save_chunking_config("doc-1", &cfg).await.unwrap();

    let puts = mock.requests_to(Method::PUT, "/chunking-config");
    assert_eq!(puts.len(), 1);
    assert_eq!(puts[0].json()["chunking_config"]["strategy"], "strict_regex");
    assert_eq!(puts[0].json()["chunking_config"]["chunk_token_num"], 512);

    let reloaded = client.get_chunking_config("doc-1").await.unwrap();
    assert_eq!(reloaded, cfg);
    assert_eq!(mock.requests_to(Method::GET, "/chunking-config").len(), 2);
}

// ─── Parse dispatch ─────────────────────────────────────────────────

fn mixed_infos() -> Value {
    json!([
        { "id": "m1", "name": "a.pdf", "kb_id": "kb", "parser_id": "mineru",
          "parser_config": { "chunking_config": { "strategy": "advanced", "chunk_token_num": 1024, "min_chunk_tokens": 50 } } },
        { "id": "m2", "name": "b.pdf", "kb_id": "kb", "parser_id": "mineru", "parser_config": null },
        { "id": "n1", "name": "c.txt", "kb_id": "kb", "parser_id": "naive", "parser_config": {} }
    ])
}

#[tokio::test]
async fn test_dispatch_routes_by_parser() {
    let (mock, client, mut cfg) = setup(true).await;
    *mock.infos.lock().unwrap() = mixed_infos();
    cfg.parser.chunking = Some(ChunkingConfig {
        strategy: ChunkingStrategy::Basic,
        chunk_token_num: 128,
        min_chunk_tokens: 10,
        regex_pattern: None,
    });

    let ids: Vec<String> = vec!["m1".into(), "m2".into(), "n1".into()];
    let report = run_documents(&client, &cfg.parser, &ids, RunAction::Start, false)
        .await
        .unwrap();

    assert!(report.all_accepted());
    assert!(report.refreshed);
    assert_eq!(report.watchable(), vec!["m1".to_string(), "m2".to_string()]);
    assert_eq!(
        client.cache().invalidation_count(&QueryKey::document_list()),
        1
    );

    let parses = mock.requests_to(Method::POST, "/parse");
    assert_eq!(parses.len(), 2);
    let m1 = parses.iter().find(|r| r.path.contains("/m1/")).unwrap().json();
    let m2 = parses.iter().find(|r| r.path.contains("/m2/")).unwrap().json();
    assert_eq!(m1["chunking_config"]["chunk_token_num"], 1024);
    assert_eq!(m2["chunking_config"]["strategy"], "basic");
    assert_eq!(m2["parse_method"], "auto");

    let runs = mock.requests_to(Method::POST, "/v1/document/run");
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].json()["doc_ids"], json!(["n1"]));
    assert_eq!(runs[0].json()["run"], 1);
}

#[tokio::test]
async fn test_dispatch_records_failed_submission() {
    let (mock, client, cfg) = setup(true).await;
    *mock.infos.lock().unwrap() = mixed_infos();
    mock.failing_parse.lock().unwrap().insert("m2".into());

    let ids: Vec<String> = vec!["m1".into(), "m2".into(), "n1".into()];
    let report = run_documents(&client, &cfg.parser, &ids, RunAction::Start, false)
        .await
        .unwrap();

    assert!(!report.refreshed);
    let failed: Vec<_> = report.failures().map(|s| s.doc_id.as_str()).collect();
    assert_eq!(failed, vec!["m2"]);
    assert_eq!(report.watchable(), vec!["m1".to_string()]);
    assert_eq!(
        client.cache().invalidation_count(&QueryKey::document_list()),
        0
    );
    // Not retried.
    assert_eq!(mock.requests_to(Method::POST, "/m2/parse").len(), 1);
}

#[tokio::test]
async fn test_cancel_is_noop_for_mineru() {
    let (mock, client, cfg) = setup(true).await;
    *mock.infos.lock().unwrap() = mixed_infos();

    let ids: Vec<String> = vec!["m1".into(), "n1".into()];
    let report = run_documents(&client, &cfg.parser, &ids, RunAction::Cancel, false)
        .await
        .unwrap();

    assert!(report.all_accepted());
    assert!(mock.requests_to(Method::POST, "/parse").is_empty());
    let runs = mock.requests_to(Method::POST, "/v1/document/run");
    assert_eq!(runs[0].json()["run"], 2);
    assert!(report
        .submissions
        .iter()
        .any(|s| s.doc_id == "n1" && s.route == Route::Builtin));
}

#[tokio::test]
async fn test_mineru_without_knowflow_url_is_config_error() {
    let (mock, client, cfg) = setup(false).await;
    *mock.infos.lock().unwrap() = mixed_infos();

    let ids: Vec<String> = vec!["m1".into()];
    let err = run_documents(&client, &cfg.parser, &ids, RunAction::Start, false)
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::NotConfigured(_)));
    assert!(mock.requests_to(Method::POST, "/v1/document/run").is_empty());
}

// ─── Upload ─────────────────────────────────────────────────────────

fn files(n: usize) -> Vec<UploadFile> {
    (0..n)
        .map(|i| UploadFile {
            name: format!("file-{:02}.txt", i),
            bytes: format!("contents {}", i).into_bytes(),
        })
        .collect()
}

fn count_parts(body: &Bytes) -> usize {
    String::from_utf8_lossy(body).matches("name=\"file\"").count()
}

#[tokio::test]
async fn test_upload_partitions_into_batches() {
    let (mock, client, cfg) = setup(false).await;

    let summary = upload_files(&client, "kb-1", &files(45), cfg.upload.batch_size, &NoProgress).await;

    assert!(summary.succeeded);
    assert_eq!(summary.code, 0);
    assert_eq!(summary.batches, 3);
    assert_eq!(summary.files, 45);
    assert_eq!(summary.message, "batch 1 stored\nbatch 2 stored\nbatch 3 stored");

    let uploads = mock.requests_to(Method::POST, "/v1/document/upload");
    let parts: Vec<usize> = uploads.iter().map(|r| count_parts(&r.body)).collect();
    assert_eq!(parts, vec![20, 20, 5]);
    assert!(String::from_utf8_lossy(&uploads[0].body).contains("name=\"kb_id\""));
    assert_eq!(
        client.cache().invalidation_count(&QueryKey::document_list()),
        1
    );
}

#[tokio::test]
async fn test_upload_failed_batch_counts_as_500() {
    let (mock, client, _cfg) = setup(false).await;
    *mock.failing_upload_batch.lock().unwrap() = Some(2);

    let summary = upload_files(&client, "kb-1", &files(50), 20, &NoProgress).await;

    assert!(!summary.succeeded);
    assert_eq!(summary.code, 500);
    assert_eq!(summary.batches, 3);
    // Remaining batches still go out.
    assert_eq!(mock.requests_to(Method::POST, "/v1/document/upload").len(), 3);
    assert_eq!(
        client.cache().invalidation_count(&QueryKey::document_list()),
        1
    );
}

// ─── CRUD and cache ─────────────────────────────────────────────────

#[tokio::test]
async fn test_mutations_invalidate_lists() {
    let (mock, client, _cfg) = setup(false).await;

    let page = client.list_knowledge_bases(1, 10, None).await.unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.list[0].name, "papers");
    let _ = client.list_knowledge_bases(1, 10, None).await.unwrap();
    assert_eq!(mock.requests_to(Method::GET, "/api/v1/knowledgebases").len(), 1);

    client
        .create_knowledge_base(&NewKnowledgeBase {
            name: "new".into(),
            description: None,
            language: "English".into(),
            permission: "me".into(),
        })
        .await
        .unwrap();
    let _ = client.list_knowledge_bases(1, 10, None).await.unwrap();
    assert_eq!(mock.requests_to(Method::GET, "/api/v1/knowledgebases").len(), 2);

    client.rename_document("d1", "renamed.pdf").await.unwrap();
    let renames = mock.requests_to(Method::POST, "/v1/document/rename");
    assert_eq!(renames[0].json()["name"], "renamed.pdf");
    assert_eq!(
        client.cache().invalidation_count(&QueryKey::document_list()),
        1
    );
}

#[tokio::test]
async fn test_http_error_status_is_typed() {
    let (_mock, client, _cfg) = setup(false).await;
    let err = client.remove_documents(&["d1".to_string()]).await.unwrap_err();
    assert!(matches!(err, ApiError::Status { status: 404, .. }), "got {:?}", err);
}

#[tokio::test]
async fn test_user_management() {
    let (mock, client, _cfg) = setup(false).await;

    let page = client.list_users(1, 10, Some("ann"), None).await.unwrap();
    assert_eq!(page.list[0].id, "7");
    let _ = client.list_users(1, 10, Some("ann"), None).await.unwrap();
    let lists = mock.requests_to(Method::GET, "/api/v1/users");
    assert_eq!(lists.len(), 1);
    assert!(lists[0].query.contains("username=ann"), "query={}", lists[0].query);
    assert!(!lists[0].query.contains("email"), "query={}", lists[0].query);

    client
        .create_user(&NewUser {
            username: "bo".into(),
            email: "bo@example.com".into(),
            password: "s3cret".into(),
        })
        .await
        .unwrap();
    let created = mock.requests_to(Method::POST, "/api/v1/users");
    assert_eq!(created[0].json()["email"], "bo@example.com");
    let _ = client.list_users(1, 10, Some("ann"), None).await.unwrap();
    assert_eq!(mock.requests_to(Method::GET, "/api/v1/users").len(), 2);

    client
        .update_user(
            "7",
            &UserUpdate {
                email: Some("ann@new.example.com".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let edits = mock.requests_to(Method::PUT, "/api/v1/users/7");
    assert_eq!(edits[0].json(), json!({ "email": "ann@new.example.com" }));

    client.reset_password("7", "n3w-pass").await.unwrap();
    let resets = mock.requests_to(Method::PUT, "/api/v1/users/7/reset-password");
    assert_eq!(resets[0].json()["password"], "n3w-pass");
}

#[tokio::test]
async fn test_batch_user_delete_attempts_every_id() {
    let (mock, client, _cfg) = setup(false).await;
    mock.failing_user_delete.lock().unwrap().insert("2".into());

    let ids: Vec<String> = vec!["1".into(), "2".into(), "3".into()];
    let err = client.delete_users(&ids).await.unwrap_err();

    assert_eq!(err.backend_code(), Some(1));
    let deletes: Vec<String> = mock
        .requests
        .lock()
        .unwrap()
        .iter()
        .filter(|r| r.method == Method::DELETE)
        .map(|r| r.path.clone())
        .collect();
    assert_eq!(
        deletes,
        vec!["/api/v1/users/1", "/api/v1/users/2", "/api/v1/users/3"]
    );
    assert_eq!(client.cache().invalidation_count(&QueryKey::users()), 1);
}

#[tokio::test]
async fn test_team_membership() {
    let (mock, client, _cfg) = setup(false).await;

    let teams = client.list_teams(1, 10, Some("ops"), None).await.unwrap();
    assert_eq!(teams.list[0].member_count, 2);
    assert!(mock.requests_to(Method::GET, "/api/v1/teams")[0]
        .query
        .contains("name=ops"));

    let members = client.list_team_members("t1").await.unwrap();
    assert_eq!(members.len(), 2);
    assert_eq!(members[0].user_id, "7");
    assert_eq!(members[1].user_id, "9");
    let _ = client.list_team_members("t1").await.unwrap();
    assert_eq!(mock.requests_to(Method::GET, "/t1/members").len(), 1);

    client.add_team_member("t1", "bo@example.com").await.unwrap();
    let adds = mock.requests_to(Method::POST, "/v1/tenant/t1/user");
    assert_eq!(adds[0].json()["email"], "bo@example.com");
    let _ = client.list_team_members("t1").await.unwrap();
    assert_eq!(mock.requests_to(Method::GET, "/t1/members").len(), 2);

    client.remove_team_member("t1", "9").await.unwrap();
    assert_eq!(
        mock.requests_to(Method::DELETE, "/api/v1/teams/t1/members/9").len(),
        1
    );

    client.delete_team("t1").await.unwrap();
    assert_eq!(mock.requests_to(Method::DELETE, "/api/v1/teams/t1").len(), 1);
    assert_eq!(client.cache().invalidation_count(&QueryKey::teams()), 3);
}

#[tokio::test]
async fn test_stored_files() {
    let (mock, client, _cfg) = setup(false).await;

    let page = client.list_files(1, 10, Some("report")).await.unwrap();
    assert_eq!(page.list[0].kind.as_deref(), Some("pdf"));
    assert!(mock.requests_to(Method::GET, "/api/v1/files")[0]
        .query
        .contains("name=report"));

    client.upload_stored_files(&files(3)).await.unwrap();
    let uploads = mock.requests_to(Method::POST, "/api/v1/files/upload");
    assert_eq!(uploads.len(), 1);
    assert_eq!(
        String::from_utf8_lossy(&uploads[0].body)
            .matches("name=\"files\"")
            .count(),
        3
    );

    let bytes = client.download_file("f1").await.unwrap();
    assert_eq!(bytes, b"%PDF-1.4 demo".to_vec());
    assert!(matches!(
        client.download_file("empty").await,
        Err(ApiError::Decode(_))
    ));

    let ids: Vec<String> = vec!["f1".into(), "f2".into()];
    client.delete_files(&ids).await.unwrap();
    let batch = mock.requests_to(Method::DELETE, "/api/v1/files/batch");
    assert_eq!(batch[0].json()["ids"], json!(["f1", "f2"]));
    client.delete_file("f3").await.unwrap();
    assert_eq!(client.cache().invalidation_count(&QueryKey::files()), 3);
}

// ─── Knowledge-base parser settings ─────────────────────────────────

#[tokio::test]
async fn test_knowledge_base_settings_shape_submissions() {
    let (mock, client, cfg) = setup(true).await;
    *mock.infos.lock().unwrap() = mixed_infos();
    *mock.kb_parser.lock().unwrap() = Some(json!({
        "parse_method": "ocr",
        "language": "en",
        "chunking_config": { "strategy": "smart", "chunk_token_num": 300, "min_chunk_tokens": 20 }
    }));

    let ids: Vec<String> = vec!["m1".into(), "m2".into()];
    let report = run_documents(&client, &cfg.parser, &ids, RunAction::Start, false)
        .await
        .unwrap();
    assert!(report.all_accepted());

    let parses = mock.requests_to(Method::POST, "/parse");
    let m1 = parses.iter().find(|r| r.path.contains("/m1/")).unwrap().json();
    let m2 = parses.iter().find(|r| r.path.contains("/m2/")).unwrap().json();
    assert_eq!(m1["parse_method"], "ocr");
    assert_eq!(m1["language"], "en");
    assert_eq!(m1["chunking_config"]["chunk_token_num"], 1024);
    assert_eq!(m2["chunking_config"]["chunk_token_num"], 300);
    // Both documents share one knowledge base.
    assert_eq!(mock.requests_to(Method::GET, "/v1/kb/detail").len(), 1);
}

// ─── Commands ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_watch_polls_repeated_id_once() {
    let (mock, _client, cfg) = setup(true).await;
    mock.progress.lock().unwrap().push_back(
        json!({ "code": 0, "data": { "progress": 1.0, "message": "done", "running": "3", "status": "3" } }),
    );
    let session = Session::new(cfg, Arc::new(NoProgress)).unwrap();

    let ids: Vec<String> = vec!["doc-1".into(), "doc-1".into()];
    run_watch(&session, &ids).await.unwrap();

    assert_eq!(mock.requests_to(Method::GET, "/doc-1/parse/progress").len(), 1);
    assert!(!session.poller.is_polling("doc-1"));
}

#[tokio::test]
async fn test_chunking_set_fetches_only_missing_fields() {
    let (mock, _client, cfg) = setup(false).await;
    let session = Session::new(cfg, Arc::new(NoProgress)).unwrap();

    let complete = ChunkingDraft {
        strategy: Some("basic".into()),
        chunk_token_num: Some(300),
        min_chunk_tokens: Some(30),
        regex_pattern: None,
    };
    run_chunking_set(&session, "doc-1", complete).await.unwrap();
    assert!(mock.requests_to(Method::GET, "/chunking-config").is_empty());
    assert_eq!(mock.requests_to(Method::PUT, "/chunking-config").len(), 1);

    let partial = ChunkingDraft {
        strategy: Some("advanced".into()),
        chunk_token_num: Some(600),
        ..Default::default()
    };
    run_chunking_set(&session, "doc-1", partial).await.unwrap();
    assert_eq!(mock.requests_to(Method::GET, "/chunking-config").len(), 1);
    let puts = mock.requests_to(Method::PUT, "/chunking-config");
    assert_eq!(puts[1].json()["chunking_config"]["strategy"], "advanced");
    assert_eq!(puts[1].json()["chunking_config"]["chunk_token_num"], 600);
    assert_eq!(puts[1].json()["chunking_config"]["min_chunk_tokens"], 30);
}
