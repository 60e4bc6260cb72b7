//! Core data models shared by the client, the poller and the CLI.
//!
//! Records mirror the admin API payloads. Every entity is owned by the
//! backend; the client only holds the latest successfully fetched copy.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

use crate::chunking::ChunkingConfig;

/// Run state of a parse job, as reported in the `running`/`status` fields.
///
/// The wire form is a single-digit string (`"0"` .. `"4"`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(into = "String")]
pub enum RunStatus {
    Unstarted,
    Running,
    Cancelled,
    Done,
    Failed,
    Unknown(String),
}

impl RunStatus {
    pub fn code(&self) -> &str {
        match self {
            RunStatus::Unstarted => "0",
            RunStatus::Running => "1",
            RunStatus::Cancelled => "2",
            RunStatus::Done => "3",
            RunStatus::Failed => "4",
            RunStatus::Unknown(code) => code,
        }
    }

    /// States from which the backend will not update progress any further.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Done | RunStatus::Cancelled | RunStatus::Failed
        )
    }
}

impl From<String> for RunStatus {
    fn from(s: String) -> Self {
        match s.trim() {
            "0" | "" => RunStatus::Unstarted,
            "1" => RunStatus::Running,
            "2" => RunStatus::Cancelled,
            "3" => RunStatus::Done,
            "4" => RunStatus::Failed,
            other => RunStatus::Unknown(other.to_string()),
        }
    }
}

impl<'de> Deserialize<'de> for RunStatus {
    fn deserialize<D: Deserializer<'de>>(de: D) -> Result<Self, D::Error> {
        // Older backends send the code as a bare number.
        match serde_json::Value::deserialize(de)? {
            serde_json::Value::String(s) => Ok(RunStatus::from(s)),
            serde_json::Value::Number(n) => Ok(RunStatus::from(n.to_string())),
            serde_json::Value::Null => Ok(RunStatus::Unstarted),
            other => Err(serde::de::Error::custom(format!(
                "invalid run status: {}",
                other
            ))),
        }
    }
}

impl From<&str> for RunStatus {
    fn from(s: &str) -> Self {
        RunStatus::from(s.to_string())
    }
}

impl From<RunStatus> for String {
    fn from(s: RunStatus) -> Self {
        s.code().to_string()
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Unstarted => f.write_str("unstarted"),
            RunStatus::Running => f.write_str("running"),
            RunStatus::Cancelled => f.write_str("cancelled"),
            RunStatus::Done => f.write_str("done"),
            RunStatus::Failed => f.write_str("failed"),
            RunStatus::Unknown(code) => write!(f, "unknown({})", code),
        }
    }
}

/// Human label for a progress value: "unparsed", "done" or "parsing N%".
pub fn format_parse_status(progress: f64) -> String {
    if progress <= 0.0 {
        "unparsed".to_string()
    } else if progress >= 1.0 {
        "done".to_string()
    } else {
        format!("parsing {}%", (progress * 100.0).floor() as i64)
    }
}

/// One timestamped parse log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Local wall-clock time, `HH:MM:SS`.
    pub time: String,
    pub message: String,
}

/// A document row as listed under a knowledge base.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub name: String,
    #[serde(default, alias = "chunk_num")]
    pub chunk_count: i64,
    #[serde(default)]
    pub progress: f64,
    #[serde(default = "default_status")]
    pub status: RunStatus,
    #[serde(default, alias = "create_date")]
    pub created_at: String,
}

fn default_status() -> RunStatus {
    RunStatus::Unstarted
}

/// Parser selection and per-document parser settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParserConfig {
    #[serde(default)]
    pub chunking_config: Option<ChunkingConfig>,
}

/// Document detail used to route parse requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentInfo {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub kb_id: String,
    #[serde(default)]
    pub parser_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub parser_config: ParserConfig,
}

fn null_as_default<'de, D, T>(de: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(de)?.unwrap_or_default())
}

/// KnowFlow parse settings stored on a knowledge base. Set values take
/// precedence over the client's `[parser]` config for that base's documents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KbParserSettings {
    #[serde(default)]
    pub parse_method: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub chunking_config: Option<ChunkingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeBase {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub doc_num: i64,
    #[serde(default)]
    pub chunk_num: i64,
    #[serde(default)]
    pub token_num: i64,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub permission: Option<String>,
    #[serde(default)]
    pub create_date: Option<String>,
}

/// Body of `POST /api/v1/knowledgebases`.
#[derive(Debug, Clone, Serialize)]
pub struct NewKnowledgeBase {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub language: String,
    pub permission: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, alias = "createTime")]
    pub create_time: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Team {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub name: String,
    #[serde(default, alias = "ownerName")]
    pub owner_name: Option<String>,
    #[serde(default, alias = "memberCount")]
    pub member_count: i64,
    #[serde(default, alias = "createTime")]
    pub create_time: Option<String>,
}

/// Body of `POST /api/v1/users`.
#[derive(Debug, Clone, Serialize)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password: String,
}

/// Body of `PUT /api/v1/users/{id}`; unset fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UserUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl UserUpdate {
    pub fn is_empty(&self) -> bool {
        self.username.is_none() && self.email.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamMember {
    #[serde(alias = "userId", deserialize_with = "string_or_number")]
    pub user_id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default, alias = "joinTime")]
    pub join_time: Option<String>,
}

/// A stored file, independent of any knowledge base.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub size: i64,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub kb_id: Option<String>,
    #[serde(default)]
    pub create_time: Option<String>,
}

/// One page of a paginated list endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    #[serde(default = "Vec::new")]
    pub list: Vec<T>,
    #[serde(default)]
    pub total: i64,
}

/// Some admin endpoints send numeric ids, others strings.
fn string_or_number<'de, D>(de: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(de)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {}",
            other
        ))),
    }
}
