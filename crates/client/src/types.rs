//! Request and response bodies.
//!
//! Server-owned resources are decoded leniently: unknown fields are ignored,
//! optional fields default, and ids may arrive as strings or numbers.

use ledgerpilot_chat::HistoryMessage;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Body of `POST /api/v1/ai/{projectId}/chat`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    pub project_id: i64,
    pub messages: Vec<HistoryMessage>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Conversation {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    pub title: Option<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub messages: Vec<ConversationMessage>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Commit {
    #[serde(alias = "sha", alias = "id")]
    pub hash: String,
    pub message: String,
    pub author: Option<String>,
    #[serde(alias = "date", alias = "createdAt")]
    pub timestamp: Option<String>,
    pub files: Vec<String>,
}

impl Commit {
    pub fn short_hash(&self) -> &str {
        self.hash.get(..7).unwrap_or(&self.hash)
    }

    /// First line of the commit message.
    pub fn subject(&self) -> &str {
        self.message.lines().next().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FileEntry {
    pub name: String,
    pub path: String,
    #[serde(alias = "is_dir", alias = "directory")]
    pub is_dir: bool,
    pub size: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FileContent {
    pub path: String,
    pub content: String,
}

/// Body of `POST .../files/write`.
#[derive(Debug, Clone, Serialize)]
pub struct WriteFileRequest<'a> {
    pub path: &'a str,
    pub content: &'a str,
}

/// Some endpoints wrap their payload as `{"data": ...}`; others return it
/// bare.  Accept both.
pub(crate) fn unwrap_envelope(value: Value) -> Value {
    match value {
        Value::Object(mut map) if map.contains_key("data") => {
            map.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    }
}

fn id_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(id) => id,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}
