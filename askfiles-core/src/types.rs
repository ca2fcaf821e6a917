//! Core domain types for askfiles
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Remote file** | A file stored by the Gemini Files API, addressed by its id |
//! | **File id** | The last path segment of the resource name (`files/abc123` → `abc123`) |
//! | **Model** | A hosted generation backend, tried in priority order |
//! | **Turn** | One prior message of a conversation, authored by the user or the model |
//!
//! Wire-facing types serialize in camelCase to match the HTTP API.

use serde::{Deserialize, Serialize};

// ============================================
// Remote files
// ============================================

/// Processing state reported by the Files API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileState {
    Processing,
    Active,
    Failed,
    #[default]
    #[serde(other, rename = "STATE_UNSPECIFIED")]
    Unspecified,
}

impl FileState {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileState::Processing => "PROCESSING",
            FileState::Active => "ACTIVE",
            FileState::Failed => "FAILED",
            FileState::Unspecified => "STATE_UNSPECIFIED",
        }
    }
}

/// A file held by the upstream storage API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFile {
    /// Short identifier used everywhere else in askfiles
    pub id: String,
    /// Full resource name (`files/<id>`)
    pub name: String,
    pub display_name: Option<String>,
    pub mime_type: Option<String>,
    pub size_bytes: Option<u64>,
    pub state: FileState,
    pub create_time: Option<String>,
    pub update_time: Option<String>,
    /// URI to reference the file from a generation request
    pub uri: Option<String>,
}

/// One page of a file listing
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FilePage {
    pub files: Vec<RemoteFile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
}

/// Result of a successful upload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedFile {
    /// The file id, usable as `fileUri` in chat requests
    pub file_uri: String,
    pub file_name: String,
    pub mime_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// Reduce any file reference to a bare file id.
///
/// Accepts bare ids, `files/<id>` resource names and full
/// `https://.../v1beta/files/<id>` URIs.
pub fn normalize_file_ref(reference: &str) -> String {
    let reference = reference.trim();
    let tail = match reference.split_once("/files/") {
        Some((_, tail)) => tail,
        None => reference,
    };
    tail.rsplit('/').next().unwrap_or(tail).to_string()
}

// ============================================
// Question answering
// ============================================

/// Author of a conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Model,
}

impl TurnRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnRole::User => "user",
            TurnRole::Model => "model",
        }
    }
}

/// A prior message in the conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: TurnRole,
    /// Message text
    pub parts: String,
}

/// A question, optionally scoped to specific files and threaded on history.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub file_uri: Option<String>,
    #[serde(default)]
    pub file_uris: Option<Vec<String>>,
    #[serde(default)]
    pub conversation_history: Option<Vec<ChatTurn>>,
}

/// The generated answer and the files it was grounded on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub response: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_uris_used: Option<Vec<String>>,
}

/// A file attached to a generation request as context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePart {
    pub file_uri: String,
    pub mime_type: String,
}

/// Whether a generation threads prior conversation turns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationMode {
    /// Single-shot `generateContent`
    SingleShot,
    /// Prior turns are sent ahead of the question
    Chat,
}

impl GenerationMode {
    pub fn for_history(history: &[ChatTurn]) -> Self {
        if history.is_empty() {
            GenerationMode::SingleShot
        } else {
            GenerationMode::Chat
        }
    }
}
