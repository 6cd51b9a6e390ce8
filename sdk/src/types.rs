//! Request, response and record types shared across components
//!
//! These are the shapes that cross the boundary between the engine and the
//! core tools. Field names follow the JSON contract of the HTTP API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Language tag accepted by the bounded executor
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    /// Python subset run by the in-process interpreter
    Python,

    /// Allow-listed read-only shell commands
    Shell,
}

impl Language {
    /// Canonical names reported when a tag is not supported
    pub const SUPPORTED: &'static [&'static str] = &["python", "bash"];

    /// Resolve a request tag (case-insensitive, whitespace ignored)
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "python" | "py" => Some(Language::Python),
            "bash" | "shell" | "sh" => Some(Language::Shell),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::Shell => "bash",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of running a snippet
///
/// Every execution path, including rejections and timeouts, produces one of
/// these; nothing is raised to the caller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutionResult {
    pub success: bool,
    pub output: String,
    pub error: String,
    /// Echo of the language tag as the caller sent it
    pub language: String,
}

impl ExecutionResult {
    /// A completed run
    pub fn completed(
        language: impl Into<String>,
        success: bool,
        output: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            success,
            output: output.into(),
            error: error.into(),
            language: language.into(),
        }
    }

    /// A run that never started or produced nothing useful
    pub fn rejected(language: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: error.into(),
            language: language.into(),
        }
    }
}

/// Role of a message author
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

/// Body of a chat submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,

    #[serde(default)]
    pub conversation_id: Option<String>,

    /// Force code extraction and execution for this message
    #[serde(default)]
    pub execute_code: bool,
}

impl ChatRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            conversation_id: None,
            execute_code: false,
        }
    }

    pub fn in_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    pub fn with_execution(mut self) -> Self {
        self.execute_code = true;
        self
    }
}

/// Whether the assistant produced a real reply
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatStatus {
    Success,
    Error,
}

/// Envelope returned for every chat submission
///
/// Upstream failures are reported here with `status = error` and a
/// human-readable `response`, never as a transport error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatReply {
    pub response: String,
    pub status: ChatStatus,
    pub conversation_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_execution: Option<ExecutionResult>,
}

/// Conversation listing entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationSummary {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One message of a conversation history
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// Uploaded file listing entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileEntry {
    pub filename: String,
    pub size: u64,
    pub created_at: DateTime<Utc>,
}

/// Response to a successful upload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadReceipt {
    pub success: bool,
    pub filename: String,
    pub size: u64,
    pub message: String,
}

impl UploadReceipt {
    pub fn new(filename: impl Into<String>, size: u64) -> Self {
        let filename = filename.into();
        Self {
            success: true,
            message: format!("File {} uploaded successfully", filename),
            filename,
            size,
        }
    }
}

/// Health probe payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: String,
    pub version: String,
    pub features: Vec<String>,
    pub api_key_configured: bool,
    pub model: String,
    pub workspace: String,
    pub database: String,
}
