//! LLM Provider Abstraction Layer
//!
//! The assistant talks to its model through the `LLMProvider` trait so the
//! orchestration layer can be exercised against a scripted provider in tests
//! and against any OpenAI-compatible chat-completions endpoint in production.

use async_trait::async_trait;
use sdk::Role;
use serde::{Deserialize, Serialize};

pub mod openai;

pub use openai::OpenAICompatibleProvider;

/// Result type for LLM operations
pub type Result<T> = std::result::Result<T, LLMError>;

/// Errors that can occur during LLM operations
#[derive(Debug, thiserror::Error)]
pub enum LLMError {
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("API error: {status}")]
    Api { status: u16, body: String },

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Timeout")]
    Timeout,

    #[error("Parse error: {0}")]
    ParseError(String),
}

impl LLMError {
    /// HTTP status returned by the upstream, if it answered at all
    pub fn status(&self) -> Option<u16> {
        match self {
            LLMError::Api { status, .. } => Some(*status),
            LLMError::RateLimitExceeded => Some(429),
            _ => None,
        }
    }
}

/// Message in a chat-completions prompt
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }
}

/// LLM Provider trait that all providers must implement
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Returns the name of the provider (e.g., "openai-compatible")
    fn name(&self) -> &str;

    /// Model the provider sends requests for
    fn model(&self) -> &str;

    /// Generate the assistant's reply to `messages`
    ///
    /// # Arguments
    /// * `messages` - System prompt followed by the conversation, oldest first
    async fn generate(&self, messages: &[ChatMessage]) -> Result<String>;

    /// Check if the provider is currently usable.
    /// Default implementation returns true.
    async fn check_health(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_creation() {
        let user_msg = ChatMessage::user("Hello");
        assert_eq!(user_msg.role, Role::User);
        assert_eq!(user_msg.content, "Hello");

        assert_eq!(ChatMessage::assistant("Hi").role, Role::Assistant);
        assert_eq!(ChatMessage::system("Be brief").role, Role::System);
    }

    #[test]
    fn test_message_wire_shape() {
        let json = serde_json::to_value(ChatMessage::system("x")).unwrap();
        assert_eq!(json, serde_json::json!({"role": "system", "content": "x"}));
    }

    #[test]
    fn test_error_status() {
        let err = LLMError::Api {
            status: 502,
            body: String::new(),
        };
        assert_eq!(err.status(), Some(502));
        assert_eq!(err.to_string(), "API error: 502");
        assert_eq!(LLMError::RateLimitExceeded.status(), Some(429));
        assert_eq!(LLMError::Timeout.status(), None);
    }
}
