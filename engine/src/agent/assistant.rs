//! Assistant
//!
//! Orchestrates one chat turn:
//!
//! 1. Validate the message and pick a conversation id
//! 2. Record the user message and load recent history (memory feature)
//! 3. Bail out with an error reply when no API key is configured
//! 4. Run the first fenced code block when asked to (execution feature)
//! 5. Build the prompt and call the model
//! 6. Record and return the reply
//!
//! Upstream failures become replies with `status = error`. Only an empty
//! message and store failures are returned as errors.

use std::sync::Arc;

use sdk::errors::EngineError;
use sdk::{
    ChatReply, ChatRequest, ChatStatus, ConversationSummary, ExecutionResult, FileEntry,
    HealthReport, HistoryMessage, Role, UploadReceipt,
};
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::code_blocks;
use super::prompts::{execution_report, story_prompt, SYSTEM_PROMPT};
use crate::config::Config;
use crate::db::{Database, Message};
use crate::executor::BoundedExecutor;
use crate::llm::{ChatMessage, LLMError, LLMProvider};
use crate::workspace::Workspace;

pub const MISSING_KEY_REPLY: &str =
    "LLM API key not configured. Please set LLM_API_KEY environment variable.";

/// Store failures surface as `EngineError::Database` at the sdk seam.
fn store_error(e: anyhow::Error) -> EngineError {
    EngineError::Database(format!("{:#}", e))
}

/// Reply text for a failed model call.
fn upstream_failure_reply(err: &LLMError) -> String {
    match err {
        LLMError::AuthenticationFailed(_) => {
            "API Error: authentication failed - Please check your API key and billing.".to_string()
        }
        LLMError::Api { status, .. } => format!(
            "API Error: {} - Please check your API key and billing.",
            status
        ),
        LLMError::RateLimitExceeded => {
            "API Error: 429 - Please check your API key and billing.".to_string()
        }
        other => format!(
            "Error: {}. Please check your API key and internet connection.",
            other
        ),
    }
}

pub struct Assistant {
    config: Config,
    db: Database,
    provider: Arc<dyn LLMProvider>,
    executor: BoundedExecutor,
    workspace: Workspace,
}

impl Assistant {
    /// Wire the assistant from an already validated config.
    pub fn new(
        config: Config,
        db: Database,
        provider: Arc<dyn LLMProvider>,
    ) -> Result<Self, EngineError> {
        let workspace = Workspace::open(&config.core.workspace, config.server.max_upload_bytes)?;
        let executor = BoundedExecutor::from_config(&config.executor, workspace.root());

        Ok(Self {
            config,
            db,
            provider,
            executor,
            workspace,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn executor(&self) -> &BoundedExecutor {
        &self.executor
    }

    fn api_key_configured(&self) -> bool {
        self.config.llm.api_key.is_some()
    }

    /// Process one chat turn.
    pub async fn chat(&self, request: ChatRequest) -> Result<ChatReply, EngineError> {
        let message = request.message.as_str();
        if message.trim().is_empty() {
            return Err(EngineError::InvalidRequest(
                "Message is required".to_string(),
            ));
        }

        let conversation_id = request
            .conversation_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        info!("Chat turn in conversation {}", conversation_id);

        let memory = self.config.features.memory;
        let mut prior: Vec<Message> = Vec::new();
        if memory {
            let recorded = self
                .db
                .conversations()
                .record_message(&conversation_id, Role::User, message, None)
                .await
                .map_err(store_error)?;
            prior = self
                .db
                .conversations()
                .get_history(&conversation_id, self.config.llm.history_limit)
                .await
                .map_err(store_error)?;
            prior.retain(|m| m.id != recorded.id);
        }

        if !self.api_key_configured() {
            warn!("Chat requested without an API key");
            return self
                .reply(&conversation_id, MISSING_KEY_REPLY.to_string(), ChatStatus::Error, None)
                .await;
        }

        let code_execution = self.maybe_execute(message, request.execute_code).await;

        let mut prompt = Vec::with_capacity(self.config.llm.context_messages + 1);
        prompt.push(ChatMessage::system(SYSTEM_PROMPT));

        // The current message closes the window, so it takes one slot
        let window = self.config.llm.context_messages.saturating_sub(1);
        let skip = prior.len().saturating_sub(window);
        prompt.extend(
            prior
                .iter()
                .skip(skip)
                .map(|m| ChatMessage::new(m.role, m.content.clone())),
        );

        let mut current = message.to_string();
        if let Some(result) = &code_execution {
            current.push_str(&execution_report(result));
        }
        prompt.push(ChatMessage::user(current));

        debug!("Prompt has {} messages", prompt.len());

        match self.provider.generate(&prompt).await {
            Ok(text) => {
                self.reply(&conversation_id, text, ChatStatus::Success, code_execution)
                    .await
            }
            Err(e) => {
                warn!("Model call failed: {}", e);
                self.reply(
                    &conversation_id,
                    upstream_failure_reply(&e),
                    ChatStatus::Error,
                    None,
                )
                .await
            }
        }
    }

    /// Run the message's first code block when execution is enabled and asked for.
    async fn maybe_execute(&self, message: &str, requested: bool) -> Option<ExecutionResult> {
        if !self.config.features.execution || !code_blocks::wants_execution(message, requested) {
            return None;
        }
        let block = code_blocks::extract_first(message)?;
        debug!("Running {} block from chat message", block.language);
        Some(self.executor.execute(&block.code, &block.language).await)
    }

    async fn reply(
        &self,
        conversation_id: &str,
        response: String,
        status: ChatStatus,
        code_execution: Option<ExecutionResult>,
    ) -> Result<ChatReply, EngineError> {
        if self.config.features.memory {
            let metadata = json!({
                "status": status,
                "model": self.provider.model(),
            });
            self.db
                .conversations()
                .record_message(conversation_id, Role::Assistant, &response, Some(&metadata))
                .await
                .map_err(store_error)?;
        }

        Ok(ChatReply {
            response,
            status,
            conversation_id: conversation_id.to_string(),
            code_execution,
        })
    }

    /// Ask for a short Indonesian story built around `idea`.
    pub async fn write_story(&self, idea: &str) -> Result<ChatReply, EngineError> {
        if idea.trim().is_empty() {
            return Err(EngineError::InvalidRequest("Prompt is required".to_string()));
        }
        self.chat(ChatRequest::new(story_prompt(idea))).await
    }

    /// Run a snippet directly, outside any conversation.
    pub async fn execute(
        &self,
        code: &str,
        language: &str,
    ) -> Result<ExecutionResult, EngineError> {
        if !self.config.features.execution {
            return Err(EngineError::FeatureDisabled("code execution".to_string()));
        }
        Ok(self.executor.execute(code, language).await)
    }

    /// Store an upload in the workspace and record its metadata.
    pub async fn upload(&self, filename: &str, bytes: &[u8]) -> Result<UploadReceipt, EngineError> {
        if !self.config.features.file_upload {
            return Err(EngineError::FeatureDisabled("file upload".to_string()));
        }

        let stored = self.workspace.store_upload(filename, bytes).await?;
        self.db
            .files()
            .record_file(&stored.filename, &stored.path, stored.size, None)
            .await
            .map_err(store_error)?;

        info!("Uploaded {} ({} bytes)", stored.filename, stored.size);
        Ok(UploadReceipt::new(stored.filename, stored.size))
    }

    pub async fn list_files(&self) -> Result<Vec<FileEntry>, EngineError> {
        let files = self.db.files().list_files().await.map_err(store_error)?;
        Ok(files.iter().map(|f| f.entry()).collect())
    }

    pub async fn list_conversations(
        &self,
        limit: i64,
    ) -> Result<Vec<ConversationSummary>, EngineError> {
        let conversations = self
            .db
            .conversations()
            .list_conversations(limit)
            .await
            .map_err(store_error)?;
        Ok(conversations.iter().map(|c| c.summary()).collect())
    }

    pub async fn history(
        &self,
        conversation_id: &str,
        limit: i64,
    ) -> Result<Vec<HistoryMessage>, EngineError> {
        let messages = self
            .db
            .conversations()
            .get_history(conversation_id, limit)
            .await
            .map_err(store_error)?;
        Ok(messages.iter().map(|m| m.to_history()).collect())
    }

    pub async fn health(&self) -> HealthReport {
        let (status, database) = match self.db.ping().await {
            Ok(()) => ("OK", "SQLite with conversation history".to_string()),
            Err(e) => {
                warn!("Health probe could not reach the database: {:#}", e);
                ("degraded", "SQLite unavailable".to_string())
            }
        };

        HealthReport {
            status: status.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            features: self.config.features.enabled(),
            api_key_configured: self.api_key_configured(),
            model: self.config.llm.model.clone(),
            workspace: self.workspace.root().display().to_string(),
            database,
        }
    }
}
