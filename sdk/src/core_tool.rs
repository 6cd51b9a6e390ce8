//! Core tool trait and context types
//!
//! This module defines the CoreTool trait that all native core tools must implement,
//! and the CoreContext that provides limited, controlled access to engine functionality.

use crate::errors::EngineError;
use crate::types::{
    ChatReply, ChatRequest, ConversationSummary, ExecutionResult, FileEntry, HealthReport,
    HistoryMessage, UploadReceipt,
};
use async_trait::async_trait;
use std::sync::Arc;

/// Trait that all core tools must implement
#[async_trait]
pub trait CoreTool: Send + Sync {
    /// Returns the name of the tool
    fn name(&self) -> &str;

    /// Returns the version of the tool
    fn version(&self) -> &str;

    /// Called when the tool is loaded, provides CoreContext for engine interaction
    async fn start(&mut self, ctx: CoreContext) -> Result<(), EngineError>;

    /// Called when the tool is being unloaded
    async fn stop(&mut self) -> Result<(), EngineError>;
}

/// Context provided to core tools for engine interaction.
///
/// CoreContext is the sole API surface for core tools to interact with the engine.
/// It exposes specific operations without revealing internal engine state.
#[derive(Clone)]
pub struct CoreContext {
    /// Handle for assistant operations (chat, execution, files, history)
    pub assistant: AssistantHandle,
}

impl CoreContext {
    /// Create a new CoreContext
    pub fn new(assistant: AssistantHandle) -> Self {
        Self { assistant }
    }
}

/// Handle for assistant operations
#[derive(Clone)]
pub struct AssistantHandle {
    inner: Arc<dyn AssistantHandleImpl>,
}

impl AssistantHandle {
    /// Create a new AssistantHandle with the given implementation
    pub fn new(inner: Arc<dyn AssistantHandleImpl>) -> Self {
        Self { inner }
    }

    /// Submit a chat message and wait for the assistant reply
    pub async fn chat(&self, request: ChatRequest) -> Result<ChatReply, EngineError> {
        self.inner.chat(request).await
    }

    /// Ask the creative-writing helper for a story
    pub async fn write_story(&self, prompt: &str) -> Result<ChatReply, EngineError> {
        self.inner.write_story(prompt).await
    }

    /// Run a snippet through the bounded executor
    ///
    /// Fails only when execution is disabled; every execution outcome,
    /// including rejections and timeouts, is an `ExecutionResult`.
    pub async fn execute(&self, code: &str, language: &str) -> Result<ExecutionResult, EngineError> {
        self.inner.execute(code, language).await
    }

    /// Store an uploaded file in the workspace
    pub async fn upload(&self, filename: &str, bytes: &[u8]) -> Result<UploadReceipt, EngineError> {
        self.inner.upload(filename, bytes).await
    }

    /// List uploaded files, newest first
    pub async fn list_files(&self) -> Result<Vec<FileEntry>, EngineError> {
        self.inner.list_files().await
    }

    /// List conversations, most recently updated first
    pub async fn list_conversations(
        &self,
        limit: i64,
    ) -> Result<Vec<ConversationSummary>, EngineError> {
        self.inner.list_conversations(limit).await
    }

    /// Most recent messages of a conversation, oldest first
    pub async fn history(
        &self,
        conversation_id: &str,
        limit: i64,
    ) -> Result<Vec<HistoryMessage>, EngineError> {
        self.inner.history(conversation_id, limit).await
    }

    /// Health probe
    pub async fn health(&self) -> HealthReport {
        self.inner.health().await
    }
}

/// Trait for assistant handle implementation (to be implemented by engine)
#[async_trait]
pub trait AssistantHandleImpl: Send + Sync {
    async fn chat(&self, request: ChatRequest) -> Result<ChatReply, EngineError>;

    async fn write_story(&self, prompt: &str) -> Result<ChatReply, EngineError>;

    async fn execute(&self, code: &str, language: &str) -> Result<ExecutionResult, EngineError>;

    async fn upload(&self, filename: &str, bytes: &[u8]) -> Result<UploadReceipt, EngineError>;

    async fn list_files(&self) -> Result<Vec<FileEntry>, EngineError>;

    async fn list_conversations(&self, limit: i64)
        -> Result<Vec<ConversationSummary>, EngineError>;

    async fn history(
        &self,
        conversation_id: &str,
        limit: i64,
    ) -> Result<Vec<HistoryMessage>, EngineError>;

    async fn health(&self) -> HealthReport;
}
