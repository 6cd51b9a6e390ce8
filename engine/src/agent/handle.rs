//! Bridge from the sdk handle trait to the engine's `Assistant`

use async_trait::async_trait;
use sdk::errors::EngineError;
use sdk::{
    AssistantHandle, AssistantHandleImpl, ChatReply, ChatRequest, ConversationSummary,
    ExecutionResult, FileEntry, HealthReport, HistoryMessage, UploadReceipt,
};
use std::sync::Arc;

use super::Assistant;

pub struct EngineAssistantHandle {
    assistant: Arc<Assistant>,
}

impl EngineAssistantHandle {
    pub fn new(assistant: Arc<Assistant>) -> Self {
        Self { assistant }
    }

    /// Wrap `assistant` in the handle core tools receive.
    pub fn into_handle(assistant: Arc<Assistant>) -> AssistantHandle {
        AssistantHandle::new(Arc::new(Self::new(assistant)))
    }
}

#[async_trait]
impl AssistantHandleImpl for EngineAssistantHandle {
    async fn chat(&self, request: ChatRequest) -> Result<ChatReply, EngineError> {
        self.assistant.chat(request).await
    }

    async fn write_story(&self, prompt: &str) -> Result<ChatReply, EngineError> {
        self.assistant.write_story(prompt).await
    }

    async fn execute(&self, code: &str, language: &str) -> Result<ExecutionResult, EngineError> {
        self.assistant.execute(code, language).await
    }

    async fn upload(&self, filename: &str, bytes: &[u8]) -> Result<UploadReceipt, EngineError> {
        self.assistant.upload(filename, bytes).await
    }

    async fn list_files(&self) -> Result<Vec<FileEntry>, EngineError> {
        self.assistant.list_files().await
    }

    async fn list_conversations(
        &self,
        limit: i64,
    ) -> Result<Vec<ConversationSummary>, EngineError> {
        self.assistant.list_conversations(limit).await
    }

    async fn history(
        &self,
        conversation_id: &str,
        limit: i64,
    ) -> Result<Vec<HistoryMessage>, EngineError> {
        self.assistant.history(conversation_id, limit).await
    }

    async fn health(&self) -> HealthReport {
        self.assistant.health().await
    }
}
