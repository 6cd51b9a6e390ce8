//! Cove SDK
//!
//! Shared library providing traits, types, and utilities for Cove components.
//! This crate is used by both the engine and the core tools (the HTTP API server).

/// Core tool trait and context types
pub mod core_tool;

/// Error types and handling
pub mod errors;

/// Request, response and record types shared across components
pub mod types;

// Re-export commonly used types
pub use core_tool::{AssistantHandle, AssistantHandleImpl, CoreContext, CoreTool};
pub use errors::{EngineError, ErrorExt};
pub use types::{
    ChatReply, ChatRequest, ChatStatus, ConversationSummary, ExecutionResult, FileEntry,
    HealthReport, HistoryMessage, Language, Role, UploadReceipt,
};
