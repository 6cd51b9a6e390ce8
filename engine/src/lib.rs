//! Cove Engine Library
//!
//! Core of the Cove assistant backend: bounded code execution, the
//! conversation store, the LLM client and the orchestration that ties them
//! together. Used by the `cove` binary and the integration tests.

/// Configuration management module
pub mod config;

/// Shell-like command validation and execution
pub mod command_executor;

/// Python-subset interpreter
pub mod sandbox;

/// Bounded executor dispatching snippets by language
pub mod executor;

/// Built-in native tools
pub mod tools;

/// Database persistence module
pub mod db;

/// Upload storage inside the workspace
pub mod workspace;

/// LLM provider abstraction layer
pub mod llm;

/// Chat orchestration
pub mod agent;

/// Telemetry and Observability
pub mod telemetry;

/// CLI interface module
pub mod cli;

/// Command handlers module
pub mod handlers;
