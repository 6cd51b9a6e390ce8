//! Error types and handling
//!
//! This module provides the error types used throughout the Cove engine.
//! All errors implement the `ErrorExt` trait which provides user-friendly
//! hints and indicates whether errors are recoverable.
//!
//! Execution failures (rejected commands, timeouts, faults raised by a
//! snippet) are never errors: they are reported inside
//! [`ExecutionResult`](crate::types::ExecutionResult). The variants below
//! cover the remaining failure surface: configuration, storage, the LLM
//! upstream, uploads and malformed requests.
//!
//! # Security
//!
//! User hints never include secrets (API keys) or absolute host paths.

use thiserror::Error;

/// Trait for Cove error extensions
///
/// This trait provides additional context for errors, including user-friendly
/// hints and recoverability information. All engine errors implement this trait.
pub trait ErrorExt {
    /// Returns a user-friendly hint for the error
    ///
    /// The hint is safe to display to end users and does not contain:
    /// - Secrets (API keys, tokens, passwords)
    /// - File paths
    /// - Internal implementation details
    fn user_hint(&self) -> &str;

    /// Returns whether the error is recoverable
    ///
    /// Recoverable errors can be retried or worked around. Non-recoverable
    /// errors typically require a configuration change or a restart.
    fn is_recoverable(&self) -> bool;
}

/// Main engine error type
///
/// # Error Categories
///
/// - **Configuration**: Invalid or missing configuration
/// - **Database**: SQLite operation failures
/// - **LLM Provider**: API failures, authentication errors
/// - **Request**: Malformed input or a disabled feature
/// - **File System**: Upload name validation and workspace access errors
///
/// # Examples
///
/// ```
/// use sdk::errors::{EngineError, ErrorExt};
///
/// let error = EngineError::InvalidRequest("Message is required".to_string());
/// println!("Hint: {}", error.user_hint());
/// assert!(error.is_recoverable());
///
/// let fatal_error = EngineError::Config("bad log level".to_string());
/// assert!(!fatal_error.is_recoverable());
/// ```
#[derive(Debug, Error)]
pub enum EngineError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Database errors
    #[error("Database error: {0}")]
    Database(String),

    // LLM provider errors
    #[error("LLM provider error: {0}")]
    LLMProvider(String),

    // Request errors
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Feature disabled: {0}")]
    FeatureDisabled(String),

    // File system errors
    #[error("Path denied: {0:?}")]
    PathDenied(std::path::PathBuf),

    #[error("Path outside workspace: {0:?}")]
    PathOutsideWorkspace(std::path::PathBuf),

    #[error("Path canonicalization failed for {0:?}: {1}")]
    PathCanonicalization(std::path::PathBuf, String),

    #[error("Upload too large: {size} bytes > {limit} bytes")]
    UploadTooLarge { size: usize, limit: usize },

    // Network errors
    #[error("Network error: {0}")]
    Network(String),

    // Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ErrorExt for EngineError {
    fn user_hint(&self) -> &str {
        match self {
            Self::Config(_) => "Check your config.toml file for errors",

            Self::Database(_) => "Database operation failed. Try restarting the server",

            Self::LLMProvider(_) => "LLM provider unavailable. Check your API key and network",

            Self::InvalidRequest(_) => "The request was malformed. Check the required fields",
            Self::FeatureDisabled(_) => "This feature is disabled in the server configuration",

            Self::PathDenied(_) => "This file name is not allowed",
            Self::PathOutsideWorkspace(_) => "Files must stay within the workspace",
            Self::PathCanonicalization(_, _) => "Invalid path specified",
            Self::UploadTooLarge { .. } => "File too large. Upload a smaller file",

            Self::Network(_) => "Network operation failed. Check your connection",

            Self::Io(_) => "File system operation failed",
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            // Non-recoverable errors
            Self::Config(_) | Self::FeatureDisabled(_) => false,

            // All other errors are potentially recoverable
            _ => true,
        }
    }
}
