//! Command handlers for CLI operations
//!
//! One handler per CLI command. `serve` runs the HTTP API until Ctrl+C; the
//! rest open the store, do their work and print either text or pretty JSON.

use anyhow::{Context, Result};
use api_server::ApiServer;
use sdk::{ChatRequest, ChatStatus, CoreContext, CoreTool, ExecutionResult};
use serde_json::json;
use std::sync::Arc;

use crate::agent::{Assistant, EngineAssistantHandle};
use crate::config::Config;
use crate::db::Database;
use crate::executor::BoundedExecutor;
use crate::llm::OpenAICompatibleProvider;

/// Output format for command results
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn open_database(config: &Config) -> Result<Database> {
    Database::new(&config.database_path())
        .await
        .context("Failed to open database")
}

/// Wire the store, the LLM client and the executor into an [`Assistant`].
pub async fn build_assistant(config: &Config) -> Result<Arc<Assistant>> {
    let database = open_database(config).await?;
    let provider = OpenAICompatibleProvider::from_config(&config.llm)
        .context("Failed to create LLM client")?;

    if !provider.has_api_key() {
        tracing::warn!("LLM_API_KEY is not set; chat replies will report the missing key");
    }

    let assistant = Assistant::new(config.clone(), database, Arc::new(provider))?;
    Ok(Arc::new(assistant))
}

/// Run the HTTP API until Ctrl+C
pub async fn handle_serve(
    config: &Config,
    host: Option<String>,
    port: Option<u16>,
    format: OutputFormat,
) -> Result<()> {
    let host = host.unwrap_or_else(|| config.server.host.clone());
    let port = port.unwrap_or(config.server.port);
    let bind = format!("{}:{}", host, port);

    let assistant = build_assistant(config).await?;
    let ctx = CoreContext::new(EngineAssistantHandle::into_handle(Arc::clone(&assistant)));

    let mut server = ApiServer::new(bind, config.server.max_upload_bytes);
    server.start(ctx).await?;

    let addr = server
        .local_addr()
        .context("API server did not report its address")?;

    match format {
        OutputFormat::Text => {
            println!("Cove {} listening on http://{}", server.version(), addr);
            println!("  Workspace: {}", config.core.workspace.display());
            println!("  Model:     {}", config.llm.model);
            println!("  Features:  {}", config.features.enabled().join(", "));
            println!();
            println!("Press Ctrl+C to stop.");
        }
        OutputFormat::Json => {
            print_json(&json!({
                "status": "listening",
                "address": addr.to_string(),
                "workspace": config.core.workspace,
                "model": config.llm.model,
                "features": config.features.enabled(),
            }))?;
        }
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown signal received");

    server.stop().await?;
    assistant
        .database()
        .flush_wal()
        .await
        .context("Failed to flush database on shutdown")?;

    Ok(())
}

/// Send one chat message and print the reply
pub async fn handle_chat(
    message: String,
    conversation: Option<String>,
    execute: bool,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let assistant = build_assistant(config).await?;

    let mut request = ChatRequest::new(message);
    if let Some(id) = conversation {
        request = request.in_conversation(id);
    }
    if execute {
        request = request.with_execution();
    }

    let reply = assistant.chat(request).await?;

    match format {
        OutputFormat::Text => {
            if let Some(execution) = &reply.code_execution {
                print_execution(execution);
                println!();
            }
            println!("{}", reply.response);
            println!();
            match reply.status {
                ChatStatus::Success => println!("Conversation: {}", reply.conversation_id),
                ChatStatus::Error => {
                    println!("✗ Assistant error (conversation {})", reply.conversation_id)
                }
            }
        }
        OutputFormat::Json => print_json(&serde_json::to_value(&reply)?)?,
    }

    Ok(())
}

fn print_execution(result: &ExecutionResult) {
    let mark = if result.success { "✓" } else { "✗" };
    println!("{} {} execution", mark, result.language);
    if !result.output.is_empty() {
        println!("{}", result.output.trim_end());
    }
    if !result.error.is_empty() {
        println!("Error: {}", result.error.trim_end());
    }
}

/// Run a snippet through the bounded executor
///
/// Unlike the other commands this needs neither the store nor the LLM
/// client, so it builds the executor on its own.
pub async fn handle_exec(
    language: String,
    code: String,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    if !config.features.execution {
        anyhow::bail!("Code execution is disabled (features.execution = false)");
    }

    let executor = BoundedExecutor::from_config(&config.executor, &config.core.workspace);
    let result = executor.execute(&code, &language).await;

    match format {
        OutputFormat::Text => print_execution(&result),
        OutputFormat::Json => print_json(&serde_json::to_value(&result)?)?,
    }

    Ok(())
}

/// Show the messages of a conversation, oldest first
pub async fn handle_history(
    conversation_id: String,
    limit: i64,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let database = open_database(config).await?;
    let messages = database
        .conversations()
        .get_history(&conversation_id, limit)
        .await
        .context("Failed to fetch conversation history")?;

    match format {
        OutputFormat::Text => {
            if messages.is_empty() {
                println!("No messages in conversation {}", conversation_id);
                return Ok(());
            }

            println!("Conversation {} (last {} messages):", conversation_id, limit);
            println!();

            for message in &messages {
                println!(
                    "[{}] {}:",
                    message.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    message.role
                );
                println!("{}", message.content);
                println!();
            }
        }
        OutputFormat::Json => {
            let history: Vec<_> = messages.iter().map(|m| m.to_history()).collect();
            print_json(&json!({
                "conversation_id": conversation_id,
                "messages": history,
                "count": history.len(),
                "limit": limit
            }))?;
        }
    }

    Ok(())
}

/// List conversations, most recently updated first
pub async fn handle_conversations(limit: i64, config: &Config, format: OutputFormat) -> Result<()> {
    let database = open_database(config).await?;
    let conversations = database
        .conversations()
        .list_conversations(limit)
        .await
        .context("Failed to list conversations")?;

    match format {
        OutputFormat::Text => {
            if conversations.is_empty() {
                println!("No conversations yet");
                return Ok(());
            }

            for conversation in &conversations {
                println!("{}", conversation.id);
                println!("  Title:   {}", conversation.title);
                println!(
                    "  Updated: {}",
                    conversation.updated_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
        }
        OutputFormat::Json => {
            let summaries: Vec<_> = conversations.iter().map(|c| c.summary()).collect();
            print_json(&json!({
                "conversations": summaries,
                "count": summaries.len(),
                "limit": limit
            }))?;
        }
    }

    Ok(())
}

/// List uploaded files, newest first
pub async fn handle_files(config: &Config, format: OutputFormat) -> Result<()> {
    let database = open_database(config).await?;
    let files = database
        .files()
        .list_files()
        .await
        .context("Failed to list files")?;

    match format {
        OutputFormat::Text => {
            if files.is_empty() {
                println!("No uploaded files");
                return Ok(());
            }

            for file in &files {
                println!(
                    "{:<40} {:>10} bytes  {}",
                    file.filename,
                    file.size,
                    file.created_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
        }
        OutputFormat::Json => {
            let entries: Vec<_> = files.iter().map(|f| f.entry()).collect();
            print_json(&json!({ "files": entries, "count": entries.len() }))?;
        }
    }

    Ok(())
}

/// Validate configuration and check the local environment
pub async fn handle_doctor(config: &Config, format: OutputFormat) -> Result<()> {
    let mut issues = Vec::new();
    let mut checks: Vec<(&str, String)> = Vec::new();

    checks.push((
        "Version",
        format!("{} ({})", env!("CARGO_PKG_VERSION"), env!("GIT_COMMIT_HASH")),
    ));

    // Config is already validated when loaded
    checks.push(("Configuration", "Valid".to_string()));

    let workspace = &config.core.workspace;
    if workspace.is_dir() {
        let probe = workspace.join(".cove-doctor");
        match tokio::fs::write(&probe, b"ok").await {
            Ok(()) => {
                tokio::fs::remove_file(&probe).await.ok();
                checks.push(("Workspace directory", "Writable".to_string()));
            }
            Err(e) => {
                checks.push(("Workspace directory", "Read-only".to_string()));
                issues.push(format!("Workspace is not writable: {}", e));
            }
        }
    } else {
        checks.push(("Workspace directory", "Missing".to_string()));
        issues.push(format!(
            "Workspace directory does not exist: {}",
            workspace.display()
        ));
    }

    match open_database(config).await {
        Ok(database) => match database.ping().await {
            Ok(()) => checks.push(("Database", "OK".to_string())),
            Err(e) => {
                checks.push(("Database", "Failed".to_string()));
                issues.push(format!("Database query failed: {:#}", e));
            }
        },
        Err(e) => {
            checks.push(("Database", "Failed".to_string()));
            issues.push(format!("Cannot open database: {:#}", e));
        }
    }

    if config.llm.api_key.is_some() {
        checks.push(("LLM API key", "Configured".to_string()));
    } else {
        checks.push(("LLM API key", "Not configured".to_string()));
        issues.push("LLM_API_KEY is not set. Chat will reply with an error.".to_string());
    }
    checks.push(("LLM endpoint", config.llm.base_url.clone()));
    checks.push(("Model", config.llm.model.clone()));

    if config.features.execution {
        let executor = BoundedExecutor::from_config(&config.executor, workspace);

        let python = executor.execute("print(6 * 7)", "python").await;
        if python.success && python.output.trim() == "42" {
            checks.push(("Python executor", "OK".to_string()));
        } else {
            checks.push(("Python executor", "Failed".to_string()));
            issues.push(format!("Python self-test failed: {}", python.error));
        }

        let shell = executor.execute("pwd", "bash").await;
        if shell.success {
            checks.push(("Shell executor", "OK".to_string()));
        } else {
            checks.push(("Shell executor", "Failed".to_string()));
            issues.push(format!("Shell self-test failed: {}", shell.error));
        }
    } else {
        checks.push(("Code execution", "Disabled".to_string()));
    }

    checks.push(("Features", config.features.enabled().join(", ")));

    match format {
        OutputFormat::Text => {
            println!("Cove System Diagnostics");
            println!("=======================");
            println!();

            println!("System Checks:");
            for (check, status) in &checks {
                println!("  {:<25} {}", format!("{}:", check), status);
            }

            println!();

            if issues.is_empty() {
                println!("✓ All checks passed!");
            } else {
                println!("⚠ Issues found:");
                println!();
                for (i, issue) in issues.iter().enumerate() {
                    println!("  {}. {}", i + 1, issue);
                }
            }
        }
        OutputFormat::Json => {
            print_json(&json!({
                "checks": checks.iter().map(|(name, status)| {
                    json!({
                        "name": name,
                        "status": status
                    })
                }).collect::<Vec<_>>(),
                "issues": issues,
                "healthy": issues.is_empty()
            }))?;
        }
    }

    Ok(())
}
