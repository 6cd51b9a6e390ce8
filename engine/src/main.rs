// Cove assistant backend
// Main entry point for the cove binary

use clap::Parser;
use cove_engine::cli::{Cli, Command};
use cove_engine::config::Config;
use cove_engine::handlers::{
    handle_chat, handle_conversations, handle_doctor, handle_exec, handle_files, handle_history,
    handle_serve, OutputFormat,
};
use cove_engine::telemetry::{init_telemetry, init_telemetry_with_level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Initialize basic telemetry first (before config is loaded)
    init_telemetry();

    let version = env!("CARGO_PKG_VERSION");
    let commit = env!("GIT_COMMIT_HASH");
    let timestamp = env!("BUILD_TIMESTAMP");

    tracing::info!("Cove v{} ({} - {})", version, commit, timestamp);

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    // An explicit --config path is created with defaults when missing, like the default one
    let config = if let Some(config_path) = &cli.config {
        Config::load_or_create_at(config_path)?
    } else {
        Config::load_or_create()?
    };

    // Only takes effect if RUST_LOG is not set
    init_telemetry_with_level(cli.log.as_deref().unwrap_or(&config.core.log_level));

    match cli.command {
        Command::Serve { host, port } => {
            tracing::info!("Starting API server...");
            handle_serve(&config, host, port, format).await
        }

        Command::Chat {
            message,
            conversation,
            execute,
        } => handle_chat(message, conversation, execute, &config, format).await,

        Command::Exec { language, code } => {
            tracing::debug!("Executing {} snippet ({} bytes)", language, code.len());
            handle_exec(language, code, &config, format).await
        }

        Command::History {
            conversation_id,
            limit,
        } => handle_history(conversation_id, limit, &config, format).await,

        Command::Conversations { limit } => handle_conversations(limit, &config, format).await,

        Command::Files => handle_files(&config, format).await,

        Command::Doctor => {
            tracing::info!("Running diagnostics...");
            handle_doctor(&config, format).await
        }
    }
}
