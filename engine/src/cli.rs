//! CLI interface for Cove
//!
//! Command-line interface built with clap's derive API. `serve` runs the HTTP
//! API; the other commands use the same engine components directly.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Cove personal assistant backend
///
/// Chat with an LLM, run small Python or read-only shell snippets in a
/// bounded executor, and keep conversation history in SQLite.
#[derive(Parser, Debug)]
#[command(name = "cove")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the HTTP API and web front end
    Serve {
        /// Address to bind (overrides server.host)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides server.port and PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Send one chat message and print the reply
    Chat {
        /// The message to send
        message: String,

        /// Continue an existing conversation
        #[arg(short, long, value_name = "ID")]
        conversation: Option<String>,

        /// Run the first fenced code block of the message
        #[arg(long)]
        execute: bool,
    },

    /// Run a snippet through the bounded executor
    Exec {
        /// Snippet language (python or bash)
        #[arg(short, long, default_value = "python")]
        language: String,

        /// Code to run
        code: String,
    },

    /// Show the messages of a conversation
    History {
        /// Conversation ID
        conversation_id: String,

        /// Number of messages to show (default: 50)
        #[arg(short, long, default_value = "50")]
        limit: i64,
    },

    /// List conversations, most recently updated first
    Conversations {
        /// Number of conversations to show (default: 20)
        #[arg(short, long, default_value = "20")]
        limit: i64,
    },

    /// List uploaded files
    Files,

    /// Run system diagnostics
    Doctor,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_flags() {
        let cli = Cli::parse_from([
            "cove",
            "--json",
            "--log",
            "debug",
            "--config",
            "/tmp/cove.toml",
            "files",
        ]);
        assert!(cli.json);
        assert_eq!(cli.log.as_deref(), Some("debug"));
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/cove.toml")));
        assert!(matches!(cli.command, Command::Files));
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["cove", "doctor", "--json"]);
        assert!(cli.json);
        assert!(matches!(cli.command, Command::Doctor));
    }

    #[test]
    fn test_serve() {
        let cli = Cli::parse_from(["cove", "serve"]);
        assert!(matches!(
            cli.command,
            Command::Serve {
                host: None,
                port: None
            }
        ));

        let cli = Cli::parse_from(["cove", "serve", "--host", "127.0.0.1", "-p", "8080"]);
        if let Command::Serve { host, port } = cli.command {
            assert_eq!(host.as_deref(), Some("127.0.0.1"));
            assert_eq!(port, Some(8080));
        } else {
            panic!("Expected Serve command");
        }
    }

    #[test]
    fn test_chat() {
        let cli = Cli::parse_from(["cove", "chat", "hello there", "-c", "abc", "--execute"]);
        if let Command::Chat {
            message,
            conversation,
            execute,
        } = cli.command
        {
            assert_eq!(message, "hello there");
            assert_eq!(conversation.as_deref(), Some("abc"));
            assert!(execute);
        } else {
            panic!("Expected Chat command");
        }
    }

    #[test]
    fn test_exec_defaults_to_python() {
        let cli = Cli::parse_from(["cove", "exec", "print(1)"]);
        if let Command::Exec { language, code } = cli.command {
            assert_eq!(language, "python");
            assert_eq!(code, "print(1)");
        } else {
            panic!("Expected Exec command");
        }

        let cli = Cli::parse_from(["cove", "exec", "--language", "bash", "ls -la"]);
        if let Command::Exec { language, code } = cli.command {
            assert_eq!(language, "bash");
            assert_eq!(code, "ls -la");
        } else {
            panic!("Expected Exec command");
        }
    }

    #[test]
    fn test_history() {
        let cli = Cli::parse_from(["cove", "history", "conv-1"]);
        if let Command::History {
            conversation_id,
            limit,
        } = cli.command
        {
            assert_eq!(conversation_id, "conv-1");
            assert_eq!(limit, 50);
        } else {
            panic!("Expected History command");
        }

        let cli = Cli::parse_from(["cove", "history", "conv-1", "--limit", "5"]);
        assert!(matches!(cli.command, Command::History { limit: 5, .. }));
    }

    #[test]
    fn test_conversations_limit() {
        let cli = Cli::parse_from(["cove", "conversations"]);
        assert!(matches!(cli.command, Command::Conversations { limit: 20 }));

        let cli = Cli::parse_from(["cove", "conversations", "-l", "3"]);
        assert!(matches!(cli.command, Command::Conversations { limit: 3 }));
    }

    #[test]
    fn test_missing_subcommand_is_error() {
        assert!(Cli::try_parse_from(["cove"]).is_err());
        assert!(Cli::try_parse_from(["cove", "history"]).is_err());
    }
}
