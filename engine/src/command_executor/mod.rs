use std::time::Duration;
use thiserror::Error;

/// Commands permitted as the first word of a shell-like snippet.
pub const DEFAULT_ALLOWLIST: &[&str] = &[
    "ls", "pwd", "echo", "cat", "head", "tail", "wc", "grep", "find",
];

/// Arguments that turn an allowed command into one that writes, deletes or
/// runs other programs.
const MUTATING_ACTIONS: &[(&str, &[&str])] = &[(
    "find",
    &[
        "-delete", "-exec", "-execdir", "-ok", "-okdir", "-fprint", "-fprint0", "-fprintf",
        "-fls",
    ],
)];

/// CommandExecutor validates shell-like snippets before anything is spawned.
///
/// # Security Features
/// - Allowlist validation of the first word
/// - Shell-style quoting is parsed here, never by a shell
/// - Unquoted control operators (`| & ; < > $` and backticks) are rejected
/// - Actions that write or spawn (`find -delete`, `find -exec`, ...) are rejected
/// - execve-style execution (no shell), see `TerminalTool`
///
/// The allowlist is an ordered list so rejection messages always name the
/// permitted commands in the same order.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    allowlist: Vec<String>,
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Command '{command}' not allowed. Safe commands: {allowed}")]
    CommandNotAllowed { command: String, allowed: String },

    #[error("Shell operator '{0}' is not allowed; commands run without a shell")]
    ShellMetacharactersDetected(char),

    #[error("Option '{action}' of '{command}' is not allowed; commands must be read-only")]
    ActionNotAllowed { command: String, action: String },

    #[error("Unterminated quote in command")]
    UnterminatedQuote,

    #[error("Command timed out ({}s limit)", .0.as_secs())]
    TimedOut(Duration),

    #[error("Execution error: {0}")]
    ExecutionFailed(#[from] std::io::Error),
}

/// A snippet that passed every gate, split into program and arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedCommand {
    pub program: String,
    pub args: Vec<String>,
}

/// Words of a snippet plus the first unquoted control operator, if any.
#[derive(Debug, Default)]
struct Tokenized {
    words: Vec<String>,
    operator: Option<char>,
}

impl CommandExecutor {
    /// Creates a new CommandExecutor with the default read-only allowlist:
    /// ls, pwd, echo, cat, head, tail, wc, grep, find.
    pub fn new() -> Self {
        Self::with_allowlist(DEFAULT_ALLOWLIST.iter().map(|s| s.to_string()).collect())
    }

    /// Creates a CommandExecutor with a custom allowlist.
    pub fn with_allowlist(commands: Vec<String>) -> Self {
        let mut allowlist: Vec<String> = Vec::with_capacity(commands.len());
        for command in commands {
            if !allowlist.contains(&command) {
                allowlist.push(command);
            }
        }
        Self { allowlist }
    }

    /// Adds a command to the allowlist.
    pub fn allow_command(&mut self, command: String) {
        if !self.allowlist.contains(&command) {
            self.allowlist.push(command);
        }
    }

    /// Removes a command from the allowlist.
    pub fn disallow_command(&mut self, command: &str) {
        self.allowlist.retain(|c| c != command);
    }

    pub fn allowlist(&self) -> &[String] {
        &self.allowlist
    }

    pub fn is_allowed(&self, command: &str) -> bool {
        self.allowlist.iter().any(|c| c == command)
    }

    /// Validates a snippet through all gates without executing it.
    ///
    /// # Gates
    /// 1. Parse quoting (unterminated quotes are rejected)
    /// 2. First word must be in the allowlist
    /// 3. No unquoted shell control operators anywhere in the snippet
    /// 4. No arguments that make an allowed command write or spawn
    pub fn validate(&self, snippet: &str) -> Result<ValidatedCommand, CommandError> {
        // Gate 1: Parse quoting
        let tokenized = tokenize(snippet)?;

        // Gate 2: Validate command is in allowlist
        let program = tokenized.words.first().cloned().unwrap_or_default();
        if !self.is_allowed(&program) {
            return Err(CommandError::CommandNotAllowed {
                command: program,
                allowed: self.allowlist.join(", "),
            });
        }

        // Gate 3: Reject chaining, piping and redirection
        if let Some(op) = tokenized.operator {
            return Err(CommandError::ShellMetacharactersDetected(op));
        }

        // Gate 4: Reject mutating actions of allowed commands
        let args = &tokenized.words[1..];
        if let Some((_, actions)) = MUTATING_ACTIONS.iter().find(|(name, _)| *name == program) {
            if let Some(action) = args.iter().find(|arg| actions.contains(&arg.as_str())) {
                return Err(CommandError::ActionNotAllowed {
                    command: program,
                    action: action.clone(),
                });
            }
        }

        Ok(ValidatedCommand {
            program,
            args: args.to_vec(),
        })
    }
}

impl Default for CommandExecutor {
    fn default() -> Self {
        Self::new()
    }
}

/// Splits a snippet into words following POSIX-shell quoting rules.
///
/// Single quotes are literal, double quotes honour `\"` and `\\`, and a
/// backslash outside quotes escapes the next character. Control operators
/// are only recorded when they appear unquoted.
fn tokenize(snippet: &str) -> Result<Tokenized, CommandError> {
    let mut out = Tokenized::default();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = snippet.trim().chars();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(ch) => current.push(ch),
                        None => return Err(CommandError::UnterminatedQuote),
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(esc @ ('"' | '\\')) => current.push(esc),
                            Some(other) => {
                                current.push('\\');
                                current.push(other);
                            }
                            None => return Err(CommandError::UnterminatedQuote),
                        },
                        Some(ch) => current.push(ch),
                        None => return Err(CommandError::UnterminatedQuote),
                    }
                }
            }
            '\\' => {
                in_word = true;
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            c if c.is_whitespace() => {
                if c == '\n' && out.operator.is_none() {
                    out.operator = Some(';');
                }
                if in_word {
                    out.words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            '|' | '&' | ';' | '<' | '>' | '`' | '$' => {
                if out.operator.is_none() {
                    out.operator = Some(c);
                }
                in_word = true;
                current.push(c);
            }
            _ => {
                in_word = true;
                current.push(c);
            }
        }
    }

    if in_word {
        out.words.push(current);
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allowed_command_validates() {
        let executor = CommandExecutor::new();
        let command = executor.validate("ls -la").unwrap();
        assert_eq!(command.program, "ls");
        assert_eq!(command.args, vec!["-la".to_string()]);
    }

    #[test]
    fn test_disallowed_command_rejected() {
        let executor = CommandExecutor::new();
        let result = executor.validate("rm -rf /");
        match result {
            Err(CommandError::CommandNotAllowed { command, allowed }) => {
                assert_eq!(command, "rm");
                assert_eq!(allowed, "ls, pwd, echo, cat, head, tail, wc, grep, find");
            }
            other => panic!("Expected CommandNotAllowed, got {:?}", other),
        }
    }

    #[test]
    fn test_rejection_message_names_allowlist() {
        let executor = CommandExecutor::new();
        let err = executor.validate("python3 -c 'print(1)'").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Command 'python3' not allowed. Safe commands: ls, pwd, echo, cat, head, tail, wc, grep, find"
        );
    }

    #[test]
    fn test_empty_snippet_rejected() {
        let executor = CommandExecutor::new();
        let result = executor.validate("   ");
        assert!(matches!(
            result,
            Err(CommandError::CommandNotAllowed { ref command, .. }) if command.is_empty()
        ));
    }

    #[test]
    fn test_shell_invocation_rejected() {
        let executor = CommandExecutor::new();
        assert!(matches!(
            executor.validate("sh -c 'echo hello'"),
            Err(CommandError::CommandNotAllowed { .. })
        ));
        assert!(matches!(
            executor.validate("bash -c 'echo hello'"),
            Err(CommandError::CommandNotAllowed { .. })
        ));
    }

    #[test]
    fn test_shell_metacharacters_detected() {
        let executor = CommandExecutor::new();

        // Redirection
        assert!(matches!(
            executor.validate("echo hi > out.txt"),
            Err(CommandError::ShellMetacharactersDetected('>'))
        ));

        // Chaining
        assert!(matches!(
            executor.validate("ls && rm -rf /"),
            Err(CommandError::ShellMetacharactersDetected('&'))
        ));

        // Pipe
        assert!(matches!(
            executor.validate("cat notes.txt | sh"),
            Err(CommandError::ShellMetacharactersDetected('|'))
        ));

        // Command substitution
        assert!(matches!(
            executor.validate("echo `whoami`"),
            Err(CommandError::ShellMetacharactersDetected('`'))
        ));
        assert!(matches!(
            executor.validate("echo $(whoami)"),
            Err(CommandError::ShellMetacharactersDetected('$'))
        ));

        // A second line is a second command
        assert!(matches!(
            executor.validate("ls\nrm -rf /"),
            Err(CommandError::ShellMetacharactersDetected(';'))
        ));
    }

    #[test]
    fn test_find_mutating_actions_rejected() {
        let executor = CommandExecutor::new();
        for (snippet, action) in [
            ("find . -name '*.tmp' -delete", "-delete"),
            ("find . -exec rm {} \\;", "-exec"),
            ("find . -execdir rm {} +", "-execdir"),
            ("find . -ok rm {} \\;", "-ok"),
            ("find . -okdir rm {} \\;", "-okdir"),
            ("find . -fprint out.txt", "-fprint"),
            ("find . -fprint0 out.txt", "-fprint0"),
            ("find . -fprintf out.txt '%p'", "-fprintf"),
            ("find . -fls out.txt", "-fls"),
        ] {
            match executor.validate(snippet) {
                Err(CommandError::ActionNotAllowed { command, action: found }) => {
                    assert_eq!(command, "find");
                    assert_eq!(found, action);
                }
                other => panic!("Expected ActionNotAllowed for {}, got {:?}", snippet, other),
            }
        }

        let command = executor.validate("find . -name '*.rs' -print").unwrap();
        assert_eq!(command.args, vec![".", "-name", "*.rs", "-print"]);
        assert!(executor.validate("grep -r -delete notes").is_ok());
    }

    #[test]
    fn test_glued_separator_is_part_of_first_word() {
        let executor = CommandExecutor::new();
        assert!(matches!(
            executor.validate("ls; rm -rf /"),
            Err(CommandError::CommandNotAllowed { ref command, .. }) if command == "ls;"
        ));
    }

    #[test]
    fn test_quoted_operators_are_literal() {
        let executor = CommandExecutor::new();
        let command = executor.validate("grep 'a|b' \"x > y\" notes.txt").unwrap();
        assert_eq!(command.program, "grep");
        assert_eq!(
            command.args,
            vec!["a|b".to_string(), "x > y".to_string(), "notes.txt".to_string()]
        );
    }

    #[test]
    fn test_escapes_and_quotes() {
        let tokens = tokenize(r#"echo "say \"hi\"" it\'s 'a b'c"#).unwrap();
        assert_eq!(
            tokens.words,
            vec!["echo", "say \"hi\"", "it's", "a bc"]
        );
        assert!(tokens.operator.is_none());
    }

    #[test]
    fn test_unterminated_quote() {
        let executor = CommandExecutor::new();
        assert!(matches!(
            executor.validate("echo 'oops"),
            Err(CommandError::UnterminatedQuote)
        ));
    }

    #[test]
    fn test_custom_allowlist() {
        let mut executor = CommandExecutor::with_allowlist(vec!["echo".to_string()]);

        assert!(executor.validate("echo hello").is_ok());
        assert!(matches!(
            executor.validate("ls"),
            Err(CommandError::CommandNotAllowed { .. })
        ));

        executor.allow_command("ls".to_string());
        assert!(executor.validate("ls").is_ok());

        executor.disallow_command("echo");
        assert!(executor.validate("echo hello").is_err());
        assert_eq!(executor.allowlist(), &["ls".to_string()]);
    }

    #[test]
    fn test_timeout_message() {
        let err = CommandError::TimedOut(Duration::from_secs(10));
        assert_eq!(err.to_string(), "Command timed out (10s limit)");
    }
}
