//! Faults raised while parsing or running a snippet

use std::fmt;
use thiserror::Error;

/// Exception classes known to the interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Exception,
    ValueError,
    TypeError,
    KeyError,
    IndexError,
    ZeroDivisionError,
    NameError,
    AttributeError,
    AssertionError,
    RuntimeError,
    OverflowError,
    RecursionError,
    MemoryError,
    ImportError,
    /// Raised by the wall-clock guard; snippets cannot catch it
    TimeoutError,
}

impl ErrorKind {
    /// Classes a snippet may construct and name in `except` clauses.
    pub const USER_VISIBLE: &'static [ErrorKind] = &[
        ErrorKind::Exception,
        ErrorKind::ValueError,
        ErrorKind::TypeError,
        ErrorKind::KeyError,
        ErrorKind::IndexError,
        ErrorKind::ZeroDivisionError,
        ErrorKind::NameError,
        ErrorKind::AttributeError,
        ErrorKind::AssertionError,
        ErrorKind::RuntimeError,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ErrorKind::Exception => "Exception",
            ErrorKind::ValueError => "ValueError",
            ErrorKind::TypeError => "TypeError",
            ErrorKind::KeyError => "KeyError",
            ErrorKind::IndexError => "IndexError",
            ErrorKind::ZeroDivisionError => "ZeroDivisionError",
            ErrorKind::NameError => "NameError",
            ErrorKind::AttributeError => "AttributeError",
            ErrorKind::AssertionError => "AssertionError",
            ErrorKind::RuntimeError => "RuntimeError",
            ErrorKind::OverflowError => "OverflowError",
            ErrorKind::RecursionError => "RecursionError",
            ErrorKind::MemoryError => "MemoryError",
            ErrorKind::ImportError => "ImportError",
            ErrorKind::TimeoutError => "TimeoutError",
        }
    }

    /// Whether an `except` clause naming `handler` catches this kind.
    pub fn matches(&self, handler: ErrorKind) -> bool {
        if *self == ErrorKind::TimeoutError {
            return false;
        }
        match handler {
            ErrorKind::Exception => true,
            // RecursionError derives from RuntimeError
            ErrorKind::RuntimeError => {
                matches!(self, ErrorKind::RuntimeError | ErrorKind::RecursionError)
            }
            other => *self == other,
        }
    }

    pub fn is_catchable(&self) -> bool {
        *self != ErrorKind::TimeoutError
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A raised exception, optionally tagged with the source line it escaped from.
#[derive(Debug, Clone, PartialEq)]
pub struct Exception {
    pub kind: ErrorKind,
    pub message: String,
    pub line: Option<usize>,
}

impl Exception {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            line: None,
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TypeError, message)
    }

    pub fn value_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ValueError, message)
    }

    pub fn index_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::IndexError, message)
    }

    pub fn zero_division(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ZeroDivisionError, message)
    }

    pub fn overflow() -> Self {
        Self::new(ErrorKind::OverflowError, "integer overflow")
    }

    /// Tags the exception with the line it escaped from. Timeouts stay
    /// untagged so their message is stable.
    pub fn at_line(mut self, line: usize) -> Self {
        if self.line.is_none() && self.kind != ErrorKind::TimeoutError {
            self.line = Some(line);
        }
        self
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.kind)?;
        } else {
            write!(f, "{}: {}", self.kind, self.message)?;
        }
        if let Some(line) = self.line {
            write!(f, " (line {})", line)?;
        }
        Ok(())
    }
}

/// Why a snippet did not run to completion.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SandboxError {
    #[error("SyntaxError: {message} (line {line})")]
    Syntax { message: String, line: usize },

    #[error("{0}")]
    Raised(Exception),
}

impl SandboxError {
    pub fn syntax(message: impl Into<String>, line: usize) -> Self {
        SandboxError::Syntax {
            message: message.into(),
            line,
        }
    }
}

impl From<Exception> for SandboxError {
    fn from(exc: Exception) -> Self {
        SandboxError::Raised(exc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_with_and_without_line() {
        let exc = Exception::zero_division("division by zero");
        assert_eq!(exc.to_string(), "ZeroDivisionError: division by zero");
        assert_eq!(
            exc.at_line(3).to_string(),
            "ZeroDivisionError: division by zero (line 3)"
        );
    }

    #[test]
    fn test_first_line_wins() {
        let exc = Exception::type_error("bad").at_line(7).at_line(2);
        assert_eq!(exc.line, Some(7));
    }

    #[test]
    fn test_handler_matching() {
        assert!(ErrorKind::KeyError.matches(ErrorKind::Exception));
        assert!(ErrorKind::KeyError.matches(ErrorKind::KeyError));
        assert!(!ErrorKind::KeyError.matches(ErrorKind::IndexError));
        assert!(ErrorKind::RecursionError.matches(ErrorKind::RuntimeError));
        assert!(!ErrorKind::TimeoutError.matches(ErrorKind::Exception));
    }
}
