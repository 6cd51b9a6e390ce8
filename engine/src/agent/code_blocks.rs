//! Fenced code extraction from chat messages

/// Info strings that select a language. Anything else runs as python and
/// stays part of the code.
const LANGUAGE_TAGS: &[&str] = &["python", "bash", "shell"];

/// First fenced block of a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeBlock {
    pub language: String,
    pub code: String,
}

/// Whether a message asks for its code to be run.
pub fn wants_execution(message: &str, requested: bool) -> bool {
    if requested {
        return true;
    }
    let lowered = message.to_lowercase();
    lowered.contains("execute") || lowered.contains("run")
}

/// Extract the first block opened by a ```` ``` ```` fence.
///
/// A block missing its closing fence runs to the end of the message. The
/// first line is taken as the language only when it is exactly one of the
/// known tags.
pub fn extract_first(message: &str) -> Option<CodeBlock> {
    let body = message.split("```").nth(1)?.trim();

    let (first_line, rest) = match body.split_once('\n') {
        Some((first, rest)) => (first, rest),
        None => (body, ""),
    };

    if LANGUAGE_TAGS.contains(&first_line.trim()) {
        Some(CodeBlock {
            language: first_line.trim().to_string(),
            code: rest.to_string(),
        })
    } else {
        Some(CodeBlock {
            language: "python".to_string(),
            code: body.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tagged_block() {
        let block = extract_first("please run\n```python\nprint(1)\nprint(2)\n```\nthanks").unwrap();
        assert_eq!(block.language, "python");
        assert_eq!(block.code, "print(1)\nprint(2)");

        let block = extract_first("```bash\nls -la\n```").unwrap();
        assert_eq!(block.language, "bash");
        assert_eq!(block.code, "ls -la");
    }

    #[test]
    fn test_untagged_block_defaults_to_python() {
        let block = extract_first("```\nx = 2\nprint(x)\n```").unwrap();
        assert_eq!(block.language, "python");
        assert_eq!(block.code, "x = 2\nprint(x)");

        // unknown info strings stay in the code
        let block = extract_first("```ruby\nputs 1\n```").unwrap();
        assert_eq!(block.language, "python");
        assert_eq!(block.code, "ruby\nputs 1");
    }

    #[test]
    fn test_only_first_block_is_used() {
        let block = extract_first("```shell\npwd\n``` and ```python\nprint(3)\n```").unwrap();
        assert_eq!(block.language, "shell");
        assert_eq!(block.code, "pwd");
    }

    #[test]
    fn test_unclosed_and_missing_fences() {
        assert_eq!(extract_first("no code here"), None);
        let block = extract_first("run this ```print('open')").unwrap();
        assert_eq!(block.code, "print('open')");
    }

    #[test]
    fn test_execution_triggers() {
        assert!(wants_execution("Please EXECUTE this", false));
        assert!(wants_execution("can you Run it", false));
        assert!(wants_execution("hello", true));
        assert!(!wants_execution("hello there", false));
    }
}
