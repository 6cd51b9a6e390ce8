use pest::iterators::Pair;

use super::{PResult, Rule};
use crate::sandbox::error::SandboxError;

pub(super) fn int(text: &str, line: usize) -> PResult<i64> {
    let digits: String = text.chars().filter(|c| *c != '_').collect();
    let lower = digits.to_ascii_lowercase();
    let parsed = if let Some(hex) = lower.strip_prefix("0x") {
        i64::from_str_radix(hex, 16)
    } else if let Some(oct) = lower.strip_prefix("0o") {
        i64::from_str_radix(oct, 8)
    } else if let Some(bin) = lower.strip_prefix("0b") {
        i64::from_str_radix(bin, 2)
    } else {
        lower.parse()
    };
    parsed.map_err(|_| SandboxError::syntax("integer literal is too large", line))
}

pub(super) fn float(text: &str, line: usize) -> PResult<f64> {
    let digits: String = text.chars().filter(|c| *c != '_').collect();
    digits
        .parse()
        .map_err(|_| SandboxError::syntax("invalid float literal", line))
}

/// Text of a plain (non-formatted) string literal.
pub(super) fn string(pair: Pair<Rule>, line: usize) -> PResult<String> {
    let mut raw = false;
    let mut body = "";
    for part in pair.into_inner() {
        match part.as_rule() {
            Rule::string_prefix => raw = part.as_str().to_ascii_lowercase().contains('r'),
            _ => body = part.as_str(),
        }
    }
    unescape(body, raw, line)
}

/// Resolves backslash escapes. Unknown escapes are kept as written.
pub(super) fn unescape(text: &str, raw: bool, line: usize) -> PResult<String> {
    if raw || !text.contains('\\') {
        return Ok(text.to_string());
    }
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            None => out.push('\\'),
            Some('\n') => {}
            Some('\r') => {
                chars.next_if_eq(&'\n');
            }
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some('a') => out.push('\x07'),
            Some('b') => out.push('\x08'),
            Some('f') => out.push('\x0c'),
            Some('v') => out.push('\x0b'),
            Some('\\') => out.push('\\'),
            Some('\'') => out.push('\''),
            Some('"') => out.push('"'),
            Some('x') => out.push(code_point(&mut chars, 2, line)?),
            Some('u') => out.push(code_point(&mut chars, 4, line)?),
            Some('U') => out.push(code_point(&mut chars, 8, line)?),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
        }
    }
    Ok(out)
}

fn code_point(chars: &mut impl Iterator<Item = char>, width: usize, line: usize) -> PResult<char> {
    let digits: String = chars.take(width).collect();
    if digits.len() != width {
        return Err(SandboxError::syntax("truncated escape sequence", line));
    }
    u32::from_str_radix(&digits, 16)
        .ok()
        .and_then(char::from_u32)
        .ok_or_else(|| SandboxError::syntax("invalid escape sequence", line))
}
