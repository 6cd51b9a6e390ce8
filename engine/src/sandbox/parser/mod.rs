//! Pest-driven parser producing the statement tree
//!
//! Source goes through the grammar twice. The `layout` rule only finds
//! strings, comments and brackets, so newlines inside brackets can be blanked
//! out before the `program` rule parses the result with indentation kept on
//! the pest stack. Blanking preserves byte offsets, which lets every error
//! report a line against the original source.

mod expressions;
mod literals;
mod statements;

use std::cell::Cell;

use pest::error::InputLocation;
use pest::iterators::Pair;
use pest::pratt_parser::PrattParser;
use pest::Parser;

use super::ast::Stmt;
use super::error::SandboxError;

#[derive(pest_derive::Parser)]
#[grammar = "sandbox/python.pest"]
struct PythonParser;

type PResult<T> = Result<T, SandboxError>;

/// Deepest bracket nesting accepted by the layout pass.
const MAX_BRACKETS: usize = 100;

/// Upper bound on the depth of a built expression tree.
const MAX_NESTING: usize = 1000;

pub fn parse_program(src: &str) -> PResult<Vec<Stmt>> {
    let lines = LineIndex::new(src);
    let joined = join_bracketed_lines(src, &lines)?;
    let program = PythonParser::parse(Rule::program, &joined)
        .map_err(|err| pest_error(&err, &lines, src))?
        .next()
        .ok_or_else(|| SandboxError::syntax("invalid syntax", 1))?;
    Builder::new(&lines).program(program)
}

/// Byte offsets of line starts, for turning pest positions into line numbers.
struct LineIndex {
    starts: Vec<usize>,
}

impl LineIndex {
    fn new(src: &str) -> Self {
        let starts = std::iter::once(0)
            .chain(src.match_indices('\n').map(|(at, _)| at + 1))
            .collect();
        Self { starts }
    }

    fn line(&self, offset: usize) -> usize {
        match self.starts.binary_search(&offset) {
            Ok(index) => index + 1,
            Err(index) => index,
        }
    }
}

fn pest_error(err: &pest::error::Error<Rule>, lines: &LineIndex, src: &str) -> SandboxError {
    let offset = match err.location {
        InputLocation::Pos(pos) => pos,
        InputLocation::Span((start, _)) => start,
    };
    if offset >= src.trim_end().len() {
        return SandboxError::syntax("unexpected end of input", lines.line(offset));
    }
    SandboxError::syntax("invalid syntax", lines.line(offset))
}

/// Blanks out line breaks and comments inside brackets, and backslash
/// continuations everywhere, so the statement grammar only ever sees
/// logical lines.
fn join_bracketed_lines(src: &str, lines: &LineIndex) -> PResult<String> {
    let layout = PythonParser::parse(Rule::layout, src)
        .map_err(|err| pest_error(&err, lines, src))?
        .next()
        .ok_or_else(|| SandboxError::syntax("invalid syntax", 1))?;

    let mut bytes = src.as_bytes().to_vec();
    let mut open: Vec<(char, usize)> = Vec::new();
    for token in layout.into_inner() {
        let span = token.as_span();
        let line = lines.line(span.start());
        match token.as_rule() {
            Rule::open_bracket => {
                if open.len() >= MAX_BRACKETS {
                    return Err(SandboxError::syntax("too many nested parentheses", line));
                }
                open.push((bracket_char(&token), span.start()));
            }
            Rule::close_bracket => {
                let close = bracket_char(&token);
                match open.pop() {
                    Some((opening, _)) if closes(opening, close) => {}
                    Some((opening, _)) => {
                        return Err(SandboxError::syntax(
                            format!(
                                "closing parenthesis '{}' does not match opening parenthesis '{}'",
                                close, opening
                            ),
                            line,
                        ))
                    }
                    None => {
                        return Err(SandboxError::syntax(format!("unmatched '{}'", close), line))
                    }
                }
            }
            Rule::line_break | Rule::comment_text if !open.is_empty() => {
                bytes[span.start()..span.end()].fill(b' ');
            }
            Rule::continuation => bytes[span.start()..span.end()].fill(b' '),
            Rule::stray_quote => {
                return Err(SandboxError::syntax("unterminated string literal", line))
            }
            _ => {}
        }
    }
    if let Some((opening, start)) = open.first() {
        return Err(SandboxError::syntax(
            format!("'{}' was never closed", opening),
            lines.line(*start),
        ));
    }
    String::from_utf8(bytes).map_err(|_| SandboxError::syntax("invalid source encoding", 1))
}

fn bracket_char(pair: &Pair<Rule>) -> char {
    pair.as_str().chars().next().unwrap_or(' ')
}

fn closes(opening: char, close: char) -> bool {
    matches!((opening, close), ('(', ')') | ('[', ']') | ('{', '}'))
}

fn required<'i>(pair: Option<Pair<'i, Rule>>, line: usize) -> PResult<Pair<'i, Rule>> {
    pair.ok_or_else(|| SandboxError::syntax("invalid syntax", line))
}

/// Turns pest pairs into the statement tree, enforcing the rules the grammar
/// cannot express: loop and function context, argument ordering, nesting.
struct Builder<'a> {
    lines: &'a LineIndex,
    pratt: PrattParser<Rule>,
    nesting: Cell<usize>,
    loops: usize,
    functions: usize,
}

impl<'a> Builder<'a> {
    fn new(lines: &'a LineIndex) -> Self {
        Self {
            lines,
            pratt: expressions::operator_table(),
            nesting: Cell::new(0),
            loops: 0,
            functions: 0,
        }
    }

    fn line(&self, pair: &Pair<Rule>) -> usize {
        self.lines.line(pair.as_span().start())
    }

    fn error(&self, pair: &Pair<Rule>, message: impl Into<String>) -> SandboxError {
        SandboxError::syntax(message, self.line(pair))
    }

    /// Runs `build` `levels` deeper in the expression tree.
    fn nested<T>(&self, levels: usize, line: usize, build: impl FnOnce() -> PResult<T>) -> PResult<T> {
        let depth = self.nesting.get() + levels;
        if depth > MAX_NESTING {
            return Err(SandboxError::syntax("too many nested expressions", line));
        }
        self.nesting.set(depth);
        let built = build();
        self.nesting.set(depth - levels);
        built
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::ast::{BinOp, CompKind, Expr, FStringPart, StmtKind, Target, UnaryOp};

    fn parse_one(src: &str) -> StmtKind {
        let mut stmts = parse_program(src).unwrap();
        assert_eq!(stmts.len(), 1, "expected one statement in {:?}", src);
        stmts.remove(0).kind
    }

    fn syntax_line(src: &str) -> usize {
        match parse_program(src) {
            Err(SandboxError::Syntax { line, .. }) => line,
            other => panic!("expected syntax error for {:?}, got {:?}", src, other),
        }
    }

    fn syntax_message(src: &str) -> String {
        match parse_program(src) {
            Err(SandboxError::Syntax { message, .. }) => message,
            other => panic!("expected syntax error for {:?}, got {:?}", src, other),
        }
    }

    #[test]
    fn test_precedence() {
        let StmtKind::Expr(expr) = parse_one("1 + 2 * 3") else {
            panic!("expected expression statement");
        };
        match expr {
            Expr::Binary(left, BinOp::Add, right) => {
                assert_eq!(*left, Expr::Int(1));
                assert!(matches!(*right, Expr::Binary(_, BinOp::Mul, _)));
            }
            other => panic!("unexpected tree {:?}", other),
        }
    }

    #[test]
    fn test_power_binds_tighter_than_unary_minus() {
        let StmtKind::Expr(expr) = parse_one("-2 ** 2") else {
            panic!("expected expression statement");
        };
        assert!(matches!(expr, Expr::Unary(UnaryOp::Neg, _)));

        let StmtKind::Expr(expr) = parse_one("2 ** 3 ** 2") else {
            panic!("expected expression statement");
        };
        match expr {
            Expr::Binary(left, BinOp::Pow, right) => {
                assert_eq!(*left, Expr::Int(2));
                assert!(matches!(*right, Expr::Binary(_, BinOp::Pow, _)));
            }
            other => panic!("unexpected tree {:?}", other),
        }
    }

    #[test]
    fn test_chained_and_tuple_assignment() {
        match parse_one("a = b = 1") {
            StmtKind::Assign(targets, Expr::Int(1)) => assert_eq!(targets.len(), 2),
            other => panic!("unexpected {:?}", other),
        }
        match parse_one("x, y = y, x") {
            StmtKind::Assign(targets, Expr::Tuple(values)) => {
                assert!(matches!(targets[0], Target::Tuple(ref t) if t.len() == 2));
                assert_eq!(values.len(), 2);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(parse_one("x: int = 5"), StmtKind::Assign(..)));
        assert!(matches!(parse_one("x: int"), StmtKind::Pass));
        assert!(matches!(
            parse_one("total += 1"),
            StmtKind::AugAssign(Target::Name(_), BinOp::Add, Expr::Int(1))
        ));
    }

    #[test]
    fn test_compound_statements() {
        let program = "def f(a, b=2):\n    for i in range(a):\n        if i > b:\n            break\n    return a\n";
        match parse_one(program) {
            StmtKind::FunctionDef(def) => {
                assert_eq!(def.name, "f");
                assert_eq!(def.params.len(), 2);
                assert!(def.params[1].default.is_some());
                assert_eq!(def.body.len(), 2);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_elif_chain_nests_in_orelse() {
        let program = "if a:\n    x = 1\n\n# between\nelif b:\n    x = 2\nelse:\n    x = 3\n";
        match parse_one(program) {
            StmtKind::If { orelse, .. } => {
                assert_eq!(orelse.len(), 1);
                assert_eq!(orelse[0].line, 5);
                assert!(matches!(
                    &orelse[0].kind,
                    StmtKind::If { orelse, .. } if orelse.len() == 1
                ));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_statement_lines_and_inline_suites() {
        let stmts = parse_program("x = 1; y = 2\n\nif x: y = 3\nwhile False: pass\n").unwrap();
        let lines: Vec<usize> = stmts.iter().map(|s| s.line).collect();
        assert_eq!(lines, vec![1, 1, 3, 4]);
    }

    #[test]
    fn test_try_except_parses_handlers() {
        let program = "try:\n    x = 1\nexcept (KeyError, ValueError) as e:\n    pass\nexcept:\n    pass\nfinally:\n    y = 2\n";
        match parse_one(program) {
            StmtKind::Try {
                handlers, finally, ..
            } => {
                assert_eq!(handlers.len(), 2);
                assert_eq!(handlers[0].binding.as_deref(), Some("e"));
                assert!(handlers[1].class.is_none());
                assert_eq!(finally.len(), 1);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_comprehensions_and_slices() {
        assert!(matches!(
            parse_one("[x * 2 for x in xs if x > 0]"),
            StmtKind::Expr(Expr::Comprehension {
                kind: CompKind::List,
                ..
            })
        ));
        assert!(matches!(
            parse_one("{k: v for k, v in pairs}"),
            StmtKind::Expr(Expr::Comprehension {
                kind: CompKind::Dict,
                ..
            })
        ));
        assert!(matches!(
            parse_one("sum(x for x in xs)"),
            StmtKind::Expr(Expr::Call { ref args, .. })
                if matches!(args[0], Expr::Comprehension { kind: CompKind::List, .. })
        ));
        match parse_one("xs[1:-1:2]") {
            StmtKind::Expr(Expr::Subscript(_, index)) => {
                assert!(matches!(*index, Expr::Slice(Some(_), Some(_), Some(_))));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_conditional_and_lambda_fold() {
        match parse_one("f = lambda x: x if x else -x") {
            StmtKind::Assign(_, Expr::Lambda(def)) => {
                assert_eq!(def.name, "<lambda>");
                assert!(matches!(
                    &def.body[0].kind,
                    StmtKind::Return(Some(Expr::IfElse { .. }))
                ));
            }
            other => panic!("unexpected {:?}", other),
        }
        match parse_one("a if b else c if d else e") {
            StmtKind::Expr(Expr::IfElse { orelse, .. }) => {
                assert!(matches!(*orelse, Expr::IfElse { .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_fstring_fields() {
        match parse_one("f'{name!r} has {total:.2f} and {{braces}}'") {
            StmtKind::Expr(Expr::FString(parts)) => {
                assert!(matches!(
                    &parts[0],
                    FStringPart::Field { conversion: Some('r'), .. }
                ));
                assert!(matches!(
                    &parts[2],
                    FStringPart::Field { spec, .. } if spec == ".2f"
                ));
                assert_eq!(
                    parts.last(),
                    Some(&FStringPart::Literal(" and {braces}".to_string()))
                );
            }
            other => panic!("unexpected {:?}", other),
        }
        match parse_one("f'{total=}'") {
            StmtKind::Expr(Expr::FString(parts)) => {
                assert_eq!(parts[0], FStringPart::Literal("total=".to_string()));
                assert!(matches!(
                    &parts[1],
                    FStringPart::Field { conversion: Some('r'), .. }
                ));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_string_literals() {
        let cases = [
            (r#"'a\tb'"#, "a\tb"),
            (r#"r'a\tb'"#, "a\\tb"),
            (r#"'\x41\u00e9'"#, "Aé"),
            (r#"'\q'"#, "\\q"),
            ("'''two\nlines'''", "two\nlines"),
            ("('a'\n 'b')", "ab"),
        ];
        for (src, expected) in cases {
            match parse_one(src) {
                StmtKind::Expr(Expr::Str(text)) => assert_eq!(&*text, expected, "{}", src),
                other => panic!("unexpected {:?} for {}", other, src),
            }
        }
        assert!(matches!(
            parse_one("'a' f'{b}'"),
            StmtKind::Expr(Expr::FString(ref parts)) if parts.len() == 2
        ));
    }

    #[test]
    fn test_number_literals() {
        let cases = [
            ("0x_ff", Expr::Int(255)),
            ("0o17", Expr::Int(15)),
            ("0b101", Expr::Int(5)),
            ("1_000", Expr::Int(1000)),
            ("1.5e3", Expr::Float(1500.0)),
            (".5", Expr::Float(0.5)),
        ];
        for (src, expected) in cases {
            assert_eq!(parse_one(src), StmtKind::Expr(expected), "{}", src);
        }
        assert!(matches!(
            parse_one("1 .real"),
            StmtKind::Expr(Expr::Attribute(_, ref name)) if name == "real"
        ));
        assert_eq!(
            syntax_message("x = 99999999999999999999\n"),
            "integer literal is too large"
        );
    }

    #[test]
    fn test_imports_keep_the_module_name() {
        assert_eq!(parse_one("import os.path"), StmtKind::Import("os.path".into()));
        assert_eq!(
            parse_one("from json import loads"),
            StmtKind::Import("json".into())
        );
    }

    #[test]
    fn test_syntax_errors_report_lines() {
        let cases = [
            ("x = (1 +\n", 1),
            ("x = 1\ny = = 2\n", 2),
            ("break\n", 1),
            ("x = 1\n  y = 2\n", 2),
            ("def f(:\n    pass\n", 1),
            ("class A:\n    pass\n", 1),
            ("if x:\n        y = 1\n    z = 2\n", 3),
            ("x = 'abc\n", 1),
            ("x = 1\ny = 2)\n", 2),
        ];
        for (src, line) in cases {
            assert_eq!(syntax_line(src), line, "wrong line for {:?}", src);
        }
    }

    #[test]
    fn test_context_errors() {
        let cases = [
            ("continue\n", "'continue' not properly in loop"),
            ("return 1\n", "'return' outside function"),
            ("for x in y:\n    pass\nelse:\n    break\n", "'break' outside loop"),
            ("def f(a, a):\n    pass\n", "duplicate argument 'a' in function definition"),
            ("def f(a=1, b):\n    pass\n", "non-default argument follows default argument"),
            ("def f(*args):\n    pass\n", "variadic parameters are not supported"),
            ("f(*xs)\n", "argument unpacking is not supported"),
            ("f(a=1, a=2)\n", "keyword argument repeated: a"),
            ("f(a=1, 2)\n", "positional argument follows keyword argument"),
            ("a, b += 1\n", "illegal expression for augmented assignment"),
            ("f() = 1\n", "cannot assign to expression"),
            ("try:\n    pass\nelse:\n    pass\n", "expected 'except' or 'finally' block"),
            ("global x\n", "'global' is not supported"),
            ("x = (1]\n", "closing parenthesis ']' does not match opening parenthesis '('"),
        ];
        for (src, message) in cases {
            assert_eq!(syntax_message(src), message, "{:?}", src);
        }
    }

    #[test]
    fn test_keywords_are_not_names() {
        assert!(parse_program("if = 1\n").is_err());
        assert!(parse_program("iffy = 1\npassed = iffy\n").is_ok());
    }

    #[test]
    fn test_deep_nesting_is_rejected() {
        let src = format!("x = {}1{}\n", "(".repeat(500), ")".repeat(500));
        assert_eq!(syntax_message(&src), "too many nested parentheses");

        let src = format!("x = {}1\n", "-".repeat(MAX_NESTING + 1));
        assert_eq!(syntax_message(&src), "too many nested expressions");

        let src = format!("x = {}1\n", "lambda: ".repeat(MAX_NESTING + 1));
        assert_eq!(syntax_message(&src), "too many nested expressions");
    }
}
