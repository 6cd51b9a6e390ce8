use std::rc::Rc;

use pest::iterators::Pair;
use pest::pratt_parser::{Assoc, Op, PrattParser};

use super::{literals, required, Builder, PResult, Rule};
use crate::sandbox::ast::{
    BinOp, CmpOp, CompClause, CompKind, Expr, FStringPart, FunctionDef, Stmt, StmtKind, UnaryOp,
};
use crate::sandbox::error::SandboxError;

/// Arithmetic and bitwise operators, loosest first.
pub(super) fn operator_table() -> PrattParser<Rule> {
    PrattParser::new()
        .op(Op::infix(Rule::bit_or, Assoc::Left))
        .op(Op::infix(Rule::bit_xor, Assoc::Left))
        .op(Op::infix(Rule::bit_and, Assoc::Left))
        .op(Op::infix(Rule::add, Assoc::Left) | Op::infix(Rule::sub, Assoc::Left))
        .op(Op::infix(Rule::mul, Assoc::Left)
            | Op::infix(Rule::div, Assoc::Left)
            | Op::infix(Rule::floor_div, Assoc::Left)
            | Op::infix(Rule::modulo, Assoc::Left))
        .op(Op::prefix(Rule::neg) | Op::prefix(Rule::pos) | Op::prefix(Rule::invert))
        .op(Op::infix(Rule::pow, Assoc::Right))
}

impl Builder<'_> {
    pub(super) fn expression(&self, pair: Pair<Rule>) -> PResult<Expr> {
        let line = self.line(&pair);
        let levels = match pair.as_rule() {
            Rule::arith_expr => pair
                .clone()
                .into_inner()
                .filter(|p| p.as_rule() != Rule::primary)
                .count(),
            Rule::testlist
            | Rule::test
            | Rule::or_test
            | Rule::and_test
            | Rule::not_test
            | Rule::comparison
            | Rule::primary => pair.clone().into_inner().count().saturating_sub(1),
            Rule::paren | Rule::list_display | Rule::brace_display | Rule::strings => 1,
            _ => 0,
        };
        self.nested(levels, line, || match pair.as_rule() {
            Rule::testlist => self.testlist(pair),
            Rule::test => self.test(pair),
            Rule::or_test => self.boolean_chain(pair, Expr::Or),
            Rule::and_test => self.boolean_chain(pair, Expr::And),
            Rule::not_test => self.not_test(pair),
            Rule::comparison => self.comparison(pair),
            Rule::arith_expr => self.arith(pair),
            Rule::primary => self.primary(pair),
            _ => self.atom(pair),
        })
    }

    fn testlist(&self, pair: Pair<Rule>) -> PResult<Expr> {
        let line = self.line(&pair);
        let mut items = Vec::new();
        let mut trailing = false;
        for part in pair.into_inner() {
            if part.as_rule() == Rule::trailing_comma {
                trailing = true;
            } else {
                items.push(self.expression(part)?);
            }
        }
        if items.len() == 1 && !trailing {
            return required_expr(items.pop(), line);
        }
        Ok(Expr::Tuple(items))
    }

    /// Folds `lambda` heads and `a if c else b` chains from the right.
    fn test(&self, pair: Pair<Rule>) -> PResult<Expr> {
        let line = self.line(&pair);
        let mut segments: Vec<(Vec<Pair<Rule>>, Pair<Rule>)> = Vec::new();
        let mut conditions = Vec::new();
        let mut lambdas = Vec::new();
        let mut expect_condition = false;
        for part in pair.into_inner() {
            if part.as_rule() == Rule::lambda_head {
                lambdas.push(part);
            } else if expect_condition {
                conditions.push(part);
                expect_condition = false;
            } else {
                segments.push((std::mem::take(&mut lambdas), part));
                expect_condition = true;
            }
        }

        let (heads, value) = segments
            .pop()
            .ok_or_else(|| SandboxError::syntax("invalid syntax", line))?;
        let mut folded = self.wrap_lambdas(heads, self.expression(value)?)?;
        while let Some((heads, value)) = segments.pop() {
            let condition = required(conditions.pop(), line)?;
            let body = self.expression(value)?;
            let conditional = Expr::IfElse {
                test: Box::new(self.expression(condition)?),
                body: Box::new(body),
                orelse: Box::new(folded),
            };
            folded = self.wrap_lambdas(heads, conditional)?;
        }
        Ok(folded)
    }

    fn wrap_lambdas(&self, heads: Vec<Pair<Rule>>, body: Expr) -> PResult<Expr> {
        let mut body = body;
        for head in heads.into_iter().rev() {
            let line = self.line(&head);
            let params = match head.into_inner().next() {
                Some(params) => self.parameters(params)?,
                None => Vec::new(),
            };
            body = Expr::Lambda(Rc::new(FunctionDef {
                name: "<lambda>".to_string(),
                params,
                body: vec![Stmt {
                    kind: StmtKind::Return(Some(body)),
                    line,
                }],
            }));
        }
        Ok(body)
    }

    fn boolean_chain(
        &self,
        pair: Pair<Rule>,
        join: fn(Box<Expr>, Box<Expr>) -> Expr,
    ) -> PResult<Expr> {
        let line = self.line(&pair);
        let mut operands = pair.into_inner();
        let mut left = self.expression(required(operands.next(), line)?)?;
        for operand in operands {
            left = join(Box::new(left), Box::new(self.expression(operand)?));
        }
        Ok(left)
    }

    fn not_test(&self, pair: Pair<Rule>) -> PResult<Expr> {
        let mut negations = 0;
        let mut operand = None;
        for part in pair.into_inner() {
            match part.as_rule() {
                Rule::not_op => negations += 1,
                _ => operand = Some(part),
            }
        }
        let line = operand.as_ref().map_or(1, |p| self.line(p));
        let mut expr = self.expression(required(operand, line)?)?;
        for _ in 0..negations {
            expr = Expr::Unary(UnaryOp::Not, Box::new(expr));
        }
        Ok(expr)
    }

    fn comparison(&self, pair: Pair<Rule>) -> PResult<Expr> {
        let line = self.line(&pair);
        let mut inner = pair.into_inner();
        let left = self.expression(required(inner.next(), line)?)?;
        let mut ops = Vec::new();
        while let Some(op) = inner.next() {
            let cmp = comparison_op(op.as_str()).ok_or_else(|| self.error(&op, "invalid syntax"))?;
            ops.push((cmp, self.expression(required(inner.next(), line)?)?));
        }
        if ops.is_empty() {
            return Ok(left);
        }
        Ok(Expr::Compare(Box::new(left), ops))
    }

    fn arith(&self, pair: Pair<Rule>) -> PResult<Expr> {
        self.pratt
            .map_primary(|primary| self.expression(primary))
            .map_prefix(|op, operand| Ok(Expr::Unary(unary_op(op.as_rule()), Box::new(operand?))))
            .map_infix(|left, op, right| {
                Ok(Expr::Binary(
                    Box::new(left?),
                    binary_op(op.as_rule()),
                    Box::new(right?),
                ))
            })
            .parse(pair.into_inner())
    }

    fn primary(&self, pair: Pair<Rule>) -> PResult<Expr> {
        let line = self.line(&pair);
        let mut inner = pair.into_inner();
        let mut expr = self.expression(required(inner.next(), line)?)?;
        for trailer in inner {
            expr = match trailer.as_rule() {
                Rule::call => self.call(expr, trailer)?,
                Rule::subscription => {
                    Expr::Subscript(Box::new(expr), Box::new(self.subscription(trailer)?))
                }
                _ => {
                    let name = required(trailer.into_inner().next(), line)?;
                    Expr::Attribute(Box::new(expr), name.as_str().to_string())
                }
            };
        }
        Ok(expr)
    }

    fn atom(&self, pair: Pair<Rule>) -> PResult<Expr> {
        let line = self.line(&pair);
        match pair.as_rule() {
            Rule::identifier => Ok(Expr::Name(pair.as_str().to_string())),
            Rule::none_literal => Ok(Expr::None),
            Rule::bool_true => Ok(Expr::Bool(true)),
            Rule::bool_false => Ok(Expr::Bool(false)),
            Rule::int_literal => literals::int(pair.as_str(), line).map(Expr::Int),
            Rule::float_literal => literals::float(pair.as_str(), line).map(Expr::Float),
            Rule::strings => self.strings(pair),
            Rule::paren => self.paren(pair),
            Rule::list_display => self.list_display(pair),
            Rule::brace_display => self.brace_display(pair),
            _ => Err(self.error(&pair, "invalid syntax")),
        }
    }

    fn paren(&self, pair: Pair<Rule>) -> PResult<Expr> {
        let line = self.line(&pair);
        let mut inner = pair.into_inner();
        let Some(first) = inner.next() else {
            return Ok(Expr::Tuple(Vec::new()));
        };
        let rest: Vec<Pair<Rule>> = inner.collect();
        if rest.iter().any(|p| p.as_rule() == Rule::comp_for) {
            return self.comprehension(CompKind::List, first, None, rest);
        }
        let trailing = rest.iter().any(|p| p.as_rule() == Rule::trailing_comma);
        let mut items = self.elements(first, rest)?;
        if items.len() == 1 && !trailing {
            return required_expr(items.pop(), line);
        }
        Ok(Expr::Tuple(items))
    }

    fn list_display(&self, pair: Pair<Rule>) -> PResult<Expr> {
        let mut inner = pair.into_inner();
        let Some(first) = inner.next() else {
            return Ok(Expr::List(Vec::new()));
        };
        let rest: Vec<Pair<Rule>> = inner.collect();
        if rest.iter().any(|p| p.as_rule() == Rule::comp_for) {
            return self.comprehension(CompKind::List, first, None, rest);
        }
        Ok(Expr::List(self.elements(first, rest)?))
    }

    fn brace_display(&self, pair: Pair<Rule>) -> PResult<Expr> {
        let line = self.line(&pair);
        let mut inner = pair.into_inner();
        let Some(first) = inner.next() else {
            return Ok(Expr::Dict(Vec::new()));
        };
        let tail = required(inner.next(), line)?;
        let is_dict = tail.as_rule() == Rule::dict_tail;
        let mut parts = tail.into_inner();
        if !is_dict {
            let rest: Vec<Pair<Rule>> = parts.collect();
            if rest.iter().any(|p| p.as_rule() == Rule::comp_for) {
                return self.comprehension(CompKind::Set, first, None, rest);
            }
            return Ok(Expr::Set(self.elements(first, rest)?));
        }

        let value = required(parts.next(), line)?;
        let rest: Vec<Pair<Rule>> = parts.collect();
        if rest.iter().any(|p| p.as_rule() == Rule::comp_for) {
            return self.comprehension(CompKind::Dict, first, Some(value), rest);
        }
        let mut entries = vec![(self.expression(first)?, self.expression(value)?)];
        for entry in rest {
            if entry.as_rule() != Rule::dict_entry {
                continue;
            }
            let mut kv = entry.into_inner();
            let key = self.expression(required(kv.next(), line)?)?;
            let value = self.expression(required(kv.next(), line)?)?;
            entries.push((key, value));
        }
        Ok(Expr::Dict(entries))
    }

    /// Builds `first` followed by every non-comma pair in `rest`.
    fn elements(&self, first: Pair<Rule>, rest: Vec<Pair<Rule>>) -> PResult<Vec<Expr>> {
        let mut items = vec![self.expression(first)?];
        for part in rest {
            if part.as_rule() != Rule::trailing_comma {
                items.push(self.expression(part)?);
            }
        }
        Ok(items)
    }

    fn comprehension(
        &self,
        kind: CompKind,
        element: Pair<Rule>,
        value: Option<Pair<Rule>>,
        clauses: Vec<Pair<Rule>>,
    ) -> PResult<Expr> {
        let element = self.expression(element)?;
        let value = value.map(|v| self.expression(v)).transpose()?;
        let clauses = clauses
            .into_iter()
            .map(|clause| self.comp_clause(clause))
            .collect::<PResult<Vec<_>>>()?;
        Ok(Expr::Comprehension {
            kind,
            element: Box::new(element),
            value: value.map(Box::new),
            clauses,
        })
    }

    fn comp_clause(&self, pair: Pair<Rule>) -> PResult<CompClause> {
        let line = self.line(&pair);
        let mut parts = pair.into_inner();
        let target = self.target_list(required(parts.next(), line)?)?;
        let iter = self.expression(required(parts.next(), line)?)?;
        let conditions = parts
            .map(|cond| self.expression(required(cond.into_inner().next(), line)?))
            .collect::<PResult<Vec<_>>>()?;
        Ok(CompClause {
            target,
            iter,
            conditions,
        })
    }

    fn call(&self, func: Expr, pair: Pair<Rule>) -> PResult<Expr> {
        let mut args = Vec::new();
        let mut kwargs: Vec<(String, Expr)> = Vec::new();
        for arg in pair.into_inner() {
            let line = self.line(&arg);
            match arg.as_rule() {
                Rule::star_arg => {
                    return Err(self.error(&arg, "argument unpacking is not supported"));
                }
                Rule::keyword_arg => {
                    let mut parts = arg.into_inner();
                    let name = required(parts.next(), line)?.as_str().to_string();
                    if kwargs.iter().any(|(existing, _)| *existing == name) {
                        return Err(SandboxError::syntax(
                            format!("keyword argument repeated: {}", name),
                            line,
                        ));
                    }
                    let value = self.expression(required(parts.next(), line)?)?;
                    kwargs.push((name, value));
                }
                _ => {
                    if !kwargs.is_empty() {
                        return Err(self.error(&arg, "positional argument follows keyword argument"));
                    }
                    let mut parts = arg.into_inner();
                    let value = required(parts.next(), line)?;
                    let clauses: Vec<Pair<Rule>> = parts.collect();
                    if clauses.is_empty() {
                        args.push(self.expression(value)?);
                    } else {
                        args.push(self.comprehension(CompKind::List, value, None, clauses)?);
                    }
                }
            }
        }
        Ok(Expr::Call {
            func: Box::new(func),
            args,
            kwargs,
        })
    }

    fn subscription(&self, pair: Pair<Rule>) -> PResult<Expr> {
        let line = self.line(&pair);
        let mut items = Vec::new();
        let mut trailing = false;
        for part in pair.into_inner() {
            if part.as_rule() == Rule::trailing_comma {
                trailing = true;
            } else {
                items.push(self.subscript(part)?);
            }
        }
        if items.len() == 1 && !trailing {
            return required_expr(items.pop(), line);
        }
        Ok(Expr::Tuple(items))
    }

    fn subscript(&self, pair: Pair<Rule>) -> PResult<Expr> {
        let line = self.line(&pair);
        let mut start = None;
        let mut tail = None;
        for part in pair.into_inner() {
            match part.as_rule() {
                Rule::slice_tail => tail = Some(part),
                _ => start = Some(self.expression(part)?),
            }
        }
        let Some(tail) = tail else {
            return required_expr(start, line);
        };
        let mut stop = None;
        let mut step = None;
        for part in tail.into_inner() {
            let is_stop = part.as_rule() == Rule::slice_stop;
            let bound = self.expression(required(part.into_inner().next(), line)?)?;
            if is_stop {
                stop = Some(Box::new(bound));
            } else {
                step = Some(Box::new(bound));
            }
        }
        Ok(Expr::Slice(start.map(Box::new), stop, step))
    }

    /// Adjacent string literals, concatenated. Any f-string in the run makes
    /// the whole run formatted.
    fn strings(&self, pair: Pair<Rule>) -> PResult<Expr> {
        let mut parts = Vec::new();
        let mut formatted = false;
        for piece in pair.into_inner() {
            let line = self.line(&piece);
            if piece.as_rule() == Rule::fstring {
                formatted = true;
                self.fstring(piece, &mut parts)?;
            } else {
                push_literal(&mut parts, literals::string(piece, line)?);
            }
        }
        if formatted {
            return Ok(Expr::FString(parts));
        }
        let text: String = parts
            .into_iter()
            .map(|part| match part {
                FStringPart::Literal(text) => text,
                FStringPart::Field { .. } => String::new(),
            })
            .collect();
        Ok(Expr::Str(Rc::from(text)))
    }

    fn fstring(&self, pair: Pair<Rule>, parts: &mut Vec<FStringPart>) -> PResult<()> {
        let line = self.line(&pair);
        let mut raw = false;
        for part in pair.into_inner() {
            match part.as_rule() {
                Rule::fstring_prefix => raw = part.as_str().to_ascii_lowercase().contains('r'),
                Rule::fs_field => self.fstring_field(part, parts)?,
                _ => {
                    let text = part.as_str().replace("{{", "{").replace("}}", "}");
                    push_literal(parts, literals::unescape(&text, raw, line)?);
                }
            }
        }
        Ok(())
    }

    fn fstring_field(&self, pair: Pair<Rule>, parts: &mut Vec<FStringPart>) -> PResult<()> {
        let line = self.line(&pair);
        let field_start = pair.as_span().start();
        let field_text = pair.as_str();
        let mut expr = None;
        let mut debug_text = None;
        let mut conversion = None;
        let mut spec = String::new();
        for part in pair.into_inner() {
            match part.as_rule() {
                Rule::fs_debug => {
                    debug_text = field_text.get(1..part.as_span().end() - field_start);
                }
                Rule::fs_conversion => conversion = part.as_str().chars().nth(1),
                Rule::fs_spec => spec = part.as_str().get(1..).unwrap_or_default().to_string(),
                _ => expr = Some(self.expression(part)?),
            }
        }
        let expr = expr
            .ok_or_else(|| SandboxError::syntax("f-string: empty expression not allowed", line))?;
        if let Some(text) = debug_text {
            push_literal(parts, text.to_string());
            if conversion.is_none() && spec.is_empty() {
                conversion = Some('r');
            }
        }
        parts.push(FStringPart::Field {
            expr,
            conversion,
            spec,
        });
        Ok(())
    }
}

fn push_literal(parts: &mut Vec<FStringPart>, text: String) {
    if text.is_empty() {
        return;
    }
    if let Some(FStringPart::Literal(last)) = parts.last_mut() {
        last.push_str(&text);
    } else {
        parts.push(FStringPart::Literal(text));
    }
}

fn required_expr(expr: Option<Expr>, line: usize) -> PResult<Expr> {
    expr.ok_or_else(|| SandboxError::syntax("invalid syntax", line))
}

fn comparison_op(text: &str) -> Option<CmpOp> {
    let words: Vec<&str> = text.split_whitespace().collect();
    let op = match words.as_slice() {
        ["=="] => CmpOp::Eq,
        ["!="] => CmpOp::NotEq,
        ["<"] => CmpOp::Lt,
        ["<="] => CmpOp::LtE,
        [">"] => CmpOp::Gt,
        [">="] => CmpOp::GtE,
        ["in"] => CmpOp::In,
        ["not", "in"] => CmpOp::NotIn,
        ["is"] => CmpOp::Is,
        ["is", "not"] => CmpOp::IsNot,
        _ => return None,
    };
    Some(op)
}

fn unary_op(rule: Rule) -> UnaryOp {
    match rule {
        Rule::neg => UnaryOp::Neg,
        Rule::pos => UnaryOp::Pos,
        _ => UnaryOp::Invert,
    }
}

fn binary_op(rule: Rule) -> BinOp {
    match rule {
        Rule::add => BinOp::Add,
        Rule::sub => BinOp::Sub,
        Rule::mul => BinOp::Mul,
        Rule::div => BinOp::Div,
        Rule::floor_div => BinOp::FloorDiv,
        Rule::modulo => BinOp::Mod,
        Rule::pow => BinOp::Pow,
        Rule::bit_and => BinOp::BitAnd,
        Rule::bit_or => BinOp::BitOr,
        _ => BinOp::BitXor,
    }
}
