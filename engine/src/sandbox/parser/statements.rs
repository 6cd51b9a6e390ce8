use std::rc::Rc;

use pest::iterators::{Pair, Pairs};

use super::{required, Builder, PResult, Rule};
use crate::sandbox::ast::{BinOp, Expr, FunctionDef, Handler, Param, Stmt, StmtKind, Target};
use crate::sandbox::error::SandboxError;

impl Builder<'_> {
    pub(super) fn program(&mut self, pair: Pair<Rule>) -> PResult<Vec<Stmt>> {
        self.statements(pair.into_inner())
    }

    fn statements(&mut self, pairs: Pairs<Rule>) -> PResult<Vec<Stmt>> {
        let mut body = Vec::new();
        for pair in pairs {
            match pair.as_rule() {
                Rule::simple_stmts => body.extend(self.simple_statements(pair)?),
                Rule::EOI => {}
                _ => body.push(self.compound_statement(pair)?),
            }
        }
        Ok(body)
    }

    fn simple_statements(&mut self, pair: Pair<Rule>) -> PResult<Vec<Stmt>> {
        pair.into_inner()
            .map(|small| self.small_statement(small))
            .collect()
    }

    fn suite(&mut self, pair: Pair<Rule>) -> PResult<Vec<Stmt>> {
        if pair.as_rule() == Rule::block {
            self.statements(pair.into_inner())
        } else {
            self.simple_statements(pair)
        }
    }

    fn loop_body(&mut self, pair: Pair<Rule>) -> PResult<Vec<Stmt>> {
        self.loops += 1;
        let body = self.suite(pair);
        self.loops -= 1;
        body
    }

    /// Suite of an `else` or `finally` clause.
    fn clause_suite(&mut self, clause: Pair<Rule>) -> PResult<Vec<Stmt>> {
        let line = self.line(&clause);
        let mut parts = clause.into_inner();
        let _head = parts.next();
        self.suite(required(parts.next(), line)?)
    }

    fn small_statement(&mut self, pair: Pair<Rule>) -> PResult<Stmt> {
        let line = self.line(&pair);
        let kind = match pair.as_rule() {
            Rule::pass_stmt => StmtKind::Pass,
            Rule::break_stmt => {
                if self.loops == 0 {
                    return Err(self.error(&pair, "'break' outside loop"));
                }
                StmtKind::Break
            }
            Rule::continue_stmt => {
                if self.loops == 0 {
                    return Err(self.error(&pair, "'continue' not properly in loop"));
                }
                StmtKind::Continue
            }
            Rule::return_stmt => {
                if self.functions == 0 {
                    return Err(self.error(&pair, "'return' outside function"));
                }
                let value = pair.into_inner().next();
                StmtKind::Return(value.map(|v| self.expression(v)).transpose()?)
            }
            // `raise X from Y` keeps only X
            Rule::raise_stmt => {
                let exc = pair.into_inner().next();
                StmtKind::Raise(exc.map(|e| self.expression(e)).transpose()?)
            }
            Rule::assert_stmt => {
                let mut parts = pair.into_inner();
                let test = self.expression(required(parts.next(), line)?)?;
                let message = parts.next().map(|m| self.expression(m)).transpose()?;
                StmtKind::Assert(test, message)
            }
            Rule::del_stmt => {
                let targets = required(pair.into_inner().next(), line)?;
                let (items, _) = self.target_items(targets)?;
                StmtKind::Delete(
                    items
                        .into_iter()
                        .map(|item| into_target(item, line))
                        .collect::<PResult<_>>()?,
                )
            }
            Rule::import_stmt => {
                let module = required(pair.into_inner().next(), line)?;
                StmtKind::Import(module.as_str().to_string())
            }
            Rule::expr_stmt => self.expression_statement(pair)?,
            _ => return Err(self.error(&pair, "invalid syntax")),
        };
        Ok(Stmt { kind, line })
    }

    fn expression_statement(&self, pair: Pair<Rule>) -> PResult<StmtKind> {
        let line = self.line(&pair);
        let mut inner = pair.into_inner();
        let first = self.expression(required(inner.next(), line)?)?;
        let Some(next) = inner.next() else {
            return Ok(StmtKind::Expr(first));
        };
        match next.as_rule() {
            Rule::annotated => {
                if !matches!(first, Expr::Name(_) | Expr::Subscript(..) | Expr::Attribute(..)) {
                    return Err(self.error(&next, "illegal target for annotation"));
                }
                let mut parts = next.into_inner();
                let _annotation = parts.next();
                match parts.next() {
                    Some(value) => Ok(StmtKind::Assign(
                        vec![into_target(first, line)?],
                        self.expression(value)?,
                    )),
                    None => Ok(StmtKind::Pass),
                }
            }
            Rule::augmented => {
                if matches!(first, Expr::Tuple(_) | Expr::List(_)) {
                    return Err(self.error(&next, "illegal expression for augmented assignment"));
                }
                let mut parts = next.into_inner();
                let op = augmented_op(required(parts.next(), line)?.as_str())
                    .ok_or_else(|| SandboxError::syntax("invalid syntax", line))?;
                let value = self.expression(required(parts.next(), line)?)?;
                Ok(StmtKind::AugAssign(into_target(first, line)?, op, value))
            }
            _ => {
                let mut chain = vec![first];
                for assigned in std::iter::once(next).chain(inner) {
                    chain.push(self.expression(required(assigned.into_inner().next(), line)?)?);
                }
                let value = chain
                    .pop()
                    .ok_or_else(|| SandboxError::syntax("invalid syntax", line))?;
                let targets = chain
                    .into_iter()
                    .map(|target| into_target(target, line))
                    .collect::<PResult<_>>()?;
                Ok(StmtKind::Assign(targets, value))
            }
        }
    }

    fn compound_statement(&mut self, pair: Pair<Rule>) -> PResult<Stmt> {
        let line = self.line(&pair);
        let kind = match pair.as_rule() {
            Rule::if_stmt => self.if_statement(pair)?,
            Rule::while_stmt => self.while_statement(pair)?,
            Rule::for_stmt => self.for_statement(pair)?,
            Rule::function_def => self.function_def(pair)?,
            Rule::try_stmt => self.try_statement(pair)?,
            Rule::unsupported_stmt => {
                let keyword = required(pair.into_inner().next(), line)?;
                return Err(SandboxError::syntax(
                    format!("'{}' is not supported", keyword.as_str()),
                    line,
                ));
            }
            _ => return Err(self.error(&pair, "invalid syntax")),
        };
        Ok(Stmt { kind, line })
    }

    /// Condition of an `if`, `elif` or `while` header.
    fn head_test(&self, head: Pair<Rule>) -> PResult<Expr> {
        let line = self.line(&head);
        self.expression(required(head.into_inner().next(), line)?)
    }

    fn if_statement(&mut self, pair: Pair<Rule>) -> PResult<StmtKind> {
        let line = self.line(&pair);
        let mut inner = pair.into_inner();
        let test = self.head_test(required(inner.next(), line)?)?;
        let body = self.suite(required(inner.next(), line)?)?;

        let mut branches = Vec::new();
        let mut orelse = Vec::new();
        for clause in inner {
            if clause.as_rule() == Rule::else_clause {
                orelse = self.clause_suite(clause)?;
                continue;
            }
            let mut parts = clause.into_inner();
            let head = required(parts.next(), line)?;
            let branch_line = self.line(&head);
            let branch_test = self.head_test(head)?;
            let branch_body = self.suite(required(parts.next(), branch_line)?)?;
            branches.push((branch_line, branch_test, branch_body));
        }
        for (branch_line, test, body) in branches.into_iter().rev() {
            orelse = vec![Stmt {
                kind: StmtKind::If { test, body, orelse },
                line: branch_line,
            }];
        }
        Ok(StmtKind::If { test, body, orelse })
    }

    fn while_statement(&mut self, pair: Pair<Rule>) -> PResult<StmtKind> {
        let line = self.line(&pair);
        let mut inner = pair.into_inner();
        let test = self.head_test(required(inner.next(), line)?)?;
        let body = self.loop_body(required(inner.next(), line)?)?;
        let orelse = match inner.next() {
            Some(clause) => self.clause_suite(clause)?,
            None => Vec::new(),
        };
        Ok(StmtKind::While { test, body, orelse })
    }

    fn for_statement(&mut self, pair: Pair<Rule>) -> PResult<StmtKind> {
        let line = self.line(&pair);
        let mut inner = pair.into_inner();
        let mut head = required(inner.next(), line)?.into_inner();
        let target = self.target_list(required(head.next(), line)?)?;
        let iter = self.expression(required(head.next(), line)?)?;
        let body = self.loop_body(required(inner.next(), line)?)?;
        let orelse = match inner.next() {
            Some(clause) => self.clause_suite(clause)?,
            None => Vec::new(),
        };
        Ok(StmtKind::For {
            target,
            iter,
            body,
            orelse,
        })
    }

    fn function_def(&mut self, pair: Pair<Rule>) -> PResult<StmtKind> {
        let line = self.line(&pair);
        let mut inner = pair.into_inner();
        let mut head = required(inner.next(), line)?.into_inner();
        let name = required(head.next(), line)?.as_str().to_string();
        let mut params = Vec::new();
        for part in head {
            // the return annotation is parsed and dropped
            if part.as_rule() == Rule::parameters {
                params = self.parameters(part)?;
            }
        }

        let suite = required(inner.next(), line)?;
        let enclosing_loops = std::mem::replace(&mut self.loops, 0);
        self.functions += 1;
        let body = self.suite(suite);
        self.functions -= 1;
        self.loops = enclosing_loops;

        Ok(StmtKind::FunctionDef(Rc::new(FunctionDef {
            name,
            params,
            body: body?,
        })))
    }

    fn try_statement(&mut self, pair: Pair<Rule>) -> PResult<StmtKind> {
        let line = self.line(&pair);
        let mut inner = pair.into_inner();
        let _head = inner.next();
        let body = self.suite(required(inner.next(), line)?)?;

        let mut handlers = Vec::new();
        let mut orelse = None;
        let mut finally = None;
        for clause in inner {
            match clause.as_rule() {
                Rule::except_clause => handlers.push(self.handler(clause)?),
                Rule::else_clause => orelse = Some(self.clause_suite(clause)?),
                _ => finally = Some(self.clause_suite(clause)?),
            }
        }
        if handlers.is_empty() && (finally.is_none() || orelse.is_some()) {
            return Err(SandboxError::syntax(
                "expected 'except' or 'finally' block",
                line,
            ));
        }
        Ok(StmtKind::Try {
            body,
            handlers,
            orelse: orelse.unwrap_or_default(),
            finally: finally.unwrap_or_default(),
        })
    }

    fn handler(&mut self, clause: Pair<Rule>) -> PResult<Handler> {
        let line = self.line(&clause);
        let mut parts = clause.into_inner();
        let head = required(parts.next(), line)?;
        let mut class = None;
        let mut binding = None;
        for part in head.into_inner() {
            match part.as_rule() {
                Rule::identifier => binding = Some(part.as_str().to_string()),
                _ => class = Some(self.expression(part)?),
            }
        }
        let body = self.suite(required(parts.next(), line)?)?;
        Ok(Handler {
            class,
            binding,
            body,
        })
    }

    /// Parameters of a `def` or a lambda.
    pub(super) fn parameters(&self, pair: Pair<Rule>) -> PResult<Vec<Param>> {
        let mut params: Vec<Param> = Vec::new();
        for param in pair.into_inner() {
            if param.as_rule() == Rule::star_param {
                return Err(self.error(&param, "variadic parameters are not supported"));
            }
            let line = self.line(&param);
            let mut parts = param.into_inner();
            let name = required(parts.next(), line)?.as_str().to_string();
            if params.iter().any(|p| p.name == name) {
                return Err(SandboxError::syntax(
                    format!("duplicate argument '{}' in function definition", name),
                    line,
                ));
            }
            let mut default = None;
            for part in parts {
                if matches!(part.as_rule(), Rule::default_value | Rule::lambda_default) {
                    default = Some(self.expression(required(part.into_inner().next(), line)?)?);
                }
            }
            if default.is_none() && params.iter().any(|p| p.default.is_some()) {
                return Err(SandboxError::syntax(
                    "non-default argument follows default argument",
                    line,
                ));
            }
            params.push(Param { name, default });
        }
        Ok(params)
    }

    /// Items of a `target_list` and whether they spell a tuple.
    fn target_items(&self, pair: Pair<Rule>) -> PResult<(Vec<Expr>, bool)> {
        let mut items = Vec::new();
        let mut trailing = false;
        for part in pair.into_inner() {
            if part.as_rule() == Rule::trailing_comma {
                trailing = true;
            } else {
                items.push(self.expression(part)?);
            }
        }
        let tuple = trailing || items.len() != 1;
        Ok((items, tuple))
    }

    /// Target of a `for` header or comprehension clause.
    pub(super) fn target_list(&self, pair: Pair<Rule>) -> PResult<Target> {
        let line = self.line(&pair);
        let (mut items, tuple) = self.target_items(pair)?;
        match items.pop() {
            Some(item) if !tuple => into_target(item, line),
            Some(item) => {
                items.push(item);
                into_target(Expr::Tuple(items), line)
            }
            None => Err(SandboxError::syntax("invalid syntax", line)),
        }
    }
}

pub(super) fn into_target(expr: Expr, line: usize) -> PResult<Target> {
    match expr {
        Expr::Name(name) => Ok(Target::Name(name)),
        Expr::Subscript(obj, index) => Ok(Target::Subscript(*obj, *index)),
        Expr::Attribute(obj, name) => Ok(Target::Attribute(*obj, name)),
        Expr::Tuple(items) | Expr::List(items) => Ok(Target::Tuple(
            items
                .into_iter()
                .map(|item| into_target(item, line))
                .collect::<PResult<_>>()?,
        )),
        _ => Err(SandboxError::syntax("cannot assign to expression", line)),
    }
}

fn augmented_op(text: &str) -> Option<BinOp> {
    let op = match text.strip_suffix('=')? {
        "+" => BinOp::Add,
        "-" => BinOp::Sub,
        "*" => BinOp::Mul,
        "/" => BinOp::Div,
        "//" => BinOp::FloorDiv,
        "%" => BinOp::Mod,
        "**" => BinOp::Pow,
        "&" => BinOp::BitAnd,
        "|" => BinOp::BitOr,
        "^" => BinOp::BitXor,
        _ => return None,
    };
    Some(op)
}
