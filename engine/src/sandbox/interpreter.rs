//! Tree-walking evaluator

use std::cmp::Ordering;
use std::rc::Rc;
use std::time::Instant;

use super::ast::{BinOp, CmpOp, CompClause, CompKind, Expr, FStringPart, FunctionDef, Handler};
use super::ast::{Stmt, StmtKind, Target, UnaryOp};
use super::error::{ErrorKind, Exception};
use super::format::{format_value, percent_format};
use super::value::{
    compare_values, range_len, range_span, values_equal, values_identical, BoundMethod, Builtin,
    Closure, DictItems, Key, Scope, SetItems, Value,
};
use super::SandboxLimits;

pub(super) type Eval = Result<Value, Exception>;

/// How a statement finished.
enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

type Exec = Result<Flow, Exception>;

/// Lazily produced loop items. Ranges are never materialised.
pub(super) enum ValueIter {
    Range { next: i64, stop: i64, step: i64 },
    Items(std::vec::IntoIter<Value>),
}

impl Iterator for ValueIter {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        match self {
            ValueIter::Range { next, stop, step } => {
                let more = if *step > 0 { *next < *stop } else { *next > *stop };
                if !more {
                    return None;
                }
                let current = *next;
                *next = next.saturating_add(*step);
                Some(Value::Int(current))
            }
            ValueIter::Items(items) => items.next(),
        }
    }
}

pub struct Interpreter {
    limits: SandboxLimits,
    deadline: Instant,
    depth: usize,
    stdout: String,
    stderr: String,
    truncated: bool,
    globals: Rc<Scope>,
    /// Exceptions currently being handled, innermost last
    handling: Vec<Rc<Exception>>,
}

impl Interpreter {
    pub fn new(limits: SandboxLimits) -> Self {
        let builtins = Rc::new(Scope::new());
        for builtin in Builtin::ALL {
            builtins.define(builtin.name(), Value::Builtin(*builtin));
        }
        for kind in ErrorKind::USER_VISIBLE {
            builtins.define(kind.name(), Value::ExceptionType(*kind));
        }

        let globals = Rc::new(Scope::with_parent(builtins));
        globals.define("__name__", Value::str("__main__"));

        Self {
            deadline: Instant::now() + limits.timeout,
            limits,
            depth: 0,
            stdout: String::new(),
            stderr: String::new(),
            truncated: false,
            globals,
            handling: Vec::new(),
        }
    }

    /// Runs a parsed program against the global scope.
    pub fn run(&mut self, program: &[Stmt]) -> Result<(), Exception> {
        self.deadline = Instant::now() + self.limits.timeout;
        let globals = Rc::clone(&self.globals);
        let result = self.exec_block(program, &globals).map(|_| ());
        globals.clear();
        result
    }

    pub fn into_output(self) -> (String, String) {
        (self.stdout, self.stderr)
    }

    /// Fails once the wall-clock budget is spent.
    pub(super) fn tick(&self) -> Result<(), Exception> {
        if Instant::now() >= self.deadline {
            return Err(Exception::new(
                ErrorKind::TimeoutError,
                format!(
                    "Execution timed out ({}s limit)",
                    self.limits.timeout.as_secs()
                ),
            ));
        }
        Ok(())
    }

    pub(super) fn write_stdout(&mut self, text: &str) {
        if self.truncated {
            return;
        }
        let cap = self.limits.max_output_bytes;
        let remaining = cap.saturating_sub(self.stdout.len());
        if text.len() <= remaining {
            self.stdout.push_str(text);
            return;
        }
        let mut cut = remaining;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        self.stdout.push_str(&text[..cut]);
        self.truncated = true;
        self.stderr
            .push_str(&format!("[output truncated at {} bytes]\n", cap));
    }

    pub(super) fn collection_limit(&self) -> usize {
        self.limits.max_collection
    }

    pub(super) fn check_size(&self, len: usize) -> Result<(), Exception> {
        if len > self.limits.max_collection {
            return Err(Exception::new(
                ErrorKind::MemoryError,
                format!(
                    "result exceeds the limit of {} items",
                    self.limits.max_collection
                ),
            ));
        }
        Ok(())
    }

    // ----- statements -----

    fn exec_block(&mut self, body: &[Stmt], scope: &Rc<Scope>) -> Exec {
        for stmt in body {
            match self
                .exec_stmt(stmt, scope)
                .map_err(|e| e.at_line(stmt.line))?
            {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, stmt: &Stmt, scope: &Rc<Scope>) -> Exec {
        match &stmt.kind {
            StmtKind::Expr(expr) => {
                self.eval(expr, scope)?;
            }
            StmtKind::Assign(targets, value) => {
                let value = self.eval(value, scope)?;
                for target in targets {
                    self.assign(target, value.clone(), scope)?;
                }
            }
            StmtKind::AugAssign(target, op, value) => self.augmented(target, *op, value, scope)?,
            StmtKind::If { test, body, orelse } => {
                return if self.eval(test, scope)?.truthy() {
                    self.exec_block(body, scope)
                } else {
                    self.exec_block(orelse, scope)
                };
            }
            StmtKind::While { test, body, orelse } => loop {
                self.tick()?;
                if !self.eval(test, scope)?.truthy() {
                    return self.exec_block(orelse, scope);
                }
                match self.exec_block(body, scope)? {
                    Flow::Break => return Ok(Flow::Normal),
                    Flow::Return(value) => return Ok(Flow::Return(value)),
                    Flow::Normal | Flow::Continue => {}
                }
            },
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
            } => {
                let iterable = self.eval(iter, scope)?;
                for item in self.iterate(&iterable)? {
                    self.tick()?;
                    self.assign(target, item, scope)?;
                    match self.exec_block(body, scope)? {
                        Flow::Break => return Ok(Flow::Normal),
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
                return self.exec_block(orelse, scope);
            }
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finally,
            } => return self.exec_try(body, handlers, orelse, finally, scope),
            StmtKind::FunctionDef(def) => {
                let function = self.make_function(def, scope)?;
                scope.define(&def.name, function);
            }
            StmtKind::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr, scope)?,
                    None => Value::None,
                };
                return Ok(Flow::Return(value));
            }
            StmtKind::Raise(value) => return Err(self.raised(value.as_ref(), scope)),
            StmtKind::Assert(test, message) => {
                if !self.eval(test, scope)?.truthy() {
                    let message = match message {
                        Some(expr) => self.eval(expr, scope)?.to_str(),
                        None => String::new(),
                    };
                    return Err(Exception::new(ErrorKind::AssertionError, message));
                }
            }
            StmtKind::Delete(targets) => {
                for target in targets {
                    self.delete(target, scope)?;
                }
            }
            StmtKind::Import(module) => {
                return Err(Exception::new(
                    ErrorKind::ImportError,
                    format!("import of '{}' is not allowed", module),
                ));
            }
            StmtKind::Break => return Ok(Flow::Break),
            StmtKind::Continue => return Ok(Flow::Continue),
            StmtKind::Pass => {}
        }
        Ok(Flow::Normal)
    }

    fn exec_try(
        &mut self,
        body: &[Stmt],
        handlers: &[Handler],
        orelse: &[Stmt],
        finally: &[Stmt],
        scope: &Rc<Scope>,
    ) -> Exec {
        let outcome = match self.exec_block(body, scope) {
            Err(exc) if exc.kind.is_catchable() => match self.find_handler(handlers, &exc, scope) {
                Ok(Some(handler)) => {
                    let exc = Rc::new(exc);
                    if let Some(name) = &handler.binding {
                        scope.define(name, Value::Exception(Rc::clone(&exc)));
                    }
                    self.handling.push(exc);
                    let result = self.exec_block(&handler.body, scope);
                    self.handling.pop();
                    result
                }
                Ok(None) => Err(exc),
                Err(e) => Err(e),
            },
            Ok(Flow::Normal) => self.exec_block(orelse, scope),
            other => other,
        };

        if finally.is_empty() {
            return outcome;
        }
        if let Err(exc) = &outcome {
            if !exc.kind.is_catchable() {
                return outcome;
            }
        }
        match self.exec_block(finally, scope)? {
            Flow::Normal => outcome,
            flow => Ok(flow),
        }
    }

    fn find_handler<'h>(
        &mut self,
        handlers: &'h [Handler],
        exc: &Exception,
        scope: &Rc<Scope>,
    ) -> Result<Option<&'h Handler>, Exception> {
        for handler in handlers {
            let Some(class) = &handler.class else {
                return Ok(Some(handler));
            };
            let class = self.eval(class, scope)?;
            if exception_matches(exc, &class)? {
                return Ok(Some(handler));
            }
        }
        Ok(None)
    }

    fn raised(&mut self, value: Option<&Expr>, scope: &Rc<Scope>) -> Exception {
        let Some(expr) = value else {
            return match self.handling.last() {
                Some(exc) => exc.as_ref().clone(),
                None => Exception::new(ErrorKind::RuntimeError, "No active exception to reraise"),
            };
        };
        match self.eval(expr, scope) {
            Err(e) => e,
            Ok(Value::Exception(exc)) => {
                let mut exc = exc.as_ref().clone();
                exc.line = None;
                exc
            }
            Ok(Value::ExceptionType(kind)) => Exception::new(kind, ""),
            Ok(_) => Exception::type_error("exceptions must derive from BaseException"),
        }
    }

    fn augmented(&mut self, target: &Target, op: BinOp, value: &Expr, scope: &Rc<Scope>) -> Result<(), Exception> {
        match target {
            Target::Name(name) => {
                let current = self.lookup(name, scope)?;
                let rhs = self.eval(value, scope)?;
                let updated = self.binary_in_place(op, current, rhs)?;
                scope.define(name, updated);
            }
            Target::Subscript(obj, index) => {
                let obj = self.eval(obj, scope)?;
                let index = self.eval(index, scope)?;
                let current = self.get_item(&obj, &index)?;
                let rhs = self.eval(value, scope)?;
                let updated = self.binary_in_place(op, current, rhs)?;
                self.set_item(&obj, index, updated)?;
            }
            Target::Attribute(obj, name) => {
                let obj = self.eval(obj, scope)?;
                return Err(no_attribute(&obj, name));
            }
            Target::Tuple(_) => {
                return Err(Exception::type_error(
                    "illegal expression for augmented assignment",
                ))
            }
        }
        Ok(())
    }

    /// `+=` on a list extends it in place; everything else rebinds.
    fn binary_in_place(&mut self, op: BinOp, current: Value, rhs: Value) -> Eval {
        if let (BinOp::Add, Value::List(items)) = (op, &current) {
            let extra = self.collect(&rhs)?;
            self.check_size(items.borrow().len() + extra.len())?;
            items.borrow_mut().extend(extra);
            return Ok(current);
        }
        self.binary(op, current, rhs)
    }

    fn assign(&mut self, target: &Target, value: Value, scope: &Rc<Scope>) -> Result<(), Exception> {
        match target {
            Target::Name(name) => {
                scope.define(name, value);
                Ok(())
            }
            Target::Subscript(obj, index) => {
                let obj = self.eval(obj, scope)?;
                if let Expr::Slice(start, stop, step) = index {
                    let (start, stop, step) = self.eval_slice(start, stop, step, scope)?;
                    return self.set_slice(&obj, start, stop, step, value);
                }
                let index = self.eval(index, scope)?;
                self.set_item(&obj, index, value)
            }
            Target::Attribute(obj, name) => {
                let obj = self.eval(obj, scope)?;
                Err(no_attribute(&obj, name))
            }
            Target::Tuple(targets) => {
                let items = self.collect(&value)?;
                if items.len() < targets.len() {
                    return Err(Exception::value_error(format!(
                        "not enough values to unpack (expected {}, got {})",
                        targets.len(),
                        items.len()
                    )));
                }
                if items.len() > targets.len() {
                    return Err(Exception::value_error(format!(
                        "too many values to unpack (expected {})",
                        targets.len()
                    )));
                }
                for (target, item) in targets.iter().zip(items) {
                    self.assign(target, item, scope)?;
                }
                Ok(())
            }
        }
    }

    fn delete(&mut self, target: &Target, scope: &Rc<Scope>) -> Result<(), Exception> {
        match target {
            Target::Name(name) => scope
                .remove(name)
                .map(|_| ())
                .ok_or_else(|| name_error(name)),
            Target::Subscript(obj, index) => {
                let obj = self.eval(obj, scope)?;
                if let Expr::Slice(start, stop, step) = index {
                    let (start, stop, step) = self.eval_slice(start, stop, step, scope)?;
                    return self.delete_slice(&obj, start, stop, step);
                }
                let index = self.eval(index, scope)?;
                self.delete_item(&obj, &index)
            }
            Target::Attribute(obj, name) => {
                let obj = self.eval(obj, scope)?;
                Err(no_attribute(&obj, name))
            }
            Target::Tuple(targets) => {
                for target in targets {
                    self.delete(target, scope)?;
                }
                Ok(())
            }
        }
    }

    // ----- expressions -----

    fn lookup(&self, name: &str, scope: &Rc<Scope>) -> Eval {
        scope.lookup(name).ok_or_else(|| name_error(name))
    }

    fn eval_all(&mut self, exprs: &[Expr], scope: &Rc<Scope>) -> Result<Vec<Value>, Exception> {
        exprs.iter().map(|e| self.eval(e, scope)).collect()
    }

    fn eval_kwargs(
        &mut self,
        kwargs: &[(String, Expr)],
        scope: &Rc<Scope>,
    ) -> Result<Vec<(String, Value)>, Exception> {
        kwargs
            .iter()
            .map(|(name, expr)| Ok((name.clone(), self.eval(expr, scope)?)))
            .collect()
    }

    fn eval(&mut self, expr: &Expr, scope: &Rc<Scope>) -> Eval {
        Ok(match expr {
            Expr::None => Value::None,
            Expr::Bool(b) => Value::Bool(*b),
            Expr::Int(i) => Value::Int(*i),
            Expr::Float(f) => Value::Float(*f),
            Expr::Str(s) => Value::Str(Rc::clone(s)),
            Expr::FString(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        FStringPart::Literal(text) => out.push_str(text),
                        FStringPart::Field {
                            expr,
                            conversion,
                            spec,
                        } => {
                            let value = self.eval(expr, scope)?;
                            let value = match conversion {
                                Some('s') => Value::str(value.to_str()),
                                Some(_) => Value::str(value.repr()),
                                None => value,
                            };
                            out.push_str(&format_value(&value, spec, self.limits.max_collection)?);
                        }
                    }
                }
                self.check_size(out.len())?;
                Value::str(out)
            }
            Expr::Name(name) => self.lookup(name, scope)?,
            Expr::List(items) => Value::list(self.eval_all(items, scope)?),
            Expr::Tuple(items) => Value::tuple(self.eval_all(items, scope)?),
            Expr::Dict(pairs) => {
                let mut items = DictItems::new();
                for (key, value) in pairs {
                    let key = self.eval(key, scope)?;
                    let value = self.eval(value, scope)?;
                    dict_insert(&mut items, key, value)?;
                }
                Value::dict(items)
            }
            Expr::Set(elements) => {
                let mut items = SetItems::new();
                for element in elements {
                    let value = self.eval(element, scope)?;
                    items.entry(value.to_key()?).or_insert(value);
                }
                Value::set(items)
            }
            Expr::Unary(op, operand) => {
                let value = self.eval(operand, scope)?;
                unary(*op, value)?
            }
            Expr::Binary(left, op, right) => {
                let left = self.eval(left, scope)?;
                let right = self.eval(right, scope)?;
                self.binary(*op, left, right)?
            }
            Expr::And(left, right) => {
                let left = self.eval(left, scope)?;
                if !left.truthy() {
                    left
                } else {
                    self.eval(right, scope)?
                }
            }
            Expr::Or(left, right) => {
                let left = self.eval(left, scope)?;
                if left.truthy() {
                    left
                } else {
                    self.eval(right, scope)?
                }
            }
            Expr::Compare(first, rest) => {
                let mut left = self.eval(first, scope)?;
                for (op, right) in rest {
                    let right = self.eval(right, scope)?;
                    if !self.compare(*op, &left, &right)? {
                        return Ok(Value::Bool(false));
                    }
                    left = right;
                }
                Value::Bool(true)
            }
            Expr::IfElse { test, body, orelse } => {
                if self.eval(test, scope)?.truthy() {
                    self.eval(body, scope)?
                } else {
                    self.eval(orelse, scope)?
                }
            }
            Expr::Call { func, args, kwargs } => {
                if let Expr::Attribute(receiver, name) = func.as_ref() {
                    let receiver = self.eval(receiver, scope)?;
                    let args = self.eval_all(args, scope)?;
                    let kwargs = self.eval_kwargs(kwargs, scope)?;
                    return self.call_method(receiver, name, args, kwargs);
                }
                let func = self.eval(func, scope)?;
                let args = self.eval_all(args, scope)?;
                let kwargs = self.eval_kwargs(kwargs, scope)?;
                self.call(func, args, kwargs)?
            }
            Expr::Attribute(obj, name) => {
                let obj = self.eval(obj, scope)?;
                self.get_attribute(obj, name)?
            }
            Expr::Subscript(obj, index) => {
                let obj = self.eval(obj, scope)?;
                if let Expr::Slice(start, stop, step) = index.as_ref() {
                    let (start, stop, step) = self.eval_slice(start, stop, step, scope)?;
                    return self.get_slice(&obj, start, stop, step);
                }
                let index = self.eval(index, scope)?;
                self.get_item(&obj, &index)?
            }
            Expr::Slice(..) => {
                return Err(Exception::type_error("slices are only valid inside []"));
            }
            Expr::Lambda(def) => self.make_function(def, scope)?,
            Expr::Comprehension {
                kind,
                element,
                value,
                clauses,
            } => {
                let inner = Rc::new(Scope::with_parent(Rc::clone(scope)));
                let mut produced = Vec::new();
                self.comprehend(clauses, element, value.as_deref(), &inner, &mut produced)?;
                match kind {
                    CompKind::List => Value::list(produced.into_iter().map(|(e, _)| e).collect()),
                    CompKind::Set => {
                        let mut items = SetItems::new();
                        for (element, _) in produced {
                            items.entry(element.to_key()?).or_insert(element);
                        }
                        Value::set(items)
                    }
                    CompKind::Dict => {
                        let mut items = DictItems::new();
                        for (key, value) in produced {
                            dict_insert(&mut items, key, value.unwrap_or(Value::None))?;
                        }
                        Value::dict(items)
                    }
                }
            }
        })
    }

    fn eval_slice(
        &mut self,
        start: &Option<Box<Expr>>,
        stop: &Option<Box<Expr>>,
        step: &Option<Box<Expr>>,
        scope: &Rc<Scope>,
    ) -> Result<(Option<Value>, Option<Value>, Option<Value>), Exception> {
        let mut bound = |e: &Option<Box<Expr>>| -> Result<Option<Value>, Exception> {
            e.as_deref().map(|e| self.eval(e, scope)).transpose()
        };
        Ok((bound(start)?, bound(stop)?, bound(step)?))
    }

    fn comprehend(
        &mut self,
        clauses: &[CompClause],
        element: &Expr,
        value: Option<&Expr>,
        scope: &Rc<Scope>,
        out: &mut Vec<(Value, Option<Value>)>,
    ) -> Result<(), Exception> {
        let Some((clause, rest)) = clauses.split_first() else {
            let produced = self.eval(element, scope)?;
            let paired = value.map(|v| self.eval(v, scope)).transpose()?;
            out.push((produced, paired));
            return self.check_size(out.len());
        };

        let iterable = self.eval(&clause.iter, scope)?;
        'items: for item in self.iterate(&iterable)? {
            self.tick()?;
            self.assign(&clause.target, item, scope)?;
            for condition in &clause.conditions {
                if !self.eval(condition, scope)?.truthy() {
                    continue 'items;
                }
            }
            self.comprehend(rest, element, value, scope, out)?;
        }
        Ok(())
    }

    fn make_function(&mut self, def: &Rc<FunctionDef>, scope: &Rc<Scope>) -> Eval {
        let defaults = def
            .params
            .iter()
            .map(|p| p.default.as_ref().map(|d| self.eval(d, scope)).transpose())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Value::Function(Rc::new(Closure {
            def: Rc::clone(def),
            scope: Rc::clone(scope),
            defaults,
        })))
    }

    // ----- calls -----

    pub(super) fn call(&mut self, func: Value, args: Vec<Value>, kwargs: Vec<(String, Value)>) -> Eval {
        self.tick()?;
        match func {
            Value::Function(closure) => self.call_function(&closure, args, kwargs),
            Value::Builtin(builtin) => self.call_builtin(builtin, args, kwargs),
            Value::Method(method) => {
                self.call_method(method.receiver.clone(), &method.name, args, kwargs)
            }
            Value::ExceptionType(kind) => {
                if !kwargs.is_empty() {
                    return Err(Exception::type_error(format!(
                        "{}() takes no keyword arguments",
                        kind.name()
                    )));
                }
                let message = match args.len() {
                    0 => String::new(),
                    1 => args[0].to_str(),
                    _ => Value::tuple(args).repr(),
                };
                Ok(Value::Exception(Rc::new(Exception::new(kind, message))))
            }
            Value::Type(name) => Err(Exception::type_error(format!(
                "cannot create '{}' instances",
                name
            ))),
            other => Err(Exception::type_error(format!(
                "'{}' object is not callable",
                other.type_name()
            ))),
        }
    }

    fn call_function(
        &mut self,
        closure: &Closure,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Eval {
        if self.depth >= self.limits.max_depth {
            return Err(Exception::new(
                ErrorKind::RecursionError,
                "maximum recursion depth exceeded",
            ));
        }

        let def = &closure.def;
        let params = &def.params;
        if args.len() > params.len() {
            return Err(Exception::type_error(format!(
                "{}() takes {} positional argument{} but {} {} given",
                def.name,
                params.len(),
                if params.len() == 1 { "" } else { "s" },
                args.len(),
                if args.len() == 1 { "was" } else { "were" }
            )));
        }

        let mut bound: Vec<Option<Value>> = vec![None; params.len()];
        for (slot, arg) in bound.iter_mut().zip(args) {
            *slot = Some(arg);
        }
        for (name, value) in kwargs {
            let Some(idx) = params.iter().position(|p| p.name == name) else {
                return Err(Exception::type_error(format!(
                    "{}() got an unexpected keyword argument '{}'",
                    def.name, name
                )));
            };
            if bound[idx].is_some() {
                return Err(Exception::type_error(format!(
                    "{}() got multiple values for argument '{}'",
                    def.name, name
                )));
            }
            bound[idx] = Some(value);
        }

        let local = Rc::new(Scope::with_parent(Rc::clone(&closure.scope)));
        for (idx, param) in params.iter().enumerate() {
            let value = match bound[idx].take() {
                Some(value) => value,
                None => match closure.defaults.get(idx).cloned().flatten() {
                    Some(default) => default,
                    None => {
                        return Err(Exception::type_error(format!(
                            "{}() missing 1 required positional argument: '{}'",
                            def.name, param.name
                        )))
                    }
                },
            };
            local.define(&param.name, value);
        }

        self.depth += 1;
        let result = self.exec_block(&def.body, &local);
        self.depth -= 1;

        match result? {
            Flow::Return(value) => Ok(value),
            _ => Ok(Value::None),
        }
    }

    pub(super) fn get_attribute(&self, obj: Value, name: &str) -> Eval {
        if name == "__name__" {
            match &obj {
                Value::Function(f) => return Ok(Value::str(f.def.name.as_str())),
                Value::Builtin(b) => return Ok(Value::str(b.name())),
                Value::ExceptionType(kind) => return Ok(Value::str(kind.name())),
                Value::Type(type_name) => return Ok(Value::str(*type_name)),
                _ => {}
            }
        }
        if let Value::Exception(exc) = &obj {
            if name == "args" {
                let args = if exc.message.is_empty() {
                    Vec::new()
                } else {
                    vec![Value::str(exc.message.as_str())]
                };
                return Ok(Value::tuple(args));
            }
        }
        if super::builtins::method_names(&obj).iter().any(|m| *m == name) {
            return Ok(Value::Method(Rc::new(BoundMethod {
                receiver: obj,
                name: name.to_string(),
            })));
        }
        Err(no_attribute(&obj, name))
    }

    // ----- iteration -----

    pub(super) fn iterate(&self, value: &Value) -> Result<ValueIter, Exception> {
        let items = match value {
            Value::Range { start, stop, step } => {
                return Ok(ValueIter::Range {
                    next: *start,
                    stop: *stop,
                    step: *step,
                })
            }
            Value::List(items) => items.borrow().clone(),
            Value::Tuple(items) => items.as_ref().clone(),
            Value::Str(s) => s.chars().map(|c| Value::str(c.to_string())).collect(),
            Value::Dict(items) => items.borrow().values().map(|(k, _)| k.clone()).collect(),
            Value::Set(items) => items.borrow().values().cloned().collect(),
            other => {
                return Err(Exception::type_error(format!(
                    "'{}' object is not iterable",
                    other.type_name()
                )))
            }
        };
        Ok(ValueIter::Items(items.into_iter()))
    }

    /// Materialises an iterable, refusing oversized ranges.
    pub(super) fn collect(&self, value: &Value) -> Result<Vec<Value>, Exception> {
        if let Value::Range { start, stop, step } = value {
            self.check_size(range_len(*start, *stop, *step)?)?;
        }
        Ok(self.iterate(value)?.collect())
    }

    // ----- operators -----

    pub(super) fn binary(&mut self, op: BinOp, a: Value, b: Value) -> Eval {
        if let (Some(x), Some(y)) = (a.as_int(), b.as_int()) {
            if matches!(op, BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor)
                && matches!((&a, &b), (Value::Bool(_), Value::Bool(_)))
            {
                let (x, y) = (x != 0, y != 0);
                return Ok(Value::Bool(match op {
                    BinOp::BitAnd => x & y,
                    BinOp::BitOr => x | y,
                    _ => x ^ y,
                }));
            }
            return int_op(op, x, y);
        }
        if a.is_number() && b.is_number() && !is_bitwise(op) {
            return float_op(op, a.as_float().unwrap_or(0.0), b.as_float().unwrap_or(0.0));
        }

        match (op, &a, &b) {
            (BinOp::Add, Value::Str(x), Value::Str(y)) => {
                self.check_size(x.len() + y.len())?;
                Ok(Value::str(format!("{}{}", x, y)))
            }
            (BinOp::Add, Value::List(x), Value::List(y)) => {
                let mut items = x.borrow().clone();
                items.extend(y.borrow().iter().cloned());
                self.check_size(items.len())?;
                Ok(Value::list(items))
            }
            (BinOp::Add, Value::Tuple(x), Value::Tuple(y)) => {
                let mut items = x.as_ref().clone();
                items.extend(y.iter().cloned());
                self.check_size(items.len())?;
                Ok(Value::tuple(items))
            }
            (BinOp::Mul, seq, n) | (BinOp::Mul, n, seq)
                if n.as_int().is_some()
                    && matches!(seq, Value::Str(_) | Value::List(_) | Value::Tuple(_)) =>
            {
                self.repeat(seq, n.as_int().unwrap_or(0))
            }
            (BinOp::Mod, Value::Str(fmt), args) => Ok(Value::str(percent_format(
                fmt,
                args,
                self.limits.max_collection,
            )?)),
            (BinOp::Sub, Value::Set(x), Value::Set(y)) => {
                let y = y.borrow();
                let items: SetItems = x
                    .borrow()
                    .iter()
                    .filter(|(k, _)| !y.contains_key(*k))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                Ok(Value::set(items))
            }
            (BinOp::BitOr, Value::Set(x), Value::Set(y)) => {
                let mut items = x.borrow().clone();
                for (k, v) in y.borrow().iter() {
                    items.entry(k.clone()).or_insert_with(|| v.clone());
                }
                Ok(Value::set(items))
            }
            (BinOp::BitAnd, Value::Set(x), Value::Set(y)) => {
                let y = y.borrow();
                let items: SetItems = x
                    .borrow()
                    .iter()
                    .filter(|(k, _)| y.contains_key(*k))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                Ok(Value::set(items))
            }
            (BinOp::BitXor, Value::Set(x), Value::Set(y)) => {
                let (x, y) = (x.borrow(), y.borrow());
                let mut items: SetItems = x
                    .iter()
                    .filter(|(k, _)| !y.contains_key(*k))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                for (k, v) in y.iter() {
                    if !x.contains_key(k) {
                        items.insert(k.clone(), v.clone());
                    }
                }
                Ok(Value::set(items))
            }
            (BinOp::BitOr, Value::Dict(x), Value::Dict(y)) => {
                let mut items = x.borrow().clone();
                for (k, (key, value)) in y.borrow().iter() {
                    items.insert(k.clone(), (key.clone(), value.clone()));
                }
                Ok(Value::dict(items))
            }
            _ => Err(Exception::type_error(format!(
                "unsupported operand type(s) for {}: '{}' and '{}'",
                op.symbol(),
                a.type_name(),
                b.type_name()
            ))),
        }
    }

    fn repeat(&self, seq: &Value, count: i64) -> Eval {
        let count = count.max(0) as usize;
        let unit = match seq {
            Value::Str(s) => s.len(),
            Value::List(items) => items.borrow().len(),
            Value::Tuple(items) => items.len(),
            _ => 0,
        };
        let total = unit.checked_mul(count).ok_or_else(|| {
            Exception::new(ErrorKind::MemoryError, "repetition result is too large")
        })?;
        self.check_size(total)?;
        Ok(match seq {
            Value::Str(s) => Value::str(s.repeat(count)),
            Value::List(items) => {
                let items = items.borrow();
                Value::list(items.iter().cloned().cycle().take(total).collect())
            }
            Value::Tuple(items) => Value::tuple(items.iter().cloned().cycle().take(total).collect()),
            other => other.clone(),
        })
    }

    fn compare(&self, op: CmpOp, a: &Value, b: &Value) -> Result<bool, Exception> {
        Ok(match op {
            CmpOp::Eq => values_equal(a, b),
            CmpOp::NotEq => !values_equal(a, b),
            CmpOp::Lt => compare_values(a, b)? == Some(Ordering::Less),
            CmpOp::LtE => matches!(
                compare_values(a, b)?,
                Some(Ordering::Less | Ordering::Equal)
            ),
            CmpOp::Gt => compare_values(a, b)? == Some(Ordering::Greater),
            CmpOp::GtE => matches!(
                compare_values(a, b)?,
                Some(Ordering::Greater | Ordering::Equal)
            ),
            CmpOp::In => contains(b, a)?,
            CmpOp::NotIn => !contains(b, a)?,
            CmpOp::Is => values_identical(a, b),
            CmpOp::IsNot => !values_identical(a, b),
        })
    }

    // ----- subscripts -----

    pub(super) fn get_item(&self, obj: &Value, index: &Value) -> Eval {
        match obj {
            Value::List(items) => {
                let items = items.borrow();
                let idx = sequence_index(index, items.len(), "list")?;
                Ok(items[idx].clone())
            }
            Value::Tuple(items) => {
                let idx = sequence_index(index, items.len(), "tuple")?;
                Ok(items[idx].clone())
            }
            Value::Str(s) => {
                let len = s.chars().count();
                let idx = sequence_index(index, len, "string")?;
                Ok(Value::str(
                    s.chars().nth(idx).map(String::from).unwrap_or_default(),
                ))
            }
            Value::Range { start, stop, step } => {
                let Some(i) = index.as_int() else {
                    return Err(Exception::type_error(format!(
                        "range indices must be integers, not {}",
                        index.type_name()
                    )));
                };
                let len = range_span(*start, *stop, *step);
                let idx = if i < 0 { len + i as i128 } else { i as i128 };
                if idx < 0 || idx >= len {
                    return Err(Exception::index_error("range object index out of range"));
                }
                Ok(Value::Int((*start as i128 + *step as i128 * idx) as i64))
            }
            Value::Dict(items) => {
                let key = index.to_key()?;
                items
                    .borrow()
                    .get(&key)
                    .map(|(_, value)| value.clone())
                    .ok_or_else(|| key_error(index))
            }
            other => Err(Exception::type_error(format!(
                "'{}' object is not subscriptable",
                other.type_name()
            ))),
        }
    }

    pub(super) fn set_item(&self, obj: &Value, index: Value, value: Value) -> Result<(), Exception> {
        match obj {
            Value::List(items) => {
                let len = items.borrow().len();
                let idx = sequence_index(&index, len, "list assignment")?;
                items.borrow_mut()[idx] = value;
                Ok(())
            }
            Value::Dict(items) => {
                let len = items.borrow().len();
                self.check_size(len + 1)?;
                dict_insert(&mut items.borrow_mut(), index, value)
            }
            other => Err(Exception::type_error(format!(
                "'{}' object does not support item assignment",
                other.type_name()
            ))),
        }
    }

    fn delete_item(&self, obj: &Value, index: &Value) -> Result<(), Exception> {
        match obj {
            Value::List(items) => {
                let len = items.borrow().len();
                let idx = sequence_index(index, len, "list assignment")?;
                items.borrow_mut().remove(idx);
                Ok(())
            }
            Value::Dict(items) => {
                let key = index.to_key()?;
                items
                    .borrow_mut()
                    .shift_remove(&key)
                    .map(|_| ())
                    .ok_or_else(|| key_error(index))
            }
            other => Err(Exception::type_error(format!(
                "'{}' object does not support item deletion",
                other.type_name()
            ))),
        }
    }

    fn get_slice(
        &self,
        obj: &Value,
        start: Option<Value>,
        stop: Option<Value>,
        step: Option<Value>,
    ) -> Eval {
        match obj {
            Value::List(items) => {
                let items = items.borrow();
                let picked = slice_indices(items.len(), start, stop, step)?;
                Ok(Value::list(picked.into_iter().map(|i| items[i].clone()).collect()))
            }
            Value::Tuple(items) => {
                let picked = slice_indices(items.len(), start, stop, step)?;
                Ok(Value::tuple(picked.into_iter().map(|i| items[i].clone()).collect()))
            }
            Value::Str(s) => {
                let chars: Vec<char> = s.chars().collect();
                let picked = slice_indices(chars.len(), start, stop, step)?;
                Ok(Value::str(picked.into_iter().map(|i| chars[i]).collect::<String>()))
            }
            Value::Range { .. } => {
                let items = self.collect(obj)?;
                let picked = slice_indices(items.len(), start, stop, step)?;
                Ok(Value::list(picked.into_iter().map(|i| items[i].clone()).collect()))
            }
            other => Err(Exception::type_error(format!(
                "'{}' object is not subscriptable",
                other.type_name()
            ))),
        }
    }

    fn set_slice(
        &self,
        obj: &Value,
        start: Option<Value>,
        stop: Option<Value>,
        step: Option<Value>,
        value: Value,
    ) -> Result<(), Exception> {
        let Value::List(items) = obj else {
            return Err(Exception::type_error(format!(
                "'{}' object does not support slice assignment",
                obj.type_name()
            )));
        };
        let replacement = self.collect(&value)?;
        let len = items.borrow().len();
        let (from, to, step) = slice_bounds(len, start, stop, step)?;

        if step == 1 {
            let (from, to) = (from as usize, to.max(from) as usize);
            self.check_size(len - (to - from) + replacement.len())?;
            items.borrow_mut().splice(from..to, replacement);
            return Ok(());
        }

        let picked = walk_slice(from, to, step);
        if picked.len() != replacement.len() {
            return Err(Exception::value_error(format!(
                "attempt to assign sequence of size {} to extended slice of size {}",
                replacement.len(),
                picked.len()
            )));
        }
        let mut items = items.borrow_mut();
        for (idx, value) in picked.into_iter().zip(replacement) {
            items[idx] = value;
        }
        Ok(())
    }

    fn delete_slice(
        &self,
        obj: &Value,
        start: Option<Value>,
        stop: Option<Value>,
        step: Option<Value>,
    ) -> Result<(), Exception> {
        let Value::List(items) = obj else {
            return Err(Exception::type_error(format!(
                "'{}' object does not support item deletion",
                obj.type_name()
            )));
        };
        let len = items.borrow().len();
        let mut picked = slice_indices(len, start, stop, step)?;
        picked.sort_unstable();
        let mut items = items.borrow_mut();
        for idx in picked.into_iter().rev() {
            items.remove(idx);
        }
        Ok(())
    }
}

fn is_bitwise(op: BinOp) -> bool {
    matches!(op, BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor)
}

fn int_op(op: BinOp, x: i64, y: i64) -> Eval {
    let overflow = Exception::overflow;
    Ok(match op {
        BinOp::Add => Value::Int(x.checked_add(y).ok_or_else(overflow)?),
        BinOp::Sub => Value::Int(x.checked_sub(y).ok_or_else(overflow)?),
        BinOp::Mul => Value::Int(x.checked_mul(y).ok_or_else(overflow)?),
        BinOp::Div => {
            if y == 0 {
                return Err(Exception::zero_division("division by zero"));
            }
            Value::Float(x as f64 / y as f64)
        }
        BinOp::FloorDiv => {
            if y == 0 {
                return Err(Exception::zero_division(
                    "integer division or modulo by zero",
                ));
            }
            let q = x.checked_div(y).ok_or_else(overflow)?;
            let adjust = x % y != 0 && ((x < 0) != (y < 0));
            Value::Int(if adjust { q - 1 } else { q })
        }
        BinOp::Mod => {
            if y == 0 {
                return Err(Exception::zero_division("integer modulo by zero"));
            }
            let r = x.checked_rem(y).unwrap_or(0);
            Value::Int(if r != 0 && ((r < 0) != (y < 0)) { r + y } else { r })
        }
        BinOp::Pow => {
            if y < 0 {
                if x == 0 {
                    return Err(Exception::zero_division(
                        "0.0 cannot be raised to a negative power",
                    ));
                }
                Value::Float((x as f64).powf(y as f64))
            } else {
                let exp = u32::try_from(y).map_err(|_| overflow())?;
                Value::Int(x.checked_pow(exp).ok_or_else(overflow)?)
            }
        }
        BinOp::BitAnd => Value::Int(x & y),
        BinOp::BitOr => Value::Int(x | y),
        BinOp::BitXor => Value::Int(x ^ y),
    })
}

fn float_op(op: BinOp, x: f64, y: f64) -> Eval {
    Ok(Value::Float(match op {
        BinOp::Add => x + y,
        BinOp::Sub => x - y,
        BinOp::Mul => x * y,
        BinOp::Div => {
            if y == 0.0 {
                return Err(Exception::zero_division("float division by zero"));
            }
            x / y
        }
        BinOp::FloorDiv => {
            if y == 0.0 {
                return Err(Exception::zero_division("float floor division by zero"));
            }
            (x / y).floor()
        }
        BinOp::Mod => {
            if y == 0.0 {
                return Err(Exception::zero_division("float modulo"));
            }
            let r = x % y;
            if r != 0.0 && ((r < 0.0) != (y < 0.0)) {
                r + y
            } else {
                r
            }
        }
        BinOp::Pow => {
            if x == 0.0 && y < 0.0 {
                return Err(Exception::zero_division(
                    "0.0 cannot be raised to a negative power",
                ));
            }
            if x < 0.0 && y.fract() != 0.0 {
                return Err(Exception::value_error(
                    "negative number cannot be raised to a fractional power",
                ));
            }
            x.powf(y)
        }
        BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor => {
            return Err(Exception::type_error(format!(
                "unsupported operand type(s) for {}: 'float' and 'float'",
                op.symbol()
            )))
        }
    }))
}

fn unary(op: UnaryOp, value: Value) -> Eval {
    match (op, &value) {
        (UnaryOp::Not, v) => Ok(Value::Bool(!v.truthy())),
        (UnaryOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
        (UnaryOp::Neg, v) if v.as_int().is_some() => v
            .as_int()
            .and_then(i64::checked_neg)
            .map(Value::Int)
            .ok_or_else(Exception::overflow),
        (UnaryOp::Pos, Value::Float(f)) => Ok(Value::Float(*f)),
        (UnaryOp::Pos, v) if v.as_int().is_some() => Ok(Value::Int(v.as_int().unwrap_or(0))),
        (UnaryOp::Invert, v) if v.as_int().is_some() => Ok(Value::Int(!v.as_int().unwrap_or(0))),
        (op, v) => {
            let symbol = match op {
                UnaryOp::Neg => "-",
                UnaryOp::Pos => "+",
                _ => "~",
            };
            Err(Exception::type_error(format!(
                "bad operand type for unary {}: '{}'",
                symbol,
                v.type_name()
            )))
        }
    }
}

/// `item in container`
pub(super) fn contains(container: &Value, item: &Value) -> Result<bool, Exception> {
    match container {
        Value::Str(haystack) => match item {
            Value::Str(needle) => Ok(haystack.contains(needle.as_ref())),
            other => Err(Exception::type_error(format!(
                "'in <string>' requires string as left operand, not {}",
                other.type_name()
            ))),
        },
        Value::List(items) => Ok(items.borrow().iter().any(|v| values_equal(v, item))),
        Value::Tuple(items) => Ok(items.iter().any(|v| values_equal(v, item))),
        Value::Dict(items) => Ok(items.borrow().contains_key(&item.to_key()?)),
        Value::Set(items) => Ok(items.borrow().contains_key(&item.to_key()?)),
        Value::Range { start, stop, step } => {
            let Some(n) = item.as_int() else {
                return Ok(false);
            };
            let in_bounds = if *step > 0 {
                *start <= n && n < *stop
            } else {
                *stop < n && n <= *start
            };
            Ok(in_bounds && (n as i128 - *start as i128) % *step as i128 == 0)
        }
        other => Err(Exception::type_error(format!(
            "argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}

fn exception_matches(exc: &Exception, class: &Value) -> Result<bool, Exception> {
    match class {
        Value::ExceptionType(kind) => Ok(exc.kind.matches(*kind)),
        Value::Tuple(classes) => {
            for class in classes.iter() {
                if exception_matches(exc, class)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        _ => Err(Exception::type_error(
            "catching classes that do not inherit from BaseException is not allowed",
        )),
    }
}

pub(super) fn dict_insert(items: &mut DictItems, key: Value, value: Value) -> Result<(), Exception> {
    let hashed: Key = key.to_key()?;
    match items.get_mut(&hashed) {
        Some(slot) => slot.1 = value,
        None => {
            items.insert(hashed, (key, value));
        }
    }
    Ok(())
}

pub(super) fn key_error(key: &Value) -> Exception {
    Exception::new(ErrorKind::KeyError, key.repr())
}

fn name_error(name: &str) -> Exception {
    Exception::new(
        ErrorKind::NameError,
        format!("name '{}' is not defined", name),
    )
}

pub(super) fn no_attribute(obj: &Value, name: &str) -> Exception {
    Exception::new(
        ErrorKind::AttributeError,
        format!("'{}' object has no attribute '{}'", obj.type_name(), name),
    )
}

/// Resolves a possibly negative index against `len`.
pub(super) fn sequence_index(index: &Value, len: usize, what: &str) -> Result<usize, Exception> {
    let Some(i) = index.as_int() else {
        return Err(Exception::type_error(format!(
            "{} indices must be integers, not {}",
            what.trim_end_matches(" assignment"),
            index.type_name()
        )));
    };
    let len = len as i64;
    let idx = if i < 0 { i + len } else { i };
    if idx < 0 || idx >= len {
        return Err(Exception::index_error(format!("{} index out of range", what)));
    }
    Ok(idx as usize)
}

/// Positions selected by `[start:stop:step]` on a sequence of `len` items.
fn slice_indices(
    len: usize,
    start: Option<Value>,
    stop: Option<Value>,
    step: Option<Value>,
) -> Result<Vec<usize>, Exception> {
    let (start, stop, step) = slice_bounds(len, start, stop, step)?;
    Ok(walk_slice(start, stop, step))
}

fn walk_slice(start: i64, stop: i64, step: i64) -> Vec<usize> {
    let mut picked = Vec::new();
    let mut i = start;
    while (step > 0 && i < stop) || (step < 0 && i > stop) {
        picked.push(i as usize);
        i += step;
    }
    picked
}

/// Clamps slice bounds against `len` the way sequences do.
pub(super) fn slice_bounds(
    len: usize,
    start: Option<Value>,
    stop: Option<Value>,
    step: Option<Value>,
) -> Result<(i64, i64, i64), Exception> {
    let bound = |v: Option<Value>| -> Result<Option<i64>, Exception> {
        match v {
            None | Some(Value::None) => Ok(None),
            Some(v) => v.as_int().map(Some).ok_or_else(|| {
                Exception::type_error("slice indices must be integers or None")
            }),
        }
    };
    let step = bound(step)?.unwrap_or(1);
    if step == 0 {
        return Err(Exception::value_error("slice step cannot be zero"));
    }

    let len = len as i64;
    let (lo, hi) = if step < 0 { (-1, len - 1) } else { (0, len) };
    let clamp = |v: i64| {
        if v < 0 {
            (v + len).max(lo)
        } else {
            v.min(hi)
        }
    };
    let start = bound(start)?
        .map(clamp)
        .unwrap_or(if step < 0 { hi } else { lo });
    let stop = bound(stop)?
        .map(clamp)
        .unwrap_or(if step < 0 { lo } else { hi });
    Ok((start, stop, step))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_floor_division_and_modulo_follow_sign_of_divisor() {
        assert!(matches!(int_op(BinOp::FloorDiv, -7, 2), Ok(Value::Int(-4))));
        assert!(matches!(int_op(BinOp::Mod, -7, 2), Ok(Value::Int(1))));
        assert!(matches!(int_op(BinOp::Mod, 7, -2), Ok(Value::Int(-1))));
        assert!(int_op(BinOp::Mod, 1, 0).is_err());
    }

    #[test]
    fn test_integer_overflow_is_an_error() {
        let err = int_op(BinOp::Mul, i64::MAX, 2).unwrap_err();
        assert_eq!(err.kind, ErrorKind::OverflowError);
        assert!(int_op(BinOp::Pow, 2, 64).is_err());
        assert!(matches!(int_op(BinOp::Pow, 2, 10), Ok(Value::Int(1024))));
    }

    #[test]
    fn test_slice_indices() {
        let all = |s, e, st| slice_indices(5, s, e, st).unwrap();
        assert_eq!(all(None, None, None), vec![0, 1, 2, 3, 4]);
        assert_eq!(all(Some(Value::Int(1)), Some(Value::Int(-1)), None), vec![1, 2, 3]);
        assert_eq!(all(None, None, Some(Value::Int(-1))), vec![4, 3, 2, 1, 0]);
        assert_eq!(all(None, None, Some(Value::Int(2))), vec![0, 2, 4]);
        assert_eq!(all(Some(Value::Int(10)), None, None), Vec::<usize>::new());
        assert!(slice_indices(5, None, None, Some(Value::Int(0))).is_err());
    }

    #[test]
    fn test_range_membership() {
        let range = Value::Range {
            start: 0,
            stop: 10,
            step: 3,
        };
        assert!(contains(&range, &Value::Int(9)).unwrap());
        assert!(!contains(&range, &Value::Int(4)).unwrap());
        assert!(!contains(&range, &Value::Int(12)).unwrap());
    }
}
