//! Builtin functions and methods on core types

use std::cmp::Ordering;
use std::rc::Rc;

use super::error::{ErrorKind, Exception};
use super::format::format_value;
use super::interpreter::{
    dict_insert, key_error, no_attribute, sequence_index, slice_bounds, Eval,
    Interpreter,
};
use super::value::{compare_values, values_equal, Builtin, DictItems, SetItems, Value};

type Kwargs = Vec<(String, Value)>;

const STR_METHODS: &[&str] = &[
    "upper", "lower", "strip", "lstrip", "rstrip", "split", "splitlines", "join", "replace",
    "startswith", "endswith", "find", "rfind", "index", "count", "format", "title",
    "capitalize", "isdigit", "isalpha", "isalnum", "isspace", "isupper", "islower", "zfill",
    "center", "ljust", "rjust", "partition",
];
const LIST_METHODS: &[&str] = &[
    "append", "extend", "insert", "pop", "remove", "index", "count", "sort", "reverse", "copy",
    "clear",
];
const DICT_METHODS: &[&str] = &[
    "keys", "values", "items", "get", "pop", "popitem", "update", "setdefault", "copy", "clear",
];
const SET_METHODS: &[&str] = &[
    "add", "remove", "discard", "pop", "union", "intersection", "difference", "issubset",
    "issuperset", "update", "copy", "clear",
];
const TUPLE_METHODS: &[&str] = &["count", "index"];
const FLOAT_METHODS: &[&str] = &["is_integer"];

/// Method names reachable through attribute access on `value`.
pub(super) fn method_names(value: &Value) -> &'static [&'static str] {
    match value {
        Value::Str(_) => STR_METHODS,
        Value::List(_) => LIST_METHODS,
        Value::Dict(_) => DICT_METHODS,
        Value::Set(_) => SET_METHODS,
        Value::Tuple(_) => TUPLE_METHODS,
        Value::Float(_) => FLOAT_METHODS,
        _ => &[],
    }
}

fn arity(name: &str, args: &[Value], min: usize, max: usize) -> Result<(), Exception> {
    let given = args.len();
    if given >= min && given <= max {
        return Ok(());
    }
    let (qualifier, count) = if min == max {
        ("exactly", min)
    } else if given < min {
        ("at least", min)
    } else {
        ("at most", max)
    };
    Err(Exception::type_error(format!(
        "{}() takes {} {} argument{} ({} given)",
        name,
        qualifier,
        count,
        if count == 1 { "" } else { "s" },
        given
    )))
}

fn take_kwarg(kwargs: &mut Kwargs, name: &str) -> Option<Value> {
    let idx = kwargs.iter().position(|(k, _)| k == name)?;
    Some(kwargs.remove(idx).1)
}

fn no_kwargs(name: &str, kwargs: &Kwargs) -> Result<(), Exception> {
    match kwargs.first() {
        Some((key, _)) => Err(Exception::type_error(format!(
            "{}() got an unexpected keyword argument '{}'",
            name, key
        ))),
        None => Ok(()),
    }
}

fn expect_str<'a>(value: &'a Value, what: &str) -> Result<&'a str, Exception> {
    match value {
        Value::Str(s) => Ok(s),
        other => Err(Exception::type_error(format!(
            "{} must be str, not {}",
            what,
            other.type_name()
        ))),
    }
}

fn expect_int(value: &Value, what: &str) -> Result<i64, Exception> {
    value.as_int().ok_or_else(|| {
        Exception::type_error(format!(
            "{} must be an integer, not {}",
            what,
            value.type_name()
        ))
    })
}

/// Optional argument that treats an explicit `None` as absent.
fn optional(args: &[Value], idx: usize) -> Option<&Value> {
    args.get(idx).filter(|v| !matches!(v, Value::None))
}

impl Interpreter {
    pub(super) fn call_builtin(&mut self, builtin: Builtin, args: Vec<Value>, mut kwargs: Kwargs) -> Eval {
        let name = builtin.name();
        match builtin {
            Builtin::Print => {
                let sep = take_kwarg(&mut kwargs, "sep");
                let end = take_kwarg(&mut kwargs, "end");
                take_kwarg(&mut kwargs, "flush");
                no_kwargs(name, &kwargs)?;
                let sep = match &sep {
                    None | Some(Value::None) => " ".to_string(),
                    Some(v) => expect_str(v, "sep")?.to_string(),
                };
                let end = match &end {
                    None | Some(Value::None) => "\n".to_string(),
                    Some(v) => expect_str(v, "end")?.to_string(),
                };
                let mut line = args
                    .iter()
                    .map(Value::to_str)
                    .collect::<Vec<_>>()
                    .join(&sep);
                line.push_str(&end);
                self.write_stdout(&line);
                Ok(Value::None)
            }
            Builtin::Len => {
                no_kwargs(name, &kwargs)?;
                arity(name, &args, 1, 1)?;
                let len = match &args[0] {
                    Value::Str(s) => s.chars().count(),
                    Value::List(items) => items.borrow().len(),
                    Value::Tuple(items) => items.len(),
                    Value::Dict(items) => items.borrow().len(),
                    Value::Set(items) => items.borrow().len(),
                    Value::Range { start, stop, step } => {
                        super::value::range_len(*start, *stop, *step)?
                    }
                    other => {
                        return Err(Exception::type_error(format!(
                            "object of type '{}' has no len()",
                            other.type_name()
                        )))
                    }
                };
                Ok(Value::Int(len as i64))
            }
            Builtin::Str => {
                no_kwargs(name, &kwargs)?;
                arity(name, &args, 0, 1)?;
                Ok(match args.first() {
                    Some(value) => Value::str(value.to_str()),
                    None => Value::str(""),
                })
            }
            Builtin::Int => {
                let base = take_kwarg(&mut kwargs, "base");
                no_kwargs(name, &kwargs)?;
                arity(name, &args, 0, 2)?;
                let base = args.get(1).cloned().or(base);
                to_int(args.first(), base.as_ref())
            }
            Builtin::Float => {
                no_kwargs(name, &kwargs)?;
                arity(name, &args, 0, 1)?;
                to_float(args.first())
            }
            Builtin::Bool => {
                no_kwargs(name, &kwargs)?;
                arity(name, &args, 0, 1)?;
                Ok(Value::Bool(args.first().is_some_and(Value::truthy)))
            }
            Builtin::List => {
                no_kwargs(name, &kwargs)?;
                arity(name, &args, 0, 1)?;
                let items = match args.first() {
                    Some(value) => self.collect(value)?,
                    None => Vec::new(),
                };
                Ok(Value::list(items))
            }
            Builtin::Tuple => {
                no_kwargs(name, &kwargs)?;
                arity(name, &args, 0, 1)?;
                let items = match args.first() {
                    Some(value) => self.collect(value)?,
                    None => Vec::new(),
                };
                Ok(Value::tuple(items))
            }
            Builtin::Set => {
                no_kwargs(name, &kwargs)?;
                arity(name, &args, 0, 1)?;
                let mut items = SetItems::new();
                if let Some(value) = args.first() {
                    for item in self.collect(value)? {
                        items.entry(item.to_key()?).or_insert(item);
                    }
                }
                Ok(Value::set(items))
            }
            Builtin::Dict => {
                arity(name, &args, 0, 1)?;
                let mut items = DictItems::new();
                if let Some(source) = args.first() {
                    self.merge_into(&mut items, source)?;
                }
                for (key, value) in kwargs {
                    dict_insert(&mut items, Value::str(key), value)?;
                }
                Ok(Value::dict(items))
            }
            Builtin::Range => {
                no_kwargs(name, &kwargs)?;
                arity(name, &args, 1, 3)?;
                let ints = args
                    .iter()
                    .map(|a| {
                        a.as_int().ok_or_else(|| {
                            Exception::type_error(format!(
                                "'{}' object cannot be interpreted as an integer",
                                a.type_name()
                            ))
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                let (start, stop, step) = match ints.as_slice() {
                    [stop] => (0, *stop, 1),
                    [start, stop] => (*start, *stop, 1),
                    [start, stop, step] => (*start, *stop, *step),
                    _ => (0, 0, 1),
                };
                if step == 0 {
                    return Err(Exception::value_error("range() arg 3 must not be zero"));
                }
                Ok(Value::Range { start, stop, step })
            }
            Builtin::Enumerate => {
                let start_kw = take_kwarg(&mut kwargs, "start");
                no_kwargs(name, &kwargs)?;
                arity(name, &args, 1, 2)?;
                let start = match args.get(1).or(start_kw.as_ref()) {
                    Some(v) => expect_int(v, "start")?,
                    None => 0,
                };
                let items = self.collect(&args[0])?;
                let mut out = Vec::with_capacity(items.len());
                for (i, item) in items.into_iter().enumerate() {
                    let idx = start.checked_add(i as i64).ok_or_else(Exception::overflow)?;
                    out.push(Value::tuple(vec![Value::Int(idx), item]));
                }
                Ok(Value::list(out))
            }
            Builtin::Zip => {
                no_kwargs(name, &kwargs)?;
                let columns = self.zip_columns(&args)?;
                Ok(Value::list(columns.into_iter().map(Value::tuple).collect()))
            }
            Builtin::Map => {
                no_kwargs(name, &kwargs)?;
                arity(name, &args, 2, usize::MAX)?;
                let func = args[0].clone();
                let rows = self.zip_columns(&args[1..])?;
                let mut out = Vec::with_capacity(rows.len());
                for row in rows {
                    out.push(self.call(func.clone(), row, Vec::new())?);
                }
                Ok(Value::list(out))
            }
            Builtin::Filter => {
                no_kwargs(name, &kwargs)?;
                arity(name, &args, 2, 2)?;
                let mut out = Vec::new();
                for item in self.collect(&args[1])? {
                    let keep = match &args[0] {
                        Value::None => item.truthy(),
                        func => self.call(func.clone(), vec![item.clone()], Vec::new())?.truthy(),
                    };
                    if keep {
                        out.push(item);
                    }
                }
                Ok(Value::list(out))
            }
            Builtin::Reversed => {
                no_kwargs(name, &kwargs)?;
                arity(name, &args, 1, 1)?;
                if matches!(args[0], Value::Dict(_) | Value::Set(_)) {
                    return Err(Exception::type_error(format!(
                        "'{}' object is not reversible",
                        args[0].type_name()
                    )));
                }
                let mut items = self.collect(&args[0])?;
                items.reverse();
                Ok(Value::list(items))
            }
            Builtin::Sorted => {
                let key = take_kwarg(&mut kwargs, "key");
                let reverse = take_kwarg(&mut kwargs, "reverse").is_some_and(|v| v.truthy());
                no_kwargs(name, &kwargs)?;
                arity(name, &args, 1, 1)?;
                let items = self.collect(&args[0])?;
                Ok(Value::list(self.sort_values(items, key, reverse)?))
            }
            Builtin::Sum => {
                let start_kw = take_kwarg(&mut kwargs, "start");
                no_kwargs(name, &kwargs)?;
                arity(name, &args, 1, 2)?;
                let mut total = args.get(1).cloned().or(start_kw).unwrap_or(Value::Int(0));
                if let Value::Str(_) = total {
                    return Err(Exception::type_error(
                        "sum() can't sum strings [use ''.join(seq) instead]",
                    ));
                }
                for item in self.iterate(&args[0])? {
                    self.tick()?;
                    total = self.binary(super::ast::BinOp::Add, total, item)?;
                }
                Ok(total)
            }
            Builtin::Max => self.extreme(name, args, kwargs, Ordering::Greater),
            Builtin::Min => self.extreme(name, args, kwargs, Ordering::Less),
            Builtin::Abs => {
                no_kwargs(name, &kwargs)?;
                arity(name, &args, 1, 1)?;
                match &args[0] {
                    Value::Float(f) => Ok(Value::Float(f.abs())),
                    v => match v.as_int() {
                        Some(i) => i.checked_abs().map(Value::Int).ok_or_else(Exception::overflow),
                        None => Err(Exception::type_error(format!(
                            "bad operand type for abs(): '{}'",
                            v.type_name()
                        ))),
                    },
                }
            }
            Builtin::Round => {
                let ndigits_kw = take_kwarg(&mut kwargs, "ndigits");
                no_kwargs(name, &kwargs)?;
                arity(name, &args, 1, 2)?;
                let ndigits = match args.get(1).or(ndigits_kw.as_ref()) {
                    None | Some(Value::None) => None,
                    Some(v) => Some(expect_int(v, "ndigits")?),
                };
                round(&args[0], ndigits)
            }
            Builtin::Any | Builtin::All => {
                no_kwargs(name, &kwargs)?;
                arity(name, &args, 1, 1)?;
                let want = builtin == Builtin::Any;
                for item in self.iterate(&args[0])? {
                    self.tick()?;
                    if item.truthy() == want {
                        return Ok(Value::Bool(want));
                    }
                }
                Ok(Value::Bool(!want))
            }
            Builtin::Type => {
                no_kwargs(name, &kwargs)?;
                arity(name, &args, 1, 1)?;
                Ok(type_of(&args[0]))
            }
            Builtin::Isinstance => {
                no_kwargs(name, &kwargs)?;
                arity(name, &args, 2, 2)?;
                is_instance(&args[0], &args[1]).map(Value::Bool)
            }
            Builtin::Hasattr => {
                no_kwargs(name, &kwargs)?;
                arity(name, &args, 2, 2)?;
                let attr = expect_str(&args[1], "attribute name")?;
                Ok(Value::Bool(self.get_attribute(args[0].clone(), attr).is_ok()))
            }
            Builtin::Getattr => {
                no_kwargs(name, &kwargs)?;
                arity(name, &args, 2, 3)?;
                let attr = expect_str(&args[1], "attribute name")?;
                match self.get_attribute(args[0].clone(), attr) {
                    Err(e) if e.kind == ErrorKind::AttributeError && args.len() == 3 => {
                        Ok(args[2].clone())
                    }
                    other => other,
                }
            }
            Builtin::Setattr => {
                no_kwargs(name, &kwargs)?;
                arity(name, &args, 3, 3)?;
                let attr = expect_str(&args[1], "attribute name")?;
                Err(no_attribute(&args[0], attr))
            }
        }
    }

    /// Rows of the shortest-length zip over `iterables`.
    fn zip_columns(&self, iterables: &[Value]) -> Result<Vec<Vec<Value>>, Exception> {
        let sources = iterables
            .iter()
            .map(|it| self.collect(it))
            .collect::<Result<Vec<_>, _>>()?;
        let len = sources.iter().map(Vec::len).min().unwrap_or(0);
        let mut iters: Vec<_> = sources.into_iter().map(Vec::into_iter).collect();
        let mut rows = Vec::with_capacity(len);
        for _ in 0..len {
            rows.push(iters.iter_mut().filter_map(Iterator::next).collect());
        }
        Ok(rows)
    }

    fn merge_into(&mut self, items: &mut DictItems, source: &Value) -> Result<(), Exception> {
        if let Value::Dict(other) = source {
            let pairs: Vec<_> = other.borrow().values().cloned().collect();
            for (key, value) in pairs {
                dict_insert(items, key, value)?;
            }
            return Ok(());
        }
        for (i, pair) in self.collect(source)?.into_iter().enumerate() {
            let pair = self.collect(&pair).map_err(|_| {
                Exception::type_error(format!(
                    "cannot convert dictionary update sequence element #{} to a sequence",
                    i
                ))
            })?;
            let [key, value]: [Value; 2] = pair.try_into().map_err(|p: Vec<Value>| {
                Exception::value_error(format!(
                    "dictionary update sequence element #{} has length {}; 2 is required",
                    i,
                    p.len()
                ))
            })?;
            dict_insert(items, key, value)?;
        }
        self.check_size(items.len())
    }

    /// `max` and `min`: the first item whose key sorts furthest towards `want`.
    fn extreme(&mut self, name: &str, args: Vec<Value>, mut kwargs: Kwargs, want: Ordering) -> Eval {
        let key = take_kwarg(&mut kwargs, "key").filter(|k| !matches!(k, Value::None));
        let default = take_kwarg(&mut kwargs, "default");
        no_kwargs(name, &kwargs)?;
        arity(name, &args, 1, usize::MAX)?;
        let candidates = if args.len() == 1 {
            self.collect(&args[0])?
        } else {
            if default.is_some() {
                return Err(Exception::type_error(format!(
                    "Cannot specify a default for {}() with multiple positional arguments",
                    name
                )));
            }
            args
        };

        let mut best: Option<(Value, Value)> = None;
        for item in candidates {
            self.tick()?;
            let rank = match &key {
                Some(func) => self.call(func.clone(), vec![item.clone()], Vec::new())?,
                None => item.clone(),
            };
            let better = match &best {
                None => true,
                Some((_, best_rank)) => compare_values(&rank, best_rank)? == Some(want),
            };
            if better {
                best = Some((item, rank));
            }
        }
        match (best, default) {
            (Some((item, _)), _) => Ok(item),
            (None, Some(default)) => Ok(default),
            (None, None) => Err(Exception::value_error(format!(
                "{}() arg is an empty sequence",
                name
            ))),
        }
    }

    /// Stable merge sort with a fallible comparison. Keys are computed once
    /// per item before sorting.
    pub(super) fn sort_values(
        &mut self,
        items: Vec<Value>,
        key: Option<Value>,
        reverse: bool,
    ) -> Result<Vec<Value>, Exception> {
        let mut ranked = Vec::with_capacity(items.len());
        for item in items {
            let rank = match &key {
                Some(func) if !matches!(func, Value::None) => {
                    self.call(func.clone(), vec![item.clone()], Vec::new())?
                }
                _ => item.clone(),
            };
            ranked.push((rank, item));
        }
        let sorted = merge_sort(ranked, &|a: &Value, b: &Value| -> Result<bool, Exception> {
            let (a, b) = if reverse { (b, a) } else { (a, b) };
            Ok(compare_values(a, b)? == Some(Ordering::Less))
        })?;
        Ok(sorted.into_iter().map(|(_, item)| item).collect())
    }

    pub(super) fn call_method(&mut self, receiver: Value, name: &str, args: Vec<Value>, kwargs: Kwargs) -> Eval {
        if !method_names(&receiver).iter().any(|m| *m == name) {
            return match self.get_attribute(receiver, name) {
                Ok(attr) => self.call(attr, args, kwargs),
                Err(e) => Err(e),
            };
        }
        self.tick()?;
        match &receiver {
            Value::Str(s) => self.str_method(s, name, args, kwargs),
            Value::List(_) => self.list_method(&receiver, name, args, kwargs),
            Value::Dict(_) => self.dict_method(&receiver, name, args, kwargs),
            Value::Set(_) => self.set_method(&receiver, name, args, kwargs),
            Value::Tuple(items) => {
                no_kwargs(&format!("tuple.{}", name), &kwargs)?;
                arity(&format!("tuple.{}", name), &args, 1, 1)?;
                sequence_search(items, &args[0], name, "tuple")
            }
            Value::Float(f) => {
                arity("float.is_integer", &args, 0, 0)?;
                Ok(Value::Bool(f.is_finite() && f.fract() == 0.0))
            }
            other => Err(no_attribute(other, name)),
        }
    }

    fn str_method(&mut self, s: &Rc<str>, name: &str, args: Vec<Value>, mut kwargs: Kwargs) -> Eval {
        let qualified = format!("str.{}", name);
        if name == "format" {
            return Ok(Value::str(str_format(
                s,
                &args,
                &kwargs,
                self.collection_limit(),
            )?));
        }
        let maxsplit_kw = take_kwarg(&mut kwargs, "maxsplit");
        let sep_kw = take_kwarg(&mut kwargs, "sep");
        no_kwargs(&qualified, &kwargs)?;

        match name {
            "upper" | "lower" | "title" | "capitalize" | "splitlines" => {
                arity(&qualified, &args, 0, 0)?;
                Ok(match name {
                    "upper" => Value::str(s.to_uppercase()),
                    "lower" => Value::str(s.to_lowercase()),
                    "title" => Value::str(title_case(s)),
                    "capitalize" => {
                        let mut chars = s.chars();
                        let text = match chars.next() {
                            Some(first) => first
                                .to_uppercase()
                                .chain(chars.as_str().to_lowercase().chars())
                                .collect(),
                            None => String::new(),
                        };
                        Value::str(text)
                    }
                    _ => Value::list(s.lines().map(|l| Value::str(l)).collect()),
                })
            }
            "strip" | "lstrip" | "rstrip" => {
                arity(&qualified, &args, 0, 1)?;
                let chars: Option<Vec<char>> = match optional(&args, 0) {
                    Some(v) => Some(expect_str(v, "strip arg")?.chars().collect()),
                    None => None,
                };
                let strip = |c: char| match &chars {
                    Some(set) => set.contains(&c),
                    None => c.is_whitespace(),
                };
                let text = match name {
                    "strip" => s.trim_matches(strip),
                    "lstrip" => s.trim_start_matches(strip),
                    _ => s.trim_end_matches(strip),
                };
                Ok(Value::str(text))
            }
            "split" => {
                arity(&qualified, &args, 0, 2)?;
                let sep = args.first().cloned().or(sep_kw);
                let maxsplit = match args.get(1).or(maxsplit_kw.as_ref()) {
                    Some(v) => expect_int(v, "maxsplit")?,
                    None => -1,
                };
                let parts = match sep {
                    None | Some(Value::None) => split_whitespace(s, maxsplit),
                    Some(sep) => {
                        let sep = expect_str(&sep, "separator")?;
                        if sep.is_empty() {
                            return Err(Exception::value_error("empty separator"));
                        }
                        if maxsplit < 0 {
                            s.split(sep).map(String::from).collect()
                        } else {
                            let limit = usize::try_from(maxsplit).unwrap_or(usize::MAX);
                            s.splitn(limit.saturating_add(1), sep)
                                .map(String::from)
                                .collect()
                        }
                    }
                };
                self.check_size(parts.len())?;
                Ok(Value::list(parts.into_iter().map(Value::str).collect()))
            }
            "join" => {
                arity(&qualified, &args, 1, 1)?;
                let items = self.collect(&args[0])?;
                let mut pieces = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    match item {
                        Value::Str(piece) => pieces.push(piece.as_ref()),
                        other => {
                            return Err(Exception::type_error(format!(
                                "sequence item {}: expected str instance, {} found",
                                i,
                                other.type_name()
                            )))
                        }
                    }
                }
                let total = pieces.iter().map(|p| p.len()).sum::<usize>()
                    + s.len() * pieces.len().saturating_sub(1);
                self.check_size(total)?;
                Ok(Value::str(pieces.join(s)))
            }
            "replace" => {
                arity(&qualified, &args, 2, 3)?;
                let old = expect_str(&args[0], "replace() argument 1")?;
                let new = expect_str(&args[1], "replace() argument 2")?;
                let count = match args.get(2) {
                    Some(v) => expect_int(v, "count")?,
                    None => -1,
                };
                let occurrences = if old.is_empty() {
                    s.chars().count() + 1
                } else {
                    s.matches(old).count()
                };
                self.check_size(s.len() + occurrences.saturating_mul(new.len()))?;
                let text = if count < 0 {
                    s.replace(old, new)
                } else {
                    s.replacen(old, new, usize::try_from(count).unwrap_or(usize::MAX))
                };
                Ok(Value::str(text))
            }
            "startswith" | "endswith" => {
                arity(&qualified, &args, 1, 1)?;
                let candidates: Vec<Value> = match &args[0] {
                    Value::Tuple(items) => items.as_ref().clone(),
                    other => vec![other.clone()],
                };
                for candidate in &candidates {
                    let affix = expect_str(candidate, &format!("{} arg", name))?;
                    let hit = if name == "startswith" {
                        s.starts_with(affix)
                    } else {
                        s.ends_with(affix)
                    };
                    if hit {
                        return Ok(Value::Bool(true));
                    }
                }
                Ok(Value::Bool(false))
            }
            "find" | "rfind" | "index" | "count" => {
                arity(&qualified, &args, 1, 3)?;
                let needle = expect_str(&args[0], "substring")?;
                let chars: Vec<char> = s.chars().collect();
                let (from, to, _) = slice_bounds(
                    chars.len(),
                    args.get(1).cloned(),
                    args.get(2).cloned(),
                    None,
                )?;
                let (from, to) = (from as usize, to.max(from) as usize);
                let window: String = chars[from..to].iter().collect();

                if name == "count" {
                    let n = if needle.is_empty() {
                        to - from + 1
                    } else {
                        window.matches(needle).count()
                    };
                    return Ok(Value::Int(n as i64));
                }
                let found = if name == "rfind" {
                    window.rfind(needle)
                } else {
                    window.find(needle)
                };
                match found {
                    Some(byte) => Ok(Value::Int((from + window[..byte].chars().count()) as i64)),
                    None if name == "index" => Err(Exception::value_error("substring not found")),
                    None => Ok(Value::Int(-1)),
                }
            }
            "isdigit" | "isalpha" | "isalnum" | "isspace" => {
                arity(&qualified, &args, 0, 0)?;
                let test: fn(char) -> bool = match name {
                    "isdigit" => |c| c.is_ascii_digit(),
                    "isalpha" => char::is_alphabetic,
                    "isalnum" => char::is_alphanumeric,
                    _ => char::is_whitespace,
                };
                Ok(Value::Bool(!s.is_empty() && s.chars().all(test)))
            }
            "isupper" | "islower" => {
                arity(&qualified, &args, 0, 0)?;
                let cased = s.chars().any(|c| c.is_uppercase() || c.is_lowercase());
                let wrong = if name == "isupper" {
                    s.chars().any(char::is_lowercase)
                } else {
                    s.chars().any(char::is_uppercase)
                };
                Ok(Value::Bool(cased && !wrong))
            }
            "zfill" => {
                arity(&qualified, &args, 1, 1)?;
                let width = expect_int(&args[0], "width")?.max(0) as usize;
                self.check_size(width)?;
                let len = s.chars().count();
                if len >= width {
                    return Ok(Value::Str(Rc::clone(s)));
                }
                let zeros = "0".repeat(width - len);
                let text = match s.strip_prefix(|c: char| c == '+' || c == '-') {
                    Some(rest) => format!("{}{}{}", &s[..1], zeros, rest),
                    None => format!("{}{}", zeros, s),
                };
                Ok(Value::str(text))
            }
            "center" | "ljust" | "rjust" => {
                arity(&qualified, &args, 1, 2)?;
                let width = expect_int(&args[0], "width")?.max(0) as usize;
                let fill = match args.get(1) {
                    Some(v) => {
                        let fill = expect_str(v, "fill character")?;
                        let mut chars = fill.chars();
                        match (chars.next(), chars.next()) {
                            (Some(c), None) => c,
                            _ => {
                                return Err(Exception::type_error(
                                    "The fill character must be exactly one character long",
                                ))
                            }
                        }
                    }
                    None => ' ',
                };
                self.check_size(width)?;
                let len = s.chars().count();
                if len >= width {
                    return Ok(Value::Str(Rc::clone(s)));
                }
                let margin = width - len;
                let left = match name {
                    "ljust" => 0,
                    "rjust" => margin,
                    _ => margin / 2 + (margin & width & 1),
                };
                let pad = |n: usize| fill.to_string().repeat(n);
                Ok(Value::str(format!("{}{}{}", pad(left), s, pad(margin - left))))
            }
            "partition" => {
                arity(&qualified, &args, 1, 1)?;
                let sep = expect_str(&args[0], "separator")?;
                if sep.is_empty() {
                    return Err(Exception::value_error("empty separator"));
                }
                let parts = match s.split_once(sep) {
                    Some((head, tail)) => [head, sep, tail],
                    None => [&**s, "", ""],
                };
                Ok(Value::tuple(parts.into_iter().map(Value::str).collect()))
            }
            _ => Err(no_attribute(&Value::Str(Rc::clone(s)), name)),
        }
    }

    fn list_method(&mut self, receiver: &Value, name: &str, args: Vec<Value>, mut kwargs: Kwargs) -> Eval {
        let Value::List(list) = receiver else {
            return Err(no_attribute(receiver, name));
        };
        let qualified = format!("list.{}", name);
        if name == "sort" {
            let key = take_kwarg(&mut kwargs, "key");
            let reverse = take_kwarg(&mut kwargs, "reverse").is_some_and(|v| v.truthy());
            no_kwargs(&qualified, &kwargs)?;
            arity(&qualified, &args, 0, 0)?;
            let snapshot = list.borrow().clone();
            let sorted = self.sort_values(snapshot, key, reverse)?;
            *list.borrow_mut() = sorted;
            return Ok(Value::None);
        }
        no_kwargs(&qualified, &kwargs)?;

        match name {
            "append" => {
                arity(&qualified, &args, 1, 1)?;
                let len = list.borrow().len();
                self.check_size(len + 1)?;
                list.borrow_mut().extend(args);
                Ok(Value::None)
            }
            "extend" => {
                arity(&qualified, &args, 1, 1)?;
                let extra = self.collect(&args[0])?;
                let len = list.borrow().len();
                self.check_size(len + extra.len())?;
                list.borrow_mut().extend(extra);
                Ok(Value::None)
            }
            "insert" => {
                arity(&qualified, &args, 2, 2)?;
                let len = list.borrow().len();
                self.check_size(len + 1)?;
                let idx = expect_int(&args[0], "index")?;
                let idx = if idx < 0 {
                    (idx + len as i64).max(0) as usize
                } else {
                    (idx as usize).min(len)
                };
                list.borrow_mut().insert(idx, args[1].clone());
                Ok(Value::None)
            }
            "pop" => {
                arity(&qualified, &args, 0, 1)?;
                let len = list.borrow().len();
                if len == 0 {
                    return Err(Exception::index_error("pop from empty list"));
                }
                let idx = match args.first() {
                    Some(v) => sequence_index(v, len, "pop")?,
                    None => len - 1,
                };
                Ok(list.borrow_mut().remove(idx))
            }
            "remove" => {
                arity(&qualified, &args, 1, 1)?;
                let position = list.borrow().iter().position(|v| values_equal(v, &args[0]));
                match position {
                    Some(idx) => {
                        list.borrow_mut().remove(idx);
                        Ok(Value::None)
                    }
                    None => Err(Exception::value_error("list.remove(x): x not in list")),
                }
            }
            "index" | "count" => {
                arity(&qualified, &args, 1, 1)?;
                let snapshot = list.borrow().clone();
                sequence_search(&snapshot, &args[0], name, "list")
            }
            "reverse" => {
                arity(&qualified, &args, 0, 0)?;
                list.borrow_mut().reverse();
                Ok(Value::None)
            }
            "copy" => {
                arity(&qualified, &args, 0, 0)?;
                let copy = list.borrow().clone();
                Ok(Value::list(copy))
            }
            "clear" => {
                arity(&qualified, &args, 0, 0)?;
                let old = std::mem::take(&mut *list.borrow_mut());
                drop(old);
                Ok(Value::None)
            }
            _ => Err(no_attribute(receiver, name)),
        }
    }

    fn dict_method(&mut self, receiver: &Value, name: &str, args: Vec<Value>, kwargs: Kwargs) -> Eval {
        let Value::Dict(dict) = receiver else {
            return Err(no_attribute(receiver, name));
        };
        let qualified = format!("dict.{}", name);
        if name != "update" {
            no_kwargs(&qualified, &kwargs)?;
        }

        match name {
            "keys" | "values" | "items" => {
                arity(&qualified, &args, 0, 0)?;
                let dict = dict.borrow();
                let items = dict.values().map(|(key, value)| match name {
                    "keys" => key.clone(),
                    "values" => value.clone(),
                    _ => Value::tuple(vec![key.clone(), value.clone()]),
                });
                Ok(Value::list(items.collect()))
            }
            "get" => {
                arity(&qualified, &args, 1, 2)?;
                let key = args[0].to_key()?;
                let found = dict.borrow().get(&key).map(|(_, v)| v.clone());
                Ok(found.or_else(|| args.get(1).cloned()).unwrap_or(Value::None))
            }
            "pop" => {
                arity(&qualified, &args, 1, 2)?;
                let key = args[0].to_key()?;
                let removed = dict.borrow_mut().shift_remove(&key);
                match (removed, args.get(1)) {
                    (Some((_, value)), _) => Ok(value),
                    (None, Some(default)) => Ok(default.clone()),
                    (None, None) => Err(key_error(&args[0])),
                }
            }
            "popitem" => {
                arity(&qualified, &args, 0, 0)?;
                let last = dict.borrow_mut().pop();
                match last {
                    Some((_, (key, value))) => Ok(Value::tuple(vec![key, value])),
                    None => Err(Exception::new(
                        ErrorKind::KeyError,
                        "'popitem(): dictionary is empty'",
                    )),
                }
            }
            "update" => {
                arity(&qualified, &args, 0, 1)?;
                let mut merged = dict.borrow().clone();
                if let Some(source) = args.first() {
                    self.merge_into(&mut merged, source)?;
                }
                for (key, value) in kwargs {
                    dict_insert(&mut merged, Value::str(key), value)?;
                }
                self.check_size(merged.len())?;
                *dict.borrow_mut() = merged;
                Ok(Value::None)
            }
            "setdefault" => {
                arity(&qualified, &args, 1, 2)?;
                let key = args[0].to_key()?;
                if let Some((_, value)) = dict.borrow().get(&key) {
                    return Ok(value.clone());
                }
                let default = args.get(1).cloned().unwrap_or(Value::None);
                let len = dict.borrow().len();
                self.check_size(len + 1)?;
                dict.borrow_mut()
                    .insert(key, (args[0].clone(), default.clone()));
                Ok(default)
            }
            "copy" => {
                arity(&qualified, &args, 0, 0)?;
                let copy = dict.borrow().clone();
                Ok(Value::dict(copy))
            }
            "clear" => {
                arity(&qualified, &args, 0, 0)?;
                let old = std::mem::take(&mut *dict.borrow_mut());
                drop(old);
                Ok(Value::None)
            }
            _ => Err(no_attribute(receiver, name)),
        }
    }

    fn set_method(&mut self, receiver: &Value, name: &str, args: Vec<Value>, kwargs: Kwargs) -> Eval {
        let Value::Set(set) = receiver else {
            return Err(no_attribute(receiver, name));
        };
        let qualified = format!("set.{}", name);
        no_kwargs(&qualified, &kwargs)?;

        match name {
            "add" => {
                arity(&qualified, &args, 1, 1)?;
                let key = args[0].to_key()?;
                let len = set.borrow().len();
                self.check_size(len + 1)?;
                set.borrow_mut().entry(key).or_insert_with(|| args[0].clone());
                Ok(Value::None)
            }
            "remove" | "discard" => {
                arity(&qualified, &args, 1, 1)?;
                let key = args[0].to_key()?;
                let removed = set.borrow_mut().shift_remove(&key);
                if removed.is_none() && name == "remove" {
                    return Err(key_error(&args[0]));
                }
                Ok(Value::None)
            }
            "pop" => {
                arity(&qualified, &args, 0, 0)?;
                let first = set.borrow_mut().shift_remove_index(0);
                first
                    .map(|(_, value)| value)
                    .ok_or_else(|| Exception::new(ErrorKind::KeyError, "'pop from an empty set'"))
            }
            "union" | "update" | "intersection" | "difference" => {
                let mut result = set.borrow().clone();
                for other in &args {
                    let other = self.set_items(other)?;
                    match name {
                        "intersection" => result.retain(|k, _| other.contains_key(k)),
                        "difference" => result.retain(|k, _| !other.contains_key(k)),
                        _ => {
                            for (k, v) in other {
                                result.entry(k).or_insert(v);
                            }
                        }
                    }
                }
                self.check_size(result.len())?;
                if name == "update" {
                    *set.borrow_mut() = result;
                    return Ok(Value::None);
                }
                Ok(Value::set(result))
            }
            "issubset" | "issuperset" => {
                arity(&qualified, &args, 1, 1)?;
                let other = self.set_items(&args[0])?;
                let mine = set.borrow();
                let answer = if name == "issubset" {
                    mine.keys().all(|k| other.contains_key(k))
                } else {
                    other.keys().all(|k| mine.contains_key(k))
                };
                Ok(Value::Bool(answer))
            }
            "copy" => {
                arity(&qualified, &args, 0, 0)?;
                let copy = set.borrow().clone();
                Ok(Value::set(copy))
            }
            "clear" => {
                arity(&qualified, &args, 0, 0)?;
                let old = std::mem::take(&mut *set.borrow_mut());
                drop(old);
                Ok(Value::None)
            }
            _ => Err(no_attribute(receiver, name)),
        }
    }

    fn set_items(&self, value: &Value) -> Result<SetItems, Exception> {
        if let Value::Set(items) = value {
            return Ok(items.borrow().clone());
        }
        let mut items = SetItems::new();
        for item in self.collect(value)? {
            items.entry(item.to_key()?).or_insert(item);
        }
        Ok(items)
    }
}

fn sequence_search(items: &[Value], needle: &Value, method: &str, type_name: &str) -> Eval {
    if method == "count" {
        let n = items.iter().filter(|v| values_equal(v, needle)).count();
        return Ok(Value::Int(n as i64));
    }
    match items.iter().position(|v| values_equal(v, needle)) {
        Some(idx) => Ok(Value::Int(idx as i64)),
        None if type_name == "list" => Err(Exception::value_error(format!(
            "{} is not in list",
            needle.repr()
        ))),
        None => Err(Exception::value_error("tuple.index(x): x not in tuple")),
    }
}

type Less<'a> = dyn Fn(&Value, &Value) -> Result<bool, Exception> + 'a;

fn merge_sort(mut items: Vec<(Value, Value)>, less: &Less) -> Result<Vec<(Value, Value)>, Exception> {
    if items.len() <= 1 {
        return Ok(items);
    }
    let right = items.split_off(items.len() / 2);
    let left = merge_sort(items, less)?;
    let right = merge_sort(right, less)?;

    let mut merged = Vec::with_capacity(left.len() + right.len());
    let mut left = left.into_iter().peekable();
    let mut right = right.into_iter().peekable();
    loop {
        let take_right = match (left.peek(), right.peek()) {
            (Some(l), Some(r)) => less(&r.0, &l.0)?,
            (Some(_), None) => false,
            (None, Some(_)) => true,
            (None, None) => break,
        };
        let next = if take_right { right.next() } else { left.next() };
        merged.extend(next);
    }
    Ok(merged)
}

fn split_whitespace(s: &str, maxsplit: i64) -> Vec<String> {
    let mut parts = Vec::new();
    let mut rest = s.trim_start();
    while !rest.is_empty() {
        if maxsplit >= 0 && parts.len() as i64 == maxsplit {
            parts.push(rest.to_string());
            break;
        }
        match rest.find(char::is_whitespace) {
            Some(end) => {
                parts.push(rest[..end].to_string());
                rest = rest[end..].trim_start();
            }
            None => {
                parts.push(rest.to_string());
                break;
            }
        }
    }
    parts
}

fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_word = false;
    for c in s.chars() {
        if c.is_alphabetic() {
            if in_word {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            in_word = true;
        } else {
            out.push(c);
            in_word = false;
        }
    }
    out
}

fn to_int(value: Option<&Value>, base: Option<&Value>) -> Eval {
    let Some(value) = value else {
        return Ok(Value::Int(0));
    };
    if let Some(base) = base {
        let Value::Str(text) = value else {
            return Err(Exception::type_error(
                "int() can't convert non-string with explicit base",
            ));
        };
        let base = expect_int(base, "base")?;
        return parse_int(text, base);
    }
    match value {
        Value::Int(i) => Ok(Value::Int(*i)),
        Value::Bool(b) => Ok(Value::Int(*b as i64)),
        Value::Float(f) => {
            if f.is_nan() {
                return Err(Exception::value_error("cannot convert float NaN to integer"));
            }
            if f.is_infinite() {
                return Err(Exception::new(
                    ErrorKind::OverflowError,
                    "cannot convert float infinity to integer",
                ));
            }
            let truncated = f.trunc();
            if truncated.abs() >= 9.223_372_036_854_775e18 {
                return Err(Exception::overflow());
            }
            Ok(Value::Int(truncated as i64))
        }
        Value::Str(text) => parse_int(text, 10),
        other => Err(Exception::type_error(format!(
            "int() argument must be a string or a number, not '{}'",
            other.type_name()
        ))),
    }
}

fn parse_int(text: &str, base: i64) -> Eval {
    if base != 0 && !(2..=36).contains(&base) {
        return Err(Exception::value_error(
            "int() base must be >= 2 and <= 36, or 0",
        ));
    }
    let invalid = || {
        Exception::value_error(format!(
            "invalid literal for int() with base {}: {}",
            base,
            Value::str(text).repr()
        ))
    };

    let trimmed = text.trim();
    let (negative, digits) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };
    let lower = digits.to_ascii_lowercase();
    let prefixed = |p: &str| lower.strip_prefix(p).map(str::to_string);
    let (radix, body) = match base {
        0 | 16 if lower.starts_with("0x") => (16, prefixed("0x")),
        0 | 8 if lower.starts_with("0o") => (8, prefixed("0o")),
        0 | 2 if lower.starts_with("0b") => (2, prefixed("0b")),
        0 => {
            if lower.len() > 1 && lower.starts_with('0') && !lower.trim_start_matches('0').is_empty() {
                return Err(invalid());
            }
            (10, Some(lower.clone()))
        }
        b => (b as u32, Some(lower.clone())),
    };
    let body = body.ok_or_else(invalid)?;
    let body = body.strip_prefix('_').unwrap_or(&body);
    if body.is_empty() || body.starts_with('_') || body.ends_with('_') || body.contains("__") {
        return Err(invalid());
    }
    let cleaned: String = body.chars().filter(|c| *c != '_').collect();
    let magnitude = u64::from_str_radix(&cleaned, radix).map_err(|e| {
        if matches!(e.kind(), std::num::IntErrorKind::PosOverflow) {
            Exception::overflow()
        } else {
            invalid()
        }
    })?;
    let value = if negative {
        0i64.checked_sub_unsigned(magnitude)
    } else {
        i64::try_from(magnitude).ok()
    };
    value.map(Value::Int).ok_or_else(Exception::overflow)
}

fn to_float(value: Option<&Value>) -> Eval {
    match value {
        None => Ok(Value::Float(0.0)),
        Some(Value::Str(text)) => {
            let trimmed = text.trim();
            let cleaned = trimmed.replace('_', "");
            let parsed = if trimmed.contains("__") || trimmed.starts_with('_') {
                None
            } else {
                cleaned.parse::<f64>().ok()
            };
            parsed.map(Value::Float).ok_or_else(|| {
                Exception::value_error(format!(
                    "could not convert string to float: {}",
                    Value::Str(Rc::clone(text)).repr()
                ))
            })
        }
        Some(v) => v.as_float().map(Value::Float).ok_or_else(|| {
            Exception::type_error(format!(
                "float() argument must be a string or a number, not '{}'",
                v.type_name()
            ))
        }),
    }
}

fn round(value: &Value, ndigits: Option<i64>) -> Eval {
    match (value, ndigits) {
        (Value::Float(f), None) => {
            if f.is_nan() {
                return Err(Exception::value_error("cannot convert float NaN to integer"));
            }
            if f.is_infinite() {
                return Err(Exception::new(
                    ErrorKind::OverflowError,
                    "cannot convert float infinity to integer",
                ));
            }
            to_int(Some(&Value::Float(f.round_ties_even())), None)
        }
        (Value::Float(f), Some(n)) => {
            if !f.is_finite() || n > 308 {
                return Ok(Value::Float(*f));
            }
            if n >= 0 {
                // Decimal formatting rounds the exact binary value.
                let text = format!("{:.*}", n as usize, f);
                return text
                    .parse()
                    .map(Value::Float)
                    .map_err(|_| Exception::value_error("could not round float"));
            }
            let scale = 10f64.powi(n.max(-308).unsigned_abs() as i32);
            Ok(Value::Float((f / scale).round_ties_even() * scale))
        }
        (v, n) => {
            let Some(i) = v.as_int() else {
                return Err(Exception::type_error(format!(
                    "type {} doesn't define __round__ method",
                    v.type_name()
                )));
            };
            match n {
                Some(n) if n < 0 => {
                    let Some(unit) = u32::try_from(-n).ok().and_then(|e| 10i64.checked_pow(e))
                    else {
                        return Ok(Value::Int(0));
                    };
                    let (quotient, remainder) = (i.div_euclid(unit), i.rem_euclid(unit));
                    let twice = remainder.saturating_mul(2);
                    let up = twice > unit || (twice == unit && quotient % 2 != 0);
                    let rounded = if up { quotient + 1 } else { quotient };
                    rounded
                        .checked_mul(unit)
                        .map(Value::Int)
                        .ok_or_else(Exception::overflow)
                }
                _ => Ok(Value::Int(i)),
            }
        }
    }
}

pub(super) fn type_of(value: &Value) -> Value {
    match value {
        Value::Bool(_) => Value::Builtin(Builtin::Bool),
        Value::Int(_) => Value::Builtin(Builtin::Int),
        Value::Float(_) => Value::Builtin(Builtin::Float),
        Value::Str(_) => Value::Builtin(Builtin::Str),
        Value::List(_) => Value::Builtin(Builtin::List),
        Value::Tuple(_) => Value::Builtin(Builtin::Tuple),
        Value::Dict(_) => Value::Builtin(Builtin::Dict),
        Value::Set(_) => Value::Builtin(Builtin::Set),
        Value::Range { .. } => Value::Builtin(Builtin::Range),
        Value::Exception(exc) => Value::ExceptionType(exc.kind),
        other => Value::Type(other.type_name()),
    }
}

fn is_instance(value: &Value, class: &Value) -> Result<bool, Exception> {
    match class {
        Value::Tuple(classes) => {
            for class in classes.iter() {
                if is_instance(value, class)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Value::Builtin(Builtin::Int) => Ok(matches!(value, Value::Int(_) | Value::Bool(_))),
        Value::Builtin(b) if b.is_type() => Ok(value.type_name() == b.name()),
        Value::ExceptionType(kind) => {
            Ok(matches!(value, Value::Exception(exc) if exc.kind.matches(*kind)))
        }
        Value::Type(name) => Ok(value.type_name() == *name),
        _ => Err(Exception::type_error(
            "isinstance() arg 2 must be a type or tuple of types",
        )),
    }
}

/// `str.format` with positional, numbered and keyword fields.
pub(super) fn str_format(
    template: &str,
    args: &[Value],
    kwargs: &[(String, Value)],
    limit: usize,
) -> Result<String, Exception> {
    let mut out = String::new();
    let mut chars = template.chars().peekable();
    let mut auto_index = 0usize;
    let mut manual = false;
    let mut automatic = false;

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '}' => {
                return Err(Exception::value_error(
                    "Single '}' encountered in format string",
                ))
            }
            '{' => {
                let mut field = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some('{') => {
                            return Err(Exception::value_error(
                                "nested replacement fields are not supported",
                            ))
                        }
                        Some(c) => field.push(c),
                        None => {
                            return Err(Exception::value_error(
                                "expected '}' before end of string",
                            ))
                        }
                    }
                }
                let (head, spec) = match field.split_once(':') {
                    Some((head, spec)) => (head, spec),
                    None => (field.as_str(), ""),
                };
                let (name, conversion) = match head.split_once('!') {
                    Some((name, conv)) => (name, Some(conv)),
                    None => (head, None),
                };

                let value = if name.is_empty() {
                    if manual {
                        return Err(Exception::value_error(
                            "cannot switch from manual field specification to automatic field numbering",
                        ));
                    }
                    automatic = true;
                    let idx = auto_index;
                    auto_index += 1;
                    positional(args, idx)?
                } else if let Ok(idx) = name.parse::<usize>() {
                    if automatic {
                        return Err(Exception::value_error(
                            "cannot switch from automatic field numbering to manual field specification",
                        ));
                    }
                    manual = true;
                    positional(args, idx)?
                } else {
                    kwargs
                        .iter()
                        .find(|(k, _)| k == name)
                        .map(|(_, v)| v.clone())
                        .ok_or_else(|| key_error(&Value::str(name)))?
                };

                let value = match conversion {
                    None => value,
                    Some("r") => Value::str(value.repr()),
                    Some("s") => Value::str(value.to_str()),
                    Some(other) => {
                        return Err(Exception::value_error(format!(
                            "Unknown conversion specifier {}",
                            other
                        )))
                    }
                };
                out.push_str(&format_value(&value, spec, limit)?);
            }
            c => out.push(c),
        }
    }
    Ok(out)
}

fn positional(args: &[Value], idx: usize) -> Result<Value, Exception> {
    args.get(idx).cloned().ok_or_else(|| {
        Exception::index_error(format!(
            "Replacement index {} out of range for positional args tuple",
            idx
        ))
    })
}
