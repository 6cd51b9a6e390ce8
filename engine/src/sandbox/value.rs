//! Runtime values of the snippet interpreter

use indexmap::IndexMap;
use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::rc::Rc;

use super::ast::FunctionDef;
use super::error::{ErrorKind, Exception};

/// Containers nested deeper than this render as `...`.
const MAX_RENDER_DEPTH: usize = 64;

/// Dictionary entries keep the original key value next to its hash key.
pub type DictItems = IndexMap<Key, (Value, Value)>;
pub type SetItems = IndexMap<Key, Value>;

#[derive(Debug, Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    List(Rc<RefCell<Vec<Value>>>),
    Tuple(Rc<Vec<Value>>),
    Dict(Rc<RefCell<DictItems>>),
    Set(Rc<RefCell<SetItems>>),
    Range { start: i64, stop: i64, step: i64 },
    Function(Rc<Closure>),
    Builtin(Builtin),
    Method(Rc<BoundMethod>),
    /// Exception class, e.g. `ValueError`
    ExceptionType(ErrorKind),
    Exception(Rc<Exception>),
    /// Type object without a constructor, e.g. `type(None)`
    Type(&'static str),
}

/// Hashable projection of a value. Numerically equal keys collapse, so
/// `1`, `1.0` and `True` address the same slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    None,
    Int(i64),
    Float(u64),
    Str(Rc<str>),
    Tuple(Vec<Key>),
    Function(usize),
    Builtin(Builtin),
    ExceptionType(ErrorKind),
}

/// A user-defined function together with the scope it closes over.
#[derive(Debug)]
pub struct Closure {
    pub def: Rc<FunctionDef>,
    pub scope: Rc<Scope>,
    pub defaults: Vec<Option<Value>>,
}

#[derive(Debug)]
pub struct BoundMethod {
    pub receiver: Value,
    pub name: String,
}

/// Lexical scope with a parent chain.
#[derive(Debug, Default)]
pub struct Scope {
    vars: RefCell<HashMap<String, Value>>,
    parent: Option<Rc<Scope>>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_parent(parent: Rc<Scope>) -> Self {
        Self {
            vars: RefCell::new(HashMap::new()),
            parent: Some(parent),
        }
    }

    pub fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.vars.borrow().get(name) {
            return Some(value.clone());
        }
        self.parent.as_ref().and_then(|p| p.lookup(name))
    }

    pub fn define(&self, name: &str, value: Value) {
        self.vars.borrow_mut().insert(name.to_string(), value);
    }

    pub fn remove(&self, name: &str) -> Option<Value> {
        self.vars.borrow_mut().remove(name)
    }

    /// Drops every binding. Closures stored in a scope keep that scope
    /// alive, so a finished run clears its globals to break the cycle.
    pub fn clear(&self) {
        let vars = std::mem::take(&mut *self.vars.borrow_mut());
        drop(vars);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    Print,
    Len,
    Str,
    Int,
    Float,
    Bool,
    List,
    Dict,
    Tuple,
    Set,
    Range,
    Enumerate,
    Zip,
    Map,
    Filter,
    Reversed,
    Sorted,
    Sum,
    Max,
    Min,
    Abs,
    Round,
    Any,
    All,
    Type,
    Isinstance,
    Hasattr,
    Getattr,
    Setattr,
}

impl Builtin {
    pub const ALL: &'static [Builtin] = &[
        Builtin::Print,
        Builtin::Len,
        Builtin::Str,
        Builtin::Int,
        Builtin::Float,
        Builtin::Bool,
        Builtin::List,
        Builtin::Dict,
        Builtin::Tuple,
        Builtin::Set,
        Builtin::Range,
        Builtin::Enumerate,
        Builtin::Zip,
        Builtin::Map,
        Builtin::Filter,
        Builtin::Reversed,
        Builtin::Sorted,
        Builtin::Sum,
        Builtin::Max,
        Builtin::Min,
        Builtin::Abs,
        Builtin::Round,
        Builtin::Any,
        Builtin::All,
        Builtin::Type,
        Builtin::Isinstance,
        Builtin::Hasattr,
        Builtin::Getattr,
        Builtin::Setattr,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Builtin::Print => "print",
            Builtin::Len => "len",
            Builtin::Str => "str",
            Builtin::Int => "int",
            Builtin::Float => "float",
            Builtin::Bool => "bool",
            Builtin::List => "list",
            Builtin::Dict => "dict",
            Builtin::Tuple => "tuple",
            Builtin::Set => "set",
            Builtin::Range => "range",
            Builtin::Enumerate => "enumerate",
            Builtin::Zip => "zip",
            Builtin::Map => "map",
            Builtin::Filter => "filter",
            Builtin::Reversed => "reversed",
            Builtin::Sorted => "sorted",
            Builtin::Sum => "sum",
            Builtin::Max => "max",
            Builtin::Min => "min",
            Builtin::Abs => "abs",
            Builtin::Round => "round",
            Builtin::Any => "any",
            Builtin::All => "all",
            Builtin::Type => "type",
            Builtin::Isinstance => "isinstance",
            Builtin::Hasattr => "hasattr",
            Builtin::Getattr => "getattr",
            Builtin::Setattr => "setattr",
        }
    }

    /// Builtins that double as type objects for `type()` and `isinstance()`.
    pub fn is_type(&self) -> bool {
        matches!(
            self,
            Builtin::Str
                | Builtin::Int
                | Builtin::Float
                | Builtin::Bool
                | Builtin::List
                | Builtin::Dict
                | Builtin::Tuple
                | Builtin::Set
                | Builtin::Range
        )
    }
}

impl Value {
    pub fn str(s: impl Into<Rc<str>>) -> Value {
        Value::Str(s.into())
    }

    pub fn list(items: Vec<Value>) -> Value {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn tuple(items: Vec<Value>) -> Value {
        Value::Tuple(Rc::new(items))
    }

    pub fn dict(items: DictItems) -> Value {
        Value::Dict(Rc::new(RefCell::new(items)))
    }

    pub fn set(items: SetItems) -> Value {
        Value::Set(Rc::new(RefCell::new(items)))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Dict(_) => "dict",
            Value::Set(_) => "set",
            Value::Range { .. } => "range",
            Value::Function(_) => "function",
            Value::Builtin(b) if b.is_type() => "type",
            Value::Builtin(_) => "builtin_function_or_method",
            Value::Method(_) => "builtin_function_or_method",
            Value::ExceptionType(_) | Value::Type(_) => "type",
            Value::Exception(exc) => exc.kind.name(),
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.borrow().is_empty(),
            Value::Tuple(items) => !items.is_empty(),
            Value::Dict(items) => !items.borrow().is_empty(),
            Value::Set(items) => !items.borrow().is_empty(),
            Value::Range { start, stop, step } => range_span(*start, *stop, *step) > 0,
            _ => true,
        }
    }

    /// Integer view of ints and bools.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    /// Float view of any numeric value.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Bool(_) | Value::Float(_))
    }

    pub fn to_key(&self) -> Result<Key, Exception> {
        Ok(match self {
            Value::None => Key::None,
            Value::Bool(b) => Key::Int(*b as i64),
            Value::Int(i) => Key::Int(*i),
            Value::Float(f) => {
                if f.fract() == 0.0 && f.abs() < 9.0e18 {
                    Key::Int(*f as i64)
                } else {
                    Key::Float(f.to_bits())
                }
            }
            Value::Str(s) => Key::Str(Rc::clone(s)),
            Value::Tuple(items) => Key::Tuple(
                items
                    .iter()
                    .map(Value::to_key)
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            Value::Function(f) => Key::Function(Rc::as_ptr(f) as usize),
            Value::Builtin(b) => Key::Builtin(*b),
            Value::ExceptionType(kind) => Key::ExceptionType(*kind),
            other => {
                return Err(Exception::type_error(format!(
                    "unhashable type: '{}'",
                    other.type_name()
                )))
            }
        })
    }

    /// `str(value)`
    pub fn to_str(&self) -> String {
        match self {
            Value::Str(s) => s.to_string(),
            Value::Exception(exc) => exc.message.clone(),
            other => other.repr(),
        }
    }

    /// `repr(value)`
    pub fn repr(&self) -> String {
        let mut out = String::new();
        self.write_repr(&mut out, &mut Vec::new());
        out
    }

    /// `active` holds the containers currently being rendered, outermost
    /// first. A list or dict met again inside itself renders as `[...]` or
    /// `{...}`.
    fn write_repr(&self, out: &mut String, active: &mut Vec<*const ()>) {
        if active.len() > MAX_RENDER_DEPTH {
            out.push_str("...");
            return;
        }
        match self {
            Value::None => out.push_str("None"),
            Value::Bool(true) => out.push_str("True"),
            Value::Bool(false) => out.push_str("False"),
            Value::Int(i) => out.push_str(&i.to_string()),
            Value::Float(f) => out.push_str(&format_float(*f)),
            Value::Str(s) => out.push_str(&quote_str(s)),
            Value::List(items) => {
                let ptr = Rc::as_ptr(items) as *const ();
                if active.contains(&ptr) {
                    out.push_str("[...]");
                    return;
                }
                active.push(ptr);
                out.push('[');
                write_items(out, items.borrow().iter(), active);
                out.push(']');
                active.pop();
            }
            Value::Tuple(items) => {
                active.push(Rc::as_ptr(items) as *const ());
                out.push('(');
                write_items(out, items.iter(), active);
                if items.len() == 1 {
                    out.push(',');
                }
                out.push(')');
                active.pop();
            }
            Value::Dict(items) => {
                let ptr = Rc::as_ptr(items) as *const ();
                if active.contains(&ptr) {
                    out.push_str("{...}");
                    return;
                }
                active.push(ptr);
                out.push('{');
                for (i, (key, value)) in items.borrow().values().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    key.write_repr(out, active);
                    out.push_str(": ");
                    value.write_repr(out, active);
                }
                out.push('}');
                active.pop();
            }
            Value::Set(items) => {
                let items = items.borrow();
                if items.is_empty() {
                    out.push_str("set()");
                } else {
                    active.push(std::ptr::null());
                    out.push('{');
                    write_items(out, items.values(), active);
                    out.push('}');
                    active.pop();
                }
            }
            Value::Range { start, stop, step } => {
                if *step == 1 {
                    out.push_str(&format!("range({}, {})", start, stop));
                } else {
                    out.push_str(&format!("range({}, {}, {})", start, stop, step));
                }
            }
            Value::Function(f) => out.push_str(&format!("<function {}>", f.def.name)),
            Value::Builtin(b) if b.is_type() => out.push_str(&format!("<class '{}'>", b.name())),
            Value::Builtin(b) => out.push_str(&format!("<built-in function {}>", b.name())),
            Value::Method(m) => out.push_str(&format!(
                "<built-in method {} of {} object>",
                m.name,
                m.receiver.type_name()
            )),
            Value::ExceptionType(kind) => out.push_str(&format!("<class '{}'>", kind.name())),
            Value::Type(name) => out.push_str(&format!("<class '{}'>", name)),
            Value::Exception(exc) => {
                out.push_str(exc.kind.name());
                out.push('(');
                if !exc.message.is_empty() {
                    out.push_str(&quote_str(&exc.message));
                }
                out.push(')');
            }
        }
    }
}

fn write_items<'a>(
    out: &mut String,
    items: impl Iterator<Item = &'a Value>,
    active: &mut Vec<*const ()>,
) {
    for (i, item) in items.enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        item.write_repr(out, active);
    }
}

/// Quotes a string the way `repr` does: single quotes unless the text
/// contains a single quote and no double quote.
pub fn quote_str(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                out.push_str(&format!("\\x{:02x}", c as u32))
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

/// Shortest round-trip float text with Python's conventions: integral
/// values keep a trailing `.0` and large or tiny magnitudes use exponents.
pub fn format_float(f: f64) -> String {
    if f.is_nan() {
        return "nan".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    let magnitude = f.abs();
    if magnitude != 0.0 && !(1e-4..1e16).contains(&magnitude) {
        let text = format!("{:e}", f);
        return match text.split_once('e') {
            Some((mantissa, exponent)) => {
                let exp: i32 = exponent.parse().unwrap_or(0);
                let sign = if exp < 0 { '-' } else { '+' };
                format!("{}e{}{:02}", mantissa, sign, exp.abs())
            }
            None => text,
        };
    }
    if f.fract() == 0.0 {
        format!("{:.1}", f)
    } else {
        format!("{}", f)
    }
}

/// Item count of `range(start, stop, step)` without the `len()` bound.
pub fn range_span(start: i64, stop: i64, step: i64) -> i128 {
    let (start, stop, step) = (start as i128, stop as i128, step as i128);
    if step > 0 && start < stop {
        (stop - start - 1) / step + 1
    } else if step < 0 && start > stop {
        (start - stop - 1) / -step + 1
    } else {
        0
    }
}

/// `len(range(start, stop, step))`. Lengths past `i64::MAX` raise
/// OverflowError.
pub fn range_len(start: i64, stop: i64, step: i64) -> Result<usize, Exception> {
    let len = range_span(start, stop, step);
    i64::try_from(len)
        .ok()
        .and_then(|len| usize::try_from(len).ok())
        .ok_or_else(|| {
            Exception::new(
                ErrorKind::OverflowError,
                "Python int too large to convert to C ssize_t",
            )
        })
}

/// `a == b`
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::None, Value::None) => true,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::Int(_) | Value::Bool(_), Value::Int(_) | Value::Bool(_)) => a.as_int() == b.as_int(),
        (x, y) if x.is_number() && y.is_number() => x.as_float() == y.as_float(),
        (Value::List(x), Value::List(y)) => {
            Rc::ptr_eq(x, y) || sequences_equal(&x.borrow(), &y.borrow())
        }
        (Value::Tuple(x), Value::Tuple(y)) => sequences_equal(x, y),
        (Value::Dict(x), Value::Dict(y)) => {
            if Rc::ptr_eq(x, y) {
                return true;
            }
            let (x, y) = (x.borrow(), y.borrow());
            x.len() == y.len()
                && x.iter().all(|(key, (_, value))| {
                    y.get(key)
                        .is_some_and(|(_, other)| values_equal(value, other))
                })
        }
        (Value::Set(x), Value::Set(y)) => {
            let (x, y) = (x.borrow(), y.borrow());
            x.len() == y.len() && x.keys().all(|k| y.contains_key(k))
        }
        (
            Value::Range {
                start: s1,
                stop: e1,
                step: st1,
            },
            Value::Range {
                start: s2,
                stop: e2,
                step: st2,
            },
        ) => (s1, e1, st1) == (s2, e2, st2),
        (Value::Function(x), Value::Function(y)) => Rc::ptr_eq(x, y),
        (Value::Builtin(x), Value::Builtin(y)) => x == y,
        (Value::ExceptionType(x), Value::ExceptionType(y)) => x == y,
        (Value::Type(x), Value::Type(y)) => x == y,
        (Value::Exception(x), Value::Exception(y)) => Rc::ptr_eq(x, y),
        _ => false,
    }
}

fn sequences_equal(a: &[Value], b: &[Value]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y))
}

/// `a is b`
pub fn values_identical(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::List(x), Value::List(y)) => Rc::ptr_eq(x, y),
        (Value::Dict(x), Value::Dict(y)) => Rc::ptr_eq(x, y),
        (Value::Set(x), Value::Set(y)) => Rc::ptr_eq(x, y),
        (Value::Tuple(x), Value::Tuple(y)) => Rc::ptr_eq(x, y),
        (Value::Str(x), Value::Str(y)) => Rc::ptr_eq(x, y) || x == y,
        (Value::Float(x), Value::Float(y)) => x.to_bits() == y.to_bits(),
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::None, Value::None) => true,
        (Value::Bool(_), _) | (_, Value::Bool(_)) => false,
        _ => values_equal(a, b),
    }
}

/// Ordering used by `<` and friends, sorting, `min` and `max`. `Ok(None)`
/// means the values are unordered (NaN).
pub fn compare_values(a: &Value, b: &Value) -> Result<Option<Ordering>, Exception> {
    match (a, b) {
        (Value::Int(_) | Value::Bool(_), Value::Int(_) | Value::Bool(_)) => {
            Ok(a.as_int().partial_cmp(&b.as_int()))
        }
        (x, y) if x.is_number() && y.is_number() => {
            let (x, y) = (x.as_float().unwrap_or(0.0), y.as_float().unwrap_or(0.0));
            Ok(x.partial_cmp(&y))
        }
        (Value::Str(x), Value::Str(y)) => Ok(Some(x.cmp(y))),
        (Value::List(x), Value::List(y)) => {
            let (x, y) = (x.borrow().clone(), y.borrow().clone());
            compare_sequences(&x, &y)
        }
        (Value::Tuple(x), Value::Tuple(y)) => compare_sequences(x, y),
        _ => Err(Exception::type_error(format!(
            "'<' not supported between instances of '{}' and '{}'",
            a.type_name(),
            b.type_name()
        ))),
    }
}

fn compare_sequences(a: &[Value], b: &[Value]) -> Result<Option<Ordering>, Exception> {
    for (x, y) in a.iter().zip(b) {
        if values_equal(x, y) {
            continue;
        }
        return compare_values(x, y);
    }
    Ok(Some(a.len().cmp(&b.len())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_formatting() {
        assert_eq!(format_float(1.0), "1.0");
        assert_eq!(format_float(0.1), "0.1");
        assert_eq!(format_float(-2.5), "-2.5");
        assert_eq!(format_float(1e20), "1e+20");
        assert_eq!(format_float(1.5e-7), "1.5e-07");
        assert_eq!(format_float(f64::INFINITY), "inf");
        assert_eq!(format_float(0.0), "0.0");
    }

    #[test]
    fn test_repr_of_containers() {
        let list = Value::list(vec![
            Value::Int(1),
            Value::str("a'b"),
            Value::tuple(vec![Value::None]),
        ]);
        assert_eq!(list.repr(), "[1, \"a'b\", (None,)]");
        assert_eq!(Value::set(SetItems::new()).repr(), "set()");
        assert_eq!(Value::str("hi").to_str(), "hi");
        assert_eq!(Value::str("hi").repr(), "'hi'");
    }

    #[test]
    fn test_self_referencing_list_renders() {
        let inner = Rc::new(RefCell::new(Vec::new()));
        let list = Value::List(Rc::clone(&inner));
        inner.borrow_mut().push(list.clone());
        assert_eq!(list.repr(), "[[...]]");
        let pair = Value::tuple(vec![list.clone(), list.clone()]);
        assert_eq!(pair.repr(), "([[...]], [[...]])");
        inner.borrow_mut().clear();

        let shared = Value::list(vec![Value::Int(1)]);
        let twice = Value::list(vec![shared.clone(), shared]);
        assert_eq!(twice.repr(), "[[1], [1]]");
    }

    #[test]
    fn test_numeric_keys_collapse() {
        assert_eq!(Value::Int(1).to_key().unwrap(), Value::Bool(true).to_key().unwrap());
        assert_eq!(Value::Int(2).to_key().unwrap(), Value::Float(2.0).to_key().unwrap());
        assert!(Value::list(Vec::new()).to_key().is_err());
    }

    #[test]
    fn test_equality_and_ordering() {
        assert!(values_equal(&Value::Int(1), &Value::Float(1.0)));
        assert!(!values_equal(&Value::Int(1), &Value::str("1")));
        assert_eq!(
            compare_values(&Value::str("a"), &Value::str("b")).unwrap(),
            Some(Ordering::Less)
        );
        assert!(compare_values(&Value::Int(1), &Value::str("a")).is_err());
        let a = Value::tuple(vec![Value::Int(1), Value::Int(2)]);
        let b = Value::tuple(vec![Value::Int(1), Value::Int(3)]);
        assert_eq!(compare_values(&a, &b).unwrap(), Some(Ordering::Less));
    }

    #[test]
    fn test_range_len() {
        assert_eq!(range_len(0, 10, 1).unwrap(), 10);
        assert_eq!(range_len(0, 10, 3).unwrap(), 4);
        assert_eq!(range_len(10, 0, -2).unwrap(), 5);
        assert_eq!(range_len(5, 5, 1).unwrap(), 0);
        assert_eq!(range_len(i64::MIN, i64::MAX, 3).unwrap(), 6_148_914_691_236_517_205);
    }

    #[test]
    fn test_range_len_overflow() {
        let err = range_len(i64::MIN, i64::MAX, 1).unwrap_err();
        assert_eq!(err.kind, ErrorKind::OverflowError);
        assert!(range_len(i64::MAX, i64::MIN, -1).is_err());
        assert_eq!(range_span(i64::MIN, i64::MAX, 1), u64::MAX as i128);
        assert!(Value::Range { start: i64::MIN, stop: i64::MAX, step: 1 }.truthy());
    }

    #[test]
    fn test_scope_chain() {
        let global = Rc::new(Scope::new());
        global.define("x", Value::Int(1));
        let local = Scope::with_parent(Rc::clone(&global));
        local.define("y", Value::Int(2));
        assert!(matches!(local.lookup("x"), Some(Value::Int(1))));
        assert!(matches!(local.lookup("y"), Some(Value::Int(2))));
        assert!(global.lookup("y").is_none());
    }
}
