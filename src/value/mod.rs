//! # Value
//!
//! The uniform reference type. Small values (integers, floats, nil,
//! booleans, interned symbols and keywords) are immediates; everything else
//! is a pointer to a heap [`Obj`]. Operations dispatch on the immediate tag
//! first and fall through to the object's type.

pub mod lambda;
pub mod object;
pub mod types;

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use parking_lot::RwLock;

pub use lambda::{CallContext, Closure, HostFn, Lambda};
pub use object::{DictKey, Obj, ObjKind};
pub use types::{builtins, TypeData};

use crate::{
    error::{EvalError, EvalResult},
    fiber::FiberCell,
    symbol::{self, SymId},
};

#[derive(Clone)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Sym(SymId),
    Keyword(SymId),
    Obj(Arc<Obj>),
}

impl Value {
    pub fn sym(name: &str) -> Value {
        Value::Sym(symbol::intern(name))
    }

    pub fn keyword(name: &str) -> Value {
        Value::Keyword(symbol::intern(name))
    }

    pub fn string(s: impl Into<String>) -> Value {
        Value::Obj(Arc::new(Obj::new(
            ObjKind::Str(RwLock::new(s.into())),
            builtins().string_type.clone(),
        )))
    }

    pub fn list(first: Value, rest: Value) -> Value {
        Value::Obj(Arc::new(Obj::new(
            ObjKind::List(RwLock::new((first, rest))),
            builtins().list_type.clone(),
        )))
    }

    pub fn list_from_slice(items: &[Value]) -> Value {
        let mut out = Value::Nil;
        for item in items.iter().rev() {
            out = Value::list(item.clone(), out);
        }
        out
    }

    pub fn vector(items: Vec<Value>) -> Value {
        Value::Obj(Arc::new(Obj::new(
            ObjKind::Vector(RwLock::new(items)),
            builtins().vector_type.clone(),
        )))
    }

    pub fn dict(entries: HashMap<DictKey, Value>) -> Value {
        Value::Obj(Arc::new(Obj::new(
            ObjKind::Dict(RwLock::new(entries)),
            builtins().dict_type.clone(),
        )))
    }

    pub fn lambda(lambda: Lambda) -> Value {
        Value::Obj(Arc::new(Obj::new(
            ObjKind::Lambda(lambda),
            builtins().lambda_type.clone(),
        )))
    }

    pub fn host_fn(
        name: &str,
        f: impl Fn(&[Value], &mut CallContext) -> EvalResult<Value> + Send + Sync + 'static,
    ) -> Value {
        Value::lambda(Lambda::host(name, f))
    }

    pub fn fiber(cell: Arc<FiberCell>) -> Value {
        Value::Obj(Arc::new(Obj::new(
            ObjKind::Fiber(cell),
            builtins().fiber_type.clone(),
        )))
    }

    pub fn module(name: impl Into<String>) -> Value {
        Value::Obj(Arc::new(Obj::new(
            ObjKind::Module(RwLock::new(name.into())),
            builtins().module_type.clone(),
        )))
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Nil and false are the only falsy values.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }

    pub fn as_obj(&self) -> Option<&Arc<Obj>> {
        match self {
            Value::Obj(o) => Some(o),
            _ => None,
        }
    }

    pub fn to_string(&self, human: bool) -> String {
        to_string(self, human)
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Nil
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&to_string(self, false))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&to_string(self, true))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        equals(self, other)
    }
}

pub fn is_lambda(v: &Value) -> bool {
    v.as_obj().map_or(false, |o| o.as_lambda().is_some())
}

pub fn is_type(v: &Value) -> bool {
    v.as_obj().map_or(false, |o| o.as_type().is_some())
}

pub fn is_list(v: &Value) -> bool {
    v.as_obj()
        .map_or(false, |o| matches!(o.kind, ObjKind::List(_)))
}

/// The governing type of any reference. Total.
pub fn type_of(v: &Value) -> Value {
    let b = builtins();
    match v {
        Value::Nil => b.nil_type.clone(),
        Value::Bool(_) => b.boolean_type.clone(),
        Value::Int(_) | Value::Float(_) => b.number_type.clone(),
        Value::Sym(_) => b.symbol_type.clone(),
        Value::Keyword(_) => b.keyword_type.clone(),
        Value::Obj(o) => o.ty().unwrap_or_else(|| b.type_type.clone()),
    }
}

/// Attribute lookup: the object's own attributes first, then the method
/// tables of the type's linearized ancestry.
pub fn get_attr(v: &Value, id: SymId) -> EvalResult<Value> {
    if let Value::Obj(o) = v {
        if let Some(found) = o.get_own_attr(id) {
            return Ok(found);
        }
    }
    let ty = type_of(v);
    for ancestor in types::linearize(&ty) {
        if let Some(t) = ancestor.as_obj().and_then(|o| o.as_type()) {
            if let Some(found) = t.get_field(id) {
                return Ok(found);
            }
        }
    }
    Err(EvalError::type_error(format!(
        "no attribute '{}' on {}",
        symbol::name_or_placeholder(id),
        to_string(v, false)
    )))
}

/// Store an attribute on the object itself. Immediates have no attribute
/// storage.
pub fn set_attr(v: &Value, id: SymId, value: Value) -> EvalResult<()> {
    match v {
        Value::Obj(o) => {
            o.set_own_attr(id, value);
            Ok(())
        }
        _ => Err(EvalError::type_error(format!(
            "unable to set attribute '{}' on immediate {}",
            symbol::name_or_placeholder(id),
            to_string(v, false)
        ))),
    }
}

pub fn first(v: &Value) -> EvalResult<Value> {
    match v {
        Value::Nil => Ok(Value::Nil),
        Value::Obj(o) => match &o.kind {
            ObjKind::List(cell) => Ok(cell.read().0.clone()),
            ObjKind::Vector(items) => Ok(items.read().first().cloned().unwrap_or(Value::Nil)),
            ObjKind::Str(s) => Ok(s
                .read()
                .chars()
                .next()
                .map(|c| Value::string(c.to_string()))
                .unwrap_or(Value::Nil)),
            _ => Err(type_error_for("first", v)),
        },
        _ => Err(type_error_for("first", v)),
    }
}

pub fn rest(v: &Value) -> EvalResult<Value> {
    match v {
        Value::Nil => Ok(Value::Nil),
        Value::Obj(o) => match &o.kind {
            ObjKind::List(cell) => Ok(cell.read().1.clone()),
            ObjKind::Vector(items) => {
                let items = items.read();
                if items.len() <= 1 {
                    Ok(Value::Nil)
                } else {
                    Ok(Value::vector(items[1..].to_vec()))
                }
            }
            ObjKind::Str(s) => {
                let s = s.read();
                let mut chars = s.chars();
                match chars.next() {
                    Some(_) => Ok(Value::string(chars.collect::<String>())),
                    None => Ok(Value::Nil),
                }
            }
            _ => Err(type_error_for("rest", v)),
        },
        _ => Err(type_error_for("rest", v)),
    }
}

/// Cons builds list cells regardless of the tail's type; an improper tail
/// prints as a dotted pair.
pub fn cons(head: Value, tail: Value) -> Value {
    Value::list(head, tail)
}

/// List concatenation, used by quasiquote splicing.
pub fn append(a: &Value, b: &Value) -> EvalResult<Value> {
    match a {
        Value::Nil => Ok(b.clone()),
        Value::Obj(o) => match &o.kind {
            ObjKind::List(_) => {
                let items = list_to_vec(a)?;
                let mut out = b.clone();
                for item in items.iter().rev() {
                    out = Value::list(item.clone(), out);
                }
                Ok(out)
            }
            ObjKind::Vector(items) => {
                let mut joined = items.read().clone();
                match b {
                    Value::Obj(other) => match &other.kind {
                        ObjKind::Vector(tail) => joined.extend(tail.read().iter().cloned()),
                        ObjKind::List(_) => joined.extend(list_to_vec(b)?),
                        _ => return Err(type_error_for("append", b)),
                    },
                    Value::Nil => {}
                    _ => return Err(type_error_for("append", b)),
                }
                Ok(Value::vector(joined))
            }
            _ => Err(type_error_for("append", a)),
        },
        _ => Err(type_error_for("append", a)),
    }
}

pub fn get(v: &Value, key: &Value) -> EvalResult<Value> {
    match v {
        Value::Obj(o) => match &o.kind {
            ObjKind::Vector(items) => {
                let items = items.read();
                let idx = expect_index(key, items.len())?;
                Ok(items[idx].clone())
            }
            ObjKind::Dict(table) => Ok(table
                .read()
                .get(&DictKey(key.clone()))
                .cloned()
                .unwrap_or(Value::Nil)),
            ObjKind::Str(s) => {
                let s = s.read();
                let chars: Vec<char> = s.chars().collect();
                let idx = expect_index(key, chars.len())?;
                Ok(Value::string(chars[idx].to_string()))
            }
            _ => Err(type_error_for("get", v)),
        },
        _ => Err(type_error_for("get", v)),
    }
}

pub fn set(v: &Value, key: &Value, value: Value) -> EvalResult<Value> {
    match v {
        Value::Obj(o) => match &o.kind {
            ObjKind::Vector(items) => {
                let mut items = items.write();
                let len = items.len();
                let idx = expect_index(key, len)?;
                items[idx] = value.clone();
                Ok(value)
            }
            ObjKind::Dict(table) => {
                table.write().insert(DictKey(key.clone()), value.clone());
                Ok(value)
            }
            ObjKind::Str(s) => {
                let replacement = match &value {
                    Value::Obj(r) => match &r.kind {
                        ObjKind::Str(rs) => rs.read().clone(),
                        _ => return Err(type_error_for("set", &value)),
                    },
                    _ => return Err(type_error_for("set", &value)),
                };
                let mut s = s.write();
                let mut chars: Vec<char> = s.chars().collect();
                let idx = expect_index(key, chars.len())?;
                let mut rep = replacement.chars();
                chars[idx] = rep
                    .next()
                    .ok_or_else(|| EvalError::argument("replacement string is empty"))?;
                *s = chars.into_iter().collect();
                Ok(value)
            }
            _ => Err(type_error_for("set", v)),
        },
        _ => Err(type_error_for("set", v)),
    }
}

pub fn size(v: &Value) -> EvalResult<i64> {
    match v {
        Value::Nil => Ok(0),
        Value::Obj(o) => match &o.kind {
            ObjKind::List(_) => {
                let mut len = 0;
                let mut cur = v.clone();
                while !cur.is_nil() {
                    len += 1;
                    cur = rest(&cur)?;
                }
                Ok(len)
            }
            ObjKind::Vector(items) => Ok(items.read().len() as i64),
            ObjKind::Dict(table) => Ok(table.read().len() as i64),
            ObjKind::Str(s) => Ok(s.read().chars().count() as i64),
            _ => Err(type_error_for("len", v)),
        },
        _ => Err(type_error_for("len", v)),
    }
}

/// Structural equality with numeric promotion. Lambdas, fibers, types, and
/// plain instances compare by identity.
pub fn equals(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Nil, Value::Nil) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Float(x), Value::Float(y)) => x == y,
        (Value::Int(x), Value::Float(y)) | (Value::Float(y), Value::Int(x)) => *x as f64 == *y,
        (Value::Sym(x), Value::Sym(y)) => x == y,
        (Value::Keyword(x), Value::Keyword(y)) => x == y,
        (Value::Obj(x), Value::Obj(y)) => {
            if Arc::ptr_eq(x, y) {
                return true;
            }
            match (&x.kind, &y.kind) {
                (ObjKind::Str(xs), ObjKind::Str(ys)) => *xs.read() == *ys.read(),
                (ObjKind::List(xc), ObjKind::List(yc)) => {
                    let (xf, xr) = xc.read().clone();
                    let (yf, yr) = yc.read().clone();
                    equals(&xf, &yf) && equals(&xr, &yr)
                }
                (ObjKind::Vector(xi), ObjKind::Vector(yi)) => {
                    let xi = xi.read();
                    let yi = yi.read();
                    xi.len() == yi.len() && xi.iter().zip(yi.iter()).all(|(l, r)| equals(l, r))
                }
                (ObjKind::Dict(xt), ObjKind::Dict(yt)) => {
                    let xt = xt.read();
                    let yt = yt.read();
                    xt.len() == yt.len()
                        && xt
                            .iter()
                            .all(|(k, v)| yt.get(k).map_or(false, |w| equals(v, w)))
                }
                _ => false,
            }
        }
        _ => false,
    }
}

/// Hash consistent with [`equals`]: whole floats hash like their integer.
pub fn hash_value(v: &Value) -> u64 {
    let mut h = DefaultHasher::new();
    hash_into(v, &mut h);
    h.finish()
}

fn hash_into(v: &Value, h: &mut DefaultHasher) {
    match v {
        Value::Nil => 0u8.hash(h),
        Value::Bool(b) => (1u8, b).hash(h),
        Value::Int(i) => (2u8, *i).hash(h),
        Value::Float(f) => {
            if f.fract() == 0.0 && *f >= i64::MIN as f64 && *f <= i64::MAX as f64 {
                (2u8, *f as i64).hash(h)
            } else {
                (3u8, f.to_bits()).hash(h)
            }
        }
        Value::Sym(id) => (4u8, *id).hash(h),
        Value::Keyword(id) => (5u8, *id).hash(h),
        Value::Obj(o) => match &o.kind {
            ObjKind::Str(s) => (6u8, &*s.read()).hash(h),
            ObjKind::List(cell) => {
                7u8.hash(h);
                let (f, r) = cell.read().clone();
                hash_into(&f, h);
                hash_into(&r, h);
            }
            ObjKind::Vector(items) => {
                8u8.hash(h);
                for item in items.read().iter() {
                    hash_into(item, h);
                }
            }
            ObjKind::Dict(table) => {
                // Order-independent: fold entry hashes with xor.
                let mut acc = 0u64;
                for (k, v) in table.read().iter() {
                    let mut eh = DefaultHasher::new();
                    hash_into(&k.0, &mut eh);
                    hash_into(v, &mut eh);
                    acc ^= eh.finish();
                }
                (9u8, acc).hash(h);
            }
            _ => (10u8, Arc::as_ptr(o) as usize).hash(h),
        },
    }
}

pub fn to_string(v: &Value, human: bool) -> String {
    match v {
        Value::Nil => "nil".to_owned(),
        Value::Bool(b) => b.to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => format!("{f:?}"),
        Value::Sym(id) => symbol::name_or_placeholder(*id),
        Value::Keyword(id) => symbol::name_or_placeholder(*id),
        Value::Obj(o) => match &o.kind {
            ObjKind::Str(s) => {
                if human {
                    s.read().clone()
                } else {
                    format!("{:?}", &*s.read())
                }
            }
            ObjKind::List(_) => {
                let mut out = String::from("(");
                let mut cur = v.clone();
                loop {
                    match &cur {
                        Value::Obj(c) => match &c.kind {
                            ObjKind::List(cell) => {
                                let (f, r) = cell.read().clone();
                                out.push_str(&to_string(&f, false));
                                match r {
                                    Value::Nil => break,
                                    next if is_list(&next) => {
                                        out.push(' ');
                                        cur = next;
                                    }
                                    improper => {
                                        out.push_str(" . ");
                                        out.push_str(&to_string(&improper, false));
                                        break;
                                    }
                                }
                            }
                            _ => break,
                        },
                        _ => break,
                    }
                }
                out.push(')');
                out
            }
            ObjKind::Vector(items) => {
                let parts: Vec<String> =
                    items.read().iter().map(|i| to_string(i, false)).collect();
                format!("[{}]", parts.join(" "))
            }
            ObjKind::Dict(table) => {
                let parts: Vec<String> = table
                    .read()
                    .iter()
                    .map(|(k, v)| format!("{} {}", to_string(&k.0, false), to_string(v, false)))
                    .collect();
                format!("{{{}}}", parts.join(" "))
            }
            ObjKind::Lambda(Lambda::Bytecode { .. }) => "<lambda>".to_owned(),
            ObjKind::Lambda(Lambda::Host { name, .. }) => format!("<native-fn {name}>"),
            ObjKind::Fiber(cell) => format!("<fiber {}>", cell.id()),
            ObjKind::Type(t) => format!("<type '{}'>", t.name()),
            ObjKind::Module(name) => format!("<module '{}'>", name.read()),
            ObjKind::Instance => {
                let ty = type_of(v);
                let name = ty
                    .as_obj()
                    .and_then(|o| o.as_type().map(|t| t.name()))
                    .unwrap_or_else(|| "?".to_owned());
                format!("<object of '{name}'>")
            }
        },
    }
}

/// First element of a list form, if the value is a non-empty list.
pub fn list_head(v: &Value) -> Option<Value> {
    if is_list(v) {
        first(v).ok()
    } else {
        None
    }
}

pub fn list_to_vec(v: &Value) -> EvalResult<Vec<Value>> {
    let mut out = Vec::new();
    let mut cur = v.clone();
    while !cur.is_nil() {
        if !is_list(&cur) {
            return Err(EvalError::type_error(format!(
                "expected a proper list, found {}",
                to_string(&cur, false)
            )));
        }
        out.push(first(&cur)?);
        cur = rest(&cur)?;
    }
    Ok(out)
}

fn expect_index(key: &Value, len: usize) -> EvalResult<usize> {
    let idx = match key {
        Value::Int(i) => *i,
        _ => {
            return Err(EvalError::argument(format!(
                "index must be an integer, given {}",
                to_string(key, false)
            )))
        }
    };
    if idx < 0 || idx as usize >= len {
        return Err(EvalError::index(format!(
            "index {idx} out of range for length {len}"
        )));
    }
    Ok(idx as usize)
}

fn type_error_for(op: &str, v: &Value) -> EvalError {
    let ty = type_of(v);
    let name = ty
        .as_obj()
        .and_then(|o| o.as_type().map(|t| t.name()))
        .unwrap_or_else(|| "?".to_owned());
    EvalError::type_error(format!("'{op}' is not defined for {name}"))
}
