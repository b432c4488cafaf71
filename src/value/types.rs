//! # Types
//!
//! The type objects behind every reference. Each type carries a name, an
//! ordered parent list, and a *fields* table: the methods visible on its
//! instances. Attributes set on the type object itself (via `set_attr`) are
//! visible only on the type; `__alloc__` lives there. Every builtin type is
//! created once at bootstrap, with `Type` patched to be its own type.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::{
    error::EvalError,
    symbol::{self, SymId},
    value::{
        self,
        object::{Obj, ObjKind},
        CallContext, Value,
    },
};

pub struct TypeData {
    name: RwLock<String>,
    parents: RwLock<Vec<Value>>,
    fields: RwLock<HashMap<SymId, Value>>,
    linearized: RwLock<Option<Vec<Value>>>,
}

impl TypeData {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: RwLock::new(name.into()),
            parents: RwLock::new(Vec::new()),
            fields: RwLock::new(HashMap::new()),
            linearized: RwLock::new(None),
        }
    }

    pub fn name(&self) -> String {
        self.name.read().clone()
    }

    pub fn set_name(&self, name: impl Into<String>) {
        *self.name.write() = name.into();
    }

    pub fn get_field(&self, id: SymId) -> Option<Value> {
        self.fields.read().get(&id).cloned()
    }

    pub fn set_field(&self, id: SymId, value: Value) {
        self.fields.write().insert(id, value);
    }

    pub fn set_field_named(&self, name: &str, value: Value) {
        self.set_field(symbol::intern(name), value);
    }

    pub fn parents(&self) -> Vec<Value> {
        self.parents.read().clone()
    }

    /// Adding a parent invalidates the memoized linearization.
    pub fn add_parent(&self, parent: Value) {
        self.parents.write().push(parent);
        *self.linearized.write() = None;
    }
}

/// Depth-first, left-to-right, first-wins linearization of a type and its
/// ancestry, with `Object` implicitly last. Memoized on the type until its
/// parent list changes.
pub fn linearize(ty: &Value) -> Vec<Value> {
    let Some(t) = ty.as_obj().and_then(|o| o.as_type()) else {
        return Vec::new();
    };
    if let Some(cached) = t.linearized.read().clone() {
        return cached;
    }

    let mut out: Vec<Value> = Vec::new();
    walk(ty, &mut out);
    let object = &builtins().object_type;
    if !out.iter().any(|v| same_obj(v, object)) {
        out.push(object.clone());
    }

    *t.linearized.write() = Some(out.clone());
    out
}

fn walk(ty: &Value, out: &mut Vec<Value>) {
    if out.iter().any(|v| same_obj(v, ty)) {
        return;
    }
    out.push(ty.clone());
    let parents = match ty.as_obj().and_then(|o| o.as_type()) {
        Some(t) => t.parents(),
        None => return,
    };
    for parent in &parents {
        walk(parent, out);
    }
}

fn same_obj(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Obj(x), Value::Obj(y)) => Arc::ptr_eq(x, y),
        _ => false,
    }
}

pub struct Builtins {
    pub type_type: Value,
    pub object_type: Value,
    pub nil_type: Value,
    pub boolean_type: Value,
    pub number_type: Value,
    pub string_type: Value,
    pub symbol_type: Value,
    pub keyword_type: Value,
    pub list_type: Value,
    pub vector_type: Value,
    pub dict_type: Value,
    pub lambda_type: Value,
    pub fiber_type: Value,
    pub module_type: Value,
}

static BUILTINS: Lazy<Builtins> = Lazy::new(bootstrap);

pub fn builtins() -> &'static Builtins {
    &BUILTINS
}

/// Wrap a host function with an argument-count check. The count includes
/// the receiver in argv[0], the way methods are called.
pub fn check_arity(
    name: &'static str,
    arity: usize,
    f: impl Fn(&[Value], &mut CallContext) -> Result<Value, EvalError> + Send + Sync + 'static,
) -> impl Fn(&[Value], &mut CallContext) -> Result<Value, EvalError> + Send + Sync + 'static {
    move |argv, ctx| {
        if argv.len() != arity {
            return Err(EvalError::arity(format!(
                "method {} requires {} args, given {}",
                name,
                arity - 1,
                argv.len() - 1
            )));
        }
        f(argv, ctx)
    }
}

/// Build a host lambda against an explicit lambda type. Everything created
/// while `BUILTINS` is still initializing must come through here; going
/// through `Value::host_fn` would re-enter the builtin registry.
fn host_value(
    b: &Builtins,
    name: &str,
    f: impl Fn(&[Value], &mut CallContext) -> Result<Value, EvalError> + Send + Sync + 'static,
) -> Value {
    Value::Obj(Arc::new(Obj::new(
        ObjKind::Lambda(crate::value::Lambda::host(name, f)),
        b.lambda_type.clone(),
    )))
}

fn bootstrap() -> Builtins {
    // Type's type is itself; allocate with a hole and patch once the Arc
    // exists.
    let type_type = Value::Obj(Arc::new(Obj::new_untyped(ObjKind::Type(TypeData::new(
        "Type",
    )))));
    if let Value::Obj(o) = &type_type {
        o.set_ty(type_type.clone());
    }

    let make = |name: &str| {
        Value::Obj(Arc::new(Obj::new(
            ObjKind::Type(TypeData::new(name)),
            type_type.clone(),
        )))
    };

    let b = Builtins {
        object_type: make("Object"),
        nil_type: make("Nil"),
        boolean_type: make("Boolean"),
        number_type: make("Number"),
        string_type: make("String"),
        symbol_type: make("Symbol"),
        keyword_type: make("Keyword"),
        list_type: make("List"),
        vector_type: make("Vector"),
        dict_type: make("Dict"),
        lambda_type: make("Lambda"),
        fiber_type: make("Fiber"),
        module_type: make("Module"),
        type_type,
    };

    init_type_type(&b);
    init_object_type(&b);
    init_nil_type(&b);
    init_number_type(&b);
    init_boolean_type(&b);
    init_string_type(&b);
    init_symbol_type(&b);
    init_keyword_type(&b);
    init_list_type(&b);
    init_vector_type(&b);
    init_dict_type(&b);
    init_module_type(&b);
    default_bindings(&b, &b.lambda_type);
    default_bindings(&b, &b.fiber_type);

    b
}

fn type_data(v: &Value) -> Result<&TypeData, EvalError> {
    v.as_obj()
        .and_then(|o| o.as_type())
        .ok_or_else(|| EvalError::type_error("expected a type"))
}

/// The attribute methods every type shares: printable representation, field
/// registration, and a default allocator producing a blank instance.
fn default_bindings(b: &Builtins, ty: &Value) {
    let type_str = host_value(b, "type-str", |argv, _| {
        let t = type_data(&argv[0])?;
        Ok(Value::string(format!("<type '{}'>", t.name())))
    });
    let _ = value::set_attr(ty, symbol::intern("str"), type_str.clone());
    let _ = value::set_attr(ty, symbol::intern("repr"), type_str);

    let add_field = host_value(b,
        "add-field",
        check_arity("add-field", 3, |argv, _| {
            let t = type_data(&argv[0])?;
            let Value::Sym(id) = argv[1] else {
                return Err(EvalError::argument("add-field expects a symbol name"));
            };
            t.set_field(id, argv[2].clone());
            Ok(argv[2].clone())
        }),
    );
    let _ = value::set_attr(ty, symbol::intern("add-field"), add_field);

    let self_ty = ty.clone();
    let alloc = host_value(b, "__alloc__", move |_argv, _| {
        Ok(Value::Obj(Arc::new(Obj::new(
            ObjKind::Instance,
            self_ty.clone(),
        ))))
    });
    let _ = value::set_attr(ty, symbol::intern("__alloc__"), alloc);
}

fn init_type_type(b: &Builtins) {
    default_bindings(b, &b.type_type);

    // Allocating a Type yields a fresh blank type, itself fully bound.
    let type_type = b.type_type.clone();
    let alloc = host_value(b, "__alloc__", move |_argv, _| {
        let nt = Value::Obj(Arc::new(Obj::new(
            ObjKind::Type(TypeData::new("")),
            type_type.clone(),
        )));
        default_bindings(builtins(), &nt);
        Ok(nt)
    });
    let _ = value::set_attr(&b.type_type, symbol::intern("__alloc__"), alloc);

    let t = type_data(&b.type_type).unwrap();

    t.set_field_named(
        "set-field",
        host_value(b,
            "set-field",
            check_arity("set-field", 3, |argv, _| {
                let td = type_data(&argv[0])?;
                let Value::Sym(id) = argv[1] else {
                    return Err(EvalError::argument("set-field expects a symbol name"));
                };
                td.set_field(id, argv[2].clone());
                Ok(Value::Nil)
            }),
        ),
    );

    t.set_field_named(
        "get-field",
        host_value(b,
            "get-field",
            check_arity("get-field", 2, |argv, _| {
                let td = type_data(&argv[0])?;
                let Value::Sym(id) = argv[1] else {
                    return Err(EvalError::argument("get-field expects a symbol name"));
                };
                td.get_field(id).ok_or_else(|| {
                    EvalError::type_error(format!(
                        "no field '{}' on type {}",
                        symbol::name_or_placeholder(id),
                        td.name()
                    ))
                })
            }),
        ),
    );

    t.set_field_named(
        "add-parent",
        host_value(b,
            "add-parent",
            check_arity("add-parent", 2, |argv, _| {
                let td = type_data(&argv[0])?;
                if !value::is_type(&argv[1]) {
                    return Err(EvalError::argument(format!(
                        "'add-parent' requires a type, given {}",
                        argv[1].to_string(false)
                    )));
                }
                td.add_parent(argv[1].clone());
                Ok(Value::Nil)
            }),
        ),
    );

    t.set_field_named(
        "get-parents",
        host_value(b,
            "get-parents",
            check_arity("get-parents", 1, |argv, _| {
                let td = type_data(&argv[0])?;
                let mut out = td.parents();
                out.push(builtins().object_type.clone());
                Ok(Value::vector(out))
            }),
        ),
    );

    t.set_field_named(
        "new",
        host_value(b,
            "new",
            check_arity("new", 2, |argv, _| {
                let td = type_data(&argv[0])?;
                match &argv[1] {
                    Value::Obj(o) => match &o.kind {
                        ObjKind::Str(s) => {
                            td.set_name(s.read().clone());
                            Ok(Value::Nil)
                        }
                        _ => Err(EvalError::argument(
                            "constructor to `Type` requires a string name",
                        )),
                    },
                    _ => Err(EvalError::argument(
                        "constructor to `Type` requires a string name",
                    )),
                }
            }),
        ),
    );
}

fn init_object_type(b: &Builtins) {
    default_bindings(b, &b.object_type);

    let obj_str = host_value(b, "str", |argv, _| {
        Ok(Value::string(argv[0].to_string(false)))
    });
    let t = type_data(&b.object_type).unwrap();
    t.set_field_named("str", obj_str.clone());
    t.set_field_named("repr", obj_str);
    t.set_field_named("new", host_value(b, "new", |_argv, _| Ok(Value::Nil)));
}

fn init_nil_type(b: &Builtins) {
    default_bindings(b, &b.nil_type);
    let _ = value::set_attr(
        &b.nil_type,
        symbol::intern("__alloc__"),
        host_value(b, "__alloc__", |_argv, _| Ok(Value::Nil)),
    );
    let t = type_data(&b.nil_type).unwrap();
    t.set_field_named("new", host_value(b, "new", |_argv, _| Ok(Value::Nil)));
    t.set_field_named("first", host_value(b, "first", |_argv, _| Ok(Value::Nil)));
    t.set_field_named("rest", host_value(b, "rest", |_argv, _| Ok(Value::Nil)));
    t.set_field_named("len", host_value(b, "len", |_argv, _| Ok(Value::Int(0))));
}

fn init_number_type(b: &Builtins) {
    default_bindings(b, &b.number_type);
    let _ = value::set_attr(
        &b.number_type,
        symbol::intern("__alloc__"),
        host_value(b, "__alloc__", |_argv, _| Ok(Value::Int(0))),
    );
    let t = type_data(&b.number_type).unwrap();
    t.set_field_named("new", host_value(b, "new", |_argv, _| Ok(Value::Nil)));
}

fn init_boolean_type(b: &Builtins) {
    default_bindings(b, &b.boolean_type);
    let _ = value::set_attr(
        &b.boolean_type,
        symbol::intern("__alloc__"),
        host_value(b, "__alloc__", |_argv, _| Ok(Value::Bool(false))),
    );
    let t = type_data(&b.boolean_type).unwrap();
    t.set_field_named("new", host_value(b, "new", |_argv, _| Ok(Value::Nil)));
}

fn init_string_type(b: &Builtins) {
    default_bindings(b, &b.string_type);
    let _ = value::set_attr(
        &b.string_type,
        symbol::intern("__alloc__"),
        host_value(b, "__alloc__", |_argv, _| Ok(Value::string(""))),
    );
    let t = type_data(&b.string_type).unwrap();
    t.set_field_named(
        "new",
        host_value(b, "new", |argv, _| {
            let mut content = String::new();
            for arg in &argv[1..] {
                content.push_str(&arg.to_string(true));
            }
            match &argv[0] {
                Value::Obj(o) => match &o.kind {
                    ObjKind::Str(s) => {
                        *s.write() = content;
                        Ok(Value::Nil)
                    }
                    _ => Err(EvalError::type_error("String constructor on a non-string")),
                },
                _ => Err(EvalError::type_error("String constructor on a non-string")),
            }
        }),
    );
    t.set_field_named(
        "first",
        host_value(b, "first", |argv, _| value::first(&argv[0])),
    );
    t.set_field_named(
        "rest",
        host_value(b, "rest", |argv, _| value::rest(&argv[0])),
    );
    t.set_field_named(
        "len",
        host_value(b, "len", |argv, _| value::size(&argv[0]).map(Value::Int)),
    );
    t.set_field_named(
        "get",
        host_value(b,
            "get",
            check_arity("get", 2, |argv, _| value::get(&argv[0], &argv[1])),
        ),
    );
    t.set_field_named(
        "set",
        host_value(b,
            "set",
            check_arity("set", 3, |argv, _| {
                value::set(&argv[0], &argv[1], argv[2].clone())
            }),
        ),
    );
}

fn init_symbol_type(b: &Builtins) {
    default_bindings(b, &b.symbol_type);
    let _ = value::set_attr(
        &b.symbol_type,
        symbol::intern("__alloc__"),
        host_value(b, "__alloc__", |_argv, _| Ok(Value::Sym(symbol::intern("")))),
    );
    let t = type_data(&b.symbol_type).unwrap();
    t.set_field_named("new", host_value(b, "new", |_argv, _| Ok(Value::Nil)));
}

fn init_keyword_type(b: &Builtins) {
    default_bindings(b, &b.keyword_type);
    let t = type_data(&b.keyword_type).unwrap();
    t.set_field_named("new", host_value(b, "new", |_argv, _| Ok(Value::Nil)));
}

fn init_list_type(b: &Builtins) {
    default_bindings(b, &b.list_type);
    let _ = value::set_attr(
        &b.list_type,
        symbol::intern("__alloc__"),
        host_value(b, "__alloc__", |_argv, _| {
            Ok(Value::list(Value::Nil, Value::Nil))
        }),
    );
    let t = type_data(&b.list_type).unwrap();
    t.set_field_named(
        "new",
        host_value(b, "new", |argv, _| {
            let Value::Obj(o) = &argv[0] else {
                return Err(EvalError::type_error("List constructor on a non-list"));
            };
            let ObjKind::List(cell) = &o.kind else {
                return Err(EvalError::type_error("List constructor on a non-list"));
            };
            let args = &argv[1..];
            let mut cell = cell.write();
            if let Some(head) = args.first() {
                cell.0 = head.clone();
                cell.1 = Value::list_from_slice(&args[1..]);
            }
            Ok(Value::Nil)
        }),
    );
    t.set_field_named(
        "first",
        host_value(b, "first", |argv, _| value::first(&argv[0])),
    );
    t.set_field_named(
        "rest",
        host_value(b, "rest", |argv, _| value::rest(&argv[0])),
    );
    t.set_field_named(
        "len",
        host_value(b, "len", |argv, _| value::size(&argv[0]).map(Value::Int)),
    );
}

fn init_vector_type(b: &Builtins) {
    default_bindings(b, &b.vector_type);
    let _ = value::set_attr(
        &b.vector_type,
        symbol::intern("__alloc__"),
        host_value(b, "__alloc__", |_argv, _| Ok(Value::vector(Vec::new()))),
    );
    let t = type_data(&b.vector_type).unwrap();
    t.set_field_named(
        "new",
        host_value(b, "new", |argv, _| {
            let Value::Obj(o) = &argv[0] else {
                return Err(EvalError::type_error("Vector constructor on a non-vector"));
            };
            let ObjKind::Vector(items) = &o.kind else {
                return Err(EvalError::type_error("Vector constructor on a non-vector"));
            };
            items.write().extend(argv[1..].iter().cloned());
            Ok(Value::Nil)
        }),
    );
    t.set_field_named(
        "first",
        host_value(b, "first", |argv, _| value::first(&argv[0])),
    );
    t.set_field_named(
        "rest",
        host_value(b, "rest", |argv, _| value::rest(&argv[0])),
    );
    t.set_field_named(
        "len",
        host_value(b, "len", |argv, _| value::size(&argv[0]).map(Value::Int)),
    );
    t.set_field_named(
        "get",
        host_value(b,
            "get",
            check_arity("get", 2, |argv, _| value::get(&argv[0], &argv[1])),
        ),
    );
    t.set_field_named(
        "set",
        host_value(b,
            "set",
            check_arity("set", 3, |argv, _| {
                value::set(&argv[0], &argv[1], argv[2].clone())
            }),
        ),
    );
}

fn init_dict_type(b: &Builtins) {
    default_bindings(b, &b.dict_type);
    let _ = value::set_attr(
        &b.dict_type,
        symbol::intern("__alloc__"),
        host_value(b, "__alloc__", |_argv, _| Ok(Value::dict(Default::default()))),
    );
    let t = type_data(&b.dict_type).unwrap();
    t.set_field_named(
        "new",
        host_value(b, "new", |argv, _| {
            let args = &argv[1..];
            if args.len() % 2 != 0 {
                return Err(EvalError::argument(
                    "Dict constructor requires an even number of arguments",
                ));
            }
            for pair in args.chunks(2) {
                value::set(&argv[0], &pair[0], pair[1].clone())?;
            }
            Ok(Value::Nil)
        }),
    );
    t.set_field_named(
        "get",
        host_value(b,
            "get",
            check_arity("get", 2, |argv, _| value::get(&argv[0], &argv[1])),
        ),
    );
    t.set_field_named(
        "set",
        host_value(b,
            "set",
            check_arity("set", 3, |argv, _| {
                value::set(&argv[0], &argv[1], argv[2].clone())
            }),
        ),
    );
    t.set_field_named(
        "len",
        host_value(b, "len", |argv, _| value::size(&argv[0]).map(Value::Int)),
    );
    t.set_field_named(
        "keys",
        host_value(b,
            "keys",
            check_arity("keys", 1, |argv, _| {
                let Value::Obj(o) = &argv[0] else {
                    return Err(EvalError::type_error("keys on a non-dict"));
                };
                let ObjKind::Dict(table) = &o.kind else {
                    return Err(EvalError::type_error("keys on a non-dict"));
                };
                let keys: Vec<Value> = table.read().keys().map(|k| k.0.clone()).collect();
                Ok(Value::vector(keys))
            }),
        ),
    );
}

fn init_module_type(b: &Builtins) {
    default_bindings(b, &b.module_type);
    let _ = value::set_attr(
        &b.module_type,
        symbol::intern("__alloc__"),
        host_value(b, "__alloc__", |_argv, _| Ok(Value::module(""))),
    );
    let t = type_data(&b.module_type).unwrap();
    t.set_field_named(
        "new",
        host_value(b, "new", |argv, _| {
            let Value::Obj(o) = &argv[0] else {
                return Err(EvalError::type_error("Module constructor on a non-module"));
            };
            let ObjKind::Module(name) = &o.kind else {
                return Err(EvalError::type_error("Module constructor on a non-module"));
            };
            if let Some(arg) = argv.get(1) {
                *name.write() = arg.to_string(true);
            }
            Ok(Value::Nil)
        }),
    );
}
