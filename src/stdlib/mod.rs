//! # Stdlib
//!
//! Host lambdas bound into the global table at engine init, plus a small
//! prelude written in Cedar itself. This is the seam collaborators use too:
//! `def_global(symbol, host lambda)` is exactly how embedders register their
//! own functions.

use std::sync::Once;

use log::debug;

use crate::{
    error::{EvalError, EvalResult},
    fiber, globals, macros, scheduler,
    value::{self, builtins, ObjKind, Value},
};

/// Bootstrap code evaluated at init, in order. Channels are a vector plus a
/// poll-sleep-recur receive loop; `range-sum` sums the half-open range
/// [a, b).
const PRELUDE: &str = r#"
(def chan (fn () (Vector)))
(def send (fn (c v) (do (push! c v) v)))
(def recv (fn (c) (if (> (len c) 0) (shift! c) (do (sleep 1) (recur c)))))
(def range-sum (fn (a b) (if (< a b) (+ a (range-sum (+ a 1) b)) 0)))
"#;

/// Bind the builtin types, the host function library, and the prelude.
/// Idempotent.
pub fn init() {
    static BOUND: Once = Once::new();
    BOUND.call_once(|| {
        bind_types();
        bind_core();
        bind_prelude();
        debug!("stdlib bound");
    });
}

fn bind_types() {
    let b = builtins();
    globals::def_global_named("Type", b.type_type.clone());
    globals::def_global_named("Object", b.object_type.clone());
    globals::def_global_named("Nil", b.nil_type.clone());
    globals::def_global_named("Boolean", b.boolean_type.clone());
    globals::def_global_named("Number", b.number_type.clone());
    globals::def_global_named("String", b.string_type.clone());
    globals::def_global_named("Symbol", b.symbol_type.clone());
    globals::def_global_named("Keyword", b.keyword_type.clone());
    globals::def_global_named("List", b.list_type.clone());
    globals::def_global_named("Vector", b.vector_type.clone());
    globals::def_global_named("Dict", b.dict_type.clone());
    globals::def_global_named("Lambda", b.lambda_type.clone());
    globals::def_global_named("Fiber", b.fiber_type.clone());
    globals::def_global_named("Module", b.module_type.clone());

    globals::def_global_named("true", Value::Bool(true));
    globals::def_global_named("false", Value::Bool(false));
}

fn expect_argc(name: &str, argv: &[Value], n: usize) -> EvalResult<()> {
    if argv.len() != n {
        return Err(EvalError::arity(format!(
            "function {name} requires {n} args, given {}",
            argv.len()
        )));
    }
    Ok(())
}

fn expect_min_argc(name: &str, argv: &[Value], n: usize) -> EvalResult<()> {
    if argv.len() < n {
        return Err(EvalError::arity(format!(
            "function {name} requires at least {n} args, given {}",
            argv.len()
        )));
    }
    Ok(())
}

fn as_f64(v: &Value) -> EvalResult<f64> {
    match v {
        Value::Int(i) => Ok(*i as f64),
        Value::Float(f) => Ok(*f),
        other => Err(EvalError::type_error(format!(
            "expected a number, given {}",
            other.to_string(false)
        ))),
    }
}

/// int op int stays int; any float participant promotes the result.
fn numeric_fold(
    name: &'static str,
    argv: &[Value],
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> EvalResult<Value> {
    let mut acc = argv[0].clone();
    for next in &argv[1..] {
        acc = match (&acc, next) {
            (Value::Int(a), Value::Int(b)) => Value::Int(int_op(*a, *b).ok_or_else(|| {
                EvalError::argument(format!("integer overflow or division by zero in {name}"))
            })?),
            _ => Value::Float(float_op(as_f64(&acc)?, as_f64(next)?)),
        };
    }
    Ok(acc)
}

fn compare_chain(
    name: &'static str,
    argv: &[Value],
    keep: fn(std::cmp::Ordering) -> bool,
) -> EvalResult<Value> {
    expect_min_argc(name, argv, 2)?;
    for pair in argv.windows(2) {
        let a = as_f64(&pair[0])?;
        let b = as_f64(&pair[1])?;
        let Some(ordering) = a.partial_cmp(&b) else {
            return Err(EvalError::argument(format!("{name} cannot order NaN")));
        };
        if !keep(ordering) {
            return Ok(Value::Bool(false));
        }
    }
    Ok(Value::Bool(true))
}

fn def_host(
    name: &'static str,
    f: impl Fn(&[Value], &mut value::CallContext) -> EvalResult<Value> + Send + Sync + 'static,
) {
    globals::def_global_named(name, Value::host_fn(name, f));
}

fn bind_core() {
    def_host("+", |argv, _| {
        if argv.is_empty() {
            return Ok(Value::Int(0));
        }
        numeric_fold("+", argv, i64::checked_add, |a, b| a + b)
    });
    def_host("-", |argv, _| {
        expect_min_argc("-", argv, 1)?;
        if argv.len() == 1 {
            return numeric_fold("-", &[Value::Int(0), argv[0].clone()], i64::checked_sub, |a, b| a - b);
        }
        numeric_fold("-", argv, i64::checked_sub, |a, b| a - b)
    });
    def_host("*", |argv, _| {
        if argv.is_empty() {
            return Ok(Value::Int(1));
        }
        numeric_fold("*", argv, i64::checked_mul, |a, b| a * b)
    });
    def_host("/", |argv, _| {
        expect_min_argc("/", argv, 2)?;
        numeric_fold("/", argv, i64::checked_div, |a, b| a / b)
    });

    def_host("<", |argv, _| compare_chain("<", argv, std::cmp::Ordering::is_lt));
    def_host(">", |argv, _| compare_chain(">", argv, std::cmp::Ordering::is_gt));
    def_host("<=", |argv, _| compare_chain("<=", argv, std::cmp::Ordering::is_le));
    def_host(">=", |argv, _| compare_chain(">=", argv, std::cmp::Ordering::is_ge));

    def_host("=", |argv, _| {
        expect_min_argc("=", argv, 2)?;
        Ok(Value::Bool(
            argv.windows(2).all(|w| value::equals(&w[0], &w[1])),
        ))
    });
    def_host("not=", |argv, _| {
        expect_min_argc("not=", argv, 2)?;
        Ok(Value::Bool(
            !argv.windows(2).all(|w| value::equals(&w[0], &w[1])),
        ))
    });
    def_host("not", |argv, _| {
        expect_argc("not", argv, 1)?;
        Ok(Value::Bool(!argv[0].is_truthy()))
    });

    def_host("nil?", |argv, _| {
        expect_argc("nil?", argv, 1)?;
        Ok(Value::Bool(argv[0].is_nil()))
    });
    def_host("list?", |argv, _| {
        expect_argc("list?", argv, 1)?;
        Ok(Value::Bool(value::is_list(&argv[0])))
    });
    def_host("number?", |argv, _| {
        expect_argc("number?", argv, 1)?;
        Ok(Value::Bool(matches!(
            argv[0],
            Value::Int(_) | Value::Float(_)
        )))
    });

    def_host("list", |argv, _| Ok(Value::list_from_slice(argv)));
    def_host("vector", |argv, _| Ok(Value::vector(argv.to_vec())));
    def_host("dict", |argv, _| {
        if argv.len() % 2 != 0 {
            return Err(EvalError::arity(
                "function dict requires an even number of args",
            ));
        }
        let d = Value::dict(Default::default());
        for pair in argv.chunks(2) {
            value::set(&d, &pair[0], pair[1].clone())?;
        }
        Ok(d)
    });

    def_host("first", |argv, _| {
        expect_argc("first", argv, 1)?;
        value::first(&argv[0])
    });
    def_host("rest", |argv, _| {
        expect_argc("rest", argv, 1)?;
        value::rest(&argv[0])
    });
    def_host("cons", |argv, _| {
        expect_argc("cons", argv, 2)?;
        Ok(value::cons(argv[0].clone(), argv[1].clone()))
    });
    def_host("len", |argv, _| {
        expect_argc("len", argv, 1)?;
        value::size(&argv[0]).map(Value::Int)
    });
    def_host("append", |argv, _| {
        expect_min_argc("append", argv, 1)?;
        let mut acc = argv[0].clone();
        for next in &argv[1..] {
            acc = value::append(&acc, next)?;
        }
        Ok(acc)
    });
    def_host("get", |argv, _| {
        expect_argc("get", argv, 2)?;
        value::get(&argv[0], &argv[1])
    });
    def_host("set", |argv, _| {
        expect_argc("set", argv, 3)?;
        value::set(&argv[0], &argv[1], argv[2].clone())
    });

    def_host("push!", |argv, _| {
        expect_argc("push!", argv, 2)?;
        let Some(obj) = argv[0].as_obj() else {
            return Err(EvalError::type_error("push! requires a vector"));
        };
        let ObjKind::Vector(items) = &obj.kind else {
            return Err(EvalError::type_error("push! requires a vector"));
        };
        items.write().push(argv[1].clone());
        Ok(argv[1].clone())
    });
    def_host("shift!", |argv, _| {
        expect_argc("shift!", argv, 1)?;
        let Some(obj) = argv[0].as_obj() else {
            return Err(EvalError::type_error("shift! requires a vector"));
        };
        let ObjKind::Vector(items) = &obj.kind else {
            return Err(EvalError::type_error("shift! requires a vector"));
        };
        let mut items = items.write();
        if items.is_empty() {
            return Ok(Value::Nil);
        }
        Ok(items.remove(0))
    });

    def_host("getattr", |argv, _| {
        expect_argc("getattr", argv, 2)?;
        let Value::Sym(id) = argv[1] else {
            return Err(EvalError::argument("getattr expects a symbol name"));
        };
        value::get_attr(&argv[0], id)
    });
    def_host("setattr", |argv, _| {
        expect_argc("setattr", argv, 3)?;
        let Value::Sym(id) = argv[1] else {
            return Err(EvalError::argument("setattr expects a symbol name"));
        };
        value::set_attr(&argv[0], id, argv[2].clone())?;
        Ok(argv[2].clone())
    });
    def_host("set-field", |argv, _| {
        expect_argc("set-field", argv, 3)?;
        let Some(t) = argv[0].as_obj().and_then(|o| o.as_type()) else {
            return Err(EvalError::type_error("set-field requires a type"));
        };
        let Value::Sym(id) = argv[1] else {
            return Err(EvalError::argument("set-field expects a symbol name"));
        };
        t.set_field(id, argv[2].clone());
        Ok(argv[2].clone())
    });
    def_host("add-parent", |argv, _| {
        expect_argc("add-parent", argv, 2)?;
        let Some(t) = argv[0].as_obj().and_then(|o| o.as_type()) else {
            return Err(EvalError::type_error("add-parent requires a type"));
        };
        if !value::is_type(&argv[1]) {
            return Err(EvalError::argument("add-parent requires a type parent"));
        }
        t.add_parent(argv[1].clone());
        Ok(Value::Nil)
    });

    def_host("type-of", |argv, _| {
        expect_argc("type-of", argv, 1)?;
        Ok(value::type_of(&argv[0]))
    });
    def_host("hash", |argv, _| {
        expect_argc("hash", argv, 1)?;
        Ok(Value::Int(value::hash_value(&argv[0]) as i64))
    });
    def_host("str", |argv, _| {
        let mut out = String::new();
        for arg in argv {
            out.push_str(&arg.to_string(true));
        }
        Ok(Value::string(out))
    });
    def_host("symbol", |argv, _| {
        expect_argc("symbol", argv, 1)?;
        Ok(Value::sym(&argv[0].to_string(true)))
    });

    def_host("print", |argv, _| {
        let parts: Vec<String> = argv.iter().map(|v| v.to_string(true)).collect();
        print!("{}", parts.join(" "));
        Ok(Value::Nil)
    });
    def_host("println", |argv, _| {
        let parts: Vec<String> = argv.iter().map(|v| v.to_string(true)).collect();
        println!("{}", parts.join(" "));
        Ok(Value::Nil)
    });

    def_host("apply", |argv, _| {
        expect_argc("apply", argv, 2)?;
        let args = value::list_to_vec(&argv[1])?;
        scheduler::call_function(&argv[0], &args)
    });
    def_host("macroexpand-1", |argv, _| {
        expect_argc("macroexpand-1", argv, 1)?;
        macros::macroexpand_1(&argv[0])
    });

    def_host("go", |argv, _| {
        expect_argc("go", argv, 1)?;
        let cell = scheduler::spawn_fiber(&argv[0], &[])?;
        Ok(Value::fiber(cell))
    });
    def_host("join", |argv, _| {
        expect_argc("join", argv, 1)?;
        let Some(obj) = argv[0].as_obj() else {
            return Err(EvalError::type_error("join requires a fiber"));
        };
        let ObjKind::Fiber(cell) = &obj.kind else {
            return Err(EvalError::type_error("join requires a fiber"));
        };
        scheduler::drive(cell)
    });
    def_host("fiber-done?", |argv, _| {
        expect_argc("fiber-done?", argv, 1)?;
        let Some(obj) = argv[0].as_obj() else {
            return Err(EvalError::type_error("fiber-done? requires a fiber"));
        };
        let ObjKind::Fiber(cell) = &obj.kind else {
            return Err(EvalError::type_error("fiber-done? requires a fiber"));
        };
        Ok(Value::Bool(cell.is_done()))
    });
}

fn bind_prelude() {
    for form in crate::reader::Reader::read_all(PRELUDE).expect("prelude must parse") {
        if let Err(err) = fiber::eval_form_on_this_thread(&form) {
            // a broken prelude is a build defect, not a user error
            panic!("prelude failed to evaluate: {err}");
        }
    }
}
