//! # Compiler
//!
//! Lowers s-expression forms into stack bytecode. One top-level form becomes
//! one zero-argument code unit; nested `fn` forms become lambda templates in
//! the constant pool, instantiated at run time by MAKE_FUNC.
//!
//! Before emitting a call the compiler consults the macro table; a form
//! whose head names a macro is replaced by the macro's output and retried
//! until the head is no longer a macro.

mod scope;

use std::sync::Arc;

use log::trace;

use crate::{
    bytecode::{Assembler, CodeUnit, Op},
    error::{EvalError, EvalResult},
    macros,
    symbol::{self, SymId},
    value::{self, Lambda, ObjKind, Value},
};

use self::scope::{resolve_enclosing, EnclosingScope, FnScope};

/// Runaway-expansion guard for macros that keep producing macro forms.
const MAX_MACRO_EXPANSIONS: usize = 256;

/// Compile a single form into a callable zero-argument lambda.
pub fn compile(form: &Value) -> EvalResult<Value> {
    trace!("compiling form {}", form.to_string(false));
    let unit = compile_lambda(&[], false, std::slice::from_ref(form), &[])?;
    Ok(Value::lambda(Lambda::from_code(unit)))
}

struct PendingLambda {
    params: Vec<SymId>,
    variadic: bool,
    body: Vec<Value>,
    const_index: usize,
    visible: Vec<std::collections::HashMap<SymId, usize>>,
}

struct FnCompiler {
    scope: FnScope,
    asm: Assembler,
    consts: Vec<Value>,
    pending: Vec<PendingLambda>,
}

fn compile_lambda(
    params: &[SymId],
    variadic: bool,
    body: &[Value],
    enclosing: &[EnclosingScope],
) -> EvalResult<Arc<CodeUnit>> {
    let mut c = FnCompiler {
        scope: FnScope::new(params, enclosing.last().map_or(0, |s| s.total_size)),
        asm: Assembler::new(),
        consts: Vec::new(),
        pending: Vec::new(),
    };

    c.compile_body(body, enclosing)?;
    c.asm.emit(Op::Return);

    // Nested lambdas are compiled once this body is finished, so the
    // enclosing closure size they capture against is final.
    let total_size = c.scope.total_size();
    let pending = std::mem::take(&mut c.pending);
    for child in pending {
        let mut chain = enclosing.to_vec();
        chain.push(EnclosingScope {
            argc: c.scope.argc,
            total_size,
            blocks: child.visible,
        });
        let unit = compile_lambda(&child.params, child.variadic, &child.body, &chain)?;
        c.consts[child.const_index] = Value::lambda(Lambda::from_code(unit));
    }

    let (code, stack_size) = c.asm.finish();
    let unit = CodeUnit::new(code, c.consts, params.len() as u16, variadic, stack_size);
    unit.validate()?;
    Ok(Arc::new(unit))
}

impl FnCompiler {
    fn add_const(&mut self, v: Value) -> u64 {
        self.consts.push(v);
        (self.consts.len() - 1) as u64
    }

    fn compile_body(&mut self, body: &[Value], enclosing: &[EnclosingScope]) -> EvalResult<()> {
        if body.is_empty() {
            self.asm.emit(Op::Nil);
            return Ok(());
        }
        for (i, form) in body.iter().enumerate() {
            self.compile_form(form, enclosing)?;
            if i + 1 < body.len() {
                self.asm.emit(Op::Skip);
            }
        }
        Ok(())
    }

    fn compile_form(&mut self, form: &Value, enclosing: &[EnclosingScope]) -> EvalResult<()> {
        match form {
            Value::Nil => {
                self.asm.emit(Op::Nil);
                Ok(())
            }
            Value::Int(i) => {
                self.asm.emit_i64(Op::Int, *i);
                Ok(())
            }
            Value::Float(f) => {
                self.asm.emit_f64(Op::Float, *f);
                Ok(())
            }
            Value::Bool(b) => {
                let name = if *b { "true" } else { "false" };
                self.asm
                    .emit_i64(Op::LoadGlobal, symbol::intern(name) as i64);
                Ok(())
            }
            Value::Keyword(_) => {
                let k = self.add_const(form.clone());
                self.asm.emit_u64(Op::Const, k);
                Ok(())
            }
            Value::Sym(id) => self.compile_sym(*id, enclosing),
            Value::Obj(o) => match &o.kind {
                ObjKind::Str(_) => {
                    let k = self.add_const(form.clone());
                    self.asm.emit_u64(Op::Const, k);
                    Ok(())
                }
                ObjKind::List(_) => self.compile_list(form, enclosing),
                ObjKind::Vector(items) => {
                    let items = items.read().clone();
                    self.asm
                        .emit_i64(Op::LoadGlobal, symbol::intern("vector") as i64);
                    for item in &items {
                        self.compile_form(item, enclosing)?;
                    }
                    self.asm.emit_i64(Op::Call, items.len() as i64);
                    Ok(())
                }
                ObjKind::Dict(table) => {
                    let entries: Vec<(Value, Value)> = table
                        .read()
                        .iter()
                        .map(|(k, v)| (k.0.clone(), v.clone()))
                        .collect();
                    self.asm
                        .emit_i64(Op::LoadGlobal, symbol::intern("dict") as i64);
                    for (k, v) in &entries {
                        self.compile_form(k, enclosing)?;
                        self.compile_form(v, enclosing)?;
                    }
                    self.asm.emit_i64(Op::Call, entries.len() as i64 * 2);
                    Ok(())
                }
                _ => Err(EvalError::compile(format!(
                    "{} cannot appear in source",
                    form.to_string(false)
                ))),
            },
        }
    }

    fn compile_sym(&mut self, id: SymId, enclosing: &[EnclosingScope]) -> EvalResult<()> {
        if id == symbol::intern("nil") {
            self.asm.emit(Op::Nil);
            return Ok(());
        }
        if let Some(slot) = self.scope.lookup(id) {
            self.asm.emit_u64(Op::LoadLocal, slot as u64);
            return Ok(());
        }
        if let Some(outer) = resolve_enclosing(enclosing, id) {
            let slot = self.scope.argc + outer;
            self.asm.emit_u64(Op::LoadLocal, slot as u64);
            return Ok(());
        }
        self.asm.emit_i64(Op::LoadGlobal, id as i64);
        Ok(())
    }

    fn compile_list(&mut self, form: &Value, enclosing: &[EnclosingScope]) -> EvalResult<()> {
        // expand macros until the head is no longer one
        let mut form = form.clone();
        let mut remaining = MAX_MACRO_EXPANSIONS;
        loop {
            let Some(Value::Sym(id)) = value::list_head(&form) else {
                break;
            };
            if is_special_form(id) || !macros::is_macro(id) {
                break;
            }
            if remaining == 0 {
                return Err(EvalError::compile(format!(
                    "macro expansion of '{}' did not terminate",
                    symbol::name_or_placeholder(id)
                )));
            }
            remaining -= 1;
            form = macros::macroexpand_1(&form)?;
            if !value::is_list(&form) {
                return self.compile_form(&form, enclosing);
            }
        }
        if !value::is_list(&form) {
            return self.compile_form(&form, enclosing);
        }

        let items = value::list_to_vec(&form)?;
        let head = &items[0];
        let args = &items[1..];

        if let Value::Sym(id) = head {
            let name = symbol::name_or_placeholder(*id);
            match name.as_str() {
                "quote" => {
                    expect_args("quote", args, 1)?;
                    return self.compile_quote(&args[0], enclosing);
                }
                "quasiquote" => {
                    expect_args("quasiquote", args, 1)?;
                    let expanded = qq_expand(&args[0], 1)?;
                    return self.compile_form(&expanded, enclosing);
                }
                "unquote" | "unquote-splicing" => {
                    return Err(EvalError::compile(format!(
                        "'{name}' outside of quasiquote"
                    )));
                }
                "if" => return self.compile_if(args, enclosing),
                "do" => return self.compile_body(args, enclosing),
                "def" => return self.compile_def(args, enclosing),
                "set!" => return self.compile_set(args, enclosing),
                "let" => return self.compile_let(args, enclosing),
                "fn" => return self.compile_fn(args),
                "recur" => return self.compile_recur(args, enclosing),
                "def-macro" => return self.compile_def_macro(args, enclosing),
                "eval" => {
                    expect_args("eval", args, 1)?;
                    self.compile_form(&args[0], enclosing)?;
                    self.asm.emit(Op::Eval);
                    return Ok(());
                }
                "sleep" => {
                    expect_args("sleep", args, 1)?;
                    self.compile_form(&args[0], enclosing)?;
                    self.asm.emit(Op::Sleep);
                    self.asm.emit(Op::Nil);
                    return Ok(());
                }
                "exit" => {
                    expect_args("exit", args, 1)?;
                    self.compile_form(&args[0], enclosing)?;
                    self.asm.emit(Op::Exit);
                    return Ok(());
                }
                _ => {}
            }
        }

        // ordinary call
        self.compile_form(head, enclosing)?;
        for arg in args {
            self.compile_form(arg, enclosing)?;
        }
        self.asm.emit_i64(Op::Call, args.len() as i64);
        Ok(())
    }

    fn compile_quote(&mut self, v: &Value, enclosing: &[EnclosingScope]) -> EvalResult<()> {
        match v {
            Value::Nil => {
                self.asm.emit(Op::Nil);
                Ok(())
            }
            Value::Int(i) => {
                self.asm.emit_i64(Op::Int, *i);
                Ok(())
            }
            Value::Float(f) => {
                self.asm.emit_f64(Op::Float, *f);
                Ok(())
            }
            Value::Bool(b) => {
                let name = if *b { "true" } else { "false" };
                self.asm
                    .emit_i64(Op::LoadGlobal, symbol::intern(name) as i64);
                Ok(())
            }
            Value::Sym(_) | Value::Keyword(_) => {
                let k = self.add_const(v.clone());
                self.asm.emit_u64(Op::Const, k);
                Ok(())
            }
            Value::Obj(o) => match &o.kind {
                ObjKind::Str(_) => {
                    let k = self.add_const(v.clone());
                    self.asm.emit_u64(Op::Const, k);
                    Ok(())
                }
                ObjKind::List(_) => {
                    let items = value::list_to_vec(v)?;
                    for item in &items {
                        self.compile_quote(item, enclosing)?;
                    }
                    self.asm.emit(Op::Nil);
                    for _ in 0..items.len() {
                        self.asm.emit(Op::Cons);
                    }
                    Ok(())
                }
                ObjKind::Vector(items) => {
                    let items = items.read().clone();
                    self.asm
                        .emit_i64(Op::LoadGlobal, symbol::intern("vector") as i64);
                    for item in &items {
                        self.compile_quote(item, enclosing)?;
                    }
                    self.asm.emit_i64(Op::Call, items.len() as i64);
                    Ok(())
                }
                ObjKind::Dict(table) => {
                    let entries: Vec<(Value, Value)> = table
                        .read()
                        .iter()
                        .map(|(k, v)| (k.0.clone(), v.clone()))
                        .collect();
                    self.asm
                        .emit_i64(Op::LoadGlobal, symbol::intern("dict") as i64);
                    for (k, v) in &entries {
                        self.compile_quote(k, enclosing)?;
                        self.compile_quote(v, enclosing)?;
                    }
                    self.asm.emit_i64(Op::Call, entries.len() as i64 * 2);
                    Ok(())
                }
                _ => Err(EvalError::compile(format!(
                    "{} cannot be quoted",
                    v.to_string(false)
                ))),
            },
        }
    }

    fn compile_if(&mut self, args: &[Value], enclosing: &[EnclosingScope]) -> EvalResult<()> {
        if args.len() != 2 && args.len() != 3 {
            return Err(EvalError::compile("'if' takes a condition and one or two branches"));
        }
        self.compile_form(&args[0], enclosing)?;
        let to_else = self.asm.emit_jump(Op::JumpIfFalse);
        self.compile_form(&args[1], enclosing)?;
        let to_end = self.asm.emit_jump(Op::Jump);
        let else_at = self.asm.position();
        self.asm.patch_jump(to_else, else_at);
        match args.get(2) {
            Some(alt) => self.compile_form(alt, enclosing)?,
            None => self.asm.emit(Op::Nil),
        }
        let end = self.asm.position();
        self.asm.patch_jump(to_end, end);
        Ok(())
    }

    fn compile_def(&mut self, args: &[Value], enclosing: &[EnclosingScope]) -> EvalResult<()> {
        let [name, body] = args else {
            return Err(EvalError::compile("'def' takes a name and a value"));
        };
        let Value::Sym(id) = name else {
            return Err(EvalError::compile(format!(
                "'def' requires a symbol name, given {}",
                name.to_string(false)
            )));
        };
        self.compile_form(body, enclosing)?;
        self.asm.emit_i64(Op::SetGlobal, *id as i64);
        Ok(())
    }

    fn compile_set(&mut self, args: &[Value], enclosing: &[EnclosingScope]) -> EvalResult<()> {
        let [name, body] = args else {
            return Err(EvalError::compile("'set!' takes a name and a value"));
        };
        let Value::Sym(id) = name else {
            return Err(EvalError::compile(format!(
                "'set!' requires a symbol name, given {}",
                name.to_string(false)
            )));
        };
        self.compile_form(body, enclosing)?;
        if let Some(slot) = self.scope.lookup(*id) {
            // SET_LOCAL leaves the value on the stack, so the whole form
            // evaluates to it
            self.asm.emit_u64(Op::SetLocal, slot as u64);
        } else if let Some(outer) = resolve_enclosing(enclosing, *id) {
            let slot = self.scope.argc + outer;
            self.asm.emit_u64(Op::SetLocal, slot as u64);
        } else {
            self.asm.emit_i64(Op::SetGlobal, *id as i64);
        }
        Ok(())
    }

    fn compile_let(&mut self, args: &[Value], enclosing: &[EnclosingScope]) -> EvalResult<()> {
        let Some((bindings, body)) = args.split_first() else {
            return Err(EvalError::compile("'let' takes a binding list and a body"));
        };
        let bindings = value::list_to_vec(bindings)
            .map_err(|_| EvalError::compile("'let' bindings must be a list"))?;

        self.scope.push_block();
        for binding in &bindings {
            let pair = value::list_to_vec(binding)
                .map_err(|_| EvalError::compile("each 'let' binding must be a (name value) pair"))?;
            let [name, init] = pair.as_slice() else {
                return Err(EvalError::compile(
                    "each 'let' binding must be a (name value) pair",
                ));
            };
            let Value::Sym(id) = name else {
                return Err(EvalError::compile(format!(
                    "'let' requires symbol names, given {}",
                    name.to_string(false)
                )));
            };
            self.compile_form(init, enclosing)?;
            let slot = self.scope.declare_local(*id);
            self.asm.emit_u64(Op::SetLocal, slot as u64);
            self.asm.emit(Op::Skip);
        }
        self.compile_body(body, enclosing)?;
        self.scope.pop_block();
        Ok(())
    }

    fn compile_fn(&mut self, args: &[Value]) -> EvalResult<()> {
        let Some((params_form, body)) = args.split_first() else {
            return Err(EvalError::compile("'fn' takes a parameter list and a body"));
        };
        let raw = value::list_to_vec(params_form)
            .map_err(|_| EvalError::compile("'fn' parameters must be a list"))?;

        let amp = symbol::intern("&");
        let mut params = Vec::new();
        let mut variadic = false;
        let mut iter = raw.iter().peekable();
        while let Some(p) = iter.next() {
            let Value::Sym(id) = p else {
                return Err(EvalError::compile(format!(
                    "'fn' parameters must be symbols, given {}",
                    p.to_string(false)
                )));
            };
            if *id == amp {
                let Some(Value::Sym(rest)) = iter.next() else {
                    return Err(EvalError::compile("'&' must be followed by a rest parameter"));
                };
                if iter.peek().is_some() {
                    return Err(EvalError::compile("the rest parameter must come last"));
                }
                params.push(*rest);
                variadic = true;
                break;
            }
            params.push(*id);
        }

        let const_index = self.add_const(Value::Nil) as usize;
        self.pending.push(PendingLambda {
            params,
            variadic,
            body: body.to_vec(),
            const_index,
            visible: self.scope.snapshot(),
        });
        self.asm.emit_u64(Op::MakeFunc, const_index as u64);
        Ok(())
    }

    fn compile_recur(&mut self, args: &[Value], enclosing: &[EnclosingScope]) -> EvalResult<()> {
        if args.len() != self.scope.argc {
            return Err(EvalError::compile(format!(
                "recur call has invalid number of arguments: given {}, expected {}",
                args.len(),
                self.scope.argc
            )));
        }
        for arg in args {
            self.compile_form(arg, enclosing)?;
        }
        self.asm.emit_i64(Op::Recur, args.len() as i64);
        Ok(())
    }

    fn compile_def_macro(&mut self, args: &[Value], enclosing: &[EnclosingScope]) -> EvalResult<()> {
        let [name, body] = args else {
            return Err(EvalError::compile("'def-macro' takes a name and a function"));
        };
        let Value::Sym(id) = name else {
            return Err(EvalError::compile(format!(
                "'def-macro' requires a symbol name, given {}",
                name.to_string(false)
            )));
        };
        self.compile_form(body, enclosing)?;
        self.asm.emit_i64(Op::DefMacro, *id as i64);
        Ok(())
    }
}

fn expect_args(name: &str, args: &[Value], n: usize) -> EvalResult<()> {
    if args.len() != n {
        return Err(EvalError::compile(format!(
            "'{name}' takes {n} argument{}",
            if n == 1 { "" } else { "s" }
        )));
    }
    Ok(())
}

fn is_special_form(id: SymId) -> bool {
    matches!(
        symbol::name_or_placeholder(id).as_str(),
        "quote"
            | "quasiquote"
            | "unquote"
            | "unquote-splicing"
            | "if"
            | "do"
            | "def"
            | "set!"
            | "let"
            | "fn"
            | "recur"
            | "def-macro"
            | "eval"
            | "sleep"
            | "exit"
    )
}

/// Rewrite a quasiquoted form into plain list construction. Unquotes splice
/// evaluated expressions back in; everything else stays quoted.
fn qq_expand(form: &Value, depth: usize) -> EvalResult<Value> {
    if !value::is_list(form) {
        return Ok(Value::list_from_slice(&[Value::sym("quote"), form.clone()]));
    }
    let items = value::list_to_vec(form)?;

    if let Some(Value::Sym(id)) = items.first() {
        let name = symbol::name_or_placeholder(*id);
        if name == "unquote" && items.len() == 2 {
            if depth == 1 {
                return Ok(items[1].clone());
            }
            return Ok(Value::list_from_slice(&[
                Value::sym("list"),
                Value::list_from_slice(&[Value::sym("quote"), Value::sym("unquote")]),
                qq_expand(&items[1], depth - 1)?,
            ]));
        }
        if name == "quasiquote" && items.len() == 2 {
            return Ok(Value::list_from_slice(&[
                Value::sym("list"),
                Value::list_from_slice(&[Value::sym("quote"), Value::sym("quasiquote")]),
                qq_expand(&items[1], depth + 1)?,
            ]));
        }
    }

    // segments: runs of ordinary elements become one `list` call, splices
    // pass through unchanged, all joined with `append`
    let mut segments: Vec<Value> = Vec::new();
    let mut run: Vec<Value> = vec![Value::sym("list")];
    for item in &items {
        let mut spliced = None;
        if depth == 1 && value::is_list(item) {
            let inner = value::list_to_vec(item)?;
            if inner.len() == 2 {
                if let Some(Value::Sym(id)) = inner.first() {
                    if symbol::name_or_placeholder(*id) == "unquote-splicing" {
                        spliced = Some(inner[1].clone());
                    }
                }
            }
        }
        match spliced {
            Some(expr) => {
                if run.len() > 1 {
                    segments.push(Value::list_from_slice(&run));
                    run = vec![Value::sym("list")];
                }
                segments.push(expr);
            }
            None => run.push(qq_expand(item, depth)?),
        }
    }
    if run.len() > 1 || segments.is_empty() {
        segments.push(Value::list_from_slice(&run));
    }

    let mut out = segments.pop().expect("at least one segment");
    while let Some(seg) = segments.pop() {
        out = Value::list_from_slice(&[Value::sym("append"), seg, out]);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::Reader;

    fn compile_src(src: &str) -> EvalResult<Value> {
        let form = Reader::read_all(src).unwrap().remove(0);
        compile(&form)
    }

    fn code_of(v: &Value) -> Arc<CodeUnit> {
        match v.as_obj().unwrap().as_lambda().unwrap() {
            Lambda::Bytecode { code, .. } => Arc::clone(code),
            Lambda::Host { .. } => panic!("expected a bytecode lambda"),
        }
    }

    #[test]
    fn test_compile_integer_literal() {
        let unit = code_of(&compile_src("42").unwrap());
        assert_eq!(unit.code[0], Op::Int as u8);
        assert_eq!(unit.argc, 0);
    }

    #[test]
    fn test_compiled_unit_passes_validation() {
        let unit = code_of(&compile_src("(if (< 1 2) (+ 1 2) 9)").unwrap());
        unit.validate().unwrap();
    }

    #[test]
    fn test_stack_size_is_positive_bound() {
        let unit = code_of(&compile_src("(+ 1 (+ 2 (+ 3 4)))").unwrap());
        assert!(unit.stack_size >= 4);
    }

    #[test]
    fn test_fn_becomes_template_constant() {
        let unit = code_of(&compile_src("(fn (a b) (+ a b))").unwrap());
        let template = unit
            .consts
            .iter()
            .find(|c| value::is_lambda(c))
            .expect("lambda template in constants");
        let inner = code_of(template);
        assert_eq!(inner.argc, 2);
        assert!(!inner.variadic);
    }

    #[test]
    fn test_variadic_params() {
        let unit = code_of(&compile_src("(fn (a & rest) rest)").unwrap());
        let template = unit.consts.iter().find(|c| value::is_lambda(c)).unwrap();
        let inner = code_of(template);
        assert_eq!(inner.argc, 2);
        assert!(inner.variadic);
    }

    #[test]
    fn test_recur_arity_checked() {
        let err = compile_src("(fn (a b) (recur a))");
        // the error surfaces when the nested lambda body is compiled
        assert!(err.is_err());
        assert_eq!(err.unwrap_err().kind, crate::error::ErrorKind::Compile);
    }

    #[test]
    fn test_unquote_outside_quasiquote_fails() {
        let err = compile_src("(unquote x)").unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Compile);
    }

    #[test]
    fn test_qq_expansion_shapes() {
        let form = Reader::read_all("`(a ~b ~@c)").unwrap().remove(0);
        let inner = value::list_to_vec(&form).unwrap().remove(1);
        let expanded = qq_expand(&inner, 1).unwrap();
        assert_eq!(
            expanded.to_string(false),
            "(append (list (quote a) b) c)"
        );
    }

    #[test]
    fn test_captured_variable_uses_offset_slot() {
        // inner `a` lives at inner.argc + outer slot of `a` = 1 + 0
        let unit = code_of(&compile_src("(fn (a) (fn (b) a))").unwrap());
        let outer = code_of(unit.consts.iter().find(|c| value::is_lambda(c)).unwrap());
        let inner = code_of(outer.consts.iter().find(|c| value::is_lambda(c)).unwrap());
        assert_eq!(inner.closure_slots(), 2);
    }
}
