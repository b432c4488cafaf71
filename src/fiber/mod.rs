//! # Fiber
//!
//! Cooperative coroutines. A fiber is plain data: an operand stack and a
//! chain of call frames. Running it means entering the interpreter loop with
//! the fiber and an optional time slice; yielding means returning from that
//! loop with the resume state saved back into the top frame. The scheduler
//! re-enters the loop with the same fiber to resume it.

mod frame;

pub use frame::{alloc_frame, dispose_frame, Frame};

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::{
    bytecode::{CodeUnit, Op},
    error::{EvalError, EvalResult},
    globals, macros, scheduler,
    symbol::{self, SymId},
    value::{self, CallContext, Closure, Lambda, Value},
};

static NEXT_FIBER_ID: AtomicU64 = AtomicU64::new(0);

static ALLOC_ID: Lazy<SymId> = Lazy::new(|| symbol::intern("__alloc__"));
static NEW_ID: Lazy<SymId> = Lazy::new(|| symbol::intern("new"));
static APPLY_ID: Lazy<SymId> = Lazy::new(|| symbol::intern("apply"));

/// Headroom the stack must have before any instruction dispatch.
const STACK_HEADROOM: usize = 10;

/// What one `run` call left behind: a value when the fiber finished, an
/// error when it failed, and the requested sleep when it yielded.
#[derive(Default)]
pub struct RunContext {
    pub value: Value,
    pub done: bool,
    pub sleep_for: u64,
    pub error: Option<EvalError>,
}

pub struct Fiber {
    pub id: u64,
    stack: Vec<Value>,
    frames: Option<Box<Frame>>,
    pub done: bool,
    /// Scheduler bookkeeping: when this fiber last got a slice (ms).
    pub last_ran: u64,
    /// Resumption delay requested by SLEEP (ms).
    pub sleep_for: u64,
}

impl Fiber {
    pub fn new(code: Arc<CodeUnit>, closure: Arc<Closure>) -> Self {
        let mut fiber = Self {
            id: NEXT_FIBER_ID.fetch_add(1, Ordering::Relaxed),
            stack: vec![Value::Nil; (code.stack_size as usize).max(64)],
            frames: None,
            done: false,
            last_ran: 0,
            sleep_for: 0,
        };
        fiber.push_frame(code, closure, 0);
        fiber
    }

    /// Wrap a bytecode lambda and its arguments into a ready fiber.
    pub fn from_lambda(callee: &Value, args: &[Value]) -> EvalResult<Self> {
        let Some(lambda) = callee.as_obj().and_then(|o| o.as_lambda()) else {
            return Err(EvalError::type_error(format!(
                "{} is not callable",
                callee.to_string(false)
            )));
        };
        match lambda {
            Lambda::Bytecode { code, .. } => {
                let inherited = lambda.inherited_closure();
                let closure = Lambda::prime(code, inherited.as_ref(), args)?;
                Ok(Self::new(Arc::clone(code), closure))
            }
            Lambda::Host { .. } => Err(EvalError::type_error(
                "host lambdas run on the caller, not in a fiber",
            )),
        }
    }

    fn push_frame(&mut self, code: Arc<CodeUnit>, closure: Arc<Closure>, sp: usize) {
        self.adjust_stack(sp + code.stack_size as usize + STACK_HEADROOM);
        let mut frame = alloc_frame();
        frame.code = Some(code);
        frame.closure = Some(closure);
        frame.ip = 0;
        frame.sp = sp;
        frame.caller = self.frames.take();
        self.frames = Some(frame);
    }

    fn pop_frame(&mut self) -> Option<Box<Frame>> {
        let mut top = self.frames.take()?;
        self.frames = top.caller.take();
        Some(top)
    }

    /// Grow the operand stack, preserving its contents.
    fn adjust_stack(&mut self, required: usize) {
        if self.stack.len() < required {
            let new_len = required.max(self.stack.len() * 2);
            self.stack.resize(new_len, Value::Nil);
        }
    }

    /// The interpreter loop. Executes until the fiber completes, fails,
    /// sleeps, or the time slice runs out; `ctx` reports which one happened.
    pub fn run(&mut self, ctx: &mut RunContext, slice: Option<Duration>) {
        let start = Instant::now();

        if self.done {
            ctx.done = true;
            ctx.value = Value::Nil;
            return;
        }

        let Some(top) = self.frames.as_ref() else {
            self.done = true;
            ctx.done = true;
            ctx.error = Some(EvalError::internal("fiber has no frames but is not done"));
            return;
        };
        let mut code = top.code.clone().expect("frame carries code");
        let mut closure = top.closure.clone().expect("frame carries a closure");
        let mut ip = top.ip;
        let mut sp = top.sp;
        let mut base = top.sp;

        macro_rules! fail {
            ($err:expr) => {{
                if let Some(f) = self.frames.as_mut() {
                    f.ip = ip;
                    f.sp = sp;
                }
                self.done = true;
                ctx.done = true;
                ctx.value = Value::Nil;
                ctx.error = Some($err);
                return;
            }};
        }

        macro_rules! try_op {
            ($e:expr) => {
                match $e {
                    Ok(v) => v,
                    Err(e) => fail!(e),
                }
            };
        }

        macro_rules! pop {
            () => {{
                if sp == 0 {
                    fail!(EvalError::internal("operand stack underflow"));
                }
                sp -= 1;
                self.stack[sp].clone()
            }};
        }

        macro_rules! push {
            ($v:expr) => {{
                let v = $v;
                self.stack[sp] = v;
                sp += 1;
            }};
        }

        macro_rules! read_u64 {
            () => {{
                if ip + 8 > code.code.len() {
                    fail!(EvalError::internal("truncated instruction immediate"));
                }
                let v = u64::from_le_bytes(code.code[ip..ip + 8].try_into().unwrap());
                ip += 8;
                v
            }};
        }

        macro_rules! read_i64 {
            () => {{
                if ip + 8 > code.code.len() {
                    fail!(EvalError::internal("truncated instruction immediate"));
                }
                let v = i64::from_le_bytes(code.code[ip..ip + 8].try_into().unwrap());
                ip += 8;
                v
            }};
        }

        loop {
            // keep headroom so instruction bodies can push freely
            if sp + STACK_HEADROOM > self.stack.len() {
                let doubled = self.stack.len() * 2;
                self.adjust_stack(doubled);
            }

            if let Some(limit) = slice {
                if start.elapsed() >= limit {
                    if let Some(f) = self.frames.as_mut() {
                        f.ip = ip;
                        f.sp = sp;
                    }
                    ctx.done = false;
                    ctx.value = Value::Nil;
                    return;
                }
            }

            let Some(&byte) = code.code.get(ip) else {
                fail!(EvalError::internal("instruction pointer ran off the code"));
            };
            ip += 1;
            let Some(op) = Op::from_u8(byte) else {
                fail!(EvalError::internal(format!("unknown opcode {byte:#04x}")));
            };

            match op {
                Op::Nop => {}
                Op::Nil => push!(Value::Nil),
                Op::Const => {
                    let k = read_u64!() as usize;
                    let Some(constant) = code.consts.get(k) else {
                        fail!(EvalError::internal(format!("constant {k} out of range")));
                    };
                    push!(constant.clone());
                }
                Op::Int => {
                    let v = read_i64!();
                    push!(Value::Int(v));
                }
                Op::Float => {
                    let raw = read_u64!();
                    push!(Value::Float(f64::from_bits(raw)));
                }
                Op::LoadLocal => {
                    let slot = read_u64!() as usize;
                    push!(try_op!(closure.get(slot)));
                }
                Op::SetLocal => {
                    let slot = read_u64!() as usize;
                    if sp == 0 {
                        fail!(EvalError::internal("operand stack underflow"));
                    }
                    // the written value stays on the stack as the
                    // expression's result
                    try_op!(closure.set(slot, self.stack[sp - 1].clone()));
                }
                Op::LoadGlobal => {
                    let id = read_i64!() as SymId;
                    push!(try_op!(globals::get_global(id)));
                }
                Op::SetGlobal => {
                    let id = read_i64!() as SymId;
                    let v = pop!();
                    globals::def_global(id, v.clone());
                    push!(v);
                }
                Op::Cons => {
                    let tail = pop!();
                    let head = pop!();
                    push!(value::cons(head, tail));
                }
                Op::Append => {
                    let b = pop!();
                    let a = pop!();
                    push!(try_op!(value::append(&a, &b)));
                }
                Op::Call => {
                    let argc = read_i64!() as usize;
                    if sp < argc + 1 {
                        fail!(EvalError::internal("operand stack underflow in call"));
                    }
                    let callee_at = sp - argc - 1;
                    let callee = self.stack[callee_at].clone();

                    let lambda_kind = callee.as_obj().map(|o| {
                        (o.as_lambda().is_some(), o.as_type().is_some())
                    });
                    match lambda_kind {
                        Some((true, _)) => {
                            let obj = callee.as_obj().unwrap();
                            match obj.as_lambda().unwrap() {
                                Lambda::Bytecode {
                                    code: next_code, ..
                                } => {
                                    let inherited =
                                        obj.as_lambda().unwrap().inherited_closure();
                                    let next_closure = try_op!(Lambda::prime(
                                        next_code,
                                        inherited.as_ref(),
                                        &self.stack[sp - argc..sp]
                                    ));
                                    let next_code = Arc::clone(next_code);
                                    if let Some(f) = self.frames.as_mut() {
                                        f.ip = ip;
                                        f.sp = callee_at;
                                    }
                                    self.push_frame(
                                        Arc::clone(&next_code),
                                        Arc::clone(&next_closure),
                                        callee_at,
                                    );
                                    code = next_code;
                                    closure = next_closure;
                                    ip = 0;
                                    sp = callee_at;
                                    base = callee_at;
                                }
                                Lambda::Host { f, .. } => {
                                    let f = Arc::clone(f);
                                    let args = self.stack[sp - argc..sp].to_vec();
                                    let mut call_ctx = CallContext::in_fiber(self.id);
                                    let result = try_op!(f.as_ref()(&args, &mut call_ctx));
                                    sp = callee_at;
                                    push!(result);
                                }
                            }
                        }
                        Some((false, true)) => {
                            // calling a type allocates and initializes an
                            // instance; the instance is the result
                            let alloc = try_op!(value::get_attr(&callee, *ALLOC_ID));
                            let instance = try_op!(scheduler::call_function(&alloc, &[]));
                            let ctor = try_op!(value::get_attr(&instance, *NEW_ID));
                            if !value::is_lambda(&ctor) {
                                fail!(EvalError::type_error(format!(
                                    "`new` method for {} is not a function",
                                    callee.to_string(false)
                                )));
                            }
                            let mut argv = Vec::with_capacity(argc + 1);
                            argv.push(instance.clone());
                            argv.extend_from_slice(&self.stack[sp - argc..sp]);
                            try_op!(scheduler::call_function(&ctor, &argv));
                            sp = callee_at;
                            push!(instance);
                        }
                        _ => {
                            let apply = match value::get_attr(&callee, *APPLY_ID) {
                                Ok(apply) => apply,
                                Err(_) => fail!(EvalError::type_error(format!(
                                    "{} is not callable",
                                    callee.to_string(false)
                                ))),
                            };
                            let mut argv = Vec::with_capacity(argc + 1);
                            argv.push(callee.clone());
                            argv.extend_from_slice(&self.stack[sp - argc..sp]);
                            let result = try_op!(scheduler::call_function(&apply, &argv));
                            sp = callee_at;
                            push!(result);
                        }
                    }
                }
                Op::MakeFunc => {
                    let k = read_u64!() as usize;
                    let Some(template) = code.consts.get(k) else {
                        fail!(EvalError::internal(format!("constant {k} out of range")));
                    };
                    let Some(lambda) = template.as_obj().and_then(|o| o.as_lambda()) else {
                        fail!(EvalError::internal(
                            "MAKE_FUNC constant is not a lambda template"
                        ));
                    };
                    // the child inherits this invocation's closure; a fresh
                    // one is built when it is called
                    let copied = try_op!(lambda.copy_with_closure(Some(Arc::clone(&closure))));
                    push!(Value::lambda(copied));
                }
                Op::Return => {
                    let val = pop!();
                    let old = self.pop_frame().expect("return with no frame");
                    dispose_frame(old);
                    match self.frames.as_ref() {
                        None => {
                            self.done = true;
                            ctx.done = true;
                            ctx.value = val;
                            return;
                        }
                        Some(top) => {
                            code = top.code.clone().expect("frame carries code");
                            closure = top.closure.clone().expect("frame carries a closure");
                            ip = top.ip;
                            sp = top.sp;
                            base = top.sp;
                            push!(val);
                        }
                    }
                }
                Op::Jump => {
                    let target = read_i64!();
                    ip = target as usize;
                }
                Op::JumpIfFalse => {
                    let target = read_i64!();
                    let v = pop!();
                    if !v.is_truthy() {
                        ip = target as usize;
                    }
                }
                Op::Recur => {
                    let n = read_i64!() as usize;
                    if n != code.argc as usize {
                        fail!(EvalError::arity(format!(
                            "recur call has invalid number of arguments: given {n}, expected {}",
                            code.argc
                        )));
                    }
                    if sp < n {
                        fail!(EvalError::internal("operand stack underflow in recur"));
                    }
                    for i in 0..n {
                        try_op!(closure.set(i, self.stack[sp - n + i].clone()));
                    }
                    ip = 0;
                    sp = base;
                }
                Op::Dup => {
                    let k = read_i64!() as usize;
                    if k == 0 || k > sp {
                        fail!(EvalError::internal("DUP offset out of range"));
                    }
                    push!(self.stack[sp - k].clone());
                }
                Op::Skip => {
                    let _ = pop!();
                }
                Op::Swap => {
                    if sp < 2 {
                        fail!(EvalError::internal("operand stack underflow in swap"));
                    }
                    self.stack.swap(sp - 1, sp - 2);
                }
                Op::GetAttr => {
                    let id = read_i64!() as SymId;
                    let obj = pop!();
                    push!(try_op!(value::get_attr(&obj, id)));
                }
                Op::SetAttr => {
                    let id = read_i64!() as SymId;
                    let v = pop!();
                    let obj = pop!();
                    try_op!(value::set_attr(&obj, id, v.clone()));
                    push!(v);
                }
                Op::DefMacro => {
                    let id = read_i64!() as SymId;
                    let f = pop!();
                    try_op!(macros::set_macro(id, f));
                    push!(Value::Sym(id));
                }
                Op::Eval => {
                    let form = pop!();
                    push!(try_op!(eval_form_on_this_thread(&form)));
                }
                Op::Sleep => {
                    let duration = pop!();
                    let ms = match duration {
                        Value::Int(i) => i.max(0) as u64,
                        Value::Float(f) => f.max(0.0) as u64,
                        _ => 0,
                    };
                    if let Some(f) = self.frames.as_mut() {
                        f.ip = ip;
                        f.sp = sp;
                    }
                    ctx.done = false;
                    ctx.value = Value::Nil;
                    ctx.sleep_for = ms;
                    return;
                }
                Op::Exit => {
                    let val = pop!();
                    self.done = true;
                    ctx.done = true;
                    ctx.value = val;
                    return;
                }
            }
        }
    }
}

/// Compile a form and drive a nested fiber to completion right here, on the
/// current thread. A nested fiber that can only be unblocked by work queued
/// behind the current one will stall this worker; that is the documented
/// cost of synchronous EVAL.
pub fn eval_form_on_this_thread(form: &Value) -> EvalResult<Value> {
    let compiled = crate::compiler::compile(form)?;
    let mut fiber = Fiber::from_lambda(&compiled, &[])?;
    loop {
        let mut ctx = RunContext::default();
        fiber.run(&mut ctx, None);
        if ctx.done {
            return match ctx.error {
                Some(err) => Err(err),
                None => Ok(ctx.value),
            };
        }
        if ctx.sleep_for > 0 {
            std::thread::sleep(Duration::from_millis(ctx.sleep_for));
        }
    }
}

/// The shared handle the scheduler and host both hold on a fiber.
pub struct FiberCell {
    id: u64,
    pub fiber: Mutex<Fiber>,
    done: AtomicBool,
    result: Mutex<Option<EvalResult<Value>>>,
}

impl FiberCell {
    pub fn new(fiber: Fiber) -> Arc<Self> {
        Arc::new(Self {
            id: fiber.id,
            fiber: Mutex::new(fiber),
            done: AtomicBool::new(false),
            result: Mutex::new(None),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    pub fn finish(&self, result: EvalResult<Value>) {
        *self.result.lock() = Some(result);
        self.done.store(true, Ordering::Release);
    }

    pub fn result(&self) -> Option<EvalResult<Value>> {
        self.result.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{Assembler, CodeUnit};

    fn run_unit(unit: CodeUnit) -> RunContext {
        let code = Arc::new(unit);
        let closure = Lambda::prime(&code, None, &[]).unwrap();
        let mut fiber = Fiber::new(code, closure);
        let mut ctx = RunContext::default();
        fiber.run(&mut ctx, None);
        ctx
    }

    #[test]
    fn test_push_and_return() {
        let mut asm = Assembler::new();
        asm.emit_i64(Op::Int, 41);
        asm.emit(Op::Return);
        let (code, stack) = asm.finish();
        let ctx = run_unit(CodeUnit::new(code, vec![], 0, false, stack));
        assert!(ctx.done);
        assert_eq!(ctx.value, Value::Int(41));
    }

    #[test]
    fn test_dup_and_swap() {
        let mut asm = Assembler::new();
        asm.emit_i64(Op::Int, 1);
        asm.emit_i64(Op::Int, 2);
        // DUP 2 copies the 1; SWAP leaves [1, 1, 2]; RETURN yields 2
        asm.emit_i64(Op::Dup, 2);
        asm.emit(Op::Swap);
        asm.emit(Op::Return);
        let (code, stack) = asm.finish();
        let ctx = run_unit(CodeUnit::new(code, vec![], 0, false, stack));
        assert_eq!(ctx.value, Value::Int(2));
    }

    #[test]
    fn test_attr_instructions() {
        let obj_sym = crate::symbol::intern("attr-target");
        let attr = crate::symbol::intern("weight");
        crate::globals::def_global(obj_sym, Value::vector(vec![]));

        let mut asm = Assembler::new();
        asm.emit_i64(Op::LoadGlobal, obj_sym as i64);
        asm.emit_i64(Op::Int, 9);
        asm.emit_i64(Op::SetAttr, attr as i64);
        asm.emit(Op::Skip);
        asm.emit_i64(Op::LoadGlobal, obj_sym as i64);
        asm.emit_i64(Op::GetAttr, attr as i64);
        asm.emit(Op::Return);
        let (code, stack) = asm.finish();
        let ctx = run_unit(CodeUnit::new(code, vec![], 0, false, stack));
        assert!(ctx.error.is_none(), "{:?}", ctx.error);
        assert_eq!(ctx.value, Value::Int(9));
    }

    #[test]
    fn test_stack_doubles_past_a_lying_declared_size() {
        // the declared stack size is an upper bound the verifier does not
        // enforce; the headroom check must still keep pushes in bounds
        let mut asm = Assembler::new();
        for i in 0..200 {
            asm.emit_i64(Op::Int, i);
        }
        for _ in 0..199 {
            asm.emit(Op::Skip);
        }
        asm.emit(Op::Return);
        let (code, _) = asm.finish();
        let ctx = run_unit(CodeUnit::new(code, vec![], 0, false, 1));
        assert!(ctx.error.is_none());
        assert_eq!(ctx.value, Value::Int(0));
    }

    #[test]
    fn test_slice_expiry_reports_incomplete() {
        // a jump-to-self loop never finishes; a tiny slice must hand
        // control back with done = false
        let mut asm = Assembler::new();
        let target = asm.position();
        asm.emit(Op::Nop);
        asm.emit_i64(Op::Jump, target as i64);
        let (code, _) = asm.finish();
        let code = Arc::new(CodeUnit::new(code, vec![], 0, false, 4));
        let closure = Lambda::prime(&code, None, &[]).unwrap();
        let mut fiber = Fiber::new(code, closure);
        let mut ctx = RunContext::default();
        fiber.run(&mut ctx, Some(Duration::from_millis(2)));
        assert!(!ctx.done);
        assert!(!fiber.done);
    }

    #[test]
    fn test_exit_completes_with_the_popped_value() {
        let mut asm = Assembler::new();
        asm.emit_i64(Op::Int, 5);
        asm.emit(Op::Exit);
        let (code, stack) = asm.finish();
        let ctx = run_unit(CodeUnit::new(code, vec![], 0, false, stack));
        assert!(ctx.done);
        assert_eq!(ctx.value, Value::Int(5));
    }

    #[test]
    fn test_stack_underflow_is_an_internal_error() {
        let mut asm = Assembler::new();
        asm.emit(Op::Skip);
        let (code, _) = asm.finish();
        let ctx = run_unit(CodeUnit::new(code, vec![], 0, false, 1));
        assert!(ctx.done);
        assert_eq!(
            ctx.error.unwrap().kind,
            crate::error::ErrorKind::Internal
        );
    }

    #[test]
    fn test_sleep_yields_with_a_deadline() {
        let mut asm = Assembler::new();
        asm.emit_i64(Op::Int, 25);
        asm.emit(Op::Sleep);
        asm.emit(Op::Nil);
        asm.emit(Op::Return);
        let code = {
            let (code, stack) = asm.finish();
            Arc::new(CodeUnit::new(code, vec![], 0, false, stack))
        };
        let closure = Lambda::prime(&code, None, &[]).unwrap();
        let mut fiber = Fiber::new(code, closure);
        let mut ctx = RunContext::default();
        fiber.run(&mut ctx, None);
        assert!(!ctx.done);
        assert_eq!(ctx.sleep_for, 25);

        // resuming after the sleep finishes the fiber
        let mut ctx = RunContext::default();
        fiber.run(&mut ctx, None);
        assert!(ctx.done);
        assert_eq!(ctx.value, Value::Nil);
    }
}
