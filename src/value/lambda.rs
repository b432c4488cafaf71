//! # Lambda
//!
//! Callable values. A lambda is either compiled bytecode plus the closure it
//! was created in, or a host function. Invocation never mutates the lambda
//! that was called: the interpreter copies it and binds a fresh closure, so
//! concurrent calls cannot alias each other's slots.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::{
    bytecode::CodeUnit,
    error::{EvalError, EvalResult},
    value::Value,
};

/// Per-call context handed to host lambdas.
pub struct CallContext {
    /// Id of the fiber driving this call, when there is one. Host lambdas
    /// called directly from host code run without a fiber.
    pub fiber: Option<u64>,
}

impl CallContext {
    pub fn detached() -> Self {
        Self { fiber: None }
    }

    pub fn in_fiber(id: u64) -> Self {
        Self { fiber: Some(id) }
    }
}

pub type HostFn = dyn Fn(&[Value], &mut CallContext) -> EvalResult<Value> + Send + Sync;

/// The mutable slot array bound to one invocation: parameters first, then a
/// snapshot of the defining closure, then locals.
pub struct Closure {
    slots: Vec<RwLock<Value>>,
}

impl Closure {
    pub fn new(size: usize) -> Self {
        Self {
            slots: (0..size).map(|_| RwLock::new(Value::Nil)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, index: usize) -> EvalResult<Value> {
        self.slots
            .get(index)
            .map(|slot| slot.read().clone())
            .ok_or_else(|| EvalError::internal(format!("closure slot {index} out of range")))
    }

    pub fn set(&self, index: usize, value: Value) -> EvalResult<()> {
        let slot = self
            .slots
            .get(index)
            .ok_or_else(|| EvalError::internal(format!("closure slot {index} out of range")))?;
        *slot.write() = value;
        Ok(())
    }
}

pub enum Lambda {
    Bytecode {
        code: Arc<CodeUnit>,
        /// The closure of the defining invocation, inherited on MAKE_FUNC.
        /// A call snapshots it into the fresh closure's capture region.
        closure: RwLock<Option<Arc<Closure>>>,
    },
    Host {
        name: String,
        f: Arc<HostFn>,
    },
}

impl Lambda {
    pub fn from_code(code: Arc<CodeUnit>) -> Self {
        Lambda::Bytecode {
            code,
            closure: RwLock::new(None),
        }
    }

    pub fn host(name: impl Into<String>, f: impl Fn(&[Value], &mut CallContext) -> EvalResult<Value> + Send + Sync + 'static) -> Self {
        Lambda::Host {
            name: name.into(),
            f: Arc::new(f),
        }
    }

    pub fn is_bytecode(&self) -> bool {
        matches!(self, Lambda::Bytecode { .. })
    }

    /// Shallow copy sharing the code unit; used by MAKE_FUNC to rebind the
    /// inherited closure without touching the template in the constant pool.
    pub fn copy_with_closure(&self, inherited: Option<Arc<Closure>>) -> EvalResult<Lambda> {
        match self {
            Lambda::Bytecode { code, .. } => Ok(Lambda::Bytecode {
                code: Arc::clone(code),
                closure: RwLock::new(inherited),
            }),
            Lambda::Host { .. } => Err(EvalError::type_error(
                "host lambdas do not carry a closure",
            )),
        }
    }

    pub fn inherited_closure(&self) -> Option<Arc<Closure>> {
        match self {
            Lambda::Bytecode { closure, .. } => closure.read().clone(),
            Lambda::Host { .. } => None,
        }
    }

    /// Build the private closure for one invocation.
    ///
    /// Layout contract with the compiler: slots `[0, argc)` hold the
    /// arguments (the rest list in the last one for variadic lambdas), slots
    /// `[argc, argc + inherited.len())` hold a copy of the defining closure,
    /// and locals live above that.
    pub fn prime(code: &Arc<CodeUnit>, inherited: Option<&Arc<Closure>>, args: &[Value]) -> EvalResult<Arc<Closure>> {
        let argc = code.argc as usize;
        if code.variadic {
            if args.len() + 1 < argc {
                return Err(EvalError::arity(format!(
                    "function takes at least {} arguments, given {}",
                    argc - 1,
                    args.len()
                )));
            }
        } else if args.len() != argc {
            return Err(EvalError::arity(format!(
                "function takes {} arguments, given {}",
                argc,
                args.len()
            )));
        }

        let inherited_len = inherited.map_or(0, |c| c.len());
        let size = code.closure_slots().max(argc + inherited_len);
        let closure = Closure::new(size);

        if code.variadic {
            let fixed = argc - 1;
            for (i, arg) in args[..fixed].iter().enumerate() {
                closure.set(i, arg.clone())?;
            }
            closure.set(fixed, Value::list_from_slice(&args[fixed..]))?;
        } else {
            for (i, arg) in args.iter().enumerate() {
                closure.set(i, arg.clone())?;
            }
        }

        if let Some(parent) = inherited {
            for i in 0..parent.len() {
                closure.set(argc + i, parent.get(i)?)?;
            }
        }

        Ok(Arc::new(closure))
    }
}
