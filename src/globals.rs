//! # Globals
//!
//! The process-wide global bindings shared by every fiber. Reads take a
//! shared lock, writes take an exclusive one. Defining a binding is
//! last-write-wins and there is no unbind.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::{
    error::{EvalError, EvalResult},
    symbol::{self, SymId},
    value::Value,
};

static GLOBALS: Lazy<RwLock<HashMap<SymId, Value>>> = Lazy::new(|| RwLock::new(HashMap::new()));

pub fn def_global(id: SymId, value: Value) {
    GLOBALS.write().insert(id, value);
}

pub fn def_global_named(name: &str, value: Value) {
    def_global(symbol::intern(name), value);
}

pub fn lookup(id: SymId) -> Option<Value> {
    GLOBALS.read().get(&id).cloned()
}

/// Resolve a global, failing with `NameError` when unbound.
pub fn get_global(id: SymId) -> EvalResult<Value> {
    lookup(id).ok_or_else(|| {
        EvalError::name(format!(
            "'{}' is not bound",
            symbol::name_or_placeholder(id)
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_define_then_read() {
        let id = symbol::intern("globals-test-binding");
        def_global(id, Value::Int(7));
        assert_eq!(lookup(id), Some(Value::Int(7)));
    }

    #[test]
    fn test_latest_definition_wins() {
        let id = symbol::intern("globals-test-redefined");
        def_global(id, Value::Int(1));
        def_global(id, Value::Int(2));
        assert_eq!(lookup(id), Some(Value::Int(2)));
    }

    #[test]
    fn test_unbound_read_is_name_error() {
        let id = symbol::intern("globals-test-never-bound");
        let err = get_global(id).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Name);
    }
}
