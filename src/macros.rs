//! # Macros
//!
//! The process-wide macro table and the single-step expander. A macro is a
//! lambda registered under a symbol id; the compiler consults this table for
//! every list head before emitting a call.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::{
    error::{EvalError, EvalResult},
    scheduler,
    symbol::{self, SymId},
    value::{self, Value},
};

static MACROS: Lazy<Mutex<HashMap<SymId, Value>>> = Lazy::new(|| Mutex::new(HashMap::new()));

pub fn is_macro(id: SymId) -> bool {
    MACROS.lock().contains_key(&id)
}

pub fn get_macro(id: SymId) -> Option<Value> {
    MACROS.lock().get(&id).cloned()
}

/// Register a macro. Only lambdas are accepted.
pub fn set_macro(id: SymId, mac: Value) -> EvalResult<()> {
    if !value::is_lambda(&mac) {
        return Err(EvalError::type_error(format!(
            "unable to register macro '{}' on non-lambda {}",
            symbol::name_or_placeholder(id),
            mac.to_string(false)
        )));
    }
    MACROS.lock().insert(id, mac);
    Ok(())
}

/// Expand a form by one step. Non-list forms and forms whose head is not a
/// registered macro symbol come back unchanged.
pub fn macroexpand_1(form: &Value) -> EvalResult<Value> {
    let Some(head) = value::list_head(form) else {
        return Ok(form.clone());
    };
    let Value::Sym(id) = head else {
        return Ok(form.clone());
    };
    let Some(mac) = get_macro(id) else {
        return Ok(form.clone());
    };

    let args = value::list_to_vec(&value::rest(form)?)?;
    scheduler::call_function(&mac, &args)
}
