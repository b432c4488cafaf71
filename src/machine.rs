//! # Machine
//!
//! The engine facade. Constructing a [`Machine`] performs one-time engine
//! init (worker pool, builtin types, stdlib bindings, prelude); evaluation
//! entry points read, compile, and schedule forms.

use std::fs;
use std::path::Path;

use log::debug;

use crate::{
    compiler,
    error::EvalResult,
    globals, reader::Reader,
    scheduler, stdlib,
    value::Value,
};

pub struct Machine {
    _private: (),
}

impl Machine {
    pub fn new() -> Self {
        scheduler::init();
        stdlib::init();
        Self { _private: () }
    }

    /// Compile and run a single form, propagating any failure.
    pub fn eval_form(&self, form: &Value) -> EvalResult<Value> {
        let compiled = compiler::compile(form)?;
        scheduler::eval_lambda(&compiled)
    }

    /// Compile and run a single form. An uncaught error is printed with its
    /// kind and payload and the result is nil; the engine keeps running.
    pub fn eval(&self, form: &Value) -> Value {
        match self.eval_form(form) {
            Ok(value) => value,
            Err(err) => {
                debug!("uncaught error evaluating '{}'", form.to_string(false));
                eprintln!("{err}");
                Value::Nil
            }
        }
    }

    /// Read every top-level form in `source`, evaluate them in order, and
    /// return the last value.
    pub fn eval_string(&self, source: &str) -> EvalResult<Value> {
        let forms = Reader::read_all(source)?;
        debug!("evaluating {} top-level forms", forms.len());
        let mut last = Value::Nil;
        for form in &forms {
            last = self.eval_form(form)?;
        }
        Ok(last)
    }

    /// Evaluate a file, binding `*file*` to its path first.
    pub fn eval_file(&self, path: &Path) -> EvalResult<Value> {
        let source = fs::read_to_string(path).map_err(|e| {
            crate::error::EvalError::argument(format!(
                "could not read file '{}': {e}",
                path.display()
            ))
        })?;
        globals::def_global_named("*file*", Value::string(path.display().to_string()));
        self.eval_string(&source)
    }
}

impl Default for Machine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_addition() {
        let m = Machine::new();
        assert_eq!(m.eval_string("(+ 1 2)").unwrap(), Value::Int(3));
    }

    #[test]
    fn test_last_form_wins() {
        let m = Machine::new();
        assert_eq!(m.eval_string("(def x 1) (def y 2) (+ x y)").unwrap(), Value::Int(3));
    }

    #[test]
    fn test_uncaught_error_prints_and_returns_nil() {
        let m = Machine::new();
        let form = Reader::read_all("(no-such-function 1)").unwrap().remove(0);
        assert!(m.eval(&form).is_nil());
    }

    #[test]
    fn test_name_error_kind_propagates() {
        let m = Machine::new();
        let err = m.eval_string("definitely-unbound-name").unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Name);
    }
}
