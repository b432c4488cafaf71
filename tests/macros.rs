use cedar::{Machine, Value};

#[test]
fn macro_expansion_at_compile_time() {
    let m = Machine::new();
    let src = "(def-macro square (fn (x) (list '* x x))) (square 6)";
    assert_eq!(m.eval_string(src).unwrap(), Value::Int(36));
}

#[test]
fn macroexpand_1_reaches_the_expansion() {
    let m = Machine::new();
    m.eval_string("(def-macro square2 (fn (x) (list '* x x)))")
        .unwrap();
    let expanded = m.eval_string("(macroexpand-1 '(square2 5))").unwrap();
    assert_eq!(expanded.to_string(false), "(* 5 5)");
}

#[test]
fn macroexpand_1_leaves_non_macros_alone() {
    let m = Machine::new();
    let form = m.eval_string("(macroexpand-1 '(+ 1 2))").unwrap();
    assert_eq!(form.to_string(false), "(+ 1 2)");
}

#[test]
fn quasiquote_macro() {
    let m = Machine::new();
    let src = "(def-macro twice (fn (e) `(+ ~e ~e))) (twice 21)";
    assert_eq!(m.eval_string(src).unwrap(), Value::Int(42));
}

#[test]
fn quasiquote_splicing() {
    let m = Machine::new();
    let src = "(def-macro sum-of (fn (& args) `(+ ~@args))) (sum-of 1 2 3)";
    assert_eq!(m.eval_string(src).unwrap(), Value::Int(6));
}

#[test]
fn runaway_expansion_is_diagnosed() {
    let m = Machine::new();
    m.eval_string("(def-macro loopy (fn () '(loopy)))").unwrap();
    let err = m.eval_string("(loopy)").unwrap_err();
    assert_eq!(err.kind, cedar::ErrorKind::Compile);
}

#[test]
fn def_macro_evaluates_to_the_symbol() {
    let m = Machine::new();
    let v = m.eval_string("(def-macro noted (fn (x) x))").unwrap();
    assert_eq!(v.to_string(false), "noted");
}

#[test]
fn registering_a_non_lambda_macro_fails() {
    let m = Machine::new();
    let err = m.eval_string("(def-macro nope 42)").unwrap_err();
    assert_eq!(err.kind, cedar::ErrorKind::Type);
}

#[test]
fn eval_instruction_runs_a_form() {
    let m = Machine::new();
    assert_eq!(m.eval_string("(eval '(+ 1 2))").unwrap(), Value::Int(3));
}
