use cedar::{Machine, Value};

#[test]
fn immediate_lambda_call() {
    let m = Machine::new();
    assert_eq!(m.eval_string("((fn (a b) (+ a b)) 1 2)").unwrap(), Value::Int(3));
}

#[test]
fn let_introduces_locals() {
    let m = Machine::new();
    assert_eq!(
        m.eval_string("(let ((x 1) (y 2)) (+ x y))").unwrap(),
        Value::Int(3)
    );
}

#[test]
fn let_bindings_see_earlier_bindings() {
    let m = Machine::new();
    assert_eq!(
        m.eval_string("(let ((x 2) (y (* x x))) y)").unwrap(),
        Value::Int(4)
    );
}

#[test]
fn closures_capture_enclosing_parameters() {
    let m = Machine::new();
    let src = "(def make-adder (fn (n) (fn (x) (+ x n)))) ((make-adder 5) 10)";
    assert_eq!(m.eval_string(src).unwrap(), Value::Int(15));
}

#[test]
fn closures_capture_let_locals() {
    let m = Machine::new();
    let src = "(def make-counter-base (fn () (let ((base 100)) (fn (x) (+ base x)))))
               ((make-counter-base) 7)";
    assert_eq!(m.eval_string(src).unwrap(), Value::Int(107));
}

#[test]
fn two_level_capture() {
    let m = Machine::new();
    let src = "(((fn (a) (fn (b) (fn (c) (+ a (+ b c))))) 1) 2)";
    let inner = m.eval_string(&format!("({src} 3)")).unwrap();
    assert_eq!(inner, Value::Int(6));
}

#[test]
fn concurrent_calls_do_not_share_closures() {
    // every invocation gets a private copy of its slots
    let m = Machine::new();
    let src = "(def stomp (fn (x) (do (set! x (+ x 1)) x)))
               (+ (stomp 10) (stomp 20))";
    assert_eq!(m.eval_string(src).unwrap(), Value::Int(32));
}

#[test]
fn variadic_rest_argument() {
    let m = Machine::new();
    assert_eq!(
        m.eval_string("((fn (a & rest) (len rest)) 1 2 3 4)").unwrap(),
        Value::Int(3)
    );
    assert_eq!(
        m.eval_string("((fn (a & rest) rest) 1)").unwrap(),
        Value::Nil
    );
    assert_eq!(
        m.eval_string("((fn (a & rest) (first rest)) 1 9 8)").unwrap(),
        Value::Int(9)
    );
}

#[test]
fn arity_is_checked() {
    let m = Machine::new();
    let err = m.eval_string("((fn (a b) a) 1)").unwrap_err();
    assert_eq!(err.kind, cedar::ErrorKind::Arity);
}

#[test]
fn set_bang_yields_the_written_value() {
    let m = Machine::new();
    assert_eq!(m.eval_string("((fn (x) (set! x 7)) 0)").unwrap(), Value::Int(7));
    assert_eq!(
        m.eval_string("((fn (x) (do (set! x 9) x)) 1)").unwrap(),
        Value::Int(9)
    );
}

#[test]
fn recur_rebinds_parameters() {
    let m = Machine::new();
    let src = "((fn (n acc) (if (< 0 n) (recur (- n 1) (+ acc n)) acc)) 10 0)";
    assert_eq!(m.eval_string(src).unwrap(), Value::Int(55));
}

#[test]
fn deep_expression_grows_the_stack() {
    // push far past the initial operand stack; the stack doubles in place
    // and the computation still completes
    let m = Machine::new();
    let depth = 300;
    let mut src = String::new();
    for _ in 0..depth {
        src.push_str("(+ 1 ");
    }
    src.push('0');
    for _ in 0..depth {
        src.push(')');
    }
    assert_eq!(m.eval_string(&src).unwrap(), Value::Int(depth));
}

#[test]
fn do_returns_last_value() {
    let m = Machine::new();
    assert_eq!(m.eval_string("(do 1 2 3)").unwrap(), Value::Int(3));
    assert_eq!(m.eval_string("(do)").unwrap(), Value::Nil);
}

#[test]
fn if_branches() {
    let m = Machine::new();
    assert_eq!(m.eval_string("(if true 1 2)").unwrap(), Value::Int(1));
    assert_eq!(m.eval_string("(if false 1 2)").unwrap(), Value::Int(2));
    assert_eq!(m.eval_string("(if nil 1)").unwrap(), Value::Nil);
    // only nil and false are falsy
    assert_eq!(m.eval_string("(if 0 1 2)").unwrap(), Value::Int(1));
    assert_eq!(m.eval_string("(if \"\" 1 2)").unwrap(), Value::Int(1));
}
