use cedar::{Machine, Value};

#[test]
fn user_type_with_constructor() {
    let m = Machine::new();
    let src = "
        (def Point (Type \"Point\"))
        (set-field Point 'new (fn (self x y) (do (setattr self 'x x) (setattr self 'y y))))
        (def p (Point 3 4))
        (+ (getattr p 'x) (getattr p 'y))";
    assert_eq!(m.eval_string(src).unwrap(), Value::Int(7));
}

#[test]
fn calling_a_type_returns_the_instance() {
    let m = Machine::new();
    let src = "
        (def Marker (Type \"Marker\"))
        (def inst (Marker))
        (= (type-of inst) Marker)";
    assert_eq!(m.eval_string(src).unwrap(), Value::Bool(true));
}

#[test]
fn methods_resolve_through_parents() {
    let m = Machine::new();
    let src = "
        (def Animal (Type \"Animal\"))
        (set-field Animal 'speak (fn (self) \"generic\"))
        (def Dog (Type \"Dog\"))
        (add-parent Dog Animal)
        (def rex (Dog))
        ((getattr rex 'speak) rex)";
    assert_eq!(m.eval_string(src).unwrap(), Value::string("generic"));
}

#[test]
fn leftmost_parent_wins() {
    let m = Machine::new();
    let src = "
        (def Left (Type \"Left\"))
        (set-field Left 'which (fn (self) :left))
        (def Right (Type \"Right\"))
        (set-field Right 'which (fn (self) :right))
        (def Both (Type \"Both\"))
        (add-parent Both Left)
        (add-parent Both Right)
        (def b (Both))
        ((getattr b 'which) b)";
    assert_eq!(m.eval_string(src).unwrap(), Value::keyword(":left"));
}

#[test]
fn own_attributes_shadow_methods() {
    let m = Machine::new();
    let src = "
        (def Thing (Type \"Thing\"))
        (set-field Thing 'tag (fn (self) :method))
        (def t (Thing))
        (setattr t 'tag :mine)
        (getattr t 'tag)";
    assert_eq!(m.eval_string(src).unwrap(), Value::keyword(":mine"));
}

#[test]
fn bytecode_constructors_run_as_fibers() {
    // `new` here is a bytecode lambda, driven through the scheduler from
    // inside the CALL instruction
    let m = Machine::new();
    let src = "
        (def Counter (Type \"Counter\"))
        (set-field Counter 'new (fn (self n) (setattr self 'count (* n 2))))
        (getattr (Counter 21) 'count)";
    assert_eq!(m.eval_string(src).unwrap(), Value::Int(42));
}

#[test]
fn type_of_builtins() {
    let m = Machine::new();
    assert_eq!(m.eval_string("(= (type-of 1) Number)").unwrap(), Value::Bool(true));
    assert_eq!(m.eval_string("(= (type-of 1.5) Number)").unwrap(), Value::Bool(true));
    assert_eq!(m.eval_string("(= (type-of nil) Nil)").unwrap(), Value::Bool(true));
    assert_eq!(m.eval_string("(= (type-of true) Boolean)").unwrap(), Value::Bool(true));
    assert_eq!(m.eval_string("(= (type-of \"s\") String)").unwrap(), Value::Bool(true));
    assert_eq!(m.eval_string("(= (type-of 'a) Symbol)").unwrap(), Value::Bool(true));
    assert_eq!(m.eval_string("(= (type-of '(1)) List)").unwrap(), Value::Bool(true));
    assert_eq!(m.eval_string("(= (type-of [1]) Vector)").unwrap(), Value::Bool(true));
    assert_eq!(m.eval_string("(= (type-of Type) Type)").unwrap(), Value::Bool(true));
}

#[test]
fn setattr_on_immediates_fails() {
    let m = Machine::new();
    let err = m.eval_string("(setattr 5 'x 1)").unwrap_err();
    assert_eq!(err.kind, cedar::ErrorKind::Type);
}

#[test]
fn containers_and_literals() {
    let m = Machine::new();
    assert_eq!(m.eval_string("(len [1 2 3])").unwrap(), Value::Int(3));
    assert_eq!(m.eval_string("(get [10 20 30] 1)").unwrap(), Value::Int(20));
    assert_eq!(m.eval_string("(get {:a 1 :b 2} :b)").unwrap(), Value::Int(2));
    assert_eq!(m.eval_string("(len \"hello\")").unwrap(), Value::Int(5));
    assert_eq!(m.eval_string("(first '(1 2))").unwrap(), Value::Int(1));
    assert_eq!(
        m.eval_string("(cons 1 '(2 3))").unwrap().to_string(false),
        "(1 2 3)"
    );
}
