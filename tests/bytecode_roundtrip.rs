use std::sync::Arc;

use cedar::bytecode::{decode, encode, CodeUnit};
use cedar::compiler;
use cedar::reader::Reader;
use cedar::scheduler;
use cedar::value::{Lambda, Value};
use cedar::Machine;

fn code_of(compiled: &Value) -> Arc<CodeUnit> {
    match compiled.as_obj().unwrap().as_lambda().unwrap() {
        Lambda::Bytecode { code, .. } => Arc::clone(code),
        Lambda::Host { .. } => panic!("expected a bytecode lambda"),
    }
}

fn round_trip_eval(src: &str) -> Value {
    let _m = Machine::new();
    let form = Reader::read_all(src).unwrap().remove(0);
    let compiled = compiler::compile(&form).unwrap();
    let bytes = encode(&code_of(&compiled)).unwrap();
    let reloaded = decode(&bytes).unwrap();
    let lambda = Value::lambda(Lambda::from_code(reloaded));
    scheduler::eval_lambda(&lambda).unwrap()
}

#[test]
fn arithmetic_survives_the_wire() {
    assert_eq!(round_trip_eval("(+ 1 2)"), Value::Int(3));
}

#[test]
fn branches_and_constants_survive_the_wire() {
    assert_eq!(
        round_trip_eval("(if (< 1 2) \"yes\" \"no\")"),
        Value::string("yes")
    );
}

#[test]
fn nested_lambdas_survive_the_wire() {
    // templates serialize as nested code units
    assert_eq!(round_trip_eval("((fn (n) (* n n)) 9)"), Value::Int(81));
}

#[test]
fn closures_survive_the_wire() {
    assert_eq!(
        round_trip_eval("(((fn (a) (fn (b) (+ a b))) 40) 2)"),
        Value::Int(42)
    );
}

#[test]
fn quoted_data_survives_the_wire() {
    let v = round_trip_eval("'(a 1 2.5 \"s\" :k)");
    assert_eq!(v.to_string(false), "(a 1 2.5 \"s\" :k)");
}

#[test]
fn decoded_output_reencodes_identically() {
    let _m = Machine::new();
    let form = Reader::read_all("(if (< 1 2) (+ 1 2) 9)").unwrap().remove(0);
    let compiled = compiler::compile(&form).unwrap();
    let bytes = encode(&code_of(&compiled)).unwrap();
    let reloaded = decode(&bytes).unwrap();
    assert_eq!(encode(&reloaded).unwrap(), bytes);
}
