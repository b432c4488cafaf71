use std::error::Error;
use std::path::Path;

use cedar::{Machine, Value};
use test_utils::{check_eval, Expected};

const FIB: &str =
    "(def fib (fn (n) (if (< n 2) n (+ (fib (- n 1)) (fib (- n 2)))))) (fib 10)";

#[test]
fn interpret_fib() {
    let m = Machine::new();
    assert_eq!(m.eval_string(FIB).unwrap(), Value::Int(55));
}

#[test]
fn interpret_fib_through_binary() -> Result<(), Box<dyn Error>> {
    check_eval(
        Path::new(env!("CARGO_BIN_EXE_cedar")),
        FIB,
        Expected {
            stdout: "55\n",
            stderr: "",
        },
    )
}

#[test]
fn fib_with_recur_accumulator() {
    let m = Machine::new();
    let src = "(def fib-iter (fn (n a b) (if (< 0 n) (recur (- n 1) b (+ a b)) a)))
               (fib-iter 30 0 1)";
    assert_eq!(m.eval_string(src).unwrap(), Value::Int(832040));
}
