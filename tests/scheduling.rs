use std::process::Command;
use std::time::{Duration, Instant};

use cedar::compiler;
use cedar::fiber::{Fiber, RunContext};
use cedar::reader::Reader;
use cedar::{Machine, Value};

#[test]
fn thousand_fibers_balance_across_workers() {
    let m = Machine::new();
    m.eval_string("(def fibers (Vector))").unwrap();
    m.eval_string(
        "(def spawn-all (fn (n) (if (< 0 n) (do (push! fibers (go (fn () (range-sum 1 1000)))) (recur (- n 1))) nil)))",
    )
    .unwrap();
    m.eval_string("(spawn-all 1000)").unwrap();
    let total = m
        .eval_string(
            "(def sum-all (fn (i acc) (if (< i (len fibers)) (recur (+ i 1) (+ acc (join (get fibers i)))) acc)))
             (sum-all 0 0)",
        )
        .unwrap();
    assert_eq!(total, Value::Int(499_500_000));
}

#[test]
fn sleeping_fiber_does_not_block_ready_work() {
    let m = Machine::new();
    m.eval_string("(def sleeper (go (fn () (do (sleep 800) :woke))))")
        .unwrap();
    let start = Instant::now();
    let busy = m
        .eval_string("(join (go (fn () (range-sum 1 1000))))")
        .unwrap();
    assert_eq!(busy, Value::Int(499_500));
    assert!(
        start.elapsed() < Duration::from_millis(400),
        "ready fiber was starved by a sleeping one"
    );
    assert_eq!(
        m.eval_string("(join sleeper)").unwrap(),
        Value::keyword(":woke")
    );
}

#[test]
fn pure_programs_ignore_slice_size() {
    let _m = Machine::new();
    let form = Reader::read_all("(range-sum 1 5000)").unwrap().remove(0);
    let compiled = compiler::compile(&form).unwrap();

    let mut results = Vec::new();
    for slice in [
        None,
        Some(Duration::from_millis(2)),
        Some(Duration::from_millis(50)),
    ] {
        let mut fiber = Fiber::from_lambda(&compiled, &[]).unwrap();
        let value = loop {
            let mut ctx = RunContext::default();
            fiber.run(&mut ctx, slice);
            if ctx.done {
                assert!(ctx.error.is_none(), "pure program failed: {:?}", ctx.error);
                break ctx.value;
            }
        };
        results.push(value);
    }
    assert!(results.iter().all(|v| *v == Value::Int(12_497_500)));
}

#[test]
fn result_is_identical_with_one_worker() {
    // the same program must produce the same value no matter how many
    // workers the pool has
    let expr = "(def go-sum (fn () (join (go (fn () (range-sum 1 100)))))) (go-sum)";
    let mut outputs = Vec::new();
    for procs in ["1", "4"] {
        let output = Command::new(env!("CARGO_BIN_EXE_cedar"))
            .arg("-e")
            .arg(expr)
            .env("CDRMAXPROC", procs)
            .output()
            .expect("binary runs");
        assert!(output.status.success());
        outputs.push(String::from_utf8(output.stdout).unwrap());
    }
    assert_eq!(outputs[0], "4950\n");
    assert_eq!(outputs[0], outputs[1]);
}

#[test]
fn sleep_resolves_to_nil_and_waits() {
    let m = Machine::new();
    let start = Instant::now();
    assert_eq!(m.eval_string("(sleep 30)").unwrap(), Value::Nil);
    assert!(start.elapsed() >= Duration::from_millis(25));
}

#[test]
fn exit_terminates_the_fiber_with_a_value() {
    let m = Machine::new();
    assert_eq!(m.eval_string("(exit 7)").unwrap(), Value::Int(7));
    // forms after an exit in the same fiber never run, but the machine
    // itself keeps working
    assert_eq!(m.eval_string("(do (exit 1) 2)").unwrap(), Value::Int(1));
    assert_eq!(m.eval_string("(+ 1 1)").unwrap(), Value::Int(2));
}

#[test]
fn errors_kill_only_the_errant_fiber() {
    let m = Machine::new();
    assert!(m.eval_string("(first 42)").is_err());
    // workers survive a fiber failure
    assert_eq!(m.eval_string("(+ 2 2)").unwrap(), Value::Int(4));
    assert_eq!(
        m.eval_string("(join (go (fn () (range-sum 1 10))))").unwrap(),
        Value::Int(45)
    );
}
