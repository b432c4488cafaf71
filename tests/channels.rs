use cedar::{Machine, Value};

#[test]
fn send_then_recv() {
    let m = Machine::new();
    m.eval_string("(def c1 (chan))").unwrap();
    m.eval_string("(send c1 7)").unwrap();
    assert_eq!(m.eval_string("(recv c1)").unwrap(), Value::Int(7));
}

#[test]
fn recv_waits_for_a_concurrent_sender() {
    // the driver keeps running the scheduler while the receiving fiber
    // polls, so the spawned sender gets cpu time
    let m = Machine::new();
    m.eval_string("(def c2 (chan))").unwrap();
    m.eval_string("(go (fn () (send c2 42)))").unwrap();
    assert_eq!(m.eval_string("(recv c2)").unwrap(), Value::Int(42));
}

#[test]
fn recv_waits_through_a_sleeping_sender() {
    let m = Machine::new();
    m.eval_string("(def c3 (chan))").unwrap();
    m.eval_string("(go (fn () (do (sleep 20) (send c3 :late))))")
        .unwrap();
    let got = m.eval_string("(recv c3)").unwrap();
    assert_eq!(got, Value::keyword(":late"));
}

#[test]
fn channel_preserves_order() {
    let m = Machine::new();
    m.eval_string("(def c5 (chan))").unwrap();
    m.eval_string("(send c5 1) (send c5 2) (send c5 3)").unwrap();
    assert_eq!(m.eval_string("(recv c5)").unwrap(), Value::Int(1));
    assert_eq!(m.eval_string("(recv c5)").unwrap(), Value::Int(2));
    assert_eq!(m.eval_string("(recv c5)").unwrap(), Value::Int(3));
}

#[test]
fn go_returns_a_joinable_fiber() {
    let m = Machine::new();
    let v = m
        .eval_string("(join (go (fn () (range-sum 1 100))))")
        .unwrap();
    assert_eq!(v, Value::Int(4950));
}
