//! # Scheduler
//!
//! M:N cooperative scheduling: many fibers over a fixed pool of worker
//! threads. Every thread that touches the engine owns a work-stealing deque;
//! ready fibers live in exactly one deque at a time. Workers loop on
//! [`volunteer`], which takes local work first and otherwise steals from the
//! longer of two randomly sampled victims. Host calls drive the same loop
//! from their own thread until the fiber they care about completes, so
//! re-entrant calls keep the whole system making progress instead of
//! blocking.

use std::cell::OnceCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Once};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::deque::{Steal, Stealer, Worker};
use log::{debug, error, info};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use rand::Rng;

use crate::{
    error::{EvalError, EvalResult},
    fiber::{Fiber, FiberCell, RunContext},
    symbol,
    value::{self, CallContext, Lambda, Value},
};

type Job = Arc<FiberCell>;

/// Jobs enqueued but not yet completed. The host driver exits when this
/// reaches zero and its own fiber is done.
static PENDING: AtomicU64 = AtomicU64::new(0);

static STEALERS: Lazy<Mutex<Vec<Stealer<Job>>>> = Lazy::new(|| Mutex::new(Vec::new()));

static START: Lazy<Instant> = Lazy::new(Instant::now);

/// Milliseconds since engine start. Monotonic; used only for scheduler
/// bookkeeping, never user-visible.
pub fn now_ms() -> u64 {
    START.elapsed().as_millis() as u64
}

static SLICE_MS: Lazy<u64> = Lazy::new(|| match std::env::var("CDRTIMESLICE") {
    Ok(raw) => match raw.trim().parse::<u64>() {
        Ok(ms) if ms >= 2 => ms,
        _ => {
            error!("$CDRTIMESLICE must be an integer of at least 2 (ms); using the default");
            2
        }
    },
    Err(_) => 2,
});

fn worker_count() -> usize {
    match std::env::var("CDRMAXPROC") {
        Ok(raw) => match raw.trim().parse::<usize>() {
            Ok(n) if n >= 1 => n,
            _ => {
                error!("$CDRMAXPROC must be a positive integer; using the cpu count");
                num_cpus::get()
            }
        },
        Err(_) => num_cpus::get(),
    }
}

thread_local! {
    static LOCAL: OnceCell<Worker<Job>> = OnceCell::new();
}

/// Run `f` with this thread's deque, creating and registering it on first
/// use. Host threads get one the same way worker threads do.
fn with_local<R>(f: impl FnOnce(&Worker<Job>) -> R) -> R {
    LOCAL.with(|cell| {
        let worker = cell.get_or_init(|| {
            let worker = Worker::new_fifo();
            STEALERS.lock().push(worker.stealer());
            debug!("registered a scheduler deque for {:?}", thread::current().id());
            worker
        });
        f(worker)
    })
}

/// Spin up the worker pool. Idempotent; the pool size comes from the cpu
/// count unless `CDRMAXPROC` overrides it.
pub fn init() {
    static STARTED: Once = Once::new();
    STARTED.call_once(|| {
        let n = worker_count();
        info!("starting {n} scheduler workers with a {}ms slice", *SLICE_MS);
        for i in 0..n {
            thread::Builder::new()
                .name(format!("cedar-worker-{i}"))
                .spawn(|| loop {
                    volunteer();
                })
                .expect("failed to spawn a scheduler worker");
        }
    });
}

/// Enqueue a fiber on the calling thread's deque. Other workers pick it up
/// by stealing.
pub fn add_job(job: Job) {
    PENDING.fetch_add(1, Ordering::AcqRel);
    with_local(|w| w.push(job));
}

pub fn pending_jobs() -> u64 {
    PENDING.load(Ordering::Acquire)
}

pub fn all_work_done() -> bool {
    pending_jobs() == 0
}

/// One scheduling step: take a job from the local deque, else steal from
/// the longer of two random victims, else nap briefly. Runs at most one
/// fiber for one slice.
pub fn volunteer() {
    let job = with_local(|w| w.pop()).or_else(steal_work);
    match job {
        Some(job) => {
            if schedule_job(&job) {
                with_local(|w| w.push(job));
            }
        }
        None => thread::sleep(Duration::from_micros(100)),
    }
}

fn steal_work() -> Option<Job> {
    let (first, second) = {
        let stealers = STEALERS.lock();
        if stealers.is_empty() {
            return None;
        }
        let mut rng = rand::thread_rng();
        let a = stealers[rng.gen_range(0..stealers.len())].clone();
        let b = stealers[rng.gen_range(0..stealers.len())].clone();
        (a, b)
    };
    let (bigger, smaller) = if first.len() >= second.len() {
        (first, second)
    } else {
        (second, first)
    };
    for victim in [bigger, smaller] {
        loop {
            match victim.steal() {
                Steal::Success(job) => return Some(job),
                Steal::Empty => break,
                Steal::Retry => continue,
            }
        }
    }
    None
}

/// Give one fiber one slice. Returns whether the fiber should go back on
/// the deque.
fn schedule_job(job: &Job) -> bool {
    let now = now_ms();
    {
        let fiber = job.fiber.lock();
        if now < fiber.last_ran + fiber.sleep_for {
            // not yet due; put it back and let time pass
            return true;
        }
    }

    let slice = *SLICE_MS;
    let mut ctx = RunContext::default();
    {
        let mut fiber = job.fiber.lock();
        fiber.run(&mut ctx, Some(Duration::from_millis(slice)));
        // approximation: reading the clock again after the slice costs more
        // than it is worth
        fiber.last_ran = now + slice;
        fiber.sleep_for = ctx.sleep_for;
    }

    if ctx.done {
        if let Some(err) = &ctx.error {
            error!("fiber {} failed: {err}", job.id());
        }
        job.finish(match ctx.error {
            Some(err) => Err(err),
            None => Ok(ctx.value),
        });
        PENDING.fetch_sub(1, Ordering::AcqRel);
        return false;
    }
    true
}

/// Wrap a bytecode lambda in a fiber and enqueue it.
pub fn spawn_fiber(callee: &Value, args: &[Value]) -> EvalResult<Job> {
    let fiber = Fiber::from_lambda(callee, args)?;
    let cell = FiberCell::new(fiber);
    add_job(Arc::clone(&cell));
    Ok(cell)
}

/// Volunteer from the calling thread until the given fiber completes, then
/// hand back its result.
pub fn drive(cell: &Job) -> EvalResult<Value> {
    while !cell.is_done() {
        volunteer();
    }
    cell.result().unwrap_or(Ok(Value::Nil))
}

/// Keep scheduling until every enqueued fiber has completed.
pub fn run_until_done() {
    while !all_work_done() {
        volunteer();
    }
}

/// Invoke a callable from host code. Host lambdas are called directly on
/// this thread; bytecode lambdas are copied, primed, scheduled as a fiber,
/// and driven to completion. Types allocate and initialize an instance;
/// anything else dispatches through its `apply` method.
pub fn call_function(callee: &Value, args: &[Value]) -> EvalResult<Value> {
    if let Some(obj) = callee.as_obj() {
        if let Some(lambda) = obj.as_lambda() {
            return match lambda {
                Lambda::Host { f, .. } => {
                    let f = Arc::clone(f);
                    let mut ctx = CallContext::detached();
                    f.as_ref()(args, &mut ctx)
                }
                Lambda::Bytecode { .. } => {
                    let cell = spawn_fiber(callee, args)?;
                    drive(&cell)
                }
            };
        }
        if obj.as_type().is_some() {
            let alloc = value::get_attr(callee, symbol::intern("__alloc__"))?;
            let instance = call_function(&alloc, &[])?;
            let ctor = value::get_attr(&instance, symbol::intern("new"))?;
            let mut argv = Vec::with_capacity(args.len() + 1);
            argv.push(instance.clone());
            argv.extend_from_slice(args);
            call_function(&ctor, &argv)?;
            return Ok(instance);
        }
    }
    match value::get_attr(callee, symbol::intern("apply")) {
        Ok(apply) => {
            let mut argv = Vec::with_capacity(args.len() + 1);
            argv.push(callee.clone());
            argv.extend_from_slice(args);
            call_function(&apply, &argv)
        }
        Err(_) => Err(EvalError::type_error(format!(
            "{} is not callable",
            callee.to_string(false)
        ))),
    }
}

pub fn eval_lambda(callee: &Value) -> EvalResult<Value> {
    call_function(callee, &[])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_lambda_called_directly() {
        let f = Value::host_fn("double", |argv, _| match argv[0] {
            Value::Int(i) => Ok(Value::Int(i * 2)),
            _ => unreachable!(),
        });
        assert_eq!(call_function(&f, &[Value::Int(21)]).unwrap(), Value::Int(42));
    }

    #[test]
    fn test_calling_a_non_lambda_is_a_type_error() {
        let err = call_function(&Value::Int(1), &[]).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Type);
    }

    #[test]
    fn test_now_ms_is_monotonic() {
        let a = now_ms();
        thread::sleep(Duration::from_millis(3));
        let b = now_ms();
        assert!(b >= a + 2);
    }
}
