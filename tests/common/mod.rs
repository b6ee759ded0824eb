//! Shared test helpers for integration tests

use std::cell::RefCell;
use std::rc::Rc;
use thenable::{event_loop, Promise, RunResult, Value};

/// Observed settlement of a promise
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Pending,
    Fulfilled(Value),
    Rejected(Value),
}

/// Install a test-friendly tracing subscriber (honours `RUST_LOG`)
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Attach handlers that record how `promise` settles
pub fn observe(promise: &Promise) -> Rc<RefCell<Outcome>> {
    let outcome = Rc::new(RefCell::new(Outcome::Pending));
    let (on_ok, on_err) = (outcome.clone(), outcome.clone());
    promise.then(
        Value::from_fn(move |v| {
            *on_ok.borrow_mut() = Outcome::Fulfilled(v);
            Ok(Value::Undefined)
        }),
        Value::from_fn(move |e| {
            *on_err.borrow_mut() = Outcome::Rejected(e);
            Ok(Value::Undefined)
        }),
    );
    outcome
}

/// Run the current thread's event loop until it is idle
#[allow(dead_code)]
pub fn run_loop() -> RunResult {
    init_tracing();
    event_loop::current()
        .run_to_completion()
        .expect("event loop should run to completion")
}

/// Observe `promise`, run the loop, and report how it settled
#[allow(dead_code)]
pub fn outcome_of(promise: &Promise) -> Outcome {
    let outcome = observe(promise);
    run_loop();
    let result = outcome.borrow().clone();
    result
}

/// A one-argument handler
#[allow(dead_code)]
pub fn handler<F>(f: F) -> Value
where
    F: Fn(Value) -> Result<Value, Value> + 'static,
{
    Value::from_fn(f)
}

/// A handler that appends `label` to `log` and returns its argument
#[allow(dead_code)]
pub fn logging_handler(log: &Rc<RefCell<Vec<String>>>, label: &str) -> Value {
    let (log, label) = (log.clone(), label.to_string());
    Value::from_fn(move |v| {
        log.borrow_mut().push(label.clone());
        Ok(v)
    })
}
