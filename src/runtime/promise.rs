//! Promise Implementation
//!
//! A Promise/A+ conforming promise. State, value and the reaction queue are
//! private to this module; the only mutation point is `settle`. Reactions
//! always run on a later turn through the promise's [`Scheduler`], one at a
//! time and in registration order.

use super::value::{Object, Value};
use crate::error::messages;
use crate::event_loop::{self, Scheduler};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace};

/// ID counter for Promise tracking
static PROMISE_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle state. `Fulfilled` and `Rejected` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PromiseState {
    Pending,
    Fulfilled,
    Rejected,
}

/// Subscriber invoked with the final state and value once the promise settles
type Reaction = Box<dyn FnOnce(PromiseState, Value)>;

struct PromiseCell {
    state: PromiseState,
    value: Value,
    reactions: VecDeque<Reaction>,
}

struct Shared {
    id: u64,
    scheduler: Rc<dyn Scheduler>,
    cell: RefCell<PromiseCell>,
}

/// A deferred value that settles exactly once.
///
/// `Promise` is a cheap handle; clones refer to the same promise. It is
/// single-threaded (`!Send`).
///
/// # Examples
///
/// ```
/// use thenable::{event_loop, Promise, Value};
/// use std::cell::RefCell;
/// use std::rc::Rc;
///
/// let seen = Rc::new(RefCell::new(None));
/// let s = seen.clone();
/// Promise::resolve(5)
///     .then(Value::from_fn(|v| Ok(Value::Number(v.as_number().unwrap() + 1.0))), Value::Undefined)
///     .then(Value::from_fn(move |v| { *s.borrow_mut() = Some(v); Ok(Value::Undefined) }), Value::Undefined);
///
/// assert!(seen.borrow().is_none());
/// event_loop::current().run_to_completion().unwrap();
/// assert_eq!(*seen.borrow(), Some(Value::Number(6.0)));
/// ```
#[derive(Clone)]
pub struct Promise {
    shared: Rc<Shared>,
}

/// The resolve capability handed to an executor.
///
/// Shares a once-only flag with its [`RejectFn`]: only the first call of
/// either has any effect; later calls are silently ignored.
#[derive(Clone)]
pub struct ResolveFn {
    promise: Promise,
    already_called: Rc<Cell<bool>>,
}

/// The reject capability handed to an executor.
#[derive(Clone)]
pub struct RejectFn {
    promise: Promise,
    already_called: Rc<Cell<bool>>,
}

impl ResolveFn {
    /// Resolve the promise with `value` through the resolution procedure
    pub fn call(&self, value: impl Into<Value>) {
        if self.already_called.replace(true) {
            return;
        }
        resolve_promise(&self.promise, value.into());
    }
}

impl RejectFn {
    /// Reject the promise with `reason`
    pub fn call(&self, reason: impl Into<Value>) {
        if self.already_called.replace(true) {
            return;
        }
        settle(&self.promise, reason.into(), PromiseState::Rejected);
    }
}

impl From<ResolveFn> for Value {
    fn from(resolve: ResolveFn) -> Self {
        Value::function("resolve", move |_this, args| {
            resolve.call(args.first().cloned().unwrap_or_default());
            Ok(Value::Undefined)
        })
    }
}

impl From<RejectFn> for Value {
    fn from(reject: RejectFn) -> Self {
        Value::function("reject", move |_this, args| {
            reject.call(args.first().cloned().unwrap_or_default());
            Ok(Value::Undefined)
        })
    }
}

impl Promise {
    /// Create a promise driven by `executor`, scheduled on the current
    /// thread's event loop.
    ///
    /// The executor runs synchronously, once. If it returns `Err` before
    /// either capability was used, the promise rejects with that value;
    /// otherwise the error is discarded.
    pub fn new<F>(executor: F) -> Self
    where
        F: FnOnce(ResolveFn, RejectFn) -> Result<(), Value>,
    {
        Self::with_scheduler(Rc::new(event_loop::current()), executor)
    }

    /// Like [`Promise::new`], deferring reactions through `scheduler`
    pub fn with_scheduler<F>(scheduler: Rc<dyn Scheduler>, executor: F) -> Self
    where
        F: FnOnce(ResolveFn, RejectFn) -> Result<(), Value>,
    {
        let promise = Self::pending_in(scheduler);
        let (resolve, reject) = promise.capabilities();
        let already_called = resolve.already_called.clone();

        if let Err(err) = executor(resolve, reject) {
            if !already_called.replace(true) {
                settle(&promise, err, PromiseState::Rejected);
            } else {
                trace!(promise = promise.id(), "executor error after settlement discarded");
            }
        }
        promise
    }

    /// A promise with no executor. It stays pending forever unless driven
    /// through [`resolve_promise`] or [`reject_promise`].
    pub fn pending() -> Self {
        Self::pending_in(Rc::new(event_loop::current()))
    }

    /// Like [`Promise::pending`], deferring reactions through `scheduler`
    pub fn pending_in(scheduler: Rc<dyn Scheduler>) -> Self {
        let id = PROMISE_ID.fetch_add(1, Ordering::Relaxed);
        trace!(promise = id, "created");
        Self {
            shared: Rc::new(Shared {
                id,
                scheduler,
                cell: RefCell::new(PromiseCell {
                    state: PromiseState::Pending,
                    value: Value::Undefined,
                    reactions: VecDeque::new(),
                }),
            }),
        }
    }

    /// `Promise.resolve`: returns `x` itself if it already is a promise of
    /// this kind, else a new promise resolved with `x`.
    pub fn resolve(x: impl Into<Value>) -> Self {
        match x.into() {
            Value::Promise(p) => p,
            x => Self::new(move |resolve, _| {
                resolve.call(x);
                Ok(())
            }),
        }
    }

    /// `Promise.reject`: returns `x` itself if it already is a promise of
    /// this kind, else a new promise rejected with `x`.
    pub fn reject(x: impl Into<Value>) -> Self {
        match x.into() {
            Value::Promise(p) => p,
            x => Self::new(move |_, reject| {
                reject.call(x);
                Ok(())
            }),
        }
    }

    /// Register reactions and return a new promise for their outcome.
    ///
    /// Non-callable handlers (`Value::Undefined` included) pass the value or
    /// reason through unchanged. Handlers are called with an `undefined`
    /// receiver, never synchronously from this call. A handler's return value
    /// is fed to the resolution procedure of the returned promise; a thrown
    /// value rejects it.
    pub fn then(&self, on_fulfilled: impl Into<Value>, on_rejected: impl Into<Value>) -> Promise {
        let on_fulfilled = on_fulfilled.into();
        let on_rejected = on_rejected.into();
        let source = self.clone();

        Promise::with_scheduler(self.shared.scheduler.clone(), move |resolve, reject| {
            source.depend(Box::new(move |state: PromiseState, value: Value| {
                let handler = match state {
                    PromiseState::Fulfilled => on_fulfilled,
                    _ => on_rejected,
                };
                if handler.is_callable() {
                    match handler.call(&Value::Undefined, &[value]) {
                        Ok(x) => resolve.call(x),
                        Err(err) => reject.call(err),
                    }
                } else if state == PromiseState::Fulfilled {
                    resolve.call(value);
                } else {
                    reject.call(value);
                }
            }));
            // Already settled: the queue is still only drained asynchronously.
            if !source.is_pending() {
                source.notify();
            }
            Ok(())
        })
    }

    /// A fresh resolve/reject pair sharing one once-only flag
    pub(crate) fn capabilities(&self) -> (ResolveFn, RejectFn) {
        let already_called = Rc::new(Cell::new(false));
        let resolve = ResolveFn {
            promise: self.clone(),
            already_called: already_called.clone(),
        };
        let reject = RejectFn {
            promise: self.clone(),
            already_called,
        };
        (resolve, reject)
    }

    /// Process-unique identifier, as reported in log events
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    /// Whether both handles refer to the same promise
    pub fn ptr_eq(&self, other: &Promise) -> bool {
        Rc::ptr_eq(&self.shared, &other.shared)
    }

    pub(crate) fn is_pending(&self) -> bool {
        self.shared.cell.borrow().state == PromiseState::Pending
    }

    pub(crate) fn snapshot(&self) -> (PromiseState, Value) {
        let cell = self.shared.cell.borrow();
        (cell.state, cell.value.clone())
    }

    /// A callable `then` bound to this promise, so foreign code can treat it
    /// as a thenable
    pub(crate) fn then_function(&self) -> Value {
        let promise = self.clone();
        Value::function("then", move |_this, args| {
            let on_fulfilled = args.first().cloned().unwrap_or_default();
            let on_rejected = args.get(1).cloned().unwrap_or_default();
            Ok(Value::Promise(promise.then(on_fulfilled, on_rejected)))
        })
    }

    fn depend(&self, reaction: Reaction) {
        self.shared.cell.borrow_mut().reactions.push_back(reaction);
    }

    fn notify(&self) {
        let promise = self.clone();
        trace!(promise = self.id(), "drain scheduled");
        self.shared.scheduler.schedule(Box::new(move || promise.drain()));
    }

    /// Run the reactions queued when this pass starts, FIFO. No borrow is
    /// held while a reaction executes; reactions registered meanwhile wait
    /// for the drain their own `then` scheduled.
    fn drain(&self) {
        let (reactions, state, value) = {
            let mut cell = self.shared.cell.borrow_mut();
            (std::mem::take(&mut cell.reactions), cell.state, cell.value.clone())
        };
        for reaction in reactions {
            reaction(state, value.clone());
        }
    }
}

impl fmt::Debug for Promise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise").field("id", &self.id()).finish()
    }
}

/// Settle `promise` unless it already left the pending state, then schedule
/// the asynchronous drain of its reactions.
pub(crate) fn settle(promise: &Promise, value: Value, state: PromiseState) {
    debug_assert!(state != PromiseState::Pending);
    {
        let mut cell = promise.shared.cell.borrow_mut();
        if cell.state != PromiseState::Pending {
            return;
        }
        cell.value = value;
        cell.state = state;
    }
    trace!(promise = promise.id(), ?state, "settled");
    promise.notify();
}

/// The promise resolution procedure, `[[Resolve]](promise, x)`.
///
/// - a settled `promise` is left alone;
/// - `x` being `promise` itself rejects with a `TypeError`;
/// - a promise of this kind is adopted, now or once it settles;
/// - an object or function whose `then` is callable is treated as a
///   thenable; reading `then` or calling it may throw, which rejects;
/// - anything else fulfills `promise` directly.
///
/// Exposed for conformance harnesses that drive state transitions without a
/// constructor. A thenable that resolves with itself is rejected, but
/// indirect cycles through several thenables are not detected and recurse
/// until the stack is exhausted.
pub fn resolve_promise(promise: &Promise, x: Value) {
    if !promise.is_pending() {
        return;
    }
    match x {
        Value::Promise(other) => {
            if other.ptr_eq(promise) {
                debug!(promise = promise.id(), "promise resolved with itself");
                settle(
                    promise,
                    Value::type_error(messages::SELF_RESOLUTION),
                    PromiseState::Rejected,
                );
            } else {
                adopt_promise(promise, &other);
            }
        }
        Value::Object(object) => resolve_object(promise, object),
        other => settle(promise, other, PromiseState::Fulfilled),
    }
}

/// Directly reject `promise` with `reason`, bypassing any executor.
///
/// Exposed for conformance harnesses; a settled promise is left alone.
pub fn reject_promise(promise: &Promise, reason: Value) {
    settle(promise, reason, PromiseState::Rejected);
}

fn adopt_promise(promise: &Promise, other: &Promise) {
    let (state, value) = other.snapshot();
    if state == PromiseState::Pending {
        // The forwarded value is already final, so it bypasses the resolution procedure.
        let target = promise.clone();
        other.depend(Box::new(move |state: PromiseState, value: Value| {
            settle(&target, value, state)
        }));
    } else {
        settle(promise, value, state);
    }
}

fn resolve_object(promise: &Promise, object: Rc<RefCell<Object>>) {
    let identity = Rc::downgrade(&object);
    let x = Value::Object(object);

    let then = match x.get("then") {
        Ok(then) => then,
        Err(err) => {
            debug!(promise = promise.id(), "reading then threw");
            settle(promise, err, PromiseState::Rejected);
            return;
        }
    };

    if then.is_callable() {
        call_thenable(promise, &x, &then, identity);
    } else {
        settle(promise, x, PromiseState::Fulfilled);
    }
}

fn call_thenable(promise: &Promise, x: &Value, then: &Value, identity: Weak<RefCell<Object>>) {
    let called = Rc::new(Cell::new(false));

    let resolve_fn = {
        let (promise, called) = (promise.clone(), called.clone());
        Value::function("resolvePromise", move |_this, args| {
            if called.replace(true) {
                return Ok(Value::Undefined);
            }
            let y = args.first().cloned().unwrap_or_default();
            if is_same_object(&identity, &y) {
                debug!(promise = promise.id(), "thenable resolved with itself");
                settle(
                    &promise,
                    Value::type_error(messages::THENABLE_CYCLE),
                    PromiseState::Rejected,
                );
            } else {
                resolve_promise(&promise, y);
            }
            Ok(Value::Undefined)
        })
    };

    let reject_fn = {
        let (promise, called) = (promise.clone(), called.clone());
        Value::function("rejectPromise", move |_this, args| {
            if called.replace(true) {
                return Ok(Value::Undefined);
            }
            let r = args.first().cloned().unwrap_or_default();
            settle(&promise, r, PromiseState::Rejected);
            Ok(Value::Undefined)
        })
    };

    if let Err(err) = then.call(x, &[resolve_fn, reject_fn]) {
        if !called.replace(true) {
            debug!(promise = promise.id(), "then threw");
            settle(promise, err, PromiseState::Rejected);
        } else {
            trace!(promise = promise.id(), "then threw after settlement; discarded");
        }
    }
}

/// Identity check against the thenable. The weak handle keeps the allocation
/// (not the object) alive, so the address cannot be reused meanwhile.
fn is_same_object(identity: &Weak<RefCell<Object>>, y: &Value) -> bool {
    match y {
        Value::Object(obj) => std::ptr::eq(identity.as_ptr(), Rc::as_ptr(obj)),
        _ => false,
    }
}
