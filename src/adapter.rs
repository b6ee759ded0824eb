//! Conformance test adapter
//!
//! The three entry points a Promise/A+ conformance suite drives, derived from
//! the public constructor and capabilities.

use crate::runtime::{Promise, RejectFn, ResolveFn, Value};

/// A pending promise together with its resolve and reject capabilities
#[derive(Clone)]
pub struct Deferred {
    /// The promise
    pub promise: Promise,
    /// Resolves `promise` through the resolution procedure
    pub resolve: ResolveFn,
    /// Rejects `promise`
    pub reject: RejectFn,
}

/// A promise already resolved with `value`
pub fn resolved(value: impl Into<Value>) -> Promise {
    let value = value.into();
    Promise::new(move |resolve, _| {
        resolve.call(value);
        Ok(())
    })
}

/// A promise already rejected with `reason`
pub fn rejected(reason: impl Into<Value>) -> Promise {
    let reason = reason.into();
    Promise::new(move |_, reject| {
        reject.call(reason);
        Ok(())
    })
}

/// A pending promise whose capabilities are handed back to the caller.
///
/// The capabilities share one once-only guard, as an executor's do, so a second
/// `resolve` after a pending adoption has no effect.
pub fn deferred() -> Deferred {
    let promise = Promise::pending();
    let (resolve, reject) = promise.capabilities();
    Deferred {
        promise,
        resolve,
        reject,
    }
}
