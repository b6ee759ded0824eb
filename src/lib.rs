//! Thenable: a Promise/A+ deferred-value primitive for Rust
//!
//! A [`Promise`] holds a value that becomes available, or fails, at some later
//! time. Reactions registered with [`Promise::then`] run asynchronously, in
//! registration order, on a single-threaded [`EventLoop`]. The resolution
//! procedure ([`resolve_promise`]) adopts promises of this kind, drains
//! foreign thenables, and guards against self-resolution and direct thenable
//! cycles.
//!
//! # Quick Start
//!
//! ```
//! use thenable::{event_loop, Promise, Value};
//!
//! fn main() -> thenable::Result<()> {
//!     let promise = Promise::new(|_resolve, reject| {
//!         reject.call("boom");
//!         Ok(())
//!     });
//!     promise
//!         .then(Value::from_fn(|_| Ok("unused".into())), Value::Undefined)
//!         .then(
//!             Value::from_fn(Ok),
//!             Value::from_fn(|e| Ok(format!("caught:{}", e).into())),
//!         );
//!
//!     let result = event_loop::current().run_to_completion()?;
//!     assert!(result.microtasks_processed > 0);
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`runtime`] | [`Promise`], the resolution procedure, and the [`Value`] model |
//! | [`event_loop`] | [`Scheduler`], [`EventLoop`], [`EventLoopConfig`] |
//! | [`adapter`] | `resolved` / `rejected` / `deferred` for conformance suites |
//!
//! Indirect thenable cycles (A resolves to B resolves to A) are not detected
//! and recurse until the stack is exhausted.

pub mod adapter;
pub mod event_loop;
pub mod runtime;

mod error;

pub use error::{messages, Error, ErrorKind, ResourceLimitKind, Result};
pub use event_loop::{EventLoop, EventLoopConfig, EventLoopStats, Job, RunResult, Scheduler, SchedulingMode};
pub use runtime::{
    reject_promise, resolve_promise, Completion, Object, ObjectKind, Promise, Property, RejectFn,
    ResolveFn, Value,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
