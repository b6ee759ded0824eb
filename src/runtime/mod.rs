//! Runtime types for the promise primitive
//!
//! This module provides the promise state machine and the dynamic value
//! model it absorbs.

pub mod promise;
mod value;

pub use promise::{reject_promise, resolve_promise, Promise, RejectFn, ResolveFn};
pub use value::{Completion, NativeFn, Object, ObjectKind, Property, Value};
