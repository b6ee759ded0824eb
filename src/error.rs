//! Error types for the thenable runtime
//!
//! Two distinct channels exist. Promise rejections are ordinary [`Value`]s and
//! never surface as Rust errors; [`Error`] covers failures of the host side
//! (the event loop and its configuration).
//!
//! [`Value`]: crate::Value

use std::fmt;
use thiserror::Error;

/// Main error type for the host side of the runtime
#[derive(Error, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    /// Resource limit exceeded while driving the event loop
    #[error("ResourceLimitError: {kind}: {message}")]
    ResourceLimitError {
        kind: ResourceLimitKind,
        message: String,
    },

    /// The event loop was driven re-entrantly or is otherwise misused
    #[error("InternalError: {0}")]
    InternalError(String),

    /// A configuration value could not be parsed
    #[error("ConfigError: {0}")]
    ConfigError(String),
}

/// Resource limit kinds enforced by the event loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceLimitKind {
    /// Too many microtasks drained within a single tick
    MicrotaskLimit,
}

impl fmt::Display for ResourceLimitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceLimitKind::MicrotaskLimit => write!(f, "MicrotaskLimit"),
        }
    }
}

/// JavaScript-style error kinds carried by error objects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(clippy::enum_variant_names)]
pub enum ErrorKind {
    /// TypeError - wrong type for operation, self-resolution, thenable cycles
    TypeError,
    /// Generic Error - user-thrown Error objects
    GenericError,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::TypeError => write!(f, "TypeError"),
            ErrorKind::GenericError => write!(f, "Error"),
        }
    }
}

impl Error {
    /// Create a microtask budget exceeded error
    pub fn microtask_limit_exceeded(limit: usize) -> Self {
        Error::ResourceLimitError {
            kind: ResourceLimitKind::MicrotaskLimit,
            message: format!(
                "Microtask limit exceeded: more than {} microtasks in a single tick",
                limit
            ),
        }
    }

    /// Create an error for a nested `run_to_completion` call
    pub fn reentrant_run() -> Self {
        Error::InternalError("event loop is already running".to_string())
    }

    /// Create a configuration error for a bad value of `key`
    pub fn invalid_config(key: &str, value: &str) -> Self {
        Error::ConfigError(format!("invalid value '{}' for {}", value, key))
    }
}

/// Result type alias for the host side of the runtime
pub type Result<T> = std::result::Result<T, Error>;

/// Standardized error message templates
pub mod messages {
    /// Reason message when a promise is resolved with itself
    pub const SELF_RESOLUTION: &str = "promise cannot be resolved with itself";
    /// Reason message when a thenable resolves with itself
    pub const THENABLE_CYCLE: &str = "thenable resolved with itself";

    /// Suffix of the TypeError message for calling a non-function
    pub const NOT_A_FUNCTION: &str = "is not a function";

    /// Format a "X is not a function" error message
    pub fn not_a_function(name: &str) -> String {
        format!("'{}' {}", name, NOT_A_FUNCTION)
    }
}
