//! Engine error types.

use std::time::Duration;

use thiserror::Error;

/// Failures surfaced by the storage engine.
///
/// Unknown-job conditions are not errors: reads return `None` and
/// mutations degrade to no-ops, matching the semantics callers depend on.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// Null or malformed input rejected at a facade boundary.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Lock acquisition did not complete within the timeout.
    #[error("lock '{resource}' not acquired within {timeout:?}")]
    LockTimeout { resource: String, timeout: Duration },

    /// A blocking fetch observed no job before its deadline. Often
    /// treated as normal flow control by polling workers.
    #[error("no job fetched within {0:?}")]
    FetchTimeout(Duration),

    /// An internal index disagrees with its primary collection, or a
    /// command panicked inside the dispatcher.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// A command failed during execution. For transactions, state may be
    /// partially mutated: sub-commands applied before the failure stay
    /// applied.
    #[error("command failed: {0}")]
    Command(String),

    /// The dispatcher did not answer within the configured command
    /// timeout.
    #[error("command not completed within {0:?}")]
    CommandTimeout(Duration),
}

pub type EngineResult<T> = Result<T, EngineError>;
