//! Error types for the lattice runtime
//!
//! Every fallible operation in the runtime returns a [`RuntimeResult`].
//! Nothing in the core retries; retry policy belongs to the caller.

use core::fmt;

/// Result type for runtime operations
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Errors surfaced by the runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeError {
    /// Pool creation or buffer allocation failed
    AllocationFailure,

    /// Bad enum value, zero size, or out-of-range identifier
    InvalidArgument(&'static str),

    /// Write on a read-only region
    AccessDenied,

    /// Message pool empty with heap fallback disabled, or a bounded
    /// table/queue at capacity
    Exhausted,

    /// Internal structure corruption or counter imbalance; the owning
    /// structure is unusable afterwards
    InvariantViolation(&'static str),

    /// Deadline passed with no message; not a failure per se
    Timeout,

    /// Enqueue on a worker that has been told to stop
    ShuttingDown,

    /// Channel send from a thread that is not an endpoint
    InvalidSender,
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::AllocationFailure => write!(f, "allocation failed"),
            RuntimeError::InvalidArgument(what) => write!(f, "invalid argument: {}", what),
            RuntimeError::AccessDenied => write!(f, "access denied"),
            RuntimeError::Exhausted => write!(f, "capacity exhausted"),
            RuntimeError::InvariantViolation(what) => {
                write!(f, "invariant violation: {}", what)
            }
            RuntimeError::Timeout => write!(f, "timed out"),
            RuntimeError::ShuttingDown => write!(f, "shutting down"),
            RuntimeError::InvalidSender => write!(f, "sender is not a channel endpoint"),
        }
    }
}

impl std::error::Error for RuntimeError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", RuntimeError::AccessDenied), "access denied");
        assert_eq!(
            format!("{}", RuntimeError::InvalidArgument("layers must be > 0")),
            "invalid argument: layers must be > 0"
        );
    }

    #[test]
    fn test_is_std_error() {
        fn assert_error<E: std::error::Error>(_: E) {}
        assert_error(RuntimeError::Timeout);
    }
}
