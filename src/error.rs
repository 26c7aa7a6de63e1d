//! Error types for pool creation, allocation, and lifecycle operations.

use std::fmt;

/// Errors surfaced by the pool allocator.
///
/// Teardown paths (`pool_clear`/`pool_destroy`) never return this type for
/// cleanup-callback failures — those are logged and swallowed so that
/// destruction remains infallible. `PoolError` is reserved for genuine
/// misuse (stale handles) and allocation failure. There is no "no root
/// pool" variant: `PoolAllocator::new` always constructs one, so `pool_create`
/// always has a live `self.root` to fall back to when no parent is given.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// The system allocator could not satisfy a block request and no abort
    /// callback was installed (or the callback returned instead of aborting).
    #[error("out of memory: failed to allocate {requested} bytes")]
    OutOfMemory {
        /// Bytes requested from the system allocator.
        requested: usize,
    },

    /// A `PoolId` was used after the pool it named was cleared/destroyed.
    #[error("pool handle is stale: slot {index} is now at generation {current_generation}, handle was generation {handle_generation}")]
    StalePoolHandle {
        index: u32,
        handle_generation: u8,
        current_generation: u8,
    },

    /// An argument violated a documented precondition (not zero-size, which
    /// is a silent `None` rather than an error — see `palloc`).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A subprocess could not be signaled or reaped.
    #[error("subprocess {pid} error: {source}")]
    Subprocess { pid: i32, #[source] source: std::io::Error },
}

pub type PoolResult<T> = Result<T, PoolError>;

/// Status code handed to an installed abort callback on allocation failure.
///
/// Mirrors the original's `apr_abortfunc_t(int retcode)` signature: a plain
/// status the callback can log, translate, or ignore before deciding whether
/// to terminate the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AbortStatus(pub i32);

impl fmt::Display for AbortStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "abort status {}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_are_distinct_and_nonempty() {
        let errs: Vec<PoolError> = vec![
            PoolError::OutOfMemory { requested: 64 },
            PoolError::StalePoolHandle { index: 1, handle_generation: 0, current_generation: 1 },
            PoolError::InvalidArgument("zero size".into()),
        ];
        let mut messages: Vec<String> = errs.iter().map(|e| e.to_string()).collect();
        messages.sort();
        messages.dedup();
        assert_eq!(messages.len(), errs.len());
        assert!(messages.iter().all(|m| !m.is_empty()));
    }
}
