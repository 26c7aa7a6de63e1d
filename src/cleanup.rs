//! Per-pool cleanup registry.
//!
//! Cleanup data is identified by an opaque `usize` token (an address, a
//! handle index, whatever the caller already uses to name the resource) and
//! finalizers are plain function pointers rather than closures, so two
//! registrations of the "same" cleanup compare equal by `(data, plain_fn)`
//! the way the original's `(void *, func_ptr)` pair does — a `Box<dyn Fn>`
//! has no such identity.

use std::collections::VecDeque;

/// A plain cleanup fires on pool clear/destroy. A child cleanup fires only
/// when preparing to hand the process image to an exec'd child.
pub type PlainFn = fn(usize);
pub type ChildFn = fn(usize);

struct CleanupRecord {
    data: usize,
    plain_fn: PlainFn,
    child_fn: ChildFn,
}

/// LIFO list of cleanup records for one pool.
///
/// New registrations go to the front, so front-to-back traversal is already
/// registration-LIFO, which is the firing order cleanups are expected in.
#[derive(Default)]
pub(crate) struct CleanupRegistry {
    records: VecDeque<CleanupRecord>,
}

impl CleanupRegistry {
    pub(crate) fn new() -> Self {
        Self { records: VecDeque::new() }
    }

    pub(crate) fn register(&mut self, data: usize, plain_fn: PlainFn, child_fn: ChildFn) {
        self.records.push_front(CleanupRecord { data, plain_fn, child_fn });
    }

    /// Removes the first (most recently registered) record matching `(data, plain_fn)`.
    pub(crate) fn kill(&mut self, data: usize, plain_fn: PlainFn) -> bool {
        if let Some(pos) = self
            .records
            .iter()
            .position(|r| r.data == data && r.plain_fn as usize == plain_fn as usize)
        {
            self.records.remove(pos);
            true
        } else {
            false
        }
    }

    /// Fires every plain cleanup in registration-LIFO order and drops the list.
    ///
    /// A cleanup that panics is caught so the remaining cleanups in this pool
    /// still fire; teardown must stay infallible from the caller's point of
    /// view (SPEC §7).
    pub(crate) fn run_plain(&mut self) {
        for record in self.records.drain(..) {
            let data = record.data;
            let plain_fn = record.plain_fn;
            if std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| plain_fn(data))).is_err() {
                #[cfg(feature = "logging")]
                tracing::warn!(data, "cleanup handler panicked during pool clear");
            }
        }
    }

    /// Fires every child cleanup (used ahead of exec) and drops the list,
    /// discarding any plain cleanups that were never run in this process.
    pub(crate) fn run_child(&mut self) {
        for record in self.records.drain(..) {
            let data = record.data;
            let child_fn = record.child_fn;
            if std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| child_fn(data))).is_err() {
                #[cfg(feature = "logging")]
                tracing::warn!(data, "child cleanup handler panicked during exec preparation");
            }
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
