//! Tunables for the pool system.
//!
//! The distilled constants (`CLICK`, `BLOCK_MINALLOC`, `BLOCK_MINFREE`, the
//! subprocess grace interval) are compile-time in the original. Here they're
//! fields on an overridable struct so tests can shrink the grace interval and
//! block sizes instead of waiting seconds and allocating megabytes per case;
//! `PoolSystemConfig::default()` reproduces the historical values exactly.

use std::time::Duration;

/// Runtime-overridable tunables for a [`crate::allocator::PoolAllocator`].
#[derive(Debug, Clone, Copy)]
pub struct PoolSystemConfig {
    /// Alignment quantum applied to every allocation and pool header.
    pub click_size: usize,
    /// Minimum usable length for a freshly malloc'd block.
    pub block_minalloc: usize,
    /// Slack required in a free-list block before it's reused for a request.
    pub block_minfree: usize,
    /// Batched grace interval between SIGTERM and SIGKILL escalation.
    pub subprocess_grace: Duration,
}

impl Default for PoolSystemConfig {
    fn default() -> Self {
        Self {
            click_size: 16,
            block_minalloc: 8192,
            block_minfree: 4096,
            subprocess_grace: Duration::from_secs(3),
        }
    }
}

impl PoolSystemConfig {
    /// Rounds `size` up to the next multiple of [`Self::click_size`].
    #[inline]
    pub fn click_round(&self, size: usize) -> usize {
        let click = self.click_size;
        (size + click - 1) / click * click
    }

    /// A configuration tuned for fast tests: small blocks, millisecond grace.
    pub fn for_tests() -> Self {
        Self {
            click_size: 8,
            block_minalloc: 256,
            block_minfree: 64,
            subprocess_grace: Duration::from_millis(50),
        }
    }
}
