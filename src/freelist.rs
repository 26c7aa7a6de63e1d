//! The process-wide (well — per-allocator) block free-list.
//!
//! This is the one piece of state pools share: a single `parking_lot::Mutex`
//! guarding a LIFO of detached blocks. Acquisition always takes the lock —
//! there's no lazy-init check, because the free-list is a field of an
//! explicit [`crate::allocator::PoolAllocator`] rather than a hidden global
//! bootstrapped on first use.

use parking_lot::Mutex;

use crate::block::Block;
use crate::error::PoolResult;

pub(crate) struct FreeList {
    blocks: Mutex<Vec<Block>>,
}

impl FreeList {
    pub(crate) fn new() -> Self {
        Self { blocks: Mutex::new(Vec::new()) }
    }

    /// Acquires a block with residual capacity >= `size + minfree`, reusing
    /// the most recently freed fit (cache-hot), or mallocs a fresh one of
    /// `max(size + minfree, minalloc)` bytes.
    pub(crate) fn acquire(
        &self,
        size: usize,
        minfree: usize,
        minalloc: usize,
        align: usize,
    ) -> PoolResult<Block> {
        let needed = size + minfree;
        let mut guard = self.blocks.lock();
        if let Some(pos) = guard.iter().rposition(|b| b.capacity() >= needed) {
            let mut block = guard.swap_remove(pos);
            block.reset();
            return Ok(block);
        }
        drop(guard);
        Block::new(needed.max(minalloc), align)
    }

    /// Returns a chain of detached blocks to the free-list in one critical
    /// section, resetting each so its full capacity is advertised again.
    pub(crate) fn release_chain(&self, mut blocks: Vec<Block>) {
        for block in &mut blocks {
            block.reset();
        }
        self.blocks.lock().extend(blocks);
    }

    pub(crate) fn release_one(&self, mut block: Block) {
        block.reset();
        self.blocks.lock().push(block);
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.blocks.lock().len()
    }
}
