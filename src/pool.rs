//! The pool itself: a chain of blocks plus the registries it owns.
//!
//! A `PoolInner` never appears behind a pointer callers hold directly — it
//! lives in the [`crate::allocator::PoolAllocator`]'s slab and is always
//! reached through a [`PoolId`] handle, which is how the parent/child tree
//! avoids cyclic strong references (see SPEC_FULL.md §3, "Pool identity").

use std::sync::Arc;

use crate::block::Block;
use crate::cleanup::CleanupRegistry;
use crate::error::AbortStatus;
use crate::handle::Handle;
use crate::subprocess::SubprocessRegistry;
use crate::userdata::UserDataStore;

/// Handle identifying a pool inside a [`crate::allocator::PoolAllocator`].
pub type PoolId = Handle<PoolInner>;

/// Callback invoked when a block allocation fails and no cheaper recovery is
/// possible. May terminate the process; if it returns, the caller sees the
/// ordinary error/`None` result instead.
pub type AbortCallback = Arc<dyn Fn(AbortStatus) + Send + Sync>;

pub(crate) struct PoolInner {
    pub(crate) parent: Option<PoolId>,
    /// Head of this pool's child list (most recently created child).
    pub(crate) first_child: Option<PoolId>,
    /// This pool's links within its parent's child list.
    pub(crate) sub_next: Option<PoolId>,
    pub(crate) sub_prev: Option<PoolId>,

    pub(crate) blocks: Vec<Block>,
    /// Bump offset of block zero immediately after pool creation; `clear`
    /// restores block zero's cursor to this value.
    pub(crate) free_first_avail: usize,

    pub(crate) cleanups: CleanupRegistry,
    pub(crate) subprocesses: SubprocessRegistry,
    pub(crate) userdata: UserDataStore,
    pub(crate) abort: Option<AbortCallback>,
}

impl PoolInner {
    pub(crate) fn new(parent: Option<PoolId>, first_block: Block, abort: Option<AbortCallback>) -> Self {
        let free_first_avail = first_block.first_avail();
        Self {
            parent,
            first_child: None,
            sub_next: None,
            sub_prev: None,
            blocks: vec![first_block],
            free_first_avail,
            cleanups: CleanupRegistry::new(),
            subprocesses: SubprocessRegistry::new(),
            userdata: UserDataStore::new(),
            abort,
        }
    }

    #[inline]
    pub(crate) fn last_block_index(&self) -> usize {
        self.blocks.len() - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_pool_records_birth_cursor() {
        let block = Block::new(64, 8).unwrap();
        let inner = PoolInner::new(None, block, None);
        assert_eq!(inner.free_first_avail, 0);
        assert_eq!(inner.blocks.len(), 1);
    }
}
