//! The formatted-print growth strategy behind `pvsprintf`.
//!
//! Rust's `fmt::Write::write_str` callback is the direct analogue of the
//! original's `apr_vformatter(flush_fn, ...)`: the formatter pushes bytes to
//! us as it goes, and we decide where they land. `PrintCursor` starts out
//! writing directly into the pool's current block past its existing bump
//! pointer — no allocation at all in the common case — and only grows onto a
//! freshly acquired, not-yet-linked block when that space runs out. A second
//! overflow releases the first growth block back to the free-list rather
//! than leaking it; only the final block (if any) gets linked into the pool.

use std::fmt;

use crate::block::Block;
use crate::config::PoolSystemConfig;
use crate::error::PoolResult;
use crate::freelist::FreeList;

pub(crate) struct PrintCursor<'a> {
    pub(crate) free_list: &'a FreeList,
    pub(crate) config: &'a PoolSystemConfig,
    /// Current write target: either borrowed tail space of the pool's live
    /// last block (`owned = None`), or a block we've grown into ourselves.
    backing_ptr: *mut u8,
    backing_cap: usize,
    pub(crate) owned: Option<Block>,
    pub(crate) len: usize,
}

impl<'a> PrintCursor<'a> {
    pub(crate) fn new(
        free_list: &'a FreeList,
        config: &'a PoolSystemConfig,
        backing_ptr: *mut u8,
        backing_cap: usize,
    ) -> Self {
        Self { free_list, config, backing_ptr, backing_cap, owned: None, len: 0 }
    }

    fn grow(&mut self, extra_needed: usize) -> PoolResult<()> {
        // Doubling growth, matching the original's `new_block(2 * cur_len, ...)`.
        let mut new_cap = self.len.max(1) * 2;
        while new_cap < self.len + extra_needed {
            new_cap *= 2;
        }
        let mut new_block = self.free_list.acquire(new_cap, 0, new_cap, self.config.click_size)?;

        // SAFETY: new_block.capacity() >= new_cap >= self.len, and
        // backing_ptr..+len was valid for the previous target.
        unsafe {
            std::ptr::copy_nonoverlapping(self.backing_ptr, new_block.ptr_at(0), self.len);
        }

        // The previous growth block (if any) is abandoned unlinked; return it
        // rather than leak it. The very first target (borrowed pool-block
        // tail space) is never owned by us, so there's nothing to return.
        if let Some(old) = self.owned.take() {
            self.free_list.release_one(old);
        }

        self.backing_ptr = new_block.ptr_at(0);
        self.backing_cap = new_block.capacity();
        self.owned = Some(new_block);
        Ok(())
    }

    pub(crate) fn write_bytes(&mut self, bytes: &[u8]) -> PoolResult<()> {
        if self.len + bytes.len() > self.backing_cap {
            self.grow(bytes.len())?;
        }
        // SAFETY: the branch above guarantees backing_cap >= len + bytes.len().
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.backing_ptr.add(self.len), bytes.len());
        }
        self.len += bytes.len();
        Ok(())
    }

    pub(crate) fn capacity(&self) -> usize {
        self.backing_cap
    }
}

impl fmt::Write for PrintCursor<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.write_bytes(s.as_bytes()).map_err(|_| fmt::Error)
    }
}
