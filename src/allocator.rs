//! The process-facing handle: free-list, pool arena, and every operation in
//! the external interface table (SPEC_FULL.md §6) hangs off [`PoolAllocator`].
//!
//! Constructing one is the Rust-native stand-in for `apr_pool_alloc_init` /
//! `apr_pool_alloc_term`: rather than a lazily-bootstrapped global, the
//! free-list and the permanent root pool are fields of a value the caller
//! constructs explicitly and can drop (or construct many of, in tests,
//! without cross-test interference).

use std::cell::RefCell;
use std::fmt;
use std::ptr::NonNull;

use crate::cleanup::{ChildFn, PlainFn};
use crate::config::PoolSystemConfig;
use crate::error::{AbortStatus, PoolError, PoolResult};
use crate::freelist::FreeList;
use crate::handle::Slab;
use crate::pool::{AbortCallback, PoolId, PoolInner};
use crate::print::PrintCursor;
use crate::subprocess::KillPolicy;

/// Pluggable observer for pool lifecycle and block traffic.
///
/// The debug instrumentation the original exposes as compile-time modes
/// (fill-on-free, per-allocation stats, mmap guard pages) is modeled here as
/// a trait instead: install one when constructing a [`PoolAllocator`] rather
/// than recompiling with different `cfg`s.
pub trait PoolObserver {
    fn on_pool_created(&self, _id: PoolId) {}
    fn on_pool_cleared(&self, _id: PoolId) {}
    fn on_pool_destroyed(&self, _id: PoolId) {}
    fn on_block_acquired(&self, _size: usize) {}
    fn on_blocks_returned(&self, _count: usize) {}
}

struct NoopObserver;
impl PoolObserver for NoopObserver {}

/// Observer backed by `tracing`, installed by default when the `logging`
/// feature is enabled.
#[cfg(feature = "logging")]
pub struct TracingObserver;

#[cfg(feature = "logging")]
impl PoolObserver for TracingObserver {
    fn on_pool_created(&self, id: PoolId) {
        tracing::debug!(?id, "pool created");
    }
    fn on_pool_cleared(&self, id: PoolId) {
        tracing::debug!(?id, "pool cleared");
    }
    fn on_pool_destroyed(&self, id: PoolId) {
        tracing::debug!(?id, "pool destroyed");
    }
    fn on_block_acquired(&self, size: usize) {
        tracing::trace!(size, "block acquired");
    }
    fn on_blocks_returned(&self, count: usize) {
        tracing::trace!(count, "blocks returned to free-list");
    }
}

/// Owns the block free-list and every pool reachable from its permanent root.
///
/// `!Send`/`!Sync` by construction (the arena sits behind a `RefCell`):
/// pools are thread-confined per SPEC_FULL.md §5, and this type is the thing
/// that confinement is scoped to. See DESIGN.md for why no cross-thread
/// hand-off primitive is provided.
pub struct PoolAllocator {
    arena: RefCell<Slab<PoolInner>>,
    free_list: FreeList,
    root: PoolId,
    config: PoolSystemConfig,
    observer: Box<dyn PoolObserver>,
}

impl PoolAllocator {
    /// Bootstraps the allocator and its permanent root pool (`alloc_init`).
    pub fn new(config: PoolSystemConfig) -> PoolResult<Self> {
        Self::with_observer(config, Box::new(NoopObserver))
    }

    pub fn with_observer(config: PoolSystemConfig, observer: Box<dyn PoolObserver>) -> PoolResult<Self> {
        let free_list = FreeList::new();
        let block = free_list.acquire(0, config.block_minfree, config.block_minalloc, config.click_size)?;
        observer.on_block_acquired(block.capacity());
        let mut arena = Slab::new();
        let root = arena.insert(PoolInner::new(None, block, None));
        observer.on_pool_created(root);
        Ok(Self { arena: RefCell::new(arena), free_list, root, config, observer })
    }

    /// Explicit process teardown (`alloc_term`); equivalent to dropping the
    /// allocator, spelled out for symmetry with the external interface table.
    pub fn terminate(self) {}

    pub fn root(&self) -> PoolId {
        self.root
    }

    pub fn config(&self) -> &PoolSystemConfig {
        &self.config
    }

    fn stale_handle_error(&self, arena: &Slab<PoolInner>, id: PoolId) -> PoolError {
        PoolError::StalePoolHandle {
            index: id.index(),
            handle_generation: id.generation(),
            current_generation: arena.generation_of(id).unwrap_or(id.generation()),
        }
    }

    fn check_live(&self, arena: &Slab<PoolInner>, id: PoolId) -> PoolResult<()> {
        if arena.get(id).is_some() {
            Ok(())
        } else {
            Err(self.stale_handle_error(arena, id))
        }
    }

    // ---- pool tree -----------------------------------------------------

    /// `pool_create(parent)`. `parent = None` creates a fresh child of the
    /// permanent root (the distilled spec's "parent=none uses root").
    pub fn pool_create(&self, parent: Option<PoolId>) -> PoolResult<PoolId> {
        let parent = parent.unwrap_or(self.root);
        let mut arena = self.arena.borrow_mut();
        self.check_live(&arena, parent)?;

        let abort = arena.get(parent).unwrap().abort.clone();
        let block = self.free_list.acquire(0, self.config.block_minfree, self.config.block_minalloc, self.config.click_size)?;
        self.observer.on_block_acquired(block.capacity());

        let id = arena.insert(PoolInner::new(Some(parent), block, abort));

        let old_head = arena.get(parent).unwrap().first_child;
        if let Some(head) = old_head {
            arena.get_mut(head).unwrap().sub_prev = Some(id);
        }
        arena.get_mut(id).unwrap().sub_next = old_head;
        arena.get_mut(parent).unwrap().first_child = Some(id);

        self.observer.on_pool_created(id);
        Ok(id)
    }

    /// `is_ancestor(a, b)`: `a = None` is an ancestor of everything; a pool
    /// is its own ancestor.
    pub fn is_ancestor(&self, a: Option<PoolId>, b: PoolId) -> bool {
        let Some(a) = a else { return true };
        let arena = self.arena.borrow();
        let mut cur = Some(b);
        while let Some(c) = cur {
            if c == a {
                return true;
            }
            cur = arena.get(c).and_then(|p| p.parent);
        }
        false
    }

    pub fn parent_of(&self, id: PoolId) -> PoolResult<Option<PoolId>> {
        let arena = self.arena.borrow();
        self.check_live(&arena, id)?;
        Ok(arena.get(id).unwrap().parent)
    }

    /// `pool_clear(pool)`.
    pub fn pool_clear(&self, id: PoolId) -> PoolResult<()> {
        let mut arena = self.arena.borrow_mut();
        self.clear_inner(&mut arena, id)
    }

    /// `pool_destroy(pool)`.
    pub fn pool_destroy(&self, id: PoolId) -> PoolResult<()> {
        let mut arena = self.arena.borrow_mut();
        self.destroy_inner(&mut arena, id)
    }

    fn clear_inner(&self, arena: &mut Slab<PoolInner>, id: PoolId) -> PoolResult<()> {
        self.check_live(arena, id)?;

        // 1. Children detach themselves as they're destroyed, so re-read the
        // head each iteration instead of walking a snapshot.
        while let Some(child) = arena.get(id).unwrap().first_child {
            self.destroy_inner(arena, child)?;
        }

        // 2. Plain cleanups, LIFO. A panicking cleanup is caught inside
        // `run_plain` so the rest of this pool's cleanups still fire;
        // teardown itself cannot fail here.
        #[cfg(feature = "logging")]
        tracing::debug!(pool = ?id, "firing plain cleanups");
        arena.get_mut(id).unwrap().cleanups.run_plain();

        // 3. Subprocess reap protocol (batched grace, see subprocess.rs).
        let grace = self.config.subprocess_grace;
        arena.get_mut(id).unwrap().subprocesses.reap_all(grace);

        // 4. Return every block after the first to the free-list.
        let extra = arena.get_mut(id).unwrap().blocks.split_off(1);
        let returned = extra.len();
        if !extra.is_empty() {
            self.free_list.release_chain(extra);
            self.observer.on_blocks_returned(returned);
        }

        // 5. Reset block zero's cursor, drop user-data.
        let inner = arena.get_mut(id).unwrap();
        let birth_cursor = inner.free_first_avail;
        inner.blocks[0].set_first_avail(birth_cursor);
        inner.userdata.clear();

        self.observer.on_pool_cleared(id);
        Ok(())
    }

    fn detach_from_parent(&self, arena: &mut Slab<PoolInner>, id: PoolId) {
        let (parent, prev, next) = {
            let inner = arena.get(id).unwrap();
            (inner.parent, inner.sub_prev, inner.sub_next)
        };
        match prev {
            Some(prev_id) => arena.get_mut(prev_id).unwrap().sub_next = next,
            None => {
                if let Some(parent_id) = parent {
                    arena.get_mut(parent_id).unwrap().first_child = next;
                }
            }
        }
        if let Some(next_id) = next {
            arena.get_mut(next_id).unwrap().sub_prev = prev;
        }
    }

    fn destroy_inner(&self, arena: &mut Slab<PoolInner>, id: PoolId) -> PoolResult<()> {
        self.clear_inner(arena, id)?;
        self.detach_from_parent(arena, id);
        // Invalidates `id`: any handle captured before this point now fails
        // `check_live` instead of dereferencing freed memory.
        let mut inner = arena.remove(id).expect("checked live by clear_inner above");
        let first_block = inner.blocks.pop().expect("a pool always owns at least one block");
        self.free_list.release_one(first_block);
        self.observer.on_pool_destroyed(id);
        Ok(())
    }

    // ---- allocation API --------------------------------------------------

    /// `palloc(pool, n)`. `n == 0` returns `Ok(None)` without raising.
    pub fn palloc(&self, id: PoolId, size: usize) -> PoolResult<Option<NonNull<u8>>> {
        let mut arena = self.arena.borrow_mut();
        self.check_live(&arena, id)?;

        let rounded = self.config.click_round(size);
        if rounded == 0 {
            return Ok(None);
        }

        let last_idx = arena.get(id).unwrap().last_block_index();
        let residual = arena.get(id).unwrap().blocks[last_idx].residual();
        if residual >= rounded {
            let ptr = arena.get_mut(id).unwrap().blocks[last_idx].bump(rounded);
            return Ok(Some(ptr));
        }

        match self.free_list.acquire(rounded, self.config.block_minfree, self.config.block_minalloc, self.config.click_size) {
            Ok(mut block) => {
                self.observer.on_block_acquired(block.capacity());
                let ptr = block.bump(rounded);
                arena.get_mut(id).unwrap().blocks.push(block);
                Ok(Some(ptr))
            }
            Err(e) => {
                self.invoke_abort(&arena, id);
                Err(e)
            }
        }
    }

    /// `pcalloc(pool, n)`: `palloc` followed by zeroing.
    pub fn pcalloc(&self, id: PoolId, size: usize) -> PoolResult<Option<NonNull<u8>>> {
        match self.palloc(id, size)? {
            Some(ptr) => {
                // SAFETY: palloc just handed back `size` fresh, exclusively
                // owned bytes.
                unsafe { std::ptr::write_bytes(ptr.as_ptr(), 0, size) };
                Ok(Some(ptr))
            }
            None => Ok(None),
        }
    }

    /// `pstrdup(pool, s)`: duplicate + NUL-terminate, lifetime tied to the allocator.
    pub fn pstrdup<'a>(&'a self, id: PoolId, s: &str) -> PoolResult<&'a str> {
        let bytes = s.as_bytes();
        let ptr = self
            .palloc(id, bytes.len() + 1)?
            .expect("non-zero request always allocates");
        // SAFETY: ptr..+len+1 is a fresh, exclusively owned allocation.
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.as_ptr(), bytes.len());
            *ptr.as_ptr().add(bytes.len()) = 0;
            let slice = std::slice::from_raw_parts(ptr.as_ptr(), bytes.len());
            Ok(std::str::from_utf8_unchecked(slice))
        }
    }

    /// `pvsprintf(pool, fmt, args)`. Writes directly into the pool's tail
    /// space; see `print.rs` for the overflow/growth protocol.
    pub fn pvsprintf<'a>(&'a self, id: PoolId, args: fmt::Arguments<'_>) -> PoolResult<&'a str> {
        let mut arena = self.arena.borrow_mut();
        self.check_live(&arena, id)?;

        let last_idx = arena.get(id).unwrap().last_block_index();
        let start_avail = arena.get(id).unwrap().blocks[last_idx].first_avail();
        let (backing_ptr, backing_cap) = {
            let block = &arena.get(id).unwrap().blocks[last_idx];
            (block.ptr_at(start_avail), block.capacity() - start_avail)
        };

        let mut cursor = PrintCursor::new(&self.free_list, &self.config, backing_ptr, backing_cap);
        if fmt::Write::write_fmt(&mut cursor, args).is_err() {
            self.invoke_abort(&arena, id);
            return Err(PoolError::OutOfMemory { requested: 0 });
        }
        cursor
            .write_bytes(&[0u8])
            .map_err(|e| { self.invoke_abort(&arena, id); e })?;

        let content_len = cursor.len - 1;
        let total_cap = cursor.capacity();
        let rounded = self.config.click_round(cursor.len).min(total_cap);

        let result_ptr = match cursor.owned {
            None => {
                let inner = arena.get_mut(id).unwrap();
                let block = &mut inner.blocks[last_idx];
                let p = block.ptr_at(start_avail);
                block.set_first_avail(start_avail + rounded);
                p
            }
            Some(mut block) => {
                block.set_first_avail(rounded);
                let p = block.ptr_at(0);
                arena.get_mut(id).unwrap().blocks.push(block);
                p
            }
        };

        // SAFETY: `result_ptr` names `content_len` bytes this call just wrote
        // via `fmt::Write`, which only ever receives valid UTF-8 from `&str`.
        let slice = unsafe { std::slice::from_raw_parts(result_ptr, content_len) };
        Ok(unsafe { std::str::from_utf8_unchecked(slice) })
    }

    fn invoke_abort(&self, arena: &Slab<PoolInner>, id: PoolId) {
        if let Some(cb) = arena.get(id).and_then(|p| p.abort.clone()) {
            cb(AbortStatus(libc::ENOMEM));
        }
    }

    pub fn set_abort(&self, id: PoolId, cb: AbortCallback) -> PoolResult<()> {
        let mut arena = self.arena.borrow_mut();
        self.check_live(&arena, id)?;
        arena.get_mut(id).unwrap().abort = Some(cb);
        Ok(())
    }

    pub fn get_abort(&self, id: PoolId) -> PoolResult<Option<AbortCallback>> {
        let arena = self.arena.borrow();
        self.check_live(&arena, id)?;
        Ok(arena.get(id).unwrap().abort.clone())
    }

    // ---- cleanup registry ------------------------------------------------

    pub fn cleanup_register(&self, id: PoolId, data: usize, plain_fn: PlainFn, child_fn: ChildFn) -> PoolResult<()> {
        let mut arena = self.arena.borrow_mut();
        self.check_live(&arena, id)?;
        arena.get_mut(id).unwrap().cleanups.register(data, plain_fn, child_fn);
        Ok(())
    }

    pub fn cleanup_kill(&self, id: PoolId, data: usize, plain_fn: PlainFn) -> PoolResult<bool> {
        let mut arena = self.arena.borrow_mut();
        self.check_live(&arena, id)?;
        Ok(arena.get_mut(id).unwrap().cleanups.kill(data, plain_fn))
    }

    pub fn cleanup_run(&self, id: PoolId, data: usize, plain_fn: PlainFn) -> PoolResult<()> {
        self.cleanup_kill(id, data, plain_fn)?;
        plain_fn(data);
        Ok(())
    }

    /// `prepare_for_exec()`: fires every child cleanup reachable from the
    /// permanent root, depth-first, and empties every cleanup list touched.
    /// A no-op on platforms that spawn a fresh process image instead of
    /// exec'ing is the caller's call to make (nothing here assumes exec
    /// exists); this method simply performs the handler sweep.
    pub fn prepare_for_exec(&self) {
        let mut arena = self.arena.borrow_mut();
        self.sweep_child_cleanups(&mut arena, self.root);
    }

    fn sweep_child_cleanups(&self, arena: &mut Slab<PoolInner>, id: PoolId) {
        arena.get_mut(id).unwrap().cleanups.run_child();
        let mut next = arena.get(id).unwrap().first_child;
        while let Some(child) = next {
            self.sweep_child_cleanups(arena, child);
            next = arena.get(child).unwrap().sub_next;
        }
    }

    // ---- subprocess registry ----------------------------------------------

    pub fn note_subprocess(&self, id: PoolId, pid: i32, policy: KillPolicy) -> PoolResult<()> {
        let mut arena = self.arena.borrow_mut();
        self.check_live(&arena, id)?;
        arena.get_mut(id).unwrap().subprocesses.note(pid, policy);
        Ok(())
    }

    // ---- user-data store ---------------------------------------------------

    /// `userdata_set`. `data` is the caller's own opaque token (the thing
    /// `cleanup` actually knows how to release) and is what gets registered
    /// as the cleanup record's `data` — not the pool-duplicated key, which
    /// exists purely so the key's lifetime matches the pool's, mirroring
    /// `apr_pool_userdata_set`'s `apr_pstrdup` step. `cleanup` is registered
    /// as both plain and child, once, on first insertion only, so the entry
    /// is torn down exactly once on ordinary clear and on exec-prep alike.
    pub fn userdata_set(&self, id: PoolId, key: &str, data: usize, cleanup: PlainFn) -> PoolResult<()> {
        let is_new = {
            let arena = self.arena.borrow();
            self.check_live(&arena, id)?;
            arena.get(id).unwrap().userdata.get(key).is_none()
        };

        if is_new {
            // Borrow released above: `pstrdup` takes its own borrow via `palloc`.
            self.pstrdup(id, key)?;
        }

        let mut arena = self.arena.borrow_mut();
        self.check_live(&arena, id)?;
        let inner = arena.get_mut(id).unwrap();
        inner.userdata.set(key, data);
        if is_new {
            inner.cleanups.register(data, cleanup, cleanup);
        }
        Ok(())
    }

    pub fn userdata_get(&self, id: PoolId, key: &str) -> PoolResult<Option<usize>> {
        let arena = self.arena.borrow();
        self.check_live(&arena, id)?;
        Ok(arena.get(id).unwrap().userdata.get(key))
    }
}
