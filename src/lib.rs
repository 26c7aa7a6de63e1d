//! Hierarchical, region-based memory allocator with cleanup and subprocess
//! lifecycle tracking.
//!
//! Allocations live in **pools**: bump-allocated chains of blocks arranged in
//! a parent/child tree. Destroying (or clearing) a pool recursively tears
//! down its children, fires its cleanup callbacks in last-registered-first
//! order, reaps any subprocess it's tracking, and returns its blocks to a
//! shared free-list for reuse by the next pool that needs one. There is no
//! way to free a single allocation; the unit of reclamation is always a pool.
//!
//! ```
//! use poolkeeper::{PoolAllocator, PoolSystemConfig};
//!
//! let allocator = PoolAllocator::new(PoolSystemConfig::default()).unwrap();
//! let child = allocator.pool_create(None).unwrap();
//! let s = allocator.pstrdup(child, "hello").unwrap();
//! assert_eq!(s, "hello");
//! allocator.pool_destroy(child).unwrap();
//! ```

mod allocator;
mod block;
mod cleanup;
mod config;
mod error;
mod freelist;
mod handle;
mod pool;
mod print;
mod subprocess;
mod userdata;

pub use allocator::{PoolAllocator, PoolObserver};
#[cfg(feature = "logging")]
pub use allocator::TracingObserver;
pub use cleanup::{ChildFn, PlainFn};
pub use config::PoolSystemConfig;
pub use error::{AbortStatus, PoolError, PoolResult};
pub use pool::{AbortCallback, PoolId};
pub use subprocess::KillPolicy;
