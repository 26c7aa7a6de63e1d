//! Property tests for the allocator's click-rounding arithmetic and the
//! cleanup registry's LIFO firing order under arbitrary operation sequences.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, OnceLock};

use poolkeeper::{PoolAllocator, PoolSystemConfig};
use proptest::prelude::*;

// ---------------------------------------------------------------------------
// Property: click_round always rounds up to a multiple of click_size, never
// past the next multiple, and is idempotent.
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn click_round_is_a_tight_upward_multiple(
        click_size in prop_oneof![Just(8usize), Just(16usize), Just(32usize)],
        size in 0usize..1_000_000,
    ) {
        let cfg = PoolSystemConfig { click_size, ..PoolSystemConfig::default() };
        let rounded = cfg.click_round(size);

        prop_assert!(rounded >= size, "rounded {} must be >= requested {}", rounded, size);
        prop_assert_eq!(rounded % click_size, 0, "rounded {} is not a multiple of click_size {}", rounded, click_size);
        prop_assert!(rounded - size < click_size, "rounded past the next multiple: {} - {} >= {}", rounded, size, click_size);
        prop_assert_eq!(cfg.click_round(rounded), rounded, "click_round should be idempotent on an already-rounded size");
    }
}

// ---------------------------------------------------------------------------
// Property: an arbitrary sequence of `palloc` calls on one pool never hands
// out overlapping byte ranges, and every address is click-aligned.
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn palloc_sequence_never_overlaps_and_stays_aligned(
        sizes in proptest::collection::vec(1usize..500, 1..40),
    ) {
        let alloc = PoolAllocator::new(PoolSystemConfig::for_tests()).unwrap();
        let pool = alloc.pool_create(None).unwrap();
        let click = alloc.config().click_size;

        let mut ranges: Vec<(usize, usize)> = Vec::new();
        for size in sizes {
            let rounded = alloc.config().click_round(size);
            let ptr = alloc.palloc(pool, size).unwrap().unwrap();
            let addr = ptr.as_ptr() as usize;

            prop_assert_eq!(addr % click, 0, "address {:#x} is not {}-byte aligned", addr, click);

            for (start, len) in &ranges {
                let other_end = start + len;
                let this_end = addr + rounded;
                let disjoint = this_end <= *start || other_end <= addr;
                prop_assert!(disjoint, "allocation [{:#x}, {:#x}) overlaps existing [{:#x}, {:#x})", addr, this_end, start, other_end);
            }
            ranges.push((addr, rounded));
        }
    }
}

// ---------------------------------------------------------------------------
// Property: cleanups fire in exact reverse of registration order, for any
// number of registrations.
// ---------------------------------------------------------------------------

static FIRE_LOG: OnceLock<Mutex<Vec<usize>>> = OnceLock::new();

fn fire_log() -> &'static Mutex<Vec<usize>> {
    FIRE_LOG.get_or_init(|| Mutex::new(Vec::new()))
}

static CALL_COUNT: AtomicUsize = AtomicUsize::new(0);

fn record(data: usize) {
    fire_log().lock().unwrap().push(data);
}

fn noop(_data: usize) {
    CALL_COUNT.fetch_add(1, Ordering::SeqCst);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn cleanup_registrations_fire_in_exact_reverse_order(
        tokens in proptest::collection::vec(0usize..1000, 1..30),
    ) {
        fire_log().lock().unwrap().clear();

        let alloc = PoolAllocator::new(PoolSystemConfig::for_tests()).unwrap();
        let pool = alloc.pool_create(None).unwrap();

        for &token in &tokens {
            alloc.cleanup_register(pool, token, record, noop).unwrap();
        }
        alloc.pool_clear(pool).unwrap();

        let fired = fire_log().lock().unwrap().clone();
        let expected: Vec<usize> = tokens.iter().rev().copied().collect();
        prop_assert_eq!(fired, expected);
    }
}
