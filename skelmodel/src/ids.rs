use std::sync::atomic::{AtomicU32, Ordering};

// Process-global counters. Part masks and ragdolls are identified by these ids inside pose cache
// keys, so two distinct objects never compare equal even if their contents do. Model parts use
// theirs to tell per-entity transition state apart.
static NEXT_PART_MASK_ID: AtomicU32 = AtomicU32::new(1);
static NEXT_RAGDOLL_ID: AtomicU32 = AtomicU32::new(1);
static NEXT_PART_ID: AtomicU32 = AtomicU32::new(1);

pub(crate) fn next_part_mask_id() -> u32 {
    NEXT_PART_MASK_ID.fetch_add(1, Ordering::Relaxed)
}

pub(crate) fn next_ragdoll_id() -> u32 {
    NEXT_RAGDOLL_ID.fetch_add(1, Ordering::Relaxed)
}

pub(crate) fn next_part_id() -> u32 {
    NEXT_PART_ID.fetch_add(1, Ordering::Relaxed)
}
