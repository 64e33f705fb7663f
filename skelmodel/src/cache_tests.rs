use crate::{AnimCacheKey, AnimPos, AnimState, CacheLookup, LruCache, RagdollKey};

#[test]
fn exact_key_hits_and_misses_claim_a_slot() {
    let mut cache: LruCache<u32, Vec<u8>> = LruCache::new(2);
    assert_eq!(cache.lookup(&7, 0), CacheLookup::Miss(0));
    cache.slot_mut(0).unwrap().value.push(1);
    assert_eq!(cache.lookup(&7, 1), CacheLookup::Hit(0));
    assert_eq!(cache.slot(0).unwrap().value, [1]);
    assert_eq!(cache.lookup(&8, 2), CacheLookup::Miss(1));
    assert_eq!(cache.len(), 2);
}

#[test]
fn full_cache_evicts_the_least_recently_used_slot() {
    let mut cache: LruCache<u32, ()> = LruCache::new(2);
    cache.lookup(&1, 10);
    cache.lookup(&2, 20);
    cache.lookup(&1, 30);

    let evicted = cache.lookup(&3, 40);
    assert_eq!(evicted, CacheLookup::Miss(1));
    assert_eq!(cache.slot(1).unwrap().key, Some(3));
    assert!(cache.lookup(&1, 50).is_hit());
    assert!(!cache.lookup(&2, 60).is_hit());
    assert_eq!(cache.len(), 2);
}

#[test]
fn drain_hands_back_every_slot() {
    let mut cache: LruCache<u32, u32> = LruCache::new(4);
    cache.lookup(&1, 0);
    cache.lookup(&2, 0);
    let keys: Vec<_> = cache.drain().filter_map(|slot| slot.key).collect();
    assert_eq!(keys, [1, 2]);
    assert!(cache.is_empty());
}

#[test]
fn finished_transitions_compare_by_the_current_clip_only() {
    let mut a = AnimState::still(4);
    let mut b = AnimState::still(4);
    a.prev = AnimPos {
        fr1: 1,
        fr2: 2,
        ..AnimPos::default()
    };
    assert_eq!(a, b);

    a.interp = 0.5;
    b.interp = 0.5;
    assert_ne!(a, b);
    b.prev = a.prev;
    assert_eq!(a, b);
}

#[test]
fn blend_fraction_is_ignored_when_both_frames_are_equal() {
    let a = AnimPos {
        fr1: 3,
        fr2: 3,
        t: 0.2,
        ..AnimPos::default()
    };
    let b = AnimPos { t: 0.9, ..a };
    assert_eq!(a, b);
    let c = AnimPos { fr2: 4, ..a };
    let d = AnimPos { t: 0.9, ..c };
    assert_ne!(c, d);
}

#[test]
fn pose_keys_include_pitch_mask_and_ragdoll() {
    let states = [AnimState::still(1)];
    let base = AnimCacheKey::new(&states, 0.0, None, None);
    assert_eq!(base, AnimCacheKey::new(&states, 0.0, None, None));
    assert_ne!(base, AnimCacheKey::new(&states, 10.0, None, None));
    assert_ne!(base, AnimCacheKey::new(&states, 0.0, Some(1), None));
    let ragdoll = Some(RagdollKey { id: 1, last_move: 5 });
    assert_ne!(base, AnimCacheKey::new(&states, 0.0, None, ragdoll));
    assert_ne!(
        base,
        AnimCacheKey::new(&[AnimState::still(1), AnimState::still(2)], 0.0, None, None)
    );
}

#[test]
fn slots_used_this_frame_are_never_reused() {
    let mut cache: LruCache<u32, ()> = LruCache::new(2);
    cache.lookup(&1, 10);
    cache.lookup(&2, 10);
    assert_eq!(cache.lookup(&3, 10), CacheLookup::Miss(2));
    assert_eq!(cache.len(), 3);
    assert!(cache.lookup(&1, 10).is_hit());

    // The next frame reuses the oldest slot again instead of growing.
    cache.lookup(&3, 20);
    cache.lookup(&1, 20);
    assert_eq!(cache.lookup(&4, 20), CacheLookup::Miss(1));
    assert_eq!(cache.len(), 3);
}
