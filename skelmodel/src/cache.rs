//! Fixed-capacity, timestamp-evicted caches shared by the pose, blend and vertex layers.

use crate::{AnimState, MAX_ANIM_PARTS};

/// Slots per cache.
pub const MAX_CACHE_ENTRIES: usize = 16;

#[derive(Clone, Debug)]
pub struct CacheSlot<K, V> {
    pub key: Option<K>,
    pub last_used: i32,
    pub value: V,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CacheLookup {
    /// The slot already holds data computed for the key.
    Hit(usize),
    /// The slot was claimed for the key and its value must be recomputed.
    Miss(usize),
}

impl CacheLookup {
    pub fn index(self) -> usize {
        match self {
            CacheLookup::Hit(i) | CacheLookup::Miss(i) => i,
        }
    }

    pub fn is_hit(self) -> bool {
        matches!(self, CacheLookup::Hit(_))
    }
}

/// Exact-match lookup; otherwise an empty slot, otherwise the least recently used one. A slot
/// touched at the current timestamp is never reused: the cache grows past `capacity` instead.
#[derive(Clone, Debug)]
pub struct LruCache<K, V> {
    slots: Vec<CacheSlot<K, V>>,
    capacity: usize,
}

impl<K, V> Default for LruCache<K, V> {
    fn default() -> Self {
        Self::new(MAX_CACHE_ENTRIES)
    }
}

impl<K, V> LruCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slot(&self, index: usize) -> Option<&CacheSlot<K, V>> {
        self.slots.get(index)
    }

    pub fn slot_mut(&mut self, index: usize) -> Option<&mut CacheSlot<K, V>> {
        self.slots.get_mut(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CacheSlot<K, V>> {
        self.slots.iter()
    }

    /// Empties the cache, handing back the slots so owned resources can be released.
    pub fn drain(&mut self) -> std::vec::Drain<'_, CacheSlot<K, V>> {
        self.slots.drain(..)
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }
}

impl<K: PartialEq + Clone, V: Default> LruCache<K, V> {
    pub fn lookup(&mut self, key: &K, now: i32) -> CacheLookup {
        if let Some(i) = self
            .slots
            .iter()
            .position(|slot| slot.key.as_ref() == Some(key))
        {
            self.slots[i].last_used = now;
            return CacheLookup::Hit(i);
        }

        let free = self.slots.iter().position(|slot| slot.key.is_none());
        let stale = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.last_used < now)
            .min_by_key(|(_, slot)| slot.last_used)
            .map(|(i, _)| i);
        let index = match (free, stale) {
            (Some(i), _) => i,
            (None, _) if self.slots.len() < self.capacity => self.push_slot(now),
            (None, Some(i)) => i,
            // Every slot backs a draw recorded this frame.
            (None, None) => self.push_slot(now),
        };

        let slot = &mut self.slots[index];
        slot.key = Some(key.clone());
        slot.last_used = now;
        CacheLookup::Miss(index)
    }

    fn push_slot(&mut self, now: i32) -> usize {
        self.slots.push(CacheSlot {
            key: None,
            last_used: now,
            value: V::default(),
        });
        self.slots.len() - 1
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RagdollKey {
    pub id: u32,
    pub last_move: i32,
}

/// Everything a computed pose depends on. Unused part slots stay at their defaults.
#[derive(Clone, Debug, PartialEq)]
pub struct AnimCacheKey {
    pub parts: [AnimState; MAX_ANIM_PARTS],
    pub pitch: f32,
    pub part_mask: Option<u32>,
    pub ragdoll: Option<RagdollKey>,
}

impl AnimCacheKey {
    pub fn new(
        states: &[AnimState],
        pitch: f32,
        part_mask: Option<u32>,
        ragdoll: Option<RagdollKey>,
    ) -> Self {
        let mut parts = [AnimState::default(); MAX_ANIM_PARTS];
        for (dst, src) in parts.iter_mut().zip(states) {
            *dst = *src;
        }
        Self {
            parts,
            pitch,
            part_mask,
            ragdoll,
        }
    }
}

/// Key for caches layered on a pose slot: the slot index plus the pose it held.
#[derive(Clone, Debug, PartialEq)]
pub struct OwnedKey {
    pub owner: usize,
    pub pose: AnimCacheKey,
}
