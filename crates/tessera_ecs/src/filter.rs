//! The filter cache: masks resolved to live lists of matching archetypes.
//!
//! Building a filter scans the registry once; afterwards the matching list
//! is maintained incrementally as archetypes are created, so reusing a
//! filter never re-queries. Filters are cached by mask *content* (hash,
//! then exact set equality) and evicted once no [`FilterHandle`] keeps
//! them alive.

use std::rc::{Rc, Weak};

use tessera_component::{Entity, Mask};

use crate::archetype::ArchetypeId;

/// A handle keeping one cached filter alive.
///
/// Handles are cheap to clone; the cache entry is evicted on a later sweep
/// once every handle for it has been dropped.
#[derive(Debug, Clone)]
pub struct FilterHandle {
    slot: u32,
    _alive: Rc<()>,
}

impl FilterHandle {
    /// The cache slot this handle pins.
    #[must_use]
    pub(crate) fn slot(&self) -> u32 {
        self.slot
    }
}

/// One cached filter: the mask, its content hash, and the live list of
/// matching archetypes in creation order.
#[derive(Debug)]
pub(crate) struct FilterEntry {
    mask: Mask,
    hash: u64,
    archetypes: Vec<ArchetypeId>,
    alive: Weak<()>,
}

impl FilterEntry {
    /// The filter's mask.
    pub(crate) fn mask(&self) -> &Mask {
        &self.mask
    }

    /// Matching archetypes in creation order.
    pub(crate) fn archetypes(&self) -> &[ArchetypeId] {
        &self.archetypes
    }
}

/// The registry's filter cache: a slab of entries with refcount-driven
/// eviction, replacing the source's GC weak-reference scheme.
#[derive(Debug, Default)]
pub(crate) struct FilterCache {
    entries: Vec<Option<FilterEntry>>,
    free: Vec<u32>,
}

impl FilterCache {
    /// Find a live cached filter with exactly this mask content.
    pub(crate) fn find(&self, mask: &Mask) -> Option<FilterHandle> {
        let hash = mask.content_hash();
        for (slot, entry) in self.entries.iter().enumerate() {
            let Some(entry) = entry else { continue };
            if entry.hash != hash || entry.mask != *mask {
                continue;
            }
            // Hash and content both match; revive only if still referenced.
            if let Some(alive) = entry.alive.upgrade() {
                return Some(FilterHandle {
                    slot: slot as u32,
                    _alive: alive,
                });
            }
        }
        None
    }

    /// Insert a freshly built filter, reusing an evicted slot when one is
    /// free. Sweeps dead entries first so ephemeral ad hoc filters cannot
    /// grow the cache without bound.
    pub(crate) fn insert(&mut self, mask: Mask, archetypes: Vec<ArchetypeId>) -> FilterHandle {
        self.sweep();
        let alive = Rc::new(());
        let entry = FilterEntry {
            hash: mask.content_hash(),
            mask,
            archetypes,
            alive: Rc::downgrade(&alive),
        };
        let slot = match self.free.pop() {
            Some(slot) => {
                self.entries[slot as usize] = Some(entry);
                slot
            }
            None => {
                self.entries.push(Some(entry));
                (self.entries.len() - 1) as u32
            }
        };
        FilterHandle { slot, _alive: alive }
    }

    /// Resolve a handle to its entry.
    pub(crate) fn get(&self, handle: &FilterHandle) -> &FilterEntry {
        self.entries[handle.slot() as usize]
            .as_ref()
            .expect("a held FilterHandle pins its slot")
    }

    /// Offer a newly created archetype to every live filter.
    pub(crate) fn on_archetype_created(&mut self, id: ArchetypeId, ids: &[Entity]) {
        for entry in self.entries.iter_mut().flatten() {
            if entry.alive.strong_count() > 0 && entry.mask.matches(ids) {
                entry.archetypes.push(id);
            }
        }
    }

    /// Drop a retired archetype from every matching list.
    pub(crate) fn on_archetype_retired(&mut self, id: ArchetypeId) {
        for entry in self.entries.iter_mut().flatten() {
            entry.archetypes.retain(|&a| a != id);
        }
    }

    /// Evict entries whose last handle has been dropped.
    pub(crate) fn sweep(&mut self) {
        for (slot, entry) in self.entries.iter_mut().enumerate() {
            let dead = entry
                .as_ref()
                .is_some_and(|e| e.alive.strong_count() == 0);
            if dead {
                *entry = None;
                self.free.push(slot as u32);
            }
        }
    }

    /// Number of live cached filters.
    #[cfg(test)]
    pub(crate) fn live_len(&self) -> usize {
        self.entries
            .iter()
            .flatten()
            .filter(|e| e.alive.strong_count() > 0)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(index: u32) -> Entity {
        Entity::new(index, 0)
    }

    #[test]
    fn test_find_by_content_not_identity() {
        let mut cache = FilterCache::default();
        let handle = cache.insert(Mask::new().with(id(1)).without(id(2)), vec![ArchetypeId(0)]);

        // A structurally equal mask built in a different order hits.
        let same = Mask::new().without(id(2)).with(id(1));
        let found = cache.find(&same).expect("cache hit");
        assert_eq!(found.slot(), handle.slot());

        assert!(cache.find(&Mask::new().with(id(1))).is_none());
    }

    #[test]
    fn test_eviction_after_last_handle_drops() {
        let mut cache = FilterCache::default();
        let handle = cache.insert(Mask::new().with(id(1)), Vec::new());
        assert_eq!(cache.live_len(), 1);

        drop(handle);
        assert!(cache.find(&Mask::new().with(id(1))).is_none());
        cache.sweep();
        assert_eq!(cache.live_len(), 0);

        // The slot is reused for the next filter.
        let other = cache.insert(Mask::new().with(id(2)), Vec::new());
        assert_eq!(other.slot(), 0);
    }

    #[test]
    fn test_incremental_archetype_updates() {
        let mut cache = FilterCache::default();
        let handle = cache.insert(Mask::new().with(id(1)), vec![ArchetypeId(0)]);

        cache.on_archetype_created(ArchetypeId(1), &[id(1), id(5)]);
        cache.on_archetype_created(ArchetypeId(2), &[id(5)]);
        assert_eq!(cache.get(&handle).archetypes(), &[ArchetypeId(0), ArchetypeId(1)]);

        cache.on_archetype_retired(ArchetypeId(0));
        assert_eq!(cache.get(&handle).archetypes(), &[ArchetypeId(1)]);
    }
}
