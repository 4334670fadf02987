//! Reactive watchers: synchronous "on component add/remove" dispatch.
//!
//! A watcher declares an (all, any, none) mask, wildcard forms included.
//! Every archetype is matched against every watcher exactly once, at
//! archetype creation (or watcher registration), and indexed by archetype
//! id. An add/remove event then consults only the watchers indexed under
//! the event's archetype, re-checking that the mask actually covers the
//! changed id.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use tessera_component::{Entity, Mask};

use crate::archetype::ArchetypeId;
use crate::world::World;

/// Which structural event a watcher observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchKind {
    /// A matching component was added to an entity.
    Add,
    /// A matching component was removed from an entity.
    Remove,
}

/// Identifier of a registered watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatcherId(pub(crate) usize);

/// The callback signature: the world, the affected entity, and the
/// concrete changed id.
pub(crate) type WatchCallback = Rc<RefCell<Box<dyn FnMut(&mut World, Entity, Entity)>>>;

pub(crate) struct Watcher {
    kind: WatchKind,
    mask: Mask,
    callback: WatchCallback,
}

impl std::fmt::Debug for Watcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher")
            .field("kind", &self.kind)
            .field("mask", &self.mask)
            .finish()
    }
}

/// Watcher registry plus the per-archetype dispatch index.
#[derive(Debug, Default)]
pub(crate) struct Watchers {
    items: Vec<Watcher>,
    by_archetype: HashMap<ArchetypeId, Vec<usize>>,
}

impl Watchers {
    /// Register a watcher. The caller indexes it against existing
    /// archetypes via [`Watchers::index_watcher`].
    pub(crate) fn register(
        &mut self,
        kind: WatchKind,
        mask: Mask,
        callback: impl FnMut(&mut World, Entity, Entity) + 'static,
    ) -> WatcherId {
        let id = WatcherId(self.items.len());
        self.items.push(Watcher {
            kind,
            mask,
            callback: Rc::new(RefCell::new(Box::new(callback))),
        });
        id
    }

    /// Match one newly created archetype against every watcher.
    pub(crate) fn index_archetype(&mut self, archetype: ArchetypeId, ids: &[Entity]) {
        for (idx, watcher) in self.items.iter().enumerate() {
            if watcher.mask.matches(ids) {
                self.by_archetype.entry(archetype).or_default().push(idx);
            }
        }
    }

    /// Match one newly registered watcher against an existing archetype.
    pub(crate) fn index_watcher(&mut self, id: WatcherId, archetype: ArchetypeId, ids: &[Entity]) {
        if self.items[id.0].mask.matches(ids) {
            self.by_archetype.entry(archetype).or_default().push(id.0);
        }
    }

    /// Drop a retired archetype from the dispatch index.
    pub(crate) fn retire_archetype(&mut self, archetype: ArchetypeId) {
        self.by_archetype.remove(&archetype);
    }

    /// Callbacks to fire for an event: watchers indexed under `archetype`
    /// whose kind matches and whose mask covers the changed id.
    ///
    /// With `single_term_only` set, only watchers whose positive mask has
    /// exactly one member are considered, the narrowed dispatch used by
    /// whole-entity destruction cascades.
    pub(crate) fn matching(
        &self,
        archetype: ArchetypeId,
        kind: WatchKind,
        changed: Entity,
        single_term_only: bool,
    ) -> Vec<WatchCallback> {
        let Some(indexed) = self.by_archetype.get(&archetype) else {
            return Vec::new();
        };
        indexed
            .iter()
            .map(|&idx| &self.items[idx])
            .filter(|w| w.kind == kind)
            .filter(|w| !single_term_only || w.mask.positive_len() == 1)
            .filter(|w| w.mask.covers(changed))
            .map(|w| Rc::clone(&w.callback))
            .collect()
    }

    /// Number of registered watchers.
    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(index: u32) -> Entity {
        Entity::new(index, 0)
    }

    #[test]
    fn test_dispatch_only_under_indexed_archetype() {
        let mut watchers = Watchers::default();
        watchers.register(WatchKind::Add, Mask::new().with(id(1)), |_, _, _| {});

        watchers.index_archetype(ArchetypeId(0), &[id(1), id(2)]);
        watchers.index_archetype(ArchetypeId(1), &[id(2)]);

        assert_eq!(watchers.matching(ArchetypeId(0), WatchKind::Add, id(1), false).len(), 1);
        assert!(watchers.matching(ArchetypeId(1), WatchKind::Add, id(1), false).is_empty());
        // Indexed archetype, but the changed id is not covered by the mask.
        assert!(watchers.matching(ArchetypeId(0), WatchKind::Add, id(2), false).is_empty());
    }

    #[test]
    fn test_kind_narrows_dispatch() {
        let mut watchers = Watchers::default();
        watchers.register(WatchKind::Remove, Mask::new().with(id(1)), |_, _, _| {});
        watchers.index_archetype(ArchetypeId(0), &[id(1)]);

        assert!(watchers.matching(ArchetypeId(0), WatchKind::Add, id(1), false).is_empty());
        assert_eq!(
            watchers.matching(ArchetypeId(0), WatchKind::Remove, id(1), false).len(),
            1
        );
    }

    #[test]
    fn test_wildcard_mask_covers_concrete_pair() {
        let relation = id(7);
        let concrete = Entity::pair(relation, id(20));
        let mut watchers = Watchers::default();
        watchers.register(
            WatchKind::Add,
            Mask::new().with(Entity::any_target(relation)),
            |_, _, _| {},
        );
        watchers.index_archetype(ArchetypeId(0), &[concrete]);

        assert_eq!(
            watchers.matching(ArchetypeId(0), WatchKind::Add, concrete, false).len(),
            1
        );
    }

    #[test]
    fn test_single_term_narrowing() {
        let mut watchers = Watchers::default();
        watchers.register(
            WatchKind::Remove,
            Mask::new().with(id(1)).with(id(2)),
            |_, _, _| {},
        );
        watchers.register(WatchKind::Remove, Mask::new().with(id(1)), |_, _, _| {});
        watchers.index_archetype(ArchetypeId(0), &[id(1), id(2)]);

        assert_eq!(watchers.matching(ArchetypeId(0), WatchKind::Remove, id(1), false).len(), 2);
        assert_eq!(watchers.matching(ArchetypeId(0), WatchKind::Remove, id(1), true).len(), 1);
    }
}
