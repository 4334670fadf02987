//! Archetype definitions and edge caches.
//!
//! An archetype owns an entity array parallel to its table's rows and the
//! *full* sorted set of component and relationship ids present, including
//! zero-size tags. Two archetypes with the same full set are deduplicated
//! by the registry; archetypes whose data-bearing subsets coincide share
//! one [`crate::table::Table`].
//!
//! Each archetype caches transition "edges": the neighbouring archetype
//! reached by adding or removing exactly one id. After the first
//! transition, repeated add/remove of the same id is an O(1) lookup.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use tessera_component::Entity;

/// Index of an archetype in the registry's arena. Stable for the life of
/// the world; archetypes are never deallocated, only retired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArchetypeId(pub u32);

impl ArchetypeId {
    /// Sentinel for "no archetype".
    pub const INVALID: Self = Self(u32::MAX);

    /// The arena index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Index of a table in the registry's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableId(pub u32);

impl TableId {
    /// The arena index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Cached transitions for a single id: the archetype reached by adding it
/// and the archetype reached by removing it.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArchetypeEdge {
    /// Destination when the id is added.
    pub add: Option<ArchetypeId>,
    /// Destination when the id is removed.
    pub remove: Option<ArchetypeId>,
}

/// A group of entities sharing one full component/relationship id set.
#[derive(Debug)]
pub struct Archetype {
    id: ArchetypeId,
    /// The full sorted id set, tags and pairs included.
    ids: Vec<Entity>,
    /// Entity per archetype row.
    entities: Vec<Entity>,
    /// The backing table (possibly shared with other archetypes).
    table: TableId,
    /// Single-id transition cache.
    edges: HashMap<Entity, ArchetypeEdge>,
}

impl Archetype {
    /// Create a new empty archetype over a sorted id set.
    #[must_use]
    pub fn new(id: ArchetypeId, ids: Vec<Entity>, table: TableId) -> Self {
        debug_assert!(ids.is_sorted());
        Self {
            id,
            ids,
            entities: Vec::new(),
            table,
            edges: HashMap::new(),
        }
    }

    /// This archetype's arena id.
    #[must_use]
    pub fn id(&self) -> ArchetypeId {
        self.id
    }

    /// The full sorted id set.
    #[must_use]
    pub fn ids(&self) -> &[Entity] {
        &self.ids
    }

    /// The backing table id.
    #[must_use]
    pub fn table(&self) -> TableId {
        self.table
    }

    /// The entity ids in row order.
    #[must_use]
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    /// Returns the number of entities in this archetype.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Returns `true` if no entity currently lives here.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Returns `true` if the exact id is part of this archetype's set.
    #[must_use]
    pub fn contains(&self, id: Entity) -> bool {
        self.ids.binary_search(&id).is_ok()
    }

    /// Concrete ids matching a (possibly wildcard) pattern, in set order.
    ///
    /// Linear scan over the id set, comparing the relevant packed half for
    /// wildcard pairs. Intentionally O(ids-per-archetype).
    pub fn matching_ids<'a>(&'a self, pattern: Entity) -> impl Iterator<Item = Entity> + 'a {
        self.ids.iter().copied().filter(move |&id| pattern.matches(id))
    }

    /// Append an entity, returning its archetype row.
    pub fn push(&mut self, entity: Entity) -> usize {
        let row = self.entities.len();
        self.entities.push(entity);
        row
    }

    /// Swap-remove the entity at `row`, returning the entity moved into
    /// the vacated row, if any. The caller patches that entity's record.
    pub fn swap_remove(&mut self, row: usize) -> Option<Entity> {
        debug_assert!(row < self.entities.len());
        let last = self.entities.len() - 1;
        let moved = (row != last).then(|| self.entities[last]);
        self.entities.swap_remove(row);
        moved
    }

    /// The cached edge for a single id (both directions may be unset).
    #[must_use]
    pub fn edge(&self, id: Entity) -> ArchetypeEdge {
        self.edges.get(&id).copied().unwrap_or_default()
    }

    /// Cache the destination reached by adding `id`.
    pub fn set_edge_add(&mut self, id: Entity, dst: ArchetypeId) {
        self.edges.entry(id).or_default().add = Some(dst);
    }

    /// Cache the destination reached by removing `id`.
    pub fn set_edge_remove(&mut self, id: Entity, dst: ArchetypeId) {
        self.edges.entry(id).or_default().remove = Some(dst);
    }

    /// Drop cached edges pointing at a retired archetype.
    pub fn purge_edges_to(&mut self, dst: ArchetypeId) {
        for edge in self.edges.values_mut() {
            if edge.add == Some(dst) {
                edge.add = None;
            }
            if edge.remove == Some(dst) {
                edge.remove = None;
            }
        }
        self.edges
            .retain(|_, edge| edge.add.is_some() || edge.remove.is_some());
    }
}

/// The id set reached from `ids` by adding `id`. Returns `None` when the
/// id is already present.
#[must_use]
pub fn set_with(ids: &[Entity], id: Entity) -> Option<Vec<Entity>> {
    match ids.binary_search(&id) {
        Ok(_) => None,
        Err(pos) => {
            let mut next = Vec::with_capacity(ids.len() + 1);
            next.extend_from_slice(&ids[..pos]);
            next.push(id);
            next.extend_from_slice(&ids[pos..]);
            Some(next)
        }
    }
}

/// The id set reached from `ids` by removing `id`. Returns `None` when the
/// id is absent.
#[must_use]
pub fn set_without(ids: &[Entity], id: Entity) -> Option<Vec<Entity>> {
    let pos = ids.binary_search(&id).ok()?;
    let mut next = ids.to_vec();
    next.remove(pos);
    Some(next)
}
