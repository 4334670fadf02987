//! Entity identifiers and slot allocation.
//!
//! An [`Entity`] is a packed 64-bit identifier. For a plain entity the low
//! 32 bits hold a dense slot index and the next 31 bits hold a generation
//! counter that guards against stale references. The top bit marks a
//! *relationship pair*: a relation's slot index coupled with a target's slot
//! index, either half of which may be a wildcard.

use serde::{Deserialize, Serialize};

/// A packed 64-bit entity, component, or relationship-pair identifier.
///
/// Layout: `first:32 | second:31 | pair-flag:1`.
///
/// * Plain id: `first` is the slot index, `second` is the generation.
/// * Pair id: `first` is the relation's slot index, `second` is the target's
///   slot index. Either half may hold the reserved wildcard value, meaning
///   "match any".
///
/// Slot index 0 is reserved for [`Entity::NULL`] and is never allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Entity(u64);

impl Entity {
    /// The null / invalid entity sentinel.
    pub const NULL: Entity = Entity(0);

    /// Reserved wildcard value for the `first` (relation) half of a pair.
    pub const ANY_FIRST: u32 = u32::MAX;

    /// Reserved wildcard value for the `second` (target) half of a pair.
    pub const ANY_SECOND: u32 = 0x7FFF_FFFF;

    const PAIR_BIT: u64 = 1 << 63;
    const SECOND_SHIFT: u32 = 32;
    const SECOND_MASK: u64 = 0x7FFF_FFFF;

    /// Compose an identifier from its raw fields.
    ///
    /// `second` must fit in 31 bits; the excess bit is truncated.
    #[must_use]
    pub const fn from_parts(first: u32, second: u32, pair: bool) -> Self {
        let mut bits = first as u64 | ((second as u64 & Self::SECOND_MASK) << Self::SECOND_SHIFT);
        if pair {
            bits |= Self::PAIR_BIT;
        }
        Self(bits)
    }

    /// Create a plain entity id from a slot index and a generation.
    #[must_use]
    pub const fn new(index: u32, generation: u32) -> Self {
        Self::from_parts(index, generation, false)
    }

    /// Create a relationship pair from a relation id and a target id.
    ///
    /// Only the slot indices of the two ids are packed; generations are not
    /// part of a pair. Liveness of either half is checked against the slot
    /// allocator, not the pair itself.
    #[must_use]
    pub const fn pair(relation: Entity, target: Entity) -> Self {
        Self::from_parts(relation.first(), target.first(), true)
    }

    /// Create a pair matching any target under the given relation.
    #[must_use]
    pub const fn any_target(relation: Entity) -> Self {
        Self::from_parts(relation.first(), Self::ANY_SECOND, true)
    }

    /// Create a pair matching any relation pointing at the given target.
    #[must_use]
    pub const fn any_relation(target: Entity) -> Self {
        Self::from_parts(Self::ANY_FIRST, target.first(), true)
    }

    /// The `first` field: slot index for a plain id, relation slot for a pair.
    #[must_use]
    pub const fn first(self) -> u32 {
        self.0 as u32
    }

    /// The `second` field: generation for a plain id, target slot for a pair.
    #[must_use]
    pub const fn second(self) -> u32 {
        ((self.0 >> Self::SECOND_SHIFT) & Self::SECOND_MASK) as u32
    }

    /// Returns `true` if this id is a relationship pair.
    #[must_use]
    pub const fn is_pair(self) -> bool {
        self.0 & Self::PAIR_BIT != 0
    }

    /// Returns `true` if this is the null sentinel.
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Returns `true` if either half of this pair is a wildcard.
    #[must_use]
    pub const fn has_wildcard(self) -> bool {
        self.is_pair() && (self.first() == Self::ANY_FIRST || self.second() == Self::ANY_SECOND)
    }

    /// Wildcard-aware match of `self` (a pattern) against a concrete id.
    ///
    /// Plain ids match by equality. For pairs, a wildcard half matches any
    /// value in the corresponding half of `other`.
    #[must_use]
    pub const fn matches(self, other: Entity) -> bool {
        if !self.is_pair() || !other.is_pair() {
            return self.0 == other.0;
        }
        let first_ok = self.first() == Self::ANY_FIRST || self.first() == other.first();
        let second_ok = self.second() == Self::ANY_SECOND || self.second() == other.second();
        first_ok && second_ok
    }

    /// The raw 64-bit representation.
    #[must_use]
    pub const fn to_bits(self) -> u64 {
        self.0
    }

    /// Reconstruct an id from its raw 64-bit representation.
    #[must_use]
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_pair() {
            match (self.first(), self.second()) {
                (Entity::ANY_FIRST, t) => write!(f, "Pair(*, {t})"),
                (r, Entity::ANY_SECOND) => write!(f, "Pair({r}, *)"),
                (r, t) => write!(f, "Pair({r}, {t})"),
            }
        } else {
            write!(f, "Entity({}v{})", self.first(), self.second())
        }
    }
}

/// Allocates entity slots with generation-tracked reuse.
///
/// Slots are handed out densely starting at index 1 (0 is reserved for
/// [`Entity::NULL`]). Freed slots go onto a free list and come back with an
/// incremented generation, so any id held from the previous life of a slot
/// fails the [`SlotAllocator::is_current`] check. A per-slot alive bit
/// keeps that check O(1) even while the slot sits on the free list.
#[derive(Debug)]
pub struct SlotAllocator {
    /// Current generation per slot. Index 0 is the reserved null slot.
    generations: Vec<u32>,
    /// Whether the slot is currently handed out.
    alive: Vec<bool>,
    /// Slots available for reuse.
    free: Vec<u32>,
}

impl SlotAllocator {
    /// Create a new allocator with only the reserved null slot.
    #[must_use]
    pub fn new() -> Self {
        Self {
            generations: vec![0],
            alive: vec![false],
            free: Vec::new(),
        }
    }

    /// Allocate a slot, preferring the free list over fresh growth.
    pub fn allocate(&mut self) -> Entity {
        if let Some(index) = self.free.pop() {
            self.alive[index as usize] = true;
            return Entity::new(index, self.generations[index as usize]);
        }
        let index = self.generations.len() as u32;
        debug_assert!(index < Entity::ANY_FIRST, "slot index space exhausted");
        self.generations.push(0);
        self.alive.push(true);
        Entity::new(index, 0)
    }

    /// Free a slot, bumping its generation so stale ids go dead.
    ///
    /// Returns `false` if the id was not current (already freed, recycled,
    /// or a pair), in which case nothing changes.
    pub fn free(&mut self, entity: Entity) -> bool {
        if !self.is_current(entity) {
            return false;
        }
        let index = entity.first();
        let generation = &mut self.generations[index as usize];
        // ANY_SECOND is reserved; wrap before reaching it.
        *generation = if *generation + 1 >= Entity::ANY_SECOND {
            0
        } else {
            *generation + 1
        };
        self.alive[index as usize] = false;
        self.free.push(index);
        true
    }

    /// Returns `true` if `entity` is a live, current plain id.
    #[must_use]
    pub fn is_current(&self, entity: Entity) -> bool {
        if entity.is_pair() || entity.is_null() {
            return false;
        }
        let index = entity.first() as usize;
        match self.generations.get(index) {
            Some(&generation) => generation == entity.second() && self.alive[index],
            None => false,
        }
    }

    /// The canonical (current-generation) id for a slot index, if the slot
    /// is currently live.
    #[must_use]
    pub fn canonical(&self, index: u32) -> Option<Entity> {
        if !self.alive.get(index as usize).copied().unwrap_or(false) {
            return None;
        }
        Some(Entity::new(index, self.generations[index as usize]))
    }

    /// Number of slots ever allocated (live or freed).
    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.generations.len() - 1
    }

    /// Number of currently live slots.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.slot_count() - self.free.len()
    }
}

impl Default for SlotAllocator {
    fn default() -> Self {
        Self::new()
    }
}
