//! Per-slot entity records.
//!
//! One [`EntityRecord`] exists per allocated slot, indexed by the entity's
//! slot index. It is mutated in place on every structural change and reset
//! to the sentinel state when the entity dies.

use bitflags::bitflags;

use tessera_component::Entity;

use crate::archetype::ArchetypeId;

bitflags! {
    /// Structural role bits tracked per entity slot.
    ///
    /// The role bits let entity destruction skip the global cleanup scan
    /// when the entity was never used as a tag or relationship part.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct EntityFlags: u8 {
        /// The entity id is attached to other entities as a tag.
        const TAG = 1 << 0;
        /// The entity is a registered relation appearing in pairs.
        const RELATION_SOURCE = 1 << 1;
        /// The entity is the target of at least one relationship pair.
        const RELATION_TARGET = 1 << 2;
        /// The entity carries relationship pairs of its own.
        const HAS_RELATIONSHIPS = 1 << 3;
        /// The entity is a relation allowing at most one target per holder.
        const EXCLUSIVE = 1 << 4;
        /// The entity is deactivated and skipped by filter iteration.
        const DISABLED = 1 << 5;
    }
}

/// Where an entity currently lives: archetype, row within the archetype's
/// entity array, and row within the archetype's table.
///
/// `entity` holds the canonical id including the generation; any held copy
/// of the id must match it before the record may be trusted.
#[derive(Debug, Clone)]
pub struct EntityRecord {
    /// The archetype holding this entity, or [`ArchetypeId::INVALID`].
    pub archetype: ArchetypeId,
    /// Row in the archetype's entity array.
    pub arch_row: u32,
    /// Row in the archetype's table (differs from `arch_row` when the
    /// table is shared between archetypes).
    pub table_row: u32,
    /// The canonical id for this slot, used for the generation check.
    pub entity: Entity,
    /// Structural role bits.
    pub flags: EntityFlags,
}

impl EntityRecord {
    /// The sentinel row value for a dead record.
    pub const NO_ROW: u32 = u32::MAX;

    /// A dead record for a never-used or freed slot.
    #[must_use]
    pub fn dead() -> Self {
        Self {
            archetype: ArchetypeId::INVALID,
            arch_row: Self::NO_ROW,
            table_row: Self::NO_ROW,
            entity: Entity::NULL,
            flags: EntityFlags::empty(),
        }
    }

    /// Returns `true` if the record refers to a live archetype row.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.archetype != ArchetypeId::INVALID
    }

    /// Reset to the dead sentinel, clearing all role bits.
    pub fn reset(&mut self) {
        *self = Self::dead();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dead_record_sentinel() {
        let record = EntityRecord::dead();
        assert!(!record.is_alive());
        assert_eq!(record.arch_row, EntityRecord::NO_ROW);
        assert_eq!(record.flags, EntityFlags::empty());
    }

    #[test]
    fn test_reset_clears_roles() {
        let mut record = EntityRecord::dead();
        record.archetype = ArchetypeId(0);
        record.flags |= EntityFlags::TAG | EntityFlags::EXCLUSIVE;
        assert!(record.is_alive());
        record.reset();
        assert!(!record.is_alive());
        assert!(record.flags.is_empty());
    }
}
