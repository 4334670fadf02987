//! Query masks: the (all, any, none) description of a structural query.
//!
//! A [`Mask`] is pure data: three sorted, deduplicated id sets. The registry
//! resolves a mask to a cached filter of matching archetypes; watchers use
//! the same mask shape to describe which component changes they observe.

use serde::{Deserialize, Serialize};

use crate::entity::Entity;

/// FNV-1a 64-bit offset basis.
const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;

/// FNV-1a 64-bit prime.
const FNV_PRIME: u64 = 0x0100_0000_01b3;

/// The (all, any, none) id-set description of a query.
///
/// * `all` — every id must be present; relationship-wildcard terms match if
///   the archetype contains *some* id matching the concrete half.
/// * `any` — at least one id must be present (vacuously true when empty).
/// * `none` — no id may be present.
///
/// A mask with both `all` and `any` empty matches nothing and is rejected
/// by the registry when building a filter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mask {
    all: Vec<Entity>,
    any: Vec<Entity>,
    none: Vec<Entity>,
}

impl Mask {
    /// Create an empty mask.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `id` to be present.
    #[must_use]
    pub fn with(mut self, id: Entity) -> Self {
        insert_sorted(&mut self.all, id);
        self
    }

    /// Forbid `id` from being present.
    #[must_use]
    pub fn without(mut self, id: Entity) -> Self {
        insert_sorted(&mut self.none, id);
        self
    }

    /// Require at least one of the accumulated `any_of` ids to be present.
    #[must_use]
    pub fn any_of(mut self, id: Entity) -> Self {
        insert_sorted(&mut self.any, id);
        self
    }

    /// The sorted `all` set.
    #[must_use]
    pub fn all(&self) -> &[Entity] {
        &self.all
    }

    /// The sorted `any` set.
    #[must_use]
    pub fn any(&self) -> &[Entity] {
        &self.any
    }

    /// The sorted `none` set.
    #[must_use]
    pub fn none(&self) -> &[Entity] {
        &self.none
    }

    /// Returns `true` if the mask has no positive terms at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.all.is_empty() && self.any.is_empty()
    }

    /// The `all` terms that carry a wildcard half, in set order.
    pub fn wildcard_terms(&self) -> impl Iterator<Item = Entity> + '_ {
        self.all.iter().copied().filter(|id| id.has_wildcard())
    }

    /// Archetype-compatibility test against a sorted full id set.
    #[must_use]
    pub fn matches(&self, ids: &[Entity]) -> bool {
        for &term in &self.all {
            if !contains_match(ids, term) {
                return false;
            }
        }
        for &term in &self.none {
            if contains_match(ids, term) {
                return false;
            }
        }
        if self.any.is_empty() {
            return true;
        }
        self.any.iter().any(|&term| contains_match(ids, term))
    }

    /// Wildcard-aware test of whether this mask's positive terms cover a
    /// specific changed id. Used by reactive dispatch: a watcher fires only
    /// when the changed component is actually named (exactly or through a
    /// wildcard) in its `all` or `any` set.
    #[must_use]
    pub fn covers(&self, id: Entity) -> bool {
        self.all.iter().chain(self.any.iter()).any(|&term| term.matches(id))
    }

    /// Number of positive terms (`all` + `any`).
    #[must_use]
    pub fn positive_len(&self) -> usize {
        self.all.len() + self.any.len()
    }

    /// A stable hash of the mask's content, independent of build order.
    ///
    /// Equal masks hash equally; the registry still confirms exact set
    /// equality before reusing a cached filter.
    #[must_use]
    pub fn content_hash(&self) -> u64 {
        let mut hash = FNV_OFFSET_BASIS;
        for (salt, set) in [(1u8, &self.all), (2, &self.any), (3, &self.none)] {
            hash ^= u64::from(salt);
            hash = hash.wrapping_mul(FNV_PRIME);
            for id in set {
                for byte in id.to_bits().to_le_bytes() {
                    hash ^= u64::from(byte);
                    hash = hash.wrapping_mul(FNV_PRIME);
                }
            }
        }
        hash
    }
}

fn insert_sorted(set: &mut Vec<Entity>, id: Entity) {
    if let Err(pos) = set.binary_search(&id) {
        set.insert(pos, id);
    }
}

/// Does a sorted id set contain a match for `term`?
///
/// Exact terms use binary search; wildcard terms fall back to a linear scan
/// comparing the concrete half. Archetypes rarely hold more than a few
/// dozen ids, so the scan is acceptable.
#[must_use]
pub fn contains_match(ids: &[Entity], term: Entity) -> bool {
    if !term.has_wildcard() {
        return ids.binary_search(&term).is_ok();
    }
    ids.iter().any(|&id| term.matches(id))
}
