//! Row iteration over the archetypes matched by a filter.
//!
//! [`RowIter`] walks a filter's archetype list in creation order and each
//! archetype's rows in storage order. A wildcard pair term in the filter's
//! mask expands like an odometer: one step per combination of concrete
//! resolutions, so an entity pointing at three targets is visited three
//! times with a different binding each time.

use std::any::TypeId;

use tessera_component::{Component, Entity};

use crate::archetype::{ArchetypeId, TableId};
use crate::filter::FilterHandle;
use crate::record::EntityFlags;
use crate::table::Table;
use crate::world::World;

/// One iteration step: an entity plus the concrete resolution of every
/// wildcard term for this step.
pub struct RowView<'w> {
    world: &'w World,
    entity: Entity,
    table: TableId,
    table_row: usize,
    archetype: ArchetypeId,
    resolved: Vec<Entity>,
}

impl<'w> RowView<'w> {
    /// The entity at this step.
    #[must_use]
    pub fn entity(&self) -> Entity {
        self.entity
    }

    /// Borrow one of the entity's components.
    #[must_use]
    pub fn get<T: Component>(&self) -> Option<&'w T> {
        let id = self.world.component_id::<T>()?;
        self.get_id(id)
    }

    /// Borrow the value stored at an explicit id, such as a resolved pair.
    #[must_use]
    pub fn get_id<T: Component>(&self, id: Entity) -> Option<&'w T> {
        typed_at::<T>(&self.world.tables[self.table.index()], id, self.table_row)
    }

    /// Concrete ids bound to the filter's wildcard terms, in mask order.
    #[must_use]
    pub fn resolved(&self) -> &[Entity] {
        &self.resolved
    }

    /// The canonical target entity of the resolved pair at `term`.
    #[must_use]
    pub fn resolved_target(&self, term: usize) -> Option<Entity> {
        let id = *self.resolved.get(term)?;
        if !id.is_pair() {
            return None;
        }
        self.world.canonical_of(id.second())
    }

    /// Wildcard-aware membership test against this row's archetype.
    #[must_use]
    pub fn has(&self, id: Entity) -> bool {
        self.world.archetypes[self.archetype.index()]
            .matching_ids(id)
            .next()
            .is_some()
    }
}

fn typed_at<'w, T: Component>(table: &'w Table, id: Entity, row: usize) -> Option<&'w T> {
    let column = table.column(id)?;
    if column.meta().type_id != TypeId::of::<T>() {
        return None;
    }
    // SAFETY: The column's TypeId was just checked against T.
    unsafe { column.get::<T>(row) }
}

/// Iterator over every step a filter currently yields. Holds a shared
/// borrow of the world, so structural mutation is impossible while one is
/// live; use [`World::each`] to mutate during traversal.
pub struct RowIter<'w> {
    world: &'w World,
    archetypes: Vec<ArchetypeId>,
    wildcard_terms: Vec<Entity>,
    cursor: usize,
    row: usize,
    /// Per wildcard term, its concrete matches in the current archetype.
    resolutions: Vec<Vec<Entity>>,
    combo: Vec<usize>,
    entered: bool,
}

impl<'w> RowIter<'w> {
    pub(crate) fn new(world: &'w World, handle: &FilterHandle) -> Self {
        let entry = world.filters.get(handle);
        Self {
            world,
            archetypes: entry.archetypes().to_vec(),
            wildcard_terms: entry.mask().wildcard_terms().collect(),
            cursor: 0,
            row: 0,
            resolutions: Vec::new(),
            combo: Vec::new(),
            entered: false,
        }
    }

    /// Compute the wildcard resolutions for the current archetype. Returns
    /// `false` if a term has no match and the archetype must be skipped.
    fn enter_archetype(&mut self) -> bool {
        let arch = &self.world.archetypes[self.archetypes[self.cursor].index()];
        self.resolutions.clear();
        for &term in &self.wildcard_terms {
            let matches: Vec<Entity> = arch.matching_ids(term).collect();
            if matches.is_empty() {
                return false;
            }
            self.resolutions.push(matches);
        }
        self.combo.clear();
        self.combo.resize(self.wildcard_terms.len(), 0);
        true
    }

    /// Advance the resolution odometer. Returns `false` on wrap-around,
    /// which moves the iterator to the next row.
    fn advance_combo(&mut self) -> bool {
        for (digit, set) in self.combo.iter_mut().zip(&self.resolutions) {
            *digit += 1;
            if *digit < set.len() {
                return true;
            }
            *digit = 0;
        }
        false
    }
}

impl<'w> Iterator for RowIter<'w> {
    type Item = RowView<'w>;

    fn next(&mut self) -> Option<RowView<'w>> {
        loop {
            if self.cursor >= self.archetypes.len() {
                return None;
            }
            if !self.entered {
                if !self.enter_archetype() {
                    self.cursor += 1;
                    self.row = 0;
                    continue;
                }
                self.entered = true;
                self.row = 0;
            }
            let arch_id = self.archetypes[self.cursor];
            let arch = &self.world.archetypes[arch_id.index()];
            let Some(&entity) = arch.entities().get(self.row) else {
                self.cursor += 1;
                self.entered = false;
                continue;
            };
            if self.world.records[entity.first() as usize]
                .flags
                .contains(EntityFlags::DISABLED)
            {
                self.row += 1;
                continue;
            }
            let view = RowView {
                world: self.world,
                entity,
                table: arch.table(),
                table_row: self.world.records[entity.first() as usize].table_row as usize,
                archetype: arch_id,
                resolved: self
                    .combo
                    .iter()
                    .zip(&self.resolutions)
                    .map(|(&digit, set)| set[digit])
                    .collect(),
            };
            if !self.advance_combo() {
                self.row += 1;
            }
            return Some(view);
        }
    }
}

/// Typed projection of a row, letting a tuple of component borrows be
/// fetched in one call. Implemented for `&T`, `Option<&T>` and tuples up
/// to four elements.
pub trait QueryData {
    type Item<'w>;

    fn fetch<'w>(row: &RowView<'w>) -> Option<Self::Item<'w>>;
}

impl<'q, T: Component> QueryData for &'q T {
    type Item<'w> = &'w T;

    fn fetch<'w>(row: &RowView<'w>) -> Option<&'w T> {
        row.get::<T>()
    }
}

impl<'q, T: Component> QueryData for Option<&'q T> {
    type Item<'w> = Option<&'w T>;

    fn fetch<'w>(row: &RowView<'w>) -> Option<Self::Item<'w>> {
        Some(row.get::<T>())
    }
}

macro_rules! impl_query_data_tuple {
    ($($name:ident),+) => {
        impl<$($name: QueryData),+> QueryData for ($($name,)+) {
            type Item<'w> = ($($name::Item<'w>,)+);

            fn fetch<'w>(row: &RowView<'w>) -> Option<Self::Item<'w>> {
                Some(($($name::fetch(row)?,)+))
            }
        }
    };
}

impl_query_data_tuple!(A);
impl_query_data_tuple!(A, B);
impl_query_data_tuple!(A, B, C);
impl_query_data_tuple!(A, B, C, D);

impl World {
    /// Iterate a filter projected through a typed [`QueryData`], yielding
    /// the entity and the fetched borrows for each step where every
    /// non-optional term is present.
    pub fn view<'w, Q: QueryData>(
        &'w self,
        filter: &FilterHandle,
    ) -> impl Iterator<Item = (Entity, Q::Item<'w>)> + 'w {
        self.iter(filter).filter_map(|row| {
            let entity = row.entity();
            Q::fetch(&row).map(|item| (entity, item))
        })
    }
}
