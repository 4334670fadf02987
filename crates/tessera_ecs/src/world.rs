//! The registry: entity records, archetype and table arenas, component
//! registration, relationships, deferred mutation and reactive dispatch.
//!
//! A [`World`] owns every entity and every component value. Structural
//! mutations (add, remove, despawn) move rows between archetypes through
//! cached edges; while the world is locked they are logged instead and
//! replayed when the lock count returns to zero.

use std::any::TypeId;
use std::collections::HashMap;

use tracing::{debug, trace, warn};

use tessera_component::{Component, ComponentHooks, ComponentMeta, Entity, Mask, SlotAllocator};

use crate::archetype::{Archetype, ArchetypeId, TableId, set_with, set_without};
use crate::deferred::{DeferredOp, StagedValue};
use crate::error::WorldError;
use crate::filter::{FilterCache, FilterHandle};
use crate::query::RowIter;
use crate::record::{EntityFlags, EntityRecord};
use crate::table::Table;
use crate::watch::{WatchKind, WatcherId, Watchers};

/// Registration record for a component type.
struct ComponentInfo {
    meta: ComponentMeta,
    hooks: ComponentHooks,
    /// When used as a relation, at most one target per entity.
    exclusive: bool,
}

/// The central registry.
pub struct World {
    allocator: SlotAllocator,
    pub(crate) records: Vec<EntityRecord>,
    pub(crate) archetypes: Vec<Archetype>,
    pub(crate) tables: Vec<Table>,
    /// Full sorted id set to archetype, for structural dedup.
    archetype_index: HashMap<Box<[Entity]>, ArchetypeId>,
    /// Data-bearing id subset to table; archetypes differing only in tags
    /// share one table.
    table_index: HashMap<Box<[Entity]>, TableId>,
    /// Concrete id (plus wildcard pair keys) to the archetypes containing a
    /// matching member, in creation order.
    by_component: HashMap<Entity, Vec<ArchetypeId>>,
    /// Rust type to its canonical component entity.
    type_index: HashMap<TypeId, Entity>,
    /// Slot index of a canonical component entity to its registration.
    infos: HashMap<u32, ComponentInfo>,
    pub(crate) filters: FilterCache,
    watchers: Watchers,
    deferred: Vec<DeferredOp>,
    lock_count: u32,
    /// The empty archetype newly spawned entities live in.
    root: ArchetypeId,
}

impl World {
    #[must_use]
    pub fn new() -> Self {
        let root = ArchetypeId(0);
        let root_table = TableId(0);
        let mut archetype_index = HashMap::new();
        archetype_index.insert(Vec::new().into_boxed_slice(), root);
        let mut table_index = HashMap::new();
        table_index.insert(Vec::new().into_boxed_slice(), root_table);
        Self {
            allocator: SlotAllocator::new(),
            records: Vec::new(),
            archetypes: vec![Archetype::new(root, Vec::new(), root_table)],
            tables: vec![Table::new(Vec::new(), Vec::new())],
            archetype_index,
            table_index,
            by_component: HashMap::new(),
            type_index: HashMap::new(),
            infos: HashMap::new(),
            filters: FilterCache::default(),
            watchers: Watchers::default(),
            deferred: Vec::new(),
            lock_count: 0,
            root,
        }
    }

    // ---- entity lifecycle ----

    /// Create a fresh empty entity.
    pub fn spawn(&mut self) -> Entity {
        let entity = self.allocator.allocate();
        let slot = entity.first() as usize;
        if slot >= self.records.len() {
            self.records.resize_with(slot + 1, EntityRecord::dead);
        }
        let arch_row = self.archetypes[self.root.index()].push(entity) as u32;
        let table = self.archetypes[self.root.index()].table();
        let table_row = self.tables[table.index()].push_entity(entity) as u32;
        self.records[slot] = EntityRecord {
            archetype: self.root,
            arch_row,
            table_row,
            entity,
            flags: EntityFlags::empty(),
        };
        trace!(%entity, "spawned entity");
        entity
    }

    /// Destroy an entity, dropping its component values and cascading
    /// removal of every id that references it. Deferred while locked.
    pub fn despawn(&mut self, entity: Entity) -> Result<(), WorldError> {
        self.ensure_alive(entity)?;
        if self.lock_count > 0 {
            self.deferred.push(DeferredOp::Despawn { entity });
            return Ok(());
        }
        self.apply_despawn(entity);
        Ok(())
    }

    /// Returns `true` if the id names a live entity of the current
    /// generation.
    #[must_use]
    pub fn is_alive(&self, entity: Entity) -> bool {
        !entity.is_pair()
            && self.allocator.is_current(entity)
            && self
                .records
                .get(entity.first() as usize)
                .is_some_and(|r| r.is_alive() && r.entity == entity)
    }

    /// The current-generation entity occupying a slot, if it is live.
    pub(crate) fn canonical_of(&self, slot: u32) -> Option<Entity> {
        self.allocator.canonical(slot)
    }

    /// Number of live entities, component entities included.
    #[must_use]
    pub fn live_entities(&self) -> usize {
        self.allocator.live_count()
    }

    /// Despawn every entity that is not a registered component type.
    pub fn clear_entities(&mut self) {
        let doomed: Vec<Entity> = self
            .records
            .iter()
            .filter(|r| r.is_alive())
            .map(|r| r.entity)
            .filter(|e| !self.infos.contains_key(&e.first()))
            .collect();
        debug!(count = doomed.len(), "clearing entities");
        for entity in doomed {
            if self.is_alive(entity) {
                let _ = self.despawn(entity);
            }
        }
    }

    // ---- component registration ----

    /// Register a component type, returning its canonical entity. Calling
    /// this twice for the same type returns the same id.
    pub fn register<T: Component>(&mut self) -> Entity {
        if let Some(&id) = self.type_index.get(&TypeId::of::<T>()) {
            return id;
        }
        let id = self.spawn();
        debug!(component = T::type_name(), %id, "registered component type");
        self.type_index.insert(TypeId::of::<T>(), id);
        self.infos.insert(
            id.first(),
            ComponentInfo {
                meta: ComponentMeta::of::<T>(),
                hooks: ComponentHooks::new(),
                exclusive: false,
            },
        );
        id
    }

    /// The canonical entity for a registered type, if any.
    #[must_use]
    pub fn component_id<T: Component>(&self) -> Option<Entity> {
        self.type_index.get(&TypeId::of::<T>()).copied()
    }

    fn component_id_or_err<T: Component>(&self) -> Result<Entity, WorldError> {
        self.component_id::<T>()
            .ok_or(WorldError::NotRegistered(T::type_name()))
    }

    /// Install auto-reset hooks for a component type, registering it if
    /// needed.
    pub fn set_hooks<T: Component>(&mut self, hooks: ComponentHooks) -> Entity {
        let id = self.register::<T>();
        if let Some(info) = self.infos.get_mut(&id.first()) {
            info.hooks = hooks;
        }
        id
    }

    /// Mark a relation type as exclusive: adding a pair under it replaces
    /// any existing pair with a different target.
    pub fn set_exclusive<T: Component>(&mut self, exclusive: bool) -> Entity {
        let id = self.register::<T>();
        if let Some(info) = self.infos.get_mut(&id.first()) {
            info.exclusive = exclusive;
        }
        let slot = id.first() as usize;
        self.records[slot].flags.set(EntityFlags::EXCLUSIVE, exclusive);
        id
    }

    /// Human-readable name for an id, falling back to the packed fields.
    #[must_use]
    pub fn name_of(&self, id: Entity) -> String {
        let half = |slot: u32| -> String {
            if slot == Entity::ANY_FIRST || slot == Entity::ANY_SECOND {
                "*".to_string()
            } else if let Some(info) = self.infos.get(&slot) {
                info.meta.name.to_string()
            } else {
                format!("#{slot}")
            }
        };
        if id.is_pair() {
            format!("({}, {})", half(id.first()), half(id.second()))
        } else if let Some(info) = self.infos.get(&id.first()) {
            info.meta.name.to_string()
        } else {
            format!("{id}")
        }
    }

    // ---- typed component operations ----

    /// Add a component value, registering the type if needed. Deferred
    /// while locked.
    pub fn insert<T: Component>(&mut self, entity: Entity, value: T) -> Result<(), WorldError> {
        let id = self.register::<T>();
        self.ensure_alive(entity)?;
        let meta = ComponentMeta::of::<T>();
        if meta.is_zero_sized() {
            return self.submit_add(entity, id, None);
        }
        let staged = StagedValue::of(value, meta);
        self.submit_add(entity, id, Some(staged))
    }

    /// Remove a component. Deferred while locked.
    pub fn remove<T: Component>(&mut self, entity: Entity) -> Result<(), WorldError> {
        let id = self.component_id_or_err::<T>()?;
        self.remove_id(entity, id)
    }

    /// Borrow a component value.
    #[must_use]
    pub fn get<T: Component>(&self, entity: Entity) -> Option<&T> {
        let id = self.component_id::<T>()?;
        self.get_typed::<T>(entity, id)
    }

    /// Mutably borrow a component value.
    #[must_use]
    pub fn get_mut<T: Component>(&mut self, entity: Entity) -> Option<&mut T> {
        let id = self.component_id::<T>()?;
        self.get_typed_mut::<T>(entity, id)
    }

    /// Returns `true` if the entity carries the component.
    #[must_use]
    pub fn has<T: Component>(&self, entity: Entity) -> bool {
        self.component_id::<T>()
            .is_some_and(|id| self.has_id(entity, id))
    }

    fn get_typed<T: Component>(&self, entity: Entity, id: Entity) -> Option<&T> {
        if !self.is_alive(entity) {
            return None;
        }
        let record = &self.records[entity.first() as usize];
        let arch = &self.archetypes[record.archetype.index()];
        if !arch.contains(id) {
            return None;
        }
        let column = self.tables[arch.table().index()].column(id)?;
        if column.meta().type_id != TypeId::of::<T>() {
            return None;
        }
        // SAFETY: The column's TypeId was just checked against T.
        unsafe { column.get::<T>(record.table_row as usize) }
    }

    fn get_typed_mut<T: Component>(&mut self, entity: Entity, id: Entity) -> Option<&mut T> {
        if !self.is_alive(entity) {
            return None;
        }
        let record = &self.records[entity.first() as usize];
        let arch = &self.archetypes[record.archetype.index()];
        if !arch.contains(id) {
            return None;
        }
        let row = record.table_row as usize;
        let table = arch.table().index();
        let column = self.tables[table].column_mut(id)?;
        if column.meta().type_id != TypeId::of::<T>() {
            return None;
        }
        // SAFETY: The column's TypeId was just checked against T.
        unsafe { column.get_mut::<T>(row) }
    }

    // ---- id-level operations (tags, arbitrary ids) ----

    /// Add a data-free id (a tag entity or data-free pair). Returns
    /// [`WorldError::ValueRequired`] for ids backed by a data component.
    pub fn add_id(&mut self, entity: Entity, id: Entity) -> Result<(), WorldError> {
        self.ensure_alive(entity)?;
        if self.meta_for(id).is_some() {
            return Err(WorldError::ValueRequired {
                name: self.name_of(id),
            });
        }
        self.submit_add(entity, id, None)
    }

    /// Remove an id. A wildcard pair pattern removes every concrete match.
    pub fn remove_id(&mut self, entity: Entity, id: Entity) -> Result<(), WorldError> {
        self.ensure_alive(entity)?;
        if id.has_wildcard() {
            let record = &self.records[entity.first() as usize];
            let matches: Vec<Entity> = self.archetypes[record.archetype.index()]
                .matching_ids(id)
                .collect();
            if matches.is_empty() {
                return Err(WorldError::MissingComponent {
                    entity,
                    name: self.name_of(id),
                });
            }
            for concrete in matches {
                if !self.is_alive(entity) {
                    break;
                }
                self.submit_remove(entity, concrete)?;
            }
            return Ok(());
        }
        self.submit_remove(entity, id)
    }

    /// Wildcard-aware membership test.
    #[must_use]
    pub fn has_id(&self, entity: Entity, id: Entity) -> bool {
        if !self.is_alive(entity) {
            return false;
        }
        let record = &self.records[entity.first() as usize];
        self.archetypes[record.archetype.index()]
            .matching_ids(id)
            .next()
            .is_some()
    }

    /// Attach another entity as a tag.
    pub fn add_tag(&mut self, entity: Entity, tag: Entity) -> Result<(), WorldError> {
        self.ensure_alive(tag)?;
        self.add_id(entity, tag)
    }

    /// Detach a tag entity.
    pub fn remove_tag(&mut self, entity: Entity, tag: Entity) -> Result<(), WorldError> {
        self.remove_id(entity, tag)
    }

    /// Returns `true` if the entity carries the tag.
    #[must_use]
    pub fn has_tag(&self, entity: Entity, tag: Entity) -> bool {
        self.has_id(entity, tag)
    }

    // ---- relationships ----

    /// Add a data-free relationship pair `(R, target)`.
    pub fn add_pair<R: Component>(
        &mut self,
        entity: Entity,
        target: Entity,
    ) -> Result<(), WorldError> {
        let relation = self.register::<R>();
        self.ensure_alive(target)?;
        self.add_id(entity, Entity::pair(relation, target))
    }

    /// Add a relationship pair carrying a value of the relation type.
    pub fn add_pair_value<R: Component>(
        &mut self,
        entity: Entity,
        target: Entity,
        value: R,
    ) -> Result<(), WorldError> {
        let relation = self.register::<R>();
        self.ensure_alive(entity)?;
        self.ensure_alive(target)?;
        let meta = ComponentMeta::of::<R>();
        let id = Entity::pair(relation, target);
        if meta.is_zero_sized() {
            return self.submit_add(entity, id, None);
        }
        let staged = StagedValue::of(value, meta);
        self.submit_add(entity, id, Some(staged))
    }

    /// Remove the pair `(R, target)`.
    pub fn remove_pair<R: Component>(
        &mut self,
        entity: Entity,
        target: Entity,
    ) -> Result<(), WorldError> {
        let relation = self.component_id_or_err::<R>()?;
        self.remove_id(entity, Entity::pair(relation, target))
    }

    /// Returns `true` if the entity has the pair `(R, target)`.
    #[must_use]
    pub fn has_pair<R: Component>(&self, entity: Entity, target: Entity) -> bool {
        self.component_id::<R>()
            .is_some_and(|relation| self.has_id(entity, Entity::pair(relation, target)))
    }

    /// The first target the entity points at under relation `R`.
    #[must_use]
    pub fn pair_target<R: Component>(&self, entity: Entity) -> Option<Entity> {
        let relation = self.component_id::<R>()?;
        if !self.is_alive(entity) {
            return None;
        }
        let record = &self.records[entity.first() as usize];
        let id = self.archetypes[record.archetype.index()]
            .matching_ids(Entity::any_target(relation))
            .next()?;
        self.allocator.canonical(id.second())
    }

    /// Every concrete pair id on the entity matching a pattern.
    #[must_use]
    pub fn pairs_matching(&self, entity: Entity, pattern: Entity) -> Vec<Entity> {
        if !self.is_alive(entity) {
            return Vec::new();
        }
        let record = &self.records[entity.first() as usize];
        self.archetypes[record.archetype.index()]
            .matching_ids(pattern)
            .filter(|id| id.is_pair())
            .collect()
    }

    /// Borrow the value stored on the pair `(R, target)`.
    #[must_use]
    pub fn get_pair<R: Component>(&self, entity: Entity, target: Entity) -> Option<&R> {
        let relation = self.component_id::<R>()?;
        self.get_typed::<R>(entity, Entity::pair(relation, target))
    }

    /// Mutably borrow the value stored on the pair `(R, target)`.
    #[must_use]
    pub fn get_pair_mut<R: Component>(&mut self, entity: Entity, target: Entity) -> Option<&mut R> {
        let relation = self.component_id::<R>()?;
        self.get_typed_mut::<R>(entity, Entity::pair(relation, target))
    }

    // ---- prefab-style copy ----

    /// Spawn a copy of an entity: every id it carries, data values cloned.
    pub fn instantiate(&mut self, template: Entity) -> Result<Entity, WorldError> {
        self.ensure_alive(template)?;
        let fresh = self.spawn();
        let ids: Vec<Entity> = {
            let record = &self.records[template.first() as usize];
            self.archetypes[record.archetype.index()].ids().to_vec()
        };
        for id in ids {
            // The template's row can be relocated by the copy's own moves
            // when the two share a table, so resolve it fresh every time.
            self.ensure_alive(template)?;
            let staged = match self.meta_for(id) {
                Some(meta) => {
                    let record = &self.records[template.first() as usize];
                    let table = self.archetypes[record.archetype.index()].table();
                    let src = self.tables[table.index()]
                        .column(id)
                        .and_then(|c| c.get_raw(record.table_row as usize))
                        .ok_or(WorldError::UnknownComponent(id))?
                        .as_ptr();
                    // SAFETY: src points at the template's live value for
                    // this column, whose type `meta` describes.
                    Some(unsafe { StagedValue::cloned(src, meta) })
                }
                None => None,
            };
            self.submit_add(fresh, id, staged)?;
        }
        trace!(%template, %fresh, "instantiated entity");
        Ok(fresh)
    }

    // ---- enumeration helpers ----

    /// Every id the entity currently carries, in canonical sorted order.
    pub fn entity_ids(&self, entity: Entity) -> Result<Vec<Entity>, WorldError> {
        self.ensure_alive(entity)?;
        let record = &self.records[entity.first() as usize];
        Ok(self.archetypes[record.archetype.index()].ids().to_vec())
    }

    /// Hide an entity from iteration without touching its data.
    pub fn disable(&mut self, entity: Entity) -> Result<(), WorldError> {
        self.ensure_alive(entity)?;
        self.records[entity.first() as usize]
            .flags
            .insert(EntityFlags::DISABLED);
        Ok(())
    }

    /// Undo [`World::disable`].
    pub fn enable(&mut self, entity: Entity) -> Result<(), WorldError> {
        self.ensure_alive(entity)?;
        self.records[entity.first() as usize]
            .flags
            .remove(EntityFlags::DISABLED);
        Ok(())
    }

    /// Returns `true` if the entity is live and not disabled.
    #[must_use]
    pub fn is_enabled(&self, entity: Entity) -> bool {
        self.is_alive(entity)
            && !self.records[entity.first() as usize]
                .flags
                .contains(EntityFlags::DISABLED)
    }

    // ---- filters and iteration ----

    /// Resolve a mask to a cached filter, building the archetype list on a
    /// cache miss. The list is maintained incrementally as archetypes are
    /// created and retired.
    pub fn filter(&mut self, mask: Mask) -> Result<FilterHandle, WorldError> {
        if mask.is_empty() {
            return Err(WorldError::EmptyMask);
        }
        if let Some(handle) = self.filters.find(&mask) {
            return Ok(handle);
        }
        let matching = self.collect_matching(&mask);
        debug!(archetypes = matching.len(), "built filter");
        Ok(self.filters.insert(mask, matching))
    }

    /// Rebuild a mask's archetype list from scratch, in creation order.
    pub(crate) fn collect_matching(&self, mask: &Mask) -> Vec<ArchetypeId> {
        let mut candidates: Vec<ArchetypeId> = if let Some(&term) = mask.all().first() {
            self.by_component.get(&term).cloned().unwrap_or_default()
        } else {
            let mut union = Vec::new();
            for term in mask.any() {
                if let Some(list) = self.by_component.get(term) {
                    union.extend_from_slice(list);
                }
            }
            union.sort_by_key(|a| a.0);
            union.dedup();
            union
        };
        candidates.retain(|&a| mask.matches(self.archetypes[a.index()].ids()));
        candidates
    }

    /// Iterate the rows matched by a filter. Wildcard pair terms expand to
    /// one step per concrete resolution.
    #[must_use]
    pub fn iter<'w>(&'w self, filter: &FilterHandle) -> RowIter<'w> {
        RowIter::new(self, filter)
    }

    /// The first live entity matched by a filter.
    #[must_use]
    pub fn first_match(&self, filter: &FilterHandle) -> Option<Entity> {
        self.iter(filter).next().map(|row| row.entity())
    }

    /// Number of iteration steps a filter currently yields.
    #[must_use]
    pub fn count(&self, filter: &FilterHandle) -> usize {
        self.iter(filter).count()
    }

    /// Visit every matched entity with mutable world access. The world is
    /// locked for the duration, so structural mutations made by the
    /// closure are deferred and replayed when the visit finishes.
    pub fn each(&mut self, filter: &FilterHandle, mut f: impl FnMut(&mut World, Entity)) {
        let archetypes: Vec<ArchetypeId> = self.filters.get(filter).archetypes().to_vec();
        self.lock();
        for arch_id in archetypes {
            let mut row = 0;
            loop {
                let Some(&entity) = self.archetypes[arch_id.index()].entities().get(row) else {
                    break;
                };
                row += 1;
                if self.records[entity.first() as usize]
                    .flags
                    .contains(EntityFlags::DISABLED)
                {
                    continue;
                }
                f(self, entity);
            }
        }
        self.unlock();
    }

    // ---- reactive dispatch ----

    /// Register a callback fired after an id covered by the mask is added
    /// to an entity the mask matches.
    pub fn on_add(
        &mut self,
        mask: Mask,
        callback: impl FnMut(&mut World, Entity, Entity) + 'static,
    ) -> Result<WatcherId, WorldError> {
        self.register_watcher(WatchKind::Add, mask, callback)
    }

    /// Register a callback fired before an id covered by the mask leaves an
    /// entity the mask matches.
    pub fn on_remove(
        &mut self,
        mask: Mask,
        callback: impl FnMut(&mut World, Entity, Entity) + 'static,
    ) -> Result<WatcherId, WorldError> {
        self.register_watcher(WatchKind::Remove, mask, callback)
    }

    fn register_watcher(
        &mut self,
        kind: WatchKind,
        mask: Mask,
        callback: impl FnMut(&mut World, Entity, Entity) + 'static,
    ) -> Result<WatcherId, WorldError> {
        if mask.is_empty() {
            return Err(WorldError::EmptyMask);
        }
        let id = self.watchers.register(kind, mask, callback);
        for arch in &self.archetypes {
            self.watchers.index_watcher(id, arch.id(), arch.ids());
        }
        debug!(watchers = self.watchers.len(), "registered watcher");
        Ok(id)
    }

    /// Fire the watchers interested in `(kind, id)` on `archetype`. The
    /// world is locked around the callbacks, so mutations they make are
    /// deferred and replayed before dispatch returns.
    fn dispatch(
        &mut self,
        kind: WatchKind,
        archetype: ArchetypeId,
        entity: Entity,
        id: Entity,
        single_term_only: bool,
    ) {
        let callbacks = self.watchers.matching(archetype, kind, id, single_term_only);
        if callbacks.is_empty() {
            return;
        }
        self.lock();
        for callback in callbacks {
            match callback.try_borrow_mut() {
                Ok(mut f) => (&mut **f)(self, entity, id),
                Err(_) => warn!(%entity, %id, "skipping re-entrant watcher callback"),
            }
        }
        self.unlock();
    }

    // ---- lock and replay ----

    /// Acquire the structural lock. Re-entrant; each call needs a paired
    /// [`World::unlock`].
    pub fn lock(&mut self) {
        self.lock_count += 1;
    }

    /// Release the structural lock. When the count returns to zero the
    /// deferred-operation log is replayed in submission order.
    pub fn unlock(&mut self) {
        debug_assert!(self.lock_count > 0, "unbalanced unlock");
        self.lock_count = self.lock_count.saturating_sub(1);
        if self.lock_count == 0 {
            self.replay();
        }
    }

    /// Returns `true` while structural mutations are being deferred.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.lock_count > 0
    }

    fn replay(&mut self) {
        while !self.deferred.is_empty() {
            let ops = std::mem::take(&mut self.deferred);
            trace!(count = ops.len(), "replaying deferred operations");
            for op in ops {
                // Entities that died after the op was logged are skipped;
                // a staged value dropped here drops its instance.
                if !self.is_alive(op.entity()) {
                    continue;
                }
                let result = match op {
                    DeferredOp::Add { entity, id, value } => self.apply_add(entity, id, value),
                    DeferredOp::Remove { entity, id } => self.apply_remove(entity, id),
                    DeferredOp::Despawn { entity } => {
                        self.apply_despawn(entity);
                        Ok(())
                    }
                };
                if let Err(err) = result {
                    warn!(%err, "deferred operation skipped");
                }
            }
        }
    }

    // ---- internals ----

    fn ensure_alive(&self, entity: Entity) -> Result<(), WorldError> {
        if self.is_alive(entity) {
            Ok(())
        } else {
            Err(WorldError::DeadEntity(entity))
        }
    }

    /// The slot owning an id's data component, if the id is data-bearing.
    /// For pairs the relation side wins; a data-free relation falls back to
    /// the target side.
    fn data_slot_for(&self, id: Entity) -> Option<u32> {
        if id.is_pair() {
            if id.has_wildcard() {
                return None;
            }
            for slot in [id.first(), id.second()] {
                if let Some(info) = self.infos.get(&slot) {
                    if !info.meta.is_zero_sized() {
                        return Some(slot);
                    }
                }
            }
            None
        } else {
            let info = self.infos.get(&id.first())?;
            (!info.meta.is_zero_sized()).then_some(id.first())
        }
    }

    fn meta_for(&self, id: Entity) -> Option<ComponentMeta> {
        self.data_slot_for(id).map(|slot| self.infos[&slot].meta.clone())
    }

    /// Validate that an id may be attached to entities right now.
    fn ensure_id_valid(&self, id: Entity) -> Result<(), WorldError> {
        if id.is_pair() {
            if id.has_wildcard()
                || self.allocator.canonical(id.first()).is_none()
                || self.allocator.canonical(id.second()).is_none()
            {
                return Err(WorldError::UnknownComponent(id));
            }
            Ok(())
        } else if self.is_alive(id) {
            Ok(())
        } else {
            Err(WorldError::UnknownComponent(id))
        }
    }

    fn submit_add(
        &mut self,
        entity: Entity,
        id: Entity,
        value: Option<StagedValue>,
    ) -> Result<(), WorldError> {
        if self.lock_count > 0 {
            self.deferred.push(DeferredOp::Add { entity, id, value });
            return Ok(());
        }
        self.apply_add(entity, id, value)
    }

    fn submit_remove(&mut self, entity: Entity, id: Entity) -> Result<(), WorldError> {
        if self.lock_count > 0 {
            self.deferred.push(DeferredOp::Remove { entity, id });
            return Ok(());
        }
        self.apply_remove(entity, id)
    }

    fn apply_add(
        &mut self,
        entity: Entity,
        id: Entity,
        value: Option<StagedValue>,
    ) -> Result<(), WorldError> {
        self.ensure_alive(entity)?;
        self.ensure_id_valid(id)?;
        // An exclusive relation swaps targets: the old pair's removal (and
        // its dispatch) runs before the add.
        if id.is_pair() {
            let exclusive = self
                .infos
                .get(&id.first())
                .is_some_and(|info| info.exclusive);
            if exclusive {
                let record = &self.records[entity.first() as usize];
                let pattern = Entity::from_parts(id.first(), Entity::ANY_SECOND, true);
                let existing: Vec<Entity> = self.archetypes[record.archetype.index()]
                    .matching_ids(pattern)
                    .filter(|old| *old != id)
                    .collect();
                for old in existing {
                    self.apply_remove(entity, old)?;
                }
                self.ensure_alive(entity)?;
            }
        }
        let slot = entity.first() as usize;
        let src = self.records[slot].archetype;
        if self.archetypes[src.index()].contains(id) {
            return Err(WorldError::DuplicateComponent {
                entity,
                name: self.name_of(id),
            });
        }
        if value.is_none() && self.meta_for(id).is_some() {
            return Err(WorldError::ValueRequired {
                name: self.name_of(id),
            });
        }
        let dst = match self.archetypes[src.index()].edge(id).add {
            Some(dst) => dst,
            None => {
                let ids = set_with(self.archetypes[src.index()].ids(), id)
                    .unwrap_or_default();
                let dst = self.archetype_for(ids);
                self.archetypes[src.index()].set_edge_add(id, dst);
                self.archetypes[dst.index()].set_edge_remove(id, src);
                dst
            }
        };
        self.move_entity(entity, dst);
        if let Some(mut staged) = value {
            let table = self.archetypes[dst.index()].table();
            let column = self.tables[table.index()]
                .column_mut(id)
                .ok_or(WorldError::UnknownComponent(id))?;
            column.push_raw(staged.bytes());
            staged.mark_consumed();
        }
        self.update_flags_on_add(entity, id);
        self.run_hook(entity, id, WatchKind::Add);
        self.dispatch(WatchKind::Add, dst, entity, id, false);
        Ok(())
    }

    fn apply_remove(&mut self, entity: Entity, id: Entity) -> Result<(), WorldError> {
        self.ensure_alive(entity)?;
        let slot = entity.first() as usize;
        let src = self.records[slot].archetype;
        if !self.archetypes[src.index()].contains(id) {
            return Err(WorldError::MissingComponent {
                entity,
                name: self.name_of(id),
            });
        }
        // Auto-reset runs against the still-valid storage, then removal
        // watchers fire; both see the value in place.
        self.run_hook(entity, id, WatchKind::Remove);
        self.dispatch(WatchKind::Remove, src, entity, id, false);
        // Watcher callbacks may have removed the id or killed the entity.
        if !self.is_alive(entity) {
            return Ok(());
        }
        let src = self.records[slot].archetype;
        if !self.archetypes[src.index()].contains(id) {
            return Ok(());
        }
        let Some(new_ids) = set_without(self.archetypes[src.index()].ids(), id) else {
            return Ok(());
        };
        if new_ids.is_empty() {
            trace!(%entity, "last component removed, despawning");
            self.apply_despawn(entity);
            return Ok(());
        }
        let dst = match self.archetypes[src.index()].edge(id).remove {
            Some(dst) => dst,
            None => {
                let dst = self.archetype_for(new_ids);
                self.archetypes[src.index()].set_edge_remove(id, dst);
                self.archetypes[dst.index()].set_edge_add(id, src);
                dst
            }
        };
        self.move_entity(entity, dst);
        if id.is_pair() {
            let still_related = self.archetypes[dst.index()]
                .ids()
                .iter()
                .any(|i| i.is_pair());
            if !still_related {
                self.records[slot]
                    .flags
                    .remove(EntityFlags::HAS_RELATIONSHIPS);
            }
        }
        Ok(())
    }

    fn apply_despawn(&mut self, entity: Entity) {
        let slot = entity.first() as usize;
        debug!(%entity, "despawning entity");
        // Anything referencing this entity as a tag, relation or target
        // loses those ids first.
        let flags = self.records[slot].flags;
        if flags.intersects(
            EntityFlags::TAG | EntityFlags::RELATION_SOURCE | EntityFlags::RELATION_TARGET,
        ) {
            self.remove_references_to(entity);
            if !self.is_alive(entity) {
                return;
            }
        }
        // Per-component teardown with narrowed removal dispatch.
        let ids: Vec<Entity> =
            self.archetypes[self.records[slot].archetype.index()].ids().to_vec();
        for &id in &ids {
            if !self.is_alive(entity) {
                return;
            }
            let arch = self.records[slot].archetype;
            if !self.archetypes[arch.index()].contains(id) {
                continue;
            }
            self.run_hook(entity, id, WatchKind::Remove);
            self.dispatch(WatchKind::Remove, arch, entity, id, true);
        }
        if !self.is_alive(entity) {
            return;
        }
        // Pull the rows; the table swap-remove drops the values.
        let record = self.records[slot].clone();
        let arch = record.archetype;
        if let Some(moved) = self.archetypes[arch.index()].swap_remove(record.arch_row as usize) {
            self.records[moved.first() as usize].arch_row = record.arch_row;
        }
        let table = self.archetypes[arch.index()].table();
        if let Some(moved) = self.tables[table.index()].swap_remove(record.table_row as usize) {
            self.records[moved.first() as usize].table_row = record.table_row;
        }
        // A canonical component entity takes its registration with it.
        if let Some(info) = self.infos.remove(&entity.first()) {
            debug!(component = info.meta.name, "releasing component registration");
            self.type_index.remove(&info.meta.type_id);
        }
        self.records[slot].reset();
        self.allocator.free(entity);
    }

    /// Strip every id that references a dying entity from every holder,
    /// then retire the archetypes that mentioned it.
    ///
    /// Removing one reference can route a holder through a fresh
    /// intermediate archetype that still carries another reference (a
    /// holder with both the tag and a pair over it), so the scan repeats
    /// until no live archetype's id set mentions the entity.
    fn remove_references_to(&mut self, entity: Entity) {
        let patterns = [
            entity,
            Entity::any_target(entity),
            Entity::any_relation(entity),
        ];
        let mut retired: Vec<ArchetypeId> = Vec::new();
        loop {
            let mut removals: Vec<(Entity, Entity)> = Vec::new();
            let mut newly_retired: Vec<ArchetypeId> = Vec::new();
            for arch in &self.archetypes {
                if retired.contains(&arch.id()) {
                    continue;
                }
                let mut matched: Vec<Entity> = patterns
                    .iter()
                    .flat_map(|&p| arch.matching_ids(p))
                    .collect();
                if matched.is_empty() {
                    continue;
                }
                matched.sort_unstable();
                matched.dedup();
                newly_retired.push(arch.id());
                for &holder in arch.entities() {
                    if holder == entity {
                        continue;
                    }
                    for &id in &matched {
                        removals.push((holder, id));
                    }
                }
            }
            if newly_retired.is_empty() {
                return;
            }
            debug!(%entity, holders = removals.len(), archetypes = newly_retired.len(),
                "cascading id removal");
            for (holder, id) in removals {
                if !self.is_alive(holder) {
                    continue;
                }
                if let Err(err) = self.apply_remove(holder, id) {
                    warn!(%holder, %err, "cascade removal skipped");
                }
            }
            for &arch_id in &newly_retired {
                self.retire_archetype(arch_id);
            }
            retired.extend(newly_retired);
        }
    }

    /// Unlink an archetype whose id set mentions a dead entity. The arena
    /// slot stays; only the indexes forget it.
    fn retire_archetype(&mut self, arch_id: ArchetypeId) {
        let ids: Vec<Entity> = self.archetypes[arch_id.index()].ids().to_vec();
        debug!(archetype = arch_id.0, "retiring archetype");
        self.archetype_index.remove(ids.as_slice());
        for key in Self::index_keys(&ids) {
            if let Some(list) = self.by_component.get_mut(&key) {
                list.retain(|&a| a != arch_id);
            }
        }
        self.filters.on_archetype_retired(arch_id);
        self.watchers.retire_archetype(arch_id);
        for arch in &mut self.archetypes {
            arch.purge_edges_to(arch_id);
        }
    }

    /// The component-index keys for an id set: each member plus, for every
    /// concrete pair, the two wildcard forms.
    fn index_keys(ids: &[Entity]) -> Vec<Entity> {
        let mut keys = Vec::with_capacity(ids.len());
        for &id in ids {
            keys.push(id);
            if id.is_pair() && !id.has_wildcard() {
                keys.push(Entity::from_parts(id.first(), Entity::ANY_SECOND, true));
                keys.push(Entity::from_parts(Entity::ANY_FIRST, id.second(), true));
            }
        }
        keys.sort_unstable();
        keys.dedup();
        keys
    }

    /// Find or create the archetype for a full sorted id set.
    fn archetype_for(&mut self, ids: Vec<Entity>) -> ArchetypeId {
        if let Some(&existing) = self.archetype_index.get(ids.as_slice()) {
            return existing;
        }
        let data_ids: Vec<Entity> = ids
            .iter()
            .copied()
            .filter(|&id| self.meta_for(id).is_some())
            .collect();
        let table = self.table_for(data_ids);
        let arch_id = ArchetypeId(self.archetypes.len() as u32);
        debug!(archetype = arch_id.0, ids = ids.len(), "created archetype");
        self.archetype_index
            .insert(ids.clone().into_boxed_slice(), arch_id);
        for key in Self::index_keys(&ids) {
            self.by_component.entry(key).or_default().push(arch_id);
        }
        self.filters.on_archetype_created(arch_id, &ids);
        self.watchers.index_archetype(arch_id, &ids);
        self.archetypes.push(Archetype::new(arch_id, ids, table));
        arch_id
    }

    /// Find or create the table for a data-bearing id subset. Archetypes
    /// with the same data columns share one table.
    fn table_for(&mut self, data_ids: Vec<Entity>) -> TableId {
        if let Some(&existing) = self.table_index.get(data_ids.as_slice()) {
            return existing;
        }
        let metas: Vec<ComponentMeta> = data_ids
            .iter()
            .map(|&id| {
                self.meta_for(id)
                    .unwrap_or_else(|| unreachable!("data id without meta"))
            })
            .collect();
        let table_id = TableId(self.tables.len() as u32);
        trace!(table = table_id.0, columns = data_ids.len(), "created table");
        self.table_index
            .insert(data_ids.clone().into_boxed_slice(), table_id);
        self.tables.push(Table::new(data_ids, metas));
        table_id
    }

    /// Move an entity's rows from its current archetype to `dst`, patching
    /// the records of any rows swapped into the vacated positions. Shared
    /// column values travel; a column only the destination has is left for
    /// the caller to fill.
    fn move_entity(&mut self, entity: Entity, dst_id: ArchetypeId) {
        let slot = entity.first() as usize;
        let (src_id, arch_row, table_row) = {
            let r = &self.records[slot];
            (r.archetype, r.arch_row as usize, r.table_row as usize)
        };
        debug_assert_ne!(src_id, dst_id);
        if let Some(moved) = self.archetypes[src_id.index()].swap_remove(arch_row) {
            self.records[moved.first() as usize].arch_row = arch_row as u32;
        }
        let new_arch_row = self.archetypes[dst_id.index()].push(entity) as u32;
        let src_table = self.archetypes[src_id.index()].table();
        let dst_table = self.archetypes[dst_id.index()].table();
        let new_table_row = if src_table == dst_table {
            table_row as u32
        } else {
            let (src, dst) = self.tables_split(src_table, dst_table);
            let (dst_row, moved) = src.move_row(table_row, dst);
            if let Some(moved) = moved {
                self.records[moved.first() as usize].table_row = table_row as u32;
            }
            dst_row as u32
        };
        let record = &mut self.records[slot];
        record.archetype = dst_id;
        record.arch_row = new_arch_row;
        record.table_row = new_table_row;
    }

    /// Mutably borrow two distinct tables at once.
    fn tables_split(&mut self, a: TableId, b: TableId) -> (&mut Table, &mut Table) {
        debug_assert_ne!(a, b);
        let (ai, bi) = (a.index(), b.index());
        if ai < bi {
            let (left, right) = self.tables.split_at_mut(bi);
            (&mut left[ai], &mut right[0])
        } else {
            let (left, right) = self.tables.split_at_mut(ai);
            (&mut right[0], &mut left[bi])
        }
    }

    fn update_flags_on_add(&mut self, entity: Entity, id: Entity) {
        if id.is_pair() {
            self.records[entity.first() as usize]
                .flags
                .insert(EntityFlags::HAS_RELATIONSHIPS);
            let relation_slot = id.first() as usize;
            if self.records.get(relation_slot).is_some_and(EntityRecord::is_alive) {
                self.records[relation_slot]
                    .flags
                    .insert(EntityFlags::RELATION_SOURCE);
            }
            let target_slot = id.second() as usize;
            if self.records.get(target_slot).is_some_and(EntityRecord::is_alive) {
                self.records[target_slot]
                    .flags
                    .insert(EntityFlags::RELATION_TARGET);
            }
        } else {
            // The id entity learns it is in use as a component, so its own
            // despawn cascades removal from every holder.
            self.records[id.first() as usize]
                .flags
                .insert(EntityFlags::TAG);
        }
    }

    /// Run the auto-reset hook for a data-bearing id against the entity's
    /// current storage.
    fn run_hook(&mut self, entity: Entity, id: Entity, kind: WatchKind) {
        let Some(info_slot) = self.data_slot_for(id) else {
            return;
        };
        if self
            .infos
            .get(&info_slot)
            .is_none_or(|info| info.hooks.is_empty())
        {
            return;
        }
        let record = &self.records[entity.first() as usize];
        let table = self.archetypes[record.archetype.index()].table();
        let row = record.table_row as usize;
        let ptr = {
            let Some(column) = self.tables[table.index()].column_mut(id) else {
                return;
            };
            match column.get_raw_mut(row) {
                Some(bytes) => bytes.as_mut_ptr(),
                None => return,
            }
        };
        let info = &self.infos[&info_slot];
        // SAFETY: ptr points at a live instance of the type the hooks were
        // registered for.
        unsafe {
            match kind {
                WatchKind::Add => info.hooks.run_add(ptr),
                WatchKind::Remove => info.hooks.run_remove(ptr),
            }
        }
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Position {
        x: f32,
        y: f32,
    }

    impl Component for Position {}

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Velocity {
        x: f32,
        y: f32,
    }

    impl Component for Velocity {}

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct Frozen;

    impl Component for Frozen {}

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct ChildOf;

    impl Component for ChildOf {}

    #[test]
    fn test_spawn_despawn_liveness() {
        let mut world = World::new();
        let e = world.spawn();
        assert!(world.is_alive(e));
        world.despawn(e).unwrap();
        assert!(!world.is_alive(e));
        assert_eq!(world.despawn(e), Err(WorldError::DeadEntity(e)));
    }

    #[test]
    fn test_generation_protects_recycled_slot() {
        let mut world = World::new();
        let stale = world.spawn();
        world.despawn(stale).unwrap();
        let fresh = world.spawn();
        assert_eq!(stale.first(), fresh.first());
        assert_ne!(stale, fresh);
        assert!(!world.is_alive(stale));
        assert!(world.insert(stale, Position { x: 0.0, y: 0.0 }).is_err());
        assert!(world.is_alive(fresh));
    }

    #[test]
    fn test_insert_get_remove_roundtrip() {
        let mut world = World::new();
        let e = world.spawn();
        world.insert(e, Position { x: 1.0, y: 2.0 }).unwrap();
        world.insert(e, Velocity { x: 0.5, y: 0.0 }).unwrap();
        assert_eq!(world.get::<Position>(e), Some(&Position { x: 1.0, y: 2.0 }));
        world.get_mut::<Velocity>(e).unwrap().y = 3.0;
        assert_eq!(world.get::<Velocity>(e).unwrap().y, 3.0);
        world.remove::<Position>(e).unwrap();
        assert!(world.get::<Position>(e).is_none());
        assert!(world.has::<Velocity>(e));
    }

    #[test]
    fn test_duplicate_add_rejected() {
        let mut world = World::new();
        let e = world.spawn();
        world.insert(e, Frozen).unwrap();
        let err = world.insert(e, Frozen).unwrap_err();
        assert!(matches!(err, WorldError::DuplicateComponent { .. }));
    }

    #[test]
    fn test_removing_last_component_despawns() {
        let mut world = World::new();
        let e = world.spawn();
        world.insert(e, Frozen).unwrap();
        world.remove::<Frozen>(e).unwrap();
        assert!(!world.is_alive(e));
    }

    #[test]
    fn test_remove_missing_component_errors() {
        let mut world = World::new();
        world.register::<Position>();
        let e = world.spawn();
        world.insert(e, Frozen).unwrap();
        let err = world.remove::<Position>(e).unwrap_err();
        assert!(matches!(err, WorldError::MissingComponent { .. }));
    }

    #[test]
    fn test_tag_entity_and_cascade_on_despawn() {
        let mut world = World::new();
        let tag = world.spawn();
        let a = world.spawn();
        let b = world.spawn();
        world.insert(a, Position { x: 0.0, y: 0.0 }).unwrap();
        world.insert(b, Position { x: 1.0, y: 1.0 }).unwrap();
        world.add_tag(a, tag).unwrap();
        world.add_tag(b, tag).unwrap();
        assert!(world.has_tag(a, tag));
        world.despawn(tag).unwrap();
        assert!(!world.has_tag(a, tag));
        assert!(!world.has_tag(b, tag));
        // Holders keep their other components.
        assert!(world.has::<Position>(a));
        assert!(world.has::<Position>(b));
    }

    #[test]
    fn test_relationship_pair_and_target_lookup() {
        let mut world = World::new();
        let parent = world.spawn();
        world.insert(parent, Position { x: 0.0, y: 0.0 }).unwrap();
        let child = world.spawn();
        world.insert(child, Position { x: 1.0, y: 0.0 }).unwrap();
        world.add_pair::<ChildOf>(child, parent).unwrap();
        assert!(world.has_pair::<ChildOf>(child, parent));
        assert_eq!(world.pair_target::<ChildOf>(child), Some(parent));
        // Despawning the target strips the pair from the child.
        world.despawn(parent).unwrap();
        assert!(world.is_alive(child));
        assert!(!world.has_pair::<ChildOf>(child, parent));
        assert_eq!(world.pair_target::<ChildOf>(child), None);
    }

    #[test]
    fn test_exclusive_relation_swaps_target() {
        let mut world = World::new();
        world.set_exclusive::<ChildOf>(true);
        let red = world.spawn();
        world.insert(red, Frozen).unwrap();
        let blue = world.spawn();
        world.insert(blue, Frozen).unwrap();
        let e = world.spawn();
        world.insert(e, Position { x: 0.0, y: 0.0 }).unwrap();
        world.add_pair::<ChildOf>(e, red).unwrap();
        world.add_pair::<ChildOf>(e, blue).unwrap();
        assert!(!world.has_pair::<ChildOf>(e, red));
        assert!(world.has_pair::<ChildOf>(e, blue));
        assert_eq!(
            world.pairs_matching(e, Entity::any_target(world.component_id::<ChildOf>().unwrap()))
                .len(),
            1
        );
    }

    #[test]
    fn test_pair_value_storage() {
        let mut world = World::new();
        let target = world.spawn();
        world.insert(target, Frozen).unwrap();
        let e = world.spawn();
        world
            .add_pair_value(e, target, Position { x: 9.0, y: 9.0 })
            .unwrap();
        assert_eq!(
            world.get_pair::<Position>(e, target),
            Some(&Position { x: 9.0, y: 9.0 })
        );
        world.get_pair_mut::<Position>(e, target).unwrap().x = 10.0;
        assert_eq!(world.get_pair::<Position>(e, target).unwrap().x, 10.0);
    }

    #[test]
    fn test_valueless_add_of_data_component_rejected() {
        let mut world = World::new();
        let id = world.register::<Position>();
        let e = world.spawn();
        let err = world.add_id(e, id).unwrap_err();
        assert!(matches!(err, WorldError::ValueRequired { .. }));
    }

    #[test]
    fn test_deferred_ops_replay_after_unlock() {
        let mut world = World::new();
        let e = world.spawn();
        world.lock();
        world.insert(e, Position { x: 4.0, y: 4.0 }).unwrap();
        assert!(world.get::<Position>(e).is_none());
        world.unlock();
        assert_eq!(world.get::<Position>(e), Some(&Position { x: 4.0, y: 4.0 }));
    }

    #[test]
    fn test_deferred_op_on_dead_entity_is_skipped() {
        let mut world = World::new();
        let e = world.spawn();
        world.insert(e, Frozen).unwrap();
        world.lock();
        world.despawn(e).unwrap();
        // Logged after the despawn; replay must skip it and drop the
        // staged value instead of resurrecting the slot.
        world.insert(e, Position { x: 0.0, y: 0.0 }).unwrap();
        world.unlock();
        assert!(!world.is_alive(e));
        assert_eq!(world.get::<Position>(e), None);
    }

    #[test]
    fn test_each_allows_mutation_during_iteration() {
        let mut world = World::new();
        for i in 0..5 {
            let e = world.spawn();
            world.insert(e, Position { x: i as f32, y: 0.0 }).unwrap();
        }
        let pos = world.component_id::<Position>().unwrap();
        let filter = world.filter(Mask::new().with(pos)).unwrap();
        let mut visited = 0;
        world.each(&filter, |w, e| {
            visited += 1;
            w.despawn(e).unwrap();
        });
        assert_eq!(visited, 5);
        assert_eq!(world.count(&filter), 0);
    }

    #[test]
    fn test_filter_sees_archetypes_created_later() {
        let mut world = World::new();
        let pos = world.register::<Position>();
        let filter = world.filter(Mask::new().with(pos)).unwrap();
        assert_eq!(world.count(&filter), 0);
        let e = world.spawn();
        world.insert(e, Position { x: 0.0, y: 0.0 }).unwrap();
        world.insert(e, Velocity { x: 0.0, y: 0.0 }).unwrap();
        assert_eq!(world.count(&filter), 1);
    }

    #[test]
    fn test_filter_incremental_list_matches_rebuild() {
        let mut world = World::new();
        let pos = world.register::<Position>();
        let frozen = world.register::<Frozen>();
        let filter = world.filter(Mask::new().with(pos).without(frozen)).unwrap();
        for i in 0..4 {
            let e = world.spawn();
            world.insert(e, Position { x: i as f32, y: 0.0 }).unwrap();
            if i % 2 == 0 {
                world.insert(e, Frozen).unwrap();
            } else {
                world.insert(e, Velocity { x: 0.0, y: 0.0 }).unwrap();
            }
        }
        let entry_mask = world.filters.get(&filter).mask().clone();
        let rebuilt = world.collect_matching(&entry_mask);
        assert_eq!(world.filters.get(&filter).archetypes(), &rebuilt[..]);
    }

    #[test]
    fn test_on_add_watcher_fires() {
        let mut world = World::new();
        let pos = world.register::<Position>();
        let seen = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
        let sink = std::rc::Rc::clone(&seen);
        world
            .on_add(Mask::new().with(pos), move |_, entity, _| {
                sink.borrow_mut().push(entity);
            })
            .unwrap();
        let e = world.spawn();
        world.insert(e, Position { x: 0.0, y: 0.0 }).unwrap();
        assert_eq!(&*seen.borrow(), &[e]);
    }

    #[test]
    fn test_on_remove_watcher_sees_value() {
        let mut world = World::new();
        let pos = world.register::<Position>();
        let seen = std::rc::Rc::new(std::cell::Cell::new(0.0f32));
        let sink = std::rc::Rc::clone(&seen);
        world
            .on_remove(Mask::new().with(pos), move |w, entity, _| {
                sink.set(w.get::<Position>(entity).map_or(-1.0, |p| p.x));
            })
            .unwrap();
        let e = world.spawn();
        world.insert(e, Position { x: 7.0, y: 0.0 }).unwrap();
        world.insert(e, Frozen).unwrap();
        world.remove::<Position>(e).unwrap();
        assert_eq!(seen.get(), 7.0);
    }

    #[test]
    fn test_instantiate_clones_values_and_pairs() {
        let mut world = World::new();
        let parent = world.spawn();
        world.insert(parent, Frozen).unwrap();
        let template = world.spawn();
        world.insert(template, Position { x: 3.0, y: 4.0 }).unwrap();
        world.add_pair::<ChildOf>(template, parent).unwrap();
        let copy = world.instantiate(template).unwrap();
        assert_ne!(copy, template);
        assert_eq!(world.get::<Position>(copy), Some(&Position { x: 3.0, y: 4.0 }));
        assert!(world.has_pair::<ChildOf>(copy, parent));
        // Copies are independent.
        world.get_mut::<Position>(copy).unwrap().x = 0.0;
        assert_eq!(world.get::<Position>(template).unwrap().x, 3.0);
    }

    #[test]
    fn test_entity_ids_enumerates_sorted_set() {
        let mut world = World::new();
        let e = world.spawn();
        world.insert(e, Position { x: 0.0, y: 0.0 }).unwrap();
        world.insert(e, Frozen).unwrap();
        let ids = world.entity_ids(e).unwrap();
        assert_eq!(ids.len(), 2);
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_disable_hides_from_iteration() {
        let mut world = World::new();
        let a = world.spawn();
        world.insert(a, Position { x: 0.0, y: 0.0 }).unwrap();
        let b = world.spawn();
        world.insert(b, Position { x: 1.0, y: 0.0 }).unwrap();
        let pos = world.component_id::<Position>().unwrap();
        let filter = world.filter(Mask::new().with(pos)).unwrap();
        world.disable(a).unwrap();
        assert_eq!(world.count(&filter), 1);
        assert_eq!(world.first_match(&filter), Some(b));
        world.enable(a).unwrap();
        assert_eq!(world.count(&filter), 2);
    }

    #[test]
    fn test_clear_entities_keeps_registrations() {
        let mut world = World::new();
        let pos = world.register::<Position>();
        let e = world.spawn();
        world.insert(e, Position { x: 0.0, y: 0.0 }).unwrap();
        world.clear_entities();
        assert!(!world.is_alive(e));
        assert_eq!(world.component_id::<Position>(), Some(pos));
    }

    #[test]
    fn test_hooks_reset_value_on_add() {
        let mut world = World::new();
        world.set_hooks::<Position>(ComponentHooks::new().on_add::<Position>(|p| {
            p.x = 0.0;
        }));
        let e = world.spawn();
        world.insert(e, Position { x: 99.0, y: 5.0 }).unwrap();
        assert_eq!(world.get::<Position>(e), Some(&Position { x: 0.0, y: 5.0 }));
    }

    #[test]
    fn test_sum_while_despawning_scenario() {
        let mut world = World::new();
        let a = world.spawn();
        world.insert(a, Position { x: 1.0, y: 2.0 }).unwrap();
        let b = world.spawn();
        world.insert(b, Position { x: 3.0, y: 4.0 }).unwrap();
        let pos = world.component_id::<Position>().unwrap();
        let filter = world.filter(Mask::new().with(pos)).unwrap();
        let mut total = 0.0;
        world.each(&filter, |w, e| {
            let p = w.get::<Position>(e).unwrap();
            total += p.x + p.y;
            w.despawn(e).unwrap();
        });
        assert_eq!(total, 10.0);
        assert!(!world.is_alive(a));
        assert!(!world.is_alive(b));
    }

    #[test]
    fn test_add_remove_inverse_restores_archetype() {
        let mut world = World::new();
        let e = world.spawn();
        world.insert(e, Position { x: 0.0, y: 0.0 }).unwrap();
        world.insert(e, Velocity { x: 0.0, y: 0.0 }).unwrap();
        let before = world.records[e.first() as usize].archetype;
        world.insert(e, Frozen).unwrap();
        assert_ne!(world.records[e.first() as usize].archetype, before);
        world.remove::<Frozen>(e).unwrap();
        assert!(world.is_alive(e));
        assert_eq!(world.records[e.first() as usize].archetype, before);
    }

    #[test]
    fn test_swap_remove_keeps_survivors_consistent() {
        let mut world = World::new();
        let entities: Vec<Entity> = (0..4)
            .map(|i| {
                let e = world.spawn();
                world.insert(e, Position { x: i as f32, y: 0.0 }).unwrap();
                e
            })
            .collect();
        world.despawn(entities[1]).unwrap();
        for (i, &e) in entities.iter().enumerate() {
            if i == 1 {
                assert!(!world.is_alive(e));
            } else {
                assert_eq!(world.get::<Position>(e).unwrap().x, i as f32);
                let record = &world.records[e.first() as usize];
                let table = world.archetypes[record.archetype.index()].table();
                assert_eq!(
                    world.tables[table.index()].entities()[record.table_row as usize],
                    e
                );
            }
        }
    }

    #[test]
    fn test_tag_despawn_leaves_no_referencing_archetype() {
        let mut world = World::new();
        let tag = world.spawn();
        let a = world.spawn();
        world.insert(a, Position { x: 0.0, y: 0.0 }).unwrap();
        world.add_tag(a, tag).unwrap();
        let filter = world.filter(Mask::new().with(tag)).unwrap();
        assert_eq!(world.count(&filter), 1);
        world.despawn(tag).unwrap();
        assert!(!world.has_tag(a, tag));
        assert_eq!(world.count(&filter), 0);
        assert!(
            world
                .by_component
                .get(&tag)
                .is_none_or(|list| list.is_empty())
        );
        assert!(
            world
                .archetype_index
                .keys()
                .all(|ids| !ids.contains(&tag))
        );
    }

    #[test]
    fn test_cascade_retires_archetypes_created_mid_cascade() {
        let mut world = World::new();
        let holder = world.spawn();
        let target = world.spawn();
        world.insert(holder, Position { x: 0.0, y: 0.0 }).unwrap();
        // Two references to the same entity: removing one routes the
        // holder through a fresh archetype still carrying the other.
        world.add_tag(holder, target).unwrap();
        world.add_pair::<ChildOf>(holder, target).unwrap();
        world.despawn(target).unwrap();

        assert!(world.is_alive(holder));
        assert!(world.has::<Position>(holder));
        assert!(!world.has_tag(holder, target));
        assert!(!world.has_pair::<ChildOf>(holder, target));

        let slot = target.first();
        let mentions =
            |id: &Entity| id.first() == slot || (id.is_pair() && id.second() == slot);
        assert!(
            world
                .archetype_index
                .keys()
                .all(|ids| !ids.iter().any(mentions)),
            "archetype set still references freed slot {slot}"
        );
        for (id, list) in &world.by_component {
            if mentions(id) {
                assert!(list.is_empty(), "stale archetypes indexed under {id}");
            }
        }
    }

    #[test]
    fn test_tag_archetypes_share_empty_table() {
        let mut world = World::new();
        let t1 = world.spawn();
        let t2 = world.spawn();
        let a = world.spawn();
        world.add_tag(a, t1).unwrap();
        let b = world.spawn();
        world.add_tag(b, t2).unwrap();
        // Two tag-only archetypes, one shared (column-free) table.
        let ra = &world.records[a.first() as usize];
        let rb = &world.records[b.first() as usize];
        assert_ne!(ra.archetype, rb.archetype);
        assert_eq!(
            world.archetypes[ra.archetype.index()].table(),
            world.archetypes[rb.archetype.index()].table()
        );
    }
}
