//! Columnar storage for one distinct data-bearing component set.
//!
//! A [`Table`] owns one growable [`Column`] per data-bearing component in
//! its set, plus a parallel entity array. Tag components and data-free
//! relationship pairs are excluded; they exist only as archetype
//! membership. Row removal is swap-remove: the last row is copied down and
//! the caller patches the moved entity's record.

use std::alloc::{self, Layout};
use std::ptr::NonNull;

use tessera_component::{ComponentMeta, Entity};

/// A column in a table, storing components of a single type.
///
/// Components are stored as raw bytes for type-erased access. Each element
/// is `meta.size()` bytes, laid out contiguously in a buffer allocated
/// with the component's own layout, so over-aligned types stay aligned.
/// Typed access checks the stored [`std::any::TypeId`] in debug builds.
pub struct Column {
    meta: ComponentMeta,
    data: NonNull<u8>,
    len: usize,
    capacity: usize,
}

/// Byte layout for `rows` instances. Panics on capacity overflow, like
/// `Vec` growth does.
fn array_layout(meta: &ComponentMeta, rows: usize) -> Layout {
    let bytes = meta.size().checked_mul(rows).expect("column size overflow");
    Layout::from_size_align(bytes, meta.align()).expect("column size overflow")
}

// SAFETY: The column exclusively owns its buffer, and `Component` bounds
// the stored types by `Send + Sync`.
unsafe impl Send for Column {}
unsafe impl Sync for Column {}

impl Column {
    /// Create a new empty column. The component must carry data.
    #[must_use]
    pub fn new(meta: ComponentMeta) -> Self {
        debug_assert!(!meta.is_zero_sized(), "tags get no column storage");
        Self {
            meta,
            data: NonNull::dangling(),
            len: 0,
            capacity: 0,
        }
    }

    /// The column's component metadata.
    #[must_use]
    pub fn meta(&self) -> &ComponentMeta {
        &self.meta
    }

    /// Returns the number of component instances stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if this column contains no components.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Grow the backing buffer for at least `rows` rows.
    ///
    /// Growth is geometric: when capacity is exceeded the buffer is
    /// reallocated for `2 * (rows - 1)` rows, never truncated.
    pub fn reserve_rows(&mut self, rows: usize) {
        if rows <= self.capacity {
            return;
        }
        let target = (2 * rows.saturating_sub(1)).max(4);
        let new_layout = array_layout(&self.meta, target);
        // SAFETY: Both layouts have non-zero size; when reallocating, the
        // old pointer was allocated with the same alignment.
        let ptr = unsafe {
            if self.capacity == 0 {
                alloc::alloc(new_layout)
            } else {
                let old_layout = array_layout(&self.meta, self.capacity);
                alloc::realloc(self.data.as_ptr(), old_layout, new_layout.size())
            }
        };
        let Some(ptr) = NonNull::new(ptr) else {
            alloc::handle_alloc_error(new_layout)
        };
        self.data = ptr;
        self.capacity = target;
    }

    /// Pointer to the start of `row`. The row must be within capacity.
    fn row_ptr(&self, row: usize) -> *mut u8 {
        debug_assert!(row < self.capacity);
        // SAFETY: The offset stays inside the allocated buffer.
        unsafe { self.data.as_ptr().add(row * self.meta.size()) }
    }

    /// Push a component's raw bytes into the column, taking ownership of
    /// the value they represent.
    pub fn push_raw(&mut self, bytes: &[u8]) {
        debug_assert_eq!(bytes.len(), self.meta.size(), "byte slice size mismatch");
        self.reserve_rows(self.len + 1);
        // SAFETY: The buffer has room for one more row, and the source
        // slice cannot overlap the column's own allocation.
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.row_ptr(self.len), bytes.len());
        }
        self.len += 1;
    }

    /// Push a typed component value into the column.
    ///
    /// # Safety
    ///
    /// `T` must be the component type this column was created for.
    pub unsafe fn push<T: 'static>(&mut self, value: T) {
        debug_assert_eq!(std::mem::size_of::<T>(), self.meta.size());
        debug_assert_eq!(std::any::TypeId::of::<T>(), self.meta.type_id);
        let value = std::mem::ManuallyDrop::new(value);
        // SAFETY: We read `size_of::<T>()` bytes from a valid `T`; ownership
        // transfers to the column via ManuallyDrop.
        let bytes = unsafe {
            std::slice::from_raw_parts((&raw const value).cast::<u8>(), self.meta.size())
        };
        self.push_raw(bytes);
    }

    /// Clone the value at `row` of `src` onto the end of this column.
    pub fn clone_push_from(&mut self, src: &Column, row: usize) {
        debug_assert_eq!(self.meta.type_id, src.meta.type_id);
        self.reserve_rows(self.len + 1);
        let src_bytes = src.get_raw(row).expect("source row out of bounds");
        // SAFETY: src_bytes is a valid instance; the destination is
        // aligned writable space for exactly one instance.
        unsafe {
            (self.meta.clone_fn)(src_bytes.as_ptr(), self.row_ptr(self.len));
        }
        self.len += 1;
    }

    /// Get a reference to the raw bytes of the component at `row`.
    #[must_use]
    pub fn get_raw(&self, row: usize) -> Option<&[u8]> {
        if row >= self.len {
            return None;
        }
        // SAFETY: The row is within the initialised prefix of the buffer.
        Some(unsafe { std::slice::from_raw_parts(self.row_ptr(row), self.meta.size()) })
    }

    /// Get a mutable reference to the raw bytes of the component at `row`.
    #[must_use]
    pub fn get_raw_mut(&mut self, row: usize) -> Option<&mut [u8]> {
        if row >= self.len {
            return None;
        }
        // SAFETY: The row is within the initialised prefix of the buffer.
        Some(unsafe { std::slice::from_raw_parts_mut(self.row_ptr(row), self.meta.size()) })
    }

    /// Get a typed reference to the component at `row`.
    ///
    /// # Safety
    ///
    /// `T` must be the component type this column was created for.
    #[must_use]
    pub unsafe fn get<T: 'static>(&self, row: usize) -> Option<&T> {
        debug_assert_eq!(std::any::TypeId::of::<T>(), self.meta.type_id);
        let bytes = self.get_raw(row)?;
        // SAFETY: The column stores valid instances of `T`.
        Some(unsafe { &*bytes.as_ptr().cast::<T>() })
    }

    /// Get a typed mutable reference to the component at `row`.
    ///
    /// # Safety
    ///
    /// `T` must be the component type this column was created for.
    #[must_use]
    pub unsafe fn get_mut<T: 'static>(&mut self, row: usize) -> Option<&mut T> {
        debug_assert_eq!(std::any::TypeId::of::<T>(), self.meta.type_id);
        let bytes = self.get_raw_mut(row)?;
        // SAFETY: The column stores valid instances of `T`.
        Some(unsafe { &mut *bytes.as_mut_ptr().cast::<T>() })
    }

    /// Swap-remove the value at `row`, dropping it.
    pub fn swap_remove(&mut self, row: usize) {
        debug_assert!(row < self.len, "row out of bounds");
        if let Some(drop_fn) = self.meta.drop_fn {
            // SAFETY: The row holds a valid instance about to leave the
            // column.
            unsafe { drop_fn(self.row_ptr(row)) };
        }
        self.swap_remove_no_drop(row);
    }

    /// Swap-remove the value at `row` without dropping it, for rows whose
    /// value has been moved elsewhere.
    pub fn swap_remove_no_drop(&mut self, row: usize) {
        debug_assert!(row < self.len, "row out of bounds");
        let last = self.len - 1;
        if row != last {
            // SAFETY: Distinct rows within the initialised prefix.
            unsafe {
                std::ptr::copy_nonoverlapping(
                    self.row_ptr(last),
                    self.row_ptr(row),
                    self.meta.size(),
                );
            }
        }
        self.len = last;
    }

    /// Drop every stored value and empty the column.
    pub fn clear(&mut self) {
        if let Some(drop_fn) = self.meta.drop_fn {
            for row in 0..self.len {
                // SAFETY: Each row holds a valid instance; `len` is zeroed
                // right after the loop.
                unsafe { drop_fn(self.row_ptr(row)) };
            }
        }
        self.len = 0;
    }
}

impl Drop for Column {
    fn drop(&mut self) {
        self.clear();
        if self.capacity > 0 {
            let layout = array_layout(&self.meta, self.capacity);
            // SAFETY: The buffer was allocated with this exact layout.
            unsafe { alloc::dealloc(self.data.as_ptr(), layout) };
        }
    }
}

impl std::fmt::Debug for Column {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Column")
            .field("meta", &self.meta)
            .field("len", &self.len())
            .finish()
    }
}

/// Columnar storage shared by every archetype whose data-bearing component
/// subset equals this table's id set.
#[derive(Debug)]
pub struct Table {
    /// Sorted data-bearing component ids.
    ids: Vec<Entity>,
    /// One column per id, in the same order.
    columns: Vec<Column>,
    /// Entity per row. Row `i` of every column belongs to `entities[i]`.
    entities: Vec<Entity>,
}

impl Table {
    /// Create a new empty table for the given sorted id set.
    #[must_use]
    pub fn new(ids: Vec<Entity>, metas: Vec<ComponentMeta>) -> Self {
        debug_assert_eq!(ids.len(), metas.len());
        debug_assert!(ids.is_sorted());
        let columns = metas.into_iter().map(Column::new).collect();
        Self {
            ids,
            columns,
            entities: Vec::new(),
        }
    }

    /// The sorted data-bearing id set.
    #[must_use]
    pub fn ids(&self) -> &[Entity] {
        &self.ids
    }

    /// The entity ids in row order.
    #[must_use]
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    /// Returns the number of rows.
    #[must_use]
    pub fn rows(&self) -> usize {
        self.entities.len()
    }

    /// Returns `true` if this table has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Returns the column index for the given component id, if present.
    #[must_use]
    pub fn column_index(&self, id: Entity) -> Option<usize> {
        self.ids.binary_search(&id).ok()
    }

    /// The column for a component id. An absent id signals a caller bug,
    /// surfaced as `None`.
    #[must_use]
    pub fn column(&self, id: Entity) -> Option<&Column> {
        self.column_index(id).map(|idx| &self.columns[idx])
    }

    /// The mutable column for a component id.
    #[must_use]
    pub fn column_mut(&mut self, id: Entity) -> Option<&mut Column> {
        self.column_index(id).map(|idx| &mut self.columns[idx])
    }

    /// Append a row holding only the entity id, for tables without columns
    /// or as the base of a cross-table move.
    pub fn push_entity(&mut self, entity: Entity) -> usize {
        debug_assert!(
            self.columns.is_empty(),
            "rows in tables with columns are created by move_row"
        );
        let row = self.entities.len();
        self.entities.push(entity);
        row
    }

    /// Move row `row` into `dst`: append the entity and every column common
    /// to both id sets, then swap-remove the source row. Values moving to
    /// `dst` are not dropped; values for ids absent from `dst` are.
    ///
    /// Columns present only in `dst` are left one element short; the
    /// caller must fill them (via [`Column::push_raw`]) before the row is
    /// observed. Returns the destination row and the entity swapped into
    /// the vacated source row, if any.
    pub fn move_row(&mut self, row: usize, dst: &mut Table) -> (usize, Option<Entity>) {
        debug_assert!(row < self.entities.len());
        let entity = self.entities[row];
        let dst_row = dst.entities.len();
        dst.entities.push(entity);

        for (dst_idx, id) in dst.ids.iter().enumerate() {
            if let Ok(src_idx) = self.ids.binary_search(id) {
                let bytes = self.columns[src_idx]
                    .get_raw(row)
                    .expect("row bounds checked above");
                dst.columns[dst_idx].push_raw(bytes);
            }
        }
        for (src_idx, id) in self.ids.iter().enumerate() {
            if dst.ids.binary_search(id).is_ok() {
                self.columns[src_idx].swap_remove_no_drop(row);
            } else {
                self.columns[src_idx].swap_remove(row);
            }
        }

        let moved = self.swap_remove_entity(row);
        (dst_row, moved)
    }

    /// Swap-remove row `row`, dropping every stored value. Returns the
    /// entity swapped into the vacated row, if any.
    pub fn swap_remove(&mut self, row: usize) -> Option<Entity> {
        debug_assert!(row < self.entities.len());
        for column in &mut self.columns {
            column.swap_remove(row);
        }
        self.swap_remove_entity(row)
    }

    /// Drop every row. Column layout and id set are preserved.
    pub fn clear(&mut self) {
        for column in &mut self.columns {
            column.clear();
        }
        self.entities.clear();
    }

    fn swap_remove_entity(&mut self, row: usize) -> Option<Entity> {
        let last = self.entities.len() - 1;
        let moved = (row != last).then(|| self.entities[last]);
        self.entities.swap_remove(row);
        moved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_component::Component;

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Position {
        x: f32,
        y: f32,
    }

    impl Component for Position {
        fn type_name() -> &'static str {
            "Position"
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Label(String);

    impl Component for Label {}

    fn pos_id() -> Entity {
        Entity::new(1, 0)
    }

    fn label_id() -> Entity {
        Entity::new(2, 0)
    }

    fn pos_table() -> Table {
        Table::new(vec![pos_id()], vec![ComponentMeta::of::<Position>()])
    }

    fn push_row(table: &mut Table, entity: Entity, value: Position) {
        // Mirrors the world's add path: entity first, then the new column.
        table.entities.push(entity);
        // SAFETY: The column was created for Position.
        unsafe { table.column_mut(pos_id()).unwrap().push(value) };
    }

    #[test]
    fn test_column_push_and_get() {
        let mut col = Column::new(ComponentMeta::of::<Position>());
        // SAFETY: Column type matches Position.
        unsafe { col.push(Position { x: 1.0, y: 2.0 }) };
        assert_eq!(col.len(), 1);
        let got = unsafe { col.get::<Position>(0) }.unwrap();
        assert_eq!(*got, Position { x: 1.0, y: 2.0 });
        assert!(unsafe { col.get::<Position>(1) }.is_none());
    }

    #[test]
    fn test_column_swap_remove_moves_last_down() {
        let mut col = Column::new(ComponentMeta::of::<Position>());
        for i in 0..3 {
            // SAFETY: Column type matches Position.
            unsafe {
                col.push(Position {
                    x: i as f32,
                    y: 0.0,
                })
            };
        }
        col.swap_remove(0);
        assert_eq!(col.len(), 2);
        let got = unsafe { col.get::<Position>(0) }.unwrap();
        assert_eq!(got.x, 2.0);
    }

    #[test]
    fn test_column_drops_heap_values() {
        let mut col = Column::new(ComponentMeta::of::<Label>());
        // SAFETY: Column type matches Label.
        unsafe { col.push(Label("a".into())) };
        unsafe { col.push(Label("b".into())) };
        col.swap_remove(1);
        assert_eq!(unsafe { col.get::<Label>(0) }.unwrap().0, "a");
        // Remaining value dropped by Column::drop; run under Miri to verify.
    }

    #[test]
    fn test_column_clone_push_from() {
        let src_col = {
            let mut c = Column::new(ComponentMeta::of::<Label>());
            // SAFETY: Column type matches Label.
            unsafe { c.push(Label("template".into())) };
            c
        };
        let mut dst = Column::new(ComponentMeta::of::<Label>());
        dst.clone_push_from(&src_col, 0);
        assert_eq!(unsafe { dst.get::<Label>(0) }.unwrap().0, "template");
        assert_eq!(unsafe { src_col.get::<Label>(0) }.unwrap().0, "template");
    }

    #[test]
    fn test_table_swap_remove_reports_moved_entity() {
        let mut table = pos_table();
        let a = Entity::new(10, 0);
        let b = Entity::new(11, 0);
        let c = Entity::new(12, 0);
        push_row(&mut table, a, Position { x: 1.0, y: 0.0 });
        push_row(&mut table, b, Position { x: 2.0, y: 0.0 });
        push_row(&mut table, c, Position { x: 3.0, y: 0.0 });

        let moved = table.swap_remove(0);
        assert_eq!(moved, Some(c));
        assert_eq!(table.rows(), 2);
        assert_eq!(table.entities()[0], c);
        let col = table.column(pos_id()).unwrap();
        assert_eq!(unsafe { col.get::<Position>(0) }.unwrap().x, 3.0);
        assert_eq!(unsafe { col.get::<Position>(1) }.unwrap().x, 2.0);
    }

    #[test]
    fn test_table_swap_remove_last_row() {
        let mut table = pos_table();
        push_row(&mut table, Entity::new(10, 0), Position { x: 1.0, y: 0.0 });
        assert_eq!(table.swap_remove(0), None);
        assert!(table.is_empty());
    }

    #[test]
    fn test_move_row_copies_shared_columns() {
        let mut src = pos_table();
        let mut dst = Table::new(
            vec![pos_id(), label_id()],
            vec![ComponentMeta::of::<Position>(), ComponentMeta::of::<Label>()],
        );
        let e = Entity::new(10, 0);
        push_row(&mut src, e, Position { x: 4.0, y: 5.0 });

        let (dst_row, moved) = src.move_row(0, &mut dst);
        assert_eq!(dst_row, 0);
        assert_eq!(moved, None);
        assert!(src.is_empty());
        // The caller fills the brand-new column before the row is observed.
        // SAFETY: Column type matches Label.
        unsafe { dst.column_mut(label_id()).unwrap().push(Label("e".into())) };

        assert_eq!(dst.entities()[0], e);
        let pos = dst.column(pos_id()).unwrap();
        assert_eq!(unsafe { pos.get::<Position>(0) }.unwrap().x, 4.0);
    }

    #[test]
    fn test_move_row_drops_values_left_behind() {
        let mut src = Table::new(
            vec![pos_id(), label_id()],
            vec![ComponentMeta::of::<Position>(), ComponentMeta::of::<Label>()],
        );
        let mut dst = pos_table();
        let e = Entity::new(10, 0);
        src.entities.push(e);
        // SAFETY: Column types match.
        unsafe {
            src.column_mut(pos_id()).unwrap().push(Position { x: 1.0, y: 1.0 });
            src.column_mut(label_id()).unwrap().push(Label("gone".into()));
        }

        let (dst_row, _) = src.move_row(0, &mut dst);
        assert_eq!(dst.rows(), 1);
        assert_eq!(
            unsafe { dst.column(pos_id()).unwrap().get::<Position>(dst_row) }
                .unwrap()
                .x,
            1.0
        );
    }

    #[derive(Debug, Clone, Copy, PartialEq)]
    #[repr(align(16))]
    struct Simd4 {
        lanes: [f32; 4],
    }

    impl Component for Simd4 {}

    #[test]
    fn test_column_respects_over_aligned_types() {
        let mut col = Column::new(ComponentMeta::of::<Simd4>());
        for i in 0..9 {
            // SAFETY: Column type matches Simd4.
            unsafe { col.push(Simd4 { lanes: [i as f32; 4] }) };
        }
        for i in 0..9 {
            let got = unsafe { col.get::<Simd4>(i) }.unwrap();
            assert_eq!((&raw const *got) as usize % align_of::<Simd4>(), 0);
            assert_eq!(got.lanes[0], i as f32);
        }
        col.swap_remove(0);
        assert_eq!(unsafe { col.get::<Simd4>(0) }.unwrap().lanes[0], 8.0);
    }

    #[test]
    fn test_geometric_growth_never_truncates() {
        let mut col = Column::new(ComponentMeta::of::<Position>());
        for i in 0..100 {
            // SAFETY: Column type matches Position.
            unsafe {
                col.push(Position {
                    x: i as f32,
                    y: 0.0,
                })
            };
        }
        assert_eq!(col.len(), 100);
        for i in 0..100 {
            assert_eq!(unsafe { col.get::<Position>(i) }.unwrap().x, i as f32);
        }
    }
}
