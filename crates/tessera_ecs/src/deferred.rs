//! The deferred-operation log.
//!
//! While any traversal holds the registry lock, structural mutations are
//! recorded here instead of touching archetypes. When the lock count
//! returns to zero the log is replayed in original order; operations whose
//! entity died after being logged are skipped, and their staged values are
//! dropped properly.

use std::alloc;
use std::ptr::NonNull;

use tessera_component::{Component, ComponentMeta, Entity};

/// A component value captured off to the side until replay.
///
/// Holds one instance in a buffer allocated with the component's own
/// layout; exactly one of "written into a column" or "dropped in place"
/// happens to it.
pub(crate) struct StagedValue {
    ptr: NonNull<u8>,
    meta: ComponentMeta,
    consumed: bool,
}

impl StagedValue {
    /// Allocate aligned room for one instance. Only data components get
    /// staged, so the layout is never zero-sized.
    fn alloc_one(meta: &ComponentMeta) -> NonNull<u8> {
        debug_assert!(!meta.is_zero_sized(), "tags carry no staged value");
        // SAFETY: The layout has non-zero size.
        let ptr = unsafe { alloc::alloc(meta.layout) };
        match NonNull::new(ptr) {
            Some(ptr) => ptr,
            None => alloc::handle_alloc_error(meta.layout),
        }
    }

    /// Stage a typed value, taking ownership of it.
    pub(crate) fn of<T: Component>(value: T, meta: ComponentMeta) -> Self {
        debug_assert_eq!(std::mem::size_of::<T>(), meta.size());
        let ptr = Self::alloc_one(&meta);
        let value = std::mem::ManuallyDrop::new(value);
        // SAFETY: We copy `size_of::<T>()` bytes from a valid `T` into
        // fresh space for one instance; ownership transfers with them.
        unsafe {
            std::ptr::copy_nonoverlapping(
                (&raw const value).cast::<u8>(),
                ptr.as_ptr(),
                meta.size(),
            );
        }
        Self {
            ptr,
            meta,
            consumed: false,
        }
    }

    /// Stage a clone of an instance already stored in a column.
    ///
    /// # Safety
    ///
    /// `src` must point at a valid, initialized instance of the type
    /// described by `meta`.
    pub(crate) unsafe fn cloned(src: *const u8, meta: ComponentMeta) -> Self {
        let ptr = Self::alloc_one(&meta);
        // SAFETY: The buffer is aligned room for exactly one instance and
        // the caller guarantees `src` is a valid instance.
        unsafe { (meta.clone_fn)(src, ptr.as_ptr()) };
        Self {
            ptr,
            meta,
            consumed: false,
        }
    }

    /// The staged instance's raw bytes.
    pub(crate) fn bytes(&self) -> &[u8] {
        // SAFETY: The buffer holds one initialised instance.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.meta.size()) }
    }

    /// Mark the bytes as written into a column; dropping this staged value
    /// afterwards only frees the buffer.
    pub(crate) fn mark_consumed(&mut self) {
        self.consumed = true;
    }
}

impl Drop for StagedValue {
    fn drop(&mut self) {
        if !self.consumed {
            if let Some(drop_fn) = self.meta.drop_fn {
                // SAFETY: The buffer holds a valid instance that was never
                // written anywhere else.
                unsafe { drop_fn(self.ptr.as_ptr()) };
            }
        }
        // SAFETY: The buffer was allocated with this exact layout.
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.meta.layout) };
    }
}

impl std::fmt::Debug for StagedValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagedValue")
            .field("meta", &self.meta)
            .field("consumed", &self.consumed)
            .finish()
    }
}

/// One recorded structural mutation.
#[derive(Debug)]
pub(crate) enum DeferredOp {
    /// Add `id` to `entity`, with a staged value for data components.
    Add {
        entity: Entity,
        id: Entity,
        value: Option<StagedValue>,
    },
    /// Remove `id` from `entity`.
    Remove { entity: Entity, id: Entity },
    /// Destroy `entity` outright.
    Despawn { entity: Entity },
}

impl DeferredOp {
    /// The entity this operation targets.
    pub(crate) fn entity(&self) -> Entity {
        match self {
            Self::Add { entity, .. } | Self::Remove { entity, .. } | Self::Despawn { entity } => {
                *entity
            }
        }
    }
}
