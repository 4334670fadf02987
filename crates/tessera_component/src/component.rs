//! Core [`Component`] trait and type-erased metadata.
//!
//! Every piece of data stored in the ECS implements [`Component`]. The trait
//! requires `Send + Sync + 'static` so components can live inside shared
//! storage, and `Clone` so an entity can be instantiated from a template.
//!
//! A zero-sized component is a *tag*: it participates in archetype
//! membership but gets no column storage.

use std::alloc::Layout;
use std::any::TypeId;

/// The core component trait.
///
/// # Examples
///
/// ```rust
/// use tessera_component::Component;
///
/// #[derive(Debug, Clone)]
/// struct Health {
///     current: f32,
///     max: f32,
/// }
///
/// impl Component for Health {}
/// ```
pub trait Component: Send + Sync + Clone + 'static {
    /// A human-readable name for this component type, used in diagnostics.
    fn type_name() -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Metadata about a component type, used for type-erased column storage.
#[derive(Clone)]
pub struct ComponentMeta {
    /// The Rust type identity, checked on every typed column access.
    pub type_id: TypeId,
    /// The human-readable name of the component (e.g. `"Transform3D"`).
    pub name: &'static str,
    /// Size and alignment of one component instance.
    pub layout: Layout,
    /// Function pointer to drop a component in-place.
    pub drop_fn: Option<unsafe fn(*mut u8)>,
    /// Clone a component from `src` into the uninitialised `dst`.
    pub clone_fn: unsafe fn(*const u8, *mut u8),
}

impl ComponentMeta {
    /// Build the metadata descriptor for a component type.
    #[must_use]
    pub fn of<T: Component>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            name: T::type_name(),
            layout: Layout::new::<T>(),
            drop_fn: if std::mem::needs_drop::<T>() {
                Some(|ptr: *mut u8| {
                    // SAFETY: Caller guarantees `ptr` points to a valid `T`.
                    unsafe { std::ptr::drop_in_place(ptr.cast::<T>()) }
                })
            } else {
                None
            },
            clone_fn: |src: *const u8, dst: *mut u8| {
                // SAFETY: Caller guarantees `src` points to a valid `T` and
                // `dst` to uninitialised space for one `T`.
                unsafe {
                    let value = (*src.cast::<T>()).clone();
                    std::ptr::write(dst.cast::<T>(), value);
                }
            },
        }
    }

    /// Size in bytes of one component instance.
    #[must_use]
    pub fn size(&self) -> usize {
        self.layout.size()
    }

    /// Alignment in bytes of one component instance.
    #[must_use]
    pub fn align(&self) -> usize {
        self.layout.align()
    }

    /// Returns `true` for tag components, which get no column storage.
    #[must_use]
    pub fn is_zero_sized(&self) -> bool {
        self.layout.size() == 0
    }
}

impl std::fmt::Debug for ComponentMeta {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentMeta")
            .field("name", &self.name)
            .field("size", &self.layout.size())
            .finish()
    }
}

type ErasedHook = Box<dyn Fn(*mut u8) + Send + Sync>;

/// Optional per-type lifecycle callbacks, run against the component's
/// storage whenever an instance is added to or removed from an entity.
///
/// Hooks replace the source-style "auto-reset" component pools: a type opts
/// in by registering typed callbacks, which are erased here and invoked
/// through the storage pointer.
#[derive(Default)]
pub struct ComponentHooks {
    on_add: Option<ErasedHook>,
    on_remove: Option<ErasedHook>,
}

impl ComponentHooks {
    /// Create an empty hook set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback run right after an instance is written into its
    /// destination column.
    #[must_use]
    pub fn on_add<T: Component>(mut self, f: fn(&mut T)) -> Self {
        self.on_add = Some(Box::new(move |ptr: *mut u8| {
            // SAFETY: The world only invokes this hook with a pointer into
            // the column registered for `T`.
            f(unsafe { &mut *ptr.cast::<T>() });
        }));
        self
    }

    /// Register a callback run against the still-valid old storage right
    /// before an instance leaves its column.
    #[must_use]
    pub fn on_remove<T: Component>(mut self, f: fn(&mut T)) -> Self {
        self.on_remove = Some(Box::new(move |ptr: *mut u8| {
            // SAFETY: As for `on_add`.
            f(unsafe { &mut *ptr.cast::<T>() });
        }));
        self
    }

    /// Invoke the add hook, if registered.
    ///
    /// # Safety
    ///
    /// `ptr` must point to a valid instance of the hooked component type.
    pub unsafe fn run_add(&self, ptr: *mut u8) {
        if let Some(hook) = &self.on_add {
            hook(ptr);
        }
    }

    /// Invoke the remove hook, if registered.
    ///
    /// # Safety
    ///
    /// `ptr` must point to a valid instance of the hooked component type.
    pub unsafe fn run_remove(&self, ptr: *mut u8) {
        if let Some(hook) = &self.on_remove {
            hook(ptr);
        }
    }

    /// Returns `true` if either hook is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.on_add.is_none() && self.on_remove.is_none()
    }
}

impl std::fmt::Debug for ComponentHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentHooks")
            .field("on_add", &self.on_add.is_some())
            .field("on_remove", &self.on_remove.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Health {
        current: f32,
        max: f32,
    }

    impl Component for Health {
        fn type_name() -> &'static str {
            "Health"
        }
    }

    #[derive(Debug, Clone)]
    struct Frozen;

    impl Component for Frozen {}

    #[test]
    fn test_meta_layout_and_name() {
        let meta = ComponentMeta::of::<Health>();
        assert_eq!(meta.name, "Health");
        assert_eq!(meta.layout, Layout::new::<Health>());
        assert!(!meta.is_zero_sized());
    }

    #[test]
    fn test_tag_meta_is_zero_sized() {
        let meta = ComponentMeta::of::<Frozen>();
        assert!(meta.is_zero_sized());
        assert!(meta.drop_fn.is_none());
    }

    #[test]
    fn test_clone_fn_copies_value() {
        let meta = ComponentMeta::of::<Health>();
        let src = Health {
            current: 30.0,
            max: 100.0,
        };
        let mut dst = std::mem::MaybeUninit::<Health>::uninit();
        // SAFETY: src is valid, dst is properly sized uninitialised space.
        unsafe {
            (meta.clone_fn)(
                (&raw const src).cast::<u8>(),
                dst.as_mut_ptr().cast::<u8>(),
            );
        }
        // SAFETY: clone_fn initialised dst.
        let cloned = unsafe { dst.assume_init() };
        assert_eq!(cloned, src);
    }

    #[test]
    fn test_drop_fn_present_only_when_needed() {
        #[derive(Debug, Clone)]
        struct Named(String);
        impl Component for Named {}

        assert!(ComponentMeta::of::<Named>().drop_fn.is_some());
        assert!(ComponentMeta::of::<Health>().drop_fn.is_none());
    }

    #[test]
    fn test_hooks_invoke_typed_callback() {
        let hooks = ComponentHooks::new().on_add::<Health>(|h| h.current = h.max);
        let mut value = Health {
            current: 1.0,
            max: 50.0,
        };
        // SAFETY: value is a valid Health.
        unsafe { hooks.run_add((&raw mut value).cast::<u8>()) };
        assert_eq!(value.current, 50.0);
        assert!(!hooks.is_empty());
    }
}
