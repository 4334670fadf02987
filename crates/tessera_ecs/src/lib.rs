//! # tessera_ecs
//!
//! The registry layer of tessera: archetype storage, relationships,
//! deferred mutation and reactive dispatch on top of the identity and
//! component primitives from `tessera_component`.
//!
//! This crate provides:
//!
//! - [`World`] — the central registry owning entities, archetypes and
//!   component values.
//! - [`FilterHandle`] — a cached, incrementally maintained archetype list
//!   for a [`Mask`](tessera_component::Mask).
//! - [`RowIter`] / [`RowView`] — shared traversal with wildcard pair
//!   resolution; [`World::each`] for mutation during traversal.
//! - [`WorldError`] — every way a registry operation can fail.

pub mod archetype;
mod deferred;
pub mod error;
pub mod filter;
pub mod query;
pub mod record;
pub mod table;
pub mod watch;
pub mod world;

pub use error::WorldError;
pub use filter::FilterHandle;
pub use query::{QueryData, RowIter, RowView};
pub use record::{EntityFlags, EntityRecord};
pub use watch::{WatchKind, WatcherId};
pub use world::World;

pub use tessera_component::{Component, ComponentHooks, ComponentMeta, Entity, Mask};
