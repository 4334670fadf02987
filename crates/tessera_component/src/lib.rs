//! # tessera_component
//!
//! The identity and data primitives of the tessera ECS: defines what an
//! entity id is, what a component is, and how a query is described.
//!
//! This crate provides:
//!
//! - [`Entity`] — packed 64-bit entity / component / relationship-pair ids.
//! - [`SlotAllocator`] — generation-tracked slot allocation with reuse.
//! - [`Component`] trait — the contract all ECS data must satisfy.
//! - [`ComponentMeta`] / [`ComponentHooks`] — type-erased column metadata
//!   and per-type lifecycle callbacks.
//! - [`Mask`] — the (all, any, none) id-set description of a query.

pub mod component;
pub mod entity;
pub mod mask;

pub use component::{Component, ComponentHooks, ComponentMeta};
pub use entity::{Entity, SlotAllocator};
pub use mask::{Mask, contains_match};
