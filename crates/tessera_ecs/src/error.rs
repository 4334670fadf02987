//! Error types for registry operations.
//!
//! Contract violations (duplicate add, removing an absent component,
//! operating on a dead entity) surface as explicit [`WorldError`] values in
//! every build mode; reads use `Option`. Messages carry the best-effort
//! human-readable component name.

use thiserror::Error;

use tessera_component::Entity;

/// Errors returned by structural registry operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WorldError {
    /// The entity id is stale or was never allocated.
    #[error("entity {0} is not alive")]
    DeadEntity(Entity),

    /// The component type was never registered with this world.
    #[error("component type '{0}' is not registered")]
    NotRegistered(&'static str),

    /// The id is not a known component, tag, or relationship.
    #[error("unknown component id {0}")]
    UnknownComponent(Entity),

    /// The entity already carries this component.
    #[error("entity {entity} already has component '{name}'")]
    DuplicateComponent { entity: Entity, name: String },

    /// The entity does not carry this component.
    #[error("entity {entity} does not have component '{name}'")]
    MissingComponent { entity: Entity, name: String },

    /// A data-bearing component was added without a value payload.
    #[error("component '{name}' carries data and needs a value")]
    ValueRequired { name: String },

    /// A filter mask with neither `all` nor `any` terms matches nothing.
    #[error("filter mask needs at least one `all` or `any` term")]
    EmptyMask,
}
