//! Shared object model and attribute engine.
//!
//! SYSTEM CONTEXT
//! ==============
//! This crate owns the pieces both sides of the wire agree on: the
//! [`DomainObject`] record, per-type attribute schemas with coercion and
//! validation, and the type registry with its behavior tables. The client's
//! `ObjectManager` and the server's object service both mutate objects only
//! through this engine, so numeric clamping, readonly enforcement, and the
//! visibility/link invariant behave identically everywhere.

pub mod object;
pub mod registry;
pub mod schema;

pub use object::{DomainObject, LinkDirection, LinkedObject, truthy};
pub use registry::{
    ActionSpec, ActionVisibility, TypeBehavior, TypeEntry, TypeRegistry,
    register_base_attributes,
};
pub use schema::{
    AttrKind, Attribute, AttributeError, AttributeSchema, AttributeSpec, EmptyLookup,
    ObjectLookup, SetResult, loosely_equal, parse_int,
};
