//! Class capability registry and instance-override cache.
//!
//! Builds the class- and object-level layers over the `crest-core`
//! specification graph:
//!
//! - **Class table** ([`ClassGraph`]) — registered classes with fixed direct
//!   superclasses and a C3-linearized hierarchy.
//! - **Capability registry** ([`CapabilityRegistry`]) — one identity-stable
//!   specification node per class, built lazily and mutated in place by the
//!   declaration operations; plus cached partial-class views for
//!   cooperative inheritance.
//! - **Override cache** ([`OverrideCache`] with [`ObjectTable`]) — shared,
//!   reference-counted specification nodes for objects that directly
//!   provide capabilities beyond their class.
//! - **Engine facade** ([`CapabilityEngine`]) — owns all of the above and
//!   exposes the full declaration/query surface with no global state.

pub mod class;
pub mod engine;
pub mod error;
pub mod overrides;
pub mod registry;

// Re-exports for convenience.
pub use class::{ClassGraph, ClassId};
pub use engine::CapabilityEngine;
pub use error::{RegistryError, Result};
pub use overrides::{ObjectId, ObjectTable, OverrideCache};
pub use registry::{CapabilityRegistry, DeclarationMode};
