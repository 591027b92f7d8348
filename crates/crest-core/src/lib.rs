//! Capability sets, specification nodes, and the resolution-order engine.
//!
//! A *capability set* is a named, immutable abstract interface. A
//! *specification* is any composition node (capability set, class
//! specification, or instance override) with ordered bases, a cached
//! linearized resolution order, and a fast-membership implied set. This
//! crate owns the node arena ([`SpecGraph`]), the C3-style linearization
//! ([`linearize`]), attribute and tagged-value resolution, and the
//! invalidation machinery that keeps every cached order fresh under
//! mutation.
//!
//! # Architecture
//!
//! - Nodes live in a generational arena and are addressed by [`SpecId`]
//!   handles; stale handles are detected, never dereferenced blindly.
//! - Each node tracks its *dependents* (nodes listing it as a base) in a
//!   non-owning multiset used purely for invalidation fan-out.
//! - All recomputation is eager and synchronous: a mutating call returns
//!   only after the node and every transitive dependent carry fresh orders.
//!
//! The class-capability registry and instance-override cache built on top of
//! this engine live in the `crest-registry` crate.

pub mod capability;
pub mod error;
pub mod format;
pub mod graph;
pub mod handle;
pub mod linearize;

// Re-exports for convenience.
pub use capability::{AdaptFn, AdaptPolicy, CapabilityDef};
pub use error::{Result, SpecError};
pub use format::{format_bases_tree, format_resolution_order};
pub use graph::SpecGraph;
pub use handle::SpecId;
pub use linearize::{merge, pin_last, MergeConflict};
