//! Generational handles for specification nodes.
//!
//! A [`SpecId`] is an (index, generation) pair into the [`SpecGraph`] arena.
//! Freeing a node bumps its slot's generation, so a handle held past the
//! node's death dereferences to `StaleHandle` instead of aliasing whatever
//! node later reuses the slot.
//!
//! [`SpecGraph`]: crate::graph::SpecGraph

use std::fmt;

use serde::{Deserialize, Serialize};

/// Handle to a specification node in a [`SpecGraph`].
///
/// Cheap to copy and hashable; identity of the handle (not of the capability
/// set it names) is what caching keys on.
///
/// [`SpecGraph`]: crate::graph::SpecGraph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SpecId {
    index: u32,
    generation: u32,
}

impl SpecId {
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Slot index in the arena.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Generation the handle was issued at.
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for SpecId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "spec#{}.{}", self.index, self.generation)
    }
}
