//! Core error types.

use crate::handle::SpecId;

/// Errors that can occur while constructing or recomputing specifications.
#[derive(Debug, thiserror::Error)]
pub enum SpecError {
    /// A base is dead, of the wrong composition kind, or would form a cycle.
    #[error("invalid composition: {detail}")]
    InvalidComposition { detail: String },

    /// The linearization merge cannot find a valid next candidate.
    ///
    /// The competing head candidates are reported by name so the caller can
    /// see which precedence demands contradict each other.
    #[error("inconsistent resolution order: no valid candidate among [{}]", candidates.join(", "))]
    InconsistentResolutionOrder { candidates: Vec<String> },

    /// A handle outlived the node it referred to.
    #[error("stale specification handle: {handle}")]
    StaleHandle { handle: SpecId },
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, SpecError>;
