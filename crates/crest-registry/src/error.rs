//! Registry error types.

use crest_core::SpecError;

use crate::class::ClassId;
use crate::overrides::ObjectId;

/// Errors that can occur during registry operations.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Query against a class that was never registered (or has since been
    /// unregistered).
    #[error("unknown class: {class}")]
    UnknownClass { class: ClassId },

    /// Query against an object that was never registered (or has since been
    /// released).
    #[error("unknown object: {object}")]
    UnknownObject { object: ObjectId },

    /// The class hierarchy places contradictory precedence demands on its
    /// superclasses.
    #[error("inconsistent hierarchy for class '{class}': no valid candidate among [{}]", candidates.join(", "))]
    InconsistentHierarchy {
        class: String,
        candidates: Vec<String>,
    },

    /// A partial-class view was requested from a class that is not in the
    /// full class's linearized hierarchy.
    #[error("class '{from}' is not in the hierarchy of '{class}'")]
    NotInHierarchy { class: String, from: String },

    /// An override removal that would not actually remove the capability:
    /// it is still granted through the class or another listed capability.
    #[error("capability set '{capability}' is still implied after removal")]
    CapabilityStillImplied { capability: String },

    /// Error from the underlying specification graph.
    #[error(transparent)]
    Spec(#[from] SpecError),
}

/// Result type alias for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;
