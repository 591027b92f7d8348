//! Per-class capability specifications and declaration mutation.
//!
//! Every queried class gets one lazily-built, identity-stable composition
//! node in the specification graph: bases are the class's declared direct
//! capabilities followed by the (recursively built) nodes of its direct
//! superclasses. Declaration operations mutate that node in place, never
//! replace it, so handles held by dependents stay valid and invalidation
//! flows through the graph's dependents machinery.

use std::collections::HashMap;

use tracing::{debug, trace};

use crest_core::{SpecError, SpecGraph, SpecId};

use crate::class::{ClassGraph, ClassId};
use crate::error::{RegistryError, Result};

/// How a declaration call combines with what a class already declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeclarationMode {
    /// Insert each new capability where it best fits the existing
    /// declarations: before them if it extends one of them, after them
    /// otherwise. Candidates the class already implies are silently elided.
    #[default]
    AddPreferringConsistency,
    /// Discard the declared list and the inherited-base linkage, then add
    /// the given capabilities at highest priority.
    ReplaceAll,
    /// Splice the given capabilities at the front of the declared list
    /// without regard for consistency.
    AddHighestPriority,
}

#[derive(Debug, Clone)]
struct ClassEntry {
    /// The class's specification node. Stable for the life of the entry.
    spec: SpecId,
    /// Directly declared capability sets, highest priority first.
    declared: Vec<SpecId>,
    /// Classes whose capability nodes are kept reachable as trailing bases.
    /// Direct superclasses by default; emptied or replaced by REPLACE_ALL.
    inherited: Vec<ClassId>,
}

/// Cache of "capabilities implemented by instances of this class".
#[derive(Debug, Clone, Default)]
pub struct CapabilityRegistry {
    entries: HashMap<ClassId, ClassEntry>,
    /// Cooperative-inheritance views, keyed by (full class, from class).
    partial: HashMap<(ClassId, ClassId), SpecId>,
}

impl CapabilityRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The specification implemented by instances of `class`.
    ///
    /// Built on first query: declared direct capabilities (none yet for an
    /// undeclared class) followed by the recursively built nodes of the
    /// direct superclasses. A class with no declarations and no
    /// superclasses yields a node whose resolution order is just the root.
    pub fn class_capabilities(
        &mut self,
        graph: &mut SpecGraph,
        classes: &ClassGraph,
        class: ClassId,
    ) -> Result<SpecId> {
        if let Some(entry) = self.entries.get(&class) {
            return Ok(entry.spec);
        }
        let name = classes.name(class)?.to_string();
        let superclasses = classes.superclasses(class)?.to_vec();

        let mut bases = Vec::with_capacity(superclasses.len());
        for superclass in &superclasses {
            bases.push(self.class_capabilities(graph, classes, *superclass)?);
        }
        let spec = graph.create_composition(format!("ClassCapabilities({name})"), &bases)?;
        trace!(class = %name, %spec, "built class capabilities node");
        self.entries.insert(
            class,
            ClassEntry {
                spec,
                declared: Vec::new(),
                inherited: superclasses,
            },
        );
        Ok(spec)
    }

    /// The class's specification node if it has already been built.
    pub fn cached(&self, class: ClassId) -> Option<SpecId> {
        self.entries.get(&class).map(|entry| entry.spec)
    }

    /// The class's directly declared capability sets, highest priority
    /// first.
    pub fn declared(&self, class: ClassId) -> Option<&[SpecId]> {
        self.entries.get(&class).map(|entry| entry.declared.as_slice())
    }

    /// Mutate a class's declared capabilities.
    ///
    /// Multi-capability calls are not transactional: if a later capability
    /// produces an inconsistent order, the earlier insertions stand, and the
    /// class's node still carries a valid resolution order for whatever was
    /// successfully merged.
    pub fn declare(
        &mut self,
        graph: &mut SpecGraph,
        classes: &ClassGraph,
        class: ClassId,
        capabilities: &[SpecId],
        mode: DeclarationMode,
    ) -> Result<()> {
        self.class_capabilities(graph, classes, class)?;
        for capability in capabilities {
            if !graph.is_capability(*capability).unwrap_or(false) {
                return Err(SpecError::InvalidComposition {
                    detail: format!(
                        "{} is not a constructed capability set",
                        graph.describe(*capability)
                    ),
                }
                .into());
            }
        }
        debug!(
            class = %classes.describe(class),
            ?mode,
            count = capabilities.len(),
            "declaring capabilities"
        );

        match mode {
            DeclarationMode::ReplaceAll => {
                let entry = self.entries.get_mut(&class).expect("entry just ensured");
                entry.declared.clear();
                entry.inherited.clear();
                self.add_highest_priority(graph, classes, class, capabilities)
            }
            DeclarationMode::AddHighestPriority => {
                self.add_highest_priority(graph, classes, class, capabilities)
            }
            DeclarationMode::AddPreferringConsistency => {
                self.add_preferring_consistency(graph, classes, class, capabilities)
            }
        }
    }

    /// Replace a class's declarations, but keep the listed classes'
    /// capability nodes reachable as trailing bases.
    ///
    /// Retention is an explicit parameter rather than something inferred
    /// from how the caller threads base-class handles around.
    pub fn declare_exclusive_retaining(
        &mut self,
        graph: &mut SpecGraph,
        classes: &ClassGraph,
        class: ClassId,
        capabilities: &[SpecId],
        retained: &[ClassId],
    ) -> Result<()> {
        self.class_capabilities(graph, classes, class)?;
        for kept in retained {
            classes.name(*kept)?;
        }
        {
            let entry = self.entries.get_mut(&class).expect("entry just ensured");
            entry.declared.clear();
            entry.inherited = retained.to_vec();
        }
        self.declare(graph, classes, class, capabilities, DeclarationMode::AddHighestPriority)
    }

    /// Splice `capabilities` at the front of the declared list (preserving
    /// their given order, skipping ones already declared), then rebuild.
    fn add_highest_priority(
        &mut self,
        graph: &mut SpecGraph,
        classes: &ClassGraph,
        class: ClassId,
        capabilities: &[SpecId],
    ) -> Result<()> {
        let entry = self.entries.get_mut(&class).expect("entry ensured by declare");
        let mut fresh: Vec<SpecId> = Vec::new();
        for capability in capabilities {
            if !fresh.contains(capability) && !entry.declared.contains(capability) {
                fresh.push(*capability);
            }
        }
        let fresh_len = fresh.len();
        entry.declared.splice(0..0, fresh);
        if let Err(err) = self.rebuild(graph, classes, class) {
            // Keep the declared ledger in sync with the node, which a failed
            // set_bases leaves untouched.
            let entry = self.entries.get_mut(&class).expect("entry ensured by declare");
            entry.declared.drain(0..fresh_len);
            return Err(err);
        }
        Ok(())
    }

    /// Insert each candidate where it best fits the existing declarations,
    /// rebuilding the node after every insertion (the per-candidate rebuild
    /// is what makes multi-capability calls non-transactional).
    fn add_preferring_consistency(
        &mut self,
        graph: &mut SpecGraph,
        classes: &ClassGraph,
        class: ClassId,
        capabilities: &[SpecId],
    ) -> Result<()> {
        for capability in capabilities {
            let entry = self.entries.get(&class).expect("entry ensured by declare");
            let spec = entry.spec;
            let nothing_declared = entry.declared.is_empty();

            // Already-implied candidates are a no-op, not an error. The root
            // is always implied, so it is only recorded when the class has
            // no other declarations at all.
            let implied = graph.is_or_extends(spec, *capability)?;
            let recordable_root = *capability == graph.root() && nothing_declared;
            if implied && !recordable_root {
                trace!(
                    class = %classes.describe(class),
                    capability = %graph.describe(*capability),
                    "already implied, eliding"
                );
                continue;
            }

            let more_specific = entry
                .declared
                .iter()
                .any(|declared| graph.extends(*capability, *declared, false).unwrap_or(false));
            let entry = self.entries.get_mut(&class).expect("entry ensured by declare");
            let inserted_at = if more_specific { 0 } else { entry.declared.len() };
            entry.declared.insert(inserted_at, *capability);
            if let Err(err) = self.rebuild(graph, classes, class) {
                // Earlier candidates of this call stand; only the one that
                // produced the inconsistent order is withdrawn.
                let entry = self.entries.get_mut(&class).expect("entry ensured by declare");
                entry.declared.remove(inserted_at);
                return Err(err);
            }
        }
        Ok(())
    }

    /// Recompute the class node's bases as declared capabilities followed by
    /// the inherited classes' capability nodes, and push them into the
    /// graph.
    fn rebuild(&mut self, graph: &mut SpecGraph, classes: &ClassGraph, class: ClassId) -> Result<()> {
        let (spec, declared, inherited) = {
            let entry = self.entries.get(&class).expect("rebuild of unknown class");
            (entry.spec, entry.declared.clone(), entry.inherited.clone())
        };
        let mut bases = declared;
        for superclass in inherited {
            bases.push(self.class_capabilities(graph, classes, superclass)?);
        }
        graph.set_bases(spec, &bases)?;
        Ok(())
    }

    /// The specification for "the rest of the hierarchy from `from`
    /// onward", used for cooperative-inheritance scenarios.
    ///
    /// Takes the suffix of `full`'s linearized superclass sequence starting
    /// at (and including) `from` and composes those classes' capability
    /// nodes. The suffix covers every class reachable from `from` onward,
    /// diamond ancestors included, not just `from`'s own direct chain.
    /// Results are cached per (full, from) pair.
    pub fn partial_class_capabilities(
        &mut self,
        graph: &mut SpecGraph,
        classes: &ClassGraph,
        full: ClassId,
        from: ClassId,
    ) -> Result<SpecId> {
        if let Some(spec) = self.partial.get(&(full, from)) {
            trace!(%spec, "partial-class cache hit");
            return Ok(*spec);
        }
        let linearization = classes.linearization(full)?.to_vec();
        let position = linearization.iter().position(|c| *c == from).ok_or_else(|| {
            RegistryError::NotInHierarchy {
                class: classes.describe(full),
                from: classes.describe(from),
            }
        })?;

        let suffix = &linearization[position..];
        let mut bases = Vec::with_capacity(suffix.len());
        for class in suffix {
            bases.push(self.class_capabilities(graph, classes, *class)?);
        }
        let label = format!("{}:{}", classes.name(full)?, classes.name(from)?);
        let spec = graph.create_composition(label, &bases)?;
        self.partial.insert((full, from), spec);
        Ok(spec)
    }

    /// Drop a class: free its specification node, purge partial views keyed
    /// by it, and remove it from the class table.
    ///
    /// Dependents elsewhere that still reference the freed node are caught
    /// by handle liveness on their next recomputation.
    pub fn unregister(
        &mut self,
        graph: &mut SpecGraph,
        classes: &mut ClassGraph,
        class: ClassId,
    ) -> Result<()> {
        classes.name(class)?;
        let stale: Vec<(ClassId, ClassId)> = self
            .partial
            .keys()
            .filter(|(full, from)| *full == class || *from == class)
            .copied()
            .collect();
        for key in stale {
            if let Some(spec) = self.partial.remove(&key) {
                graph.free(spec)?;
            }
        }
        if let Some(entry) = self.entries.remove(&class) {
            graph.free(entry.spec)?;
        }
        classes.unregister(class)
    }
}
