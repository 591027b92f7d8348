//! The capability engine: one object owning all process-wide state.
//!
//! [`CapabilityEngine`] composes the specification graph, the class table,
//! the per-class capability registry, the object table, and the
//! instance-override cache, and exposes the whole declaration/query surface
//! as inherent methods. There is no hidden global state; the conventional
//! deployment is a single engine per process, shared (behind an external
//! lock, if threads are involved) by everything that declares or queries
//! capabilities.
//!
//! All mutation is synchronous: a declaration call returns only after every
//! affected cached resolution order has been recomputed. Pure queries
//! (`is_or_extends`, `extends`, `tagged_value`) take `&self` and are safe
//! to issue concurrently as long as no mutation is in flight; lookups that
//! may populate a cache on first use (`implemented_by`, `provided_by`,
//! `attribute_descriptor`) take `&mut self`.

use serde_json::Value;
use tracing::debug;

use crest_core::{CapabilityDef, SpecGraph, SpecId};

use crate::class::{ClassGraph, ClassId};
use crate::error::{RegistryError, Result};
use crate::overrides::{ObjectId, ObjectTable, OverrideCache};
use crate::registry::{CapabilityRegistry, DeclarationMode};

/// Owner of the specification graph and every registry built over it.
#[derive(Debug, Default)]
pub struct CapabilityEngine {
    graph: SpecGraph,
    classes: ClassGraph,
    registry: CapabilityRegistry,
    objects: ObjectTable,
    overrides: OverrideCache,
}

impl CapabilityEngine {
    /// Create an engine holding only the root capability set.
    pub fn new() -> Self {
        Self {
            graph: SpecGraph::new(),
            classes: ClassGraph::new(),
            registry: CapabilityRegistry::new(),
            objects: ObjectTable::new(),
            overrides: OverrideCache::new(),
        }
    }

    /// The underlying specification graph.
    pub fn graph(&self) -> &SpecGraph {
        &self.graph
    }

    /// Mutable access to the underlying graph, for callers composing plain
    /// specification nodes by hand.
    pub fn graph_mut(&mut self) -> &mut SpecGraph {
        &mut self.graph
    }

    /// The class table.
    pub fn classes(&self) -> &ClassGraph {
        &self.classes
    }

    /// The root capability set.
    pub fn root(&self) -> SpecId {
        self.graph.root()
    }

    // --- Capability sets ---

    /// Construct an immutable capability set.
    pub fn create_capability(&mut self, def: CapabilityDef) -> Result<SpecId> {
        Ok(self.graph.create_capability(def)?)
    }

    /// `b ∈ implied(a)`, optionally excluding `a == b`.
    pub fn extends(&self, a: SpecId, b: SpecId, strict: bool) -> Result<bool> {
        Ok(self.graph.extends(a, b, strict)?)
    }

    /// Membership test against a specification's implied set.
    pub fn is_or_extends(&self, spec: SpecId, capability: SpecId) -> Result<bool> {
        Ok(self.graph.is_or_extends(spec, capability)?)
    }

    /// Attribute descriptor lookup along a capability set's resolution
    /// order, memoized per node per name.
    pub fn attribute_descriptor(&mut self, spec: SpecId, name: &str) -> Result<Option<Value>> {
        Ok(self.graph.resolve_attribute(spec, name)?)
    }

    /// Tagged-value lookup along the resolution order, nearest wins.
    pub fn tagged_value(&self, spec: SpecId, key: &str) -> Result<Option<&Value>> {
        Ok(self.graph.tagged_value(spec, key)?)
    }

    // --- Classes ---

    /// Register a class with its direct superclasses.
    pub fn register_class(&mut self, name: impl Into<String>, superclasses: &[ClassId]) -> Result<ClassId> {
        self.classes.register(name, superclasses)
    }

    /// Unregister a class, freeing its capability node and partial views.
    ///
    /// Objects of the class (and subclass entries) that survive it will
    /// report stale-handle errors on their next use; release them first.
    pub fn unregister_class(&mut self, class: ClassId) -> Result<()> {
        self.registry
            .unregister(&mut self.graph, &mut self.classes, class)
    }

    /// The C3-linearized superclass sequence of a class, itself first.
    pub fn class_linearization(&self, class: ClassId) -> Result<&[ClassId]> {
        self.classes.linearization(class)
    }

    /// The specification implemented by instances of `class`.
    pub fn implemented_by(&mut self, class: ClassId) -> Result<SpecId> {
        self.registry
            .class_capabilities(&mut self.graph, &self.classes, class)
    }

    /// Mutate a class's declared capabilities.
    pub fn declare_capabilities(
        &mut self,
        class: ClassId,
        capabilities: &[SpecId],
        mode: DeclarationMode,
    ) -> Result<()> {
        self.registry
            .declare(&mut self.graph, &self.classes, class, capabilities, mode)
    }

    /// Replace a class's declarations entirely, severing inherited linkage.
    pub fn declare_capabilities_exclusive(
        &mut self,
        class: ClassId,
        capabilities: &[SpecId],
    ) -> Result<()> {
        self.declare_capabilities(class, capabilities, DeclarationMode::ReplaceAll)
    }

    /// Replace a class's declarations but keep the listed classes'
    /// capability nodes reachable.
    pub fn declare_capabilities_exclusive_retaining(
        &mut self,
        class: ClassId,
        capabilities: &[SpecId],
        retained: &[ClassId],
    ) -> Result<()> {
        self.registry.declare_exclusive_retaining(
            &mut self.graph,
            &self.classes,
            class,
            capabilities,
            retained,
        )
    }

    /// Cooperative-inheritance view: the capabilities of `full`'s hierarchy
    /// from `from` onward.
    pub fn partial_class_capabilities(&mut self, full: ClassId, from: ClassId) -> Result<SpecId> {
        self.registry
            .partial_class_capabilities(&mut self.graph, &self.classes, full, from)
    }

    // --- Objects ---

    /// Register an object of the given class.
    pub fn register_object(&mut self, class: ClassId) -> Result<ObjectId> {
        self.classes.name(class)?;
        Ok(self.objects.register(class))
    }

    /// Release an object, dropping its override association. The shared
    /// override node survives while other objects still reference the same
    /// tuple and is evicted with the last of them.
    pub fn release_object(&mut self, object: ObjectId) -> Result<()> {
        let info = self.objects.release(object)?;
        if let Some(key) = info.override_key {
            self.overrides.release(&mut self.graph, &key)?;
        }
        Ok(())
    }

    /// Declare the capabilities an object directly provides beyond its
    /// class.
    ///
    /// Objects whose override tuple is structurally identical share one
    /// cached specification node. Declaring an empty list drops the
    /// object's override entirely.
    pub fn declare_override(&mut self, object: ObjectId, capabilities: &[SpecId]) -> Result<()> {
        let class = self.objects.class_of(object)?;
        let mut extras: Vec<SpecId> = Vec::new();
        for capability in capabilities {
            if !self.graph.is_capability(*capability).unwrap_or(false) {
                return Err(crest_core::SpecError::InvalidComposition {
                    detail: format!(
                        "{} is not a constructed capability set",
                        self.graph.describe(*capability)
                    ),
                }
                .into());
            }
            if !extras.contains(capability) {
                extras.push(*capability);
            }
        }
        debug!(%object, count = extras.len(), "declaring instance override");

        let new_key = if extras.is_empty() {
            None
        } else {
            let class_spec = self.implemented_by(class)?;
            self.overrides
                .acquire(&mut self.graph, &extras, class_spec)?;
            let mut key = extras;
            key.push(class_spec);
            Some(key)
        };

        // Acquire-before-release keeps a shared entry alive when the object
        // redeclares the tuple it already has.
        let old_key = self.objects.replace_key(object, new_key)?;
        if let Some(key) = old_key {
            self.overrides.release(&mut self.graph, &key)?;
        }
        Ok(())
    }

    /// Withdraw one directly-provided capability from an object.
    ///
    /// Fails with [`RegistryError::CapabilityStillImplied`] when the
    /// capability would still be implied afterwards (it is also granted
    /// through the class or another listed capability), since that call
    /// cannot have the effect the caller intended.
    pub fn remove_override(&mut self, object: ObjectId, capability: SpecId) -> Result<()> {
        let class = self.objects.class_of(object)?;
        let class_spec = self.implemented_by(class)?;
        let old_key = self.objects.override_key(object)?.cloned();
        let old_extras: Vec<SpecId> = match &old_key {
            Some(key) => key[..key.len() - 1].to_vec(),
            None => Vec::new(),
        };
        let new_extras: Vec<SpecId> = old_extras
            .iter()
            .copied()
            .filter(|extra| *extra != capability)
            .collect();

        let new_key = if new_extras.is_empty() {
            if self.graph.is_or_extends(class_spec, capability)? {
                return Err(RegistryError::CapabilityStillImplied {
                    capability: self.graph.describe(capability),
                });
            }
            None
        } else {
            let spec = self
                .overrides
                .acquire(&mut self.graph, &new_extras, class_spec)?;
            let mut key = new_extras;
            key.push(class_spec);
            if self.graph.is_or_extends(spec, capability)? {
                self.overrides.release(&mut self.graph, &key)?;
                return Err(RegistryError::CapabilityStillImplied {
                    capability: self.graph.describe(capability),
                });
            }
            Some(key)
        };

        let old_key = self.objects.replace_key(object, new_key)?;
        if let Some(key) = old_key {
            self.overrides.release(&mut self.graph, &key)?;
        }
        Ok(())
    }

    /// The specification currently in effect for an object: its own
    /// override when it has one, the class's specification otherwise.
    pub fn provided_by(&mut self, object: ObjectId) -> Result<SpecId> {
        let class = self.objects.class_of(object)?;
        let class_spec = self.implemented_by(class)?;
        match self.objects.override_key(object)? {
            Some(key) => {
                // An override that is merely an alias of the class-level
                // node counts as no override at all.
                let spec = self.overrides.spec_for(key).unwrap_or(class_spec);
                Ok(if spec == class_spec { class_spec } else { spec })
            }
            None => Ok(class_spec),
        }
    }

    /// Only what the object added beyond its class: a specification over
    /// the extra capabilities alone.
    pub fn direct_overrides(&mut self, object: ObjectId) -> Result<SpecId> {
        match self.objects.override_key(object)?.cloned() {
            Some(key) => self
                .overrides
                .direct_for(&key)
                .ok_or(RegistryError::UnknownObject { object }),
            None => self.overrides.empty_direct(&mut self.graph),
        }
    }

    /// Adapt an opaque object payload to a capability set, honoring the
    /// set's adapt policy against the object's effective specification.
    pub fn adapt(&mut self, capability: SpecId, object: ObjectId, payload: &Value) -> Result<Option<Value>> {
        let provided = self.provided_by(object)?;
        Ok(self.graph.adapt(capability, provided, payload)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cap(engine: &mut CapabilityEngine, name: &str) -> SpecId {
        engine
            .create_capability(CapabilityDef::new(name, "test"))
            .unwrap()
    }

    #[test]
    fn override_layers_over_class_capabilities() {
        let mut engine = CapabilityEngine::new();
        let root = engine.root();
        let x = cap(&mut engine, "X");
        let z = cap(&mut engine, "Z");
        let class = engine.register_class("C", &[]).unwrap();
        engine
            .declare_capabilities(class, &[x], DeclarationMode::default())
            .unwrap();
        let object = engine.register_object(class).unwrap();

        engine.declare_override(object, &[z]).unwrap();
        let provided = engine.provided_by(object).unwrap();
        assert_eq!(
            engine.graph().resolution_order(provided).unwrap(),
            &[z, x, root]
        );
        assert!(engine.is_or_extends(provided, z).unwrap());
        assert!(engine.is_or_extends(provided, x).unwrap());
    }

    #[test]
    fn override_declare_remove_round_trip() {
        let mut engine = CapabilityEngine::new();
        let root = engine.root();
        let z = cap(&mut engine, "Z");
        let class = engine.register_class("ClassA", &[]).unwrap();
        let object = engine.register_object(class).unwrap();

        engine.declare_override(object, &[z]).unwrap();
        let provided = engine.provided_by(object).unwrap();
        assert_eq!(engine.graph().resolution_order(provided).unwrap(), &[z, root]);

        engine.remove_override(object, z).unwrap();
        let class_spec = engine.implemented_by(class).unwrap();
        assert_eq!(engine.provided_by(object).unwrap(), class_spec);
    }

    #[test]
    fn identical_override_tuples_share_a_node() {
        let mut engine = CapabilityEngine::new();
        let z = cap(&mut engine, "Z");
        let class = engine.register_class("C", &[]).unwrap();
        let first = engine.register_object(class).unwrap();
        let second = engine.register_object(class).unwrap();

        engine.declare_override(first, &[z]).unwrap();
        engine.declare_override(second, &[z]).unwrap();
        let spec_first = engine.provided_by(first).unwrap();
        let spec_second = engine.provided_by(second).unwrap();
        assert_eq!(spec_first, spec_second);

        // The shared node survives the first object and dies with the last.
        engine.release_object(first).unwrap();
        assert!(engine.graph().contains(spec_second));
        engine.release_object(second).unwrap();
        assert!(!engine.graph().contains(spec_second));
    }

    #[test]
    fn remove_override_rejects_class_granted_capability() {
        let mut engine = CapabilityEngine::new();
        let x = cap(&mut engine, "X");
        let class = engine.register_class("C", &[]).unwrap();
        engine
            .declare_capabilities(class, &[x], DeclarationMode::default())
            .unwrap();
        let object = engine.register_object(class).unwrap();

        let err = engine.remove_override(object, x).unwrap_err();
        assert!(matches!(err, RegistryError::CapabilityStillImplied { .. }));
    }

    #[test]
    fn remove_override_rejects_capability_granted_through_another() {
        let mut engine = CapabilityEngine::new();
        let base = cap(&mut engine, "IBase");
        let derived = engine
            .create_capability(CapabilityDef::new("IDerived", "test").with_base(base))
            .unwrap();
        let class = engine.register_class("C", &[]).unwrap();
        let object = engine.register_object(class).unwrap();

        engine.declare_override(object, &[derived, base]).unwrap();
        // Removing `base` alone cannot succeed: `derived` still implies it.
        let err = engine.remove_override(object, base).unwrap_err();
        assert!(matches!(err, RegistryError::CapabilityStillImplied { .. }));

        // The object's override is unchanged by the failed call.
        let provided = engine.provided_by(object).unwrap();
        assert!(engine.is_or_extends(provided, base).unwrap());
        assert!(engine.is_or_extends(provided, derived).unwrap());
    }

    #[test]
    fn removing_a_never_provided_capability_is_a_noop() {
        let mut engine = CapabilityEngine::new();
        let z = cap(&mut engine, "Z");
        let class = engine.register_class("C", &[]).unwrap();
        let object = engine.register_object(class).unwrap();

        engine.remove_override(object, z).unwrap();
        let class_spec = engine.implemented_by(class).unwrap();
        assert_eq!(engine.provided_by(object).unwrap(), class_spec);
    }

    #[test]
    fn direct_overrides_exclude_class_capabilities() {
        let mut engine = CapabilityEngine::new();
        let root = engine.root();
        let x = cap(&mut engine, "X");
        let z = cap(&mut engine, "Z");
        let class = engine.register_class("C", &[]).unwrap();
        engine
            .declare_capabilities(class, &[x], DeclarationMode::default())
            .unwrap();
        let object = engine.register_object(class).unwrap();
        engine.declare_override(object, &[z]).unwrap();

        let direct = engine.direct_overrides(object).unwrap();
        assert_eq!(engine.graph().resolution_order(direct).unwrap(), &[z, root]);
        assert!(!engine.is_or_extends(direct, x).unwrap());

        // Without an override, the direct view is empty.
        let plain = engine.register_object(class).unwrap();
        let empty = engine.direct_overrides(plain).unwrap();
        assert_eq!(engine.graph().resolution_order(empty).unwrap(), &[root]);
    }

    #[test]
    fn class_declarations_reach_overridden_objects() {
        let mut engine = CapabilityEngine::new();
        let y = cap(&mut engine, "Y");
        let z = cap(&mut engine, "Z");
        let class = engine.register_class("C", &[]).unwrap();
        let object = engine.register_object(class).unwrap();
        engine.declare_override(object, &[z]).unwrap();

        let provided = engine.provided_by(object).unwrap();
        assert!(!engine.is_or_extends(provided, y).unwrap());

        // Declaring on the class invalidates the shared override node too.
        engine
            .declare_capabilities(class, &[y], DeclarationMode::default())
            .unwrap();
        assert!(engine.is_or_extends(provided, y).unwrap());
    }

    #[test]
    fn adapt_consults_the_effective_specification() {
        let mut engine = CapabilityEngine::new();
        let z = cap(&mut engine, "Z");
        let class = engine.register_class("C", &[]).unwrap();
        let object = engine.register_object(class).unwrap();

        let payload = serde_json::json!({"id": 42});
        assert_eq!(engine.adapt(z, object, &payload).unwrap(), None);
        engine.declare_override(object, &[z]).unwrap();
        assert_eq!(engine.adapt(z, object, &payload).unwrap(), Some(payload));
    }

    #[test]
    fn queries_on_released_objects_fail() {
        let mut engine = CapabilityEngine::new();
        let class = engine.register_class("C", &[]).unwrap();
        let object = engine.register_object(class).unwrap();
        engine.release_object(object).unwrap();
        assert!(matches!(
            engine.provided_by(object),
            Err(RegistryError::UnknownObject { .. })
        ));
    }
}
