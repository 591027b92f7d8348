//! Capability-set definitions and per-capability payload data.
//!
//! A capability set is the atomic "interface" unit: a named, immutable node
//! declaring the attributes an implementor is expected to provide. Attribute
//! descriptors and tagged values are opaque [`serde_json::Value`] payloads;
//! the declarative front-end that produces them lives outside this engine.

use std::collections::HashMap;

use serde_json::Value;

use crate::handle::SpecId;

/// Custom adapt hook: given an opaque object payload and whether the object's
/// specification already implies the capability, produce the adapted payload.
pub type AdaptFn = fn(payload: &Value, provides: bool) -> Option<Value>;

/// How a capability set adapts arbitrary objects.
///
/// The set of hook kinds is small and closed, so this is a tagged union
/// rather than a trait object.
#[derive(Debug, Clone, Copy, Default)]
pub enum AdaptPolicy {
    /// Return the payload unchanged iff the object provides the capability.
    #[default]
    Default,
    /// Delegate to a caller-supplied hook.
    Custom(AdaptFn),
}

/// Definition of a capability set, consumed by
/// [`SpecGraph::create_capability`].
///
/// [`SpecGraph::create_capability`]: crate::graph::SpecGraph::create_capability
#[derive(Debug, Clone)]
pub struct CapabilityDef {
    /// Capability name, unique within its declaring module by convention.
    pub name: String,
    /// Declaring module; (name, module) is the capability's identity.
    pub module: String,
    /// Ordered direct bases. Empty means "extends the root only".
    pub bases: Vec<SpecId>,
    /// Attribute name → opaque descriptor payload.
    pub attributes: HashMap<String, Value>,
    /// Tagged values: arbitrary metadata, inherited nearest-wins.
    pub tagged_values: HashMap<String, Value>,
    /// Adapt hook.
    pub adapt: AdaptPolicy,
}

impl CapabilityDef {
    /// Start a definition with the given identity and no bases.
    pub fn new(name: impl Into<String>, module: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            module: module.into(),
            bases: Vec::new(),
            attributes: HashMap::new(),
            tagged_values: HashMap::new(),
            adapt: AdaptPolicy::Default,
        }
    }

    /// Append a direct base.
    pub fn with_base(mut self, base: SpecId) -> Self {
        self.bases.push(base);
        self
    }

    /// Append several direct bases in order.
    pub fn with_bases(mut self, bases: impl IntoIterator<Item = SpecId>) -> Self {
        self.bases.extend(bases);
        self
    }

    /// Declare an attribute with an opaque descriptor payload.
    pub fn with_attribute(mut self, name: impl Into<String>, descriptor: Value) -> Self {
        self.attributes.insert(name.into(), descriptor);
        self
    }

    /// Attach a tagged value.
    pub fn with_tagged_value(mut self, key: impl Into<String>, value: Value) -> Self {
        self.tagged_values.insert(key.into(), value);
        self
    }

    /// Install a custom adapt hook.
    pub fn with_adapt(mut self, hook: AdaptFn) -> Self {
        self.adapt = AdaptPolicy::Custom(hook);
        self
    }
}

/// Payload carried by capability-set nodes (plain composition nodes have
/// none). Immutable once the node is constructed.
#[derive(Debug, Clone)]
pub(crate) struct CapabilityData {
    pub(crate) name: String,
    pub(crate) module: String,
    pub(crate) attributes: HashMap<String, Value>,
    pub(crate) tagged_values: HashMap<String, Value>,
    pub(crate) adapt: AdaptPolicy,
}

impl CapabilityData {
    pub(crate) fn from_def(def: &CapabilityDef) -> Self {
        Self {
            name: def.name.clone(),
            module: def.module.clone(),
            attributes: def.attributes.clone(),
            tagged_values: def.tagged_values.clone(),
            adapt: def.adapt,
        }
    }

    /// Identity for ordering and equality: (name, declaring module).
    pub(crate) fn identity(&self) -> (&str, &str) {
        (&self.name, &self.module)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builder_accumulates_fields() {
        let def = CapabilityDef::new("IReader", "app.io")
            .with_attribute("read", json!({"kind": "method", "args": 1}))
            .with_tagged_value("doc", json!("readable things"));

        assert_eq!(def.name, "IReader");
        assert_eq!(def.module, "app.io");
        assert!(def.bases.is_empty());
        assert_eq!(def.attributes["read"]["kind"], json!("method"));
        assert_eq!(def.tagged_values["doc"], json!("readable things"));
    }

    #[test]
    fn identity_is_name_and_module() {
        let data = CapabilityData::from_def(&CapabilityDef::new("X", "m"));
        assert_eq!(data.identity(), ("X", "m"));
    }
}
