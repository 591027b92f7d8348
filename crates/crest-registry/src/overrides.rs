//! Per-object capability overrides.
//!
//! An object may directly provide capabilities beyond what its class
//! implements. The override specification for an object is a composition
//! node whose bases are the extra capabilities followed by the class's
//! capabilities node. Distinct objects with structurally identical override
//! tuples share one cached node; an entry is reference-counted and lives
//! exactly as long as some object still references that exact tuple.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crest_core::{SpecGraph, SpecId};

use crate::class::ClassId;
use crate::error::{RegistryError, Result};

/// Generational handle to a registered object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId {
    index: u32,
    generation: u32,
}

impl ObjectId {
    fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Slot index in the object table.
    pub fn index(&self) -> u32 {
        self.index
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "object#{}.{}", self.index, self.generation)
    }
}

/// Association record for one object.
#[derive(Debug, Clone)]
pub(crate) struct ObjectInfo {
    pub(crate) class: ClassId,
    /// Full override-cache key (extras + class node), present only while
    /// the object carries an override.
    pub(crate) override_key: Option<Vec<SpecId>>,
}

#[derive(Debug, Clone)]
struct Slot {
    generation: u32,
    info: Option<ObjectInfo>,
}

/// Side table associating objects with their class and override tuple.
#[derive(Debug, Clone, Default)]
pub struct ObjectTable {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl ObjectTable {
    /// Create an empty object table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an object of the given class.
    pub fn register(&mut self, class: ClassId) -> ObjectId {
        let info = ObjectInfo {
            class,
            override_key: None,
        };
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.info = Some(info);
            ObjectId::new(index, slot.generation)
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                info: Some(info),
            });
            ObjectId::new(index, 0)
        }
    }

    /// Whether `object` refers to a live registration.
    pub fn contains(&self, object: ObjectId) -> bool {
        self.info(object).is_ok()
    }

    /// Number of live objects.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.info.is_some()).count()
    }

    /// Whether the table holds no objects.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The object's class.
    pub fn class_of(&self, object: ObjectId) -> Result<ClassId> {
        Ok(self.info(object)?.class)
    }

    /// The object's current override-cache key, if any.
    pub(crate) fn override_key(&self, object: ObjectId) -> Result<Option<&Vec<SpecId>>> {
        Ok(self.info(object)?.override_key.as_ref())
    }

    /// Swap in a new override key, returning the previous one.
    pub(crate) fn replace_key(
        &mut self,
        object: ObjectId,
        key: Option<Vec<SpecId>>,
    ) -> Result<Option<Vec<SpecId>>> {
        let info = self.info_mut(object)?;
        Ok(std::mem::replace(&mut info.override_key, key))
    }

    /// Drop an object, invalidating its handle and returning its final
    /// association record so the override cache can be released.
    pub(crate) fn release(&mut self, object: ObjectId) -> Result<ObjectInfo> {
        self.info(object)?;
        let slot = &mut self.slots[object.index as usize];
        let info = slot.info.take().expect("liveness just checked");
        slot.generation += 1;
        self.free.push(object.index);
        Ok(info)
    }

    fn info(&self, object: ObjectId) -> Result<&ObjectInfo> {
        self.slots
            .get(object.index as usize)
            .filter(|slot| slot.generation == object.generation)
            .and_then(|slot| slot.info.as_ref())
            .ok_or(RegistryError::UnknownObject { object })
    }

    fn info_mut(&mut self, object: ObjectId) -> Result<&mut ObjectInfo> {
        self.slots
            .get_mut(object.index as usize)
            .filter(|slot| slot.generation == object.generation)
            .and_then(|slot| slot.info.as_mut())
            .ok_or(RegistryError::UnknownObject { object })
    }
}

#[derive(Debug, Clone)]
struct OverrideEntry {
    /// The shared override node: bases = extras + class node.
    spec: SpecId,
    /// Sibling node listing only the extras.
    direct: SpecId,
    /// Live objects referencing exactly this tuple.
    refs: usize,
}

/// Value-keyed cache of shared override specifications.
#[derive(Debug, Clone, Default)]
pub struct OverrideCache {
    entries: HashMap<Vec<SpecId>, OverrideEntry>,
    /// Shared "no extras" node handed out by `direct_for` for objects
    /// without an override.
    empty_direct: Option<SpecId>,
}

impl OverrideCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct override tuples currently cached.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no override tuples are cached.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get or create the shared node for an override tuple, taking one
    /// reference on it. The key is `extras + [class node]`, the tuple's
    /// exact structural identity.
    pub(crate) fn acquire(
        &mut self,
        graph: &mut SpecGraph,
        extras: &[SpecId],
        class_spec: SpecId,
    ) -> Result<SpecId> {
        let mut key = extras.to_vec();
        key.push(class_spec);
        if let Some(entry) = self.entries.get_mut(&key) {
            entry.refs += 1;
            trace!(spec = %entry.spec, refs = entry.refs, "override cache hit");
            return Ok(entry.spec);
        }

        let mut names = Vec::with_capacity(extras.len());
        for extra in extras {
            names.push(graph.label(*extra)?.to_string());
        }
        let joined = names.join("+");
        let spec = graph.create_composition(format!("InstanceOverride({joined})"), &key)?;
        let direct = match graph.create_composition(format!("DirectOverrides({joined})"), extras) {
            Ok(direct) => direct,
            Err(err) => {
                graph.free(spec)?;
                return Err(err.into());
            }
        };
        trace!(%spec, %direct, "override cache miss, built shared nodes");
        self.entries.insert(
            key,
            OverrideEntry {
                spec,
                direct,
                refs: 1,
            },
        );
        Ok(spec)
    }

    /// Release one reference on a tuple's entry, freeing its nodes when the
    /// last referencing object is gone.
    pub(crate) fn release(&mut self, graph: &mut SpecGraph, key: &[SpecId]) -> Result<()> {
        let Some(entry) = self.entries.get_mut(key) else {
            // A dangling key means the entry was already evicted; nothing
            // left to do.
            return Ok(());
        };
        entry.refs -= 1;
        if entry.refs == 0 {
            let entry = self.entries.remove(key).expect("entry just looked up");
            trace!(spec = %entry.spec, "override tuple unreferenced, evicting");
            graph.free(entry.direct)?;
            graph.free(entry.spec)?;
        }
        Ok(())
    }

    /// The shared override node for a key, if cached.
    pub(crate) fn spec_for(&self, key: &[SpecId]) -> Option<SpecId> {
        self.entries.get(key).map(|entry| entry.spec)
    }

    /// The direct-overrides sibling for a key, if cached.
    pub(crate) fn direct_for(&self, key: &[SpecId]) -> Option<SpecId> {
        self.entries.get(key).map(|entry| entry.direct)
    }

    /// The shared empty direct-overrides node (resolution order `[Any]`),
    /// built on first use.
    pub(crate) fn empty_direct(&mut self, graph: &mut SpecGraph) -> Result<SpecId> {
        if let Some(spec) = self.empty_direct {
            if graph.contains(spec) {
                return Ok(spec);
            }
        }
        let spec = graph.create_composition("DirectOverrides()", &[])?;
        self.empty_direct = Some(spec);
        Ok(spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::ClassGraph;
    use crest_core::CapabilityDef;

    #[test]
    fn object_slots_recycle_with_fresh_generations() {
        let mut classes = ClassGraph::new();
        let class = classes.register("C", &[]).unwrap();
        let mut objects = ObjectTable::new();

        let first = objects.register(class);
        objects.release(first).unwrap();
        let second = objects.register(class);
        assert_eq!(first.index(), second.index());
        assert_ne!(first, second);
        assert!(!objects.contains(first));
        assert!(objects.contains(second));
    }

    #[test]
    fn identical_tuples_share_one_entry() {
        let mut graph = SpecGraph::new();
        let x = graph
            .create_capability(CapabilityDef::new("X", "test"))
            .unwrap();
        let class_spec = graph.create_composition("class", &[]).unwrap();
        let mut cache = OverrideCache::new();

        let a = cache.acquire(&mut graph, &[x], class_spec).unwrap();
        let b = cache.acquire(&mut graph, &[x], class_spec).unwrap();
        assert_eq!(a, b);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn entry_evicted_when_last_reference_released() {
        let mut graph = SpecGraph::new();
        let x = graph
            .create_capability(CapabilityDef::new("X", "test"))
            .unwrap();
        let class_spec = graph.create_composition("class", &[]).unwrap();
        let mut cache = OverrideCache::new();

        let spec = cache.acquire(&mut graph, &[x], class_spec).unwrap();
        cache.acquire(&mut graph, &[x], class_spec).unwrap();

        let mut key = vec![x];
        key.push(class_spec);
        cache.release(&mut graph, &key).unwrap();
        assert!(graph.contains(spec));
        cache.release(&mut graph, &key).unwrap();
        assert!(!graph.contains(spec));
        assert!(cache.is_empty());
        // The extra capability and the class node are untouched.
        assert!(graph.contains(x));
        assert!(graph.contains(class_spec));
    }

    #[test]
    fn distinct_tuples_get_distinct_entries() {
        let mut graph = SpecGraph::new();
        let x = graph
            .create_capability(CapabilityDef::new("X", "test"))
            .unwrap();
        let y = graph
            .create_capability(CapabilityDef::new("Y", "test"))
            .unwrap();
        let class_spec = graph.create_composition("class", &[]).unwrap();
        let mut cache = OverrideCache::new();

        let a = cache.acquire(&mut graph, &[x], class_spec).unwrap();
        let b = cache.acquire(&mut graph, &[x, y], class_spec).unwrap();
        assert_ne!(a, b);
        assert_eq!(cache.len(), 2);
    }
}
