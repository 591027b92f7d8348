//! The class hierarchy table.
//!
//! The engine has no host-language class model to lean on, so classes are
//! registered entities: a name plus a fixed, ordered list of direct
//! superclasses. The C3 linearization of the hierarchy is computed once at
//! registration (superclasses never change afterwards) and reused for
//! partial-class views.

use std::fmt;

use serde::{Deserialize, Serialize};

use crest_core::linearize::merge;

use crate::error::{RegistryError, Result};

/// Generational handle to a registered class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClassId {
    index: u32,
    generation: u32,
}

impl ClassId {
    fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Slot index in the class table.
    pub fn index(&self) -> u32 {
        self.index
    }
}

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "class#{}.{}", self.index, self.generation)
    }
}

#[derive(Debug, Clone)]
struct ClassInfo {
    name: String,
    superclasses: Vec<ClassId>,
    /// C3-linearized superclass sequence, self first.
    linearization: Vec<ClassId>,
}

#[derive(Debug, Clone)]
struct Slot {
    generation: u32,
    info: Option<ClassInfo>,
}

/// Registered classes and their linearized hierarchies.
#[derive(Debug, Clone, Default)]
pub struct ClassGraph {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl ClassGraph {
    /// Create an empty class table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a class with its direct superclasses, in declaration order.
    ///
    /// The hierarchy linearization is computed here; contradictory
    /// precedence among the superclasses is reported as
    /// [`RegistryError::InconsistentHierarchy`].
    pub fn register(&mut self, name: impl Into<String>, superclasses: &[ClassId]) -> Result<ClassId> {
        let name = name.into();
        for (i, class) in superclasses.iter().enumerate() {
            if superclasses[..i].contains(class) {
                return Err(RegistryError::InconsistentHierarchy {
                    class: name,
                    candidates: vec![format!("duplicate superclass {class}")],
                });
            }
            self.info(*class)?;
        }

        let mut seqs: Vec<Vec<ClassId>> = Vec::with_capacity(superclasses.len() + 1);
        for class in superclasses {
            seqs.push(self.info(*class)?.linearization.clone());
        }
        seqs.push(superclasses.to_vec());
        let merged = merge(&seqs).map_err(|conflict| RegistryError::InconsistentHierarchy {
            class: name.clone(),
            candidates: conflict
                .candidates
                .iter()
                .map(|c| self.describe(*c))
                .collect(),
        })?;

        let id = self.next_id();
        let mut linearization = Vec::with_capacity(merged.len() + 1);
        linearization.push(id);
        linearization.extend(merged);
        self.slots[id.index as usize].info = Some(ClassInfo {
            name,
            superclasses: superclasses.to_vec(),
            linearization,
        });
        Ok(id)
    }

    /// Remove a class from the table, invalidating its handle.
    pub fn unregister(&mut self, class: ClassId) -> Result<()> {
        self.info(class)?;
        let slot = &mut self.slots[class.index as usize];
        slot.info = None;
        slot.generation += 1;
        self.free.push(class.index);
        Ok(())
    }

    /// Whether `class` refers to a live registration.
    pub fn contains(&self, class: ClassId) -> bool {
        self.info(class).is_ok()
    }

    /// Number of registered classes.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.info.is_some()).count()
    }

    /// Whether the table holds no classes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The class's registered name.
    pub fn name(&self, class: ClassId) -> Result<&str> {
        Ok(&self.info(class)?.name)
    }

    /// Direct superclasses in declaration order.
    pub fn superclasses(&self, class: ClassId) -> Result<&[ClassId]> {
        Ok(&self.info(class)?.superclasses)
    }

    /// The C3-linearized superclass sequence, starting with the class
    /// itself.
    pub fn linearization(&self, class: ClassId) -> Result<&[ClassId]> {
        Ok(&self.info(class)?.linearization)
    }

    /// Best-effort human name for diagnostics.
    pub fn describe(&self, class: ClassId) -> String {
        match self.info(class) {
            Ok(info) => info.name.clone(),
            Err(_) => class.to_string(),
        }
    }

    fn info(&self, class: ClassId) -> Result<&ClassInfo> {
        self.slots
            .get(class.index as usize)
            .filter(|slot| slot.generation == class.generation)
            .and_then(|slot| slot.info.as_ref())
            .ok_or(RegistryError::UnknownClass { class })
    }

    fn next_id(&mut self) -> ClassId {
        if let Some(index) = self.free.pop() {
            ClassId::new(index, self.slots[index as usize].generation)
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                info: None,
            });
            ClassId::new(index, 0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lone_class_linearizes_to_itself() {
        let mut classes = ClassGraph::new();
        let a = classes.register("A", &[]).unwrap();
        assert_eq!(classes.linearization(a).unwrap(), &[a]);
        assert_eq!(classes.name(a).unwrap(), "A");
    }

    #[test]
    fn chain_linearizes_bottom_up() {
        let mut classes = ClassGraph::new();
        let a = classes.register("A", &[]).unwrap();
        let b = classes.register("B", &[a]).unwrap();
        let c = classes.register("C", &[b]).unwrap();
        assert_eq!(classes.linearization(c).unwrap(), &[c, b, a]);
    }

    #[test]
    fn diamond_linearizes_consistently() {
        let mut classes = ClassGraph::new();
        let a = classes.register("A", &[]).unwrap();
        let b = classes.register("B", &[a]).unwrap();
        let c = classes.register("C", &[a]).unwrap();
        let d = classes.register("D", &[b, c]).unwrap();
        assert_eq!(classes.linearization(d).unwrap(), &[d, b, c, a]);
    }

    #[test]
    fn contradictory_hierarchy_is_reported() {
        let mut classes = ClassGraph::new();
        let x = classes.register("X", &[]).unwrap();
        let y = classes.register("Y", &[]).unwrap();
        let a = classes.register("A", &[x, y]).unwrap();
        let b = classes.register("B", &[y, x]).unwrap();
        let err = classes.register("C", &[a, b]).unwrap_err();
        assert!(matches!(err, RegistryError::InconsistentHierarchy { .. }));
    }

    #[test]
    fn unregistered_class_goes_stale() {
        let mut classes = ClassGraph::new();
        let a = classes.register("A", &[]).unwrap();
        classes.unregister(a).unwrap();
        assert!(matches!(
            classes.name(a),
            Err(RegistryError::UnknownClass { .. })
        ));

        // Slot reuse must not resurrect the old handle.
        let b = classes.register("B", &[]).unwrap();
        assert_eq!(a.index(), b.index());
        assert!(classes.name(a).is_err());
        assert_eq!(classes.name(b).unwrap(), "B");
    }

    #[test]
    fn duplicate_superclass_rejected() {
        let mut classes = ClassGraph::new();
        let a = classes.register("A", &[]).unwrap();
        assert!(classes.register("B", &[a, a]).is_err());
    }
}
