//! The specification graph: node arena, dependents, and cached resolution
//! state.
//!
//! Every composition node (capability set, class specification, or instance
//! override) lives in one [`SpecGraph`]. Nodes are addressed by generational
//! [`SpecId`] handles; resolution orders and implied sets are recomputed
//! eagerly on every structural change and propagated to dependents before
//! the mutating call returns.

use std::collections::{HashMap, HashSet};

use serde_json::Value;
use tracing::{debug, trace};

use crate::capability::{AdaptPolicy, CapabilityData, CapabilityDef};
use crate::error::{Result, SpecError};
use crate::handle::SpecId;
use crate::linearize::{merge, pin_last};

/// What a node is: a plain mutable composition, or an immutable capability
/// set carrying attribute and tagged-value payloads.
#[derive(Debug, Clone)]
enum NodeKind {
    Composition,
    Capability(CapabilityData),
}

#[derive(Debug, Clone)]
struct SpecNode {
    /// Display name; the capability name for capability sets.
    label: String,
    kind: NodeKind,
    /// Ordered direct bases.
    bases: Vec<SpecId>,
    /// Cached resolution order: capability sets only, most specific first,
    /// root last.
    order: Vec<SpecId>,
    /// Fast-membership form of `order`.
    implied: HashSet<SpecId>,
    /// Memoized attribute lookups, including misses. Cleared on `changed`.
    attr_cache: HashMap<String, Option<Value>>,
    /// Multiset of nodes listing this node as a base. Used for invalidation
    /// fan-out only, never traversed for ownership.
    dependents: HashMap<SpecId, usize>,
}

#[derive(Debug, Clone)]
struct Slot {
    generation: u32,
    node: Option<SpecNode>,
}

/// Arena of specification nodes plus the one root capability set.
///
/// All structural mutation is synchronous: `set_bases`, `changed`, and the
/// constructors finish every recomputation and dependent notification before
/// returning. Mutating the same graph from several threads is unsupported;
/// wrap the graph in an external lock if that is needed. Read-only queries
/// on a graph that is not concurrently mutated are safe to share.
#[derive(Debug, Clone)]
pub struct SpecGraph {
    slots: Vec<Slot>,
    free: Vec<u32>,
    root: SpecId,
}

impl SpecGraph {
    /// Create a graph containing only the root capability set (`Any`).
    pub fn new() -> Self {
        let root = SpecId::new(0, 0);
        let data = CapabilityData::from_def(&CapabilityDef::new("Any", "crest.core"));
        let node = SpecNode {
            label: "Any".to_string(),
            kind: NodeKind::Capability(data),
            bases: Vec::new(),
            order: vec![root],
            implied: HashSet::from([root]),
            attr_cache: HashMap::new(),
            dependents: HashMap::new(),
        };
        Self {
            slots: vec![Slot {
                generation: 0,
                node: Some(node),
            }],
            free: Vec::new(),
            root,
        }
    }

    /// The root capability set, last in every resolution order.
    pub fn root(&self) -> SpecId {
        self.root
    }

    /// Whether `id` refers to a live node.
    pub fn contains(&self, id: SpecId) -> bool {
        self.node(id).is_ok()
    }

    /// Number of live nodes (including the root).
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.node.is_some()).count()
    }

    /// Whether the graph holds no live nodes. Never true in practice: the
    /// root is created with the graph and cannot be freed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate over all live node handles.
    pub fn ids(&self) -> impl Iterator<Item = SpecId> + '_ {
        self.slots.iter().enumerate().filter_map(|(i, s)| {
            s.node
                .as_ref()
                .map(|_| SpecId::new(i as u32, s.generation))
        })
    }

    // --- Construction ---

    /// Construct an immutable capability set from a definition.
    ///
    /// Every base must be a live capability set (cycles are impossible by
    /// construction: a capability set can only extend previously built
    /// ones). An empty bases list means the set extends the root directly.
    /// The resolution order is computed and frozen before this returns, and
    /// the new node is subscribed to each base's dependents multiset.
    pub fn create_capability(&mut self, def: CapabilityDef) -> Result<SpecId> {
        let bases = if def.bases.is_empty() {
            vec![self.root]
        } else {
            def.bases.clone()
        };
        for (i, base) in bases.iter().enumerate() {
            if bases[..i].contains(base) {
                return Err(SpecError::InvalidComposition {
                    detail: format!("duplicate base {base} in capability set '{}'", def.name),
                });
            }
            let live_capability = self.is_capability(*base).unwrap_or(false);
            if !live_capability {
                return Err(SpecError::InvalidComposition {
                    detail: format!(
                        "base {base} of capability set '{}' is not a constructed capability set",
                        def.name
                    ),
                });
            }
        }

        let label = def.name.clone();
        let data = CapabilityData::from_def(&def);
        let id = self.alloc(SpecNode {
            label,
            kind: NodeKind::Capability(data),
            bases: bases.clone(),
            order: Vec::new(),
            implied: HashSet::new(),
            attr_cache: HashMap::new(),
            dependents: HashMap::new(),
        });
        for base in &bases {
            self.subscribe(*base, id);
        }
        match self.compute_order(id, &bases) {
            Ok(order) => {
                self.install_order(id, order);
                debug!(%id, name = %def.name, module = %def.module, "created capability set");
                Ok(id)
            }
            Err(err) => {
                for base in &bases {
                    self.unsubscribe(*base, id);
                }
                self.release_slot(id);
                Err(err)
            }
        }
    }

    /// Construct a plain mutable composition node with the given bases.
    ///
    /// Bases may be capability sets or other composition nodes; each must be
    /// live. Plain nodes implicitly extend the root through root pinning, so
    /// an empty bases list yields the single-element order `[Any]`.
    pub fn create_composition(&mut self, label: impl Into<String>, bases: &[SpecId]) -> Result<SpecId> {
        let label = label.into();
        let bases = bases.to_vec();
        for (i, base) in bases.iter().enumerate() {
            if bases[..i].contains(base) {
                return Err(SpecError::InvalidComposition {
                    detail: format!("duplicate base {base} in composition '{label}'"),
                });
            }
            if !self.contains(*base) {
                return Err(SpecError::InvalidComposition {
                    detail: format!("base {base} of composition '{label}' is not a live node"),
                });
            }
        }

        let id = self.alloc(SpecNode {
            label: label.clone(),
            kind: NodeKind::Composition,
            bases: bases.clone(),
            order: Vec::new(),
            implied: HashSet::new(),
            attr_cache: HashMap::new(),
            dependents: HashMap::new(),
        });
        for base in &bases {
            self.subscribe(*base, id);
        }
        match self.compute_order(id, &bases) {
            Ok(order) => {
                self.install_order(id, order);
                trace!(%id, label = %label, "created composition node");
                Ok(id)
            }
            Err(err) => {
                for base in &bases {
                    self.unsubscribe(*base, id);
                }
                self.release_slot(id);
                Err(err)
            }
        }
    }

    // --- Mutation & invalidation ---

    /// Replace a composition node's bases and propagate the change.
    ///
    /// The new resolution order is computed before any state is touched, so
    /// a merge conflict leaves the node exactly as it was. On success the
    /// node is unsubscribed from its old bases, subscribed to the new ones,
    /// and every dependent is recomputed (self before dependents).
    pub fn set_bases(&mut self, id: SpecId, new_bases: &[SpecId]) -> Result<()> {
        if matches!(self.node(id)?.kind, NodeKind::Capability(_)) {
            return Err(SpecError::InvalidComposition {
                detail: format!("capability set {} has immutable bases", self.describe(id)),
            });
        }
        for (i, base) in new_bases.iter().enumerate() {
            if new_bases[..i].contains(base) {
                return Err(SpecError::InvalidComposition {
                    detail: format!("duplicate base {base} for {}", self.describe(id)),
                });
            }
            if !self.contains(*base) {
                return Err(SpecError::InvalidComposition {
                    detail: format!("base {base} for {} is not a live node", self.describe(id)),
                });
            }
            if self.reaches(*base, id)? {
                return Err(SpecError::InvalidComposition {
                    detail: format!(
                        "base {} would make {} an ancestor of itself",
                        self.describe(*base),
                        self.describe(id)
                    ),
                });
            }
        }

        let order = self.compute_order(id, new_bases)?;

        let old_bases = std::mem::replace(&mut self.node_mut(id)?.bases, new_bases.to_vec());
        for base in &old_bases {
            self.unsubscribe(*base, id);
        }
        for base in new_bases {
            self.subscribe(*base, id);
        }
        trace!(%id, node = %self.describe(id), "bases replaced, fanning out");
        self.install_order(id, order);
        self.notify_dependents(id)
    }

    /// Recompute this node's cached state from its current bases, then
    /// notify every dependent.
    ///
    /// Normally driven by [`set_bases`](Self::set_bases); exposed for nodes
    /// whose bases were stabilized by other means. A node is never asked to
    /// recompute while one of its bases is mid-update: each node finishes
    /// its own recomputation before its dependents are told. If the merge
    /// fails the node keeps its previous (still valid, now possibly stale)
    /// order and the error is reported.
    pub fn changed(&mut self, id: SpecId) -> Result<()> {
        let bases = self.node(id)?.bases.clone();
        let order = self.compute_order(id, &bases)?;
        self.install_order(id, order);
        self.notify_dependents(id)
    }

    /// Free a node, unsubscribing it from its bases.
    ///
    /// Dependents still naming the freed node are not chased down: their
    /// handles go stale and are caught by liveness validation on their next
    /// recomputation. The root cannot be freed.
    pub fn free(&mut self, id: SpecId) -> Result<()> {
        if id == self.root {
            return Err(SpecError::InvalidComposition {
                detail: "the root capability set cannot be freed".to_string(),
            });
        }
        let bases = self.node(id)?.bases.clone();
        for base in bases {
            self.unsubscribe(base, id);
        }
        debug!(%id, node = %self.describe(id), "freeing specification node");
        self.release_slot(id);
        Ok(())
    }

    // --- Queries ---

    /// Membership test against the cached implied set.
    pub fn is_or_extends(&self, id: SpecId, capability: SpecId) -> Result<bool> {
        self.node(capability)?;
        Ok(self.node(id)?.implied.contains(&capability))
    }

    /// `b ∈ implied(a)`, optionally excluding the trivial `a == b` case.
    pub fn extends(&self, a: SpecId, b: SpecId, strict: bool) -> Result<bool> {
        Ok(self.is_or_extends(a, b)? && (!strict || a != b))
    }

    /// The cached resolution order: most specific first, root last.
    pub fn resolution_order(&self, id: SpecId) -> Result<&[SpecId]> {
        Ok(&self.node(id)?.order)
    }

    /// The cached implied set.
    pub fn implied_set(&self, id: SpecId) -> Result<&HashSet<SpecId>> {
        Ok(&self.node(id)?.implied)
    }

    /// A node's direct bases, in declared order.
    pub fn bases(&self, id: SpecId) -> Result<&[SpecId]> {
        Ok(&self.node(id)?.bases)
    }

    /// Current dependents of a node with their subscription counts, sorted
    /// by handle for deterministic output.
    pub fn dependents(&self, id: SpecId) -> Result<Vec<(SpecId, usize)>> {
        let mut out: Vec<_> = self
            .node(id)?
            .dependents
            .iter()
            .map(|(d, n)| (*d, *n))
            .collect();
        out.sort_unstable();
        Ok(out)
    }

    /// Whether `id` is a capability set (as opposed to a plain composition).
    pub fn is_capability(&self, id: SpecId) -> Result<bool> {
        Ok(matches!(self.node(id)?.kind, NodeKind::Capability(_)))
    }

    /// Display label: the capability name, or the composition label.
    pub fn label(&self, id: SpecId) -> Result<&str> {
        Ok(&self.node(id)?.label)
    }

    /// Capability identity `(name, declaring module)`; `None` for plain
    /// composition nodes.
    pub fn capability_identity(&self, id: SpecId) -> Result<Option<(&str, &str)>> {
        Ok(match &self.node(id)?.kind {
            NodeKind::Capability(data) => Some(data.identity()),
            NodeKind::Composition => None,
        })
    }

    // --- Attribute & tagged-value resolution ---

    /// Look up an attribute descriptor: the node's own attribute map first,
    /// then its resolution order (excluding itself) most specific first.
    ///
    /// Results, including misses, are memoized per node per name; the memo
    /// is dropped whenever the node's resolution state changes.
    pub fn resolve_attribute(&mut self, id: SpecId, name: &str) -> Result<Option<Value>> {
        if let Some(hit) = self.node(id)?.attr_cache.get(name) {
            return Ok(hit.clone());
        }

        let mut found = None;
        if let NodeKind::Capability(data) = &self.node(id)?.kind {
            found = data.attributes.get(name).cloned();
        }
        if found.is_none() {
            let order = self.node(id)?.order.clone();
            for ancestor in order {
                if ancestor == id {
                    continue;
                }
                if let NodeKind::Capability(data) = &self.node(ancestor)?.kind {
                    if let Some(descriptor) = data.attributes.get(name) {
                        found = Some(descriptor.clone());
                        break;
                    }
                }
            }
        }

        self.node_mut(id)?
            .attr_cache
            .insert(name.to_string(), found.clone());
        Ok(found)
    }

    /// All attribute names visible on a node, own and inherited, sorted.
    pub fn attribute_names(&self, id: SpecId) -> Result<Vec<String>> {
        let mut names: Vec<String> = Vec::new();
        for ancestor in &self.node(id)?.order {
            if let NodeKind::Capability(data) = &self.node(*ancestor)?.kind {
                names.extend(data.attributes.keys().cloned());
            }
        }
        names.sort_unstable();
        names.dedup();
        Ok(names)
    }

    /// A tagged value stored directly on this capability set.
    pub fn direct_tagged_value(&self, id: SpecId, key: &str) -> Result<Option<&Value>> {
        Ok(match &self.node(id)?.kind {
            NodeKind::Capability(data) => data.tagged_values.get(key),
            NodeKind::Composition => None,
        })
    }

    /// A tagged value resolved along the resolution order, nearest wins.
    pub fn tagged_value(&self, id: SpecId, key: &str) -> Result<Option<&Value>> {
        for ancestor in &self.node(id)?.order {
            if let NodeKind::Capability(data) = &self.node(*ancestor)?.kind {
                if let Some(value) = data.tagged_values.get(key) {
                    return Ok(Some(value));
                }
            }
        }
        Ok(None)
    }

    /// All tagged-value keys visible on a node, own and inherited, sorted.
    pub fn tagged_value_names(&self, id: SpecId) -> Result<Vec<String>> {
        let mut names: Vec<String> = Vec::new();
        for ancestor in &self.node(id)?.order {
            if let NodeKind::Capability(data) = &self.node(*ancestor)?.kind {
                names.extend(data.tagged_values.keys().cloned());
            }
        }
        names.sort_unstable();
        names.dedup();
        Ok(names)
    }

    /// Apply a capability set's adapt policy to an opaque object payload.
    ///
    /// `provided` is the specification currently in effect for the object.
    /// The default policy returns the payload unchanged iff that
    /// specification implies the capability; a custom hook decides for
    /// itself.
    pub fn adapt(&self, capability: SpecId, provided: SpecId, payload: &Value) -> Result<Option<Value>> {
        let policy = match &self.node(capability)?.kind {
            NodeKind::Capability(data) => data.adapt,
            NodeKind::Composition => {
                return Err(SpecError::InvalidComposition {
                    detail: format!("{} is not a capability set", self.describe(capability)),
                })
            }
        };
        let provides = self.is_or_extends(provided, capability)?;
        Ok(match policy {
            AdaptPolicy::Default => provides.then(|| payload.clone()),
            AdaptPolicy::Custom(hook) => hook(payload, provides),
        })
    }

    // --- Diagnostics ---

    /// Check the structural invariants of every live node.
    ///
    /// For all nodes: the resolution order ends with the root, contains no
    /// duplicates, and matches the implied set exactly; a capability set
    /// leads its own order. Returns every violation found.
    pub fn verify_invariants(&self) -> std::result::Result<(), Vec<String>> {
        let mut violations = Vec::new();
        for id in self.ids() {
            let node = match self.node(id) {
                Ok(node) => node,
                Err(_) => continue,
            };
            if node.order.last() != Some(&self.root) {
                violations.push(format!("{}: resolution order does not end with the root", node.label));
            }
            let as_set: HashSet<SpecId> = node.order.iter().copied().collect();
            if as_set.len() != node.order.len() {
                violations.push(format!("{}: resolution order contains duplicates", node.label));
            }
            if as_set != node.implied {
                violations.push(format!("{}: implied set diverges from resolution order", node.label));
            }
            if matches!(node.kind, NodeKind::Capability(_)) && node.order.first() != Some(&id) {
                violations.push(format!("{}: capability set does not lead its own order", node.label));
            }
            for base in &node.bases {
                match self.node(*base) {
                    Ok(base_node) => {
                        if !base_node.dependents.contains_key(&id) {
                            violations.push(format!(
                                "{}: missing dependents entry on base {}",
                                node.label, base_node.label
                            ));
                        }
                    }
                    Err(_) => violations.push(format!("{}: dead base {base}", node.label)),
                }
            }
        }
        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }

    /// Best-effort human name for diagnostics; falls back to the raw handle
    /// for dead nodes.
    pub fn describe(&self, id: SpecId) -> String {
        match self.node(id) {
            Ok(node) => node.label.clone(),
            Err(_) => id.to_string(),
        }
    }

    // --- Internals ---

    fn node(&self, id: SpecId) -> Result<&SpecNode> {
        self.slots
            .get(id.index() as usize)
            .filter(|slot| slot.generation == id.generation())
            .and_then(|slot| slot.node.as_ref())
            .ok_or(SpecError::StaleHandle { handle: id })
    }

    fn node_mut(&mut self, id: SpecId) -> Result<&mut SpecNode> {
        self.slots
            .get_mut(id.index() as usize)
            .filter(|slot| slot.generation == id.generation())
            .and_then(|slot| slot.node.as_mut())
            .ok_or(SpecError::StaleHandle { handle: id })
    }

    fn alloc(&mut self, node: SpecNode) -> SpecId {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.node = Some(node);
            SpecId::new(index, slot.generation)
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                node: Some(node),
            });
            SpecId::new(index, 0)
        }
    }

    fn release_slot(&mut self, id: SpecId) {
        let slot = &mut self.slots[id.index() as usize];
        slot.node = None;
        slot.generation += 1;
        self.free.push(id.index());
    }

    fn subscribe(&mut self, base: SpecId, dependent: SpecId) {
        if let Ok(node) = self.node_mut(base) {
            *node.dependents.entry(dependent).or_insert(0) += 1;
        }
    }

    fn unsubscribe(&mut self, base: SpecId, dependent: SpecId) {
        if let Ok(node) = self.node_mut(base) {
            if let Some(count) = node.dependents.get_mut(&dependent) {
                *count -= 1;
                if *count == 0 {
                    node.dependents.remove(&dependent);
                }
            }
        }
    }

    /// Compute a node's resolution order from the given bases.
    ///
    /// Seeds the C3 merge with each base's cached order plus the
    /// direct-bases list, keeps capability sets only (a capability set leads
    /// its own order; plain composition nodes are carriers, not members),
    /// and pins the root to the final position.
    fn compute_order(&self, id: SpecId, bases: &[SpecId]) -> Result<Vec<SpecId>> {
        let mut seqs: Vec<Vec<SpecId>> = Vec::with_capacity(bases.len() + 1);
        for base in bases {
            seqs.push(self.node(*base)?.order.clone());
        }
        seqs.push(bases.to_vec());

        let merged = merge(&seqs).map_err(|conflict| SpecError::InconsistentResolutionOrder {
            candidates: conflict
                .candidates
                .iter()
                .map(|c| self.describe(*c))
                .collect(),
        })?;

        let mut order = Vec::with_capacity(merged.len() + 1);
        if matches!(self.node(id)?.kind, NodeKind::Capability(_)) {
            order.push(id);
        }
        for member in merged {
            if self.is_capability(member)? {
                order.push(member);
            }
        }
        pin_last(&mut order, self.root);
        Ok(order)
    }

    fn install_order(&mut self, id: SpecId, order: Vec<SpecId>) {
        let implied = order.iter().copied().collect();
        let node = self
            .node_mut(id)
            .expect("install_order called for a node that was just computed");
        node.order = order;
        node.implied = implied;
        node.attr_cache.clear();
    }

    /// Recompute every current dependent, skipping any that died since they
    /// subscribed.
    fn notify_dependents(&mut self, id: SpecId) -> Result<()> {
        let dependents: Vec<SpecId> = match self.node(id) {
            Ok(node) => node.dependents.keys().copied().collect(),
            Err(_) => return Ok(()),
        };
        for dependent in dependents {
            if self.contains(dependent) {
                trace!(node = %self.describe(id), dependent = %self.describe(dependent), "invalidation fan-out");
                self.changed(dependent)?;
            }
        }
        Ok(())
    }

    /// Whether `target` is reachable from `from` through bases edges
    /// (including `from == target`).
    fn reaches(&self, from: SpecId, target: SpecId) -> Result<bool> {
        if from == target {
            return Ok(true);
        }
        let mut visited = HashSet::new();
        let mut stack = vec![from];
        while let Some(current) = stack.pop() {
            if !visited.insert(current) {
                continue;
            }
            for base in &self.node(current)?.bases {
                if *base == target {
                    return Ok(true);
                }
                stack.push(*base);
            }
        }
        Ok(false)
    }
}

impl Default for SpecGraph {
    fn default() -> Self {
        Self::new()
    }
}
