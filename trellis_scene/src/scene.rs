// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Scene arena: structure, dirty propagation, private blocks, field access.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::any::Any;

use crate::field::{FieldError, FieldValue};
use crate::kind::{NodeKind, NodeTag};
use crate::types::{Child, DirtyFlags, Link, NodeId};

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}

/// Arena holding every node of a scene graph.
///
/// Each node has exactly one owner (its defining parent, or none for roots and
/// detached nodes). Any number of other parents may re-use it through
/// [`Link::Shared`] child entries; those links never own and never remove.
pub struct Scene {
    nodes: Vec<Option<Node>>, // slots
    generations: Vec<u32>,    // last generation per slot (persists across frees)
    free_list: Vec<usize>,
    root: Option<NodeId>,
}

impl core::fmt::Debug for Scene {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let total = self.nodes.len();
        let alive = self.nodes.iter().filter(|n| n.is_some()).count();
        f.debug_struct("Scene")
            .field("nodes_total", &total)
            .field("nodes_alive", &alive)
            .field("free_list", &self.free_list.len())
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

struct Node {
    generation: u32,
    kind: NodeKind,
    children: Vec<Child>,
    /// Owned nodes held in node-valued fields rather than the child list.
    attached: Vec<NodeId>,
    owner: Option<NodeId>,
    /// Non-owning referrers: shared child links and resolved external references.
    sharers: Vec<NodeId>,
    dirty: DirtyFlags,
    private: Option<Box<dyn Any>>,
}

impl Node {
    fn new(generation: u32, kind: NodeKind) -> Self {
        Self {
            generation,
            kind,
            children: Vec::new(),
            attached: Vec::new(),
            owner: None,
            sharers: Vec::new(),
            dirty: DirtyFlags::NODE | DirtyFlags::CHILD,
            private: None,
        }
    }
}

impl Scene {
    /// Create an empty scene.
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            generations: Vec::new(),
            free_list: Vec::new(),
            root: None,
        }
    }

    /// Root node, if one was set.
    pub fn root(&self) -> Option<NodeId> {
        self.root.filter(|r| self.is_alive(*r))
    }

    /// Set (or clear) the root node.
    pub fn set_root(&mut self, root: Option<NodeId>) {
        self.root = root;
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_some()).count()
    }

    /// Returns true if the scene holds no node.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if `id` refers to a live node.
    ///
    /// A `NodeId` is considered live if its slot exists and its generation matches
    /// the current generation stored in that slot.
    pub fn is_alive(&self, id: NodeId) -> bool {
        self.node(id).is_some()
    }

    fn node(&self, id: NodeId) -> Option<&Node> {
        let n = self.nodes.get(id.idx())?.as_ref()?;
        (n.generation == id.1).then_some(n)
    }

    fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        let n = self.nodes.get_mut(id.idx())?.as_mut()?;
        if n.generation != id.1 {
            return None;
        }
        Some(n)
    }

    fn alloc(&mut self, kind: NodeKind) -> NodeId {
        let (idx, generation) = if let Some(idx) = self.free_list.pop() {
            let generation = self.generations[idx].saturating_add(1);
            self.generations[idx] = generation;
            self.nodes[idx] = Some(Node::new(generation, kind));
            (idx, generation)
        } else {
            let generation = 1_u32;
            self.nodes.push(Some(Node::new(generation, kind)));
            self.generations.push(generation);
            (self.nodes.len() - 1, generation)
        };
        #[allow(
            clippy::cast_possible_truncation,
            reason = "NodeId uses 32-bit indices by design."
        )]
        NodeId::new(idx as u32, generation)
    }

    /// Insert a new node as the last owned child of `parent` (or detached if `None`).
    ///
    /// A stale `parent` leaves the node detached.
    pub fn insert(&mut self, parent: Option<NodeId>, kind: impl Into<NodeKind>) -> NodeId {
        let id = self.alloc(kind.into());
        if let Some(p) = parent {
            if let Some(pn) = self.node_mut(p) {
                pn.children.push(Child {
                    id,
                    link: Link::Owned,
                });
                if let Some(n) = self.node_mut(id) {
                    n.owner = Some(p);
                }
                self.mark_dirty(p, DirtyFlags::CHILD);
            }
        }
        id
    }

    /// Insert a node owned by `parent` but held in one of its node-valued fields
    /// instead of its child list (for example a layer's background).
    ///
    /// The caller stores the returned id in the field.
    pub fn insert_attached(&mut self, parent: NodeId, kind: impl Into<NodeKind>) -> Option<NodeId> {
        if !self.is_alive(parent) {
            return None;
        }
        let id = self.alloc(kind.into());
        if let Some(pn) = self.node_mut(parent) {
            pn.attached.push(id);
        }
        if let Some(n) = self.node_mut(id) {
            n.owner = Some(parent);
        }
        Some(id)
    }

    /// Append a shared (non-owning) link from `parent` to `target`.
    ///
    /// Returns false if either node is stale or the link would create a cycle.
    pub fn add_shared(&mut self, parent: NodeId, target: NodeId) -> bool {
        if !self.is_alive(parent) || !self.is_alive(target) || self.is_ancestor_or_self(target, parent)
        {
            return false;
        }
        if let Some(pn) = self.node_mut(parent) {
            pn.children.push(Child {
                id: target,
                link: Link::Shared,
            });
        }
        if let Some(tn) = self.node_mut(target) {
            tn.sharers.push(parent);
        }
        self.mark_dirty(parent, DirtyFlags::CHILD);
        true
    }

    /// Point an external reference at its loaded content (or clear it).
    ///
    /// The reference becomes a non-owning referrer of `target`, so changes below
    /// `target` dirty the reference and its ancestors.
    pub fn resolve_external(&mut self, id: NodeId, target: Option<NodeId>) -> bool {
        let previous = match self.node(id).map(|n| &n.kind) {
            Some(NodeKind::ExternalRef(e)) => e.resolved,
            _ => return false,
        };
        if let Some(t) = target {
            if !self.is_alive(t) || self.is_ancestor_or_self(t, id) {
                return false;
            }
        }
        if let Some(prev) = previous {
            if let Some(pn) = self.node_mut(prev) {
                pn.sharers.retain(|s| *s != id);
            }
        }
        if let Some(t) = target {
            if let Some(tn) = self.node_mut(t) {
                tn.sharers.push(id);
            }
        }
        if let Some(NodeKind::ExternalRef(e)) = self.node_mut(id).map(|n| &mut n.kind) {
            e.resolved = target;
        }
        self.mark_dirty(id, DirtyFlags::NODE);
        true
    }

    fn is_ancestor_or_self(&self, candidate: NodeId, of: NodeId) -> bool {
        let mut stack = alloc::vec![of];
        let mut seen: Vec<NodeId> = Vec::new();
        while let Some(n) = stack.pop() {
            if n == candidate {
                return true;
            }
            if seen.contains(&n) {
                continue;
            }
            seen.push(n);
            stack.extend(self.parents(n));
        }
        false
    }

    /// Owner followed by every non-owning referrer of `id`.
    pub fn parents(&self, id: NodeId) -> Vec<NodeId> {
        let Some(n) = self.node(id) else {
            return Vec::new();
        };
        n.owner.iter().chain(n.sharers.iter()).copied().collect()
    }

    /// Owning parent of `id`.
    pub fn owner(&self, id: NodeId) -> Option<NodeId> {
        self.node(id)?.owner
    }

    /// Ordered child list of `id` (empty for stale ids).
    pub fn children(&self, id: NodeId) -> &[Child] {
        self.node(id).map(|n| n.children.as_slice()).unwrap_or(&[])
    }

    /// Child ids of `id`, in document order.
    pub fn child_ids(&self, id: NodeId) -> Vec<NodeId> {
        self.children(id).iter().map(|c| c.id).collect()
    }

    /// Every node owned by `id`, including `id`, children before parents.
    pub fn owned_subtree(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.collect_owned(id, &mut out);
        out
    }

    fn collect_owned(&self, id: NodeId, out: &mut Vec<NodeId>) {
        let Some(n) = self.node(id) else {
            return;
        };
        for c in &n.children {
            if c.link == Link::Owned {
                self.collect_owned(c.id, out);
            }
        }
        for a in &n.attached {
            self.collect_owned(*a, out);
        }
        out.push(id);
    }

    /// Remove a node and everything it owns. Returns the removed ids.
    ///
    /// Shared links and external references that pointed into the removed
    /// subtree are dropped; their holders are marked `CHILD` dirty.
    pub fn remove(&mut self, id: NodeId) -> Vec<NodeId> {
        if !self.is_alive(id) {
            return Vec::new();
        }
        let removed = self.owned_subtree(id);
        if let Some(owner) = self.owner(id) {
            if let Some(on) = self.node_mut(owner) {
                on.children.retain(|c| !(c.id == id && c.link == Link::Owned));
                on.attached.retain(|a| *a != id);
            }
            self.mark_dirty(owner, DirtyFlags::CHILD);
        }
        for &r in &removed {
            let (shared_targets, sharers, resolved) = match self.node(r) {
                Some(n) => (
                    n.children
                        .iter()
                        .filter(|c| c.link == Link::Shared)
                        .map(|c| c.id)
                        .collect::<Vec<_>>(),
                    n.sharers.clone(),
                    match &n.kind {
                        NodeKind::ExternalRef(e) => e.resolved,
                        _ => None,
                    },
                ),
                None => continue,
            };
            for t in shared_targets.into_iter().chain(resolved) {
                if let Some(tn) = self.node_mut(t) {
                    tn.sharers.retain(|s| *s != r);
                }
            }
            for s in sharers {
                if removed.contains(&s) {
                    continue;
                }
                if let Some(sn) = self.node_mut(s) {
                    sn.children.retain(|c| c.id != r);
                    if let NodeKind::ExternalRef(e) = &mut sn.kind {
                        if e.resolved == Some(r) {
                            e.resolved = None;
                        }
                    }
                }
                self.mark_dirty(s, DirtyFlags::CHILD);
            }
        }
        for &r in &removed {
            self.nodes[r.idx()] = None;
            self.free_list.push(r.idx());
        }
        if self.root.is_some_and(|root| removed.contains(&root)) {
            self.root = None;
        }
        removed
    }

    /// Type tag and fields of `id`.
    pub fn kind(&self, id: NodeId) -> Option<&NodeKind> {
        self.node(id).map(|n| &n.kind)
    }

    /// Tag of `id`.
    pub fn tag(&self, id: NodeId) -> Option<NodeTag> {
        self.kind(id).map(NodeKind::tag)
    }

    /// Mutable fields of `id`. Marks the node `NODE` dirty (and its ancestors `CHILD` dirty).
    pub fn kind_mut(&mut self, id: NodeId) -> Option<&mut NodeKind> {
        if !self.is_alive(id) {
            return None;
        }
        self.mark_dirty(id, DirtyFlags::NODE);
        self.node_mut(id).map(|n| &mut n.kind)
    }

    /// Mutable fields of `id` without touching dirty flags.
    ///
    /// For the traversal itself, which writes output fields it then clears.
    pub fn kind_mut_silent(&mut self, id: NodeId) -> Option<&mut NodeKind> {
        self.node_mut(id).map(|n| &mut n.kind)
    }

    // --- dirty flags ---

    /// Dirty bits of `id` (empty for stale ids).
    pub fn dirty(&self, id: NodeId) -> DirtyFlags {
        self.node(id).map(|n| n.dirty).unwrap_or_default()
    }

    /// Set bits on `id` only.
    pub fn set_dirty(&mut self, id: NodeId, bits: DirtyFlags) {
        if let Some(n) = self.node_mut(id) {
            n.dirty |= bits;
        }
    }

    /// Clear bits on `id` only.
    pub fn clear_dirty(&mut self, id: NodeId, bits: DirtyFlags) {
        if let Some(n) = self.node_mut(id) {
            n.dirty.remove(bits);
        }
    }

    /// Set bits on `id` and mark every ancestor (owner and sharers) `CHILD` dirty.
    ///
    /// Propagation stops at ancestors that are already `CHILD` dirty.
    pub fn mark_dirty(&mut self, id: NodeId, bits: DirtyFlags) {
        self.set_dirty(id, bits);
        let mut stack = self.parents(id);
        while let Some(p) = stack.pop() {
            let Some(pn) = self.node_mut(p) else {
                continue;
            };
            if pn.dirty.contains(DirtyFlags::CHILD) {
                continue;
            }
            pn.dirty |= DirtyFlags::CHILD;
            stack.extend(self.parents(p));
        }
    }

    // --- private blocks ---

    /// Type-erased traversal state of `id`.
    pub fn private(&self, id: NodeId) -> Option<&(dyn Any + 'static)> {
        self.node(id)?.private.as_deref()
    }

    /// Typed view of the private block of `id`.
    pub fn private_ref<T: Any>(&self, id: NodeId) -> Option<&T> {
        self.private(id)?.downcast_ref()
    }

    /// Mutable typed view of the private block of `id`.
    pub fn private_mut<T: Any>(&mut self, id: NodeId) -> Option<&mut T> {
        self.node_mut(id)?.private.as_deref_mut()?.downcast_mut()
    }

    /// Install a private block, returning the previous one.
    pub fn set_private(&mut self, id: NodeId, block: Box<dyn Any>) -> Option<Box<dyn Any>> {
        self.node_mut(id)?.private.replace(block)
    }

    /// Detach the private block of `id`.
    pub fn take_private(&mut self, id: NodeId) -> Option<Box<dyn Any>> {
        self.node_mut(id)?.private.take()
    }

    // --- fields ---

    /// Read field `index` of `id`.
    pub fn field(&self, id: NodeId, index: usize) -> Result<FieldValue, FieldError> {
        self.kind(id).ok_or(FieldError::StaleNode)?.field(index)
    }

    /// Write field `index` of `id`, then mark the node dirty.
    ///
    /// Bind requests additionally set [`DirtyFlags::BINDABLE`].
    pub fn set_field(&mut self, id: NodeId, index: usize, value: FieldValue) -> Result<(), FieldError> {
        let kind = &mut self.node_mut(id).ok_or(FieldError::StaleNode)?.kind;
        let is_bind = kind.bind_state().is_some() && index == 0;
        kind.set_field(index, value)?;
        let mut bits = DirtyFlags::NODE;
        if is_bind {
            bits |= DirtyFlags::BINDABLE;
        }
        self.mark_dirty(id, bits);
        Ok(())
    }
}
