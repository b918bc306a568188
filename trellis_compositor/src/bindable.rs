// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Bindable stacks: one candidate list per environment category and layer scope.
//!
//! The first node of a stack is the bound one. Changes of the first node are
//! reported as [`BindEvent`]s, unbind before bind.

use alloc::vec::Vec;
use trellis_scene::{BindableCategory, DirtyFlags, NodeId, NodeKind};

use crate::context::TraverseMode;
use crate::dispatch::{NodeBehavior, Visitor};
use crate::display_list::FogParams;

/// Notification that a node became bound or stopped being bound.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BindEvent {
    /// Affected node.
    pub node: NodeId,
    /// New bound state.
    pub bound: bool,
}

impl BindEvent {
    const fn bind(node: NodeId) -> Self {
        Self { node, bound: true }
    }

    const fn unbind(node: NodeId) -> Self {
        Self { node, bound: false }
    }
}

/// Handle of one stack in a [`BindableRegistry`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct StackId(u32);

/// The four stacks of one layer scope.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct BindableScope {
    stacks: [StackId; 4],
}

impl BindableScope {
    pub(crate) fn stack(&self, category: BindableCategory) -> StackId {
        self.stacks[category as usize]
    }
}

/// Arena of bindable stacks.
#[derive(Debug, Default)]
pub(crate) struct BindableRegistry {
    stacks: Vec<Option<Vec<NodeId>>>,
    free: Vec<usize>,
}

impl BindableRegistry {
    fn alloc(&mut self) -> StackId {
        let idx = if let Some(idx) = self.free.pop() {
            self.stacks[idx] = Some(Vec::new());
            idx
        } else {
            self.stacks.push(Some(Vec::new()));
            self.stacks.len() - 1
        };
        #[allow(
            clippy::cast_possible_truncation,
            reason = "stack handles use 32-bit indices."
        )]
        StackId(idx as u32)
    }

    /// Fresh, empty stacks for a new layer scope.
    pub(crate) fn create_scope(&mut self) -> BindableScope {
        BindableScope {
            stacks: [self.alloc(), self.alloc(), self.alloc(), self.alloc()],
        }
    }

    /// Release the stacks of a scope.
    pub(crate) fn release_scope(&mut self, scope: BindableScope) {
        for s in scope.stacks {
            let idx = s.0 as usize;
            if let Some(slot) = self.stacks.get_mut(idx) {
                if slot.take().is_some() {
                    self.free.push(idx);
                }
            }
        }
    }

    fn nodes_mut(&mut self, stack: StackId) -> Option<&mut Vec<NodeId>> {
        self.stacks.get_mut(stack.0 as usize)?.as_mut()
    }

    /// Candidates of `stack`, bound first.
    pub(crate) fn nodes(&self, stack: StackId) -> &[NodeId] {
        self.stacks
            .get(stack.0 as usize)
            .and_then(Option::as_deref)
            .unwrap_or(&[])
    }

    /// The bound node of `stack`.
    pub(crate) fn top(&self, stack: StackId) -> Option<NodeId> {
        self.nodes(stack).first().copied()
    }

    /// Append `node` if not yet registered. Binds it when the stack was empty.
    pub(crate) fn register(&mut self, stack: StackId, node: NodeId) -> Vec<BindEvent> {
        let Some(nodes) = self.nodes_mut(stack) else {
            return Vec::new();
        };
        if nodes.contains(&node) {
            return Vec::new();
        }
        nodes.push(node);
        if nodes.len() == 1 {
            alloc::vec![BindEvent::bind(node)]
        } else {
            Vec::new()
        }
    }

    /// Handle a bind request for `node`.
    ///
    /// `true` moves it to the front. `false` on the bound node sends it to the
    /// back and binds the next candidate; `false` on any other node is ignored.
    pub(crate) fn set_bind(&mut self, stack: StackId, node: NodeId, bind: bool) -> Vec<BindEvent> {
        let Some(nodes) = self.nodes_mut(stack) else {
            return Vec::new();
        };
        let old_top = nodes.first().copied();
        if bind {
            if old_top == Some(node) {
                return Vec::new();
            }
            nodes.retain(|n| *n != node);
            nodes.insert(0, node);
        } else {
            if old_top != Some(node) {
                return Vec::new();
            }
            nodes.remove(0);
            nodes.push(node);
        }
        Self::transition(old_top, nodes.first().copied())
    }

    /// Remove `node` from every stack, binding the next candidate where it was bound.
    pub(crate) fn remove(&mut self, node: NodeId) -> Vec<BindEvent> {
        let mut out = Vec::new();
        for nodes in self.stacks.iter_mut().flatten() {
            let old_top = nodes.first().copied();
            nodes.retain(|n| *n != node);
            if old_top == Some(node) {
                if let Some(next) = nodes.first() {
                    out.push(BindEvent::bind(*next));
                }
            }
        }
        out
    }

    fn transition(old: Option<NodeId>, new: Option<NodeId>) -> Vec<BindEvent> {
        if old == new {
            return Vec::new();
        }
        old.map(BindEvent::unbind)
            .into_iter()
            .chain(new.map(BindEvent::bind))
            .collect()
    }
}

/// Traversal of environment nodes: registration, bind requests and application.
pub(crate) struct BindableBehavior;

impl NodeBehavior for BindableBehavior {
    fn traverse(&self, v: &mut Visitor<'_>, id: NodeId) {
        let Some(category) = v.scene.tag(id).and_then(|t| t.bindable_category()) else {
            return;
        };
        let stack = v.state.bindables.stack(category);
        let mut events = v.res.bindables.register(stack, id);

        if v.scene.dirty(id).contains(DirtyFlags::BINDABLE) {
            let request = v
                .scene
                .kind_mut_silent(id)
                .and_then(NodeKind::bind_state_mut)
                .and_then(|b| b.set_bind.take());
            if let Some(bind) = request {
                events.extend(v.res.bindables.set_bind(stack, id, bind));
            }
            v.scene.clear_dirty(id, DirtyFlags::BINDABLE);
        }
        if !events.is_empty() {
            v.res.apply_bind_events(&mut *v.scene, events);
        }

        if v.pass.mode == TraverseMode::BindableApply && v.res.bindables.top(stack) == Some(id) {
            let env = &mut v.state.env;
            match v.scene.kind(id) {
                Some(NodeKind::Background(b)) => env.background = Some(b.color),
                Some(NodeKind::Viewport(p)) => env.view_box = Some(p.view_box),
                Some(NodeKind::Viewpoint(p)) => {
                    env.viewpoint = Some((p.position, p.field_of_view));
                }
                Some(NodeKind::NavigationInfo(n)) => env.headlight = Some(n.headlight),
                Some(NodeKind::Fog(f)) => {
                    env.fog = Some(FogParams {
                        color: f.color,
                        visibility_range: f.visibility_range,
                    });
                }
                _ => {}
            }
        }
        v.scene.clear_dirty(id, DirtyFlags::NODE);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use trellis_scene::{Background, Scene};

    fn nodes(n: usize) -> Vec<NodeId> {
        let mut scene = Scene::new();
        (0..n)
            .map(|_| scene.insert(None, Background::default()))
            .collect()
    }

    #[test]
    fn first_registration_binds() {
        let n = nodes(2);
        let mut reg = BindableRegistry::default();
        let s = reg.create_scope().stack(BindableCategory::Background);
        assert_eq!(reg.register(s, n[0]), vec![BindEvent::bind(n[0])]);
        assert!(reg.register(s, n[1]).is_empty());
        assert!(reg.register(s, n[0]).is_empty());
        assert_eq!(reg.nodes(s), &[n[0], n[1]]);
    }

    #[test]
    fn bind_moves_to_front_unbinding_previous() {
        let n = nodes(2);
        let mut reg = BindableRegistry::default();
        let s = reg.create_scope().stack(BindableCategory::Background);
        let _ = reg.register(s, n[0]);
        let _ = reg.register(s, n[1]);
        assert_eq!(
            reg.set_bind(s, n[1], true),
            vec![BindEvent::unbind(n[0]), BindEvent::bind(n[1])]
        );
        assert_eq!(reg.top(s), Some(n[1]));
        assert!(reg.set_bind(s, n[1], true).is_empty());
    }

    #[test]
    fn unbind_of_top_rotates() {
        let n = nodes(3);
        let mut reg = BindableRegistry::default();
        let s = reg.create_scope().stack(BindableCategory::Fog);
        for &x in &n {
            let _ = reg.register(s, x);
        }
        assert!(reg.set_bind(s, n[2], false).is_empty());
        assert_eq!(
            reg.set_bind(s, n[0], false),
            vec![BindEvent::unbind(n[0]), BindEvent::bind(n[1])]
        );
        assert_eq!(reg.nodes(s), &[n[1], n[2], n[0]]);
    }

    #[test]
    fn scopes_are_independent() {
        let n = nodes(2);
        let mut reg = BindableRegistry::default();
        let outer = reg.create_scope();
        let inner = reg.create_scope();
        let _ = reg.register(outer.stack(BindableCategory::Viewpoint), n[0]);
        let _ = reg.register(inner.stack(BindableCategory::Viewpoint), n[1]);
        assert_eq!(reg.top(outer.stack(BindableCategory::Viewpoint)), Some(n[0]));
        assert_eq!(reg.top(inner.stack(BindableCategory::Viewpoint)), Some(n[1]));
        reg.release_scope(inner);
        assert_eq!(reg.top(inner.stack(BindableCategory::Viewpoint)), None);
        let reused = reg.create_scope();
        assert!(reg.nodes(reused.stack(BindableCategory::Background)).is_empty());
    }

    #[test]
    fn removal_binds_next() {
        let n = nodes(2);
        let mut reg = BindableRegistry::default();
        let s = reg.create_scope().stack(BindableCategory::Navigation);
        let _ = reg.register(s, n[0]);
        let _ = reg.register(s, n[1]);
        assert_eq!(reg.remove(n[0]), vec![BindEvent::bind(n[1])]);
        assert_eq!(reg.nodes(s), &[n[1]]);
    }
}
