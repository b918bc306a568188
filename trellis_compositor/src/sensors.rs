// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Sensor handlers collected while picking, and the active list handed to event dispatch.
//!
//! ## Usage
//!
//! 1) A Pick pass collects the enabled handlers reachable on the path to the hit leaf.
//! 2) [`ActiveSensors`] keeps the list from the last pick.
//! 3) Consecutive picks produce `Out(..)` / `Over(..)` transitions between the two lists.

use alloc::vec::Vec;
use trellis_scene::{NodeId, NodeKind, Scene, SensorKind};

/// What a sensor handler reacts to.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum HandlerKind {
    /// Press/release and over/out.
    Touch,
    /// Press-drag-release.
    Drag,
    /// A group that is itself a link target.
    Anchor,
}

/// An interaction-capable behavior reachable from a picked leaf.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct SensorHandler {
    /// Sensor node, or the anchor group itself.
    pub node: NodeId,
    /// Handler type.
    pub kind: HandlerKind,
}

impl SensorHandler {
    /// Handler for `node`, if its kind carries one.
    pub(crate) fn of(scene: &Scene, node: NodeId) -> Option<Self> {
        let kind = match scene.kind(node)? {
            NodeKind::Sensor(s) => match s.kind {
                SensorKind::Touch => HandlerKind::Touch,
                SensorKind::Drag => HandlerKind::Drag,
            },
            NodeKind::Anchor(_) => HandlerKind::Anchor,
            _ => return None,
        };
        Some(Self { node, kind })
    }

    /// Evaluated at hit time: a sensor's `enabled` field, an anchor's non-empty url.
    pub fn is_enabled(&self, scene: &Scene) -> bool {
        match scene.kind(self.node) {
            Some(NodeKind::Sensor(s)) => s.enabled,
            Some(NodeKind::Anchor(a)) => !a.url.is_empty(),
            _ => false,
        }
    }
}

/// How a group's sensors combine with the ones inherited from its ancestors.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum SensorScope {
    /// The nearest group carrying sensors replaces the inherited list.
    #[default]
    Nearest,
    /// Every group on the path appends its sensors, outer first.
    Accumulate,
}

/// A transition between the active lists of two consecutive picks.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SensorEvent {
    /// The pointer is now over the handler's geometry (outer to inner).
    Over(SensorHandler),
    /// The pointer left the handler's geometry (inner to outer).
    Out(SensorHandler),
}

/// Handlers active for the current pointer position.
///
/// Replaced by every Pick pass. The list runs outer to inner.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ActiveSensors {
    current: Vec<SensorHandler>,
    pending: Vec<SensorHandler>,
}

impl ActiveSensors {
    /// Handlers collected by the last pick.
    pub fn handlers(&self) -> &[SensorHandler] {
        &self.current
    }

    /// Returns true if `node` is among the active handlers.
    pub fn contains(&self, node: NodeId) -> bool {
        self.current.iter().any(|h| h.node == node)
    }

    pub(crate) fn begin_pick(&mut self) {
        self.pending.clear();
    }

    /// Record the handlers in effect at a leaf hit; a later hit replaces an earlier one.
    pub(crate) fn set_hit(&mut self, handlers: &[SensorHandler]) {
        self.pending.clear();
        self.pending.extend_from_slice(handlers);
    }

    /// Swap in the list collected since [`Self::begin_pick`] and report transitions.
    pub(crate) fn finish_pick(&mut self) -> Vec<SensorEvent> {
        let next = core::mem::take(&mut self.pending);
        self.update(next)
    }

    /// Drop a removed node from the active list, reporting it as left.
    pub(crate) fn forget(&mut self, node: NodeId) -> Vec<SensorEvent> {
        let mut out = Vec::new();
        self.current.retain(|h| {
            if h.node == node {
                out.push(SensorEvent::Out(*h));
                false
            } else {
                true
            }
        });
        self.pending.retain(|h| h.node != node);
        out
    }

    fn update(&mut self, next: Vec<SensorHandler>) -> Vec<SensorEvent> {
        let mut lca = 0;
        while lca < self.current.len() && lca < next.len() && self.current[lca] == next[lca] {
            lca += 1;
        }
        let mut out = Vec::new();
        for &h in self.current[lca..].iter().rev() {
            out.push(SensorEvent::Out(h));
        }
        for &h in &next[lca..] {
            out.push(SensorEvent::Over(h));
        }
        self.current = next;
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::String;
    use alloc::vec;
    use trellis_scene::{Anchor, Group, Sensor};

    fn handlers(n: usize) -> (Scene, Vec<SensorHandler>) {
        let mut scene = Scene::new();
        let root = scene.insert(None, Group::default());
        let hs = (0..n)
            .map(|_| {
                let s = scene.insert(Some(root), Sensor::default());
                SensorHandler::of(&scene, s).unwrap()
            })
            .collect();
        (scene, hs)
    }

    fn pick(a: &mut ActiveSensors, hs: &[SensorHandler]) -> Vec<SensorEvent> {
        a.begin_pick();
        a.set_hit(hs);
        a.finish_pick()
    }

    #[test]
    fn fresh_hit_reports_over_outer_first() {
        let (_, h) = handlers(2);
        let mut a = ActiveSensors::default();
        let ev = pick(&mut a, &[h[0], h[1]]);
        assert_eq!(ev, vec![SensorEvent::Over(h[0]), SensorEvent::Over(h[1])]);
        assert_eq!(a.handlers(), &[h[0], h[1]]);
    }

    #[test]
    fn branch_change_leaves_inner_then_enters() {
        let (_, h) = handlers(4);
        let mut a = ActiveSensors::default();
        let _ = pick(&mut a, &[h[0], h[1], h[2]]);
        let ev = pick(&mut a, &[h[0], h[3]]);
        assert_eq!(
            ev,
            vec![
                SensorEvent::Out(h[2]),
                SensorEvent::Out(h[1]),
                SensorEvent::Over(h[3])
            ]
        );
    }

    #[test]
    fn miss_clears_the_list() {
        let (_, h) = handlers(1);
        let mut a = ActiveSensors::default();
        let _ = pick(&mut a, &[h[0]]);
        a.begin_pick();
        let ev = a.finish_pick();
        assert_eq!(ev, vec![SensorEvent::Out(h[0])]);
        assert!(a.handlers().is_empty());
    }

    #[test]
    fn same_hit_is_quiet() {
        let (_, h) = handlers(1);
        let mut a = ActiveSensors::default();
        let _ = pick(&mut a, &[h[0]]);
        assert!(pick(&mut a, &[h[0]]).is_empty());
    }

    #[test]
    fn enablement_reads_fields() {
        let mut scene = Scene::new();
        let off = scene.insert(
            None,
            Sensor {
                enabled: false,
                ..Sensor::default()
            },
        );
        let link = scene.insert(
            None,
            Anchor {
                url: String::from("#next"),
                ..Anchor::default()
            },
        );
        let dead = scene.insert(None, Anchor::default());
        assert!(!SensorHandler::of(&scene, off).unwrap().is_enabled(&scene));
        assert!(SensorHandler::of(&scene, link).unwrap().is_enabled(&scene));
        assert!(!SensorHandler::of(&scene, dead).unwrap().is_enabled(&scene));
    }
}
