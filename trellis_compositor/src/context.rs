// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Traversal context: per-pass configuration, mutable accumulators, and scope guards.
//!
//! Everything a behavior changes on the way down is changed through a
//! [`Scope`], which puts the previous value back when it goes out of scope.
//! Early returns therefore cannot leak a transform, clip, sensor list or
//! bindable scope into sibling subtrees.

use alloc::vec::Vec;
use core::ops::{Deref, DerefMut};
use kurbo::{Affine, Point, Rect, Size};
use trellis_scene::{Box3, Color, Matrix4, NodeId, Vec3};

use crate::bindable::BindableScope;
use crate::camera::{Camera, Plane, Visibility};
use crate::display_list::{ActiveLight, DisplayList, DrawItem, FogParams, MeshItem};
use crate::dispatch::Visitor;
use crate::geom;
use crate::sensors::{SensorHandler, SensorScope};

/// Purpose of a traversal pass.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TraverseMode {
    /// Compute bounding rectangles and boxes.
    Bounds,
    /// Assemble draw lists (2D) or depth-sorted mesh lists (3D).
    Sort,
    /// Hit-test and collect sensors.
    Pick,
    /// Draw 2D content immediately.
    Draw2d,
    /// Draw one 3D mesh item immediately.
    Draw3d,
    /// Apply the bound environment nodes.
    BindableApply,
    /// Sphere collision against meshes.
    Collide,
    /// Collect global lights.
    Lighting,
}

/// Settings fixed for the duration of one pass.
#[derive(Copy, Clone, Debug, PartialEq)]
pub(crate) struct PassConfig {
    pub(crate) mode: TraverseMode,
    pub(crate) pixel_metrics: bool,
    pub(crate) surface: Size,
    pub(crate) frame: u64,
    pub(crate) sensor_scope: SensorScope,
}

/// What a Pick pass is looking for.
#[derive(Copy, Clone, Debug, PartialEq)]
pub(crate) enum PickQuery {
    /// A surface point in 2D.
    Point(Point),
    /// A world-space ray inside a 3D layer.
    Ray { origin: Vec3, dir: Vec3 },
}

/// The leaf found by a pick.
#[derive(Clone, Debug, PartialEq)]
pub struct PickResult {
    /// Hit leaf.
    pub node: NodeId,
    /// Hit point in the leaf's local coordinates.
    pub local_point: Point,
    /// Nodes from the traversal root down to the leaf.
    pub path: Vec<NodeId>,
    /// Distance along the pick ray, for hits inside 3D layers.
    pub distance: Option<f64>,
}

/// Nearest mesh touched by a collision probe.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Collision {
    /// Colliding node.
    pub node: NodeId,
    /// Distance from the probe center to the center of the node's box.
    pub distance: f64,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub(crate) struct CollisionProbe {
    pub(crate) center: Vec3,
    pub(crate) radius: f64,
    pub(crate) hit: Option<Collision>,
}

/// Effects of the bound environment nodes, filled by a BindableApply pass.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub(crate) struct Environment {
    pub(crate) background: Option<Color>,
    pub(crate) view_box: Option<Rect>,
    pub(crate) viewpoint: Option<(Vec3, f64)>,
    pub(crate) headlight: Option<bool>,
    pub(crate) fog: Option<FogParams>,
}

/// Mutable accumulators threaded through the walk.
#[derive(Debug)]
pub(crate) struct TraverseState {
    // 2D
    pub(crate) transform: Affine,
    pub(crate) clip: Rect,
    pub(crate) bounds: Rect,
    pub(crate) viewport: Size,
    pub(crate) display: DisplayList,
    pub(crate) draw_item: Option<DrawItem>,

    // 3D
    pub(crate) model: Matrix4,
    pub(crate) bbox: Box3,
    pub(crate) clip_planes: Vec<Plane>,
    pub(crate) cull: Visibility,
    pub(crate) camera: Option<Camera>,
    pub(crate) lights: Vec<ActiveLight>,
    pub(crate) global_lights: Vec<ActiveLight>,
    pub(crate) meshes: Vec<MeshItem>,
    pub(crate) mesh_item: Option<MeshItem>,
    pub(crate) fog: Option<FogParams>,

    // picking and collision
    pub(crate) sensors: Vec<SensorHandler>,
    pub(crate) pick: Option<PickQuery>,
    pub(crate) pick_result: Option<PickResult>,
    pub(crate) collision: Option<CollisionProbe>,

    // environment
    pub(crate) bindables: BindableScope,
    pub(crate) env: Environment,

    pub(crate) switched_off: bool,
    pub(crate) disable_cull: bool,
    pub(crate) invalidate_all: bool,
    pub(crate) in_group_cache: bool,
    pub(crate) cache_too_small: bool,
    pub(crate) request_redraw: bool,

    pub(crate) for_node: Option<NodeId>,
    pub(crate) for_node_bounds: Option<Rect>,
    pub(crate) path: Vec<NodeId>,
    pub(crate) visited: usize,
}

impl TraverseState {
    pub(crate) fn new(bindables: BindableScope, surface: Size) -> Self {
        Self {
            transform: Affine::IDENTITY,
            clip: Rect::from_origin_size(Point::ORIGIN, surface),
            bounds: Rect::ZERO,
            viewport: surface,
            display: DisplayList::default(),
            draw_item: None,
            model: Matrix4::IDENTITY,
            bbox: Box3::EMPTY,
            clip_planes: Vec::new(),
            cull: Visibility::Partial,
            camera: None,
            lights: Vec::new(),
            global_lights: Vec::new(),
            meshes: Vec::new(),
            mesh_item: None,
            fog: None,
            sensors: Vec::new(),
            pick: None,
            pick_result: None,
            collision: None,
            bindables,
            env: Environment::default(),
            switched_off: false,
            disable_cull: false,
            invalidate_all: false,
            in_group_cache: false,
            cache_too_small: false,
            request_redraw: false,
            for_node: None,
            for_node_bounds: None,
            path: Vec::new(),
            visited: 0,
        }
    }

    /// True inside a 3D layer.
    pub(crate) fn is_3d(&self) -> bool {
        self.camera.is_some()
    }

    /// Reset the bounds slot before a child reports into it.
    pub(crate) fn reset_bounds(&mut self) {
        self.bounds = Rect::ZERO;
        self.bbox = Box3::EMPTY;
    }

    /// Report `rect` as the current node's bounds, in both forms.
    pub(crate) fn set_bounds_rect(&mut self, rect: Rect) {
        self.bounds = if geom::is_empty(rect) { Rect::ZERO } else { rect };
        self.bbox = Box3::from_rect(self.bounds);
    }

    /// Report `bbox` as the current node's bounds, in both forms.
    pub(crate) fn set_bounds_box(&mut self, bbox: Box3) {
        self.bbox = bbox;
        self.bounds = if bbox.is_empty() {
            Rect::ZERO
        } else {
            bbox.to_rect()
        };
    }
}

/// Restores a piece of traversal state when dropped.
pub(crate) struct Scope<'s, 'a, S> {
    visitor: &'s mut Visitor<'a>,
    saved: Option<S>,
    restore: fn(&mut Visitor<'a>, S),
}

impl<'a, S> Deref for Scope<'_, 'a, S> {
    type Target = Visitor<'a>;

    fn deref(&self) -> &Visitor<'a> {
        self.visitor
    }
}

impl<'a, S> DerefMut for Scope<'_, 'a, S> {
    fn deref_mut(&mut self) -> &mut Visitor<'a> {
        self.visitor
    }
}

impl<S> Drop for Scope<'_, '_, S> {
    fn drop(&mut self) {
        if let Some(saved) = self.saved.take() {
            (self.restore)(self.visitor, saved);
        }
    }
}

impl<'a> Visitor<'a> {
    /// Run `enter`, keep what it returns, and hand it to `restore` on drop.
    pub(crate) fn scope<S>(
        &mut self,
        enter: impl FnOnce(&mut Self) -> S,
        restore: fn(&mut Self, S),
    ) -> Scope<'_, 'a, S> {
        let saved = enter(self);
        Scope {
            visitor: self,
            saved: Some(saved),
            restore,
        }
    }

    pub(crate) fn with_mode(&mut self, mode: TraverseMode) -> Scope<'_, 'a, TraverseMode> {
        self.scope(
            |v| core::mem::replace(&mut v.pass.mode, mode),
            |v, old| v.pass.mode = old,
        )
    }

    /// Append `local` to both the 2D transform and the 3D model matrix.
    pub(crate) fn with_transform(&mut self, local: Affine) -> Scope<'_, 'a, (Affine, Matrix4)> {
        self.scope(
            |v| {
                let saved = (v.state.transform, v.state.model);
                v.state.transform *= local;
                v.state.model = v.state.model * Matrix4::from_affine(local);
                saved
            },
            |v, (t, m)| {
                v.state.transform = t;
                v.state.model = m;
            },
        )
    }

    /// Append `local` to the 3D model matrix.
    pub(crate) fn with_model(&mut self, local: Matrix4) -> Scope<'_, 'a, Matrix4> {
        self.scope(
            |v| {
                let saved = v.state.model;
                v.state.model = v.state.model * local;
                saved
            },
            |v, m| v.state.model = m,
        )
    }

    /// Intersect the clip with a surface-space rectangle.
    pub(crate) fn with_clip(&mut self, rect: Rect) -> Scope<'_, 'a, Rect> {
        self.scope(
            |v| {
                let saved = v.state.clip;
                v.state.clip = geom::intersect(saved, rect);
                saved
            },
            |v, c| v.state.clip = c,
        )
    }

    pub(crate) fn with_clip_planes(&mut self, planes: &[Plane]) -> Scope<'_, 'a, usize> {
        self.scope(
            |v| {
                let saved = v.state.clip_planes.len();
                v.state.clip_planes.extend_from_slice(planes);
                saved
            },
            |v, n| v.state.clip_planes.truncate(n),
        )
    }

    pub(crate) fn with_cull(&mut self, cull: Visibility) -> Scope<'_, 'a, Visibility> {
        self.scope(
            |v| core::mem::replace(&mut v.state.cull, cull),
            |v, c| v.state.cull = c,
        )
    }

    pub(crate) fn with_bindables(&mut self, scope: BindableScope) -> Scope<'_, 'a, BindableScope> {
        self.scope(
            |v| core::mem::replace(&mut v.state.bindables, scope),
            |v, s| v.state.bindables = s,
        )
    }

    pub(crate) fn with_sensors(
        &mut self,
        sensors: Vec<SensorHandler>,
    ) -> Scope<'_, 'a, Vec<SensorHandler>> {
        self.scope(
            |v| core::mem::replace(&mut v.state.sensors, sensors),
            |v, s| v.state.sensors = s,
        )
    }

    pub(crate) fn with_local_lights(&mut self, lights: &[ActiveLight]) -> Scope<'_, 'a, usize> {
        self.scope(
            |v| {
                let saved = v.state.lights.len();
                v.state.lights.extend_from_slice(lights);
                saved
            },
            |v, n| v.state.lights.truncate(n),
        )
    }

    pub(crate) fn with_switched_off(&mut self, off: bool) -> Scope<'_, 'a, bool> {
        self.scope(
            |v| {
                let next = v.state.switched_off || off;
                core::mem::replace(&mut v.state.switched_off, next)
            },
            |v, s| v.state.switched_off = s,
        )
    }

    pub(crate) fn with_invalidate_all(&mut self, on: bool) -> Scope<'_, 'a, bool> {
        self.scope(
            |v| {
                let next = v.state.invalidate_all || on;
                core::mem::replace(&mut v.state.invalidate_all, next)
            },
            |v, s| v.state.invalidate_all = s,
        )
    }

    pub(crate) fn with_disable_cull(&mut self, on: bool) -> Scope<'_, 'a, bool> {
        self.scope(
            |v| {
                let next = v.state.disable_cull || on;
                core::mem::replace(&mut v.state.disable_cull, next)
            },
            |v, s| v.state.disable_cull = s,
        )
    }

    /// Set the viewport size seen by nested layers.
    pub(crate) fn with_viewport(&mut self, size: Size) -> Scope<'_, 'a, Size> {
        self.scope(
            |v| core::mem::replace(&mut v.state.viewport, size),
            |v, s| v.state.viewport = s,
        )
    }

    /// Run a BindableApply pass over `nodes` and return the collected effects.
    pub(crate) fn apply_bindables(&mut self, nodes: &[NodeId]) -> Environment {
        let mut v = self.scope(
            |v| core::mem::take(&mut v.state.env),
            |v, env| v.state.env = env,
        );
        let mut v = v.with_mode(TraverseMode::BindableApply);
        for &n in nodes {
            v.traverse(n);
        }
        v.state.env
    }
}

/// Map a 2D viewport's view box onto `target`.
pub(crate) fn view_box_transform(view_box: Rect, target: Rect) -> Affine {
    if geom::is_empty(view_box) || geom::is_empty(target) {
        return Affine::IDENTITY;
    }
    let sx = target.width() / view_box.width();
    let sy = target.height() / view_box.height();
    Affine::translate(target.origin().to_vec2())
        * Affine::scale_non_uniform(sx, sy)
        * Affine::translate(-view_box.origin().to_vec2())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn view_box_maps_corners() {
        let a = view_box_transform(
            Rect::new(10.0, 10.0, 20.0, 20.0),
            Rect::new(0.0, 0.0, 100.0, 50.0),
        );
        assert_eq!(a * Point::new(10.0, 10.0), Point::new(0.0, 0.0));
        assert_eq!(a * Point::new(20.0, 20.0), Point::new(100.0, 50.0));
        assert_eq!(
            view_box_transform(Rect::ZERO, Rect::new(0.0, 0.0, 1.0, 1.0)),
            Affine::IDENTITY
        );
    }

    #[test]
    fn bounds_slot_keeps_both_forms() {
        let mut reg = crate::bindable::BindableRegistry::default();
        let mut s = TraverseState::new(reg.create_scope(), Size::new(10.0, 10.0));
        s.set_bounds_rect(Rect::new(0.0, 0.0, 2.0, 3.0));
        assert_eq!(s.bbox.to_rect(), Rect::new(0.0, 0.0, 2.0, 3.0));
        s.set_bounds_box(Box3::EMPTY);
        assert_eq!(s.bounds, Rect::ZERO);
        s.reset_bounds();
        assert!(s.bbox.is_empty());
    }
}
