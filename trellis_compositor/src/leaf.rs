// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Drawable leaves (shapes, text runs, meshes) and lights.

use alloc::vec::Vec;
use kurbo::{Point, Rect};
use trellis_scene::{Box3, Color, DirtyFlags, Light, LightKind, Matrix4, NodeId, NodeKind};

use crate::camera::{Visibility, classify_planes};
use crate::context::{Collision, PickQuery, PickResult, TraverseMode, TraverseState};
use crate::dispatch::{NodeBehavior, Visitor};
use crate::display_list::{ActiveLight, DrawItem, DrawKind, MeshItem};
use crate::geom;
use crate::sensors::SensorHandler;

/// Visibility of a world-space box against the camera frustum and the active clip planes.
pub(crate) fn visibility(state: &TraverseState, world: &Box3) -> Visibility {
    let Some(camera) = &state.camera else {
        return Visibility::Partial;
    };
    match (
        camera.frustum.classify(world),
        classify_planes(&state.clip_planes, world),
    ) {
        (Visibility::Outside, _) | (_, Visibility::Outside) => Visibility::Outside,
        (Visibility::Inside, Visibility::Inside) => Visibility::Inside,
        _ => Visibility::Partial,
    }
}

/// A light as seen from world space.
pub(crate) fn active_light(id: NodeId, light: &Light, model: &Matrix4) -> ActiveLight {
    ActiveLight {
        node: Some(id),
        kind: light.kind,
        color: light.color,
        intensity: light.intensity,
        location: model.transform_point(light.location),
        direction: model.transform_vector(light.direction).normalize(),
    }
}

/// Flat 2D content: a shape or a text run.
struct Flat {
    bounds: Rect,
    color: Color,
    segments: u32,
}

struct Solid {
    bbox: Box3,
    color: Color,
    triangles: u32,
}

pub(crate) struct LeafBehavior;

impl NodeBehavior for LeafBehavior {
    fn traverse(&self, v: &mut Visitor<'_>, id: NodeId) {
        match v.scene.kind(id) {
            Some(NodeKind::Shape(s)) => {
                let f = Flat {
                    bounds: s.bounds.abs(),
                    color: s.color,
                    segments: s.segments,
                };
                flat(v, id, &f);
            }
            Some(NodeKind::Text(t)) => {
                let f = Flat {
                    bounds: t.bounds.abs(),
                    color: t.color,
                    segments: t.glyphs.max(1),
                };
                flat(v, id, &f);
            }
            Some(NodeKind::Mesh(m)) => {
                let s = Solid {
                    bbox: m.bbox,
                    color: m.color,
                    triangles: m.triangles,
                };
                solid(v, id, &s);
            }
            _ => return,
        }
        v.scene.clear_dirty(id, DirtyFlags::NODE);
    }
}

fn flat(v: &mut Visitor<'_>, id: NodeId, f: &Flat) {
    let mode = v.pass.mode;
    if mode == TraverseMode::Bounds {
        v.state.set_bounds_rect(f.bounds);
        return;
    }
    if v.state.switched_off {
        return;
    }
    match mode {
        TraverseMode::Sort if v.state.is_3d() => {
            push_mesh(v, id, Box3::from_rect(f.bounds), f.color, f.segments);
        }
        TraverseMode::Sort | TraverseMode::Draw2d => {
            let world = geom::transform_rect_bbox(v.state.transform, f.bounds);
            if geom::is_empty(geom::intersect(world, v.state.clip)) {
                return;
            }
            let item = DrawItem {
                node: id,
                kind: DrawKind::Shape { color: f.color },
                transform: v.state.transform,
                local_bounds: f.bounds,
                world_bounds: world,
                clip: v.state.clip,
                opacity: 1.0,
                segments: f.segments,
            };
            if mode == TraverseMode::Sort {
                v.state.display.push(item);
            } else {
                v.backend.draw_shape(&item);
            }
        }
        TraverseMode::Draw3d => draw_mesh_item(v, id),
        TraverseMode::Pick => match v.state.pick {
            Some(PickQuery::Point(p)) if !v.state.is_3d() => pick_point(v, id, f.bounds, p),
            Some(PickQuery::Ray { origin, dir }) => {
                pick_ray(v, id, Box3::from_rect(f.bounds), origin, dir);
            }
            _ => {}
        },
        TraverseMode::Collide if v.state.is_3d() => collide(v, id, Box3::from_rect(f.bounds)),
        _ => {}
    }
}

fn solid(v: &mut Visitor<'_>, id: NodeId, s: &Solid) {
    let mode = v.pass.mode;
    if mode == TraverseMode::Bounds {
        v.state.set_bounds_box(s.bbox);
        return;
    }
    if v.state.switched_off {
        return;
    }
    match mode {
        TraverseMode::Sort => push_mesh(v, id, s.bbox, s.color, s.triangles),
        TraverseMode::Draw3d => draw_mesh_item(v, id),
        TraverseMode::Pick => {
            if let Some(PickQuery::Ray { origin, dir }) = v.state.pick {
                pick_ray(v, id, s.bbox, origin, dir);
            }
        }
        TraverseMode::Collide if v.state.is_3d() => collide(v, id, s.bbox),
        _ => {}
    }
}

/// Record a 3D draw, unless culled. Outside a 3D layer there is nothing to draw into.
fn push_mesh(v: &mut Visitor<'_>, id: NodeId, bbox: Box3, color: Color, triangles: u32) {
    let Some(camera) = &v.state.camera else {
        return;
    };
    let world = bbox.transform(&v.state.model);
    if world.is_empty() {
        return;
    }
    if !v.state.disable_cull
        && v.state.cull != Visibility::Inside
        && visibility(&v.state, &world) == Visibility::Outside
    {
        return;
    }
    let item = MeshItem {
        node: id,
        model: v.state.model,
        bbox,
        color,
        depth: camera.depth(world.center()),
        screen_bounds: camera.project_box(&world),
        lights: v
            .state
            .lights
            .iter()
            .chain(v.state.global_lights.iter())
            .copied()
            .collect(),
        fog: v.state.fog,
        triangles,
    };
    v.state.meshes.push(item);
}

fn draw_mesh_item(v: &mut Visitor<'_>, id: NodeId) {
    if let Some(item) = v.state.mesh_item.take_if(|m| m.node == id) {
        v.backend.draw_mesh(&item);
    }
}

fn record_hit(v: &mut Visitor<'_>, id: NodeId, local_point: Point, distance: Option<f64>) {
    let scene = &*v.scene;
    let enabled: Vec<SensorHandler> = v
        .state
        .sensors
        .iter()
        .copied()
        .filter(|h| h.is_enabled(scene))
        .collect();
    v.res.active.set_hit(&enabled);
    v.state.pick_result = Some(PickResult {
        node: id,
        local_point,
        path: v.state.path.clone(),
        distance,
    });
}

/// Later hits are drawn on top, so the last hit wins.
fn pick_point(v: &mut Visitor<'_>, id: NodeId, local: Rect, p: Point) {
    if !v.state.clip.contains(p) || v.state.transform.determinant().abs() < 1e-12 {
        return;
    }
    let lp = v.state.transform.inverse() * p;
    if local.contains(lp) {
        record_hit(v, id, lp, None);
    }
}

/// The nearest hit along the ray wins.
fn pick_ray(v: &mut Visitor<'_>, id: NodeId, bbox: Box3, origin: trellis_scene::Vec3, dir: trellis_scene::Vec3) {
    let world = bbox.transform(&v.state.model);
    let Some(d) = world.ray_distance(origin, dir) else {
        return;
    };
    let best = v.state.pick_result.as_ref().and_then(|r| r.distance);
    if best.is_some_and(|b| b <= d) {
        return;
    }
    let hit = origin + dir * d;
    let local = v
        .state
        .model
        .inverse()
        .map(|inv| inv.transform_point(hit))
        .unwrap_or(hit);
    record_hit(v, id, Point::new(local.x, local.y), Some(d));
}

fn collide(v: &mut Visitor<'_>, id: NodeId, bbox: Box3) {
    let world = bbox.transform(&v.state.model);
    let Some(probe) = v.state.collision.as_mut() else {
        return;
    };
    if !world.intersects_sphere(probe.center, probe.radius) {
        return;
    }
    let distance = (world.center() - probe.center).length();
    if probe.hit.is_none_or(|h| distance < h.distance) {
        probe.hit = Some(Collision { node: id, distance });
    }
}

pub(crate) struct LightBehavior;

impl NodeBehavior for LightBehavior {
    fn traverse(&self, v: &mut Visitor<'_>, id: NodeId) {
        if v.pass.mode == TraverseMode::Lighting && !v.state.switched_off {
            if let Some(NodeKind::Light(l)) = v.scene.kind(id) {
                // Directional lights are scoped by their group in Sort mode.
                if l.on && l.kind != LightKind::Directional {
                    let light = active_light(id, l, &v.state.model);
                    v.state.global_lights.push(light);
                }
            }
        }
        v.scene.clear_dirty(id, DirtyFlags::NODE);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bindable::BindableRegistry;
    use crate::camera::Camera;
    use kurbo::Size;
    use trellis_scene::Vec3;

    #[test]
    fn visibility_without_camera_is_partial() {
        let mut reg = BindableRegistry::default();
        let state = TraverseState::new(reg.create_scope(), Size::new(10.0, 10.0));
        let b = Box3::new(Vec3::ZERO, Vec3::new(1.0, 1.0, 1.0));
        assert_eq!(visibility(&state, &b), Visibility::Partial);
    }

    #[test]
    fn clip_planes_cut_inside_frustum() {
        let mut reg = BindableRegistry::default();
        let mut state = TraverseState::new(reg.create_scope(), Size::new(100.0, 100.0));
        state.camera = Some(Camera::new(
            Size::new(100.0, 100.0),
            Vec3::new(0.0, 0.0, 10.0),
            core::f64::consts::FRAC_PI_2,
        ));
        let b = Box3::new(Vec3::new(-1.0, -1.0, -1.0), Vec3::new(1.0, 1.0, 1.0));
        assert_eq!(visibility(&state, &b), Visibility::Inside);
        state
            .clip_planes
            .push(crate::camera::Plane::new(Vec3::new(1.0, 0.0, 0.0), -5.0));
        assert_eq!(visibility(&state, &b), Visibility::Outside);
    }

    #[test]
    fn lights_move_with_the_model() {
        let light = Light {
            location: Vec3::new(1.0, 0.0, 0.0),
            direction: Vec3::new(0.0, 0.0, -2.0),
            ..Light::default()
        };
        let mut scene = trellis_scene::Scene::new();
        let id = scene.insert(None, light.clone());
        let m = Matrix4::from_translation(Vec3::new(0.0, 5.0, 0.0));
        let a = active_light(id, &light, &m);
        assert_eq!(a.location, Vec3::new(1.0, 5.0, 0.0));
        assert_eq!(a.direction, Vec3::new(0.0, 0.0, -1.0));
    }
}
