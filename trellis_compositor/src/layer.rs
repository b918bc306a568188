// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! 2D and 3D layers: nested viewports with their own clip, bindable stacks and units.
//!
//! A 3D layer embedded in 2D content renders its subtree into an offscreen
//! target through a perspective camera, reads the result back as a texture and
//! contributes that texture to the enclosing display list.
//!
//! A target that cannot be allocated leaves the layer blank for that frame
//! and is requested again on the next one. A backend without offscreen 3D
//! support disables the layer for good.
//!
//! 3D layers nest only inside 2D content. A 3D layer met inside another 3D
//! layer's subtree contributes nothing but its bounds.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::any::Any;
use kurbo::{Affine, Point, Rect, Size};
use trellis_scene::{
    BindableCategory, Color, DirtyFlags, Layer2d, Layer3d, LightKind, Matrix4, NodeId, NodeKind,
    NodeTag, Vec3,
};

use crate::backend::{PixelFormat, Rasterizer, TargetId, TextureId};
use crate::bindable::BindableScope;
use crate::camera::{Camera, Plane, Visibility};
use crate::context::{Environment, PickQuery, TraverseMode, view_box_transform};
use crate::dispatch::{NodeBehavior, Resources, Visitor};
use crate::display_list::{ActiveLight, DrawItem, DrawKind, sort_back_to_front};
use crate::geom;
use crate::grouping::{self, GroupingStack};

/// Private block of a 2D layer.
#[derive(Debug)]
pub(crate) struct Layer2dPrivate {
    scope: BindableScope,
    group: GroupingStack,
    traversed: bool,
}

/// An offscreen target remembered across frames.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct OffscreenTarget {
    id: TargetId,
    width: u32,
    height: u32,
}

/// Outcome of preparing a 3D layer's offscreen target.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum TargetSetup {
    /// No target could be provided.
    Failed,
    /// A target was allocated for this frame.
    New,
    /// Last frame's target was bound again.
    Reused,
}

/// Private block of a 3D layer.
#[derive(Debug)]
pub(crate) struct Layer3dPrivate {
    scope: BindableScope,
    group: GroupingStack,
    target: Option<OffscreenTarget>,
    texture: Option<TextureId>,
    /// Camera of the last render, reused for picking and collision.
    camera: Option<Camera>,
    world_rect: Rect,
    unsupported: bool,
    traversed: bool,
}

/// Layer rectangle in local units; negative sizes take the parent viewport's.
fn layer_rect(size: Size, viewport: Size) -> Rect {
    let w = if size.width < 0.0 { viewport.width } else { size.width };
    let h = if size.height < 0.0 { viewport.height } else { size.height };
    Rect::new(0.0, 0.0, w.max(0.0), h.max(0.0))
}

/// The four planes bounding `rect` in local space, moved to world space by `model`.
fn rect_planes(rect: Rect, model: &Matrix4) -> Vec<Plane> {
    [
        Plane::new(Vec3::new(1.0, 0.0, 0.0), -rect.x0),
        Plane::new(Vec3::new(-1.0, 0.0, 0.0), rect.x1),
        Plane::new(Vec3::new(0.0, 1.0, 0.0), -rect.y0),
        Plane::new(Vec3::new(0.0, -1.0, 0.0), rect.y1),
    ]
    .into_iter()
    .filter_map(|p| p.transform(model))
    .collect()
}

/// Local units: pixels, or half the smaller layer side.
fn metrics(v: &Visitor<'_>, rect: Rect) -> Affine {
    if v.pass.pixel_metrics {
        Affine::IDENTITY
    } else {
        let s = rect.width().min(rect.height()) / 2.0;
        if s > 0.0 { Affine::scale(s) } else { Affine::IDENTITY }
    }
}

fn tops(v: &Visitor<'_>, scope: BindableScope, categories: &[BindableCategory]) -> Vec<NodeId> {
    categories
        .iter()
        .filter_map(|&c| v.res.bindables.top(scope.stack(c)))
        .collect()
}

fn top_of(v: &Visitor<'_>, scope: BindableScope, category: BindableCategory, tag: NodeTag) -> Option<NodeId> {
    v.res
        .bindables
        .top(scope.stack(category))
        .filter(|&n| v.scene.tag(n) == Some(tag))
}

/// Mark the layer dirty once more after its first traversal, so candidates
/// registered during that traversal take effect.
fn first_traversal(v: &mut Visitor<'_>, id: NodeId, traversed: &mut bool) {
    if !*traversed {
        *traversed = true;
        v.scene.mark_dirty(id, DirtyFlags::NODE);
        v.state.request_redraw = true;
    }
}

fn traverse_2d(v: &mut Visitor<'_>, id: NodeId, layer: &Layer2d, p: &mut Layer2dPrivate) {
    let rect = layer_rect(layer.size, v.state.viewport);
    if v.pass.mode == TraverseMode::Bounds {
        v.state.set_bounds_rect(rect);
        return;
    }
    if v.state.switched_off {
        return;
    }
    let (clip, planes) = if v.state.is_3d() {
        (v.state.clip, rect_planes(rect, &v.state.model))
    } else {
        let world = geom::transform_rect_bbox(v.state.transform, rect);
        if let (TraverseMode::Pick, Some(PickQuery::Point(pt))) = (v.pass.mode, v.state.pick) {
            if !world.contains(pt) {
                return;
            }
        }
        (world, Vec::new())
    };

    let mut v = v.with_clip(clip);
    let mut v = v.with_clip_planes(&planes);
    let mut v = v.with_bindables(p.scope);
    let mut v = v.with_viewport(rect.size());

    for field_node in [layer.background, layer.viewport].into_iter().flatten() {
        v.traverse(field_node);
    }
    let bound = tops(&v, p.scope, &[BindableCategory::Background, BindableCategory::Viewpoint]);
    let env = v.apply_bindables(&bound);

    if v.pass.mode == TraverseMode::Sort && !v.state.is_3d() {
        if let Some(color) = env.background {
            let item = DrawItem {
                node: id,
                kind: DrawKind::Clear { color },
                transform: v.state.transform,
                local_bounds: rect,
                world_bounds: v.state.clip,
                clip: v.state.clip,
                opacity: 1.0,
                segments: 4,
            };
            v.state.display.push(item);
        }
    }

    let local = env
        .view_box
        .map_or(Affine::IDENTITY, |vb| view_box_transform(vb, rect))
        * metrics(&v, rect);
    {
        let mut v = v.with_transform(local);
        grouping::run(&mut v, id, &mut p.group, true);
    }

    let bound_background = top_of(&v, p.scope, BindableCategory::Background, NodeTag::Background);
    let bound_viewport = top_of(&v, p.scope, BindableCategory::Viewpoint, NodeTag::Viewport);
    if let Some(NodeKind::Layer2d(l)) = v.scene.kind_mut_silent(id) {
        l.bound_background = bound_background;
        l.bound_viewport = bound_viewport;
    }
    first_traversal(&mut v, id, &mut p.traversed);
}

/// Bind last frame's target again, or allocate one of the requested size.
fn setup_target(backend: &mut dyn Rasterizer, p: &mut Layer3dPrivate, width: u32, height: u32) -> TargetSetup {
    if let Some(t) = p.target {
        if t.width == width && t.height == height && backend.resume_offscreen_target(t.id).is_ok() {
            return TargetSetup::Reused;
        }
        backend.release_target(t.id);
        p.target = None;
    }
    match backend.begin_offscreen_target(width, height, PixelFormat::Rgba8) {
        Ok(id) => {
            p.target = Some(OffscreenTarget { id, width, height });
            log::debug!("layer target allocated at {}x{}", width, height);
            TargetSetup::New
        }
        Err(e) => {
            log::debug!("layer target {}x{} unavailable: {}", width, height, e);
            TargetSetup::Failed
        }
    }
}

fn mark_unsupported(id: NodeId, p: &mut Layer3dPrivate) {
    p.unsupported = true;
    log::warn!("{:?}: offscreen 3D rendering unavailable, layer disabled", id);
}

fn headlight(camera: &Camera) -> ActiveLight {
    ActiveLight {
        node: None,
        kind: LightKind::Directional,
        color: Color::WHITE,
        intensity: 1.0,
        location: camera.position,
        direction: Vec3::new(0.0, 0.0, -1.0),
    }
}

/// Enter the layer's own 3D world: camera, identity model and a fresh light and mesh set.
fn with_camera<'s, 'a>(
    v: &'s mut Visitor<'a>,
    camera: Camera,
    viewport: Rect,
) -> crate::context::Scope<'s, 'a, impl Sized> {
    v.scope(
        |v| {
            let saved = (
                v.state.transform,
                v.state.model,
                v.state.clip,
                v.state.camera.replace(camera),
                v.state.cull,
                core::mem::take(&mut v.state.clip_planes),
                core::mem::take(&mut v.state.lights),
                core::mem::take(&mut v.state.global_lights),
                core::mem::take(&mut v.state.meshes),
                v.state.fog.take(),
            );
            v.state.transform = Affine::IDENTITY;
            v.state.model = Matrix4::IDENTITY;
            v.state.clip = viewport;
            v.state.cull = Visibility::Partial;
            saved
        },
        |v, (transform, model, clip, camera, cull, planes, lights, global, meshes, fog)| {
            v.state.transform = transform;
            v.state.model = model;
            v.state.clip = clip;
            v.state.camera = camera;
            v.state.cull = cull;
            v.state.clip_planes = planes;
            v.state.lights = lights;
            v.state.global_lights = global;
            v.state.meshes = meshes;
            v.state.fog = fog;
        },
    )
}

/// Render the subtree into the bound target: lights, clear, sort, then draw back to front.
fn render_3d(v: &mut Visitor<'_>, id: NodeId, p: &mut Layer3dPrivate, camera: Camera, env: &Environment) {
    let (tw, th) = (camera.viewport.width, camera.viewport.height);
    let mut v = with_camera(v, camera, Rect::new(0.0, 0.0, tw, th));
    v.state.fog = env.fog;
    {
        let mut v = v.with_mode(TraverseMode::Lighting);
        grouping::run(&mut v, id, &mut p.group, true);
    }
    if env.headlight.unwrap_or(true) {
        if let Some(camera) = &v.state.camera {
            let light = headlight(camera);
            v.state.global_lights.push(light);
        }
    }
    v.backend.clear_surface(
        Rect::new(0.0, 0.0, tw, th),
        env.background.unwrap_or(Color::TRANSPARENT),
    );
    {
        let mut v = v.with_mode(TraverseMode::Sort);
        grouping::run(&mut v, id, &mut p.group, true);
    }
    let mut meshes = core::mem::take(&mut v.state.meshes);
    sort_back_to_front(&mut meshes);
    let mut v = v.with_mode(TraverseMode::Draw3d);
    for item in meshes {
        let node = item.node;
        v.state.mesh_item = Some(item);
        v.traverse(node);
        v.state.mesh_item = None;
    }
}

fn sort_3d(v: &mut Visitor<'_>, id: NodeId, layer: &Layer3d, p: &mut Layer3dPrivate, rect: Rect) {
    let world = geom::transform_rect_bbox(v.state.transform, rect);
    if geom::is_empty(world) {
        return;
    }
    if !v.backend.supports_offscreen_3d() {
        mark_unsupported(id, p);
        return;
    }
    let max = v.config.layer3d_max_texture;
    let (tw, th) = (
        geom::next_pow2(world.width(), max),
        geom::next_pow2(world.height(), max),
    );
    let resized = p.target.is_none_or(|t| (t.width, t.height) != (tw, th));
    // Picks and collisions between frames may already have consumed the dirty bits.
    let dirty = p.group.pending_change
        || v
            .scene
            .dirty(id)
            .intersects(DirtyFlags::NODE | DirtyFlags::CHILD);
    p.world_rect = world;

    let env = {
        let mut v = v.with_bindables(p.scope);
        for field_node in [layer.background, layer.viewpoint, layer.navigation, layer.fog]
            .into_iter()
            .flatten()
        {
            v.traverse(field_node);
        }
        let bound = tops(
            &v,
            p.scope,
            &[
                BindableCategory::Background,
                BindableCategory::Viewpoint,
                BindableCategory::Navigation,
                BindableCategory::Fog,
            ],
        );
        v.apply_bindables(&bound)
    };

    if dirty || resized || p.texture.is_none() || v.state.invalidate_all {
        let setup = setup_target(v.backend, p, tw, th);
        let Some(target) = p.target.filter(|_| setup != TargetSetup::Failed) else {
            log::warn!("{:?}: layer target {}x{} unavailable, skipped this frame", id, tw, th);
            return;
        };
        let (position, fov) = env
            .viewpoint
            .unwrap_or((Vec3::new(0.0, 0.0, 10.0), core::f64::consts::FRAC_PI_4));
        let camera = Camera::new(Size::new(f64::from(tw), f64::from(th)), position, fov);
        p.camera = Some(camera.clone());
        {
            let mut v = v.with_bindables(p.scope);
            render_3d(&mut v, id, p, camera, &env);
        }
        p.group.pending_change = false;
        v.backend.end_offscreen_target();
        match v
            .backend
            .readback(target.id)
            .and_then(|px| v.backend.upload_texture(px))
        {
            Ok(texture) => {
                if let Some(old) = p.texture.replace(texture) {
                    v.backend.release_texture(old);
                }
            }
            Err(e) => log::warn!("{:?}: layer readback failed: {}", id, e),
        }
    }

    let bound_background = top_of(v, p.scope, BindableCategory::Background, NodeTag::Background);
    let bound_viewpoint = top_of(v, p.scope, BindableCategory::Viewpoint, NodeTag::Viewpoint);
    let bound_navigation = top_of(v, p.scope, BindableCategory::Navigation, NodeTag::NavigationInfo);
    let bound_fog = top_of(v, p.scope, BindableCategory::Fog, NodeTag::Fog);
    if let Some(NodeKind::Layer3d(l)) = v.scene.kind_mut_silent(id) {
        l.bound_background = bound_background;
        l.bound_viewpoint = bound_viewpoint;
        l.bound_navigation = bound_navigation;
        l.bound_fog = bound_fog;
    }

    if let Some(texture) = p.texture {
        let item = DrawItem {
            node: id,
            kind: DrawKind::LayerTexture { texture },
            transform: v.state.transform,
            local_bounds: rect,
            world_bounds: world,
            clip: v.state.clip,
            opacity: 1.0,
            segments: 4,
        };
        v.state.display.push(item);
    }
}

fn pick_3d(v: &mut Visitor<'_>, id: NodeId, p: &mut Layer3dPrivate, pt: Point) {
    let world = p.world_rect;
    if geom::is_empty(world) || !world.contains(pt) || !v.state.clip.contains(pt) {
        return;
    }
    let Some(camera) = p.camera.clone() else {
        return;
    };
    let pixel = Point::new(
        (pt.x - world.x0) / world.width() * camera.viewport.width,
        (pt.y - world.y0) / world.height() * camera.viewport.height,
    );
    let Some((origin, dir)) = camera.ray_through(pixel) else {
        return;
    };
    let viewport = Rect::from_origin_size(Point::ORIGIN, camera.viewport);
    let mut v = with_camera(v, camera, viewport);
    let mut v = v.scope(
        |v| v.state.pick.replace(PickQuery::Ray { origin, dir }),
        |v, q| v.state.pick = q,
    );
    let mut v = v.with_bindables(p.scope);
    grouping::run(&mut v, id, &mut p.group, true);
}

fn traverse_3d(v: &mut Visitor<'_>, id: NodeId, layer: &Layer3d, p: &mut Layer3dPrivate) {
    let rect = layer_rect(layer.size, v.state.viewport);
    if v.pass.mode == TraverseMode::Bounds {
        v.state.set_bounds_rect(rect);
        return;
    }
    if v.state.switched_off || p.unsupported {
        return;
    }
    if v.state.is_3d() {
        log::trace!("{:?}: 3D layer nested in 3D content skipped", id);
        return;
    }
    match v.pass.mode {
        TraverseMode::Sort => {
            sort_3d(v, id, layer, p, rect);
            first_traversal(v, id, &mut p.traversed);
        }
        TraverseMode::Draw2d => {
            let item = v.state.draw_item.take_if(|d| d.node == id);
            if let (Some(item), Some(texture)) = (item, p.texture) {
                v.backend.draw_bitmap(&item, texture, item.clip);
            }
        }
        TraverseMode::Pick => {
            if let Some(PickQuery::Point(pt)) = v.state.pick {
                pick_3d(v, id, p, pt);
            }
        }
        TraverseMode::Collide => {
            if let Some(camera) = p.camera.clone() {
                let viewport = Rect::from_origin_size(Point::ORIGIN, camera.viewport);
                let mut v = with_camera(v, camera, viewport);
                grouping::run(&mut v, id, &mut p.group, true);
            }
        }
        _ => {}
    }
}

pub(crate) struct LayerBehavior;

impl NodeBehavior for LayerBehavior {
    fn traverse(&self, v: &mut Visitor<'_>, id: NodeId) {
        match v.scene.kind(id).cloned() {
            Some(NodeKind::Layer2d(layer)) => {
                let _ = v.with_private(
                    id,
                    |v| Layer2dPrivate {
                        scope: v.res.bindables.create_scope(),
                        group: GroupingStack::default(),
                        traversed: false,
                    },
                    |v, p| traverse_2d(v, id, &layer, p),
                );
            }
            Some(NodeKind::Layer3d(layer)) => {
                let _ = v.with_private(
                    id,
                    |v| Layer3dPrivate {
                        scope: v.res.bindables.create_scope(),
                        group: GroupingStack::default(),
                        target: None,
                        texture: None,
                        camera: None,
                        world_rect: Rect::ZERO,
                        unsupported: false,
                        traversed: false,
                    },
                    |v, p| traverse_3d(v, id, &layer, p),
                );
            }
            _ => {}
        }
    }

    fn destroy(
        &self,
        _id: NodeId,
        private: Box<dyn Any>,
        res: &mut Resources,
        backend: &mut dyn Rasterizer,
    ) {
        match private.downcast::<Layer2dPrivate>() {
            Ok(p) => res.bindables.release_scope(p.scope),
            Err(private) => {
                if let Ok(p) = private.downcast::<Layer3dPrivate>() {
                    res.bindables.release_scope(p.scope);
                    if let Some(t) = p.target {
                        backend.release_target(t.id);
                    }
                    if let Some(t) = p.texture {
                        backend.release_texture(t);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_size_takes_parent_viewport() {
        let vp = Size::new(200.0, 100.0);
        assert_eq!(layer_rect(Size::new(-1.0, -1.0), vp), Rect::new(0.0, 0.0, 200.0, 100.0));
        assert_eq!(layer_rect(Size::new(50.0, -1.0), vp), Rect::new(0.0, 0.0, 50.0, 100.0));
    }

    #[test]
    fn rect_planes_bound_the_layer() {
        let planes = rect_planes(Rect::new(0.0, 0.0, 10.0, 5.0), &Matrix4::IDENTITY);
        assert_eq!(planes.len(), 4);
        let inside = Vec3::new(5.0, 2.0, 0.0);
        let outside = Vec3::new(11.0, 2.0, 0.0);
        assert!(planes.iter().all(|p| p.distance(inside) >= 0.0));
        assert!(planes.iter().any(|p| p.distance(outside) < 0.0));
    }
}
