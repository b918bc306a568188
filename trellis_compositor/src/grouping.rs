// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Child visiting for every container node: plain, ordered, switch, layout and 3D groups.
//!
//! Each grouping node owns a [`GroupingStack`] as its private block. It caches
//! the union of the children's bounds, the sensor and light inventories, and
//! the per-child placement records of layout groups. All of it is rebuilt only
//! when the node is `NODE` or `CHILD` dirty.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::any::Any;
use kurbo::{Affine, Rect, Vec2};
use trellis_scene::{
    Box3, DirtyFlags, Layout, LayoutDirection, LightKind, Matrix4, NodeId, NodeKind, NodeTag,
    Vec3,
};

use crate::backend::Rasterizer;
use crate::cache::{self, CacheSlot};
use crate::camera::Visibility;
use crate::context::TraverseMode;
use crate::dispatch::{NodeBehavior, Resources, Visitor};
use crate::display_list::{DrawItem, DrawKind};
use crate::geom;
use crate::leaf::{active_light, visibility};
use crate::sensors::{SensorHandler, SensorScope};

bitflags::bitflags! {
    /// Derived facts about a grouping node.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub(crate) struct GroupFlags: u8 {
        const HAS_SENSORS     = 1 << 0;
        const HAS_LIGHTS      = 1 << 1;
        /// A descendant cannot be bounded; never cull this group.
        const SKIP_CULLING    = 1 << 2;
        const IS_CACHABLE     = 1 << 3;
        const IS_CACHED       = 1 << 4;
        const PERMANENT_CACHE = 1 << 5;
        /// The group is itself a sensor (anchor).
        const IS_ANCHOR       = 1 << 6;
    }
}

/// Original and post-layout bounds of one child of a layout group.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct ChildPlacement {
    pub(crate) child: NodeId,
    pub(crate) original: Rect,
    pub(crate) placed: Rect,
    pub(crate) scroll: Vec2,
    pub(crate) ascent: f64,
    pub(crate) descent: f64,
    /// Line the child was flowed into.
    pub(crate) line: usize,
}

impl ChildPlacement {
    /// Translation moving the child from its original to its placed position.
    pub(crate) fn offset(&self) -> Vec2 {
        self.placed.origin() - self.original.origin() + self.scroll
    }
}

/// Per-group traversal state.
#[derive(Debug, Default)]
pub(crate) struct GroupingStack {
    pub(crate) flags: GroupFlags,
    pub(crate) bounds: Rect,
    pub(crate) bbox: Box3,
    pub(crate) bounds_valid: bool,
    pub(crate) sensors: Vec<NodeId>,
    pub(crate) local_lights: Vec<NodeId>,
    pub(crate) cache: CacheSlot,
    pub(crate) placements: Vec<ChildPlacement>,
    pub(crate) order: Vec<usize>,
    pub(crate) choice: Option<usize>,
    /// Previously chosen child of a switch, owed one switched-off Bounds visit.
    pub(crate) switched_from_bounds: Option<usize>,
    /// The same child, owed one switched-off Sort visit.
    pub(crate) switched_from_sort: Option<usize>,
    /// A change seen by any pass and not yet consumed by the cache.
    pub(crate) pending_change: bool,
}

/// Stable ascending permutation of `keys`; missing keys count as zero.
pub(crate) fn compute_order(keys: &[f64], len: usize) -> Vec<usize> {
    let key = |i: usize| keys.get(i).copied().unwrap_or(0.0);
    let mut order: Vec<usize> = (0..len).collect();
    order.sort_by(|&a, &b| key(a).total_cmp(&key(b)));
    order
}

/// Flow placements along the layout direction, wrapping into new lines.
pub(crate) fn flow(placements: &mut [ChildPlacement], layout: &Layout) {
    let mut cursor = 0.0;
    let mut line_start = 0.0;
    let mut line_extent: f64 = 0.0;
    let mut line = 0;
    for p in placements {
        let size = p.original.size();
        let (along, across) = match layout.direction {
            LayoutDirection::Horizontal => (size.width, size.height),
            LayoutDirection::Vertical => (size.height, size.width),
        };
        if layout.wrap > 0.0 && cursor > 0.0 && cursor + along > layout.wrap {
            line += 1;
            line_start += line_extent + layout.spacing;
            line_extent = 0.0;
            cursor = 0.0;
        }
        let origin = match layout.direction {
            LayoutDirection::Horizontal => kurbo::Point::new(cursor, line_start),
            LayoutDirection::Vertical => kurbo::Point::new(line_start, cursor),
        };
        p.placed = Rect::from_origin_size(origin, size);
        p.scroll = layout.scroll;
        p.line = line;
        cursor += along + layout.spacing;
        line_extent = line_extent.max(across);
    }
}

fn translate_box(b: Box3, off: Vec2) -> Box3 {
    if b.is_empty() || off == Vec2::ZERO {
        return b;
    }
    let d = Vec3::new(off.x, off.y, 0.0);
    Box3::new(b.min + d, b.max + d)
}

/// Re-derive inventories and arrangement after a change. Clears `NODE` and `CHILD`.
fn refresh(v: &mut Visitor<'_>, id: NodeId, stack: &mut GroupingStack, dirty: DirtyFlags) {
    v.scene.clear_dirty(id, DirtyFlags::NODE | DirtyFlags::CHILD);
    stack.bounds_valid = false;
    stack.pending_change = true;
    let children = v.scene.child_ids(id);
    let kind = v.scene.kind(id).cloned();

    if dirty.contains(DirtyFlags::CHILD) {
        stack.sensors.clear();
        stack.local_lights.clear();
        for &c in &children {
            match v.scene.kind(c) {
                Some(NodeKind::Sensor(_)) => stack.sensors.push(c),
                Some(NodeKind::Light(l)) if l.kind == LightKind::Directional => {
                    stack.local_lights.push(c);
                }
                _ => {}
            }
        }
        let anchor = matches!(kind, Some(NodeKind::Anchor(_)));
        stack.flags.set(GroupFlags::IS_ANCHOR, anchor);
        stack
            .flags
            .set(GroupFlags::HAS_SENSORS, anchor || !stack.sensors.is_empty());
        stack
            .flags
            .set(GroupFlags::HAS_LIGHTS, !stack.local_lights.is_empty());
    }

    match kind {
        Some(NodeKind::OrderedGroup(o)) => stack.order = compute_order(&o.order, children.len()),
        Some(NodeKind::Switch(s)) => {
            let choice = usize::try_from(s.which_choice)
                .ok()
                .filter(|&i| i < children.len());
            if choice != stack.choice {
                stack.switched_from_bounds = stack.choice;
                stack.switched_from_sort = stack.choice;
                stack.choice = choice;
            }
        }
        Some(NodeKind::Layout(l)) => compute_layout(v, &children, stack, &l),
        _ => {}
    }
}

fn compute_layout(v: &mut Visitor<'_>, children: &[NodeId], stack: &mut GroupingStack, layout: &Layout) {
    let mut placements = Vec::with_capacity(children.len());
    {
        let mut v = v.with_mode(TraverseMode::Bounds);
        for &c in children {
            v.state.reset_bounds();
            v.traverse(c);
            let (ascent, descent) = match v.scene.kind(c) {
                Some(NodeKind::Text(t)) => (t.ascent, t.descent),
                _ => (0.0, 0.0),
            };
            let original = v.state.bounds;
            placements.push(ChildPlacement {
                child: c,
                original,
                placed: original,
                scroll: Vec2::ZERO,
                ascent,
                descent,
                line: 0,
            });
        }
    }
    flow(&mut placements, layout);
    stack.placements = placements;
}

/// Children in visiting order, with the translation each is visited under.
fn arranged(v: &Visitor<'_>, id: NodeId, stack: &GroupingStack) -> Vec<(NodeId, Vec2)> {
    let children = v.scene.child_ids(id);
    match v.scene.tag(id) {
        Some(NodeTag::OrderedGroup) => stack
            .order
            .iter()
            .filter_map(|&i| children.get(i).map(|&c| (c, Vec2::ZERO)))
            .collect(),
        Some(NodeTag::Switch) => stack
            .choice
            .and_then(|i| children.get(i))
            .map(|&c| (c, Vec2::ZERO))
            .into_iter()
            .collect(),
        Some(NodeTag::Layout) => stack
            .placements
            .iter()
            .filter(|p| children.contains(&p.child))
            .map(|p| (p.child, p.offset()))
            .collect(),
        _ => children.into_iter().map(|c| (c, Vec2::ZERO)).collect(),
    }
}

fn visit_one(v: &mut Visitor<'_>, child: NodeId, offset: Vec2) {
    if offset == Vec2::ZERO {
        v.traverse(child);
    } else {
        let mut v = v.with_transform(Affine::translate(offset));
        v.traverse(child);
    }
}

/// Give a switch's previous choice one last visit, switched off, in the next
/// Bounds pass and the next Sort pass. Other passes leave it pending.
fn visit_switched_from(v: &mut Visitor<'_>, id: NodeId, stack: &mut GroupingStack) {
    let pending = match v.pass.mode {
        TraverseMode::Bounds => &mut stack.switched_from_bounds,
        TraverseMode::Sort => &mut stack.switched_from_sort,
        _ => return,
    };
    let Some(prev) = pending.take() else {
        return;
    };
    let child = v.scene.children(id).get(prev).map(|c| c.id);
    if let Some(c) = child {
        let mut v = v.with_switched_off(true);
        v.traverse(c);
    }
}

/// Visit the children in arrangement order, with no bookkeeping.
pub(crate) fn visit_children(v: &mut Visitor<'_>, id: NodeId, stack: &mut GroupingStack) {
    visit_switched_from(v, id, stack);
    for (c, off) in arranged(v, id, stack) {
        visit_one(v, c, off);
    }
}

/// Bounds-mode union of the children, stored into the stack and reported.
pub(crate) fn bounds_union(v: &mut Visitor<'_>, id: NodeId, stack: &mut GroupingStack) {
    visit_switched_from(v, id, stack);
    let outer_escape = core::mem::replace(&mut v.state.disable_cull, false);
    let mut rect = Rect::ZERO;
    let mut bbox = Box3::EMPTY;
    for (c, off) in arranged(v, id, stack) {
        v.state.reset_bounds();
        visit_one(v, c, off);
        let child = v.state.bounds;
        if !geom::is_empty(child) {
            rect = geom::union(rect, child + off);
        }
        bbox = bbox.union(&translate_box(v.state.bbox, off));
    }
    let escape = v.state.disable_cull;
    stack.flags.set(GroupFlags::SKIP_CULLING, escape);
    v.state.disable_cull = outer_escape || escape;
    if !bbox.is_empty() {
        rect = geom::union(rect, bbox.to_rect());
    }
    stack.bounds = rect;
    stack.bbox = bbox;
    stack.bounds_valid = true;
    v.state.bounds = rect;
    v.state.bbox = bbox;
}

fn pick_children(v: &mut Visitor<'_>, id: NodeId, stack: &mut GroupingStack) {
    if !stack.flags.contains(GroupFlags::HAS_SENSORS) {
        visit_children(v, id, stack);
        return;
    }
    let scene = &*v.scene;
    let own = stack
        .flags
        .contains(GroupFlags::IS_ANCHOR)
        .then_some(id)
        .into_iter()
        .chain(stack.sensors.iter().copied())
        .filter_map(|n| SensorHandler::of(scene, n));
    let list: Vec<SensorHandler> = match v.pass.sensor_scope {
        SensorScope::Nearest => own.collect(),
        SensorScope::Accumulate => v.state.sensors.iter().copied().chain(own).collect(),
    };
    let mut v = v.with_sensors(list);
    visit_children(&mut v, id, stack);
}

fn sort_children(v: &mut Visitor<'_>, id: NodeId, stack: &mut GroupingStack) {
    let start = v.state.display.len();
    let color = v.scene.dirty(id).contains(DirtyFlags::COLOR);
    let t0 = v.clock.now_micros();
    let outer_too_small = core::mem::replace(&mut v.state.cache_too_small, false);
    {
        let mut v = v.with_invalidate_all(color);
        visit_children(&mut v, id, stack);
    }
    let elapsed = v.clock.now_micros().saturating_sub(t0);
    let child_too_small = v.state.cache_too_small;
    let own_too_small = cache::evaluate(v, id, stack, start, elapsed, child_too_small);
    v.state.cache_too_small = outer_too_small || child_too_small || own_too_small;
    if color {
        v.scene.clear_dirty(id, DirtyFlags::COLOR);
    }
    if v.res.focus == Some(id) {
        highlight(v, id, start);
    }
}

fn highlight(v: &mut Visitor<'_>, id: NodeId, start: usize) {
    let world = v
        .state
        .display
        .since(start)
        .iter()
        .fold(Rect::ZERO, |acc, i| geom::union(acc, i.world_bounds));
    if geom::is_empty(world) {
        return;
    }
    v.state.display.push(DrawItem {
        node: id,
        kind: DrawKind::Highlight {
            color: trellis_scene::Color::rgb(255, 160, 0),
        },
        transform: v.state.transform,
        local_bounds: world,
        world_bounds: world,
        clip: v.state.clip,
        opacity: 1.0,
        segments: 4,
    });
}

/// The 2D grouping algorithm.
pub(crate) fn traverse_2d(v: &mut Visitor<'_>, id: NodeId, stack: &mut GroupingStack) {
    let dirty = v.scene.dirty(id);
    let mode = v.pass.mode;
    if dirty.intersects(DirtyFlags::NODE | DirtyFlags::CHILD) {
        refresh(v, id, stack, dirty);
    } else if mode == TraverseMode::Bounds && stack.bounds_valid && v.state.for_node.is_none() {
        v.state.bounds = stack.bounds;
        v.state.bbox = stack.bbox;
        return;
    }
    if matches!(mode, TraverseMode::Sort | TraverseMode::Draw2d) && cache::traverse(v, id, stack) {
        return;
    }
    match mode {
        TraverseMode::Bounds => bounds_union(v, id, stack),
        TraverseMode::Pick => pick_children(v, id, stack),
        TraverseMode::Sort => sort_children(v, id, stack),
        _ => visit_children(v, id, stack),
    }
}

/// The 3D grouping algorithm: frustum culling and scoped directional lights.
pub(crate) fn traverse_3d(v: &mut Visitor<'_>, id: NodeId, stack: &mut GroupingStack, culling: bool) {
    let dirty = v.scene.dirty(id);
    let mode = v.pass.mode;
    if dirty.intersects(DirtyFlags::NODE | DirtyFlags::CHILD) {
        refresh(v, id, stack, dirty);
    }
    if mode == TraverseMode::Bounds {
        if stack.bounds_valid && v.state.for_node.is_none() {
            v.state.bounds = stack.bounds;
            v.state.bbox = stack.bbox;
        } else {
            bounds_union(v, id, stack);
        }
        return;
    }
    match mode {
        TraverseMode::Sort => {
            if !stack.bounds_valid {
                let saved = (v.state.bounds, v.state.bbox);
                {
                    let mut v = v.with_mode(TraverseMode::Bounds);
                    bounds_union(&mut v, id, stack);
                }
                (v.state.bounds, v.state.bbox) = saved;
            }
            let mut cull = v.state.cull;
            if culling
                && cull != Visibility::Inside
                && !stack.flags.contains(GroupFlags::SKIP_CULLING)
                && !v.state.disable_cull
                && !stack.bbox.is_empty()
            {
                let world = stack.bbox.transform(&v.state.model);
                cull = visibility(&v.state, &world);
                if cull == Visibility::Outside {
                    log::trace!("{:?}: culled", id);
                    return;
                }
            }
            let lights: Vec<_> = if stack.flags.contains(GroupFlags::HAS_LIGHTS) {
                stack
                    .local_lights
                    .iter()
                    .filter_map(|&l| match v.scene.kind(l) {
                        Some(NodeKind::Light(light)) if light.on => {
                            Some(active_light(l, light, &v.state.model))
                        }
                        _ => None,
                    })
                    .collect()
            } else {
                Vec::new()
            };
            let mut v = v.with_cull(cull);
            let mut v = v.with_local_lights(&lights);
            visit_children(&mut v, id, stack);
        }
        TraverseMode::Pick => pick_children(v, id, stack),
        _ => visit_children(v, id, stack),
    }
}

/// Route to the 2D or 3D algorithm depending on the context.
pub(crate) fn run(v: &mut Visitor<'_>, id: NodeId, stack: &mut GroupingStack, culling: bool) {
    if v.state.is_3d() {
        traverse_3d(v, id, stack, culling);
    } else {
        traverse_2d(v, id, stack);
    }
}

enum LocalTransform {
    None,
    Affine(Affine),
    Matrix(Matrix4),
}

pub(crate) struct GroupingBehavior;

impl NodeBehavior for GroupingBehavior {
    fn traverse(&self, v: &mut Visitor<'_>, id: NodeId) {
        let (local, culling) = match v.scene.kind(id) {
            Some(NodeKind::Transform2d(t)) => (LocalTransform::Affine(t.transform), true),
            Some(NodeKind::Transform3d(t)) => (LocalTransform::Matrix(t.transform), t.culling),
            Some(NodeKind::Group3d(g)) => (LocalTransform::None, g.culling),
            Some(_) => (LocalTransform::None, true),
            None => return,
        };
        // A cached group re-entered for drawing already carries its full transform.
        let reentry = v.pass.mode == TraverseMode::Draw2d
            && v.state.draw_item.as_ref().is_some_and(|d| d.node == id);
        let _ = v.with_private(
            id,
            |_| GroupingStack::default(),
            |v, stack| match local {
                LocalTransform::Affine(a) if !reentry => {
                    {
                        let mut v = v.with_transform(a);
                        run(&mut v, id, stack, culling);
                    }
                    if v.pass.mode == TraverseMode::Bounds {
                        let inner = v.state.bbox;
                        v.state.bounds = geom::transform_rect_bbox(a, v.state.bounds);
                        v.state.bbox = inner.transform(&Matrix4::from_affine(a));
                    }
                }
                LocalTransform::Matrix(m) if !reentry => {
                    if v.state.is_3d() {
                        let mut v = v.with_model(m);
                        run(&mut v, id, stack, culling);
                    } else {
                        let mut v = v.with_transform(m.to_affine());
                        run(&mut v, id, stack, culling);
                    }
                    if v.pass.mode == TraverseMode::Bounds {
                        let bbox = v.state.bbox.transform(&m);
                        v.state.set_bounds_box(bbox);
                    }
                }
                _ => run(v, id, stack, culling),
            },
        );
    }

    fn destroy(
        &self,
        id: NodeId,
        private: Box<dyn Any>,
        res: &mut Resources,
        backend: &mut dyn Rasterizer,
    ) {
        if let Ok(mut stack) = private.downcast::<GroupingStack>() {
            cache::release(id, &mut stack.cache, res, backend);
        }
    }
}
