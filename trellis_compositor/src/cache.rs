// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Offscreen group cache: memoize a subtree's pixels into a texture.
//!
//! A grouping node moves through three states:
//!
//! - **Uncached**: never visited by a Sort pass, not eligible for caching, or
//!   its cache was just dropped (content change, allocation failure).
//! - **Observing**: clean Sort passes accumulate traversal time; once the
//!   warm-up is over, coverage, segment and drawable counts decide whether the
//!   group becomes cachable. A cachable group is cached on its next Sort pass.
//!   A group failing the thresholds keeps observing and is re-evaluated after
//!   its next change.
//! - **Cached**: Sort passes record a single cached-group item instead of
//!   visiting children. A change either discards the cache or, for permanent
//!   caches, forces a regeneration before the next blit.
//!
//! Heuristic caches are accounted in a [`CacheRegistry`] against the memory
//! budget; the lowest-priority ones are evicted first.

use alloc::vec::Vec;
use kurbo::{Affine, Rect};
use trellis_scene::{CacheHint, NodeId, NodeKind};

use crate::backend::{PixelFormat, Rasterizer, TextureId};
use crate::context::TraverseMode;
use crate::dispatch::{Resources, Visitor};
use crate::display_list::{DrawItem, DrawKind};
use crate::geom;
use crate::grouping::{self, GroupFlags, GroupingStack};

/// Cache state of a grouping node.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum CacheState {
    /// Children are traversed every frame; no statistics pending.
    Uncached,
    /// Statistics are being gathered.
    Observing,
    /// A texture stands in for the subtree.
    Cached,
}

/// Rolling statistics of an observed group.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub(crate) struct CacheStats {
    pub(crate) traverse_time: u64,
    pub(crate) frames: u32,
    pub(crate) coverage: f64,
    pub(crate) segments: u32,
    pub(crate) drawables: u32,
    pub(crate) priority: f64,
    pub(crate) bytes: usize,
}

/// Backing texture of a cached group.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct GroupCache {
    pub(crate) texture: Option<TextureId>,
    /// Texture rectangle in pixels at `scale`.
    pub(crate) pixel_rect: Rect,
    /// The same rectangle in the group's local coordinates.
    pub(crate) local_rect: Rect,
    pub(crate) scale: f64,
    pub(crate) opacity: f32,
    pub(crate) force_recompute: bool,
}

impl GroupCache {
    fn new(opacity: f32) -> Self {
        Self {
            texture: None,
            pixel_rect: Rect::ZERO,
            local_rect: Rect::ZERO,
            scale: 1.0,
            opacity,
            force_recompute: true,
        }
    }
}

/// Cache bookkeeping embedded in every [`GroupingStack`].
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct CacheSlot {
    /// The subtree changed; the next observed frame is discarded.
    pub(crate) changed: bool,
    /// Observation failed the thresholds; wait for the next change.
    pub(crate) rejected: bool,
    /// Visited by a Sort pass since the cache was last dropped.
    pub(crate) observed: bool,
    /// Dropped during the current Sort pass; observation resumes on the next one.
    pub(crate) dropped: bool,
    pub(crate) stats: CacheStats,
    pub(crate) entry: Option<GroupCache>,
}

impl CacheSlot {
    fn drop_entry(&mut self, backend: &mut dyn Rasterizer) {
        if let Some(GroupCache {
            texture: Some(t), ..
        }) = self.entry.take()
        {
            backend.release_texture(t);
        }
    }

    fn restart(&mut self) {
        self.changed = true;
        self.rejected = false;
        self.stats = CacheStats::default();
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct RegistryEntry {
    node: NodeId,
    priority: f64,
    bytes: usize,
}

/// Heuristic caches ordered by decreasing priority, with memory accounting.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct CacheRegistry {
    entries: Vec<RegistryEntry>,
    total: usize,
}

impl CacheRegistry {
    /// Bytes accounted to registered caches.
    pub(crate) fn total_bytes(&self) -> usize {
        self.total
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn contains(&self, node: NodeId) -> bool {
        self.entries.iter().any(|e| e.node == node)
    }

    /// Register `node` and evict the lowest priorities until within `budget`.
    /// Returns the evicted nodes, which may include `node` itself.
    pub(crate) fn insert(
        &mut self,
        node: NodeId,
        priority: f64,
        bytes: usize,
        budget: usize,
    ) -> Vec<NodeId> {
        self.remove(node);
        let pos = self
            .entries
            .iter()
            .position(|e| e.priority < priority)
            .unwrap_or(self.entries.len());
        self.entries.insert(
            pos,
            RegistryEntry {
                node,
                priority,
                bytes,
            },
        );
        self.total += bytes;
        let mut evicted = Vec::new();
        while self.total > budget {
            let Some(e) = self.entries.pop() else {
                break;
            };
            self.total -= e.bytes;
            evicted.push(e.node);
        }
        evicted
    }

    pub(crate) fn remove(&mut self, node: NodeId) {
        if let Some(i) = self.entries.iter().position(|e| e.node == node) {
            let e = self.entries.remove(i);
            self.total -= e.bytes;
        }
    }
}

/// Current state of a group's cache.
pub(crate) fn state_of(stack: &GroupingStack) -> CacheState {
    if stack.flags.contains(GroupFlags::IS_CACHED) {
        CacheState::Cached
    } else if stack.flags.contains(GroupFlags::IS_CACHABLE) || stack.cache.observed {
        CacheState::Observing
    } else {
        CacheState::Uncached
    }
}

/// Release everything a group's cache holds. Used when the node is destroyed.
pub(crate) fn release(
    id: NodeId,
    slot: &mut CacheSlot,
    res: &mut Resources,
    backend: &mut dyn Rasterizer,
) {
    slot.drop_entry(backend);
    res.caches.remove(id);
}

fn hint_of(v: &Visitor<'_>, id: NodeId) -> (CacheHint, f32) {
    match v.scene.kind(id) {
        Some(NodeKind::Group(g)) => (g.cache, g.opacity),
        Some(NodeKind::Transform2d(t)) => (t.cache, 1.0),
        Some(NodeKind::Layer2d(_) | NodeKind::Layer3d(_)) => (CacheHint::Never, 1.0),
        _ => (CacheHint::Auto, 1.0),
    }
}

/// Drop a cache and send the group back to Uncached.
fn discard(v: &mut Visitor<'_>, id: NodeId, stack: &mut GroupingStack) {
    stack.cache.drop_entry(v.backend);
    stack
        .flags
        .remove(GroupFlags::IS_CACHED | GroupFlags::IS_CACHABLE);
    v.res.caches.remove(id);
    stack.cache.restart();
    stack.cache.observed = false;
    stack.cache.dropped = true;
    log::debug!("{:?}: cached -> uncached", id);
}

/// Cache hook run by the 2D grouping algorithm in Sort and Draw2d modes.
///
/// Returns true when the cache stood in for the children.
pub(crate) fn traverse(v: &mut Visitor<'_>, id: NodeId, stack: &mut GroupingStack) -> bool {
    let (hint, opacity) = hint_of(v, id);
    if hint == CacheHint::Never {
        return false;
    }
    let permanent = hint == CacheHint::Permanent || opacity < 1.0;
    if !v.config.cache.enabled && !permanent {
        return false;
    }
    if v.state.in_group_cache || v.state.switched_off {
        return false;
    }

    if v.pass.mode == TraverseMode::Draw2d {
        return match v.state.draw_item.take_if(|d| d.node == id) {
            Some(item) => draw_cached(v, id, stack, item),
            None => false,
        };
    }

    stack.flags.set(GroupFlags::PERMANENT_CACHE, permanent);
    let dirty = core::mem::take(&mut stack.pending_change);

    if !stack.flags.contains(GroupFlags::IS_CACHED) {
        if permanent || (!dirty && stack.flags.contains(GroupFlags::IS_CACHABLE)) {
            stack.flags.insert(GroupFlags::IS_CACHED);
            stack.cache.drop_entry(v.backend);
            stack.cache.entry = Some(GroupCache::new(opacity));
            log::debug!("{:?}: cachable -> cached", id);
        } else {
            if dirty {
                stack.cache.restart();
                stack.flags.remove(GroupFlags::IS_CACHABLE);
                v.res.caches.remove(id);
            }
            stack.cache.drop_entry(v.backend);
            return false;
        }
    } else if dirty || v.state.invalidate_all {
        if permanent || !dirty {
            if let Some(e) = stack.cache.entry.as_mut() {
                e.force_recompute = true;
            }
        } else {
            discard(v, id, stack);
            return false;
        }
    }

    let scale = geom::max_scale(v.state.transform);
    let tolerance = v.config.cache.scale_tolerance;
    let Some(entry) = stack.cache.entry.as_mut() else {
        return false;
    };
    entry.opacity = opacity;
    if entry.texture.is_some() && (scale - entry.scale).abs() > tolerance * entry.scale {
        if permanent {
            entry.force_recompute = true;
        } else {
            discard(v, id, stack);
            return false;
        }
    }

    let needs_texture = stack
        .cache
        .entry
        .as_ref()
        .is_none_or(|e| e.force_recompute || e.texture.is_none());
    if needs_texture && !regenerate(v, id, stack) {
        stack.cache.drop_entry(v.backend);
        stack
            .flags
            .remove(GroupFlags::IS_CACHED | GroupFlags::IS_CACHABLE);
        v.res.caches.remove(id);
        stack.cache.rejected = true;
        stack.cache.observed = false;
        return false;
    }

    let Some(entry) = stack.cache.entry.as_ref() else {
        return false;
    };
    let Some(texture) = entry.texture else {
        return false;
    };
    let item = DrawItem {
        node: id,
        kind: DrawKind::CachedGroup { texture },
        transform: v.state.transform,
        local_bounds: entry.local_rect,
        world_bounds: geom::transform_rect_bbox(v.state.transform, entry.local_rect),
        clip: v.state.clip,
        opacity: entry.opacity,
        segments: 4,
    };
    v.state.display.push(item);
    true
}

/// Blit a cached group, regenerating a stale texture first.
fn draw_cached(v: &mut Visitor<'_>, id: NodeId, stack: &mut GroupingStack, item: DrawItem) -> bool {
    let stale = stack
        .cache
        .entry
        .as_ref()
        .map(|e| e.force_recompute || e.texture.is_none());
    match stale {
        None => return false,
        Some(true) => {
            if !regenerate(v, id, stack) {
                return false;
            }
        }
        Some(false) => {}
    }
    let Some(entry) = stack.cache.entry.as_ref() else {
        return false;
    };
    let Some(texture) = entry.texture else {
        return false;
    };
    let world = geom::transform_rect_bbox(v.state.transform, entry.local_rect);
    let item = DrawItem {
        kind: DrawKind::CachedGroup { texture },
        local_bounds: entry.local_rect,
        world_bounds: world,
        opacity: entry.opacity,
        ..item
    };
    v.backend.draw_bitmap(&item, texture, item.clip);
    true
}

fn scale_rect(r: Rect, s: f64) -> Rect {
    Rect::new(r.x0 * s, r.y0 * s, r.x1 * s, r.y1 * s)
}

/// Render the children into a fresh texture: a Bounds pass at identity, then
/// Sort and draw into an offscreen target sized to the even pixel bounds.
fn regenerate(v: &mut Visitor<'_>, id: NodeId, stack: &mut GroupingStack) -> bool {
    let local = {
        let mut v = v.scope(
            |v| {
                let saved = (
                    v.state.transform,
                    v.state.model,
                    v.state.in_group_cache,
                    v.state.bounds,
                    v.state.bbox,
                    v.state.for_node.take(),
                );
                v.state.transform = Affine::IDENTITY;
                v.state.model = trellis_scene::Matrix4::IDENTITY;
                v.state.in_group_cache = true;
                saved
            },
            |v, (transform, model, in_cache, bounds, bbox, for_node)| {
                v.state.transform = transform;
                v.state.model = model;
                v.state.in_group_cache = in_cache;
                v.state.bounds = bounds;
                v.state.bbox = bbox;
                v.state.for_node = for_node;
            },
        );
        let mut v = v.with_mode(TraverseMode::Bounds);
        grouping::bounds_union(&mut v, id, stack);
        stack.bounds
    };
    let scale = geom::max_scale(v.state.transform);
    if geom::is_empty(local) || scale <= 0.0 {
        return false;
    }
    let px = geom::pixelize(scale_rect(local, scale));
    let (w, h) = (geom::round_even(px.width()), geom::round_even(px.height()));
    let pixel_rect = Rect::new(px.x0, px.y0, px.x0 + f64::from(w), px.y0 + f64::from(h));

    let target = match v.backend.begin_offscreen_target(w, h, PixelFormat::Rgba8) {
        Ok(t) => t,
        Err(e) => {
            log::warn!("{:?}: cache target {}x{} unavailable ({}), left uncached", id, w, h, e);
            return false;
        }
    };
    {
        let to_target = Affine::translate((-px.x0, -px.y0)) * Affine::scale(scale);
        let mut v = v.scope(
            |v| {
                let saved = (
                    v.pass.mode,
                    v.state.transform,
                    v.state.model,
                    v.state.clip,
                    core::mem::take(&mut v.state.display),
                    v.state.in_group_cache,
                    v.state.cache_too_small,
                    v.state.draw_item.take(),
                );
                v.pass.mode = TraverseMode::Sort;
                v.state.transform = to_target;
                v.state.model = trellis_scene::Matrix4::from_affine(to_target);
                v.state.clip = Rect::new(0.0, 0.0, f64::from(w), f64::from(h));
                v.state.in_group_cache = true;
                saved
            },
            |v, (mode, transform, model, clip, display, in_cache, too_small, draw_item)| {
                v.pass.mode = mode;
                v.state.transform = transform;
                v.state.model = model;
                v.state.clip = clip;
                v.state.display = display;
                v.state.in_group_cache = in_cache;
                v.state.cache_too_small = too_small;
                v.state.draw_item = draw_item;
            },
        );
        grouping::visit_children(&mut v, id, stack);
        let items = v.state.display.take();
        v.flush(items);
    }
    v.backend.end_offscreen_target();
    let pixels = v.backend.readback(target);
    v.backend.release_target(target);
    let texture = match pixels.and_then(|p| v.backend.upload_texture(p)) {
        Ok(t) => t,
        Err(e) => {
            log::warn!("{:?}: cache upload failed ({}), left uncached", id, e);
            return false;
        }
    };
    let opacity = stack.cache.entry.as_ref().map_or(1.0, |e| e.opacity);
    stack.cache.drop_entry(v.backend);
    stack.cache.entry = Some(GroupCache {
        texture: Some(texture),
        pixel_rect,
        local_rect: scale_rect(pixel_rect, 1.0 / scale),
        scale,
        opacity,
        force_recompute: false,
    });
    log::debug!("{:?}: cache regenerated at {}x{}", id, w, h);
    true
}

/// Update the statistics of an observed group after its Sort visit.
///
/// Returns true when the group would need more than the whole budget.
pub(crate) fn evaluate(
    v: &mut Visitor<'_>,
    id: NodeId,
    stack: &mut GroupingStack,
    start: usize,
    elapsed: u64,
    child_too_small: bool,
) -> bool {
    let cfg = v.config.cache;
    if !cfg.enabled
        || v.state.in_group_cache
        || v.state.switched_off
        || stack.flags.intersects(
            GroupFlags::IS_CACHED | GroupFlags::IS_CACHABLE | GroupFlags::PERMANENT_CACHE,
        )
        || hint_of(v, id).0 == CacheHint::Never
    {
        return false;
    }
    let slot = &mut stack.cache;
    let dropped = core::mem::take(&mut slot.dropped);
    if slot.rejected || v.scene.parents(id).is_empty() {
        return false;
    }
    if !dropped {
        slot.observed = true;
    }
    if slot.changed {
        slot.changed = false;
        slot.stats = CacheStats::default();
        return false;
    }
    slot.stats.frames += 1;
    slot.stats.traverse_time += elapsed;
    if slot.stats.frames < cfg.warmup_frames {
        return false;
    }

    let items = v.state.display.since(start);
    let mut drawables = 0_u32;
    let mut segments = 0_u32;
    let mut visible = Vec::with_capacity(items.len());
    let mut area = Rect::ZERO;
    for item in items.iter().filter(|i| i.is_drawable()) {
        drawables += 1;
        segments = segments.saturating_add(item.segments);
        let r = geom::intersect(item.world_bounds, item.clip);
        visible.push(r);
        area = geom::union(area, r);
    }
    let coverage = if geom::is_empty(area) {
        0.0
    } else {
        geom::union_area(&visible) / area.area()
    };
    let bytes = geom::round_even(area.width()) as usize * geom::round_even(area.height()) as usize * 4;
    slot.stats.drawables = drawables;
    slot.stats.segments = segments;
    slot.stats.coverage = coverage;
    slot.stats.bytes = bytes;

    if drawables < cfg.min_drawables
        || segments < cfg.min_segments
        || coverage < cfg.min_coverage
        || child_too_small
        || bytes < cfg.min_cache_bytes
    {
        slot.rejected = true;
        log::trace!(
            "{:?}: not cachable (drawables {}, segments {}, coverage {:.2}, bytes {})",
            id,
            drawables,
            segments,
            coverage,
            bytes
        );
        return false;
    }
    if bytes >= cfg.memory_budget {
        slot.rejected = true;
        return true;
    }

    #[allow(
        clippy::cast_precision_loss,
        reason = "priority is a heuristic ranking."
    )]
    let priority = f64::from(drawables) * 1024.0 * slot.stats.traverse_time as f64
        / bytes as f64
        / f64::from(slot.stats.frames);
    slot.stats.priority = priority;
    stack.flags.insert(GroupFlags::IS_CACHABLE);
    log::debug!("{:?}: observing -> cachable (priority {:.3})", id, priority);

    for evicted in v.res.caches.insert(id, priority, bytes, cfg.memory_budget) {
        if evicted == id {
            stack.flags.remove(GroupFlags::IS_CACHABLE);
            stack.cache.rejected = true;
        } else if let Some(other) = v.scene.private_mut::<GroupingStack>(evicted) {
            other
                .flags
                .remove(GroupFlags::IS_CACHED | GroupFlags::IS_CACHABLE);
            other.cache.drop_entry(v.backend);
            other.cache.rejected = true;
        }
        log::debug!("{:?}: evicted from the cache registry", evicted);
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use trellis_scene::{Group, Scene};

    fn ids(n: usize) -> Vec<NodeId> {
        let mut scene = Scene::new();
        (0..n).map(|_| scene.insert(None, Group::default())).collect()
    }

    #[test]
    fn registry_evicts_lowest_priority_within_budget() {
        let n = ids(3);
        let mut reg = CacheRegistry::default();
        assert!(reg.insert(n[0], 5.0, 400, 1000).is_empty());
        assert!(reg.insert(n[1], 1.0, 400, 1000).is_empty());
        assert_eq!(reg.insert(n[2], 3.0, 400, 1000), vec![n[1]]);
        assert_eq!(reg.total_bytes(), 800);
        assert!(reg.contains(n[0]) && reg.contains(n[2]) && !reg.contains(n[1]));
    }

    #[test]
    fn registry_may_evict_the_newcomer() {
        let n = ids(2);
        let mut reg = CacheRegistry::default();
        let _ = reg.insert(n[0], 5.0, 600, 1000);
        assert_eq!(reg.insert(n[1], 1.0, 600, 1000), vec![n[1]]);
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.total_bytes(), 600);
    }

    #[test]
    fn reinsert_replaces_accounting() {
        let n = ids(1);
        let mut reg = CacheRegistry::default();
        let _ = reg.insert(n[0], 5.0, 600, 1000);
        let _ = reg.insert(n[0], 2.0, 300, 1000);
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.total_bytes(), 300);
        reg.remove(n[0]);
        assert_eq!(reg.total_bytes(), 0);
    }

    #[test]
    fn state_follows_flags_and_frames() {
        let mut stack = GroupingStack::default();
        assert_eq!(state_of(&stack), CacheState::Uncached);
        stack.cache.observed = true;
        assert_eq!(state_of(&stack), CacheState::Observing);
        stack.cache.rejected = true;
        assert_eq!(state_of(&stack), CacheState::Observing);
        stack.cache.observed = false;
        assert_eq!(state_of(&stack), CacheState::Uncached);
        stack.flags.insert(GroupFlags::IS_CACHED);
        assert_eq!(state_of(&stack), CacheState::Cached);
    }
}
