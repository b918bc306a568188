// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Per-category behaviors and the recursive visitor that dispatches to them.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::any::Any;
use trellis_scene::{Category, DirtyFlags, NodeId, NodeKind, Scene};

use crate::backend::{Clock, Rasterizer};
use crate::bindable::{BindEvent, BindableBehavior, BindableRegistry, BindableScope};
use crate::cache::CacheRegistry;
use crate::config::CompositorConfig;
use crate::context::{PassConfig, TraverseMode, TraverseState};
use crate::display_list::{DrawItem, DrawKind};
use crate::geom;
use crate::grouping::GroupingBehavior;
use crate::layer::LayerBehavior;
use crate::leaf::{LeafBehavior, LightBehavior};
use crate::sensors::{ActiveSensors, SensorEvent};

/// State that outlives a single pass.
#[derive(Debug)]
pub(crate) struct Resources {
    pub(crate) bindables: BindableRegistry,
    pub(crate) root_scope: BindableScope,
    pub(crate) caches: CacheRegistry,
    pub(crate) active: ActiveSensors,
    pub(crate) sensor_events: Vec<SensorEvent>,
    pub(crate) bind_events: Vec<BindEvent>,
    pub(crate) focus: Option<NodeId>,
}

impl Resources {
    pub(crate) fn new() -> Self {
        let mut bindables = BindableRegistry::default();
        let root_scope = bindables.create_scope();
        Self {
            bindables,
            root_scope,
            caches: CacheRegistry::default(),
            active: ActiveSensors::default(),
            sensor_events: Vec::new(),
            bind_events: Vec::new(),
            focus: None,
        }
    }

    /// Record bind transitions and publish them into the nodes' `isBound` outputs.
    pub(crate) fn apply_bind_events(&mut self, scene: &mut Scene, events: Vec<BindEvent>) {
        for e in events {
            if let Some(state) = scene.kind_mut_silent(e.node).and_then(NodeKind::bind_state_mut) {
                state.is_bound = e.bound;
            }
            log::debug!(
                "{} {:?}",
                if e.bound { "bind" } else { "unbind" },
                e.node
            );
            self.bind_events.push(e);
        }
    }
}

/// Traversal behavior of one node category.
pub(crate) trait NodeBehavior: Sync {
    /// Handle `id` in the visitor's current mode.
    fn traverse(&self, v: &mut Visitor<'_>, id: NodeId);

    /// Release what the node's private block holds outside the scene.
    fn destroy(
        &self,
        _id: NodeId,
        _private: Box<dyn Any>,
        _res: &mut Resources,
        _backend: &mut dyn Rasterizer,
    ) {
    }
}

struct ExternalBehavior;

impl NodeBehavior for ExternalBehavior {
    fn traverse(&self, v: &mut Visitor<'_>, id: NodeId) {
        let target = match v.scene.kind(id) {
            Some(NodeKind::ExternalRef(e)) => e.resolved,
            _ => None,
        };
        match target {
            Some(t) if v.scene.is_alive(t) => v.traverse(t),
            _ => {
                // Keeps the holder CHILD dirty until the reference resolves.
                v.scene.mark_dirty(id, DirtyFlags::NODE);
                if v.pass.mode == TraverseMode::Bounds {
                    v.state.reset_bounds();
                }
            }
        }
    }
}

struct SensorBehavior;

impl NodeBehavior for SensorBehavior {
    fn traverse(&self, v: &mut Visitor<'_>, id: NodeId) {
        // Collected by the parent group; nothing to draw.
        v.scene.clear_dirty(id, DirtyFlags::NODE);
    }
}

/// Behavior for a dispatch category.
pub(crate) fn behavior(category: Category) -> &'static dyn NodeBehavior {
    match category {
        Category::Grouping => &GroupingBehavior,
        Category::Layer => &LayerBehavior,
        Category::Sensor => &SensorBehavior,
        Category::Leaf => &LeafBehavior,
        Category::Light => &LightBehavior,
        Category::Bindable => &BindableBehavior,
        Category::External => &ExternalBehavior,
    }
}

/// The recursive walker: scene, backend, long-lived resources, and the current pass.
pub(crate) struct Visitor<'a> {
    pub(crate) scene: &'a mut Scene,
    pub(crate) backend: &'a mut dyn Rasterizer,
    pub(crate) clock: &'a dyn Clock,
    pub(crate) res: &'a mut Resources,
    pub(crate) config: &'a CompositorConfig,
    pub(crate) pass: PassConfig,
    pub(crate) state: TraverseState,
}

impl<'a> Visitor<'a> {
    pub(crate) fn new(
        scene: &'a mut Scene,
        backend: &'a mut dyn Rasterizer,
        clock: &'a dyn Clock,
        res: &'a mut Resources,
        config: &'a CompositorConfig,
        mode: TraverseMode,
        frame: u64,
    ) -> Self {
        let pass = PassConfig {
            mode,
            pixel_metrics: config.pixel_metrics,
            surface: config.surface_size,
            frame,
            sensor_scope: config.sensor_scope,
        };
        let state = TraverseState::new(res.root_scope, config.surface_size);
        Self {
            scene,
            backend,
            clock,
            res,
            config,
            pass,
            state,
        }
    }

    /// Visit one node in the current mode. Stale ids are ignored.
    pub(crate) fn traverse(&mut self, id: NodeId) {
        let Some(tag) = self.scene.tag(id) else {
            return;
        };
        self.state.path.push(id);
        self.state.visited += 1;
        behavior(tag.category()).traverse(self, id);
        if self.pass.mode == TraverseMode::Bounds && self.state.for_node == Some(id) {
            self.state.for_node_bounds = Some(geom::transform_rect_bbox(
                self.state.transform,
                self.state.bounds,
            ));
        }
        self.state.path.pop();
    }

    /// Run `f` with the private block of `id`, creating it with `init` on first use.
    ///
    /// The block is detached from the scene while `f` runs. A block of the wrong
    /// type means the node cannot take part in traversal: it is logged and skipped.
    pub(crate) fn with_private<T: Any, R>(
        &mut self,
        id: NodeId,
        init: impl FnOnce(&mut Self) -> T,
        f: impl FnOnce(&mut Self, &mut T) -> R,
    ) -> Option<R> {
        let mut block: Box<T> = match self.scene.take_private(id) {
            Some(b) => match b.downcast::<T>() {
                Ok(t) => t,
                Err(b) => {
                    log::warn!(
                        "{:?}: private block has an unexpected type, node skipped",
                        id
                    );
                    self.scene.set_private(id, b);
                    return None;
                }
            },
            None => Box::new(init(self)),
        };
        let out = f(self, &mut block);
        self.scene.set_private(id, block);
        Some(out)
    }

    /// Paint one draw-list entry on the current target.
    ///
    /// Cached groups and layer textures re-enter their node in Draw2d mode so a
    /// stale cache is regenerated before it is blitted.
    pub(crate) fn draw_item(&mut self, item: DrawItem) {
        match item.kind {
            DrawKind::Shape { .. } | DrawKind::Highlight { .. } => self.backend.draw_shape(&item),
            DrawKind::Clear { color } => {
                let rect = geom::intersect(item.world_bounds, item.clip);
                if !geom::is_empty(rect) {
                    self.backend.clear_surface(rect, color);
                }
            }
            DrawKind::CachedGroup { .. } | DrawKind::LayerTexture { .. } => {
                let node = item.node;
                let mut v = self.scope(
                    |v| {
                        let saved = (
                            v.pass.mode,
                            v.state.transform,
                            v.state.clip,
                            v.state.draw_item.take(),
                        );
                        v.pass.mode = TraverseMode::Draw2d;
                        v.state.transform = item.transform;
                        v.state.clip = item.clip;
                        v.state.draw_item = Some(item);
                        saved
                    },
                    |v, (mode, transform, clip, draw_item)| {
                        v.pass.mode = mode;
                        v.state.transform = transform;
                        v.state.clip = clip;
                        v.state.draw_item = draw_item;
                    },
                );
                v.traverse(node);
            }
        }
    }

    /// Paint every item in order.
    pub(crate) fn flush(&mut self, items: Vec<DrawItem>) {
        for item in items {
            self.draw_item(item);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ManualClock;
    use crate::soft::SoftRasterizer;
    use trellis_scene::{ExternalRef, Group, Shape};

    #[test]
    fn stale_ids_are_ignored() {
        let mut scene = Scene::new();
        let id = scene.insert(None, Group::default());
        scene.remove(id);
        let mut backend = SoftRasterizer::new(8, 8);
        let clock = ManualClock::new(1);
        let mut res = Resources::new();
        let config = CompositorConfig::default();
        let mut v = Visitor::new(
            &mut scene,
            &mut backend,
            &clock,
            &mut res,
            &config,
            TraverseMode::Bounds,
            0,
        );
        v.traverse(id);
        assert_eq!(v.state.visited, 0);
    }

    #[test]
    fn wrong_private_type_skips_the_node() {
        let mut scene = Scene::new();
        let g = scene.insert(None, Group::default());
        scene.insert(
            Some(g),
            Shape {
                bounds: kurbo::Rect::new(0.0, 0.0, 4.0, 4.0),
                ..Shape::default()
            },
        );
        scene.set_private(g, Box::new(7_u32));
        let mut backend = SoftRasterizer::new(8, 8);
        let clock = ManualClock::new(1);
        let mut res = Resources::new();
        let config = CompositorConfig::default();
        let mut v = Visitor::new(
            &mut scene,
            &mut backend,
            &clock,
            &mut res,
            &config,
            TraverseMode::Bounds,
            0,
        );
        v.traverse(g);
        assert_eq!(v.state.visited, 1);
        assert_eq!(v.state.bounds, kurbo::Rect::ZERO);
        assert_eq!(v.scene.private_ref::<u32>(g), Some(&7));
    }

    #[test]
    fn unresolved_reference_keeps_parent_dirty() {
        let mut scene = Scene::new();
        let g = scene.insert(None, Group::default());
        let ext = scene.insert(Some(g), ExternalRef::default());
        let mut backend = SoftRasterizer::new(8, 8);
        let clock = ManualClock::new(1);
        let mut res = Resources::new();
        let config = CompositorConfig::default();
        let mut v = Visitor::new(
            &mut scene,
            &mut backend,
            &clock,
            &mut res,
            &config,
            TraverseMode::Bounds,
            0,
        );
        v.traverse(g);
        assert!(v.scene.dirty(g).contains(DirtyFlags::CHILD));
        v.traverse(g);
        assert!(v.scene.dirty(g).contains(DirtyFlags::CHILD));
        let target = v.scene.insert(
            None,
            Shape {
                bounds: kurbo::Rect::new(0.0, 0.0, 2.0, 2.0),
                ..Shape::default()
            },
        );
        assert!(v.scene.resolve_external(ext, Some(target)));
        v.traverse(g);
        assert!(!v.scene.dirty(g).contains(DirtyFlags::CHILD));
        assert_eq!(v.state.bounds, kurbo::Rect::new(0.0, 0.0, 2.0, 2.0));
    }
}
