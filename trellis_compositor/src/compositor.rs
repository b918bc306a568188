// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The frame driver: runs passes over a [`Scene`] and owns everything that outlives a pass.

use alloc::vec::Vec;
use kurbo::{Affine, Point, Rect};
use trellis_scene::{BindableCategory, Color, FieldError, FieldValue, NodeId, Scene, Vec3};

use crate::backend::{Clock, Rasterizer};
use crate::bindable::BindEvent;
use crate::cache::{self, CacheState};
use crate::config::CompositorConfig;
use crate::context::{
    Collision, CollisionProbe, Environment, PickQuery, PickResult, TraverseMode,
    view_box_transform,
};
use crate::dispatch::{Resources, Visitor, behavior};
use crate::display_list::{DrawItem, DrawKind};
use crate::grouping::GroupingStack;
use crate::sensors::{ActiveSensors, SensorEvent};

/// Summary of one rendered frame.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Frame number, starting at 1.
    pub frame: u64,
    /// Node visits during the frame, cache and layer sub-passes included.
    pub visited: usize,
    /// Entries flushed from the display list.
    pub draw_items: usize,
    /// Groups holding or awaiting a heuristic cache.
    pub cached_groups: usize,
    /// Something changed during the frame that only the next frame shows.
    pub needs_redraw: bool,
}

/// Drives traversal passes over scenes and paints them with a [`Rasterizer`].
///
/// The compositor owns the long-lived traversal resources: the bindable
/// stacks of the root scope, the cache registry and the active sensor list.
/// Node-local state lives in the scene's private blocks, so one compositor
/// should be used per scene.
#[derive(Debug)]
pub struct Compositor<R: Rasterizer, C: Clock> {
    backend: R,
    clock: C,
    config: CompositorConfig,
    res: Resources,
    frame: u64,
}

impl<R: Rasterizer, C: Clock> Compositor<R, C> {
    /// Create a compositor painting with `backend`.
    pub fn new(backend: R, clock: C, config: CompositorConfig) -> Self {
        Self {
            backend,
            clock,
            config,
            res: Resources::new(),
            frame: 0,
        }
    }

    fn visitor<'a>(&'a mut self, scene: &'a mut Scene, mode: TraverseMode) -> Visitor<'a> {
        Visitor::new(
            scene,
            &mut self.backend,
            &self.clock,
            &mut self.res,
            &self.config,
            mode,
            self.frame,
        )
    }

    /// Bounds of `node` in its parent's coordinates.
    pub fn compute_bounds(&mut self, scene: &mut Scene, node: NodeId) -> Rect {
        let mut v = self.visitor(scene, TraverseMode::Bounds);
        v.state.reset_bounds();
        v.traverse(node);
        v.state.bounds
    }

    /// Surface-space bounds of `node` as reached from the root.
    ///
    /// Returns `None` when the node is not reachable through 2D grouping.
    pub fn node_bounds(&mut self, scene: &mut Scene, node: NodeId) -> Option<Rect> {
        let root = scene.root()?;
        let mut v = self.visitor(scene, TraverseMode::Bounds);
        v.state.for_node = Some(node);
        let env = root_environment(&mut v);
        let mut v = v.with_transform(root_view(&v, &env));
        v.traverse(root);
        v.state.for_node_bounds
    }

    /// Render one frame: apply the root environment, build the display list, paint it.
    pub fn render_frame(&mut self, scene: &mut Scene) -> FrameStats {
        self.frame += 1;
        let frame = self.frame;
        let Some(root) = scene.root() else {
            return FrameStats {
                frame,
                ..FrameStats::default()
            };
        };
        let bind_events = self.res.bind_events.len();
        let mut v = self.visitor(scene, TraverseMode::Sort);
        let env = root_environment(&mut v);
        {
            let mut v = v.with_transform(root_view(&v, &env));
            v.traverse(root);
        }
        let surface = Rect::from_origin_size(Point::ORIGIN, v.pass.surface);
        let clear = DrawItem {
            node: root,
            kind: DrawKind::Clear {
                color: env.background.unwrap_or(Color::TRANSPARENT),
            },
            transform: Affine::IDENTITY,
            local_bounds: surface,
            world_bounds: surface,
            clip: surface,
            opacity: 1.0,
            segments: 4,
        };
        v.state.display.insert(0, clear);
        let items = v.state.display.take();
        let draw_items = items.len();
        let visited = v.state.visited;
        v.flush(items);
        let needs_redraw = v.state.request_redraw || v.res.bind_events.len() > bind_events;
        log::trace!(
            "frame {}: {} nodes visited, {} draw items",
            frame,
            visited,
            draw_items
        );
        FrameStats {
            frame,
            visited,
            draw_items,
            cached_groups: self.res.caches.len(),
            needs_redraw,
        }
    }

    /// Hit-test a surface point and refresh the active sensor list.
    ///
    /// Over/out transitions are queued for [`Self::take_sensor_events`].
    pub fn pick(&mut self, scene: &mut Scene, point: Point) -> Option<PickResult> {
        let root = scene.root()?;
        let mut v = self.visitor(scene, TraverseMode::Pick);
        v.res.active.begin_pick();
        v.state.pick = Some(PickQuery::Point(point));
        let env = root_environment(&mut v);
        {
            let mut v = v.with_transform(root_view(&v, &env));
            v.traverse(root);
        }
        let result = v.state.pick_result.take();
        let events = v.res.active.finish_pick();
        v.res.sensor_events.extend(events);
        log::trace!("pick at {:?}: {:?}", point, result.as_ref().map(|r| r.node));
        result
    }

    /// Nearest mesh of a 3D layer touched by a sphere, in the layer's world space.
    ///
    /// Layers collide with the camera of their last rendered frame.
    pub fn collide(&mut self, scene: &mut Scene, center: Vec3, radius: f64) -> Option<Collision> {
        let root = scene.root()?;
        let mut v = self.visitor(scene, TraverseMode::Collide);
        v.state.collision = Some(CollisionProbe {
            center,
            radius,
            hit: None,
        });
        v.traverse(root);
        v.state.collision.and_then(|p| p.hit)
    }

    /// Request that a bindable node be bound (`true`) or unbound (`false`).
    ///
    /// The request takes effect the next time a pass reaches the node.
    pub fn set_bind(&mut self, scene: &mut Scene, node: NodeId, bind: bool) -> Result<(), FieldError> {
        let kind = scene.kind(node).ok_or(FieldError::StaleNode)?;
        let Some(index) = kind.field_index("set_bind") else {
            return Err(FieldError::UnknownField {
                kind: kind.tag(),
                index: kind.fields().len(),
            });
        };
        scene.set_field(node, index, FieldValue::Bool(bind))
    }

    /// Bind transitions since the last call, in the order they happened.
    pub fn take_bind_events(&mut self) -> Vec<BindEvent> {
        core::mem::take(&mut self.res.bind_events)
    }

    /// Sensor transitions since the last call.
    pub fn take_sensor_events(&mut self) -> Vec<SensorEvent> {
        core::mem::take(&mut self.res.sensor_events)
    }

    /// Handlers under the pointer as of the last pick.
    pub fn active_sensors(&self) -> &ActiveSensors {
        &self.res.active
    }

    /// Remove `node` and everything it owns, releasing their traversal resources first.
    pub fn remove_node(&mut self, scene: &mut Scene, node: NodeId) {
        for id in scene.owned_subtree(node) {
            if let (Some(tag), Some(private)) = (scene.tag(id), scene.take_private(id)) {
                behavior(tag.category()).destroy(id, private, &mut self.res, &mut self.backend);
            }
            let events = self.res.bindables.remove(id);
            self.res.apply_bind_events(scene, events);
            self.res.caches.remove(id);
            let events = self.res.active.forget(id);
            self.res.sensor_events.extend(events);
            if self.res.focus == Some(id) {
                self.res.focus = None;
            }
        }
        let removed = scene.remove(node);
        log::debug!("{:?}: removed with {} owned nodes", node, removed.len());
    }

    /// Cache state of a grouping node, once it has been traversed.
    pub fn cache_state(&self, scene: &Scene, node: NodeId) -> Option<CacheState> {
        scene.private_ref::<GroupingStack>(node).map(cache::state_of)
    }

    /// Bytes held by heuristic group caches.
    pub fn cache_memory(&self) -> usize {
        self.res.caches.total_bytes()
    }

    /// Outline a grouping node's content in the next frames.
    pub fn set_focus(&mut self, node: Option<NodeId>) {
        self.res.focus = node;
    }

    /// Number of the last rendered frame.
    pub fn frame_number(&self) -> u64 {
        self.frame
    }

    /// Current configuration.
    pub fn config(&self) -> &CompositorConfig {
        &self.config
    }

    /// Mutable configuration; changes apply from the next pass.
    pub fn config_mut(&mut self) -> &mut CompositorConfig {
        &mut self.config
    }

    /// The rasterizer.
    pub fn backend(&self) -> &R {
        &self.backend
    }

    /// The rasterizer, mutably.
    pub fn backend_mut(&mut self) -> &mut R {
        &mut self.backend
    }
}

/// Effects of the nodes bound in the root scope.
fn root_environment(v: &mut Visitor<'_>) -> Environment {
    let scope = v.res.root_scope;
    let tops: Vec<NodeId> = [BindableCategory::Background, BindableCategory::Viewpoint]
        .into_iter()
        .filter_map(|c| v.res.bindables.top(scope.stack(c)))
        .collect();
    v.apply_bindables(&tops)
}

fn root_view(v: &Visitor<'_>, env: &Environment) -> Affine {
    let surface = Rect::from_origin_size(Point::ORIGIN, v.pass.surface);
    env.view_box
        .map_or(Affine::IDENTITY, |vb| view_box_transform(vb, surface))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ManualClock;
    use crate::sensors::{HandlerKind, SensorScope};
    use crate::soft::{SoftCall, SoftRasterizer};
    use alloc::string::String;
    use alloc::vec;
    use kurbo::Size;
    use trellis_scene::{
        Background, Box3, CacheHint, DirtyFlags, ExternalRef, Group, Layer2d, Layer3d, Mesh, NodeKind,
        OrderedGroup, Sensor, Shape, Switch, Transform2d, Viewport,
    };

    type TestCompositor = Compositor<SoftRasterizer, ManualClock>;

    const RED: Color = Color::rgb(255, 0, 0);
    const BLUE: Color = Color::rgb(0, 0, 255);

    fn compositor(w: u32, h: u32) -> TestCompositor {
        let config = CompositorConfig {
            surface_size: Size::new(f64::from(w), f64::from(h)),
            ..CompositorConfig::default()
        };
        Compositor::new(SoftRasterizer::new(w, h), ManualClock::new(10), config)
    }

    fn scene_with_root() -> (Scene, NodeId) {
        let mut scene = Scene::new();
        let root = scene.insert(None, Group::default());
        scene.set_root(Some(root));
        (scene, root)
    }

    fn shape(scene: &mut Scene, parent: NodeId, rect: Rect, color: Color) -> NodeId {
        scene.insert(
            Some(parent),
            Shape {
                bounds: rect,
                color,
                ..Shape::default()
            },
        )
    }

    fn drawn_shapes(c: &TestCompositor) -> Vec<NodeId> {
        c.backend()
            .calls()
            .iter()
            .filter_map(|call| match call {
                SoftCall::DrawShape(n) => Some(*n),
                _ => None,
            })
            .collect()
    }

    fn count(c: &TestCompositor, pred: impl Fn(&SoftCall) -> bool) -> usize {
        c.backend().calls().iter().filter(|call| pred(call)).count()
    }

    /// Root group holding a cachable group of three shapes covering a 40x40 square at `origin`.
    fn cachable_group(scene: &mut Scene, root: NodeId, origin: (f64, f64)) -> NodeId {
        let g = scene.insert(Some(root), Group::default());
        let (x, y) = origin;
        shape(scene, g, Rect::new(x, y, x + 20.0, y + 20.0), RED);
        shape(scene, g, Rect::new(x + 20.0, y, x + 40.0, y + 20.0), BLUE);
        shape(scene, g, Rect::new(x, y + 20.0, x + 40.0, y + 40.0), Color::WHITE);
        g
    }

    fn mesh(scene: &mut Scene, parent: NodeId, center: Vec3, color: Color) -> NodeId {
        let d = Vec3::new(1.0, 1.0, 1.0);
        scene.insert(
            Some(parent),
            Mesh {
                bbox: Box3::new(center - d, center + d),
                triangles: 12,
                color,
            },
        )
    }

    fn layer3d(scene: &mut Scene, root: NodeId) -> NodeId {
        scene.insert(
            Some(root),
            Layer3d {
                size: Size::new(64.0, 64.0),
                ..Layer3d::default()
            },
        )
    }

    #[test]
    fn bounds_union_children_and_transforms() {
        let (mut scene, root) = scene_with_root();
        shape(&mut scene, root, Rect::new(0.0, 0.0, 10.0, 10.0), RED);
        shape(&mut scene, root, Rect::new(20.0, 5.0, 30.0, 40.0), RED);
        let t = scene.insert(
            Some(root),
            Transform2d {
                transform: Affine::translate((100.0, 0.0)),
                ..Transform2d::default()
            },
        );
        let inner = shape(&mut scene, t, Rect::new(0.0, 0.0, 5.0, 5.0), RED);
        let mut c = compositor(64, 64);
        let expected = Rect::new(0.0, 0.0, 105.0, 40.0);
        assert_eq!(c.compute_bounds(&mut scene, root), expected);
        assert_eq!(c.compute_bounds(&mut scene, root), expected);
        assert_eq!(
            c.node_bounds(&mut scene, inner),
            Some(Rect::new(100.0, 0.0, 105.0, 5.0))
        );
    }

    #[test]
    fn ordered_group_draws_by_key() {
        let (mut scene, root) = scene_with_root();
        let o = scene.insert(
            Some(root),
            OrderedGroup {
                order: vec![2.0, 0.0, 1.0],
            },
        );
        let a = shape(&mut scene, o, Rect::new(0.0, 0.0, 4.0, 4.0), RED);
        let b = shape(&mut scene, o, Rect::new(0.0, 0.0, 4.0, 4.0), BLUE);
        let d = shape(&mut scene, o, Rect::new(0.0, 0.0, 4.0, 4.0), Color::WHITE);
        let mut c = compositor(16, 16);
        c.render_frame(&mut scene);
        assert_eq!(drawn_shapes(&c), vec![b, d, a]);
        assert_eq!(c.backend().pixel(1, 1), Some(RED));
    }

    #[test]
    fn switch_shows_only_its_choice() {
        let (mut scene, root) = scene_with_root();
        let sw = scene.insert(Some(root), Switch::default());
        shape(&mut scene, sw, Rect::new(0.0, 0.0, 4.0, 4.0), RED);
        let second = shape(&mut scene, sw, Rect::new(4.0, 4.0, 8.0, 8.0), BLUE);
        let mut c = compositor(16, 16);
        assert_eq!(c.compute_bounds(&mut scene, sw), Rect::ZERO);
        c.render_frame(&mut scene);
        assert!(drawn_shapes(&c).is_empty());

        if let Some(NodeKind::Switch(s)) = scene.kind_mut(sw) {
            s.which_choice = 1;
        }
        c.backend_mut().clear_calls();
        c.render_frame(&mut scene);
        assert_eq!(drawn_shapes(&c), vec![second]);
        assert_eq!(
            c.compute_bounds(&mut scene, sw),
            Rect::new(4.0, 4.0, 8.0, 8.0)
        );
    }

    #[test]
    fn switched_off_child_waits_for_the_next_sort() {
        let (mut scene, root) = scene_with_root();
        let sw = scene.insert(Some(root), Switch { which_choice: 0 });
        let first = shape(&mut scene, sw, Rect::new(0.0, 0.0, 4.0, 4.0), RED);
        shape(&mut scene, sw, Rect::new(4.0, 4.0, 8.0, 8.0), BLUE);
        let mut c = compositor(16, 16);
        c.render_frame(&mut scene);

        scene.mark_dirty(first, DirtyFlags::NODE);
        if let Some(NodeKind::Switch(s)) = scene.kind_mut(sw) {
            s.which_choice = 1;
        }
        let _ = c.pick(&mut scene, Point::new(6.0, 6.0));
        assert!(scene.dirty(first).contains(DirtyFlags::NODE));

        c.backend_mut().clear_calls();
        c.render_frame(&mut scene);
        assert!(!scene.dirty(first).contains(DirtyFlags::NODE));
        assert!(!drawn_shapes(&c).contains(&first));
    }

    #[test]
    fn binding_moves_the_background() {
        let (mut scene, root) = scene_with_root();
        let a = scene.insert(
            Some(root),
            Background {
                color: RED,
                ..Background::default()
            },
        );
        let b = scene.insert(
            Some(root),
            Background {
                color: BLUE,
                ..Background::default()
            },
        );
        let mut c = compositor(8, 8);
        let stats = c.render_frame(&mut scene);
        assert!(stats.needs_redraw);
        assert_eq!(c.take_bind_events(), vec![BindEvent { node: a, bound: true }]);
        c.render_frame(&mut scene);
        assert_eq!(c.backend().pixel(0, 0), Some(RED));

        c.set_bind(&mut scene, b, true).unwrap();
        c.render_frame(&mut scene);
        assert_eq!(
            c.take_bind_events(),
            vec![
                BindEvent { node: a, bound: false },
                BindEvent { node: b, bound: true }
            ]
        );
        let bound = |scene: &Scene, n| match scene.kind(n) {
            Some(NodeKind::Background(bg)) => bg.bind.is_bound,
            _ => false,
        };
        assert!(!bound(&scene, a));
        assert!(bound(&scene, b));
        c.render_frame(&mut scene);
        assert_eq!(c.backend().pixel(0, 0), Some(BLUE));
    }

    #[test]
    fn set_bind_rejects_plain_nodes() {
        let (mut scene, root) = scene_with_root();
        let mut c = compositor(8, 8);
        assert!(matches!(
            c.set_bind(&mut scene, root, true),
            Err(FieldError::UnknownField { .. })
        ));
        scene.remove(root);
        assert_eq!(c.set_bind(&mut scene, root, true), Err(FieldError::StaleNode));
    }

    #[test]
    fn group_cache_lifecycle() {
        let (mut scene, root) = scene_with_root();
        let g = cachable_group(&mut scene, root, (0.0, 0.0));
        let mut c = compositor(100, 100);
        let states: Vec<_> = (0..4)
            .map(|_| {
                c.render_frame(&mut scene);
                c.cache_state(&scene, g)
            })
            .collect();
        assert_eq!(
            states,
            vec![
                Some(CacheState::Observing),
                Some(CacheState::Observing),
                Some(CacheState::Observing),
                Some(CacheState::Cached)
            ]
        );
        assert_eq!(
            count(&c, |call| matches!(call, SoftCall::DrawBitmap { node, .. } if *node == g)),
            1
        );
        assert_eq!(c.cache_memory(), 40 * 40 * 4);
        assert_eq!(c.backend().pixel(30, 10), Some(BLUE));

        let first = scene.child_ids(g)[0];
        if let Some(NodeKind::Shape(s)) = scene.kind_mut(first) {
            s.color = Color::BLACK;
        }
        c.render_frame(&mut scene);
        assert_eq!(c.cache_state(&scene, g), Some(CacheState::Uncached));
        assert_eq!(c.cache_memory(), 0);
        assert_eq!(c.backend().pixel(5, 5), Some(Color::BLACK));
    }

    fn group_of(scene: &mut Scene, parent: NodeId, rects: &[Rect], segments: u32) -> NodeId {
        let g = scene.insert(Some(parent), Group::default());
        for &r in rects {
            scene.insert(
                Some(g),
                Shape {
                    bounds: r,
                    segments,
                    color: RED,
                },
            );
        }
        g
    }

    fn states(c: &mut TestCompositor, scene: &mut Scene, g: NodeId, frames: usize) -> Vec<CacheState> {
        (0..frames)
            .filter_map(|_| {
                c.render_frame(scene);
                c.cache_state(scene, g)
            })
            .collect()
    }

    /// Observed for every frame but never cached.
    fn keeps_observing(seen: &[CacheState]) -> bool {
        seen.len() == 6 && seen.iter().all(|s| *s == CacheState::Observing)
    }

    #[test]
    fn overlapping_items_count_their_area_once() {
        let (mut scene, root) = scene_with_root();
        let band = Rect::new(0.0, 0.0, 100.0, 40.0);
        let g = group_of(&mut scene, root, &[band, band, Rect::new(99.0, 99.0, 100.0, 100.0)], 4);
        let mut c = compositor(100, 100);
        let seen = states(&mut c, &mut scene, g, 6);
        assert!(keeps_observing(&seen), "{seen:?}");
        assert_eq!(c.cache_memory(), 0);
    }

    #[test]
    fn few_segments_never_cache() {
        let (mut scene, root) = scene_with_root();
        let rects = [
            Rect::new(0.0, 0.0, 20.0, 40.0),
            Rect::new(20.0, 0.0, 40.0, 40.0),
            Rect::new(0.0, 40.0, 40.0, 60.0),
        ];
        let g = group_of(&mut scene, root, &rects, 3);
        let mut c = compositor(64, 64);
        let seen = states(&mut c, &mut scene, g, 6);
        assert!(keeps_observing(&seen), "{seen:?}");
    }

    #[test]
    fn single_drawable_never_caches() {
        let (mut scene, root) = scene_with_root();
        let g = group_of(&mut scene, root, &[Rect::new(0.0, 0.0, 40.0, 40.0)], 40);
        let mut c = compositor(64, 64);
        let seen = states(&mut c, &mut scene, g, 6);
        assert!(keeps_observing(&seen), "{seen:?}");
    }

    #[test]
    fn tiny_groups_never_cache() {
        let (mut scene, root) = scene_with_root();
        let rects = [Rect::new(0.0, 0.0, 4.0, 8.0), Rect::new(4.0, 0.0, 8.0, 8.0)];
        let g = group_of(&mut scene, root, &rects, 8);
        let mut c = compositor(64, 64);
        let seen = states(&mut c, &mut scene, g, 6);
        assert!(keeps_observing(&seen), "{seen:?}");
    }

    #[test]
    fn the_root_never_caches() {
        let (mut scene, root) = scene_with_root();
        let rects = [
            Rect::new(0.0, 0.0, 20.0, 40.0),
            Rect::new(20.0, 0.0, 40.0, 40.0),
        ];
        for r in rects {
            scene.insert(
                Some(root),
                Shape {
                    bounds: r,
                    segments: 10,
                    color: BLUE,
                },
            );
        }
        let mut c = compositor(64, 64);
        let seen = states(&mut c, &mut scene, root, 6);
        assert_eq!(seen, vec![CacheState::Uncached; 6]);
        assert_eq!(c.backend().live_textures(), 0);
    }

    #[test]
    fn groups_over_the_budget_keep_observing() {
        let (mut scene, root) = scene_with_root();
        let g = cachable_group(&mut scene, root, (0.0, 0.0));
        let mut c = compositor(64, 64);
        c.config_mut().cache.memory_budget = 40 * 40 * 4;
        let seen = states(&mut c, &mut scene, g, 6);
        assert!(keeps_observing(&seen), "{seen:?}");
        assert_eq!(c.cache_memory(), 0);
        assert_eq!(c.backend().live_textures(), 0);
        assert_eq!(c.backend().pixel(30, 10), Some(BLUE));
    }

    #[test]
    fn cached_frames_match_direct_drawing() {
        let render = |cache: bool| {
            let (mut scene, root) = scene_with_root();
            cachable_group(&mut scene, root, (8.0, 8.0));
            let mut c = compositor(64, 64);
            c.config_mut().cache.enabled = cache;
            for _ in 0..4 {
                c.render_frame(&mut scene);
            }
            let blits = count(&c, |call| matches!(call, SoftCall::DrawBitmap { .. }));
            (c.backend().surface().clone(), blits)
        };
        let (cached, blits) = render(true);
        let (direct, none) = render(false);
        assert_eq!(blits, 1);
        assert_eq!(none, 0);
        assert_eq!(cached, direct);
    }

    #[test]
    fn permanent_hint_caches_at_once() {
        let (mut scene, root) = scene_with_root();
        let g = scene.insert(
            Some(root),
            Group {
                cache: CacheHint::Permanent,
                ..Group::default()
            },
        );
        shape(&mut scene, g, Rect::new(0.0, 0.0, 10.0, 10.0), RED);
        let mut c = compositor(32, 32);
        c.render_frame(&mut scene);
        assert_eq!(c.cache_state(&scene, g), Some(CacheState::Cached));
        assert_eq!(c.backend().pixel(5, 5), Some(RED));
    }

    #[test]
    fn failed_allocation_leaves_group_uncached() {
        let (mut scene, root) = scene_with_root();
        let g = cachable_group(&mut scene, root, (0.0, 0.0));
        let mut c = compositor(64, 64);
        c.backend_mut().set_offscreen_capacity(Some(0));
        for _ in 0..3 {
            c.render_frame(&mut scene);
        }
        c.backend_mut().clear_calls();
        c.render_frame(&mut scene);
        assert_eq!(c.cache_state(&scene, g), Some(CacheState::Uncached));
        assert_eq!(drawn_shapes(&c).len(), 3);
        assert_eq!(c.backend().pixel(30, 10), Some(BLUE));
        c.render_frame(&mut scene);
        assert_eq!(c.cache_state(&scene, g), Some(CacheState::Uncached));
    }

    #[test]
    fn budget_evicts_down_to_one_cache() {
        let (mut scene, root) = scene_with_root();
        let a = cachable_group(&mut scene, root, (0.0, 0.0));
        let b = cachable_group(&mut scene, root, (50.0, 50.0));
        let mut c = compositor(100, 100);
        c.config_mut().cache.memory_budget = 10_000;
        for _ in 0..4 {
            c.render_frame(&mut scene);
        }
        let cached = [a, b]
            .iter()
            .filter(|&&g| c.cache_state(&scene, g) == Some(CacheState::Cached))
            .count();
        assert_eq!(cached, 1);
        assert!(c.cache_memory() <= 10_000);
    }

    #[test]
    fn removing_a_cached_group_frees_its_texture() {
        let (mut scene, root) = scene_with_root();
        let g = cachable_group(&mut scene, root, (0.0, 0.0));
        let mut c = compositor(64, 64);
        for _ in 0..4 {
            c.render_frame(&mut scene);
        }
        assert_eq!(c.backend().live_textures(), 1);
        c.remove_node(&mut scene, g);
        assert_eq!(c.backend().live_textures(), 0);
        assert_eq!(c.cache_memory(), 0);
        assert!(!scene.is_alive(g));
    }

    #[test]
    fn unresolved_reference_draws_once_loaded() {
        let (mut scene, root) = scene_with_root();
        let ext = scene.insert(
            Some(root),
            ExternalRef {
                url: String::from("parts/door"),
                resolved: None,
            },
        );
        let content = scene.insert(None, Group::default());
        let s = shape(&mut scene, content, Rect::new(0.0, 0.0, 4.0, 4.0), RED);
        let mut c = compositor(8, 8);
        c.render_frame(&mut scene);
        assert!(drawn_shapes(&c).is_empty());
        assert!(scene.resolve_external(ext, Some(content)));
        c.render_frame(&mut scene);
        assert_eq!(drawn_shapes(&c), vec![s]);
    }

    /// Root → outer group with a sensor → inner group with a sensor → shape.
    fn sensor_scene(inner_enabled: bool) -> (Scene, NodeId, NodeId) {
        let (mut scene, root) = scene_with_root();
        let outer = scene.insert(Some(root), Group::default());
        let s1 = scene.insert(Some(outer), Sensor::default());
        let inner = scene.insert(Some(outer), Group::default());
        let s2 = scene.insert(
            Some(inner),
            Sensor {
                enabled: inner_enabled,
                ..Sensor::default()
            },
        );
        shape(&mut scene, inner, Rect::new(0.0, 0.0, 10.0, 10.0), RED);
        (scene, s1, s2)
    }

    #[test]
    fn nearest_sensors_replace_outer_ones() {
        let (mut scene, _, s2) = sensor_scene(true);
        let mut c = compositor(32, 32);
        let hit = c.pick(&mut scene, Point::new(5.0, 5.0)).unwrap();
        assert_eq!(hit.path.len(), 4);
        let nodes: Vec<_> = c.active_sensors().handlers().iter().map(|h| h.node).collect();
        assert_eq!(nodes, vec![s2]);
        assert_eq!(c.active_sensors().handlers()[0].kind, HandlerKind::Touch);
    }

    #[test]
    fn accumulated_sensors_run_outer_to_inner() {
        let (mut scene, s1, s2) = sensor_scene(true);
        let mut c = compositor(32, 32);
        c.config_mut().sensor_scope = SensorScope::Accumulate;
        c.pick(&mut scene, Point::new(5.0, 5.0));
        let nodes: Vec<_> = c.active_sensors().handlers().iter().map(|h| h.node).collect();
        assert_eq!(nodes, vec![s1, s2]);
    }

    #[test]
    fn disabled_sensors_are_not_active() {
        let (mut scene, _, _) = sensor_scene(false);
        let mut c = compositor(32, 32);
        assert!(c.pick(&mut scene, Point::new(5.0, 5.0)).is_some());
        assert!(c.active_sensors().handlers().is_empty());
    }

    #[test]
    fn pointer_moves_report_over_and_out() {
        let (mut scene, _, s2) = sensor_scene(true);
        let mut c = compositor(32, 32);
        c.pick(&mut scene, Point::new(5.0, 5.0));
        let over = c.take_sensor_events();
        assert!(matches!(over.as_slice(), [SensorEvent::Over(h)] if h.node == s2));
        assert!(c.pick(&mut scene, Point::new(20.0, 20.0)).is_none());
        let out = c.take_sensor_events();
        assert!(matches!(out.as_slice(), [SensorEvent::Out(h)] if h.node == s2));
    }

    #[test]
    fn layer2d_maps_its_viewport_and_clips() {
        let (mut scene, root) = scene_with_root();
        let layer = scene.insert(
            Some(root),
            Layer2d {
                size: Size::new(50.0, 50.0),
                ..Layer2d::default()
            },
        );
        let bg = scene
            .insert_attached(
                layer,
                Background {
                    color: BLUE,
                    ..Background::default()
                },
            )
            .unwrap();
        let vp = scene
            .insert_attached(
                layer,
                Viewport {
                    view_box: Rect::new(0.0, 0.0, 100.0, 100.0),
                    ..Viewport::default()
                },
            )
            .unwrap();
        if let Some(NodeKind::Layer2d(l)) = scene.kind_mut(layer) {
            l.background = Some(bg);
            l.viewport = Some(vp);
        }
        shape(&mut scene, layer, Rect::new(50.0, 50.0, 200.0, 200.0), RED);
        let mut c = compositor(64, 64);
        c.render_frame(&mut scene);
        assert_eq!(c.backend().pixel(10, 10), Some(BLUE));
        assert_eq!(c.backend().pixel(30, 30), Some(RED));
        assert_eq!(c.backend().pixel(49, 49), Some(RED));
        assert_eq!(c.backend().pixel(55, 55), Some(Color::TRANSPARENT));
        match scene.kind(layer) {
            Some(NodeKind::Layer2d(l)) => {
                assert_eq!(l.bound_background, Some(bg));
                assert_eq!(l.bound_viewport, Some(vp));
            }
            _ => panic!("layer kind changed"),
        }
    }

    #[test]
    fn layer3d_culls_and_reuses_its_target() {
        let (mut scene, root) = scene_with_root();
        let layer = layer3d(&mut scene, root);
        let near = mesh(&mut scene, layer, Vec3::ZERO, RED);
        let far = mesh(&mut scene, layer, Vec3::new(1000.0, 0.0, 0.0), BLUE);
        let mut c = compositor(64, 64);
        for _ in 0..3 {
            c.render_frame(&mut scene);
        }
        let drawn = |n: NodeId| count(&c, |call| *call == SoftCall::DrawMesh(n));
        assert_eq!(drawn(near), 2);
        assert_eq!(drawn(far), 0);
        assert_eq!(count(&c, |call| matches!(call, SoftCall::BeginTarget { .. })), 1);
        assert_eq!(count(&c, |call| matches!(call, SoftCall::ResumeTarget(_))), 1);
        assert_eq!(
            count(&c, |call| matches!(call, SoftCall::DrawBitmap { node, .. } if *node == layer)),
            3
        );
        assert_eq!(c.backend().pixel(32, 32), Some(RED));

        c.remove_node(&mut scene, layer);
        assert_eq!(c.backend().live_textures(), 0);
        assert_eq!(c.backend().live_targets(), 0);
    }

    #[test]
    fn layer3d_retries_after_a_failed_allocation() {
        let (mut scene, root) = scene_with_root();
        let layer = layer3d(&mut scene, root);
        mesh(&mut scene, layer, Vec3::ZERO, RED);
        let mut c = compositor(64, 64);
        c.backend_mut().set_offscreen_capacity(Some(0));
        c.render_frame(&mut scene);
        let blits = |c: &TestCompositor| {
            count(c, |call| matches!(call, SoftCall::DrawBitmap { node, .. } if *node == layer))
        };
        assert_eq!(blits(&c), 0);

        c.backend_mut().set_offscreen_capacity(None);
        for _ in 0..3 {
            c.render_frame(&mut scene);
        }
        assert_eq!(blits(&c), 3);
        assert_eq!(c.backend().pixel(32, 32), Some(RED));
    }

    #[test]
    fn layer3d_inside_3d_content_is_skipped() {
        let (mut scene, root) = scene_with_root();
        let outer = layer3d(&mut scene, root);
        let near = mesh(&mut scene, outer, Vec3::ZERO, RED);
        let inner = layer3d(&mut scene, outer);
        let hidden = mesh(&mut scene, inner, Vec3::ZERO, BLUE);
        let mut c = compositor(64, 64);
        for _ in 0..2 {
            c.render_frame(&mut scene);
        }
        assert!(count(&c, |call| *call == SoftCall::DrawMesh(near)) > 0);
        assert_eq!(count(&c, |call| *call == SoftCall::DrawMesh(hidden)), 0);
        assert_eq!(count(&c, |call| matches!(call, SoftCall::BeginTarget { .. })), 1);
    }

    #[test]
    fn layer3d_stays_off_without_offscreen_support() {
        let (mut scene, root) = scene_with_root();
        let layer = layer3d(&mut scene, root);
        mesh(&mut scene, layer, Vec3::ZERO, RED);
        let mut c = compositor(64, 64);
        c.backend_mut().set_offscreen_3d(false);
        c.render_frame(&mut scene);
        c.backend_mut().set_offscreen_3d(true);
        c.render_frame(&mut scene);
        let offscreen = count(&c, |call| {
            matches!(
                call,
                SoftCall::BeginTarget { .. } | SoftCall::DrawMesh(_) | SoftCall::DrawBitmap { .. }
            )
        });
        assert_eq!(offscreen, 0);
        assert_eq!(c.backend().pixel(32, 32), Some(Color::TRANSPARENT));
    }

    #[test]
    fn layer3d_picks_and_collides_with_its_meshes() {
        let (mut scene, root) = scene_with_root();
        let layer = layer3d(&mut scene, root);
        let near = mesh(&mut scene, layer, Vec3::ZERO, RED);
        mesh(&mut scene, layer, Vec3::new(1000.0, 0.0, 0.0), BLUE);
        let mut c = compositor(64, 64);
        c.render_frame(&mut scene);

        let hit = c.pick(&mut scene, Point::new(32.0, 32.0)).unwrap();
        assert_eq!(hit.node, near);
        assert!(hit.distance.is_some_and(|d| d > 0.0));
        assert!(c.pick(&mut scene, Point::new(1.0, 1.0)).is_none());

        let touch = c.collide(&mut scene, Vec3::new(0.0, 0.0, 1.5), 1.0).unwrap();
        assert_eq!(touch.node, near);
        assert!(c.collide(&mut scene, Vec3::new(0.0, 0.0, 50.0), 1.0).is_none());
    }

    #[test]
    fn focus_outlines_the_group() {
        let (mut scene, root) = scene_with_root();
        let g = scene.insert(Some(root), Group::default());
        shape(&mut scene, g, Rect::new(2.0, 2.0, 12.0, 12.0), RED);
        let mut c = compositor(16, 16);
        c.set_focus(Some(g));
        c.render_frame(&mut scene);
        assert!(drawn_shapes(&c).contains(&g));
        assert_eq!(c.backend().pixel(2, 2), Some(Color::rgb(255, 160, 0)));
        assert_eq!(c.backend().pixel(6, 6), Some(RED));
    }

    #[test]
    fn frames_count_up() {
        let (mut scene, _) = scene_with_root();
        let mut c = compositor(8, 8);
        assert_eq!(c.render_frame(&mut scene).frame, 1);
        assert_eq!(c.render_frame(&mut scene).frame, 2);
        assert_eq!(c.frame_number(), 2);
        let mut empty = Scene::new();
        assert_eq!(c.render_frame(&mut empty).draw_items, 0);
    }
}
