// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Node kinds and their typed fields.
//!
//! The set of kinds is closed: every kind belongs to one traversal category
//! (see [`NodeTag::category`]) and the compositor dispatches on that category.

use alloc::string::String;
use alloc::vec::Vec;
use kurbo::{Affine, Rect, Size, Vec2};

use crate::math::{Box3, Matrix4, Vec3};
use crate::types::{Color, NodeId};

/// Caching preference of a 2D grouping node.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum CacheHint {
    /// Let runtime statistics decide.
    #[default]
    Auto,
    /// Never cache this group.
    Never,
    /// Always cache this group; statistics never revert it.
    Permanent,
}

/// Main axis of a layout group.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum LayoutDirection {
    /// Children flow left to right.
    #[default]
    Horizontal,
    /// Children flow top to bottom.
    Vertical,
}

/// Interaction style of a sensor node.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SensorKind {
    /// Reports over/out, activation and hit points.
    #[default]
    Touch,
    /// Reports drag tracking.
    Drag,
}

/// Light source type.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum LightKind {
    /// Lights only the siblings (and their descendants) of the light node.
    #[default]
    Directional,
    /// Lights the whole scene from a point.
    Point,
    /// Lights the whole scene from a cone.
    Spot,
}

/// Environment categories with bind semantics.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BindableCategory {
    /// Backgrounds (2D and 3D).
    Background,
    /// Viewpoints and 2D viewports.
    Viewpoint,
    /// Navigation settings.
    Navigation,
    /// Fog.
    Fog,
}

impl BindableCategory {
    /// All categories, in stack order.
    pub const ALL: [Self; 4] = [Self::Background, Self::Viewpoint, Self::Navigation, Self::Fog];
}

/// Bind request and bound status shared by all bindable kinds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct BindState {
    /// Pending `set_bind` request, consumed by the next traversal.
    pub set_bind: Option<bool>,
    /// Output: whether the node is currently on top of a stack.
    pub is_bound: bool,
}

/// Plain 2D group.
#[derive(Clone, Debug, PartialEq)]
pub struct Group {
    /// Caching preference.
    pub cache: CacheHint,
    /// Group opacity; anything below `1.0` forces a permanent cache.
    pub opacity: f32,
}

impl Default for Group {
    fn default() -> Self {
        Self {
            cache: CacheHint::Auto,
            opacity: 1.0,
        }
    }
}

/// 2D group with a local transform.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Transform2d {
    /// Transform applied to the children.
    pub transform: Affine,
    /// Caching preference.
    pub cache: CacheHint,
}

/// Group whose children are visited in priority order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct OrderedGroup {
    /// Per-child priority; lower draws first. Missing entries count as `0`.
    pub order: Vec<f64>,
}

/// Visits at most one child.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Switch {
    /// Index of the visited child; negative or out of range selects none.
    pub which_choice: i32,
}

impl Default for Switch {
    fn default() -> Self {
        Self { which_choice: -1 }
    }
}

/// Flow layout of children along one axis.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Layout {
    /// Flow axis.
    pub direction: LayoutDirection,
    /// Gap between consecutive children.
    pub spacing: f64,
    /// Scroll offset applied to every placed child.
    pub scroll: Vec2,
    /// Line length after which horizontal flow wraps; `0` disables wrapping.
    pub wrap: f64,
}

/// Group that is itself a link sensor.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Anchor {
    /// Target; the anchor is enabled only when this is non-empty.
    pub url: String,
    /// Human-readable description.
    pub description: String,
}

/// Plain 3D group.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Group3d {
    /// Frustum-cull the group as a whole in Sort passes.
    pub culling: bool,
}

impl Default for Group3d {
    fn default() -> Self {
        Self { culling: true }
    }
}

/// 3D group with a local transform.
#[derive(Clone, Debug, PartialEq)]
pub struct Transform3d {
    /// Transform applied to the children.
    pub transform: Matrix4,
    /// Frustum-cull the group as a whole in Sort passes.
    pub culling: bool,
}

impl Default for Transform3d {
    fn default() -> Self {
        Self {
            transform: Matrix4::IDENTITY,
            culling: true,
        }
    }
}

/// Nested 2D viewport.
#[derive(Clone, Debug, PartialEq)]
pub struct Layer2d {
    /// Layer size; negative components mean "parent viewport size".
    pub size: Size,
    /// Background candidate owned by the layer.
    pub background: Option<NodeId>,
    /// Viewport candidate owned by the layer.
    pub viewport: Option<NodeId>,
    /// Output: currently bound background.
    pub bound_background: Option<NodeId>,
    /// Output: currently bound viewport.
    pub bound_viewport: Option<NodeId>,
}

impl Default for Layer2d {
    fn default() -> Self {
        Self {
            size: Size::new(-1.0, -1.0),
            background: None,
            viewport: None,
            bound_background: None,
            bound_viewport: None,
        }
    }
}

/// Nested 3D viewport rendered offscreen and composited as a bitmap.
#[derive(Clone, Debug, PartialEq)]
pub struct Layer3d {
    /// Layer size; negative components mean "parent viewport size".
    pub size: Size,
    /// Background candidate owned by the layer.
    pub background: Option<NodeId>,
    /// Viewpoint candidate owned by the layer.
    pub viewpoint: Option<NodeId>,
    /// Navigation candidate owned by the layer.
    pub navigation: Option<NodeId>,
    /// Fog candidate owned by the layer.
    pub fog: Option<NodeId>,
    /// Output: currently bound background.
    pub bound_background: Option<NodeId>,
    /// Output: currently bound viewpoint.
    pub bound_viewpoint: Option<NodeId>,
    /// Output: currently bound navigation.
    pub bound_navigation: Option<NodeId>,
    /// Output: currently bound fog.
    pub bound_fog: Option<NodeId>,
}

impl Default for Layer3d {
    fn default() -> Self {
        Self {
            size: Size::new(-1.0, -1.0),
            background: None,
            viewpoint: None,
            navigation: None,
            fog: None,
            bound_background: None,
            bound_viewpoint: None,
            bound_navigation: None,
            bound_fog: None,
        }
    }
}

/// Pointer sensor attached to its parent group.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sensor {
    /// Interaction style.
    pub kind: SensorKind,
    /// Disabled sensors are never collected.
    pub enabled: bool,
}

impl Default for Sensor {
    fn default() -> Self {
        Self {
            kind: SensorKind::Touch,
            enabled: true,
        }
    }
}

/// 2D drawable outline.
#[derive(Clone, Debug, PartialEq)]
pub struct Shape {
    /// Local bounds of the outline.
    pub bounds: Rect,
    /// Number of path segments; a complexity hint for caching.
    pub segments: u32,
    /// Fill color.
    pub color: Color,
}

impl Default for Shape {
    fn default() -> Self {
        Self {
            bounds: Rect::ZERO,
            segments: 4,
            color: Color::BLACK,
        }
    }
}

/// Laid-out text block. Glyph shaping happens elsewhere; this carries metrics only.
#[derive(Clone, Debug, PartialEq)]
pub struct Text {
    /// Local bounds of the text block.
    pub bounds: Rect,
    /// Distance from baseline to the top of the block.
    pub ascent: f64,
    /// Distance from baseline to the bottom of the block.
    pub descent: f64,
    /// Number of glyph outlines.
    pub glyphs: u32,
    /// Fill color.
    pub color: Color,
}

impl Default for Text {
    fn default() -> Self {
        Self {
            bounds: Rect::ZERO,
            ascent: 0.0,
            descent: 0.0,
            glyphs: 0,
            color: Color::BLACK,
        }
    }
}

/// 3D drawable.
#[derive(Clone, Debug, PartialEq)]
pub struct Mesh {
    /// Local bounding box.
    pub bbox: Box3,
    /// Number of triangles.
    pub triangles: u32,
    /// Base color.
    pub color: Color,
}

impl Default for Mesh {
    fn default() -> Self {
        Self {
            bbox: Box3::EMPTY,
            triangles: 0,
            color: Color::WHITE,
        }
    }
}

/// Light source.
#[derive(Clone, Debug, PartialEq)]
pub struct Light {
    /// Source type.
    pub kind: LightKind,
    /// Switched-off lights are ignored.
    pub on: bool,
    /// Intensity in `0..=1`.
    pub intensity: f64,
    /// Light color.
    pub color: Color,
    /// Position for point and spot lights.
    pub location: Vec3,
    /// Direction for directional and spot lights.
    pub direction: Vec3,
}

impl Default for Light {
    fn default() -> Self {
        Self {
            kind: LightKind::Directional,
            on: true,
            intensity: 1.0,
            color: Color::WHITE,
            location: Vec3::ZERO,
            direction: Vec3::new(0.0, 0.0, -1.0),
        }
    }
}

/// Background environment.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Background {
    /// Clear color.
    pub color: Color,
    /// Bind protocol state.
    pub bind: BindState,
}

/// 3D camera position.
#[derive(Clone, Debug, PartialEq)]
pub struct Viewpoint {
    /// Eye position.
    pub position: Vec3,
    /// Vertical field of view in radians.
    pub field_of_view: f64,
    /// Bind protocol state.
    pub bind: BindState,
}

impl Default for Viewpoint {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 0.0, 10.0),
            field_of_view: core::f64::consts::FRAC_PI_4,
            bind: BindState::default(),
        }
    }
}

/// 2D view box mapping.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Viewport {
    /// Region of local space mapped onto the hosting viewport.
    pub view_box: Rect,
    /// Bind protocol state.
    pub bind: BindState,
}

/// Navigation settings.
#[derive(Clone, Debug, PartialEq)]
pub struct NavigationInfo {
    /// Travel speed in units per second.
    pub speed: f64,
    /// Whether a headlight is on.
    pub headlight: bool,
    /// Bind protocol state.
    pub bind: BindState,
}

impl Default for NavigationInfo {
    fn default() -> Self {
        Self {
            speed: 1.0,
            headlight: true,
            bind: BindState::default(),
        }
    }
}

/// Distance fog.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Fog {
    /// Fog color.
    pub color: Color,
    /// Distance at which objects are fully fogged; `0` disables fog.
    pub visibility_range: f64,
    /// Bind protocol state.
    pub bind: BindState,
}

/// Reference to content that may not be loaded yet.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExternalRef {
    /// Source location.
    pub url: String,
    /// Root of the loaded content, once available.
    pub resolved: Option<NodeId>,
}

/// Type tag plus typed fields of a node.
#[derive(Clone, Debug, PartialEq)]
#[allow(missing_docs, reason = "each variant is documented on its payload type.")]
pub enum NodeKind {
    Group(Group),
    Transform2d(Transform2d),
    OrderedGroup(OrderedGroup),
    Switch(Switch),
    Layout(Layout),
    Anchor(Anchor),
    Group3d(Group3d),
    Transform3d(Transform3d),
    Layer2d(Layer2d),
    Layer3d(Layer3d),
    Sensor(Sensor),
    Shape(Shape),
    Text(Text),
    Mesh(Mesh),
    Light(Light),
    Background(Background),
    Viewpoint(Viewpoint),
    Viewport(Viewport),
    NavigationInfo(NavigationInfo),
    Fog(Fog),
    ExternalRef(ExternalRef),
}

/// Field-less copy of a [`NodeKind`] discriminant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[allow(missing_docs, reason = "mirrors NodeKind one to one.")]
pub enum NodeTag {
    Group,
    Transform2d,
    OrderedGroup,
    Switch,
    Layout,
    Anchor,
    Group3d,
    Transform3d,
    Layer2d,
    Layer3d,
    Sensor,
    Shape,
    Text,
    Mesh,
    Light,
    Background,
    Viewpoint,
    Viewport,
    NavigationInfo,
    Fog,
    ExternalRef,
}

/// Traversal category of a node kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Category {
    /// Containers.
    Grouping,
    /// Nested viewports.
    Layer,
    /// Pointer sensors.
    Sensor,
    /// Drawables.
    Leaf,
    /// Lights.
    Light,
    /// Environment nodes with bind semantics.
    Bindable,
    /// Deferred content.
    External,
}

impl NodeTag {
    /// Category used for traversal dispatch.
    pub const fn category(self) -> Category {
        match self {
            Self::Group
            | Self::Transform2d
            | Self::OrderedGroup
            | Self::Switch
            | Self::Layout
            | Self::Anchor
            | Self::Group3d
            | Self::Transform3d => Category::Grouping,
            Self::Layer2d | Self::Layer3d => Category::Layer,
            Self::Sensor => Category::Sensor,
            Self::Shape | Self::Text | Self::Mesh => Category::Leaf,
            Self::Light => Category::Light,
            Self::Background
            | Self::Viewpoint
            | Self::Viewport
            | Self::NavigationInfo
            | Self::Fog => Category::Bindable,
            Self::ExternalRef => Category::External,
        }
    }

    /// Stack category for bindable kinds.
    pub const fn bindable_category(self) -> Option<BindableCategory> {
        match self {
            Self::Background => Some(BindableCategory::Background),
            Self::Viewpoint | Self::Viewport => Some(BindableCategory::Viewpoint),
            Self::NavigationInfo => Some(BindableCategory::Navigation),
            Self::Fog => Some(BindableCategory::Fog),
            _ => None,
        }
    }

    /// Stable name, used in logs and errors.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Group => "Group",
            Self::Transform2d => "Transform2d",
            Self::OrderedGroup => "OrderedGroup",
            Self::Switch => "Switch",
            Self::Layout => "Layout",
            Self::Anchor => "Anchor",
            Self::Group3d => "Group3d",
            Self::Transform3d => "Transform3d",
            Self::Layer2d => "Layer2d",
            Self::Layer3d => "Layer3d",
            Self::Sensor => "Sensor",
            Self::Shape => "Shape",
            Self::Text => "Text",
            Self::Mesh => "Mesh",
            Self::Light => "Light",
            Self::Background => "Background",
            Self::Viewpoint => "Viewpoint",
            Self::Viewport => "Viewport",
            Self::NavigationInfo => "NavigationInfo",
            Self::Fog => "Fog",
            Self::ExternalRef => "ExternalRef",
        }
    }
}

impl core::fmt::Display for NodeTag {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

impl NodeKind {
    /// Field-less tag of this kind.
    pub const fn tag(&self) -> NodeTag {
        match self {
            Self::Group(_) => NodeTag::Group,
            Self::Transform2d(_) => NodeTag::Transform2d,
            Self::OrderedGroup(_) => NodeTag::OrderedGroup,
            Self::Switch(_) => NodeTag::Switch,
            Self::Layout(_) => NodeTag::Layout,
            Self::Anchor(_) => NodeTag::Anchor,
            Self::Group3d(_) => NodeTag::Group3d,
            Self::Transform3d(_) => NodeTag::Transform3d,
            Self::Layer2d(_) => NodeTag::Layer2d,
            Self::Layer3d(_) => NodeTag::Layer3d,
            Self::Sensor(_) => NodeTag::Sensor,
            Self::Shape(_) => NodeTag::Shape,
            Self::Text(_) => NodeTag::Text,
            Self::Mesh(_) => NodeTag::Mesh,
            Self::Light(_) => NodeTag::Light,
            Self::Background(_) => NodeTag::Background,
            Self::Viewpoint(_) => NodeTag::Viewpoint,
            Self::Viewport(_) => NodeTag::Viewport,
            Self::NavigationInfo(_) => NodeTag::NavigationInfo,
            Self::Fog(_) => NodeTag::Fog,
            Self::ExternalRef(_) => NodeTag::ExternalRef,
        }
    }

    /// Bind state of bindable kinds.
    pub fn bind_state(&self) -> Option<&BindState> {
        match self {
            Self::Background(n) => Some(&n.bind),
            Self::Viewpoint(n) => Some(&n.bind),
            Self::Viewport(n) => Some(&n.bind),
            Self::NavigationInfo(n) => Some(&n.bind),
            Self::Fog(n) => Some(&n.bind),
            _ => None,
        }
    }

    /// Mutable bind state of bindable kinds.
    pub fn bind_state_mut(&mut self) -> Option<&mut BindState> {
        match self {
            Self::Background(n) => Some(&mut n.bind),
            Self::Viewpoint(n) => Some(&mut n.bind),
            Self::Viewport(n) => Some(&mut n.bind),
            Self::NavigationInfo(n) => Some(&mut n.bind),
            Self::Fog(n) => Some(&mut n.bind),
            _ => None,
        }
    }

    /// Nodes held in node-valued fields and owned by this node (layer environments).
    pub fn owned_field_nodes(&self) -> Vec<NodeId> {
        match self {
            Self::Layer2d(l) => [l.background, l.viewport].into_iter().flatten().collect(),
            Self::Layer3d(l) => [l.background, l.viewpoint, l.navigation, l.fog]
                .into_iter()
                .flatten()
                .collect(),
            _ => Vec::new(),
        }
    }
}

macro_rules! impl_from_fields {
    ($($ty:ident),* $(,)?) => {
        $(
            impl From<$ty> for NodeKind {
                fn from(v: $ty) -> Self {
                    Self::$ty(v)
                }
            }
        )*
    };
}

impl_from_fields!(
    Group,
    Transform2d,
    OrderedGroup,
    Switch,
    Layout,
    Anchor,
    Group3d,
    Transform3d,
    Layer2d,
    Layer3d,
    Sensor,
    Shape,
    Text,
    Mesh,
    Light,
    Background,
    Viewpoint,
    Viewport,
    NavigationInfo,
    Fog,
    ExternalRef,
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_cover_dispatch_groups() {
        assert_eq!(NodeTag::Anchor.category(), Category::Grouping);
        assert_eq!(NodeTag::Layer3d.category(), Category::Layer);
        assert_eq!(NodeTag::Mesh.category(), Category::Leaf);
        assert_eq!(NodeTag::Fog.category(), Category::Bindable);
        assert_eq!(
            NodeTag::Viewport.bindable_category(),
            Some(BindableCategory::Viewpoint)
        );
        assert_eq!(NodeTag::Shape.bindable_category(), None);
    }

    #[test]
    fn from_impls_pick_the_matching_variant() {
        let k: NodeKind = Switch { which_choice: 2 }.into();
        assert_eq!(k.tag(), NodeTag::Switch);
        assert!(k.bind_state().is_none());
        let mut b: NodeKind = Background::default().into();
        b.bind_state_mut().expect("bindable").set_bind = Some(true);
        assert_eq!(b.bind_state().map(|s| s.set_bind), Some(Some(true)));
    }
}
