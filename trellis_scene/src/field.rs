// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Field introspection: read and write node fields by index.
//!
//! Loaders address fields by position in the kind's field table, so the
//! tables below are part of the public contract. Writes validate the value
//! type first and leave the node untouched on error.

use alloc::string::String;
use alloc::vec::Vec;
use kurbo::{Affine, Rect, Size, Vec2};

use crate::kind::{CacheHint, LayoutDirection, LightKind, NodeKind, NodeTag, SensorKind};
use crate::math::{Box3, Matrix4, Vec3};
use crate::types::{Color, NodeId};

/// Type of a field slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[allow(missing_docs, reason = "variants mirror FieldValue.")]
pub enum FieldType {
    Bool,
    Int,
    Float,
    Floats,
    Vec2,
    Vec3,
    Rect,
    Size,
    Color,
    Affine,
    Matrix,
    Box3,
    Node,
    Str,
}

/// A dynamically typed field value.
#[derive(Clone, Debug, PartialEq)]
#[allow(missing_docs, reason = "each variant carries the obvious payload.")]
pub enum FieldValue {
    Bool(bool),
    Int(i32),
    Float(f64),
    Floats(Vec<f64>),
    Vec2(Vec2),
    Vec3(Vec3),
    Rect(Rect),
    Size(Size),
    Color(Color),
    Affine(Affine),
    Matrix(Matrix4),
    Box3(Box3),
    Node(Option<NodeId>),
    Str(String),
}

impl FieldValue {
    /// Type of the carried value.
    pub const fn field_type(&self) -> FieldType {
        match self {
            Self::Bool(_) => FieldType::Bool,
            Self::Int(_) => FieldType::Int,
            Self::Float(_) => FieldType::Float,
            Self::Floats(_) => FieldType::Floats,
            Self::Vec2(_) => FieldType::Vec2,
            Self::Vec3(_) => FieldType::Vec3,
            Self::Rect(_) => FieldType::Rect,
            Self::Size(_) => FieldType::Size,
            Self::Color(_) => FieldType::Color,
            Self::Affine(_) => FieldType::Affine,
            Self::Matrix(_) => FieldType::Matrix,
            Self::Box3(_) => FieldType::Box3,
            Self::Node(_) => FieldType::Node,
            Self::Str(_) => FieldType::Str,
        }
    }
}

/// Name and type of one field slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FieldInfo {
    /// Field name.
    pub name: &'static str,
    /// Field type.
    pub ty: FieldType,
    /// Whether writes are accepted.
    pub writable: bool,
}

const fn rw(name: &'static str, ty: FieldType) -> FieldInfo {
    FieldInfo {
        name,
        ty,
        writable: true,
    }
}

const fn ro(name: &'static str, ty: FieldType) -> FieldInfo {
    FieldInfo {
        name,
        ty,
        writable: false,
    }
}

/// Failure of a field access. The node is left unchanged.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum FieldError {
    /// The handle does not refer to a live node.
    #[error("node is not alive")]
    StaleNode,
    /// The kind has no field at this index.
    #[error("{kind} has no field #{index}")]
    UnknownField {
        /// Kind of the addressed node.
        kind: NodeTag,
        /// Requested index.
        index: usize,
    },
    /// The value does not have the field's type.
    #[error("{kind} field #{index} expects {expected:?}, got {found:?}")]
    TypeMismatch {
        /// Kind of the addressed node.
        kind: NodeTag,
        /// Requested index.
        index: usize,
        /// Declared field type.
        expected: FieldType,
        /// Type of the offered value.
        found: FieldType,
    },
    /// The field is an output and cannot be written.
    #[error("{kind} field #{index} is read-only")]
    ReadOnly {
        /// Kind of the addressed node.
        kind: NodeTag,
        /// Requested index.
        index: usize,
    },
    /// The value has the right type but is outside the field's domain.
    #[error("{kind} field #{index} rejects value {value}")]
    InvalidValue {
        /// Kind of the addressed node.
        kind: NodeTag,
        /// Requested index.
        index: usize,
        /// Offered discriminant.
        value: i32,
    },
}

use FieldType as T;

const GROUP: &[FieldInfo] = &[rw("cache", T::Int), rw("opacity", T::Float)];
const TRANSFORM_2D: &[FieldInfo] = &[rw("transform", T::Affine), rw("cache", T::Int)];
const ORDERED_GROUP: &[FieldInfo] = &[rw("order", T::Floats)];
const SWITCH: &[FieldInfo] = &[rw("whichChoice", T::Int)];
const LAYOUT: &[FieldInfo] = &[
    rw("direction", T::Int),
    rw("spacing", T::Float),
    rw("scroll", T::Vec2),
    rw("wrap", T::Float),
];
const ANCHOR: &[FieldInfo] = &[rw("url", T::Str), rw("description", T::Str)];
const GROUP_3D: &[FieldInfo] = &[rw("culling", T::Bool)];
const TRANSFORM_3D: &[FieldInfo] = &[rw("transform", T::Matrix), rw("culling", T::Bool)];
const LAYER_2D: &[FieldInfo] = &[
    rw("size", T::Size),
    rw("background", T::Node),
    rw("viewport", T::Node),
    ro("boundBackground", T::Node),
    ro("boundViewport", T::Node),
];
const LAYER_3D: &[FieldInfo] = &[
    rw("size", T::Size),
    rw("background", T::Node),
    rw("viewpoint", T::Node),
    rw("navigationInfo", T::Node),
    rw("fog", T::Node),
    ro("boundBackground", T::Node),
    ro("boundViewpoint", T::Node),
    ro("boundNavigationInfo", T::Node),
    ro("boundFog", T::Node),
];
const SENSOR: &[FieldInfo] = &[rw("kind", T::Int), rw("enabled", T::Bool)];
const SHAPE: &[FieldInfo] = &[
    rw("bounds", T::Rect),
    rw("segments", T::Int),
    rw("color", T::Color),
];
const TEXT: &[FieldInfo] = &[
    rw("bounds", T::Rect),
    rw("ascent", T::Float),
    rw("descent", T::Float),
    rw("glyphs", T::Int),
    rw("color", T::Color),
];
const MESH: &[FieldInfo] = &[
    rw("bbox", T::Box3),
    rw("triangles", T::Int),
    rw("color", T::Color),
];
const LIGHT: &[FieldInfo] = &[
    rw("kind", T::Int),
    rw("on", T::Bool),
    rw("intensity", T::Float),
    rw("color", T::Color),
    rw("location", T::Vec3),
    rw("direction", T::Vec3),
];
const BACKGROUND: &[FieldInfo] = &[
    rw("set_bind", T::Bool),
    ro("isBound", T::Bool),
    rw("color", T::Color),
];
const VIEWPOINT: &[FieldInfo] = &[
    rw("set_bind", T::Bool),
    ro("isBound", T::Bool),
    rw("position", T::Vec3),
    rw("fieldOfView", T::Float),
];
const VIEWPORT: &[FieldInfo] = &[
    rw("set_bind", T::Bool),
    ro("isBound", T::Bool),
    rw("viewBox", T::Rect),
];
const NAVIGATION: &[FieldInfo] = &[
    rw("set_bind", T::Bool),
    ro("isBound", T::Bool),
    rw("speed", T::Float),
    rw("headlight", T::Bool),
];
const FOG: &[FieldInfo] = &[
    rw("set_bind", T::Bool),
    ro("isBound", T::Bool),
    rw("color", T::Color),
    rw("visibilityRange", T::Float),
];
const EXTERNAL_REF: &[FieldInfo] = &[rw("url", T::Str), ro("resolved", T::Node)];

fn u32_to_i32(v: u32) -> i32 {
    i32::try_from(v).unwrap_or(i32::MAX)
}

fn non_negative(v: i32) -> u32 {
    u32::try_from(v).unwrap_or(0)
}

impl NodeKind {
    /// Field table of this kind.
    pub fn fields(&self) -> &'static [FieldInfo] {
        match self.tag() {
            NodeTag::Group => GROUP,
            NodeTag::Transform2d => TRANSFORM_2D,
            NodeTag::OrderedGroup => ORDERED_GROUP,
            NodeTag::Switch => SWITCH,
            NodeTag::Layout => LAYOUT,
            NodeTag::Anchor => ANCHOR,
            NodeTag::Group3d => GROUP_3D,
            NodeTag::Transform3d => TRANSFORM_3D,
            NodeTag::Layer2d => LAYER_2D,
            NodeTag::Layer3d => LAYER_3D,
            NodeTag::Sensor => SENSOR,
            NodeTag::Shape => SHAPE,
            NodeTag::Text => TEXT,
            NodeTag::Mesh => MESH,
            NodeTag::Light => LIGHT,
            NodeTag::Background => BACKGROUND,
            NodeTag::Viewpoint => VIEWPOINT,
            NodeTag::Viewport => VIEWPORT,
            NodeTag::NavigationInfo => NAVIGATION,
            NodeTag::Fog => FOG,
            NodeTag::ExternalRef => EXTERNAL_REF,
        }
    }

    /// Index of the field called `name`.
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields().iter().position(|f| f.name == name)
    }

    /// Read the field at `index`.
    pub fn field(&self, index: usize) -> Result<FieldValue, FieldError> {
        let unknown = FieldError::UnknownField {
            kind: self.tag(),
            index,
        };
        // Bindables share their first two slots.
        if let Some(bind) = self.bind_state() {
            match index {
                0 => return Ok(FieldValue::Bool(bind.set_bind.unwrap_or(bind.is_bound))),
                1 => return Ok(FieldValue::Bool(bind.is_bound)),
                _ => {}
            }
        }
        let v = match (self, index) {
            (Self::Group(g), 0) => FieldValue::Int(cache_hint_to_int(g.cache)),
            (Self::Group(g), 1) => FieldValue::Float(f64::from(g.opacity)),
            (Self::Transform2d(t), 0) => FieldValue::Affine(t.transform),
            (Self::Transform2d(t), 1) => FieldValue::Int(cache_hint_to_int(t.cache)),
            (Self::OrderedGroup(o), 0) => FieldValue::Floats(o.order.clone()),
            (Self::Switch(s), 0) => FieldValue::Int(s.which_choice),
            (Self::Layout(l), 0) => FieldValue::Int(match l.direction {
                LayoutDirection::Horizontal => 0,
                LayoutDirection::Vertical => 1,
            }),
            (Self::Layout(l), 1) => FieldValue::Float(l.spacing),
            (Self::Layout(l), 2) => FieldValue::Vec2(l.scroll),
            (Self::Layout(l), 3) => FieldValue::Float(l.wrap),
            (Self::Anchor(a), 0) => FieldValue::Str(a.url.clone()),
            (Self::Anchor(a), 1) => FieldValue::Str(a.description.clone()),
            (Self::Group3d(g), 0) => FieldValue::Bool(g.culling),
            (Self::Transform3d(t), 0) => FieldValue::Matrix(t.transform),
            (Self::Transform3d(t), 1) => FieldValue::Bool(t.culling),
            (Self::Layer2d(l), 0) => FieldValue::Size(l.size),
            (Self::Layer2d(l), 1) => FieldValue::Node(l.background),
            (Self::Layer2d(l), 2) => FieldValue::Node(l.viewport),
            (Self::Layer2d(l), 3) => FieldValue::Node(l.bound_background),
            (Self::Layer2d(l), 4) => FieldValue::Node(l.bound_viewport),
            (Self::Layer3d(l), 0) => FieldValue::Size(l.size),
            (Self::Layer3d(l), 1) => FieldValue::Node(l.background),
            (Self::Layer3d(l), 2) => FieldValue::Node(l.viewpoint),
            (Self::Layer3d(l), 3) => FieldValue::Node(l.navigation),
            (Self::Layer3d(l), 4) => FieldValue::Node(l.fog),
            (Self::Layer3d(l), 5) => FieldValue::Node(l.bound_background),
            (Self::Layer3d(l), 6) => FieldValue::Node(l.bound_viewpoint),
            (Self::Layer3d(l), 7) => FieldValue::Node(l.bound_navigation),
            (Self::Layer3d(l), 8) => FieldValue::Node(l.bound_fog),
            (Self::Sensor(s), 0) => FieldValue::Int(match s.kind {
                SensorKind::Touch => 0,
                SensorKind::Drag => 1,
            }),
            (Self::Sensor(s), 1) => FieldValue::Bool(s.enabled),
            (Self::Shape(s), 0) => FieldValue::Rect(s.bounds),
            (Self::Shape(s), 1) => FieldValue::Int(u32_to_i32(s.segments)),
            (Self::Shape(s), 2) => FieldValue::Color(s.color),
            (Self::Text(t), 0) => FieldValue::Rect(t.bounds),
            (Self::Text(t), 1) => FieldValue::Float(t.ascent),
            (Self::Text(t), 2) => FieldValue::Float(t.descent),
            (Self::Text(t), 3) => FieldValue::Int(u32_to_i32(t.glyphs)),
            (Self::Text(t), 4) => FieldValue::Color(t.color),
            (Self::Mesh(m), 0) => FieldValue::Box3(m.bbox),
            (Self::Mesh(m), 1) => FieldValue::Int(u32_to_i32(m.triangles)),
            (Self::Mesh(m), 2) => FieldValue::Color(m.color),
            (Self::Light(l), 0) => FieldValue::Int(match l.kind {
                LightKind::Directional => 0,
                LightKind::Point => 1,
                LightKind::Spot => 2,
            }),
            (Self::Light(l), 1) => FieldValue::Bool(l.on),
            (Self::Light(l), 2) => FieldValue::Float(l.intensity),
            (Self::Light(l), 3) => FieldValue::Color(l.color),
            (Self::Light(l), 4) => FieldValue::Vec3(l.location),
            (Self::Light(l), 5) => FieldValue::Vec3(l.direction),
            (Self::Background(b), 2) => FieldValue::Color(b.color),
            (Self::Viewpoint(v), 2) => FieldValue::Vec3(v.position),
            (Self::Viewpoint(v), 3) => FieldValue::Float(v.field_of_view),
            (Self::Viewport(v), 2) => FieldValue::Rect(v.view_box),
            (Self::NavigationInfo(n), 2) => FieldValue::Float(n.speed),
            (Self::NavigationInfo(n), 3) => FieldValue::Bool(n.headlight),
            (Self::Fog(f), 2) => FieldValue::Color(f.color),
            (Self::Fog(f), 3) => FieldValue::Float(f.visibility_range),
            (Self::ExternalRef(e), 0) => FieldValue::Str(e.url.clone()),
            (Self::ExternalRef(e), 1) => FieldValue::Node(e.resolved),
            _ => return Err(unknown),
        };
        Ok(v)
    }

    /// Write the field at `index`.
    ///
    /// The value type is checked against the field table before anything is modified.
    pub fn set_field(&mut self, index: usize, value: FieldValue) -> Result<(), FieldError> {
        let kind = self.tag();
        let info = self
            .fields()
            .get(index)
            .ok_or(FieldError::UnknownField { kind, index })?;
        if !info.writable {
            return Err(FieldError::ReadOnly { kind, index });
        }
        if info.ty != value.field_type() {
            return Err(FieldError::TypeMismatch {
                kind,
                index,
                expected: info.ty,
                found: value.field_type(),
            });
        }
        let invalid = |value: i32| FieldError::InvalidValue { kind, index, value };

        if index == 0 {
            if let (Some(bind), FieldValue::Bool(b)) = (self.bind_state_mut(), &value) {
                bind.set_bind = Some(*b);
                return Ok(());
            }
        }
        match (self, value) {
            (Self::Group(g), FieldValue::Int(v)) => {
                g.cache = cache_hint_from_int(v).ok_or_else(|| invalid(v))?;
            }
            (Self::Group(g), FieldValue::Float(v)) => g.opacity = unit_f32(v),
            (Self::Transform2d(t), FieldValue::Affine(v)) => t.transform = v,
            (Self::Transform2d(t), FieldValue::Int(v)) => {
                t.cache = cache_hint_from_int(v).ok_or_else(|| invalid(v))?;
            }
            (Self::OrderedGroup(o), FieldValue::Floats(v)) => o.order = v,
            (Self::Switch(s), FieldValue::Int(v)) => s.which_choice = v,
            (Self::Layout(l), FieldValue::Int(v)) => {
                l.direction = match v {
                    0 => LayoutDirection::Horizontal,
                    1 => LayoutDirection::Vertical,
                    _ => return Err(invalid(v)),
                };
            }
            (Self::Layout(l), FieldValue::Float(v)) if index == 1 => l.spacing = v,
            (Self::Layout(l), FieldValue::Float(v)) => l.wrap = v.max(0.0),
            (Self::Layout(l), FieldValue::Vec2(v)) => l.scroll = v,
            (Self::Anchor(a), FieldValue::Str(v)) if index == 0 => a.url = v,
            (Self::Anchor(a), FieldValue::Str(v)) => a.description = v,
            (Self::Group3d(g), FieldValue::Bool(v)) => g.culling = v,
            (Self::Transform3d(t), FieldValue::Matrix(v)) => t.transform = v,
            (Self::Transform3d(t), FieldValue::Bool(v)) => t.culling = v,
            (Self::Layer2d(l), FieldValue::Size(v)) => l.size = v,
            (Self::Layer2d(l), FieldValue::Node(v)) if index == 1 => l.background = v,
            (Self::Layer2d(l), FieldValue::Node(v)) => l.viewport = v,
            (Self::Layer3d(l), FieldValue::Size(v)) => l.size = v,
            (Self::Layer3d(l), FieldValue::Node(v)) => match index {
                1 => l.background = v,
                2 => l.viewpoint = v,
                3 => l.navigation = v,
                _ => l.fog = v,
            },
            (Self::Sensor(s), FieldValue::Int(v)) => {
                s.kind = match v {
                    0 => SensorKind::Touch,
                    1 => SensorKind::Drag,
                    _ => return Err(invalid(v)),
                };
            }
            (Self::Sensor(s), FieldValue::Bool(v)) => s.enabled = v,
            (Self::Shape(s), FieldValue::Rect(v)) => s.bounds = v,
            (Self::Shape(s), FieldValue::Int(v)) => s.segments = non_negative(v),
            (Self::Shape(s), FieldValue::Color(v)) => s.color = v,
            (Self::Text(t), FieldValue::Rect(v)) => t.bounds = v,
            (Self::Text(t), FieldValue::Float(v)) if index == 1 => t.ascent = v,
            (Self::Text(t), FieldValue::Float(v)) => t.descent = v,
            (Self::Text(t), FieldValue::Int(v)) => t.glyphs = non_negative(v),
            (Self::Text(t), FieldValue::Color(v)) => t.color = v,
            (Self::Mesh(m), FieldValue::Box3(v)) => m.bbox = v,
            (Self::Mesh(m), FieldValue::Int(v)) => m.triangles = non_negative(v),
            (Self::Mesh(m), FieldValue::Color(v)) => m.color = v,
            (Self::Light(l), FieldValue::Int(v)) => {
                l.kind = match v {
                    0 => LightKind::Directional,
                    1 => LightKind::Point,
                    2 => LightKind::Spot,
                    _ => return Err(invalid(v)),
                };
            }
            (Self::Light(l), FieldValue::Bool(v)) => l.on = v,
            (Self::Light(l), FieldValue::Float(v)) => l.intensity = v,
            (Self::Light(l), FieldValue::Color(v)) => l.color = v,
            (Self::Light(l), FieldValue::Vec3(v)) if index == 4 => l.location = v,
            (Self::Light(l), FieldValue::Vec3(v)) => l.direction = v,
            (Self::Background(b), FieldValue::Color(v)) => b.color = v,
            (Self::Viewpoint(p), FieldValue::Vec3(v)) => p.position = v,
            (Self::Viewpoint(p), FieldValue::Float(v)) => p.field_of_view = v,
            (Self::Viewport(p), FieldValue::Rect(v)) => p.view_box = v,
            (Self::NavigationInfo(n), FieldValue::Float(v)) => n.speed = v,
            (Self::NavigationInfo(n), FieldValue::Bool(v)) => n.headlight = v,
            (Self::Fog(f), FieldValue::Color(v)) => f.color = v,
            (Self::Fog(f), FieldValue::Float(v)) => f.visibility_range = v,
            (Self::ExternalRef(e), FieldValue::Str(v)) => e.url = v,
            _ => return Err(FieldError::UnknownField { kind, index }),
        }
        Ok(())
    }
}

#[allow(
    clippy::cast_possible_truncation,
    reason = "the value is clamped to 0..=1 first."
)]
fn unit_f32(v: f64) -> f32 {
    v.clamp(0.0, 1.0) as f32
}

fn cache_hint_to_int(hint: CacheHint) -> i32 {
    match hint {
        CacheHint::Auto => 0,
        CacheHint::Never => 1,
        CacheHint::Permanent => 2,
    }
}

fn cache_hint_from_int(v: i32) -> Option<CacheHint> {
    match v {
        0 => Some(CacheHint::Auto),
        1 => Some(CacheHint::Never),
        2 => Some(CacheHint::Permanent),
        _ => None,
    }
}
