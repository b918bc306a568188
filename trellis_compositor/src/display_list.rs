// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Draw lists assembled by Sort passes.

use alloc::vec::Vec;
use kurbo::{Affine, Rect};
use trellis_scene::{Box3, Color, LightKind, Matrix4, NodeId, Vec3};

use crate::backend::TextureId;

/// What a 2D draw item paints.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrawKind {
    /// A vector outline (shape or text run) filled with a color.
    Shape {
        /// Fill color.
        color: Color,
    },
    /// The memoized pixels of a cached group.
    CachedGroup {
        /// Cache texture.
        texture: TextureId,
    },
    /// The offscreen rendering of a 3D layer.
    LayerTexture {
        /// Layer texture.
        texture: TextureId,
    },
    /// Background fill of a viewport.
    Clear {
        /// Fill color.
        color: Color,
    },
    /// Focus highlight around a group.
    Highlight {
        /// Outline color.
        color: Color,
    },
}

/// One entry of a 2D draw list.
#[derive(Clone, Debug, PartialEq)]
pub struct DrawItem {
    /// Node that produced the item.
    pub node: NodeId,
    /// What to paint.
    pub kind: DrawKind,
    /// Local-to-surface transform at the time the item was recorded.
    pub transform: Affine,
    /// Bounds in the node's local coordinates.
    pub local_bounds: Rect,
    /// Conservative surface-space bounds, before clipping.
    pub world_bounds: Rect,
    /// Surface-space clip.
    pub clip: Rect,
    /// Opacity multiplier.
    pub opacity: f32,
    /// Path complexity carried for cache statistics.
    pub segments: u32,
}

impl DrawItem {
    /// Whether this item fully covers its bounds.
    pub fn is_opaque(&self) -> bool {
        let color_opaque = match self.kind {
            DrawKind::Shape { color } | DrawKind::Clear { color } => color.is_opaque(),
            DrawKind::CachedGroup { .. } | DrawKind::LayerTexture { .. } => false,
            DrawKind::Highlight { .. } => false,
        };
        color_opaque && self.opacity >= 1.0
    }

    /// Whether painting this item requires re-entering its node in Draw2d mode.
    pub fn is_deferred(&self) -> bool {
        matches!(
            self.kind,
            DrawKind::CachedGroup { .. } | DrawKind::LayerTexture { .. }
        )
    }

    /// Items that count as drawables for cache statistics.
    pub fn is_drawable(&self) -> bool {
        !matches!(self.kind, DrawKind::Clear { .. } | DrawKind::Highlight { .. })
    }
}

/// Ordered 2D draw list; later items paint over earlier ones.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DisplayList {
    items: Vec<DrawItem>,
}

impl DisplayList {
    /// Number of items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true when no item was recorded.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// All items in paint order.
    pub fn items(&self) -> &[DrawItem] {
        &self.items
    }

    /// Items recorded since `start`.
    pub fn since(&self, start: usize) -> &[DrawItem] {
        self.items.get(start..).unwrap_or(&[])
    }

    pub(crate) fn push(&mut self, item: DrawItem) {
        self.items.push(item);
    }

    pub(crate) fn insert(&mut self, index: usize, item: DrawItem) {
        let i = index.min(self.items.len());
        self.items.insert(i, item);
    }

    pub(crate) fn truncate(&mut self, len: usize) {
        self.items.truncate(len);
    }

    pub(crate) fn take(&mut self) -> Vec<DrawItem> {
        core::mem::take(&mut self.items)
    }
}

/// A light in effect for a 3D draw.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ActiveLight {
    /// Light node; `None` for the navigation headlight.
    pub node: Option<NodeId>,
    /// Source type.
    pub kind: LightKind,
    /// Color.
    pub color: Color,
    /// Intensity in `0..=1`.
    pub intensity: f64,
    /// World-space position.
    pub location: Vec3,
    /// World-space direction.
    pub direction: Vec3,
}

/// Fog applied to a 3D draw.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FogParams {
    /// Fog color.
    pub color: Color,
    /// Full-fog distance.
    pub visibility_range: f64,
}

/// One entry of a 3D draw list.
#[derive(Clone, Debug, PartialEq)]
pub struct MeshItem {
    /// Node that produced the item.
    pub node: NodeId,
    /// Local-to-world transform.
    pub model: Matrix4,
    /// Local bounding box.
    pub bbox: Box3,
    /// Base color.
    pub color: Color,
    /// Eye-space depth of the box center.
    pub depth: f64,
    /// Pixel rectangle covered in the current viewport.
    pub screen_bounds: Rect,
    /// Lights in effect.
    pub lights: Vec<ActiveLight>,
    /// Bound fog, if any.
    pub fog: Option<FogParams>,
    /// Triangle count.
    pub triangles: u32,
}

/// Sort 3D items back to front; ties keep recording order.
pub(crate) fn sort_back_to_front(items: &mut [MeshItem]) {
    items.sort_by(|a, b| b.depth.total_cmp(&a.depth));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(kind: DrawKind, opacity: f32) -> DrawItem {
        DrawItem {
            node: crate::testing::dummy_id(),
            kind,
            transform: Affine::IDENTITY,
            local_bounds: Rect::ZERO,
            world_bounds: Rect::ZERO,
            clip: Rect::ZERO,
            opacity,
            segments: 0,
        }
    }

    #[test]
    fn opacity_and_kind_drive_opaqueness() {
        assert!(item(DrawKind::Shape { color: Color::BLACK }, 1.0).is_opaque());
        assert!(!item(DrawKind::Shape { color: Color::BLACK }, 0.5).is_opaque());
        assert!(!item(DrawKind::Shape { color: Color::TRANSPARENT }, 1.0).is_opaque());
        let cached = item(DrawKind::CachedGroup { texture: TextureId(1) }, 1.0);
        assert!(cached.is_deferred() && cached.is_drawable() && !cached.is_opaque());
        assert!(!item(DrawKind::Clear { color: Color::WHITE }, 1.0).is_drawable());
    }

    #[test]
    fn mesh_items_sort_far_first() {
        let mk = |depth| MeshItem {
            node: crate::testing::dummy_id(),
            model: Matrix4::IDENTITY,
            bbox: Box3::EMPTY,
            color: Color::WHITE,
            depth,
            screen_bounds: Rect::ZERO,
            lights: Vec::new(),
            fog: None,
            triangles: 0,
        };
        let mut items = alloc::vec![mk(1.0), mk(5.0), mk(3.0)];
        sort_back_to_front(&mut items);
        let depths: Vec<f64> = items.iter().map(|i| i.depth).collect();
        assert_eq!(depths, alloc::vec![5.0, 3.0, 1.0]);
    }
}
