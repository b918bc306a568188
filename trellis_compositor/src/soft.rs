// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! A CPU reference [`Rasterizer`]: flat fills, nearest-neighbour blits, offscreen targets.
//!
//! Fills cover the pixels whose centers fall inside an item's world bounds
//! (after clipping), so axis-aligned content at integer coordinates renders
//! exactly. Every backend call is logged, which lets tests observe target
//! reuse and texture traffic.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use core::ops::Range;
#[cfg(not(feature = "std"))]
use kurbo::common::FloatFuncs as _;
use kurbo::Rect;
use trellis_scene::{Color, NodeId};

use crate::backend::{PixelFormat, Pixmap, Rasterizer, TargetId, TextureId};
use crate::display_list::{DrawItem, DrawKind, MeshItem};
use crate::error::BackendError;

/// One call received by a [`SoftRasterizer`].
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum SoftCall {
    /// A target was allocated.
    BeginTarget {
        /// New target.
        target: TargetId,
        /// Width in pixels.
        width: u32,
        /// Height in pixels.
        height: u32,
    },
    /// An existing target was made current again.
    ResumeTarget(TargetId),
    /// The current target was unbound.
    EndTarget,
    /// A target was freed.
    ReleaseTarget(TargetId),
    /// A target was copied to the CPU.
    Readback(TargetId),
    /// A texture was created.
    Upload(TextureId),
    /// A texture was freed.
    ReleaseTexture(TextureId),
    /// A 2D drawable was filled.
    DrawShape(NodeId),
    /// A texture was blitted.
    DrawBitmap {
        /// Node owning the draw item.
        node: NodeId,
        /// Source texture.
        texture: TextureId,
    },
    /// A 3D drawable was filled.
    DrawMesh(NodeId),
    /// A rectangle was cleared.
    Clear(Rect),
}

/// Software backend painting into `0xRRGGBBAA` buffers.
#[derive(Debug)]
pub struct SoftRasterizer {
    surface: Pixmap,
    targets: BTreeMap<u32, Pixmap>,
    /// Bound targets, innermost last; an empty stack paints the surface.
    bound: Vec<TargetId>,
    textures: BTreeMap<u32, Pixmap>,
    next_target: u32,
    next_texture: u32,
    offscreen_capacity: Option<usize>,
    offscreen_3d: bool,
    calls: Vec<SoftCall>,
}

impl SoftRasterizer {
    /// A transparent `width` x `height` surface with unlimited offscreen targets.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            surface: Pixmap::new(width, height, Color::TRANSPARENT),
            targets: BTreeMap::new(),
            bound: Vec::new(),
            textures: BTreeMap::new(),
            next_target: 0,
            next_texture: 0,
            offscreen_capacity: None,
            offscreen_3d: true,
            calls: Vec::new(),
        }
    }

    /// Limit the number of live offscreen targets; further allocations fail.
    pub fn set_offscreen_capacity(&mut self, capacity: Option<usize>) {
        self.offscreen_capacity = capacity;
    }

    /// Allow or deny offscreen rendering of 3D content.
    pub fn set_offscreen_3d(&mut self, supported: bool) {
        self.offscreen_3d = supported;
    }

    /// The output surface.
    pub fn surface(&self) -> &Pixmap {
        &self.surface
    }

    /// One pixel of the output surface.
    pub fn pixel(&self, x: u32, y: u32) -> Option<Color> {
        self.surface.pixel(x, y)
    }

    /// Calls received so far, oldest first.
    pub fn calls(&self) -> &[SoftCall] {
        &self.calls
    }

    /// Forget the call log.
    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    /// Number of allocated offscreen targets.
    pub fn live_targets(&self) -> usize {
        self.targets.len()
    }

    /// Number of live textures.
    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    /// Contents of a live texture.
    pub fn texture(&self, texture: TextureId) -> Option<&Pixmap> {
        self.textures.get(&texture.0)
    }

    fn current(&mut self) -> &mut Pixmap {
        match self.bound.last() {
            Some(t) if self.targets.contains_key(&t.0) => {
                let key = t.0;
                self.targets.get_mut(&key).unwrap_or(&mut self.surface)
            }
            _ => &mut self.surface,
        }
    }
}

/// Pixels whose centers lie in `lo..hi`, limited to `0..max`.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    reason = "bounds are clamped to the pixmap before the cast."
)]
fn span(lo: f64, hi: f64, max: u32) -> Range<u32> {
    let start = (lo - 0.5).ceil().clamp(0.0, f64::from(max));
    let end = (hi - 0.5).ceil().clamp(0.0, f64::from(max));
    if end <= start {
        0..0
    } else {
        start as u32..end as u32
    }
}

/// Source-over blend of straight-alpha `0xRRGGBBAA` pixels.
fn blend_over(src: Color, dst: Color) -> Color {
    let sa = u32::from(src.a);
    if sa == 255 {
        return src;
    }
    if sa == 0 {
        return dst;
    }
    let da = u32::from(dst.a);
    let inv = 255 - sa;
    let out_a = sa + da * inv / 255;
    if out_a == 0 {
        return Color::TRANSPARENT;
    }
    #[allow(
        clippy::cast_possible_truncation,
        reason = "weighted averages of 8-bit channels stay within 8 bits."
    )]
    let mix = |s: u8, d: u8| {
        ((u32::from(s) * sa + u32::from(d) * da * inv / 255) / out_a) as u8
    };
    let a = u8::try_from(out_a).unwrap_or(u8::MAX);
    Color::rgba(mix(src.r, dst.r), mix(src.g, dst.g), mix(src.b, dst.b), a)
}

fn fill(dst: &mut Pixmap, rect: Rect, color: Color, blend: bool) {
    let w = dst.width as usize;
    for y in span(rect.y0, rect.y1, dst.height) {
        for x in span(rect.x0, rect.x1, dst.width) {
            let i = y as usize * w + x as usize;
            if let Some(px) = dst.data.get_mut(i) {
                let c = if blend {
                    blend_over(color, Color::from_u32(*px))
                } else {
                    color
                };
                *px = c.to_u32();
            }
        }
    }
}

fn outline(dst: &mut Pixmap, rect: Rect, color: Color) {
    let edges = [
        Rect::new(rect.x0, rect.y0, rect.x1, rect.y0 + 1.0),
        Rect::new(rect.x0, rect.y1 - 1.0, rect.x1, rect.y1),
        Rect::new(rect.x0, rect.y0, rect.x0 + 1.0, rect.y1),
        Rect::new(rect.x1 - 1.0, rect.y0, rect.x1, rect.y1),
    ];
    for e in edges {
        fill(dst, e, color, true);
    }
}

/// Nearest-neighbour scale of `src` onto `dst_rect`, restricted to `clip`.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    reason = "sample coordinates are clamped to the source extent."
)]
fn blit_scaled(dst: &mut Pixmap, dst_rect: Rect, clip: Rect, src: &Pixmap, opacity: f32) {
    if dst_rect.width() <= 0.0 || dst_rect.height() <= 0.0 || src.width == 0 || src.height == 0 {
        return;
    }
    let area = dst_rect.intersect(clip);
    let sx = f64::from(src.width) / dst_rect.width();
    let sy = f64::from(src.height) / dst_rect.height();
    let w = dst.width as usize;
    for y in span(area.y0, area.y1, dst.height) {
        let v = ((f64::from(y) + 0.5 - dst_rect.y0) * sy).floor();
        let v = v.clamp(0.0, f64::from(src.height - 1)) as u32;
        for x in span(area.x0, area.x1, dst.width) {
            let u = ((f64::from(x) + 0.5 - dst_rect.x0) * sx).floor();
            let u = u.clamp(0.0, f64::from(src.width - 1)) as u32;
            let Some(sample) = src.pixel(u, v) else {
                continue;
            };
            if let Some(px) = dst.data.get_mut(y as usize * w + x as usize) {
                *px = blend_over(sample.with_opacity(opacity), Color::from_u32(*px)).to_u32();
            }
        }
    }
}

impl Rasterizer for SoftRasterizer {
    fn begin_offscreen_target(
        &mut self,
        width: u32,
        height: u32,
        _format: PixelFormat,
    ) -> Result<TargetId, BackendError> {
        if self
            .offscreen_capacity
            .is_some_and(|cap| self.targets.len() >= cap)
            || width == 0
            || height == 0
        {
            return Err(BackendError::AllocationFailed { width, height });
        }
        let target = TargetId(self.next_target);
        self.next_target += 1;
        self.targets
            .insert(target.0, Pixmap::new(width, height, Color::TRANSPARENT));
        self.bound.push(target);
        self.calls.push(SoftCall::BeginTarget {
            target,
            width,
            height,
        });
        Ok(target)
    }

    fn resume_offscreen_target(&mut self, target: TargetId) -> Result<(), BackendError> {
        if !self.targets.contains_key(&target.0) {
            return Err(BackendError::UnknownTarget);
        }
        self.bound.push(target);
        self.calls.push(SoftCall::ResumeTarget(target));
        Ok(())
    }

    fn end_offscreen_target(&mut self) {
        self.bound.pop();
        self.calls.push(SoftCall::EndTarget);
    }

    fn release_target(&mut self, target: TargetId) {
        if self.targets.remove(&target.0).is_some() {
            self.bound.retain(|t| *t != target);
            self.calls.push(SoftCall::ReleaseTarget(target));
        }
    }

    fn readback(&mut self, target: TargetId) -> Result<Pixmap, BackendError> {
        let pixels = self
            .targets
            .get(&target.0)
            .cloned()
            .ok_or(BackendError::UnknownTarget)?;
        self.calls.push(SoftCall::Readback(target));
        Ok(pixels)
    }

    fn upload_texture(&mut self, pixels: Pixmap) -> Result<TextureId, BackendError> {
        let texture = TextureId(self.next_texture);
        self.next_texture += 1;
        self.textures.insert(texture.0, pixels);
        self.calls.push(SoftCall::Upload(texture));
        Ok(texture)
    }

    fn release_texture(&mut self, texture: TextureId) {
        if self.textures.remove(&texture.0).is_some() {
            self.calls.push(SoftCall::ReleaseTexture(texture));
        }
    }

    fn draw_shape(&mut self, item: &DrawItem) {
        let rect = item.world_bounds.intersect(item.clip);
        match item.kind {
            DrawKind::Shape { color } => {
                fill(self.current(), rect, color.with_opacity(item.opacity), true);
            }
            DrawKind::Highlight { color } => outline(self.current(), rect, color),
            _ => return,
        }
        self.calls.push(SoftCall::DrawShape(item.node));
    }

    fn draw_bitmap(&mut self, item: &DrawItem, texture: TextureId, clip: Rect) {
        let Some(src) = self.textures.remove(&texture.0) else {
            return;
        };
        blit_scaled(self.current(), item.world_bounds, clip, &src, item.opacity);
        self.textures.insert(texture.0, src);
        self.calls.push(SoftCall::DrawBitmap {
            node: item.node,
            texture,
        });
    }

    fn draw_mesh(&mut self, item: &MeshItem) {
        fill(self.current(), item.screen_bounds, item.color, true);
        self.calls.push(SoftCall::DrawMesh(item.node));
    }

    fn clear_surface(&mut self, rect: Rect, color: Color) {
        fill(self.current(), rect, color, false);
        self.calls.push(SoftCall::Clear(rect));
    }

    fn supports_offscreen_3d(&self) -> bool {
        self.offscreen_3d
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kurbo::Affine;

    fn shape(color: Color, bounds: Rect) -> DrawItem {
        DrawItem {
            node: crate::testing::dummy_id(),
            kind: DrawKind::Shape { color },
            transform: Affine::IDENTITY,
            local_bounds: bounds,
            world_bounds: bounds,
            clip: Rect::new(0.0, 0.0, 100.0, 100.0),
            opacity: 1.0,
            segments: 4,
        }
    }

    #[test]
    fn fills_cover_pixel_centers() {
        let mut r = SoftRasterizer::new(8, 8);
        r.draw_shape(&shape(Color::WHITE, Rect::new(2.0, 2.0, 4.0, 4.0)));
        assert_eq!(r.pixel(2, 2), Some(Color::WHITE));
        assert_eq!(r.pixel(3, 3), Some(Color::WHITE));
        assert_eq!(r.pixel(4, 4), Some(Color::TRANSPARENT));
        assert_eq!(r.pixel(1, 2), Some(Color::TRANSPARENT));
    }

    #[test]
    fn translucent_fill_blends() {
        let mut r = SoftRasterizer::new(4, 4);
        r.clear_surface(Rect::new(0.0, 0.0, 4.0, 4.0), Color::BLACK);
        let mut item = shape(Color::WHITE, Rect::new(0.0, 0.0, 4.0, 4.0));
        item.opacity = 0.5;
        r.draw_shape(&item);
        let px = r.pixel(0, 0).unwrap();
        assert_eq!(px.a, 255);
        assert!(px.r > 100 && px.r < 150);
    }

    #[test]
    fn offscreen_round_trip() {
        let mut r = SoftRasterizer::new(8, 8);
        let t = r.begin_offscreen_target(2, 2, PixelFormat::Rgba8).unwrap();
        r.draw_shape(&shape(Color::rgb(255, 0, 0), Rect::new(0.0, 0.0, 2.0, 2.0)));
        r.end_offscreen_target();
        assert_eq!(r.pixel(0, 0), Some(Color::TRANSPARENT));
        let pixels = r.readback(t).unwrap();
        let tex = r.upload_texture(pixels).unwrap();
        r.release_target(t);
        let blit = shape(Color::WHITE, Rect::new(4.0, 4.0, 8.0, 8.0));
        r.draw_bitmap(&blit, tex, blit.clip);
        assert_eq!(r.pixel(5, 5), Some(Color::rgb(255, 0, 0)));
        assert_eq!(r.pixel(7, 7), Some(Color::rgb(255, 0, 0)));
        assert_eq!(r.live_targets(), 0);
        assert_eq!(r.live_textures(), 1);
    }

    #[test]
    fn capacity_limits_targets() {
        let mut r = SoftRasterizer::new(8, 8);
        r.set_offscreen_capacity(Some(1));
        let t = r.begin_offscreen_target(2, 2, PixelFormat::Rgba8).unwrap();
        assert_eq!(
            r.begin_offscreen_target(2, 2, PixelFormat::Rgba8),
            Err(BackendError::AllocationFailed {
                width: 2,
                height: 2
            })
        );
        r.end_offscreen_target();
        r.release_target(t);
        assert!(r.begin_offscreen_target(2, 2, PixelFormat::Rgba8).is_ok());
    }
}
