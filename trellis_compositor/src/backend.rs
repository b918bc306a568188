// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Seams to the outside world: the rasterizer that paints, and the clock that times traversals.

use alloc::vec::Vec;
use core::cell::Cell;
use kurbo::Rect;
use trellis_scene::Color;

use crate::display_list::{DrawItem, MeshItem};
use crate::error::BackendError;

/// Handle of an offscreen render target.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId(pub u32);

/// Handle of an uploaded texture.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u32);

/// Pixel layout of offscreen targets.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// 8-bit RGBA with straight alpha.
    #[default]
    Rgba8,
    /// 8-bit RGB, alpha ignored.
    Rgb8,
}

/// CPU copy of a pixel buffer, one `0xRRGGBBAA` word per pixel, row-major.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Pixmap {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// `width * height` pixels.
    pub data: Vec<u32>,
}

impl Pixmap {
    /// A pixmap filled with `color`.
    pub fn new(width: u32, height: u32, color: Color) -> Self {
        Self {
            width,
            height,
            data: alloc::vec![color.to_u32(); width as usize * height as usize],
        }
    }

    /// Pixel at `(x, y)`, or `None` outside the pixmap.
    pub fn pixel(&self, x: u32, y: u32) -> Option<Color> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = y as usize * self.width as usize + x as usize;
        self.data.get(i).copied().map(Color::from_u32)
    }

    /// Size of the pixel data in bytes.
    pub fn byte_len(&self) -> usize {
        self.data.len() * 4
    }
}

/// Painting backend driven by the traversal.
///
/// Offscreen targets nest: `begin_offscreen_target` and
/// `resume_offscreen_target` make a target current, and every successful call
/// is paired with one `end_offscreen_target` that restores whatever was current
/// before.
pub trait Rasterizer {
    /// Allocate a target and make it current.
    fn begin_offscreen_target(
        &mut self,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<TargetId, BackendError>;

    /// Make an existing target current again.
    fn resume_offscreen_target(&mut self, target: TargetId) -> Result<(), BackendError>;

    /// Restore the surface that was current before the matching begin/resume.
    fn end_offscreen_target(&mut self);

    /// Free a target. Releasing an unknown target is a no-op.
    fn release_target(&mut self, target: TargetId);

    /// Copy the pixels of a target to the CPU.
    fn readback(&mut self, target: TargetId) -> Result<Pixmap, BackendError>;

    /// Upload pixels as a texture.
    fn upload_texture(&mut self, pixels: Pixmap) -> Result<TextureId, BackendError>;

    /// Free a texture. Releasing an unknown texture is a no-op.
    fn release_texture(&mut self, texture: TextureId);

    /// Paint a 2D drawable into the current surface.
    fn draw_shape(&mut self, item: &DrawItem);

    /// Paint a texture over `item.world_bounds`, restricted to `clip`.
    fn draw_bitmap(&mut self, item: &DrawItem, texture: TextureId, clip: Rect);

    /// Paint a 3D drawable into the current surface.
    fn draw_mesh(&mut self, item: &MeshItem);

    /// Fill `rect` of the current surface with `color`, ignoring blending.
    fn clear_surface(&mut self, rect: Rect, color: Color);

    /// Whether 3D content can be rendered into offscreen targets.
    fn supports_offscreen_3d(&self) -> bool {
        true
    }
}

/// Monotonic time source used for traversal statistics.
pub trait Clock {
    /// Current time in microseconds.
    fn now_micros(&self) -> u64;
}

/// Clock advanced by hand, for tests and deterministic replays.
///
/// Each reading advances the clock by `step` microseconds, so timed regions are
/// never measured as zero.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Cell<u64>,
    step: u64,
}

impl ManualClock {
    /// A clock starting at zero that advances `step` microseconds per reading.
    pub fn new(step: u64) -> Self {
        Self {
            now: Cell::new(0),
            step,
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, micros: u64) {
        self.now.set(self.now.get().saturating_add(micros));
    }
}

impl Clock for ManualClock {
    fn now_micros(&self) -> u64 {
        let t = self.now.get();
        self.now.set(t.saturating_add(self.step));
        t
    }
}

/// Wall clock backed by [`std::time::Instant`].
#[cfg(feature = "std")]
#[derive(Debug)]
pub struct StdClock {
    origin: std::time::Instant,
}

#[cfg(feature = "std")]
impl Default for StdClock {
    fn default() -> Self {
        Self {
            origin: std::time::Instant::now(),
        }
    }
}

#[cfg(feature = "std")]
impl Clock for StdClock {
    fn now_micros(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_micros()).unwrap_or(u64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_steps_per_reading() {
        let clock = ManualClock::new(5);
        assert_eq!(clock.now_micros(), 0);
        assert_eq!(clock.now_micros(), 5);
        clock.advance(100);
        assert_eq!(clock.now_micros(), 110);
    }

    #[test]
    fn pixmap_indexing() {
        let mut p = Pixmap::new(3, 2, Color::BLACK);
        p.data[4] = Color::WHITE.to_u32();
        assert_eq!(p.pixel(1, 1), Some(Color::WHITE));
        assert_eq!(p.pixel(0, 0), Some(Color::BLACK));
        assert_eq!(p.pixel(3, 0), None);
        assert_eq!(p.byte_len(), 24);
    }
}
