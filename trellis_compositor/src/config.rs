// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Compositor configuration.

use kurbo::Size;

use crate::sensors::SensorScope;

/// Thresholds driving the offscreen group cache.
///
/// The defaults are empirical; they are exposed so hosts can tune them.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CacheConfig {
    /// Master switch for heuristic caching. Permanent caches ignore it.
    pub enabled: bool,
    /// Sort passes observed before a group may become cachable.
    pub warmup_frames: u32,
    /// Minimum fraction of the bounding area covered by drawn items.
    pub min_coverage: f64,
    /// Minimum number of path segments in the subtree.
    pub min_segments: u32,
    /// Minimum number of drawables in the subtree.
    pub min_drawables: u32,
    /// Caches smaller than this many bytes are not worth a texture.
    pub min_cache_bytes: usize,
    /// Upper bound on the bytes held by all heuristic caches together.
    pub memory_budget: usize,
    /// Relative scale change tolerated before a cache is rebuilt.
    pub scale_tolerance: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            warmup_frames: 2,
            min_coverage: 0.6,
            min_segments: 10,
            min_drawables: 2,
            min_cache_bytes: 400,
            memory_budget: 16 * 1024 * 1024,
            scale_tolerance: 0.3,
        }
    }
}

/// Per-compositor settings.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CompositorConfig {
    /// Size of the output surface in pixels.
    pub surface_size: Size,
    /// When false, layer units are scaled so 1.0 is half the smaller layer side.
    pub pixel_metrics: bool,
    /// How nested sensor lists combine during picking.
    pub sensor_scope: SensorScope,
    /// Group cache thresholds.
    pub cache: CacheConfig,
    /// Largest side of a 3D layer's offscreen target.
    pub layer3d_max_texture: u32,
}

impl Default for CompositorConfig {
    fn default() -> Self {
        Self {
            surface_size: Size::new(640.0, 480.0),
            pixel_metrics: true,
            sensor_scope: SensorScope::default(),
            cache: CacheConfig::default(),
            layer3d_max_texture: 1024,
        }
    }
}
