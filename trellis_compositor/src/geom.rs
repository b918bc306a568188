// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Rectangle helpers shared by the traversal.

#[cfg(not(feature = "std"))]
use kurbo::common::FloatFuncs as _;
use alloc::vec::Vec;
use kurbo::{Affine, Point, Rect};

/// Returns true for rectangles with no area (the traversal's "empty" bounds).
pub(crate) fn is_empty(r: Rect) -> bool {
    !(r.width() > 0.0 && r.height() > 0.0)
}

/// Union that treats zero-area rectangles as empty.
pub(crate) fn union(a: Rect, b: Rect) -> Rect {
    match (is_empty(a), is_empty(b)) {
        (true, true) => Rect::ZERO,
        (true, false) => b,
        (false, true) => a,
        (false, false) => a.union(b),
    }
}

/// Intersection, or [`Rect::ZERO`] when the rectangles do not overlap.
pub(crate) fn intersect(a: Rect, b: Rect) -> Rect {
    let r = a.intersect(b);
    if is_empty(r) { Rect::ZERO } else { r }
}

/// Area covered by a set of rectangles, overlaps counted once.
///
/// Sweeps the vertical slabs between distinct x edges and merges the y spans
/// of the rectangles crossing each slab.
pub(crate) fn union_area(rects: &[Rect]) -> f64 {
    let rects: Vec<Rect> = rects.iter().copied().filter(|r| !is_empty(*r)).collect();
    let mut xs: Vec<f64> = rects.iter().flat_map(|r| [r.x0, r.x1]).collect();
    xs.sort_by(f64::total_cmp);
    xs.dedup();
    let mut area = 0.0;
    let mut spans: Vec<(f64, f64)> = Vec::new();
    for slab in xs.windows(2) {
        let (x0, x1) = (slab[0], slab[1]);
        spans.clear();
        spans.extend(
            rects
                .iter()
                .filter(|r| r.x0 <= x0 && r.x1 >= x1)
                .map(|r| (r.y0, r.y1)),
        );
        spans.sort_by(|a, b| a.0.total_cmp(&b.0));
        let mut covered = 0.0;
        let mut current: Option<(f64, f64)> = None;
        for &(y0, y1) in &spans {
            current = match current {
                Some((c0, c1)) if y0 <= c1 => Some((c0, c1.max(y1))),
                Some((c0, c1)) => {
                    covered += c1 - c0;
                    Some((y0, y1))
                }
                None => Some((y0, y1)),
            };
        }
        if let Some((c0, c1)) = current {
            covered += c1 - c0;
        }
        area += covered * (x1 - x0);
    }
    area
}

/// Transform an axis-aligned `Rect` by an `Affine` and return a conservative
/// axis-aligned bounding box.
pub(crate) fn transform_rect_bbox(affine: Affine, rect: Rect) -> Rect {
    if is_empty(rect) {
        return Rect::ZERO;
    }
    let p0 = affine * Point::new(rect.x0, rect.y0);
    let p1 = affine * Point::new(rect.x1, rect.y0);
    let p2 = affine * Point::new(rect.x0, rect.y1);
    let p3 = affine * Point::new(rect.x1, rect.y1);
    let min_x = p0.x.min(p1.x).min(p2.x).min(p3.x);
    let min_y = p0.y.min(p1.y).min(p2.y).min(p3.y);
    let max_x = p0.x.max(p1.x).max(p2.x).max(p3.x);
    let max_y = p0.y.max(p1.y).max(p2.y).max(p3.y);
    Rect::new(min_x, min_y, max_x, max_y)
}

/// Largest axis scale of an affine transform.
pub(crate) fn max_scale(affine: Affine) -> f64 {
    let [a, b, c, d, _, _] = affine.as_coeffs();
    (a * a + b * b).sqrt().max((c * c + d * d).sqrt())
}

/// Smallest pixel-aligned rectangle containing `r`.
pub(crate) fn pixelize(r: Rect) -> Rect {
    Rect::new(r.x0.floor(), r.y0.floor(), r.x1.ceil(), r.y1.ceil())
}

/// Round a pixel extent up to the next even number (at least 2).
pub(crate) fn round_even(v: f64) -> u32 {
    let n = to_pixels(v).max(1);
    n + (n & 1)
}

/// Round a pixel extent up to the next power of two, capped at `max`.
pub(crate) fn next_pow2(v: f64, max: u32) -> u32 {
    to_pixels(v).max(1).next_power_of_two().min(max.max(1))
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    reason = "pixel extents are clamped to the u32 range first."
)]
pub(crate) fn to_pixels(v: f64) -> u32 {
    v.ceil().clamp(0.0, f64::from(u32::MAX)) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn union_skips_zero_area() {
        let a = Rect::new(0.0, 0.0, 10.0, 10.0);
        let line = Rect::new(50.0, 50.0, 50.0, 60.0);
        assert_eq!(union(a, line), a);
        assert_eq!(union(Rect::ZERO, a), a);
        assert_eq!(union(Rect::ZERO, line), Rect::ZERO);
        assert_eq!(
            union(a, Rect::new(5.0, -5.0, 20.0, 5.0)),
            Rect::new(0.0, -5.0, 20.0, 10.0)
        );
    }

    #[test]
    fn union_area_counts_overlaps_once() {
        let band = Rect::new(0.0, 0.0, 100.0, 40.0);
        assert_eq!(union_area(&[band, band]), 4000.0);
        let shifted = Rect::new(50.0, 20.0, 150.0, 60.0);
        assert_eq!(union_area(&[band, shifted]), 4000.0 + 4000.0 - 50.0 * 20.0);
        let apart = Rect::new(0.0, 60.0, 10.0, 70.0);
        assert_eq!(union_area(&[band, apart, Rect::ZERO]), 4100.0);
        assert_eq!(union_area(&[]), 0.0);
    }

    #[test]
    fn pixel_rounding() {
        assert_eq!(
            pixelize(Rect::new(0.5, 1.2, 9.1, 9.0)),
            Rect::new(0.0, 1.0, 10.0, 9.0)
        );
        assert_eq!(round_even(9.0), 10);
        assert_eq!(round_even(10.0), 10);
        assert_eq!(round_even(0.0), 2);
        assert_eq!(next_pow2(300.0, 1024), 512);
        assert_eq!(next_pow2(3000.0, 1024), 1024);
        assert_eq!(next_pow2(256.0, 1024), 256);
    }

    #[test]
    fn rotated_bbox_is_conservative() {
        let r = Rect::new(0.0, 0.0, 10.0, 10.0);
        let bb = transform_rect_bbox(Affine::rotate(core::f64::consts::FRAC_PI_4), r);
        assert!(bb.width() > 14.0 && bb.height() > 14.0);
        assert!((max_scale(Affine::scale_non_uniform(2.0, 3.0)) - 3.0).abs() < 1e-12);
    }
}
