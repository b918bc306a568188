// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Camera, view frustum, and clip planes for 3D traversal.

#[cfg(not(feature = "std"))]
use kurbo::common::FloatFuncs as _;
use kurbo::{Point, Rect, Size};
use trellis_scene::{Box3, Matrix4, Vec3};

/// A plane `normal · p + d = 0`; points with a positive distance are inside.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Plane {
    /// Plane normal (not necessarily unit length).
    pub normal: Vec3,
    /// Offset.
    pub d: f64,
}

impl Plane {
    /// Create a plane.
    pub const fn new(normal: Vec3, d: f64) -> Self {
        Self { normal, d }
    }

    /// Signed distance of `p`, scaled by the normal length.
    pub fn distance(&self, p: Vec3) -> f64 {
        self.normal.dot(p) + self.d
    }

    fn normalized(self) -> Self {
        let len = self.normal.length();
        if len == 0.0 {
            return self;
        }
        Self::new(self.normal * (1.0 / len), self.d / len)
    }

    /// Move a plane expressed in local coordinates into the space `m` maps to.
    pub fn transform(&self, m: &Matrix4) -> Option<Self> {
        let inv = m.inverse()?;
        let q = [self.normal.x, self.normal.y, self.normal.z, self.d];
        let col = |j: usize| (0..4).map(|i| q[i] * inv.at(i, j)).sum::<f64>();
        Some(Self::new(Vec3::new(col(0), col(1), col(2)), col(3)))
    }

    /// Classify a box against this plane alone.
    pub fn classify(&self, b: &Box3) -> Visibility {
        let n = self.normal;
        let pick = |pos: bool| {
            Vec3::new(
                if (n.x >= 0.0) == pos { b.max.x } else { b.min.x },
                if (n.y >= 0.0) == pos { b.max.y } else { b.min.y },
                if (n.z >= 0.0) == pos { b.max.z } else { b.min.z },
            )
        };
        if self.distance(pick(true)) < 0.0 {
            Visibility::Outside
        } else if self.distance(pick(false)) < 0.0 {
            Visibility::Partial
        } else {
            Visibility::Inside
        }
    }
}

/// Result of a culling test.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Visibility {
    /// Entirely outside; skip.
    Outside,
    /// Straddles a boundary; test children individually.
    Partial,
    /// Entirely inside; children need no further test.
    Inside,
}

/// The six planes bounding what a camera sees, in world space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Frustum {
    planes: [Plane; 6],
}

impl Frustum {
    /// Extract the planes of a combined view-projection matrix.
    pub fn from_matrix(m: &Matrix4) -> Self {
        let row = |i: usize| [m.at(i, 0), m.at(i, 1), m.at(i, 2), m.at(i, 3)];
        let (r0, r1, r2, r3) = (row(0), row(1), row(2), row(3));
        let combine = |a: [f64; 4], b: [f64; 4], s: f64| {
            Plane::new(
                Vec3::new(a[0] + s * b[0], a[1] + s * b[1], a[2] + s * b[2]),
                a[3] + s * b[3],
            )
            .normalized()
        };
        Self {
            planes: [
                combine(r3, r0, 1.0),
                combine(r3, r0, -1.0),
                combine(r3, r1, 1.0),
                combine(r3, r1, -1.0),
                combine(r3, r2, 1.0),
                combine(r3, r2, -1.0),
            ],
        }
    }

    /// Classify a world-space box.
    pub fn classify(&self, b: &Box3) -> Visibility {
        classify_planes(&self.planes, b)
    }
}

/// Classify a box against a set of planes.
pub fn classify_planes(planes: &[Plane], b: &Box3) -> Visibility {
    if b.is_empty() {
        return Visibility::Outside;
    }
    let mut result = Visibility::Inside;
    for p in planes {
        match p.classify(b) {
            Visibility::Outside => return Visibility::Outside,
            Visibility::Partial => result = Visibility::Partial,
            Visibility::Inside => {}
        }
    }
    result
}

/// Perspective camera rendering into a pixel viewport.
#[derive(Clone, Debug, PartialEq)]
pub struct Camera {
    /// Viewport size in pixels.
    pub viewport: Size,
    /// Eye position in world space.
    pub position: Vec3,
    /// Vertical field of view in radians.
    pub field_of_view: f64,
    /// Near plane distance.
    pub near: f64,
    /// Far plane distance.
    pub far: f64,
    /// Projection matrix.
    pub projection: Matrix4,
    /// World-to-eye matrix.
    pub view: Matrix4,
    /// World-space frustum.
    pub frustum: Frustum,
}

impl Camera {
    /// Default near plane.
    pub const NEAR: f64 = 0.1;
    /// Default far plane.
    pub const FAR: f64 = 1000.0;

    /// Camera at `position` looking down `-Z`.
    pub fn new(viewport: Size, position: Vec3, field_of_view: f64) -> Self {
        let aspect = if viewport.height > 0.0 {
            viewport.width / viewport.height
        } else {
            1.0
        };
        let projection = Matrix4::perspective(field_of_view, aspect, Self::NEAR, Self::FAR);
        let view = Matrix4::from_translation(-position);
        let frustum = Frustum::from_matrix(&(projection * view));
        Self {
            viewport,
            position,
            field_of_view,
            near: Self::NEAR,
            far: Self::FAR,
            projection,
            view,
            frustum,
        }
    }

    /// Combined world-to-clip matrix.
    pub fn view_projection(&self) -> Matrix4 {
        self.projection * self.view
    }

    /// Eye-space depth of a world point (positive in front of the camera).
    pub fn depth(&self, p: Vec3) -> f64 {
        -self.view.transform_point(p).z
    }

    /// Pixel rectangle covered by a world-space box, clamped to the viewport.
    pub fn project_box(&self, b: &Box3) -> Rect {
        if b.is_empty() {
            return Rect::ZERO;
        }
        let vp = self.view_projection();
        let mut out: Option<Rect> = None;
        for c in b.corners() {
            let ndc = vp.transform_point(c);
            let px = Point::new(
                (ndc.x + 1.0) * 0.5 * self.viewport.width,
                (1.0 - ndc.y) * 0.5 * self.viewport.height,
            );
            out = Some(match out {
                Some(r) => r.union_pt(px),
                None => Rect::from_points(px, px),
            });
        }
        out.unwrap_or(Rect::ZERO)
            .intersect(Rect::from_origin_size(Point::ORIGIN, self.viewport))
    }

    /// World-space ray through a pixel of the viewport.
    pub fn ray_through(&self, pixel: Point) -> Option<(Vec3, Vec3)> {
        if self.viewport.width <= 0.0 || self.viewport.height <= 0.0 {
            return None;
        }
        let x = pixel.x / self.viewport.width * 2.0 - 1.0;
        let y = 1.0 - pixel.y / self.viewport.height * 2.0;
        let inv = self.view_projection().inverse()?;
        let near = inv.transform_point(Vec3::new(x, y, -1.0));
        let far = inv.transform_point(Vec3::new(x, y, 1.0));
        Some((near, (far - near).normalize()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cam() -> Camera {
        Camera::new(Size::new(100.0, 100.0), Vec3::new(0.0, 0.0, 10.0), core::f64::consts::FRAC_PI_2)
    }

    #[test]
    fn frustum_classifies_boxes() {
        let c = cam();
        let visible = Box3::new(Vec3::new(-1.0, -1.0, -1.0), Vec3::new(1.0, 1.0, 1.0));
        let behind = Box3::new(Vec3::new(-1.0, -1.0, 20.0), Vec3::new(1.0, 1.0, 22.0));
        let aside = Box3::new(Vec3::new(100.0, -1.0, -1.0), Vec3::new(102.0, 1.0, 1.0));
        let huge = Box3::new(Vec3::new(-500.0, -500.0, -5.0), Vec3::new(500.0, 500.0, 5.0));
        assert_eq!(c.frustum.classify(&visible), Visibility::Inside);
        assert_eq!(c.frustum.classify(&behind), Visibility::Outside);
        assert_eq!(c.frustum.classify(&aside), Visibility::Outside);
        assert_eq!(c.frustum.classify(&huge), Visibility::Partial);
    }

    #[test]
    fn center_ray_points_down_minus_z() {
        let c = cam();
        let (origin, dir) = c.ray_through(Point::new(50.0, 50.0)).unwrap();
        assert!((origin.x).abs() < 1e-9 && (origin.y).abs() < 1e-9);
        assert!((dir.z + 1.0).abs() < 1e-9);
        assert!(c.depth(Vec3::ZERO) > 9.9);
    }

    #[test]
    fn projected_box_is_centered() {
        let c = cam();
        let b = Box3::new(Vec3::new(-1.0, -1.0, 0.0), Vec3::new(1.0, 1.0, 0.0));
        let r = c.project_box(&b);
        assert!((r.center().x - 50.0).abs() < 1e-6);
        assert!((r.center().y - 50.0).abs() < 1e-6);
        assert!(r.width() > 0.0 && r.width() < 100.0);
    }

    #[test]
    fn planes_follow_transforms() {
        let p = Plane::new(Vec3::new(1.0, 0.0, 0.0), 0.0);
        let moved = p
            .transform(&Matrix4::from_translation(Vec3::new(5.0, 0.0, 0.0)))
            .unwrap();
        assert!(moved.distance(Vec3::new(5.5, 0.0, 0.0)) > 0.0);
        assert!(moved.distance(Vec3::new(4.5, 0.0, 0.0)) < 0.0);
    }
}
