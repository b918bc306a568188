// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Trellis Compositor: multi-mode traversal of a [`trellis_scene::Scene`].
//!
//! One recursive walk serves every purpose. Each pass runs in a
//! [`TraverseMode`] (bounds, sort, pick, immediate 2D or 3D draw, bindable
//! application, collision, lighting) and each node category answers it in its
//! own way:
//!
//! - Grouping nodes visit their children plainly, in key order, through a
//!   switch, or flowed by a layout. Inside 3D layers they cull against the
//!   camera frustum and the layer's clip planes.
//! - Groups that redraw the same content frame after frame are observed,
//!   judged cachable and then drawn from an offscreen texture, within a shared
//!   memory budget ([`CacheState`]).
//! - Background, viewpoint, navigation and fog nodes live on bindable stacks
//!   scoped to their layer; the top of each stack is bound ([`BindEvent`]).
//! - Picking collects the enabled sensors on the path to the hit leaf and
//!   reports over/out transitions ([`SensorEvent`]).
//! - 2D layers open a clipped viewport; 3D layers render their subtree through
//!   a perspective camera into an offscreen target.
//!
//! Painting goes through the [`Rasterizer`] trait. [`SoftRasterizer`] paints
//! into CPU buffers and records every call, which is what the tests use.
//!
//! ## Minimal usage
//!
//! ```
//! use kurbo::{Rect, Size};
//! use trellis_compositor::{Compositor, CompositorConfig, ManualClock, SoftRasterizer};
//! use trellis_scene::{Color, Group, Scene, Shape};
//!
//! let mut scene = Scene::new();
//! let root = scene.insert(None, Group::default());
//! scene.set_root(Some(root));
//! scene.insert(
//!     Some(root),
//!     Shape { bounds: Rect::new(0.0, 0.0, 8.0, 8.0), color: Color::WHITE, ..Default::default() },
//! );
//!
//! let config = CompositorConfig { surface_size: Size::new(16.0, 16.0), ..Default::default() };
//! let mut compositor = Compositor::new(SoftRasterizer::new(16, 16), ManualClock::new(1), config);
//! let stats = compositor.render_frame(&mut scene);
//! assert_eq!(stats.frame, 1);
//! assert_eq!(compositor.backend().pixel(4, 4), Some(Color::WHITE));
//! assert_eq!(compositor.compute_bounds(&mut scene, root), Rect::new(0.0, 0.0, 8.0, 8.0));
//! ```
//!
//! This crate is `no_std` and uses `alloc`; the `std` feature adds [`StdClock`].

#![no_std]

extern crate alloc;
#[cfg(feature = "std")]
extern crate std;

mod backend;
mod bindable;
mod cache;
mod camera;
mod compositor;
mod config;
mod context;
mod dispatch;
mod display_list;
mod error;
mod geom;
mod grouping;
mod layer;
mod leaf;
mod sensors;
mod soft;

#[cfg(feature = "std")]
pub use backend::StdClock;
pub use backend::{Clock, ManualClock, PixelFormat, Pixmap, Rasterizer, TargetId, TextureId};
pub use bindable::BindEvent;
pub use cache::CacheState;
pub use camera::{Camera, Frustum, Plane, Visibility, classify_planes};
pub use compositor::{Compositor, FrameStats};
pub use config::{CacheConfig, CompositorConfig};
pub use context::{Collision, PickResult, TraverseMode};
pub use display_list::{ActiveLight, DisplayList, DrawItem, DrawKind, FogParams, MeshItem};
pub use error::BackendError;
pub use sensors::{ActiveSensors, HandlerKind, SensorEvent, SensorHandler, SensorScope};
pub use soft::{SoftCall, SoftRasterizer};

#[cfg(test)]
pub(crate) mod testing {
    use trellis_scene::{Group, NodeId, Scene};

    /// A live-looking id for tests that only need a handle.
    pub(crate) fn dummy_id() -> NodeId {
        Scene::new().insert(None, Group::default())
    }
}
