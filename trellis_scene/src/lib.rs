// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Trellis Scene: a generational arena for renderable scene graphs.
//!
//! This crate is the data side of the Trellis compositor. It stores nodes, their
//! typed fields, ownership, and staleness; it does not traverse or draw anything.
//!
//! - Every node has one owner and any number of non-owning re-users
//!   ([`Link::Shared`]), so shared sub-graphs never form ownership cycles.
//! - [`DirtyFlags`] record what derived state is stale. [`Scene::mark_dirty`]
//!   sets bits on a node and [`DirtyFlags::CHILD`] on all of its ancestors.
//! - Each node may carry a type-erased private block, created lazily by the
//!   traversal and released when the node is removed.
//! - Fields can be read and written by index through [`Scene::field`] and
//!   [`Scene::set_field`], which is how loaders talk to the scene.
//!
//! ## API overview
//!
//! - [`Scene`]: arena, structure edits, dirty flags, private blocks, fields.
//! - [`NodeKind`]: closed set of node kinds with typed fields; [`NodeTag`] and
//!   [`Category`] drive dispatch.
//! - [`NodeId`]: generational handle of a node.
//! - [`Box3`], [`Matrix4`], [`Vec3`]: the small amount of 3D math the traversal needs.
//!
//! ## Minimal usage
//!
//! ```
//! use trellis_scene::{DirtyFlags, FieldValue, Group, Scene, Shape, Switch};
//! use kurbo::Rect;
//!
//! let mut scene = Scene::new();
//! let root = scene.insert(None, Group::default());
//! scene.set_root(Some(root));
//! let switch = scene.insert(Some(root), Switch::default());
//! let leaf = scene.insert(
//!     Some(switch),
//!     Shape { bounds: Rect::new(0.0, 0.0, 10.0, 10.0), ..Default::default() },
//! );
//!
//! // Pretend a traversal recomputed everything.
//! for id in [root, switch, leaf] {
//!     scene.clear_dirty(id, DirtyFlags::all());
//! }
//!
//! // A loader selects the first alternative through the field table.
//! let which = scene.kind(switch).unwrap().field_index("whichChoice").unwrap();
//! scene.set_field(switch, which, FieldValue::Int(0)).unwrap();
//! assert_eq!(scene.dirty(switch), DirtyFlags::NODE);
//! assert_eq!(scene.dirty(root), DirtyFlags::CHILD);
//! ```
//!
//! This crate is `no_std` and uses `alloc`.

#![no_std]

extern crate alloc;

mod field;
mod kind;
mod math;
mod scene;
mod types;

pub use field::{FieldError, FieldInfo, FieldType, FieldValue};
pub use kind::{
    Anchor, Background, BindState, BindableCategory, CacheHint, Category, ExternalRef, Fog, Group,
    Group3d, Layer2d, Layer3d, Layout, LayoutDirection, Light, LightKind, Mesh, NavigationInfo,
    NodeKind, NodeTag, OrderedGroup, Sensor, SensorKind, Shape, Switch, Text, Transform2d,
    Transform3d, Viewpoint, Viewport,
};
pub use math::{Box3, Matrix4, Vec3};
pub use scene::Scene;
pub use types::{Child, Color, DirtyFlags, Link, NodeId};
