// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Public handle and flag types: node identifiers, dirty bits, child links, colors.

/// Identifier for a node in a [`Scene`](crate::Scene).
///
/// This is a small, copyable handle that stays stable across updates but becomes
/// invalid when the underlying slot is reused.
/// It consists of a slot index and a generation counter.
///
/// ## Semantics
///
/// - On insert, a fresh slot is allocated with generation `1`.
/// - On remove, the slot is freed; any existing `NodeId` that pointed to that slot is now stale.
/// - On reuse of a freed slot, its generation is incremented, producing a new, distinct `NodeId`.
///
/// Use [`Scene::is_alive`](crate::Scene::is_alive) to check whether a `NodeId` still refers to a
/// live node. Stale `NodeId`s never alias a different live node because the generation must match.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u32, pub(crate) u32);

impl NodeId {
    pub(crate) const fn new(idx: u32, generation: u32) -> Self {
        Self(idx, generation)
    }

    pub(crate) const fn idx(self) -> usize {
        self.0 as usize
    }

    /// Slot index of this handle.
    pub const fn index(self) -> u32 {
        self.0
    }

    /// Generation of this handle.
    pub const fn generation(self) -> u32 {
        self.1
    }
}

bitflags::bitflags! {
    /// Staleness bits recorded on each node.
    ///
    /// A bit is only cleared by the traversal that recomputes the state it guards.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct DirtyFlags: u8 {
        /// The node's own fields changed.
        const NODE     = 0b0000_0001;
        /// Something below the node changed; cached bounds and inventories are stale.
        const CHILD    = 0b0000_0010;
        /// Only appearance changed (no geometry).
        const COLOR    = 0b0000_0100;
        /// A bind request is pending on a bindable node.
        const BINDABLE = 0b0000_1000;
    }
}

/// How a parent refers to one of its children.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Link {
    /// The parent owns the child; removing the parent removes the child.
    Owned,
    /// A re-use of a node owned elsewhere. Never owns, never removes.
    Shared,
}

/// One entry of a node's ordered child list.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Child {
    /// The referenced node.
    pub id: NodeId,
    /// Ownership of the reference.
    pub link: Link,
}

/// An 8-bit RGBA color.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
pub struct Color {
    /// Red.
    pub r: u8,
    /// Green.
    pub g: u8,
    /// Blue.
    pub b: u8,
    /// Alpha; `255` is opaque.
    pub a: u8,
}

impl Color {
    /// Fully transparent black.
    pub const TRANSPARENT: Self = Self::rgba(0, 0, 0, 0);
    /// Opaque black.
    pub const BLACK: Self = Self::rgba(0, 0, 0, 255);
    /// Opaque white.
    pub const WHITE: Self = Self::rgba(255, 255, 255, 255);

    /// Build a color from its components.
    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// Build an opaque color.
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self::rgba(r, g, b, 255)
    }

    /// Returns true when the color fully covers what is below it.
    pub const fn is_opaque(self) -> bool {
        self.a == 255
    }

    /// Pack as `0xRRGGBBAA`.
    pub const fn to_u32(self) -> u32 {
        ((self.r as u32) << 24) | ((self.g as u32) << 16) | ((self.b as u32) << 8) | self.a as u32
    }

    /// Unpack from `0xRRGGBBAA`.
    #[allow(
        clippy::cast_possible_truncation,
        reason = "each channel is masked to 8 bits first."
    )]
    pub const fn from_u32(v: u32) -> Self {
        Self::rgba(
            (v >> 24) as u8,
            ((v >> 16) & 0xff) as u8,
            ((v >> 8) & 0xff) as u8,
            (v & 0xff) as u8,
        )
    }

    /// Return this color with its alpha multiplied by `opacity` (clamped to `0..=1`).
    #[allow(
        clippy::cast_possible_truncation,
        reason = "the product is clamped to the u8 range before the cast."
    )]
    pub fn with_opacity(self, opacity: f32) -> Self {
        let o = opacity.clamp(0.0, 1.0);
        let a = (f32::from(self.a) * o + 0.5).clamp(0.0, 255.0) as u8;
        Self { a, ..self }
    }
}
