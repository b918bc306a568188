// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Backend failure type.

/// Failure reported by a [`Rasterizer`](crate::Rasterizer).
///
/// The traversal never propagates these out of a pass: the affected node or
/// cache is logged and left inert.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// The platform cannot render 3D content offscreen.
    #[error("offscreen 3D rendering is not available")]
    OffscreenUnavailable,
    /// An offscreen target or texture could not be allocated.
    #[error("could not allocate a {width}x{height} offscreen buffer")]
    AllocationFailed {
        /// Requested width in pixels.
        width: u32,
        /// Requested height in pixels.
        height: u32,
    },
    /// The target handle is unknown or was released.
    #[error("unknown offscreen target")]
    UnknownTarget,
    /// The texture handle is unknown or was released.
    #[error("unknown texture")]
    UnknownTexture,
}
