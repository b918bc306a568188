// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Group cache warm-up.
//!
//! Render a static group for a few frames and watch it move from uncached to
//! observed to cached, then edit a leaf and watch the cache drop.
//!
//! Run:
//! - `RUST_LOG=trellis_compositor=debug cargo run -p trellis_demos --example cache_warmup`

use kurbo::{Rect, Size};
use trellis_compositor::{Compositor, CompositorConfig, SoftCall, SoftRasterizer, StdClock};
use trellis_scene::{Color, Group, NodeKind, Scene, Shape};

fn main() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let mut scene = Scene::new();
    let root = scene.insert(None, Group::default());
    scene.set_root(Some(root));
    let panel = scene.insert(Some(root), Group::default());
    let mut leaves = Vec::new();
    for row in 0..4 {
        for col in 0..4 {
            let (x, y) = (f64::from(col) * 24.0, f64::from(row) * 24.0);
            leaves.push(scene.insert(
                Some(panel),
                Shape {
                    bounds: Rect::new(x, y, x + 24.0, y + 24.0),
                    segments: 6,
                    color: Color::rgb(40 * (col + 1), 40 * (row + 1), 200),
                },
            ));
        }
    }

    let config = CompositorConfig {
        surface_size: Size::new(128.0, 128.0),
        ..CompositorConfig::default()
    };
    let mut compositor = Compositor::new(SoftRasterizer::new(128, 128), StdClock::default(), config);

    for _ in 0..5 {
        compositor.backend_mut().clear_calls();
        let stats = compositor.render_frame(&mut scene);
        let blits = compositor
            .backend()
            .calls()
            .iter()
            .filter(|c| matches!(c, SoftCall::DrawBitmap { .. }))
            .count();
        log::info!(
            "frame {}: panel {:?}, {} draw items, {} blits, {} cache bytes",
            stats.frame,
            compositor.cache_state(&scene, panel),
            stats.draw_items,
            blits,
            compositor.cache_memory()
        );
    }

    if let Some(NodeKind::Shape(s)) = scene.kind_mut(leaves[5]) {
        s.color = Color::WHITE;
    }
    let stats = compositor.render_frame(&mut scene);
    log::info!(
        "frame {} after an edit: panel {:?}",
        stats.frame,
        compositor.cache_state(&scene, panel)
    );
}
