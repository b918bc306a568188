// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Layers and bindable stacks.
//!
//! A 2D layer with its own background and view box sits next to a 3D layer
//! rendered offscreen. Binding a second background swaps the root fill.
//!
//! Run:
//! - `RUST_LOG=debug cargo run -p trellis_demos --example layers_and_bindables`

use kurbo::{Rect, Size};
use trellis_compositor::{Compositor, CompositorConfig, ManualClock, SoftRasterizer};
use trellis_scene::{
    Background, Box3, Color, Group, Layer2d, Layer3d, Mesh, NodeKind, Scene, Shape, Transform2d,
    Vec3, Viewport,
};

fn main() {
    env_logger::init();

    let mut scene = Scene::new();
    let root = scene.insert(None, Group::default());
    scene.set_root(Some(root));
    let day = scene.insert(
        Some(root),
        Background {
            color: Color::rgb(200, 220, 255),
            ..Background::default()
        },
    );
    let night = scene.insert(
        Some(root),
        Background {
            color: Color::rgb(10, 10, 40),
            ..Background::default()
        },
    );

    // Left half: a 2D layer mapping a 200x200 view box onto 100x100 pixels.
    let layer2d = scene.insert(
        Some(root),
        Layer2d {
            size: Size::new(100.0, 100.0),
            ..Layer2d::default()
        },
    );
    let vp = scene.insert_attached(
        layer2d,
        Viewport {
            view_box: Rect::new(0.0, 0.0, 200.0, 200.0),
            ..Viewport::default()
        },
    );
    if let Some(NodeKind::Layer2d(l)) = scene.kind_mut(layer2d) {
        l.viewport = vp;
    }
    scene.insert(
        Some(layer2d),
        Shape {
            bounds: Rect::new(20.0, 20.0, 180.0, 180.0),
            color: Color::rgb(250, 120, 0),
            ..Shape::default()
        },
    );

    // Right half: a 3D layer with two boxes, one far outside the view.
    let right = scene.insert(
        Some(root),
        Transform2d {
            transform: kurbo::Affine::translate((100.0, 0.0)),
            ..Transform2d::default()
        },
    );
    let layer3d = scene.insert(
        Some(right),
        Layer3d {
            size: Size::new(100.0, 100.0),
            ..Layer3d::default()
        },
    );
    for (x, color) in [(0.0, Color::rgb(0, 200, 80)), (500.0, Color::WHITE)] {
        scene.insert(
            Some(layer3d),
            Mesh {
                bbox: Box3::new(Vec3::new(x - 1.0, -1.0, -1.0), Vec3::new(x + 1.0, 1.0, 1.0)),
                triangles: 12,
                color,
            },
        );
    }

    let config = CompositorConfig {
        surface_size: Size::new(200.0, 100.0),
        ..CompositorConfig::default()
    };
    let mut compositor = Compositor::new(SoftRasterizer::new(200, 100), ManualClock::new(5), config);

    for _ in 0..2 {
        let stats = compositor.render_frame(&mut scene);
        println!("frame {}: {} items", stats.frame, stats.draw_items);
    }
    println!("bind events: {:?}", compositor.take_bind_events());
    println!("root fill: {:?}", compositor.backend().pixel(199, 99));

    if let Err(e) = compositor.set_bind(&mut scene, night, true) {
        eprintln!("bind failed: {e}");
        return;
    }
    compositor.render_frame(&mut scene);
    compositor.render_frame(&mut scene);
    println!("bind events: {:?}", compositor.take_bind_events());
    println!("root fill: {:?}", compositor.backend().pixel(199, 99));
    println!("day still bound: {:?}", scene.kind(day).map(|k| matches!(k, NodeKind::Background(b) if b.bind.is_bound)));
    println!("2D layer pixel: {:?}", compositor.backend().pixel(50, 50));
    println!("3D layer pixel: {:?}", compositor.backend().pixel(150, 50));
}
