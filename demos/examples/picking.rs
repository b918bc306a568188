// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Picking and sensor transitions.
//!
//! Move a pointer across two buttons and print the over/out events, first with
//! the nearest sensors only, then with sensors accumulated along the path.
//!
//! Run:
//! - `cargo run -p trellis_demos --example picking`

use kurbo::{Point, Rect, Size};
use trellis_compositor::{
    Compositor, CompositorConfig, ManualClock, SensorScope, SoftRasterizer,
};
use trellis_scene::{Anchor, Color, Group, Scene, Sensor, SensorKind, Shape};

fn main() {
    env_logger::init();

    let mut scene = Scene::new();
    let root = scene.insert(None, Group::default());
    scene.set_root(Some(root));
    let toolbar = scene.insert(Some(root), Group::default());
    scene.insert(
        Some(toolbar),
        Sensor {
            kind: SensorKind::Drag,
            ..Sensor::default()
        },
    );
    for (i, url) in ["#open", "#save"].into_iter().enumerate() {
        let button = scene.insert(
            Some(toolbar),
            Anchor {
                url: url.into(),
                ..Anchor::default()
            },
        );
        let x = 10.0 + 50.0 * i as f64;
        scene.insert(
            Some(button),
            Shape {
                bounds: Rect::new(x, 10.0, x + 40.0, 30.0),
                color: Color::rgb(90, 90, 90),
                ..Shape::default()
            },
        );
    }

    let config = CompositorConfig {
        surface_size: Size::new(120.0, 40.0),
        ..CompositorConfig::default()
    };
    let mut compositor = Compositor::new(SoftRasterizer::new(120, 40), ManualClock::new(1), config);
    compositor.render_frame(&mut scene);

    for scope in [SensorScope::Nearest, SensorScope::Accumulate] {
        compositor.config_mut().sensor_scope = scope;
        println!("-- {scope:?}");
        for x in [5.0, 20.0, 55.0, 70.0, 115.0] {
            let hit = compositor.pick(&mut scene, Point::new(x, 20.0));
            println!(
                "x={x:>5}: hit {:?}, events {:?}",
                hit.map(|h| h.node),
                compositor.take_sensor_events()
            );
        }
    }
}
