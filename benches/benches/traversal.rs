// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use criterion::{BatchSize, Criterion, Throughput, black_box, criterion_group, criterion_main};
use kurbo::{Affine, Point, Rect, Size};
use trellis_compositor::{Compositor, CompositorConfig, ManualClock, SoftRasterizer};
use trellis_scene::{Color, Group, NodeId, NodeKind, Scene, Sensor, Shape, Transform2d};

const SURFACE: u32 = 512;

/// `n` x `n` tiles, each a group of four small shapes; every tile carries a sensor.
fn gen_tiles(n: usize) -> (Scene, Vec<NodeId>) {
    let mut scene = Scene::new();
    let root = scene.insert(None, Group::default());
    scene.set_root(Some(root));
    let cell = f64::from(SURFACE) / n as f64;
    let mut leaves = Vec::with_capacity(n * n * 4);
    for y in 0..n {
        for x in 0..n {
            let tile = scene.insert(
                Some(root),
                Transform2d {
                    transform: Affine::translate((x as f64 * cell, y as f64 * cell)),
                    ..Transform2d::default()
                },
            );
            scene.insert(Some(tile), Sensor::default());
            let half = cell / 2.0;
            for (i, (dx, dy)) in [(0.0, 0.0), (half, 0.0), (0.0, half), (half, half)]
                .into_iter()
                .enumerate()
            {
                let shade = u8::try_from((x + y + i) % 256).unwrap_or(0);
                leaves.push(scene.insert(
                    Some(tile),
                    Shape {
                        bounds: Rect::new(dx, dy, dx + half, dy + half),
                        segments: 8,
                        color: Color::rgb(shade, 128, 255 - shade),
                    },
                ));
            }
        }
    }
    (scene, leaves)
}

fn compositor(cache: bool) -> Compositor<SoftRasterizer, ManualClock> {
    let mut config = CompositorConfig {
        surface_size: Size::new(f64::from(SURFACE), f64::from(SURFACE)),
        ..CompositorConfig::default()
    };
    config.cache.enabled = cache;
    Compositor::new(SoftRasterizer::new(SURFACE, SURFACE), ManualClock::new(1), config)
}

fn bench_frames(c: &mut Criterion) {
    let mut group = c.benchmark_group("render_frame");
    for &n in &[8_usize, 16, 32] {
        group.throughput(Throughput::Elements((n * n * 4) as u64));
        for cache in [false, true] {
            let label = if cache { "cached" } else { "direct" };
            group.bench_function(format!("{label}_static_n{n}"), |b| {
                let (mut scene, _) = gen_tiles(n);
                let mut comp = compositor(cache);
                // Let cachable tiles settle.
                for _ in 0..4 {
                    comp.render_frame(&mut scene);
                }
                b.iter(|| black_box(comp.render_frame(&mut scene)));
            });
        }
        group.bench_function(format!("one_leaf_changes_n{n}"), |b| {
            let (mut scene, leaves) = gen_tiles(n);
            let mut comp = compositor(true);
            for _ in 0..4 {
                comp.render_frame(&mut scene);
            }
            let mut i = 0_usize;
            b.iter(|| {
                let leaf = leaves[i % leaves.len()];
                if let Some(NodeKind::Shape(s)) = scene.kind_mut(leaf) {
                    s.color = Color::rgb(0, u8::try_from(i % 256).unwrap_or(0), 0);
                }
                i += 1;
                black_box(comp.render_frame(&mut scene))
            });
        });
    }
    group.finish();
}

fn bench_bounds(c: &mut Criterion) {
    let mut group = c.benchmark_group("bounds");
    for &n in &[16_usize, 64] {
        group.throughput(Throughput::Elements((n * n * 4) as u64));
        group.bench_function(format!("cold_n{n}"), |b| {
            b.iter_batched(
                || (gen_tiles(n).0, compositor(false)),
                |(mut scene, mut comp)| {
                    let root = scene.root();
                    black_box(root.map(|r| comp.compute_bounds(&mut scene, r)))
                },
                BatchSize::SmallInput,
            );
        });
        group.bench_function(format!("warm_n{n}"), |b| {
            let (mut scene, _) = gen_tiles(n);
            let mut comp = compositor(false);
            let root = scene.root();
            b.iter(|| black_box(root.map(|r| comp.compute_bounds(&mut scene, r))));
        });
    }
    group.finish();
}

fn bench_pick(c: &mut Criterion) {
    let mut group = c.benchmark_group("pick");
    for &n in &[16_usize, 64] {
        group.bench_function(format!("sweep_n{n}"), |b| {
            let (mut scene, _) = gen_tiles(n);
            let mut comp = compositor(false);
            comp.render_frame(&mut scene);
            let mut x = 0.0;
            b.iter(|| {
                x = (x + 7.0) % f64::from(SURFACE);
                black_box(comp.pick(&mut scene, Point::new(x, x * 0.5)));
                comp.take_sensor_events().len()
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_frames, bench_bounds, bench_pick);
criterion_main!(benches);
