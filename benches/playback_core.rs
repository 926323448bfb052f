//! Benchmarks for the per-tick playback hot paths
//!
//! Index lookups run on every loader pass and seek; schedule computation
//! runs on every rate change and recalibration.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use tapedeck::config::{PlaybackConfig, SessionConfig};
use tapedeck::events::EventBus;
use tapedeck::playback::{InstantSource, PlaybackLoop, Simulation, SimulationConfig};
use tapedeck::schedule::MotionComp;
use tapedeck_common::Direction;
use tapedeck_media::fmp4::SyntheticVideo;
use tapedeck_media::SegmentIndex;

/// Index of a synthetic clip with one-second GOPs and ten-frame fragments
fn index(frames: u64) -> SegmentIndex {
    SyntheticVideo::new(30.0, frames)
        .gop_len(30)
        .frag_len(10)
        .frame_bytes(8)
        .build()
        .map(|media| media.index)
        .unwrap()
}

fn bench_index_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("index_lookup");

    for frames in [300u64, 9_000, 108_000] {
        let index = index(frames);
        let probe = frames * 2 / 3;

        group.bench_with_input(
            BenchmarkId::new("find_segment_for_frame", frames),
            &index,
            |b, index| {
                b.iter(|| index.find_segment_for_frame(black_box(probe), Direction::Forward));
            },
        );
        group.bench_with_input(
            BenchmarkId::new("closest_preceding_keyframe", frames),
            &index,
            |b, index| {
                b.iter(|| index.closest_preceding_keyframe(black_box(probe)));
            },
        );
    }

    group.finish();
}

fn bench_compute_schedule(c: &mut Criterion) {
    let mut group = c.benchmark_group("compute_schedule");

    for monitor in [60.0, 144.0] {
        let mut mc = MotionComp::new(&PlaybackConfig {
            default_monitor_fps: monitor,
            ..PlaybackConfig::default()
        });
        group.bench_function(format!("{}hz/23.976fps", monitor), |b| {
            b.iter(|| mc.compute_schedule(black_box(23.976), black_box(1.0)));
        });
    }

    group.finish();
}

fn bench_simulated_playback(c: &mut Criterion) {
    c.bench_function("simulate/10s_30fps_60hz", |b| {
        b.iter(|| {
            let playback = PlaybackLoop::new(
                SessionConfig::new(30.0, 300),
                InstantSource::new(300),
                Arc::new(EventBus::new(16)),
            );
            let mut sim = Simulation::new(playback, SimulationConfig::default());
            sim.run(Direction::Forward)
        });
    });
}

criterion_group!(
    benches,
    bench_index_lookup,
    bench_compute_schedule,
    bench_simulated_playback
);
criterion_main!(benches);
