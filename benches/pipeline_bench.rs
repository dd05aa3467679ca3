//! Benchmarks for composite execution on the headless GPU.

use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use shaderart::gpu::{CapturedOutput, HeadlessGpu};
use shaderart::{
    CompositeDesc, Gallery, GalleryConfig, GfxError, GpuContext, ManualClock, MemorySource, PrimitiveKind,
    ResourceRegistry, VisualizationKind,
};

const UPDATE_VS: &str = "#version 300 es
in vec2 position;
in vec2 velocity;
out vec2 nextPosition;
out vec2 nextVelocity;
void main() {
    nextVelocity = velocity;
    nextPosition = position + velocity;
    gl_Position = vec4(nextPosition, 0.0, 1.0);
}
";

const DRAW_VS: &str = "#version 300 es
in vec2 position;
void main() {
    gl_PointSize = 1.0;
    gl_Position = vec4(position, 0.0, 1.0);
}
";

const FS: &str = "#version 300 es
precision mediump float;
out vec4 fragColor;
void main() {
    fragColor = vec4(1.0);
}
";

fn build_particles(registry: &mut ResourceRegistry, count: usize) -> Result<(), GfxError> {
    let outputs = [
        CapturedOutput::new("nextPosition", "position"),
        CapturedOutput::new("nextVelocity", "velocity"),
    ];
    let positions: Vec<f32> = (0..count * 2).map(|i| i as f32 / count as f32).collect();
    let velocities = vec![0.001; count * 2];

    registry.create_feedback_from_source("update", UPDATE_VS, FS, &outputs)?;
    registry.with_feedback("update", |feedback, gpu| {
        feedback.create_attribute(gpu, "position", 2, Some(&positions))?;
        feedback.create_attribute(gpu, "velocity", 2, Some(&velocities))
    })?;
    registry.create_shader_from_source("draw", DRAW_VS, FS)?;
    registry.with_shader("draw", |program, gpu| {
        program.create_attribute(gpu, "position", 2, None)
    })?;
    registry.create_composite(
        "particles",
        CompositeDesc::new()
            .feedback_pass(0, "update")
            .render_pass(0, "draw"),
    )?;
    Ok(())
}

fn particle_registry(count: usize) -> ResourceRegistry {
    let mut gpu = HeadlessGpu::new();
    gpu.set_recording(false);
    gpu.set_capture_kernel(|input| {
        let position = input.attributes.get("position")?;
        let velocity = input.attributes.get("velocity")?;
        match input.varying {
            "nextPosition" => Some(position.iter().zip(velocity).map(|(p, v)| p + v).collect()),
            "nextVelocity" => Some(velocity.clone()),
            _ => None,
        }
    });
    let mut registry = ResourceRegistry::new(GpuContext::new(gpu), MemorySource::new());
    if let Err(e) = build_particles(&mut registry, count) {
        panic!("failed to build benchmark pipeline: {e}");
    }
    registry
}

fn bench_feedback_composite(c: &mut Criterion) {
    let mut group = c.benchmark_group("Feedback Composite");

    for count in [256usize, 4096, 65536] {
        let mut registry = particle_registry(count);
        group.bench_with_input(BenchmarkId::new("execute", count), &count, |b, _| {
            b.iter(|| {
                let result = registry.execute_composite(
                    "particles",
                    PrimitiveKind::Points,
                    |ctx| {
                        ctx.draw_all();
                        Ok(())
                    },
                    |ctx| {
                        ctx.draw_all();
                        Ok(())
                    },
                );
                black_box(result).ok();
            });
        });
    }

    group.finish();
}

fn bench_gallery_frames(c: &mut Criterion) {
    let mut group = c.benchmark_group("Gallery Frame");

    for kind in VisualizationKind::all() {
        let clock = ManualClock::new();
        let mut gpu = HeadlessGpu::new();
        gpu.set_recording(false);
        let mut gallery = match Gallery::with_clock(
            &GalleryConfig::default(),
            GpuContext::new(gpu),
            clock.clone(),
        ) {
            Ok(gallery) => gallery,
            Err(e) => {
                eprintln!("Skipping gallery benchmarks: {}", e);
                return;
            }
        };
        if let Err(e) = pollster::block_on(gallery.show(kind.name())) {
            eprintln!("Skipping {}: {}", kind.name(), e);
            continue;
        }

        group.bench_function(kind.name(), |b| {
            b.iter(|| {
                clock.advance(Duration::from_micros(16_667));
                black_box(gallery.tick()).ok();
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_feedback_composite, bench_gallery_frames);
criterion_main!(benches);
