//! ShaderArt headless runner
//!
//! Runs gallery visualizations on the in-memory GPU for a number of frames
//! and prints a JSON report of what was drawn.
//!
//! # Usage
//! ```bash
//! shaderart-headless --visualization feedback-particles --frames 120 --width 640 --height 480
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;

use shaderart::gpu::{CaptureInput, HeadlessGpu, HeadlessStats, UniformValue};
use shaderart::{Gallery, GalleryConfig, GpuContext, ManualClock};

#[derive(Parser)]
#[command(version, about = "Run shader-art visualizations on a headless GPU")]
struct Args {
    /// Gallery config (JSON)
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Visualization to run (default: every one in the config)
    #[arg(long, short)]
    visualization: Option<String>,

    /// Frames per visualization
    #[arg(long, short, default_value_t = 60)]
    frames: u32,

    #[arg(long)]
    width: Option<u32>,

    #[arg(long)]
    height: Option<u32>,

    /// Directory searched for shaders before the built-in ones
    #[arg(long, short)]
    assets: Option<PathBuf>,
}

#[derive(Serialize)]
struct VisualizationReport {
    name: String,
    frames: u32,
    draw_calls: u64,
    vertices: u64,
    captured_primitives: u64,
    live_objects: usize,
    errors: Vec<String>,
}

#[derive(Serialize)]
struct Report {
    viewport: [u32; 2],
    visualizations: Vec<VisualizationReport>,
    totals: HeadlessStats,
}

/// CPU stand-in for the particle update shader: Euler step without the
/// attractor.
fn particle_kernel(input: &CaptureInput<'_>) -> Option<Vec<f32>> {
    let position = input.attributes.get("position")?;
    let velocity = input.attributes.get("velocity")?;
    let dt = match input.uniforms.get("deltaTime") {
        Some(UniformValue::Float(dt)) => *dt,
        _ => 0.0,
    };
    match input.varying {
        "nextPosition" => Some(
            position
                .iter()
                .zip(velocity)
                .map(|(p, v)| p + v * dt)
                .collect(),
        ),
        "nextVelocity" => Some(velocity.clone()),
        _ => None,
    }
}

fn headless(gallery: &mut Gallery) -> Result<&mut HeadlessGpu> {
    gallery
        .registry_mut()
        .gpu_mut()
        .backend_mut::<HeadlessGpu>()
        .context("gallery is not running on the headless GPU")
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => GalleryConfig::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => GalleryConfig::default(),
    };
    if let Some(width) = args.width {
        config.viewport[0] = width;
    }
    if let Some(height) = args.height {
        config.viewport[1] = height;
    }
    if let Some(assets) = args.assets {
        config.asset_root = Some(assets);
    }
    if let Some(name) = args.visualization {
        config.visualizations = vec![name];
    }

    let mut gpu = HeadlessGpu::new();
    gpu.set_recording(false);
    gpu.set_capture_kernel(particle_kernel);

    let clock = ManualClock::new();
    let mut gallery = Gallery::with_clock(&config, GpuContext::new(gpu), clock.clone())
        .context("failed to create gallery")?;
    log::info!(
        "running {} visualization(s) for {} frames at {}x{}",
        gallery.kinds().len(),
        args.frames,
        config.viewport[0],
        config.viewport[1]
    );

    let kinds = gallery.kinds().to_vec();
    let mut reports = Vec::with_capacity(kinds.len());
    for kind in kinds {
        pollster::block_on(gallery.show(kind.name()))
            .with_context(|| format!("failed to show {}", kind.name()))?;
        let before = headless(&mut gallery)?.stats();
        for _ in 0..args.frames {
            clock.advance(Duration::from_micros(16_667));
            gallery
                .tick()
                .with_context(|| format!("frame of {} failed", kind.name()))?;
        }
        let gpu = headless(&mut gallery)?;
        let after = gpu.stats();
        reports.push(VisualizationReport {
            name: kind.name().to_string(),
            frames: args.frames,
            draw_calls: after.draw_calls - before.draw_calls,
            vertices: after.vertices - before.vertices,
            captured_primitives: after.captured_primitives - before.captured_primitives,
            live_objects: gpu.live_objects(),
            errors: gpu.take_errors(),
        });
    }

    gallery.shutdown();
    let report = Report {
        viewport: config.viewport,
        visualizations: reports,
        totals: headless(&mut gallery)?.stats(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
