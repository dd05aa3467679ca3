//! Shared shaders and builders for the integration tests.

#![allow(dead_code)]

use shaderart::gpu::{CapturedOutput, HeadlessGpu, ImageData, SimulationSources};
use shaderart::{GpuContext, MemorySource, ResourceRegistry};

pub const POINT_VS: &str = "#version 300 es
in vec2 pos;
void main() {
    gl_PointSize = 4.0;
    gl_Position = vec4(pos, 0.0, 1.0);
}
";

pub const FLAT_FS: &str = "#version 300 es
precision mediump float;
out vec4 fragColor;
void main() {
    fragColor = vec4(1.0);
}
";

/// Feedback step: `nextV = v + 1`.
pub const STEP_VS: &str = "#version 300 es
in float v;
out float nextV;
void main() {
    nextV = v + 1.0;
    gl_Position = vec4(0.0, 0.0, 0.0, 1.0);
}
";

/// Draws whatever `v` holds.
pub const DRAW_V_VS: &str = "#version 300 es
in float v;
void main() {
    gl_PointSize = 2.0;
    gl_Position = vec4(v, 0.0, 0.0, 1.0);
}
";

pub const QUAD_VS: &str = "#version 300 es
in vec2 position;
void main() {
    gl_Position = vec4(position, 0.0, 1.0);
}
";

pub const SEED_FS: &str = "#version 300 es
precision highp float;
uniform vec2 resolution;
out vec4 state;
void main() {
    state = vec4(gl_FragCoord.xy / resolution, 0.0, 1.0);
}
";

pub const STEP_FS: &str = "#version 300 es
precision highp float;
uniform sampler2D stateTexture;
uniform vec2 resolution;
out vec4 state;
void main() {
    state = texture(stateTexture, gl_FragCoord.xy / resolution) * 0.99;
}
";

/// Samples a simulation texture through `dataTexture`.
pub const SAMPLE_FS: &str = "#version 300 es
precision highp float;
uniform sampler2D dataTexture;
out vec4 fragColor;
void main() {
    fragColor = texture(dataTexture, vec2(0.5));
}
";

pub fn step_outputs() -> Vec<CapturedOutput> {
    vec![CapturedOutput::new("nextV", "v")]
}

pub fn simulation_sources() -> SimulationSources {
    SimulationSources::shared_vertex(QUAD_VS, SEED_FS, STEP_FS)
}

pub fn image(width: u32, height: u32) -> ImageData {
    ImageData {
        width,
        height,
        pixels: vec![255; (width * height * 4) as usize],
    }
}

/// Registry over a headless GPU whose capture kernel computes `nextV = v + 1`.
pub fn registry() -> ResourceRegistry {
    registry_with_assets(MemorySource::new())
}

pub fn registry_with_assets(assets: MemorySource) -> ResourceRegistry {
    let mut gpu = HeadlessGpu::new();
    gpu.set_capture_kernel(|input| match input.varying {
        "nextV" => input
            .attributes
            .get("v")
            .map(|v| v.iter().map(|x| x + 1.0).collect()),
        _ => None,
    });
    ResourceRegistry::new(GpuContext::new(gpu), assets)
}

pub fn headless(registry: &ResourceRegistry) -> &HeadlessGpu {
    registry
        .gpu()
        .backend::<HeadlessGpu>()
        .expect("headless backend")
}

pub fn headless_mut(registry: &mut ResourceRegistry) -> &mut HeadlessGpu {
    registry
        .gpu_mut()
        .backend_mut::<HeadlessGpu>()
        .expect("headless backend")
}

pub fn assert_no_gpu_errors(registry: &ResourceRegistry) {
    let errors = headless(registry).errors();
    assert!(errors.is_empty(), "GPU errors: {errors:?}");
}
