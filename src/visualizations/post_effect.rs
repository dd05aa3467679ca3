//! Offscreen scene with a full-screen grading pass.

use super::{LoadFuture, Visualization, QUAD};
use crate::frame::FrameContext;
use crate::gpu::{GfxError, ImageData, PrimitiveKind, UniformKind};
use crate::registry::ResourceRegistry;

const SCENE: &str = "post-scene";
const GRADE: &str = "post-grade";
const IMAGE: &str = "checker";
const TARGET: &str = "scene-target";

const IMAGE_UNIT: u32 = 0;
const TARGET_UNIT: u32 = 1;

const TEX_COORDS: [f32; 8] = [0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 1.0];

/// RGBA8 checkerboard with `cells` squares per side.
fn checkerboard(size: u32, cells: u32) -> ImageData {
    let cell = (size / cells.max(1)).max(1);
    let mut pixels = Vec::with_capacity((size * size * 4) as usize);
    for y in 0..size {
        for x in 0..size {
            let on = ((x / cell) + (y / cell)) % 2 == 0;
            let rgba = if on {
                [240, 120, 40, 255]
            } else {
                [30, 60, 140, 255]
            };
            pixels.extend(rgba);
        }
    }
    ImageData {
        width: size,
        height: size,
        pixels,
    }
}

pub struct PostEffect {
    time: f32,
    vignette: f32,
    target_size: (u32, u32),
}

impl PostEffect {
    pub fn new() -> Self {
        Self {
            time: 0.0,
            vignette: 0.8,
            target_size: (256, 256),
        }
    }

    pub fn target_size(&self) -> (u32, u32) {
        self.target_size
    }
}

impl Default for PostEffect {
    fn default() -> Self {
        Self::new()
    }
}

impl Visualization for PostEffect {
    fn name(&self) -> &'static str {
        "post-effect"
    }

    fn load<'a>(&'a mut self, registry: &'a mut ResourceRegistry) -> LoadFuture<'a> {
        Box::pin(async move {
            registry.create_texture_from_image(IMAGE, IMAGE_UNIT, &checkerboard(128, 8))?;
            let (width, height) = self.target_size;
            registry.create_render_target(TARGET, TARGET_UNIT, width, height)?;

            registry
                .create_shader(SCENE, "shaders/textured.vert", "shaders/textured.frag")
                .await?;
            registry.with_shader(SCENE, |program, gpu| {
                program.create_attribute(gpu, "position", 2, Some(&QUAD))?;
                program.create_attribute(gpu, "texCoord", 2, Some(&TEX_COORDS))?;
                program.create_uniform(gpu, "image", UniformKind::Sampler)?;
                program.create_uniform(gpu, "time", UniformKind::Float)
            })?;

            registry
                .create_shader(
                    GRADE,
                    "shaders/fullscreen.vert",
                    "shaders/grayscale_vignette.frag",
                )
                .await?;
            registry.with_shader(GRADE, |program, gpu| {
                program.create_attribute(gpu, "position", 2, Some(&QUAD))?;
                program.create_uniform(gpu, "scene", UniformKind::Sampler)?;
                program.create_uniform(gpu, "vignette", UniformKind::Float)
            })?;
            Ok(())
        })
    }

    fn dispose(&mut self, _registry: &mut ResourceRegistry) {
        self.time = 0.0;
    }

    fn update(&mut self, elapsed: f32) {
        self.time = elapsed;
    }

    fn begin_render(
        &mut self,
        registry: &mut ResourceRegistry,
        frame: &FrameContext,
    ) -> Result<(), GfxError> {
        let size = (frame.viewport_width, frame.viewport_height);
        // a minimized canvas keeps the last target
        if size.0 == 0 || size.1 == 0 {
            return Ok(());
        }
        if frame.resize_occurred || size != self.target_size {
            registry.with_render_target(TARGET, |target, gpu| target.resize(gpu, size.0, size.1))?;
            log::debug!("scene target resized to {}x{}", size.0, size.1);
            self.target_size = size;
        }
        Ok(())
    }

    fn render(
        &mut self,
        registry: &mut ResourceRegistry,
        _frame: &FrameContext,
    ) -> Result<(), GfxError> {
        let time = self.time;
        let vignette = self.vignette;

        registry.with_texture(IMAGE, |image, gpu| image.bind_for_draw(gpu, true))?;
        registry.draw_into_target(TARGET, SCENE, PrimitiveKind::TriangleStrip, |ctx| {
            ctx.set_uniform("image", IMAGE_UNIT as i32)?;
            ctx.set_uniform("time", time)?;
            ctx.draw_arrays(0, 4);
            Ok(())
        })?;

        registry.with_render_target(TARGET, |target, gpu| {
            target.texture().bind_for_draw(gpu, true)
        })?;
        registry.draw(GRADE, PrimitiveKind::TriangleStrip, |ctx| {
            ctx.set_uniform("scene", TARGET_UNIT as i32)?;
            ctx.set_uniform("vignette", vignette)?;
            ctx.draw_arrays(0, 4);
            Ok(())
        })
    }
}
