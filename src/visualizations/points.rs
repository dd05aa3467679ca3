//! Static point list.

use std::f32::consts::PI;

use super::{LoadFuture, Visualization};
use crate::frame::FrameContext;
use crate::gpu::{GfxError, PrimitiveKind, UniformKind};
use crate::registry::ResourceRegistry;

const PROGRAM: &str = "points";

/// Phyllotaxis spiral of `count` points inside the unit disc.
fn spiral(count: usize) -> Vec<f32> {
    let golden_angle = PI * (3.0 - 5.0_f32.sqrt());
    (0..count)
        .flat_map(|i| {
            let radius = 0.9 * ((i as f32 + 0.5) / count as f32).sqrt();
            let angle = i as f32 * golden_angle;
            [radius * angle.cos(), radius * angle.sin()]
        })
        .collect()
}

pub struct Points {
    positions: Vec<f32>,
    color: [f32; 4],
    point_size: f32,
}

impl Points {
    pub fn new() -> Self {
        Self {
            positions: spiral(256),
            color: [0.0, 1.0, 0.53, 1.0],
            point_size: 6.0,
        }
    }
}

impl Default for Points {
    fn default() -> Self {
        Self::new()
    }
}

impl Visualization for Points {
    fn name(&self) -> &'static str {
        "points"
    }

    fn load<'a>(&'a mut self, registry: &'a mut ResourceRegistry) -> LoadFuture<'a> {
        Box::pin(async move {
            registry
                .create_shader(PROGRAM, "shaders/points.vert", "shaders/points.frag")
                .await?;
            registry.with_shader(PROGRAM, |program, gpu| {
                program.create_attribute(gpu, "position", 2, Some(&self.positions))?;
                program.create_uniform(gpu, "color", UniformKind::Vec4)?;
                program.create_uniform(gpu, "pointSize", UniformKind::Float)
            })
        })
    }

    fn render(
        &mut self,
        registry: &mut ResourceRegistry,
        _frame: &FrameContext,
    ) -> Result<(), GfxError> {
        let color = self.color;
        let point_size = self.point_size;
        registry.draw(PROGRAM, PrimitiveKind::Points, |ctx| {
            ctx.set_uniform("color", color)?;
            ctx.set_uniform("pointSize", point_size)?;
            ctx.draw_all();
            Ok(())
        })
    }

    fn is_animated(&self) -> bool {
        false
    }
}
