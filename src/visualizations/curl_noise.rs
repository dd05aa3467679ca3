//! Curl-noise particles simulated in a float texture.

use super::{LoadFuture, Visualization};
use crate::frame::FrameContext;
use crate::gpu::{GfxError, PrimitiveKind, SimulationConfig, SimulationSources, UniformKind};
use crate::pipeline::CompositeDesc;
use crate::registry::ResourceRegistry;

const SIMULATION: &str = "curl-state";
const DRAW: &str = "curl-draw";
const COMPOSITE: &str = "curl";

/// Texel centers of a `size` x `size` state texture, one vertex each.
fn texel_coords(size: u32) -> Vec<f32> {
    let step = 1.0 / size as f32;
    (0..size)
        .flat_map(|y| (0..size).map(move |x| (x, y)))
        .flat_map(|(x, y)| [(x as f32 + 0.5) * step, (y as f32 + 0.5) * step])
        .collect()
}

pub struct CurlNoise {
    size: u32,
    point_size: f32,
}

impl CurlNoise {
    pub fn new() -> Self {
        Self {
            size: 64,
            point_size: 1.5,
        }
    }
}

impl Default for CurlNoise {
    fn default() -> Self {
        Self::new()
    }
}

impl Visualization for CurlNoise {
    fn name(&self) -> &'static str {
        "curl-noise"
    }

    fn load<'a>(&'a mut self, registry: &'a mut ResourceRegistry) -> LoadFuture<'a> {
        Box::pin(async move {
            let paths = SimulationSources::shared_vertex(
                "shaders/quad.vert",
                "shaders/curl_reset.frag",
                "shaders/curl_update.frag",
            );
            registry
                .create_simulation(
                    SIMULATION,
                    SimulationConfig::new(self.size, self.size, 0, 1),
                    &paths,
                )
                .await?;
            registry.with_simulation(SIMULATION, |simulation, gpu| {
                simulation
                    .update_program_mut()
                    .create_uniform(gpu, "time", UniformKind::Float)
            })?;

            registry
                .create_shader(DRAW, "shaders/curl_draw.vert", "shaders/curl_draw.frag")
                .await?;
            let coords = texel_coords(self.size);
            registry.with_shader(DRAW, |program, gpu| {
                program.create_attribute(gpu, "texCoord", 2, Some(&coords))?;
                program.create_uniform(gpu, "dataTexture", UniformKind::Sampler)?;
                program.create_uniform(gpu, "pointSize", UniformKind::Float)
            })?;

            registry.create_composite(
                COMPOSITE,
                CompositeDesc::new()
                    .simulation_pass(0, SIMULATION)
                    .render_pass(0, DRAW),
            )?;
            Ok(())
        })
    }

    fn begin_render(
        &mut self,
        registry: &mut ResourceRegistry,
        frame: &FrameContext,
    ) -> Result<(), GfxError> {
        registry
            .simulation_mut(SIMULATION)?
            .set_update_uniform("time", frame.elapsed_time)
    }

    fn render(
        &mut self,
        registry: &mut ResourceRegistry,
        _frame: &FrameContext,
    ) -> Result<(), GfxError> {
        let point_size = self.point_size;
        registry.execute_composite(
            COMPOSITE,
            PrimitiveKind::Points,
            |_| Ok(()),
            |ctx| {
                let unit = ctx.texture_units().first().copied().ok_or_else(|| {
                    GfxError::Binding(format!("`{}` has no state texture", ctx.pass_name()))
                })?;
                ctx.set_uniform("dataTexture", unit as i32)?;
                ctx.set_uniform("pointSize", point_size)?;
                ctx.draw_all();
                Ok(())
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_texel_coords_are_centers() {
        let coords = texel_coords(2);
        assert_eq!(coords, vec![0.25, 0.25, 0.75, 0.25, 0.25, 0.75, 0.75, 0.75]);
    }
}
