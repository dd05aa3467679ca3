//! Transform-feedback particle field.
//!
//! Positions and velocities live in GPU buffers only: each frame the update
//! program captures the next state and the draw program reads it back
//! through the composite's feedback wiring.

use std::f32::consts::TAU;

use glam::{Mat4, Vec2};

use super::{LoadFuture, Visualization};
use crate::frame::FrameContext;
use crate::gpu::{CapturedOutput, GfxError, PrimitiveKind, UniformKind};
use crate::pipeline::CompositeDesc;
use crate::registry::ResourceRegistry;

const UPDATE: &str = "particles-update";
const DRAW: &str = "particles-draw";
const COMPOSITE: &str = "particles";

/// Particles on concentric rings, each moving tangentially.
fn initial_state(count: usize) -> (Vec<f32>, Vec<f32>) {
    let mut positions = Vec::with_capacity(count * 2);
    let mut velocities = Vec::with_capacity(count * 2);
    for i in 0..count {
        let ring = (i % 4) as f32;
        let radius = 0.25 + 0.15 * ring;
        let angle = TAU * i as f32 / count as f32;
        let (sin, cos) = angle.sin_cos();
        positions.extend([radius * cos, radius * sin]);
        velocities.extend([-sin * 0.1, cos * 0.1]);
    }
    (positions, velocities)
}

pub struct FeedbackParticles {
    count: usize,
    attractor: Vec2,
    elapsed: f32,
    delta: f32,
    color: [f32; 4],
}

impl FeedbackParticles {
    pub fn new() -> Self {
        Self {
            count: 2048,
            attractor: Vec2::ZERO,
            elapsed: 0.0,
            delta: 0.0,
            color: [0.3, 0.6, 1.0, 1.0],
        }
    }

    pub fn attractor(&self) -> Vec2 {
        self.attractor
    }

    fn mvp(&self, frame: &FrameContext) -> Mat4 {
        let aspect = frame.aspect();
        let projection = Mat4::orthographic_rh_gl(-aspect, aspect, -1.0, 1.0, -1.0, 1.0);
        projection * Mat4::from_rotation_z(self.elapsed * 0.05)
    }
}

impl Default for FeedbackParticles {
    fn default() -> Self {
        Self::new()
    }
}

impl Visualization for FeedbackParticles {
    fn name(&self) -> &'static str {
        "feedback-particles"
    }

    fn load<'a>(&'a mut self, registry: &'a mut ResourceRegistry) -> LoadFuture<'a> {
        Box::pin(async move {
            let (positions, velocities) = initial_state(self.count);
            let outputs = [
                CapturedOutput::new("nextPosition", "position"),
                CapturedOutput::new("nextVelocity", "velocity"),
            ];
            registry
                .create_feedback(
                    UPDATE,
                    "shaders/particles_update.vert",
                    "shaders/discard.frag",
                    &outputs,
                )
                .await?;
            registry.with_feedback(UPDATE, |feedback, gpu| {
                feedback.create_attribute(gpu, "position", 2, Some(&positions))?;
                feedback.create_attribute(gpu, "velocity", 2, Some(&velocities))?;
                feedback.create_uniform(gpu, "deltaTime", UniformKind::Float)?;
                feedback.create_uniform(gpu, "attractor", UniformKind::Vec2)
            })?;

            registry
                .create_shader(
                    DRAW,
                    "shaders/particles_draw.vert",
                    "shaders/particles_draw.frag",
                )
                .await?;
            registry.with_shader(DRAW, |program, gpu| {
                program.create_attribute(gpu, "position", 2, None)?;
                program.create_attribute(gpu, "velocity", 2, None)?;
                program.create_uniform(gpu, "mvpMatrix", UniformKind::Mat4)?;
                program.create_uniform(gpu, "pointSize", UniformKind::Float)?;
                program.create_uniform(gpu, "color", UniformKind::Vec4)
            })?;

            registry.create_composite(
                COMPOSITE,
                CompositeDesc::new()
                    .feedback_pass(0, UPDATE)
                    .render_pass(0, DRAW),
            )?;
            Ok(())
        })
    }

    fn dispose(&mut self, _registry: &mut ResourceRegistry) {
        self.elapsed = 0.0;
        self.delta = 0.0;
    }

    fn update(&mut self, elapsed: f32) {
        // at most 100 ms per step
        self.delta = (elapsed - self.elapsed).clamp(0.0, 0.1);
        self.elapsed = elapsed;
    }

    fn render(
        &mut self,
        registry: &mut ResourceRegistry,
        frame: &FrameContext,
    ) -> Result<(), GfxError> {
        let delta = self.delta;
        let attractor = self.attractor;
        let mvp = self.mvp(frame);
        let color = self.color;
        registry.execute_composite(
            COMPOSITE,
            PrimitiveKind::Points,
            |ctx| {
                ctx.set_uniform("deltaTime", delta)?;
                ctx.set_uniform("attractor", attractor)?;
                ctx.draw_all();
                Ok(())
            },
            |ctx| {
                ctx.set_uniform("mvpMatrix", mvp)?;
                ctx.set_uniform("pointSize", 2.0f32)?;
                ctx.set_uniform("color", color)?;
                ctx.draw_all();
                Ok(())
            },
        )
    }

    fn on_mouse_move(&mut self, x: f32, y: f32) {
        self.attractor = Vec2::new(x, y);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state_shapes() {
        let (positions, velocities) = initial_state(8);
        assert_eq!(positions.len(), 16);
        assert_eq!(velocities.len(), 16);
        // velocity is tangential
        for (p, v) in positions.chunks(2).zip(velocities.chunks(2)) {
            assert!((p[0] * v[0] + p[1] * v[1]).abs() < 1e-6);
        }
    }

    #[test]
    fn test_update_clamps_delta() {
        let mut particles = FeedbackParticles::new();
        particles.update(0.016);
        assert!((particles.delta - 0.016).abs() < 1e-6);
        particles.update(5.0);
        assert_eq!(particles.delta, 0.1);
        particles.on_mouse_move(0.5, -0.5);
        assert_eq!(particles.attractor(), Vec2::new(0.5, -0.5));
    }
}
