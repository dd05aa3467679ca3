//! Composite pipelines: feedback, simulation and render passes run in a
//! fixed order every frame, with feedback outputs rewired into render inputs.

use std::collections::BTreeSet;

use crate::gpu::{BufferId, GfxError, GpuContext, PrimitiveKind, ShaderProgram};
use crate::registry::ResourceRegistry;

/// A program scheduled at a priority; lower runs first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassRef {
    pub priority: i32,
    pub name: String,
}

/// Declares that render attribute `attribute` reads the buffer feedback
/// pass `source_pass` wrote in the same frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedbackBinding {
    pub source_pass: String,
    pub attribute: String,
}

/// Builder for a composite registered through
/// [`ResourceRegistry::create_composite`].
#[derive(Debug, Clone)]
pub struct CompositeDesc {
    feedback: Vec<PassRef>,
    simulation: Vec<PassRef>,
    render: Vec<PassRef>,
    bindings: Vec<FeedbackBinding>,
    auto_bind: bool,
}

impl Default for CompositeDesc {
    fn default() -> Self {
        Self::new()
    }
}

impl CompositeDesc {
    pub fn new() -> Self {
        Self {
            feedback: Vec::new(),
            simulation: Vec::new(),
            render: Vec::new(),
            bindings: Vec::new(),
            auto_bind: true,
        }
    }

    pub fn feedback_pass(mut self, priority: i32, name: impl Into<String>) -> Self {
        self.feedback.push(PassRef {
            priority,
            name: name.into(),
        });
        self
    }

    pub fn simulation_pass(mut self, priority: i32, name: impl Into<String>) -> Self {
        self.simulation.push(PassRef {
            priority,
            name: name.into(),
        });
        self
    }

    pub fn render_pass(mut self, priority: i32, name: impl Into<String>) -> Self {
        self.render.push(PassRef {
            priority,
            name: name.into(),
        });
        self
    }

    pub fn bind(mut self, source_pass: impl Into<String>, attribute: impl Into<String>) -> Self {
        self.bindings.push(FeedbackBinding {
            source_pass: source_pass.into(),
            attribute: attribute.into(),
        });
        self
    }

    /// Wire deferred render attributes to the feedback pass tracking the
    /// same name. On by default.
    pub fn auto_bind(mut self, enabled: bool) -> Self {
        self.auto_bind = enabled;
        self
    }
}

/// A resolved feedback-to-render connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Wiring {
    pub render_pass: String,
    pub attribute: String,
    pub source_pass: String,
}

#[derive(Debug, Clone)]
pub struct Pipeline {
    name: String,
    feedback: Vec<PassRef>,
    simulation: Vec<PassRef>,
    render: Vec<PassRef>,
    wirings: Vec<Wiring>,
}

fn sorted(mut passes: Vec<PassRef>) -> Vec<PassRef> {
    // `sort_by_key` is stable: ties keep insertion order
    passes.sort_by_key(|pass| pass.priority);
    passes
}

impl Pipeline {
    /// Validates every pass against `registry` and resolves the wirings.
    pub(crate) fn build(
        name: &str,
        desc: CompositeDesc,
        registry: &ResourceRegistry,
    ) -> Result<Self, GfxError> {
        let feedback = sorted(desc.feedback);
        let simulation = sorted(desc.simulation);
        let render = sorted(desc.render);

        for pass in &feedback {
            registry.feedback(&pass.name)?;
        }
        for pass in &simulation {
            registry.simulation(&pass.name)?;
        }
        for pass in &render {
            registry.shader(&pass.name)?;
        }

        let sources: BTreeSet<&str> = feedback.iter().map(|p| p.name.as_str()).collect();
        let mut wirings = Vec::new();

        for binding in &desc.bindings {
            if !sources.contains(binding.source_pass.as_str()) {
                return Err(GfxError::Binding(format!(
                    "`{name}` binds `{}` from `{}`, which is not one of its feedback passes",
                    binding.attribute, binding.source_pass
                )));
            }
            if !registry.feedback(&binding.source_pass)?.tracks(&binding.attribute) {
                return Err(GfxError::Binding(format!(
                    "feedback pass `{}` does not track `{}`",
                    binding.source_pass, binding.attribute
                )));
            }
            if desc
                .bindings
                .iter()
                .filter(|other| other.attribute == binding.attribute)
                .count()
                > 1
            {
                return Err(GfxError::Binding(format!(
                    "`{name}` binds `{}` more than once",
                    binding.attribute
                )));
            }
            let mut matched = false;
            for pass in &render {
                let program = registry.shader(&pass.name)?;
                let Some(slot) = program.attribute(&binding.attribute) else {
                    continue;
                };
                if slot.owns_data() {
                    return Err(GfxError::Binding(format!(
                        "attribute `{}` of `{}` owns its data and cannot read `{}`",
                        binding.attribute, pass.name, binding.source_pass
                    )));
                }
                matched = true;
                wirings.push(Wiring {
                    render_pass: pass.name.clone(),
                    attribute: binding.attribute.clone(),
                    source_pass: binding.source_pass.clone(),
                });
            }
            if !matched {
                return Err(GfxError::Binding(format!(
                    "no render pass of `{name}` declares `{}`",
                    binding.attribute
                )));
            }
        }

        for pass in &render {
            let program = registry.shader(&pass.name)?;
            for slot in program.attributes() {
                if desc.bindings.iter().any(|b| b.attribute == slot.name()) {
                    continue;
                }
                if !desc.auto_bind {
                    if slot.is_deferred() {
                        log::warn!(
                            "attribute `{}` of `{}` has no data and no binding",
                            slot.name(),
                            pass.name
                        );
                    }
                    continue;
                }
                let mut trackers = Vec::new();
                for source in &sources {
                    if registry.feedback(source)?.tracks(slot.name()) {
                        trackers.push(*source);
                    }
                }
                match trackers.as_slice() {
                    [] => {
                        if slot.is_deferred() {
                            log::warn!(
                                "attribute `{}` of `{}` has no data and no binding",
                                slot.name(),
                                pass.name
                            );
                        }
                    }
                    [_] if slot.owns_data() => {
                        return Err(GfxError::Binding(format!(
                            "attribute `{}` of `{}` owns its data but shares its name with a feedback output",
                            slot.name(),
                            pass.name
                        )));
                    }
                    [source] => wirings.push(Wiring {
                        render_pass: pass.name.clone(),
                        attribute: slot.name().to_string(),
                        source_pass: (*source).to_string(),
                    }),
                    _ => {
                        return Err(GfxError::Binding(format!(
                            "attribute `{}` of `{}` is tracked by {} feedback passes: {}",
                            slot.name(),
                            pass.name,
                            trackers.len(),
                            trackers.join(", ")
                        )));
                    }
                }
            }
        }

        log::debug!(
            "composite `{name}`: {} feedback, {} simulation, {} render passes, {} wirings",
            feedback.len(),
            simulation.len(),
            render.len(),
            wirings.len()
        );
        Ok(Self {
            name: name.to_string(),
            feedback,
            simulation,
            render,
            wirings,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn feedback_passes(&self) -> &[PassRef] {
        &self.feedback
    }

    pub fn simulation_passes(&self) -> &[PassRef] {
        &self.simulation
    }

    pub fn render_passes(&self) -> &[PassRef] {
        &self.render
    }

    pub fn wirings(&self) -> &[Wiring] {
        &self.wirings
    }

    /// Runs one frame.
    ///
    /// Every feedback pass runs (bracketed by begin/end, `feedback_cb`
    /// issues the draw), then every simulation pass, then every render pass
    /// with its wired attributes pointing at the buffers written this frame.
    /// `render_cb` sees the active units of the simulation passes in order.
    pub fn execute<F, R>(
        &self,
        registry: &mut ResourceRegistry,
        primitive: PrimitiveKind,
        mut feedback_cb: F,
        mut render_cb: R,
    ) -> Result<(), GfxError>
    where
        F: FnMut(&mut DrawContext<'_>) -> Result<(), GfxError>,
        R: FnMut(&mut DrawContext<'_>) -> Result<(), GfxError>,
    {
        for pass in &self.feedback {
            registry.with_feedback(&pass.name, |feedback, gpu| {
                feedback.begin_process(gpu, primitive)?;
                let drawn = {
                    let mut ctx = DrawContext::new(gpu, feedback.program(), &pass.name, primitive, &[]);
                    feedback_cb(&mut ctx)
                };
                let ended = feedback.end_process(gpu);
                drawn.and(ended)
            })?;
        }

        let viewport = registry.gpu().bindings().viewport();
        let mut units = Vec::with_capacity(self.simulation.len());
        let mut simulated = Ok(());
        for pass in &self.simulation {
            let step = registry.with_simulation(&pass.name, |simulation, gpu| {
                simulation.begin_process(gpu)?;
                simulation.end_process(gpu)?;
                Ok(simulation.active_unit())
            });
            match step {
                Ok(unit) => units.push(unit),
                Err(e) => {
                    simulated = Err(e);
                    break;
                }
            }
        }
        if !self.simulation.is_empty() {
            let gpu = registry.gpu_mut();
            gpu.bind_framebuffer(None);
            gpu.viewport(viewport);
        }
        simulated?;

        for pass in &self.render {
            let mut sources: Vec<(&str, BufferId, usize)> = Vec::new();
            for wiring in self.wirings.iter().filter(|w| w.render_pass == pass.name) {
                let feedback = registry.feedback(&wiring.source_pass)?;
                let set = feedback.buffer_set(&wiring.attribute).ok_or_else(|| {
                    GfxError::Binding(format!(
                        "`{}` has no buffers for `{}`",
                        wiring.source_pass, wiring.attribute
                    ))
                })?;
                sources.push((wiring.attribute.as_str(), set.write(), set.vertex_count()));
            }
            registry.with_shader(&pass.name, |program, gpu| {
                for (attribute, buffer, count) in &sources {
                    program.bind_external_buffer(attribute, *buffer, *count)?;
                }
                program.activate(gpu)?;
                program.prepare_draw(gpu)?;
                let mut ctx = DrawContext::new(gpu, program, &pass.name, primitive, &units);
                render_cb(&mut ctx)
            })?;
        }
        Ok(())
    }
}

/// What a pass callback may touch while its program is current.
pub struct DrawContext<'a> {
    gpu: &'a mut GpuContext,
    program: &'a ShaderProgram,
    pass: &'a str,
    primitive: PrimitiveKind,
    texture_units: &'a [u32],
}

impl<'a> DrawContext<'a> {
    pub(crate) fn new(
        gpu: &'a mut GpuContext,
        program: &'a ShaderProgram,
        pass: &'a str,
        primitive: PrimitiveKind,
        texture_units: &'a [u32],
    ) -> Self {
        Self {
            gpu,
            program,
            pass,
            primitive,
            texture_units,
        }
    }

    pub fn pass_name(&self) -> &str {
        self.pass
    }

    pub fn primitive(&self) -> PrimitiveKind {
        self.primitive
    }

    /// Active units of this frame's simulation passes, in pass order.
    pub fn texture_units(&self) -> &[u32] {
        self.texture_units
    }

    pub fn program(&self) -> &ShaderProgram {
        self.program
    }

    pub fn gpu(&mut self) -> &mut GpuContext {
        self.gpu
    }

    pub fn set_uniform(
        &mut self,
        name: &str,
        value: impl Into<crate::gpu::UniformValue>,
    ) -> Result<(), GfxError> {
        self.program.set_uniform(self.gpu, name, value)
    }

    pub fn vertex_count(&self) -> usize {
        self.program.vertex_count()
    }

    pub fn draw_arrays(&mut self, first: u32, count: u32) {
        self.gpu.draw_arrays(self.primitive, first, count);
    }

    /// Draws every vertex the bound attributes hold.
    pub fn draw_all(&mut self) {
        let count = self.vertex_count() as u32;
        self.draw_arrays(0, count);
    }

    /// Draws the program's most recent index buffer.
    pub fn draw_indexed(&mut self) -> Result<(), GfxError> {
        let count = self
            .program
            .index_count()
            .ok_or_else(|| GfxError::MissingIndexBuffer(self.program.label().to_string()))?;
        self.gpu.draw_elements(self.primitive, count);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sort_is_stable() {
        let passes = sorted(vec![
            PassRef {
                priority: 2,
                name: "late".into(),
            },
            PassRef {
                priority: 1,
                name: "first".into(),
            },
            PassRef {
                priority: 1,
                name: "second".into(),
            },
        ]);
        let names: Vec<&str> = passes.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["first", "second", "late"]);
    }

    #[test]
    fn test_desc_defaults_to_auto_bind() {
        let desc = CompositeDesc::new()
            .feedback_pass(0, "particles")
            .render_pass(0, "draw")
            .bind("particles", "position");
        assert!(desc.auto_bind);
        assert_eq!(desc.bindings.len(), 1);
        assert!(!desc.auto_bind(false).auto_bind);
    }
}
