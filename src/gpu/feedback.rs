//! Transform feedback programs.
//!
//! Each tracked attribute owns a pair of buffers. Every cycle one is read as
//! vertex input while the other captures the program's output, then the
//! roles swap. The buffer written last is handed to render passes without a
//! copy.

use std::collections::BTreeMap;

use super::backend::{BufferId, BufferUsage, PrimitiveKind};
use super::context::GpuContext;
use super::error::{GfxError, ResourceKind};
use super::program::ShaderProgram;
use super::uniform::{UniformKind, UniformValue};
use crate::assets::{self, AssetSource};

/// A captured shader output and the attribute it feeds on the next cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedOutput {
    pub varying: String,
    pub attribute: String,
}

impl CapturedOutput {
    pub fn new(varying: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self {
            varying: varying.into(),
            attribute: attribute.into(),
        }
    }
}

/// The two buffers of a tracked attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedbackBufferSet {
    buffers: [BufferId; 2],
    flip: usize,
    components: u32,
    vertex_count: usize,
}

impl FeedbackBufferSet {
    /// Buffer read as vertex input this cycle.
    pub fn read(&self) -> BufferId {
        self.buffers[self.flip]
    }

    /// Buffer captured into this cycle.
    pub fn write(&self) -> BufferId {
        self.buffers[self.flip ^ 1]
    }

    pub fn buffers(&self) -> [BufferId; 2] {
        self.buffers
    }

    pub fn flip_index(&self) -> usize {
        self.flip
    }

    pub fn components(&self) -> u32 {
        self.components
    }

    pub fn vertex_count(&self) -> usize {
        self.vertex_count
    }

    fn swap(&mut self) {
        self.flip ^= 1;
    }
}

/// A program whose vertex outputs are captured into ping-pong buffers.
#[derive(Debug)]
pub struct FeedbackProgram {
    program: ShaderProgram,
    outputs: Vec<CapturedOutput>,
    sets: Vec<Option<FeedbackBufferSet>>,
    active: bool,
    cycles: u64,
}

impl FeedbackProgram {
    pub async fn load(
        gpu: &mut GpuContext,
        assets: &dyn AssetSource,
        label: &str,
        vertex_path: &str,
        fragment_path: &str,
        outputs: &[CapturedOutput],
    ) -> Result<Self, GfxError> {
        let vertex = assets::load_text(assets, vertex_path).await?;
        let fragment = assets::load_text(assets, fragment_path).await?;
        Self::from_source(gpu, label, &vertex, &fragment, outputs)
    }

    pub fn from_source(
        gpu: &mut GpuContext,
        label: &str,
        vertex: &str,
        fragment: &str,
        outputs: &[CapturedOutput],
    ) -> Result<Self, GfxError> {
        let caps = gpu.capabilities();
        if !caps.transform_feedback {
            return Err(GfxError::Unsupported("transform feedback".to_string()));
        }
        if outputs.len() > caps.max_feedback_outputs as usize {
            return Err(GfxError::Unsupported(format!(
                "{} captured outputs (device limit {})",
                outputs.len(),
                caps.max_feedback_outputs
            )));
        }
        for (i, output) in outputs.iter().enumerate() {
            let repeated = outputs[..i]
                .iter()
                .any(|o| o.attribute == output.attribute || o.varying == output.varying);
            if repeated {
                return Err(GfxError::duplicate(ResourceKind::Attribute, &output.attribute));
            }
        }
        let varyings: Vec<&str> = outputs.iter().map(|o| o.varying.as_str()).collect();
        let program = ShaderProgram::compile(gpu, label, vertex, fragment, &varyings)?;
        Ok(Self {
            program,
            outputs: outputs.to_vec(),
            sets: vec![None; outputs.len()],
            active: false,
            cycles: 0,
        })
    }

    pub fn label(&self) -> &str {
        self.program.label()
    }

    pub fn program(&self) -> &ShaderProgram {
        &self.program
    }

    pub fn program_mut(&mut self) -> &mut ShaderProgram {
        &mut self.program
    }

    pub fn outputs(&self) -> &[CapturedOutput] {
        &self.outputs
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Completed capture cycles.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    fn tracked(&self, attribute: &str) -> Option<usize> {
        self.outputs.iter().position(|o| o.attribute == attribute)
    }

    pub fn tracks(&self, attribute: &str) -> bool {
        self.tracked(attribute).is_some()
    }

    pub fn buffer_set(&self, attribute: &str) -> Option<&FeedbackBufferSet> {
        self.tracked(attribute)
            .and_then(|index| self.sets[index].as_ref())
    }

    pub fn read_buffer(&self, attribute: &str) -> Option<BufferId> {
        self.buffer_set(attribute).map(FeedbackBufferSet::read)
    }

    pub fn write_buffer(&self, attribute: &str) -> Option<BufferId> {
        self.buffer_set(attribute).map(FeedbackBufferSet::write)
    }

    /// Registers an attribute.
    ///
    /// A tracked attribute gets two buffers holding the same initial data and
    /// therefore needs `data`. Untracked attributes behave as on
    /// [`ShaderProgram`].
    pub fn create_attribute(
        &mut self,
        gpu: &mut GpuContext,
        name: &str,
        components: u32,
        data: Option<&[f32]>,
    ) -> Result<(), GfxError> {
        let Some(index) = self.tracked(name) else {
            return self.program.create_attribute(gpu, name, components, data);
        };
        if self.sets[index].is_some() {
            return Err(GfxError::duplicate(ResourceKind::Attribute, name));
        }
        let data = data.ok_or_else(|| GfxError::MissingData(name.to_string()))?;
        if components == 0 || data.len() % components as usize != 0 {
            return Err(GfxError::InvalidData(format!(
                "attribute `{name}` has {} values for {components} components",
                data.len()
            )));
        }
        self.program.register_attribute(gpu, name, components, None)?;
        let first = gpu.create_vertex_buffer(data, BufferUsage::DynamicCopy)?;
        let second = match gpu.create_vertex_buffer(data, BufferUsage::DynamicCopy) {
            Ok(buffer) => buffer,
            Err(e) => {
                gpu.delete_buffer(first);
                return Err(e);
            }
        };
        let vertex_count = data.len() / components as usize;
        let set = FeedbackBufferSet {
            buffers: [first, second],
            flip: 0,
            components,
            vertex_count,
        };
        self.program
            .bind_external_buffer(name, set.read(), vertex_count)?;
        self.sets[index] = Some(set);
        log::debug!(
            "`{}` tracks `{name}` in {first} and {second}",
            self.program.label()
        );
        Ok(())
    }

    pub fn create_uniform(
        &mut self,
        gpu: &mut GpuContext,
        name: &str,
        kind: UniformKind,
    ) -> Result<(), GfxError> {
        self.program.create_uniform(gpu, name, kind)
    }

    pub fn set_uniform(
        &self,
        gpu: &mut GpuContext,
        name: &str,
        value: impl Into<UniformValue>,
    ) -> Result<(), GfxError> {
        self.program.set_uniform(gpu, name, value)
    }

    /// Starts a capture cycle.
    ///
    /// Flips every buffer set, binds each read buffer as vertex input and
    /// each write buffer as capture target in declaration order, disables
    /// rasterization and begins capture on the base mode of `primitive`.
    pub fn begin_process(
        &mut self,
        gpu: &mut GpuContext,
        primitive: PrimitiveKind,
    ) -> Result<(), GfxError> {
        if self.active || gpu.bindings().capturing().is_some() {
            return Err(GfxError::FeedbackReentrant(self.label().to_string()));
        }
        if let Some(missing) = self
            .outputs
            .iter()
            .zip(&self.sets)
            .find(|(_, set)| set.is_none())
        {
            return Err(GfxError::MissingData(missing.0.attribute.clone()));
        }
        for set in self.sets.iter_mut().flatten() {
            set.swap();
        }
        for (output, set) in self.outputs.iter().zip(&self.sets) {
            if let Some(set) = set {
                self.program
                    .bind_external_buffer(&output.attribute, set.read(), set.vertex_count)?;
            }
        }
        self.program.activate(gpu)?;
        self.program.prepare_draw(gpu)?;
        for (index, set) in self.sets.iter().flatten().enumerate() {
            gpu.bind_feedback_buffer(index as u32, Some(set.write()));
        }
        gpu.set_rasterizer_discard(true);
        gpu.begin_feedback(primitive.capture_mode(), self.program.label())?;
        self.active = true;
        Ok(())
    }

    /// Ends the capture cycle and unbinds the capture targets.
    pub fn end_process(&mut self, gpu: &mut GpuContext) -> Result<(), GfxError> {
        if !self.active {
            return Err(GfxError::FeedbackInactive(self.label().to_string()));
        }
        gpu.end_feedback(self.program.label())?;
        gpu.set_rasterizer_discard(false);
        for index in 0..self.sets.len() {
            gpu.bind_feedback_buffer(index as u32, None);
        }
        self.active = false;
        self.cycles += 1;
        Ok(())
    }

    /// Both buffers of every tracked attribute.
    pub fn tracked_buffers(&self) -> Vec<BufferId> {
        self.sets
            .iter()
            .flatten()
            .flat_map(|set| set.buffers)
            .collect()
    }

    /// Buffer written in the latest cycle, per tracked attribute.
    pub fn feedback_buffer_map(&self) -> BTreeMap<String, BufferId> {
        self.outputs
            .iter()
            .zip(&self.sets)
            .filter_map(|(output, set)| set.as_ref().map(|set| (output.attribute.clone(), set.write())))
            .collect()
    }

    /// Ends any open capture, deletes both buffers of every tracked
    /// attribute and disposes the program. Idempotent.
    pub fn dispose(&mut self, gpu: &mut GpuContext) {
        if self.active {
            let _ = gpu.end_feedback(self.program.label());
            gpu.set_rasterizer_discard(false);
            for index in 0..self.sets.len() {
                gpu.bind_feedback_buffer(index as u32, None);
            }
            self.active = false;
        }
        if self.program.is_disposed() {
            return;
        }
        self.program.disable_attributes(gpu);
        for set in self.sets.iter_mut().filter_map(Option::take) {
            for buffer in set.buffers {
                gpu.delete_buffer(buffer);
            }
        }
        self.program.dispose(gpu);
    }
}
