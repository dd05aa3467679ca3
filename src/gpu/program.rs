//! Linked shader programs with their attribute, uniform and index registries.

use std::collections::HashMap;

use super::backend::{
    BufferId, BufferTarget, BufferUsage, ProgramId, ShaderId, ShaderStage, UniformLocation,
};
use super::context::GpuContext;
use super::error::{GfxError, ResourceKind};
use super::uniform::{UniformKind, UniformValue};
use crate::assets::{self, AssetSource};

/// A vertex input registered on a program.
#[derive(Debug, Clone)]
pub struct AttributeSlot {
    name: String,
    location: Option<u32>,
    components: u32,
    buffer: Option<BufferId>,
    owned: bool,
    vertex_count: usize,
}

impl AttributeSlot {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// `None` when the input was optimized out of the program.
    pub fn location(&self) -> Option<u32> {
        self.location
    }

    pub fn components(&self) -> u32 {
        self.components
    }

    pub fn buffer(&self) -> Option<BufferId> {
        self.buffer
    }

    /// Whether the program allocated (and will free) the buffer.
    pub fn owns_data(&self) -> bool {
        self.owned
    }

    /// Created without data; its buffer comes from elsewhere.
    pub fn is_deferred(&self) -> bool {
        !self.owned
    }

    pub fn vertex_count(&self) -> usize {
        self.vertex_count
    }
}

#[derive(Debug, Clone, Copy)]
struct UniformSlot {
    location: Option<UniformLocation>,
    kind: UniformKind,
}

#[derive(Debug, Clone)]
struct IndexBuffer {
    name: String,
    buffer: BufferId,
    count: u32,
}

/// A linked vertex + fragment program.
///
/// A value of this type only exists once linking succeeded, so every
/// registration happens against a live program.
#[derive(Debug)]
pub struct ShaderProgram {
    label: String,
    program: Option<ProgramId>,
    stages: Option<(ShaderId, ShaderId)>,
    attributes: Vec<AttributeSlot>,
    uniforms: HashMap<String, UniformSlot>,
    index_buffers: Vec<IndexBuffer>,
}

impl ShaderProgram {
    /// Fetches both stages from `assets`, then compiles and links them.
    pub async fn load(
        gpu: &mut GpuContext,
        assets: &dyn AssetSource,
        label: &str,
        vertex_path: &str,
        fragment_path: &str,
    ) -> Result<Self, GfxError> {
        let vertex = assets::load_text(assets, vertex_path).await?;
        let fragment = assets::load_text(assets, fragment_path).await?;
        Self::from_source(gpu, label, &vertex, &fragment)
    }

    pub fn from_source(
        gpu: &mut GpuContext,
        label: &str,
        vertex: &str,
        fragment: &str,
    ) -> Result<Self, GfxError> {
        Self::compile(gpu, label, vertex, fragment, &[])
    }

    /// Compiles both stages and links them, declaring `varyings` for capture.
    pub(crate) fn compile(
        gpu: &mut GpuContext,
        label: &str,
        vertex: &str,
        fragment: &str,
        varyings: &[&str],
    ) -> Result<Self, GfxError> {
        let vs = gpu.compile_shader(ShaderStage::Vertex, vertex)?;
        let fs = match gpu.compile_shader(ShaderStage::Fragment, fragment) {
            Ok(fs) => fs,
            Err(e) => {
                gpu.delete_shader(vs);
                return Err(e);
            }
        };
        let program = match gpu.link_program(vs, fs, varyings) {
            Ok(program) => program,
            Err(e) => {
                gpu.delete_shader(vs);
                gpu.delete_shader(fs);
                return Err(e);
            }
        };
        log::debug!("linked `{label}` as {program}");
        Ok(Self {
            label: label.to_string(),
            program: Some(program),
            stages: Some((vs, fs)),
            attributes: Vec::new(),
            uniforms: HashMap::new(),
            index_buffers: Vec::new(),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Program handle, `None` once disposed.
    pub fn id(&self) -> Option<ProgramId> {
        self.program
    }

    pub fn is_disposed(&self) -> bool {
        self.program.is_none()
    }

    fn live(&self) -> Result<ProgramId, GfxError> {
        self.program
            .ok_or_else(|| GfxError::Disposed(self.label.clone()))
    }

    fn current(&self, gpu: &GpuContext) -> Result<ProgramId, GfxError> {
        let program = self.live()?;
        if gpu.bindings().program() != Some(program) {
            return Err(GfxError::NotCurrent(self.label.clone()));
        }
        Ok(program)
    }

    // ==================== Attributes ====================

    /// Registers a vertex input.
    ///
    /// With `data` a static buffer is allocated and owned by the program.
    /// Without it the attribute is deferred: its buffer is supplied later
    /// through [`bind_external_buffer`](Self::bind_external_buffer).
    pub fn create_attribute(
        &mut self,
        gpu: &mut GpuContext,
        name: &str,
        components: u32,
        data: Option<&[f32]>,
    ) -> Result<(), GfxError> {
        self.register_attribute(gpu, name, components, data.map(|d| (d, BufferUsage::StaticDraw)))
    }

    pub(crate) fn register_attribute(
        &mut self,
        gpu: &mut GpuContext,
        name: &str,
        components: u32,
        data: Option<(&[f32], BufferUsage)>,
    ) -> Result<(), GfxError> {
        let program = self.live()?;
        if self.attributes.iter().any(|a| a.name == name) {
            return Err(GfxError::duplicate(ResourceKind::Attribute, name));
        }
        if !(1..=4).contains(&components) {
            return Err(GfxError::InvalidData(format!(
                "attribute `{name}` has {components} components"
            )));
        }
        let vertex_count = match data {
            Some((data, _)) => vertex_count(name, data, components)?,
            None => 0,
        };
        let location = gpu.attribute_location(program, name);
        if location.is_none() {
            log::warn!("attribute `{name}` is not active in `{}`", self.label);
        }
        let buffer = match data {
            Some((data, usage)) => Some(gpu.create_vertex_buffer(data, usage)?),
            None => None,
        };
        self.attributes.push(AttributeSlot {
            name: name.to_string(),
            location,
            components,
            buffer,
            owned: buffer.is_some(),
            vertex_count,
        });
        Ok(())
    }

    /// Replaces the contents of an attribute's own buffer, allocating one
    /// for a deferred attribute that has no external source yet.
    pub fn update_attribute(
        &mut self,
        gpu: &mut GpuContext,
        name: &str,
        data: &[f32],
    ) -> Result<(), GfxError> {
        self.live()?;
        let slot = self
            .attributes
            .iter_mut()
            .find(|a| a.name == name)
            .ok_or_else(|| GfxError::UnknownAttribute(name.to_string()))?;
        let count = vertex_count(name, data, slot.components)?;
        match (slot.buffer, slot.owned) {
            (Some(buffer), true) => gpu.update_vertex_buffer(buffer, data),
            (None, _) => {
                slot.buffer = Some(gpu.create_vertex_buffer(data, BufferUsage::DynamicDraw)?);
                slot.owned = true;
            }
            (Some(_), false) => {
                return Err(GfxError::Binding(format!(
                    "attribute `{name}` of `{}` reads a buffer it does not own",
                    self.label
                )))
            }
        }
        slot.vertex_count = count;
        Ok(())
    }

    /// Points a deferred attribute at a buffer owned elsewhere.
    pub fn bind_external_buffer(
        &mut self,
        name: &str,
        buffer: BufferId,
        vertex_count: usize,
    ) -> Result<(), GfxError> {
        self.live()?;
        let label = &self.label;
        let slot = self
            .attributes
            .iter_mut()
            .find(|a| a.name == name)
            .ok_or_else(|| GfxError::UnknownAttribute(name.to_string()))?;
        if slot.owned {
            return Err(GfxError::Binding(format!(
                "attribute `{name}` of `{label}` owns its data"
            )));
        }
        slot.buffer = Some(buffer);
        slot.vertex_count = vertex_count;
        Ok(())
    }

    /// Unbinds every deferred attribute reading one of `buffers`. Returns
    /// how many were cleared.
    pub fn release_external_buffers(&mut self, buffers: &[BufferId]) -> usize {
        let mut cleared = 0;
        for slot in self.attributes.iter_mut().filter(|a| !a.owned) {
            if slot.buffer.is_some_and(|b| buffers.contains(&b)) {
                slot.buffer = None;
                slot.vertex_count = 0;
                cleared += 1;
            }
        }
        cleared
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeSlot> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// Registered attributes in registration order.
    pub fn attributes(&self) -> &[AttributeSlot] {
        &self.attributes
    }

    /// Vertices drawable from every bound attribute.
    pub fn vertex_count(&self) -> usize {
        self.attributes
            .iter()
            .filter(|a| a.buffer.is_some())
            .map(|a| a.vertex_count)
            .min()
            .unwrap_or(0)
    }

    // ==================== Uniforms ====================

    /// Registers a uniform. A location the driver optimized out is not an
    /// error; sets on it become no-ops.
    pub fn create_uniform(
        &mut self,
        gpu: &mut GpuContext,
        name: &str,
        kind: UniformKind,
    ) -> Result<(), GfxError> {
        let program = self.live()?;
        if self.uniforms.contains_key(name) {
            return Err(GfxError::duplicate(ResourceKind::Uniform, name));
        }
        let location = gpu.uniform_location(program, name);
        if location.is_none() {
            log::warn!("uniform `{name}` is not active in `{}`", self.label);
        }
        self.uniforms
            .insert(name.to_string(), UniformSlot { location, kind });
        Ok(())
    }

    pub fn has_uniform(&self, name: &str) -> bool {
        self.uniforms.contains_key(name)
    }

    pub fn uniform_kind(&self, name: &str) -> Option<UniformKind> {
        self.uniforms.get(name).map(|u| u.kind)
    }

    /// Checks `value` against the registered kind without uploading it.
    pub(crate) fn check_uniform(&self, name: &str, value: &UniformValue) -> Result<(), GfxError> {
        let slot = self
            .uniforms
            .get(name)
            .ok_or_else(|| GfxError::UnknownUniform(name.to_string()))?;
        if value.is_null() {
            return Err(GfxError::NullValue(name.to_string()));
        }
        if !slot.kind.accepts(value) {
            return Err(GfxError::UniformType {
                name: name.to_string(),
                expected: slot.kind,
                found: value.kind(),
            });
        }
        Ok(())
    }

    /// Uploads a value to a registered uniform of the current program.
    pub fn set_uniform(
        &self,
        gpu: &mut GpuContext,
        name: &str,
        value: impl Into<UniformValue>,
    ) -> Result<(), GfxError> {
        let value = value.into();
        self.check_uniform(name, &value)?;
        self.current(gpu)?;
        if let Some(location) = self.uniforms.get(name).and_then(|u| u.location) {
            let value = match (self.uniform_kind(name), value) {
                (Some(UniformKind::FloatArray), UniformValue::Float(v)) => {
                    UniformValue::FloatArray(vec![v])
                }
                (_, value) => value,
            };
            gpu.upload_uniform(location, &value);
        }
        Ok(())
    }

    // ==================== Index buffers ====================

    pub fn create_index_buffer(
        &mut self,
        gpu: &mut GpuContext,
        name: &str,
        indices: &[u16],
    ) -> Result<(), GfxError> {
        self.live()?;
        if self.index_buffers.iter().any(|i| i.name == name) {
            return Err(GfxError::duplicate(ResourceKind::IndexBuffer, name));
        }
        let count = u32::try_from(indices.len())
            .map_err(|_| GfxError::InvalidData(format!("index buffer `{name}` is too large")))?;
        let buffer = gpu.create_index_buffer(indices)?;
        self.index_buffers.push(IndexBuffer {
            name: name.to_string(),
            buffer,
            count,
        });
        Ok(())
    }

    /// Index count of the buffer bound by [`prepare_draw`](Self::prepare_draw).
    pub fn index_count(&self) -> Option<u32> {
        self.index_buffers.last().map(|i| i.count)
    }

    // ==================== Drawing ====================

    /// Makes this program current.
    pub fn activate(&self, gpu: &mut GpuContext) -> Result<(), GfxError> {
        let program = self.live()?;
        gpu.use_program(Some(program));
        Ok(())
    }

    /// Binds every attribute buffer in registration order and the most
    /// recently registered index buffer. Locations left enabled by other
    /// programs are disabled.
    pub fn prepare_draw(&self, gpu: &mut GpuContext) -> Result<(), GfxError> {
        self.current(gpu)?;
        let used: Vec<u32> = self
            .attributes
            .iter()
            .filter(|a| a.buffer.is_some())
            .filter_map(|a| a.location)
            .collect();
        let stale: Vec<u32> = gpu
            .bindings()
            .enabled_attributes()
            .filter(|location| !used.contains(location))
            .collect();
        for location in stale {
            gpu.disable_attribute(location);
        }
        for slot in &self.attributes {
            match (slot.location, slot.buffer) {
                (Some(location), Some(buffer)) => {
                    gpu.bind_attribute(location, buffer, slot.components)
                }
                (Some(_), None) => {
                    log::debug!("attribute `{}` of `{}` has no buffer", slot.name, self.label)
                }
                _ => {}
            }
        }
        if let Some(index) = self.index_buffers.last() {
            gpu.bind_buffer(BufferTarget::ElementArray, Some(index.buffer));
        }
        Ok(())
    }

    /// Disables every attribute location this program uses.
    pub(crate) fn disable_attributes(&self, gpu: &mut GpuContext) {
        for location in self.attributes.iter().filter_map(|a| a.location) {
            gpu.disable_attribute(location);
        }
    }

    /// Releases everything the program owns: attributes are disabled, owned
    /// buffers deleted, both stages detached and deleted, then the program.
    pub fn dispose(&mut self, gpu: &mut GpuContext) {
        let Some(program) = self.program.take() else {
            return;
        };
        self.disable_attributes(gpu);
        for slot in self.attributes.drain(..) {
            if let (true, Some(buffer)) = (slot.owned, slot.buffer) {
                gpu.delete_buffer(buffer);
            }
        }
        for index in self.index_buffers.drain(..) {
            gpu.delete_buffer(index.buffer);
        }
        if let Some((vs, fs)) = self.stages.take() {
            gpu.detach_shader(program, vs);
            gpu.delete_shader(vs);
            gpu.detach_shader(program, fs);
            gpu.delete_shader(fs);
        }
        if gpu.bindings().program() == Some(program) {
            gpu.use_program(None);
        }
        gpu.delete_program(program);
        self.uniforms.clear();
        log::debug!("disposed `{}`", self.label);
    }
}

fn vertex_count(name: &str, data: &[f32], components: u32) -> Result<usize, GfxError> {
    let components = components as usize;
    if data.len() % components != 0 {
        return Err(GfxError::InvalidData(format!(
            "attribute `{name}` has {} values, not a multiple of {components}",
            data.len()
        )));
    }
    Ok(data.len() / components)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::HeadlessGpu;

    const VS: &str = "#version 300 es
in vec3 position;
in vec4 color;
uniform mat4 mvpMatrix;
uniform float weights[4];
out vec4 vColor;
void main() {
    vColor = color * weights[0];
    gl_Position = mvpMatrix * vec4(position, 1.0);
}
";

    const FS: &str = "#version 300 es
precision mediump float;
in vec4 vColor;
out vec4 fragColor;
void main() {
    fragColor = vColor;
}
";

    fn program(gpu: &mut GpuContext) -> ShaderProgram {
        ShaderProgram::from_source(gpu, "test", VS, FS).unwrap()
    }

    #[test]
    fn test_duplicate_attribute_rejected() {
        let mut gpu = GpuContext::headless();
        let mut p = program(&mut gpu);
        p.create_attribute(&mut gpu, "position", 3, Some(&[0.0; 6]))
            .unwrap();
        assert!(matches!(
            p.create_attribute(&mut gpu, "position", 3, Some(&[0.0; 6])),
            Err(GfxError::DuplicateResource { kind: ResourceKind::Attribute, .. })
        ));
        assert_eq!(p.attribute("position").unwrap().vertex_count(), 2);
    }

    #[test]
    fn test_data_must_fill_whole_vertices() {
        let mut gpu = GpuContext::headless();
        let mut p = program(&mut gpu);
        assert!(matches!(
            p.create_attribute(&mut gpu, "position", 3, Some(&[0.0; 7])),
            Err(GfxError::InvalidData(_))
        ));
    }

    #[test]
    fn test_set_uniform_checks_kind_and_value() {
        let mut gpu = GpuContext::headless();
        let mut p = program(&mut gpu);
        p.create_uniform(&mut gpu, "mvpMatrix", UniformKind::Mat4)
            .unwrap();
        p.create_uniform(&mut gpu, "weights", UniformKind::FloatArray)
            .unwrap();
        p.activate(&mut gpu).unwrap();
        assert!(matches!(
            p.set_uniform(&mut gpu, "missing", 1.0f32),
            Err(GfxError::UnknownUniform(_))
        ));
        assert!(matches!(
            p.set_uniform(&mut gpu, "weights", Vec::<f32>::new()),
            Err(GfxError::NullValue(_))
        ));
        assert!(matches!(
            p.set_uniform(&mut gpu, "mvpMatrix", 1.0f32),
            Err(GfxError::UniformType { .. })
        ));
        p.set_uniform(&mut gpu, "mvpMatrix", glam::Mat4::IDENTITY)
            .unwrap();
        let id = p.id().unwrap();
        let headless = gpu.backend::<HeadlessGpu>().unwrap();
        assert_eq!(
            headless.uniform_value(id, "mvpMatrix"),
            Some(&UniformValue::Mat4(glam::Mat4::IDENTITY.to_cols_array()))
        );
    }

    #[test]
    fn test_optimized_out_uniform_is_silently_skipped() {
        let mut gpu = GpuContext::headless();
        let mut p = program(&mut gpu);
        p.create_uniform(&mut gpu, "unused", UniformKind::Float)
            .unwrap();
        p.activate(&mut gpu).unwrap();
        p.set_uniform(&mut gpu, "unused", 2.0f32).unwrap();
        assert!(gpu.backend::<HeadlessGpu>().unwrap().errors().is_empty());
    }

    #[test]
    fn test_prepare_draw_requires_current_program() {
        let mut gpu = GpuContext::headless();
        let mut p = program(&mut gpu);
        p.create_attribute(&mut gpu, "position", 3, Some(&[0.0; 3]))
            .unwrap();
        assert!(matches!(
            p.prepare_draw(&mut gpu),
            Err(GfxError::NotCurrent(_))
        ));
        p.activate(&mut gpu).unwrap();
        p.prepare_draw(&mut gpu).unwrap();
        let location = p.attribute("position").unwrap().location().unwrap();
        assert_eq!(
            gpu.bindings().attribute_buffer(location),
            p.attribute("position").unwrap().buffer()
        );
    }

    #[test]
    fn test_most_recent_index_buffer_is_bound() {
        let mut gpu = GpuContext::headless();
        let mut p = program(&mut gpu);
        p.create_index_buffer(&mut gpu, "first", &[0, 1, 2]).unwrap();
        p.create_index_buffer(&mut gpu, "second", &[0, 1, 2, 2, 1, 3])
            .unwrap();
        assert_eq!(p.index_count(), Some(6));
        p.activate(&mut gpu).unwrap();
        gpu.bind_buffer(BufferTarget::ElementArray, None);
        p.prepare_draw(&mut gpu).unwrap();
        assert!(gpu.bindings().element_buffer().is_some());
        assert_eq!(gpu.bindings().element_buffer(), p.index_buffers.last().map(|i| i.buffer));
    }

    #[test]
    fn test_dispose_releases_everything_once() {
        let mut gpu = GpuContext::headless();
        let mut p = program(&mut gpu);
        p.create_attribute(&mut gpu, "position", 3, Some(&[0.0; 3]))
            .unwrap();
        p.create_attribute(&mut gpu, "color", 4, None).unwrap();
        p.create_index_buffer(&mut gpu, "quad", &[0, 1, 2]).unwrap();
        p.activate(&mut gpu).unwrap();
        p.dispose(&mut gpu);
        p.dispose(&mut gpu);
        let headless = gpu.backend::<HeadlessGpu>().unwrap();
        assert_eq!(headless.live_objects(), 0);
        assert!(headless.errors().is_empty(), "{:?}", headless.errors());
        assert!(matches!(p.activate(&mut gpu), Err(GfxError::Disposed(_))));
    }
}
