//! GPU context: backend, binding state and texture-unit reservations.

use std::collections::BTreeMap;

use super::backend::{
    BufferId, BufferTarget, BufferUsage, Capabilities, FramebufferId, GpuBackend, PrimitiveKind,
    ProgramId, RenderbufferId, ShaderId, ShaderStage, TextureDesc, TextureId, UniformLocation,
    Viewport,
};
use super::error::GfxError;
use super::headless::HeadlessGpu;
use super::uniform::UniformValue;

/// Mirror of the device binding state.
///
/// Every binding call made through [`GpuContext`] updates this record, so
/// resources can check what is current and tests can assert bindings
/// without a device.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BindingContext {
    program: Option<ProgramId>,
    active_unit: u32,
    unit_textures: BTreeMap<u32, TextureId>,
    framebuffer: Option<FramebufferId>,
    viewport: Viewport,
    array_buffer: Option<BufferId>,
    element_buffer: Option<BufferId>,
    attributes: BTreeMap<u32, BufferId>,
    feedback_targets: BTreeMap<u32, BufferId>,
    rasterizer_discard: bool,
    capturing: Option<PrimitiveKind>,
}

impl BindingContext {
    pub fn program(&self) -> Option<ProgramId> {
        self.program
    }

    pub fn active_unit(&self) -> u32 {
        self.active_unit
    }

    /// Texture bound on `unit`, if any.
    pub fn texture_on(&self, unit: u32) -> Option<TextureId> {
        self.unit_textures.get(&unit).copied()
    }

    pub fn framebuffer(&self) -> Option<FramebufferId> {
        self.framebuffer
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn array_buffer(&self) -> Option<BufferId> {
        self.array_buffer
    }

    pub fn element_buffer(&self) -> Option<BufferId> {
        self.element_buffer
    }

    /// Buffer feeding an enabled attribute location.
    pub fn attribute_buffer(&self, location: u32) -> Option<BufferId> {
        self.attributes.get(&location).copied()
    }

    pub fn enabled_attributes(&self) -> impl Iterator<Item = u32> + '_ {
        self.attributes.keys().copied()
    }

    pub fn feedback_target(&self, index: u32) -> Option<BufferId> {
        self.feedback_targets.get(&index).copied()
    }

    pub fn feedback_targets(&self) -> impl Iterator<Item = (u32, BufferId)> + '_ {
        self.feedback_targets.iter().map(|(i, b)| (*i, *b))
    }

    pub fn rasterizer_discard(&self) -> bool {
        self.rasterizer_discard
    }

    pub fn capturing(&self) -> Option<PrimitiveKind> {
        self.capturing
    }
}

/// Reservation table for texture units.
#[derive(Debug, Clone, Default)]
pub struct TextureUnits {
    capacity: u32,
    owners: BTreeMap<u32, String>,
}

impl TextureUnits {
    pub fn new(capacity: u32) -> Self {
        Self {
            capacity,
            owners: BTreeMap::new(),
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn reserve(&mut self, unit: u32, owner: &str) -> Result<(), GfxError> {
        if unit >= self.capacity {
            return Err(GfxError::Capacity {
                unit,
                capacity: self.capacity,
            });
        }
        if let Some(existing) = self.owners.get(&unit) {
            return Err(GfxError::SlotCollision {
                unit,
                owner: existing.clone(),
            });
        }
        self.owners.insert(unit, owner.to_string());
        Ok(())
    }

    pub fn release(&mut self, unit: u32) {
        self.owners.remove(&unit);
    }

    pub fn owner(&self, unit: u32) -> Option<&str> {
        self.owners.get(&unit).map(String::as_str)
    }

    pub fn reserved(&self) -> usize {
        self.owners.len()
    }
}

/// Owns the backend and routes every call through the binding record.
pub struct GpuContext {
    backend: Box<dyn GpuBackend>,
    caps: Capabilities,
    bindings: BindingContext,
    units: TextureUnits,
}

impl GpuContext {
    pub fn new(backend: impl GpuBackend + 'static) -> Self {
        let caps = backend.capabilities();
        log::info!(
            "GPU context: {} texture units, float textures: {}, transform feedback: {} ({} outputs)",
            caps.max_combined_texture_units,
            caps.float_textures,
            caps.transform_feedback,
            caps.max_feedback_outputs
        );
        Self {
            backend: Box::new(backend),
            caps,
            bindings: BindingContext::default(),
            units: TextureUnits::new(caps.max_combined_texture_units),
        }
    }

    /// Context over a fresh [`HeadlessGpu`].
    pub fn headless() -> Self {
        Self::new(HeadlessGpu::new())
    }

    pub fn capabilities(&self) -> Capabilities {
        self.caps
    }

    pub fn bindings(&self) -> &BindingContext {
        &self.bindings
    }

    pub fn texture_units(&self) -> &TextureUnits {
        &self.units
    }

    /// Concrete backend, when it is a `T`.
    pub fn backend<T: 'static>(&self) -> Option<&T> {
        self.backend.as_any().downcast_ref()
    }

    pub fn backend_mut<T: 'static>(&mut self) -> Option<&mut T> {
        self.backend.as_any_mut().downcast_mut()
    }

    pub fn reserve_unit(&mut self, unit: u32, owner: &str) -> Result<(), GfxError> {
        self.units.reserve(unit, owner)?;
        log::debug!("texture unit {unit} reserved by `{owner}`");
        Ok(())
    }

    pub fn release_unit(&mut self, unit: u32) {
        self.units.release(unit);
    }

    // ==================== Programs ====================

    pub fn compile_shader(&mut self, stage: ShaderStage, source: &str) -> Result<ShaderId, GfxError> {
        self.backend
            .compile_shader(stage, source)
            .map_err(|log| GfxError::Compile { stage, log })
    }

    pub fn link_program(
        &mut self,
        vertex: ShaderId,
        fragment: ShaderId,
        varyings: &[&str],
    ) -> Result<ProgramId, GfxError> {
        self.backend
            .link_program(vertex, fragment, varyings)
            .map_err(GfxError::Link)
    }

    pub fn detach_shader(&mut self, program: ProgramId, shader: ShaderId) {
        self.backend.detach_shader(program, shader);
    }

    pub fn delete_shader(&mut self, shader: ShaderId) {
        self.backend.delete_shader(shader);
    }

    pub fn delete_program(&mut self, program: ProgramId) {
        self.backend.delete_program(program);
        if self.bindings.program == Some(program) {
            self.bindings.program = None;
        }
    }

    pub fn use_program(&mut self, program: Option<ProgramId>) {
        self.backend.use_program(program);
        self.bindings.program = program;
    }

    pub fn attribute_location(&self, program: ProgramId, name: &str) -> Option<u32> {
        self.backend.attribute_location(program, name)
    }

    pub fn uniform_location(&mut self, program: ProgramId, name: &str) -> Option<UniformLocation> {
        self.backend.uniform_location(program, name)
    }

    pub fn upload_uniform(&mut self, location: UniformLocation, value: &UniformValue) {
        self.backend.upload_uniform(location, value);
    }

    // ==================== Buffers ====================

    pub fn create_buffer(
        &mut self,
        target: BufferTarget,
        data: &[u8],
        usage: BufferUsage,
    ) -> Result<BufferId, GfxError> {
        let buffer = self
            .backend
            .create_buffer(target, data, usage)
            .map_err(GfxError::Backend)?;
        self.record_buffer_binding(target, Some(buffer));
        Ok(buffer)
    }

    pub fn create_vertex_buffer(
        &mut self,
        data: &[f32],
        usage: BufferUsage,
    ) -> Result<BufferId, GfxError> {
        self.create_buffer(BufferTarget::Array, bytemuck::cast_slice(data), usage)
    }

    pub fn create_index_buffer(&mut self, indices: &[u16]) -> Result<BufferId, GfxError> {
        self.create_buffer(
            BufferTarget::ElementArray,
            bytemuck::cast_slice(indices),
            BufferUsage::StaticDraw,
        )
    }

    pub fn update_vertex_buffer(&mut self, buffer: BufferId, data: &[f32]) {
        self.backend
            .update_buffer(buffer, BufferTarget::Array, bytemuck::cast_slice(data));
        self.bindings.array_buffer = Some(buffer);
    }

    pub fn delete_buffer(&mut self, buffer: BufferId) {
        self.backend.delete_buffer(buffer);
        let b = &mut self.bindings;
        if b.array_buffer == Some(buffer) {
            b.array_buffer = None;
        }
        if b.element_buffer == Some(buffer) {
            b.element_buffer = None;
        }
        b.feedback_targets.retain(|_, target| *target != buffer);
    }

    pub fn bind_buffer(&mut self, target: BufferTarget, buffer: Option<BufferId>) {
        self.backend.bind_buffer(target, buffer);
        self.record_buffer_binding(target, buffer);
    }

    fn record_buffer_binding(&mut self, target: BufferTarget, buffer: Option<BufferId>) {
        match target {
            BufferTarget::Array => self.bindings.array_buffer = buffer,
            BufferTarget::ElementArray => self.bindings.element_buffer = buffer,
        }
    }

    /// Binds `buffer` and feeds it to `location` as `components` floats per vertex.
    pub fn bind_attribute(&mut self, location: u32, buffer: BufferId, components: u32) {
        self.bind_buffer(BufferTarget::Array, Some(buffer));
        self.backend.enable_attribute(location);
        self.backend.attribute_pointer(location, components);
        self.bindings.attributes.insert(location, buffer);
    }

    pub fn disable_attribute(&mut self, location: u32) {
        self.backend.disable_attribute(location);
        self.bindings.attributes.remove(&location);
    }

    pub fn bind_feedback_buffer(&mut self, index: u32, buffer: Option<BufferId>) {
        self.backend.bind_feedback_buffer(index, buffer);
        match buffer {
            Some(buffer) => {
                self.bindings.feedback_targets.insert(index, buffer);
            }
            None => {
                self.bindings.feedback_targets.remove(&index);
            }
        }
    }

    // ==================== Textures ====================

    /// Creates a texture; it is left bound on the active unit.
    pub fn create_texture(
        &mut self,
        desc: &TextureDesc,
        pixels: Option<&[u8]>,
    ) -> Result<TextureId, GfxError> {
        let texture = self
            .backend
            .create_texture(desc, pixels)
            .map_err(GfxError::Backend)?;
        self.bindings
            .unit_textures
            .insert(self.bindings.active_unit, texture);
        Ok(texture)
    }

    pub fn delete_texture(&mut self, texture: TextureId) {
        self.backend.delete_texture(texture);
        self.bindings.unit_textures.retain(|_, t| *t != texture);
    }

    pub fn active_texture(&mut self, unit: u32) {
        self.backend.active_texture(unit);
        self.bindings.active_unit = unit;
    }

    /// Binds `texture` on the active unit.
    pub fn bind_texture(&mut self, texture: Option<TextureId>) {
        self.backend.bind_texture(texture);
        let unit = self.bindings.active_unit;
        match texture {
            Some(texture) => {
                self.bindings.unit_textures.insert(unit, texture);
            }
            None => {
                self.bindings.unit_textures.remove(&unit);
            }
        }
    }

    // ==================== Framebuffers ====================

    pub fn create_depth_buffer(
        &mut self,
        width: u32,
        height: u32,
    ) -> Result<RenderbufferId, GfxError> {
        self.backend
            .create_depth_buffer(width, height)
            .map_err(GfxError::Backend)
    }

    pub fn delete_depth_buffer(&mut self, renderbuffer: RenderbufferId) {
        self.backend.delete_depth_buffer(renderbuffer);
    }

    /// Creates a framebuffer; it is left bound.
    pub fn create_framebuffer(
        &mut self,
        color: TextureId,
        depth: Option<RenderbufferId>,
    ) -> Result<FramebufferId, GfxError> {
        let framebuffer = self
            .backend
            .create_framebuffer(color, depth)
            .map_err(GfxError::Backend)?;
        self.bindings.framebuffer = Some(framebuffer);
        Ok(framebuffer)
    }

    pub fn delete_framebuffer(&mut self, framebuffer: FramebufferId) {
        self.backend.delete_framebuffer(framebuffer);
        if self.bindings.framebuffer == Some(framebuffer) {
            self.bindings.framebuffer = None;
        }
    }

    /// Binds an offscreen framebuffer, or the default one for `None`.
    pub fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferId>) {
        self.backend.bind_framebuffer(framebuffer);
        self.bindings.framebuffer = framebuffer;
    }

    // ==================== Drawing ====================

    pub fn viewport(&mut self, viewport: Viewport) {
        self.backend.viewport(viewport);
        self.bindings.viewport = viewport;
    }

    pub fn clear(&mut self, color: [f32; 4], depth: bool) {
        self.backend.clear(color, depth);
    }

    pub fn set_rasterizer_discard(&mut self, enabled: bool) {
        self.backend.set_rasterizer_discard(enabled);
        self.bindings.rasterizer_discard = enabled;
    }

    /// Starts capture. The context has a single capture binding point.
    pub fn begin_feedback(&mut self, mode: PrimitiveKind, owner: &str) -> Result<(), GfxError> {
        if self.bindings.capturing.is_some() {
            return Err(GfxError::FeedbackReentrant(owner.to_string()));
        }
        self.backend.begin_feedback(mode);
        self.bindings.capturing = Some(mode);
        Ok(())
    }

    pub fn end_feedback(&mut self, owner: &str) -> Result<(), GfxError> {
        if self.bindings.capturing.take().is_none() {
            return Err(GfxError::FeedbackInactive(owner.to_string()));
        }
        self.backend.end_feedback();
        Ok(())
    }

    pub fn draw_arrays(&mut self, mode: PrimitiveKind, first: u32, count: u32) {
        self.backend.draw_arrays(mode, first, count);
    }

    pub fn draw_elements(&mut self, mode: PrimitiveKind, count: u32) {
        self.backend.draw_elements(mode, count);
    }
}
