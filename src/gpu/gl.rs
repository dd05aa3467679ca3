//! OpenGL 3.3 / GLES 3.0 backend through `glow`.
//!
//! Driver objects live in per-kind tables keyed by the crate's integer
//! handles. A single vertex array object is created at startup and stays
//! bound for the lifetime of the backend.

use std::any::Any;
use std::collections::HashMap;

use glow::HasContext;

use super::backend::{
    BufferId, BufferTarget, BufferUsage, Capabilities, FramebufferId, GpuBackend, PrimitiveKind,
    ProgramId, RenderbufferId, ShaderId, ShaderStage, TextureDesc, TextureFilter, TextureFormat,
    TextureId, UniformLocation, Viewport,
};
use super::error::GfxError;
use super::uniform::UniformValue;

fn buffer_target(target: BufferTarget) -> u32 {
    match target {
        BufferTarget::Array => glow::ARRAY_BUFFER,
        BufferTarget::ElementArray => glow::ELEMENT_ARRAY_BUFFER,
    }
}

fn buffer_usage(usage: BufferUsage) -> u32 {
    match usage {
        BufferUsage::StaticDraw => glow::STATIC_DRAW,
        BufferUsage::DynamicDraw => glow::DYNAMIC_DRAW,
        BufferUsage::DynamicCopy => glow::DYNAMIC_COPY,
    }
}

fn primitive(mode: PrimitiveKind) -> u32 {
    match mode {
        PrimitiveKind::Points => glow::POINTS,
        PrimitiveKind::Lines => glow::LINES,
        PrimitiveKind::LineStrip => glow::LINE_STRIP,
        PrimitiveKind::LineLoop => glow::LINE_LOOP,
        PrimitiveKind::Triangles => glow::TRIANGLES,
        PrimitiveKind::TriangleStrip => glow::TRIANGLE_STRIP,
        PrimitiveKind::TriangleFan => glow::TRIANGLE_FAN,
    }
}

fn clamp_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

/// GPU backend driving a live `glow` context.
pub struct GlowGpu {
    gl: glow::Context,
    caps: Capabilities,
    vertex_array: glow::NativeVertexArray,
    next_id: u32,
    shaders: HashMap<ShaderId, glow::NativeShader>,
    programs: HashMap<ProgramId, glow::NativeProgram>,
    buffers: HashMap<BufferId, glow::NativeBuffer>,
    textures: HashMap<TextureId, glow::NativeTexture>,
    renderbuffers: HashMap<RenderbufferId, glow::NativeRenderbuffer>,
    framebuffers: HashMap<FramebufferId, glow::NativeFramebuffer>,
    uniforms: HashMap<UniformLocation, glow::NativeUniformLocation>,
    uniform_names: HashMap<(ProgramId, String), UniformLocation>,
}

impl GlowGpu {
    /// Wraps a current context and probes its capabilities.
    pub fn new(gl: glow::Context) -> Result<Self, GfxError> {
        let vertex_array = unsafe {
            let vao = gl.create_vertex_array().map_err(GfxError::Backend)?;
            gl.bind_vertex_array(Some(vao));
            vao
        };
        let caps = unsafe { probe_capabilities(&gl) };
        log::info!(
            "GL {:?}: {} texture units, float targets: {}, transform feedback outputs: {}",
            gl.version(),
            caps.max_combined_texture_units,
            caps.float_textures,
            caps.max_feedback_outputs
        );
        Ok(Self {
            gl,
            caps,
            vertex_array,
            next_id: 1,
            shaders: HashMap::new(),
            programs: HashMap::new(),
            buffers: HashMap::new(),
            textures: HashMap::new(),
            renderbuffers: HashMap::new(),
            framebuffers: HashMap::new(),
            uniforms: HashMap::new(),
            uniform_names: HashMap::new(),
        })
    }

    pub fn gl(&self) -> &glow::Context {
        &self.gl
    }

    fn next_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

impl Drop for GlowGpu {
    fn drop(&mut self) {
        unsafe {
            self.gl.bind_vertex_array(None);
            self.gl.delete_vertex_array(self.vertex_array);
        }
    }
}

unsafe fn probe_capabilities(gl: &glow::Context) -> Capabilities {
    let units = gl.get_parameter_i32(glow::MAX_COMBINED_TEXTURE_IMAGE_UNITS);
    let outputs = gl.get_parameter_i32(glow::MAX_TRANSFORM_FEEDBACK_SEPARATE_ATTRIBS);
    let version = gl.version();
    let extensions = gl.supported_extensions();
    let float_textures = !version.is_embedded
        || extensions.contains("EXT_color_buffer_float")
        || extensions.contains("GL_EXT_color_buffer_float");
    Capabilities {
        max_combined_texture_units: u32::try_from(units).unwrap_or(0),
        float_textures,
        transform_feedback: outputs > 0,
        max_feedback_outputs: u32::try_from(outputs).unwrap_or(0),
    }
}

impl GpuBackend for GlowGpu {
    fn capabilities(&self) -> Capabilities {
        self.caps
    }

    fn compile_shader(&mut self, stage: ShaderStage, source: &str) -> Result<ShaderId, String> {
        let kind = match stage {
            ShaderStage::Vertex => glow::VERTEX_SHADER,
            ShaderStage::Fragment => glow::FRAGMENT_SHADER,
        };
        let shader = unsafe {
            let shader = self.gl.create_shader(kind)?;
            self.gl.shader_source(shader, source);
            self.gl.compile_shader(shader);
            if !self.gl.get_shader_compile_status(shader) {
                let log = self.gl.get_shader_info_log(shader);
                self.gl.delete_shader(shader);
                return Err(log);
            }
            shader
        };
        let id = ShaderId(self.next_id());
        self.shaders.insert(id, shader);
        Ok(id)
    }

    fn link_program(
        &mut self,
        vertex: ShaderId,
        fragment: ShaderId,
        varyings: &[&str],
    ) -> Result<ProgramId, String> {
        let (Some(&vs), Some(&fs)) = (self.shaders.get(&vertex), self.shaders.get(&fragment))
        else {
            return Err("attached shader is not valid".to_string());
        };
        let program = unsafe {
            let program = self.gl.create_program()?;
            self.gl.attach_shader(program, vs);
            self.gl.attach_shader(program, fs);
            if !varyings.is_empty() {
                self.gl
                    .transform_feedback_varyings(program, varyings, glow::SEPARATE_ATTRIBS);
            }
            self.gl.link_program(program);
            if !self.gl.get_program_link_status(program) {
                let log = self.gl.get_program_info_log(program);
                self.gl.detach_shader(program, vs);
                self.gl.detach_shader(program, fs);
                self.gl.delete_program(program);
                return Err(log);
            }
            program
        };
        let id = ProgramId(self.next_id());
        self.programs.insert(id, program);
        Ok(id)
    }

    fn detach_shader(&mut self, program: ProgramId, shader: ShaderId) {
        if let (Some(&p), Some(&s)) = (self.programs.get(&program), self.shaders.get(&shader)) {
            unsafe { self.gl.detach_shader(p, s) };
        }
    }

    fn delete_shader(&mut self, shader: ShaderId) {
        if let Some(s) = self.shaders.remove(&shader) {
            unsafe { self.gl.delete_shader(s) };
        }
    }

    fn delete_program(&mut self, program: ProgramId) {
        if let Some(p) = self.programs.remove(&program) {
            unsafe { self.gl.delete_program(p) };
            self.uniform_names.retain(|(owner, _), location| {
                if *owner == program {
                    self.uniforms.remove(location);
                    false
                } else {
                    true
                }
            });
        }
    }

    fn use_program(&mut self, program: Option<ProgramId>) {
        let program = program.and_then(|p| self.programs.get(&p).copied());
        unsafe { self.gl.use_program(program) };
    }

    fn attribute_location(&self, program: ProgramId, name: &str) -> Option<u32> {
        let program = self.programs.get(&program)?;
        unsafe { self.gl.get_attrib_location(*program, name) }
    }

    fn uniform_location(&mut self, program: ProgramId, name: &str) -> Option<UniformLocation> {
        if let Some(location) = self.uniform_names.get(&(program, name.to_string())) {
            return Some(*location);
        }
        let native = self.programs.get(&program)?;
        let resolved = unsafe { self.gl.get_uniform_location(*native, name) }?;
        let location = UniformLocation(self.next_id());
        self.uniforms.insert(location, resolved);
        self.uniform_names.insert((program, name.to_string()), location);
        Some(location)
    }

    fn upload_uniform(&mut self, location: UniformLocation, value: &UniformValue) {
        let Some(native) = self.uniforms.get(&location) else {
            return;
        };
        let loc = Some(native);
        unsafe {
            match value {
                UniformValue::Float(v) => self.gl.uniform_1_f32(loc, *v),
                UniformValue::Vec2(v) => self.gl.uniform_2_f32_slice(loc, v),
                UniformValue::Vec3(v) => self.gl.uniform_3_f32_slice(loc, v),
                UniformValue::Vec4(v) => self.gl.uniform_4_f32_slice(loc, v),
                UniformValue::Int(v) => self.gl.uniform_1_i32(loc, *v),
                UniformValue::Mat3(m) => self.gl.uniform_matrix_3_f32_slice(loc, false, m),
                UniformValue::Mat4(m) => self.gl.uniform_matrix_4_f32_slice(loc, false, m),
                UniformValue::FloatArray(v) => self.gl.uniform_1_f32_slice(loc, v),
            }
        }
    }

    fn create_buffer(
        &mut self,
        target: BufferTarget,
        data: &[u8],
        usage: BufferUsage,
    ) -> Result<BufferId, String> {
        let buffer = unsafe {
            let buffer = self.gl.create_buffer()?;
            self.gl.bind_buffer(buffer_target(target), Some(buffer));
            self.gl
                .buffer_data_u8_slice(buffer_target(target), data, buffer_usage(usage));
            buffer
        };
        let id = BufferId(self.next_id());
        self.buffers.insert(id, buffer);
        Ok(id)
    }

    fn update_buffer(&mut self, buffer: BufferId, target: BufferTarget, data: &[u8]) {
        if let Some(&b) = self.buffers.get(&buffer) {
            unsafe {
                self.gl.bind_buffer(buffer_target(target), Some(b));
                self.gl
                    .buffer_data_u8_slice(buffer_target(target), data, glow::DYNAMIC_DRAW);
            }
        }
    }

    fn delete_buffer(&mut self, buffer: BufferId) {
        if let Some(b) = self.buffers.remove(&buffer) {
            unsafe { self.gl.delete_buffer(b) };
        }
    }

    fn bind_buffer(&mut self, target: BufferTarget, buffer: Option<BufferId>) {
        let buffer = buffer.and_then(|b| self.buffers.get(&b).copied());
        unsafe { self.gl.bind_buffer(buffer_target(target), buffer) };
    }

    fn bind_feedback_buffer(&mut self, index: u32, buffer: Option<BufferId>) {
        let buffer = buffer.and_then(|b| self.buffers.get(&b).copied());
        unsafe {
            self.gl
                .bind_buffer_base(glow::TRANSFORM_FEEDBACK_BUFFER, index, buffer)
        };
    }

    fn enable_attribute(&mut self, location: u32) {
        unsafe { self.gl.enable_vertex_attrib_array(location) };
    }

    fn disable_attribute(&mut self, location: u32) {
        unsafe { self.gl.disable_vertex_attrib_array(location) };
    }

    fn attribute_pointer(&mut self, location: u32, components: u32) {
        unsafe {
            self.gl.vertex_attrib_pointer_f32(
                location,
                clamp_i32(components),
                glow::FLOAT,
                false,
                0,
                0,
            )
        };
    }

    fn create_texture(
        &mut self,
        desc: &TextureDesc,
        pixels: Option<&[u8]>,
    ) -> Result<TextureId, String> {
        let (internal, ty) = match desc.format {
            TextureFormat::Rgba8 => (glow::RGBA8, glow::UNSIGNED_BYTE),
            TextureFormat::Rgba32Float => (glow::RGBA32F, glow::FLOAT),
        };
        let filter = match (desc.filter, desc.mipmaps) {
            (TextureFilter::Nearest, _) => glow::NEAREST,
            (TextureFilter::Linear, false) => glow::LINEAR,
            (TextureFilter::Linear, true) => glow::LINEAR_MIPMAP_LINEAR,
        };
        let texture = unsafe {
            let texture = self.gl.create_texture()?;
            self.gl.bind_texture(glow::TEXTURE_2D, Some(texture));
            self.gl.tex_image_2d(
                glow::TEXTURE_2D,
                0,
                internal as i32,
                clamp_i32(desc.width),
                clamp_i32(desc.height),
                0,
                glow::RGBA,
                ty,
                pixels,
            );
            self.gl
                .tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MIN_FILTER, filter as i32);
            let mag = if desc.filter == TextureFilter::Nearest {
                glow::NEAREST
            } else {
                glow::LINEAR
            };
            self.gl
                .tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MAG_FILTER, mag as i32);
            self.gl.tex_parameter_i32(
                glow::TEXTURE_2D,
                glow::TEXTURE_WRAP_S,
                glow::CLAMP_TO_EDGE as i32,
            );
            self.gl.tex_parameter_i32(
                glow::TEXTURE_2D,
                glow::TEXTURE_WRAP_T,
                glow::CLAMP_TO_EDGE as i32,
            );
            if desc.mipmaps {
                self.gl.generate_mipmap(glow::TEXTURE_2D);
            }
            texture
        };
        let id = TextureId(self.next_id());
        self.textures.insert(id, texture);
        Ok(id)
    }

    fn delete_texture(&mut self, texture: TextureId) {
        if let Some(t) = self.textures.remove(&texture) {
            unsafe { self.gl.delete_texture(t) };
        }
    }

    fn active_texture(&mut self, unit: u32) {
        unsafe { self.gl.active_texture(glow::TEXTURE0 + unit) };
    }

    fn bind_texture(&mut self, texture: Option<TextureId>) {
        let texture = texture.and_then(|t| self.textures.get(&t).copied());
        unsafe { self.gl.bind_texture(glow::TEXTURE_2D, texture) };
    }

    fn create_depth_buffer(&mut self, width: u32, height: u32) -> Result<RenderbufferId, String> {
        let renderbuffer = unsafe {
            let renderbuffer = self.gl.create_renderbuffer()?;
            self.gl
                .bind_renderbuffer(glow::RENDERBUFFER, Some(renderbuffer));
            self.gl.renderbuffer_storage(
                glow::RENDERBUFFER,
                glow::DEPTH_COMPONENT16,
                clamp_i32(width),
                clamp_i32(height),
            );
            self.gl.bind_renderbuffer(glow::RENDERBUFFER, None);
            renderbuffer
        };
        let id = RenderbufferId(self.next_id());
        self.renderbuffers.insert(id, renderbuffer);
        Ok(id)
    }

    fn delete_depth_buffer(&mut self, renderbuffer: RenderbufferId) {
        if let Some(r) = self.renderbuffers.remove(&renderbuffer) {
            unsafe { self.gl.delete_renderbuffer(r) };
        }
    }

    fn create_framebuffer(
        &mut self,
        color: TextureId,
        depth: Option<RenderbufferId>,
    ) -> Result<FramebufferId, String> {
        let Some(&texture) = self.textures.get(&color) else {
            return Err(format!("{color} is not a valid color attachment"));
        };
        let depth = match depth {
            Some(d) => match self.renderbuffers.get(&d) {
                Some(&r) => Some(r),
                None => return Err(format!("{d} is not a valid depth attachment")),
            },
            None => None,
        };
        let framebuffer = unsafe {
            let framebuffer = self.gl.create_framebuffer()?;
            self.gl
                .bind_framebuffer(glow::FRAMEBUFFER, Some(framebuffer));
            self.gl.framebuffer_texture_2d(
                glow::FRAMEBUFFER,
                glow::COLOR_ATTACHMENT0,
                glow::TEXTURE_2D,
                Some(texture),
                0,
            );
            if let Some(depth) = depth {
                self.gl.framebuffer_renderbuffer(
                    glow::FRAMEBUFFER,
                    glow::DEPTH_ATTACHMENT,
                    glow::RENDERBUFFER,
                    Some(depth),
                );
            }
            let status = self.gl.check_framebuffer_status(glow::FRAMEBUFFER);
            if status != glow::FRAMEBUFFER_COMPLETE {
                self.gl.bind_framebuffer(glow::FRAMEBUFFER, None);
                self.gl.delete_framebuffer(framebuffer);
                return Err(format!("framebuffer incomplete: 0x{status:x}"));
            }
            framebuffer
        };
        let id = FramebufferId(self.next_id());
        self.framebuffers.insert(id, framebuffer);
        Ok(id)
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferId) {
        if let Some(f) = self.framebuffers.remove(&framebuffer) {
            unsafe { self.gl.delete_framebuffer(f) };
        }
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferId>) {
        let framebuffer = framebuffer.and_then(|f| self.framebuffers.get(&f).copied());
        unsafe { self.gl.bind_framebuffer(glow::FRAMEBUFFER, framebuffer) };
    }

    fn viewport(&mut self, viewport: Viewport) {
        unsafe {
            self.gl.viewport(
                viewport.x,
                viewport.y,
                clamp_i32(viewport.width),
                clamp_i32(viewport.height),
            )
        };
    }

    fn clear(&mut self, color: [f32; 4], depth: bool) {
        unsafe {
            self.gl.clear_color(color[0], color[1], color[2], color[3]);
            let mut mask = glow::COLOR_BUFFER_BIT;
            if depth {
                self.gl.enable(glow::DEPTH_TEST);
                self.gl.depth_func(glow::LEQUAL);
                self.gl.clear_depth_f32(1.0);
                mask |= glow::DEPTH_BUFFER_BIT;
            }
            self.gl.clear(mask);
        }
    }

    fn set_rasterizer_discard(&mut self, enabled: bool) {
        unsafe {
            if enabled {
                self.gl.enable(glow::RASTERIZER_DISCARD);
            } else {
                self.gl.disable(glow::RASTERIZER_DISCARD);
            }
        }
    }

    fn begin_feedback(&mut self, mode: PrimitiveKind) {
        unsafe { self.gl.begin_transform_feedback(primitive(mode)) };
    }

    fn end_feedback(&mut self) {
        unsafe { self.gl.end_transform_feedback() };
    }

    fn draw_arrays(&mut self, mode: PrimitiveKind, first: u32, count: u32) {
        unsafe {
            self.gl
                .draw_arrays(primitive(mode), clamp_i32(first), clamp_i32(count))
        };
    }

    fn draw_elements(&mut self, mode: PrimitiveKind, count: u32) {
        unsafe {
            self.gl
                .draw_elements(primitive(mode), clamp_i32(count), glow::UNSIGNED_SHORT, 0)
        };
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
