//! In-memory GPU backend.
//!
//! Tracks every object and binding the core creates, records draw calls and
//! reports the operations a real driver would reject (double deletes, use
//! after delete, capture/input aliasing, nested capture, feedback loops).
//! Shader compilation is simulated by scanning GLSL declarations: a name is
//! active when the source references it beyond its declaration, the way a
//! driver optimizes unused inputs and uniforms away.

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::backend::{
    BufferId, BufferTarget, BufferUsage, Capabilities, FramebufferId, GpuBackend, PrimitiveKind,
    ProgramId, RenderbufferId, ShaderId, ShaderStage, TextureDesc, TextureId, UniformLocation,
    Viewport,
};
use super::uniform::UniformValue;

const QUALIFIERS: &[&str] = &[
    "flat", "smooth", "centroid", "invariant", "highp", "mediump", "lowp",
];

/// Inputs handed to a [`CaptureKernel`] for one captured output.
pub struct CaptureInput<'a> {
    /// Captured varying name.
    pub varying: &'a str,
    /// Capture binding index.
    pub index: usize,
    pub vertex_count: usize,
    /// Vertex inputs of the draw, by attribute name.
    pub attributes: &'a HashMap<String, Vec<f32>>,
    pub uniforms: &'a HashMap<String, UniformValue>,
}

/// Computes the contents of a captured output. `None` leaves the capture
/// target untouched.
pub type CaptureKernel = Box<dyn FnMut(&CaptureInput<'_>) -> Option<Vec<f32>>>;

/// One vertex input as seen by a recorded draw.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedAttribute {
    pub name: String,
    pub location: u32,
    pub buffer: BufferId,
    pub components: u32,
    pub data: Vec<f32>,
}

/// Snapshot of the device state at a draw call.
#[derive(Debug, Clone)]
pub struct DrawRecord {
    pub program: Option<ProgramId>,
    pub framebuffer: Option<FramebufferId>,
    pub viewport: Viewport,
    pub mode: PrimitiveKind,
    pub first: u32,
    pub count: u32,
    pub indexed: bool,
    pub rasterized: bool,
    pub attributes: Vec<RecordedAttribute>,
    /// Capture targets in binding order, empty outside transform feedback.
    pub captured: Vec<BufferId>,
    /// Texture sampled through each sampler uniform.
    pub samplers: BTreeMap<String, Option<TextureId>>,
    pub uniforms: HashMap<String, UniformValue>,
}

impl DrawRecord {
    pub fn attribute(&self, name: &str) -> Option<&RecordedAttribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn uniform(&self, name: &str) -> Option<&UniformValue> {
        self.uniforms.get(name)
    }
}

/// Counters accumulated across draws.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct HeadlessStats {
    pub draw_calls: u64,
    pub vertices: u64,
    pub captured_primitives: u64,
    pub clears: u64,
}

#[derive(Debug, Default, Clone)]
struct Declarations {
    inputs: Vec<String>,
    outputs: Vec<String>,
    uniforms: Vec<(String, bool)>,
}

struct ShaderObject {
    stage: ShaderStage,
    declarations: Declarations,
    deleted: bool,
}

struct ProgramObject {
    attributes: Vec<String>,
    uniforms: Vec<(String, bool)>,
    varyings: Vec<String>,
    attached: Vec<ShaderId>,
    deleted: bool,
}

struct BufferObject {
    usage: BufferUsage,
    bytes: Vec<u8>,
    captures: u64,
    deleted: bool,
}

struct TextureObject {
    desc: TextureDesc,
    pixels: Option<Vec<u8>>,
    writes: u64,
    deleted: bool,
}

struct FramebufferObject {
    color: TextureId,
    depth: Option<RenderbufferId>,
    deleted: bool,
}

#[derive(Clone, Copy)]
struct AttributePointer {
    buffer: BufferId,
    components: u32,
}

#[derive(Default)]
struct DeviceState {
    program: Option<ProgramId>,
    active_unit: u32,
    units: BTreeMap<u32, TextureId>,
    array_buffer: Option<BufferId>,
    element_buffer: Option<BufferId>,
    pointers: BTreeMap<u32, AttributePointer>,
    enabled: BTreeSet<u32>,
    feedback: BTreeMap<u32, BufferId>,
    framebuffer: Option<FramebufferId>,
    viewport: Viewport,
    discard: bool,
    capture: Option<PrimitiveKind>,
}

/// GPU backend that keeps every object in memory.
pub struct HeadlessGpu {
    caps: Capabilities,
    next_id: u32,
    shaders: HashMap<ShaderId, ShaderObject>,
    programs: HashMap<ProgramId, ProgramObject>,
    buffers: HashMap<BufferId, BufferObject>,
    textures: HashMap<TextureId, TextureObject>,
    renderbuffers: HashMap<RenderbufferId, bool>,
    framebuffers: HashMap<FramebufferId, FramebufferObject>,
    uniform_slots: HashMap<UniformLocation, (ProgramId, String)>,
    uniform_values: HashMap<UniformLocation, UniformValue>,
    state: DeviceState,
    draws: Vec<DrawRecord>,
    default_writes: u64,
    errors: Vec<String>,
    stats: HeadlessStats,
    recording: bool,
    kernel: Option<CaptureKernel>,
}

impl Default for HeadlessGpu {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessGpu {
    pub fn new() -> Self {
        Self::with_capabilities(Capabilities::default())
    }

    pub fn with_capabilities(caps: Capabilities) -> Self {
        Self {
            caps,
            next_id: 1,
            shaders: HashMap::new(),
            programs: HashMap::new(),
            buffers: HashMap::new(),
            textures: HashMap::new(),
            renderbuffers: HashMap::new(),
            framebuffers: HashMap::new(),
            uniform_slots: HashMap::new(),
            uniform_values: HashMap::new(),
            state: DeviceState::default(),
            draws: Vec::new(),
            default_writes: 0,
            errors: Vec::new(),
            stats: HeadlessStats::default(),
            recording: true,
            kernel: None,
        }
    }

    /// Installs the function computing captured outputs.
    pub fn set_capture_kernel<F>(&mut self, kernel: F)
    where
        F: FnMut(&CaptureInput<'_>) -> Option<Vec<f32>> + 'static,
    {
        self.kernel = Some(Box::new(kernel));
    }

    /// Disables draw snapshots; counters and capture still run.
    pub fn set_recording(&mut self, recording: bool) {
        self.recording = recording;
    }

    /// Invalid operations reported so far.
    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn take_errors(&mut self) -> Vec<String> {
        std::mem::take(&mut self.errors)
    }

    pub fn draws(&self) -> &[DrawRecord] {
        &self.draws
    }

    pub fn clear_draws(&mut self) {
        self.draws.clear();
    }

    pub fn stats(&self) -> HeadlessStats {
        self.stats
    }

    /// Contents of a live buffer as `f32`s.
    pub fn buffer_data(&self, buffer: BufferId) -> Option<Vec<f32>> {
        self.buffers
            .get(&buffer)
            .filter(|b| !b.deleted)
            .map(|b| bytemuck::pod_collect_to_vec::<u8, f32>(&b.bytes))
    }

    pub fn buffer_usage(&self, buffer: BufferId) -> Option<BufferUsage> {
        self.buffers.get(&buffer).map(|b| b.usage)
    }

    /// How many times a buffer has been written by capture.
    pub fn buffer_captures(&self, buffer: BufferId) -> u64 {
        self.buffers.get(&buffer).map_or(0, |b| b.captures)
    }

    pub fn is_live_buffer(&self, buffer: BufferId) -> bool {
        self.buffers.get(&buffer).is_some_and(|b| !b.deleted)
    }

    pub fn is_live_texture(&self, texture: TextureId) -> bool {
        self.textures.get(&texture).is_some_and(|t| !t.deleted)
    }

    pub fn is_live_program(&self, program: ProgramId) -> bool {
        self.programs.get(&program).is_some_and(|p| !p.deleted)
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.values().filter(|b| !b.deleted).count()
    }

    pub fn live_textures(&self) -> usize {
        self.textures.values().filter(|t| !t.deleted).count()
    }

    pub fn live_programs(&self) -> usize {
        self.programs.values().filter(|p| !p.deleted).count()
    }

    pub fn live_shaders(&self) -> usize {
        self.shaders.values().filter(|s| !s.deleted).count()
    }

    pub fn live_framebuffers(&self) -> usize {
        self.framebuffers.values().filter(|f| !f.deleted).count()
    }

    pub fn live_renderbuffers(&self) -> usize {
        self.renderbuffers.values().filter(|live| **live).count()
    }

    /// Total number of live driver objects of every kind.
    pub fn live_objects(&self) -> usize {
        self.live_buffers()
            + self.live_textures()
            + self.live_programs()
            + self.live_shaders()
            + self.live_framebuffers()
            + self.live_renderbuffers()
    }

    pub fn texture_desc(&self, texture: TextureId) -> Option<TextureDesc> {
        self.textures.get(&texture).map(|t| t.desc)
    }

    pub fn texture_pixels(&self, texture: TextureId) -> Option<&[u8]> {
        self.textures.get(&texture)?.pixels.as_deref()
    }

    /// Number of draws that rendered into a texture.
    pub fn texture_writes(&self, texture: TextureId) -> u64 {
        self.textures.get(&texture).map_or(0, |t| t.writes)
    }

    /// Number of draws that rendered into the default framebuffer.
    pub fn default_framebuffer_writes(&self) -> u64 {
        self.default_writes
    }

    pub fn framebuffer_color(&self, framebuffer: FramebufferId) -> Option<TextureId> {
        self.framebuffers.get(&framebuffer).map(|f| f.color)
    }

    pub fn program_varyings(&self, program: ProgramId) -> Option<&[String]> {
        self.programs.get(&program).map(|p| p.varyings.as_slice())
    }

    /// Last value uploaded to a uniform of `program`.
    pub fn uniform_value(&self, program: ProgramId, name: &str) -> Option<&UniformValue> {
        self.uniform_slots
            .iter()
            .find(|(_, (p, n))| *p == program && n == name)
            .and_then(|(location, _)| self.uniform_values.get(location))
    }

    pub fn is_capturing(&self) -> bool {
        self.state.capture.is_some()
    }

    fn next_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn report(&mut self, message: String) {
        log::warn!("headless gpu: {message}");
        self.errors.push(message);
    }

    fn live_shader(&mut self, shader: ShaderId, op: &str) -> bool {
        match self.shaders.get(&shader) {
            Some(s) if !s.deleted => true,
            Some(_) => {
                self.report(format!("{op}: {shader} was deleted"));
                false
            }
            None => {
                self.report(format!("{op}: unknown {shader}"));
                false
            }
        }
    }

    fn live_program(&mut self, program: ProgramId, op: &str) -> bool {
        match self.programs.get(&program) {
            Some(p) if !p.deleted => true,
            Some(_) => {
                self.report(format!("{op}: {program} was deleted"));
                false
            }
            None => {
                self.report(format!("{op}: unknown {program}"));
                false
            }
        }
    }

    fn live_buffer(&mut self, buffer: BufferId, op: &str) -> bool {
        match self.buffers.get(&buffer) {
            Some(b) if !b.deleted => true,
            Some(_) => {
                self.report(format!("{op}: {buffer} was deleted"));
                false
            }
            None => {
                self.report(format!("{op}: unknown {buffer}"));
                false
            }
        }
    }

    fn live_texture(&mut self, texture: TextureId, op: &str) -> bool {
        match self.textures.get(&texture) {
            Some(t) if !t.deleted => true,
            Some(_) => {
                self.report(format!("{op}: {texture} was deleted"));
                false
            }
            None => {
                self.report(format!("{op}: unknown {texture}"));
                false
            }
        }
    }

    /// Texture bound to the unit named by each sampler uniform of `program`.
    fn sampled_textures(&self, program: ProgramId) -> BTreeMap<String, Option<TextureId>> {
        let Some(object) = self.programs.get(&program) else {
            return BTreeMap::new();
        };
        let mut sampled = BTreeMap::new();
        for (name, is_sampler) in &object.uniforms {
            if !is_sampler {
                continue;
            }
            let unit = self
                .uniform_slots
                .iter()
                .find(|(_, (p, n))| *p == program && n == name)
                .and_then(|(location, _)| self.uniform_values.get(location));
            let texture = match unit {
                Some(UniformValue::Int(unit)) => u32::try_from(*unit)
                    .ok()
                    .and_then(|unit| self.state.units.get(&unit).copied()),
                _ => self.state.units.get(&0).copied(),
            };
            sampled.insert(name.clone(), texture);
        }
        sampled
    }

    fn program_uniforms(&self, program: ProgramId) -> HashMap<String, UniformValue> {
        self.uniform_slots
            .iter()
            .filter(|(_, (p, _))| *p == program)
            .filter_map(|(location, (_, name))| {
                self.uniform_values
                    .get(location)
                    .map(|value| (name.clone(), value.clone()))
            })
            .collect()
    }

    fn record_draw(&mut self, mode: PrimitiveKind, first: u32, count: u32, indexed: bool) {
        let Some(program) = self.state.program else {
            self.report("draw without a current program".to_string());
            return;
        };
        if !self.live_program(program, "draw") {
            return;
        }
        if indexed {
            match self.state.element_buffer {
                Some(buffer) => {
                    self.live_buffer(buffer, "draw_elements");
                }
                None => self.report("draw_elements without an element buffer".to_string()),
            }
        }

        let attribute_names = self
            .programs
            .get(&program)
            .map(|p| p.attributes.clone())
            .unwrap_or_default();
        let mut attributes = Vec::new();
        let mut inputs = HashMap::new();
        for location in self.state.enabled.clone() {
            let Some(pointer) = self.state.pointers.get(&location).copied() else {
                self.report(format!("attribute {location} enabled without a buffer"));
                continue;
            };
            if !self.live_buffer(pointer.buffer, "draw") {
                continue;
            }
            let Some(name) = attribute_names.get(location as usize) else {
                continue;
            };
            if self.recording || self.state.capture.is_some() {
                let data = self.buffer_data(pointer.buffer).unwrap_or_default();
                inputs.insert(name.clone(), data.clone());
                attributes.push(RecordedAttribute {
                    name: name.clone(),
                    location,
                    buffer: pointer.buffer,
                    components: pointer.components,
                    data,
                });
            }
        }

        let uniforms = self.program_uniforms(program);
        let samplers = self.sampled_textures(program);
        let mut captured = Vec::new();
        if let Some(capture) = self.state.capture {
            if mode.capture_mode() != capture {
                self.report(format!("draw mode {mode:?} does not match capture mode {capture:?}"));
            }
            let vertex_count = count as usize;
            let varyings = self
                .programs
                .get(&program)
                .map(|p| p.varyings.clone())
                .unwrap_or_default();
            for (index, target) in self.state.feedback.clone() {
                let aliased = self
                    .state
                    .enabled
                    .iter()
                    .filter_map(|location| self.state.pointers.get(location))
                    .any(|pointer| pointer.buffer == target);
                if aliased {
                    self.report(format!("{target} bound for both vertex input and capture"));
                    continue;
                }
                let Some(varying) = varyings.get(index as usize) else {
                    self.report(format!("capture binding {index} has no varying"));
                    continue;
                };
                let output = self.kernel.as_mut().and_then(|kernel| {
                    kernel(&CaptureInput {
                        varying,
                        index: index as usize,
                        vertex_count,
                        attributes: &inputs,
                        uniforms: &uniforms,
                    })
                });
                let mut overflow = None;
                if let Some(object) = self.buffers.get_mut(&target) {
                    if let Some(data) = output {
                        let bytes: &[u8] = bytemuck::cast_slice(&data);
                        if bytes.len() > object.bytes.len() {
                            overflow = Some((bytes.len(), object.bytes.len()));
                        }
                        let len = bytes.len().min(object.bytes.len());
                        object.bytes[..len].copy_from_slice(&bytes[..len]);
                    }
                    object.captures += 1;
                }
                if let Some((written, capacity)) = overflow {
                    self.report(format!(
                        "capture into {target} overflowed: {written} bytes into {capacity}"
                    ));
                }
                captured.push(target);
            }
            self.stats.captured_primitives += match capture {
                PrimitiveKind::Lines => u64::from(count / 2),
                PrimitiveKind::Triangles => u64::from(count / 3),
                _ => u64::from(count),
            };
        }

        let rasterized = !self.state.discard;
        if rasterized {
            match self.state.framebuffer {
                Some(framebuffer) => {
                    let color = self.framebuffers.get(&framebuffer).map(|f| f.color);
                    if let Some(color) = color {
                        if samplers.values().any(|t| *t == Some(color)) {
                            self.report(format!(
                                "feedback loop: {color} is sampled while attached to {framebuffer}"
                            ));
                        }
                        if let Some(texture) = self.textures.get_mut(&color) {
                            texture.writes += 1;
                        }
                    }
                }
                None => self.default_writes += 1,
            }
        }

        self.stats.draw_calls += 1;
        self.stats.vertices += u64::from(count);
        if self.recording {
            self.draws.push(DrawRecord {
                program: Some(program),
                framebuffer: self.state.framebuffer,
                viewport: self.state.viewport,
                mode,
                first,
                count,
                indexed,
                rasterized,
                attributes,
                captured,
                samplers,
                uniforms,
            });
        }
    }
}

fn strip_layout(line: &str) -> &str {
    if line.starts_with("layout") {
        if let Some(end) = line.find(')') {
            return line[end + 1..].trim_start();
        }
    }
    line
}

fn scan_declarations(source: &str) -> Result<Declarations, String> {
    if !source.contains("void main") {
        return Err("ERROR: 0:0: 'main' : function not defined".to_string());
    }
    let mut declarations = Declarations::default();
    for (number, raw) in source.lines().enumerate() {
        let line = raw.split("//").next().unwrap_or_default().trim();
        if line.starts_with("#error") {
            return Err(format!("ERROR: 0:{}: '{}'", number + 1, line));
        }
        if !line.ends_with(';') {
            continue;
        }
        let line = strip_layout(line);
        let tokens: Vec<&str> = line
            .split_whitespace()
            .filter(|token| !QUALIFIERS.contains(token))
            .collect();
        if tokens.len() < 3 {
            continue;
        }
        let ty = tokens[1];
        let name = tokens[tokens.len() - 1].trim_end_matches(';');
        let name = name.split('[').next().unwrap_or(name).to_string();
        match tokens[0] {
            "in" | "attribute" => declarations.inputs.push(name),
            "out" | "varying" => declarations.outputs.push(name),
            "uniform" => declarations
                .uniforms
                .push((name, ty.starts_with("sampler"))),
            _ => {}
        }
    }
    Ok(declarations)
}

fn is_ident(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Whether `name` occurs as an identifier more often than its declaration.
fn is_referenced(source: &str, name: &str) -> bool {
    source
        .match_indices(name)
        .filter(|(start, _)| {
            let before = source[..*start].chars().next_back();
            let after = source[start + name.len()..].chars().next();
            !before.is_some_and(is_ident) && !after.is_some_and(is_ident)
        })
        .count()
        > 1
}

fn shader_declarations(source: &str) -> Result<Declarations, String> {
    let mut declarations = scan_declarations(source)?;
    declarations.inputs.retain(|name| is_referenced(source, name));
    declarations
        .uniforms
        .retain(|(name, _)| is_referenced(source, name));
    Ok(declarations)
}

impl GpuBackend for HeadlessGpu {
    fn capabilities(&self) -> Capabilities {
        self.caps
    }

    fn compile_shader(&mut self, stage: ShaderStage, source: &str) -> Result<ShaderId, String> {
        let declarations = shader_declarations(source)?;
        let id = ShaderId(self.next_id());
        self.shaders.insert(
            id,
            ShaderObject {
                stage,
                declarations,
                deleted: false,
            },
        );
        Ok(id)
    }

    fn link_program(
        &mut self,
        vertex: ShaderId,
        fragment: ShaderId,
        varyings: &[&str],
    ) -> Result<ProgramId, String> {
        if !self.live_shader(vertex, "link") || !self.live_shader(fragment, "link") {
            return Err("attached shader is not valid".to_string());
        }
        let (vs, fs) = match (self.shaders.get(&vertex), self.shaders.get(&fragment)) {
            (Some(vs), Some(fs)) => (vs, fs),
            _ => return Err("attached shader is not valid".to_string()),
        };
        if vs.stage != ShaderStage::Vertex || fs.stage != ShaderStage::Fragment {
            return Err("shader stages attached in the wrong slots".to_string());
        }
        for varying in varyings {
            if !vs.declarations.outputs.iter().any(|o| o == varying) {
                return Err(format!(
                    "transform feedback varying `{varying}` is not written by the vertex shader"
                ));
            }
        }
        for input in &fs.declarations.inputs {
            if !vs.declarations.outputs.contains(input) {
                return Err(format!(
                    "fragment input `{input}` has no matching vertex output"
                ));
            }
        }
        let mut uniforms = vs.declarations.uniforms.clone();
        for uniform in &fs.declarations.uniforms {
            if !uniforms.iter().any(|(name, _)| *name == uniform.0) {
                uniforms.push(uniform.clone());
            }
        }
        let program = ProgramObject {
            attributes: vs.declarations.inputs.clone(),
            uniforms,
            varyings: varyings.iter().map(|v| v.to_string()).collect(),
            attached: vec![vertex, fragment],
            deleted: false,
        };
        let id = ProgramId(self.next_id());
        let names: Vec<String> = program.uniforms.iter().map(|(n, _)| n.clone()).collect();
        self.programs.insert(id, program);
        for name in names {
            let location = UniformLocation(self.next_id());
            self.uniform_slots.insert(location, (id, name));
        }
        Ok(id)
    }

    fn detach_shader(&mut self, program: ProgramId, shader: ShaderId) {
        if !self.live_program(program, "detach_shader") {
            return;
        }
        let attached = self
            .programs
            .get_mut(&program)
            .map(|p| {
                let before = p.attached.len();
                p.attached.retain(|s| *s != shader);
                before != p.attached.len()
            })
            .unwrap_or(false);
        if !attached {
            self.report(format!("detach_shader: {shader} is not attached to {program}"));
        }
    }

    fn delete_shader(&mut self, shader: ShaderId) {
        if self.live_shader(shader, "delete_shader") {
            if let Some(object) = self.shaders.get_mut(&shader) {
                object.deleted = true;
            }
        }
    }

    fn delete_program(&mut self, program: ProgramId) {
        if self.live_program(program, "delete_program") {
            if let Some(object) = self.programs.get_mut(&program) {
                object.deleted = true;
            }
            if self.state.program == Some(program) {
                self.state.program = None;
            }
        }
    }

    fn use_program(&mut self, program: Option<ProgramId>) {
        if let Some(program) = program {
            if !self.live_program(program, "use_program") {
                return;
            }
        }
        self.state.program = program;
    }

    fn attribute_location(&self, program: ProgramId, name: &str) -> Option<u32> {
        let object = self.programs.get(&program).filter(|p| !p.deleted)?;
        object
            .attributes
            .iter()
            .position(|a| a == name)
            .and_then(|index| u32::try_from(index).ok())
    }

    fn uniform_location(&mut self, program: ProgramId, name: &str) -> Option<UniformLocation> {
        self.uniform_slots
            .iter()
            .find(|(_, (p, n))| *p == program && n == name)
            .map(|(location, _)| *location)
    }

    fn upload_uniform(&mut self, location: UniformLocation, value: &UniformValue) {
        let Some((owner, name)) = self.uniform_slots.get(&location).cloned() else {
            self.report(format!("upload to unknown {location}"));
            return;
        };
        if self.state.program != Some(owner) {
            self.report(format!(
                "upload of `{name}` while {owner} is not the current program"
            ));
            return;
        }
        self.uniform_values.insert(location, value.clone());
    }

    fn create_buffer(
        &mut self,
        target: BufferTarget,
        data: &[u8],
        usage: BufferUsage,
    ) -> Result<BufferId, String> {
        let id = BufferId(self.next_id());
        self.buffers.insert(
            id,
            BufferObject {
                usage,
                bytes: data.to_vec(),
                captures: 0,
                deleted: false,
            },
        );
        match target {
            BufferTarget::Array => self.state.array_buffer = Some(id),
            BufferTarget::ElementArray => self.state.element_buffer = Some(id),
        }
        Ok(id)
    }

    fn update_buffer(&mut self, buffer: BufferId, target: BufferTarget, data: &[u8]) {
        if !self.live_buffer(buffer, "update_buffer") {
            return;
        }
        match target {
            BufferTarget::Array => self.state.array_buffer = Some(buffer),
            BufferTarget::ElementArray => self.state.element_buffer = Some(buffer),
        }
        if let Some(object) = self.buffers.get_mut(&buffer) {
            object.bytes = data.to_vec();
        }
    }

    fn delete_buffer(&mut self, buffer: BufferId) {
        if !self.live_buffer(buffer, "delete_buffer") {
            return;
        }
        if let Some(object) = self.buffers.get_mut(&buffer) {
            object.deleted = true;
        }
        if self.state.array_buffer == Some(buffer) {
            self.state.array_buffer = None;
        }
        if self.state.element_buffer == Some(buffer) {
            self.state.element_buffer = None;
        }
        self.state.feedback.retain(|_, b| *b != buffer);
    }

    fn bind_buffer(&mut self, target: BufferTarget, buffer: Option<BufferId>) {
        if let Some(buffer) = buffer {
            if !self.live_buffer(buffer, "bind_buffer") {
                return;
            }
        }
        match target {
            BufferTarget::Array => self.state.array_buffer = buffer,
            BufferTarget::ElementArray => self.state.element_buffer = buffer,
        }
    }

    fn bind_feedback_buffer(&mut self, index: u32, buffer: Option<BufferId>) {
        if index >= self.caps.max_feedback_outputs {
            self.report(format!("capture binding {index} exceeds the device limit"));
            return;
        }
        match buffer {
            Some(buffer) => {
                if self.live_buffer(buffer, "bind_feedback_buffer") {
                    self.state.feedback.insert(index, buffer);
                }
            }
            None => {
                self.state.feedback.remove(&index);
            }
        }
    }

    fn enable_attribute(&mut self, location: u32) {
        self.state.enabled.insert(location);
    }

    fn disable_attribute(&mut self, location: u32) {
        self.state.enabled.remove(&location);
    }

    fn attribute_pointer(&mut self, location: u32, components: u32) {
        match self.state.array_buffer {
            Some(buffer) => {
                self.state
                    .pointers
                    .insert(location, AttributePointer { buffer, components });
            }
            None => self.report(format!("attribute pointer {location} without an array buffer")),
        }
    }

    fn create_texture(
        &mut self,
        desc: &TextureDesc,
        pixels: Option<&[u8]>,
    ) -> Result<TextureId, String> {
        if desc.format == super::backend::TextureFormat::Rgba32Float && !self.caps.float_textures {
            return Err("RGBA32F textures are not renderable on this device".to_string());
        }
        let id = TextureId(self.next_id());
        self.textures.insert(
            id,
            TextureObject {
                desc: *desc,
                pixels: pixels.map(<[u8]>::to_vec),
                writes: 0,
                deleted: false,
            },
        );
        self.state.units.insert(self.state.active_unit, id);
        Ok(id)
    }

    fn delete_texture(&mut self, texture: TextureId) {
        if !self.live_texture(texture, "delete_texture") {
            return;
        }
        if let Some(object) = self.textures.get_mut(&texture) {
            object.deleted = true;
        }
        self.state.units.retain(|_, t| *t != texture);
    }

    fn active_texture(&mut self, unit: u32) {
        if unit >= self.caps.max_combined_texture_units {
            self.report(format!("texture unit {unit} exceeds the device limit"));
            return;
        }
        self.state.active_unit = unit;
    }

    fn bind_texture(&mut self, texture: Option<TextureId>) {
        match texture {
            Some(texture) => {
                if self.live_texture(texture, "bind_texture") {
                    self.state.units.insert(self.state.active_unit, texture);
                }
            }
            None => {
                self.state.units.remove(&self.state.active_unit);
            }
        }
    }

    fn create_depth_buffer(&mut self, width: u32, height: u32) -> Result<RenderbufferId, String> {
        if width == 0 || height == 0 {
            return Err(format!("invalid renderbuffer size {width}x{height}"));
        }
        let id = RenderbufferId(self.next_id());
        self.renderbuffers.insert(id, true);
        Ok(id)
    }

    fn delete_depth_buffer(&mut self, renderbuffer: RenderbufferId) {
        match self.renderbuffers.get_mut(&renderbuffer) {
            Some(live) if *live => *live = false,
            Some(_) => self.report(format!("delete_depth_buffer: {renderbuffer} was deleted")),
            None => self.report(format!("delete_depth_buffer: unknown {renderbuffer}")),
        }
    }

    fn create_framebuffer(
        &mut self,
        color: TextureId,
        depth: Option<RenderbufferId>,
    ) -> Result<FramebufferId, String> {
        if !self.live_texture(color, "create_framebuffer") {
            return Err(format!("{color} is not a valid color attachment"));
        }
        if let Some(depth) = depth {
            if self.renderbuffers.get(&depth) != Some(&true) {
                return Err(format!("{depth} is not a valid depth attachment"));
            }
        }
        let id = FramebufferId(self.next_id());
        self.framebuffers.insert(
            id,
            FramebufferObject {
                color,
                depth,
                deleted: false,
            },
        );
        self.state.framebuffer = Some(id);
        Ok(id)
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferId) {
        match self.framebuffers.get_mut(&framebuffer) {
            Some(object) if !object.deleted => {
                object.deleted = true;
                if self.state.framebuffer == Some(framebuffer) {
                    self.state.framebuffer = None;
                }
            }
            Some(_) => self.report(format!("delete_framebuffer: {framebuffer} was deleted")),
            None => self.report(format!("delete_framebuffer: unknown {framebuffer}")),
        }
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferId>) {
        if let Some(framebuffer) = framebuffer {
            let valid = self.framebuffers.get(&framebuffer).map(|f| {
                !f.deleted
                    && self.textures.get(&f.color).is_some_and(|t| !t.deleted)
                    && f.depth.map_or(true, |d| self.renderbuffers.get(&d) == Some(&true))
            });
            match valid {
                Some(true) => {}
                Some(false) => {
                    self.report(format!("bind_framebuffer: {framebuffer} is incomplete"));
                    return;
                }
                None => {
                    self.report(format!("bind_framebuffer: unknown {framebuffer}"));
                    return;
                }
            }
        }
        self.state.framebuffer = framebuffer;
    }

    fn viewport(&mut self, viewport: Viewport) {
        self.state.viewport = viewport;
    }

    fn clear(&mut self, _color: [f32; 4], _depth: bool) {
        self.stats.clears += 1;
    }

    fn set_rasterizer_discard(&mut self, enabled: bool) {
        self.state.discard = enabled;
    }

    fn begin_feedback(&mut self, mode: PrimitiveKind) {
        if self.state.capture.is_some() {
            self.report("begin_feedback while capture is already active".to_string());
            return;
        }
        if self.state.feedback.is_empty() {
            self.report("begin_feedback without capture targets".to_string());
        }
        self.state.capture = Some(mode);
    }

    fn end_feedback(&mut self) {
        if self.state.capture.take().is_none() {
            self.report("end_feedback without an active capture".to_string());
        }
    }

    fn draw_arrays(&mut self, mode: PrimitiveKind, first: u32, count: u32) {
        self.record_draw(mode, first, count, false);
    }

    fn draw_elements(&mut self, mode: PrimitiveKind, count: u32) {
        self.record_draw(mode, 0, count, true);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VS: &str = "#version 300 es
in vec3 position;
in vec3 unused;
uniform mat4 mvpMatrix;
uniform float dropped;
out vec3 vPosition;
void main() {
    vPosition = position;
    gl_Position = mvpMatrix * vec4(position, 1.0);
}
";

    const FS: &str = "#version 300 es
precision mediump float;
in vec3 vPosition;
uniform sampler2D image;
out vec4 fragColor;
void main() {
    fragColor = texture(image, vPosition.xy);
}
";

    fn link(gpu: &mut HeadlessGpu, varyings: &[&str]) -> Result<ProgramId, String> {
        let vs = gpu.compile_shader(ShaderStage::Vertex, VS)?;
        let fs = gpu.compile_shader(ShaderStage::Fragment, FS)?;
        gpu.link_program(vs, fs, varyings)
    }

    #[test]
    fn test_unreferenced_declarations_are_inactive() {
        let mut gpu = HeadlessGpu::new();
        let program = link(&mut gpu, &[]).unwrap();
        assert_eq!(gpu.attribute_location(program, "position"), Some(0));
        assert_eq!(gpu.attribute_location(program, "unused"), None);
        assert!(gpu.uniform_location(program, "mvpMatrix").is_some());
        assert!(gpu.uniform_location(program, "image").is_some());
        assert!(gpu.uniform_location(program, "dropped").is_none());
    }

    #[test]
    fn test_compile_error_without_entry_point() {
        let mut gpu = HeadlessGpu::new();
        let err = gpu
            .compile_shader(ShaderStage::Vertex, "in vec3 position;")
            .unwrap_err();
        assert!(err.contains("main"));
        let err = gpu
            .compile_shader(ShaderStage::Vertex, "#error broken\nvoid main() {}")
            .unwrap_err();
        assert!(err.contains("broken"));
    }

    #[test]
    fn test_link_rejects_unknown_varying() {
        let mut gpu = HeadlessGpu::new();
        assert!(link(&mut gpu, &["vPosition"]).is_ok());
        let err = link(&mut gpu, &["vVelocity"]).unwrap_err();
        assert!(err.contains("vVelocity"));
    }

    #[test]
    fn test_double_delete_is_reported() {
        let mut gpu = HeadlessGpu::new();
        let buffer = gpu
            .create_buffer(BufferTarget::Array, &[0; 16], BufferUsage::StaticDraw)
            .unwrap();
        gpu.delete_buffer(buffer);
        assert!(gpu.errors().is_empty());
        gpu.delete_buffer(buffer);
        assert_eq!(gpu.errors().len(), 1);
    }

    #[test]
    fn test_upload_requires_current_program() {
        let mut gpu = HeadlessGpu::new();
        let program = link(&mut gpu, &[]).unwrap();
        let location = gpu.uniform_location(program, "mvpMatrix").unwrap();
        gpu.upload_uniform(location, &UniformValue::Mat4([0.0; 16]));
        assert_eq!(gpu.errors().len(), 1);
        gpu.use_program(Some(program));
        gpu.upload_uniform(location, &UniformValue::Mat4([1.0; 16]));
        assert_eq!(gpu.errors().len(), 1);
        assert_eq!(
            gpu.uniform_value(program, "mvpMatrix"),
            Some(&UniformValue::Mat4([1.0; 16]))
        );
    }

    #[test]
    fn test_capture_aliasing_is_reported() {
        let mut gpu = HeadlessGpu::new();
        let program = link(&mut gpu, &["vPosition"]).unwrap();
        let data = [0.0f32; 9];
        let buffer = gpu
            .create_buffer(
                BufferTarget::Array,
                bytemuck::cast_slice(&data),
                BufferUsage::DynamicCopy,
            )
            .unwrap();
        gpu.use_program(Some(program));
        gpu.bind_buffer(BufferTarget::Array, Some(buffer));
        gpu.enable_attribute(0);
        gpu.attribute_pointer(0, 3);
        gpu.bind_feedback_buffer(0, Some(buffer));
        gpu.begin_feedback(PrimitiveKind::Points);
        gpu.draw_arrays(PrimitiveKind::Points, 0, 3);
        gpu.end_feedback();
        assert!(gpu.errors().iter().any(|e| e.contains("both vertex input and capture")));
    }

    #[test]
    fn test_nested_capture_is_reported() {
        let mut gpu = HeadlessGpu::new();
        let buffer = gpu
            .create_buffer(BufferTarget::Array, &[0; 12], BufferUsage::DynamicCopy)
            .unwrap();
        gpu.bind_feedback_buffer(0, Some(buffer));
        gpu.begin_feedback(PrimitiveKind::Points);
        gpu.begin_feedback(PrimitiveKind::Points);
        assert_eq!(gpu.errors().len(), 1);
        gpu.end_feedback();
        gpu.end_feedback();
        assert_eq!(gpu.errors().len(), 2);
    }

    #[test]
    fn test_kernel_writes_capture_target() {
        let mut gpu = HeadlessGpu::new();
        gpu.set_capture_kernel(|input| {
            let position = input.attributes.get("position")?;
            Some(position.iter().map(|v| v + 1.0).collect())
        });
        let program = link(&mut gpu, &["vPosition"]).unwrap();
        let input = gpu
            .create_buffer(
                BufferTarget::Array,
                bytemuck::cast_slice(&[1.0f32, 2.0, 3.0]),
                BufferUsage::DynamicCopy,
            )
            .unwrap();
        let output = gpu
            .create_buffer(
                BufferTarget::Array,
                bytemuck::cast_slice(&[0.0f32; 3]),
                BufferUsage::DynamicCopy,
            )
            .unwrap();
        gpu.use_program(Some(program));
        gpu.bind_buffer(BufferTarget::Array, Some(input));
        gpu.enable_attribute(0);
        gpu.attribute_pointer(0, 3);
        gpu.bind_feedback_buffer(0, Some(output));
        gpu.set_rasterizer_discard(true);
        gpu.begin_feedback(PrimitiveKind::Points);
        gpu.draw_arrays(PrimitiveKind::Points, 0, 1);
        gpu.end_feedback();
        assert!(gpu.errors().is_empty(), "{:?}", gpu.errors());
        assert_eq!(gpu.buffer_data(output), Some(vec![2.0, 3.0, 4.0]));
        assert_eq!(gpu.buffer_captures(output), 1);
        assert_eq!(gpu.stats().captured_primitives, 1);
    }
}
