//! Named GPU resources and their lifecycles.
//!
//! A name is reserved as [`ResourceState::Loading`] before the first
//! suspension point of a create call, so a second request for the same name
//! fails fast instead of racing the first one.

use std::collections::BTreeMap;

use crate::assets::AssetSource;
use crate::gpu::{
    CapturedOutput, FeedbackProgram, GfxError, GpuContext, ImageData, PrimitiveKind,
    RenderTarget, ResourceKind, ShaderProgram, SimulationConfig, SimulationSources,
    SimulationTextureProgram, TextureResource,
};
use crate::pipeline::{CompositeDesc, DrawContext, Pipeline};

/// Observable lifecycle of a named resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceState {
    Unloaded,
    Loading,
    Ready,
    Failed,
    Disposed,
}

impl ResourceState {
    pub fn name(&self) -> &'static str {
        match self {
            ResourceState::Unloaded => "unloaded",
            ResourceState::Loading => "loading",
            ResourceState::Ready => "ready",
            ResourceState::Failed => "failed",
            ResourceState::Disposed => "disposed",
        }
    }
}

#[derive(Debug)]
enum Lifecycle<T> {
    Loading,
    Ready(T),
    Failed(String),
    Disposed,
}

impl<T> Lifecycle<T> {
    fn state(&self) -> ResourceState {
        match self {
            Lifecycle::Loading => ResourceState::Loading,
            Lifecycle::Ready(_) => ResourceState::Ready,
            Lifecycle::Failed(_) => ResourceState::Failed,
            Lifecycle::Disposed => ResourceState::Disposed,
        }
    }
}

/// Resources the registry can release.
trait Release {
    fn release(&mut self, gpu: &mut GpuContext);
}

impl Release for ShaderProgram {
    fn release(&mut self, gpu: &mut GpuContext) {
        self.dispose(gpu);
    }
}

impl Release for FeedbackProgram {
    fn release(&mut self, gpu: &mut GpuContext) {
        self.dispose(gpu);
    }
}

impl Release for SimulationTextureProgram {
    fn release(&mut self, gpu: &mut GpuContext) {
        self.dispose(gpu);
    }
}

impl Release for TextureResource {
    fn release(&mut self, gpu: &mut GpuContext) {
        self.dispose(gpu);
    }
}

impl Release for RenderTarget {
    fn release(&mut self, gpu: &mut GpuContext) {
        self.dispose(gpu);
    }
}

// Composites only reference other resources by name.
impl Release for Pipeline {
    fn release(&mut self, _gpu: &mut GpuContext) {}
}

fn not_ready(kind: ResourceKind, name: &str, state: ResourceState) -> GfxError {
    GfxError::NotReady {
        kind,
        name: name.to_string(),
        state: state.name(),
    }
}

#[derive(Debug)]
struct Slots<T> {
    kind: ResourceKind,
    entries: BTreeMap<String, Lifecycle<T>>,
}

impl<T: Release> Slots<T> {
    fn new(kind: ResourceKind) -> Self {
        Self {
            kind,
            entries: BTreeMap::new(),
        }
    }

    fn reserve(&mut self, name: &str) -> Result<(), GfxError> {
        match self.entries.get(name) {
            Some(Lifecycle::Loading | Lifecycle::Ready(_)) => {
                Err(GfxError::duplicate(self.kind, name))
            }
            _ => {
                self.entries.insert(name.to_string(), Lifecycle::Loading);
                Ok(())
            }
        }
    }

    /// Records the outcome of a create call.
    fn settle(&mut self, name: &str, result: Result<T, GfxError>) -> Result<&mut T, GfxError> {
        match result {
            Ok(value) => {
                self.entries
                    .insert(name.to_string(), Lifecycle::Ready(value));
                log::debug!("{} `{name}` ready", self.kind);
                self.get_mut(name)
            }
            Err(e) => {
                log::error!("failed to create {} `{name}`: {e}", self.kind);
                self.entries
                    .insert(name.to_string(), Lifecycle::Failed(e.to_string()));
                Err(e)
            }
        }
    }

    fn state(&self, name: &str) -> ResourceState {
        self.entries
            .get(name)
            .map_or(ResourceState::Unloaded, Lifecycle::state)
    }

    fn get(&self, name: &str) -> Result<&T, GfxError> {
        match self.entries.get(name) {
            Some(Lifecycle::Ready(value)) => Ok(value),
            Some(other) => Err(not_ready(self.kind, name, other.state())),
            None => Err(GfxError::unknown(self.kind, name)),
        }
    }

    fn get_mut(&mut self, name: &str) -> Result<&mut T, GfxError> {
        let kind = self.kind;
        match self.entries.get_mut(name) {
            Some(Lifecycle::Ready(value)) => Ok(value),
            Some(other) => Err(not_ready(kind, name, other.state())),
            None => Err(GfxError::unknown(kind, name)),
        }
    }

    fn failure(&self, name: &str) -> Option<&str> {
        match self.entries.get(name) {
            Some(Lifecycle::Failed(message)) => Some(message),
            _ => None,
        }
    }

    fn ready_mut(&mut self) -> impl Iterator<Item = (&str, &mut T)> {
        self.entries.iter_mut().filter_map(|(name, entry)| match entry {
            Lifecycle::Ready(value) => Some((name.as_str(), value)),
            _ => None,
        })
    }

    fn names(&self) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .filter(|(_, entry)| matches!(entry, Lifecycle::Ready(_)))
            .map(|(name, _)| name.as_str())
    }

    /// Releases one resource and marks its name disposed.
    fn dispose_one(&mut self, name: &str, gpu: &mut GpuContext) -> Result<(), GfxError> {
        let kind = self.kind;
        match self.entries.get_mut(name) {
            None => Err(GfxError::unknown(kind, name)),
            Some(Lifecycle::Loading) => Err(not_ready(kind, name, ResourceState::Loading)),
            Some(entry) => {
                if let Lifecycle::Ready(mut value) = std::mem::replace(entry, Lifecycle::Disposed) {
                    value.release(gpu);
                    log::debug!("{kind} `{name}` disposed");
                }
                Ok(())
            }
        }
    }

    /// Releases every resource and forgets every name.
    fn dispose_all(&mut self, gpu: &mut GpuContext) {
        for (name, entry) in std::mem::take(&mut self.entries) {
            if let Lifecycle::Ready(mut value) = entry {
                value.release(gpu);
                log::debug!("{} `{name}` disposed", self.kind);
            }
        }
    }
}

/// Owns the GPU context, the asset source and every named resource.
pub struct ResourceRegistry {
    gpu: GpuContext,
    assets: Box<dyn AssetSource>,
    shaders: Slots<ShaderProgram>,
    feedback: Slots<FeedbackProgram>,
    simulations: Slots<SimulationTextureProgram>,
    textures: Slots<TextureResource>,
    render_targets: Slots<RenderTarget>,
    composites: Slots<Pipeline>,
}

impl ResourceRegistry {
    pub fn new(gpu: GpuContext, assets: impl AssetSource + 'static) -> Self {
        Self {
            gpu,
            assets: Box::new(assets),
            shaders: Slots::new(ResourceKind::Shader),
            feedback: Slots::new(ResourceKind::Feedback),
            simulations: Slots::new(ResourceKind::Simulation),
            textures: Slots::new(ResourceKind::Texture),
            render_targets: Slots::new(ResourceKind::RenderTarget),
            composites: Slots::new(ResourceKind::Composite),
        }
    }

    pub fn gpu(&self) -> &GpuContext {
        &self.gpu
    }

    pub fn gpu_mut(&mut self) -> &mut GpuContext {
        &mut self.gpu
    }

    pub fn assets(&self) -> &dyn AssetSource {
        self.assets.as_ref()
    }

    // ==================== Creation ====================

    pub async fn create_shader(
        &mut self,
        name: &str,
        vertex_path: &str,
        fragment_path: &str,
    ) -> Result<&mut ShaderProgram, GfxError> {
        self.shaders.reserve(name)?;
        let result =
            ShaderProgram::load(&mut self.gpu, self.assets.as_ref(), name, vertex_path, fragment_path)
                .await;
        self.shaders.settle(name, result)
    }

    pub fn create_shader_from_source(
        &mut self,
        name: &str,
        vertex: &str,
        fragment: &str,
    ) -> Result<&mut ShaderProgram, GfxError> {
        self.shaders.reserve(name)?;
        let result = ShaderProgram::from_source(&mut self.gpu, name, vertex, fragment);
        self.shaders.settle(name, result)
    }

    pub async fn create_feedback(
        &mut self,
        name: &str,
        vertex_path: &str,
        fragment_path: &str,
        outputs: &[CapturedOutput],
    ) -> Result<&mut FeedbackProgram, GfxError> {
        self.feedback.reserve(name)?;
        let result = FeedbackProgram::load(
            &mut self.gpu,
            self.assets.as_ref(),
            name,
            vertex_path,
            fragment_path,
            outputs,
        )
        .await;
        self.feedback.settle(name, result)
    }

    pub fn create_feedback_from_source(
        &mut self,
        name: &str,
        vertex: &str,
        fragment: &str,
        outputs: &[CapturedOutput],
    ) -> Result<&mut FeedbackProgram, GfxError> {
        self.feedback.reserve(name)?;
        let result = FeedbackProgram::from_source(&mut self.gpu, name, vertex, fragment, outputs);
        self.feedback.settle(name, result)
    }

    /// `paths` name the four shader stages inside the asset source.
    pub async fn create_simulation(
        &mut self,
        name: &str,
        config: SimulationConfig,
        paths: &SimulationSources,
    ) -> Result<&mut SimulationTextureProgram, GfxError> {
        self.simulations.reserve(name)?;
        let result = SimulationTextureProgram::load(
            &mut self.gpu,
            self.assets.as_ref(),
            name,
            config,
            paths,
        )
        .await;
        self.simulations.settle(name, result)
    }

    pub fn create_simulation_from_source(
        &mut self,
        name: &str,
        config: SimulationConfig,
        sources: &SimulationSources,
    ) -> Result<&mut SimulationTextureProgram, GfxError> {
        self.simulations.reserve(name)?;
        let result = SimulationTextureProgram::from_source(&mut self.gpu, name, config, sources);
        self.simulations.settle(name, result)
    }

    pub async fn create_texture(
        &mut self,
        name: &str,
        unit: u32,
        path: &str,
    ) -> Result<&mut TextureResource, GfxError> {
        self.textures.reserve(name)?;
        let result =
            TextureResource::load_from_file(&mut self.gpu, self.assets.as_ref(), name, unit, path)
                .await;
        self.textures.settle(name, result)
    }

    pub fn create_texture_from_image(
        &mut self,
        name: &str,
        unit: u32,
        image: &ImageData,
    ) -> Result<&mut TextureResource, GfxError> {
        self.textures.reserve(name)?;
        let result = TextureResource::from_image(&mut self.gpu, name, unit, image);
        self.textures.settle(name, result)
    }

    pub fn create_render_target(
        &mut self,
        name: &str,
        unit: u32,
        width: u32,
        height: u32,
    ) -> Result<&mut RenderTarget, GfxError> {
        self.render_targets.reserve(name)?;
        let result = RenderTarget::create(&mut self.gpu, name, unit, width, height);
        self.render_targets.settle(name, result)
    }

    /// Validates `desc` against the resources registered so far.
    pub fn create_composite(
        &mut self,
        name: &str,
        desc: CompositeDesc,
    ) -> Result<&Pipeline, GfxError> {
        self.composites.reserve(name)?;
        let result = Pipeline::build(name, desc, self);
        self.composites.settle(name, result).map(|pipeline| &*pipeline)
    }

    // ==================== Lookup ====================

    pub fn state(&self, kind: ResourceKind, name: &str) -> ResourceState {
        match kind {
            ResourceKind::Shader => self.shaders.state(name),
            ResourceKind::Feedback => self.feedback.state(name),
            ResourceKind::Simulation => self.simulations.state(name),
            ResourceKind::Texture => self.textures.state(name),
            ResourceKind::RenderTarget => self.render_targets.state(name),
            ResourceKind::Composite => self.composites.state(name),
            ResourceKind::Attribute | ResourceKind::Uniform | ResourceKind::IndexBuffer => {
                ResourceState::Unloaded
            }
        }
    }

    /// Error message of a failed create call.
    pub fn failure(&self, kind: ResourceKind, name: &str) -> Option<&str> {
        match kind {
            ResourceKind::Shader => self.shaders.failure(name),
            ResourceKind::Feedback => self.feedback.failure(name),
            ResourceKind::Simulation => self.simulations.failure(name),
            ResourceKind::Texture => self.textures.failure(name),
            ResourceKind::RenderTarget => self.render_targets.failure(name),
            ResourceKind::Composite => self.composites.failure(name),
            _ => None,
        }
    }

    /// Names of the ready resources of `kind`, sorted.
    pub fn names(&self, kind: ResourceKind) -> Vec<&str> {
        match kind {
            ResourceKind::Shader => self.shaders.names().collect(),
            ResourceKind::Feedback => self.feedback.names().collect(),
            ResourceKind::Simulation => self.simulations.names().collect(),
            ResourceKind::Texture => self.textures.names().collect(),
            ResourceKind::RenderTarget => self.render_targets.names().collect(),
            ResourceKind::Composite => self.composites.names().collect(),
            _ => Vec::new(),
        }
    }

    pub fn shader(&self, name: &str) -> Result<&ShaderProgram, GfxError> {
        self.shaders.get(name)
    }

    pub fn shader_mut(&mut self, name: &str) -> Result<&mut ShaderProgram, GfxError> {
        self.shaders.get_mut(name)
    }

    pub fn feedback(&self, name: &str) -> Result<&FeedbackProgram, GfxError> {
        self.feedback.get(name)
    }

    pub fn feedback_mut(&mut self, name: &str) -> Result<&mut FeedbackProgram, GfxError> {
        self.feedback.get_mut(name)
    }

    pub fn simulation(&self, name: &str) -> Result<&SimulationTextureProgram, GfxError> {
        self.simulations.get(name)
    }

    pub fn simulation_mut(
        &mut self,
        name: &str,
    ) -> Result<&mut SimulationTextureProgram, GfxError> {
        self.simulations.get_mut(name)
    }

    pub fn texture(&self, name: &str) -> Result<&TextureResource, GfxError> {
        self.textures.get(name)
    }

    pub fn render_target(&self, name: &str) -> Result<&RenderTarget, GfxError> {
        self.render_targets.get(name)
    }

    pub fn composite(&self, name: &str) -> Result<&Pipeline, GfxError> {
        self.composites.get(name)
    }

    // ==================== Use ====================

    /// Runs `f` with a shader and the GPU context borrowed together.
    pub fn with_shader<T>(
        &mut self,
        name: &str,
        f: impl FnOnce(&mut ShaderProgram, &mut GpuContext) -> Result<T, GfxError>,
    ) -> Result<T, GfxError> {
        let program = self.shaders.get_mut(name)?;
        f(program, &mut self.gpu)
    }

    pub fn with_feedback<T>(
        &mut self,
        name: &str,
        f: impl FnOnce(&mut FeedbackProgram, &mut GpuContext) -> Result<T, GfxError>,
    ) -> Result<T, GfxError> {
        let feedback = self.feedback.get_mut(name)?;
        f(feedback, &mut self.gpu)
    }

    pub fn with_simulation<T>(
        &mut self,
        name: &str,
        f: impl FnOnce(&mut SimulationTextureProgram, &mut GpuContext) -> Result<T, GfxError>,
    ) -> Result<T, GfxError> {
        let simulation = self.simulations.get_mut(name)?;
        f(simulation, &mut self.gpu)
    }

    pub fn with_texture<T>(
        &mut self,
        name: &str,
        f: impl FnOnce(&mut TextureResource, &mut GpuContext) -> Result<T, GfxError>,
    ) -> Result<T, GfxError> {
        let texture = self.textures.get_mut(name)?;
        f(texture, &mut self.gpu)
    }

    pub fn with_render_target<T>(
        &mut self,
        name: &str,
        f: impl FnOnce(&mut RenderTarget, &mut GpuContext) -> Result<T, GfxError>,
    ) -> Result<T, GfxError> {
        let target = self.render_targets.get_mut(name)?;
        f(target, &mut self.gpu)
    }

    /// Makes `program` current, binds its inputs and hands a draw context
    /// to `f`. Draws land in whatever framebuffer is bound.
    pub fn draw<T>(
        &mut self,
        program: &str,
        primitive: PrimitiveKind,
        f: impl FnOnce(&mut DrawContext<'_>) -> Result<T, GfxError>,
    ) -> Result<T, GfxError> {
        let shader = self.shaders.get(program)?;
        shader.activate(&mut self.gpu)?;
        shader.prepare_draw(&mut self.gpu)?;
        let mut ctx = DrawContext::new(&mut self.gpu, shader, program, primitive, &[]);
        f(&mut ctx)
    }

    /// Like [`draw`](Self::draw), rendering into a render target.
    pub fn draw_into_target<T>(
        &mut self,
        target: &str,
        program: &str,
        primitive: PrimitiveKind,
        f: impl FnOnce(&mut DrawContext<'_>) -> Result<T, GfxError>,
    ) -> Result<T, GfxError> {
        let target = self.render_targets.get(target)?;
        let shader = self.shaders.get(program)?;
        target.write_into(&mut self.gpu, |gpu| {
            shader.activate(gpu)?;
            shader.prepare_draw(gpu)?;
            let mut ctx = DrawContext::new(gpu, shader, program, primitive, &[]);
            f(&mut ctx)
        })
    }

    /// Runs one frame of a composite.
    pub fn execute_composite<F, R>(
        &mut self,
        name: &str,
        primitive: PrimitiveKind,
        feedback_cb: F,
        render_cb: R,
    ) -> Result<(), GfxError>
    where
        F: FnMut(&mut DrawContext<'_>) -> Result<(), GfxError>,
        R: FnMut(&mut DrawContext<'_>) -> Result<(), GfxError>,
    {
        let pipeline = self.composites.get(name)?.clone();
        pipeline.execute(self, primitive, feedback_cb, render_cb)
    }

    // ==================== Disposal ====================

    /// Disposes a single resource; its name may be created again.
    ///
    /// Disposing a feedback program also unwires every render attribute
    /// that was reading its buffers.
    pub fn dispose_resource(&mut self, kind: ResourceKind, name: &str) -> Result<(), GfxError> {
        if kind == ResourceKind::Feedback {
            if let Ok(feedback) = self.feedback.get(name) {
                let buffers = feedback.tracked_buffers();
                for (shader, program) in self.shaders.ready_mut() {
                    let cleared = program.release_external_buffers(&buffers);
                    if cleared > 0 {
                        log::debug!("unwired {cleared} attribute(s) of `{shader}` from `{name}`");
                    }
                }
            }
        }
        let gpu = &mut self.gpu;
        match kind {
            ResourceKind::Shader => self.shaders.dispose_one(name, gpu),
            ResourceKind::Feedback => self.feedback.dispose_one(name, gpu),
            ResourceKind::Simulation => self.simulations.dispose_one(name, gpu),
            ResourceKind::Texture => self.textures.dispose_one(name, gpu),
            ResourceKind::RenderTarget => self.render_targets.dispose_one(name, gpu),
            ResourceKind::Composite => self.composites.dispose_one(name, gpu),
            other => Err(GfxError::unknown(other, name)),
        }
    }

    /// Disposes everything, references before referents, and frees every
    /// name. Safe to call repeatedly.
    pub fn dispose(&mut self) {
        let gpu = &mut self.gpu;
        self.composites.dispose_all(gpu);
        self.simulations.dispose_all(gpu);
        self.feedback.dispose_all(gpu);
        self.shaders.dispose_all(gpu);
        self.textures.dispose_all(gpu);
        self.render_targets.dispose_all(gpu);
        gpu.use_program(None);
        gpu.bind_framebuffer(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::MemorySource;
    use crate::gpu::HeadlessGpu;

    const VS: &str = "#version 300 es
in vec2 position;
void main() {
    gl_Position = vec4(position, 0.0, 1.0);
}
";

    const FS: &str = "#version 300 es
precision mediump float;
out vec4 color;
void main() {
    color = vec4(1.0);
}
";

    fn registry() -> ResourceRegistry {
        ResourceRegistry::new(
            GpuContext::headless(),
            MemorySource::new().with("quad.vert", VS).with("flat.frag", FS),
        )
    }

    #[test]
    fn test_duplicate_keeps_original() {
        let mut registry = registry();
        registry.create_shader_from_source("flat", VS, FS).unwrap();
        let original = registry.shader("flat").unwrap().id();
        assert!(matches!(
            registry.create_shader_from_source("flat", VS, FS),
            Err(GfxError::DuplicateResource {
                kind: ResourceKind::Shader,
                ..
            })
        ));
        assert_eq!(registry.shader("flat").unwrap().id(), original);
        assert_eq!(
            registry.state(ResourceKind::Shader, "flat"),
            ResourceState::Ready
        );
    }

    #[test]
    fn test_failed_load_can_be_retried() {
        let mut registry = registry();
        let missing = pollster::block_on(registry.create_shader("flat", "quad.vert", "nope.frag"));
        assert!(matches!(missing, Err(GfxError::Load(_))));
        assert_eq!(
            registry.state(ResourceKind::Shader, "flat"),
            ResourceState::Failed
        );
        assert!(registry.failure(ResourceKind::Shader, "flat").is_some());
        assert!(matches!(
            registry.shader("flat"),
            Err(GfxError::NotReady { state: "failed", .. })
        ));
        pollster::block_on(registry.create_shader("flat", "quad.vert", "flat.frag")).unwrap();
        assert_eq!(
            registry.state(ResourceKind::Shader, "flat"),
            ResourceState::Ready
        );
    }

    #[test]
    fn test_same_name_in_other_kind_is_allowed() {
        let mut registry = registry();
        registry.create_shader_from_source("scene", VS, FS).unwrap();
        registry.create_render_target("scene", 0, 8, 8).unwrap();
        assert_eq!(registry.names(ResourceKind::Shader), vec!["scene"]);
        assert_eq!(registry.names(ResourceKind::RenderTarget), vec!["scene"]);
    }

    #[test]
    fn test_dispose_resource_marks_disposed() {
        let mut registry = registry();
        registry.create_render_target("target", 2, 8, 8).unwrap();
        registry
            .dispose_resource(ResourceKind::RenderTarget, "target")
            .unwrap();
        assert_eq!(
            registry.state(ResourceKind::RenderTarget, "target"),
            ResourceState::Disposed
        );
        assert_eq!(registry.gpu().texture_units().owner(2), None);
        registry.create_render_target("target", 2, 8, 8).unwrap();
        assert!(matches!(
            registry.dispose_resource(ResourceKind::Texture, "target"),
            Err(GfxError::UnknownResource { .. })
        ));
    }

    #[test]
    fn test_dispose_frees_everything() {
        let mut registry = registry();
        registry.create_shader_from_source("flat", VS, FS).unwrap();
        registry.create_render_target("target", 1, 8, 8).unwrap();
        registry.dispose();
        registry.dispose();
        assert_eq!(
            registry.state(ResourceKind::Shader, "flat"),
            ResourceState::Unloaded
        );
        let headless = registry.gpu().backend::<HeadlessGpu>().unwrap();
        assert_eq!(headless.live_objects(), 0);
        assert!(headless.errors().is_empty(), "{:?}", headless.errors());
    }
}
