//! Ping-pong simulation state in float textures (vertex texture fetch).
//!
//! Two RGBA32F textures, each fixed on its own unit, alternate as the read
//! source and the render destination of an update program. Render passes
//! sample the freshly written one through [`SimulationTextureProgram::active_unit`].

use std::collections::BTreeMap;

use super::backend::{FramebufferId, PrimitiveKind, TextureDesc, Viewport};
use super::context::GpuContext;
use super::error::GfxError;
use super::program::ShaderProgram;
use super::textures::TextureResource;
use super::uniform::{UniformKind, UniformValue};
use crate::assets::{self, AssetSource};

/// Vertex input of both simulation programs: a full-screen quad in NDC.
pub const QUAD_ATTRIBUTE: &str = "position";

const QUAD: [f32; 8] = [-1.0, -1.0, 1.0, -1.0, -1.0, 1.0, 1.0, 1.0];

/// Size, units and uniform names of a simulation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulationConfig {
    pub width: u32,
    pub height: u32,
    pub read_unit: u32,
    pub write_unit: u32,
    /// Sampler uniform of the update program receiving the read unit.
    pub state_uniform: String,
    /// `vec2` uniform receiving the simulation resolution.
    pub resolution_uniform: String,
}

impl SimulationConfig {
    pub fn new(width: u32, height: u32, read_unit: u32, write_unit: u32) -> Self {
        Self {
            width,
            height,
            read_unit,
            write_unit,
            state_uniform: "stateTexture".to_string(),
            resolution_uniform: "resolution".to_string(),
        }
    }
}

/// GLSL sources (or asset paths, for [`SimulationTextureProgram::load`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulationSources {
    pub reset_vertex: String,
    pub reset_fragment: String,
    pub update_vertex: String,
    pub update_fragment: String,
}

impl SimulationSources {
    /// Both programs share one vertex stage.
    pub fn shared_vertex(
        vertex: impl Into<String>,
        reset_fragment: impl Into<String>,
        update_fragment: impl Into<String>,
    ) -> Self {
        let vertex = vertex.into();
        Self {
            reset_vertex: vertex.clone(),
            reset_fragment: reset_fragment.into(),
            update_vertex: vertex,
            update_fragment: update_fragment.into(),
        }
    }
}

#[derive(Debug)]
struct StateTexture {
    texture: TextureResource,
    framebuffer: FramebufferId,
}

#[derive(Debug)]
pub struct SimulationTextureProgram {
    label: String,
    config: SimulationConfig,
    reset: ShaderProgram,
    update: ShaderProgram,
    states: [StateTexture; 2],
    front: usize,
    reading: Option<usize>,
    cycles: u64,
    pending: BTreeMap<String, UniformValue>,
    disposed: bool,
}

impl SimulationTextureProgram {
    /// Fetches the four stages from `assets`; `sources` holds their paths.
    pub async fn load(
        gpu: &mut GpuContext,
        assets: &dyn AssetSource,
        label: &str,
        config: SimulationConfig,
        paths: &SimulationSources,
    ) -> Result<Self, GfxError> {
        let sources = SimulationSources {
            reset_vertex: assets::load_text(assets, &paths.reset_vertex).await?,
            reset_fragment: assets::load_text(assets, &paths.reset_fragment).await?,
            update_vertex: assets::load_text(assets, &paths.update_vertex).await?,
            update_fragment: assets::load_text(assets, &paths.update_fragment).await?,
        };
        Self::from_source(gpu, label, config, &sources)
    }

    /// Creates both state textures, compiles both programs and seeds the
    /// state with the reset program.
    pub fn from_source(
        gpu: &mut GpuContext,
        label: &str,
        config: SimulationConfig,
        sources: &SimulationSources,
    ) -> Result<Self, GfxError> {
        if !gpu.capabilities().float_textures {
            return Err(GfxError::Unsupported(
                "floating-point render targets".to_string(),
            ));
        }
        if config.width == 0 || config.height == 0 {
            return Err(GfxError::InvalidSize {
                width: config.width,
                height: config.height,
            });
        }
        if config.read_unit == config.write_unit {
            return Err(GfxError::SlotCollision {
                unit: config.write_unit,
                owner: label.to_string(),
            });
        }
        let desc = TextureDesc::float_state(config.width, config.height);
        let mut first = TextureResource::attachment(gpu, label, config.read_unit, desc)?;
        let mut second = match TextureResource::attachment(gpu, label, config.write_unit, desc) {
            Ok(texture) => texture,
            Err(e) => {
                first.dispose(gpu);
                return Err(e);
            }
        };
        let (reset, update, framebuffers) =
            match build_programs(gpu, label, &config, sources, &first, &second) {
                Ok(built) => built,
                Err(e) => {
                    first.dispose(gpu);
                    second.dispose(gpu);
                    return Err(e);
                }
            };
        let mut simulation = Self {
            label: label.to_string(),
            config,
            reset,
            update,
            states: [
                StateTexture {
                    texture: first,
                    framebuffer: framebuffers[0],
                },
                StateTexture {
                    texture: second,
                    framebuffer: framebuffers[1],
                },
            ],
            front: 0,
            reading: None,
            cycles: 0,
            pending: BTreeMap::new(),
            disposed: false,
        };
        if let Err(e) = simulation.reset(gpu) {
            simulation.dispose(gpu);
            return Err(e);
        }
        log::debug!(
            "simulation `{label}` {}x{} on units {} and {}",
            simulation.config.width,
            simulation.config.height,
            simulation.config.read_unit,
            simulation.config.write_unit
        );
        Ok(simulation)
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Unit of the texture holding the latest state.
    pub fn active_unit(&self) -> u32 {
        self.states[self.front].texture.unit()
    }

    pub fn front_texture(&self) -> &TextureResource {
        &self.states[self.front].texture
    }

    /// Unit being read while a cycle is in progress.
    pub fn reading(&self) -> Option<u32> {
        self.reading.map(|index| self.states[index].texture.unit())
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Update program, for registering extra uniforms.
    pub fn update_program_mut(&mut self) -> &mut ShaderProgram {
        &mut self.update
    }

    /// Stores a value uploaded to the update program on every cycle.
    pub fn set_update_uniform(
        &mut self,
        name: &str,
        value: impl Into<UniformValue>,
    ) -> Result<(), GfxError> {
        let value = value.into();
        self.update.check_uniform(name, &value)?;
        self.pending.insert(name.to_string(), value);
        Ok(())
    }

    fn live(&self) -> Result<(), GfxError> {
        if self.disposed {
            return Err(GfxError::Disposed(self.label.clone()));
        }
        Ok(())
    }

    /// Seeds both textures with the reset program.
    pub fn reset(&mut self, gpu: &mut GpuContext) -> Result<(), GfxError> {
        self.live()?;
        if self.reading.is_some() {
            return Err(GfxError::SimulationReentrant(self.label.clone()));
        }
        let previous = gpu.bindings().viewport();
        let resolution = [self.config.width as f32, self.config.height as f32];
        self.reset.activate(gpu)?;
        self.reset.prepare_draw(gpu)?;
        self.reset
            .set_uniform(gpu, &self.config.resolution_uniform, resolution)?;
        for state in &self.states {
            state.texture.bind_for_draw(gpu, false)?;
            gpu.bind_framebuffer(Some(state.framebuffer));
            gpu.viewport(Viewport::sized(self.config.width, self.config.height));
            gpu.draw_arrays(PrimitiveKind::TriangleStrip, 0, 4);
        }
        gpu.bind_framebuffer(None);
        gpu.viewport(previous);
        self.front = 0;
        self.states[self.front].texture.bind_for_draw(gpu, true)
    }

    /// Runs one update: renders the read texture's state into the other
    /// texture at the simulation resolution. The caller restores its
    /// viewport afterwards.
    pub fn begin_process(&mut self, gpu: &mut GpuContext) -> Result<(), GfxError> {
        self.live()?;
        if self.reading.is_some() {
            return Err(GfxError::SimulationReentrant(self.label.clone()));
        }
        let read = self.front;
        let write = read ^ 1;
        let read_unit = self.states[read].texture.unit();
        self.states[write].texture.bind_for_draw(gpu, false)?;
        self.states[read].texture.bind_for_draw(gpu, true)?;
        gpu.bind_framebuffer(Some(self.states[write].framebuffer));
        gpu.viewport(Viewport::sized(self.config.width, self.config.height));
        self.update.activate(gpu)?;
        self.update.prepare_draw(gpu)?;
        self.update
            .set_uniform(gpu, &self.config.state_uniform, read_unit as i32)?;
        self.update.set_uniform(
            gpu,
            &self.config.resolution_uniform,
            [self.config.width as f32, self.config.height as f32],
        )?;
        for (name, value) in &self.pending {
            self.update.set_uniform(gpu, name, value.clone())?;
        }
        gpu.draw_arrays(PrimitiveKind::TriangleStrip, 0, 4);
        self.reading = Some(read);
        self.front = write;
        self.cycles += 1;
        Ok(())
    }

    /// Rebinds the default framebuffer and publishes the written texture on
    /// its unit.
    pub fn end_process(&mut self, gpu: &mut GpuContext) -> Result<(), GfxError> {
        if self.reading.take().is_none() {
            return Err(GfxError::SimulationInactive(self.label.clone()));
        }
        gpu.bind_framebuffer(None);
        self.states[self.front].texture.bind_for_draw(gpu, true)
    }

    /// Deletes both framebuffers, both textures (releasing their units) and
    /// both programs. Idempotent.
    pub fn dispose(&mut self, gpu: &mut GpuContext) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.reading = None;
        for state in &mut self.states {
            if gpu.bindings().framebuffer() == Some(state.framebuffer) {
                gpu.bind_framebuffer(None);
            }
            gpu.delete_framebuffer(state.framebuffer);
            state.texture.dispose(gpu);
        }
        self.reset.dispose(gpu);
        self.update.dispose(gpu);
        log::debug!("disposed simulation `{}`", self.label);
    }
}

fn build_programs(
    gpu: &mut GpuContext,
    label: &str,
    config: &SimulationConfig,
    sources: &SimulationSources,
    first: &TextureResource,
    second: &TextureResource,
) -> Result<(ShaderProgram, ShaderProgram, [FramebufferId; 2]), GfxError> {
    let mut reset = ShaderProgram::from_source(
        gpu,
        &format!("{label}/reset"),
        &sources.reset_vertex,
        &sources.reset_fragment,
    )?;
    let mut update = match ShaderProgram::from_source(
        gpu,
        &format!("{label}/update"),
        &sources.update_vertex,
        &sources.update_fragment,
    ) {
        Ok(update) => update,
        Err(e) => {
            reset.dispose(gpu);
            return Err(e);
        }
    };
    match attach(gpu, config, &mut reset, &mut update, first, second) {
        Ok(framebuffers) => Ok((reset, update, framebuffers)),
        Err(e) => {
            reset.dispose(gpu);
            update.dispose(gpu);
            Err(e)
        }
    }
}

fn attach(
    gpu: &mut GpuContext,
    config: &SimulationConfig,
    reset: &mut ShaderProgram,
    update: &mut ShaderProgram,
    first: &TextureResource,
    second: &TextureResource,
) -> Result<[FramebufferId; 2], GfxError> {
    for program in [&mut *reset, &mut *update] {
        program.create_attribute(gpu, QUAD_ATTRIBUTE, 2, Some(&QUAD))?;
        program.create_uniform(gpu, &config.resolution_uniform, UniformKind::Vec2)?;
    }
    update.create_uniform(gpu, &config.state_uniform, UniformKind::Sampler)?;
    let (Some(a), Some(b)) = (first.id(), second.id()) else {
        return Err(GfxError::Disposed(first.label().to_string()));
    };
    let front = gpu.create_framebuffer(a, None)?;
    let back = match gpu.create_framebuffer(b, None) {
        Ok(back) => back,
        Err(e) => {
            gpu.delete_framebuffer(front);
            return Err(e);
        }
    };
    gpu.bind_framebuffer(None);
    Ok([front, back])
}
