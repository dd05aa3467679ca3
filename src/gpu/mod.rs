//! GPU resource layer.
//!
//! Everything talks to the device through [`GpuContext`], which wraps a
//! [`GpuBackend`] and tracks the bindings it has made. [`HeadlessGpu`]
//! simulates a GLES 3.0 device in memory; the `gl` feature adds a glow
//! backend for real contexts.

pub mod backend;
pub mod context;
pub mod error;
pub mod feedback;
#[cfg(feature = "gl")]
pub mod gl;
pub mod headless;
pub mod program;
pub mod simulation;
pub mod textures;
pub mod uniform;

pub use backend::{
    BufferId, BufferTarget, BufferUsage, Capabilities, FramebufferId, GpuBackend, ImageData,
    PrimitiveKind, ProgramId, RenderbufferId, ShaderId, ShaderStage, TextureDesc, TextureFilter,
    TextureFormat, TextureId, UniformLocation, Viewport,
};
pub use context::{BindingContext, GpuContext, TextureUnits};
pub use error::{GfxError, ResourceKind};
pub use feedback::{CapturedOutput, FeedbackBufferSet, FeedbackProgram};
#[cfg(feature = "gl")]
pub use gl::GlowGpu;
pub use headless::{
    CaptureInput, CaptureKernel, DrawRecord, HeadlessGpu, HeadlessStats, RecordedAttribute,
};
pub use program::{AttributeSlot, ShaderProgram};
pub use simulation::{SimulationConfig, SimulationSources, SimulationTextureProgram};
pub use textures::{RenderTarget, TextureResource};
pub use uniform::{ParseUniformKindError, UniformKind, UniformValue};
