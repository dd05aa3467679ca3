//! ShaderArt Core
//!
//! GPU resource and multi-pass pipeline manager for real-time shader-art
//! visualizations.
//!
//! # Features
//!
//! - Shader programs with typed attribute, uniform and index-buffer registries
//! - Textures and offscreen render targets on reserved texture units
//! - Transform-feedback particle updates with double-buffered state
//! - Vertex-texture-fetch simulations ping-ponging between float textures
//! - Composite pipelines ordering feedback, simulation and render passes
//! - A named resource registry with explicit lifecycles
//! - An in-memory headless GPU, and an OpenGL/WebGL2 backend through glow
//!   (when the `gl` feature is enabled)

pub mod assets;
pub mod config;
pub mod frame;
pub mod gallery;
pub mod gpu;
pub mod pipeline;
pub mod registry;
pub mod visualizations;

// Re-export commonly used types
pub use assets::{AssetSource, DirectorySource, EmbeddedSource, LayeredSource, LoadError, MemorySource};
pub use config::{parse_hex_color, ConfigError, GalleryConfig};
pub use frame::{FrameClock, FrameContext, FrameScheduler, ManualClock, SystemClock};
pub use gallery::{Gallery, GalleryError};
pub use gpu::{
    CapturedOutput, FeedbackProgram, GfxError, GpuBackend, GpuContext, HeadlessGpu, PrimitiveKind,
    RenderTarget, ResourceKind, ShaderProgram, SimulationConfig, SimulationSources,
    SimulationTextureProgram, TextureResource, UniformKind, UniformValue,
};
pub use pipeline::{CompositeDesc, DrawContext, FeedbackBinding, Pipeline, Wiring};
pub use registry::{ResourceRegistry, ResourceState};
pub use visualizations::{create_visualization, Visualization, VisualizationKind};
