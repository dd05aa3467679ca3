//! Error type shared by every GPU resource.

use super::backend::ShaderStage;
use super::uniform::UniformKind;
use crate::assets::LoadError;

/// Kind of named resource tracked by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Shader,
    Feedback,
    Simulation,
    Texture,
    RenderTarget,
    Composite,
    Attribute,
    Uniform,
    IndexBuffer,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Shader => "shader",
            Self::Feedback => "feedback program",
            Self::Simulation => "simulation",
            Self::Texture => "texture",
            Self::RenderTarget => "render target",
            Self::Composite => "composite",
            Self::Attribute => "attribute",
            Self::Uniform => "uniform",
            Self::IndexBuffer => "index buffer",
        };
        f.write_str(name)
    }
}

/// Errors raised while creating, binding or drawing GPU resources.
#[derive(Debug, thiserror::Error)]
pub enum GfxError {
    #[error("{stage} shader failed to compile: {log}")]
    Compile { stage: ShaderStage, log: String },
    #[error("program failed to link: {0}")]
    Link(String),
    #[error("{kind} `{name}` already exists")]
    DuplicateResource { kind: ResourceKind, name: String },
    #[error("uniform `{0}` was never registered")]
    UnknownUniform(String),
    #[error("attribute `{0}` was never registered")]
    UnknownAttribute(String),
    #[error("uniform `{0}` was given an empty value")]
    NullValue(String),
    #[error("uniform `{name}` expects {expected}, got {found}")]
    UniformType {
        name: String,
        expected: UniformKind,
        found: UniformKind,
    },
    #[error("texture unit {unit} is already reserved by `{owner}`")]
    SlotCollision { unit: u32, owner: String },
    #[error("texture unit {unit} exceeds the device limit of {capacity}")]
    Capacity { unit: u32, capacity: u32 },
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error("program `{0}` is not the current program")]
    NotCurrent(String),
    #[error("no {kind} named `{name}`")]
    UnknownResource { kind: ResourceKind, name: String },
    #[error("{kind} `{name}` is {state}")]
    NotReady {
        kind: ResourceKind,
        name: String,
        state: &'static str,
    },
    #[error("binding error: {0}")]
    Binding(String),
    #[error("feedback program `{0}` is already capturing")]
    FeedbackReentrant(String),
    #[error("feedback program `{0}` is not capturing")]
    FeedbackInactive(String),
    #[error("simulation `{0}` is already processing")]
    SimulationReentrant(String),
    #[error("simulation `{0}` is not processing")]
    SimulationInactive(String),
    #[error("unsupported by this device: {0}")]
    Unsupported(String),
    #[error("invalid size {width}x{height}")]
    InvalidSize { width: u32, height: u32 },
    #[error("invalid data: {0}")]
    InvalidData(String),
    #[error("attribute `{0}` needs initial data")]
    MissingData(String),
    #[error("program `{0}` has no index buffer")]
    MissingIndexBuffer(String),
    #[error("`{0}` has been disposed")]
    Disposed(String),
    #[error("backend error: {0}")]
    Backend(String),
}

impl GfxError {
    pub(crate) fn duplicate(kind: ResourceKind, name: &str) -> Self {
        Self::DuplicateResource {
            kind,
            name: name.to_string(),
        }
    }

    pub(crate) fn unknown(kind: ResourceKind, name: &str) -> Self {
        Self::UnknownResource {
            kind,
            name: name.to_string(),
        }
    }
}
