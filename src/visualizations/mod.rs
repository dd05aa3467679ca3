//! Built-in visualizations.
//!
//! Each visualization loads its resources into the registry, then draws
//! through it once per frame:
//! - Points: a static point list
//! - FeedbackParticles: transform-feedback particle field with a mouse attractor
//! - CurlNoise: particles advected in a float state texture (vertex texture fetch)
//! - PostEffect: textured scene rendered offscreen, then graded full-screen

mod curl_noise;
mod feedback_particles;
mod points;
mod post_effect;
mod registry;

pub use curl_noise::CurlNoise;
pub use feedback_particles::FeedbackParticles;
pub use points::Points;
pub use post_effect::PostEffect;
pub use registry::create_visualization;

use std::future::Future;
use std::pin::Pin;

use crate::assets::EmbeddedSource;
use crate::frame::FrameContext;
use crate::gpu::GfxError;
use crate::registry::ResourceRegistry;

pub type LoadFuture<'a> = Pin<Box<dyn Future<Output = Result<(), GfxError>> + 'a>>;

/// A gallery entry.
///
/// `load` creates every resource the visualization needs; the render hooks
/// run once per frame in the order `begin_render`, `render`, `after_render`
/// with the default framebuffer bound and cleared.
pub trait Visualization {
    fn name(&self) -> &'static str;

    fn load<'a>(&'a mut self, registry: &'a mut ResourceRegistry) -> LoadFuture<'a>;

    /// Drops per-visualization state. Registry resources are disposed by
    /// the owner of the registry.
    fn dispose(&mut self, _registry: &mut ResourceRegistry) {}

    /// Steps simulation state; `elapsed` is in seconds.
    fn update(&mut self, _elapsed: f32) {}

    fn begin_render(
        &mut self,
        _registry: &mut ResourceRegistry,
        _frame: &FrameContext,
    ) -> Result<(), GfxError> {
        Ok(())
    }

    fn render(
        &mut self,
        registry: &mut ResourceRegistry,
        frame: &FrameContext,
    ) -> Result<(), GfxError>;

    fn after_render(
        &mut self,
        _registry: &mut ResourceRegistry,
        _frame: &FrameContext,
    ) -> Result<(), GfxError> {
        Ok(())
    }

    /// Pointer position in normalized device coordinates.
    fn on_mouse_move(&mut self, _x: f32, _y: f32) {}

    /// Whether frames are requested continuously.
    fn is_animated(&self) -> bool {
        true
    }
}

/// Available visualization kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VisualizationKind {
    Points,
    FeedbackParticles,
    CurlNoise,
    PostEffect,
}

impl VisualizationKind {
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "points" | "point" => Some(Self::Points),
            "feedback-particles" | "feedbackparticles" | "particles" => {
                Some(Self::FeedbackParticles)
            }
            "curl-noise" | "curlnoise" | "curl" => Some(Self::CurlNoise),
            "post-effect" | "posteffect" | "post" => Some(Self::PostEffect),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Points => "points",
            Self::FeedbackParticles => "feedback-particles",
            Self::CurlNoise => "curl-noise",
            Self::PostEffect => "post-effect",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Points => "Static point list drawn with a color uniform",
            Self::FeedbackParticles => "Transform-feedback particles pulled toward the pointer",
            Self::CurlNoise => "Particles advected by curl noise in a float state texture",
            Self::PostEffect => "Offscreen textured scene with a grayscale vignette pass",
        }
    }

    pub fn all() -> &'static [Self] {
        &[
            Self::Points,
            Self::FeedbackParticles,
            Self::CurlNoise,
            Self::PostEffect,
        ]
    }
}

static BUILTIN_SHADERS: &[(&str, &str)] = &[
    ("shaders/points.vert", include_str!("shaders/points.vert")),
    ("shaders/points.frag", include_str!("shaders/points.frag")),
    (
        "shaders/particles_update.vert",
        include_str!("shaders/particles_update.vert"),
    ),
    (
        "shaders/particles_draw.vert",
        include_str!("shaders/particles_draw.vert"),
    ),
    (
        "shaders/particles_draw.frag",
        include_str!("shaders/particles_draw.frag"),
    ),
    ("shaders/discard.frag", include_str!("shaders/discard.frag")),
    ("shaders/quad.vert", include_str!("shaders/quad.vert")),
    ("shaders/curl_reset.frag", include_str!("shaders/curl_reset.frag")),
    (
        "shaders/curl_update.frag",
        include_str!("shaders/curl_update.frag"),
    ),
    ("shaders/curl_draw.vert", include_str!("shaders/curl_draw.vert")),
    ("shaders/curl_draw.frag", include_str!("shaders/curl_draw.frag")),
    ("shaders/textured.vert", include_str!("shaders/textured.vert")),
    ("shaders/textured.frag", include_str!("shaders/textured.frag")),
    ("shaders/fullscreen.vert", include_str!("shaders/fullscreen.vert")),
    (
        "shaders/grayscale_vignette.frag",
        include_str!("shaders/grayscale_vignette.frag"),
    ),
];

/// Shaders of the built-in visualizations.
pub fn builtin_assets() -> EmbeddedSource {
    EmbeddedSource::new(BUILTIN_SHADERS)
}

/// Full-screen quad as a triangle strip.
pub(crate) const QUAD: [f32; 8] = [-1.0, -1.0, 1.0, -1.0, -1.0, 1.0, 1.0, 1.0];
