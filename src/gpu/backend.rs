//! GPU API boundary.
//!
//! Everything the core needs from a graphics driver goes through [`GpuBackend`].
//! Handles are plain integers so each backend keeps its own object table and
//! the rest of the crate never touches driver types.

use std::any::Any;
use std::fmt;

use super::uniform::UniformValue;

macro_rules! gpu_handle {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u32);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "#{}"), self.0)
            }
        }
    };
}

gpu_handle!(
    /// A compiled shader stage.
    ShaderId,
    "shader"
);
gpu_handle!(
    /// A linked program.
    ProgramId,
    "program"
);
gpu_handle!(
    /// A vertex, index or capture buffer.
    BufferId,
    "buffer"
);
gpu_handle!(
    /// A 2D texture.
    TextureId,
    "texture"
);
gpu_handle!(
    /// An offscreen framebuffer.
    FramebufferId,
    "framebuffer"
);
gpu_handle!(
    /// A depth renderbuffer.
    RenderbufferId,
    "renderbuffer"
);
gpu_handle!(
    /// A resolved uniform location.
    UniformLocation,
    "uniform"
);

/// Shader pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Vertex => f.write_str("vertex"),
            Self::Fragment => f.write_str("fragment"),
        }
    }
}

/// Primitive assembly mode for draw calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    Points,
    Lines,
    LineStrip,
    LineLoop,
    Triangles,
    TriangleStrip,
    TriangleFan,
}

impl PrimitiveKind {
    /// Base mode accepted by transform feedback capture.
    ///
    /// Capture only understands points, lines and triangles; strips and fans
    /// are captured as their base primitive.
    pub fn capture_mode(self) -> Self {
        match self {
            Self::Points => Self::Points,
            Self::Lines | Self::LineStrip | Self::LineLoop => Self::Lines,
            Self::Triangles | Self::TriangleStrip | Self::TriangleFan => Self::Triangles,
        }
    }
}

/// Buffer binding target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferTarget {
    Array,
    ElementArray,
}

/// Expected update pattern of a buffer's contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    StaticDraw,
    DynamicDraw,
    /// Written by the GPU (capture), read back by the GPU.
    DynamicCopy,
}

/// Texel storage format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba8,
    Rgba32Float,
}

/// Minification/magnification filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFilter {
    Nearest,
    Linear,
}

/// Texture creation parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub filter: TextureFilter,
    pub mipmaps: bool,
}

impl TextureDesc {
    /// Linear-filtered RGBA8 texture with mipmaps, used for decoded images.
    pub fn image(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            format: TextureFormat::Rgba8,
            filter: TextureFilter::Linear,
            mipmaps: true,
        }
    }

    /// Linear-filtered RGBA8 texture without mipmaps, used as a color attachment.
    pub fn color_attachment(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            format: TextureFormat::Rgba8,
            filter: TextureFilter::Linear,
            mipmaps: false,
        }
    }

    /// Nearest-filtered RGBA32F texture holding simulation state.
    pub fn float_state(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            format: TextureFormat::Rgba32Float,
            filter: TextureFilter::Nearest,
            mipmaps: false,
        }
    }
}

/// Decoded RGBA8 image ready for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageData {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

/// Viewport rectangle in framebuffer pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Viewport {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Viewport covering a `width` x `height` surface from the origin.
    pub fn sized(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }
}

/// Features and limits probed from the device at context creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Number of texture units usable across all stages.
    pub max_combined_texture_units: u32,
    /// Whether RGBA32F textures can be rendered into.
    pub float_textures: bool,
    /// Whether transform feedback capture is available.
    pub transform_feedback: bool,
    /// Maximum number of separately captured outputs.
    pub max_feedback_outputs: u32,
}

impl Default for Capabilities {
    /// Minimum guarantees of a WebGL2 / GLES 3.0 device with
    /// `EXT_color_buffer_float`.
    fn default() -> Self {
        Self {
            max_combined_texture_units: 16,
            float_textures: true,
            transform_feedback: true,
            max_feedback_outputs: 4,
        }
    }
}

/// Driver-level operations used by the core.
///
/// Creation calls return the driver's info log as the error string. Every
/// other call follows driver semantics: it acts on whatever is currently
/// bound, so callers must bind immediately before the dependent operation.
pub trait GpuBackend {
    fn capabilities(&self) -> Capabilities;

    fn compile_shader(&mut self, stage: ShaderStage, source: &str) -> Result<ShaderId, String>;
    /// Attaches both stages, declares the captured varyings (separate
    /// attribute mode) and links. The program is deleted on failure.
    fn link_program(
        &mut self,
        vertex: ShaderId,
        fragment: ShaderId,
        varyings: &[&str],
    ) -> Result<ProgramId, String>;
    fn detach_shader(&mut self, program: ProgramId, shader: ShaderId);
    fn delete_shader(&mut self, shader: ShaderId);
    fn delete_program(&mut self, program: ProgramId);
    fn use_program(&mut self, program: Option<ProgramId>);
    fn attribute_location(&self, program: ProgramId, name: &str) -> Option<u32>;
    fn uniform_location(&mut self, program: ProgramId, name: &str) -> Option<UniformLocation>;
    /// Uploads to a location of the current program.
    fn upload_uniform(&mut self, location: UniformLocation, value: &UniformValue);

    fn create_buffer(
        &mut self,
        target: BufferTarget,
        data: &[u8],
        usage: BufferUsage,
    ) -> Result<BufferId, String>;
    fn update_buffer(&mut self, buffer: BufferId, target: BufferTarget, data: &[u8]);
    fn delete_buffer(&mut self, buffer: BufferId);
    fn bind_buffer(&mut self, target: BufferTarget, buffer: Option<BufferId>);
    /// Binds a capture target to an indexed transform feedback binding.
    fn bind_feedback_buffer(&mut self, index: u32, buffer: Option<BufferId>);
    fn enable_attribute(&mut self, location: u32);
    fn disable_attribute(&mut self, location: u32);
    /// Describes tightly packed `f32` components sourced from the bound array buffer.
    fn attribute_pointer(&mut self, location: u32, components: u32);

    fn create_texture(
        &mut self,
        desc: &TextureDesc,
        pixels: Option<&[u8]>,
    ) -> Result<TextureId, String>;
    fn delete_texture(&mut self, texture: TextureId);
    fn active_texture(&mut self, unit: u32);
    fn bind_texture(&mut self, texture: Option<TextureId>);

    fn create_depth_buffer(&mut self, width: u32, height: u32) -> Result<RenderbufferId, String>;
    fn delete_depth_buffer(&mut self, renderbuffer: RenderbufferId);
    fn create_framebuffer(
        &mut self,
        color: TextureId,
        depth: Option<RenderbufferId>,
    ) -> Result<FramebufferId, String>;
    fn delete_framebuffer(&mut self, framebuffer: FramebufferId);
    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferId>);

    fn viewport(&mut self, viewport: Viewport);
    fn clear(&mut self, color: [f32; 4], depth: bool);
    fn set_rasterizer_discard(&mut self, enabled: bool);
    fn begin_feedback(&mut self, mode: PrimitiveKind);
    fn end_feedback(&mut self);
    fn draw_arrays(&mut self, mode: PrimitiveKind, first: u32, count: u32);
    /// Draws `count` u16 indices from the bound element buffer.
    fn draw_elements(&mut self, mode: PrimitiveKind, count: u32);

    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_mode_reduces_to_base_primitive() {
        assert_eq!(PrimitiveKind::Points.capture_mode(), PrimitiveKind::Points);
        assert_eq!(PrimitiveKind::LineStrip.capture_mode(), PrimitiveKind::Lines);
        assert_eq!(PrimitiveKind::TriangleFan.capture_mode(), PrimitiveKind::Triangles);
    }

    #[test]
    fn test_handle_display() {
        assert_eq!(BufferId(7).to_string(), "buffer#7");
        assert_eq!(ShaderStage::Fragment.to_string(), "fragment");
    }
}
