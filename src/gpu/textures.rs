//! Texture and render target management.

use super::backend::{
    FramebufferId, ImageData, RenderbufferId, TextureDesc, TextureId, Viewport,
};
use super::context::GpuContext;
use super::error::GfxError;
use crate::assets::{self, AssetSource};

/// A 2D texture pinned to one texture unit for its whole life.
#[derive(Debug)]
pub struct TextureResource {
    label: String,
    texture: Option<TextureId>,
    unit: u32,
    width: u32,
    height: u32,
    source: Option<String>,
}

impl TextureResource {
    /// Reserves `unit`, then fetches and decodes `path`.
    ///
    /// The unit is reserved before the fetch so a concurrent claim fails
    /// fast; it is released again when loading fails.
    pub async fn load_from_file(
        gpu: &mut GpuContext,
        assets: &dyn AssetSource,
        label: &str,
        unit: u32,
        path: &str,
    ) -> Result<Self, GfxError> {
        gpu.reserve_unit(unit, label)?;
        let image = match assets::load_image(assets, path).await {
            Ok(image) => image,
            Err(e) => {
                gpu.release_unit(unit);
                return Err(e.into());
            }
        };
        let mut texture = Self::upload(gpu, label, unit, &image).inspect_err(|_| {
            gpu.release_unit(unit);
        })?;
        texture.source = Some(path.to_string());
        Ok(texture)
    }

    pub fn from_image(
        gpu: &mut GpuContext,
        label: &str,
        unit: u32,
        image: &ImageData,
    ) -> Result<Self, GfxError> {
        gpu.reserve_unit(unit, label)?;
        Self::upload(gpu, label, unit, image).inspect_err(|_| gpu.release_unit(unit))
    }

    /// Creates an empty texture on `unit` for use as an attachment.
    pub(crate) fn attachment(
        gpu: &mut GpuContext,
        label: &str,
        unit: u32,
        desc: TextureDesc,
    ) -> Result<Self, GfxError> {
        if desc.width == 0 || desc.height == 0 {
            return Err(GfxError::InvalidSize {
                width: desc.width,
                height: desc.height,
            });
        }
        gpu.reserve_unit(unit, label)?;
        gpu.active_texture(unit);
        let texture = gpu.create_texture(&desc, None).inspect_err(|_| {
            gpu.release_unit(unit);
        })?;
        gpu.bind_texture(None);
        Ok(Self {
            label: label.to_string(),
            texture: Some(texture),
            unit,
            width: desc.width,
            height: desc.height,
            source: None,
        })
    }

    fn upload(
        gpu: &mut GpuContext,
        label: &str,
        unit: u32,
        image: &ImageData,
    ) -> Result<Self, GfxError> {
        let expected = image.width as usize * image.height as usize * 4;
        if image.width == 0 || image.height == 0 {
            return Err(GfxError::InvalidSize {
                width: image.width,
                height: image.height,
            });
        }
        if image.pixels.len() != expected {
            return Err(GfxError::InvalidData(format!(
                "image for `{label}` has {} bytes, expected {expected}",
                image.pixels.len()
            )));
        }
        gpu.active_texture(unit);
        let texture = gpu.create_texture(
            &TextureDesc::image(image.width, image.height),
            Some(&image.pixels),
        )?;
        gpu.bind_texture(None);
        log::debug!(
            "texture `{label}` ({}x{}) on unit {unit}",
            image.width,
            image.height
        );
        Ok(Self {
            label: label.to_string(),
            texture: Some(texture),
            unit,
            width: image.width,
            height: image.height,
            source: None,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn unit(&self) -> u32 {
        self.unit
    }

    pub fn id(&self) -> Option<TextureId> {
        self.texture
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Path the texture was loaded from.
    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    /// Activates the texture's unit and clears it; rebinds the texture when
    /// `enable` is set.
    pub fn bind_for_draw(&self, gpu: &mut GpuContext, enable: bool) -> Result<(), GfxError> {
        let texture = self
            .texture
            .ok_or_else(|| GfxError::Disposed(self.label.clone()))?;
        gpu.active_texture(self.unit);
        gpu.bind_texture(None);
        if enable {
            gpu.bind_texture(Some(texture));
        }
        Ok(())
    }

    /// Deletes the texture and releases its unit. Idempotent.
    pub fn dispose(&mut self, gpu: &mut GpuContext) {
        if let Some(texture) = self.texture.take() {
            gpu.delete_texture(texture);
            gpu.release_unit(self.unit);
            log::debug!("disposed texture `{}`", self.label);
        }
    }
}

/// Offscreen framebuffer with a depth buffer and a sampled color texture.
#[derive(Debug)]
pub struct RenderTarget {
    label: String,
    framebuffer: Option<FramebufferId>,
    depth: Option<RenderbufferId>,
    color: TextureResource,
    width: u32,
    height: u32,
    clear_color: [f32; 4],
}

impl RenderTarget {
    pub fn create(
        gpu: &mut GpuContext,
        label: &str,
        unit: u32,
        width: u32,
        height: u32,
    ) -> Result<Self, GfxError> {
        if width == 0 || height == 0 {
            return Err(GfxError::InvalidSize { width, height });
        }
        let mut color =
            TextureResource::attachment(gpu, label, unit, TextureDesc::color_attachment(width, height))?;
        let depth = match gpu.create_depth_buffer(width, height) {
            Ok(depth) => depth,
            Err(e) => {
                color.dispose(gpu);
                return Err(e);
            }
        };
        let color_id = color
            .id()
            .ok_or_else(|| GfxError::Disposed(label.to_string()))?;
        let framebuffer = match gpu.create_framebuffer(color_id, Some(depth)) {
            Ok(framebuffer) => framebuffer,
            Err(e) => {
                gpu.delete_depth_buffer(depth);
                color.dispose(gpu);
                return Err(e);
            }
        };
        gpu.bind_framebuffer(None);
        log::debug!("render target `{label}` {width}x{height} on unit {unit}");
        Ok(Self {
            label: label.to_string(),
            framebuffer: Some(framebuffer),
            depth: Some(depth),
            color,
            width,
            height,
            clear_color: [0.0; 4],
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn framebuffer(&self) -> Option<FramebufferId> {
        self.framebuffer
    }

    /// Color attachment, sampled on the target's unit.
    pub fn texture(&self) -> &TextureResource {
        &self.color
    }

    pub fn set_clear_color(&mut self, color: [f32; 4]) {
        self.clear_color = color;
    }

    /// Recreates the target at a new size on the same unit.
    pub fn resize(&mut self, gpu: &mut GpuContext, width: u32, height: u32) -> Result<(), GfxError> {
        if (width, height) == (self.width, self.height) && self.framebuffer.is_some() {
            return Ok(());
        }
        if width == 0 || height == 0 {
            return Err(GfxError::InvalidSize { width, height });
        }
        let unit = self.color.unit();
        let clear_color = self.clear_color;
        self.dispose(gpu);
        *self = Self::create(gpu, &self.label.clone(), unit, width, height)?;
        self.clear_color = clear_color;
        Ok(())
    }

    /// Renders `draw` into the target.
    ///
    /// Binds the framebuffer, sets the viewport to the target size and
    /// clears color and depth. Afterwards the default framebuffer and the
    /// previous viewport are restored.
    pub fn write_into<R>(
        &self,
        gpu: &mut GpuContext,
        draw: impl FnOnce(&mut GpuContext) -> Result<R, GfxError>,
    ) -> Result<R, GfxError> {
        let framebuffer = self
            .framebuffer
            .ok_or_else(|| GfxError::Disposed(self.label.clone()))?;
        let previous = gpu.bindings().viewport();
        gpu.bind_framebuffer(Some(framebuffer));
        gpu.viewport(Viewport::sized(self.width, self.height));
        gpu.clear(self.clear_color, true);
        let result = draw(gpu);
        gpu.bind_framebuffer(None);
        gpu.viewport(previous);
        result
    }

    /// Deletes framebuffer, depth buffer and color texture. Idempotent.
    pub fn dispose(&mut self, gpu: &mut GpuContext) {
        if let Some(framebuffer) = self.framebuffer.take() {
            if gpu.bindings().framebuffer() == Some(framebuffer) {
                gpu.bind_framebuffer(None);
            }
            gpu.delete_framebuffer(framebuffer);
        }
        if let Some(depth) = self.depth.take() {
            gpu.delete_depth_buffer(depth);
        }
        self.color.dispose(gpu);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::HeadlessGpu;

    fn image(width: u32, height: u32) -> ImageData {
        ImageData {
            width,
            height,
            pixels: vec![255; (width * height * 4) as usize],
        }
    }

    #[test]
    fn test_texture_reserves_its_unit() {
        let mut gpu = GpuContext::headless();
        let mut texture = TextureResource::from_image(&mut gpu, "a", 2, &image(2, 2)).unwrap();
        assert!(matches!(
            TextureResource::from_image(&mut gpu, "b", 2, &image(2, 2)),
            Err(GfxError::SlotCollision { unit: 2, .. })
        ));
        texture.dispose(&mut gpu);
        texture.dispose(&mut gpu);
        assert!(TextureResource::from_image(&mut gpu, "b", 2, &image(2, 2)).is_ok());
        assert!(gpu.backend::<HeadlessGpu>().unwrap().errors().is_empty());
    }

    #[test]
    fn test_bind_for_draw_uses_fixed_unit() {
        let mut gpu = GpuContext::headless();
        let texture = TextureResource::from_image(&mut gpu, "a", 5, &image(1, 1)).unwrap();
        texture.bind_for_draw(&mut gpu, true).unwrap();
        assert_eq!(gpu.bindings().active_unit(), 5);
        assert_eq!(gpu.bindings().texture_on(5), texture.id());
        texture.bind_for_draw(&mut gpu, false).unwrap();
        assert_eq!(gpu.bindings().texture_on(5), None);
    }

    #[test]
    fn test_image_size_mismatch_releases_unit() {
        let mut gpu = GpuContext::headless();
        let mut broken = image(2, 2);
        broken.pixels.truncate(3);
        assert!(matches!(
            TextureResource::from_image(&mut gpu, "a", 1, &broken),
            Err(GfxError::InvalidData(_))
        ));
        assert_eq!(gpu.texture_units().owner(1), None);
    }

    #[test]
    fn test_write_into_restores_state() {
        let mut gpu = GpuContext::headless();
        gpu.viewport(Viewport::sized(640, 480));
        let target = RenderTarget::create(&mut gpu, "rt", 0, 128, 64).unwrap();
        let inner = target
            .write_into(&mut gpu, |gpu| {
                Ok((gpu.bindings().framebuffer(), gpu.bindings().viewport()))
            })
            .unwrap();
        assert_eq!(inner.0, target.framebuffer());
        assert_eq!(inner.1, Viewport::sized(128, 64));
        assert_eq!(gpu.bindings().framebuffer(), None);
        assert_eq!(gpu.bindings().viewport(), Viewport::sized(640, 480));
    }

    #[test]
    fn test_resize_keeps_unit() {
        let mut gpu = GpuContext::headless();
        let mut target = RenderTarget::create(&mut gpu, "rt", 3, 16, 16).unwrap();
        let before = target.texture().id();
        target.resize(&mut gpu, 16, 16).unwrap();
        assert_eq!(target.texture().id(), before);
        target.resize(&mut gpu, 32, 8).unwrap();
        assert_eq!(target.size(), (32, 8));
        assert_eq!(target.texture().unit(), 3);
        assert_ne!(target.texture().id(), before);
        let headless = gpu.backend::<HeadlessGpu>().unwrap();
        assert_eq!(headless.live_framebuffers(), 1);
        assert_eq!(headless.live_textures(), 1);
        assert_eq!(headless.live_renderbuffers(), 1);
    }

    #[test]
    fn test_zero_size_rejected() {
        let mut gpu = GpuContext::headless();
        assert!(matches!(
            RenderTarget::create(&mut gpu, "rt", 0, 0, 16),
            Err(GfxError::InvalidSize { .. })
        ));
        assert_eq!(gpu.texture_units().reserved(), 0);
    }
}
