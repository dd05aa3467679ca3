//! Gallery host: one active visualization at a time.

use crate::assets::{DirectorySource, LayeredSource};
use crate::config::{ConfigError, GalleryConfig};
use crate::frame::{FrameClock, FrameContext, FrameScheduler, SystemClock};
use crate::gpu::{GfxError, GpuContext};
use crate::registry::ResourceRegistry;
use crate::visualizations::{
    builtin_assets, create_visualization, Visualization, VisualizationKind,
};

/// Errors that can occur while running a gallery.
#[derive(Debug, thiserror::Error)]
pub enum GalleryError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    #[error("failed to load visualization `{name}`: {source}")]
    Load {
        name: String,
        #[source]
        source: GfxError,
    },
    #[error("GPU error: {0}")]
    Gpu(#[from] GfxError),
    #[error("gallery has no visualizations")]
    Empty,
}

pub struct Gallery {
    registry: ResourceRegistry,
    scheduler: FrameScheduler,
    kinds: Vec<VisualizationKind>,
    index: usize,
    active: Option<Box<dyn Visualization>>,
    animate: Option<bool>,
}

impl Gallery {
    pub fn new(config: &GalleryConfig, gpu: GpuContext) -> Result<Self, GalleryError> {
        Self::with_clock(config, gpu, SystemClock::new())
    }

    /// Assets come from `config.asset_root` first, then the built-in shaders.
    pub fn with_clock(
        config: &GalleryConfig,
        gpu: GpuContext,
        clock: impl FrameClock + 'static,
    ) -> Result<Self, GalleryError> {
        config.validate()?;
        let kinds = config.kinds()?;
        let mut assets = LayeredSource::new();
        if let Some(root) = &config.asset_root {
            assets = assets.push(DirectorySource::new(root));
        }
        assets = assets.push(builtin_assets());
        let [width, height] = config.viewport;
        let mut scheduler = FrameScheduler::with_clock(width, height, clock);
        scheduler.set_clear_color(config.clear_rgba()?);
        Ok(Self {
            registry: ResourceRegistry::new(gpu, assets),
            scheduler,
            kinds,
            index: 0,
            active: None,
            animate: config.animate,
        })
    }

    pub fn registry(&self) -> &ResourceRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ResourceRegistry {
        &mut self.registry
    }

    pub fn scheduler(&self) -> &FrameScheduler {
        &self.scheduler
    }

    pub fn kinds(&self) -> &[VisualizationKind] {
        &self.kinds
    }

    pub fn active_name(&self) -> Option<&'static str> {
        self.active.as_ref().map(|vis| vis.name())
    }

    /// Tears down the current visualization and every registry resource.
    fn teardown(&mut self) {
        if let Some(mut current) = self.active.take() {
            current.dispose(&mut self.registry);
            log::debug!("disposed visualization `{}`", current.name());
        }
        self.registry.dispose();
        self.scheduler.disable();
    }

    /// Replaces the active visualization.
    pub async fn show(&mut self, name: &str) -> Result<(), GalleryError> {
        let kind = VisualizationKind::from_str(name).ok_or_else(|| {
            ConfigError::UnknownVisualization {
                name: name.to_string(),
                available: VisualizationKind::all()
                    .iter()
                    .map(|kind| kind.name())
                    .collect::<Vec<_>>()
                    .join(", "),
            }
        })?;
        self.teardown();

        let mut vis = create_visualization(kind);
        if let Err(source) = vis.load(&mut self.registry).await {
            log::error!("failed to load `{}`: {source}", kind.name());
            vis.dispose(&mut self.registry);
            self.registry.dispose();
            return Err(GalleryError::Load {
                name: kind.name().to_string(),
                source,
            });
        }
        if let Some(position) = self.kinds.iter().position(|k| *k == kind) {
            self.index = position;
        }
        let animate = self.animate.unwrap_or_else(|| vis.is_animated());
        log::info!("showing `{}` (animate: {animate})", kind.name());
        self.active = Some(vis);
        self.scheduler.enable(animate);
        Ok(())
    }

    pub async fn show_index(&mut self, index: usize) -> Result<(), GalleryError> {
        let kind = *self.kinds.get(index).ok_or(GalleryError::Empty)?;
        self.show(kind.name()).await
    }

    /// Advances to the next visualization that loads, skipping failures.
    pub async fn next(&mut self) -> Result<(), GalleryError> {
        if self.kinds.is_empty() {
            return Err(GalleryError::Empty);
        }
        let start = if self.active.is_some() {
            self.index + 1
        } else {
            self.index
        };
        let mut last = None;
        for offset in 0..self.kinds.len() {
            let index = (start + offset) % self.kinds.len();
            match self.show_index(index).await {
                Ok(()) => return Ok(()),
                Err(e @ GalleryError::Load { .. }) => {
                    log::warn!("skipping: {e}");
                    last = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last.unwrap_or(GalleryError::Empty))
    }

    /// Runs one frame of the active visualization.
    pub fn tick(&mut self) -> Result<Option<FrameContext>, GalleryError> {
        let Some(vis) = self.active.as_mut() else {
            return Ok(None);
        };
        Ok(self.scheduler.tick(&mut self.registry, vis.as_mut())?)
    }

    pub fn take_redraw_request(&mut self) -> bool {
        self.scheduler.take_redraw_request()
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.scheduler.resize(width, height);
    }

    /// Forwards a pointer position given in canvas pixels, y down.
    pub fn mouse_move(&mut self, x: f32, y: f32) {
        let (width, height) = self.scheduler.size();
        if width == 0 || height == 0 {
            return;
        }
        let ndc_x = 2.0 * x / width as f32 - 1.0;
        let ndc_y = 1.0 - 2.0 * y / height as f32;
        if let Some(vis) = self.active.as_mut() {
            vis.on_mouse_move(ndc_x, ndc_y);
        }
    }

    pub fn shutdown(&mut self) {
        self.teardown();
        log::info!("gallery shut down");
    }
}

impl Drop for Gallery {
    fn drop(&mut self) {
        self.teardown();
    }
}
