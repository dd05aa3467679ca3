//! Per-frame update/render scheduling.

use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::gpu::{GfxError, Viewport};
use crate::registry::ResourceRegistry;
use crate::visualizations::Visualization;

/// Monotonic time source.
pub trait FrameClock {
    /// Time since an arbitrary fixed origin.
    fn now(&self) -> Duration;
}

/// Wall clock.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameClock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Clock advanced by hand. Clones share the same time, so a test can keep
/// one while the scheduler owns another.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, step: Duration) {
        self.now.set(self.now.get() + step);
    }

    pub fn set(&self, now: Duration) {
        self.now.set(now);
    }
}

impl FrameClock for ManualClock {
    fn now(&self) -> Duration {
        self.now.get()
    }
}

/// Per-frame values handed to a visualization.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct FrameContext {
    /// Seconds since the scheduler was last enabled.
    pub elapsed_time: f32,
    pub viewport_width: u32,
    pub viewport_height: u32,
    /// True for the first frame rendered after a resize.
    pub resize_occurred: bool,
    pub frame_index: u64,
}

impl FrameContext {
    pub fn aspect(&self) -> f32 {
        if self.viewport_height == 0 {
            1.0
        } else {
            self.viewport_width as f32 / self.viewport_height as f32
        }
    }
}

pub struct FrameScheduler {
    clock: Box<dyn FrameClock>,
    started: Duration,
    elapsed: Duration,
    enabled: bool,
    animate: bool,
    redraw: bool,
    size: (u32, u32),
    pending_size: Option<(u32, u32)>,
    clear_color: [f32; 4],
    frame_index: u64,
}

impl FrameScheduler {
    pub fn new(width: u32, height: u32) -> Self {
        Self::with_clock(width, height, SystemClock::new())
    }

    pub fn with_clock(width: u32, height: u32, clock: impl FrameClock + 'static) -> Self {
        Self {
            clock: Box::new(clock),
            started: Duration::ZERO,
            elapsed: Duration::ZERO,
            enabled: false,
            animate: false,
            redraw: false,
            size: (width, height),
            pending_size: None,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            frame_index: 0,
        }
    }

    /// Starts scheduling and restarts the clock. A redraw is requested
    /// for the first frame either way.
    pub fn enable(&mut self, animate: bool) {
        self.enabled = true;
        self.animate = animate;
        self.started = self.clock.now();
        self.elapsed = Duration::ZERO;
        self.redraw = true;
        log::debug!("scheduler enabled (animate: {animate})");
    }

    pub fn disable(&mut self) {
        self.enabled = false;
        self.redraw = false;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_animating(&self) -> bool {
        self.enabled && self.animate
    }

    pub fn set_clear_color(&mut self, color: [f32; 4]) {
        self.clear_color = color;
    }

    /// Size applied on the next render.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.pending_size = Some((width, height));
        self.redraw = true;
    }

    /// Latest requested size, applied or not.
    pub fn size(&self) -> (u32, u32) {
        self.pending_size.unwrap_or(self.size)
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Returns and clears the pending redraw request.
    pub fn take_redraw_request(&mut self) -> bool {
        std::mem::take(&mut self.redraw)
    }

    /// Advances the clock and lets the visualization step its state.
    pub fn update(&mut self, vis: &mut dyn Visualization) {
        if !self.enabled {
            return;
        }
        if self.animate {
            self.redraw = true;
        }
        self.elapsed = self.clock.now().saturating_sub(self.started);
        vis.update(self.elapsed.as_secs_f32());
    }

    /// Clears the default framebuffer and runs the three render hooks.
    pub fn render(
        &mut self,
        registry: &mut ResourceRegistry,
        vis: &mut dyn Visualization,
    ) -> Result<FrameContext, GfxError> {
        let resize_occurred = match self.pending_size.take() {
            Some(size) => {
                self.size = size;
                true
            }
            None => false,
        };
        let gpu = registry.gpu_mut();
        gpu.bind_framebuffer(None);
        gpu.viewport(Viewport::sized(self.size.0, self.size.1));
        gpu.clear(self.clear_color, true);

        let frame = FrameContext {
            elapsed_time: self.elapsed.as_secs_f32(),
            viewport_width: self.size.0,
            viewport_height: self.size.1,
            resize_occurred,
            frame_index: self.frame_index,
        };
        self.frame_index += 1;
        vis.begin_render(registry, &frame)?;
        vis.render(registry, &frame)?;
        vis.after_render(registry, &frame)?;
        Ok(frame)
    }

    /// One update and one render; nothing while disabled.
    pub fn tick(
        &mut self,
        registry: &mut ResourceRegistry,
        vis: &mut dyn Visualization,
    ) -> Result<Option<FrameContext>, GfxError> {
        if !self.enabled {
            return Ok(None);
        }
        self.update(vis);
        self.render(registry, vis).map(Some)
    }
}
