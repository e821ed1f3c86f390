// SPDX-License-Identifier: CEPL-1.0
use anyhow::Result;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::time::Duration;

pub mod frame;

pub use frame::{ping_pong, FrameSlot, ImageIndex, ImageSlotTable, MAX_FRAMES_IN_FLIGHT};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// A minimized window reports a zero-area size; nothing can be presented to it.
    pub fn is_zero_area(self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Renderer settings read from the app config.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RenderConfig {
    pub clear_color: [f32; 4],
    /// Force FIFO presentation instead of the low-latency preference order.
    pub vsync: bool,
    /// Upper bound for every CPU wait on a GPU fence. `None` waits forever.
    pub fence_timeout: Option<Duration>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            clear_color: [0.02, 0.02, 0.04, 1.0],
            vsync: false,
            fence_timeout: None,
        }
    }
}

/// What the frame loop needs from the platform window.
pub trait WindowSurface {
    /// Current drawable size in pixels.
    fn extent(&self) -> RenderSize;
    /// True once the platform reported a resize since the last reset.
    fn was_resized(&self) -> bool;
    fn reset_resized_flag(&mut self);
    /// Blocks until the platform has something new to say (used while minimized).
    fn wait_events(&mut self);
}

/// What one call to [`Renderer::render`] did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented,
    /// Nothing reached the screen, e.g. the swapchain was rebuilt instead.
    Skipped,
}

impl FrameOutcome {
    pub fn is_presented(self) -> bool {
        self == FrameOutcome::Presented
    }
}

pub trait Renderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        surface: &mut dyn WindowSurface,
        config: &RenderConfig,
    ) -> Result<Self>
    where
        Self: Sized;

    /// Renders one frame. A frame skipped because the swapchain was rebuilt
    /// is `Ok(FrameOutcome::Skipped)`, not an error.
    fn render(&mut self, surface: &mut dyn WindowSurface) -> Result<FrameOutcome>;
    fn set_clear_color(&mut self, rgba: [f32; 4]);
}
