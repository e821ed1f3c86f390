// SPDX-License-Identifier: CEPL-1.0
//! Window glue between winit and the render core.

pub use winit;

use obsidian_render::{RenderSize, WindowSurface};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use winit::dpi::PhysicalSize;
use winit::window::Window;

/// How long [`PlatformWindow::wait_events`] sleeps before the size is re-read.
/// winit delivers events only between handler calls, so a blocked handler
/// polls the OS size instead.
pub const WAIT_POLL: Duration = Duration::from_millis(16);

pub fn render_size(size: PhysicalSize<u32>) -> RenderSize {
    RenderSize::new(size.width, size.height)
}

/// Resize bookkeeping, kept apart from the winit window so it can be tested.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ResizeState {
    last_size: RenderSize,
    resized: bool,
}

impl ResizeState {
    pub fn new(size: RenderSize) -> Self {
        Self {
            last_size: size,
            resized: false,
        }
    }

    /// Records a platform resize. Reports of the current size are ignored.
    pub fn note(&mut self, size: RenderSize) {
        if size != self.last_size {
            self.last_size = size;
            self.resized = true;
        }
    }

    pub fn last_size(&self) -> RenderSize {
        self.last_size
    }

    pub fn take(&mut self) -> bool {
        std::mem::take(&mut self.resized)
    }

    pub fn pending(&self) -> bool {
        self.resized
    }
}

/// A winit window as the frame loop sees it.
pub struct PlatformWindow {
    window: Arc<Window>,
    resize: ResizeState,
}

impl PlatformWindow {
    pub fn new(window: Arc<Window>) -> Self {
        let resize = ResizeState::new(render_size(window.inner_size()));
        Self { window, resize }
    }

    pub fn window(&self) -> &Arc<Window> {
        &self.window
    }

    /// Call from `WindowEvent::Resized`.
    pub fn note_resized(&mut self, size: PhysicalSize<u32>) {
        self.resize.note(render_size(size));
    }

    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }
}

impl WindowSurface for PlatformWindow {
    fn extent(&self) -> RenderSize {
        render_size(self.window.inner_size())
    }

    fn was_resized(&self) -> bool {
        self.resize.pending()
    }

    fn reset_resized_flag(&mut self) {
        self.resize.take();
    }

    fn wait_events(&mut self) {
        std::thread::sleep(WAIT_POLL);
        let size = self.extent();
        debug!("waiting for a drawable window, now {}x{}", size.width, size.height);
        self.resize.note(size);
    }
}
