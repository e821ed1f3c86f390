// SPDX-License-Identifier: CEPL-1.0
use crate::context::VkContext;
use crate::device::GpuDevice;
use crate::error::{RenderError, RenderResult};
use crate::orchestrator::FrameOrchestrator;
use crate::particles::ParticleSystem;
use crate::pipeline::PipelineCache;
use crate::swapchain::SwapchainSettings;
use anyhow::Result;
use obsidian_render::{FrameOutcome, RenderConfig, Renderer, WindowSurface};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Longest simulation step; a stalled frame must not fling particles away.
const MAX_STEP_SECS: f32 = 0.05;

/// Vulkan renderer: particle compute feeding a point draw each frame.
///
/// STRICT ORDER on teardown: wait idle, then particles, frames, pipeline
/// cache, and the context last (field order below).
pub struct VkRenderer {
    particles: ParticleSystem<VkContext>,
    frames: FrameOrchestrator<VkContext>,
    pipeline_cache: PipelineCache,
    ctx: Arc<VkContext>,
    last_tick: Instant,
}

/// Loader, instance, surface and device. Failures here mean the machine
/// cannot run the renderer at all, so they keep their own error kind.
fn bootstrap(window: &dyn HasWindowHandle, display: &dyn HasDisplayHandle) -> RenderResult<VkContext> {
    VkContext::new(window, display).map_err(RenderError::Platform)
}

impl VkRenderer {
    fn step_seconds(&mut self) -> f32 {
        let now = Instant::now();
        let dt = now.duration_since(self.last_tick).as_secs_f32();
        self.last_tick = now;
        dt.min(MAX_STEP_SECS)
    }
}

impl Renderer for VkRenderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        surface: &mut dyn WindowSurface,
        config: &RenderConfig,
    ) -> Result<Self> {
        let ctx = Arc::new(bootstrap(window, display)?);
        let pipeline_cache = PipelineCache::load(&ctx)?;

        let settings = SwapchainSettings::from_config(config);
        let mut frames = FrameOrchestrator::new(ctx.clone(), surface, settings)?;
        frames.set_clear_color(config.clear_color);

        let particles = ParticleSystem::new(
            &ctx,
            &pipeline_cache,
            frames.swapchain().render_pass(),
            frames.swapchain_generation(),
            settings.timeout_ns,
        )?;

        info!(
            "vk renderer ready: {:?} {}x{}, {:?}",
            frames.swapchain().image_format(),
            frames.swapchain().extent().width,
            frames.swapchain().extent().height,
            frames.swapchain().present_mode(),
        );
        Ok(Self {
            particles,
            frames,
            pipeline_cache,
            ctx,
            last_tick: Instant::now(),
        })
    }

    fn render(&mut self, surface: &mut dyn WindowSurface) -> Result<FrameOutcome> {
        let generation = self.frames.swapchain_generation();
        if self.particles.needs_rebuild(generation) {
            self.particles.rebuild_graphics(
                &self.ctx,
                &self.pipeline_cache,
                self.frames.swapchain().render_pass(),
                generation,
            )?;
        }

        let Some(cmd) = self.frames.begin_frame(surface)? else {
            // Swapchain was rebuilt; the pipeline follows next frame.
            return Ok(FrameOutcome::Skipped);
        };
        let slot = self.frames.current_frame_index();

        let dt = self.step_seconds();
        let push = dt.to_ne_bytes();
        let dispatch = self.particles.compute_dispatch(slot, &push);
        self.frames.submit_compute(&dispatch)?;

        self.frames.begin_swapchain_render_pass(cmd)?;
        self.particles
            .record_draw(&self.ctx, cmd, slot, self.frames.swapchain_generation())?;
        self.frames.end_swapchain_render_pass(cmd)?;
        self.frames.end_frame(surface)?;
        Ok(FrameOutcome::Presented)
    }

    fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.frames.set_clear_color(rgba);
    }
}

impl Drop for VkRenderer {
    fn drop(&mut self) {
        if let Err(e) = self.ctx.device_wait_idle() {
            warn!("device_wait_idle on shutdown: {e}");
        }
    }
}
