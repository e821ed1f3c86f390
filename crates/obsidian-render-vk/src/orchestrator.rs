// SPDX-License-Identifier: CEPL-1.0
//! Per-frame protocol on top of [`SwapchainManager`]:
//! acquire → record → (compute) → submit → overlay → present.
//!
//! The orchestrator owns the frame-slot counter; collaborators receive the
//! slot by value through [`FrameHandoff`] and [`ComputeFrame`].

use crate::compute::{self, ComputeDispatch, ComputeFrame};
use crate::device::GpuDevice;
use crate::error::{RenderError, RenderResult};
use crate::handles::CommandBuffers;
use crate::swapchain::{AcquireOutcome, SwapchainManager, SwapchainSettings};
use ash::vk;
use obsidian_render::{
    FrameSlot, ImageIndex, RenderConfig, RenderSize, WindowSurface, MAX_FRAMES_IN_FLIGHT,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FrameState {
    Idle,
    Started {
        image: ImageIndex,
        suboptimal: bool,
        compute_submitted: bool,
        render_pass_open: bool,
    },
}

/// What an overlay pass needs to slot its own submission between the frame's
/// graphics submit and present.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameHandoff {
    pub slot: FrameSlot,
    pub image: ImageIndex,
    /// Signaled by the frame's graphics submission.
    pub render_finished: vk::Semaphore,
}

pub struct FrameOrchestrator<D: GpuDevice> {
    graphics_commands: CommandBuffers<D>,
    compute_commands: CommandBuffers<D>,
    swapchain: SwapchainManager<D>,
    device: Arc<D>,
    settings: SwapchainSettings,
    clear_color: [f32; 4],
    state: FrameState,
    slot: FrameSlot,
    generation: u64,
}

impl<D: GpuDevice> FrameOrchestrator<D> {
    pub fn new(
        device: Arc<D>,
        window: &mut dyn WindowSurface,
        settings: SwapchainSettings,
    ) -> RenderResult<Self> {
        let extent = wait_for_drawable_extent(window);
        let swapchain = SwapchainManager::new(device.clone(), extent, None, settings)?;
        let slots = MAX_FRAMES_IN_FLIGHT as u32;
        let graphics_commands = CommandBuffers::allocate(&device, slots)
            .map_err(RenderError::vulkan("allocate graphics command buffers"))?;
        let compute_commands = CommandBuffers::allocate(&device, slots)
            .map_err(RenderError::vulkan("allocate compute command buffers"))?;

        Ok(Self {
            graphics_commands,
            compute_commands,
            swapchain,
            device,
            settings,
            clear_color: RenderConfig::default().clear_color,
            state: FrameState::Idle,
            slot: FrameSlot::FIRST,
            generation: 0,
        })
    }

    /// Starts a frame and returns its command buffer, already begun.
    ///
    /// `None` means the swapchain was out of date and has been rebuilt; skip
    /// rendering this tick.
    pub fn begin_frame(
        &mut self,
        window: &mut dyn WindowSurface,
    ) -> RenderResult<Option<vk::CommandBuffer>> {
        if self.state != FrameState::Idle {
            return Err(RenderError::FrameOrder(
                "begin_frame called while a frame is in progress",
            ));
        }

        let (image, suboptimal) = match self.swapchain.acquire_next_image(self.slot)? {
            AcquireOutcome::Ready { image, suboptimal } => (image, suboptimal),
            AcquireOutcome::OutOfDate => {
                debug!("acquire reported out of date; rebuilding swapchain");
                self.recreate_swapchain(window)?;
                return Ok(None);
            }
        };

        self.swapchain.wait_for_image_available(image)?;

        let cmd = self.current_command_buffer()?;
        self.device
            .reset_command_buffer(cmd)
            .map_err(RenderError::vulkan("reset graphics command buffer"))?;
        self.device
            .begin_command_buffer(cmd, false)
            .map_err(RenderError::vulkan("begin graphics command buffer"))?;

        self.state = FrameState::Started {
            image,
            suboptimal,
            compute_submitted: false,
            render_pass_open: false,
        };
        Ok(Some(cmd))
    }

    pub fn begin_swapchain_render_pass(&mut self, cmd: vk::CommandBuffer) -> RenderResult<()> {
        let FrameState::Started {
            image,
            render_pass_open,
            ..
        } = self.state
        else {
            return Err(RenderError::FrameOrder(
                "begin_swapchain_render_pass called outside a frame",
            ));
        };
        if render_pass_open {
            return Err(RenderError::FrameOrder("swapchain render pass already open"));
        }
        self.check_frame_command_buffer(cmd)?;

        let extent = self.swapchain.extent();
        self.device.cmd_begin_render_pass(
            cmd,
            self.swapchain.render_pass(),
            self.swapchain.framebuffer(image)?,
            extent,
            self.clear_color,
        );
        // Pipelines bake no viewport, so resizes never force a rebuild for it.
        self.device.cmd_set_viewport_and_scissor(cmd, extent);

        self.set_render_pass_open(true);
        Ok(())
    }

    pub fn end_swapchain_render_pass(&mut self, cmd: vk::CommandBuffer) -> RenderResult<()> {
        match self.state {
            FrameState::Started {
                render_pass_open: true,
                ..
            } => {}
            FrameState::Started { .. } => {
                return Err(RenderError::FrameOrder(
                    "end_swapchain_render_pass without an open render pass",
                ))
            }
            FrameState::Idle => {
                return Err(RenderError::FrameOrder(
                    "end_swapchain_render_pass called outside a frame",
                ))
            }
        }
        self.check_frame_command_buffer(cmd)?;
        self.device.cmd_end_render_pass(cmd);
        self.set_render_pass_open(false);
        Ok(())
    }

    pub fn end_frame(&mut self, window: &mut dyn WindowSurface) -> RenderResult<()> {
        self.end_frame_with(window, |handoff| Ok(handoff.render_finished))
    }

    /// Ends and submits the frame, then lets `overlay` record and submit its
    /// own work before presenting. The overlay returns the semaphore present
    /// waits on; returning `handoff.render_finished` presents directly.
    pub fn end_frame_with<F>(
        &mut self,
        window: &mut dyn WindowSurface,
        overlay: F,
    ) -> RenderResult<()>
    where
        F: FnOnce(FrameHandoff) -> RenderResult<vk::Semaphore>,
    {
        let FrameState::Started {
            image,
            suboptimal,
            compute_submitted,
            render_pass_open,
        } = self.state
        else {
            return Err(RenderError::FrameOrder("end_frame called without begin_frame"));
        };
        if render_pass_open {
            return Err(RenderError::FrameOrder(
                "end_frame called with the swapchain render pass still open",
            ));
        }
        self.state = FrameState::Idle;

        let cmd = self.current_command_buffer()?;
        self.device
            .end_command_buffer(cmd)
            .map_err(RenderError::vulkan("end graphics command buffer"))?;
        self.swapchain
            .submit_without_present(cmd, image, self.slot, compute_submitted)?;

        let handoff = FrameHandoff {
            slot: self.slot,
            image,
            render_finished: self.swapchain.render_finished_semaphore(image)?,
        };
        self.slot = self.slot.next();

        let wait = overlay(handoff)?;
        let outcome = self.swapchain.present(image, wait)?;

        let resized = window.was_resized();
        if outcome.needs_recreate() || suboptimal || resized {
            window.reset_resized_flag();
            debug!(?outcome, suboptimal, resized, "rebuilding swapchain after present");
            self.recreate_swapchain(window)?;
        }
        Ok(())
    }

    /// Rebuilds the swapchain for the window's current extent, blocking while
    /// the window is minimized.
    pub fn recreate_swapchain(&mut self, window: &mut dyn WindowSurface) -> RenderResult<()> {
        if self.state != FrameState::Idle {
            return Err(RenderError::FrameOrder(
                "swapchain recreation requested mid-frame",
            ));
        }
        let extent = wait_for_drawable_extent(window);

        self.device
            .device_wait_idle()
            .map_err(RenderError::vulkan("device_wait_idle"))?;

        let next = SwapchainManager::new(
            self.device.clone(),
            extent,
            Some(&self.swapchain),
            self.settings,
        )?;
        // Checked before installing: on mismatch the current chain, its
        // generation, and the pipelines built for it stay in place.
        if !self.swapchain.compare_formats(&next) {
            let (was, now) = (self.swapchain.formats(), next.formats());
            return Err(RenderError::FormatChanged {
                old_color: was.color,
                new_color: now.color,
                old_depth: was.depth,
                new_depth: now.depth,
            });
        }
        drop(std::mem::replace(&mut self.swapchain, next));

        self.generation += 1;
        info!(
            "swapchain recreated: {}x{} (generation {})",
            self.swapchain.extent().width,
            self.swapchain.extent().height,
            self.generation
        );
        Ok(())
    }

    /// The current slot's compute resources. Only valid inside a frame and
    /// before compute was submitted for it.
    pub fn compute_frame(&self) -> RenderResult<ComputeFrame> {
        match self.state {
            FrameState::Idle => {
                return Err(RenderError::FrameOrder("compute_frame called outside a frame"))
            }
            FrameState::Started {
                compute_submitted: true,
                ..
            } => {
                return Err(RenderError::FrameOrder(
                    "compute already submitted for this frame",
                ))
            }
            FrameState::Started { .. } => {}
        }
        let command_buffer = self
            .compute_commands
            .get(self.slot.index())
            .ok_or(RenderError::FrameOrder("no compute command buffer for slot"))?;
        Ok(ComputeFrame {
            slot: self.slot,
            command_buffer,
            finished: self.swapchain.compute_finished_semaphore(self.slot),
            in_flight: self.swapchain.compute_in_flight_fence(self.slot),
            timeout_ns: self.settings.timeout_ns,
        })
    }

    /// Makes this frame's graphics submission wait on compute-finished.
    pub fn mark_compute_submitted(&mut self) -> RenderResult<()> {
        match &mut self.state {
            FrameState::Started {
                compute_submitted, ..
            } => {
                *compute_submitted = true;
                Ok(())
            }
            FrameState::Idle => Err(RenderError::FrameOrder(
                "mark_compute_submitted called outside a frame",
            )),
        }
    }

    pub fn submit_compute(&mut self, dispatch: &ComputeDispatch<'_>) -> RenderResult<()> {
        let frame = self.compute_frame()?;
        compute::submit_compute(&*self.device, &frame, dispatch)?;
        self.mark_compute_submitted()
    }

    pub fn current_command_buffer(&self) -> RenderResult<vk::CommandBuffer> {
        self.graphics_commands
            .get(self.slot.index())
            .ok_or(RenderError::FrameOrder("no graphics command buffer for slot"))
    }

    pub fn current_frame_index(&self) -> FrameSlot {
        self.slot
    }

    pub fn is_frame_in_progress(&self) -> bool {
        self.state != FrameState::Idle
    }

    /// Bumped on every recreation; consumers rebuild render-pass-bound state
    /// when it changes.
    pub fn swapchain_generation(&self) -> u64 {
        self.generation
    }

    pub fn swapchain(&self) -> &SwapchainManager<D> {
        &self.swapchain
    }

    pub fn device(&self) -> &Arc<D> {
        &self.device
    }

    pub fn compute_finished_semaphores(&self) -> Vec<vk::Semaphore> {
        self.swapchain.compute_finished_semaphores()
    }

    pub fn compute_in_flight_fences(&self) -> Vec<vk::Fence> {
        self.swapchain.compute_in_flight_fences()
    }

    pub fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.clear_color = rgba;
    }

    fn check_frame_command_buffer(&self, cmd: vk::CommandBuffer) -> RenderResult<()> {
        if cmd == self.current_command_buffer()? {
            Ok(())
        } else {
            Err(RenderError::FrameOrder(
                "command buffer does not belong to the current frame",
            ))
        }
    }

    fn set_render_pass_open(&mut self, open: bool) {
        if let FrameState::Started {
            render_pass_open, ..
        } = &mut self.state
        {
            *render_pass_open = open;
        }
    }
}

impl<D: GpuDevice> Drop for FrameOrchestrator<D> {
    fn drop(&mut self) {
        if let Err(e) = self.device.device_wait_idle() {
            warn!("device_wait_idle before swapchain teardown failed: {e}");
        }
    }
}

// A minimized window reports a zero extent; nothing may be created until it
// is drawable again.
fn wait_for_drawable_extent(window: &mut dyn WindowSurface) -> RenderSize {
    let mut extent = window.extent();
    while extent.is_zero_area() {
        window.wait_events();
        extent = window.extent();
    }
    extent
}
