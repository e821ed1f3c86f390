// SPDX-License-Identifier: CEPL-1.0
//! Presentable image chain plus everything whose lifetime follows it:
//! views, per-image depth, the shared MSAA target, the render pass,
//! framebuffers and all frame/image synchronization objects.

use crate::device::{
    DeviceImage, GpuDevice, ImageDesc, QueueKind, RenderPassDesc, Submission, SwapchainDesc,
};
use crate::error::{RenderError, RenderResult};
use crate::handles::Owned;
use ash::prelude::VkResult;
use ash::vk;
use obsidian_render::{
    FrameSlot, ImageIndex, ImageSlotTable, RenderConfig, RenderSize, MAX_FRAMES_IN_FLIGHT,
};
use std::sync::Arc;
use tracing::{debug, info};

pub const PREFERRED_SURFACE_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::B8G8R8A8_SRGB,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

/// Depth formats in priority order; the first one usable as an attachment wins.
pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PresentPolicy {
    /// Mailbox, then immediate, then FIFO.
    #[default]
    LowLatency,
    /// Always FIFO.
    Vsync,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SwapchainSettings {
    pub present_policy: PresentPolicy,
    /// Bound for fence waits and image acquisition, in nanoseconds.
    pub timeout_ns: u64,
}

impl SwapchainSettings {
    pub fn from_config(config: &RenderConfig) -> Self {
        Self {
            present_policy: if config.vsync {
                PresentPolicy::Vsync
            } else {
                PresentPolicy::LowLatency
            },
            timeout_ns: config
                .fence_timeout
                .map_or(u64::MAX, |t| u64::try_from(t.as_nanos()).unwrap_or(u64::MAX)),
        }
    }
}

impl Default for SwapchainSettings {
    fn default() -> Self {
        Self {
            present_policy: PresentPolicy::LowLatency,
            timeout_ns: u64::MAX,
        }
    }
}

pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .copied()
        .find(|f| {
            f.format == PREFERRED_SURFACE_FORMAT.format
                && f.color_space == PREFERRED_SURFACE_FORMAT.color_space
        })
        .or_else(|| formats.first().copied())
}

/// Every surface supports FIFO, so it is the fallback for every policy.
pub fn choose_present_mode(
    modes: &[vk::PresentModeKHR],
    policy: PresentPolicy,
) -> vk::PresentModeKHR {
    let preferred: &[vk::PresentModeKHR] = match policy {
        PresentPolicy::LowLatency => &[vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE],
        PresentPolicy::Vsync => &[],
    };
    preferred
        .iter()
        .copied()
        .find(|m| modes.contains(m))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// `current_extent.width == u32::MAX` means the surface lets the swapchain decide.
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, window: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: window
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: window
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

/// One more than the minimum; `max_image_count == 0` means unbounded.
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let wanted = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        wanted.min(caps.max_image_count)
    } else {
        wanted
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChainFormats {
    pub color: vk::Format,
    pub depth: vk::Format,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    Ready { image: ImageIndex, suboptimal: bool },
    OutOfDate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Suboptimal,
    OutOfDate,
}

impl PresentOutcome {
    pub fn needs_recreate(self) -> bool {
        !matches!(self, PresentOutcome::Presented)
    }
}

fn semaphores<D: GpuDevice>(device: &Arc<D>, count: usize) -> VkResult<Vec<Owned<D, vk::Semaphore>>> {
    (0..count)
        .map(|_| Owned::create(device, device.create_semaphore()))
        .collect()
}

fn signaled_fences<D: GpuDevice>(device: &Arc<D>, count: usize) -> VkResult<Vec<Owned<D, vk::Fence>>> {
    (0..count)
        .map(|_| Owned::create(device, device.create_fence(true)))
        .collect()
}

// Field order is release order: semaphores before fences.
struct SyncObjects<D: GpuDevice> {
    /// Indexed by frame slot.
    image_available: Vec<Owned<D, vk::Semaphore>>,
    /// Indexed by image.
    render_finished: Vec<Owned<D, vk::Semaphore>>,
    /// Indexed by frame slot.
    compute_finished: Vec<Owned<D, vk::Semaphore>>,
    in_flight: Vec<Owned<D, vk::Fence>>,
    compute_in_flight: Vec<Owned<D, vk::Fence>>,
}

impl<D: GpuDevice> SyncObjects<D> {
    fn new(device: &Arc<D>, image_count: usize) -> VkResult<Self> {
        // Slot-indexed semaphores live in image-count arrays; never shorter than the slot count.
        let slot_indexed = image_count.max(MAX_FRAMES_IN_FLIGHT);
        Ok(Self {
            image_available: semaphores(device, slot_indexed)?,
            render_finished: semaphores(device, image_count)?,
            compute_finished: semaphores(device, slot_indexed)?,
            // Created signaled so the first wait on each slot returns immediately.
            in_flight: signaled_fences(device, MAX_FRAMES_IN_FLIGHT)?,
            compute_in_flight: signaled_fences(device, MAX_FRAMES_IN_FLIGHT)?,
        })
    }
}

/// One swapchain generation.
///
/// Fields are declared in teardown order: image views, swapchain, depth,
/// MSAA target, framebuffers, render pass, semaphores, fences.
pub struct SwapchainManager<D: GpuDevice> {
    image_views: Vec<Owned<D, vk::ImageView>>,
    swapchain: Owned<D, vk::SwapchainKHR>,
    depth_views: Vec<Owned<D, vk::ImageView>>,
    depth_images: Vec<Owned<D, DeviceImage>>,
    msaa_view: Owned<D, vk::ImageView>,
    msaa_image: Owned<D, DeviceImage>,
    framebuffers: Vec<Owned<D, vk::Framebuffer>>,
    render_pass: Owned<D, vk::RenderPass>,
    sync: SyncObjects<D>,

    device: Arc<D>,
    images: Vec<vk::Image>,
    images_in_flight: ImageSlotTable,
    surface_format: vk::SurfaceFormatKHR,
    depth_format: vk::Format,
    present_mode: vk::PresentModeKHR,
    extent: vk::Extent2D,
    settings: SwapchainSettings,
}

impl<D: GpuDevice> SwapchainManager<D> {
    /// Builds a new chain. `previous` is only used as the driver's
    /// `oldSwapchain` hint; the caller still owns and releases it.
    pub fn new(
        device: Arc<D>,
        window_extent: RenderSize,
        previous: Option<&SwapchainManager<D>>,
        settings: SwapchainSettings,
    ) -> RenderResult<Self> {
        // STRICT ORDER: every step consumes what the previous one chose.
        let support = device
            .swapchain_support()
            .map_err(RenderError::surface("surface support query"))?;
        let surface_format = choose_surface_format(&support.formats)
            .ok_or(RenderError::FormatNegotiation("surface reports no formats"))?;
        let present_mode = choose_present_mode(&support.present_modes, settings.present_policy);
        let caps = &support.capabilities;
        let extent = choose_extent(caps, window_extent);
        let min_image_count = choose_image_count(caps);
        let old_swapchain = previous.map_or(vk::SwapchainKHR::null(), |p| p.swapchain.handle());

        let swapchain = Owned::create(
            &device,
            device.create_swapchain(&SwapchainDesc {
                min_image_count,
                surface_format,
                extent,
                present_mode,
                pre_transform: caps.current_transform,
                old_swapchain,
            }),
        )
        .map_err(RenderError::surface("create_swapchain"))?;

        // The driver may hand back more images than requested.
        let images = device
            .swapchain_images(swapchain.handle())
            .map_err(RenderError::surface("get_swapchain_images"))?;

        let image_views = images
            .iter()
            .map(|&image| {
                Owned::create(
                    &device,
                    device.create_image_view(
                        image,
                        surface_format.format,
                        vk::ImageAspectFlags::COLOR,
                        1,
                    ),
                )
            })
            .collect::<VkResult<Vec<_>>>()
            .map_err(RenderError::vulkan("swapchain image views"))?;

        let depth_format = device
            .find_supported_format(
                &DEPTH_FORMAT_CANDIDATES,
                vk::ImageTiling::OPTIMAL,
                vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
            )
            .ok_or(RenderError::FormatNegotiation(
                "no supported depth attachment format",
            ))?;
        let samples = device.msaa_samples();

        let render_pass = Owned::create(
            &device,
            device.create_render_pass(&RenderPassDesc {
                color_format: surface_format.format,
                depth_format,
                samples,
            }),
        )
        .map_err(RenderError::vulkan("create_render_pass"))?;

        let depth_desc = ImageDesc {
            extent,
            format: depth_format,
            samples,
            usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            mip_levels: 1,
        };
        let depth_images = images
            .iter()
            .map(|_| Owned::create(&device, device.create_image(&depth_desc)))
            .collect::<VkResult<Vec<_>>>()
            .map_err(RenderError::vulkan("depth images"))?;
        let depth_views = depth_images
            .iter()
            .map(|depth| {
                Owned::create(
                    &device,
                    device.create_image_view(depth.image, depth_format, vk::ImageAspectFlags::DEPTH, 1),
                )
            })
            .collect::<VkResult<Vec<_>>>()
            .map_err(RenderError::vulkan("depth image views"))?;

        // One transient multisampled target shared by every framebuffer.
        let msaa_image = Owned::create(
            &device,
            device.create_image(&ImageDesc {
                extent,
                format: surface_format.format,
                samples,
                usage: vk::ImageUsageFlags::TRANSIENT_ATTACHMENT
                    | vk::ImageUsageFlags::COLOR_ATTACHMENT,
                mip_levels: 1,
            }),
        )
        .map_err(RenderError::vulkan("msaa color image"))?;
        let msaa_view = Owned::create(
            &device,
            device.create_image_view(
                msaa_image.image,
                surface_format.format,
                vk::ImageAspectFlags::COLOR,
                1,
            ),
        )
        .map_err(RenderError::vulkan("msaa color view"))?;

        // Attachment order matches the render pass: msaa color, depth, resolve.
        let framebuffers = image_views
            .iter()
            .zip(&depth_views)
            .map(|(view, depth)| {
                Owned::create(
                    &device,
                    device.create_framebuffer(
                        render_pass.handle(),
                        &[msaa_view.handle(), depth.handle(), view.handle()],
                        extent,
                    ),
                )
            })
            .collect::<VkResult<Vec<_>>>()
            .map_err(RenderError::vulkan("framebuffers"))?;

        let sync = SyncObjects::new(&device, images.len()).map_err(RenderError::SyncObject)?;

        info!(
            "swapchain: format={:?} color_space={:?} depth={:?} present={:?} extent={}x{} images={} samples={:?}",
            surface_format.format,
            surface_format.color_space,
            depth_format,
            present_mode,
            extent.width,
            extent.height,
            images.len(),
            samples,
        );

        Ok(Self {
            image_views,
            swapchain,
            depth_views,
            depth_images,
            msaa_view,
            msaa_image,
            framebuffers,
            render_pass,
            sync,
            device,
            images_in_flight: ImageSlotTable::new(images.len()),
            images,
            surface_format,
            depth_format,
            present_mode,
            extent,
            settings,
        })
    }

    /// Waits for `slot` to retire, then asks the presentation engine for an image.
    pub fn acquire_next_image(&self, slot: FrameSlot) -> RenderResult<AcquireOutcome> {
        self.device
            .wait_for_fence(self.sync.in_flight[slot.index()].handle(), self.settings.timeout_ns)
            .map_err(RenderError::vulkan("frame fence wait"))?;

        match self.device.acquire_next_image(
            self.swapchain.handle(),
            self.settings.timeout_ns,
            self.sync.image_available[slot.index()].handle(),
        ) {
            Ok((index, suboptimal)) => Ok(AcquireOutcome::Ready {
                image: ImageIndex::new(index),
                suboptimal,
            }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(e) => Err(RenderError::vulkan("acquire_next_image")(e)),
        }
    }

    /// Blocks while an earlier frame slot still renders into `image`.
    pub fn wait_for_image_available(&self, image: ImageIndex) -> RenderResult<()> {
        self.check_image(image)?;
        let Some(owner) = self.images_in_flight.owner(image) else {
            return Ok(());
        };
        let fence = self.sync.in_flight[owner.index()].handle();
        let signaled = self
            .device
            .fence_signaled(fence)
            .map_err(RenderError::vulkan("image fence status"))?;
        if !signaled {
            debug!("{image} still in flight on {owner}; waiting");
            self.device
                .wait_for_fence(fence, self.settings.timeout_ns)
                .map_err(RenderError::vulkan("image fence wait"))?;
        }
        Ok(())
    }

    /// Submits graphics work for `image` on `slot` without presenting.
    ///
    /// Waits on compute-finished(slot) at vertex input when `wait_compute`,
    /// and on image-available(slot) at color output; signals
    /// render-finished(image) and the slot's fence.
    pub fn submit_without_present(
        &mut self,
        cmd: vk::CommandBuffer,
        image: ImageIndex,
        slot: FrameSlot,
        wait_compute: bool,
    ) -> RenderResult<()> {
        self.wait_for_image_available(image)?;
        self.images_in_flight.assign(image, slot);

        let mut waits = Vec::with_capacity(2);
        if wait_compute {
            waits.push((
                self.sync.compute_finished[slot.index()].handle(),
                vk::PipelineStageFlags::VERTEX_INPUT,
            ));
        }
        waits.push((
            self.sync.image_available[slot.index()].handle(),
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        ));
        let signals = [self.render_finished_semaphore(image)?];
        let command_buffers = [cmd];
        let fence = self.sync.in_flight[slot.index()].handle();

        self.device
            .reset_fence(fence)
            .map_err(RenderError::vulkan("frame fence reset"))?;
        self.device
            .queue_submit(
                QueueKind::Graphics,
                &Submission {
                    waits: &waits,
                    command_buffers: &command_buffers,
                    signals: &signals,
                },
                fence,
            )
            .map_err(RenderError::vulkan("graphics queue submit"))
    }

    pub fn present(&self, image: ImageIndex, wait: vk::Semaphore) -> RenderResult<PresentOutcome> {
        self.check_image(image)?;
        match self
            .device
            .queue_present(self.swapchain.handle(), image.get(), wait)
        {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) => Ok(PresentOutcome::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
            Err(e) => Err(RenderError::vulkan("queue_present")(e)),
        }
    }

    /// Submit and present in one go, presenting on render-finished(image).
    pub fn submit_command_buffers(
        &mut self,
        cmd: vk::CommandBuffer,
        image: ImageIndex,
        slot: FrameSlot,
        wait_compute: bool,
    ) -> RenderResult<PresentOutcome> {
        self.submit_without_present(cmd, image, slot, wait_compute)?;
        let render_finished = self.render_finished_semaphore(image)?;
        self.present(image, render_finished)
    }

    fn check_image(&self, image: ImageIndex) -> RenderResult<()> {
        if image.as_usize() < self.images.len() {
            Ok(())
        } else {
            Err(RenderError::FrameOrder(
                "image index does not belong to this swapchain",
            ))
        }
    }

    pub fn render_finished_semaphore(&self, image: ImageIndex) -> RenderResult<vk::Semaphore> {
        self.check_image(image)?;
        Ok(self.sync.render_finished[image.as_usize()].handle())
    }

    pub fn image_available_semaphore(&self, slot: FrameSlot) -> vk::Semaphore {
        self.sync.image_available[slot.index()].handle()
    }

    pub fn compute_finished_semaphore(&self, slot: FrameSlot) -> vk::Semaphore {
        self.sync.compute_finished[slot.index()].handle()
    }

    pub fn compute_in_flight_fence(&self, slot: FrameSlot) -> vk::Fence {
        self.sync.compute_in_flight[slot.index()].handle()
    }

    pub fn compute_finished_semaphores(&self) -> Vec<vk::Semaphore> {
        self.sync
            .compute_finished
            .iter()
            .map(Owned::handle)
            .collect()
    }

    pub fn compute_in_flight_fences(&self) -> Vec<vk::Fence> {
        self.sync
            .compute_in_flight
            .iter()
            .map(Owned::handle)
            .collect()
    }

    pub fn framebuffer(&self, image: ImageIndex) -> RenderResult<vk::Framebuffer> {
        self.check_image(image)?;
        Ok(self.framebuffers[image.as_usize()].handle())
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass.handle()
    }

    pub fn image_views(&self) -> Vec<vk::ImageView> {
        self.image_views.iter().map(Owned::handle).collect()
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn image_format(&self) -> vk::Format {
        self.surface_format.format
    }

    pub fn depth_format(&self) -> vk::Format {
        self.depth_format
    }

    pub fn formats(&self) -> ChainFormats {
        ChainFormats {
            color: self.surface_format.format,
            depth: self.depth_format,
        }
    }

    /// True when `other` can replace this chain without rebuilding pipelines.
    pub fn compare_formats(&self, other: &SwapchainManager<D>) -> bool {
        self.formats() == other.formats()
    }

    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn extent_aspect_ratio(&self) -> f32 {
        self.extent.width as f32 / self.extent.height.max(1) as f32
    }

    pub fn settings(&self) -> SwapchainSettings {
        self.settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{default_support, Call, MockGpu, ObjKind};
    use ash::vk::Handle;

    fn bounded_caps() -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 100,
                height: 100,
            },
            max_image_extent: vk::Extent2D {
                width: 800,
                height: 600,
            },
            ..Default::default()
        }
    }

    fn build(gpu: &Arc<MockGpu>) -> RenderResult<SwapchainManager<MockGpu>> {
        SwapchainManager::new(
            gpu.clone(),
            RenderSize::new(800, 600),
            None,
            SwapchainSettings::default(),
        )
    }

    #[test]
    fn present_mode_fallback_order() {
        use vk::PresentModeKHR as P;
        let low = PresentPolicy::LowLatency;
        assert_eq!(choose_present_mode(&[P::FIFO], low), P::FIFO);
        assert_eq!(choose_present_mode(&[P::MAILBOX, P::FIFO], low), P::MAILBOX);
        assert_eq!(choose_present_mode(&[P::IMMEDIATE, P::FIFO], low), P::IMMEDIATE);
        assert_eq!(
            choose_present_mode(&[P::FIFO, P::IMMEDIATE, P::MAILBOX], low),
            P::MAILBOX
        );
        assert_eq!(
            choose_present_mode(&[P::MAILBOX, P::FIFO], PresentPolicy::Vsync),
            P::FIFO
        );
    }

    #[test]
    fn undefined_extent_clamps_to_surface_bounds() {
        let caps = bounded_caps();
        let big = choose_extent(&caps, RenderSize::new(1920, 1080));
        assert_eq!((big.width, big.height), (800, 600));
        let small = choose_extent(&caps, RenderSize::new(50, 50));
        assert_eq!((small.width, small.height), (100, 100));
    }

    #[test]
    fn defined_current_extent_wins_over_window() {
        let caps = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: 640,
                height: 480,
            },
            ..bounded_caps()
        };
        let e = choose_extent(&caps, RenderSize::new(1920, 1080));
        assert_eq!((e.width, e.height), (640, 480));
    }

    #[test]
    fn image_count_is_min_plus_one_clamped() {
        let mut caps = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            ..Default::default()
        };
        assert_eq!(choose_image_count(&caps), 3);
        caps.max_image_count = 2;
        assert_eq!(choose_image_count(&caps), 2);
    }

    #[test]
    fn surface_format_prefers_srgb_bgra_else_first() {
        let unorm = vk::SurfaceFormatKHR {
            format: vk::Format::R8G8B8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        let chosen = choose_surface_format(&[unorm, PREFERRED_SURFACE_FORMAT]).unwrap();
        assert_eq!(chosen.format, vk::Format::B8G8R8A8_SRGB);
        let fallback = choose_surface_format(&[unorm]).unwrap();
        assert_eq!(fallback.format, vk::Format::R8G8B8A8_UNORM);
        assert!(choose_surface_format(&[]).is_none());
    }

    #[test]
    fn construction_builds_one_of_each_per_image() {
        let gpu = Arc::new(MockGpu::new());
        let chain = build(&gpu).unwrap();
        assert_eq!(chain.image_count(), 3);
        assert_eq!(chain.depth_format(), vk::Format::D32_SFLOAT);
        assert_eq!(chain.present_mode(), vk::PresentModeKHR::MAILBOX);
        // 3 swapchain views + 3 depth views + 1 msaa view
        assert_eq!(gpu.live_of(ObjKind::ImageView), 7);
        // 3 depth images + 1 msaa image
        assert_eq!(gpu.live_of(ObjKind::Image), 4);
        assert_eq!(gpu.live_of(ObjKind::Framebuffer), 3);
        assert_eq!(gpu.live_of(ObjKind::RenderPass), 1);
        // image-available(3) + render-finished(3) + compute-finished(3)
        assert_eq!(gpu.live_of(ObjKind::Semaphore), 9);
        assert_eq!(gpu.live_of(ObjKind::Fence), 2 * MAX_FRAMES_IN_FLIGHT);
        for fence in chain.compute_in_flight_fences() {
            assert!(gpu.fence_is_signaled(fence));
        }
    }

    #[test]
    fn slot_indexed_semaphores_cover_every_slot_with_few_images() {
        let gpu = Arc::new(MockGpu::new());
        gpu.set_image_count(1);
        let chain = build(&gpu).unwrap();
        assert_eq!(chain.compute_finished_semaphores().len(), MAX_FRAMES_IN_FLIGHT);
        for slot in FrameSlot::all() {
            assert!(matches!(
                chain.acquire_next_image(slot),
                Ok(AcquireOutcome::Ready { .. })
            ));
        }
    }

    #[test]
    fn recreation_passes_old_handle_as_hint() {
        let gpu = Arc::new(MockGpu::new());
        let first = build(&gpu).unwrap();
        let second = SwapchainManager::new(
            gpu.clone(),
            RenderSize::new(800, 600),
            Some(&first),
            SwapchainSettings::default(),
        )
        .unwrap();
        let olds: Vec<u64> = gpu
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::CreateSwapchain { old, .. } => Some(old),
                _ => None,
            })
            .collect();
        assert_eq!(olds, vec![0, first.swapchain.handle().as_raw()]);
        assert!(first.compare_formats(&second));
    }

    #[test]
    fn failures_map_to_distinct_kinds_and_leak_nothing() {
        let gpu = Arc::new(MockGpu::new());
        gpu.fail_support_query(vk::Result::ERROR_SURFACE_LOST_KHR);
        assert!(matches!(build(&gpu), Err(RenderError::SurfaceInit { .. })));

        let mut support = default_support();
        support.formats.clear();
        gpu.set_support(support);
        assert!(matches!(build(&gpu), Err(RenderError::FormatNegotiation(_))));
        gpu.set_support(default_support());

        gpu.set_depth_formats(&[]);
        assert!(matches!(build(&gpu), Err(RenderError::FormatNegotiation(_))));
        assert_eq!(gpu.live_count(), 0, "partial chain released");
        gpu.set_depth_formats(&[vk::Format::D24_UNORM_S8_UINT]);

        gpu.fail_next(ObjKind::Swapchain);
        assert!(matches!(build(&gpu), Err(RenderError::SurfaceInit { .. })));

        gpu.fail_next(ObjKind::Semaphore);
        assert!(matches!(build(&gpu), Err(RenderError::SyncObject(_))));

        gpu.fail_next(ObjKind::Framebuffer);
        assert!(matches!(
            build(&gpu),
            Err(RenderError::Vulkan { what: "framebuffers", .. })
        ));
        assert_eq!(gpu.live_count(), 0);

        let chain = build(&gpu).unwrap();
        assert_eq!(chain.depth_format(), vk::Format::D24_UNORM_S8_UINT);
    }

    #[test]
    fn teardown_follows_declared_order() {
        let gpu = Arc::new(MockGpu::new());
        let chain = build(&gpu).unwrap();
        gpu.clear_calls();
        drop(chain);

        let mut kinds: Vec<ObjKind> = gpu
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Destroy(kind, _) => Some(kind),
                _ => None,
            })
            .collect();
        kinds.dedup();
        assert_eq!(
            kinds,
            vec![
                ObjKind::ImageView,
                ObjKind::Swapchain,
                ObjKind::ImageView,
                ObjKind::Image,
                ObjKind::ImageView,
                ObjKind::Image,
                ObjKind::Framebuffer,
                ObjKind::RenderPass,
                ObjKind::Semaphore,
                ObjKind::Fence,
            ]
        );
        assert_eq!(gpu.live_count(), 0);
    }

    #[test]
    fn acquire_waits_slot_fence_and_signals_slot_semaphore() {
        let gpu = Arc::new(MockGpu::new());
        let chain = build(&gpu).unwrap();
        gpu.clear_calls();
        let slot = FrameSlot::FIRST.next();

        let outcome = chain.acquire_next_image(slot).unwrap();
        assert_eq!(
            outcome,
            AcquireOutcome::Ready {
                image: ImageIndex::new(0),
                suboptimal: false
            }
        );
        assert_eq!(
            gpu.calls(),
            vec![
                Call::WaitFence(chain.sync.in_flight[1].handle().as_raw()),
                Call::Acquire {
                    semaphore: chain.sync.image_available[1].handle().as_raw()
                },
            ]
        );
    }

    #[test]
    fn acquire_and_present_classify_staleness() {
        let gpu = Arc::new(MockGpu::new());
        let chain = build(&gpu).unwrap();

        gpu.push_acquire(Err(vk::Result::ERROR_OUT_OF_DATE_KHR));
        assert_eq!(
            chain.acquire_next_image(FrameSlot::FIRST).unwrap(),
            AcquireOutcome::OutOfDate
        );
        gpu.push_acquire(Ok((2, true)));
        assert_eq!(
            chain.acquire_next_image(FrameSlot::FIRST).unwrap(),
            AcquireOutcome::Ready {
                image: ImageIndex::new(2),
                suboptimal: true
            }
        );
        gpu.push_acquire(Err(vk::Result::ERROR_SURFACE_LOST_KHR));
        assert!(matches!(
            chain.acquire_next_image(FrameSlot::FIRST),
            Err(RenderError::Vulkan { .. })
        ));

        let img = ImageIndex::new(0);
        let sem = chain.render_finished_semaphore(img).unwrap();
        gpu.push_present(Ok(true));
        gpu.push_present(Err(vk::Result::ERROR_OUT_OF_DATE_KHR));
        gpu.push_present(Err(vk::Result::ERROR_DEVICE_LOST));
        assert_eq!(chain.present(img, sem).unwrap(), PresentOutcome::Suboptimal);
        assert_eq!(chain.present(img, sem).unwrap(), PresentOutcome::OutOfDate);
        assert!(chain.present(img, sem).unwrap_err().is_device_lost());
        assert_eq!(chain.present(img, sem).unwrap(), PresentOutcome::Presented);
    }

    #[test]
    fn fence_timeout_is_reported_not_hung() {
        let gpu = Arc::new(MockGpu::new());
        let chain = build(&gpu).unwrap();
        gpu.fail_next_wait(vk::Result::TIMEOUT);
        assert!(matches!(
            chain.acquire_next_image(FrameSlot::FIRST),
            Err(RenderError::Timeout("frame fence wait"))
        ));
    }

    #[test]
    fn settings_follow_render_config() {
        let config = RenderConfig {
            vsync: true,
            fence_timeout: Some(std::time::Duration::from_millis(250)),
            ..RenderConfig::default()
        };
        let settings = SwapchainSettings::from_config(&config);
        assert_eq!(settings.present_policy, PresentPolicy::Vsync);
        assert_eq!(settings.timeout_ns, 250_000_000);
        assert_eq!(
            SwapchainSettings::from_config(&RenderConfig::default()),
            SwapchainSettings::default()
        );
    }

    #[test]
    fn stale_image_index_is_rejected() {
        let gpu = Arc::new(MockGpu::new());
        let chain = build(&gpu).unwrap();
        assert!(matches!(
            chain.framebuffer(ImageIndex::new(9)),
            Err(RenderError::FrameOrder(_))
        ));
    }
}
