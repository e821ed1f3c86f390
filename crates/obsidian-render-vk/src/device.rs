// SPDX-License-Identifier: CEPL-1.0
//! The seam between the frame core and the GPU.
//!
//! Swapchain management, frame orchestration, the compute handoff and staging
//! uploads only ever talk to a [`GpuDevice`]. [`crate::VkContext`] implements
//! it on top of ash; tests drive the same code through a scripted timeline.
//! Handles are plain `ash::vk` handles, creation parameters are small
//! descriptors instead of raw create-info structs.

use ash::prelude::VkResult;
use ash::vk;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueKind {
    Graphics,
    Compute,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    /// Family used for both graphics and compute work.
    pub graphics_compute: u32,
    pub present: u32,
}

/// Surface facts queried before every swapchain build.
#[derive(Clone, Debug, Default)]
pub struct SwapchainSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

#[derive(Clone, Copy, Debug)]
pub struct SwapchainDesc {
    pub min_image_count: u32,
    pub surface_format: vk::SurfaceFormatKHR,
    pub extent: vk::Extent2D,
    pub present_mode: vk::PresentModeKHR,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
    /// Retiring swapchain, or null on first build.
    pub old_swapchain: vk::SwapchainKHR,
}

/// A 2D optimal-tiling image backed by its own device-local allocation.
#[derive(Clone, Copy, Debug)]
pub struct ImageDesc {
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub samples: vk::SampleCountFlags,
    pub usage: vk::ImageUsageFlags,
    pub mip_levels: u32,
}

/// Multisampled color + depth, resolved into a single-sample presentable image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderPassDesc {
    pub color_format: vk::Format,
    pub depth_format: vk::Format,
    pub samples: vk::SampleCountFlags,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceImage {
    pub image: vk::Image,
    pub memory: vk::DeviceMemory,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceBuffer {
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: vk::DeviceSize,
}

/// One queue submission: semaphores waited at stages, buffers, semaphores signaled.
#[derive(Clone, Copy, Debug)]
pub struct Submission<'a> {
    pub waits: &'a [(vk::Semaphore, vk::PipelineStageFlags)],
    pub command_buffers: &'a [vk::CommandBuffer],
    pub signals: &'a [vk::Semaphore],
}

#[derive(Clone, Copy, Debug)]
pub struct ImageBarrier {
    pub image: vk::Image,
    pub aspect: vk::ImageAspectFlags,
    pub mip_levels: u32,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

pub trait GpuDevice {
    // Queries.
    fn swapchain_support(&self) -> VkResult<SwapchainSupport>;
    fn find_supported_format(
        &self,
        candidates: &[vk::Format],
        tiling: vk::ImageTiling,
        features: vk::FormatFeatureFlags,
    ) -> Option<vk::Format>;
    fn msaa_samples(&self) -> vk::SampleCountFlags;
    fn queue_families(&self) -> QueueFamilyIndices;

    // Creation.
    fn create_swapchain(&self, desc: &SwapchainDesc) -> VkResult<vk::SwapchainKHR>;
    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>>;
    fn create_image(&self, desc: &ImageDesc) -> VkResult<DeviceImage>;
    fn create_image_view(
        &self,
        image: vk::Image,
        format: vk::Format,
        aspect: vk::ImageAspectFlags,
        mip_levels: u32,
    ) -> VkResult<vk::ImageView>;
    fn create_render_pass(&self, desc: &RenderPassDesc) -> VkResult<vk::RenderPass>;
    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> VkResult<vk::Framebuffer>;
    fn create_semaphore(&self) -> VkResult<vk::Semaphore>;
    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence>;
    fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> VkResult<DeviceBuffer>;
    fn allocate_command_buffers(&self, count: u32) -> VkResult<Vec<vk::CommandBuffer>>;

    // Destruction.
    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR);
    fn destroy_image(&self, image: DeviceImage);
    fn destroy_image_view(&self, view: vk::ImageView);
    fn destroy_render_pass(&self, render_pass: vk::RenderPass);
    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer);
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);
    fn destroy_fence(&self, fence: vk::Fence);
    fn destroy_buffer(&self, buffer: DeviceBuffer);
    fn destroy_pipeline(&self, pipeline: vk::Pipeline);
    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout);
    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout);
    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool);
    fn free_command_buffers(&self, buffers: &[vk::CommandBuffer]);

    /// Copies `data` to the start of a host-visible, host-coherent buffer.
    fn write_buffer(&self, buffer: &DeviceBuffer, data: &[u8]) -> VkResult<()>;

    // Synchronization.
    fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> VkResult<()>;
    fn fence_signaled(&self, fence: vk::Fence) -> VkResult<bool>;
    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()>;
    fn device_wait_idle(&self) -> VkResult<()>;

    // Presentation.
    /// Returns the image index and whether the swapchain is suboptimal.
    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        timeout_ns: u64,
        signal: vk::Semaphore,
    ) -> VkResult<(u32, bool)>;
    fn queue_submit(
        &self,
        queue: QueueKind,
        submission: &Submission<'_>,
        fence: vk::Fence,
    ) -> VkResult<()>;
    /// Returns true when the swapchain is suboptimal.
    fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> VkResult<bool>;

    // Recording.
    fn reset_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()>;
    fn begin_command_buffer(&self, cmd: vk::CommandBuffer, one_time_submit: bool) -> VkResult<()>;
    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()>;
    fn cmd_begin_render_pass(
        &self,
        cmd: vk::CommandBuffer,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_color: [f32; 4],
    );
    fn cmd_set_viewport_and_scissor(&self, cmd: vk::CommandBuffer, extent: vk::Extent2D);
    fn cmd_end_render_pass(&self, cmd: vk::CommandBuffer);
    fn cmd_bind_pipeline(
        &self,
        cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    );
    fn cmd_bind_descriptor_set(
        &self,
        cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        set: vk::DescriptorSet,
    );
    fn cmd_push_constants(
        &self,
        cmd: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        data: &[u8],
    );
    fn cmd_dispatch(&self, cmd: vk::CommandBuffer, groups: [u32; 3]);
    fn cmd_bind_vertex_buffer(&self, cmd: vk::CommandBuffer, buffer: vk::Buffer);
    fn cmd_draw(&self, cmd: vk::CommandBuffer, vertex_count: u32);
    fn cmd_copy_buffer(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        size: vk::DeviceSize,
    );
    fn cmd_copy_buffer_to_image(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        image: vk::Image,
        extent: vk::Extent2D,
    );
    fn cmd_image_barrier(&self, cmd: vk::CommandBuffer, barrier: &ImageBarrier);
    /// Execution-only dependency between two stage sets on the same queue.
    fn cmd_execution_barrier(
        &self,
        cmd: vk::CommandBuffer,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
    );
}
