// SPDX-License-Identifier: CEPL-1.0
//! In-memory GPU timeline used by the unit tests.
//!
//! Submissions stay pending until a CPU wait touches their fence (or the
//! device idles); completion is in order per queue. Every call is logged and
//! every created object is tracked, so leaks, double destroys, reuse of a
//! pending command buffer and submits with a signaled fence fail loudly.

use crate::device::{
    DeviceBuffer, DeviceImage, GpuDevice, ImageBarrier, ImageDesc, QueueFamilyIndices, QueueKind,
    RenderPassDesc, Submission, SwapchainDesc, SwapchainSupport,
};
use ash::prelude::VkResult;
use ash::vk::{self, Handle};
use obsidian_render::{RenderSize, WindowSurface};
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ObjKind {
    Swapchain,
    Image,
    ImageView,
    RenderPass,
    Framebuffer,
    Semaphore,
    Fence,
    Buffer,
    CommandBuffer,
    Pipeline,
    PipelineLayout,
    DescriptorSetLayout,
    DescriptorPool,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    Create(ObjKind, u64),
    Destroy(ObjKind, u64),
    CreateSwapchain {
        old: u64,
        extent: (u32, u32),
        min_images: u32,
        present_mode: vk::PresentModeKHR,
    },
    WaitFence(u64),
    FenceStatus(u64),
    ResetFence(u64),
    DeviceWaitIdle,
    Acquire {
        semaphore: u64,
    },
    Submit {
        queue: QueueKind,
        waits: Vec<(u64, vk::PipelineStageFlags)>,
        command_buffers: Vec<u64>,
        signals: Vec<u64>,
        fence: u64,
    },
    Present {
        image: u32,
        wait: u64,
    },
    ResetCommandBuffer(u64),
    BeginCommandBuffer(u64),
    EndCommandBuffer(u64),
    BeginRenderPass {
        cmd: u64,
        framebuffer: u64,
        extent: (u32, u32),
    },
    SetViewportScissor {
        cmd: u64,
        extent: (u32, u32),
    },
    EndRenderPass(u64),
    BindPipeline {
        cmd: u64,
        bind_point: vk::PipelineBindPoint,
        pipeline: u64,
    },
    BindDescriptorSet {
        cmd: u64,
        bind_point: vk::PipelineBindPoint,
        set: u64,
    },
    PushConstants {
        cmd: u64,
        len: usize,
    },
    Dispatch {
        cmd: u64,
        groups: [u32; 3],
    },
    BindVertexBuffer {
        cmd: u64,
        buffer: u64,
    },
    Draw {
        cmd: u64,
        vertices: u32,
    },
    CopyBuffer {
        src: u64,
        dst: u64,
        size: u64,
    },
    CopyBufferToImage {
        src: u64,
        image: u64,
    },
    ImageBarrier {
        image: u64,
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    },
    ExecutionBarrier {
        cmd: u64,
        src: vk::PipelineStageFlags,
        dst: vk::PipelineStageFlags,
    },
    WriteBuffer {
        buffer: u64,
        len: usize,
    },
}

#[derive(Clone, Debug)]
pub struct SubmitRecord {
    pub queue: QueueKind,
    pub fence: u64,
    pub command_buffers: Vec<u64>,
    pub waits: Vec<(u64, vk::PipelineStageFlags)>,
    pub signals: Vec<u64>,
    pub complete: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CmdState {
    Initial,
    Recording,
    Executable,
}

struct State {
    next_handle: u64,
    support: SwapchainSupport,
    support_error: Option<vk::Result>,
    image_count: u32,
    depth_formats: Vec<vk::Format>,
    msaa: vk::SampleCountFlags,
    calls: Vec<Call>,
    live: HashMap<u64, ObjKind>,
    fences: HashMap<u64, bool>,
    commands: HashMap<u64, CmdState>,
    submissions: Vec<SubmitRecord>,
    max_graphics_in_flight: usize,
    acquire_script: VecDeque<VkResult<(u32, bool)>>,
    present_script: VecDeque<VkResult<bool>>,
    next_image: u32,
    fail_next: Option<ObjKind>,
    wait_error: Option<vk::Result>,
}

pub struct MockGpu {
    state: RefCell<State>,
}

impl Default for MockGpu {
    fn default() -> Self {
        Self::new()
    }
}

pub fn surface_format() -> vk::SurfaceFormatKHR {
    vk::SurfaceFormatKHR {
        format: vk::Format::B8G8R8A8_SRGB,
        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
    }
}

pub fn default_support() -> SwapchainSupport {
    SwapchainSupport {
        capabilities: vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            max_image_array_layers: 1,
            current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            ..Default::default()
        },
        formats: vec![surface_format()],
        present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
    }
}

impl MockGpu {
    pub fn new() -> Self {
        Self {
            state: RefCell::new(State {
                next_handle: 0x1000,
                support: default_support(),
                support_error: None,
                image_count: 3,
                depth_formats: vec![vk::Format::D32_SFLOAT],
                msaa: vk::SampleCountFlags::TYPE_4,
                calls: Vec::new(),
                live: HashMap::new(),
                fences: HashMap::new(),
                commands: HashMap::new(),
                submissions: Vec::new(),
                max_graphics_in_flight: 0,
                acquire_script: VecDeque::new(),
                present_script: VecDeque::new(),
                next_image: 0,
                fail_next: None,
                wait_error: None,
            }),
        }
    }

    // Scripting.

    pub fn set_image_count(&self, count: u32) {
        self.state.borrow_mut().image_count = count;
    }

    pub fn set_support(&self, support: SwapchainSupport) {
        self.state.borrow_mut().support = support;
    }

    pub fn fail_support_query(&self, result: vk::Result) {
        self.state.borrow_mut().support_error = Some(result);
    }

    pub fn set_depth_formats(&self, formats: &[vk::Format]) {
        self.state.borrow_mut().depth_formats = formats.to_vec();
    }

    pub fn push_acquire(&self, result: VkResult<(u32, bool)>) {
        self.state.borrow_mut().acquire_script.push_back(result);
    }

    pub fn push_present(&self, result: VkResult<bool>) {
        self.state.borrow_mut().present_script.push_back(result);
    }

    /// The next creation of `kind` fails with `ERROR_OUT_OF_DEVICE_MEMORY`.
    pub fn fail_next(&self, kind: ObjKind) {
        self.state.borrow_mut().fail_next = Some(kind);
    }

    /// The next fence wait fails with `result`.
    pub fn fail_next_wait(&self, result: vk::Result) {
        self.state.borrow_mut().wait_error = Some(result);
    }

    /// Registers an externally built object (pipelines, layouts) as live.
    pub fn fake(&self, kind: ObjKind) -> u64 {
        let mut s = self.state.borrow_mut();
        s.next_handle += 1;
        let raw = s.next_handle;
        s.live.insert(raw, kind);
        raw
    }

    // Inspection.

    pub fn calls(&self) -> Vec<Call> {
        self.state.borrow().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.borrow_mut().calls.clear();
    }

    pub fn live_count(&self) -> usize {
        self.state.borrow().live.len()
    }

    pub fn live_of(&self, kind: ObjKind) -> usize {
        self.state.borrow().live.values().filter(|k| **k == kind).count()
    }

    pub fn creations(&self) -> usize {
        self.state
            .borrow()
            .calls
            .iter()
            .filter(|c| matches!(c, Call::Create(..) | Call::CreateSwapchain { .. }))
            .count()
    }

    pub fn submissions(&self) -> Vec<SubmitRecord> {
        self.state.borrow().submissions.clone()
    }

    pub fn graphics_submissions(&self) -> Vec<SubmitRecord> {
        self.submissions()
            .into_iter()
            .filter(|r| r.queue == QueueKind::Graphics)
            .collect()
    }

    pub fn max_graphics_in_flight(&self) -> usize {
        self.state.borrow().max_graphics_in_flight
    }

    pub fn fence_is_signaled(&self, fence: vk::Fence) -> bool {
        self.state
            .borrow()
            .fences
            .get(&fence.as_raw())
            .copied()
            .unwrap_or(false)
    }

    fn log(&self, call: Call) {
        self.state.borrow_mut().calls.push(call);
    }

    fn mint(&self, kind: ObjKind) -> VkResult<u64> {
        let mut s = self.state.borrow_mut();
        if s.fail_next == Some(kind) {
            s.fail_next = None;
            return Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        }
        s.next_handle += 1;
        let raw = s.next_handle;
        s.live.insert(raw, kind);
        s.calls.push(Call::Create(kind, raw));
        Ok(raw)
    }

    fn untracked(&self) -> u64 {
        let mut s = self.state.borrow_mut();
        s.next_handle += 1;
        s.next_handle
    }

    fn release(&self, kind: ObjKind, raw: u64) {
        let mut s = self.state.borrow_mut();
        match s.live.remove(&raw) {
            Some(k) if k == kind => {}
            other => panic!("destroy of {kind:?} {raw:#x} but live entry was {other:?}"),
        }
        s.fences.remove(&raw);
        s.commands.remove(&raw);
        s.calls.push(Call::Destroy(kind, raw));
    }

    fn complete_through(state: &mut State, index: usize) {
        let queue = state.submissions[index].queue;
        let mut signaled = Vec::new();
        for record in state.submissions[..=index]
            .iter_mut()
            .filter(|r| r.queue == queue && !r.complete)
        {
            record.complete = true;
            signaled.push(record.fence);
        }
        for fence in signaled {
            if let Some(flag) = state.fences.get_mut(&fence) {
                *flag = true;
            }
        }
    }

    fn recording(&self, cmd: vk::CommandBuffer) -> u64 {
        let raw = cmd.as_raw();
        let s = self.state.borrow();
        assert_eq!(
            s.commands.get(&raw),
            Some(&CmdState::Recording),
            "command recorded into {raw:#x} outside begin/end"
        );
        raw
    }
}

fn extent(e: vk::Extent2D) -> (u32, u32) {
    (e.width, e.height)
}

impl GpuDevice for MockGpu {
    fn swapchain_support(&self) -> VkResult<SwapchainSupport> {
        let mut s = self.state.borrow_mut();
        if let Some(err) = s.support_error.take() {
            return Err(err);
        }
        Ok(s.support.clone())
    }

    fn find_supported_format(
        &self,
        candidates: &[vk::Format],
        _tiling: vk::ImageTiling,
        _features: vk::FormatFeatureFlags,
    ) -> Option<vk::Format> {
        let s = self.state.borrow();
        candidates
            .iter()
            .copied()
            .find(|f| s.depth_formats.contains(f))
    }

    fn msaa_samples(&self) -> vk::SampleCountFlags {
        self.state.borrow().msaa
    }

    fn queue_families(&self) -> QueueFamilyIndices {
        QueueFamilyIndices {
            graphics_compute: 0,
            present: 0,
        }
    }

    fn create_swapchain(&self, desc: &SwapchainDesc) -> VkResult<vk::SwapchainKHR> {
        self.log(Call::CreateSwapchain {
            old: desc.old_swapchain.as_raw(),
            extent: extent(desc.extent),
            min_images: desc.min_image_count,
            present_mode: desc.present_mode,
        });
        self.mint(ObjKind::Swapchain).map(vk::SwapchainKHR::from_raw)
    }

    fn swapchain_images(&self, _swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>> {
        let count = self.state.borrow().image_count;
        Ok((0..count)
            .map(|_| vk::Image::from_raw(self.untracked()))
            .collect())
    }

    fn create_image(&self, _desc: &ImageDesc) -> VkResult<DeviceImage> {
        let image = self.mint(ObjKind::Image)?;
        Ok(DeviceImage {
            image: vk::Image::from_raw(image),
            memory: vk::DeviceMemory::from_raw(self.untracked()),
        })
    }

    fn create_image_view(
        &self,
        _image: vk::Image,
        _format: vk::Format,
        _aspect: vk::ImageAspectFlags,
        _mip_levels: u32,
    ) -> VkResult<vk::ImageView> {
        self.mint(ObjKind::ImageView).map(vk::ImageView::from_raw)
    }

    fn create_render_pass(&self, _desc: &RenderPassDesc) -> VkResult<vk::RenderPass> {
        self.mint(ObjKind::RenderPass).map(vk::RenderPass::from_raw)
    }

    fn create_framebuffer(
        &self,
        _render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        _extent: vk::Extent2D,
    ) -> VkResult<vk::Framebuffer> {
        assert_eq!(attachments.len(), 3, "framebuffer binds msaa, depth, resolve");
        self.mint(ObjKind::Framebuffer).map(vk::Framebuffer::from_raw)
    }

    fn create_semaphore(&self) -> VkResult<vk::Semaphore> {
        self.mint(ObjKind::Semaphore).map(vk::Semaphore::from_raw)
    }

    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence> {
        let raw = self.mint(ObjKind::Fence)?;
        self.state.borrow_mut().fences.insert(raw, signaled);
        Ok(vk::Fence::from_raw(raw))
    }

    fn create_buffer(
        &self,
        size: vk::DeviceSize,
        _usage: vk::BufferUsageFlags,
        _properties: vk::MemoryPropertyFlags,
    ) -> VkResult<DeviceBuffer> {
        let buffer = self.mint(ObjKind::Buffer)?;
        Ok(DeviceBuffer {
            buffer: vk::Buffer::from_raw(buffer),
            memory: vk::DeviceMemory::from_raw(self.untracked()),
            size,
        })
    }

    fn allocate_command_buffers(&self, count: u32) -> VkResult<Vec<vk::CommandBuffer>> {
        (0..count)
            .map(|_| {
                let raw = self.mint(ObjKind::CommandBuffer)?;
                self.state
                    .borrow_mut()
                    .commands
                    .insert(raw, CmdState::Initial);
                Ok(vk::CommandBuffer::from_raw(raw))
            })
            .collect()
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        self.release(ObjKind::Swapchain, swapchain.as_raw());
    }

    fn destroy_image(&self, image: DeviceImage) {
        self.release(ObjKind::Image, image.image.as_raw());
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        self.release(ObjKind::ImageView, view.as_raw());
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        self.release(ObjKind::RenderPass, render_pass.as_raw());
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        self.release(ObjKind::Framebuffer, framebuffer.as_raw());
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        self.release(ObjKind::Semaphore, semaphore.as_raw());
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        self.release(ObjKind::Fence, fence.as_raw());
    }

    fn destroy_buffer(&self, buffer: DeviceBuffer) {
        self.release(ObjKind::Buffer, buffer.buffer.as_raw());
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        self.release(ObjKind::Pipeline, pipeline.as_raw());
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        self.release(ObjKind::PipelineLayout, layout.as_raw());
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        self.release(ObjKind::DescriptorSetLayout, layout.as_raw());
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        self.release(ObjKind::DescriptorPool, pool.as_raw());
    }

    fn free_command_buffers(&self, buffers: &[vk::CommandBuffer]) {
        for cmd in buffers {
            self.release(ObjKind::CommandBuffer, cmd.as_raw());
        }
    }

    fn write_buffer(&self, buffer: &DeviceBuffer, data: &[u8]) -> VkResult<()> {
        assert!(data.len() as u64 <= buffer.size, "write past end of buffer");
        self.log(Call::WriteBuffer {
            buffer: buffer.buffer.as_raw(),
            len: data.len(),
        });
        Ok(())
    }

    fn wait_for_fence(&self, fence: vk::Fence, _timeout_ns: u64) -> VkResult<()> {
        let raw = fence.as_raw();
        let mut guard = self.state.borrow_mut();
        let s = &mut *guard;
        s.calls.push(Call::WaitFence(raw));
        if let Some(err) = s.wait_error.take() {
            return Err(err);
        }
        match s.fences.get(&raw) {
            Some(true) => return Ok(()),
            Some(false) => {}
            None => panic!("wait on unknown fence {raw:#x}"),
        }
        match s
            .submissions
            .iter()
            .position(|r| r.fence == raw && !r.complete)
        {
            Some(index) => {
                Self::complete_through(s, index);
                Ok(())
            }
            // Unsignaled and nothing pending on it: a real device would hang.
            None => Err(vk::Result::TIMEOUT),
        }
    }

    fn fence_signaled(&self, fence: vk::Fence) -> VkResult<bool> {
        let raw = fence.as_raw();
        self.log(Call::FenceStatus(raw));
        Ok(self.fence_is_signaled(fence))
    }

    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()> {
        let raw = fence.as_raw();
        let mut s = self.state.borrow_mut();
        s.calls.push(Call::ResetFence(raw));
        match s.fences.get_mut(&raw) {
            Some(state) => *state = false,
            None => panic!("reset of unknown fence {raw:#x}"),
        }
        Ok(())
    }

    fn device_wait_idle(&self) -> VkResult<()> {
        let mut guard = self.state.borrow_mut();
        let s = &mut *guard;
        s.calls.push(Call::DeviceWaitIdle);
        for record in s.submissions.iter_mut().filter(|r| !r.complete) {
            record.complete = true;
            if let Some(state) = s.fences.get_mut(&record.fence) {
                *state = true;
            }
        }
        Ok(())
    }

    fn acquire_next_image(
        &self,
        _swapchain: vk::SwapchainKHR,
        _timeout_ns: u64,
        signal: vk::Semaphore,
    ) -> VkResult<(u32, bool)> {
        let mut s = self.state.borrow_mut();
        s.calls.push(Call::Acquire {
            semaphore: signal.as_raw(),
        });
        if let Some(result) = s.acquire_script.pop_front() {
            return result;
        }
        let index = s.next_image % s.image_count;
        s.next_image += 1;
        Ok((index, false))
    }

    fn queue_submit(
        &self,
        queue: QueueKind,
        submission: &Submission<'_>,
        fence: vk::Fence,
    ) -> VkResult<()> {
        let raw_fence = fence.as_raw();
        let mut s = self.state.borrow_mut();
        if fence != vk::Fence::null() {
            match s.fences.get(&raw_fence) {
                Some(false) => {}
                Some(true) => panic!("submit with signaled fence {raw_fence:#x}"),
                None => panic!("submit with unknown fence {raw_fence:#x}"),
            }
        }
        for cmd in submission.command_buffers {
            assert_eq!(
                s.commands.get(&cmd.as_raw()),
                Some(&CmdState::Executable),
                "submit of a command buffer that is not executable"
            );
        }
        let waits: Vec<_> = submission
            .waits
            .iter()
            .map(|(sem, stage)| (sem.as_raw(), *stage))
            .collect();
        let command_buffers: Vec<_> = submission
            .command_buffers
            .iter()
            .map(|c| c.as_raw())
            .collect();
        let signals: Vec<_> = submission.signals.iter().map(|c| c.as_raw()).collect();

        if queue == QueueKind::Graphics {
            let in_flight = s
                .submissions
                .iter()
                .filter(|r| r.queue == QueueKind::Graphics && !r.complete)
                .count()
                + 1;
            s.max_graphics_in_flight = s.max_graphics_in_flight.max(in_flight);
        }
        s.calls.push(Call::Submit {
            queue,
            waits: waits.clone(),
            command_buffers: command_buffers.clone(),
            signals: signals.clone(),
            fence: raw_fence,
        });
        s.submissions.push(SubmitRecord {
            queue,
            fence: raw_fence,
            command_buffers,
            waits,
            signals,
            complete: false,
        });
        Ok(())
    }

    fn queue_present(
        &self,
        _swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> VkResult<bool> {
        let mut s = self.state.borrow_mut();
        s.calls.push(Call::Present {
            image: image_index,
            wait: wait.as_raw(),
        });
        s.present_script.pop_front().unwrap_or(Ok(false))
    }

    fn reset_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()> {
        let raw = cmd.as_raw();
        let mut s = self.state.borrow_mut();
        let pending = s
            .submissions
            .iter()
            .any(|r| !r.complete && r.command_buffers.contains(&raw));
        assert!(!pending, "reset of command buffer {raw:#x} still pending on the GPU");
        s.calls.push(Call::ResetCommandBuffer(raw));
        s.commands.insert(raw, CmdState::Initial);
        Ok(())
    }

    fn begin_command_buffer(&self, cmd: vk::CommandBuffer, _one_time_submit: bool) -> VkResult<()> {
        let raw = cmd.as_raw();
        let mut s = self.state.borrow_mut();
        assert_ne!(
            s.commands.get(&raw),
            Some(&CmdState::Recording),
            "begin on a command buffer already recording"
        );
        s.calls.push(Call::BeginCommandBuffer(raw));
        s.commands.insert(raw, CmdState::Recording);
        Ok(())
    }

    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()> {
        let raw = self.recording(cmd);
        let mut s = self.state.borrow_mut();
        s.calls.push(Call::EndCommandBuffer(raw));
        s.commands.insert(raw, CmdState::Executable);
        Ok(())
    }

    fn cmd_begin_render_pass(
        &self,
        cmd: vk::CommandBuffer,
        _render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        render_extent: vk::Extent2D,
        _clear_color: [f32; 4],
    ) {
        let cmd = self.recording(cmd);
        self.log(Call::BeginRenderPass {
            cmd,
            framebuffer: framebuffer.as_raw(),
            extent: extent(render_extent),
        });
    }

    fn cmd_set_viewport_and_scissor(&self, cmd: vk::CommandBuffer, render_extent: vk::Extent2D) {
        let cmd = self.recording(cmd);
        self.log(Call::SetViewportScissor {
            cmd,
            extent: extent(render_extent),
        });
    }

    fn cmd_end_render_pass(&self, cmd: vk::CommandBuffer) {
        let cmd = self.recording(cmd);
        self.log(Call::EndRenderPass(cmd));
    }

    fn cmd_bind_pipeline(
        &self,
        cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    ) {
        let cmd = self.recording(cmd);
        self.log(Call::BindPipeline {
            cmd,
            bind_point,
            pipeline: pipeline.as_raw(),
        });
    }

    fn cmd_bind_descriptor_set(
        &self,
        cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        _layout: vk::PipelineLayout,
        set: vk::DescriptorSet,
    ) {
        let cmd = self.recording(cmd);
        self.log(Call::BindDescriptorSet {
            cmd,
            bind_point,
            set: set.as_raw(),
        });
    }

    fn cmd_push_constants(
        &self,
        cmd: vk::CommandBuffer,
        _layout: vk::PipelineLayout,
        _stages: vk::ShaderStageFlags,
        data: &[u8],
    ) {
        let cmd = self.recording(cmd);
        self.log(Call::PushConstants {
            cmd,
            len: data.len(),
        });
    }

    fn cmd_dispatch(&self, cmd: vk::CommandBuffer, groups: [u32; 3]) {
        let cmd = self.recording(cmd);
        self.log(Call::Dispatch { cmd, groups });
    }

    fn cmd_bind_vertex_buffer(&self, cmd: vk::CommandBuffer, buffer: vk::Buffer) {
        let cmd = self.recording(cmd);
        self.log(Call::BindVertexBuffer {
            cmd,
            buffer: buffer.as_raw(),
        });
    }

    fn cmd_draw(&self, cmd: vk::CommandBuffer, vertex_count: u32) {
        let cmd = self.recording(cmd);
        self.log(Call::Draw {
            cmd,
            vertices: vertex_count,
        });
    }

    fn cmd_copy_buffer(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        size: vk::DeviceSize,
    ) {
        self.recording(cmd);
        self.log(Call::CopyBuffer {
            src: src.as_raw(),
            dst: dst.as_raw(),
            size,
        });
    }

    fn cmd_copy_buffer_to_image(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        image: vk::Image,
        _extent: vk::Extent2D,
    ) {
        self.recording(cmd);
        self.log(Call::CopyBufferToImage {
            src: src.as_raw(),
            image: image.as_raw(),
        });
    }

    fn cmd_image_barrier(&self, cmd: vk::CommandBuffer, barrier: &ImageBarrier) {
        self.recording(cmd);
        self.log(Call::ImageBarrier {
            image: barrier.image.as_raw(),
            old: barrier.old_layout,
            new: barrier.new_layout,
        });
    }

    fn cmd_execution_barrier(
        &self,
        cmd: vk::CommandBuffer,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
    ) {
        let cmd = self.recording(cmd);
        self.log(Call::ExecutionBarrier {
            cmd,
            src: src_stage,
            dst: dst_stage,
        });
    }
}

/// Window whose extent follows a script while the core waits on it.
pub struct MockWindow {
    pub extent: RenderSize,
    pub resized: bool,
    pub upcoming: VecDeque<RenderSize>,
    pub waits: usize,
    /// GPU creation count observed at each wait.
    pub creations_while_waiting: Vec<usize>,
    gpu: Option<Arc<MockGpu>>,
}

impl MockWindow {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            extent: RenderSize::new(width, height),
            resized: false,
            upcoming: VecDeque::new(),
            waits: 0,
            creations_while_waiting: Vec::new(),
            gpu: None,
        }
    }

    pub fn watching(gpu: &Arc<MockGpu>, width: u32, height: u32) -> Self {
        Self {
            gpu: Some(gpu.clone()),
            ..Self::new(width, height)
        }
    }
}

impl WindowSurface for MockWindow {
    fn extent(&self) -> RenderSize {
        self.extent
    }

    fn was_resized(&self) -> bool {
        self.resized
    }

    fn reset_resized_flag(&mut self) {
        self.resized = false;
    }

    fn wait_events(&mut self) {
        self.waits += 1;
        assert!(self.waits < 1_000, "window never reported a drawable extent");
        if let Some(gpu) = &self.gpu {
            self.creations_while_waiting.push(gpu.creations());
        }
        if let Some(next) = self.upcoming.pop_front() {
            self.extent = next;
        }
    }
}
