// SPDX-License-Identifier: CEPL-1.0
//! Owning wrappers for device objects.
//!
//! Every handle the core creates is wrapped in [`Owned`] right away, so an
//! early `?` inside a constructor releases whatever was built so far.

use crate::device::{DeviceBuffer, DeviceImage, GpuDevice};
use ash::prelude::VkResult;
use ash::vk;
use std::ops::Deref;
use std::sync::Arc;
use tracing::trace;

/// A handle kind that knows how to release itself.
pub trait DeviceObject: Copy + std::fmt::Debug {
    fn destroy<D: GpuDevice>(self, device: &D);
}

macro_rules! device_object {
    ($($ty:ty => $destroy:ident),* $(,)?) => {
        $(
            impl DeviceObject for $ty {
                fn destroy<D: GpuDevice>(self, device: &D) {
                    device.$destroy(self);
                }
            }
        )*
    };
}

device_object! {
    vk::SwapchainKHR => destroy_swapchain,
    vk::ImageView => destroy_image_view,
    vk::RenderPass => destroy_render_pass,
    vk::Framebuffer => destroy_framebuffer,
    vk::Semaphore => destroy_semaphore,
    vk::Fence => destroy_fence,
    vk::Pipeline => destroy_pipeline,
    vk::PipelineLayout => destroy_pipeline_layout,
    vk::DescriptorSetLayout => destroy_descriptor_set_layout,
    vk::DescriptorPool => destroy_descriptor_pool,
    DeviceImage => destroy_image,
    DeviceBuffer => destroy_buffer,
}

/// Move-only owner of one device object; destroys it on drop.
pub struct Owned<D: GpuDevice, T: DeviceObject> {
    device: Arc<D>,
    handle: T,
}

impl<D: GpuDevice, T: DeviceObject> Owned<D, T> {
    pub fn new(device: Arc<D>, handle: T) -> Self {
        Self { device, handle }
    }

    /// Wraps the result of a creation call.
    pub fn create(device: &Arc<D>, created: VkResult<T>) -> VkResult<Self> {
        created.map(|handle| Self::new(device.clone(), handle))
    }

    pub fn handle(&self) -> T {
        self.handle
    }
}

impl<D: GpuDevice, T: DeviceObject> Deref for Owned<D, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.handle
    }
}

impl<D: GpuDevice, T: DeviceObject> std::fmt::Debug for Owned<D, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Owned").field(&self.handle).finish()
    }
}

impl<D: GpuDevice, T: DeviceObject> Drop for Owned<D, T> {
    fn drop(&mut self) {
        trace!(handle = ?self.handle, "release");
        self.handle.destroy(&*self.device);
    }
}

/// Primary command buffers allocated from the device's pool, freed together.
pub struct CommandBuffers<D: GpuDevice> {
    device: Arc<D>,
    buffers: Vec<vk::CommandBuffer>,
}

impl<D: GpuDevice> CommandBuffers<D> {
    pub fn allocate(device: &Arc<D>, count: u32) -> VkResult<Self> {
        let buffers = device.allocate_command_buffers(count)?;
        Ok(Self {
            device: device.clone(),
            buffers,
        })
    }

    pub fn get(&self, index: usize) -> Option<vk::CommandBuffer> {
        self.buffers.get(index).copied()
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}

impl<D: GpuDevice> Drop for CommandBuffers<D> {
    fn drop(&mut self) {
        if !self.buffers.is_empty() {
            self.device.free_command_buffers(&self.buffers);
        }
    }
}
