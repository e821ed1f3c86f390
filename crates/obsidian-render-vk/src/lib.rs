// SPDX-License-Identifier: CEPL-1.0
//! Vulkan backend: swapchain lifecycle, frames in flight, and a compute pass
//! whose output the same frame draws.
//!
//! Everything below [`VkContext`] talks to the GPU through [`GpuDevice`].

mod compute;
mod context;
mod device;
mod error;
mod handles;
mod orchestrator;
mod particles;
mod pipeline;
mod renderer;
mod staging;
mod swapchain;

#[cfg(test)]
mod mock;

pub use compute::{submit_compute, workgroup_count, ComputeDispatch, ComputeFrame, WORKGROUP_SIZE};
pub use context::VkContext;
pub use device::{
    DeviceBuffer, DeviceImage, GpuDevice, ImageBarrier, ImageDesc, QueueFamilyIndices, QueueKind,
    RenderPassDesc, Submission, SwapchainDesc, SwapchainSupport,
};
pub use error::{RenderError, RenderResult};
pub use handles::{CommandBuffers, DeviceObject, Owned};
pub use orchestrator::{FrameHandoff, FrameOrchestrator};
pub use particles::{initial_particles, Particle, ParticleSystem, PARTICLE_COUNT};
pub use pipeline::{
    load_shader_module, pipeline_cache_path, ComputePipeline, ComputePipelineDesc,
    GraphicsPipeline, GraphicsPipelineDesc, PipelineCache, ShaderModule,
};
pub use renderer::VkRenderer;
pub use staging::{transition_masks, upload_buffer, upload_image, LayoutTransition};
pub use swapchain::{
    AcquireOutcome, ChainFormats, PresentOutcome, PresentPolicy, SwapchainManager,
    SwapchainSettings,
};
