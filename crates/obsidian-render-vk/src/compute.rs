// SPDX-License-Identifier: CEPL-1.0
//! Compute dispatch whose output the same frame's graphics submission
//! consumes as vertex input.
//!
//! Ordering: the compute submission signals the slot's compute-finished
//! semaphore and the graphics submission waits on it at VERTEX_INPUT. Compute
//! and graphics share one queue, so the execution barrier at the top of the
//! compute buffer also keeps the previous frame's vertex fetch ahead of the
//! overwrite.

use crate::device::{GpuDevice, QueueKind, Submission};
use crate::error::{RenderError, RenderResult};
use ash::vk;
use obsidian_render::FrameSlot;
use tracing::trace;

/// `local_size_x` of every compute shader in this crate.
pub const WORKGROUP_SIZE: u32 = 256;

/// Exact number of workgroups covering `elements`. Trailing elements would be
/// silently skipped otherwise, so an inexact split is an error.
pub fn workgroup_count(elements: u32, local_size: u32) -> RenderResult<u32> {
    if elements == 0 || local_size == 0 || elements % local_size != 0 {
        return Err(RenderError::WorkgroupRemainder {
            elements,
            local_size,
        });
    }
    Ok(elements / local_size)
}

/// Synchronization objects and command buffer the current frame slot lends
/// to its compute pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ComputeFrame {
    pub slot: FrameSlot,
    pub command_buffer: vk::CommandBuffer,
    pub finished: vk::Semaphore,
    pub in_flight: vk::Fence,
    pub timeout_ns: u64,
}

#[derive(Clone, Copy, Debug)]
pub struct ComputeDispatch<'a> {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    pub descriptor_set: vk::DescriptorSet,
    /// Uploaded to the COMPUTE stage at offset 0 when non-empty.
    pub push_constants: &'a [u8],
    pub groups: u32,
}

/// Waits for the slot's previous compute pass, re-records the slot's compute
/// buffer and submits it to the compute queue.
pub fn submit_compute<D: GpuDevice>(
    device: &D,
    frame: &ComputeFrame,
    dispatch: &ComputeDispatch<'_>,
) -> RenderResult<()> {
    let cmd = frame.command_buffer;

    device
        .wait_for_fence(frame.in_flight, frame.timeout_ns)
        .map_err(RenderError::vulkan("compute fence wait"))?;
    device
        .reset_fence(frame.in_flight)
        .map_err(RenderError::vulkan("compute fence reset"))?;

    device
        .reset_command_buffer(cmd)
        .map_err(RenderError::vulkan("reset compute command buffer"))?;
    device
        .begin_command_buffer(cmd, false)
        .map_err(RenderError::vulkan("begin compute command buffer"))?;

    // WAR: last frame's vertex fetch must finish before this frame's writes.
    device.cmd_execution_barrier(
        cmd,
        vk::PipelineStageFlags::VERTEX_INPUT,
        vk::PipelineStageFlags::COMPUTE_SHADER,
    );
    device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::COMPUTE, dispatch.pipeline);
    device.cmd_bind_descriptor_set(
        cmd,
        vk::PipelineBindPoint::COMPUTE,
        dispatch.layout,
        dispatch.descriptor_set,
    );
    if !dispatch.push_constants.is_empty() {
        device.cmd_push_constants(
            cmd,
            dispatch.layout,
            vk::ShaderStageFlags::COMPUTE,
            dispatch.push_constants,
        );
    }
    device.cmd_dispatch(cmd, [dispatch.groups, 1, 1]);

    device
        .end_command_buffer(cmd)
        .map_err(RenderError::vulkan("end compute command buffer"))?;

    let command_buffers = [cmd];
    let signals = [frame.finished];
    device
        .queue_submit(
            QueueKind::Compute,
            &Submission {
                waits: &[],
                command_buffers: &command_buffers,
                signals: &signals,
            },
            frame.in_flight,
        )
        .map_err(RenderError::vulkan("compute queue submit"))?;

    trace!("compute dispatched on {} ({} groups)", frame.slot, dispatch.groups);
    Ok(())
}
