// SPDX-License-Identifier: CEPL-1.0
//! One-shot uploads into device-local memory through a host-visible staging
//! buffer. Every call blocks on its own fence until the copy has finished.

use crate::device::{DeviceBuffer, DeviceImage, GpuDevice, ImageBarrier, ImageDesc, QueueKind, Submission};
use crate::error::{RenderError, RenderResult};
use crate::handles::{CommandBuffers, Owned};
use ash::vk;
use std::sync::Arc;
use tracing::debug;

/// Access masks and stages for one supported layout transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LayoutTransition {
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

pub fn transition_masks(
    old: vk::ImageLayout,
    new: vk::ImageLayout,
) -> RenderResult<LayoutTransition> {
    match (old, new) {
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL) => {
            Ok(LayoutTransition {
                src_access: vk::AccessFlags::empty(),
                dst_access: vk::AccessFlags::TRANSFER_WRITE,
                src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
                dst_stage: vk::PipelineStageFlags::TRANSFER,
            })
        }
        (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL) => {
            Ok(LayoutTransition {
                src_access: vk::AccessFlags::TRANSFER_WRITE,
                dst_access: vk::AccessFlags::SHADER_READ,
                src_stage: vk::PipelineStageFlags::TRANSFER,
                dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
            })
        }
        _ => Err(RenderError::ResourceLoad(format!(
            "unsupported layout transition {old:?} -> {new:?}"
        ))),
    }
}

fn color_barrier(image: vk::Image, old: vk::ImageLayout, new: vk::ImageLayout) -> RenderResult<ImageBarrier> {
    let masks = transition_masks(old, new)?;
    Ok(ImageBarrier {
        image,
        aspect: vk::ImageAspectFlags::COLOR,
        mip_levels: 1,
        old_layout: old,
        new_layout: new,
        src_access: masks.src_access,
        dst_access: masks.dst_access,
        src_stage: masks.src_stage,
        dst_stage: masks.dst_stage,
    })
}

fn staging_buffer<D: GpuDevice>(
    device: &Arc<D>,
    data: &[u8],
) -> RenderResult<Owned<D, DeviceBuffer>> {
    let staging = Owned::create(
        device,
        device.create_buffer(
            data.len() as vk::DeviceSize,
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        ),
    )
    .map_err(RenderError::vulkan("create staging buffer"))?;
    device
        .write_buffer(&staging, data)
        .map_err(RenderError::vulkan("write staging buffer"))?;
    Ok(staging)
}

// Records `record` into a fresh command buffer, submits it on the graphics
// queue and waits on a private fence.
fn one_shot<D: GpuDevice>(
    device: &Arc<D>,
    timeout_ns: u64,
    record: impl FnOnce(vk::CommandBuffer),
) -> RenderResult<()> {
    let commands = CommandBuffers::allocate(device, 1)
        .map_err(RenderError::vulkan("allocate upload command buffer"))?;
    let cmd = commands.get(0).ok_or(RenderError::Vulkan {
        what: "allocate upload command buffer",
        result: vk::Result::ERROR_UNKNOWN,
    })?;

    device
        .begin_command_buffer(cmd, true)
        .map_err(RenderError::vulkan("begin upload command buffer"))?;
    record(cmd);
    device
        .end_command_buffer(cmd)
        .map_err(RenderError::vulkan("end upload command buffer"))?;

    let fence = Owned::create(device, device.create_fence(false))
        .map_err(RenderError::SyncObject)?;
    let command_buffers = [cmd];
    device
        .queue_submit(
            QueueKind::Graphics,
            &Submission {
                waits: &[],
                command_buffers: &command_buffers,
                signals: &[],
            },
            fence.handle(),
        )
        .map_err(RenderError::vulkan("upload queue submit"))?;
    device
        .wait_for_fence(fence.handle(), timeout_ns)
        .map_err(RenderError::vulkan("upload fence wait"))
}

/// Copies `data` into a new device-local buffer with `usage | TRANSFER_DST`.
pub fn upload_buffer<D: GpuDevice>(
    device: &Arc<D>,
    usage: vk::BufferUsageFlags,
    data: &[u8],
    timeout_ns: u64,
) -> RenderResult<Owned<D, DeviceBuffer>> {
    if data.is_empty() {
        return Err(RenderError::ResourceLoad(
            "refusing to upload an empty buffer".into(),
        ));
    }
    let size = data.len() as vk::DeviceSize;
    let staging = staging_buffer(device, data)?;
    let dst = Owned::create(
        device,
        device.create_buffer(
            size,
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        ),
    )
    .map_err(RenderError::vulkan("create device-local buffer"))?;

    one_shot(device, timeout_ns, |cmd| {
        device.cmd_copy_buffer(cmd, staging.buffer, dst.buffer, size)
    })?;
    debug!("uploaded {size} bytes to device-local buffer");
    Ok(dst)
}

/// Uploads tightly packed 8-bit RGBA pixels into a sampled image left in
/// SHADER_READ_ONLY_OPTIMAL.
pub fn upload_image<D: GpuDevice>(
    device: &Arc<D>,
    extent: vk::Extent2D,
    format: vk::Format,
    rgba: &[u8],
    timeout_ns: u64,
) -> RenderResult<Owned<D, DeviceImage>> {
    let expected = u64::from(extent.width) * u64::from(extent.height) * 4;
    if rgba.is_empty() || rgba.len() as u64 != expected {
        return Err(RenderError::ResourceLoad(format!(
            "{}x{} RGBA image needs {expected} bytes, got {}",
            extent.width,
            extent.height,
            rgba.len()
        )));
    }

    let staging = staging_buffer(device, rgba)?;
    let image = Owned::create(
        device,
        device.create_image(&ImageDesc {
            extent,
            format,
            samples: vk::SampleCountFlags::TYPE_1,
            usage: vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
            mip_levels: 1,
        }),
    )
    .map_err(RenderError::vulkan("create sampled image"))?;

    let to_transfer = color_barrier(
        image.image,
        vk::ImageLayout::UNDEFINED,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
    )?;
    let to_sampled = color_barrier(
        image.image,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    )?;

    one_shot(device, timeout_ns, |cmd| {
        device.cmd_image_barrier(cmd, &to_transfer);
        device.cmd_copy_buffer_to_image(cmd, staging.buffer, image.image, extent);
        device.cmd_image_barrier(cmd, &to_sampled);
    })?;
    debug!("uploaded {}x{} image", extent.width, extent.height);
    Ok(image)
}
