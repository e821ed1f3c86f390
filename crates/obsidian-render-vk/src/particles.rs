// SPDX-License-Identifier: CEPL-1.0
//! GPU particle simulation: compute integrates positions into one storage
//! buffer while graphics draws the other as a point list.

use crate::compute::{workgroup_count, ComputeDispatch, WORKGROUP_SIZE};
use crate::context::VkContext;
use crate::device::{DeviceBuffer, GpuDevice};
use crate::error::{RenderError, RenderResult};
use crate::handles::Owned;
use crate::pipeline::{
    ComputePipeline, ComputePipelineDesc, GraphicsPipeline, GraphicsPipelineDesc, PipelineCache,
};
use crate::staging::upload_buffer;
use anyhow::{anyhow, Context, Result};
use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec4};
use obsidian_render::{ping_pong, FrameSlot, MAX_FRAMES_IN_FLIGHT};
use std::mem::{offset_of, size_of};
use std::sync::Arc;
use tracing::{debug, info};

pub const PARTICLE_COUNT: u32 = 8192;

const COMPUTE_SPV: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/particle.comp.spv"));
const VERTEX_SPV: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/particle.vert.spv"));
const FRAGMENT_SPV: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/particle.frag.spv"));

/// std430 layout shared with `particle.comp`; doubles as the vertex format.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Particle {
    pub position: [f32; 2],
    pub velocity: [f32; 2],
    pub color: [f32; 4],
}

const VERTEX_BINDING: vk::VertexInputBindingDescription = vk::VertexInputBindingDescription {
    binding: 0,
    stride: size_of::<Particle>() as u32,
    input_rate: vk::VertexInputRate::VERTEX,
};

const VERTEX_ATTRIBUTES: [vk::VertexInputAttributeDescription; 2] = [
    vk::VertexInputAttributeDescription {
        location: 0,
        binding: 0,
        format: vk::Format::R32G32_SFLOAT,
        offset: offset_of!(Particle, position) as u32,
    },
    vk::VertexInputAttributeDescription {
        location: 1,
        binding: 0,
        format: vk::Format::R32G32B32A32_SFLOAT,
        offset: offset_of!(Particle, color) as u32,
    },
];

/// Push constant block of `particle.comp`: frame delta in seconds.
const PUSH_RANGE: vk::PushConstantRange = vk::PushConstantRange {
    stage_flags: vk::ShaderStageFlags::COMPUTE,
    offset: 0,
    size: size_of::<f32>() as u32,
};

/// Particles on a sunflower spiral inside a disc of radius 0.25, moving
/// outward. Deterministic, so every run starts from the same state.
pub fn initial_particles(count: u32) -> Vec<Particle> {
    let golden_angle = std::f32::consts::PI * (3.0 - 5.0_f32.sqrt());
    (0..count)
        .map(|i| {
            let t = (i as f32 + 0.5) / count as f32;
            let dir = Vec2::from_angle(i as f32 * golden_angle);
            let position = dir * t.sqrt() * 0.25;
            let velocity = dir * (0.05 + 0.20 * t);
            let color = Vec4::new(0.4 + 0.6 * t, 0.3 + 0.5 * dir.x.abs(), 1.0 - 0.6 * t, 1.0);
            Particle {
                position: position.to_array(),
                velocity: velocity.to_array(),
                color: color.to_array(),
            }
        })
        .collect()
}

pub struct ParticleSystem<D: GpuDevice> {
    // Released first: pipelines, then the pool (which frees the sets),
    // then the set layout and the buffers.
    graphics: Option<GraphicsPipeline<D>>,
    compute: ComputePipeline<D>,
    sets: [vk::DescriptorSet; MAX_FRAMES_IN_FLIGHT],
    _pool: Owned<D, vk::DescriptorPool>,
    set_layout: Owned<D, vk::DescriptorSetLayout>,
    buffers: [Owned<D, DeviceBuffer>; ping_pong::BUFFER_COUNT],
    groups: u32,
    built_for: u64,
}

impl<D: GpuDevice> ParticleSystem<D> {
    pub fn from_parts(
        buffers: [Owned<D, DeviceBuffer>; ping_pong::BUFFER_COUNT],
        set_layout: Owned<D, vk::DescriptorSetLayout>,
        pool: Owned<D, vk::DescriptorPool>,
        sets: [vk::DescriptorSet; MAX_FRAMES_IN_FLIGHT],
        compute: ComputePipeline<D>,
    ) -> RenderResult<Self> {
        Ok(Self {
            graphics: None,
            compute,
            sets,
            _pool: pool,
            set_layout,
            buffers,
            groups: workgroup_count(PARTICLE_COUNT, WORKGROUP_SIZE)?,
            built_for: 0,
        })
    }

    /// Buffer graphics draws at `slot`; compute reads it as the previous state.
    pub fn vertex_buffer(&self, slot: FrameSlot) -> vk::Buffer {
        self.buffers[ping_pong::read_index(slot)].buffer
    }

    /// Buffer the compute pass of `slot` overwrites.
    pub fn compute_target(&self, slot: FrameSlot) -> vk::Buffer {
        self.buffers[ping_pong::write_index(slot)].buffer
    }

    pub fn set_layout(&self) -> vk::DescriptorSetLayout {
        self.set_layout.handle()
    }

    pub fn needs_rebuild(&self, generation: u64) -> bool {
        self.graphics.is_none() || self.built_for != generation
    }

    /// Replaces the graphics pipeline for swapchain `generation`. The old one
    /// must be idle; swapchain recreation waits for the device first.
    pub fn install_graphics(&mut self, pipeline: GraphicsPipeline<D>, generation: u64) {
        self.graphics = Some(pipeline);
        self.built_for = generation;
    }

    /// `delta` must be the native-endian bytes of one f32.
    pub fn compute_dispatch<'a>(&self, slot: FrameSlot, delta: &'a [u8]) -> ComputeDispatch<'a> {
        ComputeDispatch {
            pipeline: self.compute.handle(),
            layout: self.compute.layout(),
            descriptor_set: self.sets[slot.index()],
            push_constants: delta,
            groups: self.groups,
        }
    }

    /// Records the point draw. Call inside the render pass of swapchain
    /// `generation`; a pipeline built for another swapchain is refused.
    pub fn record_draw(
        &self,
        device: &D,
        cmd: vk::CommandBuffer,
        slot: FrameSlot,
        generation: u64,
    ) -> RenderResult<()> {
        let graphics = self
            .graphics
            .as_ref()
            .filter(|_| self.built_for == generation)
            .ok_or(RenderError::FrameOrder("particle pipeline not built for this swapchain"))?;
        device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, graphics.handle());
        device.cmd_bind_vertex_buffer(cmd, self.vertex_buffer(slot));
        device.cmd_draw(cmd, PARTICLE_COUNT);
        Ok(())
    }
}

fn graphics_desc(render_pass: vk::RenderPass, samples: vk::SampleCountFlags) -> GraphicsPipelineDesc<'static> {
    GraphicsPipelineDesc {
        vertex_spv: VERTEX_SPV,
        fragment_spv: FRAGMENT_SPV,
        vertex_binding: VERTEX_BINDING,
        vertex_attributes: &VERTEX_ATTRIBUTES,
        topology: vk::PrimitiveTopology::POINT_LIST,
        render_pass,
        samples,
        depth_test: false,
        set_layouts: &[],
        push_constant_ranges: &[],
    }
}

impl ParticleSystem<VkContext> {
    pub fn new(
        ctx: &Arc<VkContext>,
        cache: &PipelineCache,
        render_pass: vk::RenderPass,
        generation: u64,
        timeout_ns: u64,
    ) -> Result<Self> {
        let initial = initial_particles(PARTICLE_COUNT);
        let bytes: &[u8] = bytemuck::cast_slice(&initial);
        let usage = vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::VERTEX_BUFFER;
        let buffers = [
            upload_buffer(ctx, usage, bytes, timeout_ns)?,
            upload_buffer(ctx, usage, bytes, timeout_ns)?,
        ];

        let storage = |binding| vk::DescriptorSetLayoutBinding {
            binding,
            descriptor_type: vk::DescriptorType::STORAGE_BUFFER,
            descriptor_count: 1,
            stage_flags: vk::ShaderStageFlags::COMPUTE,
            ..Default::default()
        };
        let bindings = [storage(0), storage(1)];
        let layout_info = vk::DescriptorSetLayoutCreateInfo {
            s_type: vk::StructureType::DESCRIPTOR_SET_LAYOUT_CREATE_INFO,
            binding_count: bindings.len() as u32,
            p_bindings: bindings.as_ptr(),
            ..Default::default()
        };
        let set_layout = Owned::create(ctx, unsafe {
            ctx.raw().create_descriptor_set_layout(&layout_info, None)
        })
        .context("create_descriptor_set_layout")?;

        let pool_size = vk::DescriptorPoolSize {
            ty: vk::DescriptorType::STORAGE_BUFFER,
            descriptor_count: (bindings.len() * MAX_FRAMES_IN_FLIGHT) as u32,
        };
        let pool_info = vk::DescriptorPoolCreateInfo {
            s_type: vk::StructureType::DESCRIPTOR_POOL_CREATE_INFO,
            max_sets: MAX_FRAMES_IN_FLIGHT as u32,
            pool_size_count: 1,
            p_pool_sizes: &pool_size,
            ..Default::default()
        };
        let pool = Owned::create(ctx, unsafe { ctx.raw().create_descriptor_pool(&pool_info, None) })
            .context("create_descriptor_pool")?;

        let layouts = [set_layout.handle(); MAX_FRAMES_IN_FLIGHT];
        let alloc_info = vk::DescriptorSetAllocateInfo {
            s_type: vk::StructureType::DESCRIPTOR_SET_ALLOCATE_INFO,
            descriptor_pool: pool.handle(),
            descriptor_set_count: layouts.len() as u32,
            p_set_layouts: layouts.as_ptr(),
            ..Default::default()
        };
        let sets: [vk::DescriptorSet; MAX_FRAMES_IN_FLIGHT] =
            unsafe { ctx.raw().allocate_descriptor_sets(&alloc_info) }
                .context("allocate_descriptor_sets")?
                .try_into()
                .map_err(|v: Vec<_>| anyhow!("expected {MAX_FRAMES_IN_FLIGHT} sets, got {}", v.len()))?;

        // Per slot: binding 0 = previous state, binding 1 = compute output.
        for slot in FrameSlot::all() {
            let infos = [
                ping_pong::read_index(slot),
                ping_pong::write_index(slot),
            ]
            .map(|i| vk::DescriptorBufferInfo {
                buffer: buffers[i].buffer,
                offset: 0,
                range: vk::WHOLE_SIZE,
            });
            let writes: Vec<_> = infos
                .iter()
                .zip(0u32..)
                .map(|(info, binding)| vk::WriteDescriptorSet {
                    s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
                    dst_set: sets[slot.index()],
                    dst_binding: binding,
                    descriptor_count: 1,
                    descriptor_type: vk::DescriptorType::STORAGE_BUFFER,
                    p_buffer_info: info,
                    ..Default::default()
                })
                .collect();
            unsafe { ctx.raw().update_descriptor_sets(&writes, &[]) };
        }

        let compute = ComputePipeline::new(
            ctx,
            cache,
            &ComputePipelineDesc {
                shader_spv: COMPUTE_SPV,
                set_layouts: &[set_layout.handle()],
                push_constant_ranges: &[PUSH_RANGE],
            },
        )?;

        let mut system = Self::from_parts(buffers, set_layout, pool, sets, compute)?;
        system.rebuild_graphics(ctx, cache, render_pass, generation)?;
        info!(
            "particles: {PARTICLE_COUNT} x {} bytes, {} workgroups",
            size_of::<Particle>(),
            system.groups
        );
        Ok(system)
    }

    pub fn rebuild_graphics(
        &mut self,
        ctx: &Arc<VkContext>,
        cache: &PipelineCache,
        render_pass: vk::RenderPass,
        generation: u64,
    ) -> Result<()> {
        let pipeline = GraphicsPipeline::new(ctx, cache, &graphics_desc(render_pass, ctx.msaa_samples()))?;
        self.install_graphics(pipeline, generation);
        debug!("particle graphics pipeline built for swapchain generation {generation}");
        Ok(())
    }
}
