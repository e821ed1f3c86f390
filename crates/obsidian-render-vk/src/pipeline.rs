// SPDX-License-Identifier: CEPL-1.0
//! Shader modules, the on-disk pipeline cache, and pipeline objects.
//!
//! Pipelines are built against a concrete [`VkContext`] but owned through the
//! generic [`Owned`] guard, so the frame code that binds them stays testable.

use crate::context::VkContext;
use crate::device::GpuDevice;
use crate::handles::Owned;
use anyhow::{Context, Result};
use ash::util::read_spv;
use ash::vk;
use std::ffi::CStr;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

const ENTRY_POINT: &CStr = c"main";

/// Shader module that lives only as long as pipeline creation needs it.
pub struct ShaderModule<'a> {
    ctx: &'a VkContext,
    module: vk::ShaderModule,
}

impl ShaderModule<'_> {
    pub fn handle(&self) -> vk::ShaderModule {
        self.module
    }
}

impl Drop for ShaderModule<'_> {
    fn drop(&mut self) {
        unsafe { self.ctx.raw().destroy_shader_module(self.module, None) }
    }
}

pub fn load_shader_module<'a>(ctx: &'a VkContext, spv: &[u8]) -> Result<ShaderModule<'a>> {
    let code = read_spv(&mut Cursor::new(spv)).context("read_spv")?;
    let ci = vk::ShaderModuleCreateInfo {
        s_type: vk::StructureType::SHADER_MODULE_CREATE_INFO,
        p_code: code.as_ptr(),
        code_size: code.len() * 4,
        ..Default::default()
    };
    let module = unsafe { ctx.raw().create_shader_module(&ci, None) }
        .context("create_shader_module")?;
    Ok(ShaderModule { ctx, module })
}

fn hex_bytes(b: &[u8]) -> String {
    let mut s = String::with_capacity(b.len() * 2);
    for x in b {
        use std::fmt::Write as _;
        let _ = write!(&mut s, "{:02x}", x);
    }
    s
}

/// Cache file keyed by vendor, device, driver and cache UUID; a driver update
/// simply misses instead of feeding stale blobs back.
pub fn pipeline_cache_path(props: &vk::PhysicalDeviceProperties) -> PathBuf {
    PathBuf::from(format!(
        "obsidian_pipeline_cache_{:04x}_{:04x}_{:08x}_{}.bin",
        props.vendor_id,
        props.device_id,
        props.driver_version,
        hex_bytes(&props.pipeline_cache_uuid)
    ))
}

/// Pipeline cache seeded from disk and written back on drop.
pub struct PipelineCache {
    ctx: Arc<VkContext>,
    cache: vk::PipelineCache,
    path: PathBuf,
}

impl PipelineCache {
    pub fn load(ctx: &Arc<VkContext>) -> Result<Self> {
        Self::load_from(ctx, pipeline_cache_path(ctx.properties()))
    }

    pub fn load_from(ctx: &Arc<VkContext>, path: PathBuf) -> Result<Self> {
        let data = fs::read(&path).ok();
        let initial: &[u8] = data.as_deref().unwrap_or(&[]);
        let ci = vk::PipelineCacheCreateInfo {
            s_type: vk::StructureType::PIPELINE_CACHE_CREATE_INFO,
            initial_data_size: initial.len(),
            p_initial_data: initial.as_ptr().cast(),
            ..Default::default()
        };
        let cache = match unsafe { ctx.raw().create_pipeline_cache(&ci, None) } {
            Ok(cache) => cache,
            // A corrupt blob should not stop startup; retry empty.
            Err(e) if !initial.is_empty() => {
                warn!("pipeline cache {} rejected ({e}); starting empty", path.display());
                let empty = vk::PipelineCacheCreateInfo::default();
                unsafe { ctx.raw().create_pipeline_cache(&empty, None) }
                    .context("create_pipeline_cache")?
            }
            Err(e) => return Err(e).context("create_pipeline_cache"),
        };
        info!(
            "pipeline cache: {} ({} bytes seeded)",
            path.display(),
            initial.len()
        );
        Ok(Self {
            ctx: ctx.clone(),
            cache,
            path,
        })
    }

    pub fn handle(&self) -> vk::PipelineCache {
        self.cache
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self) -> Result<()> {
        let bytes = unsafe { self.ctx.raw().get_pipeline_cache_data(self.cache) }
            .context("get_pipeline_cache_data")?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(&self.path, &bytes)
            .with_context(|| format!("write {}", self.path.display()))?;
        debug!("pipeline cache saved ({} bytes)", bytes.len());
        Ok(())
    }
}

impl Drop for PipelineCache {
    fn drop(&mut self) {
        if let Err(e) = self.save() {
            warn!("pipeline cache not saved: {e:#}");
        }
        unsafe { self.ctx.raw().destroy_pipeline_cache(self.cache, None) }
    }
}

/// Fixed-function inputs for a graphics pipeline drawn inside the swapchain
/// render pass. Viewport and scissor are dynamic.
pub struct GraphicsPipelineDesc<'a> {
    pub vertex_spv: &'a [u8],
    pub fragment_spv: &'a [u8],
    pub vertex_binding: vk::VertexInputBindingDescription,
    pub vertex_attributes: &'a [vk::VertexInputAttributeDescription],
    pub topology: vk::PrimitiveTopology,
    pub render_pass: vk::RenderPass,
    pub samples: vk::SampleCountFlags,
    pub depth_test: bool,
    pub set_layouts: &'a [vk::DescriptorSetLayout],
    pub push_constant_ranges: &'a [vk::PushConstantRange],
}

pub struct ComputePipelineDesc<'a> {
    pub shader_spv: &'a [u8],
    pub set_layouts: &'a [vk::DescriptorSetLayout],
    pub push_constant_ranges: &'a [vk::PushConstantRange],
}

fn create_layout(
    ctx: &Arc<VkContext>,
    set_layouts: &[vk::DescriptorSetLayout],
    push_constant_ranges: &[vk::PushConstantRange],
) -> Result<Owned<VkContext, vk::PipelineLayout>> {
    let info = vk::PipelineLayoutCreateInfo {
        s_type: vk::StructureType::PIPELINE_LAYOUT_CREATE_INFO,
        set_layout_count: set_layouts.len() as u32,
        p_set_layouts: set_layouts.as_ptr(),
        push_constant_range_count: push_constant_ranges.len() as u32,
        p_push_constant_ranges: push_constant_ranges.as_ptr(),
        ..Default::default()
    };
    Owned::create(ctx, unsafe { ctx.raw().create_pipeline_layout(&info, None) })
        .context("create_pipeline_layout")
}

fn first_pipeline(
    created: std::result::Result<Vec<vk::Pipeline>, (Vec<vk::Pipeline>, vk::Result)>,
    step: &'static str,
) -> Result<vk::Pipeline> {
    match created {
        Ok(mut v) if !v.is_empty() => Ok(v.remove(0)),
        Ok(_) => Err(anyhow::anyhow!("{step} returned no pipeline")),
        Err((_, err)) => Err(err).context(step),
    }
}

/// Raster pipeline plus its layout. The pipeline is released first.
pub struct GraphicsPipeline<D: GpuDevice> {
    pipeline: Owned<D, vk::Pipeline>,
    layout: Owned<D, vk::PipelineLayout>,
}

impl<D: GpuDevice> GraphicsPipeline<D> {
    pub fn from_parts(pipeline: Owned<D, vk::Pipeline>, layout: Owned<D, vk::PipelineLayout>) -> Self {
        Self { pipeline, layout }
    }

    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline.handle()
    }

    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout.handle()
    }
}

impl<D: GpuDevice> Drop for GraphicsPipeline<D> {
    fn drop(&mut self) {
        trace!(pipeline = ?self.pipeline.handle(), "releasing graphics pipeline");
    }
}

/// Compute pipeline plus its layout. The pipeline is released first.
pub struct ComputePipeline<D: GpuDevice> {
    pipeline: Owned<D, vk::Pipeline>,
    layout: Owned<D, vk::PipelineLayout>,
}

impl<D: GpuDevice> ComputePipeline<D> {
    pub fn from_parts(pipeline: Owned<D, vk::Pipeline>, layout: Owned<D, vk::PipelineLayout>) -> Self {
        Self { pipeline, layout }
    }

    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline.handle()
    }

    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout.handle()
    }
}

impl<D: GpuDevice> Drop for ComputePipeline<D> {
    fn drop(&mut self) {
        trace!(pipeline = ?self.pipeline.handle(), "releasing compute pipeline");
    }
}

impl GraphicsPipeline<VkContext> {
    pub fn new(
        ctx: &Arc<VkContext>,
        cache: &PipelineCache,
        desc: &GraphicsPipelineDesc<'_>,
    ) -> Result<Self> {
        let vs = load_shader_module(ctx, desc.vertex_spv)?;
        let fs = load_shader_module(ctx, desc.fragment_spv)?;
        let stages = [
            vk::PipelineShaderStageCreateInfo {
                s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
                stage: vk::ShaderStageFlags::VERTEX,
                module: vs.handle(),
                p_name: ENTRY_POINT.as_ptr(),
                ..Default::default()
            },
            vk::PipelineShaderStageCreateInfo {
                s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
                stage: vk::ShaderStageFlags::FRAGMENT,
                module: fs.handle(),
                p_name: ENTRY_POINT.as_ptr(),
                ..Default::default()
            },
        ];

        let vertex_input = vk::PipelineVertexInputStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_VERTEX_INPUT_STATE_CREATE_INFO,
            vertex_binding_description_count: 1,
            p_vertex_binding_descriptions: &desc.vertex_binding,
            vertex_attribute_description_count: desc.vertex_attributes.len() as u32,
            p_vertex_attribute_descriptions: desc.vertex_attributes.as_ptr(),
            ..Default::default()
        };
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_INPUT_ASSEMBLY_STATE_CREATE_INFO,
            topology: desc.topology,
            ..Default::default()
        };
        let dyn_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_DYNAMIC_STATE_CREATE_INFO,
            dynamic_state_count: dyn_states.len() as u32,
            p_dynamic_states: dyn_states.as_ptr(),
            ..Default::default()
        };
        let viewport_state = vk::PipelineViewportStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_VIEWPORT_STATE_CREATE_INFO,
            viewport_count: 1,
            scissor_count: 1,
            ..Default::default()
        };
        let raster = vk::PipelineRasterizationStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_RASTERIZATION_STATE_CREATE_INFO,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::NONE,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            line_width: 1.0,
            ..Default::default()
        };
        // Must match the render pass attachments.
        let multisample = vk::PipelineMultisampleStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_MULTISAMPLE_STATE_CREATE_INFO,
            rasterization_samples: desc.samples,
            ..Default::default()
        };
        let depth = if desc.depth_test { vk::TRUE } else { vk::FALSE };
        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_DEPTH_STENCIL_STATE_CREATE_INFO,
            depth_test_enable: depth,
            depth_write_enable: depth,
            depth_compare_op: vk::CompareOp::LESS_OR_EQUAL,
            ..Default::default()
        };
        let color_blend_att = vk::PipelineColorBlendAttachmentState {
            color_write_mask: vk::ColorComponentFlags::RGBA,
            blend_enable: vk::FALSE,
            ..Default::default()
        };
        let color_blend = vk::PipelineColorBlendStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_COLOR_BLEND_STATE_CREATE_INFO,
            attachment_count: 1,
            p_attachments: &color_blend_att,
            ..Default::default()
        };

        let layout = create_layout(ctx, desc.set_layouts, desc.push_constant_ranges)?;

        let info = vk::GraphicsPipelineCreateInfo {
            s_type: vk::StructureType::GRAPHICS_PIPELINE_CREATE_INFO,
            stage_count: stages.len() as u32,
            p_stages: stages.as_ptr(),
            p_vertex_input_state: &vertex_input,
            p_input_assembly_state: &input_assembly,
            p_viewport_state: &viewport_state,
            p_rasterization_state: &raster,
            p_multisample_state: &multisample,
            p_depth_stencil_state: &depth_stencil,
            p_color_blend_state: &color_blend,
            p_dynamic_state: &dynamic_state,
            layout: layout.handle(),
            render_pass: desc.render_pass,
            subpass: 0,
            ..Default::default()
        };
        let pipelines = unsafe {
            ctx.raw()
                .create_graphics_pipelines(cache.handle(), std::slice::from_ref(&info), None)
        };
        let pipeline = first_pipeline(pipelines, "create_graphics_pipelines")?;
        Ok(Self {
            pipeline: Owned::new(ctx.clone(), pipeline),
            layout,
        })
    }
}

impl ComputePipeline<VkContext> {
    pub fn new(
        ctx: &Arc<VkContext>,
        cache: &PipelineCache,
        desc: &ComputePipelineDesc<'_>,
    ) -> Result<Self> {
        let module = load_shader_module(ctx, desc.shader_spv)?;
        let layout = create_layout(ctx, desc.set_layouts, desc.push_constant_ranges)?;
        let info = vk::ComputePipelineCreateInfo {
            s_type: vk::StructureType::COMPUTE_PIPELINE_CREATE_INFO,
            stage: vk::PipelineShaderStageCreateInfo {
                s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
                stage: vk::ShaderStageFlags::COMPUTE,
                module: module.handle(),
                p_name: ENTRY_POINT.as_ptr(),
                ..Default::default()
            },
            layout: layout.handle(),
            ..Default::default()
        };
        let pipelines = unsafe {
            ctx.raw()
                .create_compute_pipelines(cache.handle(), std::slice::from_ref(&info), None)
        };
        let pipeline = first_pipeline(pipelines, "create_compute_pipelines")?;
        Ok(Self {
            pipeline: Owned::new(ctx.clone(), pipeline),
            layout,
        })
    }
}
