// SPDX-License-Identifier: CEPL-1.0
//! Device/queue provider on top of ash.
//!
//! STRICT ORDER:
//! 1) load the loader, create the instance with the WSI extensions the
//!    display needs (plus validation + debug utils in debug builds)
//! 2) create the surface from THIS instance
//! 3) pick a physical device whose queues can draw, compute and present to
//!    that surface
//! 4) create the device, queues and the command pool
//!
//! Teardown runs the same list backwards.

use crate::device::{
    DeviceBuffer, DeviceImage, GpuDevice, ImageBarrier, ImageDesc, QueueFamilyIndices, QueueKind,
    RenderPassDesc, Submission, SwapchainDesc, SwapchainSupport,
};
use anyhow::{anyhow, bail, Context, Result};
use ash::ext::debug_utils;
use ash::khr::{surface, swapchain};
use ash::prelude::VkResult;
use ash::{vk, Entry, Instance};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle};
use std::ffi::{c_char, c_void, CStr};
use tracing::{debug, error, info, trace, warn};

const APP_NAME: &CStr = c"obsidian";
const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user: *mut c_void,
) -> vk::Bool32 {
    if data.is_null() || unsafe { (*data).p_message.is_null() } {
        return vk::FALSE;
    }
    let msg = unsafe { CStr::from_ptr((*data).p_message) }.to_string_lossy();
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        error!(target: "vulkan", "{msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        warn!(target: "vulkan", "{msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        debug!(target: "vulkan", "{msg}");
    } else {
        trace!(target: "vulkan", "{msg}");
    }
    vk::FALSE
}

fn has_name(names: impl IntoIterator<Item = *const c_char>, wanted: &CStr) -> bool {
    names
        .into_iter()
        .any(|name| unsafe { CStr::from_ptr(name) } == wanted)
}

/// Instance-scoped objects. Dropping this tears down surface, messenger and
/// instance, so a failed device bootstrap releases them too.
struct InstanceContext {
    _entry: Entry,
    instance: Instance,
    debug: Option<(debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    surface_loader: surface::Instance,
    surface: vk::SurfaceKHR,
}

impl InstanceContext {
    fn new(window: &dyn HasWindowHandle, display: &dyn HasDisplayHandle) -> Result<Self> {
        let display_raw = display.display_handle()?.as_raw();
        let window_raw = window.window_handle()?.as_raw();

        let entry = unsafe { Entry::load() }.context("load Vulkan loader")?;
        let (instance, debug_enabled) = create_instance(&entry, display_raw)?;

        let debug = if debug_enabled {
            let loader = debug_utils::Instance::new(&entry, &instance);
            let ci = vk::DebugUtilsMessengerCreateInfoEXT {
                s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
                message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                    | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
                message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
                pfn_user_callback: Some(debug_callback),
                ..Default::default()
            };
            match unsafe { loader.create_debug_utils_messenger(&ci, None) } {
                Ok(messenger) => Some((loader, messenger)),
                Err(e) => {
                    warn!("debug messenger unavailable: {e}");
                    None
                }
            }
        } else {
            None
        };

        let surface_loader = surface::Instance::new(&entry, &instance);
        let surface =
            match unsafe { ash_window::create_surface(&entry, &instance, display_raw, window_raw, None) } {
                Ok(surface) => surface,
                Err(e) => {
                    unsafe {
                        if let Some((loader, messenger)) = &debug {
                            loader.destroy_debug_utils_messenger(*messenger, None);
                        }
                        instance.destroy_instance(None);
                    }
                    return Err(anyhow!("ash_window::create_surface: {e}"));
                }
            };

        Ok(Self {
            _entry: entry,
            instance,
            debug,
            surface_loader,
            surface,
        })
    }
}

impl Drop for InstanceContext {
    fn drop(&mut self) {
        unsafe {
            self.surface_loader.destroy_surface(self.surface, None);
            if let Some((loader, messenger)) = self.debug.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// Returns the instance and whether debug utils were enabled on it.
fn create_instance(entry: &Entry, display_raw: RawDisplayHandle) -> Result<(Instance, bool)> {
    let app_info = vk::ApplicationInfo {
        s_type: vk::StructureType::APPLICATION_INFO,
        p_application_name: APP_NAME.as_ptr(),
        application_version: 0,
        p_engine_name: APP_NAME.as_ptr(),
        engine_version: 0,
        api_version: vk::API_VERSION_1_1,
        ..Default::default()
    };

    let mut extensions = ash_window::enumerate_required_extensions(display_raw)
        .context("enumerate_required_extensions")?
        .to_vec();
    let mut layers: Vec<*const c_char> = Vec::new();
    let mut debug_enabled = false;

    if cfg!(debug_assertions) {
        let available_layers = unsafe { entry.enumerate_instance_layer_properties() }
            .context("enumerate_instance_layer_properties")?;
        if has_name(
            available_layers.iter().map(|l| l.layer_name.as_ptr()),
            VALIDATION_LAYER,
        ) {
            layers.push(VALIDATION_LAYER.as_ptr());
        } else {
            warn!("validation layer not installed; continuing without it");
        }

        let available_exts = unsafe { entry.enumerate_instance_extension_properties(None) }
            .context("enumerate_instance_extension_properties")?;
        if has_name(
            available_exts.iter().map(|e| e.extension_name.as_ptr()),
            debug_utils::NAME,
        ) {
            extensions.push(debug_utils::NAME.as_ptr());
            debug_enabled = true;
        }
    }

    let create_info = vk::InstanceCreateInfo {
        s_type: vk::StructureType::INSTANCE_CREATE_INFO,
        p_application_info: &app_info,
        enabled_extension_count: extensions.len() as u32,
        pp_enabled_extension_names: extensions.as_ptr(),
        enabled_layer_count: layers.len() as u32,
        pp_enabled_layer_names: layers.as_ptr(),
        ..Default::default()
    };

    let instance = unsafe { entry.create_instance(&create_info, None) }.context("create_instance")?;
    Ok((instance, debug_enabled))
}

fn find_queue_families(
    base: &InstanceContext,
    physical: vk::PhysicalDevice,
) -> Option<QueueFamilyIndices> {
    let families =
        unsafe { base.instance.get_physical_device_queue_family_properties(physical) };
    let can_present = |index: u32| unsafe {
        base.surface_loader
            .get_physical_device_surface_support(physical, index, base.surface)
            .unwrap_or(false)
    };

    let graphics_compute = families.iter().zip(0u32..).find_map(|(family, index)| {
        family
            .queue_flags
            .contains(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)
            .then_some(index)
    })?;
    // Presenting from the drawing family avoids concurrent image sharing.
    let present = if can_present(graphics_compute) {
        graphics_compute
    } else {
        (0..families.len() as u32).find(|&i| can_present(i))?
    };
    Some(QueueFamilyIndices {
        graphics_compute,
        present,
    })
}

fn is_suitable(base: &InstanceContext, physical: vk::PhysicalDevice) -> Option<QueueFamilyIndices> {
    let families = find_queue_families(base, physical)?;
    let extensions = unsafe {
        base.instance
            .enumerate_device_extension_properties(physical)
            .ok()?
    };
    if !has_name(
        extensions.iter().map(|e| e.extension_name.as_ptr()),
        swapchain::NAME,
    ) {
        return None;
    }
    let formats = unsafe {
        base.surface_loader
            .get_physical_device_surface_formats(physical, base.surface)
            .ok()?
    };
    let modes = unsafe {
        base.surface_loader
            .get_physical_device_surface_present_modes(physical, base.surface)
            .ok()?
    };
    (!formats.is_empty() && !modes.is_empty()).then_some(families)
}

/// Highest sample count usable for both color and depth framebuffers.
fn max_usable_samples(props: &vk::PhysicalDeviceProperties) -> vk::SampleCountFlags {
    let counts = props.limits.framebuffer_color_sample_counts
        & props.limits.framebuffer_depth_sample_counts;
    [
        vk::SampleCountFlags::TYPE_64,
        vk::SampleCountFlags::TYPE_32,
        vk::SampleCountFlags::TYPE_16,
        vk::SampleCountFlags::TYPE_8,
        vk::SampleCountFlags::TYPE_4,
        vk::SampleCountFlags::TYPE_2,
    ]
    .into_iter()
    .find(|&c| counts.contains(c))
    .unwrap_or(vk::SampleCountFlags::TYPE_1)
}

pub struct VkContext {
    device: ash::Device,
    swapchain_loader: swapchain::Device,
    physical: vk::PhysicalDevice,
    properties: vk::PhysicalDeviceProperties,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    families: QueueFamilyIndices,
    graphics_queue: vk::Queue,
    compute_queue: vk::Queue,
    present_queue: vk::Queue,
    command_pool: vk::CommandPool,
    msaa_samples: vk::SampleCountFlags,
    base: InstanceContext,
}

impl Drop for VkContext {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            self.device.destroy_command_pool(self.command_pool, None);
            self.device.destroy_device(None);
        }
        // `base` drops next: surface, messenger, instance.
    }
}

impl VkContext {
    pub fn new(window: &dyn HasWindowHandle, display: &dyn HasDisplayHandle) -> Result<Self> {
        let base = InstanceContext::new(window, display)?;

        let candidates = unsafe { base.instance.enumerate_physical_devices() }
            .context("enumerate_physical_devices")?;
        let (physical, families) = candidates
            .into_iter()
            .find_map(|p| is_suitable(&base, p).map(|f| (p, f)))
            .ok_or_else(|| anyhow!("no GPU can draw, compute and present to this surface"))?;

        let properties = unsafe { base.instance.get_physical_device_properties(physical) };
        let memory_properties =
            unsafe { base.instance.get_physical_device_memory_properties(physical) };
        let msaa_samples = max_usable_samples(&properties);
        if msaa_samples == vk::SampleCountFlags::TYPE_1 {
            bail!("device supports no multisampled color+depth framebuffers");
        }
        let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }.to_string_lossy();
        info!(
            "vk: {} (api {}.{}), msaa {:?}, queues gc={} present={}",
            name,
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            msaa_samples,
            families.graphics_compute,
            families.present,
        );

        let priorities = [1.0_f32];
        let mut unique = vec![families.graphics_compute];
        if families.present != families.graphics_compute {
            unique.push(families.present);
        }
        let queue_infos: Vec<_> = unique
            .iter()
            .map(|&family| vk::DeviceQueueCreateInfo {
                s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
                queue_family_index: family,
                queue_count: 1,
                p_queue_priorities: priorities.as_ptr(),
                ..Default::default()
            })
            .collect();
        let device_exts = [swapchain::NAME.as_ptr()];
        let features = vk::PhysicalDeviceFeatures::default();
        let device_info = vk::DeviceCreateInfo {
            s_type: vk::StructureType::DEVICE_CREATE_INFO,
            queue_create_info_count: queue_infos.len() as u32,
            p_queue_create_infos: queue_infos.as_ptr(),
            enabled_extension_count: device_exts.len() as u32,
            pp_enabled_extension_names: device_exts.as_ptr(),
            p_enabled_features: &features,
            ..Default::default()
        };
        let device = unsafe { base.instance.create_device(physical, &device_info, None) }
            .context("create_device")?;

        // One queue serves graphics and compute; both kinds submit in one order.
        let graphics_queue = unsafe { device.get_device_queue(families.graphics_compute, 0) };
        let compute_queue = graphics_queue;
        let present_queue = unsafe { device.get_device_queue(families.present, 0) };

        let pool_info = vk::CommandPoolCreateInfo {
            s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
            queue_family_index: families.graphics_compute,
            flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            ..Default::default()
        };
        let command_pool = match unsafe { device.create_command_pool(&pool_info, None) } {
            Ok(pool) => pool,
            Err(e) => {
                unsafe { device.destroy_device(None) };
                return Err(anyhow!("create_command_pool: {e}"));
            }
        };

        let swapchain_loader = swapchain::Device::new(&base.instance, &device);
        Ok(Self {
            device,
            swapchain_loader,
            physical,
            properties,
            memory_properties,
            families,
            graphics_queue,
            compute_queue,
            present_queue,
            command_pool,
            msaa_samples,
            base,
        })
    }

    /// Raw ash device, for pipeline and descriptor bootstrap.
    pub fn raw(&self) -> &ash::Device {
        &self.device
    }

    pub fn properties(&self) -> &vk::PhysicalDeviceProperties {
        &self.properties
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical
    }

    pub fn surface(&self) -> vk::SurfaceKHR {
        self.base.surface
    }

    pub fn command_pool(&self) -> vk::CommandPool {
        self.command_pool
    }

    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    pub fn compute_queue(&self) -> vk::Queue {
        self.compute_queue
    }

    /// Missing memory types surface as an allocation failure.
    pub fn find_memory_type(
        &self,
        type_bits: u32,
        required: vk::MemoryPropertyFlags,
    ) -> VkResult<u32> {
        let mem = &self.memory_properties;
        (0..mem.memory_type_count)
            .find(|&i| {
                type_bits & (1 << i) != 0
                    && mem.memory_types[i as usize].property_flags.contains(required)
            })
            .ok_or_else(|| {
                warn!("no memory type with {required:?} in mask {type_bits:#b}");
                vk::Result::ERROR_OUT_OF_DEVICE_MEMORY
            })
    }

    fn allocate(
        &self,
        requirements: vk::MemoryRequirements,
        properties: vk::MemoryPropertyFlags,
    ) -> VkResult<vk::DeviceMemory> {
        let info = vk::MemoryAllocateInfo {
            s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
            allocation_size: requirements.size,
            memory_type_index: self.find_memory_type(requirements.memory_type_bits, properties)?,
            ..Default::default()
        };
        unsafe { self.device.allocate_memory(&info, None) }
    }

    fn queue(&self, kind: QueueKind) -> vk::Queue {
        match kind {
            QueueKind::Graphics => self.graphics_queue,
            QueueKind::Compute => self.compute_queue,
        }
    }
}

impl GpuDevice for VkContext {
    fn swapchain_support(&self) -> VkResult<SwapchainSupport> {
        let loader = &self.base.surface_loader;
        let surface = self.base.surface;
        unsafe {
            Ok(SwapchainSupport {
                capabilities: loader
                    .get_physical_device_surface_capabilities(self.physical, surface)?,
                formats: loader.get_physical_device_surface_formats(self.physical, surface)?,
                present_modes: loader
                    .get_physical_device_surface_present_modes(self.physical, surface)?,
            })
        }
    }

    fn find_supported_format(
        &self,
        candidates: &[vk::Format],
        tiling: vk::ImageTiling,
        features: vk::FormatFeatureFlags,
    ) -> Option<vk::Format> {
        candidates.iter().copied().find(|&format| {
            let props = unsafe {
                self.base
                    .instance
                    .get_physical_device_format_properties(self.physical, format)
            };
            let supported = if tiling == vk::ImageTiling::LINEAR {
                props.linear_tiling_features
            } else {
                props.optimal_tiling_features
            };
            supported.contains(features)
        })
    }

    fn msaa_samples(&self) -> vk::SampleCountFlags {
        self.msaa_samples
    }

    fn queue_families(&self) -> QueueFamilyIndices {
        self.families
    }

    fn create_swapchain(&self, desc: &SwapchainDesc) -> VkResult<vk::SwapchainKHR> {
        let family_indices = [self.families.graphics_compute, self.families.present];
        let (sharing_mode, index_count) = if self.families.graphics_compute != self.families.present
        {
            (vk::SharingMode::CONCURRENT, family_indices.len() as u32)
        } else {
            (vk::SharingMode::EXCLUSIVE, 0)
        };
        let info = vk::SwapchainCreateInfoKHR {
            s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
            surface: self.base.surface,
            min_image_count: desc.min_image_count,
            image_format: desc.surface_format.format,
            image_color_space: desc.surface_format.color_space,
            image_extent: desc.extent,
            image_array_layers: 1,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            image_sharing_mode: sharing_mode,
            queue_family_index_count: index_count,
            p_queue_family_indices: family_indices.as_ptr(),
            pre_transform: desc.pre_transform,
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            present_mode: desc.present_mode,
            clipped: vk::TRUE,
            old_swapchain: desc.old_swapchain,
            ..Default::default()
        };
        unsafe { self.swapchain_loader.create_swapchain(&info, None) }
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>> {
        unsafe { self.swapchain_loader.get_swapchain_images(swapchain) }
    }

    fn create_image(&self, desc: &ImageDesc) -> VkResult<DeviceImage> {
        let info = vk::ImageCreateInfo {
            s_type: vk::StructureType::IMAGE_CREATE_INFO,
            image_type: vk::ImageType::TYPE_2D,
            format: desc.format,
            extent: vk::Extent3D {
                width: desc.extent.width,
                height: desc.extent.height,
                depth: 1,
            },
            mip_levels: desc.mip_levels,
            array_layers: 1,
            samples: desc.samples,
            tiling: vk::ImageTiling::OPTIMAL,
            usage: desc.usage,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            ..Default::default()
        };
        unsafe {
            let image = self.device.create_image(&info, None)?;
            let requirements = self.device.get_image_memory_requirements(image);
            let memory = match self.allocate(requirements, vk::MemoryPropertyFlags::DEVICE_LOCAL) {
                Ok(memory) => memory,
                Err(e) => {
                    self.device.destroy_image(image, None);
                    return Err(e);
                }
            };
            if let Err(e) = self.device.bind_image_memory(image, memory, 0) {
                self.device.destroy_image(image, None);
                self.device.free_memory(memory, None);
                return Err(e);
            }
            Ok(DeviceImage { image, memory })
        }
    }

    fn create_image_view(
        &self,
        image: vk::Image,
        format: vk::Format,
        aspect: vk::ImageAspectFlags,
        mip_levels: u32,
    ) -> VkResult<vk::ImageView> {
        let info = vk::ImageViewCreateInfo {
            s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
            image,
            view_type: vk::ImageViewType::TYPE_2D,
            format,
            subresource_range: vk::ImageSubresourceRange {
                aspect_mask: aspect,
                base_mip_level: 0,
                level_count: mip_levels,
                base_array_layer: 0,
                layer_count: 1,
            },
            ..Default::default()
        };
        unsafe { self.device.create_image_view(&info, None) }
    }

    fn create_render_pass(&self, desc: &RenderPassDesc) -> VkResult<vk::RenderPass> {
        // The resolve attachment needs a multisampled source.
        if desc.samples == vk::SampleCountFlags::TYPE_1 {
            return Err(vk::Result::ERROR_FORMAT_NOT_SUPPORTED);
        }
        let attachments = [
            vk::AttachmentDescription {
                format: desc.color_format,
                samples: desc.samples,
                load_op: vk::AttachmentLoadOp::CLEAR,
                store_op: vk::AttachmentStoreOp::DONT_CARE,
                stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
                stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
                initial_layout: vk::ImageLayout::UNDEFINED,
                final_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                ..Default::default()
            },
            vk::AttachmentDescription {
                format: desc.depth_format,
                samples: desc.samples,
                load_op: vk::AttachmentLoadOp::CLEAR,
                store_op: vk::AttachmentStoreOp::DONT_CARE,
                stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
                stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
                initial_layout: vk::ImageLayout::UNDEFINED,
                final_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
                ..Default::default()
            },
            vk::AttachmentDescription {
                format: desc.color_format,
                samples: vk::SampleCountFlags::TYPE_1,
                load_op: vk::AttachmentLoadOp::DONT_CARE,
                store_op: vk::AttachmentStoreOp::STORE,
                stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
                stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
                initial_layout: vk::ImageLayout::UNDEFINED,
                final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
                ..Default::default()
            },
        ];
        let color_ref = vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        };
        let depth_ref = vk::AttachmentReference {
            attachment: 1,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        };
        let resolve_ref = vk::AttachmentReference {
            attachment: 2,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        };
        let subpass = vk::SubpassDescription {
            pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
            color_attachment_count: 1,
            p_color_attachments: &color_ref,
            p_resolve_attachments: &resolve_ref,
            p_depth_stencil_attachment: &depth_ref,
            ..Default::default()
        };
        // Color and depth writes of the previous frame finish before this one clears.
        let attachment_stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
            | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
            | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS;
        let attachment_writes = vk::AccessFlags::COLOR_ATTACHMENT_WRITE
            | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE;
        let dependency = vk::SubpassDependency {
            src_subpass: vk::SUBPASS_EXTERNAL,
            dst_subpass: 0,
            src_stage_mask: attachment_stages,
            src_access_mask: attachment_writes,
            dst_stage_mask: attachment_stages,
            dst_access_mask: attachment_writes
                | vk::AccessFlags::COLOR_ATTACHMENT_READ
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ,
            ..Default::default()
        };
        let info = vk::RenderPassCreateInfo {
            s_type: vk::StructureType::RENDER_PASS_CREATE_INFO,
            attachment_count: attachments.len() as u32,
            p_attachments: attachments.as_ptr(),
            subpass_count: 1,
            p_subpasses: &subpass,
            dependency_count: 1,
            p_dependencies: &dependency,
            ..Default::default()
        };
        unsafe { self.device.create_render_pass(&info, None) }
    }

    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> VkResult<vk::Framebuffer> {
        let info = vk::FramebufferCreateInfo {
            s_type: vk::StructureType::FRAMEBUFFER_CREATE_INFO,
            render_pass,
            attachment_count: attachments.len() as u32,
            p_attachments: attachments.as_ptr(),
            width: extent.width,
            height: extent.height,
            layers: 1,
            ..Default::default()
        };
        unsafe { self.device.create_framebuffer(&info, None) }
    }

    fn create_semaphore(&self) -> VkResult<vk::Semaphore> {
        unsafe {
            self.device
                .create_semaphore(&vk::SemaphoreCreateInfo::default(), None)
        }
    }

    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence> {
        let info = vk::FenceCreateInfo {
            s_type: vk::StructureType::FENCE_CREATE_INFO,
            flags: if signaled {
                vk::FenceCreateFlags::SIGNALED
            } else {
                vk::FenceCreateFlags::empty()
            },
            ..Default::default()
        };
        unsafe { self.device.create_fence(&info, None) }
    }

    fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> VkResult<DeviceBuffer> {
        let info = vk::BufferCreateInfo {
            s_type: vk::StructureType::BUFFER_CREATE_INFO,
            size,
            usage,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            ..Default::default()
        };
        unsafe {
            let buffer = self.device.create_buffer(&info, None)?;
            let requirements = self.device.get_buffer_memory_requirements(buffer);
            let memory = match self.allocate(requirements, properties) {
                Ok(memory) => memory,
                Err(e) => {
                    self.device.destroy_buffer(buffer, None);
                    return Err(e);
                }
            };
            if let Err(e) = self.device.bind_buffer_memory(buffer, memory, 0) {
                self.device.destroy_buffer(buffer, None);
                self.device.free_memory(memory, None);
                return Err(e);
            }
            Ok(DeviceBuffer {
                buffer,
                memory,
                size,
            })
        }
    }

    fn allocate_command_buffers(&self, count: u32) -> VkResult<Vec<vk::CommandBuffer>> {
        let info = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: self.command_pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: count,
            ..Default::default()
        };
        unsafe { self.device.allocate_command_buffers(&info) }
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        unsafe { self.swapchain_loader.destroy_swapchain(swapchain, None) }
    }

    fn destroy_image(&self, image: DeviceImage) {
        unsafe {
            self.device.destroy_image(image.image, None);
            self.device.free_memory(image.memory, None);
        }
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        unsafe { self.device.destroy_image_view(view, None) }
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        unsafe { self.device.destroy_render_pass(render_pass, None) }
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        unsafe { self.device.destroy_framebuffer(framebuffer, None) }
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.device.destroy_semaphore(semaphore, None) }
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.device.destroy_fence(fence, None) }
    }

    fn destroy_buffer(&self, buffer: DeviceBuffer) {
        unsafe {
            self.device.destroy_buffer(buffer.buffer, None);
            self.device.free_memory(buffer.memory, None);
        }
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        unsafe { self.device.destroy_pipeline(pipeline, None) }
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        unsafe { self.device.destroy_pipeline_layout(layout, None) }
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        unsafe { self.device.destroy_descriptor_set_layout(layout, None) }
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        unsafe { self.device.destroy_descriptor_pool(pool, None) }
    }

    fn free_command_buffers(&self, buffers: &[vk::CommandBuffer]) {
        unsafe { self.device.free_command_buffers(self.command_pool, buffers) }
    }

    fn write_buffer(&self, buffer: &DeviceBuffer, data: &[u8]) -> VkResult<()> {
        if data.len() as vk::DeviceSize > buffer.size {
            return Err(vk::Result::ERROR_MEMORY_MAP_FAILED);
        }
        unsafe {
            let ptr = self.device.map_memory(
                buffer.memory,
                0,
                data.len() as vk::DeviceSize,
                vk::MemoryMapFlags::empty(),
            )?;
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.cast::<u8>(), data.len());
            self.device.unmap_memory(buffer.memory);
        }
        Ok(())
    }

    fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> VkResult<()> {
        unsafe { self.device.wait_for_fences(&[fence], true, timeout_ns) }
    }

    fn fence_signaled(&self, fence: vk::Fence) -> VkResult<bool> {
        unsafe { self.device.get_fence_status(fence) }
    }

    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()> {
        unsafe { self.device.reset_fences(&[fence]) }
    }

    fn device_wait_idle(&self) -> VkResult<()> {
        unsafe { self.device.device_wait_idle() }
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        timeout_ns: u64,
        signal: vk::Semaphore,
    ) -> VkResult<(u32, bool)> {
        unsafe {
            self.swapchain_loader
                .acquire_next_image(swapchain, timeout_ns, signal, vk::Fence::null())
        }
    }

    fn queue_submit(
        &self,
        queue: QueueKind,
        submission: &Submission<'_>,
        fence: vk::Fence,
    ) -> VkResult<()> {
        let (wait_semaphores, wait_stages): (Vec<_>, Vec<_>) =
            submission.waits.iter().copied().unzip();
        let info = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: wait_semaphores.len() as u32,
            p_wait_semaphores: wait_semaphores.as_ptr(),
            p_wait_dst_stage_mask: wait_stages.as_ptr(),
            command_buffer_count: submission.command_buffers.len() as u32,
            p_command_buffers: submission.command_buffers.as_ptr(),
            signal_semaphore_count: submission.signals.len() as u32,
            p_signal_semaphores: submission.signals.as_ptr(),
            ..Default::default()
        };
        unsafe {
            self.device
                .queue_submit(self.queue(queue), std::slice::from_ref(&info), fence)
        }
    }

    fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> VkResult<bool> {
        let info = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: 1,
            p_wait_semaphores: &wait,
            swapchain_count: 1,
            p_swapchains: &swapchain,
            p_image_indices: &image_index,
            ..Default::default()
        };
        unsafe { self.swapchain_loader.queue_present(self.present_queue, &info) }
    }

    fn reset_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()> {
        unsafe {
            self.device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
        }
    }

    fn begin_command_buffer(&self, cmd: vk::CommandBuffer, one_time_submit: bool) -> VkResult<()> {
        let info = vk::CommandBufferBeginInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
            flags: if one_time_submit {
                vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT
            } else {
                vk::CommandBufferUsageFlags::empty()
            },
            ..Default::default()
        };
        unsafe { self.device.begin_command_buffer(cmd, &info) }
    }

    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()> {
        unsafe { self.device.end_command_buffer(cmd) }
    }

    fn cmd_begin_render_pass(
        &self,
        cmd: vk::CommandBuffer,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_color: [f32; 4],
    ) {
        // One clear value per attachment: msaa color, depth, resolve (unused).
        let clears = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: clear_color,
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
            vk::ClearValue::default(),
        ];
        let info = vk::RenderPassBeginInfo {
            s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
            render_pass,
            framebuffer,
            render_area: vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            },
            clear_value_count: clears.len() as u32,
            p_clear_values: clears.as_ptr(),
            ..Default::default()
        };
        unsafe {
            self.device
                .cmd_begin_render_pass(cmd, &info, vk::SubpassContents::INLINE)
        }
    }

    fn cmd_set_viewport_and_scissor(&self, cmd: vk::CommandBuffer, extent: vk::Extent2D) {
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };
        unsafe {
            self.device.cmd_set_viewport(cmd, 0, &[viewport]);
            self.device.cmd_set_scissor(cmd, 0, &[scissor]);
        }
    }

    fn cmd_end_render_pass(&self, cmd: vk::CommandBuffer) {
        unsafe { self.device.cmd_end_render_pass(cmd) }
    }

    fn cmd_bind_pipeline(
        &self,
        cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    ) {
        unsafe { self.device.cmd_bind_pipeline(cmd, bind_point, pipeline) }
    }

    fn cmd_bind_descriptor_set(
        &self,
        cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        set: vk::DescriptorSet,
    ) {
        unsafe {
            self.device
                .cmd_bind_descriptor_sets(cmd, bind_point, layout, 0, &[set], &[])
        }
    }

    fn cmd_push_constants(
        &self,
        cmd: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        data: &[u8],
    ) {
        unsafe { self.device.cmd_push_constants(cmd, layout, stages, 0, data) }
    }

    fn cmd_dispatch(&self, cmd: vk::CommandBuffer, groups: [u32; 3]) {
        unsafe { self.device.cmd_dispatch(cmd, groups[0], groups[1], groups[2]) }
    }

    fn cmd_bind_vertex_buffer(&self, cmd: vk::CommandBuffer, buffer: vk::Buffer) {
        unsafe { self.device.cmd_bind_vertex_buffers(cmd, 0, &[buffer], &[0]) }
    }

    fn cmd_draw(&self, cmd: vk::CommandBuffer, vertex_count: u32) {
        unsafe { self.device.cmd_draw(cmd, vertex_count, 1, 0, 0) }
    }

    fn cmd_copy_buffer(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        size: vk::DeviceSize,
    ) {
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size,
        };
        unsafe {
            self.device
                .cmd_copy_buffer(cmd, src, dst, std::slice::from_ref(&region))
        }
    }

    fn cmd_copy_buffer_to_image(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        image: vk::Image,
        extent: vk::Extent2D,
    ) {
        let region = vk::BufferImageCopy {
            buffer_offset: 0,
            buffer_row_length: 0,
            buffer_image_height: 0,
            image_subresource: vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            },
            image_offset: vk::Offset3D { x: 0, y: 0, z: 0 },
            image_extent: vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            },
        };
        unsafe {
            self.device.cmd_copy_buffer_to_image(
                cmd,
                src,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                std::slice::from_ref(&region),
            )
        }
    }

    fn cmd_image_barrier(&self, cmd: vk::CommandBuffer, barrier: &ImageBarrier) {
        let info = vk::ImageMemoryBarrier {
            s_type: vk::StructureType::IMAGE_MEMORY_BARRIER,
            src_access_mask: barrier.src_access,
            dst_access_mask: barrier.dst_access,
            old_layout: barrier.old_layout,
            new_layout: barrier.new_layout,
            src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
            dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
            image: barrier.image,
            subresource_range: vk::ImageSubresourceRange {
                aspect_mask: barrier.aspect,
                base_mip_level: 0,
                level_count: barrier.mip_levels,
                base_array_layer: 0,
                layer_count: 1,
            },
            ..Default::default()
        };
        unsafe {
            self.device.cmd_pipeline_barrier(
                cmd,
                barrier.src_stage,
                barrier.dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                std::slice::from_ref(&info),
            )
        }
    }

    fn cmd_execution_barrier(
        &self,
        cmd: vk::CommandBuffer,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
    ) {
        unsafe {
            self.device.cmd_pipeline_barrier(
                cmd,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[],
            )
        }
    }
}
