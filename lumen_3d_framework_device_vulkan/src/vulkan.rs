/// VulkanDevice - Vulkan implementation of the GraphicsDevice trait

use std::ffi::CString;
use std::mem::ManuallyDrop;
use std::sync::{Arc, Mutex};

use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use lumen_3d_framework::lumen3d::device::{
    BindingDesc, BindingGroup, BindingResource, BlurShaderSet, BufferDesc, BufferUsage,
    CommandList, ComputePipelineDesc, DeviceBuffer, DeviceFramebuffer, DeviceImage,
    DeviceImageView, DeviceMemory, DevicePipeline, DeviceRenderPass, Fence, FramebufferDesc,
    GraphicsDevice, GraphicsPipelineDesc, ImageAspect, ImageDesc, ImageFormat, ImageLayout,
    ImageUsage, ImageViewDesc, ImageViewKind, MemoryRequirements, RenderPassDesc, Sampler,
    SamplerDesc, SampleCount, ShaderDesc, ShaderModule, ShaderStage, ShaderStages, StagingBuffer,
    Swapchain,
};
use lumen_3d_framework::lumen3d::device::{
    BlendFactor, BlendOp, ColorWriteMask, CompareOp, CullMode, FrontFace, PolygonMode,
    PrimitiveTopology, VertexInputRate,
};
use lumen_3d_framework::lumen3d::{Error, Result};
use lumen_3d_framework::{lumen_bail, lumen_err, lumen_error, lumen_info};

use crate::debug;
use crate::vulkan_binding_group::VulkanBindingGroup;
use crate::vulkan_buffer::{VulkanBuffer, VulkanStagingBuffer};
use crate::vulkan_command_list::VulkanCommandList;
use crate::vulkan_context::GpuContext;
use crate::vulkan_fence::VulkanFence;
use crate::vulkan_frame_buffer::VulkanFramebuffer;
use crate::vulkan_image::{VulkanImage, VulkanImageView, VulkanMemory};
use crate::vulkan_pipeline::VulkanPipeline;
use crate::vulkan_render_pass::VulkanRenderPass;
use crate::vulkan_sampler::VulkanSampler;
use crate::vulkan_shader::{ReflectedBinding, VulkanShader};
use crate::vulkan_swapchain::VulkanSwapchain;

const SOURCE: &str = "lumen3d::vulkan";

/// Directory the precompiled blur shaders are loaded from when the
/// `LUMEN3D_SHADER_DIR` environment variable is not set
const DEFAULT_SHADER_DIR: &str = "shaders/spirv";

/// Vulkan device configuration
#[derive(Debug, Clone)]
pub struct VulkanConfig {
    /// Enable the Khronos validation layer and debug messenger
    pub enable_validation: bool,
    /// Application name reported to the driver
    pub app_name: String,
}

impl Default for VulkanConfig {
    fn default() -> Self {
        Self {
            enable_validation: cfg!(debug_assertions),
            app_name: "Lumen3D Application".to_string(),
        }
    }
}

/// Vulkan device implementation
///
/// Central object for creating resources and submitting commands,
/// completely separated from swapchain and presentation logic.
pub struct VulkanDevice {
    /// Vulkan entry (needed for swapchain surface creation)
    entry: ash::Entry,
    /// Vulkan instance (also stored in GpuContext; kept here for surfaces)
    instance: ash::Instance,
    physical_device: vk::PhysicalDevice,
    /// Logical device (clone of the handle stored in GpuContext)
    device: ash::Device,

    graphics_queue: vk::Queue,
    graphics_queue_family: u32,
    #[allow(dead_code)]
    present_queue: vk::Queue,
    #[allow(dead_code)]
    present_queue_family: u32,

    /// Descriptor pools for binding group allocation (grows when exhausted)
    descriptor_pools: Mutex<Vec<vk::DescriptorPool>>,

    /// Shared GPU context for all resources
    gpu_context: Arc<GpuContext>,
}

impl VulkanDevice {
    /// Create a descriptor pool with fixed capacity (1024 sets).
    /// Called during init and when the current pool is exhausted.
    fn create_descriptor_pool(device: &ash::Device) -> Result<vk::DescriptorPool> {
        let pool_sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::SAMPLER,
                descriptor_count: 1024,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::SAMPLED_IMAGE,
                descriptor_count: 2048,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                descriptor_count: 2048,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: 1024,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::STORAGE_BUFFER,
                descriptor_count: 1024,
            },
        ];
        let info = vk::DescriptorPoolCreateInfo::default()
            .pool_sizes(&pool_sizes)
            .max_sets(1024);

        unsafe {
            device.create_descriptor_pool(&info, None).map_err(|e| {
                lumen_error!(SOURCE, "Failed to create descriptor pool: {:?}", e);
                Error::InitializationFailed(format!("Failed to create descriptor pool: {:?}", e))
            })
        }
    }

    pub fn new<W: HasDisplayHandle + HasWindowHandle>(
        window: &W,
        config: VulkanConfig,
    ) -> Result<Self> {
        unsafe {
            let entry = ash::Entry::load().map_err(|e| {
                lumen_error!(SOURCE, "Failed to load Vulkan library: {:?}", e);
                Error::InitializationFailed(format!("Failed to load Vulkan library: {:?}", e))
            })?;

            let app_name = CString::new(config.app_name.as_str()).map_err(|_| {
                Error::InitializationFailed("Application name contains a NUL byte".to_string())
            })?;
            let app_info = vk::ApplicationInfo::default()
                .application_name(&app_name)
                .application_version(vk::make_api_version(0, 1, 0, 0))
                .engine_name(c"Lumen3D")
                .engine_version(vk::make_api_version(0, 0, 1, 0))
                .api_version(vk::API_VERSION_1_3);

            let display_handle = window.display_handle().map_err(|e| {
                lumen_error!(SOURCE, "Failed to get display handle: {}", e);
                Error::InitializationFailed(format!("Failed to get display handle: {}", e))
            })?;
            let mut extension_names =
                ash_window::enumerate_required_extensions(display_handle.as_raw())
                    .map_err(|e| {
                        lumen_error!(SOURCE, "Failed to get required extensions: {}", e);
                        Error::InitializationFailed(format!(
                            "Failed to get required extensions: {}",
                            e
                        ))
                    })?
                    .to_vec();

            if config.enable_validation {
                extension_names.push(ash::ext::debug_utils::NAME.as_ptr());
            }

            let layer_names = if config.enable_validation {
                vec![c"VK_LAYER_KHRONOS_validation".as_ptr()]
            } else {
                vec![]
            };

            let create_info = vk::InstanceCreateInfo::default()
                .application_info(&app_info)
                .enabled_layer_names(&layer_names)
                .enabled_extension_names(&extension_names);

            let instance = entry.create_instance(&create_info, None).map_err(|e| {
                lumen_error!(SOURCE, "Failed to create Vulkan instance: {:?}", e);
                Error::InitializationFailed(format!("Failed to create instance: {:?}", e))
            })?;

            // Debug messenger (validation builds only)
            let (debug_utils_loader, debug_messenger) = if config.enable_validation {
                debug::reset_validation_stats();

                let debug_utils = ash::ext::debug_utils::Instance::new(&entry, &instance);
                let debug_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
                    .message_severity(
                        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                            | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING,
                    )
                    .message_type(
                        vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                            | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                            | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
                    )
                    .pfn_user_callback(Some(debug::vulkan_debug_callback));

                let messenger = debug_utils
                    .create_debug_utils_messenger(&debug_info, None)
                    .map_err(|e| {
                        lumen_error!(SOURCE, "Failed to create debug messenger: {:?}", e);
                        Error::InitializationFailed(format!(
                            "Failed to create debug messenger: {:?}",
                            e
                        ))
                    })?;

                (Some(debug_utils), Some(messenger))
            } else {
                (None, None)
            };

            // Temporary surface for queue family selection
            let window_handle = window.window_handle().map_err(|e| {
                lumen_error!(SOURCE, "Failed to get window handle: {}", e);
                Error::InitializationFailed(format!("Failed to get window handle: {}", e))
            })?;
            let surface = ash_window::create_surface(
                &entry,
                &instance,
                display_handle.as_raw(),
                window_handle.as_raw(),
                None,
            )
            .map_err(|e| {
                lumen_error!(SOURCE, "Failed to create surface: {:?}", e);
                Error::InitializationFailed(format!("Failed to create surface: {:?}", e))
            })?;

            let surface_loader = ash::khr::surface::Instance::new(&entry, &instance);

            let physical_devices = instance.enumerate_physical_devices().map_err(|e| {
                lumen_error!(SOURCE, "Failed to enumerate physical devices: {:?}", e);
                Error::InitializationFailed(format!(
                    "Failed to enumerate physical devices: {:?}",
                    e
                ))
            })?;

            let physical_device = physical_devices.into_iter().next().ok_or_else(|| {
                lumen_error!(SOURCE, "No Vulkan-capable GPU found");
                Error::InitializationFailed("No Vulkan-capable GPU found".to_string())
            })?;

            let queue_families =
                instance.get_physical_device_queue_family_properties(physical_device);

            let graphics_family_index = queue_families
                .iter()
                .enumerate()
                .find(|(_, qf)| qf.queue_flags.contains(vk::QueueFlags::GRAPHICS))
                .map(|(i, _)| i as u32)
                .ok_or_else(|| {
                    lumen_error!(SOURCE, "No graphics queue family found");
                    Error::InitializationFailed("No graphics queue family found".to_string())
                })?;

            let present_family_index = (0..queue_families.len() as u32)
                .find(|&i| {
                    surface_loader
                        .get_physical_device_surface_support(physical_device, i, surface)
                        .unwrap_or(false)
                })
                .ok_or_else(|| {
                    lumen_error!(SOURCE, "No present queue family found");
                    Error::InitializationFailed("No present queue family found".to_string())
                })?;

            surface_loader.destroy_surface(surface, None);

            let queue_priorities = [1.0];
            let queue_create_infos = if graphics_family_index == present_family_index {
                vec![vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(graphics_family_index)
                    .queue_priorities(&queue_priorities)]
            } else {
                vec![
                    vk::DeviceQueueCreateInfo::default()
                        .queue_family_index(graphics_family_index)
                        .queue_priorities(&queue_priorities),
                    vk::DeviceQueueCreateInfo::default()
                        .queue_family_index(present_family_index)
                        .queue_priorities(&queue_priorities),
                ]
            };

            let device_extension_names = vec![ash::khr::swapchain::NAME.as_ptr()];
            let device_features = vk::PhysicalDeviceFeatures::default();

            let device_create_info = vk::DeviceCreateInfo::default()
                .queue_create_infos(&queue_create_infos)
                .enabled_extension_names(&device_extension_names)
                .enabled_features(&device_features);

            let device = instance
                .create_device(physical_device, &device_create_info, None)
                .map_err(|e| {
                    lumen_error!(SOURCE, "Failed to create logical device: {:?}", e);
                    Error::InitializationFailed(format!("Failed to create device: {:?}", e))
                })?;

            let graphics_queue = device.get_device_queue(graphics_family_index, 0);
            let present_queue = device.get_device_queue(present_family_index, 0);

            let allocator = Allocator::new(&AllocatorCreateDesc {
                instance: instance.clone(),
                device: device.clone(),
                physical_device,
                debug_settings: Default::default(),
                buffer_device_address: false,
                allocation_sizes: Default::default(),
            })
            .map_err(|e| {
                lumen_error!(SOURCE, "Failed to create GPU allocator: {:?}", e);
                Error::InitializationFailed(format!("Failed to create allocator: {:?}", e))
            })?;

            let descriptor_pool = Self::create_descriptor_pool(&device)?;

            // Upload command pool (TRANSIENT + RESET for reusable one-shot work)
            let upload_pool_create_info = vk::CommandPoolCreateInfo::default()
                .queue_family_index(graphics_family_index)
                .flags(
                    vk::CommandPoolCreateFlags::TRANSIENT
                        | vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
                );

            let upload_command_pool = device
                .create_command_pool(&upload_pool_create_info, None)
                .map_err(|e| {
                    lumen_error!(SOURCE, "Failed to create upload command pool: {:?}", e);
                    Error::InitializationFailed(format!(
                        "Failed to create upload command pool: {:?}",
                        e
                    ))
                })?;

            let gpu_context = Arc::new(GpuContext::new(
                device.clone(),
                Arc::new(Mutex::new(allocator)),
                graphics_queue,
                graphics_family_index,
                upload_command_pool,
                instance.clone(),
                debug_utils_loader,
                debug_messenger,
            ));

            lumen_info!(SOURCE, "Vulkan device initialized");

            Ok(Self {
                entry,
                instance,
                physical_device,
                device,
                graphics_queue,
                graphics_queue_family: graphics_family_index,
                present_queue,
                present_queue_family: present_family_index,
                descriptor_pools: Mutex::new(vec![descriptor_pool]),
                gpu_context,
            })
        }
    }

    /// Validation message counts accumulated since device creation
    pub fn validation_stats(&self) -> debug::ValidationStats {
        debug::get_validation_stats()
    }

    /// Merge the reflected bindings of the given shader stages into one
    /// descriptor set layout per set number (empty sets allowed)
    fn create_set_layouts(
        &self,
        stages: &[(&VulkanShader, vk::ShaderStageFlags)],
    ) -> Result<Vec<vk::DescriptorSetLayout>> {
        // (set, binding) -> (type, stage mask)
        let mut merged: Vec<(ReflectedBinding, vk::ShaderStageFlags)> = Vec::new();
        for (shader, stage_flags) in stages {
            for binding in &shader.reflected_bindings {
                if let Some((existing, existing_stages)) = merged
                    .iter_mut()
                    .find(|(b, _)| b.set == binding.set && b.binding == binding.binding)
                {
                    if existing.descriptor_type != binding.descriptor_type {
                        lumen_bail!(
                            SOURCE,
                            "Binding (set={}, binding={}) has conflicting descriptor types \
                             across shader stages ({:?} vs {:?})",
                            binding.set,
                            binding.binding,
                            existing.descriptor_type,
                            binding.descriptor_type
                        );
                    }
                    *existing_stages |= *stage_flags;
                } else {
                    merged.push((*binding, *stage_flags));
                }
            }
        }

        let set_count = merged
            .iter()
            .map(|(b, _)| b.set + 1)
            .max()
            .unwrap_or(0);

        let mut set_layouts = Vec::with_capacity(set_count as usize);
        for set in 0..set_count {
            let bindings: Vec<vk::DescriptorSetLayoutBinding> = merged
                .iter()
                .filter(|(b, _)| b.set == set)
                .map(|(b, stage_flags)| {
                    vk::DescriptorSetLayoutBinding::default()
                        .binding(b.binding)
                        .descriptor_type(b.descriptor_type)
                        .descriptor_count(1)
                        .stage_flags(*stage_flags)
                })
                .collect();

            let layout_create = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
            let layout = unsafe {
                self.device
                    .create_descriptor_set_layout(&layout_create, None)
                    .map_err(|e| {
                        lumen_err!(SOURCE, "Failed to create descriptor set layout: {:?}", e)
                    })
            };
            let layout = match layout {
                Ok(layout) => layout,
                Err(e) => {
                    unsafe {
                        for l in set_layouts.drain(..) {
                            self.device.destroy_descriptor_set_layout(l, None);
                        }
                    }
                    return Err(e);
                }
            };
            set_layouts.push(layout);
        }

        Ok(set_layouts)
    }

    fn create_pipeline_layout(
        &self,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[lumen_3d_framework::lumen3d::device::PushConstantRange],
    ) -> Result<vk::PipelineLayout> {
        let vk_ranges: Vec<vk::PushConstantRange> = push_constant_ranges
            .iter()
            .map(|range| vk::PushConstantRange {
                stage_flags: shader_stages_to_vk(range.stages),
                offset: range.offset,
                size: range.size,
            })
            .collect();

        let mut layout_create_info = vk::PipelineLayoutCreateInfo::default();
        if !set_layouts.is_empty() {
            layout_create_info = layout_create_info.set_layouts(set_layouts);
        }
        if !vk_ranges.is_empty() {
            layout_create_info = layout_create_info.push_constant_ranges(&vk_ranges);
        }

        unsafe {
            self.device
                .create_pipeline_layout(&layout_create_info, None)
                .map_err(|e| lumen_err!(SOURCE, "Failed to create pipeline layout: {:?}", e))
        }
    }

    /// Record, submit, and wait for a one-shot command buffer from the
    /// shared upload pool
    fn one_shot_commands<F>(&self, record: F) -> Result<()>
    where
        F: FnOnce(vk::CommandBuffer) -> Result<()>,
    {
        let pool = match self.gpu_context.upload_command_pool.lock() {
            Ok(pool) => *pool,
            Err(_) => lumen_bail!(SOURCE, "Upload command pool lock is poisoned"),
        };

        unsafe {
            let allocate_info = vk::CommandBufferAllocateInfo::default()
                .command_pool(pool)
                .level(vk::CommandBufferLevel::PRIMARY)
                .command_buffer_count(1);

            let command_buffers = self
                .device
                .allocate_command_buffers(&allocate_info)
                .map_err(|e| {
                    lumen_err!(SOURCE, "Failed to allocate one-shot command buffer: {:?}", e)
                })?;
            let command_buffer = command_buffers[0];

            let cleanup = |device: &ash::Device| {
                device.free_command_buffers(pool, &[command_buffer]);
            };

            let begin_info = vk::CommandBufferBeginInfo::default()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            if let Err(e) = self.device.begin_command_buffer(command_buffer, &begin_info) {
                cleanup(&self.device);
                return Err(lumen_err!(
                    SOURCE,
                    "Failed to begin one-shot command buffer: {:?}",
                    e
                ));
            }

            if let Err(e) = record(command_buffer) {
                cleanup(&self.device);
                return Err(e);
            }

            if let Err(e) = self.device.end_command_buffer(command_buffer) {
                cleanup(&self.device);
                return Err(lumen_err!(
                    SOURCE,
                    "Failed to end one-shot command buffer: {:?}",
                    e
                ));
            }

            let command_buffers_submit = [command_buffer];
            let submit_info = vk::SubmitInfo::default().command_buffers(&command_buffers_submit);

            let submitted = self
                .device
                .queue_submit(self.graphics_queue, &[submit_info], vk::Fence::null())
                .map_err(|e| lumen_err!(SOURCE, "Failed to submit one-shot commands: {:?}", e))
                .and_then(|_| {
                    self.device.queue_wait_idle(self.graphics_queue).map_err(|e| {
                        lumen_err!(SOURCE, "Failed to wait for one-shot commands: {:?}", e)
                    })
                });

            cleanup(&self.device);
            submitted
        }
    }
}

impl GraphicsDevice for VulkanDevice {
    fn name(&self) -> &str {
        "vulkan"
    }

    fn create_image(&self, desc: &ImageDesc) -> Result<Arc<dyn DeviceImage>> {
        let mut usage_flags = vk::ImageUsageFlags::empty();
        if desc.usage.contains(ImageUsage::SAMPLED) {
            usage_flags |= vk::ImageUsageFlags::SAMPLED;
        }
        if desc.usage.contains(ImageUsage::COLOR_ATTACHMENT) {
            usage_flags |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
        }
        if desc.usage.contains(ImageUsage::DEPTH_STENCIL_ATTACHMENT) {
            usage_flags |= vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
        }
        if desc.usage.contains(ImageUsage::TRANSFER_SRC) {
            usage_flags |= vk::ImageUsageFlags::TRANSFER_SRC;
        }
        if desc.usage.contains(ImageUsage::TRANSFER_DST) {
            usage_flags |= vk::ImageUsageFlags::TRANSFER_DST;
        }
        if desc.usage.contains(ImageUsage::STORAGE) {
            usage_flags |= vk::ImageUsageFlags::STORAGE;
        }

        let flags = if desc.view_kind == ImageViewKind::Cube {
            vk::ImageCreateFlags::CUBE_COMPATIBLE
        } else {
            vk::ImageCreateFlags::empty()
        };

        let image_create_info = vk::ImageCreateInfo::default()
            .flags(flags)
            .image_type(vk::ImageType::TYPE_2D)
            .format(format_to_vk(desc.format))
            .extent(vk::Extent3D {
                width: desc.width,
                height: desc.height,
                depth: 1,
            })
            .mip_levels(desc.mip_count)
            .array_layers(desc.layer_count)
            .samples(sample_count_to_vk(desc.sample_count))
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage_flags)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe {
            self.device
                .create_image(&image_create_info, None)
                .map_err(|e| {
                    lumen_err!(SOURCE, "Failed to create image '{}': {:?}", desc.name, e)
                })?
        };

        Ok(Arc::new(VulkanImage {
            image,
            desc: desc.clone(),
            owned: true,
            ctx: Arc::clone(&self.gpu_context),
        }))
    }

    fn image_memory_requirements(
        &self,
        image: &Arc<dyn DeviceImage>,
    ) -> Result<MemoryRequirements> {
        let vk_image = vulkan_image(image)?;
        let requirements = unsafe { self.device.get_image_memory_requirements(vk_image.image) };
        Ok(MemoryRequirements {
            size: requirements.size,
            alignment: requirements.alignment,
            memory_type_bits: requirements.memory_type_bits,
        })
    }

    fn allocate_memory(&self, size: u64, memory_type_bits: u32) -> Result<Arc<dyn DeviceMemory>> {
        let allocation = {
            let mut allocator = match self.gpu_context.allocator.lock() {
                Ok(allocator) => allocator,
                Err(_) => lumen_bail!(SOURCE, "Allocator lock is poisoned"),
            };
            allocator
                .allocate(&gpu_allocator::vulkan::AllocationCreateDesc {
                    name: "image_memory_block",
                    requirements: vk::MemoryRequirements {
                        size,
                        // The block base must satisfy the strictest image
                        // alignment that can be bound into it
                        alignment: 65536,
                        memory_type_bits,
                    },
                    location: gpu_allocator::MemoryLocation::GpuOnly,
                    linear: false,
                    allocation_scheme: gpu_allocator::vulkan::AllocationScheme::GpuAllocatorManaged,
                })
                .map_err(|_e| {
                    let size_mb = size as f64 / (1024.0 * 1024.0);
                    lumen_error!(SOURCE, "Out of GPU memory ({:.2} MB requested)", size_mb);
                    Error::OutOfMemory
                })?
        };

        Ok(Arc::new(VulkanMemory {
            allocation: Some(allocation),
            ctx: Arc::clone(&self.gpu_context),
        }))
    }

    fn bind_image_memory(
        &self,
        image: &Arc<dyn DeviceImage>,
        memory: &Arc<dyn DeviceMemory>,
        offset: u64,
    ) -> Result<()> {
        let vk_image = vulkan_image(image)?;
        let vk_memory = vulkan_memory(memory)?;

        let (device_memory, base_offset) = match vk_memory.memory_and_offset() {
            Some(pair) => pair,
            None => lumen_bail!(SOURCE, "Image memory block has already been freed"),
        };

        unsafe {
            self.device
                .bind_image_memory(vk_image.image, device_memory, base_offset + offset)
                .map_err(|e| lumen_err!(SOURCE, "Failed to bind image memory: {:?}", e))
        }
    }

    fn create_image_view(
        &self,
        image: &Arc<dyn DeviceImage>,
        desc: &ImageViewDesc,
    ) -> Result<Arc<dyn DeviceImageView>> {
        let vk_image = vulkan_image(image)?;
        let image_desc = &vk_image.desc;

        if desc.base_layer + desc.layer_count > image_desc.layer_count
            || desc.base_mip + desc.mip_count > image_desc.mip_count
        {
            lumen_bail!(
                SOURCE,
                "View range exceeds image '{}' (layers {}..{} of {}, mips {}..{} of {})",
                image_desc.name,
                desc.base_layer,
                desc.base_layer + desc.layer_count,
                image_desc.layer_count,
                desc.base_mip,
                desc.base_mip + desc.mip_count,
                image_desc.mip_count
            );
        }

        let view_type = match desc.kind {
            ImageViewKind::D2 => vk::ImageViewType::TYPE_2D,
            ImageViewKind::D2Array => vk::ImageViewType::TYPE_2D_ARRAY,
            ImageViewKind::Cube => vk::ImageViewType::CUBE,
        };

        let create_info = vk::ImageViewCreateInfo::default()
            .image(vk_image.image)
            .view_type(view_type)
            .format(format_to_vk(image_desc.format))
            .components(vk::ComponentMapping {
                r: vk::ComponentSwizzle::IDENTITY,
                g: vk::ComponentSwizzle::IDENTITY,
                b: vk::ComponentSwizzle::IDENTITY,
                a: vk::ComponentSwizzle::IDENTITY,
            })
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: aspect_to_vk(desc.aspect),
                base_mip_level: desc.base_mip,
                level_count: desc.mip_count,
                base_array_layer: desc.base_layer,
                layer_count: desc.layer_count,
            });

        let view = unsafe {
            self.device
                .create_image_view(&create_info, None)
                .map_err(|e| lumen_err!(SOURCE, "Failed to create image view: {:?}", e))?
        };

        Ok(Arc::new(VulkanImageView {
            view,
            _image: Arc::clone(image),
            ctx: Arc::clone(&self.gpu_context),
        }))
    }

    fn create_staging_buffer(&self, size: u64) -> Result<Arc<dyn StagingBuffer>> {
        let buffer_create_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(vk::BufferUsageFlags::TRANSFER_SRC)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        unsafe {
            let buffer = self
                .device
                .create_buffer(&buffer_create_info, None)
                .map_err(|e| lumen_err!(SOURCE, "Failed to create staging buffer: {:?}", e))?;

            let requirements = self.device.get_buffer_memory_requirements(buffer);

            let allocation = {
                let mut allocator = match self.gpu_context.allocator.lock() {
                    Ok(allocator) => allocator,
                    Err(_) => {
                        self.device.destroy_buffer(buffer, None);
                        lumen_bail!(SOURCE, "Allocator lock is poisoned");
                    }
                };
                match allocator.allocate(&gpu_allocator::vulkan::AllocationCreateDesc {
                    name: "staging_buffer",
                    requirements,
                    location: gpu_allocator::MemoryLocation::CpuToGpu,
                    linear: true,
                    allocation_scheme: gpu_allocator::vulkan::AllocationScheme::GpuAllocatorManaged,
                }) {
                    Ok(allocation) => allocation,
                    Err(_) => {
                        self.device.destroy_buffer(buffer, None);
                        let size_mb = requirements.size as f64 / (1024.0 * 1024.0);
                        lumen_error!(
                            SOURCE,
                            "Out of GPU memory for staging buffer ({:.2} MB)",
                            size_mb
                        );
                        return Err(Error::OutOfMemory);
                    }
                }
            };

            self.device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
                .map_err(|e| lumen_err!(SOURCE, "Failed to bind staging buffer memory: {:?}", e))?;

            Ok(Arc::new(VulkanStagingBuffer {
                buffer,
                allocation: Some(allocation),
                size,
                ctx: Arc::clone(&self.gpu_context),
            }))
        }
    }

    fn create_buffer(&self, desc: &BufferDesc) -> Result<Arc<dyn DeviceBuffer>> {
        let usage = match desc.usage {
            BufferUsage::Vertex => vk::BufferUsageFlags::VERTEX_BUFFER,
            BufferUsage::Index => vk::BufferUsageFlags::INDEX_BUFFER,
            BufferUsage::Uniform => vk::BufferUsageFlags::UNIFORM_BUFFER,
            BufferUsage::Storage => vk::BufferUsageFlags::STORAGE_BUFFER,
        };

        if desc.data.is_empty() {
            lumen_bail!(SOURCE, "Buffer '{}' has no initial data", desc.name);
        }

        let buffer_create_info = vk::BufferCreateInfo::default()
            .size(desc.data.len() as u64)
            .usage(usage | vk::BufferUsageFlags::TRANSFER_DST)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        unsafe {
            let buffer = self
                .device
                .create_buffer(&buffer_create_info, None)
                .map_err(|e| {
                    lumen_err!(SOURCE, "Failed to create buffer '{}': {:?}", desc.name, e)
                })?;

            let requirements = self.device.get_buffer_memory_requirements(buffer);

            let allocation = {
                let mut allocator = match self.gpu_context.allocator.lock() {
                    Ok(allocator) => allocator,
                    Err(_) => {
                        self.device.destroy_buffer(buffer, None);
                        lumen_bail!(SOURCE, "Allocator lock is poisoned");
                    }
                };
                match allocator.allocate(&gpu_allocator::vulkan::AllocationCreateDesc {
                    name: "buffer",
                    requirements,
                    location: gpu_allocator::MemoryLocation::CpuToGpu,
                    linear: true,
                    allocation_scheme: gpu_allocator::vulkan::AllocationScheme::GpuAllocatorManaged,
                }) {
                    Ok(allocation) => allocation,
                    Err(_) => {
                        self.device.destroy_buffer(buffer, None);
                        let size_mb = requirements.size as f64 / (1024.0 * 1024.0);
                        lumen_error!(
                            SOURCE,
                            "Out of GPU memory for buffer '{}' ({:.2} MB)",
                            desc.name,
                            size_mb
                        );
                        return Err(Error::OutOfMemory);
                    }
                }
            };

            self.device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
                .map_err(|e| lumen_err!(SOURCE, "Failed to bind buffer memory: {:?}", e))?;

            let mapped = match allocation.mapped_ptr() {
                Some(ptr) => ptr.as_ptr() as *mut u8,
                None => lumen_bail!(SOURCE, "Buffer '{}' is not CPU-accessible", desc.name),
            };
            std::ptr::copy_nonoverlapping(desc.data.as_ptr(), mapped, desc.data.len());

            Ok(Arc::new(VulkanBuffer {
                buffer,
                allocation: Some(allocation),
                ctx: Arc::clone(&self.gpu_context),
            }))
        }
    }

    fn create_shader(&self, desc: &ShaderDesc) -> Result<Arc<dyn ShaderModule>> {
        Ok(Arc::new(VulkanShader::new(
            Arc::clone(&self.gpu_context),
            desc,
        )?))
    }

    fn blur_shaders(&self) -> Result<BlurShaderSet> {
        let dir = std::env::var("LUMEN3D_SHADER_DIR")
            .unwrap_or_else(|_| DEFAULT_SHADER_DIR.to_string());

        let load = |file: &str, stage: ShaderStage| -> Result<Arc<dyn ShaderModule>> {
            let path = std::path::Path::new(&dir).join(file);
            let code = std::fs::read(&path).map_err(|e| {
                lumen_err!(
                    SOURCE,
                    "Failed to load blur shader {}: {} (compile the GLSL sources under \
                     shaders/ with glslangValidator, or point LUMEN3D_SHADER_DIR at the \
                     compiled .spv files)",
                    path.display(),
                    e
                )
            })?;
            self.create_shader(&ShaderDesc {
                code,
                stage,
                entry_point: "main".to_string(),
            })
        };

        Ok(BlurShaderSet {
            fullscreen_vertex: load("fullscreen.vert.spv", ShaderStage::Vertex)?,
            blur_fragment: load("gaussian_blur.frag.spv", ShaderStage::Fragment)?,
            blur_depth_gated_fragment: load("gaussian_blur_depth.frag.spv", ShaderStage::Fragment)?,
        })
    }

    fn create_render_pass(&self, desc: &RenderPassDesc) -> Result<Arc<dyn DeviceRenderPass>> {
        Ok(Arc::new(VulkanRenderPass::new(
            Arc::clone(&self.gpu_context),
            desc,
        )?))
    }

    fn create_framebuffer(&self, desc: &FramebufferDesc) -> Result<Arc<dyn DeviceFramebuffer>> {
        Ok(Arc::new(VulkanFramebuffer::new(
            Arc::clone(&self.gpu_context),
            desc,
        )?))
    }

    fn create_graphics_pipeline(
        &self,
        desc: &GraphicsPipelineDesc,
    ) -> Result<Arc<dyn DevicePipeline>> {
        let vertex_shader = vulkan_shader(&desc.vertex_shader)?;
        let fragment_shader = vulkan_shader(&desc.fragment_shader)?;
        let vk_render_pass = vulkan_render_pass(&desc.render_pass)?;

        let set_layouts = self.create_set_layouts(&[
            (vertex_shader, vk::ShaderStageFlags::VERTEX),
            (fragment_shader, vk::ShaderStageFlags::FRAGMENT),
        ])?;

        let destroy_layouts = |layouts: &[vk::DescriptorSetLayout]| unsafe {
            for &layout in layouts {
                self.device.destroy_descriptor_set_layout(layout, None);
            }
        };

        let pipeline_layout = match self.create_pipeline_layout(&set_layouts, &desc.push_constant_ranges)
        {
            Ok(layout) => layout,
            Err(e) => {
                destroy_layouts(&set_layouts);
                return Err(e);
            }
        };

        let shader_stages = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vertex_shader.module)
                .name(&vertex_shader.entry_point),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(fragment_shader.module)
                .name(&fragment_shader.entry_point),
        ];

        let vertex_bindings: Vec<vk::VertexInputBindingDescription> = desc
            .vertex_layout
            .bindings
            .iter()
            .map(|binding| vk::VertexInputBindingDescription {
                binding: binding.binding,
                stride: binding.stride,
                input_rate: match binding.input_rate {
                    VertexInputRate::Vertex => vk::VertexInputRate::VERTEX,
                    VertexInputRate::Instance => vk::VertexInputRate::INSTANCE,
                },
            })
            .collect();

        let vertex_attributes: Vec<vk::VertexInputAttributeDescription> = desc
            .vertex_layout
            .attributes
            .iter()
            .map(|attribute| vk::VertexInputAttributeDescription {
                location: attribute.location,
                binding: attribute.binding,
                format: format_to_vk(attribute.format),
                offset: attribute.offset,
            })
            .collect();

        let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&vertex_bindings)
            .vertex_attribute_descriptions(&vertex_attributes);

        let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(topology_to_vk(desc.topology))
            .primitive_restart_enable(false);

        // Static viewport/scissor; pipelines are created per target size
        let viewports = [vk::Viewport {
            x: desc.viewport.x,
            y: desc.viewport.y,
            width: desc.viewport.width,
            height: desc.viewport.height,
            min_depth: desc.viewport.min_depth,
            max_depth: desc.viewport.max_depth,
        }];
        let scissors = [vk::Rect2D {
            offset: vk::Offset2D {
                x: desc.scissor.x,
                y: desc.scissor.y,
            },
            extent: vk::Extent2D {
                width: desc.scissor.width,
                height: desc.scissor.height,
            },
        }];
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewports(&viewports)
            .scissors(&scissors);

        let rasterization_state = {
            let mut info = vk::PipelineRasterizationStateCreateInfo::default()
                .depth_clamp_enable(false)
                .rasterizer_discard_enable(false)
                .polygon_mode(polygon_mode_to_vk(desc.rasterization.polygon_mode))
                .line_width(desc.rasterization.line_width)
                .cull_mode(cull_mode_to_vk(desc.rasterization.cull_mode))
                .front_face(front_face_to_vk(desc.rasterization.front_face));
            if let Some(bias) = desc.rasterization.depth_bias {
                info = info
                    .depth_bias_enable(true)
                    .depth_bias_constant_factor(bias.constant_factor)
                    .depth_bias_slope_factor(bias.slope_factor)
                    .depth_bias_clamp(bias.clamp);
            } else {
                info = info.depth_bias_enable(false);
            }
            info
        };

        let depth_stencil_state = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(desc.depth_stencil.depth_test_enable)
            .depth_write_enable(desc.depth_stencil.depth_write_enable)
            .depth_compare_op(compare_op_to_vk(desc.depth_stencil.depth_compare_op))
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        let multisample_state = vk::PipelineMultisampleStateCreateInfo::default()
            .sample_shading_enable(false)
            .rasterization_samples(sample_count_to_vk(desc.multisample.sample_count))
            .alpha_to_coverage_enable(desc.multisample.alpha_to_coverage);

        let color_blend_attachments: Vec<vk::PipelineColorBlendAttachmentState> = desc
            .color_blend
            .iter()
            .map(|blend| {
                let mut attachment = vk::PipelineColorBlendAttachmentState::default()
                    .color_write_mask(color_write_mask_to_vk(&blend.color_write_mask))
                    .blend_enable(blend.blend_enable);
                if blend.blend_enable {
                    attachment = attachment
                        .src_color_blend_factor(blend_factor_to_vk(blend.src_color_factor))
                        .dst_color_blend_factor(blend_factor_to_vk(blend.dst_color_factor))
                        .color_blend_op(blend_op_to_vk(blend.color_blend_op))
                        .src_alpha_blend_factor(blend_factor_to_vk(blend.src_alpha_factor))
                        .dst_alpha_blend_factor(blend_factor_to_vk(blend.dst_alpha_factor))
                        .alpha_blend_op(blend_op_to_vk(blend.alpha_blend_op));
                }
                attachment
            })
            .collect();

        let color_blend_state = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        let pipeline_create_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input_state)
            .input_assembly_state(&input_assembly_state)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization_state)
            .depth_stencil_state(&depth_stencil_state)
            .multisample_state(&multisample_state)
            .color_blend_state(&color_blend_state)
            .layout(pipeline_layout)
            .render_pass(vk_render_pass.render_pass)
            .subpass(0);

        let pipelines = unsafe {
            self.device.create_graphics_pipelines(
                vk::PipelineCache::null(),
                &[pipeline_create_info],
                None,
            )
        };
        let pipelines = match pipelines {
            Ok(pipelines) => pipelines,
            Err((_, e)) => {
                unsafe {
                    self.device.destroy_pipeline_layout(pipeline_layout, None);
                }
                destroy_layouts(&set_layouts);
                return Err(lumen_err!(
                    SOURCE,
                    "Failed to create graphics pipeline '{}': {:?}",
                    desc.name,
                    e
                ));
            }
        };

        Ok(Arc::new(VulkanPipeline {
            pipeline: pipelines[0],
            pipeline_layout,
            set_layouts,
            bind_point: vk::PipelineBindPoint::GRAPHICS,
            ctx: Arc::clone(&self.gpu_context),
        }))
    }

    fn create_compute_pipeline(
        &self,
        desc: &ComputePipelineDesc,
    ) -> Result<Arc<dyn DevicePipeline>> {
        let shader = vulkan_shader(&desc.shader)?;

        let set_layouts = self.create_set_layouts(&[(shader, shader.stage_flags())])?;

        let pipeline_layout = match self.create_pipeline_layout(&set_layouts, &desc.push_constant_ranges)
        {
            Ok(layout) => layout,
            Err(e) => {
                unsafe {
                    for &layout in &set_layouts {
                        self.device.destroy_descriptor_set_layout(layout, None);
                    }
                }
                return Err(e);
            }
        };

        let stage = vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(shader.module)
            .name(&shader.entry_point);

        let pipeline_create_info = vk::ComputePipelineCreateInfo::default()
            .stage(stage)
            .layout(pipeline_layout);

        let pipelines = unsafe {
            self.device.create_compute_pipelines(
                vk::PipelineCache::null(),
                &[pipeline_create_info],
                None,
            )
        };
        let pipelines = match pipelines {
            Ok(pipelines) => pipelines,
            Err((_, e)) => {
                unsafe {
                    self.device.destroy_pipeline_layout(pipeline_layout, None);
                    for &layout in &set_layouts {
                        self.device.destroy_descriptor_set_layout(layout, None);
                    }
                }
                return Err(lumen_err!(
                    SOURCE,
                    "Failed to create compute pipeline '{}': {:?}",
                    desc.name,
                    e
                ));
            }
        };

        Ok(Arc::new(VulkanPipeline {
            pipeline: pipelines[0],
            pipeline_layout,
            set_layouts,
            bind_point: vk::PipelineBindPoint::COMPUTE,
            ctx: Arc::clone(&self.gpu_context),
        }))
    }

    fn create_sampler(&self, desc: &SamplerDesc) -> Result<Arc<dyn Sampler>> {
        Ok(Arc::new(VulkanSampler::new(
            Arc::clone(&self.gpu_context),
            desc,
        )?))
    }

    fn create_binding_group(
        &self,
        pipeline: &Arc<dyn DevicePipeline>,
        set: u32,
        bindings: &[BindingDesc],
    ) -> Result<Arc<dyn BindingGroup>> {
        let vk_pipeline = vulkan_pipeline(pipeline)?;

        if set as usize >= vk_pipeline.set_layouts.len() {
            lumen_bail!(
                SOURCE,
                "create_binding_group: set {} out of range (pipeline has {} layouts)",
                set,
                vk_pipeline.set_layouts.len()
            );
        }

        let layouts = [vk_pipeline.set_layouts[set as usize]];

        // Allocate from the newest pool, growing when it is exhausted
        let descriptor_set = unsafe {
            let mut pools = match self.descriptor_pools.lock() {
                Ok(pools) => pools,
                Err(_) => lumen_bail!(SOURCE, "Descriptor pool lock is poisoned"),
            };
            let current_pool = match pools.last() {
                Some(&pool) => pool,
                None => lumen_bail!(SOURCE, "No descriptor pool available"),
            };
            let allocate_info = vk::DescriptorSetAllocateInfo::default()
                .descriptor_pool(current_pool)
                .set_layouts(&layouts);

            match self.device.allocate_descriptor_sets(&allocate_info) {
                Ok(sets) => sets[0],
                Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY)
                | Err(vk::Result::ERROR_FRAGMENTED_POOL) => {
                    let new_pool = Self::create_descriptor_pool(&self.device)?;
                    pools.push(new_pool);
                    lumen_info!(
                        SOURCE,
                        "Descriptor pool exhausted, created new pool (total: {})",
                        pools.len()
                    );
                    let retry_info = vk::DescriptorSetAllocateInfo::default()
                        .descriptor_pool(new_pool)
                        .set_layouts(&layouts);
                    self.device
                        .allocate_descriptor_sets(&retry_info)
                        .map_err(|e| {
                            lumen_err!(
                                SOURCE,
                                "Failed to allocate descriptor set after pool growth: {:?}",
                                e
                            )
                        })?[0]
                }
                Err(e) => {
                    return Err(lumen_err!(
                        SOURCE,
                        "Failed to allocate descriptor set: {:?}",
                        e
                    ))
                }
            }
        };

        // Build descriptor infos first so their addresses stay stable while
        // the writes reference them
        let mut buffer_infos: Vec<vk::DescriptorBufferInfo> = Vec::new();
        let mut image_infos: Vec<vk::DescriptorImageInfo> = Vec::new();

        for binding in bindings {
            match &binding.resource {
                BindingResource::Sampler(sampler) => {
                    let vk_sampler = vulkan_sampler(sampler)?;
                    image_infos.push(
                        vk::DescriptorImageInfo::default().sampler(vk_sampler.sampler),
                    );
                }
                BindingResource::SampledImage(view) => {
                    let vk_view = vulkan_image_view(view)?;
                    image_infos.push(
                        vk::DescriptorImageInfo::default()
                            .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                            .image_view(vk_view.view),
                    );
                }
                BindingResource::UniformBuffer(buffer) | BindingResource::StorageBuffer(buffer) => {
                    let vk_buffer = vulkan_buffer(buffer)?;
                    buffer_infos.push(
                        vk::DescriptorBufferInfo::default()
                            .buffer(vk_buffer.buffer)
                            .offset(0)
                            .range(vk::WHOLE_SIZE),
                    );
                }
            }
        }

        let mut writes: Vec<vk::WriteDescriptorSet> = Vec::new();
        let mut buffer_idx = 0usize;
        let mut image_idx = 0usize;

        for binding in bindings {
            let write = vk::WriteDescriptorSet::default()
                .dst_set(descriptor_set)
                .dst_binding(binding.binding)
                .dst_array_element(0);

            match &binding.resource {
                BindingResource::Sampler(_) => {
                    writes.push(
                        write
                            .descriptor_type(vk::DescriptorType::SAMPLER)
                            .image_info(std::slice::from_ref(&image_infos[image_idx])),
                    );
                    image_idx += 1;
                }
                BindingResource::SampledImage(_) => {
                    writes.push(
                        write
                            .descriptor_type(vk::DescriptorType::SAMPLED_IMAGE)
                            .image_info(std::slice::from_ref(&image_infos[image_idx])),
                    );
                    image_idx += 1;
                }
                BindingResource::UniformBuffer(_) => {
                    writes.push(
                        write
                            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                            .buffer_info(std::slice::from_ref(&buffer_infos[buffer_idx])),
                    );
                    buffer_idx += 1;
                }
                BindingResource::StorageBuffer(_) => {
                    writes.push(
                        write
                            .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                            .buffer_info(std::slice::from_ref(&buffer_infos[buffer_idx])),
                    );
                    buffer_idx += 1;
                }
            }
        }

        unsafe {
            self.device.update_descriptor_sets(&writes, &[]);
        }

        Ok(Arc::new(VulkanBindingGroup {
            descriptor_set,
            _ctx: Arc::clone(&self.gpu_context),
        }))
    }

    fn create_command_list(&self) -> Result<Box<dyn CommandList>> {
        Ok(Box::new(VulkanCommandList::new(Arc::clone(
            &self.gpu_context,
        ))?))
    }

    fn create_fence(&self) -> Result<Box<dyn Fence>> {
        let fence = unsafe {
            self.device
                .create_fence(&vk::FenceCreateInfo::default(), None)
                .map_err(|e| lumen_err!(SOURCE, "Failed to create fence: {:?}", e))?
        };
        Ok(Box::new(VulkanFence {
            fence,
            ctx: Arc::clone(&self.gpu_context),
        }))
    }

    fn create_swapchain(
        &self,
        window: &winit::window::Window,
        image_count: u32,
    ) -> Result<Box<dyn Swapchain>> {
        let display_handle = window.display_handle().map_err(|e| {
            lumen_err!(SOURCE, "Failed to get display handle for swapchain: {}", e)
        })?;
        let window_handle = window.window_handle().map_err(|e| {
            lumen_err!(SOURCE, "Failed to get window handle for swapchain: {}", e)
        })?;

        let surface = unsafe {
            ash_window::create_surface(
                &self.entry,
                &self.instance,
                display_handle.as_raw(),
                window_handle.as_raw(),
                None,
            )
            .map_err(|e| {
                lumen_err!(SOURCE, "Failed to create surface for swapchain: {:?}", e)
            })?
        };

        let surface_loader = ash::khr::surface::Instance::new(&self.entry, &self.instance);

        Ok(Box::new(VulkanSwapchain::new(
            Arc::clone(&self.gpu_context),
            self.physical_device,
            &self.instance,
            surface,
            surface_loader,
            image_count,
        )?))
    }

    fn submit(&self, commands: &mut dyn CommandList, fence: Option<&dyn Fence>) -> Result<()> {
        let vk_cmd = match commands.as_any().downcast_ref::<VulkanCommandList>() {
            Some(cmd) => cmd,
            None => lumen_bail!(SOURCE, "Foreign command list passed to the Vulkan device"),
        };

        let vk_fence = match fence {
            Some(fence) => match fence.as_any().downcast_ref::<VulkanFence>() {
                Some(fence) => fence.fence,
                None => lumen_bail!(SOURCE, "Foreign fence passed to the Vulkan device"),
            },
            None => vk::Fence::null(),
        };

        let command_buffers = [vk_cmd.command_buffer()];
        let submit_info = vk::SubmitInfo::default().command_buffers(&command_buffers);

        unsafe {
            self.device
                .queue_submit(self.graphics_queue, &[submit_info], vk_fence)
                .map_err(|e| lumen_err!(SOURCE, "Failed to submit commands: {:?}", e))
        }
    }

    fn submit_and_wait(&self, commands: &mut dyn CommandList) -> Result<()> {
        self.submit(commands, None)?;
        unsafe {
            self.device
                .queue_wait_idle(self.graphics_queue)
                .map_err(|e| lumen_err!(SOURCE, "Failed to wait for submission: {:?}", e))
        }
    }

    fn submit_with_swapchain(
        &self,
        commands: &mut dyn CommandList,
        fence: &dyn Fence,
        swapchain: &mut dyn Swapchain,
        image_index: u32,
    ) -> Result<()> {
        let vk_cmd = match commands.as_any().downcast_ref::<VulkanCommandList>() {
            Some(cmd) => cmd,
            None => lumen_bail!(SOURCE, "Foreign command list passed to the Vulkan device"),
        };
        let vk_fence = match fence.as_any().downcast_ref::<VulkanFence>() {
            Some(fence) => fence.fence,
            None => lumen_bail!(SOURCE, "Foreign fence passed to the Vulkan device"),
        };
        let vk_swapchain = match swapchain.as_any().downcast_ref::<VulkanSwapchain>() {
            Some(swapchain) => swapchain,
            None => lumen_bail!(SOURCE, "Foreign swapchain passed to the Vulkan device"),
        };

        let (wait_semaphore, signal_semaphore) = vk_swapchain.sync_info(image_index);

        let command_buffers = [vk_cmd.command_buffer()];
        let wait_semaphores = [wait_semaphore];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [signal_semaphore];

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device
                .queue_submit(self.graphics_queue, &[submit_info], vk_fence)
                .map_err(|e| {
                    lumen_err!(SOURCE, "Failed to submit frame commands: {:?}", e)
                })
        }
    }

    fn read_image_pixels(
        &self,
        image: &Arc<dyn DeviceImage>,
        aspect: ImageAspect,
        layer: u32,
        mip: u32,
    ) -> Result<Vec<u8>> {
        let vk_image = vulkan_image(image)?;
        let desc = &vk_image.desc;

        if layer >= desc.layer_count || mip >= desc.mip_count {
            lumen_bail!(
                SOURCE,
                "Readback of layer {} mip {} exceeds image '{}' ({} layers, {} mips)",
                layer,
                mip,
                desc.name,
                desc.layer_count,
                desc.mip_count
            );
        }

        let mip_width = (desc.width >> mip).max(1);
        let mip_height = (desc.height >> mip).max(1);
        let byte_size =
            mip_width as u64 * mip_height as u64 * desc.format.bytes_per_element() as u64;

        unsafe {
            let buffer_create_info = vk::BufferCreateInfo::default()
                .size(byte_size)
                .usage(vk::BufferUsageFlags::TRANSFER_DST)
                .sharing_mode(vk::SharingMode::EXCLUSIVE);

            let buffer = self
                .device
                .create_buffer(&buffer_create_info, None)
                .map_err(|e| lumen_err!(SOURCE, "Failed to create readback buffer: {:?}", e))?;

            let requirements = self.device.get_buffer_memory_requirements(buffer);

            let allocation = {
                let mut allocator = match self.gpu_context.allocator.lock() {
                    Ok(allocator) => allocator,
                    Err(_) => {
                        self.device.destroy_buffer(buffer, None);
                        lumen_bail!(SOURCE, "Allocator lock is poisoned");
                    }
                };
                match allocator.allocate(&gpu_allocator::vulkan::AllocationCreateDesc {
                    name: "readback_buffer",
                    requirements,
                    location: gpu_allocator::MemoryLocation::GpuToCpu,
                    linear: true,
                    allocation_scheme: gpu_allocator::vulkan::AllocationScheme::GpuAllocatorManaged,
                }) {
                    Ok(allocation) => allocation,
                    Err(_) => {
                        self.device.destroy_buffer(buffer, None);
                        return Err(Error::OutOfMemory);
                    }
                }
            };

            let cleanup = |allocation: gpu_allocator::vulkan::Allocation| {
                if let Ok(mut allocator) = self.gpu_context.allocator.lock() {
                    allocator.free(allocation).ok();
                }
                self.device.destroy_buffer(buffer, None);
            };

            if let Err(e) = self
                .device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
            {
                cleanup(allocation);
                return Err(lumen_err!(
                    SOURCE,
                    "Failed to bind readback buffer memory: {:?}",
                    e
                ));
            }

            // The caller is responsible for the mip being in TransferSrc layout
            let copy_result = self.one_shot_commands(|command_buffer| {
                let region = vk::BufferImageCopy::default()
                    .buffer_offset(0)
                    .buffer_row_length(0)
                    .buffer_image_height(0)
                    .image_subresource(vk::ImageSubresourceLayers {
                        aspect_mask: aspect_to_vk(aspect),
                        mip_level: mip,
                        base_array_layer: layer,
                        layer_count: 1,
                    })
                    .image_offset(vk::Offset3D { x: 0, y: 0, z: 0 })
                    .image_extent(vk::Extent3D {
                        width: mip_width,
                        height: mip_height,
                        depth: 1,
                    });

                self.device.cmd_copy_image_to_buffer(
                    command_buffer,
                    vk_image.image,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    buffer,
                    &[region],
                );
                Ok(())
            });

            if let Err(e) = copy_result {
                cleanup(allocation);
                return Err(e);
            }

            let mapped = match allocation.mapped_ptr() {
                Some(ptr) => ptr.as_ptr() as *const u8,
                None => {
                    cleanup(allocation);
                    lumen_bail!(SOURCE, "Readback buffer is not CPU-accessible");
                }
            };

            let mut pixels = vec![0u8; byte_size as usize];
            std::ptr::copy_nonoverlapping(mapped, pixels.as_mut_ptr(), byte_size as usize);

            cleanup(allocation);
            Ok(pixels)
        }
    }

    fn wait_idle(&self) -> Result<()> {
        unsafe {
            self.device
                .device_wait_idle()
                .map_err(|e| lumen_err!(SOURCE, "Failed to wait idle: {:?}", e))
        }
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        unsafe {
            self.device.device_wait_idle().ok();

            // 1. Destroy device-owned pools
            if let Ok(pools) = self.descriptor_pools.get_mut() {
                for &pool in pools.iter() {
                    self.device.destroy_descriptor_pool(pool, None);
                }
            }

            // 2. Destroy the upload command pool from GpuContext
            if let Ok(mut pool) = self.gpu_context.upload_command_pool.lock() {
                if *pool != vk::CommandPool::null() {
                    self.device.destroy_command_pool(*pool, None);
                    *pool = vk::CommandPool::null();
                }
            }

            // 3. Drop the allocator: frees VkDeviceMemory pages BEFORE the
            //    device is destroyed. All resources must already be dropped.
            if let Some(ctx) = Arc::get_mut(&mut self.gpu_context) {
                ManuallyDrop::drop(&mut ctx.allocator);
            } else {
                lumen_error!(
                    SOURCE,
                    "GPU resources still alive at device teardown; leaking allocator"
                );
            }

            // 4. Destroy debug messenger BEFORE device and instance
            if let (Some(debug_utils), Some(messenger)) = (
                &self.gpu_context.debug_utils_loader,
                &self.gpu_context.debug_messenger,
            ) {
                debug_utils.destroy_debug_utils_messenger(*messenger, None);
            }

            // 5. Destroy device and instance
            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}

// ===== CONVERSIONS =====

pub(crate) fn format_to_vk(format: ImageFormat) -> vk::Format {
    match format {
        ImageFormat::R8G8B8A8_SRGB => vk::Format::R8G8B8A8_SRGB,
        ImageFormat::R8G8B8A8_UNORM => vk::Format::R8G8B8A8_UNORM,
        ImageFormat::B8G8R8A8_SRGB => vk::Format::B8G8R8A8_SRGB,
        ImageFormat::B8G8R8A8_UNORM => vk::Format::B8G8R8A8_UNORM,
        ImageFormat::R16G16B16A16_SFLOAT => vk::Format::R16G16B16A16_SFLOAT,
        ImageFormat::D32_SFLOAT => vk::Format::D32_SFLOAT,
        ImageFormat::D24_UNORM_S8_UINT => vk::Format::D24_UNORM_S8_UINT,
        ImageFormat::R32_SFLOAT => vk::Format::R32_SFLOAT,
        ImageFormat::R32G32_SFLOAT => vk::Format::R32G32_SFLOAT,
        ImageFormat::R32G32B32_SFLOAT => vk::Format::R32G32B32_SFLOAT,
        ImageFormat::R32G32B32A32_SFLOAT => vk::Format::R32G32B32A32_SFLOAT,
    }
}

pub(crate) fn layout_to_vk(layout: ImageLayout) -> vk::ImageLayout {
    match layout {
        ImageLayout::Undefined => vk::ImageLayout::UNDEFINED,
        ImageLayout::TransferSrc => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        ImageLayout::TransferDst => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        ImageLayout::ColorAttachment => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        ImageLayout::DepthStencilAttachment => vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        ImageLayout::ShaderReadOnly => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        ImageLayout::Present => vk::ImageLayout::PRESENT_SRC_KHR,
    }
}

pub(crate) fn aspect_to_vk(aspect: ImageAspect) -> vk::ImageAspectFlags {
    match aspect {
        ImageAspect::Color => vk::ImageAspectFlags::COLOR,
        ImageAspect::Depth => vk::ImageAspectFlags::DEPTH,
        ImageAspect::DepthStencil => {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        }
    }
}

pub(crate) fn sample_count_to_vk(count: SampleCount) -> vk::SampleCountFlags {
    match count {
        SampleCount::S1 => vk::SampleCountFlags::TYPE_1,
        SampleCount::S2 => vk::SampleCountFlags::TYPE_2,
        SampleCount::S4 => vk::SampleCountFlags::TYPE_4,
        SampleCount::S8 => vk::SampleCountFlags::TYPE_8,
    }
}

pub(crate) fn shader_stages_to_vk(stages: ShaderStages) -> vk::ShaderStageFlags {
    let mut flags = vk::ShaderStageFlags::empty();
    if stages.contains(ShaderStages::VERTEX) {
        flags |= vk::ShaderStageFlags::VERTEX;
    }
    if stages.contains(ShaderStages::FRAGMENT) {
        flags |= vk::ShaderStageFlags::FRAGMENT;
    }
    if stages.contains(ShaderStages::COMPUTE) {
        flags |= vk::ShaderStageFlags::COMPUTE;
    }
    flags
}

fn topology_to_vk(topology: PrimitiveTopology) -> vk::PrimitiveTopology {
    match topology {
        PrimitiveTopology::TriangleList => vk::PrimitiveTopology::TRIANGLE_LIST,
        PrimitiveTopology::TriangleStrip => vk::PrimitiveTopology::TRIANGLE_STRIP,
        PrimitiveTopology::LineList => vk::PrimitiveTopology::LINE_LIST,
        PrimitiveTopology::PointList => vk::PrimitiveTopology::POINT_LIST,
    }
}

fn cull_mode_to_vk(mode: CullMode) -> vk::CullModeFlags {
    match mode {
        CullMode::None => vk::CullModeFlags::NONE,
        CullMode::Front => vk::CullModeFlags::FRONT,
        CullMode::Back => vk::CullModeFlags::BACK,
    }
}

fn front_face_to_vk(face: FrontFace) -> vk::FrontFace {
    match face {
        FrontFace::CounterClockwise => vk::FrontFace::COUNTER_CLOCKWISE,
        FrontFace::Clockwise => vk::FrontFace::CLOCKWISE,
    }
}

fn polygon_mode_to_vk(mode: PolygonMode) -> vk::PolygonMode {
    match mode {
        PolygonMode::Fill => vk::PolygonMode::FILL,
        PolygonMode::Line => vk::PolygonMode::LINE,
        PolygonMode::Point => vk::PolygonMode::POINT,
    }
}

fn compare_op_to_vk(op: CompareOp) -> vk::CompareOp {
    match op {
        CompareOp::Never => vk::CompareOp::NEVER,
        CompareOp::Less => vk::CompareOp::LESS,
        CompareOp::Equal => vk::CompareOp::EQUAL,
        CompareOp::LessOrEqual => vk::CompareOp::LESS_OR_EQUAL,
        CompareOp::Greater => vk::CompareOp::GREATER,
        CompareOp::NotEqual => vk::CompareOp::NOT_EQUAL,
        CompareOp::GreaterOrEqual => vk::CompareOp::GREATER_OR_EQUAL,
        CompareOp::Always => vk::CompareOp::ALWAYS,
    }
}

fn blend_factor_to_vk(factor: BlendFactor) -> vk::BlendFactor {
    match factor {
        BlendFactor::Zero => vk::BlendFactor::ZERO,
        BlendFactor::One => vk::BlendFactor::ONE,
        BlendFactor::SrcColor => vk::BlendFactor::SRC_COLOR,
        BlendFactor::OneMinusSrcColor => vk::BlendFactor::ONE_MINUS_SRC_COLOR,
        BlendFactor::DstColor => vk::BlendFactor::DST_COLOR,
        BlendFactor::OneMinusDstColor => vk::BlendFactor::ONE_MINUS_DST_COLOR,
        BlendFactor::SrcAlpha => vk::BlendFactor::SRC_ALPHA,
        BlendFactor::OneMinusSrcAlpha => vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
        BlendFactor::DstAlpha => vk::BlendFactor::DST_ALPHA,
        BlendFactor::OneMinusDstAlpha => vk::BlendFactor::ONE_MINUS_DST_ALPHA,
    }
}

fn blend_op_to_vk(op: BlendOp) -> vk::BlendOp {
    match op {
        BlendOp::Add => vk::BlendOp::ADD,
        BlendOp::Subtract => vk::BlendOp::SUBTRACT,
        BlendOp::ReverseSubtract => vk::BlendOp::REVERSE_SUBTRACT,
        BlendOp::Min => vk::BlendOp::MIN,
        BlendOp::Max => vk::BlendOp::MAX,
    }
}

fn color_write_mask_to_vk(mask: &ColorWriteMask) -> vk::ColorComponentFlags {
    let mut flags = vk::ColorComponentFlags::empty();
    if mask.r {
        flags |= vk::ColorComponentFlags::R;
    }
    if mask.g {
        flags |= vk::ColorComponentFlags::G;
    }
    if mask.b {
        flags |= vk::ColorComponentFlags::B;
    }
    if mask.a {
        flags |= vk::ColorComponentFlags::A;
    }
    flags
}

// ===== DOWNCASTS =====
// Resources are trait objects created by this device; a failed downcast
// means a resource from another backend was passed in.

pub(crate) fn vulkan_image(image: &Arc<dyn DeviceImage>) -> Result<&VulkanImage> {
    image
        .as_any()
        .downcast_ref::<VulkanImage>()
        .ok_or_else(|| lumen_err!(SOURCE, "Foreign image passed to the Vulkan device"))
}

pub(crate) fn vulkan_image_view(view: &Arc<dyn DeviceImageView>) -> Result<&VulkanImageView> {
    view.as_any()
        .downcast_ref::<VulkanImageView>()
        .ok_or_else(|| lumen_err!(SOURCE, "Foreign image view passed to the Vulkan device"))
}

pub(crate) fn vulkan_memory(memory: &Arc<dyn DeviceMemory>) -> Result<&VulkanMemory> {
    memory
        .as_any()
        .downcast_ref::<VulkanMemory>()
        .ok_or_else(|| lumen_err!(SOURCE, "Foreign memory block passed to the Vulkan device"))
}

pub(crate) fn vulkan_buffer(buffer: &Arc<dyn DeviceBuffer>) -> Result<&VulkanBuffer> {
    buffer
        .as_any()
        .downcast_ref::<VulkanBuffer>()
        .ok_or_else(|| lumen_err!(SOURCE, "Foreign buffer passed to the Vulkan device"))
}

pub(crate) fn vulkan_staging_buffer(
    buffer: &Arc<dyn StagingBuffer>,
) -> Result<&VulkanStagingBuffer> {
    buffer
        .as_any()
        .downcast_ref::<VulkanStagingBuffer>()
        .ok_or_else(|| lumen_err!(SOURCE, "Foreign staging buffer passed to the Vulkan device"))
}

pub(crate) fn vulkan_shader(shader: &Arc<dyn ShaderModule>) -> Result<&VulkanShader> {
    shader
        .as_any()
        .downcast_ref::<VulkanShader>()
        .ok_or_else(|| lumen_err!(SOURCE, "Foreign shader module passed to the Vulkan device"))
}

pub(crate) fn vulkan_render_pass(
    render_pass: &Arc<dyn DeviceRenderPass>,
) -> Result<&VulkanRenderPass> {
    render_pass
        .as_any()
        .downcast_ref::<VulkanRenderPass>()
        .ok_or_else(|| lumen_err!(SOURCE, "Foreign render pass passed to the Vulkan device"))
}

pub(crate) fn vulkan_framebuffer(
    framebuffer: &Arc<dyn DeviceFramebuffer>,
) -> Result<&VulkanFramebuffer> {
    framebuffer
        .as_any()
        .downcast_ref::<VulkanFramebuffer>()
        .ok_or_else(|| lumen_err!(SOURCE, "Foreign framebuffer passed to the Vulkan device"))
}

pub(crate) fn vulkan_pipeline(pipeline: &Arc<dyn DevicePipeline>) -> Result<&VulkanPipeline> {
    pipeline
        .as_any()
        .downcast_ref::<VulkanPipeline>()
        .ok_or_else(|| lumen_err!(SOURCE, "Foreign pipeline passed to the Vulkan device"))
}

pub(crate) fn vulkan_sampler(sampler: &Arc<dyn Sampler>) -> Result<&VulkanSampler> {
    sampler
        .as_any()
        .downcast_ref::<VulkanSampler>()
        .ok_or_else(|| lumen_err!(SOURCE, "Foreign sampler passed to the Vulkan device"))
}

pub(crate) fn vulkan_binding_group(group: &Arc<dyn BindingGroup>) -> Result<&VulkanBindingGroup> {
    group
        .as_any()
        .downcast_ref::<VulkanBindingGroup>()
        .ok_or_else(|| lumen_err!(SOURCE, "Foreign binding group passed to the Vulkan device"))
}
