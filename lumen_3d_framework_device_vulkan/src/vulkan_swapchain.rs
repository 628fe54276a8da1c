/// VulkanSwapchain - Vulkan implementation of the Swapchain trait

use std::any::Any;
use std::sync::Arc;

use ash::vk;
use lumen_3d_framework::lumen3d::device::{
    DeviceImage, ImageAspect, ImageDesc, ImageFormat, ImageUsage, ImageViewKind, SampleCount,
    Swapchain,
};
use lumen_3d_framework::lumen3d::{Error, Result};
use lumen_3d_framework::{lumen_err, lumen_error};

use crate::vulkan_context::GpuContext;
use crate::vulkan_image::VulkanImage;

const SOURCE: &str = "lumen3d::vulkan";

const MAX_FRAMES_IN_FLIGHT: usize = 2;

/// Vulkan swapchain implementation
///
/// Manages presentation to the window, completely separated from rendering
/// logic. Handles image acquisition and presentation; the acquired images are
/// exposed as regular device images so the framework can render into them.
pub struct VulkanSwapchain {
    ctx: Arc<GpuContext>,

    /// Surface
    surface: vk::SurfaceKHR,
    surface_loader: ash::khr::surface::Instance,

    /// Swapchain
    swapchain: vk::SwapchainKHR,
    swapchain_loader: ash::khr::swapchain::Device,
    swapchain_images: Vec<vk::Image>,
    format: ImageFormat,
    extent: vk::Extent2D,

    /// One semaphore per frame in flight (for acquire)
    image_available_semaphores: Vec<vk::Semaphore>,
    /// One semaphore per swapchain image (for present)
    render_finished_semaphores: Vec<vk::Semaphore>,

    /// Current frame in flight (0 or 1 for double buffering)
    current_frame: usize,
}

impl VulkanSwapchain {
    pub(crate) fn new(
        ctx: Arc<GpuContext>,
        physical_device: vk::PhysicalDevice,
        instance: &ash::Instance,
        surface: vk::SurfaceKHR,
        surface_loader: ash::khr::surface::Instance,
        image_count: u32,
    ) -> Result<Self> {
        unsafe {
            let surface_capabilities = surface_loader
                .get_physical_device_surface_capabilities(physical_device, surface)
                .map_err(|e| {
                    lumen_error!(SOURCE, "Failed to get surface capabilities: {:?}", e);
                    Error::InitializationFailed(format!(
                        "Failed to get surface capabilities: {:?}",
                        e
                    ))
                })?;

            let surface_formats = surface_loader
                .get_physical_device_surface_formats(physical_device, surface)
                .map_err(|e| {
                    lumen_error!(SOURCE, "Failed to query surface formats: {:?}", e);
                    Error::InitializationFailed(format!("Failed to get surface formats: {:?}", e))
                })?;

            let surface_format = surface_formats
                .iter()
                .find(|f| vk_format_to_format(f.format).is_some())
                .unwrap_or(&surface_formats[0]);

            let format = vk_format_to_format(surface_format.format).ok_or_else(|| {
                lumen_err!(
                    SOURCE,
                    "Surface offers no supported swapchain format (got {:?})",
                    surface_format.format
                )
            })?;

            let extent = surface_capabilities.current_extent;

            // Honor the requested image count within the surface's limits
            let mut min_image_count = image_count.max(surface_capabilities.min_image_count);
            if surface_capabilities.max_image_count > 0 {
                min_image_count = min_image_count.min(surface_capabilities.max_image_count);
            }

            let swapchain_create_info = vk::SwapchainCreateInfoKHR::default()
                .surface(surface)
                .min_image_count(min_image_count)
                .image_format(surface_format.format)
                .image_color_space(surface_format.color_space)
                .image_extent(extent)
                .image_array_layers(1)
                .image_usage(
                    vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST,
                )
                .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
                .pre_transform(surface_capabilities.current_transform)
                .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
                .present_mode(vk::PresentModeKHR::FIFO)
                .clipped(true);

            let swapchain_loader = ash::khr::swapchain::Device::new(instance, &ctx.device);
            let swapchain = swapchain_loader
                .create_swapchain(&swapchain_create_info, None)
                .map_err(|e| {
                    lumen_error!(SOURCE, "Failed to create swapchain: {:?}", e);
                    Error::InitializationFailed(format!("Failed to create swapchain: {:?}", e))
                })?;

            let swapchain_images = swapchain_loader.get_swapchain_images(swapchain).map_err(
                |e| {
                    lumen_error!(SOURCE, "Failed to get swapchain images: {:?}", e);
                    Error::InitializationFailed(format!("Failed to get swapchain images: {:?}", e))
                },
            )?;

            let semaphore_create_info = vk::SemaphoreCreateInfo::default();

            let mut image_available_semaphores = Vec::with_capacity(MAX_FRAMES_IN_FLIGHT);
            for _ in 0..MAX_FRAMES_IN_FLIGHT {
                image_available_semaphores.push(
                    ctx.device
                        .create_semaphore(&semaphore_create_info, None)
                        .map_err(|e| {
                            lumen_error!(
                                SOURCE,
                                "Failed to create image-available semaphore: {:?}",
                                e
                            );
                            Error::InitializationFailed(format!(
                                "Failed to create semaphore: {:?}",
                                e
                            ))
                        })?,
                );
            }

            let mut render_finished_semaphores = Vec::with_capacity(swapchain_images.len());
            for _ in 0..swapchain_images.len() {
                render_finished_semaphores.push(
                    ctx.device
                        .create_semaphore(&semaphore_create_info, None)
                        .map_err(|e| {
                            lumen_error!(
                                SOURCE,
                                "Failed to create render-finished semaphore: {:?}",
                                e
                            );
                            Error::InitializationFailed(format!(
                                "Failed to create semaphore: {:?}",
                                e
                            ))
                        })?,
                );
            }

            Ok(Self {
                ctx,
                surface,
                surface_loader,
                swapchain,
                swapchain_loader,
                swapchain_images,
                format,
                extent,
                image_available_semaphores,
                render_finished_semaphores,
                current_frame: 0,
            })
        }
    }

    /// Synchronization info for submitting with this swapchain.
    ///
    /// Returns (wait_semaphore, signal_semaphore) for the current frame and
    /// image. Used by `VulkanDevice::submit_with_swapchain()`.
    pub(crate) fn sync_info(&self, image_index: u32) -> (vk::Semaphore, vk::Semaphore) {
        (
            self.image_available_semaphores[self.current_frame],
            self.render_finished_semaphores[image_index as usize],
        )
    }
}

impl Swapchain for VulkanSwapchain {
    fn image_count(&self) -> u32 {
        self.swapchain_images.len() as u32
    }

    fn width(&self) -> u32 {
        self.extent.width
    }

    fn height(&self) -> u32 {
        self.extent.height
    }

    fn format(&self) -> ImageFormat {
        self.format
    }

    fn images(&self) -> Vec<Arc<dyn DeviceImage>> {
        self.swapchain_images
            .iter()
            .enumerate()
            .map(|(index, &image)| {
                Arc::new(VulkanImage {
                    image,
                    desc: ImageDesc {
                        name: format!("swapchain_image_{}", index),
                        width: self.extent.width,
                        height: self.extent.height,
                        layer_count: 1,
                        mip_count: 1,
                        format: self.format,
                        usage: ImageUsage::COLOR_ATTACHMENT | ImageUsage::TRANSFER_DST,
                        aspect: ImageAspect::Color,
                        view_kind: ImageViewKind::D2,
                        sample_count: SampleCount::S1,
                    },
                    owned: false,
                    ctx: self.ctx.clone(),
                }) as Arc<dyn DeviceImage>
            })
            .collect()
    }

    fn acquire_next_image(&mut self) -> Result<u32> {
        unsafe {
            let (image_index, _is_suboptimal) = self
                .swapchain_loader
                .acquire_next_image(
                    self.swapchain,
                    u64::MAX,
                    self.image_available_semaphores[self.current_frame],
                    vk::Fence::null(),
                )
                .map_err(|e| {
                    if e == vk::Result::ERROR_OUT_OF_DATE_KHR {
                        lumen_err!(SOURCE, "Swapchain out of date during acquire")
                    } else {
                        lumen_err!(SOURCE, "Failed to acquire next swapchain image: {:?}", e)
                    }
                })?;

            Ok(image_index)
        }
    }

    fn present(&mut self, image_index: u32) -> Result<()> {
        unsafe {
            let swapchains = [self.swapchain];
            let image_indices = [image_index];
            let wait_semaphores = [self.render_finished_semaphores[image_index as usize]];

            let present_info = vk::PresentInfoKHR::default()
                .wait_semaphores(&wait_semaphores)
                .swapchains(&swapchains)
                .image_indices(&image_indices);

            match self
                .swapchain_loader
                .queue_present(self.ctx.graphics_queue, &present_info)
            {
                Ok(_) | Err(vk::Result::SUBOPTIMAL_KHR) => {
                    self.current_frame = (self.current_frame + 1) % MAX_FRAMES_IN_FLIGHT;
                    Ok(())
                }
                Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                    self.current_frame = (self.current_frame + 1) % MAX_FRAMES_IN_FLIGHT;
                    Err(lumen_err!(SOURCE, "Swapchain out of date during present"))
                }
                Err(e) => Err(lumen_err!(
                    SOURCE,
                    "Failed to present swapchain image: {:?}",
                    e
                )),
            }
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for VulkanSwapchain {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device.device_wait_idle().ok();

            for &semaphore in &self.image_available_semaphores {
                self.ctx.device.destroy_semaphore(semaphore, None);
            }
            for &semaphore in &self.render_finished_semaphores {
                self.ctx.device.destroy_semaphore(semaphore, None);
            }

            self.swapchain_loader.destroy_swapchain(self.swapchain, None);
            self.surface_loader.destroy_surface(self.surface, None);
        }
    }
}

/// Map a Vulkan surface format to the framework's image format
fn vk_format_to_format(vk_format: vk::Format) -> Option<ImageFormat> {
    match vk_format {
        vk::Format::R8G8B8A8_SRGB => Some(ImageFormat::R8G8B8A8_SRGB),
        vk::Format::R8G8B8A8_UNORM => Some(ImageFormat::R8G8B8A8_UNORM),
        vk::Format::B8G8R8A8_SRGB => Some(ImageFormat::B8G8R8A8_SRGB),
        vk::Format::B8G8R8A8_UNORM => Some(ImageFormat::B8G8R8A8_UNORM),
        _ => None,
    }
}
