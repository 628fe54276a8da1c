/// VulkanSampler - Vulkan implementation of the Sampler trait

use std::any::Any;
use std::sync::Arc;

use ash::vk;
use lumen_3d_framework::lumen3d::device::{AddressMode, Filter, Sampler, SamplerDesc};
use lumen_3d_framework::lumen3d::Result;
use lumen_3d_framework::lumen_err;

use crate::vulkan_context::GpuContext;

const SOURCE: &str = "lumen3d::vulkan";

pub struct VulkanSampler {
    pub(crate) sampler: vk::Sampler,
    pub(crate) ctx: Arc<GpuContext>,
}

impl VulkanSampler {
    pub(crate) fn new(ctx: Arc<GpuContext>, desc: &SamplerDesc) -> Result<Self> {
        let create_info = vk::SamplerCreateInfo::default()
            .mag_filter(filter_to_vk(desc.mag_filter))
            .min_filter(filter_to_vk(desc.min_filter))
            .mipmap_mode(match desc.mipmap_filter {
                Filter::Nearest => vk::SamplerMipmapMode::NEAREST,
                Filter::Linear => vk::SamplerMipmapMode::LINEAR,
            })
            .address_mode_u(address_mode_to_vk(desc.address_mode))
            .address_mode_v(address_mode_to_vk(desc.address_mode))
            .address_mode_w(address_mode_to_vk(desc.address_mode))
            .mip_lod_bias(0.0)
            .min_lod(0.0)
            .max_lod(vk::LOD_CLAMP_NONE)
            .border_color(vk::BorderColor::FLOAT_OPAQUE_BLACK)
            .unnormalized_coordinates(false)
            .anisotropy_enable(false)
            .max_anisotropy(1.0)
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS);

        let sampler = unsafe {
            ctx.device
                .create_sampler(&create_info, None)
                .map_err(|e| lumen_err!(SOURCE, "Failed to create sampler: {:?}", e))?
        };

        Ok(Self { sampler, ctx })
    }
}

impl Sampler for VulkanSampler {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for VulkanSampler {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device.destroy_sampler(self.sampler, None);
        }
    }
}

fn filter_to_vk(filter: Filter) -> vk::Filter {
    match filter {
        Filter::Nearest => vk::Filter::NEAREST,
        Filter::Linear => vk::Filter::LINEAR,
    }
}

fn address_mode_to_vk(mode: AddressMode) -> vk::SamplerAddressMode {
    match mode {
        AddressMode::ClampToEdge => vk::SamplerAddressMode::CLAMP_TO_EDGE,
        AddressMode::Repeat => vk::SamplerAddressMode::REPEAT,
    }
}
