/// VulkanShader - shader module creation with SPIR-V reflection
///
/// Pipelines need descriptor set layouts before any binding group exists,
/// so each shader reflects its own SPIR-V (via spirq) at creation time and
/// pipeline creation merges the bindings of its stages.

use std::any::Any;
use std::ffi::CString;
use std::sync::Arc;

use ash::vk;
use lumen_3d_framework::lumen3d::device::{ShaderDesc, ShaderModule, ShaderStage};
use lumen_3d_framework::lumen3d::Result;
use lumen_3d_framework::{lumen_bail, lumen_err};

use crate::vulkan_context::GpuContext;

const SOURCE: &str = "lumen3d::vulkan";

/// One descriptor binding reflected from SPIR-V
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ReflectedBinding {
    pub set: u32,
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
}

/// Vulkan shader module implementation
pub struct VulkanShader {
    pub(crate) module: vk::ShaderModule,
    pub(crate) stage: ShaderStage,
    pub(crate) entry_point: CString,
    pub(crate) reflected_bindings: Vec<ReflectedBinding>,
    pub(crate) ctx: Arc<GpuContext>,
}

impl VulkanShader {
    pub(crate) fn new(ctx: Arc<GpuContext>, desc: &ShaderDesc) -> Result<Self> {
        if desc.code.is_empty() {
            lumen_bail!(SOURCE, "Shader module has no code");
        }
        if desc.code.len() % 4 != 0 {
            lumen_bail!(
                SOURCE,
                "SPIR-V bytecode length {} is not a multiple of 4",
                desc.code.len()
            );
        }

        let words: Vec<u32> = desc
            .code
            .chunks_exact(4)
            .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();

        let reflected_bindings = reflect_bindings(&words)?;

        let entry_point = CString::new(desc.entry_point.as_str())
            .map_err(|_| lumen_err!(SOURCE, "Shader entry point contains a NUL byte"))?;

        let create_info = vk::ShaderModuleCreateInfo::default().code(&words);
        let module = unsafe {
            ctx.device
                .create_shader_module(&create_info, None)
                .map_err(|e| lumen_err!(SOURCE, "Failed to create shader module: {:?}", e))?
        };

        Ok(Self {
            module,
            stage: desc.stage,
            entry_point,
            reflected_bindings,
            ctx,
        })
    }

    pub(crate) fn stage_flags(&self) -> vk::ShaderStageFlags {
        match self.stage {
            ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
            ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
            ShaderStage::Compute => vk::ShaderStageFlags::COMPUTE,
        }
    }
}

impl ShaderModule for VulkanShader {
    fn stage(&self) -> ShaderStage {
        self.stage
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for VulkanShader {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device.destroy_shader_module(self.module, None);
        }
    }
}

/// Extract descriptor bindings from SPIR-V bytecode
fn reflect_bindings(code: &[u32]) -> Result<Vec<ReflectedBinding>> {
    let entry_points = spirq::ReflectConfig::new()
        .spv(code)
        .ref_all_rscs(true)
        .reflect()
        .map_err(|e| lumen_err!(SOURCE, "SPIR-V reflection failed: {:?}", e))?;

    let mut bindings = Vec::new();
    for entry_point in &entry_points {
        for var in entry_point.vars.iter() {
            if let spirq::var::Variable::Descriptor { desc_bind, desc_ty, .. } = var {
                bindings.push(ReflectedBinding {
                    set: desc_bind.set(),
                    binding: desc_bind.bind(),
                    descriptor_type: descriptor_type_to_vk(desc_ty)?,
                });
            }
        }
    }
    Ok(bindings)
}

fn descriptor_type_to_vk(desc_ty: &spirq::ty::DescriptorType) -> Result<vk::DescriptorType> {
    use spirq::ty::DescriptorType;
    match desc_ty {
        DescriptorType::UniformBuffer() => Ok(vk::DescriptorType::UNIFORM_BUFFER),
        DescriptorType::StorageBuffer(..) => Ok(vk::DescriptorType::STORAGE_BUFFER),
        DescriptorType::CombinedImageSampler() => Ok(vk::DescriptorType::COMBINED_IMAGE_SAMPLER),
        DescriptorType::SampledImage() => Ok(vk::DescriptorType::SAMPLED_IMAGE),
        DescriptorType::Sampler() => Ok(vk::DescriptorType::SAMPLER),
        DescriptorType::StorageImage(..) => Ok(vk::DescriptorType::STORAGE_IMAGE),
        other => {
            lumen_bail!(SOURCE, "Unsupported SPIR-V descriptor type: {:?}", other);
        }
    }
}
