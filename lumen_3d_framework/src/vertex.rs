/// VertexManager - per-attribute vertex and index buffers
///
/// Each attribute lives in its own tightly packed buffer; geometry is
/// appended host-side and pushed to device-local buffers exactly once.

use std::sync::Arc;

use crate::device::{
    BufferDesc, BufferUsage, DeviceBuffer, GraphicsDevice, ImageFormat, IndexType,
    VertexAttribute, VertexBinding, VertexInputRate, VertexLayout,
};
use crate::error::Result;
use crate::frame::Frame;
use crate::lumen_bail;

const SOURCE: &str = "lumen3d::VertexManager";

/// A typed slice of vertex attribute data
pub enum AttributeData<'a> {
    Float(&'a [f32]),
    Vec2(&'a [glam::Vec2]),
    Vec3(&'a [glam::Vec3]),
    Vec4(&'a [glam::Vec4]),
}

impl AttributeData<'_> {
    fn format(&self) -> ImageFormat {
        match self {
            AttributeData::Float(_) => ImageFormat::R32_SFLOAT,
            AttributeData::Vec2(_) => ImageFormat::R32G32_SFLOAT,
            AttributeData::Vec3(_) => ImageFormat::R32G32B32_SFLOAT,
            AttributeData::Vec4(_) => ImageFormat::R32G32B32A32_SFLOAT,
        }
    }

    fn element_count(&self) -> usize {
        match self {
            AttributeData::Float(data) => data.len(),
            AttributeData::Vec2(data) => data.len(),
            AttributeData::Vec3(data) => data.len(),
            AttributeData::Vec4(data) => data.len(),
        }
    }

    fn bytes(&self) -> &[u8] {
        match self {
            AttributeData::Float(data) => bytemuck::cast_slice(data),
            AttributeData::Vec2(data) => bytemuck::cast_slice(data),
            AttributeData::Vec3(data) => bytemuck::cast_slice(data),
            AttributeData::Vec4(data) => bytemuck::cast_slice(data),
        }
    }
}

/// Where a batch of geometry landed in the shared buffers
#[derive(Debug, Clone, Copy)]
pub struct GeometryInfo {
    /// Base vertex passed to indexed draws
    pub vertex_offset: i32,
    /// First index of the batch
    pub index_offset: u32,
    /// Number of indices in the batch
    pub index_count: u32,
}

pub struct VertexManager {
    device: Arc<dyn GraphicsDevice>,
    formats: Vec<ImageFormat>,
    attribute_data: Vec<Vec<u8>>,
    indices: Vec<u32>,
    vertex_count: u32,
    buffers: Vec<Arc<dyn DeviceBuffer>>,
    index_buffer: Option<Arc<dyn DeviceBuffer>>,
}

impl std::fmt::Debug for VertexManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VertexManager").finish_non_exhaustive()
    }
}

impl VertexManager {
    /// Create a manager for the given attribute formats (one buffer each)
    pub fn new(device: Arc<dyn GraphicsDevice>, formats: Vec<ImageFormat>) -> Result<Self> {
        if formats.is_empty() {
            lumen_bail!(SOURCE, "A VertexManager needs at least one attribute");
        }
        for format in &formats {
            if !matches!(
                format,
                ImageFormat::R32_SFLOAT
                    | ImageFormat::R32G32_SFLOAT
                    | ImageFormat::R32G32B32_SFLOAT
                    | ImageFormat::R32G32B32A32_SFLOAT
            ) {
                lumen_bail!(SOURCE, "{:?} is not a vertex attribute format", format);
            }
        }
        let attribute_data = vec![Vec::new(); formats.len()];
        Ok(Self {
            device,
            formats,
            attribute_data,
            indices: Vec::new(),
            vertex_count: 0,
            buffers: Vec::new(),
            index_buffer: None,
        })
    }

    /// Append indexed geometry; indices are relative to this batch's
    /// vertices and draws use the returned `vertex_offset` as base vertex.
    pub fn add_indexed_data(
        &mut self,
        indices: &[u32],
        attributes: &[AttributeData],
    ) -> Result<GeometryInfo> {
        if self.is_pushed() {
            lumen_bail!(SOURCE, "Cannot add geometry after push_to_gpu()");
        }
        if attributes.len() != self.formats.len() {
            lumen_bail!(
                SOURCE,
                "Expected {} attributes, got {}",
                self.formats.len(), attributes.len()
            );
        }
        for (index, (attribute, format)) in attributes.iter().zip(&self.formats).enumerate() {
            if attribute.format() != *format {
                lumen_bail!(
                    SOURCE,
                    "Attribute {} is {:?}, expected {:?}",
                    index, attribute.format(), format
                );
            }
        }
        let count = attributes[0].element_count();
        if attributes.iter().any(|a| a.element_count() != count) {
            lumen_bail!(SOURCE, "All attributes must supply the same number of vertices");
        }
        if count == 0 {
            lumen_bail!(SOURCE, "Geometry batch has no vertices");
        }
        if let Some(&bad) = indices.iter().find(|&&i| i as usize >= count) {
            lumen_bail!(SOURCE, "Index {} out of range for {} vertices", bad, count);
        }

        let info = GeometryInfo {
            vertex_offset: self.vertex_count as i32,
            index_offset: self.indices.len() as u32,
            index_count: indices.len() as u32,
        };
        for (data, attribute) in self.attribute_data.iter_mut().zip(attributes) {
            data.extend_from_slice(attribute.bytes());
        }
        self.indices.extend_from_slice(indices);
        self.vertex_count += count as u32;
        Ok(info)
    }

    /// True once the device-local buffers exist
    pub fn is_pushed(&self) -> bool {
        self.index_buffer.is_some()
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    /// Build the device-local buffers. Legal exactly once.
    pub fn push_to_gpu(&mut self) -> Result<()> {
        if self.is_pushed() {
            lumen_bail!(SOURCE, "VertexManager::push_to_gpu() called twice");
        }
        if self.vertex_count == 0 {
            lumen_bail!(SOURCE, "VertexManager has no vertex data");
        }

        for (index, data) in self.attribute_data.iter().enumerate() {
            let buffer = self.device.create_buffer(&BufferDesc {
                name: format!("vertex attribute {}", index),
                usage: BufferUsage::Vertex,
                data: data.clone(),
            })?;
            self.buffers.push(buffer);
        }
        let index_buffer = self.device.create_buffer(&BufferDesc {
            name: "vertex indices".to_string(),
            usage: BufferUsage::Index,
            data: bytemuck::cast_slice(&self.indices).to_vec(),
        })?;
        self.index_buffer = Some(index_buffer);
        Ok(())
    }

    /// Bind all attribute buffers and the index buffer
    pub fn bind(&self, frame: &mut Frame) -> Result<()> {
        let index_buffer = match &self.index_buffer {
            Some(buffer) => buffer,
            None => lumen_bail!(SOURCE, "VertexManager has not been pushed to the GPU"),
        };
        let cmd = frame.command_list();
        cmd.bind_vertex_buffers(&self.buffers)?;
        cmd.bind_index_buffer(index_buffer, IndexType::U32)
    }

    /// Pipeline vertex-input layout matching this manager's buffers
    pub fn vertex_layout(&self) -> VertexLayout {
        let mut bindings = Vec::with_capacity(self.formats.len());
        let mut attributes = Vec::with_capacity(self.formats.len());
        for (index, format) in self.formats.iter().enumerate() {
            bindings.push(VertexBinding {
                binding: index as u32,
                stride: format.bytes_per_element(),
                input_rate: VertexInputRate::Vertex,
            });
            attributes.push(VertexAttribute {
                location: index as u32,
                binding: index as u32,
                format: *format,
                offset: 0,
            });
        }
        VertexLayout { bindings, attributes }
    }
}

#[cfg(test)]
#[path = "vertex_tests.rs"]
mod tests;
