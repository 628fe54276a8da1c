/// ImageStore - owns every GPU image and batches host->device uploads
///
/// Loads are memoized by name (or path, or cube name): loading the same
/// key twice returns the same `ImageKey`. `push_to_gpu` processes all
/// not-yet-uploaded images in one pass with a single memory allocation
/// and a single staging buffer, then runs registered callbacks; calling
/// it again is a no-op for images already uploaded.

use std::path::Path;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use slotmap::SlotMap;

use crate::device::{
    GraphicsDevice, ImageAspect, ImageFormat, ImageLayout, ImageUsage, ImageViewDesc,
    ImageViewKind,
};
use crate::error::Result;
use crate::lumen_bail;
use super::image::Image;

const SOURCE: &str = "lumen3d::ImageStore";

slotmap::new_key_type! {
    /// Handle to an image owned by an `ImageStore`
    pub struct ImageKey;
}

/// Decoded pixel data for one image or cube face
#[derive(Debug, Clone)]
pub struct PixelData {
    pub width: u32,
    pub height: u32,
    /// Tightly packed rows, matching the load's format
    pub pixels: Vec<u8>,
}

/// Bytes of padding needed to align `offset` up to `alignment`
pub(crate) fn compute_padding(offset: u64, alignment: u64) -> u64 {
    if alignment == 0 {
        return 0;
    }
    (alignment - offset % alignment) % alignment
}

pub struct ImageStore {
    device: Arc<dyn GraphicsDevice>,
    images: SlotMap<ImageKey, Image>,
    by_name: FxHashMap<String, ImageKey>,
    /// Insertion order, so batch offset tables are deterministic
    upload_order: Vec<ImageKey>,
    uninitialized_counter: u32,
    callbacks: Vec<Box<dyn FnMut()>>,
}

impl ImageStore {
    pub fn new(device: Arc<dyn GraphicsDevice>) -> Self {
        Self {
            device,
            images: SlotMap::with_key(),
            by_name: FxHashMap::default(),
            upload_order: Vec::new(),
            uninitialized_counter: 0,
            callbacks: Vec::new(),
        }
    }

    // ===== ACCESS =====

    pub fn get(&self, key: ImageKey) -> Result<&Image> {
        match self.images.get(key) {
            Some(image) => Ok(image),
            None => Err(crate::lumen_err!(SOURCE, "Unknown image key")),
        }
    }

    pub fn get_mut(&mut self, key: ImageKey) -> Result<&mut Image> {
        match self.images.get_mut(key) {
            Some(image) => Ok(image),
            None => Err(crate::lumen_err!(SOURCE, "Unknown image key")),
        }
    }

    /// Look up a previously loaded image by its memoization key
    pub fn key_by_name(&self, name: &str) -> Option<ImageKey> {
        self.by_name.get(name).copied()
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    // ===== CREATION =====

    /// Create an attachment or storage image with no host data.
    /// Always returns a fresh key.
    #[allow(clippy::too_many_arguments)]
    pub fn create_uninitialized(
        &mut self,
        width: u32,
        height: u32,
        layer_count: u32,
        format: ImageFormat,
        usage: ImageUsage,
        aspect: ImageAspect,
        view_kind: ImageViewKind,
    ) -> Result<ImageKey> {
        let name = format!("$uninitialized{}", self.uninitialized_counter);
        self.uninitialized_counter += 1;

        let layer_pixels = vec![Vec::new(); layer_count as usize];
        let image = Image::new(
            &self.device,
            &name,
            width,
            height,
            format,
            usage,
            aspect,
            view_kind,
            layer_pixels,
            ImageLayout::Undefined,
        )?;
        Ok(self.insert(name, image))
    }

    /// Load a 2D image from decoded pixels, memoized by `name`
    pub fn load_from_pixels(
        &mut self,
        name: &str,
        data: PixelData,
        format: ImageFormat,
    ) -> Result<ImageKey> {
        if let Some(key) = self.by_name.get(name) {
            return self.check_existing(*key, name, format, ImageViewKind::D2);
        }

        let image = Image::new(
            &self.device,
            name,
            data.width,
            data.height,
            format,
            ImageUsage::SAMPLED | ImageUsage::TRANSFER_DST,
            ImageAspect::Color,
            ImageViewKind::D2,
            vec![data.pixels],
            ImageLayout::ShaderReadOnly,
        )?;
        Ok(self.insert(name.to_string(), image))
    }

    /// Load a 2D image from a file, memoized by path.
    /// Decoding goes through the `image` crate; only 8-bit RGBA formats
    /// are supported on this path.
    pub fn load_from_file(&mut self, path: &Path, format: ImageFormat) -> Result<ImageKey> {
        let name = path.to_string_lossy().to_string();
        if let Some(key) = self.by_name.get(&name) {
            return self.check_existing(*key, &name, format, ImageViewKind::D2);
        }

        if !matches!(
            format,
            ImageFormat::R8G8B8A8_SRGB | ImageFormat::R8G8B8A8_UNORM
        ) {
            lumen_bail!(
                SOURCE,
                "Cannot decode '{}' as {:?}: file loading supports 8-bit RGBA only",
                name, format
            );
        }

        let decoded = match image::open(path) {
            Ok(img) => img.to_rgba8(),
            Err(err) => lumen_bail!(SOURCE, "Failed to decode image '{}': {}", name, err),
        };
        let (width, height) = decoded.dimensions();
        let data = PixelData {
            width,
            height,
            pixels: decoded.into_raw(),
        };
        self.load_from_pixels(&name, data, format)
    }

    /// Create a 1x1 solid color image, memoized by the color value
    pub fn create_solid_color(&mut self, color: [u8; 4]) -> Result<ImageKey> {
        let name = format!("{},{},{},{}", color[0], color[1], color[2], color[3]);
        if let Some(key) = self.by_name.get(&name) {
            return Ok(*key);
        }
        let data = PixelData {
            width: 1,
            height: 1,
            pixels: color.to_vec(),
        };
        self.load_from_pixels(&name, data, ImageFormat::R8G8B8A8_UNORM)
    }

    /// Load a cube map from six decoded faces, memoized by `name`.
    /// Faces must be square and all the same size.
    pub fn load_cube(
        &mut self,
        name: &str,
        faces: Vec<PixelData>,
        format: ImageFormat,
    ) -> Result<ImageKey> {
        if let Some(key) = self.by_name.get(name) {
            return self.check_existing(*key, name, format, ImageViewKind::Cube);
        }

        if faces.len() != 6 {
            lumen_bail!(SOURCE, "Cube map '{}' needs 6 faces, got {}", name, faces.len());
        }
        let width = faces[0].width;
        let height = faces[0].height;
        if width != height {
            lumen_bail!(SOURCE, "Cube map '{}' faces must be square, got {}x{}", name, width, height);
        }
        for (index, face) in faces.iter().enumerate() {
            if face.width != width || face.height != height {
                lumen_bail!(
                    SOURCE,
                    "Cube map '{}' face {} is {}x{}, expected {}x{}",
                    name, index, face.width, face.height, width, height
                );
            }
        }

        let layer_pixels = faces.into_iter().map(|face| face.pixels).collect();
        let image = Image::new(
            &self.device,
            name,
            width,
            height,
            format,
            ImageUsage::SAMPLED | ImageUsage::TRANSFER_DST,
            ImageAspect::Color,
            ImageViewKind::Cube,
            layer_pixels,
            ImageLayout::ShaderReadOnly,
        )?;
        Ok(self.insert(name.to_string(), image))
    }

    /// Register a callback invoked after every upload batch
    pub fn add_upload_callback(&mut self, callback: Box<dyn FnMut()>) {
        self.callbacks.push(callback);
    }

    // ===== UPLOAD =====

    /// Upload every not-yet-uploaded image in one batch: one memory
    /// allocation for the lot, one staging buffer sized to the largest
    /// mip, then view creation and the registered callbacks.
    /// Already-uploaded images are skipped; with nothing pending this
    /// is a no-op.
    pub fn push_to_gpu(&mut self) -> Result<()> {
        let pending: Vec<ImageKey> = self
            .upload_order
            .iter()
            .copied()
            .filter(|key| {
                self.images
                    .get(*key)
                    .map(|image| !image.is_uploaded())
                    .unwrap_or(false)
            })
            .collect();
        if pending.is_empty() {
            return Ok(());
        }

        // Packed offset table honoring each image's alignment
        let mut offsets = Vec::with_capacity(pending.len());
        let mut total: u64 = 0;
        let mut largest_mip: u64 = 0;
        let mut type_bits: u32 = !0;
        for key in &pending {
            let image = self.get(*key)?;
            let req = image.memory_requirements();
            total += compute_padding(total, req.alignment);
            offsets.push(total);
            total += req.size;
            type_bits &= req.memory_type_bits;
            for layer in &image.layers {
                for mip in &layer.mips {
                    largest_mip = largest_mip.max(mip.pixels.len() as u64);
                }
            }
        }
        if type_bits == 0 {
            lumen_bail!(SOURCE, "No common memory type for {} pending images", pending.len());
        }

        let memory = self.device.allocate_memory(total, type_bits)?;
        let staging = self.device.create_staging_buffer(largest_mip.max(4))?;

        let device = self.device.clone();
        for (key, offset) in pending.iter().zip(offsets) {
            {
                let image = self.get(*key)?;
                device.bind_image_memory(image.device_handle(), &memory, offset)?;
            }
            self.copy_image_data(*key, &staging)?;
            self.create_views(*key)?;
            self.get_mut(*key)?.uploaded = true;
        }

        crate::lumen_debug!(SOURCE, "Uploaded {} images ({} bytes)", pending.len(), total);

        let mut callbacks = std::mem::take(&mut self.callbacks);
        for callback in callbacks.iter_mut() {
            callback();
        }
        self.callbacks = callbacks;

        Ok(())
    }

    /// Stream an image's mip data through the shared staging buffer.
    /// Images with no host data keep their `Undefined` layouts.
    fn copy_image_data(&mut self, key: ImageKey, staging: &Arc<dyn crate::device::StagingBuffer>) -> Result<()> {
        let device = self.device.clone();
        let has_data = self
            .get(key)?
            .layers
            .iter()
            .any(|layer| layer.mips.iter().any(|mip| !mip.pixels.is_empty()));
        if !has_data {
            return Ok(());
        }

        {
            let mut cmd = device.create_command_list()?;
            cmd.begin()?;
            self.get_mut(key)?
                .layout_transition(ImageLayout::TransferDst, &mut *cmd)?;
            cmd.end()?;
            device.submit_and_wait(&mut *cmd)?;
        }

        let (layer_count, mip_count, aspect) = {
            let image = self.get(key)?;
            (image.layer_count(), image.mip_count(), image.aspect())
        };
        for layer in 0..layer_count {
            for mip in 0..mip_count {
                let (pixels, width, height) = {
                    let image = self.get(key)?;
                    let m = &image.layers[layer as usize].mips[mip as usize];
                    (m.pixels.clone(), m.width, m.height)
                };
                if pixels.is_empty() {
                    continue;
                }
                staging.write(&pixels)?;
                let image = self.get(key)?;
                let mut cmd = device.create_command_list()?;
                cmd.begin()?;
                cmd.copy_buffer_to_image(
                    staging,
                    image.device_handle(),
                    aspect,
                    layer,
                    mip,
                    width,
                    height,
                )?;
                cmd.end()?;
                device.submit_and_wait(&mut *cmd)?;
            }
        }

        let final_layout = self.get(key)?.final_layout;
        if final_layout != ImageLayout::Undefined {
            let mut cmd = device.create_command_list()?;
            cmd.begin()?;
            self.get_mut(key)?.layout_transition(final_layout, &mut *cmd)?;
            cmd.end()?;
            device.submit_and_wait(&mut *cmd)?;
        }
        Ok(())
    }

    /// Create the all-layers view and one view per layer
    fn create_views(&mut self, key: ImageKey) -> Result<()> {
        let device = self.device.clone();
        let image = self.get_mut(key)?;
        let layer_count = image.layer_count();
        let mip_count = image.mip_count();
        let aspect = image.aspect();

        let view = device.create_image_view(
            image.device_handle(),
            &ImageViewDesc {
                kind: image.view_kind(),
                aspect,
                base_layer: 0,
                layer_count,
                base_mip: 0,
                mip_count,
            },
        )?;
        let mut layer_views = Vec::with_capacity(layer_count as usize);
        for layer in 0..layer_count {
            layer_views.push(device.create_image_view(
                image.device_handle(),
                &ImageViewDesc {
                    kind: ImageViewKind::D2,
                    aspect,
                    base_layer: layer,
                    layer_count: 1,
                    base_mip: 0,
                    mip_count,
                },
            )?);
        }
        image.view = Some(view);
        image.layer_views = layer_views;
        Ok(())
    }

    // ===== INTERNALS =====

    fn insert(&mut self, name: String, image: Image) -> ImageKey {
        let key = self.images.insert(image);
        self.by_name.insert(name, key);
        self.upload_order.push(key);
        key
    }

    fn check_existing(
        &self,
        key: ImageKey,
        name: &str,
        format: ImageFormat,
        view_kind: ImageViewKind,
    ) -> Result<ImageKey> {
        let existing = self.get(key)?;
        if existing.format() != format {
            lumen_bail!(
                SOURCE,
                "Two images have the same name but different formats: '{}' ({:?} vs {:?})",
                name, existing.format(), format
            );
        }
        if existing.view_kind() != view_kind {
            lumen_bail!(
                SOURCE,
                "Two images have the same name but different view kinds: '{}' ({:?} vs {:?})",
                name, existing.view_kind(), view_kind
            );
        }
        Ok(key)
    }
}

#[cfg(test)]
#[path = "image_store_tests.rs"]
mod tests;
