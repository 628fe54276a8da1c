/// GPU-resident image with per-mip layout tracking
///
/// Every mip of every layer tracks its own access layout. A freshly
/// created image is fully `Undefined`; any read or write must first
/// record a transition barrier through `layout_transition*`.

use std::ops::Range;
use std::sync::Arc;

use crate::device::{
    CommandList, DeviceImage, DeviceImageView, GraphicsDevice, ImageAspect, ImageDesc,
    ImageFormat, ImageLayout, ImageRegion, ImageUsage, ImageViewKind, MemoryRequirements,
    SampleCount,
};
use crate::error::Result;
use crate::lumen_bail;
use super::scale;

const SOURCE: &str = "lumen3d::Image";

/// Largest supported image dimension
pub const MAX_IMAGE_DIMENSION: u32 = 32768;

/// One mip level of one layer
#[derive(Debug, Clone)]
pub struct Mip {
    pub width: u32,
    pub height: u32,
    /// Host pixel data; empty for attachment images
    pub pixels: Vec<u8>,
    pub(crate) layout: ImageLayout,
}

/// One array layer: a chain of mips down to 1x1
#[derive(Debug, Clone, Default)]
pub struct ImageLayer {
    pub mips: Vec<Mip>,
}

impl ImageLayer {
    /// Build the remaining mip chain by iterative 2x box downsampling.
    /// Mip 0 must already be present; empty mip-0 pixels produce empty mips.
    pub(crate) fn make_mip_pyramid(&mut self) {
        let (mut width, mut height, mut pixels) = {
            let base = &self.mips[0];
            (base.width, base.height, base.pixels.clone())
        };
        while width > 1 || height > 1 {
            if pixels.is_empty() {
                let (w, h) = scale::next_mip_size(width, height);
                width = w;
                height = h;
            } else {
                let (w, h, next) = scale::shrink_rgba8(width, height, &pixels);
                width = w;
                height = h;
                pixels = next;
            }
            self.mips.push(Mip {
                width,
                height,
                pixels: pixels.clone(),
                layout: ImageLayout::Undefined,
            });
        }
    }
}

/// A GPU image owned by the `ImageStore`
pub struct Image {
    pub(crate) name: String,
    width: u32,
    height: u32,
    format: ImageFormat,
    usage: ImageUsage,
    aspect: ImageAspect,
    view_kind: ImageViewKind,
    pub(crate) layers: Vec<ImageLayer>,
    handle: Arc<dyn DeviceImage>,
    requirements: MemoryRequirements,
    /// All-layers view; present once the image has been uploaded
    pub(crate) view: Option<Arc<dyn DeviceImageView>>,
    /// One single-layer view per layer, created alongside `view`
    pub(crate) layer_views: Vec<Arc<dyn DeviceImageView>>,
    /// Layout the store leaves the image in after upload
    pub(crate) final_layout: ImageLayout,
    pub(crate) uploaded: bool,
}

impl std::fmt::Debug for Image {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Image").field("name", &self.name).finish_non_exhaustive()
    }
}

impl Image {
    /// Create an image and its full (possibly empty) mip chains.
    ///
    /// `layer_pixels` supplies mip-0 data per layer; pass empty vectors
    /// for attachment images.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        device: &Arc<dyn GraphicsDevice>,
        name: &str,
        width: u32,
        height: u32,
        format: ImageFormat,
        usage: ImageUsage,
        aspect: ImageAspect,
        view_kind: ImageViewKind,
        layer_pixels: Vec<Vec<u8>>,
        final_layout: ImageLayout,
    ) -> Result<Self> {
        if width == 0 || height == 0 {
            lumen_bail!(SOURCE, "Image '{}' has a zero dimension ({}x{})", name, width, height);
        }
        if width > MAX_IMAGE_DIMENSION || height > MAX_IMAGE_DIMENSION {
            lumen_bail!(
                SOURCE,
                "Image '{}' is too large ({}x{}, limit {})",
                name, width, height, MAX_IMAGE_DIMENSION
            );
        }
        if layer_pixels.is_empty() {
            lumen_bail!(SOURCE, "Image '{}' has no layers", name);
        }

        let mut layers = Vec::with_capacity(layer_pixels.len());
        for pixels in layer_pixels {
            if !pixels.is_empty() {
                let expected = (width * height * format.bytes_per_element()) as usize;
                if pixels.len() != expected {
                    lumen_bail!(
                        SOURCE,
                        "Image '{}' layer data is {} bytes, expected {}",
                        name, pixels.len(), expected
                    );
                }
            }
            let mut layer = ImageLayer {
                mips: vec![Mip {
                    width,
                    height,
                    pixels,
                    layout: ImageLayout::Undefined,
                }],
            };
            layer.make_mip_pyramid();
            layers.push(layer);
        }

        let desc = ImageDesc {
            name: name.to_string(),
            width,
            height,
            layer_count: layers.len() as u32,
            mip_count: layers[0].mips.len() as u32,
            format,
            usage,
            aspect,
            view_kind,
            sample_count: SampleCount::S1,
        };
        let handle = device.create_image(&desc)?;
        let requirements = device.image_memory_requirements(&handle)?;

        Ok(Self {
            name: name.to_string(),
            width,
            height,
            format,
            usage,
            aspect,
            view_kind,
            layers,
            handle,
            requirements,
            view: None,
            layer_views: Vec::new(),
            final_layout,
            uploaded: false,
        })
    }

    // ===== ACCESSORS =====

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    pub fn usage(&self) -> ImageUsage {
        self.usage
    }

    pub fn aspect(&self) -> ImageAspect {
        self.aspect
    }

    pub fn view_kind(&self) -> ImageViewKind {
        self.view_kind
    }

    pub fn layer_count(&self) -> u32 {
        self.layers.len() as u32
    }

    pub fn mip_count(&self) -> u32 {
        self.layers[0].mips.len() as u32
    }

    pub fn memory_requirements(&self) -> MemoryRequirements {
        self.requirements
    }

    pub fn device_handle(&self) -> &Arc<dyn DeviceImage> {
        &self.handle
    }

    /// True once `ImageStore::push_to_gpu` has processed this image
    pub fn is_uploaded(&self) -> bool {
        self.uploaded
    }

    /// The all-layers shader view; errors before upload
    pub fn view(&self) -> Result<&Arc<dyn DeviceImageView>> {
        match &self.view {
            Some(view) => Ok(view),
            None => Err(crate::lumen_err!(
                SOURCE,
                "Image '{}' has not been pushed to the GPU",
                self.name
            )),
        }
    }

    /// The single-layer view for `layer`; errors before upload or out of range
    pub fn layer_view(&self, layer: u32) -> Result<&Arc<dyn DeviceImageView>> {
        if !self.uploaded {
            lumen_bail!(SOURCE, "Image '{}' has not been pushed to the GPU", self.name);
        }
        match self.layer_views.get(layer as usize) {
            Some(view) => Ok(view),
            None => Err(crate::lumen_err!(
                SOURCE,
                "Image '{}' has no layer {} ({} layers)",
                self.name, layer, self.layers.len()
            )),
        }
    }

    /// Current layout of one mip
    pub fn layout(&self, layer: u32, mip: u32) -> Result<ImageLayout> {
        let layer_ref = match self.layers.get(layer as usize) {
            Some(l) => l,
            None => {
                lumen_bail!(
                    SOURCE,
                    "Image '{}' has no layer {} ({} layers)",
                    self.name, layer, self.layers.len()
                )
            }
        };
        match layer_ref.mips.get(mip as usize) {
            Some(m) => Ok(m.layout),
            None => Err(crate::lumen_err!(
                SOURCE,
                "Image '{}' has no mip {} ({} mips)",
                self.name, mip, layer_ref.mips.len()
            )),
        }
    }

    // ===== LAYOUT TRANSITIONS =====

    /// Transition every layer and mip to `new_layout`
    pub fn layout_transition(
        &mut self,
        new_layout: ImageLayout,
        cmd: &mut dyn CommandList,
    ) -> Result<()> {
        let layer_count = self.layer_count();
        let mip_count = self.mip_count();
        self.layout_transition_range(0..layer_count, 0..mip_count, new_layout, cmd)
    }

    /// Transition a layer/mip range to `new_layout`, emitting the fewest
    /// barriers the current layouts allow: one barrier when the whole
    /// region agrees, one per layer when each layer agrees internally,
    /// one per mip otherwise.
    pub fn layout_transition_range(
        &mut self,
        layer_range: Range<u32>,
        mip_range: Range<u32>,
        new_layout: ImageLayout,
        cmd: &mut dyn CommandList,
    ) -> Result<()> {
        if layer_range.end > self.layer_count() || layer_range.start >= layer_range.end {
            lumen_bail!(
                SOURCE,
                "Image '{}': layer range {}..{} is invalid ({} layers)",
                self.name, layer_range.start, layer_range.end, self.layer_count()
            );
        }
        if mip_range.end > self.mip_count() || mip_range.start >= mip_range.end {
            lumen_bail!(
                SOURCE,
                "Image '{}': mip range {}..{} is invalid ({} mips)",
                self.name, mip_range.start, mip_range.end, self.mip_count()
            );
        }

        let uniform = self.region_layout(&layer_range, &mip_range);
        if let Some(old_layout) = uniform {
            cmd.image_barrier(
                &self.handle,
                self.aspect,
                ImageRegion {
                    base_layer: layer_range.start,
                    layer_count: layer_range.end - layer_range.start,
                    base_mip: mip_range.start,
                    mip_count: mip_range.end - mip_range.start,
                },
                old_layout,
                new_layout,
            )?;
        } else {
            for layer in layer_range.clone() {
                let mips = &self.layers[layer as usize].mips;
                let first = mips[mip_range.start as usize].layout;
                let layer_uniform = mip_range
                    .clone()
                    .all(|m| mips[m as usize].layout == first);
                if layer_uniform {
                    cmd.image_barrier(
                        &self.handle,
                        self.aspect,
                        ImageRegion {
                            base_layer: layer,
                            layer_count: 1,
                            base_mip: mip_range.start,
                            mip_count: mip_range.end - mip_range.start,
                        },
                        first,
                        new_layout,
                    )?;
                } else {
                    for mip in mip_range.clone() {
                        let old = mips[mip as usize].layout;
                        cmd.image_barrier(
                            &self.handle,
                            self.aspect,
                            ImageRegion {
                                base_layer: layer,
                                layer_count: 1,
                                base_mip: mip,
                                mip_count: 1,
                            },
                            old,
                            new_layout,
                        )?;
                    }
                }
            }
        }

        for layer in layer_range {
            for mip in mip_range.clone() {
                self.layers[layer as usize].mips[mip as usize].layout = new_layout;
            }
        }
        Ok(())
    }

    /// Transition a single mip of a single layer
    pub fn layout_transition_mip(
        &mut self,
        layer: u32,
        mip: u32,
        new_layout: ImageLayout,
        cmd: &mut dyn CommandList,
    ) -> Result<()> {
        self.layout_transition_range(layer..layer + 1, mip..mip + 1, new_layout, cmd)
    }

    /// The shared layout of a region, or None if mixed
    fn region_layout(&self, layer_range: &Range<u32>, mip_range: &Range<u32>) -> Option<ImageLayout> {
        let first = self.layers[layer_range.start as usize].mips[mip_range.start as usize].layout;
        for layer in layer_range.clone() {
            for mip in mip_range.clone() {
                if self.layers[layer as usize].mips[mip as usize].layout != first {
                    return None;
                }
            }
        }
        Some(first)
    }
}

#[cfg(test)]
#[path = "image_tests.rs"]
mod tests;
