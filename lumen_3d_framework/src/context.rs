/// RenderContext - the top-level object tying the framework together
///
/// Owns the device, the swapchain, and the resource managers. Fields
/// are public so callers can split-borrow them (`ctx.targets` operating
/// on `ctx.images` inside one frame). Teardown is RAII: dropping the
/// context waits for the device to go idle, then drops the managers in
/// declaration order so no resource outlives the device.

use std::sync::Arc;

use crate::device::{GraphicsDevice, ImageFormat, Swapchain};
use crate::error::Result;
use crate::frame::{Frame, FrameScheduler};
use crate::image::ImageStore;
use crate::target::{BlurParams, FramebufferKey, TargetManager};
use crate::vertex::VertexManager;

const SOURCE: &str = "lumen3d::RenderContext";

pub struct RenderContext {
    pub images: ImageStore,
    pub targets: TargetManager,
    pub scheduler: FrameScheduler,
    pub swapchain: Box<dyn Swapchain>,
    pub device: Arc<dyn GraphicsDevice>,
    default_target: FramebufferKey,
}

impl RenderContext {
    /// Build a context over an existing device and swapchain; creates
    /// the default framebuffer for the swapchain's images.
    pub fn new(device: Arc<dyn GraphicsDevice>, swapchain: Box<dyn Swapchain>) -> Result<Self> {
        let mut images = ImageStore::new(device.clone());
        let mut targets = TargetManager::new(device.clone());
        let scheduler = FrameScheduler::new(device.clone());
        let default_target = targets.create_default_framebuffer(&mut images, &*swapchain)?;

        crate::lumen_info!(
            SOURCE,
            "Render context up on '{}' ({}x{}, {} swapchain images)",
            device.name(), swapchain.width(), swapchain.height(), swapchain.image_count()
        );

        Ok(Self {
            images,
            targets,
            scheduler,
            swapchain,
            device,
            default_target,
        })
    }

    /// The framebuffer rendering to the swapchain
    pub fn default_target(&self) -> FramebufferKey {
        self.default_target
    }

    /// Create an offscreen framebuffer with one copy per swapchain image
    pub fn create_framebuffer(
        &mut self,
        name: &str,
        width: u32,
        height: u32,
        layer_count: u32,
        color_format: ImageFormat,
    ) -> Result<FramebufferKey> {
        self.targets.create_framebuffer(
            &mut self.images,
            name,
            width,
            height,
            layer_count,
            color_format,
            self.swapchain.image_count(),
        )
    }

    /// Upload pending images, then realize every framebuffer.
    /// Call again after loading more resources; done work is skipped.
    pub fn push_to_gpu(&mut self) -> Result<()> {
        self.images.push_to_gpu()?;
        self.targets.push_to_gpu(&self.images)
    }

    pub fn begin_frame(&mut self) -> Result<Frame> {
        self.scheduler.begin_frame(&mut *self.swapchain)
    }

    pub fn end_frame(&mut self, frame: Frame) -> Result<()> {
        self.scheduler.end_frame(frame, &mut *self.swapchain)
    }

    /// Blur one layer of `target` in place (see `TargetManager::blur`)
    pub fn blur(
        &mut self,
        target: FramebufferKey,
        frame: &mut Frame,
        params: BlurParams,
        restore: Option<&VertexManager>,
    ) -> Result<()> {
        self.targets.blur(target, frame, &mut self.images, params, restore)
    }
}

impl Drop for RenderContext {
    fn drop(&mut self) {
        // Resources must not be destroyed under in-flight GPU work
        if let Err(err) = self.device.wait_idle() {
            crate::lumen_error!(SOURCE, "wait_idle failed during teardown: {}", err);
        }
    }
}

#[cfg(test)]
#[path = "context_tests.rs"]
mod tests;
