//! Lumen3D demo - animated offscreen target blurred and presented
//!
//! Renders an animated clear color into an offscreen framebuffer, blurs
//! it in place with a radius that sweeps over time, and clears the
//! swapchain target each frame. Exercises the full frame loop: image
//! uploads, target realization, the blur pass, and fence-pooled
//! presentation.

use std::sync::Arc;
use std::time::Instant;

use lumen_3d_framework::lumen3d::device::{GraphicsDevice, ImageFormat};
use lumen_3d_framework::lumen3d::target::{BlurParams, FramebufferKey, MAX_BLUR_RADIUS};
use lumen_3d_framework::lumen3d::{RenderContext, Result};
use lumen_3d_framework::{lumen_error, lumen_info};
use lumen_3d_framework_device_vulkan::{VulkanConfig, VulkanDevice};

use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{Window, WindowId};

const SOURCE: &str = "lumen3d_demo";

struct DemoApp {
    window: Option<Window>,
    ctx: Option<RenderContext>,
    scene_target: Option<FramebufferKey>,
    start: Instant,

    // FPS
    frames: u32,
    last_fps_report: Instant,
}

impl DemoApp {
    fn new() -> Self {
        Self {
            window: None,
            ctx: None,
            scene_target: None,
            start: Instant::now(),
            frames: 0,
            last_fps_report: Instant::now(),
        }
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let attrs = Window::default_attributes()
            .with_title("Lumen3D Demo")
            .with_inner_size(winit::dpi::LogicalSize::new(1280, 720));
        let window = event_loop.create_window(attrs).map_err(|e| {
            lumen_3d_framework::Error::InitializationFailed(format!(
                "Failed to create window: {}",
                e
            ))
        })?;

        let device: Arc<dyn GraphicsDevice> =
            Arc::new(VulkanDevice::new(&window, VulkanConfig::default())?);
        let swapchain = device.create_swapchain(&window, 3)?;

        let mut ctx = RenderContext::new(device, swapchain)?;

        let width = ctx.swapchain.width();
        let height = ctx.swapchain.height();
        let scene_target =
            ctx.create_framebuffer("scene", width, height, 1, ImageFormat::R8G8B8A8_UNORM)?;
        ctx.push_to_gpu()?;

        self.window = Some(window);
        self.ctx = Some(ctx);
        self.scene_target = Some(scene_target);
        Ok(())
    }

    fn render(&mut self) -> Result<()> {
        let (ctx, scene) = match (self.ctx.as_mut(), self.scene_target) {
            (Some(ctx), Some(scene)) => (ctx, scene),
            _ => return Ok(()),
        };

        let t = self.start.elapsed().as_secs_f32();
        let mut frame = ctx.begin_frame()?;

        // Animated flat color into the offscreen scene target
        let scene_clear = [
            0.5 + 0.5 * t.sin(),
            0.5 + 0.5 * (t * 0.7).sin(),
            0.5 + 0.5 * (t * 1.3).cos(),
            1.0,
        ];
        {
            let targets = &mut ctx.targets;
            let images = &mut ctx.images;
            targets
                .get_mut(scene)?
                .begin_render_pass_clear(&mut frame, images, scene_clear)?;
            targets
                .get_mut(scene)?
                .end_render_pass_no_mipmaps(&mut frame, images)?;
        }

        // Blur radius sweeps the full supported range
        let radius = 1 + ((t * 6.0) as u32 % MAX_BLUR_RADIUS);
        ctx.blur(
            scene,
            &mut frame,
            BlurParams {
                radius,
                layer: 0,
                multiplier: 1.0,
                depth_gated: false,
            },
            None,
        )?;

        // Present a cleared swapchain image
        let default_target = ctx.default_target();
        {
            let targets = &mut ctx.targets;
            let images = &mut ctx.images;
            targets.get_mut(default_target)?.begin_render_pass_clear(
                &mut frame,
                images,
                [0.05, 0.05, 0.08, 1.0],
            )?;
            targets
                .get_mut(default_target)?
                .end_render_pass_no_mipmaps(&mut frame, images)?;
        }

        ctx.end_frame(frame)?;

        self.frames += 1;
        if self.last_fps_report.elapsed().as_secs_f32() >= 2.0 {
            let fps = self.frames as f32 / self.last_fps_report.elapsed().as_secs_f32();
            lumen_info!(SOURCE, "{:.1} fps (blur radius {})", fps, radius);
            self.frames = 0;
            self.last_fps_report = Instant::now();
        }
        Ok(())
    }
}

impl ApplicationHandler for DemoApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        if let Err(err) = self.init(event_loop) {
            lumen_error!(SOURCE, "Initialization failed: {}", err);
            event_loop.exit();
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                event_loop.exit();
            }
            WindowEvent::RedrawRequested => {
                if let Err(err) = self.render() {
                    lumen_error!(SOURCE, "Frame failed: {}", err);
                    event_loop.exit();
                    return;
                }
                if let Some(window) = &self.window {
                    window.request_redraw();
                }
            }
            _ => {}
        }
    }
}

fn main() -> std::process::ExitCode {
    let event_loop = match EventLoop::new() {
        Ok(event_loop) => event_loop,
        Err(err) => {
            lumen_error!(SOURCE, "Failed to create event loop: {}", err);
            return std::process::ExitCode::FAILURE;
        }
    };
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = DemoApp::new();
    if let Err(err) = event_loop.run_app(&mut app) {
        lumen_error!(SOURCE, "Event loop error: {}", err);
        return std::process::ExitCode::FAILURE;
    }
    std::process::ExitCode::SUCCESS
}
