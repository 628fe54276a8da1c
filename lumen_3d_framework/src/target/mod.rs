/// Target module - framebuffers, the target manager, and the blur

pub mod blur;
pub mod framebuffer;
pub mod target_manager;

pub use blur::MAX_BLUR_RADIUS;
pub use framebuffer::{Framebuffer, TargetDescriptors, MAX_TARGET_LAYERS, TARGET_DEPTH_FORMAT};
pub use target_manager::{BlurParams, FramebufferKey, TargetManager};
