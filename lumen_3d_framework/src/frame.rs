/// Frame scheduling - the begin/end-frame protocol and fence bookkeeping
///
/// One `Frame` is live at a time: `begin_frame` acquires a swapchain
/// image and opens a command list, `end_frame` submits it guarded by a
/// pooled fence and presents. Fences are polled (never waited on) at the
/// top of `begin_frame`; each signaled fence fires the frame-complete
/// callbacks with the frame identifier it was tagged with.
///
/// The frame identifier is a `u32` advanced with `wrapping_add`;
/// wraparound is silent and harmless since fence tags are only ever
/// compared for identity.

use std::sync::Arc;

use crate::device::{
    CommandList, DevicePipeline, Fence, FenceStatus, GraphicsDevice, ShaderStages, Swapchain,
};
use crate::error::Result;
use crate::lumen_bail;

const SOURCE: &str = "lumen3d::FrameScheduler";

/// The pipeline most recently bound in a frame
#[derive(Clone)]
pub struct BoundPipeline {
    pub name: String,
    pub handle: Arc<dyn DevicePipeline>,
    /// Stages the pipeline's push constant ranges cover
    pub push_stages: ShaderStages,
}

/// A frame being recorded, returned by `FrameScheduler::begin_frame`
pub struct Frame {
    cmd: Box<dyn CommandList>,
    image_index: u32,
    frame_id: u32,
    current_pipeline: Option<BoundPipeline>,
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("image_index", &self.image_index)
            .field("frame_id", &self.frame_id)
            .finish_non_exhaustive()
    }
}

impl Frame {
    /// The command list recording this frame
    pub fn command_list(&mut self) -> &mut dyn CommandList {
        &mut *self.cmd
    }

    /// Index of the swapchain image acquired for this frame
    pub fn image_index(&self) -> u32 {
        self.image_index
    }

    /// This frame's identifier (wrapping counter)
    pub fn frame_id(&self) -> u32 {
        self.frame_id
    }

    pub(crate) fn set_current_pipeline(
        &mut self,
        name: &str,
        handle: Arc<dyn DevicePipeline>,
        push_stages: ShaderStages,
    ) {
        self.current_pipeline = Some(BoundPipeline {
            name: name.to_string(),
            handle,
            push_stages,
        });
    }

    /// The pipeline most recently bound this frame; errors if none has been
    pub fn current_pipeline(&self) -> Result<&BoundPipeline> {
        match &self.current_pipeline {
            Some(bound) => Ok(bound),
            None => Err(crate::lumen_err!(
                SOURCE,
                "No pipeline has been bound in this frame"
            )),
        }
    }

    /// Update push constants through the current pipeline's stage mask
    pub fn push_constants(&mut self, offset: u32, data: &[u8]) -> Result<()> {
        let stages = self.current_pipeline()?.push_stages;
        self.cmd.push_constants(stages, offset, data)
    }
}

type FrameCallback = Box<dyn FnMut(u32, &mut dyn CommandList)>;
type FrameCompleteCallback = Box<dyn FnMut(u32)>;

/// Drives the begin/end-frame state machine
pub struct FrameScheduler {
    device: Arc<dyn GraphicsDevice>,
    frame_counter: u32,
    in_frame: bool,
    available_fences: Vec<Box<dyn Fence>>,
    /// Outstanding fences tagged with the frame they guard
    active_fences: Vec<(u32, Box<dyn Fence>)>,
    frame_begin_callbacks: Vec<FrameCallback>,
    frame_end_callbacks: Vec<FrameCallback>,
    frame_complete_callbacks: Vec<FrameCompleteCallback>,
}

impl FrameScheduler {
    pub fn new(device: Arc<dyn GraphicsDevice>) -> Self {
        Self {
            device,
            frame_counter: 0,
            in_frame: false,
            available_fences: Vec::new(),
            active_fences: Vec::new(),
            frame_begin_callbacks: Vec::new(),
            frame_end_callbacks: Vec::new(),
            frame_complete_callbacks: Vec::new(),
        }
    }

    /// Invoked with (image index, command list) right after a frame opens
    pub fn add_frame_begin_callback(&mut self, callback: FrameCallback) {
        self.frame_begin_callbacks.push(callback);
    }

    /// Invoked with (image index, command list) just before submission
    pub fn add_frame_end_callback(&mut self, callback: FrameCallback) {
        self.frame_end_callbacks.push(callback);
    }

    /// Invoked with a frame identifier once the GPU has finished it
    pub fn add_frame_complete_callback(&mut self, callback: FrameCompleteCallback) {
        self.frame_complete_callbacks.push(callback);
    }

    /// The identifier the next frame will carry
    pub fn current_frame_id(&self) -> u32 {
        self.frame_counter
    }

    /// True between `begin_frame` and `end_frame`
    pub fn is_recording(&self) -> bool {
        self.in_frame
    }

    /// Number of frames submitted but not yet seen to complete
    pub fn frames_in_flight(&self) -> usize {
        self.active_fences.len()
    }

    /// Poll completed frames, acquire the next swapchain image, and open
    /// a command list for recording.
    pub fn begin_frame(&mut self, swapchain: &mut dyn Swapchain) -> Result<Frame> {
        self.poll_fences()?;

        if self.in_frame {
            lumen_bail!(
                SOURCE,
                "begin_frame() called twice with no intervening end_frame()"
            );
        }

        let image_index = swapchain.acquire_next_image()?;
        let mut cmd = self.device.create_command_list()?;
        cmd.begin()?;

        for callback in self.frame_begin_callbacks.iter_mut() {
            callback(image_index, &mut *cmd);
        }

        self.in_frame = true;
        Ok(Frame {
            cmd,
            image_index,
            frame_id: self.frame_counter,
            current_pipeline: None,
        })
    }

    /// Close recording, submit guarded by a pooled fence, and present
    pub fn end_frame(&mut self, mut frame: Frame, swapchain: &mut dyn Swapchain) -> Result<()> {
        if !self.in_frame {
            lumen_bail!(SOURCE, "end_frame() called without a matching begin_frame()");
        }

        let image_index = frame.image_index;
        for callback in self.frame_end_callbacks.iter_mut() {
            callback(image_index, &mut *frame.cmd);
        }

        frame.cmd.end()?;

        let fence = match self.available_fences.pop() {
            Some(fence) => fence,
            None => self.device.create_fence()?,
        };

        self.device
            .submit_with_swapchain(&mut *frame.cmd, &*fence, swapchain, image_index)?;
        swapchain.present(image_index)?;

        self.active_fences.push((self.frame_counter, fence));
        self.frame_counter = self.frame_counter.wrapping_add(1);
        self.in_frame = false;
        Ok(())
    }

    /// Reclaim every fence that has signaled since the last call.
    /// Never blocks; device loss propagates as a fatal error.
    fn poll_fences(&mut self) -> Result<()> {
        let mut index = 0;
        while index < self.active_fences.len() {
            let status = self.active_fences[index].1.status()?;
            match status {
                FenceStatus::Signaled => {
                    let (frame_id, fence) = self.active_fences.swap_remove(index);
                    fence.reset()?;
                    self.available_fences.push(fence);
                    for callback in self.frame_complete_callbacks.iter_mut() {
                        callback(frame_id);
                    }
                }
                FenceStatus::Unsignaled => {
                    index += 1;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "frame_tests.rs"]
mod tests;
