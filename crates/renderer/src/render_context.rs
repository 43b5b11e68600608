//! The acquire, record, submit, present cycle.
//!
//! [`RenderContext`] owns the swapchain, one [`RenderFrame`] per swapchain
//! image and a single shared "image available" semaphore. The application
//! drives it through four calls:
//!
//! 1. [`prepare_frame`](RenderContext::prepare_frame) acquires an image and
//!    waits until the matching frame's previous submission has retired
//! 2. [`render`](RenderContext::render) records and submits a command buffer
//! 3. [`present_frame`](RenderContext::present_frame) queues the image for
//!    display
//! 4. [`resize`](RenderContext::resize) rebuilds the swapchain and frames
//!    whenever 1 or 3 report [`SwapchainStatus::needs_recreation`]
//!
//! Waiting on the frame's fence in `prepare_frame` is the only backpressure
//! between CPU and GPU. It bounds the number of frames in flight to the
//! swapchain image count.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use framepace_renderer::{RenderContext, RenderContextConfig};
//! use framepace_rhi::gpu::{GpuDevice, Queue};
//! use framepace_rhi::surface::WindowExtent;
//! use framepace_rhi::vk;
//!
//! # fn example(
//! #     window: &dyn WindowExtent,
//! #     surface: vk::SurfaceKHR,
//! #     device: Arc<dyn GpuDevice>,
//! #     queue: Queue,
//! # ) -> framepace_rhi::RhiResult<()> {
//! let mut context =
//!     RenderContext::new(window, surface, device, queue, RenderContextConfig::default())?;
//!
//! loop {
//!     if context.prepare_frame()?.needs_recreation() {
//!         context.resize(window.extent())?;
//!         continue;
//!     }
//!
//!     let cmd = context.request_command_buffer()?;
//!     context.render(&cmd, |cmd, target| {
//!         // record into cmd.handle() targeting target.image
//!     })?;
//!
//!     if context.present_frame()?.needs_recreation() {
//!         context.resize(window.extent())?;
//!     }
//!     # break;
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use framepace_rhi::command::CommandBuffer;
use framepace_rhi::gpu::{GpuDevice, Queue, SubmitInfo};
use framepace_rhi::surface::WindowExtent;
use framepace_rhi::swapchain::{Swapchain, SwapchainStatus};
use framepace_rhi::sync::Semaphore;
use framepace_rhi::{RhiError, RhiResult};
use tracing::{debug, error, info, warn};

use crate::config::RenderContextConfig;
use crate::render_frame::RenderFrame;
use crate::stats::FrameStats;

/// What the recording callback of [`RenderContext::render`] draws into.
#[derive(Clone, Copy, Debug)]
pub struct RenderTarget {
    /// The acquired swapchain image.
    pub image: vk::Image,
    /// Colour view of `image`.
    pub view: vk::ImageView,
    /// Index of `image` in the swapchain.
    pub image_index: u32,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}

/// Position inside one acquire, render, present cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    /// Ready for `prepare_frame`.
    Ready,
    /// An image is acquired and its frame's fence was reset.
    Acquired,
    /// The frame's work was submitted; waiting for `present_frame`.
    Submitted,
}

/// Drives presentation to one surface.
///
/// # Thread Safety
///
/// The context is not thread-safe. One thread calls the four cycle
/// operations in order; the GPU works on submitted frames asynchronously.
pub struct RenderContext {
    device: Arc<dyn GpuDevice>,
    surface: vk::SurfaceKHR,
    queue: Queue,
    config: RenderContextConfig,

    /// Signaled by acquisition, waited on by the next submission. `None`
    /// while there is no swapchain.
    acquire_semaphore: Option<Semaphore>,
    /// One frame per swapchain image, indexed by image index.
    frames: Vec<RenderFrame>,
    /// `None` while the window has a zero extent.
    swapchain: Option<Swapchain>,

    /// Extent most recently requested by construction or `resize`.
    requested_extent: vk::Extent2D,
    active_frame_index: usize,
    phase: Phase,
    stats: FrameStats,
}

impl RenderContext {
    /// Builds the swapchain, the frames and the shared acquire semaphore.
    ///
    /// If the window currently has a zero extent, nothing is created yet and
    /// [`prepare_frame`](Self::prepare_frame) reports `OutOfDate` until
    /// [`resize`](Self::resize) is called with a nonzero extent.
    ///
    /// # Arguments
    ///
    /// * `window` - Source of the initial extent
    /// * `surface` - Surface to present to; must outlive the context
    /// * `device` - Device all objects are created on
    /// * `queue` - Queue used for submission and presentation
    /// * `config` - Requested swapchain properties, timeouts and logging span
    ///
    /// # Errors
    ///
    /// Returns an error if swapchain or frame creation fails.
    pub fn new(
        window: &dyn WindowExtent,
        surface: vk::SurfaceKHR,
        device: Arc<dyn GpuDevice>,
        queue: Queue,
        config: RenderContextConfig,
    ) -> RhiResult<Self> {
        let span = config.span.clone();
        let _guard = span.enter();

        let extent = window.extent();
        let mut context = Self {
            device,
            surface,
            queue,
            config,
            acquire_semaphore: None,
            frames: Vec::new(),
            swapchain: None,
            requested_extent: extent,
            active_frame_index: 0,
            phase: Phase::Ready,
            stats: FrameStats::new(),
        };

        if context.build(extent)? {
            info!(
                "Render context created: {}x{}, {} frames",
                context.extent().width,
                context.extent().height,
                context.frames.len()
            );
        } else {
            info!("Render context created without swapchain (zero extent)");
        }

        Ok(context)
    }

    /// Acquires the next image and makes its frame active.
    ///
    /// Blocks until the active frame's previous submission has retired, then
    /// resets its fence and command pools.
    ///
    /// # Returns
    ///
    /// The acquisition status. On `OutOfDate` nothing was acquired; abandon
    /// the cycle and call [`resize`](Self::resize). On `Suboptimal` the image
    /// is acquired and may still be rendered and presented, but the
    /// swapchain should be recreated.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::InvalidState`] if the previous cycle was not
    /// finished, and any fatal acquisition or fence error.
    pub fn prepare_frame(&mut self) -> RhiResult<SwapchainStatus> {
        let span = self.config.span.clone();
        let _guard = span.enter();

        if self.phase != Phase::Ready {
            return Err(RhiError::InvalidState(format!(
                "prepare_frame called while {:?}",
                self.phase
            )));
        }

        let (Some(swapchain), Some(acquire_semaphore)) =
            (self.swapchain.as_ref(), self.acquire_semaphore.as_ref())
        else {
            debug!("No swapchain, skipping frame");
            return Ok(SwapchainStatus::OutOfDate);
        };

        let (status, image_index) = swapchain.acquire_next_image(
            self.config.acquire_timeout,
            acquire_semaphore.handle(),
            None,
        )?;

        match status {
            SwapchainStatus::OutOfDate => {
                debug!("Swapchain out of date on acquire, dropping frame");
                self.stats.record_dropped();
                return Ok(status);
            }
            SwapchainStatus::Suboptimal => warn!("Swapchain suboptimal on acquire"),
            SwapchainStatus::Optimal => {}
        }

        let index = image_index as usize;
        let Some(frame) = self.frames.get_mut(index) else {
            return Err(RhiError::InvalidState(format!(
                "acquired image {} but only {} frames exist",
                image_index,
                self.frames.len()
            )));
        };

        if !frame.fence().is_signaled()? {
            debug!("Waiting for frame {} to retire", index);
            self.stats.record_blocked_wait();
        }
        frame.fence().wait(self.config.fence_timeout)?;
        frame.fence().reset()?;
        frame.reset()?;

        self.active_frame_index = index;
        self.phase = Phase::Acquired;

        Ok(status)
    }

    /// Leases a command buffer from the active frame for the context's queue.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::InvalidState`] outside of an acquired cycle, and
    /// any allocation error.
    pub fn request_command_buffer(&mut self) -> RhiResult<CommandBuffer> {
        if self.phase != Phase::Acquired {
            return Err(RhiError::InvalidState(format!(
                "request_command_buffer called while {:?}",
                self.phase
            )));
        }

        let queue = self.queue;
        self.frames[self.active_frame_index].request_command_buffer(&queue)
    }

    /// Records `command_buffer` through `record_fn` and submits it.
    ///
    /// The submission waits on the acquisition at the colour attachment
    /// output stage, signals the active frame's semaphore and fence, and is
    /// followed by a queue-idle wait when
    /// [`wait_queue_idle_after_submit`](RenderContextConfig::wait_queue_idle_after_submit)
    /// is set.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::InvalidState`] unless `prepare_frame` acquired an
    /// image, and any recording or submission error.
    pub fn render<F>(&mut self, command_buffer: &CommandBuffer, record_fn: F) -> RhiResult<()>
    where
        F: FnOnce(&CommandBuffer, &RenderTarget),
    {
        let span = self.config.span.clone();
        let _guard = span.enter();

        if self.phase != Phase::Acquired {
            return Err(RhiError::InvalidState(format!(
                "render called while {:?}",
                self.phase
            )));
        }

        let (Some(swapchain), Some(acquire_semaphore)) =
            (self.swapchain.as_ref(), self.acquire_semaphore.as_ref())
        else {
            return Err(RhiError::InvalidState(
                "render called without a swapchain".to_string(),
            ));
        };
        let frame = &self.frames[self.active_frame_index];

        let target = RenderTarget {
            image: frame.image().handle(),
            view: frame.image_view().handle(),
            image_index: frame.image_index(),
            format: swapchain.format(),
            extent: swapchain.extent(),
        };

        command_buffer.begin()?;
        record_fn(command_buffer, &target);
        command_buffer.end()?;

        let command_buffers = [command_buffer.handle()];
        let wait_semaphores = [acquire_semaphore.handle()];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [frame.semaphore().handle()];

        self.device.queue_submit(
            self.queue.handle(),
            &SubmitInfo {
                command_buffers: &command_buffers,
                wait_semaphores: &wait_semaphores,
                wait_stages: &wait_stages,
                signal_semaphores: &signal_semaphores,
            },
            frame.fence().handle(),
        )?;

        if self.config.wait_queue_idle_after_submit {
            self.device.queue_wait_idle(self.queue.handle())?;
        }

        self.phase = Phase::Submitted;
        Ok(())
    }

    /// Presents the active frame's image once its submission has signaled.
    ///
    /// # Returns
    ///
    /// The presentation status. `OutOfDate` and `Suboptimal` mean the
    /// swapchain must be recreated with [`resize`](Self::resize).
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::InvalidState`] unless `render` submitted this
    /// cycle, and any fatal presentation error.
    pub fn present_frame(&mut self) -> RhiResult<SwapchainStatus> {
        let span = self.config.span.clone();
        let _guard = span.enter();

        if self.phase != Phase::Submitted {
            return Err(RhiError::InvalidState(format!(
                "present_frame called while {:?}",
                self.phase
            )));
        }

        let Some(swapchain) = self.swapchain.as_ref() else {
            return Err(RhiError::InvalidState(
                "present_frame called without a swapchain".to_string(),
            ));
        };
        let frame = &self.frames[self.active_frame_index];

        // The cycle is over whatever the presentation engine says
        self.phase = Phase::Ready;

        let status = swapchain.present(
            self.queue.handle(),
            frame.image_index(),
            frame.semaphore().handle(),
        )?;

        match status {
            SwapchainStatus::Optimal => self.stats.record_presented(),
            SwapchainStatus::Suboptimal => {
                warn!("Swapchain suboptimal on present");
                self.stats.record_presented();
            }
            SwapchainStatus::OutOfDate => {
                debug!("Swapchain out of date on present, dropping frame");
                self.stats.record_dropped();
            }
        }

        Ok(status)
    }

    /// Rebuilds the swapchain and frames for `extent`.
    ///
    /// Waits for the device to go idle, then drops the acquire semaphore,
    /// the frames and the old swapchain (after passing it to the new one as
    /// a recreation hint) and builds their replacements. A zero extent
    /// leaves the context without a swapchain until the next nonzero
    /// `resize`.
    ///
    /// Any cycle in progress is abandoned.
    ///
    /// # Errors
    ///
    /// Returns an error if the wait or any creation fails. The context is
    /// left without a swapchain in that case.
    pub fn resize(&mut self, extent: vk::Extent2D) -> RhiResult<()> {
        let span = self.config.span.clone();
        let _guard = span.enter();

        info!(
            "Resizing render context: {}x{} -> {}x{}",
            self.requested_extent.width, self.requested_extent.height, extent.width, extent.height
        );

        self.device.wait_idle()?;

        if self.phase != Phase::Ready {
            debug!("Abandoning {:?} cycle for resize", self.phase);
            self.stats.record_dropped();
        }

        if self.build(extent)? {
            self.stats.record_recreation();
        } else {
            self.stats.record_deferred_resize();
        }

        Ok(())
    }

    /// Recreates the swapchain if the surface reports a fixed extent that no
    /// longer matches it.
    ///
    /// Returns `true` if a resize ran.
    ///
    /// # Errors
    ///
    /// Returns an error if the surface query or the resize fails.
    pub fn handle_surface_changes(&mut self) -> RhiResult<bool> {
        let support = self.device.surface_support(self.surface)?;
        if !support.has_fixed_extent() {
            return Ok(false);
        }

        let current = support.capabilities.current_extent;
        let unchanged = match &self.swapchain {
            Some(swapchain) => {
                let extent = swapchain.extent();
                extent.width == current.width && extent.height == current.height
            }
            None => current.width == 0 || current.height == 0,
        };

        if unchanged {
            return Ok(false);
        }

        debug!(
            "Surface extent changed to {}x{}",
            current.width, current.height
        );
        self.resize(current)?;
        Ok(true)
    }

    /// Blocks until the device has finished all submitted work.
    ///
    /// # Errors
    ///
    /// Returns an error if the wait fails (e.g. device lost).
    pub fn wait_idle(&self) -> RhiResult<()> {
        self.device.wait_idle()
    }

    /// Tears down the current objects and builds new ones for `extent`.
    ///
    /// Returns `false` if `extent` (or the surface) has zero area and
    /// creation was deferred.
    fn build(&mut self, extent: vk::Extent2D) -> RhiResult<bool> {
        self.phase = Phase::Ready;
        self.active_frame_index = 0;
        self.requested_extent = extent;

        // Reverse of construction order
        self.acquire_semaphore = None;
        self.frames.clear();
        let old_swapchain = self.swapchain.take();

        if extent.width == 0 || extent.height == 0 || self.surface_has_zero_extent()? {
            debug!("Zero extent, deferring swapchain creation");
            return Ok(false);
        }

        let requested = self.config.swapchain.with_extent(extent);
        let swapchain = Swapchain::new(
            self.device.clone(),
            self.surface,
            &requested,
            old_swapchain.as_ref(),
        );
        drop(old_swapchain);
        let swapchain = swapchain?;

        let frames = swapchain
            .images()
            .iter()
            .map(|&image| RenderFrame::new(self.device.clone(), image, swapchain.format()))
            .collect::<RhiResult<Vec<_>>>()?;
        let acquire_semaphore = Semaphore::new(self.device.clone())?;

        debug!("Built {} render frames", frames.len());

        self.frames = frames;
        self.acquire_semaphore = Some(acquire_semaphore);
        self.swapchain = Some(swapchain);
        Ok(true)
    }

    /// True if the surface dictates a zero extent (e.g. minimized window).
    fn surface_has_zero_extent(&self) -> RhiResult<bool> {
        let support = self.device.surface_support(self.surface)?;
        let current = support.capabilities.current_extent;
        Ok(support.has_fixed_extent() && (current.width == 0 || current.height == 0))
    }

    /// The frame selected by the last successful `prepare_frame`, or `None`
    /// while the context has no swapchain.
    #[inline]
    pub fn active_frame(&self) -> Option<&RenderFrame> {
        self.frames.get(self.active_frame_index)
    }

    /// Index of the image acquired by the last successful `prepare_frame`.
    #[inline]
    pub fn active_frame_index(&self) -> usize {
        self.active_frame_index
    }

    /// Number of frames, equal to the swapchain image count.
    #[inline]
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    #[inline]
    pub fn frames(&self) -> &[RenderFrame] {
        &self.frames
    }

    #[inline]
    pub fn swapchain(&self) -> Option<&Swapchain> {
        self.swapchain.as_ref()
    }

    #[inline]
    pub fn has_swapchain(&self) -> bool {
        self.swapchain.is_some()
    }

    /// Negotiated swapchain extent, or the last requested extent while
    /// there is no swapchain.
    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain
            .as_ref()
            .map_or(self.requested_extent, Swapchain::extent)
    }

    /// Negotiated swapchain format, if there is a swapchain.
    pub fn format(&self) -> Option<vk::Format> {
        self.swapchain.as_ref().map(Swapchain::format)
    }

    #[inline]
    pub fn queue(&self) -> Queue {
        self.queue
    }

    #[inline]
    pub fn stats(&self) -> &FrameStats {
        &self.stats
    }
}

impl Drop for RenderContext {
    fn drop(&mut self) {
        let _guard = self.config.span.enter();

        if let Err(e) = self.device.wait_idle() {
            error!("Failed to wait for device idle during drop: {:?}", e);
        }

        self.acquire_semaphore = None;
        self.frames.clear();
        self.swapchain = None;

        info!("Render context destroyed ({})", self.stats);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use framepace_rhi::mock::MockDevice;

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    fn context(mock: &Arc<MockDevice>) -> RenderContext {
        RenderContext::new(
            &extent(800, 600),
            mock.surface(),
            mock.clone(),
            mock.graphics_queue(),
            RenderContextConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_render_context_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<RenderContext>();
    }

    #[test]
    fn test_lease_outside_cycle_is_rejected() {
        let mock = MockDevice::new();
        let mut ctx = context(&mock);

        assert!(matches!(
            ctx.request_command_buffer(),
            Err(RhiError::InvalidState(_))
        ));
    }

    #[test]
    fn test_render_after_present_is_rejected() {
        let mock = MockDevice::new();
        let mut ctx = context(&mock);

        ctx.prepare_frame().unwrap();
        let cmd = ctx.request_command_buffer().unwrap();
        ctx.render(&cmd, |_, _| {}).unwrap();
        ctx.present_frame().unwrap();

        let result = ctx.render(&cmd, |_, _| {});
        assert!(matches!(result, Err(RhiError::InvalidState(_))));
    }

    #[test]
    fn test_present_before_render_is_rejected() {
        let mock = MockDevice::new();
        let mut ctx = context(&mock);

        ctx.prepare_frame().unwrap();
        assert!(matches!(
            ctx.present_frame(),
            Err(RhiError::InvalidState(_))
        ));
    }

    #[test]
    fn test_double_prepare_is_rejected() {
        let mock = MockDevice::new();
        let mut ctx = context(&mock);

        ctx.prepare_frame().unwrap();
        assert!(matches!(
            ctx.prepare_frame(),
            Err(RhiError::InvalidState(_))
        ));
    }

    #[test]
    fn test_resize_abandons_cycle() {
        let mock = MockDevice::new();
        let mut ctx = context(&mock);

        ctx.prepare_frame().unwrap();
        ctx.resize(extent(640, 480)).unwrap();

        // A fresh cycle is allowed after the resize
        assert_eq!(ctx.prepare_frame().unwrap(), SwapchainStatus::Optimal);
        assert_eq!(ctx.stats().dropped(), 1);
    }

    #[test]
    fn test_record_fn_sees_active_image() {
        let mock = MockDevice::new();
        let mut ctx = context(&mock);

        ctx.prepare_frame().unwrap();
        let expected = ctx.active_frame().unwrap().image().handle();
        let cmd = ctx.request_command_buffer().unwrap();

        let mut seen = None;
        ctx.render(&cmd, |recorded, target| {
            assert_eq!(recorded.handle(), cmd.handle());
            seen = Some((target.image, target.extent.width));
        })
        .unwrap();

        assert_eq!(seen, Some((expected, 800)));
    }

    #[test]
    fn test_no_active_frame_while_minimized() {
        let mock = MockDevice::new();
        let mut ctx = context(&mock);
        ctx.prepare_frame().unwrap();
        assert!(ctx.active_frame().is_some());

        ctx.resize(extent(0, 0)).unwrap();
        assert!(ctx.active_frame().is_none());

        ctx.resize(extent(800, 600)).unwrap();
        assert!(ctx.active_frame().is_some());
    }

    #[test]
    fn test_drop_releases_all_objects() {
        let mock = MockDevice::new();
        {
            let mut ctx = context(&mock);
            ctx.prepare_frame().unwrap();
            let cmd = ctx.request_command_buffer().unwrap();
            ctx.render(&cmd, |_, _| {}).unwrap();
            ctx.present_frame().unwrap();
        }

        assert_eq!(mock.live_swapchains(), 0);
        assert_eq!(mock.live_semaphores(), 0);
        assert_eq!(mock.live_fences(), 0);
        assert_eq!(mock.live_image_views(), 0);
        assert_eq!(mock.live_command_pools(), 0);
        assert_eq!(mock.destroyed_in_use(), 0);
    }
}
