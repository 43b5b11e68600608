//! Per-image frame resources.
//!
//! A [`RenderFrame`] bundles everything that must never be shared between
//! two frames that may be in flight at the same time:
//!
//! - a view of its swapchain image
//! - one command pool per queue family, created on first use
//! - a "render finished" semaphore, signaled by the frame's submission and
//!   waited on by its presentation
//! - a completion fence, created signaled so the first wait never blocks
//!
//! # Synchronization Flow
//!
//! ```text
//! 1. Wait on fence (CPU waits for the previous use of this frame)
//! 2. Reset fence and command pools
//! 3. Record into leased command buffers
//! 4. Submit: signal semaphore and fence
//! 5. Present: wait on semaphore
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use ash::vk;
use framepace_rhi::RhiResult;
use framepace_rhi::command::{CommandBuffer, CommandPool};
use framepace_rhi::gpu::{GpuDevice, Queue};
use framepace_rhi::image::ImageView;
use framepace_rhi::swapchain::SwapchainImage;
use framepace_rhi::sync::{Fence, Semaphore};
use tracing::debug;

/// Resources for one swapchain image.
pub struct RenderFrame {
    /// Device every resource below was created on.
    device: Arc<dyn GpuDevice>,
    /// The swapchain image this frame renders into.
    image: SwapchainImage,
    /// Colour view of `image`.
    image_view: ImageView,
    /// Command pools keyed by queue family index.
    command_pools: BTreeMap<u32, CommandPool>,
    /// Signaled when this frame's submission completes on the GPU side.
    semaphore: Semaphore,
    /// Signaled when this frame's submission has retired.
    fence: Fence,
}

impl RenderFrame {
    /// Creates the frame for `image`, with a view in `format`.
    ///
    /// # Errors
    ///
    /// Returns an error if the view, semaphore or fence cannot be created.
    pub fn new(
        device: Arc<dyn GpuDevice>,
        image: SwapchainImage,
        format: vk::Format,
    ) -> RhiResult<Self> {
        let image_view = ImageView::new(device.clone(), &image, format)?;
        let semaphore = Semaphore::new(device.clone())?;
        let fence = Fence::new(device.clone(), true)?;

        debug!("Created render frame for swapchain image {}", image.index());

        Ok(Self {
            device,
            image,
            image_view,
            command_pools: BTreeMap::new(),
            semaphore,
            fence,
        })
    }

    /// Leases a primary command buffer for `queue`.
    ///
    /// The pool for the queue's family is created the first time it is
    /// needed. After [`reset`](Self::reset), buffers are handed out again in
    /// the same order instead of being reallocated.
    ///
    /// # Errors
    ///
    /// Returns an error if pool creation or buffer allocation fails.
    pub fn request_command_buffer(&mut self, queue: &Queue) -> RhiResult<CommandBuffer> {
        let family = queue.family_index();

        let pool = match self.command_pools.entry(family) {
            std::collections::btree_map::Entry::Occupied(entry) => entry.into_mut(),
            std::collections::btree_map::Entry::Vacant(entry) => {
                debug!(
                    "Creating command pool for family {} in frame {}",
                    family,
                    self.image.index()
                );
                entry.insert(CommandPool::new(self.device.clone(), family)?)
            }
        };

        pool.request_command_buffer()
    }

    /// Resets every command pool of the frame.
    ///
    /// Must only be called once the frame's fence has signaled.
    ///
    /// # Errors
    ///
    /// Returns an error if a pool reset fails.
    pub fn reset(&mut self) -> RhiResult<()> {
        for pool in self.command_pools.values_mut() {
            pool.reset()?;
        }
        Ok(())
    }

    /// Returns the swapchain image this frame renders into.
    #[inline]
    pub fn image(&self) -> &SwapchainImage {
        &self.image
    }

    /// Index of the swapchain image this frame belongs to.
    #[inline]
    pub fn image_index(&self) -> u32 {
        self.image.index()
    }

    #[inline]
    pub fn image_view(&self) -> &ImageView {
        &self.image_view
    }

    #[inline]
    pub fn semaphore(&self) -> &Semaphore {
        &self.semaphore
    }

    #[inline]
    pub fn fence(&self) -> &Fence {
        &self.fence
    }

    /// Number of queue families this frame has created a pool for.
    #[inline]
    pub fn command_pool_count(&self) -> usize {
        self.command_pools.len()
    }
}
