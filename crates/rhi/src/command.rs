//! Command pool and command buffer management.
//!
//! # Overview
//!
//! - [`CommandPool`] owns a pool for one queue family and leases primary
//!   command buffers out of it. Leased buffers are recycled after
//!   [`CommandPool::reset`] instead of being reallocated.
//! - [`CommandBuffer`] is a non-owning, cloneable handle to a leased buffer
//!   with begin/end controls.
//! - [`CommandEncoder`] records commands into a buffer through an
//!   `ash::Device`, for callers that own the Vulkan device directly.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use framepace_rhi::gpu::GpuDevice;
//! use framepace_rhi::command::CommandPool;
//!
//! # fn example(device: Arc<dyn GpuDevice>) -> framepace_rhi::RhiResult<()> {
//! let family = device.queue_families().graphics_family.unwrap_or(0);
//! let mut pool = CommandPool::new(device, family)?;
//!
//! let cmd = pool.request_command_buffer()?;
//! cmd.begin()?;
//! // ... record ...
//! cmd.end()?;
//!
//! // Once the GPU has retired the buffer:
//! pool.reset()?;
//! let same = pool.request_command_buffer()?;
//! assert_eq!(cmd, same);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use crate::error::RhiResult;
use crate::gpu::GpuDevice;

/// Command pool for one queue family with a lease cursor.
///
/// Buffers are allocated lazily: the pool hands out the buffer at the
/// cursor position and only allocates when the cursor runs past the buffers
/// it already holds. [`reset`](Self::reset) rewinds the cursor, so a steady
/// workload leases the same buffers in the same order every cycle.
///
/// # Thread Safety
///
/// Command pools are externally synchronized. One pool belongs to one frame
/// and is only touched from the thread driving that frame.
pub struct CommandPool {
    /// Device that created the pool.
    device: Arc<dyn GpuDevice>,
    /// Pool handle.
    pool: vk::CommandPool,
    /// Queue family index this pool belongs to.
    queue_family_index: u32,
    /// Every primary buffer allocated so far, in allocation order.
    buffers: Vec<CommandBuffer>,
    /// Number of buffers leased since the last reset.
    active_count: usize,
}

impl CommandPool {
    /// Creates a command pool for `queue_family_index`.
    ///
    /// The whole pool is reset at once, so no per-buffer reset flag is
    /// requested.
    ///
    /// # Errors
    ///
    /// Returns an error if pool creation fails.
    pub fn new(device: Arc<dyn GpuDevice>, queue_family_index: u32) -> RhiResult<Self> {
        let pool = device
            .create_command_pool(queue_family_index, vk::CommandPoolCreateFlags::TRANSIENT)?;

        info!(
            "Command pool created for queue family {}",
            queue_family_index
        );

        Ok(Self {
            device,
            pool,
            queue_family_index,
            buffers: Vec::new(),
            active_count: 0,
        })
    }

    /// Returns the pool handle.
    #[inline]
    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    /// Returns the queue family index this pool belongs to.
    #[inline]
    pub fn queue_family_index(&self) -> u32 {
        self.queue_family_index
    }

    /// Number of buffers leased since the last reset.
    #[inline]
    pub fn active_count(&self) -> usize {
        self.active_count
    }

    /// Number of buffers ever allocated from this pool.
    #[inline]
    pub fn allocated_count(&self) -> usize {
        self.buffers.len()
    }

    /// Leases the next primary command buffer.
    ///
    /// Reuses a previously allocated buffer when one is available past the
    /// cursor, otherwise allocates a new one.
    ///
    /// # Errors
    ///
    /// Returns an error if a new allocation is needed and fails.
    pub fn request_command_buffer(&mut self) -> RhiResult<CommandBuffer> {
        if self.active_count < self.buffers.len() {
            let buffer = self.buffers[self.active_count].clone();
            self.active_count += 1;
            return Ok(buffer);
        }

        let handle = self
            .device
            .allocate_command_buffers(self.pool, vk::CommandBufferLevel::PRIMARY, 1)?
            .into_iter()
            .next()
            .ok_or(vk::Result::ERROR_OUT_OF_HOST_MEMORY)?;

        let buffer = CommandBuffer::from_handle(self.device.clone(), handle);
        self.buffers.push(buffer.clone());
        self.active_count += 1;

        debug!(
            "Allocated command buffer {:?} (pool for family {} now holds {})",
            handle,
            self.queue_family_index,
            self.buffers.len()
        );

        Ok(buffer)
    }

    /// Resets the pool and rewinds the lease cursor.
    ///
    /// Every buffer returns to the initial state. The caller must know the
    /// GPU has retired all of them, normally by waiting on the owning
    /// frame's fence.
    ///
    /// # Errors
    ///
    /// Returns an error if the reset fails.
    pub fn reset(&mut self) -> RhiResult<()> {
        self.device.reset_command_pool(self.pool, false)?;
        self.active_count = 0;
        Ok(())
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        // Buffers are freed together with their pool
        self.device.destroy_command_pool(self.pool);
        info!(
            "Command pool destroyed for queue family {} ({} buffers)",
            self.queue_family_index,
            self.buffers.len()
        );
    }
}

/// Leased command buffer.
///
/// This does NOT own the underlying handle: it is freed when the owning
/// [`CommandPool`] is destroyed. Two `CommandBuffer`s compare equal when
/// they refer to the same handle.
#[derive(Clone)]
pub struct CommandBuffer {
    /// Device used for begin/end.
    device: Arc<dyn GpuDevice>,
    /// Command buffer handle.
    buffer: vk::CommandBuffer,
}

impl CommandBuffer {
    /// Wraps an existing command buffer handle.
    #[inline]
    pub fn from_handle(device: Arc<dyn GpuDevice>, buffer: vk::CommandBuffer) -> Self {
        Self { device, buffer }
    }

    /// Returns the raw command buffer handle.
    #[inline]
    pub fn handle(&self) -> vk::CommandBuffer {
        self.buffer
    }

    /// Begins recording for a single submission.
    ///
    /// # Errors
    ///
    /// Returns an error if beginning fails (e.g. the buffer is already
    /// recording).
    pub fn begin(&self) -> RhiResult<()> {
        self.device
            .begin_command_buffer(self.buffer, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)
    }

    /// Ends recording. The buffer is then ready for submission.
    ///
    /// # Errors
    ///
    /// Returns an error if ending fails (e.g. the buffer is not recording).
    pub fn end(&self) -> RhiResult<()> {
        self.device.end_command_buffer(self.buffer)
    }
}

impl PartialEq for CommandBuffer {
    fn eq(&self, other: &Self) -> bool {
        self.buffer == other.buffer
    }
}

impl Eq for CommandBuffer {}

impl std::fmt::Debug for CommandBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("CommandBuffer").field(&self.buffer).finish()
    }
}

/// Records commands into a command buffer through an `ash::Device`.
///
/// The frame engine itself never records commands; this is handed to
/// callers that own the Vulkan device and want to fill the buffer leased
/// from a frame.
pub struct CommandEncoder<'a> {
    device: &'a ash::Device,
    buffer: vk::CommandBuffer,
}

impl<'a> CommandEncoder<'a> {
    /// Creates an encoder for `buffer`, which must be in the recording state.
    #[inline]
    pub fn new(device: &'a ash::Device, buffer: vk::CommandBuffer) -> Self {
        Self { device, buffer }
    }

    /// Returns the command buffer being recorded.
    #[inline]
    pub fn handle(&self) -> vk::CommandBuffer {
        self.buffer
    }

    /// Transitions the colour subresource of `image` between layouts.
    pub fn transition_color_image(
        &self,
        image: vk::Image,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
        src: (vk::PipelineStageFlags, vk::AccessFlags),
        dst: (vk::PipelineStageFlags, vk::AccessFlags),
    ) {
        let barrier = vk::ImageMemoryBarrier::default()
            .old_layout(old_layout)
            .new_layout(new_layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(color_subresource_range())
            .src_access_mask(src.1)
            .dst_access_mask(dst.1);

        unsafe {
            self.device.cmd_pipeline_barrier(
                self.buffer,
                src.0,
                dst.0,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        }
    }

    /// Clears the colour subresource of `image`, which must be in
    /// `TRANSFER_DST_OPTIMAL` or `GENERAL` layout.
    pub fn clear_color_image(&self, image: vk::Image, layout: vk::ImageLayout, color: [f32; 4]) {
        let clear = vk::ClearColorValue { float32: color };
        unsafe {
            self.device.cmd_clear_color_image(
                self.buffer,
                image,
                layout,
                &clear,
                &[color_subresource_range()],
            );
        }
    }
}

/// Single-mip, single-layer colour subresource range.
pub fn color_subresource_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange::default()
        .aspect_mask(vk::ImageAspectFlags::COLOR)
        .base_mip_level(0)
        .level_count(1)
        .base_array_layer(0)
        .layer_count(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockDevice;

    #[test]
    fn test_command_buffer_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<CommandBuffer>();
    }

    #[test]
    fn test_command_pool_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<CommandPool>();
    }

    #[test]
    fn test_pool_recycles_buffers_after_reset() {
        let mock = MockDevice::new();
        let mut pool = CommandPool::new(mock.clone(), 0).unwrap();

        let first: Vec<_> = (0..3)
            .map(|_| pool.request_command_buffer().unwrap())
            .collect();
        assert_eq!(pool.active_count(), 3);

        pool.reset().unwrap();
        assert_eq!(pool.active_count(), 0);

        let second: Vec<_> = (0..3)
            .map(|_| pool.request_command_buffer().unwrap())
            .collect();

        assert_eq!(first, second);
        assert_eq!(pool.allocated_count(), 3);
        assert_eq!(mock.command_buffers_allocated(), 3);
    }

    #[test]
    fn test_pool_grows_past_cursor() {
        let mock = MockDevice::new();
        let mut pool = CommandPool::new(mock.clone(), 0).unwrap();

        let a = pool.request_command_buffer().unwrap();
        pool.reset().unwrap();

        let a_again = pool.request_command_buffer().unwrap();
        let b = pool.request_command_buffer().unwrap();

        assert_eq!(a, a_again);
        assert_ne!(a, b);
        assert_eq!(pool.allocated_count(), 2);
    }

    #[test]
    fn test_color_subresource_range_covers_one_level() {
        let range = color_subresource_range();
        assert_eq!(range.aspect_mask, vk::ImageAspectFlags::COLOR);
        assert_eq!(range.level_count, 1);
        assert_eq!(range.layer_count, 1);
    }
}
