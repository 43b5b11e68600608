//! Synchronization primitives.
//!
//! This module provides RAII wrappers for the two synchronization objects
//! the frame engine uses:
//! - [`Semaphore`] - GPU-to-GPU ordering between queue operations
//! - [`Fence`] - GPU-to-CPU completion signal
//!
//! # Overview
//!
//! - **Semaphores** order queue operations without CPU involvement: image
//!   acquisition signals one before rendering waits on it, rendering signals
//!   another before presentation waits on it.
//!
//! - **Fences** let the CPU learn that submitted work has retired. Waiting
//!   on a frame's fence before reusing its command buffers is the only
//!   backpressure between CPU and GPU.
//!
//! Each wrapper is exclusively owned by the frame or context that created it.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use framepace_rhi::gpu::GpuDevice;
//! use framepace_rhi::sync::{Fence, Semaphore};
//!
//! # fn example(device: Arc<dyn GpuDevice>) -> framepace_rhi::RhiResult<()> {
//! let image_available = Semaphore::new(device.clone())?;
//!
//! // Start signaled so the first wait never blocks
//! let in_flight = Fence::new(device, true)?;
//! in_flight.wait(u64::MAX)?;
//! in_flight.reset()?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::error::RhiResult;
use crate::gpu::GpuDevice;

/// Binary semaphore wrapper.
///
/// The semaphore is created unsignaled and destroyed on drop. The owner must
/// ensure no pending queue operation still references it at that point.
pub struct Semaphore {
    /// Device that created the semaphore.
    device: Arc<dyn GpuDevice>,
    /// Semaphore handle.
    semaphore: vk::Semaphore,
}

impl Semaphore {
    /// Creates a new, unsignaled semaphore.
    ///
    /// # Errors
    ///
    /// Returns an error if semaphore creation fails.
    pub fn new(device: Arc<dyn GpuDevice>) -> RhiResult<Self> {
        let semaphore = device.create_semaphore()?;

        debug!("Created semaphore {:?}", semaphore);

        Ok(Self { device, semaphore })
    }

    /// Returns the semaphore handle.
    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        self.device.destroy_semaphore(self.semaphore);
        debug!("Destroyed semaphore {:?}", self.semaphore);
    }
}

/// Fence wrapper.
///
/// Fences let the host wait for GPU work to retire. A frame's fence is
/// waited on and reset before the frame's command buffers are reused.
pub struct Fence {
    /// Device that created the fence.
    device: Arc<dyn GpuDevice>,
    /// Fence handle.
    fence: vk::Fence,
}

impl Fence {
    /// Creates a new fence.
    ///
    /// # Arguments
    ///
    /// * `device` - The device to create the fence on
    /// * `signaled` - If true, the fence starts signaled, so the first wait
    ///   on it returns immediately.
    ///
    /// # Errors
    ///
    /// Returns an error if fence creation fails.
    pub fn new(device: Arc<dyn GpuDevice>, signaled: bool) -> RhiResult<Self> {
        let fence = device.create_fence(signaled)?;

        debug!(
            "Created fence {:?} ({})",
            fence,
            if signaled { "signaled" } else { "unsignaled" }
        );

        Ok(Self { device, fence })
    }

    /// Returns the fence handle.
    #[inline]
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }

    /// Blocks until the fence is signaled or `timeout` nanoseconds pass.
    ///
    /// Use `u64::MAX` to wait indefinitely.
    ///
    /// # Errors
    ///
    /// Returns `vk::Result::TIMEOUT` wrapped in an error if the wait expires,
    /// or any other error the device reports (e.g. device lost).
    pub fn wait(&self, timeout: u64) -> RhiResult<()> {
        self.device.wait_for_fences(&[self.fence], timeout)
    }

    /// Resets the fence to the unsignaled state.
    ///
    /// The fence must not be referenced by a pending submission.
    ///
    /// # Errors
    ///
    /// Returns an error if the reset fails.
    pub fn reset(&self) -> RhiResult<()> {
        self.device.reset_fences(&[self.fence])
    }

    /// Returns true if the fence is currently signaled. Never blocks.
    ///
    /// # Errors
    ///
    /// Returns an error if the status query fails (e.g. device lost).
    pub fn is_signaled(&self) -> RhiResult<bool> {
        self.device.fence_status(self.fence)
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        self.device.destroy_fence(self.fence);
        debug!("Destroyed fence {:?}", self.fence);
    }
}
