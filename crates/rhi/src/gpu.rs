//! The device/queue seam consumed by the frame engine.
//!
//! Everything above this module (sync primitives, command pools, the
//! swapchain, and the render context built on top of them) creates objects
//! and talks to the GPU exclusively through [`GpuDevice`]. The Vulkan
//! implementation is [`Device`](crate::device::Device); the in-process test
//! double is `mock::MockDevice` (behind the `mock` feature).
//!
//! Handles are plain `ash::vk` handle types so that both backends share one
//! vocabulary and no conversion layer is needed.

use ash::vk;

use crate::error::RhiResult;
use crate::physical_device::QueueFamilyIndices;
use crate::swapchain::SwapchainSupportDetails;

/// A device queue together with the family it was retrieved from.
///
/// Command pools are keyed by family, so the family index travels with the
/// queue handle wherever a queue is passed around.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Queue {
    handle: vk::Queue,
    family_index: u32,
}

impl Queue {
    /// Wraps a queue handle retrieved from `family_index`.
    #[inline]
    pub fn new(handle: vk::Queue, family_index: u32) -> Self {
        Self {
            handle,
            family_index,
        }
    }

    /// Returns the raw queue handle.
    #[inline]
    pub fn handle(&self) -> vk::Queue {
        self.handle
    }

    /// Returns the queue family index.
    #[inline]
    pub fn family_index(&self) -> u32 {
        self.family_index
    }
}

/// Backend-neutral description of one queue submission.
///
/// `wait_semaphores` and `wait_stages` are parallel slices.
#[derive(Clone, Copy, Debug, Default)]
pub struct SubmitInfo<'a> {
    pub command_buffers: &'a [vk::CommandBuffer],
    pub wait_semaphores: &'a [vk::Semaphore],
    pub wait_stages: &'a [vk::PipelineStageFlags],
    pub signal_semaphores: &'a [vk::Semaphore],
}

/// Object creation and queue operations needed by the frame engine.
///
/// Implementations must be shareable across threads; the engine holds the
/// device as `Arc<dyn GpuDevice>` and never outlives it.
///
/// Destroy methods take handles by value and must tolerate being called
/// during unwinding, so they do not return errors.
pub trait GpuDevice: Send + Sync {
    /// Queue family indices selected for this device.
    fn queue_families(&self) -> QueueFamilyIndices;

    // ---------------------------------------------------------------------
    // Synchronization
    // ---------------------------------------------------------------------

    fn create_semaphore(&self) -> RhiResult<vk::Semaphore>;
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);

    fn create_fence(&self, signaled: bool) -> RhiResult<vk::Fence>;
    fn destroy_fence(&self, fence: vk::Fence);

    /// Blocks until all `fences` are signaled or `timeout` nanoseconds pass.
    fn wait_for_fences(&self, fences: &[vk::Fence], timeout: u64) -> RhiResult<()>;
    fn reset_fences(&self, fences: &[vk::Fence]) -> RhiResult<()>;

    /// Non-blocking signaled query.
    fn fence_status(&self, fence: vk::Fence) -> RhiResult<bool>;

    // ---------------------------------------------------------------------
    // Command pools and buffers
    // ---------------------------------------------------------------------

    fn create_command_pool(
        &self,
        queue_family_index: u32,
        flags: vk::CommandPoolCreateFlags,
    ) -> RhiResult<vk::CommandPool>;
    fn destroy_command_pool(&self, pool: vk::CommandPool);

    /// Resets every buffer allocated from `pool` to the initial state.
    fn reset_command_pool(&self, pool: vk::CommandPool, release_resources: bool) -> RhiResult<()>;

    fn allocate_command_buffers(
        &self,
        pool: vk::CommandPool,
        level: vk::CommandBufferLevel,
        count: u32,
    ) -> RhiResult<Vec<vk::CommandBuffer>>;

    fn begin_command_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        flags: vk::CommandBufferUsageFlags,
    ) -> RhiResult<()>;
    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> RhiResult<()>;

    // ---------------------------------------------------------------------
    // Queue operations
    // ---------------------------------------------------------------------

    fn queue_submit(&self, queue: vk::Queue, submit: &SubmitInfo<'_>, fence: vk::Fence)
    -> RhiResult<()>;

    /// Blocks until `queue` has drained.
    fn queue_wait_idle(&self, queue: vk::Queue) -> RhiResult<()>;

    /// Blocks until every queue of the device has drained.
    fn wait_idle(&self) -> RhiResult<()>;

    // ---------------------------------------------------------------------
    // Images
    // ---------------------------------------------------------------------

    /// Creates a 2D colour view of `image` in `format`.
    fn create_image_view(&self, image: vk::Image, format: vk::Format) -> RhiResult<vk::ImageView>;
    fn destroy_image_view(&self, view: vk::ImageView);

    // ---------------------------------------------------------------------
    // Surface and swapchain
    // ---------------------------------------------------------------------

    fn surface_support(&self, surface: vk::SurfaceKHR) -> RhiResult<SwapchainSupportDetails>;

    fn create_swapchain(
        &self,
        create_info: &vk::SwapchainCreateInfoKHR<'_>,
    ) -> RhiResult<vk::SwapchainKHR>;
    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR);
    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> RhiResult<Vec<vk::Image>>;

    /// Forwards `vkAcquireNextImageKHR`.
    ///
    /// Returns `(image_index, suboptimal)` on success. `ERROR_OUT_OF_DATE_KHR`
    /// and every fatal code come back as `Err`.
    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        timeout: u64,
        semaphore: vk::Semaphore,
        fence: vk::Fence,
    ) -> Result<(u32, bool), vk::Result>;

    /// Forwards `vkQueuePresentKHR` for a single swapchain image.
    ///
    /// Returns `suboptimal` on success.
    fn queue_present(
        &self,
        queue: vk::Queue,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<bool, vk::Result>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[test]
    fn test_queue_carries_family_index() {
        let queue = Queue::new(vk::Queue::from_raw(7), 2);
        assert_eq!(queue.handle(), vk::Queue::from_raw(7));
        assert_eq!(queue.family_index(), 2);
    }

    #[test]
    fn test_submit_info_default_is_empty() {
        let info = SubmitInfo::default();
        assert!(info.command_buffers.is_empty());
        assert!(info.wait_semaphores.is_empty());
        assert!(info.wait_stages.is_empty());
        assert!(info.signal_semaphores.is_empty());
    }

    #[test]
    fn test_gpu_device_is_object_safe() {
        fn assert_object_safe(_: Option<&dyn GpuDevice>) {}
        assert_object_safe(None);
    }
}
