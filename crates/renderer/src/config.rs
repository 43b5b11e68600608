//! Render context configuration.

use ash::vk;
use framepace_rhi::swapchain::SwapchainProperties;
use tracing::Span;

/// Construction-time settings for a [`RenderContext`](crate::RenderContext).
///
/// The swapchain extent in `swapchain` is ignored; the context always sizes
/// the swapchain from the window it is built for and from `resize`.
#[derive(Clone, Debug)]
pub struct RenderContextConfig {
    /// Requested swapchain properties. Unsupported values are substituted
    /// during negotiation.
    pub swapchain: SwapchainProperties,
    /// Nanoseconds to wait for an image in `prepare_frame`.
    pub acquire_timeout: u64,
    /// Nanoseconds to wait for the active frame's fence in `prepare_frame`.
    pub fence_timeout: u64,
    /// Block on the queue after every submission in `render`.
    ///
    /// # Safety
    ///
    /// Every acquisition signals the one shared acquire semaphore, and the
    /// previous submission waits on it. Turning this off lets the next
    /// `prepare_frame` acquire into that semaphore while the wait is still
    /// pending, which Vulkan forbids. Only turn it off once acquisition no
    /// longer shares a single semaphore.
    pub wait_queue_idle_after_submit: bool,
    /// Span every context operation is recorded in.
    pub span: Span,
}

impl Default for RenderContextConfig {
    fn default() -> Self {
        Self {
            swapchain: SwapchainProperties::default(),
            acquire_timeout: u64::MAX,
            fence_timeout: u64::MAX,
            wait_queue_idle_after_submit: true,
            span: tracing::info_span!("render_context"),
        }
    }
}

impl RenderContextConfig {
    pub fn with_present_mode(mut self, present_mode: vk::PresentModeKHR) -> Self {
        self.swapchain.present_mode = present_mode;
        self
    }

    pub fn with_surface_format(mut self, surface_format: vk::SurfaceFormatKHR) -> Self {
        self.swapchain.surface_format = surface_format;
        self
    }

    pub fn with_image_count(mut self, image_count: u32) -> Self {
        self.swapchain.image_count = image_count;
        self
    }

    pub fn with_image_usage(mut self, image_usage: vk::ImageUsageFlags) -> Self {
        self.swapchain.image_usage = image_usage;
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: u64) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn with_fence_timeout(mut self, timeout: u64) -> Self {
        self.fence_timeout = timeout;
        self
    }

    /// See [`wait_queue_idle_after_submit`](Self::wait_queue_idle_after_submit)
    /// before turning this off.
    pub fn with_queue_idle_wait(mut self, enabled: bool) -> Self {
        self.wait_queue_idle_after_submit = enabled;
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }
}
