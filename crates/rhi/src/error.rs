//! RHI-specific error types.

use ash::vk;
use thiserror::Error;

/// RHI-specific error type.
///
/// Every variant here is fatal for the render loop. The recoverable
/// swapchain conditions ("out of date", "suboptimal") are not errors and are
/// reported through [`SwapchainStatus`](crate::swapchain::SwapchainStatus).
#[derive(Error, Debug)]
pub enum RhiError {
    /// Vulkan API error
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),

    /// Failed to load Vulkan
    #[error("Failed to load Vulkan: {0}")]
    Loading(#[from] ash::LoadingError),

    /// No suitable GPU found
    #[error("No suitable GPU found")]
    NoSuitableGpu,

    /// Surface query or creation error
    #[error("Surface error: {0}")]
    SurfaceError(String),

    /// Swapchain negotiation or creation error
    #[error("Swapchain error: {0}")]
    SwapchainError(String),

    /// An operation was called out of order (e.g. `render` before a
    /// successful `prepare_frame`).
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl RhiError {
    /// Returns the underlying Vulkan result code, if this error carries one.
    pub fn vk_result(&self) -> Option<vk::Result> {
        match self {
            Self::Vulkan(result) => Some(*result),
            _ => None,
        }
    }

    /// Returns true if the device was lost.
    #[inline]
    pub fn is_device_lost(&self) -> bool {
        self.vk_result() == Some(vk::Result::ERROR_DEVICE_LOST)
    }
}

/// Result type alias for RHI operations.
pub type RhiResult<T> = std::result::Result<T, RhiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vulkan_error_converts_from_vk_result() {
        let err: RhiError = vk::Result::ERROR_DEVICE_LOST.into();
        assert!(err.is_device_lost());
        assert_eq!(err.vk_result(), Some(vk::Result::ERROR_DEVICE_LOST));
    }

    #[test]
    fn test_non_vulkan_error_has_no_result_code() {
        let err = RhiError::InvalidState("render before prepare_frame".to_string());
        assert_eq!(err.vk_result(), None);
        assert!(err.to_string().contains("render before prepare_frame"));
    }
}
