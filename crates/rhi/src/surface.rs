//! The window-side collaborator of the swapchain.

use ash::vk;

/// Anything that can report the current drawable size of a surface in
/// pixels.
///
/// A zero width or height (e.g. a minimized window) means no swapchain can
/// exist for the surface right now.
pub trait WindowExtent {
    fn extent(&self) -> vk::Extent2D;

    /// Returns true if either dimension is zero.
    fn is_zero_area(&self) -> bool {
        let extent = self.extent();
        extent.width == 0 || extent.height == 0
    }
}

impl WindowExtent for vk::Extent2D {
    #[inline]
    fn extent(&self) -> vk::Extent2D {
        *self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extent_reports_itself() {
        let extent = vk::Extent2D {
            width: 640,
            height: 480,
        };
        assert_eq!(WindowExtent::extent(&extent).width, 640);
        assert!(!extent.is_zero_area());
    }

    #[test]
    fn test_minimized_extent_has_zero_area() {
        let extent = vk::Extent2D {
            width: 640,
            height: 0,
        };
        assert!(extent.is_zero_area());
    }
}
