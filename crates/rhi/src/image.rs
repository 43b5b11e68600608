//! Image views over swapchain images.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::error::RhiResult;
use crate::gpu::GpuDevice;
use crate::swapchain::SwapchainImage;

/// 2D colour view over a swapchain image.
///
/// The view keeps the index of the image it was created for as a lookup key
/// into the swapchain's image list. It never owns or points at the image, so
/// the swapchain can retire its images without leaving a dangling reference
/// behind; the owner only has to drop the view first.
pub struct ImageView {
    device: Arc<dyn GpuDevice>,
    view: vk::ImageView,
    image_index: u32,
    format: vk::Format,
}

impl ImageView {
    /// Creates a colour view of `image` in `format`.
    ///
    /// # Errors
    ///
    /// Returns an error if view creation fails.
    pub fn new(
        device: Arc<dyn GpuDevice>,
        image: &SwapchainImage,
        format: vk::Format,
    ) -> RhiResult<Self> {
        let view = device.create_image_view(image.handle(), format)?;

        debug!(
            "Created image view {:?} for swapchain image {} ({:?})",
            view,
            image.index(),
            format
        );

        Ok(Self {
            device,
            view,
            image_index: image.index(),
            format,
        })
    }

    /// Returns the view handle.
    #[inline]
    pub fn handle(&self) -> vk::ImageView {
        self.view
    }

    /// Index of the swapchain image this view was created for.
    #[inline]
    pub fn image_index(&self) -> u32 {
        self.image_index
    }

    /// Returns the view format.
    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }
}

impl Drop for ImageView {
    fn drop(&mut self) {
        self.device.destroy_image_view(self.view);
        debug!(
            "Destroyed image view {:?} (swapchain image {})",
            self.view, self.image_index
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockDevice;
    use ash::vk::Handle;

    #[test]
    fn test_view_remembers_image_index() {
        let mock = MockDevice::new();
        let image = SwapchainImage::new(vk::Image::from_raw(0xabc), 2);

        let view = ImageView::new(mock.clone(), &image, vk::Format::B8G8R8A8_SRGB).unwrap();

        assert_eq!(view.image_index(), 2);
        assert_eq!(view.format(), vk::Format::B8G8R8A8_SRGB);
        assert_eq!(mock.live_image_views(), 1);

        drop(view);
        assert_eq!(mock.live_image_views(), 0);
    }
}
