//! Swapchain negotiation and image acquisition.
//!
//! # Overview
//!
//! The [`Swapchain`] owns the presentable image chain for one surface and
//! device pair. Construction negotiates every property against what the
//! surface supports and substitutes a supported value instead of failing:
//!
//! | Property         | Policy |
//! |------------------|--------|
//! | `surface_format` | requested if supported, else the first supported format |
//! | `present_mode`   | requested if supported, else FIFO (always available) |
//! | `extent`         | the surface's fixed current extent if it reports one, else the request clamped to `[min, max]` |
//! | `image_count`    | request clamped to `[min, max]`, max `0` meaning unbounded |
//! | `image_usage`    | request masked by supported usages, `COLOR_ATTACHMENT` if nothing remains |
//!
//! Image memory belongs to the presentation engine; the swapchain only
//! hands out [`SwapchainImage`] handles tagged with their index.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ash::vk;
//! use framepace_rhi::gpu::GpuDevice;
//! use framepace_rhi::swapchain::{Swapchain, SwapchainProperties, SwapchainStatus};
//! use framepace_rhi::sync::Semaphore;
//!
//! # fn example(device: Arc<dyn GpuDevice>, surface: vk::SurfaceKHR) -> framepace_rhi::RhiResult<()> {
//! let requested = SwapchainProperties::default()
//!     .with_extent(vk::Extent2D { width: 1280, height: 720 });
//! let swapchain = Swapchain::new(device.clone(), surface, &requested, None)?;
//!
//! let available = Semaphore::new(device)?;
//! let (status, index) = swapchain.acquire_next_image(u64::MAX, available.handle(), None)?;
//! if status == SwapchainStatus::OutOfDate {
//!     // recreate with `Swapchain::new(.., Some(&swapchain))`
//! }
//! # let _ = index;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info, warn};

use crate::error::{RhiError, RhiResult};
use crate::gpu::GpuDevice;

/// Swapchain surface support details.
#[derive(Debug, Clone)]
pub struct SwapchainSupportDetails {
    /// Surface capabilities (image counts, extents, transforms, usages)
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    /// Supported surface formats (format and color space combinations)
    pub formats: Vec<vk::SurfaceFormatKHR>,
    /// Supported present modes
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupportDetails {
    /// Queries swapchain support details for a physical device and surface.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the queries fail.
    pub fn query(
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        surface_loader: &ash::khr::surface::Instance,
    ) -> RhiResult<Self> {
        let capabilities = unsafe {
            surface_loader.get_physical_device_surface_capabilities(physical_device, surface)?
        };

        let formats = unsafe {
            surface_loader.get_physical_device_surface_formats(physical_device, surface)?
        };

        let present_modes = unsafe {
            surface_loader.get_physical_device_surface_present_modes(physical_device, surface)?
        };

        debug!(
            "Swapchain support: {} formats, {} present modes, image count: {}-{}",
            formats.len(),
            present_modes.len(),
            capabilities.min_image_count,
            if capabilities.max_image_count == 0 {
                "unlimited".to_string()
            } else {
                capabilities.max_image_count.to_string()
            }
        );

        Ok(Self {
            capabilities,
            formats,
            present_modes,
        })
    }

    /// Returns true if at least one format and one present mode are available.
    #[inline]
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }

    /// Returns true if the surface dictates the swapchain extent.
    #[inline]
    pub fn has_fixed_extent(&self) -> bool {
        self.capabilities.current_extent.width != u32::MAX
    }
}

/// Non-fatal outcome of an acquire or present.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SwapchainStatus {
    /// The swapchain matches the surface.
    Optimal,
    /// Usable, but no longer matches the surface exactly.
    Suboptimal,
    /// Unusable; the swapchain must be recreated before the next acquire.
    OutOfDate,
}

impl SwapchainStatus {
    /// Returns true for `Suboptimal` and `OutOfDate`.
    #[inline]
    pub fn needs_recreation(self) -> bool {
        !matches!(self, Self::Optimal)
    }

    #[inline]
    fn from_suboptimal(suboptimal: bool) -> Self {
        if suboptimal {
            Self::Suboptimal
        } else {
            Self::Optimal
        }
    }
}

/// Swapchain properties, used both as the request and as the negotiated
/// result.
#[derive(Clone, Copy, Debug)]
pub struct SwapchainProperties {
    /// Image extent in pixels.
    pub extent: vk::Extent2D,
    /// Number of presentable images.
    pub image_count: u32,
    /// Presentation mode.
    pub present_mode: vk::PresentModeKHR,
    /// Image format and color space.
    pub surface_format: vk::SurfaceFormatKHR,
    /// Image usage flags.
    pub image_usage: vk::ImageUsageFlags,
    /// Alpha compositing mode.
    pub composite_alpha: vk::CompositeAlphaFlagsKHR,
}

impl Default for SwapchainProperties {
    fn default() -> Self {
        Self {
            extent: vk::Extent2D {
                width: 1280,
                height: 720,
            },
            image_count: 3,
            present_mode: vk::PresentModeKHR::MAILBOX,
            surface_format: vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT
                | vk::ImageUsageFlags::TRANSFER_DST,
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
        }
    }
}

impl SwapchainProperties {
    pub fn with_extent(mut self, extent: vk::Extent2D) -> Self {
        self.extent = extent;
        self
    }

    pub fn with_image_count(mut self, image_count: u32) -> Self {
        self.image_count = image_count;
        self
    }

    pub fn with_present_mode(mut self, present_mode: vk::PresentModeKHR) -> Self {
        self.present_mode = present_mode;
        self
    }

    pub fn with_surface_format(mut self, surface_format: vk::SurfaceFormatKHR) -> Self {
        self.surface_format = surface_format;
        self
    }

    pub fn with_image_usage(mut self, image_usage: vk::ImageUsageFlags) -> Self {
        self.image_usage = image_usage;
        self
    }

    pub fn with_composite_alpha(mut self, composite_alpha: vk::CompositeAlphaFlagsKHR) -> Self {
        self.composite_alpha = composite_alpha;
        self
    }
}

/// A presentable image and its position in the chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SwapchainImage {
    handle: vk::Image,
    index: u32,
}

impl SwapchainImage {
    #[inline]
    pub fn new(handle: vk::Image, index: u32) -> Self {
        Self { handle, index }
    }

    /// Returns the image handle. The presentation engine owns the memory.
    #[inline]
    pub fn handle(&self) -> vk::Image {
        self.handle
    }

    /// Position of the image in the swapchain; the index returned by
    /// acquisition.
    #[inline]
    pub fn index(&self) -> u32 {
        self.index
    }
}

/// Swapchain wrapper.
///
/// The negotiated properties, including `image_count`, are fixed for the
/// lifetime of one swapchain. Recreation builds a new `Swapchain` passing
/// the old one as a hint, then drops the old one.
///
/// # Thread Safety
///
/// The swapchain is not thread-safe. Only the thread driving the render
/// loop may acquire from or present to it.
pub struct Swapchain {
    /// Device that created the swapchain.
    device: Arc<dyn GpuDevice>,
    /// Surface the swapchain presents to. Borrowed, not owned.
    surface: vk::SurfaceKHR,
    /// Swapchain handle.
    swapchain: vk::SwapchainKHR,
    /// Presentable images, in index order.
    images: Vec<SwapchainImage>,
    /// Negotiated properties.
    properties: SwapchainProperties,
}

impl Swapchain {
    /// Negotiates and creates a swapchain.
    ///
    /// # Arguments
    ///
    /// * `device` - The device to create the swapchain on
    /// * `surface` - The surface to present to; must outlive the swapchain
    /// * `requested` - Requested properties; unsupported values are
    ///   substituted (see the module docs)
    /// * `old_swapchain` - Swapchain being replaced, passed to the driver
    ///   as a recreation hint. It stays valid and must be dropped by the
    ///   caller afterwards.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Surface queries fail
    /// - The surface reports no formats or present modes
    /// - The negotiated extent has zero area (e.g. minimized window)
    /// - Swapchain creation or image retrieval fails
    pub fn new(
        device: Arc<dyn GpuDevice>,
        surface: vk::SurfaceKHR,
        requested: &SwapchainProperties,
        old_swapchain: Option<&Swapchain>,
    ) -> RhiResult<Self> {
        let support = device.surface_support(surface)?;

        if !support.is_adequate() {
            return Err(RhiError::SwapchainError(
                "Inadequate swapchain support (no formats or present modes)".to_string(),
            ));
        }

        let capabilities = &support.capabilities;
        let surface_format = choose_surface_format(requested.surface_format, &support.formats);
        let present_mode = choose_present_mode(requested.present_mode, &support.present_modes);
        let extent = choose_extent(capabilities, requested.extent);
        let image_count = choose_image_count(capabilities, requested.image_count);
        let image_usage =
            choose_image_usage(requested.image_usage, capabilities.supported_usage_flags);
        let composite_alpha = choose_composite_alpha(
            requested.composite_alpha,
            capabilities.supported_composite_alpha,
        );

        if extent.width == 0 || extent.height == 0 {
            return Err(RhiError::SwapchainError(format!(
                "Cannot create swapchain with zero extent {}x{}",
                extent.width, extent.height
            )));
        }

        info!(
            "Creating swapchain: {}x{}, format {:?}, color space {:?}, present mode {:?}, {} images{}",
            extent.width,
            extent.height,
            surface_format.format,
            surface_format.color_space,
            present_mode,
            image_count,
            if old_swapchain.is_some() {
                " (recreation)"
            } else {
                ""
            }
        );

        // Handle queue family sharing
        let queue_families = device.queue_families();
        let family_indices: Vec<u32> = match (
            queue_families.graphics_family,
            queue_families.present_family,
        ) {
            (Some(graphics), Some(present)) if graphics != present => vec![graphics, present],
            _ => Vec::new(),
        };

        let sharing_mode = if family_indices.is_empty() {
            vk::SharingMode::EXCLUSIVE
        } else {
            debug!(
                "Using CONCURRENT sharing mode between queue families {:?}",
                family_indices
            );
            vk::SharingMode::CONCURRENT
        };

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(image_usage)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(&family_indices)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(composite_alpha)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain.map_or(vk::SwapchainKHR::null(), |old| old.swapchain));

        let swapchain = device.create_swapchain(&create_info)?;

        let images = match device.swapchain_images(swapchain) {
            Ok(images) => images,
            Err(e) => {
                device.destroy_swapchain(swapchain);
                return Err(e);
            }
        };

        let images: Vec<SwapchainImage> = images
            .into_iter()
            .zip(0u32..)
            .map(|(handle, index)| SwapchainImage::new(handle, index))
            .collect();

        info!("Swapchain created with {} images", images.len());

        // The driver may hand back more images than requested
        let properties = SwapchainProperties {
            extent,
            image_count: images.len() as u32,
            present_mode,
            surface_format,
            image_usage,
            composite_alpha,
        };

        Ok(Self {
            device,
            surface,
            swapchain,
            images,
            properties,
        })
    }

    /// Acquires the next presentable image.
    ///
    /// # Arguments
    ///
    /// * `timeout` - Nanoseconds to wait; `u64::MAX` waits indefinitely
    /// * `available_semaphore` - Signaled when the image is ready for use
    /// * `fence` - Optionally signaled as well
    ///
    /// # Returns
    ///
    /// `(status, image_index)`. For [`SwapchainStatus::OutOfDate`] the index
    /// is `0` and must be ignored; nothing was acquired and the semaphore
    /// stays unsignaled.
    ///
    /// # Errors
    ///
    /// Every result other than success, suboptimal and out-of-date is fatal.
    pub fn acquire_next_image(
        &self,
        timeout: u64,
        available_semaphore: vk::Semaphore,
        fence: Option<vk::Fence>,
    ) -> RhiResult<(SwapchainStatus, u32)> {
        match self.device.acquire_next_image(
            self.swapchain,
            timeout,
            available_semaphore,
            fence.unwrap_or(vk::Fence::null()),
        ) {
            Ok((index, suboptimal)) => Ok((SwapchainStatus::from_suboptimal(suboptimal), index)),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                debug!("Swapchain out of date during acquire");
                Ok((SwapchainStatus::OutOfDate, 0))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Queues `image_index` for presentation once `wait_semaphore` signals.
    ///
    /// # Errors
    ///
    /// Every result other than success, suboptimal and out-of-date is fatal.
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> RhiResult<SwapchainStatus> {
        match self
            .device
            .queue_present(queue, self.swapchain, image_index, &[wait_semaphore])
        {
            Ok(suboptimal) => Ok(SwapchainStatus::from_suboptimal(suboptimal)),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                debug!("Swapchain out of date during present");
                Ok(SwapchainStatus::OutOfDate)
            }
            Err(vk::Result::SUBOPTIMAL_KHR) => Ok(SwapchainStatus::Suboptimal),
            Err(e) => Err(e.into()),
        }
    }

    /// Returns the swapchain handle.
    #[inline]
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    /// Returns the surface this swapchain presents to.
    #[inline]
    pub fn surface(&self) -> vk::SurfaceKHR {
        self.surface
    }

    /// Returns the negotiated properties.
    #[inline]
    pub fn properties(&self) -> &SwapchainProperties {
        &self.properties
    }

    /// Returns the image format.
    #[inline]
    pub fn format(&self) -> vk::Format {
        self.properties.surface_format.format
    }

    /// Returns the image extent.
    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.properties.extent
    }

    /// Returns the present mode.
    #[inline]
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.properties.present_mode
    }

    /// Returns the number of presentable images.
    #[inline]
    pub fn image_count(&self) -> u32 {
        self.images.len() as u32
    }

    /// Returns all presentable images in index order.
    #[inline]
    pub fn images(&self) -> &[SwapchainImage] {
        &self.images
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        // Images belong to the swapchain and go away with it
        self.device.destroy_swapchain(self.swapchain);

        info!(
            "Swapchain destroyed (was {}x{}, {} images)",
            self.properties.extent.width,
            self.properties.extent.height,
            self.images.len()
        );
    }
}

/// Picks the requested surface format if supported, else the first
/// supported one.
///
/// A single `UNDEFINED` entry means the surface accepts any format.
fn choose_surface_format(
    requested: vk::SurfaceFormatKHR,
    formats: &[vk::SurfaceFormatKHR],
) -> vk::SurfaceFormatKHR {
    if let [only] = formats
        && only.format == vk::Format::UNDEFINED
    {
        return requested;
    }

    let supported = formats
        .iter()
        .any(|f| f.format == requested.format && f.color_space == requested.color_space);

    if supported {
        return requested;
    }

    let fallback = formats[0];
    warn!(
        "Surface format {:?}/{:?} not supported, falling back to {:?}/{:?}",
        requested.format, requested.color_space, fallback.format, fallback.color_space
    );
    fallback
}

/// Picks the requested present mode if supported, else FIFO.
///
/// FIFO is the only mode every implementation must support.
fn choose_present_mode(
    requested: vk::PresentModeKHR,
    present_modes: &[vk::PresentModeKHR],
) -> vk::PresentModeKHR {
    if present_modes.contains(&requested) {
        return requested;
    }

    warn!(
        "Present mode {:?} not supported, falling back to FIFO",
        requested
    );
    vk::PresentModeKHR::FIFO
}

/// Chooses the swapchain extent.
///
/// If the surface reports a current extent, that extent is mandatory.
/// Otherwise (width == u32::MAX) the request is clamped to the surface limits.
fn choose_extent(capabilities: &vk::SurfaceCapabilitiesKHR, requested: vk::Extent2D) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        debug!(
            "Using current surface extent: {}x{}",
            capabilities.current_extent.width, capabilities.current_extent.height
        );
        return capabilities.current_extent;
    }

    let extent = vk::Extent2D {
        width: requested.width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: requested.height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    };

    debug!(
        "Calculated extent: {}x{} (requested: {}x{}, min: {}x{}, max: {}x{})",
        extent.width,
        extent.height,
        requested.width,
        requested.height,
        capabilities.min_image_extent.width,
        capabilities.min_image_extent.height,
        capabilities.max_image_extent.width,
        capabilities.max_image_extent.height
    );

    extent
}

/// Clamps the requested image count to the surface limits.
///
/// `max_image_count == 0` means there is no upper limit.
fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR, requested: u32) -> u32 {
    let image_count = requested.max(capabilities.min_image_count);

    if capabilities.max_image_count > 0 {
        image_count.min(capabilities.max_image_count)
    } else {
        image_count
    }
}

/// Masks the requested usage by what the surface supports.
fn choose_image_usage(
    requested: vk::ImageUsageFlags,
    supported: vk::ImageUsageFlags,
) -> vk::ImageUsageFlags {
    let usage = requested & supported;

    if usage != requested {
        warn!(
            "Image usage {:?} partially unsupported, using {:?}",
            requested, usage
        );
    }

    if usage.is_empty() {
        vk::ImageUsageFlags::COLOR_ATTACHMENT
    } else {
        usage
    }
}

/// Picks the requested composite alpha mode if supported, else the first
/// supported mode in order of preference.
fn choose_composite_alpha(
    requested: vk::CompositeAlphaFlagsKHR,
    supported: vk::CompositeAlphaFlagsKHR,
) -> vk::CompositeAlphaFlagsKHR {
    if supported.contains(requested) {
        return requested;
    }

    [
        vk::CompositeAlphaFlagsKHR::OPAQUE,
        vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::INHERIT,
    ]
    .into_iter()
    .find(|&mode| supported.contains(mode))
    .unwrap_or(vk::CompositeAlphaFlagsKHR::OPAQUE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockDevice, MockSurfaceConfig};

    fn srgb(format: vk::Format) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    fn unfixed_capabilities() -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 100,
                height: 100,
            },
            max_image_extent: vk::Extent2D {
                width: 2000,
                height: 2000,
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_choose_surface_format_keeps_supported_request() {
        let formats = vec![
            srgb(vk::Format::R8G8B8A8_UNORM),
            srgb(vk::Format::B8G8R8A8_SRGB),
        ];

        let selected = choose_surface_format(srgb(vk::Format::B8G8R8A8_SRGB), &formats);
        assert_eq!(selected.format, vk::Format::B8G8R8A8_SRGB);
    }

    #[test]
    fn test_choose_surface_format_falls_back_to_first() {
        let formats = vec![
            srgb(vk::Format::R8G8B8A8_UNORM),
            srgb(vk::Format::B8G8R8A8_UNORM),
        ];

        let selected = choose_surface_format(srgb(vk::Format::B8G8R8A8_SRGB), &formats);
        assert_eq!(selected.format, vk::Format::R8G8B8A8_UNORM);
    }

    #[test]
    fn test_choose_surface_format_color_space_must_match() {
        let formats = vec![vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_SRGB,
            color_space: vk::ColorSpaceKHR::DISPLAY_P3_NONLINEAR_EXT,
        }];

        let selected = choose_surface_format(srgb(vk::Format::B8G8R8A8_SRGB), &formats);
        assert_eq!(
            selected.color_space,
            vk::ColorSpaceKHR::DISPLAY_P3_NONLINEAR_EXT
        );
    }

    #[test]
    fn test_choose_surface_format_undefined_accepts_anything() {
        let formats = vec![srgb(vk::Format::UNDEFINED)];

        let selected = choose_surface_format(srgb(vk::Format::R16G16B16A16_SFLOAT), &formats);
        assert_eq!(selected.format, vk::Format::R16G16B16A16_SFLOAT);
    }

    #[test]
    fn test_choose_present_mode_keeps_supported_request() {
        let modes = vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE];

        let selected = choose_present_mode(vk::PresentModeKHR::IMMEDIATE, &modes);
        assert_eq!(selected, vk::PresentModeKHR::IMMEDIATE);
    }

    #[test]
    fn test_choose_present_mode_fallback_to_fifo() {
        let modes = vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE];

        let selected = choose_present_mode(vk::PresentModeKHR::MAILBOX, &modes);
        assert_eq!(selected, vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn test_choose_extent_uses_current() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: 1920,
                height: 1080,
            },
            ..unfixed_capabilities()
        };

        let extent = choose_extent(
            &capabilities,
            vk::Extent2D {
                width: 800,
                height: 600,
            },
        );
        assert_eq!(extent.width, 1920);
        assert_eq!(extent.height, 1080);
    }

    #[test]
    fn test_choose_extent_clamps_to_limits() {
        let capabilities = unfixed_capabilities();
        let request = |width, height| vk::Extent2D { width, height };

        let extent = choose_extent(&capabilities, request(3000, 3000));
        assert_eq!((extent.width, extent.height), (2000, 2000));

        let extent = choose_extent(&capabilities, request(50, 50));
        assert_eq!((extent.width, extent.height), (100, 100));

        let extent = choose_extent(&capabilities, request(800, 600));
        assert_eq!((extent.width, extent.height), (800, 600));
    }

    #[test]
    fn test_choose_image_count() {
        let bounded = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 3,
            ..Default::default()
        };
        assert_eq!(choose_image_count(&bounded, 8), 3);
        assert_eq!(choose_image_count(&bounded, 1), 2);
        assert_eq!(choose_image_count(&bounded, 3), 3);

        let unbounded = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            ..Default::default()
        };
        assert_eq!(choose_image_count(&unbounded, 8), 8);
    }

    #[test]
    fn test_choose_image_usage_masks_unsupported_bits() {
        let requested = vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::STORAGE;

        let usage = choose_image_usage(requested, vk::ImageUsageFlags::COLOR_ATTACHMENT);
        assert_eq!(usage, vk::ImageUsageFlags::COLOR_ATTACHMENT);

        let usage = choose_image_usage(vk::ImageUsageFlags::STORAGE, vk::ImageUsageFlags::empty());
        assert_eq!(usage, vk::ImageUsageFlags::COLOR_ATTACHMENT);
    }

    #[test]
    fn test_choose_composite_alpha_prefers_opaque_fallback() {
        let supported =
            vk::CompositeAlphaFlagsKHR::OPAQUE | vk::CompositeAlphaFlagsKHR::INHERIT;

        let mode = choose_composite_alpha(vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED, supported);
        assert_eq!(mode, vk::CompositeAlphaFlagsKHR::OPAQUE);

        let mode = choose_composite_alpha(vk::CompositeAlphaFlagsKHR::INHERIT, supported);
        assert_eq!(mode, vk::CompositeAlphaFlagsKHR::INHERIT);
    }

    #[test]
    fn test_swapchain_support_details_is_adequate() {
        let adequate = SwapchainSupportDetails {
            capabilities: vk::SurfaceCapabilitiesKHR::default(),
            formats: vec![vk::SurfaceFormatKHR::default()],
            present_modes: vec![vk::PresentModeKHR::FIFO],
        };
        assert!(adequate.is_adequate());

        let no_modes = SwapchainSupportDetails {
            present_modes: vec![],
            ..adequate.clone()
        };
        assert!(!no_modes.is_adequate());

        let no_formats = SwapchainSupportDetails {
            formats: vec![],
            ..adequate
        };
        assert!(!no_formats.is_adequate());
    }

    #[test]
    fn test_status_needs_recreation() {
        assert!(!SwapchainStatus::Optimal.needs_recreation());
        assert!(SwapchainStatus::Suboptimal.needs_recreation());
        assert!(SwapchainStatus::OutOfDate.needs_recreation());
    }

    #[test]
    fn test_unsupported_request_is_substituted() {
        let mock = MockDevice::with_surface(
            MockSurfaceConfig::default()
                .with_present_modes(vec![vk::PresentModeKHR::FIFO])
                .with_formats(vec![srgb(vk::Format::R8G8B8A8_UNORM)]),
        );
        let requested = SwapchainProperties::default()
            .with_present_mode(vk::PresentModeKHR::MAILBOX)
            .with_surface_format(srgb(vk::Format::B8G8R8A8_SRGB));

        let swapchain = Swapchain::new(mock.clone(), mock.surface(), &requested, None).unwrap();

        assert_eq!(swapchain.present_mode(), vk::PresentModeKHR::FIFO);
        assert_eq!(swapchain.format(), vk::Format::R8G8B8A8_UNORM);
    }

    #[test]
    fn test_images_are_indexed_in_order() {
        let mock = MockDevice::new();
        let requested = SwapchainProperties::default().with_image_count(3);

        let swapchain = Swapchain::new(mock.clone(), mock.surface(), &requested, None).unwrap();

        assert_eq!(swapchain.image_count(), 3);
        for (i, image) in swapchain.images().iter().enumerate() {
            assert_eq!(image.index() as usize, i);
        }
    }

    #[test]
    fn test_zero_extent_is_rejected() {
        let mock = MockDevice::with_surface(MockSurfaceConfig::default().with_min_extent(0, 0));
        let requested = SwapchainProperties::default().with_extent(vk::Extent2D {
            width: 0,
            height: 0,
        });

        let result = Swapchain::new(mock.clone(), mock.surface(), &requested, None);
        assert!(matches!(result, Err(RhiError::SwapchainError(_))));
        assert_eq!(mock.live_swapchains(), 0);
    }

    #[test]
    fn test_acquire_maps_out_of_date_to_status() {
        let mock = MockDevice::new();
        let swapchain =
            Swapchain::new(mock.clone(), mock.surface(), &SwapchainProperties::default(), None)
                .unwrap();

        mock.push_acquire_result(vk::Result::ERROR_OUT_OF_DATE_KHR);
        let (status, _) = swapchain
            .acquire_next_image(u64::MAX, vk::Semaphore::null(), None)
            .unwrap();
        assert_eq!(status, SwapchainStatus::OutOfDate);

        mock.push_acquire_result(vk::Result::ERROR_SURFACE_LOST_KHR);
        let err = swapchain
            .acquire_next_image(u64::MAX, vk::Semaphore::null(), None)
            .unwrap_err();
        assert_eq!(err.vk_result(), Some(vk::Result::ERROR_SURFACE_LOST_KHR));
    }
}
