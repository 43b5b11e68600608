//! Render hardware interface for the frame engine.
//!
//! This crate wraps the Vulkan objects the frame engine needs using `ash`:
//! - Instance, physical device selection and the logical device
//! - The [`GpuDevice`](gpu::GpuDevice) seam all other wrappers talk through
//! - Semaphores, fences, command pools and swapchain image views
//! - Swapchain negotiation, acquisition and presentation
//!
//! With the `mock` feature, [`mock::MockDevice`] provides a GPU-less
//! `GpuDevice` for tests.

mod error;

pub mod command;
pub mod device;
pub mod gpu;
pub mod image;
pub mod instance;
pub mod physical_device;
pub mod surface;
pub mod swapchain;
pub mod sync;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use error::{RhiError, RhiResult};

// Re-export ash types that users might need
pub use ash::vk;
