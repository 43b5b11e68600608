//! Frame pacing and swapchain lifecycle.
//!
//! This crate drives presentation to a single surface:
//! - Per-image frame resources (command pools, semaphore, fence)
//! - The acquire, render, present cycle with CPU/GPU backpressure
//! - Swapchain recreation on resize and out-of-date surfaces

pub mod config;
pub mod render_context;
pub mod render_frame;
pub mod stats;

pub use config::RenderContextConfig;
pub use render_context::{RenderContext, RenderTarget};
pub use render_frame::RenderFrame;
pub use stats::FrameStats;
