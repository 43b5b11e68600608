//! framepace demo.
//!
//! Opens a window and clears every swapchain image to a slowly cycling
//! colour, recreating the swapchain whenever the window changes size.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use ash::vk;
use tracing::{error, info, warn};
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::WindowId;

use framepace_platform::{Surface, Window, required_extensions};
use framepace_renderer::{RenderContext, RenderContextConfig, RenderTarget};
use framepace_rhi::command::{CommandBuffer, CommandEncoder};
use framepace_rhi::device::Device;
use framepace_rhi::instance::Instance;
use framepace_rhi::physical_device::select_physical_device;
use framepace_rhi::surface::WindowExtent;

const STATS_INTERVAL: Duration = Duration::from_secs(5);

/// Everything that lives as long as the window's surface.
///
/// Fields drop in declaration order: the context before the surface it
/// presents to, the surface before the instance that created it.
struct Gpu {
    context: RenderContext,
    _surface: Surface,
    device: Arc<Device>,
    _instance: Instance,
}

impl Gpu {
    fn new(window: &Window) -> Result<Self> {
        let extensions = required_extensions(window.raw_display_handle()?)?;
        let instance = Instance::new(cfg!(debug_assertions), &extensions)?;
        let surface = window.create_surface(instance.entry(), instance.handle())?;

        let physical_device = select_physical_device(&instance, surface.handle())?;
        let device = Device::new(&instance, &physical_device)?;

        let queue = device.graphics_queue();
        if queue != device.present_queue() {
            warn!("Graphics and present queues differ; presenting on the graphics queue");
        }

        let config = RenderContextConfig::default().with_present_mode(vk::PresentModeKHR::MAILBOX);
        let context = RenderContext::new(window, surface.handle(), device.clone(), queue, config)?;

        Ok(Self {
            context,
            _surface: surface,
            device,
            _instance: instance,
        })
    }

    /// Runs one acquire, render, present cycle.
    fn draw(&mut self, window: &Window, frame_number: u64) -> Result<()> {
        if self.context.prepare_frame()?.needs_recreation() {
            self.context.resize(window.extent())?;
            return Ok(());
        }

        let cmd = self.context.request_command_buffer()?;
        let device = &self.device;
        self.context.render(&cmd, |cmd, target| {
            clear(device, cmd, target, frame_number);
        })?;

        if self.context.present_frame()?.needs_recreation() {
            self.context.resize(window.extent())?;
        }

        Ok(())
    }
}

/// Clears the target to a colour derived from `frame_number`.
fn clear(device: &Device, cmd: &CommandBuffer, target: &RenderTarget, frame_number: u64) {
    let encoder = CommandEncoder::new(device.handle(), cmd.handle());
    let t = (frame_number % 360) as f32 / 360.0 * std::f32::consts::TAU;
    let color = [
        0.5 + 0.5 * t.sin(),
        0.5 + 0.5 * (t + 2.1).sin(),
        0.5 + 0.5 * (t + 4.2).sin(),
        1.0,
    ];

    encoder.transition_color_image(
        target.image,
        vk::ImageLayout::UNDEFINED,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        (vk::PipelineStageFlags::TOP_OF_PIPE, vk::AccessFlags::empty()),
        (
            vk::PipelineStageFlags::TRANSFER,
            vk::AccessFlags::TRANSFER_WRITE,
        ),
    );
    encoder.clear_color_image(target.image, vk::ImageLayout::TRANSFER_DST_OPTIMAL, color);
    encoder.transition_color_image(
        target.image,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        vk::ImageLayout::PRESENT_SRC_KHR,
        (
            vk::PipelineStageFlags::TRANSFER,
            vk::AccessFlags::TRANSFER_WRITE,
        ),
        (
            vk::PipelineStageFlags::BOTTOM_OF_PIPE,
            vk::AccessFlags::empty(),
        ),
    );
}

struct App {
    // Dropped before the window
    gpu: Option<Gpu>,
    window: Option<Window>,
    frame_number: u64,
    last_report: Instant,
}

impl App {
    fn new() -> Self {
        Self {
            gpu: None,
            window: None,
            frame_number: 0,
            last_report: Instant::now(),
        }
    }

    fn report_stats(&mut self) {
        if self.last_report.elapsed() < STATS_INTERVAL {
            return;
        }
        self.last_report = Instant::now();

        if let Some(gpu) = &self.gpu {
            info!("Frame stats: {}", gpu.context.stats());
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let window = match Window::new(event_loop, 1280, 720, "framepace") {
            Ok(window) => window,
            Err(e) => {
                error!("Failed to create window: {}", e);
                event_loop.exit();
                return;
            }
        };

        match Gpu::new(&window) {
            Ok(gpu) => {
                info!("Initialization complete, entering main loop");
                self.gpu = Some(gpu);
                self.window = Some(window);
            }
            Err(e) => {
                error!("Failed to initialize Vulkan: {:?}", e);
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested, shutting down");
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if let Some(window) = &mut self.window {
                    window.resize(size.width, size.height);
                }
                if let Some(gpu) = &mut self.gpu
                    && let Err(e) = gpu.context.resize(vk::Extent2D {
                        width: size.width,
                        height: size.height,
                    })
                {
                    error!("Resize failed: {:?}", e);
                    event_loop.exit();
                }
            }
            WindowEvent::RedrawRequested => {
                if let (Some(gpu), Some(window)) = (&mut self.gpu, &self.window)
                    && let Err(e) = gpu.draw(window, self.frame_number)
                {
                    error!("Render error: {:?}", e);
                    event_loop.exit();
                    return;
                }
                self.frame_number += 1;
                self.report_stats();
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }
}

fn main() -> Result<()> {
    framepace_core::init_logging();
    info!("Starting framepace");

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new();
    event_loop.run_app(&mut app)?;

    Ok(())
}
