//! In-process [`GpuDevice`] for exercising frame pacing without a GPU.
//!
//! `MockDevice` hands out synthetic handles and tracks just enough state to
//! catch lifecycle mistakes the validation layers would report on real
//! hardware:
//!
//! - fences submitted with a configurable GPU latency, so waiting on them
//!   can actually block
//! - binary semaphore signal state (waiting on an unsignaled semaphore, or
//!   signaling a signaled one, is an error)
//! - semaphore waits stay pending until the submission that waits retires,
//!   so acquiring into a semaphore an in-flight submission still waits on
//!   fails
//! - command pools reset or fences reset while their work is still pending
//! - acquisition from a retired or stale swapchain
//!
//! Acquire and present results can be scripted to inject out-of-date,
//! suboptimal and fatal outcomes. Every queue-level call is appended to a
//! call log for assertions.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use ash::vk;
use ash::vk::Handle;
use tracing::trace;

use crate::error::{RhiError, RhiResult};
use crate::gpu::{GpuDevice, Queue, SubmitInfo};
use crate::physical_device::QueueFamilyIndices;
use crate::swapchain::SwapchainSupportDetails;

/// Surface the mock reports to swapchain negotiation.
#[derive(Clone, Debug)]
pub struct MockSurfaceConfig {
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
    pub min_image_count: u32,
    /// `0` means unbounded.
    pub max_image_count: u32,
    /// `None` lets the swapchain pick its extent within the limits.
    pub current_extent: Option<vk::Extent2D>,
    pub min_extent: vk::Extent2D,
    pub max_extent: vk::Extent2D,
    pub supported_usage: vk::ImageUsageFlags,
}

impl Default for MockSurfaceConfig {
    fn default() -> Self {
        Self {
            formats: vec![
                vk::SurfaceFormatKHR {
                    format: vk::Format::B8G8R8A8_SRGB,
                    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                },
                vk::SurfaceFormatKHR {
                    format: vk::Format::B8G8R8A8_UNORM,
                    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                },
            ],
            present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
            min_image_count: 2,
            max_image_count: 8,
            current_extent: None,
            min_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            supported_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT
                | vk::ImageUsageFlags::TRANSFER_DST
                | vk::ImageUsageFlags::TRANSFER_SRC,
        }
    }
}

impl MockSurfaceConfig {
    pub fn with_formats(mut self, formats: Vec<vk::SurfaceFormatKHR>) -> Self {
        self.formats = formats;
        self
    }

    pub fn with_present_modes(mut self, present_modes: Vec<vk::PresentModeKHR>) -> Self {
        self.present_modes = present_modes;
        self
    }

    pub fn with_image_count_range(mut self, min: u32, max: u32) -> Self {
        self.min_image_count = min;
        self.max_image_count = max;
        self
    }

    pub fn with_current_extent(mut self, width: u32, height: u32) -> Self {
        self.current_extent = Some(vk::Extent2D { width, height });
        self
    }

    pub fn with_min_extent(mut self, width: u32, height: u32) -> Self {
        self.min_extent = vk::Extent2D { width, height };
        self
    }

    pub fn with_max_extent(mut self, width: u32, height: u32) -> Self {
        self.max_extent = vk::Extent2D { width, height };
        self
    }

    pub fn with_supported_usage(mut self, usage: vk::ImageUsageFlags) -> Self {
        self.supported_usage = usage;
        self
    }

    fn capabilities(&self) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: self.min_image_count,
            max_image_count: self.max_image_count,
            current_extent: self.current_extent.unwrap_or(vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            }),
            min_image_extent: self.min_extent,
            max_image_extent: self.max_extent,
            max_image_array_layers: 1,
            supported_transforms: vk::SurfaceTransformFlagsKHR::IDENTITY,
            current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            supported_composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            supported_usage_flags: self.supported_usage,
        }
    }
}

/// One entry of the call log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MockCall {
    /// `image_index` is `None` when the acquire failed.
    Acquire {
        swapchain: vk::SwapchainKHR,
        image_index: Option<u32>,
        result: vk::Result,
    },
    Submit {
        command_buffers: Vec<vk::CommandBuffer>,
        fence: vk::Fence,
    },
    Present {
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        result: vk::Result,
    },
    /// `blocked` is true when the fence was still pending and the caller
    /// had to sleep for it.
    FenceWait { fence: vk::Fence, blocked: bool },
    QueueWaitIdle,
    WaitIdle,
    CreateSwapchain { width: u32, height: u32, image_count: u32 },
}

#[derive(Debug, Default)]
struct FenceState {
    signaled: bool,
    /// Submission time of the work that will signal the fence.
    pending_since: Option<Instant>,
}

#[derive(Debug)]
struct SwapchainState {
    images: Vec<vk::Image>,
    next_image: usize,
    /// Replaced by a newer swapchain through `old_swapchain`.
    retired: bool,
    /// The surface changed after creation.
    stale: bool,
}

#[derive(Debug, Default)]
struct State {
    next_handle: u64,
    surface: MockSurfaceConfig,
    gpu_latency: Duration,

    semaphores: HashMap<u64, bool>,
    fences: HashMap<u64, FenceState>,
    pools: HashMap<u64, Vec<vk::CommandBuffer>>,
    recording: HashSet<vk::CommandBuffer>,
    /// Command buffer -> fence of the submission it last took part in.
    in_flight: HashMap<vk::CommandBuffer, vk::Fence>,
    /// Semaphore -> fence of the submission whose wait on it has not retired.
    pending_waits: HashMap<vk::Semaphore, vk::Fence>,
    device_lost: bool,
    image_views: HashSet<u64>,
    swapchains: HashMap<u64, SwapchainState>,

    acquire_script: VecDeque<vk::Result>,
    present_script: VecDeque<vk::Result>,

    command_buffers_allocated: usize,
    swapchains_created: usize,
    destroyed_in_use: usize,
    calls: Vec<MockCall>,
}

impl State {
    fn next_raw(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    /// Completion deadline of a pending fence.
    fn deadline(&self, fence: vk::Fence) -> Option<Instant> {
        self.fences
            .get(&fence.as_raw())
            .and_then(|f| f.pending_since)
            .map(|since| since + self.gpu_latency)
    }

    fn is_fence_signaled(&self, fence: vk::Fence, now: Instant) -> bool {
        match self.fences.get(&fence.as_raw()) {
            Some(state) if state.signaled => true,
            Some(_) => self.deadline(fence).is_some_and(|done| now >= done),
            None => false,
        }
    }

    fn complete_fence(&mut self, fence: vk::Fence) {
        if let Some(state) = self.fences.get_mut(&fence.as_raw()) {
            state.signaled = true;
            state.pending_since = None;
        }
        self.retire_fence(fence);
    }

    /// Forgets the work tracked against `fence` once it can no longer be
    /// pending.
    fn retire_fence(&mut self, fence: vk::Fence) {
        self.in_flight.retain(|_, pending| *pending != fence);
        self.pending_waits.retain(|_, pending| *pending != fence);
    }

    /// True if a submission that waits on `semaphore` has not retired yet.
    fn has_pending_wait(&self, semaphore: vk::Semaphore, now: Instant) -> bool {
        self.pending_waits
            .get(&semaphore)
            .is_some_and(|&fence| !self.is_fence_signaled(fence, now))
    }

    /// Latest completion deadline among all pending submissions.
    fn last_deadline(&self) -> Option<Instant> {
        self.fences
            .values()
            .filter_map(|f| f.pending_since)
            .max()
            .map(|since| since + self.gpu_latency)
    }

    fn complete_all(&mut self) {
        for state in self.fences.values_mut() {
            if state.pending_since.take().is_some() {
                state.signaled = true;
            }
        }
        self.in_flight.clear();
        self.pending_waits.clear();
    }

    fn live_swapchain(&self, swapchain: vk::SwapchainKHR) -> Result<&SwapchainState, vk::Result> {
        let chain = self
            .swapchains
            .get(&swapchain.as_raw())
            .ok_or(vk::Result::ERROR_SURFACE_LOST_KHR)?;
        if chain.retired || chain.stale {
            return Err(vk::Result::ERROR_OUT_OF_DATE_KHR);
        }
        Ok(chain)
    }

    fn acquire(
        &mut self,
        swapchain: vk::SwapchainKHR,
        semaphore: vk::Semaphore,
        fence: vk::Fence,
    ) -> Result<(u32, bool), vk::Result> {
        let suboptimal = match self.acquire_script.pop_front() {
            None | Some(vk::Result::SUCCESS) => false,
            Some(vk::Result::SUBOPTIMAL_KHR) => true,
            Some(err) => return Err(err),
        };

        let image_count = self.live_swapchain(swapchain)?.images.len();

        if semaphore != vk::Semaphore::null() {
            if self.has_pending_wait(semaphore, Instant::now()) {
                return Err(vk::Result::ERROR_VALIDATION_FAILED_EXT);
            }
            self.pending_waits.remove(&semaphore);
            self.signal_semaphore(semaphore)
                .map_err(|_| vk::Result::ERROR_VALIDATION_FAILED_EXT)?;
        }
        if fence != vk::Fence::null() {
            self.complete_fence(fence);
        }

        let chain = self
            .swapchains
            .get_mut(&swapchain.as_raw())
            .ok_or(vk::Result::ERROR_SURFACE_LOST_KHR)?;
        let index = chain.next_image as u32;
        chain.next_image = (chain.next_image + 1) % image_count.max(1);
        Ok((index, suboptimal))
    }

    fn present(
        &mut self,
        swapchain: vk::SwapchainKHR,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<bool, vk::Result> {
        let scripted = self.present_script.pop_front();

        for &semaphore in wait_semaphores {
            self.wait_semaphore(semaphore)
                .map_err(|_| vk::Result::ERROR_VALIDATION_FAILED_EXT)?;
        }

        self.live_swapchain(swapchain)?;

        match scripted {
            None | Some(vk::Result::SUCCESS) => Ok(false),
            Some(vk::Result::SUBOPTIMAL_KHR) => Ok(true),
            Some(err) => Err(err),
        }
    }

    fn wait_semaphore(&mut self, semaphore: vk::Semaphore) -> Result<(), String> {
        match self.semaphores.get_mut(&semaphore.as_raw()) {
            Some(signaled) if *signaled => {
                *signaled = false;
                Ok(())
            }
            Some(_) => Err(format!("wait on unsignaled semaphore {semaphore:?}")),
            None => Err(format!("wait on unknown semaphore {semaphore:?}")),
        }
    }

    fn signal_semaphore(&mut self, semaphore: vk::Semaphore) -> Result<(), String> {
        match self.semaphores.get_mut(&semaphore.as_raw()) {
            Some(signaled) if !*signaled => {
                *signaled = true;
                Ok(())
            }
            Some(_) => Err(format!("signal of already signaled semaphore {semaphore:?}")),
            None => Err(format!("signal of unknown semaphore {semaphore:?}")),
        }
    }
}

/// GPU-less [`GpuDevice`] with synthetic handles and scripted results.
#[derive(Debug)]
pub struct MockDevice {
    state: Mutex<State>,
    surface: vk::SurfaceKHR,
    queue: Queue,
}

impl MockDevice {
    /// Creates a mock with the default surface and zero GPU latency.
    pub fn new() -> Arc<Self> {
        Self::with_surface(MockSurfaceConfig::default())
    }

    /// Creates a mock reporting `surface` to swapchain negotiation.
    pub fn with_surface(surface: MockSurfaceConfig) -> Arc<Self> {
        let mut state = State {
            surface,
            ..State::default()
        };
        let surface = vk::SurfaceKHR::from_raw(state.next_raw());
        let queue = Queue::new(vk::Queue::from_raw(state.next_raw()), 0);

        Arc::new(Self {
            state: Mutex::new(state),
            surface,
            queue,
        })
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The single surface this mock presents to.
    pub fn surface(&self) -> vk::SurfaceKHR {
        self.surface
    }

    /// The single queue (family 0) serving graphics and presentation.
    pub fn graphics_queue(&self) -> Queue {
        self.queue
    }

    /// Time between a submission and the signal of its fence.
    pub fn set_gpu_latency(&self, latency: Duration) {
        self.state().gpu_latency = latency;
    }

    /// Changes the surface. Existing swapchains become out of date.
    pub fn configure_surface(&self, f: impl FnOnce(&mut MockSurfaceConfig)) {
        let mut state = self.state();
        f(&mut state.surface);
        for swapchain in state.swapchains.values_mut() {
            swapchain.stale = true;
        }
    }

    /// Shorthand for changing the fixed current extent of the surface.
    pub fn set_current_extent(&self, extent: Option<vk::Extent2D>) {
        self.configure_surface(|surface| surface.current_extent = extent);
    }

    /// Queues the result of a future acquire. `SUCCESS` and
    /// `SUBOPTIMAL_KHR` still acquire an image.
    pub fn push_acquire_result(&self, result: vk::Result) {
        self.state().acquire_script.push_back(result);
    }

    /// Queues the result of a future present. The wait semaphore is
    /// consumed regardless.
    pub fn push_present_result(&self, result: vk::Result) {
        self.state().present_script.push_back(result);
    }

    /// Makes every later fence query and wait fail with `ERROR_DEVICE_LOST`.
    pub fn lose_device(&self) {
        self.state().device_lost = true;
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.state().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    /// Number of fence waits that had to sleep.
    pub fn blocked_fence_waits(&self) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|call| matches!(call, MockCall::FenceWait { blocked: true, .. }))
            .count()
    }

    pub fn submit_count(&self) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|call| matches!(call, MockCall::Submit { .. }))
            .count()
    }

    pub fn live_semaphores(&self) -> usize {
        self.state().semaphores.len()
    }

    pub fn live_fences(&self) -> usize {
        self.state().fences.len()
    }

    pub fn live_command_pools(&self) -> usize {
        self.state().pools.len()
    }

    pub fn live_image_views(&self) -> usize {
        self.state().image_views.len()
    }

    pub fn live_swapchains(&self) -> usize {
        self.state().swapchains.len()
    }

    pub fn swapchains_created(&self) -> usize {
        self.state().swapchains_created
    }

    /// Total command buffers ever allocated, across all pools.
    pub fn command_buffers_allocated(&self) -> usize {
        self.state().command_buffers_allocated
    }

    /// Fences destroyed while their submission was still executing.
    pub fn destroyed_in_use(&self) -> usize {
        self.state().destroyed_in_use
    }
}

impl GpuDevice for MockDevice {
    fn queue_families(&self) -> QueueFamilyIndices {
        QueueFamilyIndices {
            graphics_family: Some(0),
            present_family: Some(0),
            ..QueueFamilyIndices::default()
        }
    }

    fn create_semaphore(&self) -> RhiResult<vk::Semaphore> {
        let mut state = self.state();
        let raw = state.next_raw();
        state.semaphores.insert(raw, false);
        Ok(vk::Semaphore::from_raw(raw))
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        self.state().semaphores.remove(&semaphore.as_raw());
    }

    fn create_fence(&self, signaled: bool) -> RhiResult<vk::Fence> {
        let mut state = self.state();
        let raw = state.next_raw();
        state.fences.insert(
            raw,
            FenceState {
                signaled,
                pending_since: None,
            },
        );
        Ok(vk::Fence::from_raw(raw))
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        let mut state = self.state();
        if !state.is_fence_signaled(fence, Instant::now()) && state.deadline(fence).is_some() {
            state.destroyed_in_use += 1;
        }
        state.retire_fence(fence);
        state.fences.remove(&fence.as_raw());
    }

    fn wait_for_fences(&self, fences: &[vk::Fence], timeout: u64) -> RhiResult<()> {
        let now = Instant::now();
        let mut sleep_until = None;
        {
            let mut state = self.state();
            if state.device_lost {
                return Err(vk::Result::ERROR_DEVICE_LOST.into());
            }
            for &fence in fences {
                if state.is_fence_signaled(fence, now) {
                    state.complete_fence(fence);
                    state.calls.push(MockCall::FenceWait {
                        fence,
                        blocked: false,
                    });
                    continue;
                }

                // Unsignaled and never submitted: nothing will ever signal it
                let Some(done) = state.deadline(fence) else {
                    return Err(vk::Result::TIMEOUT.into());
                };

                if done.saturating_duration_since(now) > Duration::from_nanos(timeout) {
                    return Err(vk::Result::TIMEOUT.into());
                }
                sleep_until = sleep_until.max(Some(done));
            }
        }

        // Sleep without holding the lock
        let Some(done) = sleep_until else {
            return Ok(());
        };
        std::thread::sleep(done.saturating_duration_since(Instant::now()));

        let mut state = self.state();
        for &fence in fences {
            if state.deadline(fence).is_some() {
                state.complete_fence(fence);
                state.calls.push(MockCall::FenceWait {
                    fence,
                    blocked: true,
                });
            }
        }
        trace!("Mock fence wait blocked until {:?}", done);
        Ok(())
    }

    fn reset_fences(&self, fences: &[vk::Fence]) -> RhiResult<()> {
        let mut state = self.state();
        let now = Instant::now();
        for &fence in fences {
            if state.deadline(fence).is_some() && !state.is_fence_signaled(fence, now) {
                return Err(RhiError::InvalidState(format!(
                    "reset of fence {fence:?} with pending work"
                )));
            }
            state.retire_fence(fence);
            if let Some(f) = state.fences.get_mut(&fence.as_raw()) {
                f.signaled = false;
                f.pending_since = None;
            }
        }
        Ok(())
    }

    fn fence_status(&self, fence: vk::Fence) -> RhiResult<bool> {
        let state = self.state();
        if state.device_lost {
            return Err(vk::Result::ERROR_DEVICE_LOST.into());
        }
        Ok(state.is_fence_signaled(fence, Instant::now()))
    }

    fn create_command_pool(
        &self,
        _queue_family_index: u32,
        _flags: vk::CommandPoolCreateFlags,
    ) -> RhiResult<vk::CommandPool> {
        let mut state = self.state();
        let raw = state.next_raw();
        state.pools.insert(raw, Vec::new());
        Ok(vk::CommandPool::from_raw(raw))
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        let mut state = self.state();
        if let Some(buffers) = state.pools.remove(&pool.as_raw()) {
            for buffer in buffers {
                state.recording.remove(&buffer);
                state.in_flight.remove(&buffer);
            }
        }
    }

    fn reset_command_pool(&self, pool: vk::CommandPool, _release_resources: bool) -> RhiResult<()> {
        let mut state = self.state();
        let now = Instant::now();
        let buffers = state
            .pools
            .get(&pool.as_raw())
            .cloned()
            .ok_or_else(|| RhiError::InvalidState(format!("reset of unknown pool {pool:?}")))?;

        for buffer in &buffers {
            if let Some(&fence) = state.in_flight.get(buffer)
                && !state.is_fence_signaled(fence, now)
            {
                return Err(RhiError::InvalidState(format!(
                    "pool {pool:?} reset while {buffer:?} is pending"
                )));
            }
        }

        for buffer in &buffers {
            state.recording.remove(buffer);
            state.in_flight.remove(buffer);
        }
        Ok(())
    }

    fn allocate_command_buffers(
        &self,
        pool: vk::CommandPool,
        _level: vk::CommandBufferLevel,
        count: u32,
    ) -> RhiResult<Vec<vk::CommandBuffer>> {
        let mut state = self.state();
        if !state.pools.contains_key(&pool.as_raw()) {
            return Err(RhiError::InvalidState(format!(
                "allocation from unknown pool {pool:?}"
            )));
        }

        let buffers: Vec<_> = (0..count)
            .map(|_| vk::CommandBuffer::from_raw(state.next_raw()))
            .collect();
        state.command_buffers_allocated += buffers.len();
        if let Some(pool_buffers) = state.pools.get_mut(&pool.as_raw()) {
            pool_buffers.extend_from_slice(&buffers);
        }
        Ok(buffers)
    }

    fn begin_command_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        _flags: vk::CommandBufferUsageFlags,
    ) -> RhiResult<()> {
        let mut state = self.state();
        if let Some(&fence) = state.in_flight.get(&command_buffer)
            && !state.is_fence_signaled(fence, Instant::now())
        {
            return Err(RhiError::InvalidState(format!(
                "begin of {command_buffer:?} while pending"
            )));
        }
        if !state.recording.insert(command_buffer) {
            return Err(RhiError::InvalidState(format!(
                "begin of {command_buffer:?} while recording"
            )));
        }
        Ok(())
    }

    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> RhiResult<()> {
        if self.state().recording.remove(&command_buffer) {
            Ok(())
        } else {
            Err(RhiError::InvalidState(format!(
                "end of {command_buffer:?} without begin"
            )))
        }
    }

    fn queue_submit(
        &self,
        _queue: vk::Queue,
        submit: &SubmitInfo<'_>,
        fence: vk::Fence,
    ) -> RhiResult<()> {
        let mut state = self.state();
        let now = Instant::now();

        if let Some(buffer) = submit
            .command_buffers
            .iter()
            .find(|b| state.recording.contains(*b))
        {
            return Err(RhiError::InvalidState(format!(
                "submit of {buffer:?} while still recording"
            )));
        }

        if fence != vk::Fence::null() {
            match state.fences.get(&fence.as_raw()) {
                None => {
                    return Err(RhiError::InvalidState(format!(
                        "submit with unknown fence {fence:?}"
                    )));
                }
                Some(f) if f.signaled || f.pending_since.is_some() => {
                    return Err(RhiError::InvalidState(format!(
                        "submit with fence {fence:?} that was not reset"
                    )));
                }
                Some(_) => {}
            }
        }

        for &semaphore in submit.wait_semaphores {
            state.wait_semaphore(semaphore).map_err(RhiError::InvalidState)?;
            if fence != vk::Fence::null() {
                state.pending_waits.insert(semaphore, fence);
            }
        }
        for &semaphore in submit.signal_semaphores {
            state
                .signal_semaphore(semaphore)
                .map_err(RhiError::InvalidState)?;
        }

        if let Some(f) = state.fences.get_mut(&fence.as_raw()) {
            f.pending_since = Some(now);
        }
        for &buffer in submit.command_buffers {
            state.in_flight.insert(buffer, fence);
        }

        state.calls.push(MockCall::Submit {
            command_buffers: submit.command_buffers.to_vec(),
            fence,
        });
        Ok(())
    }

    fn queue_wait_idle(&self, _queue: vk::Queue) -> RhiResult<()> {
        let last = self.state().last_deadline();
        if let Some(done) = last {
            std::thread::sleep(done.saturating_duration_since(Instant::now()));
        }

        let mut state = self.state();
        state.complete_all();
        state.calls.push(MockCall::QueueWaitIdle);
        Ok(())
    }

    fn wait_idle(&self) -> RhiResult<()> {
        let last = self.state().last_deadline();
        if let Some(done) = last {
            std::thread::sleep(done.saturating_duration_since(Instant::now()));
        }

        let mut state = self.state();
        state.complete_all();
        state.calls.push(MockCall::WaitIdle);
        Ok(())
    }

    fn create_image_view(&self, _image: vk::Image, _format: vk::Format) -> RhiResult<vk::ImageView> {
        let mut state = self.state();
        let raw = state.next_raw();
        state.image_views.insert(raw);
        Ok(vk::ImageView::from_raw(raw))
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        self.state().image_views.remove(&view.as_raw());
    }

    fn surface_support(&self, surface: vk::SurfaceKHR) -> RhiResult<SwapchainSupportDetails> {
        if surface != self.surface {
            return Err(vk::Result::ERROR_SURFACE_LOST_KHR.into());
        }

        let state = self.state();
        Ok(SwapchainSupportDetails {
            capabilities: state.surface.capabilities(),
            formats: state.surface.formats.clone(),
            present_modes: state.surface.present_modes.clone(),
        })
    }

    fn create_swapchain(
        &self,
        create_info: &vk::SwapchainCreateInfoKHR<'_>,
    ) -> RhiResult<vk::SwapchainKHR> {
        let mut state = self.state();
        let extent = create_info.image_extent;
        if extent.width == 0 || extent.height == 0 {
            return Err(vk::Result::ERROR_INITIALIZATION_FAILED.into());
        }

        if let Some(old) = state.swapchains.get_mut(&create_info.old_swapchain.as_raw()) {
            old.retired = true;
        }

        let image_count = create_info.min_image_count;
        let images = (0..image_count)
            .map(|_| vk::Image::from_raw(state.next_raw()))
            .collect();
        let raw = state.next_raw();
        state.swapchains.insert(
            raw,
            SwapchainState {
                images,
                next_image: 0,
                retired: false,
                stale: false,
            },
        );
        state.swapchains_created += 1;
        state.calls.push(MockCall::CreateSwapchain {
            width: extent.width,
            height: extent.height,
            image_count,
        });
        Ok(vk::SwapchainKHR::from_raw(raw))
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        self.state().swapchains.remove(&swapchain.as_raw());
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> RhiResult<Vec<vk::Image>> {
        self.state()
            .swapchains
            .get(&swapchain.as_raw())
            .map(|s| s.images.clone())
            .ok_or(RhiError::Vulkan(vk::Result::ERROR_UNKNOWN))
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        _timeout: u64,
        semaphore: vk::Semaphore,
        fence: vk::Fence,
    ) -> Result<(u32, bool), vk::Result> {
        let mut state = self.state();
        let outcome = state.acquire(swapchain, semaphore, fence);

        state.calls.push(MockCall::Acquire {
            swapchain,
            image_index: outcome.as_ref().ok().map(|&(index, _)| index),
            result: match outcome {
                Ok((_, true)) => vk::Result::SUBOPTIMAL_KHR,
                Ok(_) => vk::Result::SUCCESS,
                Err(err) => err,
            },
        });
        outcome
    }

    fn queue_present(
        &self,
        _queue: vk::Queue,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<bool, vk::Result> {
        let mut state = self.state();
        let outcome = state.present(swapchain, wait_semaphores);

        state.calls.push(MockCall::Present {
            swapchain,
            image_index,
            result: match outcome {
                Ok(true) => vk::Result::SUBOPTIMAL_KHR,
                Ok(false) => vk::Result::SUCCESS,
                Err(err) => err,
            },
        });
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submit_signal(mock: &MockDevice, fence: vk::Fence) {
        mock.queue_submit(mock.graphics_queue().handle(), &SubmitInfo::default(), fence)
            .unwrap();
    }

    #[test]
    fn test_pending_fence_blocks_for_latency() {
        let mock = MockDevice::new();
        mock.set_gpu_latency(Duration::from_millis(20));

        let fence = mock.create_fence(false).unwrap();
        let submitted = Instant::now();
        submit_signal(&mock, fence);
        assert!(!mock.fence_status(fence).unwrap());

        mock.wait_for_fences(&[fence], u64::MAX).unwrap();

        assert!(submitted.elapsed() >= Duration::from_millis(20));
        assert!(mock.fence_status(fence).unwrap());
        assert_eq!(mock.blocked_fence_waits(), 1);
    }

    #[test]
    fn test_submit_rejects_unreset_fence() {
        let mock = MockDevice::new();
        let fence = mock.create_fence(true).unwrap();

        let result =
            mock.queue_submit(mock.graphics_queue().handle(), &SubmitInfo::default(), fence);
        assert!(matches!(result, Err(RhiError::InvalidState(_))));
    }

    #[test]
    fn test_pool_reset_after_fence_wait_and_reset() {
        let mock = MockDevice::new();
        mock.set_gpu_latency(Duration::from_millis(5));
        let pool = mock.create_command_pool(0, vk::CommandPoolCreateFlags::TRANSIENT).unwrap();
        let buffers = mock
            .allocate_command_buffers(pool, vk::CommandBufferLevel::PRIMARY, 1)
            .unwrap();
        let fence = mock.create_fence(false).unwrap();

        let info = SubmitInfo {
            command_buffers: &buffers,
            ..SubmitInfo::default()
        };
        mock.queue_submit(mock.graphics_queue().handle(), &info, fence)
            .unwrap();
        assert!(matches!(
            mock.reset_command_pool(pool, false),
            Err(RhiError::InvalidState(_))
        ));

        mock.wait_for_fences(&[fence], u64::MAX).unwrap();
        mock.reset_fences(&[fence]).unwrap();
        mock.reset_command_pool(pool, false).unwrap();
    }

    #[test]
    fn test_acquire_into_semaphore_with_pending_wait_fails() {
        let mock = MockDevice::new();
        mock.set_gpu_latency(Duration::from_millis(50));
        let info = vk::SwapchainCreateInfoKHR::default()
            .min_image_count(2)
            .image_extent(vk::Extent2D {
                width: 64,
                height: 64,
            });
        let swapchain = mock.create_swapchain(&info).unwrap();
        let semaphore = mock.create_semaphore().unwrap();
        let fence = mock.create_fence(false).unwrap();

        mock.acquire_next_image(swapchain, 0, semaphore, vk::Fence::null())
            .unwrap();
        let submit = SubmitInfo {
            wait_semaphores: &[semaphore],
            wait_stages: &[vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT],
            ..SubmitInfo::default()
        };
        mock.queue_submit(mock.graphics_queue().handle(), &submit, fence)
            .unwrap();

        // Unsignaled, but the submission waiting on it is still in flight
        assert_eq!(
            mock.acquire_next_image(swapchain, 0, semaphore, vk::Fence::null()),
            Err(vk::Result::ERROR_VALIDATION_FAILED_EXT)
        );

        mock.wait_for_fences(&[fence], u64::MAX).unwrap();
        assert_eq!(
            mock.acquire_next_image(swapchain, 0, semaphore, vk::Fence::null()),
            Ok((1, false))
        );
    }

    #[test]
    fn test_lost_device_fails_fence_queries() {
        let mock = MockDevice::new();
        let fence = mock.create_fence(true).unwrap();
        mock.lose_device();

        assert!(mock.fence_status(fence).unwrap_err().is_device_lost());
        assert!(mock
            .wait_for_fences(&[fence], u64::MAX)
            .unwrap_err()
            .is_device_lost());
    }

    #[test]
    fn test_submit_consumes_and_signals_semaphores() {
        let mock = MockDevice::new();
        let wait = mock.create_semaphore().unwrap();
        let signal = mock.create_semaphore().unwrap();
        let queue = mock.graphics_queue().handle();
        let info = SubmitInfo {
            wait_semaphores: &[wait],
            wait_stages: &[vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT],
            signal_semaphores: &[signal],
            ..SubmitInfo::default()
        };

        // Nothing signaled `wait` yet
        assert!(mock.queue_submit(queue, &info, vk::Fence::null()).is_err());

        mock.state().semaphores.insert(wait.as_raw(), true);
        mock.queue_submit(queue, &info, vk::Fence::null()).unwrap();

        let state = mock.state();
        assert_eq!(state.semaphores.get(&wait.as_raw()), Some(&false));
        assert_eq!(state.semaphores.get(&signal.as_raw()), Some(&true));
    }

    #[test]
    fn test_acquire_rotates_images_and_follows_script() {
        let mock = MockDevice::new();
        let info = vk::SwapchainCreateInfoKHR::default()
            .min_image_count(2)
            .image_extent(vk::Extent2D {
                width: 64,
                height: 64,
            });
        let swapchain = mock.create_swapchain(&info).unwrap();
        let null = vk::Semaphore::null();

        assert_eq!(mock.acquire_next_image(swapchain, 0, null, vk::Fence::null()), Ok((0, false)));
        assert_eq!(mock.acquire_next_image(swapchain, 0, null, vk::Fence::null()), Ok((1, false)));

        mock.push_acquire_result(vk::Result::SUBOPTIMAL_KHR);
        assert_eq!(mock.acquire_next_image(swapchain, 0, null, vk::Fence::null()), Ok((0, true)));

        mock.set_current_extent(Some(vk::Extent2D {
            width: 32,
            height: 32,
        }));
        assert_eq!(
            mock.acquire_next_image(swapchain, 0, null, vk::Fence::null()),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR)
        );
    }

    #[test]
    fn test_second_acquire_into_signaled_semaphore_fails() {
        let mock = MockDevice::new();
        let info = vk::SwapchainCreateInfoKHR::default()
            .min_image_count(3)
            .image_extent(vk::Extent2D {
                width: 64,
                height: 64,
            });
        let swapchain = mock.create_swapchain(&info).unwrap();
        let semaphore = mock.create_semaphore().unwrap();

        assert!(mock
            .acquire_next_image(swapchain, 0, semaphore, vk::Fence::null())
            .is_ok());
        assert_eq!(
            mock.acquire_next_image(swapchain, 0, semaphore, vk::Fence::null()),
            Err(vk::Result::ERROR_VALIDATION_FAILED_EXT)
        );
    }
}
