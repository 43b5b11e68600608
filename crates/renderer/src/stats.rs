//! Frame pacing counters.

use std::time::{Duration, Instant};

/// Counters a [`RenderContext`](crate::RenderContext) keeps about its cycles.
#[derive(Clone, Debug)]
pub struct FrameStats {
    started: Instant,
    presented: u64,
    dropped: u64,
    recreations: u64,
    deferred_resizes: u64,
    blocked_fence_waits: u64,
}

impl Default for FrameStats {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameStats {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            presented: 0,
            dropped: 0,
            recreations: 0,
            deferred_resizes: 0,
            blocked_fence_waits: 0,
        }
    }

    /// Frames handed to the presentation engine.
    #[inline]
    pub fn presented(&self) -> u64 {
        self.presented
    }

    /// Cycles abandoned because the swapchain was out of date or a resize
    /// interrupted them.
    #[inline]
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Swapchain rebuilds after construction.
    #[inline]
    pub fn recreations(&self) -> u64 {
        self.recreations
    }

    /// Resizes to a zero extent that left the context without a swapchain.
    #[inline]
    pub fn deferred_resizes(&self) -> u64 {
        self.deferred_resizes
    }

    /// `prepare_frame` calls that found the frame's fence unsignaled.
    #[inline]
    pub fn blocked_fence_waits(&self) -> u64 {
        self.blocked_fence_waits
    }

    /// Wall time since the context was built.
    #[inline]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Average presentation rate since the context was built.
    pub fn frames_per_second(&self) -> f64 {
        let secs = self.elapsed().as_secs_f64();
        if secs > 0.0 {
            self.presented as f64 / secs
        } else {
            0.0
        }
    }

    pub(crate) fn record_presented(&mut self) {
        self.presented += 1;
    }

    pub(crate) fn record_dropped(&mut self) {
        self.dropped += 1;
    }

    pub(crate) fn record_recreation(&mut self) {
        self.recreations += 1;
    }

    pub(crate) fn record_deferred_resize(&mut self) {
        self.deferred_resizes += 1;
    }

    pub(crate) fn record_blocked_wait(&mut self) {
        self.blocked_fence_waits += 1;
    }
}

impl std::fmt::Display for FrameStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} presented ({:.1} fps), {} dropped, {} recreations, {} deferred, {} blocked waits",
            self.presented,
            self.frames_per_second(),
            self.dropped,
            self.recreations,
            self.deferred_resizes,
            self.blocked_fence_waits
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_start_at_zero() {
        let stats = FrameStats::new();
        assert_eq!(stats.presented(), 0);
        assert_eq!(stats.dropped(), 0);
        assert_eq!(stats.recreations(), 0);
        assert_eq!(stats.deferred_resizes(), 0);
        assert_eq!(stats.blocked_fence_waits(), 0);
    }

    #[test]
    fn test_frames_per_second_counts_presented_only() {
        let mut stats = FrameStats::new();
        stats.record_dropped();
        assert_eq!(stats.frames_per_second(), 0.0);

        std::thread::sleep(Duration::from_millis(5));
        stats.record_presented();
        stats.record_presented();
        assert!(stats.frames_per_second() > 0.0);
    }

    #[test]
    fn test_display_mentions_every_counter() {
        let mut stats = FrameStats::new();
        stats.record_recreation();
        stats.record_blocked_wait();

        let text = stats.to_string();
        assert!(text.contains("1 recreations"));
        assert!(text.contains("1 blocked waits"));
    }
}
