//! Pacing and timeout settings for a [`Connection`](crate::Connection).

use std::time::Duration;

/// Link timing knobs.
///
/// The defaults suit a USB-serial console on a small microcontroller; tests
/// shrink the pauses to keep simulated sessions fast.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct LinkConfig {
    /// Bytes per paced write.
    pub write_chunk: usize,
    /// Pause between paced write chunks.
    pub write_pause: Duration,
    /// Read window used while draining stale input.
    pub drain_poll: Duration,
    /// Sleep between negotiation attempts.
    pub retry_interval: Duration,
    /// Sub-deadline of a single negotiation attempt.
    pub probe_window: Duration,
    /// Outer deadline for bringing the companion up on demand.
    pub negotiate_timeout: Duration,
    /// Deadline for a single shell reply during bootstrap.
    pub read_timeout: Duration,
    /// Deadline for receiving one frame or its acknowledgements.
    pub frame_timeout: Duration,
    /// Soft-reset the device before launching the companion.
    pub soft_reset: bool,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            write_chunk: 128,
            write_pause: Duration::from_millis(20),
            drain_poll: Duration::from_millis(100),
            retry_interval: Duration::from_millis(10),
            probe_window: Duration::from_secs(1),
            negotiate_timeout: Duration::from_secs(16),
            read_timeout: Duration::from_secs(2),
            frame_timeout: Duration::from_secs(10),
            soft_reset: false,
        }
    }
}

impl LinkConfig {
    /// Sets the outer negotiation deadline.
    #[must_use]
    pub fn negotiate_timeout(mut self, timeout: Duration) -> Self {
        self.negotiate_timeout = timeout;
        self
    }

    /// Sets the per-frame deadline.
    #[must_use]
    pub fn frame_timeout(mut self, timeout: Duration) -> Self {
        self.frame_timeout = timeout;
        self
    }

    /// Enables or disables the soft reset during bootstrap.
    #[must_use]
    pub fn soft_reset(mut self, enabled: bool) -> Self {
        self.soft_reset = enabled;
        self
    }

    /// Removes write pacing and shortens idle windows.
    ///
    /// Meant for in-memory transports where the peer never overruns.
    #[must_use]
    pub fn unpaced(mut self) -> Self {
        self.write_chunk = usize::MAX;
        self.write_pause = Duration::ZERO;
        self.drain_poll = Duration::from_millis(5);
        self.retry_interval = Duration::from_millis(1);
        self
    }
}
