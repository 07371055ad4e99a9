//! Sliding-window send limiter.
//!
//! ```text
//!  now - window                                   now
//!      │  x   x x    x        x  x x   x   x x     │
//!      └───────────── count < max ? accept ────────┘
//! ```
//!
//! Only accepted sends are recorded, so a rejected burst does not extend
//! the lockout. Inbound traffic never touches the limiter.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Why a send was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Throttle {
    /// The trailing window is full.
    WindowFull { retry_after: Duration },
    /// Slow mode requires more time since the previous send.
    SlowMode { retry_after: Duration },
}

/// Trailing-window rate limiter for outbound messages.
#[derive(Debug)]
pub struct RateLimiter {
    sends: VecDeque<Instant>,
    last_send: Option<Instant>,
    max_sends: usize,
    window: Duration,
}

impl RateLimiter {
    pub fn new(max_sends: usize, window: Duration) -> Self {
        Self {
            sends: VecDeque::with_capacity(max_sends.min(1024)),
            last_send: None,
            max_sends,
            window,
        }
    }

    /// Check and record a send happening now.
    pub fn try_acquire(&mut self, slow_mode: Option<Duration>) -> Result<(), Throttle> {
        self.try_acquire_at(Instant::now(), slow_mode)
    }

    /// Check and record a send at `now`.
    ///
    /// `slow_mode` is the minimum spacing between two accepted sends,
    /// applied on top of the window limit.
    pub fn try_acquire_at(&mut self, now: Instant, slow_mode: Option<Duration>) -> Result<(), Throttle> {
        self.evict_expired(now);

        if let (Some(spacing), Some(last)) = (slow_mode, self.last_send) {
            let since = now.saturating_duration_since(last);
            if since < spacing {
                return Err(Throttle::SlowMode { retry_after: spacing - since });
            }
        }

        if self.sends.len() >= self.max_sends {
            let retry_after = self
                .sends
                .front()
                .map(|&oldest| (oldest + self.window).saturating_duration_since(now))
                .unwrap_or_default();
            return Err(Throttle::WindowFull { retry_after });
        }

        self.sends.push_back(now);
        self.last_send = Some(now);
        Ok(())
    }

    /// Sends recorded inside the window ending at `now`.
    pub fn in_window(&mut self, now: Instant) -> usize {
        self.evict_expired(now);
        self.sends.len()
    }

    /// Forget all recorded sends.
    pub fn reset(&mut self) {
        self.sends.clear();
        self.last_send = None;
    }

    fn evict_expired(&mut self, now: Instant) {
        while let Some(&oldest) = self.sends.front() {
            if now.saturating_duration_since(oldest) >= self.window {
                self.sends.pop_front();
            } else {
                break;
            }
        }
    }
}
