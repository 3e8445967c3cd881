//! Sliding-window rate limiting for tool calls
//!
//! The dispatcher consults the limiter before every `tools/call`. All
//! clients share one window.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Default tool calls allowed per minute
pub const DEFAULT_TOOL_CALLS_PER_MINUTE: u32 = 500;

/// Rate limiter configuration
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum requests allowed in the window
    pub max_requests: u32,
    /// Time window for rate limiting
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::per_minute(DEFAULT_TOOL_CALLS_PER_MINUTE)
    }
}

impl RateLimitConfig {
    /// Create a new rate limit config
    #[must_use]
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
        }
    }

    /// Create config for requests per minute
    #[must_use]
    pub fn per_minute(max_requests: u32) -> Self {
        Self::new(max_requests, Duration::from_secs(60))
    }
}

/// Result of a rate limit check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitResult {
    /// Whether the request is allowed
    pub allowed: bool,
    /// Remaining requests in the current window
    pub remaining: u32,
    /// Time until the oldest counted request leaves the window
    pub reset_after: Duration,
    /// Requests counted in the window, including this one when allowed
    pub current: u32,
}

/// Sliding-window limiter shared by every tool call
#[derive(Debug)]
pub struct ToolCallLimiter {
    config: RateLimitConfig,
    requests: Mutex<VecDeque<Instant>>,
}

impl Default for ToolCallLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

impl ToolCallLimiter {
    /// Create a new limiter
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            requests: Mutex::new(VecDeque::new()),
        }
    }

    /// Configured limits
    #[must_use]
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Check and record in one step
    pub fn acquire(&self) -> RateLimitResult {
        self.acquire_at(Instant::now())
    }

    fn acquire_at(&self, now: Instant) -> RateLimitResult {
        let mut records = self.requests.lock();
        prune(&mut records, now, self.config.window);

        let current = records.len() as u32;
        let reset_after = records
            .front()
            .map(|oldest| self.config.window.saturating_sub(now.duration_since(*oldest)))
            .unwrap_or(Duration::ZERO);

        if current >= self.config.max_requests {
            return RateLimitResult {
                allowed: false,
                remaining: 0,
                reset_after,
                current,
            };
        }

        records.push_back(now);
        RateLimitResult {
            allowed: true,
            remaining: self.config.max_requests - current - 1,
            reset_after,
            current: current + 1,
        }
    }
}

fn prune(records: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(oldest) = records.front() {
        if now.duration_since(*oldest) >= window {
            records.pop_front();
        } else {
            break;
        }
    }
}

#[cfg(test)]
mod tests;
