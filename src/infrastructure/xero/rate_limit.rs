use crate::error::FieldOpsError;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

pub const WINDOW: Duration = Duration::from_secs(60);

/// Sliding-window limiter: at most `limit` calls in any `window`.
#[derive(Debug)]
pub struct RateLimiter {
    limit: usize,
    window: Duration,
    calls: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(limit: usize, window: Duration) -> Self {
        let limit = limit.max(1);
        Self {
            limit,
            window,
            calls: Mutex::new(VecDeque::with_capacity(limit)),
        }
    }

    pub fn per_minute(limit: u32) -> Self {
        Self::new(limit as usize, WINDOW)
    }

    /// Takes a slot at `now` if one is free. Otherwise returns how long to wait
    /// before the oldest call leaves the window.
    pub fn try_acquire(&self, now: Instant) -> Option<Duration> {
        let mut calls = self.calls.lock().unwrap_or_else(|e| e.into_inner());
        while calls
            .front()
            .is_some_and(|&at| now.saturating_duration_since(at) >= self.window)
        {
            calls.pop_front();
        }

        if calls.len() < self.limit {
            calls.push_back(now);
            return None;
        }
        calls
            .front()
            .map(|&oldest| self.window.saturating_sub(now.saturating_duration_since(oldest)))
    }

    pub async fn acquire(&self) {
        while let Some(wait) = self.try_acquire(Instant::now()) {
            debug!(wait_ms = wait.as_millis() as u64, "rate limit reached, waiting");
            tokio::time::sleep(wait).await;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Exponential delay for the zero-based `attempt`, capped at `max_delay`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay)
    }

    /// How long to wait before retrying after `error`, or `None` to give up.
    /// A throttled response's `Retry-After` wins over the computed backoff.
    pub fn delay_for(
        &self,
        attempt: u32,
        error: &FieldOpsError,
        retry_after: Option<Duration>,
    ) -> Option<Duration> {
        if attempt >= self.max_retries || !error.is_transient() {
            return None;
        }
        match (error, retry_after) {
            (FieldOpsError::RemoteError { status: 429, .. }, Some(wait)) => {
                Some(wait.min(self.max_delay))
            }
            _ => Some(self.backoff(attempt)),
        }
    }
}

/// Reads a `Retry-After` header given in seconds.
pub fn parse_retry_after(raw: &str) -> Option<Duration> {
    raw.trim().parse::<u64>().ok().map(Duration::from_secs)
}
