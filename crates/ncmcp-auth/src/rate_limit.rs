//! Sliding-window rate limiter for app-password provisioning.
//!
//! Five attempts per user per hour, tracked in a process-local map.
//! Entries older than the window are pruned on access. The clock is
//! injectable so the window math is testable.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;

const MAX_ATTEMPTS: usize = 5;
const WINDOW_SECONDS: i64 = 3600;

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    /// Under the cap; the attempt may proceed.
    Allowed,
    /// Over the cap; reject with `Retry-After`.
    Limited {
        /// Seconds until the oldest in-window attempt ages out.
        retry_after_secs: u64,
    },
}

type Clock = Box<dyn Fn() -> i64 + Send + Sync>;

/// Per-user sliding window over provisioning attempts.
pub struct ProvisioningRateLimiter {
    attempts: Mutex<HashMap<String, Vec<i64>>>,
    clock: Clock,
}

impl Default for ProvisioningRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ProvisioningRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvisioningRateLimiter").finish_non_exhaustive()
    }
}

impl ProvisioningRateLimiter {
    /// Limiter on the real clock.
    pub fn new() -> Self {
        Self::with_clock(Box::new(|| Utc::now().timestamp()))
    }

    /// Limiter with an injected clock, for tests.
    pub fn with_clock(clock: Clock) -> Self {
        Self {
            attempts: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Check whether another attempt is admissible for `user_id`.
    pub fn check(&self, user_id: &str) -> RateLimitDecision {
        let now = (self.clock)();
        let window_start = now - WINDOW_SECONDS;

        let mut attempts = self.attempts.lock().expect("rate limiter lock");
        let user_attempts = attempts.entry(user_id.to_string()).or_default();
        user_attempts.retain(|&t| t > window_start);

        if user_attempts.len() >= MAX_ATTEMPTS {
            let oldest = user_attempts.first().copied().unwrap_or(now);
            let retry_after = (oldest + WINDOW_SECONDS - now).max(1) as u64;
            return RateLimitDecision::Limited {
                retry_after_secs: retry_after,
            };
        }
        RateLimitDecision::Allowed
    }

    /// Record an attempt (successful or not) against the window.
    pub fn record(&self, user_id: &str) {
        let now = (self.clock)();
        let mut attempts = self.attempts.lock().expect("rate limiter lock");
        attempts.entry(user_id.to_string()).or_default().push(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Arc;

    fn limiter_at(time: Arc<AtomicI64>) -> ProvisioningRateLimiter {
        ProvisioningRateLimiter::with_clock(Box::new(move || time.load(Ordering::SeqCst)))
    }

    #[test]
    fn five_attempts_pass_the_sixth_is_limited() {
        let time = Arc::new(AtomicI64::new(1_000_000));
        let limiter = limiter_at(time.clone());

        for i in 0..5 {
            // Six provisioning calls within sixty seconds.
            time.store(1_000_000 + i * 12, Ordering::SeqCst);
            assert_eq!(limiter.check("alice"), RateLimitDecision::Allowed);
            limiter.record("alice");
        }

        time.store(1_000_060, Ordering::SeqCst);
        match limiter.check("alice") {
            RateLimitDecision::Limited { retry_after_secs } => {
                // Oldest attempt at t=1_000_000 ages out 3600 s later.
                assert_eq!(retry_after_secs, 3540);
            }
            RateLimitDecision::Allowed => panic!("sixth attempt must be limited"),
        }
    }

    #[test]
    fn window_slides_and_old_attempts_age_out() {
        let time = Arc::new(AtomicI64::new(0));
        let limiter = limiter_at(time.clone());

        for _ in 0..5 {
            limiter.record("bob");
        }
        assert!(matches!(limiter.check("bob"), RateLimitDecision::Limited { .. }));

        time.store(WINDOW_SECONDS + 1, Ordering::SeqCst);
        assert_eq!(limiter.check("bob"), RateLimitDecision::Allowed);
    }

    #[test]
    fn users_are_tracked_independently() {
        let time = Arc::new(AtomicI64::new(0));
        let limiter = limiter_at(time);

        for _ in 0..5 {
            limiter.record("carol");
        }
        assert!(matches!(limiter.check("carol"), RateLimitDecision::Limited { .. }));
        assert_eq!(limiter.check("dave"), RateLimitDecision::Allowed);
    }
}
