//! Retry with capped exponential backoff.
//!
//! Transient failures (rate limiting, upstream overload, timeouts, dropped
//! connections, 429/5xx) are retried; everything else propagates on the
//! first attempt. `max_retries` counts total attempts, so a policy of 5
//! calls the provider at most five times.

use std::time::Duration;

use scarlett_core::error::ProviderError;

/// Markers that identify a transient failure inside an error message.
const TRANSIENT_MARKERS: &[&str] = &[
    "queue_exceeded",
    "too_many_requests",
    "rate limit",
    "overloaded",
    "connection reset",
    "connection closed",
    "timed out",
    "timeout",
    "streamreset",
];

const TRANSIENT_STATUS: &[u16] = &[429, 500, 502, 503, 504];

/// Backoff configuration for one kind of provider call.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries: max_retries.max(1),
            base_delay,
            max_delay,
        }
    }

    /// Bound used for non-streaming decide calls.
    pub fn decide() -> Self {
        Self::new(5, Duration::from_secs(1), Duration::from_secs(16))
    }

    /// Smaller bound used when establishing an answer stream.
    pub fn stream() -> Self {
        Self::new(3, Duration::from_secs(1), Duration::from_secs(16))
    }

    /// `min(max_delay, base_delay * 2^attempt)` for a 0-indexed attempt.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Wait before the next attempt, or `None` when the failure of the
    /// 0-indexed `attempt` is final (fatal error or bound reached).
    pub fn next_delay(&self, error: &ProviderError, attempt: u32) -> Option<Duration> {
        if !is_transient(error) || attempt + 1 >= self.max_retries {
            return None;
        }
        Some(self.delay_for_attempt(attempt))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::decide()
    }
}

/// Whether a provider failure is worth retrying.
pub fn is_transient(error: &ProviderError) -> bool {
    match error {
        ProviderError::RateLimited { .. }
        | ProviderError::Overloaded(_)
        | ProviderError::Timeout(_)
        | ProviderError::Network(_) => true,
        ProviderError::ApiError { status_code, message } => {
            TRANSIENT_STATUS.contains(status_code) || has_transient_marker(message)
        }
        ProviderError::StreamInterrupted(message) => has_transient_marker(message),
        ProviderError::AuthenticationFailed(_)
        | ProviderError::NotConfigured(_)
        | ProviderError::Unavailable { .. } => false,
    }
}

/// Whether free-form error text carries one of the transient markers.
pub fn has_transient_marker(message: &str) -> bool {
    let lower = message.to_lowercase();
    TRANSIENT_MARKERS.iter().any(|m| lower.contains(m))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_doubles_until_cap() {
        let policy = RetryPolicy::new(10, Duration::from_secs(1), Duration::from_secs(16));
        let delays: Vec<u64> = (0..7).map(|a| policy.delay_for_attempt(a).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 16, 16]);
    }

    #[test]
    fn huge_attempt_does_not_overflow() {
        let policy = RetryPolicy::decide();
        assert_eq!(policy.delay_for_attempt(200), Duration::from_secs(16));
    }

    #[test]
    fn zero_attempts_clamped_to_one() {
        let policy = RetryPolicy::new(0, Duration::from_secs(1), Duration::from_secs(2));
        assert_eq!(policy.max_retries, 1);
    }

    #[test]
    fn next_delay_stops_at_bound() {
        let policy = RetryPolicy::stream();
        let err = ProviderError::Timeout("read".into());
        assert_eq!(policy.next_delay(&err, 0), Some(Duration::from_secs(1)));
        assert_eq!(policy.next_delay(&err, 1), Some(Duration::from_secs(2)));
        assert_eq!(policy.next_delay(&err, 2), None);
    }

    #[test]
    fn fatal_errors_never_retried() {
        let policy = RetryPolicy::decide();
        let err = ProviderError::AuthenticationFailed("bad key".into());
        assert_eq!(policy.next_delay(&err, 0), None);
        assert!(!is_transient(&ProviderError::ApiError {
            status_code: 400,
            message: "bad request".into(),
        }));
    }

    #[test]
    fn transient_errors_detected() {
        assert!(is_transient(&ProviderError::RateLimited { retry_after_secs: 5 }));
        assert!(is_transient(&ProviderError::ApiError {
            status_code: 503,
            message: "Service unavailable".into(),
        }));
        assert!(is_transient(&ProviderError::ApiError {
            status_code: 400,
            message: "{\"code\":\"queue_exceeded\"}".into(),
        }));
        assert!(is_transient(&ProviderError::StreamInterrupted("Connection reset by peer".into())));
        assert!(!is_transient(&ProviderError::StreamInterrupted("invalid utf-8".into())));
    }

    #[test]
    fn unavailable_is_terminal() {
        assert!(!is_transient(&ProviderError::Unavailable {
            attempts: 5,
            last_error: "timed out".into(),
        }));
    }
}
