//! # Retry
//!
//! Module providing a `RetryPolicy` to schedule redelivery of requeued messages.
use std::time;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// Backoff applied between deliveries of the same message.
pub struct RetryPolicy {
    /// Coefficient to multiply initial_interval with for every past attempt.
    pub backoff_coefficient: u32,
    /// The backoff interval before the second delivery.
    pub initial_interval: time::Duration,
    /// The maximum possible backoff between deliveries.
    pub maximum_interval: time::Duration,
}

impl RetryPolicy {
    pub fn new(
        backoff_coefficient: u32,
        initial_interval: time::Duration,
        maximum_interval: time::Duration,
    ) -> Self {
        Self {
            backoff_coefficient,
            initial_interval,
            maximum_interval,
        }
    }

    /// Determine the interval before redelivering a message that just failed its `attempt`.
    /// A `preferred_retry_interval` (e.g. from a Retry-After header) is used only when it
    /// falls within `candidate_interval <= preferred_retry_interval <= maximum_interval`.
    pub fn retry_interval(
        &self,
        attempt: u32,
        preferred_retry_interval: Option<time::Duration>,
    ) -> time::Duration {
        let exponent = attempt.saturating_sub(1);
        let candidate_interval = self
            .backoff_coefficient
            .checked_pow(exponent)
            .and_then(|factor| self.initial_interval.checked_mul(factor))
            .unwrap_or(time::Duration::MAX);
        let min_interval_allowed = std::cmp::min(candidate_interval, self.maximum_interval);

        match preferred_retry_interval {
            Some(duration)
                if min_interval_allowed <= duration && duration <= self.maximum_interval =>
            {
                duration
            }
            _ => min_interval_allowed,
        }
    }
}
