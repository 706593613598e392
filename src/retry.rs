use crate::constants::{DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_ATTEMPTS};
use crate::types::{ChatError, ObservedError, RequestMode};
use std::time::Duration;

/// Bounded exponential backoff for transport failures.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    /// Fraction of the delay applied as random +/- jitter. Zero disables it.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, DEFAULT_BASE_DELAY_MS)
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay_ms: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay_ms,
            jitter: 0.0,
        }
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Delay before retry `retry` (1-indexed): `base * 2^(retry-1)`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(16);
        let base_delay = self.base_delay_ms.saturating_mul(2u64.pow(exponent));
        let jitter_range = (base_delay as f64 * self.jitter) as i64;
        let jitter = if jitter_range > 0 {
            fastrand::i64(-jitter_range..jitter_range)
        } else {
            0
        };
        Duration::from_millis((base_delay as i64 + jitter).max(0) as u64)
    }

    /// Fresh per-call state.
    pub fn start(&self, mode: RequestMode) -> RetryState {
        RetryState {
            policy: *self,
            mode,
            attempt: 0,
        }
    }
}

#[derive(Debug)]
pub enum RetryDecision {
    RetryAfter(Duration),
    Fail(ObservedError),
}

/// Attempt counter for one logical send. `attempt` is 0-based.
#[derive(Debug, Clone)]
pub struct RetryState {
    policy: RetryPolicy,
    mode: RequestMode,
    attempt: u32,
}

impl RetryState {
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn on_failure(&mut self, err: ObservedError) -> RetryDecision {
        let attempts_made = self.attempt + 1;
        if !err.inner.is_retryable() {
            return RetryDecision::Fail(err);
        }

        if attempts_made >= self.policy.max_attempts {
            tracing::error!(
                "[RETRY] Giving up after {} attempts ({} mode): {}",
                attempts_made,
                self.mode,
                err.inner
            );
            return match err.inner {
                ChatError::Transport { failure, detail } => RetryDecision::Fail(
                    ChatError::RetriesExhausted {
                        mode: self.mode,
                        attempts: attempts_made,
                        last: failure,
                        detail,
                    }
                    .into(),
                ),
                inner => RetryDecision::Fail(ObservedError {
                    inner,
                    span_trace: err.span_trace,
                }),
            };
        }

        self.attempt += 1;
        let delay = self.policy.delay_for(self.attempt);
        tracing::warn!(
            "[RETRY] Request failed (attempt {}): {}. Retrying in {:?}...",
            attempts_made,
            err.inner,
            delay
        );
        RetryDecision::RetryAfter(delay)
    }
}
