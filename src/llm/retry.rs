//! Explicit retry policy for provider calls.
//!
//! [`RetryPolicy`] owns the attempt cap, the exponential backoff schedule and
//! the retryable-error predicate. [`RetryingProvider`] wraps any
//! [`LlmProvider`] with that policy plus a per-attempt timeout so a hung call
//! can never stall a trajectory.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::client::LlmProvider;
use super::types::{GenerationRequest, GenerationResponse};
use crate::error::LlmError;

/// Default total number of attempts (first call included).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default delay before the first retry.
pub const DEFAULT_BASE_DELAY_MS: u64 = 1000;

/// Default upper bound on any single backoff delay.
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;

/// Retry policy: attempt cap, backoff schedule and retry predicate.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Always at least 1.
    pub max_attempts: u32,
    /// Delay before the first retry; doubled on each further retry.
    pub base_delay: Duration,
    /// Cap applied to each computed delay.
    pub max_delay: Duration,
    /// Decides whether an error is worth another attempt.
    pub retryable: fn(&LlmError) -> bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
            retryable: LlmError::is_transient,
        }
    }
}

impl RetryPolicy {
    /// Create a policy with the default schedule.
    pub fn new() -> Self {
        Self::default()
    }

    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Set the total number of attempts (clamped to at least 1).
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Set the base backoff delay.
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Set the backoff cap.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Delay to wait before attempt number `attempt` (0-based).
    ///
    /// Attempt 0 never waits; attempt `n` waits `base * 2^(n-1)`, capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Whether `error` on 0-based attempt `attempt` should be retried.
    pub fn should_retry(&self, attempt: u32, error: &LlmError) -> bool {
        attempt + 1 < self.max_attempts && (self.retryable)(error)
    }
}

/// Provider wrapper applying a [`RetryPolicy`] and a per-attempt timeout.
pub struct RetryingProvider {
    inner: Arc<dyn LlmProvider>,
    policy: RetryPolicy,
    call_timeout: Option<Duration>,
}

impl RetryingProvider {
    /// Wrap `inner` with `policy`.
    pub fn new(inner: Arc<dyn LlmProvider>, policy: RetryPolicy) -> Self {
        Self {
            inner,
            policy,
            call_timeout: None,
        }
    }

    /// Bound every attempt by `timeout`. An elapsed attempt counts as a
    /// transient [`LlmError::Timeout`].
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    /// The policy in use.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    async fn attempt(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
        match self.call_timeout {
            Some(limit) => tokio::time::timeout(limit, self.inner.generate(request))
                .await
                .unwrap_or(Err(LlmError::Timeout(limit))),
            None => self.inner.generate(request).await,
        }
    }
}

#[async_trait]
impl LlmProvider for RetryingProvider {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
        let mut attempt = 0;
        loop {
            let delay = self.policy.delay_for(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            match self.attempt(request.clone()).await {
                Ok(response) => return Ok(response),
                Err(err) if self.policy.should_retry(attempt, &err) => {
                    tracing::warn!(
                        attempt = attempt + 1,
                        max_attempts = self.policy.max_attempts,
                        next_delay_ms = self.policy.delay_for(attempt + 1).as_millis() as u64,
                        error = %err,
                        "Transient provider error, retrying"
                    );
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
