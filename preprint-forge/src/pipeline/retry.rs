//! Declarative per-stage retry policy.
//!
//! Adapters only report what went wrong ([`ErrorCategory`]); the policy
//! decides whether that is transient, how long to back off and when to give
//! up. The orchestrator applies it uniformly to every stage.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::core::StageName;
use crate::errors::{AdapterError, ErrorCategory, ErrorClass, ForgeError, ForgeResult};

/// Backoff strategy for retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// delay = base * 2^(attempt-1)
    #[default]
    Exponential,
    /// delay = base * attempt
    Linear,
    /// delay = base
    Constant,
}

/// Jitter strategy applied on top of the backoff curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// No jitter.
    None,
    /// Random from 0 to delay.
    #[default]
    Full,
    /// Half fixed, half random.
    Equal,
}

fn default_retry_on() -> Vec<ErrorCategory> {
    vec![
        ErrorCategory::Timeout,
        ErrorCategory::RateLimited,
        ErrorCategory::Unavailable,
        ErrorCategory::Network,
    ]
}

/// Retry behaviour for one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Attempt ceiling, including the first attempt.
    pub max_attempts: u32,
    /// Base delay in milliseconds.
    pub base_delay_ms: u64,
    /// Delay cap in milliseconds.
    pub max_delay_ms: u64,
    /// Backoff curve.
    pub backoff: BackoffStrategy,
    /// Jitter.
    pub jitter: JitterStrategy,
    /// Categories treated as transient.
    pub retry_on: Vec<ErrorCategory>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            backoff: BackoffStrategy::Exponential,
            jitter: JitterStrategy::Full,
            retry_on: default_retry_on(),
        }
    }
}

impl RetryPolicy {
    /// Creates the default policy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A policy that never retries.
    #[must_use]
    pub fn no_retry() -> Self {
        Self::default().with_max_attempts(1)
    }

    /// Sets the attempt ceiling.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_base_delay_ms(mut self, delay: u64) -> Self {
        self.base_delay_ms = delay;
        self
    }

    /// Sets the delay cap.
    #[must_use]
    pub fn with_max_delay_ms(mut self, delay: u64) -> Self {
        self.max_delay_ms = delay;
        self
    }

    /// Sets the backoff curve.
    #[must_use]
    pub fn with_backoff(mut self, strategy: BackoffStrategy) -> Self {
        self.backoff = strategy;
        self
    }

    /// Sets the jitter.
    #[must_use]
    pub fn with_jitter(mut self, strategy: JitterStrategy) -> Self {
        self.jitter = strategy;
        self
    }

    /// Replaces the transient category set.
    #[must_use]
    pub fn with_retry_on(mut self, categories: impl IntoIterator<Item = ErrorCategory>) -> Self {
        self.retry_on = categories.into_iter().collect();
        self
    }

    /// Checks the policy is usable.
    pub fn validate(&self) -> ForgeResult<()> {
        if self.max_attempts == 0 {
            return Err(ForgeError::Config("retry max_attempts must be at least 1".to_string()));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(ForgeError::Config(format!(
                "retry base_delay_ms ({}) exceeds max_delay_ms ({})",
                self.base_delay_ms, self.max_delay_ms
            )));
        }
        Ok(())
    }

    /// Classifies an adapter failure. Cancellation is never retried.
    #[must_use]
    pub fn classify(&self, error: &AdapterError) -> ErrorClass {
        if error.category != ErrorCategory::Cancelled && self.retry_on.contains(&error.category) {
            ErrorClass::Transient
        } else {
            ErrorClass::Permanent
        }
    }

    /// Backoff before the attempt after `attempt` (1-based).
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let base = self.base_delay_ms;
        let exponent = attempt.saturating_sub(1);
        let delay = match self.backoff {
            BackoffStrategy::Exponential => base.saturating_mul(2u64.saturating_pow(exponent)),
            BackoffStrategy::Linear => base.saturating_mul(u64::from(attempt.max(1))),
            BackoffStrategy::Constant => base,
        }
        .min(self.max_delay_ms);

        let jittered = match self.jitter {
            JitterStrategy::None => delay,
            JitterStrategy::Full if delay == 0 => 0,
            JitterStrategy::Full => rand::thread_rng().gen_range(0..=delay),
            JitterStrategy::Equal => {
                let half = delay / 2;
                if half == 0 {
                    delay
                } else {
                    half + rand::thread_rng().gen_range(0..=half)
                }
            }
        };
        Duration::from_millis(jittered)
    }

    /// Decides what to do after `attempt` (1-based) failed with `error`.
    #[must_use]
    pub fn decide(&self, attempt: u32, error: &AdapterError) -> RetryDecision {
        if self.classify(error) == ErrorClass::Permanent {
            return RetryDecision::NotRetryable;
        }
        if attempt >= self.max_attempts {
            return RetryDecision::GiveUp;
        }
        RetryDecision::Retry(self.delay_after(attempt))
    }
}

/// Outcome of a retry decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the delay.
    Retry(Duration),
    /// Transient, but the ceiling is reached.
    GiveUp,
    /// Permanent; fail immediately.
    NotRetryable,
}

/// Default policy plus per-stage overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StagePolicies {
    /// Applies to every stage without an override.
    pub default: RetryPolicy,
    /// Per-stage replacements.
    pub overrides: BTreeMap<StageName, RetryPolicy>,
}

impl StagePolicies {
    /// Uses one policy for every stage.
    #[must_use]
    pub fn uniform(policy: RetryPolicy) -> Self {
        Self {
            default: policy,
            overrides: BTreeMap::new(),
        }
    }

    /// Overrides the policy of one stage.
    #[must_use]
    pub fn with_override(mut self, stage: StageName, policy: RetryPolicy) -> Self {
        self.overrides.insert(stage, policy);
        self
    }

    /// The policy in force for a stage.
    #[must_use]
    pub fn for_stage(&self, stage: StageName) -> &RetryPolicy {
        self.overrides.get(&stage).unwrap_or(&self.default)
    }

    /// Validates every policy.
    pub fn validate(&self) -> ForgeResult<()> {
        self.default.validate()?;
        for policy in self.overrides.values() {
            policy.validate()?;
        }
        Ok(())
    }
}
