//! Retry policy - exponential backoff with jitter for submission attempts
//!
//! The policy is a pure transition function: given the attempt that just
//! failed and its error, it decides whether another attempt happens and after
//! what delay. The submission loop drives it, so attempt bounds and backoff are
//! testable without a network.

use crate::config::RetryConfig;
use crate::error::NetworkError;
use std::time::Duration;

/// Why the loop stopped without success
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GiveUpReason {
    /// Every permitted attempt failed transiently
    Exhausted,
    /// The error cannot be fixed by retrying
    NonRetriable,
}

impl GiveUpReason {
    /// Lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            GiveUpReason::Exhausted => "exhausted",
            GiveUpReason::NonRetriable => "non_retriable",
        }
    }
}

/// Next step after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep, then make attempt `next_attempt`
    Retry {
        /// 1-based attempt number to make next
        next_attempt: u32,
        /// Backoff before it
        delay: Duration,
    },
    /// Stop
    GiveUp(GiveUpReason),
}

/// Bounded retry policy
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Create policy
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Total attempts permitted (first try included)
    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Decide what follows failed attempt `attempt` (1-based)
    pub fn decide(&self, attempt: u32, error: &NetworkError) -> RetryDecision {
        if !error.is_retriable() {
            return RetryDecision::GiveUp(GiveUpReason::NonRetriable);
        }
        if attempt >= self.config.max_attempts {
            return RetryDecision::GiveUp(GiveUpReason::Exhausted);
        }

        RetryDecision::Retry {
            next_attempt: attempt + 1,
            delay: self.calculate_delay(attempt - 1),
        }
    }

    /// Delay before the `retry`-th retry (0-based) with exponential backoff + jitter
    pub fn calculate_delay(&self, retry: u32) -> Duration {
        let base_delay = self.config.initial_delay_ms as f64
            * self.config.backoff_multiplier.powi(retry as i32);

        // Cap at max_delay
        let capped_delay = base_delay.min(self.config.max_delay_ms as f64);

        // Add jitter to prevent thundering herd
        let jitter_range = capped_delay * self.config.jitter_factor;
        let jitter = (rand::random::<f64>() - 0.5) * jitter_range * 2.0;
        let final_delay = (capped_delay + jitter).max(0.0);

        Duration::from_millis(final_delay as u64)
    }
}
