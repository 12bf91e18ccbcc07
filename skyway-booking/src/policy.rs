//! Failure/recovery policy for gateway errors.
//!
//! | step               | Network / 5xx                   | 4xx / Malformed |
//! |--------------------|---------------------------------|-----------------|
//! | Search, Price      | retry with backoff, then Failed | surface         |
//! | Itinerary, Ticket  | surface                         | surface         |
//! | Payment            | Failed                          | Failed          |
//! | lookups (no step)  | retry with backoff, then surface| surface         |

use rand::Rng;
use skyway_core::gateway::GatewayError;
use skyway_core::Step;
use std::time::Duration;

/// Retry budget and backoff shape.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Retries without waiting between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            multiplier: 1.0,
            jitter: false,
        }
    }

    /// Delay before the attempt following `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let base = self.initial_backoff.as_millis() as f64 * self.multiplier.powi(exponent);
        let capped = base.min(self.max_backoff.as_millis() as f64);

        let millis = if self.jitter && capped > 0.0 {
            capped * rand::thread_rng().gen_range(0.5..=1.0)
        } else {
            capped
        };
        Duration::from_millis(millis as u64)
    }
}

/// What to do after a failed gateway attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recovery {
    /// Try the same call again after `delay`
    Retry { delay: Duration },
    /// Session moves to `Failed`
    FailSession,
    /// Hand the error to the caller; session stays at its last good step
    Surface,
}

#[derive(Debug, Clone, Default)]
pub struct RecoveryPolicy {
    retry: RetryConfig,
}

impl RecoveryPolicy {
    pub fn new(retry: RetryConfig) -> Self {
        Self { retry }
    }

    /// `step` is `None` for calls that do not advance the session.
    pub fn decide(&self, step: Option<Step>, error: &GatewayError, attempt: u32) -> Recovery {
        let transient = error.is_transient();
        let budget_left = attempt < self.retry.max_attempts;

        match step {
            // Money may have moved: never resubmit on our own.
            Some(Step::Payment) => Recovery::FailSession,
            _ if !transient => Recovery::Surface,
            Some(Step::Search) | Some(Step::Price) => {
                if budget_left {
                    Recovery::Retry { delay: self.retry.backoff(attempt) }
                } else {
                    Recovery::FailSession
                }
            }
            Some(Step::Itinerary) | Some(Step::Ticket) => Recovery::Surface,
            None => {
                if budget_left {
                    Recovery::Retry { delay: self.retry.backoff(attempt) }
                } else {
                    Recovery::Surface
                }
            }
        }
    }
}
