//! Bounded retry with exponential backoff
//!
//! Failures are split by [`Classify`]: retryable ones back off and try again
//! until `max_attempts`, fatal ones stop immediately.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Retryable,
    Fatal,
}

/// Decides whether an error is worth another attempt
pub trait Classify {
    fn classify(&self) -> FailureClass;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    RetryableFailure,
    FatalFailure,
    TimedOut,
}

/// One iteration of the retry loop
#[derive(Debug, Clone)]
pub struct CallAttempt {
    pub attempt: u32,
    pub started_at: Instant,
    pub outcome: AttemptOutcome,
    /// Delay slept after this attempt; zero for the last one
    pub backoff: Duration,
    pub error: Option<String>,
}

#[derive(Debug, Error)]
pub enum RetryError<E> {
    #[error("fatal failure: {error}")]
    Fatal { error: E, attempts: Vec<CallAttempt> },

    #[error("retries exhausted after {} attempts: {last}", .attempts.len())]
    Exhausted { last: E, attempts: Vec<CallAttempt> },

    #[error("deadline exceeded after {} attempts", .attempts.len())]
    Timeout {
        last: Option<E>,
        attempts: Vec<CallAttempt>,
    },
}

impl<E> RetryError<E> {
    pub fn attempts(&self) -> &[CallAttempt] {
        match self {
            RetryError::Fatal { attempts, .. }
            | RetryError::Exhausted { attempts, .. }
            | RetryError::Timeout { attempts, .. } => attempts,
        }
    }
}

/// Successful value plus the attempt history that produced it
#[derive(Debug, Clone)]
pub struct Retried<T> {
    pub value: T,
    pub attempts: Vec<CallAttempt>,
}

impl<T> Retried<T> {
    pub fn attempt_count(&self) -> u32 {
        self.attempts.len() as u32
    }

    pub fn total_backoff(&self) -> Duration {
        self.attempts.iter().map(|a| a.backoff).sum()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    /// Fraction of the delay added or removed at random, in `[0, 1)`
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
            jitter: 0.0,
        }
    }
}

impl RetryPolicy {
    /// Un-jittered delay after attempt `attempt` (1-based):
    /// `base * multiplier^(attempt - 1)`, capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let max = self.max_delay.as_secs_f64();
        if !secs.is_finite() || secs >= max {
            self.max_delay
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    fn jittered_delay(&self, attempt: u32, rng: &mut StdRng) -> Duration {
        let delay = self.delay_for(attempt);
        if self.jitter <= 0.0 {
            return delay;
        }
        let factor = 1.0 + rng.gen_range(-self.jitter..=self.jitter);
        Duration::from_secs_f64(delay.as_secs_f64() * factor).min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails fatally, runs out of attempts, or
    /// hits `deadline`. `op` receives the 1-based attempt number.
    pub async fn run<T, E, F, Fut>(
        &self,
        deadline: Option<Instant>,
        mut op: F,
    ) -> Result<Retried<T>, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut rng = StdRng::from_entropy();
        let mut attempts = Vec::new();
        let mut attempt = 1;

        loop {
            let started_at = Instant::now();

            let result = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, op(attempt)).await {
                    Ok(result) => result,
                    Err(_) => {
                        attempts.push(CallAttempt {
                            attempt,
                            started_at,
                            outcome: AttemptOutcome::TimedOut,
                            backoff: Duration::ZERO,
                            error: Some("deadline exceeded".to_string()),
                        });
                        warn!(attempt, "Call abandoned at deadline");
                        return Err(RetryError::Timeout {
                            last: None,
                            attempts,
                        });
                    }
                },
                None => op(attempt).await,
            };

            let error = match result {
                Ok(value) => {
                    attempts.push(CallAttempt {
                        attempt,
                        started_at,
                        outcome: AttemptOutcome::Success,
                        backoff: Duration::ZERO,
                        error: None,
                    });
                    if attempt > 1 {
                        debug!(attempt, "Call succeeded after retry");
                    }
                    return Ok(Retried { value, attempts });
                }
                Err(error) => error,
            };

            if error.classify() == FailureClass::Fatal {
                attempts.push(CallAttempt {
                    attempt,
                    started_at,
                    outcome: AttemptOutcome::FatalFailure,
                    backoff: Duration::ZERO,
                    error: Some(error.to_string()),
                });
                warn!(attempt, error = %error, "Fatal failure, not retrying");
                return Err(RetryError::Fatal { error, attempts });
            }

            if attempt >= max_attempts {
                attempts.push(CallAttempt {
                    attempt,
                    started_at,
                    outcome: AttemptOutcome::RetryableFailure,
                    backoff: Duration::ZERO,
                    error: Some(error.to_string()),
                });
                warn!(attempts = attempt, error = %error, "Call failed after retries");
                return Err(RetryError::Exhausted {
                    last: error,
                    attempts,
                });
            }

            let backoff = self.jittered_delay(attempt, &mut rng);
            let past_deadline = deadline.is_some_and(|d| Instant::now() + backoff > d);
            attempts.push(CallAttempt {
                attempt,
                started_at,
                outcome: AttemptOutcome::RetryableFailure,
                backoff: if past_deadline { Duration::ZERO } else { backoff },
                error: Some(error.to_string()),
            });

            if past_deadline {
                warn!(attempt, backoff_ms = backoff.as_millis() as u64, "Backoff would pass deadline");
                return Err(RetryError::Timeout {
                    last: Some(error),
                    attempts,
                });
            }

            warn!(
                attempt,
                max_attempts,
                backoff_ms = backoff.as_millis() as u64,
                error = %error,
                "Call failed, retrying"
            );
            tokio::time::sleep(backoff).await;
            attempt += 1;
        }
    }
}
