use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Why one attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttemptError {
    /// Network error, bad status, timeout or unusable response. Retried.
    #[error("transient failure: {0}")]
    Transient(String),
    /// Something the operation needs does not exist. Never retried.
    #[error("missing input: {0}")]
    MissingInput(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryAttempt {
    /// 1-based.
    pub attempt: u32,
    pub delay_before: Duration,
}

#[derive(Debug, Clone)]
pub struct RetryingOperation {
    max_attempts: u32,
    base_delay: Duration,
}

impl Default for RetryingOperation {
    fn default() -> Self {
        Self::new(3)
    }
}

impl RetryingOperation {
    pub const BASE_DELAY: Duration = Duration::from_secs(1);

    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Self::BASE_DELAY,
        }
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before the 0-indexed attempt `i`: nothing first, then base * 2^(i-1).
    fn delay_before(&self, i: u32) -> Duration {
        if i == 0 {
            Duration::ZERO
        } else {
            self.base_delay * 2u32.saturating_pow(i - 1)
        }
    }

    /// Runs `op` until it succeeds, fails with missing input, or attempts run
    /// out. Only the outcome is reported; errors are logged here.
    pub async fn execute<F, Fut>(&self, name: &str, mut op: F) -> bool
    where
        F: FnMut(RetryAttempt) -> Fut,
        Fut: Future<Output = Result<(), AttemptError>>,
    {
        for i in 0..self.max_attempts {
            let attempt = RetryAttempt {
                attempt: i + 1,
                delay_before: self.delay_before(i),
            };
            if !attempt.delay_before.is_zero() {
                debug!("Waiting {:?} before {} attempt {}", attempt.delay_before, name, attempt.attempt);
                tokio::time::sleep(attempt.delay_before).await;
            }

            match op(attempt).await {
                Ok(()) => {
                    info!("{} succeeded on attempt {}", name, attempt.attempt);
                    return true;
                }
                Err(e @ AttemptError::MissingInput(_)) => {
                    error!("{} cannot proceed: {}", name, e);
                    return false;
                }
                Err(e @ AttemptError::Transient(_)) => {
                    warn!(
                        "{} attempt {}/{} failed: {}",
                        name, attempt.attempt, self.max_attempts, e
                    );
                }
            }
        }
        error!("{} failed after {} attempts", name, self.max_attempts);
        false
    }
}
