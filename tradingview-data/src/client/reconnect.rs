use crate::{client::config::ReconnectConfig, error::Error};
use rand::Rng;
use std::{future::Future, time::Duration};
use tracing::{info, warn};

/// Exponential backoff with optional jitter, reset after every successful attempt.
///
/// The Nth consecutive retry waits `min(initial_delay * backoff_factor^(N-1), max_delay)`,
/// plus up to 10% jitter when enabled.
#[derive(Debug, Clone)]
pub struct ReconnectStrategy {
    config: ReconnectConfig,
    current_delay: Duration,
    attempts: u32,
}

impl ReconnectStrategy {
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            current_delay: config.initial_delay,
            config,
            attempts: 0,
        }
    }

    /// Delay before the next attempt, or `None` once `max_retries` is exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self
            .config
            .max_retries
            .is_some_and(|max_retries| self.attempts >= max_retries)
        {
            return None;
        }

        let mut delay = self.current_delay;
        if self.config.jitter {
            delay += delay.mul_f64(rand::rng().random_range(0.0..=0.1));
        }

        self.current_delay = self
            .current_delay
            .mul_f64(self.config.backoff_factor)
            .min(self.config.max_delay);
        self.attempts += 1;

        Some(delay)
    }

    pub fn reset(&mut self) {
        self.current_delay = self.config.initial_delay;
        self.attempts = 0;
    }

    /// Consecutive attempts since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

/// Sleep for the strategy's next delay and run `attempt`, until it succeeds or the
/// strategy gives up. Resets the strategy on success.
pub async fn retry_with_backoff<T, F, Fut>(
    strategy: &mut ReconnectStrategy,
    mut attempt: F,
) -> Result<T, Error>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let mut last_error = Error::ConnectionClosed;

    while let Some(delay) = strategy.next_delay() {
        info!(
            attempt = strategy.attempts(),
            delay_ms = delay.as_millis() as u64,
            "retrying after backoff"
        );
        tokio::time::sleep(delay).await;

        match attempt(strategy.attempts()).await {
            Ok(output) => {
                strategy.reset();
                return Ok(output);
            }
            Err(error) => {
                warn!(attempt = strategy.attempts(), %error, "retry attempt failed");
                last_error = error;
            }
        }
    }

    Err(last_error)
}
