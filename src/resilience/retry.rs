//! Backoff for reconnects and idempotent requests
//!
//! ## Table of Contents
//! - **BackoffConfig**: Attempt budget and delay curve
//! - **Backoff**: Stateful delay generator, reset on progress
//! - **retry_transient**: Re-run an operation while its error is transient

use crate::error::Result;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Backoff configuration
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Maximum consecutive retries before giving up
    pub max_retries: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Growth factor per attempt, at least 1.0
    pub multiplier: f64,
    /// Spread delays by up to 25%
    pub jitter: bool,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl BackoffConfig {
    /// Default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the retry budget
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set the first delay
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the delay cap
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the growth factor
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier.max(1.0);
        self
    }

    /// Enable or disable jitter
    pub fn with_jitter(mut self, enabled: bool) -> Self {
        self.jitter = enabled;
        self
    }
}

/// Exponential backoff state
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    attempt: u32,
}

impl Backoff {
    /// Start a fresh backoff
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Delay before the next retry, `None` once the budget is spent
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.config.max_retries {
            return None;
        }
        let delay = self.delay_for(self.attempt);
        self.attempt += 1;
        Some(delay)
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.config.initial_delay.as_millis() as f64;
        let cap = self.config.max_delay.as_millis() as f64;
        let grown = (base * self.config.multiplier.powi(attempt as i32)).min(cap);

        let ms = if self.config.jitter {
            (grown + grown * 0.25 * jitter_fraction()).min(cap)
        } else {
            grown
        };
        Duration::from_millis(ms as u64)
    }

    /// Forget past failures
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Retries used so far
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Whether another retry is allowed
    pub fn has_more(&self) -> bool {
        self.attempt < self.config.max_retries
    }
}

/// Fraction in `[0, 1)` taken from a random v4 uuid
fn jitter_fraction() -> f64 {
    let bytes = uuid::Uuid::new_v4().into_bytes();
    u16::from_le_bytes([bytes[0], bytes[1]]) as f64 / (u16::MAX as f64 + 1.0)
}

/// Run `operation` until it succeeds, fails permanently, or the budget is spent
///
/// Only errors for which [`is_transient`](crate::TelemetryError::is_transient) holds are retried.
/// Meant for GETs and for POSTs carrying an idempotency key.
pub async fn retry_transient<F, Fut, T>(config: &BackoffConfig, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut backoff = Backoff::new(config.clone());
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() => match backoff.next_delay() {
                Some(delay) => {
                    debug!(
                        attempt = backoff.attempt(),
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Retrying after transient failure"
                    );
                    tokio::time::sleep(delay).await;
                }
                None => return Err(err),
            },
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TelemetryError;
    use crate::schema::ProblemError;

    fn fixed(retries: u32) -> BackoffConfig {
        BackoffConfig::new()
            .with_max_retries(retries)
            .with_initial_delay(Duration::from_millis(1))
            .with_jitter(false)
    }

    #[test]
    fn test_delays_grow_and_stop() {
        let config = BackoffConfig::new()
            .with_max_retries(3)
            .with_initial_delay(Duration::from_millis(100))
            .with_multiplier(2.0)
            .with_jitter(false);
        let mut backoff = Backoff::new(config);

        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(100)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(200)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(400)));
        assert_eq!(backoff.next_delay(), None);
        assert!(!backoff.has_more());
    }

    #[test]
    fn test_delay_capped_with_jitter() {
        let config = BackoffConfig::new()
            .with_max_retries(10)
            .with_initial_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(5));
        let mut backoff = Backoff::new(config);

        for _ in 0..10 {
            let delay = backoff.next_delay().unwrap();
            assert!(delay <= Duration::from_secs(5));
        }
    }

    #[test]
    fn test_reset_restores_budget() {
        let mut backoff = Backoff::new(fixed(1));
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_none());

        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert!(backoff.next_delay().is_some());
    }

    #[tokio::test]
    async fn test_retry_transient_recovers() {
        let mut calls = 0;
        let result = retry_transient(&fixed(3), || {
            calls += 1;
            let attempt = calls;
            async move {
                if attempt < 3 {
                    Err(TelemetryError::transport("connection reset"))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn test_retry_transient_stops_on_permanent() {
        let mut calls = 0;
        let result: Result<()> = retry_transient(&fixed(3), || {
            calls += 1;
            async { Err(ProblemError::new("http.404", "Not Found", 404).into()) }
        })
        .await;

        assert!(result.unwrap_err().problem().is_some());
        assert_eq!(calls, 1);
    }
}
