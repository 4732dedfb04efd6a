//! Bounded retry with exponential backoff.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(32) as i32;
        let nanos = self.initial_backoff.as_nanos() as f64 * self.multiplier.max(1.0).powi(exp);
        if !nanos.is_finite() || nanos >= self.max_backoff.as_nanos() as f64 {
            self.max_backoff
        } else {
            Duration::from_nanos(nanos.round() as u64)
        }
    }
}

#[derive(Debug)]
pub enum RetryOutcome<T, E> {
    Success { value: T, attempts: u32 },
    Exhausted { last_error: E, attempts: u32 },
}

impl<T, E> RetryOutcome<T, E> {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Success { attempts, .. } | Self::Exhausted { attempts, .. } => *attempts,
        }
    }

    pub fn ok(self) -> Option<T> {
        match self {
            Self::Success { value, .. } => Some(value),
            Self::Exhausted { .. } => None,
        }
    }
}

/// Run `op` until it succeeds or the policy's attempts are used up.  `op`
/// receives the 1-based attempt number.
pub async fn retry<T, E, Fut, Op>(policy: &RetryPolicy, mut op: Op) -> RetryOutcome<T, E>
where
    Op: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let max = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    debug!("succeeded on attempt {}/{}", attempt, max);
                }
                return RetryOutcome::Success {
                    value,
                    attempts: attempt,
                };
            }
            Err(e) if attempt >= max => {
                warn!("giving up after {} attempts: {}", attempt, e);
                return RetryOutcome::Exhausted {
                    last_error: e,
                    attempts: attempt,
                };
            }
            Err(e) => {
                let delay = policy.backoff(attempt);
                debug!("attempt {}/{} failed: {}; retrying in {:?}", attempt, max, e, delay);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 4,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(250),
            multiplier: 2.0,
        }
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let p = policy();
        assert_eq!(p.backoff(1), Duration::from_millis(100));
        assert_eq!(p.backoff(2), Duration::from_millis(200));
        assert_eq!(p.backoff(3), Duration::from_millis(250));
        assert_eq!(p.backoff(40), Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_failures() {
        let outcome = retry(&policy(), |attempt| async move {
            if attempt < 3 {
                Err(format!("boom {attempt}"))
            } else {
                Ok(attempt * 10)
            }
        })
        .await;
        assert_eq!(outcome.attempts(), 3);
        assert_eq!(outcome.ok(), Some(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts() {
        let outcome: RetryOutcome<(), String> =
            retry(&policy(), |_| async { Err("down".to_string()) }).await;
        match outcome {
            RetryOutcome::Exhausted {
                last_error,
                attempts,
            } => {
                assert_eq!(attempts, 4);
                assert_eq!(last_error, "down");
            }
            RetryOutcome::Success { .. } => panic!("should not succeed"),
        }
    }
}
