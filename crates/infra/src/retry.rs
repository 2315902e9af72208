//! Bounded retry of transient (contention) failures.

use std::thread;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use gemledger_core::DomainResult;

/// Jittered exponential backoff for operations that failed with
/// `DomainError::Contention`. Every other error is returned immediately.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_pct: f64,
}

impl RetryPolicy {
    pub fn new(
        max_attempts: usize,
        base_delay_ms: u64,
        max_delay_ms: u64,
        jitter_pct: f64,
    ) -> Self {
        let clamped_base = base_delay_ms.max(1);
        Self {
            max_attempts: max_attempts.max(1),
            base_delay_ms: clamped_base,
            max_delay_ms: max_delay_ms.max(clamped_base),
            jitter_pct: jitter_pct.clamp(0.0, 1.0),
        }
    }

    /// Single attempt, no backoff.
    pub fn none() -> Self {
        Self::new(1, 1, 1, 0.0)
    }

    fn next_delay(&self, attempt: usize) -> Duration {
        let exp = 2_u64.saturating_pow(attempt as u32);
        let delay = self.base_delay_ms.saturating_mul(exp).min(self.max_delay_ms);
        let jittered = if self.jitter_pct > 0.0 {
            let spread = (delay as f64 * self.jitter_pct) as i64;
            let delta = rand::thread_rng().gen_range(-spread..=spread);
            delay.saturating_add_signed(delta)
        } else {
            delay
        };
        Duration::from_millis(jittered)
    }

    /// Run `op` until it succeeds, fails with a non-transient error, or the
    /// attempt budget is spent. `op` receives the zero-based attempt number.
    pub fn run<T>(
        &self,
        operation: &str,
        mut op: impl FnMut(usize) -> DomainResult<T>,
    ) -> DomainResult<T> {
        let mut attempt = 0;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt + 1 < self.max_attempts => {
                    let delay = self.next_delay(attempt);
                    warn!(
                        operation,
                        attempt = attempt + 1,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient failure, retrying"
                    );
                    thread::sleep(delay);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, 5, 200, 0.2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gemledger_core::DomainError;

    #[test]
    fn retries_contention_until_success() {
        let policy = RetryPolicy::new(4, 1, 2, 0.0);
        let result = policy.run("test", |attempt| {
            if attempt < 2 {
                Err(DomainError::contention("busy"))
            } else {
                Ok(attempt)
            }
        });
        assert_eq!(result.unwrap(), 2);
    }

    #[test]
    fn gives_up_after_budget() {
        let policy = RetryPolicy::new(3, 1, 1, 0.0);
        let mut calls = 0;
        let err = policy
            .run::<()>("test", |_| {
                calls += 1;
                Err(DomainError::contention("busy"))
            })
            .unwrap_err();
        assert!(err.is_transient());
        assert_eq!(calls, 3);
    }

    #[test]
    fn business_errors_are_not_retried() {
        let policy = RetryPolicy::new(5, 1, 1, 0.0);
        let mut calls = 0;
        let err = policy
            .run::<()>("test", |_| {
                calls += 1;
                Err(DomainError::validation("bad input"))
            })
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
        assert_eq!(calls, 1);
    }

    #[test]
    fn delays_are_capped() {
        let policy = RetryPolicy::new(10, 10, 40, 0.0);
        assert_eq!(policy.next_delay(0), Duration::from_millis(10));
        assert_eq!(policy.next_delay(1), Duration::from_millis(20));
        assert_eq!(policy.next_delay(6), Duration::from_millis(40));
    }
}
