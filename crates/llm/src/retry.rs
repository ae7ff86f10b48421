use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};
use vaio_core::{VaioConfig, VaioError};

use crate::Generate;

pub type Sleeper = Arc<dyn Fn(Duration) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
        }
    }

    pub fn from_config(cfg: &VaioConfig) -> Self {
        Self::new(cfg.max_retries, cfg.initial_backoff)
    }

    /// Wait after failed attempt `attempt` (1-based): `d * 2^(attempt-1)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.initial_delay.saturating_mul(1u32 << exponent)
    }
}

/// Wraps a backend with bounded retries and deterministic doubling backoff.
pub struct ResilientClient {
    inner: Arc<dyn Generate>,
    policy: RetryPolicy,
    sleeper: Sleeper,
}

impl ResilientClient {
    pub fn new(inner: Arc<dyn Generate>, policy: RetryPolicy) -> Self {
        Self {
            inner,
            policy,
            sleeper: Arc::new(thread::sleep),
        }
    }

    pub fn with_sleeper(mut self, sleeper: Sleeper) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// One attempt, no retries.
    pub fn call_once(&self, system: &str, user: &str) -> anyhow::Result<String> {
        self.inner.call(system, user)
    }

    pub fn call_with_retry(&self, system: &str, user: &str) -> vaio_core::Result<String> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.inner.call(system, user) {
                Ok(text) => {
                    debug!(attempt, "generation succeeded");
                    return Ok(text);
                }
                Err(err) => {
                    warn!(
                        attempt,
                        max = self.policy.max_attempts,
                        error = %err,
                        "generation attempt failed"
                    );
                    if attempt >= self.policy.max_attempts {
                        return Err(VaioError::Generation {
                            attempts: attempt,
                            message: format!("{err:#}"),
                        });
                    }
                    (self.sleeper)(self.policy.delay_for_attempt(attempt));
                }
            }
        }
    }
}

impl Generate for ResilientClient {
    fn call(&self, system: &str, user: &str) -> anyhow::Result<String> {
        self.call_with_retry(system, user).map_err(anyhow::Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicU32, Ordering};
    use parking_lot::Mutex;

    struct Flaky {
        failures: u32,
        calls: AtomicU32,
    }

    impl Generate for Flaky {
        fn call(&self, _system: &str, user: &str) -> anyhow::Result<String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.failures {
                Err(anyhow!("backend unavailable"))
            } else {
                Ok(format!("ok:{user}"))
            }
        }
    }

    fn recording() -> (Sleeper, Arc<Mutex<Vec<Duration>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        let sleeper: Sleeper = Arc::new(move |d| sink.lock().push(d));
        (sleeper, log)
    }

    #[test]
    fn delays_double_deterministically() {
        let policy = RetryPolicy::new(4, Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
    }

    #[test]
    fn exhaustion_sleeps_between_attempts_and_fails() {
        let backend = Arc::new(Flaky {
            failures: u32::MAX,
            calls: AtomicU32::new(0),
        });
        let (sleeper, log) = recording();
        let client = ResilientClient::new(backend.clone(), RetryPolicy::new(3, Duration::from_secs(1)))
            .with_sleeper(sleeper);
        let err = client.call_with_retry("sys", "hello").unwrap_err();
        assert!(matches!(err, VaioError::Generation { attempts: 3, .. }));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            *log.lock(),
            vec![Duration::from_secs(1), Duration::from_secs(2)]
        );
    }

    #[test]
    fn recovers_after_transient_failure() {
        let backend = Arc::new(Flaky {
            failures: 1,
            calls: AtomicU32::new(0),
        });
        let (sleeper, log) = recording();
        let client = ResilientClient::new(backend, RetryPolicy::new(3, Duration::from_millis(10)))
            .with_sleeper(sleeper);
        assert_eq!(client.call_with_retry("", "x").unwrap(), "ok:x");
        assert_eq!(log.lock().len(), 1);
    }

    #[test]
    fn single_call_never_retries() {
        let backend = Arc::new(Flaky {
            failures: 1,
            calls: AtomicU32::new(0),
        });
        let client = ResilientClient::new(backend.clone(), RetryPolicy::new(5, Duration::ZERO));
        assert!(client.call_once("", "x").is_err());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }
}
