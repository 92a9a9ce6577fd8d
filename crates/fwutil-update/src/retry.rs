//! Bounded retry budgets and the shared stop flag.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use tracing::debug;

/// A fixed number of attempts separated by a fixed interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts including the first; zero is treated as one
    pub attempts: u32,
    /// Sleep between attempts
    pub interval: Duration,
}

impl RetryPolicy {
    /// Budget of `attempts` tries, `interval` apart.
    #[must_use]
    pub fn new(attempts: u32, interval: Duration) -> Self {
        Self { attempts, interval }
    }

    /// Poll at 1 Hz for `secs` seconds.
    #[must_use]
    pub fn seconds(secs: u32) -> Self {
        Self::new(secs, Duration::from_secs(1))
    }

    /// A single attempt with no waiting.
    #[must_use]
    pub fn once() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Same attempt count with a different interval.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Upper bound on time spent sleeping.
    #[must_use]
    pub fn budget(&self) -> Duration {
        self.interval
            .saturating_mul(self.attempts.max(1).saturating_sub(1))
    }

    /// Call `probe` until it reports `true` or the attempts run out.
    ///
    /// Probe errors count as "not yet" and are logged at `debug`.
    pub fn poll<E: fmt::Display>(&self, mut probe: impl FnMut() -> Result<bool, E>) -> bool {
        for attempt in 1..=self.attempts.max(1) {
            match probe() {
                Ok(true) => return true,
                Ok(false) => {}
                Err(e) => debug!(attempt, error = %e, "poll attempt failed"),
            }
            if attempt < self.attempts {
                thread::sleep(self.interval);
            }
        }
        false
    }

    /// Run `op` until it succeeds or the attempts run out.
    ///
    /// # Errors
    ///
    /// Returns the last error once every attempt has failed.
    pub fn retry<T, E: fmt::Display>(&self, mut op: impl FnMut() -> Result<T, E>) -> Result<T, E> {
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= self.attempts => return Err(e),
                Err(e) => {
                    debug!(attempt, error = %e, "retrying after failure");
                    attempt += 1;
                    thread::sleep(self.interval);
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }
}

/// Cooperative stop request shared between a signal handler and a run.
///
/// Setting the flag never interrupts a step in progress; the orchestrator
/// checks it between steps.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    /// A flag that is not set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop.
    pub fn stop(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Whether a stop was requested.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// The underlying flag, for signal handlers that want an `AtomicBool`.
    #[must_use]
    pub fn as_arc(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_stops_at_first_true() {
        let mut calls = 0;
        let done = RetryPolicy::new(5, Duration::ZERO).poll(|| {
            calls += 1;
            Ok::<_, String>(calls == 3)
        });
        assert!(done);
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_poll_is_bounded() {
        let mut calls = 0;
        let done = RetryPolicy::new(4, Duration::ZERO).poll(|| {
            calls += 1;
            Err::<bool, _>("status unavailable")
        });
        assert!(!done);
        assert_eq!(calls, 4);
    }

    #[test]
    fn test_zero_attempts_still_tries_once() {
        let mut calls = 0;
        let result = RetryPolicy::new(0, Duration::ZERO).retry(|| {
            calls += 1;
            Err::<(), _>("nope")
        });
        assert_eq!(result, Err("nope"));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_retry_returns_last_error() {
        let mut calls = 0;
        let result = RetryPolicy::new(3, Duration::ZERO).retry(|| {
            calls += 1;
            Err::<(), _>(calls)
        });
        assert_eq!(result, Err(3));
    }

    #[test]
    fn test_budget() {
        assert_eq!(RetryPolicy::seconds(30).budget(), Duration::from_secs(29));
        assert_eq!(RetryPolicy::once().budget(), Duration::ZERO);
    }

    #[test]
    fn test_stop_flag_is_shared() {
        let flag = StopFlag::new();
        let handler_side = flag.as_arc();
        assert!(!flag.is_stopped());
        handler_side.store(true, Ordering::Relaxed);
        assert!(flag.is_stopped());
    }
}
