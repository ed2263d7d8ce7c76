//! Per-source circuit breaker
//!
//! Volatile state protecting the inline fanout path from persistently
//! failing downstreams. Lives inside the registry actor, so no locking:
//! rebuilt closed on restart.
//!
//! Any partial success in half-open counts as recovery: estuary failures are
//! per-sink, not per-source, and a single bad sink must not keep the whole
//! circuit open.

use std::time::Duration;

use tokio::time::Instant;

/// Breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Three-state breaker over consecutive all-fail dispatches
#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    recovery: Duration,
    state: CircuitState,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, recovery: Duration) -> Self {
        Self {
            failure_threshold,
            recovery,
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_failure: None,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// Whether an inline dispatch may proceed
    ///
    /// In the open state this is also the recovery probe gate: once the
    /// recovery window has elapsed the breaker moves to half-open and admits
    /// one dispatch.
    pub fn should_attempt(&mut self) -> bool {
        match self.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let recovered = self
                    .last_failure
                    .is_none_or(|at| at.elapsed() >= self.recovery);
                if recovered {
                    tracing::debug!("Circuit breaker half-open, admitting probe");
                    self.state = CircuitState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Feed a dispatch outcome back into the breaker
    pub fn record(&mut self, successes: usize, failures: usize) {
        match self.state {
            CircuitState::Closed => {
                if failures == 0 {
                    return;
                }
                self.note_failure();
            }
            CircuitState::HalfOpen => {
                if failures == 0 || successes > 0 {
                    tracing::debug!("Circuit breaker closed after successful probe");
                    self.state = CircuitState::Closed;
                    self.consecutive_failures = 0;
                    self.last_failure = None;
                } else {
                    self.note_failure();
                }
            }
            // Dispatch is never attempted while open
            CircuitState::Open => {}
        }
    }

    fn note_failure(&mut self) {
        self.consecutive_failures += 1;
        self.last_failure = Some(Instant::now());
        if self.consecutive_failures >= self.failure_threshold {
            if self.state != CircuitState::Open {
                tracing::warn!(
                    consecutive_failures = self.consecutive_failures,
                    "Circuit breaker opened"
                );
            }
            self.state = CircuitState::Open;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(5, Duration::from_secs(60))
    }

    #[test]
    fn test_closed_allows_and_ignores_success() {
        let mut cb = breaker();
        assert!(cb.should_attempt());
        cb.record(10, 0);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_opens_after_threshold_failures() {
        let mut cb = breaker();
        for _ in 0..4 {
            cb.record(0, 3);
            assert_eq!(cb.state(), CircuitState::Closed);
        }
        cb.record(0, 3);
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.should_attempt());
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_admits_probe_after_recovery() {
        let mut cb = breaker();
        for _ in 0..5 {
            cb.record(0, 1);
        }
        assert!(!cb.should_attempt());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(cb.should_attempt());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_partial_success_closes() {
        let mut cb = breaker();
        for _ in 0..5 {
            cb.record(0, 1);
        }
        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(cb.should_attempt());

        // One sink still failing, but the probe reached others
        cb.record(1, 4);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.should_attempt());
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_all_fail_reopens() {
        let mut cb = breaker();
        for _ in 0..5 {
            cb.record(0, 1);
        }
        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(cb.should_attempt());

        cb.record(0, 2);
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.should_attempt());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reopen_waits_full_recovery_again() {
        let mut cb = breaker();
        for _ in 0..5 {
            cb.record(0, 1);
        }
        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(cb.should_attempt());
        cb.record(0, 1);

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(!cb.should_attempt());
        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(cb.should_attempt());
    }
}
