//! Time-gated circuit breaker for the classification service.
//!
//! Two counters under one lock: consecutive failures and the time of the
//! last one. The breaker is open while the failure count has reached the
//! threshold and the reset window has not elapsed; the first caller to
//! observe the window's end clears the count and proceeds. There is no
//! half-open trial state.

use crate::config::BreakerConfig;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct BreakerState {
    failure_count: u32,
    last_failure: Option<Instant>,
}

pub struct CircuitBreaker {
    enabled: bool,
    failure_threshold: u32,
    reset_window: Duration,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(config: &BreakerConfig) -> Self {
        CircuitBreaker {
            enabled: config.enabled,
            failure_threshold: config.failure_threshold.max(1),
            reset_window: Duration::from_secs(config.reset_seconds),
            state: Mutex::new(BreakerState::default()),
        }
    }

    /// Returns true if calls should be short-circuited right now. The
    /// check-and-reset at the window boundary happens atomically here, so
    /// concurrent callers cannot both observe a stale open state.
    pub fn check_open(&self) -> bool {
        if !self.enabled {
            return false;
        }

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.failure_count < self.failure_threshold {
            return false;
        }

        match state.last_failure {
            Some(at) if at.elapsed() > self.reset_window => {
                state.failure_count = 0;
                state.last_failure = None;
                log::info!("circuit breaker reset window elapsed, closing");
                false
            }
            Some(_) => true,
            // Threshold reached but no timestamp recorded; treat as closed.
            None => false,
        }
    }

    pub fn record_failure(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.failure_count += 1;
        state.last_failure = Some(Instant::now());
        if state.failure_count == self.failure_threshold {
            log::warn!(
                "circuit breaker opened after {} consecutive failures",
                state.failure_count
            );
        }
    }

    pub fn record_success(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.failure_count = 0;
    }

    pub fn failure_count(&self) -> u32 {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .failure_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, reset_seconds: u64) -> CircuitBreaker {
        CircuitBreaker::new(&BreakerConfig {
            enabled: true,
            failure_threshold: threshold,
            reset_seconds,
        })
    }

    #[test]
    fn starts_closed() {
        let cb = breaker(3, 30);
        assert!(!cb.check_open());
    }

    #[test]
    fn opens_at_threshold() {
        let cb = breaker(3, 30);
        cb.record_failure();
        cb.record_failure();
        assert!(!cb.check_open());
        cb.record_failure();
        assert!(cb.check_open());
        assert!(cb.check_open());
    }

    #[test]
    fn success_resets_count() {
        let cb = breaker(3, 30);
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        assert_eq!(cb.failure_count(), 0);
        cb.record_failure();
        cb.record_failure();
        assert!(!cb.check_open());
    }

    #[test]
    fn closes_after_reset_window() {
        let cb = breaker(2, 0);
        cb.record_failure();
        cb.record_failure();
        // With a zero-second window the breaker closes as soon as any time
        // has passed since the last failure.
        std::thread::sleep(Duration::from_millis(20));
        assert!(!cb.check_open());
        assert_eq!(cb.failure_count(), 0);
    }

    #[test]
    fn stays_open_within_window() {
        let cb = breaker(1, 60);
        cb.record_failure();
        assert!(cb.check_open());
        std::thread::sleep(Duration::from_millis(10));
        assert!(cb.check_open());
    }

    #[test]
    fn disabled_breaker_never_opens() {
        let cb = CircuitBreaker::new(&BreakerConfig {
            enabled: false,
            failure_threshold: 1,
            reset_seconds: 60,
        });
        cb.record_failure();
        cb.record_failure();
        assert!(!cb.check_open());
    }
}
