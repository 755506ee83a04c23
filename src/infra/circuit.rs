use std::sync::Mutex;
use std::time::{Duration, Instant};

use log::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// How long the circuit stays open before a half-open probe.
    pub open_timeout: Duration,
    /// Failures older than this no longer count toward the threshold.
    pub reset_window: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_timeout: Duration::from_secs(30),
            reset_window: Duration::from_secs(60),
        }
    }
}

struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure_at: Option<Instant>,
    opened_at: Option<Instant>,
}

/// Per-dependency breaker: CLOSED until `failure_threshold` consecutive
/// failures inside the reset window, then OPEN for `open_timeout`, then one
/// HALF_OPEN probe decides whether to close again.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                last_failure_at: None,
                opened_at: None,
            }),
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().expect("breaker mutex poisoned").state
    }

    /// Whether a call may proceed right now. Transitions OPEN → HALF_OPEN
    /// when the cool-down has elapsed.
    pub fn allow_request(&self) -> bool {
        let mut inner = self.inner.lock().expect("breaker mutex poisoned");
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= self.config.open_timeout {
                    info!(breaker = &*self.name; "Circuit half-open, allowing probe");
                    inner.state = CircuitState::HalfOpen;
                    true
                } else {
                    false
                }
            },
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().expect("breaker mutex poisoned");
        if inner.state != CircuitState::Closed {
            info!(breaker = &*self.name; "Circuit closed");
        }
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.last_failure_at = None;
        inner.opened_at = None;
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().expect("breaker mutex poisoned");

        // A half-open probe failing sends us straight back to open.
        if inner.state == CircuitState::HalfOpen {
            warn!(breaker = &*self.name; "Half-open probe failed, reopening circuit");
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
            return;
        }

        // Stale failures outside the reset window do not accumulate.
        if let Some(last) = inner.last_failure_at {
            if last.elapsed() > self.config.reset_window {
                inner.consecutive_failures = 0;
            }
        }

        inner.consecutive_failures += 1;
        inner.last_failure_at = Some(Instant::now());

        if inner.state == CircuitState::Closed && inner.consecutive_failures >= self.config.failure_threshold {
            warn!(
                breaker = &*self.name,
                failures = inner.consecutive_failures;
                "Circuit opened"
            );
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(open_timeout: Duration) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                failure_threshold: 3,
                open_timeout,
                reset_window: Duration::from_secs(60),
            },
        )
    }

    #[test]
    fn test_opens_after_threshold() {
        let cb = breaker(Duration::from_secs(30));
        assert!(cb.allow_request());

        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.allow_request());
    }

    #[test]
    fn test_success_resets_count() {
        let cb = breaker(Duration::from_secs(30));
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_probe_closes_on_success() {
        let cb = breaker(Duration::from_millis(20));
        for _ in 0..3 {
            cb.record_failure();
        }
        assert!(!cb.allow_request());

        std::thread::sleep(Duration::from_millis(40));
        assert!(cb.allow_request());
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_probe_reopens_on_failure() {
        let cb = breaker(Duration::from_millis(20));
        for _ in 0..3 {
            cb.record_failure();
        }
        std::thread::sleep(Duration::from_millis(40));
        assert!(cb.allow_request());

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.allow_request());
    }
}
