use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tracing::{info, warn};

/// Circuit breaker states: `Closed -> Open -> HalfOpen -> Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    half_open_probe_in_flight: bool,
}

/// Circuit breaker gating calls to the control plane.
///
/// Closed: calls pass. After `failure_threshold` consecutive failures the
/// circuit opens; while open, calls are short-circuited until
/// `recovery_timeout` elapses, at which point the next call becomes the
/// single half-open probe. Probe success closes the circuit, probe failure
/// re-opens it with a fresh window.
pub struct CircuitBreaker {
    inner: Mutex<BreakerInner>,
    failure_threshold: u32,
    recovery_timeout: Duration,
}

pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;
pub const DEFAULT_RECOVERY_TIMEOUT: Duration = Duration::from_secs(30);

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                half_open_probe_in_flight: false,
            }),
            failure_threshold,
            recovery_timeout,
        }
    }

    /// Whether a real call may be attempted right now.
    ///
    /// Returning `true` while the circuit was open transitions it to
    /// half-open and reserves the caller as the single recovery probe.
    pub fn try_acquire(&self) -> bool {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|t| t.elapsed())
                    .unwrap_or(self.recovery_timeout);
                if elapsed >= self.recovery_timeout {
                    inner.state = CircuitState::HalfOpen;
                    inner.half_open_probe_in_flight = true;
                    info!("Circuit breaker: open -> half_open");
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if inner.half_open_probe_in_flight {
                    false
                } else {
                    inner.half_open_probe_in_flight = true;
                    true
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen {
            info!("Circuit breaker: half_open -> closed (recovery successful)");
        }
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.half_open_probe_in_flight = false;
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.consecutive_failures += 1;
        inner.half_open_probe_in_flight = false;
        match inner.state {
            CircuitState::HalfOpen => {
                warn!("Circuit breaker: half_open -> open (recovery failed)");
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
            }
            CircuitState::Closed if inner.consecutive_failures >= self.failure_threshold => {
                warn!(
                    failures = inner.consecutive_failures,
                    threshold = self.failure_threshold,
                    "Circuit breaker: closed -> open"
                );
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
            }
            _ => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_failures
    }

    /// Test hook: force the breaker back to closed.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.half_open_probe_in_flight = false;
    }

    /// Observability view for the health surface.
    pub fn snapshot(&self) -> Value {
        let inner = self.lock();
        json!({
            "state": inner.state.to_string(),
            "consecutiveFailures": inner.consecutive_failures,
            "failureThreshold": self.failure_threshold,
            "recoveryTimeoutSecs": self.recovery_timeout.as_secs(),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        // Lock poisoning only happens if a holder panicked; the state is
        // plain data, so continuing with it is safe.
        match self.inner.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(DEFAULT_FAILURE_THRESHOLD, DEFAULT_RECOVERY_TIMEOUT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trips_after_three_consecutive_failures() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(30));
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.consecutive_failures(), 3);
    }

    #[test]
    fn test_open_short_circuits_calls() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(30));
        for _ in 0..3 {
            breaker.record_failure();
        }
        // 4th call makes no attempt.
        assert!(!breaker.try_acquire());
        assert!(!breaker.try_acquire());
    }

    #[test]
    fn test_success_resets_failure_streak() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(30));
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        assert_eq!(breaker.consecutive_failures(), 0);
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_probe_and_recovery() {
        let breaker = CircuitBreaker::new(3, Duration::from_millis(20));
        for _ in 0..3 {
            breaker.record_failure();
        }
        assert!(!breaker.try_acquire());
        std::thread::sleep(Duration::from_millis(30));

        // Recovery window elapsed: exactly one probe is let through.
        assert!(breaker.try_acquire());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(!breaker.try_acquire());

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.consecutive_failures(), 0);
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let breaker = CircuitBreaker::new(3, Duration::from_millis(20));
        for _ in 0..3 {
            breaker.record_failure();
        }
        std::thread::sleep(Duration::from_millis(30));
        assert!(breaker.try_acquire());
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        // Fresh window: immediately short-circuited again.
        assert!(!breaker.try_acquire());
    }

    #[test]
    fn test_reset_hook() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(30));
        for _ in 0..5 {
            breaker.record_failure();
        }
        breaker.reset();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.try_acquire());
    }

    #[test]
    fn test_snapshot_shape() {
        let breaker = CircuitBreaker::default();
        let snap = breaker.snapshot();
        assert_eq!(snap["state"], "closed");
        assert_eq!(snap["failureThreshold"], 3);
        assert_eq!(snap["recoveryTimeoutSecs"], 30);
    }
}
