//! Generic circuit breaker for fail-fast protection.
//!
//! Wraps any async operation; used standalone or around pool acquisition to
//! stop hammering a failing engine. Rejections consume no retry budget:
//! callers get [`ScoutError::CircuitOpen`] immediately with the remaining
//! wait time.

use parking_lot::Mutex;
use scout_core::{Result, ScoutError};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Breaker states. The machine cycles for the component's lifetime; there
/// is no terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BreakerState {
    /// Normal operation.
    Closed,
    /// Fail-fast: every call is rejected until the recovery timeout passes.
    Open,
    /// Trial recovery: successes accumulate toward closing; one failure
    /// re-opens.
    HalfOpen,
}

/// Circuit breaker tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Failures while closed before the breaker opens.
    pub failure_threshold: u32,
    /// Successes within the monitoring period required to close from
    /// half-open.
    pub success_threshold: usize,
    /// How long the breaker stays open before allowing a trial call.
    pub recovery_timeout: Duration,
    /// Window over which half-open successes are counted.
    pub monitoring_period: Duration,
    /// Optional deadline raced against the wrapped operation. A timeout is
    /// treated exactly like an operation failure.
    pub operation_timeout: Option<Duration>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            recovery_timeout: Duration::from_secs(30),
            monitoring_period: Duration::from_secs(60),
            operation_timeout: None,
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    failure_count: u32,
    success_count: u64,
    total_requests: u64,
    last_failure: Option<Instant>,
    last_success: Option<Instant>,
    state_changes: u64,
    /// Timestamps of successes observed while half-open, pruned to the
    /// monitoring period.
    success_history: Vec<Instant>,
}

impl BreakerInner {
    fn new() -> Self {
        Self {
            state: BreakerState::Closed,
            failure_count: 0,
            success_count: 0,
            total_requests: 0,
            last_failure: None,
            last_success: None,
            state_changes: 0,
            success_history: Vec::new(),
        }
    }
}

/// Point-in-time breaker statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerStats {
    pub state: BreakerState,
    pub failure_count: u32,
    pub success_count: u64,
    pub total_requests: u64,
    /// `failure_count / total_requests * 100`.
    pub failure_rate: f64,
    pub state_changes: u64,
    pub uptime_ms: u64,
}

type StateObserver = Box<dyn Fn(BreakerState, BreakerState) + Send + Sync>;

/// Protective state machine around a fallible operation.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
    observers: Mutex<Vec<StateObserver>>,
    started_at: Instant,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerInner::new()),
            observers: Mutex::new(Vec::new()),
            started_at: Instant::now(),
        }
    }

    /// Run `operation` under breaker protection.
    ///
    /// While open, the operation is never polled: the call fails with
    /// [`ScoutError::CircuitOpen`] carrying the remaining recovery wait.
    /// Once the recovery timeout has elapsed since the last failure the
    /// breaker moves to half-open and lets the call through as a trial.
    pub async fn execute<F, T>(&self, operation: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let transition = {
            let mut inner = self.inner.lock();
            inner.total_requests += 1;

            if inner.state == BreakerState::Open {
                let since_failure = inner
                    .last_failure
                    .map(|at| at.elapsed())
                    .unwrap_or(self.config.recovery_timeout + Duration::from_millis(1));
                if since_failure > self.config.recovery_timeout {
                    Some(self.transition(&mut inner, BreakerState::HalfOpen))
                } else {
                    let remaining = self.config.recovery_timeout - since_failure;
                    return Err(ScoutError::CircuitOpen {
                        retry_after_ms: remaining.as_millis() as u64,
                    });
                }
            } else {
                None
            }
        };
        self.notify(transition);

        let result = match self.config.operation_timeout {
            Some(deadline) => match timeout(deadline, operation).await {
                Ok(result) => result,
                Err(_) => Err(ScoutError::timeout(format!(
                    "operation exceeded {}ms",
                    deadline.as_millis()
                ))),
            },
            None => operation.await,
        };

        match result {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(e) => {
                self.on_failure();
                Err(e)
            }
        }
    }

    fn on_success(&self) {
        let transition = {
            let mut inner = self.inner.lock();
            inner.success_count += 1;
            inner.last_success = Some(Instant::now());

            if inner.state == BreakerState::HalfOpen {
                let now = Instant::now();
                inner.success_history.push(now);
                let window = self.config.monitoring_period;
                inner
                    .success_history
                    .retain(|at| now.duration_since(*at) <= window);

                if inner.success_history.len() >= self.config.success_threshold {
                    inner.failure_count = 0;
                    inner.success_history.clear();
                    Some(self.transition(&mut inner, BreakerState::Closed))
                } else {
                    debug!(
                        successes = inner.success_history.len(),
                        needed = self.config.success_threshold,
                        "half-open trial success"
                    );
                    None
                }
            } else {
                None
            }
        };
        self.notify(transition);
    }

    fn on_failure(&self) {
        let transition = {
            let mut inner = self.inner.lock();
            inner.failure_count += 1;
            inner.last_failure = Some(Instant::now());

            match inner.state {
                BreakerState::Closed if inner.failure_count >= self.config.failure_threshold => {
                    warn!(failures = inner.failure_count, "circuit breaker opened");
                    Some(self.transition(&mut inner, BreakerState::Open))
                }
                // A single failure during trial recovery re-opens.
                BreakerState::HalfOpen => {
                    warn!("trial call failed; circuit breaker re-opened");
                    inner.success_history.clear();
                    Some(self.transition(&mut inner, BreakerState::Open))
                }
                _ => None,
            }
        };
        self.notify(transition);
    }

    fn transition(
        &self,
        inner: &mut BreakerInner,
        to: BreakerState,
    ) -> (BreakerState, BreakerState) {
        let from = inner.state;
        inner.state = to;
        inner.state_changes += 1;
        info!(?from, ?to, "circuit breaker state change");
        (from, to)
    }

    /// Fan out a state change to subscribers, in registration order,
    /// outside the state lock.
    fn notify(&self, transition: Option<(BreakerState, BreakerState)>) {
        if let Some((from, to)) = transition {
            for observer in self.observers.lock().iter() {
                observer(from, to);
            }
        }
    }

    /// Register a state-change observer. Observers are invoked
    /// synchronously during the transition, in the order they were
    /// registered.
    pub fn subscribe(&self, observer: impl Fn(BreakerState, BreakerState) + Send + Sync + 'static) {
        self.observers.lock().push(Box::new(observer));
    }

    /// Force closed and clear all counters.
    pub fn reset(&self) {
        let transition = {
            let mut inner = self.inner.lock();
            let from = inner.state;
            *inner = BreakerInner::new();
            if from != BreakerState::Closed {
                inner.state_changes = 1;
                info!(?from, "circuit breaker reset to closed");
                Some((from, BreakerState::Closed))
            } else {
                None
            }
        };
        self.notify(transition);
    }

    /// Force open (maintenance, load shedding).
    pub fn force_open(&self) {
        let transition = {
            let mut inner = self.inner.lock();
            inner.last_failure = Some(Instant::now());
            if inner.state != BreakerState::Open {
                Some(self.transition(&mut inner, BreakerState::Open))
            } else {
                None
            }
        };
        self.notify(transition);
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    pub fn stats(&self) -> BreakerStats {
        let inner = self.inner.lock();
        let failure_rate = if inner.total_requests > 0 {
            inner.failure_count as f64 / inner.total_requests as f64 * 100.0
        } else {
            0.0
        };
        BreakerStats {
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            total_requests: inner.total_requests,
            failure_rate,
            state_changes: inner.state_changes,
            uptime_ms: self.started_at.elapsed().as_millis() as u64,
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
