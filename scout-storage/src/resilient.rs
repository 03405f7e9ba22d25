//! Self-healing layer over the base pool.
//!
//! Composes a [`Pool`] with per-connection health tracking, retrying
//! acquisition with exponential backoff, periodic health and idle-cleanup
//! sweeps, warm-up, and derived statistics. Probe failures replace the
//! connection and retry; retry exhaustion and invalid configuration are
//! terminal.

use crate::connection::ProbeOutcome;
use crate::pool::{Pool, PoolCounters, PooledConnection};
use dashmap::DashMap;
use parking_lot::Mutex;
use scout_core::{ConnectionPoolConfig, Result, ScoutError, StorageConfig};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Floor applied to every retry delay.
pub const MIN_RETRY_DELAY: Duration = Duration::from_millis(50);

/// The idle sweep runs every `idle_timeout / CLEANUP_CHECK_RATIO`.
const CLEANUP_CHECK_RATIO: u64 = 4;

/// Healthy-rate thresholds for the overall pool classification.
const WARNING_HEALTH_RATE: f64 = 0.9;
const CRITICAL_HEALTH_RATE: f64 = 0.5;

/// Rough per-connection memory footprint (page cache plus handle state)
/// used for the resource estimate in enhanced stats.
const ESTIMATED_CONNECTION_BYTES: u64 = 2 * 1024 * 1024;

/// Health record for one tracked connection. One record per live
/// connection; replacement removes the record and creates a fresh one,
/// never mutates in place across identities.
#[derive(Debug, Clone)]
pub struct ConnectionHealth {
    pub id: u64,
    pub is_healthy: bool,
    pub last_check: Instant,
    pub success_count: u64,
    pub failure_count: u64,
    pub last_error: Option<String>,
    pub created_at: Instant,
    /// Set when the connection was used by a timed-out operation; its true
    /// completion state is unknown, so it must be probed before reuse.
    pub suspect: bool,
}

impl ConnectionHealth {
    fn new(id: u64) -> Self {
        let now = Instant::now();
        Self {
            id,
            is_healthy: true,
            last_check: now,
            success_count: 0,
            failure_count: 0,
            last_error: None,
            created_at: now,
            suspect: false,
        }
    }
}

/// Serializable view of a health record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionHealthSnapshot {
    pub id: u64,
    pub is_healthy: bool,
    pub success_count: u64,
    pub failure_count: u64,
    pub last_error: Option<String>,
    pub age_ms: u64,
    pub idle_ms: u64,
    pub suspect: bool,
}

impl From<&ConnectionHealth> for ConnectionHealthSnapshot {
    fn from(record: &ConnectionHealth) -> Self {
        Self {
            id: record.id,
            is_healthy: record.is_healthy,
            success_count: record.success_count,
            failure_count: record.failure_count,
            last_error: record.last_error.clone(),
            age_ms: record.created_at.elapsed().as_millis() as u64,
            idle_ms: record.last_check.elapsed().as_millis() as u64,
            suspect: record.suspect,
        }
    }
}

/// Overall pool health classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolHealthLevel {
    Optimal,
    Warning,
    Critical,
}

/// Result of a full health sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub level: PoolHealthLevel,
    /// Percentage of tracked connections that are healthy; 100 when none
    /// are tracked.
    pub health_rate: f64,
    pub healthy: usize,
    pub unhealthy: usize,
    pub connections: Vec<ConnectionHealthSnapshot>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HealthSummary {
    pub healthy: usize,
    pub unhealthy: usize,
    pub validating: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PerformanceSummary {
    pub avg_acquisition_time_ms: f64,
    pub peak_acquisition_time_ms: f64,
    pub total_wait_time_ms: f64,
    /// Fraction of acquisitions served without opening a new connection.
    pub reuse_rate: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ResourceSummary {
    /// Estimated, not measured: live connections times a nominal footprint.
    pub memory_usage_bytes: u64,
    /// One descriptor per live on-disk connection.
    pub file_descriptors: usize,
    pub idle_timeouts: u64,
}

/// Base counters plus the health summary.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PoolStats {
    pub counters: PoolCounters,
    pub health: HealthSummary,
}

/// Everything in [`PoolStats`] plus performance and resource estimates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EnhancedPoolStats {
    pub counters: PoolCounters,
    pub health: HealthSummary,
    pub performance: PerformanceSummary,
    pub resources: ResourceSummary,
}

/// Backoff delay for the given 1-based attempt:
/// `clamp(base * 2^(attempt-1), MIN_RETRY_DELAY, retry_max_delay_ms)`.
/// Non-decreasing in `attempt`.
pub fn retry_delay(attempt: u32, config: &ConnectionPoolConfig) -> Duration {
    let shift = attempt.saturating_sub(1).min(20);
    let exp = config.retry_base_delay_ms.saturating_mul(1u64 << shift);
    let floor = MIN_RETRY_DELAY.as_millis() as u64;
    let ceiling = config.retry_max_delay_ms.max(floor);
    Duration::from_millis(exp.max(floor).min(ceiling))
}

/// Self-healing connection pool.
pub struct ResilientPool {
    pool: Pool,
    config: ConnectionPoolConfig,
    health: DashMap<u64, ConnectionHealth>,
    total_wait_us: AtomicU64,
    peak_wait_us: AtomicU64,
    idle_timeouts: AtomicU64,
    validating: AtomicUsize,
    sweeps: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl ResilientPool {
    /// Build the pool, warm it up, and start the background sweeps.
    ///
    /// Warm-up is skipped for in-memory engines (ephemeral contexts) and for
    /// `min_connections == 0`; warm-up failures leave the pool cold but
    /// functional. Must be called from within a tokio runtime.
    pub fn new(mut storage: StorageConfig, config: ConnectionPoolConfig) -> Result<Arc<Self>> {
        config.validate()?;
        // The pool config is authoritative for capacity.
        storage.max_connections = config.max_connections;
        let warm = config.min_connections > 0 && !storage.is_in_memory();
        let pool = Pool::new(storage)?;

        let resilient = Arc::new(Self {
            pool,
            config,
            health: DashMap::new(),
            total_wait_us: AtomicU64::new(0),
            peak_wait_us: AtomicU64::new(0),
            idle_timeouts: AtomicU64::new(0),
            validating: AtomicUsize::new(0),
            sweeps: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        });

        if warm {
            resilient.warm_up();
        }
        resilient.spawn_sweeps();

        info!(
            min = resilient.config.min_connections,
            max = resilient.config.max_connections,
            "resilient pool initialized"
        );
        Ok(resilient)
    }

    /// Acquire a healthy connection within `retry_attempts + 1` tries.
    ///
    /// Each try acquires from the base pool (suspending FIFO when
    /// saturated), tracks the connection if new, and probes it. A failed
    /// probe replaces the connection and counts as a retryable failure.
    /// Non-retryable errors surface immediately; exhausting the budget
    /// yields [`ScoutError::AcquisitionExhausted`] carrying the last cause.
    pub async fn acquire(&self) -> Result<PooledConnection> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ScoutError::storage("pool is closed"));
        }

        let started = Instant::now();
        let max_attempts = self.config.retry_attempts + 1;
        let mut last_err: Option<ScoutError> = None;

        for attempt in 1..=max_attempts {
            match self.try_acquire_once().await {
                Ok(handle) => {
                    self.record_acquisition(started.elapsed());
                    return Ok(handle);
                }
                Err(e) if e.is_retryable() => {
                    warn!(attempt, max_attempts, error = %e, "acquisition attempt failed");
                    last_err = Some(e);
                    if attempt < max_attempts {
                        tokio::time::sleep(retry_delay(attempt, &self.config)).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }

        let source = last_err.unwrap_or_else(|| ScoutError::internal("no acquisition attempts ran"));
        Err(ScoutError::AcquisitionExhausted {
            attempts: max_attempts,
            source: Box::new(source),
        })
    }

    async fn try_acquire_once(&self) -> Result<PooledConnection> {
        let handle = self.pool.acquire().await?;
        let id = handle.id();

        if !self.health.contains_key(&id) {
            self.health.insert(id, ConnectionHealth::new(id));
        }

        match handle.conn().probe() {
            ProbeOutcome::Healthy => {
                if let Some(mut record) = self.health.get_mut(&id) {
                    record.is_healthy = true;
                    record.success_count += 1;
                    record.last_check = Instant::now();
                    record.last_error = None;
                    record.suspect = false;
                }
                Ok(handle)
            }
            ProbeOutcome::Unhealthy(reason) => {
                warn!(id, %reason, "connection failed probe; replacing");
                // Remove-then-create: the unhealthy identity disappears
                // entirely before its replacement is tracked.
                self.health.remove(&id);
                handle.discard();
                match self.pool.create_idle() {
                    Ok(Some(replacement)) => {
                        self.health
                            .insert(replacement.id(), ConnectionHealth::new(replacement.id()));
                    }
                    Ok(None) => debug!("replacement skipped; pool at capacity"),
                    Err(e) => debug!(error = %e, "replacement connection could not be opened"),
                }
                Err(ScoutError::health_check(reason))
            }
        }
    }

    /// Return a connection to the pool, resetting its idle clock.
    pub fn release(&self, handle: PooledConnection) {
        if let Some(mut record) = self.health.get_mut(&handle.id()) {
            record.last_check = Instant::now();
        }
        drop(handle);
    }

    /// Flag a connection whose last operation timed out. The engine call
    /// could not be interrupted, so its completion state is unknown; the
    /// connection is probed before it is ever handed out again (every
    /// acquisition probes, so a suspect connection can never skip the
    /// check).
    pub fn mark_suspect(&self, id: u64) {
        if let Some(mut record) = self.health.get_mut(&id) {
            record.suspect = true;
            debug!(id, "connection marked suspect");
        }
    }

    /// Probe every idle connection and classify overall pool health.
    ///
    /// Outstanding connections cannot be probed while in use; they keep
    /// their last known classification until released. With nothing
    /// tracked the pool reports 100% healthy. Also runs on the
    /// `validation_interval_ms` timer.
    pub fn perform_health_check(&self) -> HealthReport {
        let idle = self.pool.idle_snapshot();
        self.validating.store(idle.len(), Ordering::Relaxed);

        for conn in idle {
            let id = conn.id();
            let outcome = conn.probe();
            if !self.health.contains_key(&id) {
                self.health.insert(id, ConnectionHealth::new(id));
            }
            if let Some(mut record) = self.health.get_mut(&id) {
                match outcome {
                    ProbeOutcome::Healthy => {
                        record.is_healthy = true;
                        record.success_count += 1;
                        record.last_error = None;
                    }
                    ProbeOutcome::Unhealthy(reason) => {
                        record.is_healthy = false;
                        record.failure_count += 1;
                        record.last_error = Some(reason);
                    }
                }
            }
            self.validating.fetch_sub(1, Ordering::Relaxed);
        }
        self.validating.store(0, Ordering::Relaxed);

        let connections: Vec<ConnectionHealthSnapshot> = self
            .health
            .iter()
            .map(|entry| ConnectionHealthSnapshot::from(entry.value()))
            .collect();
        let total = connections.len();
        let healthy = connections.iter().filter(|c| c.is_healthy).count();
        let rate = if total == 0 {
            1.0
        } else {
            healthy as f64 / total as f64
        };
        let level = if rate >= WARNING_HEALTH_RATE {
            PoolHealthLevel::Optimal
        } else if rate >= CRITICAL_HEALTH_RATE {
            PoolHealthLevel::Warning
        } else {
            PoolHealthLevel::Critical
        };

        if level != PoolHealthLevel::Optimal {
            warn!(?level, healthy, total, "pool health degraded");
        }

        HealthReport {
            level,
            health_rate: rate * 100.0,
            healthy,
            unhealthy: total - healthy,
            connections,
        }
    }

    /// Replace idle connections that have sat untouched past the idle
    /// timeout. Prolonged idleness is treated as a latent-failure signal:
    /// the stale connection is closed and a fresh one takes its slot.
    fn cleanup_idle_connections(&self) {
        let idle_timeout = Duration::from_millis(self.config.idle_timeout_ms);
        let stale: Vec<u64> = self
            .health
            .iter()
            .filter(|entry| entry.last_check.elapsed() > idle_timeout)
            .map(|entry| entry.id)
            .collect();

        for id in stale {
            // Only parked connections can be refreshed; an outstanding one
            // gets its idle clock reset at release anyway.
            if self.pool.discard_idle(id) {
                self.health.remove(&id);
                self.idle_timeouts.fetch_add(1, Ordering::Relaxed);
                match self.pool.create_idle() {
                    Ok(Some(replacement)) => {
                        self.health
                            .insert(replacement.id(), ConnectionHealth::new(replacement.id()));
                        debug!(stale = id, fresh = replacement.id(), "idle connection refreshed");
                    }
                    Ok(None) => debug!(stale = id, "idle slot not refilled; pool at capacity"),
                    Err(e) => warn!(error = %e, "idle replacement could not be opened"),
                }
            }
        }
    }

    /// Eagerly create and park `min_connections` connections.
    /// Failures are logged and leave the pool cold but functional.
    pub fn warm_up(&self) {
        let target = self.config.min_connections;
        let mut created = 0usize;
        for _ in 0..target {
            match self.pool.create_idle() {
                Ok(Some(conn)) => {
                    self.health.insert(conn.id(), ConnectionHealth::new(conn.id()));
                    created += 1;
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, created, target, "warm-up failed; pool starts cold");
                    return;
                }
            }
        }
        info!(count = created, "connection pool warmed up");
    }

    fn spawn_sweeps(self: &Arc<Self>) {
        let health_interval = Duration::from_millis(self.config.validation_interval_ms.max(1));
        let idle_interval =
            Duration::from_millis((self.config.idle_timeout_ms / CLEANUP_CHECK_RATIO).max(1));

        let weak: Weak<Self> = Arc::downgrade(self);
        let health_task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(health_interval);
            interval.tick().await; // skip the immediate tick
            loop {
                interval.tick().await;
                let Some(pool) = weak.upgrade() else { break };
                pool.perform_health_check();
            }
        });

        let weak: Weak<Self> = Arc::downgrade(self);
        let idle_task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(idle_interval);
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(pool) = weak.upgrade() else { break };
                pool.cleanup_idle_connections();
            }
        });

        self.sweeps.lock().extend([health_task, idle_task]);
    }

    /// Shut the pool down: cancel both sweep timers first so no callback
    /// touches freed state, close every pooled connection, then clear the
    /// health index. Safe to call more than once.
    pub fn close_all(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        for task in self.sweeps.lock().drain(..) {
            task.abort();
        }
        self.pool.close_all();
        self.health.clear();
        info!("resilient pool closed");
    }

    fn record_acquisition(&self, elapsed: Duration) {
        let us = elapsed.as_micros() as u64;
        self.total_wait_us.fetch_add(us, Ordering::Relaxed);
        self.peak_wait_us.fetch_max(us, Ordering::Relaxed);
    }

    fn health_summary(&self) -> HealthSummary {
        let healthy = self.health.iter().filter(|e| e.is_healthy).count();
        let total = self.health.len();
        HealthSummary {
            healthy,
            unhealthy: total - healthy,
            validating: self.validating.load(Ordering::Relaxed),
        }
    }

    /// Base counters plus the health summary.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            counters: self.pool.counters(),
            health: self.health_summary(),
        }
    }

    /// Full derived statistics.
    pub fn enhanced_stats(&self) -> EnhancedPoolStats {
        let counters = self.pool.counters();
        let total_us = self.total_wait_us.load(Ordering::Relaxed);
        let peak_us = self.peak_wait_us.load(Ordering::Relaxed);
        let avg_ms = if counters.acquired > 0 {
            total_us as f64 / 1_000.0 / counters.acquired as f64
        } else {
            0.0
        };
        let reuse_rate = if counters.acquired > 0 {
            counters.acquired.saturating_sub(counters.created) as f64 / counters.acquired as f64
        } else {
            0.0
        };

        EnhancedPoolStats {
            counters,
            health: self.health_summary(),
            performance: PerformanceSummary {
                avg_acquisition_time_ms: avg_ms,
                peak_acquisition_time_ms: peak_us as f64 / 1_000.0,
                total_wait_time_ms: total_us as f64 / 1_000.0,
                reuse_rate,
            },
            resources: ResourceSummary {
                memory_usage_bytes: counters.size as u64 * ESTIMATED_CONNECTION_BYTES,
                file_descriptors: counters.size,
                idle_timeouts: self.idle_timeouts.load(Ordering::Relaxed),
            },
        }
    }

    /// Health record snapshot for one connection id.
    pub fn connection_health(&self, id: u64) -> Option<ConnectionHealthSnapshot> {
        self.health
            .get(&id)
            .map(|record| ConnectionHealthSnapshot::from(record.value()))
    }

    pub fn size(&self) -> usize {
        self.pool.size()
    }

    pub fn available(&self) -> usize {
        self.pool.available()
    }
}

impl Drop for ResilientPool {
    fn drop(&mut self) {
        for task in self.sweeps.lock().drain(..) {
            task.abort();
        }
    }
}
