//! Bounded connection pool over the embedded engine.
//!
//! This is the base layer: capacity enforcement, idle reuse, and lifecycle
//! counters. Health tracking, retries, and sweeps live in
//! [`crate::resilient`], composed on top of this type.

use crate::connection::Connection;
use crate::schema;
use parking_lot::Mutex;
use scout_core::{Result, ScoutError, StorageConfig};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;
use tracing::debug;

/// Snapshot of the base pool's authoritative counters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PoolCounters {
    pub created: u64,
    pub acquired: u64,
    pub released: u64,
    pub destroyed: u64,
    /// Live connections: idle plus outstanding.
    pub size: usize,
    /// Idle connections ready for reuse.
    pub available: usize,
    /// Callers currently suspended waiting for a permit.
    pub waiting: usize,
}

struct PoolState {
    config: StorageConfig,
    semaphore: Arc<Semaphore>,
    idle: Mutex<VecDeque<Arc<Connection>>>,
    created: AtomicU64,
    acquired: AtomicU64,
    released: AtomicU64,
    destroyed: AtomicU64,
    live: AtomicUsize,
    waiting: AtomicUsize,
    closed: AtomicBool,
}

/// Bounded set of connections. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Pool {
    state: Arc<PoolState>,
}

impl Pool {
    /// Create an empty pool. Connections open lazily on first acquire.
    pub fn new(config: StorageConfig) -> Result<Self> {
        config.validate()?;
        let max = config.max_connections;
        Ok(Self {
            state: Arc::new(PoolState {
                config,
                semaphore: Arc::new(Semaphore::new(max)),
                idle: Mutex::new(VecDeque::new()),
                created: AtomicU64::new(0),
                acquired: AtomicU64::new(0),
                released: AtomicU64::new(0),
                destroyed: AtomicU64::new(0),
                live: AtomicUsize::new(0),
                waiting: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Acquire a connection, suspending while the pool is saturated.
    ///
    /// Waiters are served in FIFO order (the semaphore queues fairly); the
    /// wait is bounded by `connection_timeout_ms`. Suspension here does not
    /// block unrelated async work elsewhere in the process.
    pub async fn acquire(&self) -> Result<PooledConnection> {
        let state = &self.state;
        if state.closed.load(Ordering::Acquire) {
            return Err(ScoutError::storage("pool is closed"));
        }

        state.waiting.fetch_add(1, Ordering::Relaxed);
        let permit = timeout(
            Duration::from_millis(state.config.connection_timeout_ms),
            state.semaphore.clone().acquire_owned(),
        )
        .await;
        state.waiting.fetch_sub(1, Ordering::Relaxed);

        let permit = permit
            .map_err(|_| ScoutError::timeout("connection acquisition timed out while pool saturated"))?
            .map_err(|_| ScoutError::internal("connection pool semaphore closed"))?;

        let conn = loop {
            if let Some(conn) = state.idle.lock().pop_front() {
                break conn;
            }
            if self.reserve_slot() {
                break self.open_reserved()?;
            }
            // Nothing idle and every live slot taken while we hold a permit:
            // a replacement is mid-flight between discard and park. Let it
            // land and re-check the idle list.
            tokio::task::yield_now().await;
        };

        state.acquired.fetch_add(1, Ordering::Relaxed);
        Ok(PooledConnection {
            conn,
            state: state.clone(),
            _permit: Some(permit),
            discarded: false,
        })
    }

    /// Claim a live-connection slot, failing when the pool is at capacity.
    fn reserve_slot(&self) -> bool {
        let max = self.state.config.max_connections;
        let mut live = self.state.live.load(Ordering::Acquire);
        while live < max {
            match self.state.live.compare_exchange_weak(
                live,
                live + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(observed) => live = observed,
            }
        }
        false
    }

    /// Open a connection into a slot already claimed by [`Self::reserve_slot`].
    /// Releases the slot if the open fails.
    fn open_reserved(&self) -> Result<Arc<Connection>> {
        let opened = Connection::open(&self.state.config).and_then(|conn| {
            if !self.state.config.readonly {
                schema::initialize(&conn)?;
            }
            Ok(conn)
        });
        match opened {
            Ok(conn) => {
                self.state.created.fetch_add(1, Ordering::Relaxed);
                Ok(Arc::new(conn))
            }
            Err(e) => {
                self.state.live.fetch_sub(1, Ordering::AcqRel);
                Err(e)
            }
        }
    }

    /// Open a fresh connection and park it idle (warm-up and replacement).
    ///
    /// Returns `Ok(None)` when the pool is already at capacity, so a
    /// replacement racing with acquirers can never push `size` past
    /// `max_connections`.
    pub fn create_idle(&self) -> Result<Option<Arc<Connection>>> {
        if !self.reserve_slot() {
            debug!("idle slot not opened; pool at capacity");
            return Ok(None);
        }
        let conn = self.open_reserved()?;
        self.state.idle.lock().push_back(conn.clone());
        Ok(Some(conn))
    }

    /// Remove and destroy the idle connection with the given id, if parked.
    /// Returns false when the connection is outstanding or unknown.
    pub fn discard_idle(&self, id: u64) -> bool {
        let removed = {
            let mut idle = self.state.idle.lock();
            let before = idle.len();
            idle.retain(|c| c.id() != id);
            before != idle.len()
        };
        if removed {
            self.state.destroyed.fetch_add(1, Ordering::Relaxed);
            self.state.live.fetch_sub(1, Ordering::Relaxed);
            debug!(id, "idle connection discarded");
        }
        removed
    }

    /// Connections currently parked idle.
    pub fn idle_snapshot(&self) -> Vec<Arc<Connection>> {
        self.state.idle.lock().iter().cloned().collect()
    }

    /// Close every idle connection and mark the pool closed. Outstanding
    /// handles are destroyed when their holders drop them instead of being
    /// parked back. Idempotent.
    pub fn close_all(&self) {
        self.state.closed.store(true, Ordering::Release);
        let drained: Vec<_> = self.state.idle.lock().drain(..).collect();
        if !drained.is_empty() {
            self.state
                .destroyed
                .fetch_add(drained.len() as u64, Ordering::Relaxed);
            self.state.live.fetch_sub(drained.len(), Ordering::Relaxed);
            debug!(count = drained.len(), "pool closed idle connections");
        }
    }

    pub fn size(&self) -> usize {
        self.state.live.load(Ordering::Relaxed)
    }

    pub fn available(&self) -> usize {
        self.state.idle.lock().len()
    }

    pub fn max_size(&self) -> usize {
        self.state.config.max_connections
    }

    /// Authoritative lifecycle counters.
    pub fn counters(&self) -> PoolCounters {
        PoolCounters {
            created: self.state.created.load(Ordering::Relaxed),
            acquired: self.state.acquired.load(Ordering::Relaxed),
            released: self.state.released.load(Ordering::Relaxed),
            destroyed: self.state.destroyed.load(Ordering::Relaxed),
            size: self.size(),
            available: self.available(),
            waiting: self.state.waiting.load(Ordering::Relaxed),
        }
    }
}

/// A connection checked out of the pool.
///
/// Dropping the handle returns the connection to the idle list and frees the
/// capacity permit; [`PooledConnection::discard`] destroys it instead (the
/// replacement path for failed probes).
pub struct PooledConnection {
    conn: Arc<Connection>,
    state: Arc<PoolState>,
    _permit: Option<OwnedSemaphorePermit>,
    discarded: bool,
}

impl PooledConnection {
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn id(&self) -> u64 {
        self.conn.id()
    }

    /// Destroy this connection instead of returning it to the pool.
    pub fn discard(mut self) {
        self.discarded = true;
        // Drop impl finishes the accounting.
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.conn.id())
            .field("discarded", &self.discarded)
            .finish_non_exhaustive()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if self.discarded || self.state.closed.load(Ordering::Acquire) {
            self.state.destroyed.fetch_add(1, Ordering::Relaxed);
            self.state.live.fetch_sub(1, Ordering::Relaxed);
            debug!(id = self.conn.id(), "connection destroyed");
        } else {
            self.state.idle.lock().push_back(self.conn.clone());
            self.state.released.fetch_add(1, Ordering::Relaxed);
        }
        // The permit drops after the connection is parked, so a waiter that
        // wakes on the freed permit always finds the idle entry.
    }
}
