//! A single session with the embedded storage engine.

use parking_lot::Mutex;
use rusqlite::OpenFlags;
use scout_core::{Result, ScoutError, StorageConfig};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

/// Process-wide connection identity counter. Health records are keyed by
/// these ids, never by reference equality.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Outcome of a health probe.
///
/// An explicit tag rather than an error: the acquisition loop branches on
/// this instead of catching failures for control flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Healthy,
    Unhealthy(String),
}

impl ProbeOutcome {
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }
}

/// One open session with the embedded engine.
///
/// Engine calls are synchronous and occupy the calling thread for their full
/// duration; the mutex serializes access to the underlying handle. A pool of
/// these bounds how many sessions exist for isolation and health tracking —
/// it does not provide parallel query execution on its own.
pub struct Connection {
    id: u64,
    inner: Mutex<rusqlite::Connection>,
    created_at: Instant,
    #[cfg(test)]
    poisoned: std::sync::atomic::AtomicBool,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("age", &self.created_at.elapsed())
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Open a new session against the configured engine path and apply
    /// pragmas. An unusable path is a fatal configuration error, never
    /// retried.
    pub fn open(config: &StorageConfig) -> Result<Self> {
        let raw = if config.is_in_memory() {
            rusqlite::Connection::open_in_memory()
                .map_err(|e| ScoutError::storage(format!("Failed to open in-memory engine: {e}")))?
        } else {
            let flags = if config.readonly {
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX
            } else {
                OpenFlags::default()
            };
            rusqlite::Connection::open_with_flags(&config.path, flags).map_err(|e| {
                ScoutError::storage(format!(
                    "Failed to open engine at {}: {e}",
                    config.path.display()
                ))
            })?
        };

        Self::apply_pragmas(&raw, config)?;

        let conn = Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            inner: Mutex::new(raw),
            created_at: Instant::now(),
            #[cfg(test)]
            poisoned: std::sync::atomic::AtomicBool::new(false),
        };

        debug!(id = conn.id, path = %config.path.display(), "connection opened");
        Ok(conn)
    }

    fn apply_pragmas(raw: &rusqlite::Connection, config: &StorageConfig) -> Result<()> {
        if !config.is_in_memory() && !config.readonly {
            // journal_mode returns a row, so it goes through query_row
            raw.query_row("PRAGMA journal_mode=WAL", [], |row| row.get::<_, String>(0))
                .map_err(|e| ScoutError::storage(format!("Failed to enable WAL: {e}")))?;
        }
        raw.pragma_update(None, "busy_timeout", 5_000)
            .map_err(|e| ScoutError::storage(format!("Failed to set busy_timeout: {e}")))?;
        raw.pragma_update(None, "foreign_keys", "ON")
            .map_err(|e| ScoutError::storage(format!("Failed to enable foreign_keys: {e}")))?;

        for (name, value) in &config.pragmas {
            raw.pragma_update(None, name, value).map_err(|e| {
                ScoutError::storage(format!("Failed to apply pragma {name}={value}: {e}"))
            })?;
        }
        Ok(())
    }

    /// Stable identity assigned at creation.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Time since this session was opened.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Force the next probes to fail, standing in for a session the engine
    /// has silently invalidated.
    #[cfg(test)]
    pub(crate) fn poison(&self) {
        self.poisoned.store(true, Ordering::Relaxed);
    }

    /// Minimal round-trip query confirming the session is still usable.
    pub fn probe(&self) -> ProbeOutcome {
        #[cfg(test)]
        if self.poisoned.load(Ordering::Relaxed) {
            return ProbeOutcome::Unhealthy("session invalidated".to_string());
        }
        let guard = self.inner.lock();
        match guard.query_row("SELECT 1", [], |row| row.get::<_, i64>(0)) {
            Ok(1) => ProbeOutcome::Healthy,
            Ok(other) => ProbeOutcome::Unhealthy(format!("unexpected probe result: {other}")),
            Err(e) => ProbeOutcome::Unhealthy(e.to_string()),
        }
    }

    /// Run a closure against the raw engine handle.
    ///
    /// The call is synchronous; the closure should do one unit of work and
    /// return, not park the thread.
    pub fn with_conn<T>(
        &self,
        f: impl FnOnce(&rusqlite::Connection) -> rusqlite::Result<T>,
    ) -> Result<T> {
        let guard = self.inner.lock();
        f(&guard).map_err(ScoutError::from)
    }
}
