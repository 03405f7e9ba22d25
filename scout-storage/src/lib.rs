//! Storage layer for Code-Scout over an embedded SQLite engine.
//!
//! This crate provides the bounded connection pool, the resilience layer
//! composed on top of it (health tracking, retries, background sweeps), the
//! circuit breaker, and the schema the search index runs against.

pub mod circuit_breaker;
pub mod connection;
pub mod pool;
pub mod resilient;
pub mod schema;

pub use circuit_breaker::{BreakerState, BreakerStats, CircuitBreaker, CircuitBreakerConfig};
pub use connection::{Connection, ProbeOutcome};
pub use pool::{Pool, PoolCounters, PooledConnection};
pub use resilient::{
    ConnectionHealthSnapshot, EnhancedPoolStats, HealthReport, HealthSummary,
    PerformanceSummary, PoolHealthLevel, PoolStats, ResilientPool, ResourceSummary,
};

/// Commonly used types.
pub mod prelude {
    pub use crate::circuit_breaker::{BreakerState, CircuitBreaker, CircuitBreakerConfig};
    pub use crate::pool::{Pool, PooledConnection};
    pub use crate::resilient::ResilientPool;
}
