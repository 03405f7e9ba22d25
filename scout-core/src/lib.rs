//! Core types shared across the Code-Scout data-access subsystem.
//!
//! This crate carries the error taxonomy and validated configuration types
//! that every other crate in the workspace builds on.

pub mod config;
pub mod error;

pub use config::{
    ConnectionPoolConfig, MemoryConfig, MonitoringConfig, PerformanceConfig, QueryCacheConfig,
    StorageConfig,
};
pub use error::{Result, ScoutError};
