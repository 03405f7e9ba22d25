//! Cross-crate pool behavior against an on-disk database.

use code_scout_integration_tests::init_test_logging;
use scout_core::{ConnectionPoolConfig, ScoutError, StorageConfig};
use scout_storage::ResilientPool;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn disk_config(dir: &TempDir, max: usize) -> StorageConfig {
    StorageConfig {
        path: dir.path().join("scout.db"),
        max_connections: max,
        connection_timeout_ms: 300,
        ..Default::default()
    }
}

fn pool_config(min: usize, max: usize) -> ConnectionPoolConfig {
    ConnectionPoolConfig {
        min_connections: min,
        max_connections: max,
        idle_timeout_ms: 60_000,
        validation_interval_ms: 60_000,
        retry_attempts: 1,
        retry_base_delay_ms: 50,
        retry_max_delay_ms: 200,
    }
}

fn resilient(dir: &TempDir, min: usize, max: usize) -> Arc<ResilientPool> {
    ResilientPool::new(disk_config(dir, max), pool_config(min, max)).unwrap()
}

#[tokio::test]
async fn sixth_acquire_pends_until_a_release() {
    init_test_logging();
    let dir = TempDir::new().unwrap();
    let pool = resilient(&dir, 0, 5);

    let mut held = Vec::new();
    for _ in 0..5 {
        held.push(pool.acquire().await.unwrap());
    }
    assert_eq!(pool.size(), 5);

    let pool2 = pool.clone();
    let sixth = tokio::spawn(async move { pool2.acquire().await });

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!sixth.is_finished(), "sixth caller should still be pending");

    pool.release(held.pop().unwrap());
    let handle = sixth.await.unwrap().unwrap();
    assert!(pool.size() <= 5);

    pool.release(handle);
    for h in held {
        pool.release(h);
    }
}

#[tokio::test]
async fn size_never_exceeds_max_under_contention() {
    init_test_logging();
    let dir = TempDir::new().unwrap();
    let pool = ResilientPool::new(
        StorageConfig {
            path: dir.path().join("scout.db"),
            max_connections: 5,
            connection_timeout_ms: 5_000,
            ..Default::default()
        },
        pool_config(0, 5),
    )
    .unwrap();

    let mut tasks = Vec::new();
    for _ in 0..20 {
        let pool = pool.clone();
        tasks.push(tokio::spawn(async move {
            let handle = pool.acquire().await.unwrap();
            assert!(pool.size() <= 5);
            tokio::time::sleep(Duration::from_millis(10)).await;
            pool.release(handle);
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let counters = pool.stats().counters;
    assert!(counters.created <= 5);
    assert_eq!(counters.acquired, 20);
    assert_eq!(counters.released, 20);
}

#[tokio::test]
async fn warm_up_parks_min_connections() {
    init_test_logging();
    let dir = TempDir::new().unwrap();
    let pool = resilient(&dir, 3, 5);

    assert_eq!(pool.available(), 3);
    assert_eq!(pool.stats().counters.created, 3);
}

#[tokio::test]
async fn acquire_release_restores_availability() {
    init_test_logging();
    let dir = TempDir::new().unwrap();
    let pool = resilient(&dir, 0, 3);

    let handle = pool.acquire().await.unwrap();
    let before = pool.available();
    pool.release(handle);

    assert_eq!(pool.available(), before + 1);
    assert!(pool.available() <= pool.size());
}

#[tokio::test]
async fn exhaustion_surfaces_terminal_error() {
    init_test_logging();
    let dir = TempDir::new().unwrap();
    let pool = resilient(&dir, 0, 1);

    let _held = pool.acquire().await.unwrap();
    let err = pool.acquire().await.unwrap_err();

    match err {
        ScoutError::AcquisitionExhausted { attempts, .. } => assert_eq!(attempts, 2),
        other => panic!("expected AcquisitionExhausted, got {other:?}"),
    }
}

#[tokio::test]
async fn reuse_shows_up_in_enhanced_stats() {
    init_test_logging();
    let dir = TempDir::new().unwrap();
    let pool = resilient(&dir, 0, 2);

    for _ in 0..4 {
        let handle = pool.acquire().await.unwrap();
        pool.release(handle);
    }

    let stats = pool.enhanced_stats();
    assert_eq!(stats.counters.created, 1);
    assert_eq!(stats.counters.acquired, 4);
    assert!(stats.performance.reuse_rate > 0.0);
    assert!(stats.performance.avg_acquisition_time_ms >= 0.0);
    assert!(stats.resources.memory_usage_bytes > 0);
}

#[tokio::test]
async fn health_check_reports_optimal_when_probes_pass() {
    init_test_logging();
    let dir = TempDir::new().unwrap();
    let pool = resilient(&dir, 2, 4);

    let report = pool.perform_health_check();
    assert_eq!(report.healthy, 2);
    assert_eq!(report.unhealthy, 0);
    assert!((report.health_rate - 100.0).abs() < f64::EPSILON);
    assert_eq!(report.level, scout_storage::PoolHealthLevel::Optimal);
}

#[tokio::test]
async fn close_all_twice_leaves_empty_pool() {
    init_test_logging();
    let dir = TempDir::new().unwrap();
    let pool = resilient(&dir, 2, 4);

    pool.close_all();
    assert_eq!(pool.size(), 0);

    // Second call is a no-op, not an error.
    pool.close_all();
    assert_eq!(pool.size(), 0);

    let err = pool.acquire().await.unwrap_err();
    assert!(matches!(err, ScoutError::Storage(_)));
}
