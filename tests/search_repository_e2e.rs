//! End-to-end search repository behavior against an on-disk database.

use code_scout_integration_tests::init_test_logging;
use scout_core::{ConnectionPoolConfig, PerformanceConfig, QueryCacheConfig, StorageConfig};
use scout_search::{
    MaintenanceOperation, RebuildOptions, RebuildPhase, RebuildProgress, SearchOptions,
    SearchRepository, SuggestionKind,
};
use scout_storage::ResilientPool;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

async fn seeded_stack() -> (TempDir, Arc<ResilientPool>, SearchRepository) {
    init_test_logging();
    let dir = TempDir::new().unwrap();
    let storage = StorageConfig {
        path: dir.path().join("scout.db"),
        max_connections: 2,
        connection_timeout_ms: 1_000,
        ..Default::default()
    };
    let pool_config = ConnectionPoolConfig {
        min_connections: 0,
        max_connections: 2,
        ..Default::default()
    };
    let pool = ResilientPool::new(storage, pool_config).unwrap();

    let handle = pool.acquire().await.unwrap();
    handle
        .conn()
        .with_conn(|c| {
            c.execute_batch(
                "INSERT INTO documents (id, path, filename, language, extension, size, modified_at) VALUES \
                     (1, 'src/main.rs', 'main.rs', 'rust', 'rs', 1500, 1700000000), \
                     (2, 'src/server.rs', 'server.rs', 'rust', 'rs', 4200, 1700000500), \
                     (3, 'scripts/deploy.py', 'deploy.py', 'python', 'py', 900, 1700001000); \
                 INSERT INTO document_index (rowid, filename, path, definitions, imports, docstrings, tags) VALUES \
                     (1, 'main.rs', 'src/main.rs', 'fn main', 'use tokio', 'binary entry point', 'rust cli'), \
                     (2, 'server.rs', 'src/server.rs', 'fn serve fn shutdown', 'use tokio use axum', \
                      'async http server', 'rust server async'), \
                     (3, 'deploy.py', 'scripts/deploy.py', 'def deploy def rollback', 'import boto3', \
                      'deployment automation', 'python deploy ops');",
            )
        })
        .unwrap();
    pool.release(handle);

    let config = PerformanceConfig {
        query_cache: QueryCacheConfig {
            enabled: true,
            max_size: 100,
            ttl_ms: 60_000,
        },
        ..Default::default()
    };
    let repo = SearchRepository::new(pool.clone(), &config);
    (dir, pool, repo)
}

#[tokio::test]
async fn tag_search_ranks_and_snippets() {
    let (_dir, _pool, repo) = seeded_stack().await;

    let results = repo
        .search_by_tags(&["rust".to_string()], &SearchOptions::default())
        .await
        .unwrap();
    assert_eq!(results.len(), 2);
    for candidate in results.iter() {
        assert!(candidate.score > 0.0);
        assert!(!candidate.matches.is_empty());
        assert_eq!(candidate.metadata.get("language").unwrap(), "rust");
        for m in &candidate.matches {
            assert!(!m.snippet.contains('\u{e000}'));
            assert!(m.end_position >= m.start_position);
        }
    }
}

#[tokio::test]
async fn validation_rejections() {
    let (_dir, _pool, repo) = seeded_stack().await;
    let options = SearchOptions::default();

    assert!(repo.search_by_tags(&[], &options).await.is_err());

    let six: Vec<String> = ["a", "b", "c", "d", "e", "f"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    assert!(repo.search_by_tags(&six, &options).await.is_err());

    assert!(repo
        .search_by_tags(&[String::new()], &options)
        .await
        .is_err());
}

#[tokio::test]
async fn identical_searches_share_one_query_execution() {
    let (_dir, pool, repo) = seeded_stack().await;
    let options = SearchOptions {
        limit: Some(10),
        ..Default::default()
    };
    let tags = vec!["test".to_string()];

    repo.search_by_tags(&tags, &options).await.unwrap();
    let acquired = pool.stats().counters.acquired;

    repo.search_by_tags(&tags, &options).await.unwrap();
    assert_eq!(
        pool.stats().counters.acquired,
        acquired,
        "second identical search must not touch the pool"
    );
    assert!((repo.stats().cache_hit_rate - 50.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn text_search_with_filters_and_pagination() {
    let (_dir, _pool, repo) = seeded_stack().await;

    let rust_only = repo
        .search_by_text(
            "tokio server deploy",
            &SearchOptions {
                language: Some("rust".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(rust_only.iter().all(|c| c.metadata["language"] == "rust"));
    assert!(!rust_only.is_empty());

    let page_one = repo
        .search_by_text(
            "tokio server deploy",
            &SearchOptions {
                limit: Some(1),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(page_one.len(), 1);

    let page_two = repo
        .search_by_text(
            "tokio server deploy",
            &SearchOptions {
                limit: Some(1),
                offset: Some(1),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(page_two.len(), 1);
    assert_ne!(page_one[0].id, page_two[0].id);
}

#[tokio::test]
async fn size_and_date_filters_narrow_results() {
    let (_dir, _pool, repo) = seeded_stack().await;

    let big_files = repo
        .search_by_tags(
            &["rust".to_string()],
            &SearchOptions {
                min_size: Some(2_000),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(big_files.len(), 1);
    assert_eq!(big_files[0].filename, "server.rs");

    let older = repo
        .search_by_tags(
            &["rust".to_string()],
            &SearchOptions {
                modified_before: Some(1_700_000_100),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(older.len(), 1);
    assert_eq!(older[0].filename, "main.rs");
}

#[tokio::test]
async fn suggestions_are_typed_and_ranked() {
    let (_dir, _pool, repo) = seeded_stack().await;

    let suggestions = repo.get_suggestions("ru", 10).await.unwrap();
    let rust = suggestions
        .iter()
        .find(|s| s.text == "rust")
        .expect("rust should be suggested");
    assert_eq!(rust.kind, SuggestionKind::Tag);
    assert!(rust.score >= 2.0, "rust appears in two documents");
}

#[tokio::test]
async fn rebuild_reports_progress_and_counts() {
    let (_dir, _pool, repo) = seeded_stack().await;
    let milestones: Arc<Mutex<Vec<RebuildProgress>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = milestones.clone();

    let result = repo
        .rebuild_index(RebuildOptions {
            progress: Some(Arc::new(move |p| {
                if let Ok(mut seen) = sink.lock() {
                    seen.push(p);
                }
            })),
        })
        .await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.documents_processed, Some(3));
    assert!(result.size_after.is_some());

    let phases: Vec<RebuildPhase> = milestones.lock().unwrap().iter().map(|p| p.phase).collect();
    assert_eq!(
        phases,
        vec![
            RebuildPhase::Start,
            RebuildPhase::Rebuilding,
            RebuildPhase::Complete
        ]
    );
}

#[tokio::test]
async fn maintenance_failure_is_a_result_not_an_error() {
    let (_dir, pool, repo) = seeded_stack().await;

    let handle = pool.acquire().await.unwrap();
    handle
        .conn()
        .with_conn(|c| c.execute_batch("DROP TABLE document_index"))
        .unwrap();
    pool.release(handle);

    let result = repo.rebuild_index(RebuildOptions::default()).await;
    assert!(!result.success);
    assert_eq!(result.operation, MaintenanceOperation::Rebuild);
    assert!(result.error.is_some());
}

#[tokio::test]
async fn maintenance_pipeline_runs_every_step() {
    let (_dir, _pool, repo) = seeded_stack().await;

    let optimize = repo.optimize_index().await;
    let analyze = repo.analyze_index().await;
    let check = repo.check_index().await;

    assert!(optimize.success, "{:?}", optimize.error);
    assert!(analyze.success, "{:?}", analyze.error);
    assert!(check.success, "{:?}", check.error);
    assert_eq!(optimize.operation, MaintenanceOperation::Optimize);
    assert_eq!(analyze.operation, MaintenanceOperation::Analyze);
    assert_eq!(check.operation, MaintenanceOperation::Check);
}
