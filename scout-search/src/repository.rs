//! Ranked full-text search over the document index.
//!
//! Every query flows cache-first: fingerprint lookup, then (on miss) a
//! connection from the resilient pool, the FTS5 match query, row mapping
//! into ranked candidates with per-field snippets, and a cache store on the
//! way out. Index maintenance runs through the same pool but reports
//! failures in its result object instead of returning `Err`.

use crate::cache::ResultCache;
use crate::tags;
use crate::types::{
    IndexMaintenanceResult, MaintenanceOperation, MatchField, ProgressCallback, RebuildOptions,
    RebuildPhase, RebuildProgress, SearchCandidate, SearchMatch, SearchOptions, SearchStats,
    Suggestion, SuggestionKind,
};
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::types::Value;
use scout_core::{PerformanceConfig, Result, ScoutError};
use scout_storage::ResilientPool;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const DEFAULT_LIMIT: usize = 50;
const MAX_TAGS: usize = 5;
const MAX_TAG_LEN: usize = 100;
const MAX_QUERY_LEN: usize = 1000;
const MAX_PREFIX_LEN: usize = 100;

/// Snippet highlight delimiters. Private-use codepoints so they can never
/// collide with indexed source text; stripped out during mapping.
const HIGHLIGHT_OPEN: char = '\u{e000}';
const HIGHLIGHT_CLOSE: char = '\u{e001}';
const SNIPPET_TOKENS: usize = 12;

/// Queries are parameterized; this is defense in depth against strings that
/// are obviously trying to be SQL rather than search terms.
static DESTRUCTIVE_SQL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(;|--|/\*|\b(?:drop|delete|insert|alter|truncate)\s+(?:table|from|into|index|view|trigger)\b|\bupdate\s+\w+\s+set\b|\bunion\s+select\b)",
    )
    .expect("static pattern")
});

/// Search repository over the resilient pool.
pub struct SearchRepository {
    pool: Arc<ResilientPool>,
    cache: ResultCache,
    slow_query_threshold: Duration,
    total_searches: AtomicU64,
    total_search_time_us: AtomicU64,
    slow_queries: AtomicU64,
}

impl SearchRepository {
    pub fn new(pool: Arc<ResilientPool>, config: &PerformanceConfig) -> Self {
        Self {
            pool,
            cache: ResultCache::new(&config.query_cache),
            slow_query_threshold: Duration::from_millis(config.monitoring.slow_query_threshold_ms),
            total_searches: AtomicU64::new(0),
            total_search_time_us: AtomicU64::new(0),
            slow_queries: AtomicU64::new(0),
        }
    }

    /// Search documents by tags, broadened with known aliases.
    ///
    /// Accepts 1–5 tags, each non-empty and at most 100 characters;
    /// violations surface as [`ScoutError::Validation`] naming the exact
    /// field.
    pub async fn search_by_tags(
        &self,
        tags: &[String],
        options: &SearchOptions,
    ) -> Result<Arc<Vec<SearchCandidate>>> {
        validate_tags(tags)?;
        let terms = tags::expand_tags(tags);
        let match_expr = terms
            .iter()
            .map(|t| format!("tags:{}", quote_term(t)))
            .collect::<Vec<_>>()
            .join(" OR ");
        self.run_search("tags", match_expr, terms, options).await
    }

    /// Free-text search across every indexed field.
    pub async fn search_by_text(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Arc<Vec<SearchCandidate>>> {
        validate_text(query)?;
        let terms: Vec<String> = query.split_whitespace().map(str::to_string).collect();
        let match_expr = terms
            .iter()
            .map(|t| quote_term(t))
            .collect::<Vec<_>>()
            .join(" OR ");
        self.run_search("text", match_expr, terms, options).await
    }

    async fn run_search(
        &self,
        kind: &str,
        match_expr: String,
        terms: Vec<String>,
        options: &SearchOptions,
    ) -> Result<Arc<Vec<SearchCandidate>>> {
        let started = Instant::now();
        let key = ResultCache::fingerprint(kind, &terms, options);

        if let Some(cached) = self.cache.get(&key) {
            self.record_search(kind, &match_expr, started.elapsed());
            return Ok(cached);
        }

        let handle = self.pool.acquire().await?;
        let (sql, params) = build_search_sql(&match_expr, options);
        let query_result = handle.conn().with_conn(|c| {
            let mut stmt = c.prepare(&sql)?;
            let rows = stmt.query_map(rusqlite::params_from_iter(params.iter()), |row| {
                map_candidate(row, &terms)
            })?;
            rows.collect::<rusqlite::Result<Vec<SearchCandidate>>>()
        });
        self.pool.release(handle);

        let candidates = Arc::new(query_result?);
        self.cache.insert(key, candidates.clone());
        self.record_search(kind, &match_expr, started.elapsed());
        debug!(kind, hits = candidates.len(), "search executed");
        Ok(candidates)
    }

    /// Typed completions for a search prefix, drawn from the tag, filename,
    /// definition, and import vocabularies, most frequent first.
    pub async fn get_suggestions(&self, prefix: &str, limit: usize) -> Result<Vec<Suggestion>> {
        if prefix.is_empty() {
            return Err(ScoutError::validation("prefix", "must be a non-empty string"));
        }
        if prefix.chars().count() > MAX_PREFIX_LEN {
            return Err(ScoutError::validation(
                "prefix",
                format!("must be at most {MAX_PREFIX_LEN} characters"),
            ));
        }
        if limit == 0 {
            return Ok(Vec::new());
        }

        let pattern = format!("{}%", escape_like(&prefix.to_lowercase()));
        let handle = self.pool.acquire().await?;
        let query_result = handle.conn().with_conn(|c| {
            let mut stmt = c.prepare(
                "SELECT term, col, doc FROM document_terms \
                 WHERE term LIKE ?1 ESCAPE '\\' \
                   AND col IN ('tags', 'filename', 'definitions', 'imports') \
                 ORDER BY doc DESC, term ASC LIMIT ?2",
            )?;
            let rows = stmt.query_map(rusqlite::params![pattern, limit as i64], |row| {
                let text: String = row.get(0)?;
                let col: String = row.get(1)?;
                let doc: i64 = row.get(2)?;
                Ok((text, col, doc))
            })?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        });
        self.pool.release(handle);

        let suggestions = query_result?
            .into_iter()
            .filter_map(|(text, col, doc)| {
                let kind = match col.as_str() {
                    "tags" => SuggestionKind::Tag,
                    "filename" => SuggestionKind::Filename,
                    "definitions" => SuggestionKind::Definition,
                    "imports" => SuggestionKind::Import,
                    _ => return None,
                };
                Some(Suggestion {
                    text,
                    kind,
                    score: doc as f64,
                })
            })
            .collect();
        Ok(suggestions)
    }

    /// Rebuild the full-text index from scratch, reporting milestones to the
    /// caller's progress callback. Failures land in the result object.
    pub async fn rebuild_index(&self, options: RebuildOptions) -> IndexMaintenanceResult {
        let started = Instant::now();
        report_progress(&options.progress, RebuildPhase::Start, 0);

        let outcome = self.run_rebuild(&options.progress).await;
        let duration_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok((docs_before, docs_after, size_before, size_after)) => {
                report_progress(&options.progress, RebuildPhase::Complete, 100);
                self.cache.clear();
                info!(docs_before, docs_after, duration_ms, "index rebuilt");
                IndexMaintenanceResult {
                    success: true,
                    operation: MaintenanceOperation::Rebuild,
                    duration_ms,
                    documents_processed: Some(docs_after),
                    size_before: Some(size_before),
                    size_after: Some(size_after),
                    error: None,
                    warnings: Vec::new(),
                }
            }
            Err(e) => {
                warn!(error = %e, "index rebuild failed");
                IndexMaintenanceResult::failure(
                    MaintenanceOperation::Rebuild,
                    duration_ms,
                    e.to_string(),
                )
            }
        }
    }

    async fn run_rebuild(
        &self,
        progress: &Option<ProgressCallback>,
    ) -> Result<(u64, u64, u64, u64)> {
        let handle = self.pool.acquire().await?;
        let result = (|| {
            let conn = handle.conn();
            let docs_before = count_indexed(conn)?;
            let size_before = database_size(conn)?;

            report_progress(progress, RebuildPhase::Rebuilding, 50);
            conn.with_conn(|c| {
                c.execute("INSERT INTO document_index(document_index) VALUES('rebuild')", [])
            })?;

            let docs_after = count_indexed(conn)?;
            let size_after = database_size(conn)?;
            Ok((docs_before, docs_after, size_before, size_after))
        })();
        self.pool.release(handle);
        result
    }

    /// Merge the index b-trees and refresh planner statistics.
    pub async fn optimize_index(&self) -> IndexMaintenanceResult {
        let result = self
            .run_maintenance(MaintenanceOperation::Optimize, |conn| {
                conn.with_conn(|c| {
                    c.execute(
                        "INSERT INTO document_index(document_index) VALUES('optimize')",
                        [],
                    )?;
                    c.execute_batch("ANALYZE")
                })
            })
            .await;
        if result.success {
            self.cache.clear();
        }
        result
    }

    /// Refresh planner statistics only.
    pub async fn analyze_index(&self) -> IndexMaintenanceResult {
        self.run_maintenance(MaintenanceOperation::Analyze, |conn| {
            conn.with_conn(|c| c.execute_batch("ANALYZE"))
        })
        .await
    }

    /// Verify the index against its content.
    pub async fn check_index(&self) -> IndexMaintenanceResult {
        self.run_maintenance(MaintenanceOperation::Check, |conn| {
            conn.with_conn(|c| {
                c.execute(
                    "INSERT INTO document_index(document_index) VALUES('integrity-check')",
                    [],
                )
                .map(|_| ())
            })
        })
        .await
    }

    async fn run_maintenance(
        &self,
        operation: MaintenanceOperation,
        op: impl FnOnce(&scout_storage::Connection) -> Result<()>,
    ) -> IndexMaintenanceResult {
        let started = Instant::now();
        let outcome = match self.pool.acquire().await {
            Ok(handle) => {
                let result = op(handle.conn());
                self.pool.release(handle);
                result
            }
            Err(e) => Err(e),
        };
        let duration_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(()) => {
                info!(operation = operation.as_str(), duration_ms, "index maintenance complete");
                IndexMaintenanceResult {
                    success: true,
                    operation,
                    duration_ms,
                    documents_processed: None,
                    size_before: None,
                    size_after: None,
                    error: None,
                    warnings: Vec::new(),
                }
            }
            Err(e) => {
                warn!(operation = operation.as_str(), error = %e, "index maintenance failed");
                IndexMaintenanceResult::failure(operation, duration_ms, e.to_string())
            }
        }
    }

    /// Running totals since construction.
    pub fn stats(&self) -> SearchStats {
        let total = self.total_searches.load(Ordering::Relaxed);
        let total_us = self.total_search_time_us.load(Ordering::Relaxed);
        let avg_search_time_ms = if total > 0 {
            total_us as f64 / total as f64 / 1000.0
        } else {
            0.0
        };
        SearchStats {
            total_searches: total,
            avg_search_time_ms,
            cache_hit_rate: self.cache.hit_rate(),
            slow_queries: self.slow_queries.load(Ordering::Relaxed),
        }
    }

    /// Drop every cached result set.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    fn record_search(&self, kind: &str, match_expr: &str, elapsed: Duration) {
        self.total_searches.fetch_add(1, Ordering::Relaxed);
        self.total_search_time_us
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
        if elapsed > self.slow_query_threshold {
            self.slow_queries.fetch_add(1, Ordering::Relaxed);
            warn!(
                kind,
                match_expr,
                elapsed_ms = elapsed.as_millis() as u64,
                "slow search query"
            );
        }
    }
}

fn validate_tags(tags: &[String]) -> Result<()> {
    if tags.is_empty() {
        return Err(ScoutError::validation("tags", "at least one tag is required"));
    }
    if tags.len() > MAX_TAGS {
        return Err(ScoutError::validation(
            "tags",
            format!("at most {MAX_TAGS} tags are allowed"),
        ));
    }
    for (i, tag) in tags.iter().enumerate() {
        if tag.is_empty() {
            return Err(ScoutError::validation(
                format!("tags[{i}]"),
                "must be a non-empty string",
            ));
        }
        if tag.chars().count() > MAX_TAG_LEN {
            return Err(ScoutError::validation(
                format!("tags[{i}]"),
                format!("must be at most {MAX_TAG_LEN} characters"),
            ));
        }
    }
    Ok(())
}

fn validate_text(query: &str) -> Result<()> {
    if query.trim().is_empty() {
        return Err(ScoutError::validation("query", "must be a non-empty string"));
    }
    if query.chars().count() > MAX_QUERY_LEN {
        return Err(ScoutError::validation(
            "query",
            format!("must be at most {MAX_QUERY_LEN} characters"),
        ));
    }
    if DESTRUCTIVE_SQL.is_match(query) {
        return Err(ScoutError::validation(
            "query",
            "contains disallowed SQL patterns",
        ));
    }
    Ok(())
}

/// Quote a term for an FTS5 match expression.
fn quote_term(term: &str) -> String {
    format!("\"{}\"", term.replace('"', "\"\""))
}

/// Escape LIKE wildcards; pairs with `ESCAPE '\'`.
fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

/// Assemble the match query. Column layout: id, path, filename, rank, six
/// per-field snippets, then metadata columns.
fn build_search_sql(match_expr: &str, options: &SearchOptions) -> (String, Vec<Value>) {
    let mut sql = String::from("SELECT d.id, d.path, d.filename, bm25(document_index) AS rank");
    for col in 0..MatchField::ALL.len() {
        sql.push_str(&format!(
            ", snippet(document_index, {col}, '{HIGHLIGHT_OPEN}', '{HIGHLIGHT_CLOSE}', '…', {SNIPPET_TOKENS})"
        ));
    }
    sql.push_str(
        ", d.language, d.extension, d.size, d.modified_at \
         FROM document_index \
         JOIN documents d ON d.id = document_index.rowid \
         WHERE document_index MATCH ?1",
    );
    let mut params: Vec<Value> = vec![Value::Text(match_expr.to_string())];

    if let Some(language) = &options.language {
        params.push(Value::Text(language.clone()));
        sql.push_str(&format!(" AND d.language = ?{}", params.len()));
    }
    if let Some(extension) = &options.extension {
        params.push(Value::Text(extension.clone()));
        sql.push_str(&format!(" AND d.extension = ?{}", params.len()));
    }
    if let Some(fragment) = &options.path_contains {
        params.push(Value::Text(fragment.clone()));
        sql.push_str(&format!(" AND instr(d.path, ?{}) > 0", params.len()));
    }
    if let Some(min_size) = options.min_size {
        params.push(Value::Integer(min_size));
        sql.push_str(&format!(" AND d.size >= ?{}", params.len()));
    }
    if let Some(max_size) = options.max_size {
        params.push(Value::Integer(max_size));
        sql.push_str(&format!(" AND d.size <= ?{}", params.len()));
    }
    if let Some(after) = options.modified_after {
        params.push(Value::Integer(after));
        sql.push_str(&format!(" AND d.modified_at >= ?{}", params.len()));
    }
    if let Some(before) = options.modified_before {
        params.push(Value::Integer(before));
        sql.push_str(&format!(" AND d.modified_at <= ?{}", params.len()));
    }
    if let Some(min_score) = options.min_score {
        // bm25 ranks are negative; score is the negation.
        params.push(Value::Real(min_score));
        sql.push_str(&format!(" AND -bm25(document_index) >= ?{}", params.len()));
    }

    sql.push_str(" ORDER BY rank");

    let mut limit = options.limit.unwrap_or(DEFAULT_LIMIT);
    if options.over_retrieve {
        limit *= 2;
    }
    params.push(Value::Integer(limit as i64));
    sql.push_str(&format!(" LIMIT ?{}", params.len()));
    if let Some(offset) = options.offset {
        params.push(Value::Integer(offset as i64));
        sql.push_str(&format!(" OFFSET ?{}", params.len()));
    }

    (sql, params)
}

fn map_candidate(row: &rusqlite::Row<'_>, terms: &[String]) -> rusqlite::Result<SearchCandidate> {
    let id: i64 = row.get(0)?;
    let path: String = row.get(1)?;
    let filename: String = row.get(2)?;
    let rank: f64 = row.get(3)?;

    let mut matches = Vec::new();
    for (idx, field) in MatchField::ALL.iter().enumerate() {
        let raw: String = row.get(4 + idx)?;
        if let Some((snippet, start, end)) = parse_snippet(&raw) {
            matches.push(SearchMatch {
                field: *field,
                snippet,
                start_position: start,
                end_position: end,
                terms: terms.to_vec(),
            });
        }
    }

    let mut metadata = std::collections::HashMap::new();
    if let Some(language) = row.get::<_, Option<String>>(10)? {
        metadata.insert("language".to_string(), language);
    }
    if let Some(extension) = row.get::<_, Option<String>>(11)? {
        metadata.insert("extension".to_string(), extension);
    }
    metadata.insert("size".to_string(), row.get::<_, i64>(12)?.to_string());
    metadata.insert(
        "modified_at".to_string(),
        row.get::<_, i64>(13)?.to_string(),
    );

    Ok(SearchCandidate {
        id,
        path,
        filename,
        score: -rank,
        matches,
        metadata,
    })
}

/// Strip highlight markers from a raw snippet, returning the clean text and
/// the byte span of the first highlighted region. `None` when the field
/// produced no highlight.
fn parse_snippet(raw: &str) -> Option<(String, usize, usize)> {
    let open = raw.find(HIGHLIGHT_OPEN)?;
    let close_in_raw = raw[open..].find(HIGHLIGHT_CLOSE)? + open;

    let clean: String = raw
        .chars()
        .filter(|c| *c != HIGHLIGHT_OPEN && *c != HIGHLIGHT_CLOSE)
        .collect();
    let start = open;
    let end = close_in_raw - HIGHLIGHT_OPEN.len_utf8();
    Some((clean, start, end))
}

fn count_indexed(conn: &scout_storage::Connection) -> Result<u64> {
    conn.with_conn(|c| {
        c.query_row("SELECT COUNT(*) FROM document_index", [], |row| {
            row.get::<_, i64>(0)
        })
    })
    .map(|n| n as u64)
}

/// Database footprint in bytes (page count times page size).
fn database_size(conn: &scout_storage::Connection) -> Result<u64> {
    let page_count: i64 =
        conn.with_conn(|c| c.query_row("PRAGMA page_count", [], |row| row.get(0)))?;
    let page_size: i64 =
        conn.with_conn(|c| c.query_row("PRAGMA page_size", [], |row| row.get(0)))?;
    Ok((page_count * page_size) as u64)
}

fn report_progress(callback: &Option<ProgressCallback>, phase: RebuildPhase, percent: u8) {
    if let Some(callback) = callback {
        callback(RebuildProgress { phase, percent });
    }
}
