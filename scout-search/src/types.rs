//! Search option, result, and maintenance types.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Filters and pagination for a search request.
///
/// Equality of two option sets yields the same cache fingerprint, so
/// `Default` plus struct update syntax is the expected construction style.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchOptions {
    /// Maximum candidates to return. Defaults to 50.
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    /// Exact language match against document metadata.
    pub language: Option<String>,
    /// Exact extension match.
    pub extension: Option<String>,
    /// Substring match on the document path.
    pub path_contains: Option<String>,
    pub min_size: Option<i64>,
    pub max_size: Option<i64>,
    /// Unix timestamps bounding the modification date.
    pub modified_after: Option<i64>,
    pub modified_before: Option<i64>,
    /// Rank floor: candidates scoring below this are dropped in the engine.
    pub min_score: Option<f64>,
    /// Fetch twice the requested limit so a downstream re-ranker has slack.
    #[serde(default)]
    pub over_retrieve: bool,
}

/// Searchable fields of the full-text index, in column order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchField {
    Filename,
    Path,
    Definitions,
    Imports,
    Docstrings,
    Tags,
}

impl MatchField {
    /// All fields, index position matching the engine column order.
    pub const ALL: [MatchField; 6] = [
        MatchField::Filename,
        MatchField::Path,
        MatchField::Definitions,
        MatchField::Imports,
        MatchField::Docstrings,
        MatchField::Tags,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MatchField::Filename => "filename",
            MatchField::Path => "path",
            MatchField::Definitions => "definitions",
            MatchField::Imports => "imports",
            MatchField::Docstrings => "docstrings",
            MatchField::Tags => "tags",
        }
    }
}

/// One highlighted region within a candidate's field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchMatch {
    pub field: MatchField,
    /// Context window around the match, highlight markers stripped.
    pub snippet: String,
    /// Byte offsets of the first highlighted region inside `snippet`.
    pub start_position: usize,
    pub end_position: usize,
    /// Terms the match expression was built from.
    pub terms: Vec<String>,
}

/// A ranked search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchCandidate {
    pub id: i64,
    pub path: String,
    pub filename: String,
    /// Negated engine rank; higher is better.
    pub score: f64,
    pub matches: Vec<SearchMatch>,
    pub metadata: HashMap<String, String>,
}

/// Where a suggestion was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionKind {
    Tag,
    Filename,
    Definition,
    Import,
}

/// A typed completion for a search prefix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub text: String,
    pub kind: SuggestionKind,
    /// Document frequency of the term; higher ranks first.
    pub score: f64,
}

/// Administrative index operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaintenanceOperation {
    Rebuild,
    Optimize,
    Analyze,
    Check,
}

impl MaintenanceOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            MaintenanceOperation::Rebuild => "rebuild",
            MaintenanceOperation::Optimize => "optimize",
            MaintenanceOperation::Analyze => "analyze",
            MaintenanceOperation::Check => "check",
        }
    }
}

/// Outcome of a maintenance operation. Failures land here, never in an
/// `Err`, so a multi-step maintenance pipeline can continue past one
/// failed step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexMaintenanceResult {
    pub success: bool,
    pub operation: MaintenanceOperation,
    pub duration_ms: u64,
    pub documents_processed: Option<u64>,
    pub size_before: Option<u64>,
    pub size_after: Option<u64>,
    pub error: Option<String>,
    pub warnings: Vec<String>,
}

impl IndexMaintenanceResult {
    pub fn failure(
        operation: MaintenanceOperation,
        duration_ms: u64,
        error: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            operation,
            duration_ms,
            documents_processed: None,
            size_before: None,
            size_after: None,
            error: Some(error.into()),
            warnings: Vec::new(),
        }
    }
}

/// Rebuild milestone reported to the caller's progress callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RebuildPhase {
    Start,
    Rebuilding,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RebuildProgress {
    pub phase: RebuildPhase,
    pub percent: u8,
}

pub type ProgressCallback = Arc<dyn Fn(RebuildProgress) + Send + Sync>;

/// Options for [`rebuild_index`](crate::SearchRepository::rebuild_index).
#[derive(Clone, Default)]
pub struct RebuildOptions {
    /// Invoked at the start, mid-rebuild, and completion milestones.
    pub progress: Option<ProgressCallback>,
}

impl std::fmt::Debug for RebuildOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RebuildOptions")
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

/// Running repository statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchStats {
    pub total_searches: u64,
    /// Online average over all searches, cached and uncached.
    pub avg_search_time_ms: f64,
    /// `hits / (hits + misses) * 100`, counted only while the cache is
    /// enabled.
    pub cache_hit_rate: f64,
    pub slow_queries: u64,
}
