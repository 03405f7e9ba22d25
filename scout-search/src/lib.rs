//! Search repository for Code-Scout.
//!
//! Ranked tag and text search over the full-text document index, with alias
//! expansion, snippet extraction, a TTL-bounded result cache, prefix
//! suggestions, and index maintenance operations.

pub mod cache;
pub mod repository;
pub mod tags;
pub mod types;

pub use cache::ResultCache;
pub use repository::SearchRepository;
pub use types::{
    IndexMaintenanceResult, MaintenanceOperation, MatchField, ProgressCallback, RebuildOptions,
    RebuildPhase, RebuildProgress, SearchCandidate, SearchMatch, SearchOptions, SearchStats,
    Suggestion, SuggestionKind,
};
