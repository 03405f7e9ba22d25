//! Engine schema bootstrap.
//!
//! The indexing pipeline that populates these tables lives outside this
//! workspace; the core only guarantees the structures exist so queries and
//! maintenance commands have something to run against. All DDL is
//! idempotent.

use crate::connection::Connection;
use scout_core::Result;

/// Metadata table plus the FTS5 search index.
///
/// `document_index` rows share their rowid with `documents.id`; the columns
/// (filename, path, definitions, imports, docstrings, tags) are the
/// searchable fields, in that order. `document_terms` is an fts5vocab view
/// over the index used for prefix suggestions.
const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS documents (
    id INTEGER PRIMARY KEY,
    path TEXT NOT NULL UNIQUE,
    filename TEXT NOT NULL,
    language TEXT,
    extension TEXT,
    size INTEGER NOT NULL DEFAULT 0,
    modified_at INTEGER NOT NULL DEFAULT 0
);

CREATE VIRTUAL TABLE IF NOT EXISTS document_index USING fts5(
    filename,
    path,
    definitions,
    imports,
    docstrings,
    tags,
    tokenize = 'unicode61'
);

CREATE VIRTUAL TABLE IF NOT EXISTS document_terms USING fts5vocab(
    document_index,
    'col'
);
";

/// Column positions inside `document_index`, used by snippet extraction.
pub mod columns {
    pub const FILENAME: usize = 0;
    pub const PATH: usize = 1;
    pub const DEFINITIONS: usize = 2;
    pub const IMPORTS: usize = 3;
    pub const DOCSTRINGS: usize = 4;
    pub const TAGS: usize = 5;
}

/// Create the schema if it does not exist yet.
pub fn initialize(conn: &Connection) -> Result<()> {
    conn.with_conn(|c| c.execute_batch(SCHEMA_SQL))
}

#[cfg(test)]
mod tests {
    use super::*;
    use scout_core::StorageConfig;

    #[test]
    fn initialize_is_idempotent() {
        let conn = Connection::open(&StorageConfig::in_memory()).unwrap();
        initialize(&conn).unwrap();
        initialize(&conn).unwrap();

        let count: i64 = conn
            .with_conn(|c| {
                c.query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE name = 'documents'",
                    [],
                    |row| row.get(0),
                )
            })
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn fts_index_accepts_documents() {
        let conn = Connection::open(&StorageConfig::in_memory()).unwrap();
        initialize(&conn).unwrap();

        conn.with_conn(|c| {
            c.execute(
                "INSERT INTO documents (id, path, filename, language, extension) \
                 VALUES (1, 'src/main.rs', 'main.rs', 'rust', 'rs')",
                [],
            )?;
            c.execute(
                "INSERT INTO document_index (rowid, filename, path, definitions, imports, docstrings, tags) \
                 VALUES (1, 'main.rs', 'src/main.rs', 'fn main', 'use std', 'entry point', 'rust cli')",
                [],
            )
        })
        .unwrap();

        let hits: i64 = conn
            .with_conn(|c| {
                c.query_row(
                    "SELECT COUNT(*) FROM document_index WHERE document_index MATCH 'rust'",
                    [],
                    |row| row.get(0),
                )
            })
            .unwrap();
        assert_eq!(hits, 1);
    }
}
