//! libSQL chunk index (offline mode).
//!
//! The [`Storage`] struct wraps a libSQL database holding chunked corpus text
//! per collection, with an FTS5 index used by the Research stage's retrieval
//! call.
//!
//! **Access rules:**
//! - `copilot ingest`: read-write (sole writer) via [`Storage::open`]
//! - `copilot ask`: read-only via [`Storage::open_readonly`]

mod migrations;

use std::path::Path;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use copilot_shared::{Chunk, CopilotError, Result};
use libsql::{Connection, Database, params};
use regex::Regex;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Upper bound on query terms passed to FTS5.
const MAX_QUERY_TERMS: usize = 64;

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

/// Metadata recorded for a collection at ingest time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionMeta {
    pub name: String,
    /// Ranker identifier the collection was built for.
    pub embedding_model: String,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub document_count: usize,
    pub updated_at: DateTime<Utc>,
}

/// A search hit from FTS5.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub citation: String,
    pub content: String,
    /// FTS5 rank score (lower is better).
    pub score: f64,
}

fn db_err(e: libsql::Error) -> CopilotError {
    CopilotError::Storage(e.to_string())
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CopilotError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(db_err)?;
        let conn = db.connect().map_err(db_err)?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open an existing database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(CopilotError::Storage(format!(
                "index not found at {}; run `copilot ingest` first",
                path.display()
            )));
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(db_err)?;
        let conn = db.connect().map_err(db_err)?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    CopilotError::Storage(format!("migration v{} failed: {e}", migration.version))
                })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(CopilotError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Collection operations
    // -----------------------------------------------------------------------

    /// Get a collection's metadata by name.
    pub async fn get_collection(&self, name: &str) -> Result<Option<CollectionMeta>> {
        let mut rows = self
            .conn
            .query(
                "SELECT name, embedding_model, chunk_size, chunk_overlap, document_count, updated_at
                 FROM collections WHERE name = ?1",
                params![name],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await {
            Ok(Some(row)) => {
                let updated_at: String = row.get(5).map_err(db_err)?;
                Ok(Some(CollectionMeta {
                    name: row.get::<String>(0).map_err(db_err)?,
                    embedding_model: row.get::<String>(1).map_err(db_err)?,
                    chunk_size: row.get::<i64>(2).map_err(db_err)? as usize,
                    chunk_overlap: row.get::<i64>(3).map_err(db_err)? as usize,
                    document_count: row.get::<i64>(4).map_err(db_err)? as usize,
                    updated_at: DateTime::parse_from_rfc3339(&updated_at)
                        .map(|dt| dt.with_timezone(&Utc))
                        .map_err(|e| CopilotError::Storage(format!("invalid date: {e}")))?,
                }))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(db_err(e)),
        }
    }

    /// Replace every chunk of a collection in one transaction and record its metadata.
    /// Returns the number of chunks written.
    pub async fn replace_chunks(&self, meta: &CollectionMeta, chunks: &[Chunk]) -> Result<usize> {
        self.check_writable()?;

        let tx = self.conn.transaction().await.map_err(db_err)?;

        tx.execute(
            "INSERT INTO collections (name, embedding_model, chunk_size, chunk_overlap, document_count, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(name) DO UPDATE SET
               embedding_model = excluded.embedding_model,
               chunk_size = excluded.chunk_size,
               chunk_overlap = excluded.chunk_overlap,
               document_count = excluded.document_count,
               updated_at = excluded.updated_at",
            params![
                meta.name.as_str(),
                meta.embedding_model.as_str(),
                meta.chunk_size as i64,
                meta.chunk_overlap as i64,
                meta.document_count as i64,
                meta.updated_at.to_rfc3339(),
            ],
        )
        .await
        .map_err(db_err)?;

        tx.execute(
            "DELETE FROM chunks WHERE collection = ?1",
            params![meta.name.as_str()],
        )
        .await
        .map_err(db_err)?;

        for chunk in chunks {
            tx.execute(
                "INSERT INTO chunks (id, collection, source, chunk_id, citation, content, content_hash)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    Uuid::now_v7().to_string(),
                    meta.name.as_str(),
                    chunk.source.as_str(),
                    chunk.chunk_id,
                    chunk.citation.as_str(),
                    chunk.content.as_str(),
                    content_hash(&chunk.content),
                ],
            )
            .await
            .map_err(db_err)?;
        }

        tx.commit().await.map_err(db_err)?;

        tracing::info!(
            collection = %meta.name,
            chunks = chunks.len(),
            documents = meta.document_count,
            "collection replaced"
        );
        Ok(chunks.len())
    }

    /// Number of chunks stored for a collection.
    pub async fn count_chunks(&self, collection: &str) -> Result<u64> {
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*) FROM chunks WHERE collection = ?1",
                params![collection],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<i64>(0).map_err(db_err)? as u64),
            Ok(None) => Ok(0),
            Err(e) => Err(db_err(e)),
        }
    }

    // -----------------------------------------------------------------------
    // FTS search
    // -----------------------------------------------------------------------

    /// Full-text search over a collection's chunks. Free text is reduced to
    /// OR-ed terms, so any shared word can match.
    pub async fn search(
        &self,
        collection: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        let Some(fts_query) = fts_query(query) else {
            return Ok(Vec::new());
        };

        let mut rows = self
            .conn
            .query(
                "SELECT c.citation, c.content, rank
                 FROM chunks_fts fts
                 JOIN chunks c ON c.rowid = fts.rowid
                 WHERE chunks_fts MATCH ?1 AND c.collection = ?2
                 ORDER BY rank
                 LIMIT ?3",
                params![fts_query, collection, limit as i64],
            )
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(SearchHit {
                citation: row.get::<String>(0).map_err(db_err)?,
                content: row.get::<String>(1).map_err(db_err)?,
                score: row.get::<f64>(2).unwrap_or(0.0),
            });
        }
        Ok(results)
    }
}

/// SHA-256 of chunk text, hex encoded.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Turn free text into an FTS5 query of quoted, OR-ed terms.
fn fts_query(text: &str) -> Option<String> {
    static TERM_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"[\p{L}\p{N}]+").expect("valid regex"));

    let mut terms: Vec<String> = Vec::new();
    for m in TERM_RE.find_iter(text) {
        let term = m.as_str().to_lowercase();
        if term.chars().count() < 2 || terms.contains(&term) {
            continue;
        }
        terms.push(term);
        if terms.len() == MAX_QUERY_TERMS {
            break;
        }
    }

    if terms.is_empty() {
        return None;
    }
    Some(
        terms
            .iter()
            .map(|t| format!("\"{t}\""))
            .collect::<Vec<_>>()
            .join(" OR "),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Create a temp file storage for testing.
    async fn test_storage() -> Storage {
        let tmp = std::env::temp_dir().join(format!("copilot_test_{}.db", Uuid::now_v7()));
        Storage::open(&tmp).await.expect("open test db")
    }

    fn meta(name: &str, documents: usize) -> CollectionMeta {
        CollectionMeta {
            name: name.into(),
            embedding_model: "fts5-bm25".into(),
            chunk_size: 1000,
            chunk_overlap: 100,
            document_count: documents,
            updated_at: Utc::now(),
        }
    }

    fn corpus() -> Vec<Chunk> {
        vec![
            Chunk::new(
                "fda_guidelines.txt",
                1,
                "Adaptive trial designs allow pre-specified modifications to oncology trials.",
            ),
            Chunk::new(
                "fda_guidelines.txt",
                2,
                "Sponsors must submit interim analysis plans to the FDA before unblinding.",
            ),
            Chunk::new(
                "cold_chain.txt",
                1,
                "Biologics require continuous temperature monitoring across the supply chain.",
            ),
        ]
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let storage = test_storage().await;
        assert_eq!(storage.get_schema_version().await, 1);
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let tmp = std::env::temp_dir().join(format!("copilot_test_{}.db", Uuid::now_v7()));
        let s1 = Storage::open(&tmp).await.expect("first open");
        drop(s1);
        let s2 = Storage::open(&tmp).await.expect("second open");
        assert_eq!(s2.get_schema_version().await, 1);
    }

    #[tokio::test]
    async fn replace_and_count() {
        let storage = test_storage().await;
        let written = storage
            .replace_chunks(&meta("docs", 2), &corpus())
            .await
            .expect("replace");
        assert_eq!(written, 3);
        assert_eq!(storage.count_chunks("docs").await.unwrap(), 3);
        assert_eq!(storage.count_chunks("other").await.unwrap(), 0);

        // Re-ingest replaces rather than appends.
        storage
            .replace_chunks(&meta("docs", 1), &corpus()[..1])
            .await
            .expect("replace again");
        assert_eq!(storage.count_chunks("docs").await.unwrap(), 1);

        let found = storage.get_collection("docs").await.unwrap().expect("collection");
        assert_eq!(found.document_count, 1);
        assert_eq!(found.embedding_model, "fts5-bm25");
        assert!(storage.get_collection("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn fts_search_ranks_matching_chunks() {
        let storage = test_storage().await;
        storage.replace_chunks(&meta("docs", 2), &corpus()).await.unwrap();

        let hits = storage
            .search("docs", "What temperature monitoring do biologics need?", 5)
            .await
            .expect("search");
        assert!(!hits.is_empty());
        assert_eq!(hits[0].citation, "[cold_chain.txt | Chunk #1]");

        let hits = storage.search("docs", "interim analysis FDA", 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].citation, "[fda_guidelines.txt | Chunk #2]");
    }

    #[tokio::test]
    async fn search_is_scoped_to_collection() {
        let storage = test_storage().await;
        storage.replace_chunks(&meta("docs", 2), &corpus()).await.unwrap();
        let hits = storage.search("other", "biologics", 5).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn punctuation_only_query_returns_nothing() {
        let storage = test_storage().await;
        storage.replace_chunks(&meta("docs", 2), &corpus()).await.unwrap();
        assert!(storage.search("docs", "?? !! --", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn readonly_rejects_writes() {
        let tmp = std::env::temp_dir().join(format!("copilot_test_{}.db", Uuid::now_v7()));
        let rw = Storage::open(&tmp).await.unwrap();
        rw.replace_chunks(&meta("docs", 2), &corpus()).await.unwrap();
        drop(rw);

        let ro = Storage::open_readonly(&tmp).await.unwrap();
        assert_eq!(ro.count_chunks("docs").await.unwrap(), 3);
        let result = ro.replace_chunks(&meta("docs", 0), &[]).await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("read-only"));
    }

    #[tokio::test]
    async fn readonly_requires_existing_index() {
        let tmp = std::env::temp_dir().join(format!("copilot_missing_{}.db", Uuid::now_v7()));
        let err = Storage::open_readonly(&tmp).await.err().expect("missing index");
        assert!(err.to_string().contains("copilot ingest"));
    }

    #[test]
    fn fts_query_quotes_and_dedupes_terms() {
        assert_eq!(
            fts_query("FDA's adaptive-trial FDA guidance?").as_deref(),
            Some("\"fda\" OR \"adaptive\" OR \"trial\" OR \"guidance\"")
        );
        assert_eq!(fts_query("a ? !"), None);
    }

    #[test]
    fn content_hash_is_stable() {
        assert_eq!(content_hash("abc"), content_hash("abc"));
        assert_ne!(content_hash("abc"), content_hash("abd"));
        assert_eq!(content_hash("abc").len(), 64);
    }
}
