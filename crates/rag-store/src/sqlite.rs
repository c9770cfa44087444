//! SQLite-based storage implementation.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use tracing::{debug, info};

use rag_core::text::index_terms;
use rag_core::{rank_hits, Chunk, ChunkStore, LexicalIndex, RagError, Result, VectorIndex};

use crate::schema::{SCHEMA, SCHEMA_VERSION};
use crate::similarity::{bytes_to_embedding, embedding_to_bytes, normalized_cosine};

/// SQLite-based store.
///
/// Chunks and embeddings live in plain tables; the lexical index is an FTS5
/// table over the identifier-decomposed term stream of each chunk, scored
/// with `bm25()`. Vector search is a brute-force cosine scan.
pub struct SqliteStore {
    /// Connection wrapped in blocking Mutex.
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open or create a database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| RagError::database(format!("Failed to open database: {}", e)))?;

        let store = Self::init(conn)?;
        info!("Database opened at {:?}", path);
        Ok(store)
    }

    /// Open an in-memory database (for testing).
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| RagError::database(format!("Failed to open in-memory database: {}", e)))?;

        Self::init(conn)
    }

    /// Initialize the store with a connection.
    fn init(conn: Connection) -> Result<Self> {
        Self::configure_connection(&conn)?;

        conn.execute_batch(SCHEMA)
            .map_err(|e| RagError::database(format!("Failed to initialize schema: {}", e)))?;

        conn.execute(
            "INSERT OR IGNORE INTO meta (key, value) VALUES ('schema_version', ?1)",
            params![SCHEMA_VERSION.to_string()],
        )
        .map_err(|e| RagError::database(e.to_string()))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Configure SQLite connection for read-heavy workloads.
    fn configure_connection(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = -64000;
            PRAGMA busy_timeout = 30000;
            PRAGMA temp_store = MEMORY;
            PRAGMA foreign_keys = ON;
            "#,
        )
        .map_err(|e| RagError::database(format!("Failed to configure connection: {}", e)))?;

        Ok(())
    }

    /// Execute a blocking operation on the connection.
    fn with_conn<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R>,
    {
        let conn = self.conn.lock().map_err(|e| RagError::database(e.to_string()))?;
        f(&conn)
    }

    /// Execute a mutable blocking operation on the connection.
    fn with_conn_mut<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Connection) -> Result<R>,
    {
        let mut conn = self.conn.lock().map_err(|e| RagError::database(e.to_string()))?;
        f(&mut conn)
    }

    /// Insert or replace chunks, each with an optional embedding, in one transaction.
    pub fn insert_chunks(&self, chunks: &[(Chunk, Option<Vec<f32>>)]) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn
                .transaction()
                .map_err(|e| RagError::database(e.to_string()))?;

            for (chunk, embedding) in chunks {
                let metadata = serde_json::to_string(&chunk.metadata)?;
                let terms = index_terms(&chunk.text).join(" ");

                tx.execute("DELETE FROM chunk_terms WHERE chunk_id = ?1", params![chunk.id])
                    .map_err(|e| RagError::database(e.to_string()))?;
                tx.execute(
                    "DELETE FROM chunk_embeddings WHERE chunk_id = ?1",
                    params![chunk.id],
                )
                .map_err(|e| RagError::database(e.to_string()))?;

                tx.execute(
                    "INSERT INTO chunks (id, text, metadata) VALUES (?1, ?2, ?3)
                     ON CONFLICT(id) DO UPDATE SET text = excluded.text, metadata = excluded.metadata",
                    params![chunk.id, chunk.text, metadata],
                )
                .map_err(|e| RagError::database(format!("Failed to insert chunk: {}", e)))?;

                tx.execute(
                    "INSERT INTO chunk_terms (chunk_id, terms) VALUES (?1, ?2)",
                    params![chunk.id, terms],
                )
                .map_err(|e| RagError::database(e.to_string()))?;

                if let Some(embedding) = embedding {
                    tx.execute(
                        "INSERT INTO chunk_embeddings (chunk_id, dimension, embedding) VALUES (?1, ?2, ?3)",
                        params![
                            chunk.id,
                            embedding.len() as i64,
                            embedding_to_bytes(embedding)
                        ],
                    )
                    .map_err(|e| RagError::database(e.to_string()))?;
                }
            }

            tx.commit().map_err(|e| RagError::database(e.to_string()))?;
            debug!("Inserted {} chunks", chunks.len());
            Ok(())
        })
    }

    /// Delete a chunk and its index entries. Returns whether it existed.
    pub fn delete_chunk(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM chunk_terms WHERE chunk_id = ?1", params![id])
                .map_err(|e| RagError::database(e.to_string()))?;
            let deleted = conn
                .execute("DELETE FROM chunks WHERE id = ?1", params![id])
                .map_err(|e| RagError::database(e.to_string()))?;
            Ok(deleted > 0)
        })
    }

    /// Count chunks and embeddings.
    pub fn counts(&self) -> Result<(u64, u64)> {
        self.with_conn(|conn| {
            let chunks: i64 = conn
                .query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))
                .map_err(|e| RagError::database(e.to_string()))?;
            let embeddings: i64 = conn
                .query_row("SELECT COUNT(*) FROM chunk_embeddings", [], |row| row.get(0))
                .map_err(|e| RagError::database(e.to_string()))?;
            Ok((chunks as u64, embeddings as u64))
        })
    }

    /// Build an FTS5 OR-query from a term set, quoting each term.
    fn fts5_query(terms: &BTreeSet<String>) -> String {
        terms
            .iter()
            .filter(|t| !t.trim().is_empty())
            .map(|t| format!("\"{}\"", t.replace('"', "\"\"")))
            .collect::<Vec<_>>()
            .join(" OR ")
    }
}

#[async_trait]
impl ChunkStore for SqliteStore {
    async fn get(&self, id: &str) -> Result<Option<Chunk>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, text, metadata FROM chunks WHERE id = ?1",
                    params![id],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                        ))
                    },
                )
                .optional()
                .map_err(|e| RagError::database(e.to_string()))?;

            match row {
                Some((id, text, metadata)) => Ok(Some(Chunk {
                    id,
                    text,
                    metadata: serde_json::from_str(&metadata)?,
                })),
                None => Ok(None),
            }
        })
    }
}

#[async_trait]
impl VectorIndex for SqliteStore {
    async fn search(&self, embedding: &[f32], k: usize) -> Result<Vec<(String, f32)>> {
        let dimension = embedding.len() as i64;

        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT chunk_id, embedding FROM chunk_embeddings WHERE dimension = ?1")
                .map_err(|e| RagError::database(e.to_string()))?;

            let rows = stmt
                .query_map(params![dimension], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
                })
                .map_err(|e| RagError::database(e.to_string()))?;

            let mut hits = Vec::new();
            for row in rows {
                let (id, bytes) = row.map_err(|e| RagError::database(e.to_string()))?;
                if let Some(similarity) = normalized_cosine(embedding, &bytes_to_embedding(&bytes)) {
                    hits.push((id, similarity));
                }
            }

            Ok(rank_hits(hits, k))
        })
    }
}

#[async_trait]
impl LexicalIndex for SqliteStore {
    async fn search(&self, terms: &BTreeSet<String>, k: usize) -> Result<Vec<(String, f32)>> {
        let query = Self::fts5_query(terms);
        if query.is_empty() {
            return Ok(Vec::new());
        }

        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(
                    r#"
                    SELECT chunk_id, bm25(chunk_terms) AS score
                    FROM chunk_terms
                    WHERE chunk_terms MATCH ?1
                    ORDER BY score ASC, chunk_id ASC
                    LIMIT ?2
                    "#,
                )
                .map_err(|e| RagError::database(e.to_string()))?;

            let rows = stmt
                .query_map(params![query, k as i64], |row| {
                    let id: String = row.get(0)?;
                    let score: f64 = row.get(1)?;
                    // bm25() is negative, lower is better
                    Ok((id, (-score) as f32))
                })
                .map_err(|e| RagError::database(e.to_string()))?;

            let hits = rows
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| RagError::database(e.to_string()))?;

            Ok(rank_hits(hits, k))
        })
    }
}
