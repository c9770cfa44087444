//! rag-store - Chunk, vector and lexical index backends
//!
//! Two backends implement the [`ChunkStore`](rag_core::ChunkStore),
//! [`VectorIndex`](rag_core::VectorIndex) and
//! [`LexicalIndex`](rag_core::LexicalIndex) traits:
//!
//! - [`MemoryStore`]: in-process maps with a BM25 inverted index.
//! - [`SqliteStore`]: SQLite with an FTS5 term index.
//!
//! Both build their lexical index from [`rag_core::text::index_terms`], so
//! chunk text is decomposed with the same identifier rules as queries.

mod memory;
mod schema;
mod similarity;
mod sqlite;

pub use memory::MemoryStore;
pub use similarity::normalized_cosine;
pub use sqlite::SqliteStore;

// Re-export schema for testing/migrations
pub use schema::SCHEMA;
