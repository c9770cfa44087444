//! Interfaces to the engine's external collaborators.
//!
//! Each collaborator is a trait with one implementation per backend. The
//! concrete backend is chosen when the engine is built and held behind an
//! `Arc<dyn ...>` for the engine's lifetime.

use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::Chunk;

/// k-nearest-neighbour lookup over chunk embeddings.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Return up to `k` `(chunk_id, similarity)` pairs, similarity in [0, 1].
    ///
    /// The embedding is opaque: the index does not interpret its dimension.
    async fn search(&self, embedding: &[f32], k: usize) -> Result<Vec<(String, f32)>>;
}

/// Keyword lookup over an inverted index of chunk terms.
#[async_trait]
pub trait LexicalIndex: Send + Sync {
    /// Return up to `k` `(chunk_id, score)` pairs, higher is better.
    async fn search(&self, terms: &BTreeSet<String>, k: usize) -> Result<Vec<(String, f32)>>;
}

/// Read access to indexed chunks.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Fetch a chunk by id; `Ok(None)` when it no longer exists.
    async fn get(&self, id: &str) -> Result<Option<Chunk>>;
}

/// Query embedding service.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a single query text.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>>;
}

/// Cross-encoder relevance model.
#[async_trait]
pub trait Reranker: Send + Sync {
    /// Score each text against the query; output has the same length and order.
    async fn score(&self, query: &str, texts: &[&str]) -> Result<Vec<f32>>;
}
