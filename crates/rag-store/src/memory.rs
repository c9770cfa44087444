//! In-memory backend: chunk map, brute-force vector index and BM25 index.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;
use tracing::debug;

use rag_core::text::index_terms;
use rag_core::{rank_hits, Chunk, ChunkStore, LexicalIndex, RagError, Result, VectorIndex};

use crate::similarity::normalized_cosine;

/// BM25 term-frequency saturation.
const BM25_K1: f32 = 1.2;

/// BM25 document-length normalization.
const BM25_B: f32 = 0.75;

/// Inverted index over identifier-decomposed chunk terms.
#[derive(Debug, Default)]
struct Bm25Index {
    /// term -> (chunk_id -> term frequency)
    postings: HashMap<String, BTreeMap<String, u32>>,

    /// chunk_id -> number of terms
    doc_lengths: HashMap<String, u32>,

    /// Sum of all document lengths.
    total_length: u64,
}

impl Bm25Index {
    fn insert(&mut self, id: &str, text: &str) {
        self.remove(id);

        let terms = index_terms(text);
        let length = terms.len() as u32;

        let mut frequencies: HashMap<String, u32> = HashMap::new();
        for term in terms {
            *frequencies.entry(term).or_default() += 1;
        }
        for (term, tf) in frequencies {
            self.postings
                .entry(term)
                .or_default()
                .insert(id.to_string(), tf);
        }

        self.doc_lengths.insert(id.to_string(), length);
        self.total_length += u64::from(length);
    }

    fn remove(&mut self, id: &str) {
        if let Some(length) = self.doc_lengths.remove(id) {
            self.total_length -= u64::from(length);
            self.postings.retain(|_, docs| {
                docs.remove(id);
                !docs.is_empty()
            });
        }
    }

    fn search(&self, terms: &BTreeSet<String>, k: usize) -> Vec<(String, f32)> {
        let n = self.doc_lengths.len() as f32;
        if n == 0.0 {
            return Vec::new();
        }
        let avg_length = (self.total_length as f32 / n).max(1.0);

        let mut scores: HashMap<&str, f32> = HashMap::new();
        for term in terms {
            let Some(docs) = self.postings.get(term) else {
                continue;
            };
            let df = docs.len() as f32;
            let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();

            for (id, tf) in docs {
                let tf = *tf as f32;
                let length = self.doc_lengths.get(id).copied().unwrap_or(1) as f32;
                let score = idf * (tf * (BM25_K1 + 1.0))
                    / (tf + BM25_K1 * (1.0 - BM25_B + BM25_B * length / avg_length));
                *scores.entry(id.as_str()).or_default() += score;
            }
        }

        rank_hits(
            scores
                .into_iter()
                .map(|(id, score)| (id.to_string(), score))
                .collect(),
            k,
        )
    }
}

#[derive(Debug, Default)]
struct Inner {
    chunks: BTreeMap<String, Chunk>,
    embeddings: BTreeMap<String, Vec<f32>>,
    lexical: Bm25Index,
}

/// In-memory store implementing every read interface the engine consumes.
///
/// Intended for tests, fixtures and small corpora.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a chunk, with an optional embedding.
    pub fn insert(&self, chunk: Chunk, embedding: Option<Vec<f32>>) -> Result<()> {
        let mut inner = self
            .inner
            .write()
            .map_err(|e| RagError::internal(e.to_string()))?;

        inner.lexical.insert(&chunk.id, &chunk.text);
        match embedding {
            Some(embedding) => {
                inner.embeddings.insert(chunk.id.clone(), embedding);
            }
            None => {
                inner.embeddings.remove(&chunk.id);
            }
        }
        debug!("Indexed chunk {} in memory", chunk.id);
        inner.chunks.insert(chunk.id.clone(), chunk);
        Ok(())
    }

    /// Remove a chunk from every index. Returns whether it existed.
    pub fn remove(&self, id: &str) -> Result<bool> {
        let mut inner = self
            .inner
            .write()
            .map_err(|e| RagError::internal(e.to_string()))?;

        inner.lexical.remove(id);
        inner.embeddings.remove(id);
        Ok(inner.chunks.remove(id).is_some())
    }

    /// Number of chunks.
    pub fn len(&self) -> usize {
        self.inner.read().map(|i| i.chunks.len()).unwrap_or(0)
    }

    /// Whether the store holds no chunks.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ChunkStore for MemoryStore {
    async fn get(&self, id: &str) -> Result<Option<Chunk>> {
        let inner = self
            .inner
            .read()
            .map_err(|e| RagError::internal(e.to_string()))?;
        Ok(inner.chunks.get(id).cloned())
    }
}

#[async_trait]
impl VectorIndex for MemoryStore {
    async fn search(&self, embedding: &[f32], k: usize) -> Result<Vec<(String, f32)>> {
        let inner = self
            .inner
            .read()
            .map_err(|e| RagError::internal(e.to_string()))?;

        let hits = inner
            .embeddings
            .iter()
            .filter_map(|(id, stored)| normalized_cosine(embedding, stored).map(|s| (id.clone(), s)))
            .collect();

        Ok(rank_hits(hits, k))
    }
}

#[async_trait]
impl LexicalIndex for MemoryStore {
    async fn search(&self, terms: &BTreeSet<String>, k: usize) -> Result<Vec<(String, f32)>> {
        let inner = self
            .inner
            .read()
            .map_err(|e| RagError::internal(e.to_string()))?;
        Ok(inner.lexical.search(terms, k))
    }
}
