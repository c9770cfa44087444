//! Semantic retrieval over an external vector index.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, warn};

use rag_core::{DegradedMode, Embedder, PathResult, VectorIndex};

/// Embeds the query and looks up its nearest chunks.
///
/// Failures and timeouts never propagate: they surface as
/// [`DegradedMode::SemanticUnavailable`] so the caller can go lexical-only.
pub struct SemanticRetriever {
    index: Arc<dyn VectorIndex>,
    embedder: Option<Arc<dyn Embedder>>,
    timeout: Duration,
}

impl SemanticRetriever {
    /// Create a retriever. Without an embedder every query degrades.
    pub fn new(
        index: Arc<dyn VectorIndex>,
        embedder: Option<Arc<dyn Embedder>>,
        timeout: Duration,
    ) -> Self {
        Self {
            index,
            embedder,
            timeout,
        }
    }

    /// Embed the query text; `None` when no embedding could be produced.
    pub async fn embed_query(&self, query: &str) -> Option<Vec<f32>> {
        let Some(embedder) = &self.embedder else {
            debug!("No embedder configured");
            return None;
        };

        match timeout(self.timeout, embedder.embed_query(query)).await {
            Ok(Ok(embedding)) if !embedding.is_empty() => Some(embedding),
            Ok(Ok(_)) => {
                warn!("Embedding service returned an empty vector");
                None
            }
            Ok(Err(e)) => {
                warn!("Embedding failed: {}", e);
                None
            }
            Err(_) => {
                warn!("Embedding timed out after {:?}", self.timeout);
                None
            }
        }
    }

    /// Look up `k` nearest chunks for an embedding.
    ///
    /// Similarities are clamped to [0, 1]; hits are ordered by similarity
    /// descending, then chunk id ascending.
    pub async fn retrieve(&self, query_embedding: &[f32], k: usize) -> PathResult {
        match timeout(self.timeout, self.index.search(query_embedding, k)).await {
            Ok(Ok(hits)) => {
                let hits = rag_core::rank_hits(
                    hits.into_iter()
                        .map(|(id, score)| (id, score.clamp(0.0, 1.0)))
                        .collect(),
                    k,
                );
                debug!("Semantic path returned {} hits", hits.len());
                PathResult::searched(hits)
            }
            Ok(Err(e)) => {
                warn!("Vector index unavailable: {}", e);
                PathResult::unavailable(DegradedMode::SemanticUnavailable)
            }
            Err(_) => {
                warn!("Vector search timed out after {:?}", self.timeout);
                PathResult::unavailable(DegradedMode::SemanticUnavailable)
            }
        }
    }

    /// Embed and search in one step.
    ///
    /// Returns whether an embedding was produced alongside the path result.
    pub async fn retrieve_query(&self, query: &str, k: usize) -> (bool, PathResult) {
        match self.embed_query(query).await {
            Some(embedding) => (true, self.retrieve(&embedding, k).await),
            None => (
                false,
                PathResult::unavailable(DegradedMode::SemanticUnavailable),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rag_core::{PathStatus, RagError, Result};

    struct FixedIndex(Vec<(String, f32)>);

    #[async_trait]
    impl VectorIndex for FixedIndex {
        async fn search(&self, _embedding: &[f32], _k: usize) -> Result<Vec<(String, f32)>> {
            Ok(self.0.clone())
        }
    }

    struct DownIndex;

    #[async_trait]
    impl VectorIndex for DownIndex {
        async fn search(&self, _embedding: &[f32], _k: usize) -> Result<Vec<(String, f32)>> {
            Err(RagError::database("connection refused"))
        }
    }

    struct SlowEmbedder;

    #[async_trait]
    impl Embedder for SlowEmbedder {
        async fn embed_query(&self, _text: &str) -> Result<Vec<f32>> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(vec![1.0])
        }
    }

    struct UnitEmbedder;

    #[async_trait]
    impl Embedder for UnitEmbedder {
        async fn embed_query(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![1.0, 0.0])
        }
    }

    fn hits(values: &[(&str, f32)]) -> Vec<(String, f32)> {
        values.iter().map(|(id, s)| (id.to_string(), *s)).collect()
    }

    #[tokio::test]
    async fn test_orders_clamps_and_truncates() {
        let retriever = SemanticRetriever::new(
            Arc::new(FixedIndex(hits(&[("b", 0.5), ("c", 1.3), ("a", 0.5), ("d", 0.1)]))),
            None,
            Duration::from_secs(1),
        );
        let result = retriever.retrieve(&[1.0], 3).await;
        assert!(result.is_searched());
        assert_eq!(result.hits, hits(&[("c", 1.0), ("a", 0.5), ("b", 0.5)]));
    }

    #[tokio::test]
    async fn test_index_failure_degrades() {
        let retriever = SemanticRetriever::new(Arc::new(DownIndex), None, Duration::from_secs(1));
        let result = retriever.retrieve(&[1.0], 3).await;
        assert!(result.hits.is_empty());
        assert_eq!(
            result.status,
            PathStatus::Unavailable(DegradedMode::SemanticUnavailable)
        );
    }

    #[tokio::test]
    async fn test_missing_embedder_degrades() {
        let retriever = SemanticRetriever::new(Arc::new(FixedIndex(vec![])), None, Duration::from_secs(1));
        let (embedded, result) = retriever.retrieve_query("anything", 5).await;
        assert!(!embedded);
        assert_eq!(result.degraded(), Some(DegradedMode::SemanticUnavailable));
    }

    #[tokio::test(start_paused = true)]
    async fn test_embedding_timeout_degrades() {
        let retriever = SemanticRetriever::new(
            Arc::new(FixedIndex(hits(&[("a", 0.9)]))),
            Some(Arc::new(SlowEmbedder)),
            Duration::from_millis(50),
        );
        let (embedded, result) = retriever.retrieve_query("anything", 5).await;
        assert!(!embedded);
        assert_eq!(result.degraded(), Some(DegradedMode::SemanticUnavailable));
    }

    #[tokio::test]
    async fn test_retrieve_query_with_embedder() {
        let retriever = SemanticRetriever::new(
            Arc::new(FixedIndex(hits(&[("a", 0.9)]))),
            Some(Arc::new(UnitEmbedder)),
            Duration::from_secs(1),
        );
        let (embedded, result) = retriever.retrieve_query("anything", 5).await;
        assert!(embedded);
        assert_eq!(result.hits, hits(&[("a", 0.9)]));
    }
}
