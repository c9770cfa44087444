//! Optional cross-encoder rescoring of the ranking head.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, warn};

use rag_core::{Chunk, DegradedMode, RagError, Reranker, Result, ScoredCandidate};

use crate::fusion::min_max_normalize;
use crate::select::TopKSelector;

/// Wraps a [`Reranker`] with a timeout and silent fallback.
pub struct RerankStage {
    reranker: Option<Arc<dyn Reranker>>,
    timeout: Duration,
}

impl RerankStage {
    /// Create a stage. Without a reranker every rerank falls back.
    pub fn new(reranker: Option<Arc<dyn Reranker>>, timeout: Duration) -> Self {
        Self { reranker, timeout }
    }

    /// Score `chunks` against the query and return the best `top_n`
    /// `(chunk_id, relevance)` pairs, relevance descending.
    pub async fn rerank(&self, query: &str, chunks: &[&Chunk], top_n: usize) -> Result<Vec<(String, f32)>> {
        let reranker = self
            .reranker
            .as_ref()
            .ok_or_else(|| RagError::rerank_failure("no reranker configured"))?;

        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        let scores = timeout(self.timeout, reranker.score(query, &texts))
            .await
            .map_err(|_| RagError::rerank_failure(format!("timed out after {:?}", self.timeout)))?
            .map_err(|e| RagError::rerank_failure(e.to_string()))?;

        if scores.len() != chunks.len() {
            return Err(RagError::rerank_failure(format!(
                "expected {} scores, got {}",
                chunks.len(),
                scores.len()
            )));
        }
        if scores.iter().any(|s| !s.is_finite()) {
            return Err(RagError::rerank_failure("non-finite relevance score"));
        }

        let scored = chunks
            .iter()
            .map(|c| c.id.clone())
            .zip(scores)
            .collect();
        Ok(rag_core::rank_hits(scored, top_n))
    }

    /// Replace the final score of the best `top_n` candidates with the
    /// reranker's relevance.
    ///
    /// Relevance is min-max scaled into the band of the head's pre-rerank
    /// final scores, so a reranked candidate never drops below the untouched
    /// tail. On any failure the candidates are left unchanged and
    /// [`DegradedMode::RerankFallback`] is returned.
    pub async fn apply(
        &self,
        query: &str,
        candidates: &mut BTreeMap<String, ScoredCandidate>,
        chunks: &HashMap<String, Chunk>,
        top_n: usize,
    ) -> Option<DegradedMode> {
        let head: Vec<&Chunk> = TopKSelector::order(candidates.values().cloned())
            .into_iter()
            .take(top_n)
            .filter_map(|c| chunks.get(&c.chunk_id))
            .collect();
        if head.is_empty() {
            return None;
        }

        let relevance = match self.rerank(query, &head, head.len()).await {
            Ok(relevance) => relevance,
            Err(e) => {
                warn!("Reranking skipped, keeping fused order: {}", e);
                return Some(DegradedMode::RerankFallback);
            }
        };

        let (lo, hi) = head
            .iter()
            .filter_map(|c| candidates.get(&c.id))
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), c| {
                (lo.min(c.final_score), hi.max(c.final_score))
            });
        let span = if hi - lo > f32::EPSILON { hi - lo } else { 1.0 };
        let normalized = min_max_normalize(&relevance);

        for (id, raw) in &relevance {
            if let Some(candidate) = candidates.get_mut(id) {
                let scaled = normalized.get(id).copied().unwrap_or(0.0);
                candidate.rerank_score = Some(*raw);
                candidate.final_score = lo + scaled * span;
            }
        }

        debug!("Reranked {} candidates", relevance.len());
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    /// Scores texts by their length.
    struct LengthReranker;

    #[async_trait]
    impl Reranker for LengthReranker {
        async fn score(&self, _query: &str, texts: &[&str]) -> Result<Vec<f32>> {
            Ok(texts.iter().map(|t| t.len() as f32).collect())
        }
    }

    struct FailingReranker;

    #[async_trait]
    impl Reranker for FailingReranker {
        async fn score(&self, _query: &str, _texts: &[&str]) -> Result<Vec<f32>> {
            Err(RagError::provider("model not loaded"))
        }
    }

    struct ShortReranker;

    #[async_trait]
    impl Reranker for ShortReranker {
        async fn score(&self, _query: &str, _texts: &[&str]) -> Result<Vec<f32>> {
            Ok(vec![0.5])
        }
    }

    fn fixture() -> (BTreeMap<String, ScoredCandidate>, HashMap<String, Chunk>) {
        let rows = [
            ("a", "x", 0.9),
            ("b", "xxxxxxxx", 0.8),
            ("c", "xxxx", 0.7),
            ("d", "xxxxxxxxxxxxxxxx", 0.2),
        ];
        let candidates = rows
            .iter()
            .map(|(id, _, s)| (id.to_string(), ScoredCandidate::merged(*id, None, None, *s)))
            .collect();
        let chunks = rows
            .iter()
            .map(|(id, text, _)| (id.to_string(), Chunk::new(*id, *text)))
            .collect();
        (candidates, chunks)
    }

    fn order(candidates: &BTreeMap<String, ScoredCandidate>) -> Vec<String> {
        TopKSelector::order(candidates.values().cloned())
            .into_iter()
            .map(|c| c.chunk_id)
            .collect()
    }

    #[tokio::test]
    async fn test_rerank_reorders_head_only() {
        let (mut candidates, chunks) = fixture();
        let stage = RerankStage::new(Some(Arc::new(LengthReranker)), Duration::from_secs(1));

        let degraded = stage.apply("q", &mut candidates, &chunks, 3).await;
        assert_eq!(degraded, None);
        assert_eq!(order(&candidates), vec!["b", "c", "a", "d"]);

        assert!((candidates["b"].final_score - 0.9).abs() < 1e-6);
        assert!((candidates["a"].final_score - 0.7).abs() < 1e-6);
        assert_eq!(candidates["b"].rerank_score, Some(8.0));

        assert_eq!(candidates["d"].final_score, 0.2);
        assert_eq!(candidates["d"].rerank_score, None);
    }

    #[tokio::test]
    async fn test_failure_falls_back_silently() {
        let (mut candidates, chunks) = fixture();
        let before = candidates.clone();
        let stage = RerankStage::new(Some(Arc::new(FailingReranker)), Duration::from_secs(1));

        let degraded = stage.apply("q", &mut candidates, &chunks, 3).await;
        assert_eq!(degraded, Some(DegradedMode::RerankFallback));
        assert_eq!(candidates, before);
    }

    #[tokio::test]
    async fn test_length_mismatch_is_failure() {
        let (_, chunks) = fixture();
        let stage = RerankStage::new(Some(Arc::new(ShortReranker)), Duration::from_secs(1));
        let head: Vec<&Chunk> = chunks.values().collect();

        let err = stage.rerank("q", &head, 3).await.unwrap_err();
        assert_eq!(err.error_code(), "RERANK_FAILURE");
    }

    #[tokio::test]
    async fn test_missing_reranker_falls_back() {
        let (mut candidates, chunks) = fixture();
        let stage = RerankStage::new(None, Duration::from_secs(1));
        let degraded = stage.apply("q", &mut candidates, &chunks, 3).await;
        assert_eq!(degraded, Some(DegradedMode::RerankFallback));
    }

    #[tokio::test]
    async fn test_rerank_truncates_to_top_n() {
        let (_, chunks) = fixture();
        let stage = RerankStage::new(Some(Arc::new(LengthReranker)), Duration::from_secs(1));
        let all: Vec<&Chunk> = chunks.values().collect();

        let ranked = stage.rerank("q", &all, 2).await.unwrap();
        let ids: Vec<_> = ranked.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["d", "b"]);
    }
}
