//! Query engine for hybrid retrieval and ranking.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use rag_core::{
    Chunk, ChunkStore, Embedder, LexicalIndex, PathResult, QueryIntent, RagConfig, RagError,
    Reranker, Result, RetrievalConfig, SearchOutcome, SearchResult, SearchResults, VectorIndex,
};

use crate::analyzer::QueryAnalyzer;
use crate::boost::DomainBooster;
use crate::cache::QueryCache;
use crate::fusion::ResultMerger;
use crate::lexical::LexicalRetriever;
use crate::rerank::RerankStage;
use crate::select::TopKSelector;
use crate::semantic::SemanticRetriever;

/// External collaborators the engine reads from.
pub struct Backends {
    /// Nearest-neighbour lookup over chunk embeddings.
    pub vector: Arc<dyn VectorIndex>,

    /// Inverted index over chunk terms.
    pub lexical: Arc<dyn LexicalIndex>,

    /// Chunk text and metadata by id.
    pub chunks: Arc<dyn ChunkStore>,

    /// Query embedding service; without one the semantic path degrades.
    pub embedder: Option<Arc<dyn Embedder>>,

    /// Cross-encoder; only consulted when reranking is enabled.
    pub reranker: Option<Arc<dyn Reranker>>,
}

impl Backends {
    /// Use one store for all three indexes.
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: VectorIndex + LexicalIndex + ChunkStore + 'static,
    {
        Self {
            vector: store.clone(),
            lexical: store.clone(),
            chunks: store,
            embedder: None,
            reranker: None,
        }
    }

    /// Attach a query embedder.
    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Attach a reranker.
    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }
}

/// Hybrid retrieval engine.
///
/// Runs the semantic and lexical paths concurrently, fuses their scores with
/// intent-dependent weights, applies domain boosts and optional reranking,
/// then selects a deterministic top-k. Collaborator failures degrade the
/// query instead of failing it.
pub struct RetrievalEngine {
    config: RagConfig,
    analyzer: QueryAnalyzer,
    semantic: SemanticRetriever,
    lexical: LexicalRetriever,
    chunks: Arc<dyn ChunkStore>,
    merger: ResultMerger,
    booster: DomainBooster,
    rerank: RerankStage,
    cache: Option<QueryCache>,
}

impl RetrievalEngine {
    /// Create an engine. Fails only on invalid configuration.
    pub fn new(config: RagConfig, backends: Backends) -> Result<Self> {
        config.validate()?;

        let settings = &config.retrieval;
        let retriever_timeout = Duration::from_millis(settings.retriever_timeout_ms);
        let cache = (settings.cache_capacity > 0).then(|| QueryCache::new(settings.cache_capacity));

        Ok(Self {
            analyzer: QueryAnalyzer::new(&config.analyzer),
            semantic: SemanticRetriever::new(backends.vector, backends.embedder, retriever_timeout),
            lexical: LexicalRetriever::new(backends.lexical, retriever_timeout),
            chunks: backends.chunks,
            merger: ResultMerger,
            booster: DomainBooster::new(&config.boost),
            rerank: RerankStage::new(
                backends.reranker,
                Duration::from_millis(settings.rerank_timeout_ms),
            ),
            cache,
            config,
        })
    }

    /// Active configuration.
    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    /// Analyze a query and resolve its per-query configuration.
    pub fn resolve(&self, query: &str) -> (QueryIntent, RetrievalConfig) {
        let intent = self.analyzer.analyze(query);
        let config = RetrievalConfig::resolve(&self.config, &intent);
        (intent, config)
    }

    /// Run a query through the full pipeline.
    pub async fn search(&self, query: &str) -> SearchOutcome {
        let start = Instant::now();

        info!("Searching for: {:?}", query);

        let (intent, config) = self.resolve(query);
        if intent.is_blank() {
            warn!("Rejected blank query");
            return SearchOutcome::cannot_retrieve(query, &RagError::EmptyQuery);
        }

        debug!(
            "Intent {} (semantic {:.2}, lexical {:.2}, fetch_k {})",
            intent.kind, config.semantic_weight, config.lexical_weight, config.fetch_k
        );

        let cache_key = self
            .cache
            .as_ref()
            .map(|_| QueryCache::key(&intent.normalized, &config));
        if let (Some(cache), Some(key)) = (&self.cache, &cache_key) {
            if let Some(hit) = cache.get(key) {
                debug!("Query cache hit");
                return SearchOutcome::Ranked(hit);
            }
        }

        let ((embedded, semantic), lexical) = tokio::join!(
            self.semantic.retrieve_query(query.trim(), config.fetch_k),
            async {
                if config.uses_lexical() {
                    self.lexical.retrieve(&intent.terms, config.fetch_k).await
                } else {
                    PathResult::skipped()
                }
            }
        );

        if !embedded && intent.terms.is_empty() {
            warn!("Query has neither an embedding nor lexical terms");
            return SearchOutcome::cannot_retrieve(query, &RagError::EmptyQuery);
        }
        let mut degraded: Vec<_> = [semantic.degraded(), lexical.degraded()]
            .into_iter()
            .flatten()
            .collect();
        if !semantic.is_searched() && !lexical.is_searched() {
            let error = RagError::retrieval_unavailable("no retrieval path could run");
            warn!("{} (degraded: {:?})", error, degraded);
            return SearchOutcome::cannot_retrieve_degraded(query, &error, degraded);
        }

        debug!(
            "Semantic path returned {} results, lexical path returned {} results",
            semantic.hits.len(),
            lexical.hits.len()
        );

        let chunks = self.resolve_chunks(&semantic.hits, &lexical.hits).await;
        let semantic_hits = retain_resolved(semantic.hits, &chunks);
        let lexical_hits = retain_resolved(lexical.hits, &chunks);

        let mut candidates = self.merger.merge(&semantic_hits, &lexical_hits, &config);
        debug!("Merged to {} candidates", candidates.len());

        self.booster.boost(&mut candidates, &intent, &chunks, &config);

        if config.rerank {
            if let Some(mode) = self
                .rerank
                .apply(query.trim(), &mut candidates, &chunks, config.top_k_initial)
                .await
            {
                degraded.push(mode);
            }
        }

        let selected =
            TopKSelector::new(config.relevance_threshold).select(candidates, config.top_k_final);

        let results: Vec<SearchResult> = selected
            .into_iter()
            .filter_map(|candidate| {
                let chunk = chunks.get(&candidate.chunk_id)?;
                Some(SearchResult::from_candidate(candidate, chunk))
            })
            .collect();

        let latency_ms = start.elapsed().as_millis() as u64;

        info!(
            "Search completed in {}ms, returned {} results",
            latency_ms,
            results.len()
        );

        let results = SearchResults {
            query: query.to_string(),
            intent: intent.kind,
            total_results: results.len(),
            latency_ms,
            degraded,
            results,
        };

        if let (Some(cache), Some(key)) = (&self.cache, cache_key) {
            if results.degraded.is_empty() {
                cache.put(key, results.clone());
            }
        }

        SearchOutcome::Ranked(results)
    }

    /// Fetch every candidate chunk; ids that no longer resolve are dropped.
    async fn resolve_chunks(
        &self,
        semantic: &[(String, f32)],
        lexical: &[(String, f32)],
    ) -> HashMap<String, Chunk> {
        let ids: BTreeSet<&String> = semantic.iter().chain(lexical).map(|(id, _)| id).collect();
        let mut chunks = HashMap::with_capacity(ids.len());

        for id in ids {
            match self.chunks.get(id).await {
                Ok(Some(chunk)) => {
                    chunks.insert(id.clone(), chunk);
                }
                Ok(None) => {
                    warn!("{}; dropping candidate", RagError::ChunkNotFound { id: id.clone() });
                }
                Err(e) => {
                    warn!("Failed to load chunk {}: {}; dropping candidate", id, e);
                }
            }
        }

        chunks
    }
}

fn retain_resolved(hits: Vec<(String, f32)>, chunks: &HashMap<String, Chunk>) -> Vec<(String, f32)> {
    hits.into_iter()
        .filter(|(id, _)| chunks.contains_key(id))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rag_core::{BoostSignal, DegradedMode, IntentKind, Strategy, META_SOURCE_PATH};
    use rag_store::MemoryStore;

    struct FixedEmbedder(Vec<f32>);

    #[async_trait]
    impl Embedder for FixedEmbedder {
        async fn embed_query(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(self.0.clone())
        }
    }

    struct DownVectorIndex;

    #[async_trait]
    impl VectorIndex for DownVectorIndex {
        async fn search(&self, _embedding: &[f32], _k: usize) -> Result<Vec<(String, f32)>> {
            Err(RagError::semantic_unavailable("vector index offline"))
        }
    }

    struct DownLexicalIndex;

    #[async_trait]
    impl LexicalIndex for DownLexicalIndex {
        async fn search(&self, _terms: &BTreeSet<String>, _k: usize) -> Result<Vec<(String, f32)>> {
            Err(RagError::lexical_unavailable("lexical index offline"))
        }
    }

    struct GhostVectorIndex;

    #[async_trait]
    impl VectorIndex for GhostVectorIndex {
        async fn search(&self, _embedding: &[f32], _k: usize) -> Result<Vec<(String, f32)>> {
            Ok(vec![("ghost".to_string(), 0.99), ("generic".to_string(), 0.6)])
        }
    }

    struct FailingReranker;

    #[async_trait]
    impl Reranker for FailingReranker {
        async fn score(&self, _query: &str, _texts: &[&str]) -> Result<Vec<f32>> {
            Err(RagError::provider("rerank service returned 503"))
        }
    }

    /// Relevant only when the text mentions adherence.
    struct AdherenceReranker;

    #[async_trait]
    impl Reranker for AdherenceReranker {
        async fn score(&self, _query: &str, texts: &[&str]) -> Result<Vec<f32>> {
            Ok(texts
                .iter()
                .map(|t| if t.contains("adherence") { 0.97 } else { 0.02 })
                .collect())
        }
    }

    fn corpus() -> Arc<MemoryStore> {
        let store = MemoryStore::new();
        let rows = [
            ("qm1", "QM1 pathway adherence measure logic", vec![0.6, 0.8]),
            (
                "generic",
                "Overview of quality measure logic and reporting",
                vec![1.0, 0.0],
            ),
            ("billing", "Billing codes and claims processing", vec![0.0, 1.0]),
            (
                "readmit",
                "Hospital readmission trends by quarter and facility",
                vec![0.8, 0.6],
            ),
            (
                "model",
                "select patient_id, readmitted from dim_patient join encounters",
                vec![0.7, 0.7],
            ),
        ];
        for (id, text, embedding) in rows {
            let chunk = Chunk::new(id, text).with_metadata(META_SOURCE_PATH, format!("docs/{}.md", id));
            store.insert(chunk, Some(embedding)).unwrap();
        }
        Arc::new(store)
    }

    fn engine_with(config: RagConfig, backends: Backends) -> RetrievalEngine {
        RetrievalEngine::new(config, backends).unwrap()
    }

    fn engine(config: RagConfig) -> RetrievalEngine {
        let backends =
            Backends::from_store(corpus()).with_embedder(Arc::new(FixedEmbedder(vec![1.0, 0.0])));
        engine_with(config, backends)
    }

    fn ranked(outcome: SearchOutcome) -> SearchResults {
        match outcome {
            SearchOutcome::Ranked(results) => results,
            SearchOutcome::CannotRetrieve { reason, .. } => panic!("cannot retrieve: {}", reason),
        }
    }

    fn ids(results: &SearchResults) -> Vec<&str> {
        results.results.iter().map(|r| r.chunk_id.as_str()).collect()
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = RagConfig::default();
        config.retrieval.semantic_weight = 0.9;
        let result = RetrievalEngine::new(config, Backends::from_store(corpus()));
        assert!(matches!(result, Err(RagError::Config { .. })));
    }

    #[test]
    fn test_weights_follow_intent() {
        let engine = engine(RagConfig::default());

        let (intent, config) = engine.resolve("which table joins dim_patient");
        assert_eq!(intent.kind, IntentKind::Structured);
        assert_eq!((config.semantic_weight, config.lexical_weight), (0.4, 0.6));

        let (intent, config) = engine.resolve("hospital readmission trends");
        assert_eq!(intent.kind, IntentKind::General);
        assert_eq!((config.semantic_weight, config.lexical_weight), (0.7, 0.3));
    }

    #[tokio::test]
    async fn test_short_code_outranks_generic_similarity() {
        let engine = engine(RagConfig::default());
        let results = ranked(engine.search("what is qm1 logic?").await);

        assert_eq!(results.intent, IntentKind::Structured);
        assert_eq!(results.results[0].chunk_id, "qm1");

        let top = &results.results[0];
        let generic = results
            .results
            .iter()
            .find(|r| r.chunk_id == "generic")
            .unwrap();
        assert!(generic.score_breakdown.semantic > top.score_breakdown.semantic);

        let signals: Vec<_> = top.score_breakdown.boosts.iter().map(|b| b.signal).collect();
        assert!(signals.contains(&BoostSignal::ShortCode));
        assert!(signals.contains(&BoostSignal::LogicKeyword));
        assert!(top.final_score > generic.final_score);
    }

    #[tokio::test]
    async fn test_general_query_has_no_boosts() {
        let engine = engine(RagConfig::default());
        let results = ranked(engine.search("hospital readmission trends").await);

        assert_eq!(results.intent, IntentKind::General);
        assert!(results.degraded.is_empty());
        for result in &results.results {
            assert!(result.score_breakdown.boosts.is_empty());
            assert_eq!(result.final_score, result.score_breakdown.merged);
        }
    }

    #[tokio::test]
    async fn test_search_is_deterministic() {
        let engine = engine(RagConfig::default());
        let query = "which table joins dim_patient for readmission logic";

        let first = ranked(engine.search(query).await);
        let second = ranked(engine.search(query).await);
        assert_eq!(first.results, second.results);
        assert_eq!(first.degraded, second.degraded);
    }

    #[tokio::test]
    async fn test_top_k_truncation() {
        let mut config = RagConfig::default();
        config.retrieval.top_k = 2;
        let engine = engine(config);

        let results = ranked(engine.search("quality measure logic").await);
        assert_eq!(results.total_results, 2);
        let ranks: Vec<u32> = results.results.iter().map(|r| r.rank).collect();
        assert_eq!(ranks, vec![1, 2]);
        assert!(results.results[0].final_score >= results.results[1].final_score);
    }

    #[tokio::test]
    async fn test_semantic_outage_goes_lexical_only() {
        let store = corpus();
        let backends = Backends {
            vector: Arc::new(DownVectorIndex),
            lexical: store.clone(),
            chunks: store,
            embedder: Some(Arc::new(FixedEmbedder(vec![1.0, 0.0]))),
            reranker: None,
        };
        let engine = engine_with(RagConfig::default(), backends);

        let results = ranked(engine.search("quality measure logic").await);
        assert_eq!(results.degraded, vec![DegradedMode::SemanticUnavailable]);
        assert!(!results.results.is_empty());
        for result in &results.results {
            assert_eq!(result.score_breakdown.semantic, None);
            assert!(result.score_breakdown.lexical.is_some());
        }
        assert_eq!(results.results[0].chunk_id, "generic");
    }

    #[tokio::test]
    async fn test_missing_embedder_goes_lexical_only() {
        let engine = engine_with(RagConfig::default(), Backends::from_store(corpus()));
        let results = ranked(engine.search("billing claims").await);
        assert_eq!(results.degraded, vec![DegradedMode::SemanticUnavailable]);
        assert_eq!(ids(&results), vec!["billing"]);
    }

    #[tokio::test]
    async fn test_lexical_outage_goes_semantic_only() {
        let store = corpus();
        let backends = Backends {
            vector: store.clone(),
            lexical: Arc::new(DownLexicalIndex),
            chunks: store,
            embedder: Some(Arc::new(FixedEmbedder(vec![1.0, 0.0]))),
            reranker: None,
        };
        let engine = engine_with(RagConfig::default(), backends);

        let results = ranked(engine.search("hospital readmission trends").await);
        assert_eq!(results.degraded, vec![DegradedMode::LexicalUnavailable]);
        assert_eq!(results.results[0].chunk_id, "generic");
    }

    #[tokio::test]
    async fn test_both_paths_down_cannot_retrieve() {
        let store = corpus();
        let backends = Backends {
            vector: Arc::new(DownVectorIndex),
            lexical: Arc::new(DownLexicalIndex),
            chunks: store,
            embedder: Some(Arc::new(FixedEmbedder(vec![1.0, 0.0]))),
            reranker: None,
        };
        let engine = engine_with(RagConfig::default(), backends);

        match engine.search("quality measure logic").await {
            SearchOutcome::CannotRetrieve { code, degraded, .. } => {
                assert_eq!(code, "RETRIEVAL_UNAVAILABLE");
                assert_eq!(
                    degraded,
                    vec![DegradedMode::SemanticUnavailable, DegradedMode::LexicalUnavailable]
                );
            }
            SearchOutcome::Ranked(_) => panic!("expected cannot retrieve"),
        }
    }

    #[tokio::test]
    async fn test_empty_query() {
        let engine = engine(RagConfig::default());
        match engine.search("   \t ").await {
            SearchOutcome::CannotRetrieve { code, .. } => assert_eq!(code, "EMPTY_QUERY"),
            SearchOutcome::Ranked(_) => panic!("expected cannot retrieve"),
        }

        let lexical_only = engine_with(RagConfig::default(), Backends::from_store(corpus()));
        match lexical_only.search("the of is").await {
            SearchOutcome::CannotRetrieve { code, .. } => assert_eq!(code, "EMPTY_QUERY"),
            SearchOutcome::Ranked(_) => panic!("expected cannot retrieve"),
        }
    }

    #[tokio::test]
    async fn test_no_match_is_empty_ranking() {
        let engine = engine_with(RagConfig::default(), Backends::from_store(corpus()));
        let results = ranked(engine.search("zebra").await);
        assert!(results.results.is_empty());
    }

    #[tokio::test]
    async fn test_missing_chunk_dropped() {
        let store = corpus();
        let backends = Backends {
            vector: Arc::new(GhostVectorIndex),
            lexical: store.clone(),
            chunks: store,
            embedder: Some(Arc::new(FixedEmbedder(vec![1.0, 0.0]))),
            reranker: None,
        };
        let engine = engine_with(RagConfig::default(), backends);

        let results = ranked(engine.search("quality measure overview").await);
        assert!(!ids(&results).contains(&"ghost"));
        assert_eq!(results.results[0].chunk_id, "generic");
        assert!(results.degraded.is_empty());
    }

    #[tokio::test]
    async fn test_semantic_strategy_skips_lexical() {
        let mut config = RagConfig::default();
        config.retrieval.strategy = Strategy::Semantic;
        let engine = engine(config);

        let results = ranked(engine.search("billing claims").await);
        assert!(results.degraded.is_empty());
        assert_eq!(results.results[0].chunk_id, "generic");
        assert!(results.results.iter().all(|r| r.score_breakdown.lexical.is_none()));
    }

    #[tokio::test]
    async fn test_rerank_failure_falls_back() {
        let mut config = RagConfig::default();
        config.retrieval.reranking_enabled = true;
        config.retrieval.rerank_top_k_initial = 5;
        config.retrieval.rerank_top_k_final = 3;

        let plain = ranked(engine(RagConfig::default()).search("what is qm1 logic?").await);

        let backends = Backends::from_store(corpus())
            .with_embedder(Arc::new(FixedEmbedder(vec![1.0, 0.0])))
            .with_reranker(Arc::new(FailingReranker));
        let engine = engine_with(config, backends);
        let results = ranked(engine.search("what is qm1 logic?").await);

        assert_eq!(results.degraded, vec![DegradedMode::RerankFallback]);
        assert_eq!(results.total_results, 3);
        assert_eq!(ids(&results), ids(&plain)[..3].to_vec());
        assert!(results.results.iter().all(|r| r.score_breakdown.rerank.is_none()));
    }

    #[tokio::test]
    async fn test_rerank_rescores_head() {
        let mut config = RagConfig::default();
        config.retrieval.reranking_enabled = true;
        config.retrieval.rerank_top_k_initial = 5;
        config.retrieval.rerank_top_k_final = 2;

        let plain = ranked(engine(RagConfig::default()).search("quality measure logic").await);
        assert_eq!(plain.results[0].chunk_id, "generic");

        let backends = Backends::from_store(corpus())
            .with_embedder(Arc::new(FixedEmbedder(vec![1.0, 0.0])))
            .with_reranker(Arc::new(AdherenceReranker));
        let engine = engine_with(config, backends);

        let results = ranked(engine.search("quality measure logic").await);

        assert!(results.degraded.is_empty());
        assert_eq!(results.total_results, 2);
        assert!(results.results.iter().all(|r| r.score_breakdown.rerank.is_some()));
        assert_eq!(results.results[0].chunk_id, "qm1");
    }

    #[tokio::test]
    async fn test_cache_serves_repeat_queries() {
        let mut config = RagConfig::default();
        config.retrieval.cache_capacity = 8;
        let engine = engine(config);

        let first = ranked(engine.search("Quality measure logic").await);
        let second = ranked(engine.search("  quality   MEASURE logic ").await);
        assert_eq!(first, second);
        assert_eq!(engine.cache.as_ref().map(|c| c.len()), Some(1));
    }
}
