//! rag-query - Hybrid retrieval and ranking engine
//!
//! This crate turns a query into a ranked list of chunks by fusing a
//! semantic (embedding similarity) signal with a lexical (BM25) signal.
//!
//! # Pipeline
//!
//! - [`QueryAnalyzer`]: normalization, term extraction, intent
//! - [`SemanticRetriever`] and [`LexicalRetriever`]: run concurrently
//! - [`ResultMerger`]: min-max normalization and intent-weighted fusion
//! - [`DomainBooster`]: additive exact-match boosts for STRUCTURED queries
//! - [`RerankStage`]: optional cross-encoder rescoring with silent fallback
//! - [`TopKSelector`]: deterministic ordering and truncation
//!
//! # Example
//!
//! ```rust,ignore
//! use rag_query::{Backends, RetrievalEngine};
//! use std::sync::Arc;
//!
//! let engine = RetrievalEngine::new(config, Backends::from_store(Arc::new(store)))?;
//! let outcome = engine.search("what is qm1 logic?").await;
//! ```

mod analyzer;
mod boost;
mod cache;
mod engine;
mod fusion;
mod lexical;
mod rerank;
mod select;
mod semantic;

pub use analyzer::QueryAnalyzer;
pub use boost::DomainBooster;
pub use cache::QueryCache;
pub use engine::{Backends, RetrievalEngine};
pub use fusion::{min_max_normalize, ResultMerger};
pub use lexical::LexicalRetriever;
pub use rerank::RerankStage;
pub use select::{compare_candidates, TopKSelector};
pub use semantic::SemanticRetriever;

// Re-export for convenience
pub use rag_core::{SearchOutcome, SearchResult, SearchResults};
