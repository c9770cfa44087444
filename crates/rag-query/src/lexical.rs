//! Lexical retrieval over an external inverted index.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, warn};

use rag_core::{DegradedMode, LexicalIndex, PathResult};

/// Scores query terms against a BM25-style index.
pub struct LexicalRetriever {
    index: Arc<dyn LexicalIndex>,
    timeout: Duration,
}

impl LexicalRetriever {
    /// Create a retriever.
    pub fn new(index: Arc<dyn LexicalIndex>, timeout: Duration) -> Self {
        Self { index, timeout }
    }

    /// Return at most `k` hits, score descending, ties by ascending chunk id.
    ///
    /// An empty term set skips the index. Failures surface as
    /// [`DegradedMode::LexicalUnavailable`].
    pub async fn retrieve(&self, terms: &BTreeSet<String>, k: usize) -> PathResult {
        if terms.is_empty() {
            debug!("No lexical terms; skipping lexical path");
            return PathResult::skipped();
        }

        match timeout(self.timeout, self.index.search(terms, k)).await {
            Ok(Ok(hits)) => {
                let hits = rag_core::rank_hits(hits, k);
                debug!("Lexical path returned {} hits", hits.len());
                PathResult::searched(hits)
            }
            Ok(Err(e)) => {
                warn!("Lexical index unavailable: {}", e);
                PathResult::unavailable(DegradedMode::LexicalUnavailable)
            }
            Err(_) => {
                warn!("Lexical search timed out after {:?}", self.timeout);
                PathResult::unavailable(DegradedMode::LexicalUnavailable)
            }
        }
    }
}
