//! Core domain types for the retrieval engine.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};

/// Metadata key holding the chunk's source path.
pub const META_SOURCE_PATH: &str = "source_path";

/// Metadata key holding the chunk's file type (e.g. `.sql`).
pub const META_FILE_TYPE: &str = "file_type";

/// An immutable unit of retrievable text.
///
/// Produced by the ingestion side; the engine only reads chunks by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Stable identifier.
    pub id: String,

    /// Chunk text content.
    pub text: String,

    /// Key-value metadata (source path, file type, timestamps, tags).
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Chunk {
    /// Create a chunk without metadata.
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            metadata: HashMap::new(),
        }
    }

    /// Builder-style metadata setter.
    pub fn with_metadata(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// Source path, if recorded.
    pub fn source_path(&self) -> Option<&str> {
        self.metadata.get(META_SOURCE_PATH).and_then(|v| v.as_str())
    }

    /// Normalized file type with a leading dot, lowercased.
    ///
    /// Uses the explicit `file_type` entry when present, otherwise the
    /// extension of the source path.
    pub fn file_type(&self) -> Option<String> {
        let raw = match self.metadata.get(META_FILE_TYPE).and_then(|v| v.as_str()) {
            Some(ft) => ft.to_string(),
            None => {
                let path = self.source_path()?;
                let file_name = path.rsplit(['/', '\\']).next()?;
                let (_, ext) = file_name.rsplit_once('.')?;
                ext.to_string()
            }
        };

        let trimmed = raw.trim().trim_start_matches('.').to_lowercase();
        if trimmed.is_empty() {
            None
        } else {
            Some(format!(".{}", trimmed))
        }
    }
}

/// Query intent classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentKind {
    /// Natural-language query.
    General,
    /// Query about code, schemas or structured-data artifacts.
    Structured,
}

impl std::fmt::Display for IntentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::General => write!(f, "general"),
            Self::Structured => write!(f, "structured"),
        }
    }
}

/// The analyzed form of a query. Computed once per query, immutable afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryIntent {
    /// Classification driving weight selection and boosting.
    pub kind: IntentKind,

    /// Lowercased, trimmed, whitespace-collapsed query.
    pub normalized: String,

    /// Terms for lexical scoring (stop words removed, identifiers decomposed).
    pub terms: BTreeSet<String>,

    /// Quoted substrings, verbatim (lowercased).
    pub quoted: Vec<String>,

    /// Multi-word phrases eligible for exact-phrase boosting.
    pub phrases: BTreeSet<String>,

    /// snake_case / camelCase identifiers, lowercased.
    pub identifiers: BTreeSet<String>,

    /// Names of `name(...)`-shaped calls, lowercased.
    pub function_calls: BTreeSet<String>,

    /// Short alphanumeric codes such as `qm1` or `dm3`.
    pub short_codes: BTreeSet<String>,

    /// Every lowercased word of the query, stop words included.
    pub words: BTreeSet<String>,
}

impl QueryIntent {
    /// Whether the query classifies as STRUCTURED.
    pub fn is_structured(&self) -> bool {
        self.kind == IntentKind::Structured
    }

    /// Whether normalization left nothing to search with.
    pub fn is_blank(&self) -> bool {
        self.normalized.is_empty()
    }
}

/// Domain boost signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoostSignal {
    ExactPhrase,
    Identifier,
    FunctionCall,
    FileType,
    DomainPath,
    LogicKeyword,
    StructuralOverlap,
    ShortCode,
}

impl BoostSignal {
    /// Short name used in logs and text output.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExactPhrase => "exact_phrase",
            Self::Identifier => "identifier",
            Self::FunctionCall => "function_call",
            Self::FileType => "file_type",
            Self::DomainPath => "domain_path",
            Self::LogicKeyword => "logic_keyword",
            Self::StructuralOverlap => "structural_overlap",
            Self::ShortCode => "short_code",
        }
    }
}

/// One applied boost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoostContribution {
    /// Which signal fired.
    pub signal: BoostSignal,

    /// Additive amount.
    pub amount: f32,

    /// What matched (phrase, identifier, code, marker).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched: Option<String>,
}

/// Per-query candidate state. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredCandidate {
    /// Chunk identifier.
    pub chunk_id: String,

    /// Raw semantic similarity, absent if the semantic path did not return it.
    pub semantic_score: Option<f32>,

    /// Raw lexical score, absent if the lexical path did not return it.
    pub lexical_score: Option<f32>,

    /// Weighted fusion of the normalized path scores.
    pub merged_score: f32,

    /// Sum of domain boosts.
    pub boost_score: f32,

    /// `merged_score + boost_score`, or the scaled reranker output.
    pub final_score: f32,

    /// Reranker relevance, when reranking replaced the score.
    pub rerank_score: Option<f32>,

    /// Boosts that fired, in evaluation order.
    pub boosts: Vec<BoostContribution>,

    /// 1-based rank, assigned at selection time (0 until then).
    pub rank: u32,
}

impl ScoredCandidate {
    /// Create a merged candidate with no boosts.
    pub fn merged(
        chunk_id: impl Into<String>,
        semantic_score: Option<f32>,
        lexical_score: Option<f32>,
        merged_score: f32,
    ) -> Self {
        Self {
            chunk_id: chunk_id.into(),
            semantic_score,
            lexical_score,
            merged_score,
            boost_score: 0.0,
            final_score: merged_score,
            rerank_score: None,
            boosts: Vec::new(),
            rank: 0,
        }
    }

    /// Add a boost and keep `final_score` in step.
    pub fn apply_boost(&mut self, contribution: BoostContribution) {
        self.boost_score += contribution.amount;
        self.final_score = self.merged_score + self.boost_score;
        self.boosts.push(contribution);
    }
}

/// A retrieval path running without one of its collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradedMode {
    /// Embedding service or vector index unavailable; lexical-only.
    SemanticUnavailable,
    /// Lexical index unavailable; semantic-only.
    LexicalUnavailable,
    /// Reranker failed; pre-rerank ordering kept.
    RerankFallback,
}

/// Status of one retrieval path after it ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathStatus {
    /// Searched; hits may be empty.
    Searched,
    /// Not searched (nothing to search with, or disabled by strategy).
    Skipped,
    /// Collaborator failed or timed out.
    Unavailable(DegradedMode),
}

/// Ranked hits from one retrieval path.
#[derive(Debug, Clone, PartialEq)]
pub struct PathResult {
    /// `(chunk_id, score)` ordered by score desc, id asc.
    pub hits: Vec<(String, f32)>,

    /// How the path ended.
    pub status: PathStatus,
}

impl PathResult {
    /// Successful search.
    pub fn searched(hits: Vec<(String, f32)>) -> Self {
        Self {
            hits,
            status: PathStatus::Searched,
        }
    }

    /// Path was not run.
    pub fn skipped() -> Self {
        Self {
            hits: Vec::new(),
            status: PathStatus::Skipped,
        }
    }

    /// Path failed; degrade.
    pub fn unavailable(mode: DegradedMode) -> Self {
        Self {
            hits: Vec::new(),
            status: PathStatus::Unavailable(mode),
        }
    }

    /// Whether the path actually searched.
    pub fn is_searched(&self) -> bool {
        self.status == PathStatus::Searched
    }

    /// The degraded mode this path recorded, if any.
    pub fn degraded(&self) -> Option<DegradedMode> {
        match self.status {
            PathStatus::Unavailable(mode) => Some(mode),
            _ => None,
        }
    }
}

/// Order `(chunk_id, score)` hits and keep the best `k`.
///
/// Non-finite scores are dropped, and a repeated id keeps its best score.
/// Ties break by ascending chunk id.
pub fn rank_hits(mut hits: Vec<(String, f32)>, k: usize) -> Vec<(String, f32)> {
    hits.retain(|(_, score)| score.is_finite());
    hits.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    let mut seen = HashSet::new();
    hits.retain(|(id, _)| seen.insert(id.clone()));
    hits.truncate(k);
    hits
}

/// Score provenance for one result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub semantic: Option<f32>,
    pub lexical: Option<f32>,
    pub merged: f32,
    pub boosts: Vec<BoostContribution>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rerank: Option<f32>,
}

/// A ranked result handed to answer generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Result rank (1-indexed).
    pub rank: u32,

    /// Chunk identifier.
    pub chunk_id: String,

    /// Chunk text.
    pub text: String,

    /// Chunk metadata.
    pub metadata: HashMap<String, serde_json::Value>,

    /// Final ordinal score (higher is better; not a probability).
    pub final_score: f32,

    /// How the score was built.
    pub score_breakdown: ScoreBreakdown,
}

impl SearchResult {
    /// Package a selected candidate with its chunk.
    pub fn from_candidate(candidate: ScoredCandidate, chunk: &Chunk) -> Self {
        Self {
            rank: candidate.rank,
            chunk_id: candidate.chunk_id,
            text: chunk.text.clone(),
            metadata: chunk.metadata.clone(),
            final_score: candidate.final_score,
            score_breakdown: ScoreBreakdown {
                semantic: candidate.semantic_score,
                lexical: candidate.lexical_score,
                merged: candidate.merged_score,
                boosts: candidate.boosts,
                rerank: candidate.rerank_score,
            },
        }
    }
}

/// Search results container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResults {
    /// The original query.
    pub query: String,

    /// How the query was classified.
    pub intent: IntentKind,

    /// Total results returned.
    pub total_results: usize,

    /// Search latency in milliseconds.
    pub latency_ms: u64,

    /// Collaborators that were unavailable for this query.
    #[serde(default)]
    pub degraded: Vec<DegradedMode>,

    /// Individual results.
    pub results: Vec<SearchResult>,
}

/// Outcome of one query.
///
/// `CannotRetrieve` means the engine could not search at all; an empty
/// `Ranked` means it searched and found nothing relevant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SearchOutcome {
    Ranked(SearchResults),
    CannotRetrieve {
        query: String,
        code: String,
        reason: String,
        /// Paths that failed for this query, when the cause is an outage.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        degraded: Vec<DegradedMode>,
    },
}

impl SearchOutcome {
    /// Build a `CannotRetrieve` outcome from the error that caused it.
    pub fn cannot_retrieve(query: &str, error: &crate::RagError) -> Self {
        Self::cannot_retrieve_degraded(query, error, Vec::new())
    }

    /// Build a `CannotRetrieve` outcome that also records the failed paths.
    pub fn cannot_retrieve_degraded(
        query: &str,
        error: &crate::RagError,
        degraded: Vec<DegradedMode>,
    ) -> Self {
        Self::CannotRetrieve {
            query: query.to_string(),
            code: error.error_code().to_string(),
            reason: error.to_string(),
            degraded,
        }
    }

    /// Ranked results, if the engine could search.
    pub fn results(&self) -> Option<&SearchResults> {
        match self {
            Self::Ranked(results) => Some(results),
            Self::CannotRetrieve { .. } => None,
        }
    }
}
