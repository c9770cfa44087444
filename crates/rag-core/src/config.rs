//! Configuration for the retrieval engine.
//!
//! [`RagConfig`] is the static configuration loaded from TOML and validated
//! once at startup. [`RetrievalConfig`] is the immutable per-query view
//! resolved from it and the query's [`QueryIntent`].

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{RagError, Result};
use crate::types::{IntentKind, QueryIntent};

/// Tolerance for the `semantic + lexical == 1.0` weight invariant.
pub const WEIGHT_TOLERANCE: f32 = 1e-6;

/// Main configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RagConfig {
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Retrieval and ranking options.
    #[serde(default)]
    pub retrieval: RetrievalSettings,

    /// Query analysis vocabulary.
    #[serde(default)]
    pub analyzer: AnalyzerConfig,

    /// Domain boost magnitudes and markers.
    #[serde(default)]
    pub boost: BoostConfig,

    /// External embedding and rerank services.
    #[serde(default)]
    pub providers: ProvidersConfig,
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file.
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

/// Retrieval strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Semantic path only.
    Semantic,
    /// Semantic and lexical paths fused.
    Hybrid,
}

/// Retrieval and ranking options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalSettings {
    /// Number of results returned when reranking is off.
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Which retrieval paths run.
    #[serde(default = "default_strategy")]
    pub strategy: Strategy,

    /// Semantic weight for GENERAL queries.
    #[serde(default = "default_semantic_weight")]
    pub semantic_weight: f32,

    /// Lexical weight for GENERAL queries.
    #[serde(default = "default_lexical_weight")]
    pub lexical_weight: f32,

    /// Semantic weight for STRUCTURED queries.
    #[serde(default = "default_structured_semantic_weight")]
    pub structured_semantic_weight: f32,

    /// Lexical weight for STRUCTURED queries.
    #[serde(default = "default_structured_lexical_weight")]
    pub structured_lexical_weight: f32,

    /// Rescore the head of the ranking with a cross-encoder.
    #[serde(default)]
    pub reranking_enabled: bool,

    /// Number of candidates sent to the reranker.
    #[serde(default = "default_rerank_top_k_initial")]
    pub rerank_top_k_initial: usize,

    /// Number of results returned when reranking is on.
    #[serde(default = "default_rerank_top_k_final")]
    pub rerank_top_k_final: usize,

    /// Drop candidates whose final score falls below this value.
    #[serde(default)]
    pub relevance_threshold: Option<f32>,

    /// Apply domain boosts to STRUCTURED queries.
    #[serde(default = "default_true")]
    pub domain_boost_enabled: bool,

    /// Each retriever fetches `max(final_k * fetch_multiplier, min_fetch_k)`.
    #[serde(default = "default_fetch_multiplier")]
    pub fetch_multiplier: usize,

    /// Floor for the per-retriever fetch size.
    #[serde(default = "default_min_fetch_k")]
    pub min_fetch_k: usize,

    /// Per-retriever timeout in milliseconds.
    #[serde(default = "default_retriever_timeout_ms")]
    pub retriever_timeout_ms: u64,

    /// Reranker timeout in milliseconds.
    #[serde(default = "default_rerank_timeout_ms")]
    pub rerank_timeout_ms: u64,

    /// Capacity of the in-process result cache; 0 disables it.
    #[serde(default)]
    pub cache_capacity: usize,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            strategy: default_strategy(),
            semantic_weight: default_semantic_weight(),
            lexical_weight: default_lexical_weight(),
            structured_semantic_weight: default_structured_semantic_weight(),
            structured_lexical_weight: default_structured_lexical_weight(),
            reranking_enabled: false,
            rerank_top_k_initial: default_rerank_top_k_initial(),
            rerank_top_k_final: default_rerank_top_k_final(),
            relevance_threshold: None,
            domain_boost_enabled: true,
            fetch_multiplier: default_fetch_multiplier(),
            min_fetch_k: default_min_fetch_k(),
            retriever_timeout_ms: default_retriever_timeout_ms(),
            rerank_timeout_ms: default_rerank_timeout_ms(),
            cache_capacity: 0,
        }
    }
}

/// Query analysis vocabulary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    /// Whole-word keywords that mark a query as STRUCTURED.
    #[serde(default = "default_structural_keywords")]
    pub structural_keywords: Vec<String>,

    /// Words removed from the lexical term set.
    #[serde(default = "default_stop_words")]
    pub stop_words: Vec<String>,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            structural_keywords: default_structural_keywords(),
            stop_words: default_stop_words(),
        }
    }
}

/// Boost magnitudes, resolved into every [`RetrievalConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoostWeights {
    pub exact_phrase: f32,
    pub identifier: f32,
    pub function_call: f32,
    pub file_type: f32,
    pub domain_path: f32,
    pub logic_keyword: f32,
    pub structural_overlap: f32,
    pub short_code: f32,
}

impl BoostWeights {
    fn as_pairs(&self) -> [(&'static str, f32); 8] {
        [
            ("exact_phrase", self.exact_phrase),
            ("identifier", self.identifier),
            ("function_call", self.function_call),
            ("file_type", self.file_type),
            ("domain_path", self.domain_path),
            ("logic_keyword", self.logic_keyword),
            ("structural_overlap", self.structural_overlap),
            ("short_code", self.short_code),
        ]
    }
}

/// Domain boost magnitudes and marker vocabularies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoostConfig {
    /// Per distinct ≥2-word phrase found verbatim.
    #[serde(default = "default_exact_phrase_boost")]
    pub exact_phrase: f32,

    /// Per distinct query identifier found verbatim.
    #[serde(default = "default_identifier_boost")]
    pub identifier: f32,

    /// Per `name(...)` call found in the chunk.
    #[serde(default = "default_function_call_boost")]
    pub function_call: f32,

    /// Flat, when the chunk is a structured-data file type.
    #[serde(default = "default_file_type_boost")]
    pub file_type: f32,

    /// Flat, when the chunk path matches a domain marker.
    #[serde(default = "default_domain_path_boost")]
    pub domain_path: f32,

    /// Flat, when query and chunk both contain a logic keyword.
    #[serde(default = "default_logic_keyword_boost")]
    pub logic_keyword: f32,

    /// Upper bound of the scaled SQL keyword overlap boost.
    #[serde(default = "default_structural_overlap_boost")]
    pub structural_overlap: f32,

    /// Per short alphanumeric code found verbatim.
    #[serde(default = "default_short_code_boost")]
    pub short_code: f32,

    /// File types counted as structured data.
    #[serde(default = "default_structured_file_types")]
    pub structured_file_types: Vec<String>,

    /// Source path fragments marking domain artifacts.
    #[serde(default = "default_domain_path_markers")]
    pub domain_path_markers: Vec<String>,

    /// Keywords describing business logic.
    #[serde(default = "default_logic_keywords")]
    pub logic_keywords: Vec<String>,

    /// SQL keywords compared for structural overlap.
    #[serde(default = "default_sql_keywords")]
    pub sql_keywords: Vec<String>,
}

impl Default for BoostConfig {
    fn default() -> Self {
        Self {
            exact_phrase: default_exact_phrase_boost(),
            identifier: default_identifier_boost(),
            function_call: default_function_call_boost(),
            file_type: default_file_type_boost(),
            domain_path: default_domain_path_boost(),
            logic_keyword: default_logic_keyword_boost(),
            structural_overlap: default_structural_overlap_boost(),
            short_code: default_short_code_boost(),
            structured_file_types: default_structured_file_types(),
            domain_path_markers: default_domain_path_markers(),
            logic_keywords: default_logic_keywords(),
            sql_keywords: default_sql_keywords(),
        }
    }
}

impl BoostConfig {
    /// Magnitudes only.
    pub fn weights(&self) -> BoostWeights {
        BoostWeights {
            exact_phrase: self.exact_phrase,
            identifier: self.identifier,
            function_call: self.function_call,
            file_type: self.file_type,
            domain_path: self.domain_path,
            logic_keyword: self.logic_keyword,
            structural_overlap: self.structural_overlap,
            short_code: self.short_code,
        }
    }
}

/// External HTTP services.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvidersConfig {
    /// Query embedding service (OpenAI-compatible `/embeddings`).
    #[serde(default)]
    pub embedding: Option<ProviderConfig>,

    /// Cross-encoder rerank service (`/rerank`).
    #[serde(default)]
    pub rerank: Option<ProviderConfig>,
}

/// One HTTP provider endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Base URL, e.g. `http://localhost:8080`.
    pub api_base: String,

    /// Path appended to the base URL, e.g. `/v1/embeddings`.
    pub path: String,

    /// Model name sent with each request.
    pub model: String,

    /// Bearer token; empty for unauthenticated endpoints.
    #[serde(default)]
    pub api_key: String,

    /// Request timeout in milliseconds.
    #[serde(default = "default_provider_timeout_ms")]
    pub timeout_ms: u64,
}

/// Per-query configuration, resolved from [`RagConfig`] and the query intent.
///
/// Passed explicitly through the pipeline and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalConfig {
    /// Intent the weights were selected for.
    pub intent: IntentKind,

    /// Strategy in force.
    pub strategy: Strategy,

    /// Weight of the normalized semantic score.
    pub semantic_weight: f32,

    /// Weight of the normalized lexical score.
    pub lexical_weight: f32,

    /// Candidates requested from each retriever.
    pub fetch_k: usize,

    /// Candidates rescored by the reranker.
    pub top_k_initial: usize,

    /// Results returned.
    pub top_k_final: usize,

    /// Boost magnitudes.
    pub boost: BoostWeights,

    /// Whether domain boosts run for this query.
    pub domain_boost: bool,

    /// Whether the reranker runs.
    pub rerank: bool,

    /// Minimum final score kept.
    pub relevance_threshold: Option<f32>,
}

impl RetrievalConfig {
    /// Resolve the per-query configuration.
    pub fn resolve(config: &RagConfig, intent: &QueryIntent) -> Self {
        let settings = &config.retrieval;

        let (semantic_weight, lexical_weight) = match (settings.strategy, intent.kind) {
            (Strategy::Semantic, _) => (1.0, 0.0),
            (Strategy::Hybrid, IntentKind::Structured) => (
                settings.structured_semantic_weight,
                settings.structured_lexical_weight,
            ),
            (Strategy::Hybrid, IntentKind::General) => {
                (settings.semantic_weight, settings.lexical_weight)
            }
        };

        let top_k_final = if settings.reranking_enabled {
            settings.rerank_top_k_final
        } else {
            settings.top_k
        };

        let fetch_k = (top_k_final * settings.fetch_multiplier)
            .max(settings.min_fetch_k)
            .max(if settings.reranking_enabled {
                settings.rerank_top_k_initial
            } else {
                0
            });

        Self {
            intent: intent.kind,
            strategy: settings.strategy,
            semantic_weight,
            lexical_weight,
            fetch_k,
            top_k_initial: settings.rerank_top_k_initial,
            top_k_final,
            boost: config.boost.weights(),
            domain_boost: settings.domain_boost_enabled && intent.is_structured(),
            rerank: settings.reranking_enabled,
            relevance_threshold: settings.relevance_threshold,
        }
    }

    /// Whether the lexical path runs.
    pub fn uses_lexical(&self) -> bool {
        self.strategy == Strategy::Hybrid
    }
}

// Default value functions

fn default_true() -> bool {
    true
}

fn default_top_k() -> usize {
    10
}

fn default_strategy() -> Strategy {
    Strategy::Hybrid
}

fn default_semantic_weight() -> f32 {
    0.7
}

fn default_lexical_weight() -> f32 {
    0.3
}

fn default_structured_semantic_weight() -> f32 {
    0.4
}

fn default_structured_lexical_weight() -> f32 {
    0.6
}

fn default_rerank_top_k_initial() -> usize {
    20
}

fn default_rerank_top_k_final() -> usize {
    5
}

fn default_fetch_multiplier() -> usize {
    2
}

fn default_min_fetch_k() -> usize {
    20
}

fn default_retriever_timeout_ms() -> u64 {
    3000
}

fn default_rerank_timeout_ms() -> u64 {
    5000
}

fn default_provider_timeout_ms() -> u64 {
    10000
}

fn default_exact_phrase_boost() -> f32 {
    0.3
}

fn default_identifier_boost() -> f32 {
    0.4
}

fn default_function_call_boost() -> f32 {
    0.5
}

fn default_file_type_boost() -> f32 {
    0.3
}

fn default_domain_path_boost() -> f32 {
    0.2
}

fn default_logic_keyword_boost() -> f32 {
    0.4
}

fn default_structural_overlap_boost() -> f32 {
    0.3
}

fn default_short_code_boost() -> f32 {
    0.6
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

fn default_structural_keywords() -> Vec<String> {
    strings(&[
        "sql", "select", "join", "table", "schema", "model", "dbt", "macro", "function", "query",
        "database", "column",
    ])
}

fn default_stop_words() -> Vec<String> {
    strings(&["the", "a", "an", "of", "in", "is"])
}

fn default_structured_file_types() -> Vec<String> {
    strings(&[".sql", ".yml", ".yaml", ".csv"])
}

fn default_domain_path_markers() -> Vec<String> {
    strings(&["models/", "macros/", "analyses/", "seeds/"])
}

fn default_logic_keywords() -> Vec<String> {
    strings(&[
        "logic",
        "calculation",
        "formula",
        "rule",
        "criteria",
        "definition",
    ])
}

fn default_sql_keywords() -> Vec<String> {
    strings(&[
        "select", "from", "join", "where", "group", "order", "having", "union", "with", "case",
        "when", "insert", "update", "delete", "partition", "over", "distinct", "limit",
    ])
}

fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("rag-hybrid")
        .join("rag.db")
}

impl RagConfig {
    /// Load and validate configuration from file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| RagError::config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from default paths.
    pub fn load_default() -> Result<Self> {
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("rag-hybrid").join("config.toml");
            if user_config.exists() {
                return Self::load(&user_config);
            }
        }

        let local_config = PathBuf::from("rag.toml");
        if local_config.exists() {
            return Self::load(&local_config);
        }

        Ok(Self::default())
    }

    /// Check the configuration contract. Violations are fatal at load time.
    pub fn validate(&self) -> Result<()> {
        let r = &self.retrieval;

        check_weight_pair("semantic_weight", r.semantic_weight, "lexical_weight", r.lexical_weight)?;
        check_weight_pair(
            "structured_semantic_weight",
            r.structured_semantic_weight,
            "structured_lexical_weight",
            r.structured_lexical_weight,
        )?;

        if r.top_k == 0 {
            return Err(RagError::config("top_k must be greater than 0"));
        }
        if r.fetch_multiplier == 0 {
            return Err(RagError::config("fetch_multiplier must be greater than 0"));
        }
        if r.reranking_enabled {
            if r.rerank_top_k_initial == 0 || r.rerank_top_k_final == 0 {
                return Err(RagError::config("rerank sizes must be greater than 0"));
            }
            if r.rerank_top_k_final > r.rerank_top_k_initial {
                return Err(RagError::config(format!(
                    "rerank_top_k_final ({}) exceeds rerank_top_k_initial ({})",
                    r.rerank_top_k_final, r.rerank_top_k_initial
                )));
            }
        }
        if let Some(threshold) = r.relevance_threshold {
            if !threshold.is_finite() {
                return Err(RagError::config("relevance_threshold must be finite"));
            }
        }

        for (name, value) in self.boost.weights().as_pairs() {
            if !value.is_finite() || value < 0.0 {
                return Err(RagError::config(format!(
                    "boost.{} must be a non-negative number, got {}",
                    name, value
                )));
            }
        }

        Ok(())
    }
}

fn check_weight_pair(a_name: &str, a: f32, b_name: &str, b: f32) -> Result<()> {
    for (name, value) in [(a_name, a), (b_name, b)] {
        if !(0.0..=1.0).contains(&value) {
            return Err(RagError::config(format!(
                "{} must be within [0, 1], got {}",
                name, value
            )));
        }
    }
    if ((a + b) - 1.0).abs() > WEIGHT_TOLERANCE {
        return Err(RagError::config(format!(
            "{} + {} must equal 1.0, got {}",
            a_name,
            b_name,
            a + b
        )));
    }
    Ok(())
}
