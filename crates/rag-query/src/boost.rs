//! Additive domain boosts for STRUCTURED queries.
//!
//! Boosts stack without an upper clamp. Scores are ordinal, so several
//! strong exact-match signals on one chunk are meant to compound and push it
//! past chunks that are only semantically close.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use regex::Regex;
use tracing::debug;

use rag_core::text::{contains_word, split_words};
use rag_core::{
    BoostConfig, BoostContribution, BoostSignal, BoostWeights, Chunk, QueryIntent,
    RetrievalConfig, ScoredCandidate,
};

/// Rewards exact phrase, identifier, call and code matches plus structural
/// similarity between query and chunk.
#[derive(Debug, Clone)]
pub struct DomainBooster {
    structured_file_types: HashSet<String>,
    domain_path_markers: Vec<String>,
    logic_keywords: HashSet<String>,
    sql_keywords: HashSet<String>,
}

impl Default for DomainBooster {
    fn default() -> Self {
        Self::new(&BoostConfig::default())
    }
}

/// Query-side state computed once per `boost` call.
struct QuerySignals<'a> {
    intent: &'a QueryIntent,
    calls: Vec<(String, Regex)>,
    logic_keyword: Option<String>,
    sql_keywords: BTreeSet<String>,
}

impl DomainBooster {
    /// Create a booster from configured marker vocabularies.
    pub fn new(config: &BoostConfig) -> Self {
        Self {
            structured_file_types: config
                .structured_file_types
                .iter()
                .map(|t| format!(".{}", t.trim().trim_start_matches('.').to_lowercase()))
                .collect(),
            domain_path_markers: config
                .domain_path_markers
                .iter()
                .map(|m| m.trim().replace('\\', "/").to_lowercase())
                .filter(|m| !m.is_empty())
                .collect(),
            logic_keywords: config
                .logic_keywords
                .iter()
                .map(|k| k.trim().to_lowercase())
                .collect(),
            sql_keywords: config
                .sql_keywords
                .iter()
                .map(|k| k.trim().to_lowercase())
                .collect(),
        }
    }

    /// Apply boosts in place.
    ///
    /// A no-op unless `config.domain_boost` is set, which requires a
    /// STRUCTURED intent. Candidates missing from `chunks` are left as-is.
    pub fn boost(
        &self,
        candidates: &mut BTreeMap<String, ScoredCandidate>,
        intent: &QueryIntent,
        chunks: &HashMap<String, Chunk>,
        config: &RetrievalConfig,
    ) {
        if !config.domain_boost || !intent.is_structured() {
            return;
        }

        let signals = self.query_signals(intent);
        let mut boosted = 0usize;

        for (id, candidate) in candidates.iter_mut() {
            let Some(chunk) = chunks.get(id) else {
                continue;
            };

            for contribution in self.contributions(&signals, chunk, &config.boost) {
                candidate.apply_boost(contribution);
            }
            if !candidate.boosts.is_empty() {
                boosted += 1;
            }
        }

        debug!("Domain boosts applied to {} of {} candidates", boosted, candidates.len());
    }

    fn query_signals<'a>(&self, intent: &'a QueryIntent) -> QuerySignals<'a> {
        let calls = intent
            .function_calls
            .iter()
            .filter_map(|name| {
                let pattern = format!(r"\b{}\s*\(", regex::escape(name));
                Regex::new(&pattern).ok().map(|re| (name.clone(), re))
            })
            .collect();

        let logic_keyword = intent
            .words
            .iter()
            .find(|w| self.logic_keywords.contains(*w))
            .cloned();

        let sql_keywords = intent
            .words
            .iter()
            .filter(|w| self.sql_keywords.contains(*w))
            .cloned()
            .collect();

        QuerySignals {
            intent,
            calls,
            logic_keyword,
            sql_keywords,
        }
    }

    /// Every boost one chunk earns, in signal order.
    fn contributions(
        &self,
        signals: &QuerySignals<'_>,
        chunk: &Chunk,
        weights: &BoostWeights,
    ) -> Vec<BoostContribution> {
        let intent = signals.intent;
        let text = chunk.text.to_lowercase();
        let words: HashSet<String> = split_words(&text).into_iter().map(str::to_string).collect();
        let mut out = Vec::new();

        let mut push = |signal, amount: f32, matched: Option<String>| {
            if amount > 0.0 {
                out.push(BoostContribution {
                    signal,
                    amount,
                    matched,
                });
            }
        };

        for phrase in intent.phrases.iter().filter(|p| contains_word(&text, p)) {
            push(BoostSignal::ExactPhrase, weights.exact_phrase, Some(phrase.clone()));
        }

        for ident in intent.identifiers.iter().filter(|i| contains_word(&text, i)) {
            push(BoostSignal::Identifier, weights.identifier, Some(ident.clone()));
        }

        for (name, re) in &signals.calls {
            if re.is_match(&text) {
                push(BoostSignal::FunctionCall, weights.function_call, Some(name.clone()));
            }
        }

        if let Some(file_type) = chunk.file_type() {
            if self.structured_file_types.contains(&file_type) {
                push(BoostSignal::FileType, weights.file_type, Some(file_type));
            }
        }

        if let Some(path) = chunk.source_path() {
            let path = path.replace('\\', "/").to_lowercase();
            if let Some(marker) = self.domain_path_markers.iter().find(|m| path.contains(m.as_str())) {
                push(BoostSignal::DomainPath, weights.domain_path, Some(marker.clone()));
            }
        }

        if let Some(keyword) = &signals.logic_keyword {
            if words.iter().any(|w| self.logic_keywords.contains(w)) {
                push(BoostSignal::LogicKeyword, weights.logic_keyword, Some(keyword.clone()));
            }
        }

        if !signals.sql_keywords.is_empty() {
            let chunk_keywords: BTreeSet<&String> =
                words.iter().filter(|w| self.sql_keywords.contains(*w)).collect();
            let shared: Vec<&str> = signals
                .sql_keywords
                .iter()
                .filter(|k| chunk_keywords.contains(k))
                .map(String::as_str)
                .collect();

            if !shared.is_empty() {
                let (cq, cc) = (signals.sql_keywords.len(), chunk_keywords.len());
                let ratio = shared.len() as f32 / cq.max(cc) as f32;
                push(
                    BoostSignal::StructuralOverlap,
                    weights.structural_overlap * ratio,
                    Some(shared.join(",")),
                );
            }
        }

        for code in intent.short_codes.iter().filter(|c| contains_word(&text, c)) {
            push(BoostSignal::ShortCode, weights.short_code, Some(code.clone()));
        }

        out
    }
}
