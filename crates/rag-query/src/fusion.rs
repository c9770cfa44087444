//! Weighted fusion of semantic and lexical result lists.

use std::collections::{BTreeMap, HashMap};

use rag_core::{RetrievalConfig, ScoredCandidate};

/// Min-max scale scores into [0, 1] within one result list.
///
/// A list whose scores are all equal maps every entry to 1.0: each hit is
/// as good as the best one.
pub fn min_max_normalize(hits: &[(String, f32)]) -> HashMap<String, f32> {
    let (min, max) = hits
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), (_, s)| {
            (lo.min(*s), hi.max(*s))
        });
    let span = max - min;

    hits.iter()
        .map(|(id, score)| {
            let normalized = if span > f32::EPSILON {
                (score - min) / span
            } else {
                1.0
            };
            (id.clone(), normalized)
        })
        .collect()
}

/// Fuses two ranked lists into one candidate map.
#[derive(Debug, Default, Clone, Copy)]
pub struct ResultMerger;

impl ResultMerger {
    /// Merge the union of both lists.
    ///
    /// Ids missing from a list contribute 0 from that list to the merged
    /// score, while their raw score stays `None` for provenance. Boosts
    /// start at 0, so `final_score == merged_score` on output.
    pub fn merge(
        &self,
        semantic: &[(String, f32)],
        lexical: &[(String, f32)],
        config: &RetrievalConfig,
    ) -> BTreeMap<String, ScoredCandidate> {
        let semantic_norm = min_max_normalize(semantic);
        let lexical_norm = min_max_normalize(lexical);

        let semantic_raw: HashMap<&str, f32> =
            semantic.iter().map(|(id, s)| (id.as_str(), *s)).collect();
        let lexical_raw: HashMap<&str, f32> =
            lexical.iter().map(|(id, s)| (id.as_str(), *s)).collect();

        let mut merged = BTreeMap::new();
        for id in semantic.iter().chain(lexical).map(|(id, _)| id) {
            if merged.contains_key(id) {
                continue;
            }

            let score = config.semantic_weight * semantic_norm.get(id).copied().unwrap_or(0.0)
                + config.lexical_weight * lexical_norm.get(id).copied().unwrap_or(0.0);

            merged.insert(
                id.clone(),
                ScoredCandidate::merged(
                    id.clone(),
                    semantic_raw.get(id.as_str()).copied(),
                    lexical_raw.get(id.as_str()).copied(),
                    score,
                ),
            );
        }

        merged
    }
}
