//! Deterministic ordering and top-k selection.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use rag_core::ScoredCandidate;

/// Total order over candidates: final score desc, lexical score desc
/// (absent lowest), chunk id asc.
pub fn compare_candidates(a: &ScoredCandidate, b: &ScoredCandidate) -> Ordering {
    b.final_score
        .total_cmp(&a.final_score)
        .then_with(|| match (a.lexical_score, b.lexical_score) {
            (Some(x), Some(y)) => y.total_cmp(&x),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| a.chunk_id.cmp(&b.chunk_id))
}

/// Picks the final ranked list.
#[derive(Debug, Default, Clone, Copy)]
pub struct TopKSelector {
    threshold: Option<f32>,
}

impl TopKSelector {
    /// Create a selector; candidates scoring below `threshold` are dropped.
    pub fn new(threshold: Option<f32>) -> Self {
        Self { threshold }
    }

    /// Sort every candidate in order.
    pub fn order(candidates: impl IntoIterator<Item = ScoredCandidate>) -> Vec<ScoredCandidate> {
        let mut ordered: Vec<ScoredCandidate> = candidates.into_iter().collect();
        ordered.sort_by(compare_candidates);
        ordered
    }

    /// Return at most `top_k` candidates, ranked 1..=n.
    pub fn select(
        &self,
        candidates: BTreeMap<String, ScoredCandidate>,
        top_k: usize,
    ) -> Vec<ScoredCandidate> {
        let kept = candidates.into_values().filter(|c| {
            c.final_score.is_finite() && self.threshold.map_or(true, |t| c.final_score >= t)
        });

        let mut selected = Self::order(kept);
        selected.truncate(top_k);

        for (i, candidate) in selected.iter_mut().enumerate() {
            candidate.rank = (i + 1) as u32;
        }

        selected
    }
}
