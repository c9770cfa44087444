//! Query normalization, term extraction and intent classification.

use std::collections::{BTreeSet, HashSet};
use std::sync::LazyLock;

use regex::Regex;

use rag_core::text::{decompose, is_camel_case, is_snake_case, split_words};
use rag_core::{AnalyzerConfig, IntentKind, QueryIntent};

/// `"quoted"` or `` `backticked` `` substrings.
static QUOTED_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#""([^"]+)"|`([^`]+)`"#).ok());

/// `name(...)` with no space before the parenthesis.
static CALL_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"([A-Za-z_][A-Za-z0-9_]*)\(([^()]*)\)").ok());

/// 2–4 letters followed by 1–3 digits, e.g. `qm1`, `dm3`.
static SHORT_CODE_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[a-z]{2,4}[0-9]{1,3}$").ok());

/// Turns raw query text into a [`QueryIntent`].
///
/// Pure: the output depends only on the query and the configured vocabulary.
#[derive(Debug, Clone)]
pub struct QueryAnalyzer {
    structural_keywords: HashSet<String>,
    stop_words: HashSet<String>,
}

impl Default for QueryAnalyzer {
    fn default() -> Self {
        Self::new(&AnalyzerConfig::default())
    }
}

impl QueryAnalyzer {
    /// Create an analyzer from configured vocabulary.
    pub fn new(config: &AnalyzerConfig) -> Self {
        Self {
            structural_keywords: lowercase_set(&config.structural_keywords),
            stop_words: lowercase_set(&config.stop_words),
        }
    }

    /// Analyze a query.
    pub fn analyze(&self, query: &str) -> QueryIntent {
        let trimmed = query.trim();
        let normalized = trimmed
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();

        let raw_words = split_words(trimmed);
        let words: Vec<String> = raw_words.iter().map(|w| w.to_lowercase()).collect();
        let word_set: BTreeSet<String> = words.iter().cloned().collect();

        let quoted = extract_quoted(trimmed);

        let identifiers: BTreeSet<String> = raw_words
            .iter()
            .filter(|w| is_snake_case(w) || is_camel_case(w))
            .map(|w| w.trim_matches('_').to_lowercase())
            .collect();

        let function_calls = extract_function_calls(trimmed);

        let short_codes: BTreeSet<String> = words
            .iter()
            .filter(|w| is_short_code(w))
            .cloned()
            .collect();

        // Identifiers and calls feed the boosts but do not route on their own.
        let has_keyword = words.iter().any(|w| self.structural_keywords.contains(w));
        let kind = if has_keyword || !short_codes.is_empty() {
            IntentKind::Structured
        } else {
            IntentKind::General
        };

        let terms = self.extract_terms(&raw_words, kind);
        let phrases = self.extract_phrases(&words, &quoted);

        QueryIntent {
            kind,
            normalized,
            terms,
            quoted,
            phrases,
            identifiers,
            function_calls,
            short_codes,
            words: word_set,
        }
    }

    /// Decomposed, stop-word-filtered lexical terms.
    ///
    /// Structural keywords survive stop-word removal on STRUCTURED queries.
    fn extract_terms(&self, raw_words: &[&str], kind: IntentKind) -> BTreeSet<String> {
        raw_words
            .iter()
            .flat_map(|w| decompose(w))
            .filter(|term| {
                if !self.stop_words.contains(term) {
                    return true;
                }
                kind == IntentKind::Structured && self.structural_keywords.contains(term)
            })
            .collect()
    }

    /// Multi-word phrases: quoted phrases plus adjacent non-stop-word bigrams.
    fn extract_phrases(&self, words: &[String], quoted: &[String]) -> BTreeSet<String> {
        let mut phrases: BTreeSet<String> = quoted
            .iter()
            .filter(|q| q.split_whitespace().count() >= 2)
            .cloned()
            .collect();

        for pair in words.windows(2) {
            if pair.iter().any(|w| self.stop_words.contains(w)) {
                continue;
            }
            phrases.insert(format!("{} {}", pair[0], pair[1]));
        }

        phrases
    }
}

fn lowercase_set(values: &[String]) -> HashSet<String> {
    values.iter().map(|v| v.trim().to_lowercase()).collect()
}

fn is_short_code(word: &str) -> bool {
    SHORT_CODE_RE
        .as_ref()
        .is_some_and(|re| re.is_match(word))
}

fn extract_quoted(text: &str) -> Vec<String> {
    let Some(re) = QUOTED_RE.as_ref() else {
        return Vec::new();
    };

    let mut quoted: Vec<String> = Vec::new();
    for caps in re.captures_iter(text) {
        let Some(inner) = caps.get(1).or_else(|| caps.get(2)) else {
            continue;
        };
        let phrase = inner
            .as_str()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();
        if !phrase.is_empty() && !quoted.contains(&phrase) {
            quoted.push(phrase);
        }
    }
    quoted
}

fn extract_function_calls(text: &str) -> BTreeSet<String> {
    let Some(re) = CALL_RE.as_ref() else {
        return BTreeSet::new();
    };

    re.captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|name| name.as_str().to_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(values: &[&str]) -> BTreeSet<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_structured_keyword_routing() {
        let intent = QueryAnalyzer::default().analyze("show me the dbt model for quality measures");
        assert_eq!(intent.kind, IntentKind::Structured);
        assert!(intent.terms.contains("dbt"));
        assert!(intent.terms.contains("model"));
        assert!(!intent.terms.contains("the"));
    }

    #[test]
    fn test_general_routing() {
        let intent = QueryAnalyzer::default().analyze("tell me about hospital readmission trends");
        assert_eq!(intent.kind, IntentKind::General);
        assert_eq!(
            intent.terms,
            set(&["tell", "me", "about", "hospital", "readmission", "trends"])
        );
    }

    #[test]
    fn test_keywords_match_whole_words_only() {
        let intent = QueryAnalyzer::default().analyze("selection of tablets");
        assert_eq!(intent.kind, IntentKind::General);
    }

    #[test]
    fn test_normalization() {
        let intent = QueryAnalyzer::default().analyze("   Hospital    READMISSION  ");
        assert_eq!(intent.normalized, "hospital readmission");
        assert!(QueryAnalyzer::default().analyze("  \t ").is_blank());
    }

    #[test]
    fn test_identifier_decomposition_in_terms() {
        let analyzer = QueryAnalyzer::default();

        let snake = analyzer.analyze("patient_summary_table");
        assert_eq!(
            snake.terms,
            set(&["patient", "summary", "table", "patient_summary_table"])
        );
        assert_eq!(snake.identifiers, set(&["patient_summary_table"]));

        let camel = analyzer.analyze("PatientData");
        assert_eq!(camel.terms, set(&["patient", "data", "patientdata"]));
        assert_eq!(camel.identifiers, set(&["patientdata"]));
    }

    #[test]
    fn test_quoted_phrases() {
        let intent =
            QueryAnalyzer::default().analyze(r#"where is "dim_patient" and "readmission rate" defined"#);
        assert_eq!(intent.quoted, vec!["dim_patient", "readmission rate"]);
        assert!(intent.phrases.contains("readmission rate"));
        assert!(!intent.phrases.contains("dim_patient"));
        assert!(intent.identifiers.contains("dim_patient"));
    }

    #[test]
    fn test_bigrams_skip_stop_words() {
        let intent = QueryAnalyzer::default().analyze("the quality measure of care");
        assert!(intent.phrases.contains("quality measure"));
        assert!(!intent.phrases.contains("the quality"));
        assert!(!intent.phrases.contains("measure of"));
    }

    #[test]
    fn test_function_calls_and_short_codes() {
        let intent = QueryAnalyzer::default().analyze("what is qm1 logic? see calc_rate(x, y) and DM3");
        assert_eq!(intent.function_calls, set(&["calc_rate"]));
        assert_eq!(intent.short_codes, set(&["dm3", "qm1"]));
        assert!(intent.is_structured());

        let prose = QueryAnalyzer::default().analyze("measures (quality) over time");
        assert!(prose.function_calls.is_empty());
    }

    #[test]
    fn test_identifiers_alone_stay_general() {
        let analyzer = QueryAnalyzer::default();

        let brand = analyzer.analyze("iPhone battery life tips");
        assert_eq!(brand.identifiers, set(&["iphone"]));
        assert_eq!(brand.kind, IntentKind::General);

        let call = analyzer.analyze("how does parseDate(x) handle timezones");
        assert_eq!(call.function_calls, set(&["parsedate"]));
        assert_eq!(call.kind, IntentKind::General);

        let snake = analyzer.analyze("patient_summary_table");
        assert_eq!(snake.kind, IntentKind::General);
    }

    #[test]
    fn test_short_code_routes_structured() {
        let intent = QueryAnalyzer::default().analyze("what is qm1 logic?");
        assert_eq!(intent.kind, IntentKind::Structured);
        assert!(intent.terms.contains("qm1"));
        assert!(intent.terms.contains("logic"));
        assert!(!intent.terms.contains("is"));
    }

    #[test]
    fn test_structural_keyword_survives_custom_stop_words() {
        let analyzer = QueryAnalyzer::new(&AnalyzerConfig {
            structural_keywords: vec!["table".to_string()],
            stop_words: vec!["table".to_string(), "the".to_string()],
        });

        let structured = analyzer.analyze("the table");
        assert!(structured.is_structured());
        assert_eq!(structured.terms, set(&["table"]));
    }

    #[test]
    fn test_analyze_is_deterministic() {
        let analyzer = QueryAnalyzer::default();
        let query = "Which JOIN builds patient_summary_table from PatientData?";
        assert_eq!(analyzer.analyze(query), analyzer.analyze(query));
    }
}
