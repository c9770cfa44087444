//! Identifier-aware tokenization shared by query analysis and index building.
//!
//! Words are split on whitespace and punctuation, with `_` kept as a word
//! character so snake_case identifiers survive intact. Each word is then
//! decomposed into its snake_case and camelCase parts, and the lowercased
//! whole word is kept alongside the parts:
//!
//! - `PatientData` → `patient`, `data`, `patientdata`
//! - `patient_summary_table` → `patient`, `summary`, `table`, `patient_summary_table`

/// Whether a character belongs to a word.
pub fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Split text into raw words, preserving case.
pub fn split_words(text: &str) -> Vec<&str> {
    text.split(|c: char| !is_word_char(c))
        .filter(|w| w.chars().any(|c| c.is_alphanumeric()))
        .collect()
}

/// Whether a word is snake_case (an underscore between two word segments).
pub fn is_snake_case(word: &str) -> bool {
    word.split('_')
        .filter(|part| part.chars().any(|c| c.is_alphanumeric()))
        .count()
        >= 2
}

/// Whether a word is camelCase or PascalCase with at least two parts.
pub fn is_camel_case(word: &str) -> bool {
    word.split('_').any(|part| split_camel(part).len() >= 2)
}

/// Split a single segment on case transitions.
///
/// A boundary sits before an uppercase letter that follows a lowercase letter
/// or digit, and before the last capital of an acronym run (`HTTPServer` →
/// `HTTP`, `Server`). Letter/digit transitions never split, so `qm1` stays whole.
pub fn split_camel(segment: &str) -> Vec<&str> {
    let chars: Vec<(usize, char)> = segment.char_indices().collect();
    let mut parts = Vec::new();
    let mut start = 0;

    for i in 1..chars.len() {
        let (idx, cur) = chars[i];
        let prev = chars[i - 1].1;
        let next = chars.get(i + 1).map(|(_, c)| *c);

        let lower_to_upper = (prev.is_lowercase() || prev.is_ascii_digit()) && cur.is_uppercase();
        let acronym_end =
            prev.is_uppercase() && cur.is_uppercase() && next.is_some_and(|n| n.is_lowercase());

        if lower_to_upper || acronym_end {
            parts.push(&segment[start..idx]);
            start = idx;
        }
    }

    if start < segment.len() {
        parts.push(&segment[start..]);
    }

    parts.into_iter().filter(|p| !p.is_empty()).collect()
}

/// Decompose one word into lowercased terms: its parts followed by the whole word.
///
/// The output is deduplicated while preserving first-seen order.
pub fn decompose(word: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();

    for segment in word.split('_').filter(|s| !s.is_empty()) {
        for part in split_camel(segment) {
            let lowered = part.to_lowercase();
            if !terms.contains(&lowered) {
                terms.push(lowered);
            }
        }
    }

    let whole = word.trim_matches('_').to_lowercase();
    if !whole.is_empty() && !terms.contains(&whole) {
        terms.push(whole);
    }

    terms
}

/// Tokenize chunk text into the term stream an inverted index is built from.
///
/// Repeated words produce repeated terms, so term frequencies are preserved.
pub fn index_terms(text: &str) -> Vec<String> {
    split_words(text).into_iter().flat_map(decompose).collect()
}

/// Case-sensitive whole-word containment.
///
/// `needle` matches only where it is not glued to other word characters on
/// either side, so `qm1` does not match inside `qm12`. Callers lowercase both
/// sides for case-insensitive matching.
pub fn contains_word(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }

    // Resume one char past each hit so overlapping occurrences are tried.
    let mut from = 0;
    while let Some(offset) = haystack[from..].find(needle) {
        let start = from + offset;
        let end = start + needle.len();
        let before_ok = haystack[..start]
            .chars()
            .next_back()
            .map_or(true, |c| !is_word_char(c));
        let after_ok = haystack[end..]
            .chars()
            .next()
            .map_or(true, |c| !is_word_char(c));
        if before_ok && after_ok {
            return true;
        }
        from = start + haystack[start..].chars().next().map_or(1, char::len_utf8);
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn set(terms: Vec<String>) -> BTreeSet<String> {
        terms.into_iter().collect()
    }

    fn expected(terms: &[&str]) -> BTreeSet<String> {
        terms.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_snake_case_decomposition() {
        assert_eq!(
            set(decompose("patient_summary_table")),
            expected(&["patient", "summary", "table", "patient_summary_table"])
        );
    }

    #[test]
    fn test_camel_case_decomposition() {
        assert_eq!(
            set(decompose("PatientData")),
            expected(&["patient", "data", "patientdata"])
        );
    }

    #[test]
    fn test_plain_word_decomposes_to_itself() {
        assert_eq!(decompose("Hospital"), vec!["hospital".to_string()]);
        assert_eq!(decompose("qm1"), vec!["qm1".to_string()]);
    }

    #[test]
    fn test_acronym_split() {
        assert_eq!(split_camel("HTTPServer"), vec!["HTTP", "Server"]);
        assert_eq!(split_camel("getV2Data"), vec!["get", "V2", "Data"]);
    }

    #[test]
    fn test_split_words_punctuation() {
        assert_eq!(
            split_words("select * from models/dim_patient.sql;"),
            vec!["select", "from", "models", "dim_patient", "sql"]
        );
        assert!(split_words("  ?!  ").is_empty());
    }

    #[test]
    fn test_identifier_shapes() {
        assert!(is_snake_case("dim_patient"));
        assert!(!is_snake_case("_private"));
        assert!(is_camel_case("PatientData"));
        assert!(is_camel_case("getPatient"));
        assert!(!is_camel_case("Patient"));
        assert!(!is_camel_case("qm1"));
    }

    #[test]
    fn test_index_terms_keeps_frequency() {
        let terms = index_terms("join join patient_data");
        assert_eq!(terms.iter().filter(|t| *t == "join").count(), 2);
        assert!(terms.contains(&"patient_data".to_string()));
        assert!(terms.contains(&"patient".to_string()));
    }

    #[test]
    fn test_contains_word_boundaries() {
        assert!(contains_word("qm1 pathway adherence", "qm1"));
        assert!(!contains_word("qm12 pathway", "qm1"));
        assert!(!contains_word("xqm1 pathway", "qm1"));
        assert!(contains_word("see (qm1).", "qm1"));
        assert!(contains_word("the quality measure logic", "measure logic"));
        assert!(!contains_word("anything", ""));
    }

    #[test]
    fn test_contains_word_overlapping_occurrences() {
        // first hit of "go go" is glued to "x"; the valid one overlaps it
        assert!(contains_word("xgo go go", "go go"));
        assert!(contains_word("aa_a a a", "a a"));
        assert!(!contains_word("xgo go gox", "go go"));
        assert!(contains_word("é qm1 é", "qm1"));
    }
}
