//! Acronym detection and conservative expansion.

use std::collections::BTreeMap;

/// A conservative, known-acronym expansion table. Ambiguous acronyms (those
/// present in `ambiguous`) only expand when policy opts in or the expansion
/// text already appears in the surrounding label context.
#[derive(Debug, Clone)]
pub struct AcronymTable {
    known: BTreeMap<&'static str, &'static str>,
    ambiguous: BTreeMap<&'static str, &'static str>,
}

impl Default for AcronymTable {
    fn default() -> Self {
        let mut known = BTreeMap::new();
        known.insert("NLP", "natural language processing");
        known.insert("CS", "computer science");
        known.insert("EE", "electrical engineering");
        known.insert("ML", "machine learning");
        known.insert("HCI", "human computer interaction");
        known.insert("CE", "civil engineering");
        known.insert("OR", "operations research");

        let mut ambiguous = BTreeMap::new();
        ambiguous.insert("AI", "artificial intelligence");
        ambiguous.insert("IT", "information technology");
        ambiguous.insert("IS", "information systems");

        Self { known, ambiguous }
    }
}

impl AcronymTable {
    /// Look up a known (unambiguous) expansion.
    #[must_use]
    pub fn known_expansion(&self, acronym: &str) -> Option<&'static str> {
        self.known.get(acronym.to_uppercase().as_str()).copied()
    }

    /// Look up an ambiguous expansion, gated on caller-supplied context.
    #[must_use]
    pub fn ambiguous_expansion(&self, acronym: &str) -> Option<&'static str> {
        self.ambiguous.get(acronym.to_uppercase().as_str()).copied()
    }
}

const STOPWORDS: &[&str] = &["of", "the", "and", "for", "in", "at", "on", "a", "an"];

/// Whether `token` is a stopword ignored during acronym scanning.
#[must_use]
pub fn is_stopword(token: &str) -> bool {
    STOPWORDS.contains(&token.to_lowercase().as_str())
}

/// Detects whether `token` (with internal `&` allowed, e.g. "R&D") looks like
/// an acronym: a run of >=2 uppercase letters, optionally `&`-joined, length <= 6.
#[must_use]
pub fn detect_acronym(token: &str) -> bool {
    if is_stopword(token) {
        return false;
    }
    let cleaned: String = token.chars().filter(|c| c.is_alphabetic() || *c == '&').collect();
    if cleaned.len() < 2 || cleaned.len() > 6 {
        return false;
    }
    cleaned.chars().all(|c| c == '&' || c.is_uppercase())
}

/// Expand `acronym` using the known table, falling back to an ambiguous
/// expansion only when `policy_opt_in` is set or `context` already contains
/// the expansion text (case-insensitive substring match).
#[must_use]
pub fn expand_acronym(acronym: &str, table: &AcronymTable, context: &str, policy_opt_in: bool) -> Option<&'static str> {
    if let Some(expansion) = table.known_expansion(acronym) {
        return Some(expansion);
    }
    let candidate = table.ambiguous_expansion(acronym)?;
    if policy_opt_in || context.to_lowercase().contains(candidate) {
        Some(candidate)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_basic_acronym() {
        assert!(detect_acronym("NLP"));
        assert!(detect_acronym("R&D"));
        assert!(!detect_acronym("Of"));
        assert!(!detect_acronym("TooLongAcronym"));
        assert!(!detect_acronym("a"));
    }

    #[test]
    fn known_acronym_expands_unconditionally() {
        let table = AcronymTable::default();
        assert_eq!(expand_acronym("NLP", &table, "", false), Some("natural language processing"));
    }

    #[test]
    fn ambiguous_acronym_requires_opt_in_or_context() {
        let table = AcronymTable::default();
        assert_eq!(expand_acronym("AI", &table, "some unrelated text", false), None);
        assert_eq!(expand_acronym("AI", &table, "", true), Some("artificial intelligence"));
        assert_eq!(
            expand_acronym("AI", &table, "school of Artificial Intelligence", false),
            Some("artificial intelligence")
        );
    }
}
