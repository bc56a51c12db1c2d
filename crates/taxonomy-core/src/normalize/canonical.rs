//! Canonical form reduction (spec §4.A).
//!
//! Applies, per level: boilerplate prefix stripping, owning-institution
//! prefix stripping (L0 only), policy regex stripping, trailing short
//! parenthetical capture, NFKD diacritic folding, punctuation-to-space,
//! lower-casing, and whitespace collapse. Every step that removes text
//! records the removed variant as an alias so nothing is silently lost.

use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

use super::acronym::{detect_acronym, expand_acronym, is_stopword, AcronymTable};

/// Result of canonicalizing a label: the canonical string plus every alias
/// surfaced along the way (original, removed-variant, diacritic-folded,
/// acronym expansions), sorted and de-duplicated per spec's determinism
/// mandate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalForm {
    /// The fully reduced canonical string.
    pub canonical: String,
    /// Sorted, de-duplicated aliases (always includes `canonical` and the original label).
    pub aliases: Vec<String>,
}

static BOILERPLATE_BY_LEVEL: Lazy<[Vec<&'static str>; 4]> = Lazy::new(|| {
    [
        vec![], // L0 uses owning-institution stripping instead.
        vec!["school of ", "department of ", "dept. of ", "dept of ", "college of "],
        vec!["center for ", "centre for ", "institute for ", "institute of "],
        vec!["workshop on ", "symposium on ", "conference on "],
    ]
});

static PAREN_TAIL: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*\(([^)]{1,8})\)\s*$").unwrap());
static PUNCT: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\p{L}\p{N}\s]").unwrap());
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Strip a level-appropriate boilerplate prefix, returning `(stripped, removed_variant)`.
fn strip_boilerplate_prefix(label: &str, level: u8) -> (String, Option<String>) {
    let lower = label.to_lowercase();
    let prefixes = &BOILERPLATE_BY_LEVEL[usize::from(level.min(3))];
    for prefix in prefixes {
        if lower.starts_with(prefix) {
            let stripped = label[prefix.len()..].to_string();
            return (stripped, Some(label.to_string()));
        }
    }
    (label.to_string(), None)
}

/// L0-only: strip a leading "Institution - " / "Institution: " prefix.
fn strip_owning_institution_prefix(label: &str) -> (String, Option<String>) {
    for sep in [" - ", ": ", " — "] {
        if let Some(idx) = label.find(sep) {
            let (head, tail) = label.split_at(idx);
            if !head.trim().is_empty() && head.len() < label.len() / 2 + 4 {
                let rest = tail[sep.len()..].to_string();
                if !rest.trim().is_empty() {
                    return (rest, Some(label.to_string()));
                }
            }
        }
    }
    (label.to_string(), None)
}

/// Capture a trailing short parenthetical (1-8 chars inside) as an alias and
/// strip it from the working string.
fn capture_trailing_parenthetical(label: &str) -> (String, Option<String>) {
    if let Some(cap) = PAREN_TAIL.captures(label) {
        let inner = cap.get(1).unwrap().as_str().to_string();
        let stripped = PAREN_TAIL.replace(label, "").trim().to_string();
        return (stripped, Some(inner));
    }
    (label.to_string(), None)
}

fn fold_diacritics(s: &str) -> String {
    s.nfkd().filter(|c| !unicode_normalization::char::is_combining_mark(*c)).collect()
}

fn punctuation_to_space(s: &str) -> String {
    PUNCT.replace_all(s, " ").to_string()
}

fn collapse_whitespace(s: &str) -> String {
    WHITESPACE.replace_all(s.trim(), " ").to_string()
}

/// Apply the full level-aware canonical-form pipeline described in spec §4.A.
#[must_use]
pub fn to_canonical_form(label: &str, level: u8, acronyms: &AcronymTable, policy_opt_in_ambiguous: bool) -> CanonicalForm {
    let mut aliases: Vec<String> = vec![label.to_string()];

    let (after_boilerplate, removed_boilerplate) = strip_boilerplate_prefix(label, level);
    if let Some(v) = removed_boilerplate {
        aliases.push(v);
    }

    let (after_institution, removed_institution) = if level == 0 {
        strip_owning_institution_prefix(&after_boilerplate)
    } else {
        (after_boilerplate, None)
    };
    if let Some(v) = removed_institution {
        aliases.push(v);
    }

    let (after_paren, captured_paren) = capture_trailing_parenthetical(&after_institution);
    if let Some(v) = captured_paren {
        aliases.push(v);
    }

    let diacritic_folded = fold_diacritics(&after_paren);
    aliases.push(diacritic_folded.clone());

    let depunctuated = punctuation_to_space(&diacritic_folded);
    let lowered = depunctuated.to_lowercase();
    let canonical = collapse_whitespace(&lowered);

    for token in after_paren.split_whitespace() {
        if detect_acronym(token) && !is_stopword(token) {
            if let Some(expansion) = expand_acronym(token, acronyms, &after_paren, policy_opt_in_ambiguous) {
                if level <= 1 {
                    aliases.push(expansion.to_string());
                }
            }
        }
    }

    aliases.push(canonical.clone());
    aliases.sort();
    aliases.dedup();

    CanonicalForm { canonical, aliases }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_level_boilerplate() {
        let form = to_canonical_form("School of Engineering", 1, &AcronymTable::default(), false);
        assert_eq!(form.canonical, "engineering");
    }

    #[test]
    fn strips_owning_institution_at_level_zero() {
        let form = to_canonical_form("Stanford - Engineering", 0, &AcronymTable::default(), false);
        assert_eq!(form.canonical, "engineering");
    }

    #[test]
    fn captures_trailing_parenthetical_as_alias() {
        let form = to_canonical_form("Natural Language Processing (NLP)", 2, &AcronymTable::default(), false);
        assert!(form.aliases.iter().any(|a| a == "NLP"));
    }

    #[test]
    fn folds_diacritics() {
        let form = to_canonical_form("École Polytechnique", 1, &AcronymTable::default(), false);
        assert_eq!(form.canonical, "ecole polytechnique");
    }

    #[test]
    fn collapses_whitespace_and_lowercases() {
        let form = to_canonical_form("  Computer   Science  ", 1, &AcronymTable::default(), false);
        assert_eq!(form.canonical, "computer science");
    }
}
