//! String similarity measures used by deduplication and disambiguation.

use std::collections::HashSet;

use super::acronym::detect_acronym;

/// Jaro-Winkler similarity on two canonical strings, in `[0, 1]`.
#[must_use]
pub fn jaro_winkler(a: &str, b: &str) -> f64 {
    strsim::jaro_winkler(a, b)
}

/// Jaccard similarity over whitespace-split lowercase tokens.
#[must_use]
pub fn token_jaccard(a: &str, b: &str) -> f64 {
    let ta: HashSet<String> = a.to_lowercase().split_whitespace().map(str::to_string).collect();
    let tb: HashSet<String> = b.to_lowercase().split_whitespace().map(str::to_string).collect();
    if ta.is_empty() && tb.is_empty() {
        return 1.0;
    }
    let intersection = ta.intersection(&tb).count();
    let union = ta.union(&tb).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

/// `1.0` if one side is an acronym whose letters match the other side's
/// token initials (directly, case-insensitively), else `0.0`.
#[must_use]
pub fn abbrev_score(a: &str, b: &str) -> f64 {
    fn initials(s: &str) -> String {
        s.split_whitespace().filter_map(|t| t.chars().next()).collect::<String>().to_uppercase()
    }
    fn letters(s: &str) -> String {
        s.chars().filter(|c| c.is_alphabetic()).collect::<String>().to_uppercase()
    }

    if detect_acronym(a) && letters(a) == initials(b) && !initials(b).is_empty() {
        return 1.0;
    }
    if detect_acronym(b) && letters(b) == initials(a) && !initials(a).is_empty() {
        return 1.0;
    }
    0.0
}

/// Ratcliff-Obershelp similarity: twice the total length of recursively
/// matched longest-common-substrings, divided by the combined length of
/// both strings. Used for fuzzy parent-anchor resolution.
#[must_use]
pub fn ratcliff_obershelp(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let matched = matching_chars(&a, &b);
    (2.0 * matched as f64) / (a.len() + b.len()) as f64
}

fn longest_common_substring(a: &[char], b: &[char]) -> (usize, usize, usize) {
    if a.is_empty() || b.is_empty() {
        return (0, 0, 0);
    }
    let mut best = (0usize, 0usize, 0usize);
    let mut prev = vec![0usize; b.len() + 1];
    for (i, &ca) in a.iter().enumerate() {
        let mut curr = vec![0usize; b.len() + 1];
        for (j, &cb) in b.iter().enumerate() {
            if ca == cb {
                curr[j + 1] = prev[j] + 1;
                if curr[j + 1] > best.2 {
                    best = (i + 1 - curr[j + 1], j + 1 - curr[j + 1], curr[j + 1]);
                }
            }
        }
        prev = curr;
    }
    best
}

fn matching_chars(a: &[char], b: &[char]) -> usize {
    let (ai, bi, len) = longest_common_substring(a, b);
    if len == 0 {
        return 0;
    }
    matching_chars(&a[..ai], &b[..bi]) + len + matching_chars(&a[ai + len..], &b[bi + len..])
}

/// `1.0` if one side equals the other with `suffixes` (a token sequence)
/// appended or prepended, else `0.0`.
#[must_use]
pub fn suffix_prefix_hint(a: &str, b: &str, suffixes: &[&str]) -> f64 {
    let suffix_phrase = suffixes.join(" ").to_lowercase();
    if suffix_phrase.is_empty() {
        return 0.0;
    }
    let (al, bl) = (a.to_lowercase(), b.to_lowercase());
    let matches = |base: &str, whole: &str| -> bool {
        whole == format!("{base} {suffix_phrase}") || whole == format!("{suffix_phrase} {base}")
    };
    if matches(&al, &bl) || matches(&bl, &al) {
        1.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jaro_winkler_identical_is_one() {
        assert!((jaro_winkler("engineering", "engineering") - 1.0).abs() < 1e-9);
    }

    #[test]
    fn token_jaccard_partial_overlap() {
        let score = token_jaccard("computer science department", "computer science");
        assert!(score > 0.5 && score < 1.0);
    }

    #[test]
    fn abbrev_score_matches_initials() {
        assert!((abbrev_score("NLP", "natural language processing") - 1.0).abs() < 1e-9);
        assert!((abbrev_score("natural language processing", "NLP") - 1.0).abs() < 1e-9);
        assert_eq!(abbrev_score("CS", "biology department"), 0.0);
    }

    #[test]
    fn suffix_prefix_hint_detects_appended_suffix() {
        let score = suffix_prefix_hint("computer science", "computer science department", &["department"]);
        assert!((score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn ratcliff_obershelp_identical_is_one() {
        assert!((ratcliff_obershelp("engineering", "engineering") - 1.0).abs() < 1e-9);
    }

    #[test]
    fn ratcliff_obershelp_partial_overlap_is_between_zero_and_one() {
        let score = ratcliff_obershelp("computer science", "computer sciences department");
        assert!(score > 0.4 && score < 1.0);
    }
}
