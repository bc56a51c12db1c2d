//! Shingle/MinHash similarity, used for intra-page block deduplication (S0).

use std::collections::HashSet;

/// Word n-gram ("shingle") set for `text`, lower-cased and whitespace-split.
#[must_use]
pub fn shingles(text: &str, n: usize) -> HashSet<String> {
    let tokens: Vec<&str> = text.to_lowercase().split_whitespace().collect();
    if n == 0 || tokens.len() < n {
        return HashSet::from([tokens.join(" ")]);
    }
    tokens.windows(n).map(|w| w.join(" ")).collect()
}

/// Jaccard similarity between the shingle sets of `a` and `b` at n-gram size `n`.
#[must_use]
pub fn jaccard_shingles(a: &str, b: &str, n: usize) -> f64 {
    let sa = shingles(a, n);
    let sb = shingles(b, n);
    if sa.is_empty() && sb.is_empty() {
        return 1.0;
    }
    let intersection = sa.intersection(&sb).count();
    let union = sa.union(&sb).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

/// Fixed-width MinHash signature over `text`'s shingles, seeded with blake3
/// so signatures are stable across runs and processes.
#[must_use]
pub fn minhash_signature(text: &str, n: usize, num_hashes: usize) -> Vec<u64> {
    let shingle_set = shingles(text, n);
    let mut signature = vec![u64::MAX; num_hashes];
    for shingle in &shingle_set {
        for (seed, slot) in signature.iter_mut().enumerate() {
            let mut hasher = blake3::Hasher::new();
            hasher.update(&(seed as u64).to_le_bytes());
            hasher.update(shingle.as_bytes());
            let digest = hasher.finalize();
            let bytes: [u8; 8] = digest.as_bytes()[0..8].try_into().unwrap();
            let value = u64::from_le_bytes(bytes);
            if value < *slot {
                *slot = value;
            }
        }
    }
    signature
}

/// Greedily deduplicate `texts` against kept-so-far items at `threshold`,
/// preserving first-occurrence order. Returns the indices kept.
#[must_use]
pub fn dedup_by_shingles(texts: &[String], n: usize, threshold: f64) -> Vec<usize> {
    let mut kept: Vec<usize> = Vec::new();
    let mut kept_shingles: Vec<HashSet<String>> = Vec::new();
    for (idx, text) in texts.iter().enumerate() {
        let current = shingles(text, n);
        let is_dup = kept_shingles.iter().any(|existing| {
            if existing.is_empty() && current.is_empty() {
                return true;
            }
            let intersection = existing.intersection(&current).count();
            let union = existing.union(&current).count();
            union > 0 && (intersection as f64 / union as f64) >= threshold
        });
        if !is_dup {
            kept.push(idx);
            kept_shingles.push(current);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_text_has_jaccard_one() {
        assert!((jaccard_shingles("the quick brown fox", "the quick brown fox", 3) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn dedup_keeps_first_occurrence() {
        let texts = vec![
            "the quick brown fox jumps".to_string(),
            "the quick brown fox leaps".to_string(),
            "a completely different sentence".to_string(),
        ];
        let kept = dedup_by_shingles(&texts, 3, 0.5);
        assert_eq!(kept, vec![0, 2]);
    }

    #[test]
    fn minhash_signature_is_deterministic() {
        let a = minhash_signature("the quick brown fox", 3, 16);
        let b = minhash_signature("the quick brown fox", 3, 16);
        assert_eq!(a, b);
    }
}
