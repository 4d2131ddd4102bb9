use crate::text::TextNormalizer;
use std::collections::BTreeMap;

pub const DEFAULT_SCORE_CUTOFF: u8 = 70;

/// Levenshtein similarity on the 0–100 scale used by the matcher.
pub fn similarity_score(a: &str, b: &str) -> u8 {
    (strsim::normalized_levenshtein(a, b) * 100.0).round() as u8
}

/// Builds the lookup table for one reference column: accent-stripped
/// lowercase keys mapping back to the canonical (accented) names. The
/// asymmetry is intentional, so accent noise in the input never blocks a
/// match while the output keeps correct orthography. The first canonical
/// name claiming a key wins.
pub fn reference_table<'a, I>(canonical_names: I, normalizer: &TextNormalizer) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut table = BTreeMap::new();
    for name in canonical_names {
        table
            .entry(normalizer.normalize(name))
            .or_insert_with(|| name.to_string());
    }
    table
}

/// Best approximate match for `name` against the reference keys.
///
/// Empty input yields `(None, 0)`. A best score at or above `cutoff` yields
/// the canonical value and the score; anything below yields the original
/// name with score 0 (below-cutoff is a fallback, not an error). Ties are
/// broken by key order: the first maximal-scoring key wins.
pub fn find_best_match(
    name: &str,
    reference: &BTreeMap<String, String>,
    cutoff: u8,
) -> (Option<String>, u8) {
    if name.is_empty() {
        return (None, 0);
    }

    let mut best: Option<(&str, u8)> = None;
    for key in reference.keys() {
        let score = similarity_score(name, key);
        if best.is_none_or(|(_, top)| score > top) {
            best = Some((key, score));
        }
    }

    match best {
        Some((key, score)) if score >= cutoff => (reference.get(key).cloned(), score),
        _ => (Some(name.to_string()), 0),
    }
}
