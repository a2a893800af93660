//! Company name matching.
//!
//! Names are normalized (lowercase, punctuation stripped, whitespace
//! collapsed) before searching. An exact search is tried first; otherwise a
//! token search is ranked by [`similarity`] and the best candidate at or
//! above the threshold wins.

use crmsync_core::{RecordKind, RemoteRecord};

use crate::directory::{RemoteDirectory, SearchFilter};
use crate::error::DirectoryError;

const NAME_PROPERTY: &str = "name";

/// Lowercase, drop everything but word characters and whitespace, collapse
/// whitespace runs.
pub fn normalize_name(name: &str) -> String {
    let stripped: String = name
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || c.is_whitespace())
        .collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Number of characters shared by `a` and `b`: the longest common substring
/// plus, recursively, the matches to its left and right.
pub fn similar_chars(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    common_chars(&a, &b)
}

fn common_chars(a: &[char], b: &[char]) -> usize {
    let (mut pos_a, mut pos_b, mut max) = (0, 0, 0);
    for i in 0..a.len() {
        for j in 0..b.len() {
            let mut len = 0;
            while i + len < a.len() && j + len < b.len() && a[i + len] == b[j + len] {
                len += 1;
            }
            if len > max {
                (pos_a, pos_b, max) = (i, j, len);
            }
        }
    }
    if max == 0 {
        return 0;
    }
    max + common_chars(&a[..pos_a], &b[..pos_b])
        + common_chars(&a[pos_a + max..], &b[pos_b + max..])
}

/// Similarity percentage in `0.0..=100.0`.
pub fn similarity(a: &str, b: &str) -> f64 {
    let total = a.chars().count() + b.chars().count();
    if total == 0 {
        return 0.0;
    }
    similar_chars(a, b) as f64 * 200.0 / total as f64
}

/// The candidate whose normalized name is most similar to `normalized`,
/// if it reaches `threshold`. Ties keep the earliest candidate.
pub fn best_match<'a>(
    normalized: &str,
    candidates: &'a [RemoteRecord],
    threshold: f64,
) -> Option<&'a RemoteRecord> {
    let mut best: Option<(&RemoteRecord, f64)> = None;
    for candidate in candidates {
        let name = normalize_name(candidate.property(NAME_PROPERTY).unwrap_or_default());
        let score = similarity(normalized, &name);
        if score < threshold {
            continue;
        }
        if best.map_or(true, |(_, top)| score > top) {
            best = Some((candidate, score));
        }
    }
    best.map(|(record, _)| record)
}

/// Resolve a company by name: exact search, then fuzzy token search.
pub fn find_company<D: RemoteDirectory + ?Sized>(
    directory: &D,
    name: &str,
    threshold: f64,
) -> Result<Option<RemoteRecord>, DirectoryError> {
    let normalized = normalize_name(name);
    if normalized.is_empty() {
        return Ok(None);
    }

    let exact = directory.search(
        RecordKind::Company,
        &SearchFilter::eq(NAME_PROPERTY, normalized.as_str()),
    )?;
    if let Some(found) = exact.into_iter().next() {
        tracing::info!("company found by exact name: {normalized:?} -> {}", found.id);
        return Ok(Some(found));
    }

    let candidates = directory.search(
        RecordKind::Company,
        &SearchFilter::contains_token(NAME_PROPERTY, normalized.as_str()),
    )?;
    match best_match(&normalized, &candidates, threshold) {
        Some(found) => {
            tracing::info!(
                "company found by partial name: {normalized:?} -> {} ({:?})",
                found.id,
                found.property(NAME_PROPERTY).unwrap_or_default()
            );
            Ok(Some(found.clone()))
        }
        None => {
            tracing::debug!(
                "no company matches {normalized:?} ({} candidates)",
                candidates.len()
            );
            Ok(None)
        }
    }
}
