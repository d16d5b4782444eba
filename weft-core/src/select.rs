//! Deterministic selection for derived computations.
//!
//! "Pick the best of N" inside a derived node must be a total order.
//! If ties fall back to iteration order, two logically identical
//! evaluations can pick different winners, the engine sees a changed
//! output, and the result oscillates forever. The helper here breaks
//! ties with an explicit key so re-evaluation is stable.

use std::cmp::Ordering;

/// Select the item with the highest score; ties go to the smallest key.
///
/// Scores only need `PartialOrd`; items whose score is not comparable
/// with itself (a NaN) are skipped outright. The key must be a total
/// order — that is what makes the selection independent of iteration
/// order.
pub fn best_by_score<T, S, K>(
    items: impl IntoIterator<Item = T>,
    mut score: impl FnMut(&T) -> S,
    mut key: impl FnMut(&T) -> K,
) -> Option<T>
where
    S: PartialOrd,
    K: Ord,
{
    let mut best: Option<(T, S, K)> = None;
    for item in items {
        let s = score(&item);
        if s.partial_cmp(&s).is_none() {
            continue;
        }
        let k = key(&item);
        let better = match &best {
            None => true,
            Some((_, best_s, best_k)) => match s.partial_cmp(best_s) {
                Some(Ordering::Greater) => true,
                Some(Ordering::Equal) => k < *best_k,
                _ => false,
            },
        };
        if better {
            best = Some((item, s, k));
        }
    }
    best.map(|(item, _, _)| item)
}
