//! Reciprocal-rank fusion of the lexical and vector candidate lists

use std::collections::HashMap;

use uuid::Uuid;

/// Fuse two ranked id lists with reciprocal-rank fusion.
///
/// Each id scores `sum of 1 / (k + rank + 1)` over the lists it appears in,
/// with 0-indexed ranks. The result is sorted by score descending and
/// truncated to `limit`; ties keep first-appearance order (keyword list
/// first), which makes the fusion deterministic for identical inputs.
pub fn reciprocal_rank_fusion(
    keyword_ids: &[Uuid],
    vector_ids: &[Uuid],
    k: usize,
    limit: usize,
) -> Vec<Uuid> {
    let mut scores: HashMap<Uuid, f64> = HashMap::new();
    let mut order: Vec<Uuid> = Vec::new();

    for ids in [keyword_ids, vector_ids] {
        for (rank, id) in ids.iter().enumerate() {
            let contribution = 1.0 / (k + rank + 1) as f64;
            scores
                .entry(*id)
                .and_modify(|score| *score += contribution)
                .or_insert_with(|| {
                    order.push(*id);
                    contribution
                });
        }
    }

    // Stable sort: equal scores preserve first-appearance order
    order.sort_by(|a, b| {
        scores[b]
            .partial_cmp(&scores[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    order.truncate(limit);
    order
}
