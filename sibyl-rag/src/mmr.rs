//! Maximal Marginal Relevance reranking
//!
//! Greedy selection balancing relevance against diversity:
//!
//! ```text
//! MMR(c) = λ · cos(q, c) − (1 − λ) · max(cos(c, s) for s in selected)
//! ```
//!
//! The diversity term is 0 while nothing is selected, so the first pick
//! is always the most relevant candidate.

use crate::embeddings::cosine_similarity;
use crate::types::ScoredChunk;
use sibyl_core::Chunk;

/// Select up to `k` candidates by MMR score
///
/// `lambda` is clamped to `[0, 1]`. Ties break toward the earlier
/// candidate in the current list order. Returned scores are the MMR
/// scores at selection time.
pub fn mmr_rerank(
    query_embedding: &[f32],
    candidates: &[Chunk],
    lambda: f32,
    k: usize,
) -> Vec<ScoredChunk> {
    let lambda = lambda.clamp(0.0, 1.0);

    let relevance: Vec<f32> = candidates
        .iter()
        .map(|c| cosine_similarity(query_embedding, &c.embedding))
        .collect();

    let mut remaining: Vec<usize> = (0..candidates.len()).collect();
    let mut selected: Vec<usize> = Vec::new();
    let mut out = Vec::new();

    while out.len() < k && !remaining.is_empty() {
        let mut best_pos = 0;
        let mut best_score = f32::NEG_INFINITY;

        for (pos, &idx) in remaining.iter().enumerate() {
            let redundancy = selected
                .iter()
                .map(|&s| cosine_similarity(&candidates[idx].embedding, &candidates[s].embedding))
                .fold(0.0f32, f32::max);
            let score = lambda * relevance[idx] - (1.0 - lambda) * redundancy;

            // Strict comparison keeps the earliest candidate on ties
            if score > best_score {
                best_score = score;
                best_pos = pos;
            }
        }

        let idx = remaining.remove(best_pos);
        selected.push(idx);
        out.push(ScoredChunk {
            chunk: candidates[idx].clone(),
            score: best_score,
        });
    }

    out
}
