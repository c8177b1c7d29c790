//! Online logistic-regression reranker with a hard-negative cache
//!
//! Six features per candidate, scored with a sigmoid over a learned
//! weight vector. Passage-level feedback drives one SGD step per event;
//! downvoted passages additionally enter an LRU penalty cache.

use crate::analyzer::QueryIterator;
use crate::embeddings::cosine_similarity;
use crate::types::{RerankerConfig, ScoredChunk};
use chrono::{DateTime, Utc};
use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use sibyl_core::{fnv1a_64, Chunk, Verdict};
use std::collections::HashMap;
use std::num::NonZeroUsize;
use tracing::debug;

/// bias, dense similarity, bm25, positional prior, diversity, citation match
pub const FEATURE_COUNT: usize = 6;

pub type FeatureVec = [f32; FEATURE_COUNT];

fn clamp01(x: f32) -> f32 {
    x.clamp(0.0, 1.0)
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

fn dot(w: &FeatureVec, x: &FeatureVec) -> f32 {
    w.iter().zip(x.iter()).map(|(a, b)| a * b).sum()
}

/// LRU of downvoted passage keys whose scores are penalized
pub struct HardNegCache {
    inner: Mutex<LruCache<String, DateTime<Utc>>>,
}

impl HardNegCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(LruCache::new(NonZeroUsize::new(capacity.max(1)).unwrap())),
        }
    }

    pub fn insert(&self, key: String) {
        self.inner.lock().put(key, Utc::now());
    }

    pub fn remove(&self, key: &str) {
        self.inner.lock().pop(key);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.lock().contains(key)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

/// Logistic-regression reranker updated online from passage feedback
pub struct OnlineSgdReranker {
    config: RerankerConfig,
    weights: RwLock<FeatureVec>,
    /// Last feature vector per (query, passage), bounded
    latest_feat: Mutex<LruCache<String, FeatureVec>>,
    hard_neg: HardNegCache,
}

fn feat_key(query: &str, chunk_key: &str) -> String {
    let normalized = QueryIterator::normalize(query);
    format!("{:016x}:{}", fnv1a_64(normalized.as_bytes()), chunk_key)
}

impl OnlineSgdReranker {
    pub fn new(config: RerankerConfig) -> Self {
        let feature_capacity = NonZeroUsize::new(config.feature_memory_capacity.max(1)).unwrap();
        let hard_neg = HardNegCache::new(config.hard_neg_capacity);
        Self {
            config,
            weights: RwLock::new([0.0; FEATURE_COUNT]),
            latest_feat: Mutex::new(LruCache::new(feature_capacity)),
            hard_neg,
        }
    }

    pub fn hard_neg(&self) -> &HardNegCache {
        &self.hard_neg
    }

    /// Consistent snapshot of the weight vector
    pub fn weights(&self) -> FeatureVec {
        *self.weights.read()
    }

    /// `+0.5` when the query names the source title, `+0.5` for the last
    /// path component, clamped
    fn citation_match(query_lower: &str, chunk: &Chunk) -> f32 {
        let mut score = 0.0;
        if let Some(title) = &chunk.source_title {
            if !title.is_empty() && query_lower.contains(&title.to_lowercase()) {
                score += 0.5;
            }
        }
        if let Some(path) = &chunk.source_path {
            if let Some(leaf) = path.rsplit('/').next() {
                if !leaf.is_empty() && query_lower.contains(&leaf.to_lowercase()) {
                    score += 0.5;
                }
            }
        }
        clamp01(score)
    }

    fn compute_features(
        &self,
        query: &str,
        query_embedding: &[f32],
        candidates: &[Chunk],
        bm25_scores: &HashMap<String, f32>,
    ) -> Vec<FeatureVec> {
        let query_lower = query.to_lowercase();
        let n = candidates.len();

        let dense: Vec<f32> = candidates
            .iter()
            .map(|c| cosine_similarity(query_embedding, &c.embedding))
            .collect();

        // Anchor pool: the densest candidates, for the diversity feature
        let mut by_dense: Vec<usize> = (0..n).collect();
        by_dense.sort_by(|&a, &b| dense[b].partial_cmp(&dense[a]).unwrap_or(std::cmp::Ordering::Equal));
        let anchors: Vec<usize> = by_dense
            .into_iter()
            .take(self.config.keep_top_for_diversity.min(n))
            .collect();

        candidates
            .iter()
            .enumerate()
            .map(|(idx, chunk)| {
                let key = chunk.key();
                let bm25 = bm25_scores.get(&key).copied().unwrap_or(0.0);
                let positional = if n > 1 {
                    1.0 - idx as f32 / (n - 1) as f32
                } else {
                    1.0
                };
                let max_anchor_sim = anchors
                    .iter()
                    .filter(|&&a| candidates[a].key() != key)
                    .map(|&a| cosine_similarity(&chunk.embedding, &candidates[a].embedding))
                    .fold(0.0f32, f32::max);

                [
                    1.0,
                    clamp01(0.5 * dense[idx] + 0.5),
                    clamp01(bm25.tanh()),
                    clamp01(positional),
                    clamp01(1.0 - max_anchor_sim),
                    Self::citation_match(&query_lower, chunk),
                ]
            })
            .collect()
    }

    /// Score candidates and return the best `top_k`
    ///
    /// Feature vectors are remembered per (query, passage) so later
    /// feedback can replay them. Hard negatives lose `hard_neg_penalty`
    /// from their sigmoid score, floored at 0.
    pub fn rerank(
        &self,
        query: &str,
        query_embedding: &[f32],
        candidates: Vec<Chunk>,
        bm25_scores: &HashMap<String, f32>,
        top_k: usize,
    ) -> Vec<ScoredChunk> {
        if candidates.is_empty() {
            return Vec::new();
        }

        let features = self.compute_features(query, query_embedding, &candidates, bm25_scores);
        let weights = self.weights();

        {
            let mut memory = self.latest_feat.lock();
            for (chunk, x) in candidates.iter().zip(features.iter()) {
                memory.put(feat_key(query, &chunk.key()), *x);
            }
        }

        let mut scored: Vec<ScoredChunk> = candidates
            .into_iter()
            .zip(features.iter())
            .map(|(chunk, x)| {
                let mut score = sigmoid(dot(&weights, x));
                if self.hard_neg.contains(&chunk.key()) {
                    score = (score - self.config.hard_neg_penalty).max(0.0);
                }
                ScoredChunk { chunk, score }
            })
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        scored
    }

    /// One SGD step from a passage verdict
    ///
    /// Uses the remembered feature vector for this (query, passage) when
    /// present; otherwise recomputes conservatively with zeros in the BM25
    /// and positional slots. Never surfaces an error.
    pub fn observe_feedback(
        &self,
        query: &str,
        query_embedding: &[f32],
        chunk: &Chunk,
        verdict: Verdict,
    ) {
        let key = chunk.key();
        let x = {
            let mut memory = self.latest_feat.lock();
            memory.get(&feat_key(query, &key)).copied()
        }
        .unwrap_or_else(|| {
            let query_lower = query.to_lowercase();
            let dense = cosine_similarity(query_embedding, &chunk.embedding);
            [
                1.0,
                clamp01(0.5 * dense + 0.5),
                0.0,
                0.0,
                0.0,
                Self::citation_match(&query_lower, chunk),
            ]
        });

        let y = match verdict {
            Verdict::Up => 1.0,
            Verdict::Down => 0.0,
        };

        {
            let mut weights = self.weights.write();
            let error = sigmoid(dot(&weights, &x)) - y;
            for i in 0..FEATURE_COUNT {
                weights[i] -= self.config.lr * (error * x[i] + self.config.l2 * weights[i]);
            }
        }

        match verdict {
            Verdict::Down => self.hard_neg.insert(key.clone()),
            Verdict::Up => self.hard_neg.remove(&key),
        }
        debug!("Reranker updated from {:?} on passage {}", verdict, key);
    }
}
