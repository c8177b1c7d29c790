//! Semantic answer cache
//!
//! Caches liked answers keyed by query embedding. A lookup must clear two
//! bars: query similarity against the cached embedding, and a Jaccard
//! overlap check between the cached sources and what the live store
//! returns for the question today. The second bar rejects answers whose
//! corpus has moved on.

use crate::embeddings::{cosine_similarity, VectorStore};
use crate::types::{AnswerContext, CacheConfig, CachedAnswer};
use chrono::{Duration, Utc};
use parking_lot::RwLock;
use sibyl_core::{Chunk, Verdict};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Jaccard index over chunk content sets
fn jaccard(a: &HashSet<&str>, b: &HashSet<&str>) -> f32 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f32 / union as f32
}

/// Similarity-indexed cache of past answers with feedback-driven TTL
pub struct SemanticAnswerCache {
    config: CacheConfig,
    store: Arc<VectorStore>,
    entries: RwLock<Vec<CachedAnswer>>,
}

impl SemanticAnswerCache {
    pub fn new(config: CacheConfig, store: Arc<VectorStore>) -> Self {
        Self {
            config,
            store,
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Answer for a question semantically close to a cached one, with the
    /// cached sources re-verified against the live store
    pub fn lookup(&self, question: &str) -> Option<(String, Vec<Chunk>)> {
        let embedding = self.store.provider().embed(question);
        let now = Utc::now();

        // Rank live candidates by query similarity under the read lock
        let mut candidates: Vec<(f32, CachedAnswer)> = {
            let entries = self.entries.read();
            entries
                .iter()
                .filter(|e| e.expires_at > now)
                .map(|e| (cosine_similarity(&embedding, &e.query_embedding), e.clone()))
                .filter(|(sim, _)| *sim >= self.config.similarity_threshold)
                .collect()
        };
        candidates.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        for (sim, entry) in candidates {
            let fresh = self
                .store
                .retrieve_chunks_for(question, self.config.verify_top_k);
            let fresh_contents: HashSet<&str> =
                fresh.iter().map(|s| s.chunk.content.as_str()).collect();
            let cached_contents: HashSet<&str> =
                entry.sources.iter().map(|c| c.content.as_str()).collect();

            let overlap = jaccard(&fresh_contents, &cached_contents);
            if overlap >= self.config.min_source_overlap {
                info!(
                    "Answer cache hit (similarity {:.3}, source overlap {:.2})",
                    sim, overlap
                );
                return Some((entry.answer, entry.sources));
            }
            debug!(
                "Cache candidate rejected: source overlap {:.2} below {:.2}",
                overlap, self.config.min_source_overlap
            );
        }
        None
    }

    /// Route answer-level feedback into the cache
    ///
    /// A thumbs-up inserts (or refreshes) the answer with the boosted TTL;
    /// a thumbs-down collapses any existing entry to the punish TTL.
    /// Insertion is idempotent per QA id.
    pub fn observe_answer_feedback(&self, context: &AnswerContext, verdict: Verdict) {
        let now = Utc::now();
        let mut entries = self.entries.write();
        entries.retain(|e| e.expires_at > now);

        // A re-served cached answer carries a fresh qa id, so match the
        // original entry by question as well
        let matches = |e: &CachedAnswer| e.id == context.qa_id || e.question == context.question;

        match verdict {
            Verdict::Up => {
                let expires_at = now
                    + Duration::seconds(self.config.default_ttl_secs as i64)
                    + Duration::seconds(self.config.boost_ttl_secs as i64);

                if let Some(existing) = entries.iter_mut().find(|e| matches(e)) {
                    existing.expires_at = expires_at;
                    debug!("Refreshed cached answer for qa {}", context.qa_id);
                    return;
                }

                entries.push(CachedAnswer {
                    id: context.qa_id,
                    question: context.question.clone(),
                    query_embedding: context.query_embedding.clone(),
                    answer: context.answer.clone(),
                    sources: context.sources.clone(),
                    created_at: now,
                    expires_at,
                });
                info!("Cached answer for qa {} (entries: {})", context.qa_id, entries.len());
            }
            Verdict::Down => {
                if let Some(existing) = entries.iter_mut().find(|e| matches(e)) {
                    existing.expires_at = now + Duration::seconds(self.config.punish_ttl_secs as i64);
                    debug!("Punished cached answer for qa {}", context.qa_id);
                }
            }
        }
    }

    /// Drop expired entries; returns how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|e| e.expires_at > now);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
