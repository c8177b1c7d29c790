//! Two-stage hybrid retrieval
//!
//! Stage one fans each query variant out to BM25 and dense cosine search;
//! stage two reranks the deduplicated union with MMR against the original
//! query's embedding.

use crate::analyzer::QueryIterator;
use crate::bm25::{Bm25Params, Bm25View};
use crate::embeddings::VectorStore;
use crate::mmr::mmr_rerank;
use crate::types::{RetrievalConfig, RetrievalTrace, ScoredChunk};
use parking_lot::Mutex;
use sibyl_core::{Chunk, SibylResult};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// Everything one retrieval pass produced
pub struct RetrievalOutcome {
    /// MMR-selected passages, in selection order
    pub selected: Vec<ScoredChunk>,
    /// Raw BM25 scores of union candidates, keyed by chunk content key
    pub bm25_scores: HashMap<String, f32>,
    pub trace: RetrievalTrace,
}

struct CachedView {
    view: Bm25View,
    chunks: Vec<Chunk>,
}

/// BM25 + dense retrieval over query variants with an MMR finish
pub struct HybridRetriever {
    store: Arc<VectorStore>,
    config: RetrievalConfig,
    query_iterator: QueryIterator,
    // Rebuilt lazily whenever the store generation moves
    bm25_cache: Mutex<Option<Arc<CachedView>>>,
}

fn preview(content: &str) -> String {
    content.chars().take(60).collect()
}

impl HybridRetriever {
    pub fn new(store: Arc<VectorStore>, config: RetrievalConfig) -> SibylResult<Self> {
        config.validate()?;
        Ok(Self {
            store,
            config,
            query_iterator: QueryIterator::default(),
            bm25_cache: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<VectorStore> {
        &self.store
    }

    /// Current BM25 view, rebuilt if the store has mutated since the last
    /// build. The generation is read before the snapshot so a racing
    /// mutation at worst forces one extra rebuild.
    fn bm25_view(&self) -> Arc<CachedView> {
        let mut cache = self.bm25_cache.lock();
        let generation = self.store.generation();

        if let Some(cached) = cache.as_ref() {
            if cached.view.generation() == generation {
                return Arc::clone(cached);
            }
        }

        let chunks = self.store.snapshot();
        let view = Bm25View::build(
            &chunks,
            Bm25Params {
                k1: self.config.k1,
                b: self.config.b,
            },
            generation,
        );
        debug!("Rebuilt BM25 view over {} chunks", chunks.len());

        let built = Arc::new(CachedView { view, chunks });
        *cache = Some(Arc::clone(&built));
        built
    }

    /// Retrieve with explicit overrides for the final count and the MMR
    /// trade-off; everything else comes from the config
    pub fn retrieve(&self, query: &str, top_k: usize, mmr_lambda: f32) -> Vec<ScoredChunk> {
        self.retrieve_full(query, top_k, mmr_lambda).selected
    }

    pub fn retrieve_full(&self, query: &str, top_k: usize, mmr_lambda: f32) -> RetrievalOutcome {
        let mut trace = RetrievalTrace::default();
        let mut bm25_scores = HashMap::new();

        let normalized = QueryIterator::normalize(query);
        if normalized.is_empty() || self.store.is_empty() {
            return RetrievalOutcome {
                selected: Vec::new(),
                bm25_scores,
                trace,
            };
        }

        let variants = if self.config.enable_query_iteration {
            self.query_iterator.variants(query)
        } else {
            vec![normalized]
        };
        trace.variants = variants.clone();

        let cached = self.bm25_view();
        let stage = self.config.stage_candidates;

        // Union across variants, content-deduplicated, first occurrence wins
        let mut seen: HashSet<String> = HashSet::new();
        let mut union: Vec<Chunk> = Vec::new();

        for variant in &variants {
            for (doc_idx, score) in cached.view.top_k(variant, stage) {
                let chunk = &cached.chunks[doc_idx];
                bm25_scores
                    .entry(chunk.key())
                    .and_modify(|s: &mut f32| *s = s.max(score))
                    .or_insert(score);
                trace.bm25.push((preview(&chunk.content), score));
                if seen.insert(chunk.content.clone()) {
                    union.push(chunk.clone());
                }
            }

            for scored in self.store.retrieve_chunks_for(variant, stage) {
                trace
                    .dense
                    .push((preview(&scored.chunk.content), scored.score));
                if seen.insert(scored.chunk.content.clone()) {
                    union.push(scored.chunk);
                }
            }
        }
        trace.union_size = union.len();

        // MMR runs against the original query, not a variant
        let query_embedding = self.store.provider().embed(query);
        let selected = mmr_rerank(&query_embedding, &union, mmr_lambda, top_k);
        trace.selected = selected
            .iter()
            .map(|s| (preview(&s.chunk.content), s.score))
            .collect();

        debug!(
            "Hybrid retrieval: {} variants, {} union candidates, {} selected",
            variants.len(),
            trace.union_size,
            selected.len()
        );

        RetrievalOutcome {
            selected,
            bm25_scores,
            trace,
        }
    }

    /// Retrieve with the configured defaults
    pub fn retrieve_default(&self, query: &str) -> Vec<ScoredChunk> {
        self.retrieve(query, self.config.top_k, self.config.mmr_lambda)
    }
}
