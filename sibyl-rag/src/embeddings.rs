//! Embedding provider contract and the owning vector store
//!
//! The provider is pure and deterministic for a given model id: the same
//! text embeds to a bit-identical vector within a process. The store owns
//! every chunk; retrievers and caches work on copies.

use crate::analyzer::tokenize;
use crate::types::{EmbeddingConfig, ScoredChunk};
use parking_lot::RwLock;
use sibyl_core::{config_error, fnv1a_64, Chunk, SibylResult};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Text to fixed-dimension dense vector
///
/// Implementations must be deterministic per `model_id` and must not fail
/// at embed time; anything that can go wrong belongs in construction.
pub trait EmbeddingProvider: Send + Sync {
    fn embed(&self, text: &str) -> Vec<f32>;
    fn dimension(&self) -> usize;
    fn model_id(&self) -> &str;
}

/// Deterministic on-device embedder
///
/// Hashes tokens and adjacent token pairs into a fixed-dimension vector,
/// then L2-normalizes. Not a learned embedding, but stable, fast, and
/// good enough for lexical-adjacent similarity, which is what the hybrid
/// retriever's dense channel needs on machines without a model file.
pub struct HashedNgramEmbedder {
    model_id: String,
    dimension: usize,
    seed: u64,
}

impl HashedNgramEmbedder {
    pub fn new(config: &EmbeddingConfig) -> SibylResult<Self> {
        if config.dimension == 0 {
            return Err(config_error!(
                "embedding dimension must be positive",
                "embeddings"
            ));
        }
        Ok(Self {
            model_id: config.model_id.clone(),
            dimension: config.dimension,
            // Different model ids produce different (still deterministic) spaces
            seed: fnv1a_64(config.model_id.as_bytes()),
        })
    }

    fn slot(&self, token: &str) -> usize {
        (fnv1a_64(token.as_bytes()) ^ self.seed) as usize % self.dimension
    }
}

impl EmbeddingProvider for HashedNgramEmbedder {
    fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        let tokens = tokenize(text);

        for token in &tokens {
            vector[self.slot(token)] += 1.0;
        }
        for pair in tokens.windows(2) {
            let bigram = format!("{} {}", pair[0], pair[1]);
            vector[self.slot(&bigram)] += 0.5;
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut vector {
                *x /= norm;
            }
        }
        vector
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

/// Calculate cosine similarity between two vectors
///
/// Norms are floored at 1e-9; zero-length vectors yield 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt().max(1e-9);
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt().max(1e-9);

    dot / (norm_a * norm_b)
}

struct StoreInner {
    chunks: Vec<Chunk>,
    generation: u64,
}

/// Owning container of chunks with deduplication and cosine search
///
/// Readers-writer semantics: searches take the read lock, mutations the
/// write lock. Every mutation bumps the generation counter so derived
/// views (the BM25 index) know to rebuild.
pub struct VectorStore {
    inner: RwLock<StoreInner>,
    provider: Arc<dyn EmbeddingProvider>,
}

impl VectorStore {
    pub fn new(provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            inner: RwLock::new(StoreInner {
                chunks: Vec::new(),
                generation: 0,
            }),
            provider,
        }
    }

    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.provider
    }

    /// Add chunks, skipping exact `(content, embedding)` duplicates when
    /// `deduplicate` is set. Returns the number actually inserted.
    pub fn add(&self, chunks: Vec<Chunk>, deduplicate: bool) -> usize {
        let mut inner = self.inner.write();
        let mut added = 0;

        for chunk in chunks {
            if deduplicate
                && inner
                    .chunks
                    .iter()
                    .any(|c| c.content == chunk.content && c.embedding == chunk.embedding)
            {
                debug!("Skipping duplicate chunk: {:.40}", chunk.content);
                continue;
            }
            inner.chunks.push(chunk);
            added += 1;
        }

        if added > 0 {
            inner.generation += 1;
        }
        info!(
            "Added {} chunks to vector store (total: {})",
            added,
            inner.chunks.len()
        );
        added
    }

    /// Embed each text with the active provider, then add
    pub fn add_texts(&self, texts: &[String], deduplicate: bool) -> usize {
        let chunks = texts
            .iter()
            .map(|t| Chunk::new(t.clone(), self.provider.embed(t)))
            .collect();
        self.add(chunks, deduplicate)
    }

    /// Remove every chunk whose content matches. Returns the removed count.
    pub fn remove(&self, content: &str) -> usize {
        let mut inner = self.inner.write();
        let before = inner.chunks.len();
        inner.chunks.retain(|c| c.content != content);
        let removed = before - inner.chunks.len();
        if removed > 0 {
            inner.generation += 1;
        }
        removed
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write();
        if !inner.chunks.is_empty() {
            inner.chunks.clear();
            inner.generation += 1;
        }
    }

    /// Rewrite every stored embedding with the current provider
    pub fn reembed_all(&self) {
        let mut inner = self.inner.write();
        for chunk in &mut inner.chunks {
            chunk.embedding = self.provider.embed(&chunk.content);
        }
        inner.generation += 1;
        info!("Re-embedded {} chunks", inner.chunks.len());
    }

    /// Cosine search over all chunks whose dimension matches the query.
    /// Ties break by insertion order. Falls back to the first `top_k`
    /// chunks unchanged when no stored dimension matches.
    pub fn find_relevant(&self, query_embedding: &[f32], top_k: usize) -> Vec<ScoredChunk> {
        let inner = self.inner.read();

        let mut scored: Vec<ScoredChunk> = inner
            .chunks
            .iter()
            .filter(|c| c.embedding.len() == query_embedding.len())
            .map(|c| ScoredChunk {
                chunk: c.clone(),
                score: cosine_similarity(query_embedding, &c.embedding),
            })
            .collect();

        if scored.is_empty() && !inner.chunks.is_empty() {
            warn!("No chunk matches the query dimension, returning head of store");
            return inner
                .chunks
                .iter()
                .take(top_k)
                .map(|c| ScoredChunk {
                    chunk: c.clone(),
                    score: 0.0,
                })
                .collect();
        }

        // Stable sort keeps insertion order for equal scores
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        scored
    }

    /// Embed the query, then search
    pub fn retrieve_chunks_for(&self, query: &str, top_k: usize) -> Vec<ScoredChunk> {
        let embedding = self.provider.embed(query);
        self.find_relevant(&embedding, top_k)
    }

    /// Copy of the current contents, for building derived views
    pub fn snapshot(&self) -> Vec<Chunk> {
        self.inner.read().chunks.clone()
    }

    /// Monotonic counter bumped on every mutation
    pub fn generation(&self) -> u64 {
        self.inner.read().generation
    }

    pub fn len(&self) -> usize {
        self.inner.read().chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().chunks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn embedder() -> Arc<dyn EmbeddingProvider> {
        Arc::new(HashedNgramEmbedder::new(&EmbeddingConfig::default()).unwrap())
    }

    #[test]
    fn test_embedding_is_deterministic() {
        let provider = embedder();
        let a = provider.embed("swift programming language");
        let b = provider.embed("swift programming language");
        assert_eq!(a, b);
        assert_eq!(a.len(), provider.dimension());
    }

    #[test]
    fn test_model_id_changes_space() {
        let a = HashedNgramEmbedder::new(&EmbeddingConfig::default()).unwrap();
        let b = HashedNgramEmbedder::new(&EmbeddingConfig {
            model_id: "hashed-ngram-v2".to_string(),
            dimension: 256,
        })
        .unwrap();
        assert_ne!(a.embed("swift"), b.embed("swift"));
    }

    #[test]
    fn test_zero_dimension_fails_fast() {
        let result = HashedNgramEmbedder::new(&EmbeddingConfig {
            model_id: "bad".to_string(),
            dimension: 0,
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-6);

        let c = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &c).abs() < 1e-6);

        // Zero-length and mismatched vectors yield 0
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&a, &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[0.0, 0.0]), 0.0);
    }

    #[test]
    fn test_store_dedup() {
        let store = VectorStore::new(embedder());
        let chunk = Chunk::new("hello", vec![1.0, 0.0]);

        assert_eq!(store.add(vec![chunk.clone(), chunk.clone()], true), 1);
        assert_eq!(store.add(vec![chunk.clone()], true), 0);
        // Same content, different embedding is a different entry
        assert_eq!(store.add(vec![Chunk::new("hello", vec![0.0, 1.0])], true), 1);
        // Dedup disabled inserts regardless
        assert_eq!(store.add(vec![chunk], false), 1);
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_find_relevant_ranks_by_cosine() {
        let store = VectorStore::new(embedder());
        store.add(
            vec![
                Chunk::new("x", vec![1.0, 0.0]),
                Chunk::new("y", vec![0.0, 1.0]),
                Chunk::new("z", vec![0.7, 0.7]),
            ],
            false,
        );

        let results = store.find_relevant(&[1.0, 0.0], 2);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].chunk.content, "x");
        assert_eq!(results[1].chunk.content, "z");
    }

    #[test]
    fn test_dimension_mismatch_fallback() {
        let store = VectorStore::new(embedder());
        store.add(
            vec![
                Chunk::new("a", vec![1.0, 0.0]),
                Chunk::new("b", vec![0.0, 1.0]),
            ],
            false,
        );

        // Query dimension matches nothing stored: head of store, unchanged order
        let results = store.find_relevant(&[1.0, 0.0, 0.0], 1);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.content, "a");
    }

    #[test]
    fn test_generation_tracks_mutations() {
        let store = VectorStore::new(embedder());
        let g0 = store.generation();
        store.add_texts(&["one".to_string()], true);
        assert!(store.generation() > g0);

        let g1 = store.generation();
        store.find_relevant(&[0.0; 256], 3);
        assert_eq!(store.generation(), g1);

        store.reembed_all();
        assert!(store.generation() > g1);
    }

    #[test]
    fn test_remove_and_clear() {
        let store = VectorStore::new(embedder());
        store.add_texts(&["one".to_string(), "two".to_string()], true);
        assert_eq!(store.remove("one"), 1);
        assert_eq!(store.len(), 1);
        store.clear();
        assert!(store.is_empty());
    }
}
