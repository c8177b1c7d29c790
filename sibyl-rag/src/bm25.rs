//! Okapi BM25 scoring over a store snapshot
//!
//! The view precomputes document frequencies, document lengths, and the
//! average length once per store generation; the retriever rebuilds it
//! only when the store has mutated.

use crate::analyzer::tokenize;
use serde::{Deserialize, Serialize};
use sibyl_core::Chunk;
use std::collections::{HashMap, HashSet};

/// BM25 parameters
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Bm25Params {
    /// Term frequency saturation
    pub k1: f32,
    /// Length normalization
    pub b: f32,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self { k1: 1.5, b: 0.75 }
    }
}

/// Immutable BM25 view over one store generation
pub struct Bm25View {
    params: Bm25Params,
    /// Per-document term frequencies
    doc_terms: Vec<HashMap<String, u32>>,
    doc_lens: Vec<usize>,
    /// Document frequency per term
    df: HashMap<String, u32>,
    avgdl: f32,
    generation: u64,
}

impl Bm25View {
    /// Build the view from a chunk snapshot, tagged with the store
    /// generation it was derived from
    pub fn build(chunks: &[Chunk], params: Bm25Params, generation: u64) -> Self {
        let mut doc_terms = Vec::with_capacity(chunks.len());
        let mut doc_lens = Vec::with_capacity(chunks.len());
        let mut df: HashMap<String, u32> = HashMap::new();

        for chunk in chunks {
            let tokens = tokenize(&chunk.content);
            doc_lens.push(tokens.len());

            let mut terms: HashMap<String, u32> = HashMap::new();
            for token in tokens {
                *terms.entry(token).or_insert(0) += 1;
            }
            for term in terms.keys() {
                *df.entry(term.clone()).or_insert(0) += 1;
            }
            doc_terms.push(terms);
        }

        let total_len: usize = doc_lens.iter().sum();
        let avgdl = if doc_lens.is_empty() {
            0.0
        } else {
            total_len as f32 / doc_lens.len() as f32
        };

        Self {
            params,
            doc_terms,
            doc_lens,
            df,
            avgdl,
            generation,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.doc_terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doc_terms.is_empty()
    }

    fn idf(&self, term: &str) -> f32 {
        let n = self.doc_terms.len() as f32;
        let df = self.df.get(term).copied().unwrap_or(0) as f32;
        ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
    }

    /// BM25 score of one document against the query tokens.
    /// A document containing no query term scores exactly 0.
    pub fn score(&self, query_terms: &HashSet<String>, doc_idx: usize) -> f32 {
        let terms = match self.doc_terms.get(doc_idx) {
            Some(t) => t,
            None => return 0.0,
        };
        let dl = self.doc_lens[doc_idx] as f32;
        let avgdl = if self.avgdl > 0.0 { self.avgdl } else { 1.0 };
        let Bm25Params { k1, b } = self.params;

        let mut total = 0.0;
        for term in query_terms {
            let f = terms.get(term).copied().unwrap_or(0) as f32;
            if f == 0.0 {
                continue;
            }
            let idf = self.idf(term);
            total += idf * (f * (k1 + 1.0)) / (f + k1 * (1.0 - b + b * dl / avgdl));
        }
        total
    }

    /// Top `k` documents by BM25 score, zero-score documents skipped,
    /// ties broken by insertion order
    pub fn top_k(&self, query: &str, k: usize) -> Vec<(usize, f32)> {
        let query_terms: HashSet<String> = tokenize(query).into_iter().collect();
        if query_terms.is_empty() {
            return Vec::new();
        }

        let mut scored: Vec<(usize, f32)> = (0..self.doc_terms.len())
            .map(|idx| (idx, self.score(&query_terms, idx)))
            .filter(|(_, s)| *s > 0.0)
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        scored
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corpus() -> Vec<Chunk> {
        [
            "swift is a programming language for ios",
            "rust is a systems programming language",
            "the quick brown fox jumps over the lazy dog",
            "swift swift swift",
        ]
        .iter()
        .map(|s| Chunk::new(s.to_string(), vec![]))
        .collect()
    }

    #[test]
    fn test_scores_are_non_negative() {
        let view = Bm25View::build(&corpus(), Bm25Params::default(), 0);
        let terms: HashSet<String> = tokenize("swift programming").into_iter().collect();
        for idx in 0..view.len() {
            assert!(view.score(&terms, idx) >= 0.0);
        }
    }

    #[test]
    fn test_no_term_doc_scores_zero() {
        let view = Bm25View::build(&corpus(), Bm25Params::default(), 0);
        let terms: HashSet<String> = tokenize("swift").into_iter().collect();
        // "the quick brown fox..." has no query term
        assert_eq!(view.score(&terms, 2), 0.0);
    }

    #[test]
    fn test_top_k_skips_zero_scores() {
        let view = Bm25View::build(&corpus(), Bm25Params::default(), 0);
        let hits = view.top_k("swift", 10);
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|(_, s)| *s > 0.0));
    }

    #[test]
    fn test_term_frequency_saturation_orders_hits() {
        let view = Bm25View::build(&corpus(), Bm25Params::default(), 0);
        let hits = view.top_k("swift", 2);
        // The short all-swift doc outranks the single mention
        assert_eq!(hits[0].0, 3);
        assert_eq!(hits[1].0, 0);
    }

    #[test]
    fn test_empty_query_no_hits() {
        let view = Bm25View::build(&corpus(), Bm25Params::default(), 0);
        assert!(view.top_k("", 5).is_empty());
        assert!(view.top_k("!!!", 5).is_empty());
    }

    #[test]
    fn test_empty_corpus() {
        let view = Bm25View::build(&[], Bm25Params::default(), 0);
        assert!(view.top_k("swift", 5).is_empty());
    }
}
