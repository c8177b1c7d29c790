//! Multi-round deep search
//!
//! Each round fans the current query frontier through the hybrid
//! retriever and pools the results. Between rounds, salient terms mined
//! from the pool become new queries. The final pool is reranked with MMR
//! against the original question.

use crate::analyzer::{is_stopword, tokenize, QueryIterator};
use crate::mmr::mmr_rerank;
use crate::retriever::HybridRetriever;
use crate::types::{DeepSearchConfig, ScoredChunk};
use sibyl_core::Chunk;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Expansion loop over the hybrid retriever
pub struct DeepSearch {
    retriever: Arc<HybridRetriever>,
    config: DeepSearchConfig,
}

impl DeepSearch {
    pub fn new(retriever: Arc<HybridRetriever>, config: DeepSearchConfig) -> Self {
        Self { retriever, config }
    }

    /// Mine expansion terms from the head of the pool: unique tokens per
    /// chunk, stopwords and short tokens dropped, ranked by how many
    /// chunks contain them
    fn mine_terms(&self, pool: &[Chunk]) -> Vec<String> {
        let mut order: Vec<String> = Vec::new();
        let mut counts: std::collections::HashMap<String, usize> = std::collections::HashMap::new();

        for chunk in pool.iter().take(self.config.breadth) {
            let unique: HashSet<String> = tokenize(&chunk.content)
                .into_iter()
                .filter(|t| t.chars().count() >= 3 && !is_stopword(t))
                .collect();
            for token in unique {
                if !counts.contains_key(&token) {
                    order.push(token.clone());
                }
                *counts.entry(token).or_insert(0) += 1;
            }
        }

        // Stable sort keeps first-seen order between equal counts
        order.sort_by(|a, b| counts[b].cmp(&counts[a]));
        order.truncate(self.config.expansion_terms);
        order
    }

    /// Turn mined terms into queries: each term alone, plus adjacent pairs
    fn expand_queries(&self, queries: &mut Vec<String>, terms: &[String]) {
        let mut seen: HashSet<String> = queries.iter().cloned().collect();
        let mut push = |q: String, queries: &mut Vec<String>| {
            if queries.len() < self.config.max_queries && seen.insert(q.clone()) {
                queries.push(q);
            }
        };

        for term in terms {
            push(term.clone(), queries);
        }
        for pair in terms.windows(2) {
            push(format!("{} {}", pair[0], pair[1]), queries);
        }
    }

    /// Run the full loop and return the final `top_k` selection
    pub fn search(&self, query: &str) -> Vec<ScoredChunk> {
        let normalized = QueryIterator::normalize(query);
        if normalized.is_empty() {
            return Vec::new();
        }

        let lambda = self.retriever.config().mmr_lambda;
        let mut queries = vec![normalized];
        let mut pool: Vec<Chunk> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        for round in 0..self.config.rounds {
            for q in &queries {
                for scored in self.retriever.retrieve(q, self.config.breadth, lambda) {
                    if seen.insert(scored.chunk.content.clone()) {
                        pool.push(scored.chunk);
                    }
                }
            }
            debug!(
                "Deep search round {}: {} queries, pool size {}",
                round + 1,
                queries.len(),
                pool.len()
            );

            if round + 1 < self.config.rounds {
                let terms = self.mine_terms(&pool);
                self.expand_queries(&mut queries, &terms);
            }
        }

        let query_embedding = self.retriever.store().provider().embed(query);
        mmr_rerank(&query_embedding, &pool, lambda, self.config.top_k)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::{EmbeddingProvider, HashedNgramEmbedder, VectorStore};
    use crate::types::{EmbeddingConfig, RetrievalConfig};

    fn deep_over(texts: &[&str], config: DeepSearchConfig) -> DeepSearch {
        let provider: Arc<dyn EmbeddingProvider> =
            Arc::new(HashedNgramEmbedder::new(&EmbeddingConfig::default()).unwrap());
        let store = Arc::new(VectorStore::new(provider));
        store.add_texts(
            &texts.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
            true,
        );
        let retriever =
            Arc::new(HybridRetriever::new(store, RetrievalConfig::default()).unwrap());
        DeepSearch::new(retriever, config)
    }

    #[test]
    fn test_returns_at_most_top_k_unique_contents() {
        let deep = deep_over(
            &[
                "swift is used for ios development",
                "swift has strong typing and generics",
                "rust targets systems programming",
                "python is popular for scripting",
                "gardening tips for spring",
                "weather patterns in europe",
            ],
            DeepSearchConfig {
                top_k: 3,
                ..Default::default()
            },
        );

        let results = deep.search("swift development");
        assert!(results.len() <= 3);
        let mut contents: Vec<&str> = results.iter().map(|s| s.chunk.content.as_str()).collect();
        let before = contents.len();
        contents.sort_unstable();
        contents.dedup();
        assert_eq!(before, contents.len());
    }

    #[test]
    fn test_expansion_reaches_adjacent_topics() {
        // Round one finds the bridge document; its salient terms pull in
        // the concurrency document on round two
        let deep = deep_over(
            &[
                "swift programming language overview",
                "swift concurrency uses actors",
                "actors isolate mutable state safely",
                "unrelated cooking recipe for soup",
            ],
            DeepSearchConfig {
                rounds: 2,
                breadth: 2,
                top_k: 4,
                ..Default::default()
            },
        );

        let results = deep.search("swift programming");
        assert!(results
            .iter()
            .any(|s| s.chunk.content.contains("actors isolate")));
    }

    #[test]
    fn test_empty_query() {
        let deep = deep_over(&["anything"], DeepSearchConfig::default());
        assert!(deep.search("  ").is_empty());
    }

    #[test]
    fn test_query_frontier_is_capped() {
        let deep = deep_over(
            &[
                "alpha beta gamma delta epsilon",
                "zeta eta theta iota kappa",
                "lambda micron nuon xenon omicron",
            ],
            DeepSearchConfig {
                max_queries: 4,
                ..Default::default()
            },
        );

        let mut queries = vec!["seed".to_string()];
        let terms: Vec<String> = ["one", "two", "three", "four", "five", "six"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        deep.expand_queries(&mut queries, &terms);
        assert!(queries.len() <= 4);
    }

    #[test]
    fn test_mined_terms_drop_stopwords_and_short_tokens() {
        let deep = deep_over(&["x"], DeepSearchConfig::default());
        let pool = vec![
            Chunk::new("the cat and the hat on a mat", vec![]),
            Chunk::new("cat hat programming", vec![]),
        ];
        let terms = deep.mine_terms(&pool);
        assert!(terms.contains(&"cat".to_string()));
        assert!(!terms.contains(&"the".to_string()));
        assert!(!terms.contains(&"on".to_string()));
        // "cat" appears in both chunks, so it ranks first
        assert_eq!(terms[0], "cat");
    }
}
