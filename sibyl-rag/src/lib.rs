//! Sibyl RAG engine
//!
//! On-device retrieval-augmented generation with feedback learning: a
//! hybrid BM25 + dense retriever with MMR reranking, a multi-round deep
//! search loop, a Thompson-sampling parameter bandit, an online logistic
//! reranker with a hard-negative cache, a semantic answer cache with
//! source re-verification, and citation enforcement. A pipeline
//! coordinator composes the pieces; its only suspending boundary is the
//! LLM binding.

pub mod analyzer;
pub mod bandit;
pub mod bm25;
pub mod cache;
pub mod citations;
pub mod deep;
pub mod embeddings;
pub mod feedback;
pub mod llm;
pub mod mmr;
pub mod pipeline;
pub mod presets;
pub mod reranker;
pub mod retriever;
pub mod types;

pub use analyzer::{is_stopword, tokenize, QueryIterator};
pub use bandit::{BetaPosterior, FastrandUniform, ParamBandit, UniformSource};
pub use bm25::{Bm25Params, Bm25View};
pub use cache::SemanticAnswerCache;
pub use citations::CitationLabeler;
pub use deep::DeepSearch;
pub use embeddings::{
    cosine_similarity, EmbeddingProvider, HashedNgramEmbedder, VectorStore,
};
pub use feedback::{FeedbackBus, QaContextStore, SubscriberHandle};
pub use llm::{strip_think_markers, LlmBinding, MockLlm};
pub use mmr::mmr_rerank;
pub use pipeline::{PipelineBuilder, PipelineCoordinator};
pub use presets::Preset;
pub use reranker::{HardNegCache, OnlineSgdReranker, FEATURE_COUNT};
pub use retriever::{HybridRetriever, RetrievalOutcome};
pub use types::*;

// Re-export the shared core so downstream crates see one surface
pub use sibyl_core::{
    AnswerFeedback, Chunk, DocFeedback, FeedbackReason, SibylError, SibylResult, Verdict,
};
