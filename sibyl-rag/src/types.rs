//! Type definitions for the retrieval and learning engine
//!
//! Configuration structs carry serde derives and `Default` impls so a
//! partial `sibyl.toml` can override any subset of them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sibyl_core::{config_error, Chunk, SibylError, SibylResult};
use uuid::Uuid;

/// Retrieval hyper-parameters an arm of the bandit controls
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetrievalParams {
    /// Number of passages handed to the prompt, in `[1, 64]`
    pub top_k: u32,
    /// MMR relevance/diversity trade-off, in `[0, 1]`
    pub mmr_lambda: f32,
    /// Minimum query/passage cosine for a passage to survive, in `[0, 1]`
    pub min_score: f32,
}

impl RetrievalParams {
    pub fn validate(&self) -> SibylResult<()> {
        if !(1..=64).contains(&self.top_k) {
            return Err(config_error!(
                format!("top_k must be in [1, 64], got {}", self.top_k),
                "retrieval_params"
            ));
        }
        if !(0.0..=1.0).contains(&self.mmr_lambda) {
            return Err(config_error!(
                format!("mmr_lambda must be in [0, 1], got {}", self.mmr_lambda),
                "retrieval_params"
            ));
        }
        if !(0.0..=1.0).contains(&self.min_score) {
            return Err(config_error!(
                format!("min_score must be in [0, 1], got {}", self.min_score),
                "retrieval_params"
            ));
        }
        Ok(())
    }
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self {
            top_k: 5,
            mmr_lambda: 0.7,
            min_score: 0.15,
        }
    }
}

/// One selectable configuration of the parameter bandit
///
/// Arms are immutable for the process lifetime; per-cluster posteriors
/// live inside the bandit itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BanditArm {
    /// Stable identifier used for reward attribution
    pub id: String,
    pub params: RetrievalParams,
}

impl BanditArm {
    pub fn new(id: &str, params: RetrievalParams) -> Self {
        Self {
            id: id.to_string(),
            params,
        }
    }
}

/// A retrieved passage with its relevance score
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    /// Similarity or ranking score (higher is better)
    pub score: f32,
}

/// Short-lived record of the last answer for a QA id, kept so later
/// feedback can be attributed
#[derive(Debug, Clone)]
pub struct AnswerContext {
    pub qa_id: Uuid,
    pub question: String,
    pub query_embedding: Vec<f32>,
    pub answer: String,
    pub sources: Vec<Chunk>,
    pub created_at: DateTime<Utc>,
}

/// A past answer held by the semantic cache
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedAnswer {
    pub id: Uuid,
    pub question: String,
    pub query_embedding: Vec<f32>,
    pub answer: String,
    pub sources: Vec<Chunk>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Result of a full answer pass through the pipeline
#[derive(Debug, Clone)]
pub struct RagAnswer {
    pub qa_id: Uuid,
    pub answer: String,
    pub sources: Vec<Chunk>,
    /// Whether the answer came from the semantic cache
    pub from_cache: bool,
}

/// Per-stage record of a retrieval pass, rendered by the CLI under `--trace`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrievalTrace {
    /// Query variants actually searched
    pub variants: Vec<String>,
    /// BM25 candidates as (content preview, score)
    pub bm25: Vec<(String, f32)>,
    /// Dense candidates as (content preview, cosine)
    pub dense: Vec<(String, f32)>,
    /// Size of the deduplicated candidate union
    pub union_size: usize,
    /// Final MMR picks as (content preview, mmr score)
    pub selected: Vec<(String, f32)>,
}

/// Sampling parameters forwarded to the LLM binding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    pub temperature: f32,
    pub top_k: u32,
    pub top_p: f32,
    pub max_new_tokens: u32,
    pub stop: Vec<String>,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_k: 40,
            top_p: 0.9,
            max_new_tokens: 1024,
            stop: Vec::new(),
        }
    }
}

/// Embedding provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Model identifier; changing it invalidates persisted embeddings
    pub model_id: String,
    /// Dimension of produced vectors
    pub dimension: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model_id: "hashed-ngram-v1".to_string(),
            dimension: 256,
        }
    }
}

/// Hybrid retriever configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// BM25 term-frequency saturation
    pub k1: f32,
    /// BM25 length normalization
    pub b: f32,
    /// Candidates fetched per stage and per query variant
    pub stage_candidates: usize,
    /// Default MMR trade-off when the bandit is not consulted
    pub mmr_lambda: f32,
    /// Default number of final passages
    pub top_k: usize,
    /// Whether to expand the query into variants before searching
    pub enable_query_iteration: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k1: 1.5,
            b: 0.75,
            stage_candidates: 12,
            mmr_lambda: 0.7,
            top_k: 5,
            enable_query_iteration: true,
        }
    }
}

impl RetrievalConfig {
    pub fn validate(&self) -> SibylResult<()> {
        if !(0.0..=1.0).contains(&self.mmr_lambda) {
            return Err(config_error!(
                format!("mmr_lambda must be in [0, 1], got {}", self.mmr_lambda),
                "retriever"
            ));
        }
        if self.stage_candidates == 0 || self.top_k == 0 {
            return Err(config_error!(
                "stage_candidates and top_k must be positive",
                "retriever"
            ));
        }
        Ok(())
    }
}

/// Multi-round deep search configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeepSearchConfig {
    /// Number of retrieval rounds
    pub rounds: usize,
    /// Candidates fetched per query per round
    pub breadth: usize,
    /// Final result count after the MMR pass
    pub top_k: usize,
    /// Cap on the query frontier between rounds
    pub max_queries: usize,
    /// Salient terms mined from the pool between rounds
    pub expansion_terms: usize,
}

impl Default for DeepSearchConfig {
    fn default() -> Self {
        Self {
            rounds: 2,
            breadth: 8,
            top_k: 5,
            max_queries: 8,
            expansion_terms: 12,
        }
    }
}

/// Parameter bandit configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BanditConfig {
    /// The selectable arms, in tie-break priority order
    pub arms: Vec<BanditArm>,
    /// Number of query clusters
    pub cluster_count: u64,
    /// Bound on outstanding qa -> selection records
    pub selection_capacity: usize,
    /// Seconds after which an unrewarded selection expires
    pub selection_idle_secs: u64,
}

impl Default for BanditConfig {
    fn default() -> Self {
        Self {
            arms: vec![
                BanditArm::new(
                    "precise",
                    RetrievalParams {
                        top_k: 4,
                        mmr_lambda: 0.85,
                        min_score: 0.25,
                    },
                ),
                BanditArm::new(
                    "balanced",
                    RetrievalParams {
                        top_k: 5,
                        mmr_lambda: 0.7,
                        min_score: 0.15,
                    },
                ),
                BanditArm::new(
                    "broad",
                    RetrievalParams {
                        top_k: 8,
                        mmr_lambda: 0.5,
                        min_score: 0.05,
                    },
                ),
            ],
            cluster_count: 16,
            selection_capacity: 1024,
            selection_idle_secs: 600,
        }
    }
}

impl BanditConfig {
    pub fn validate(&self) -> SibylResult<()> {
        if self.arms.is_empty() {
            return Err(config_error!("bandit needs at least one arm", "bandit"));
        }
        for arm in &self.arms {
            arm.params.validate()?;
        }
        if self.cluster_count == 0 {
            return Err(config_error!("cluster_count must be positive", "bandit"));
        }
        Ok(())
    }
}

/// Online reranker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankerConfig {
    /// SGD learning rate
    pub lr: f32,
    /// L2 regularization strength
    pub l2: f32,
    /// Anchor pool size for the diversity feature
    pub keep_top_for_diversity: usize,
    /// Score penalty applied to hard negatives
    pub hard_neg_penalty: f32,
    /// Capacity of the hard-negative LRU
    pub hard_neg_capacity: usize,
    /// Capacity of the (query, chunk) feature memory
    pub feature_memory_capacity: usize,
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            lr: 0.05,
            l2: 1e-4,
            keep_top_for_diversity: 8,
            hard_neg_penalty: 0.5,
            hard_neg_capacity: 512,
            feature_memory_capacity: 2048,
        }
    }
}

/// Semantic answer cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Minimum query cosine for a cached entry to be considered
    pub similarity_threshold: f32,
    /// Minimum Jaccard overlap between fresh and cached sources
    pub min_source_overlap: f32,
    /// TTL of a fresh insertion, seconds
    pub default_ttl_secs: u64,
    /// TTL extension granted on a thumbs-up, seconds
    pub boost_ttl_secs: u64,
    /// TTL a thumbs-down collapses the entry to, seconds
    pub punish_ttl_secs: u64,
    /// Fresh chunks fetched for source re-verification
    pub verify_top_k: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.92,
            min_source_overlap: 0.4,
            default_ttl_secs: 7 * 24 * 3600,
            boost_ttl_secs: 30 * 24 * 3600,
            punish_ttl_secs: 3600,
            verify_top_k: 5,
        }
    }
}

/// Citation labeling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CitationConfig {
    /// Character clip per labeled chunk in the context block
    pub per_chunk_limit: usize,
}

impl Default for CitationConfig {
    fn default() -> Self {
        Self {
            per_chunk_limit: 600,
        }
    }
}

/// Defensive `<think>` filter thresholds
///
/// Both knobs are model-dependent; `None` disables the respective bound
/// and the host is expected to opt in with values suited to its model.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThinkFilterConfig {
    /// Character budget for an unterminated think block
    pub max_chars: Option<usize>,
    /// Wall-clock bound in milliseconds for streaming filters
    pub deadline_ms: Option<u64>,
}

/// Top-level engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SibylConfig {
    pub embedding: EmbeddingConfig,
    pub retrieval: RetrievalConfig,
    pub deep_search: DeepSearchConfig,
    pub bandit: BanditConfig,
    pub reranker: RerankerConfig,
    pub cache: CacheConfig,
    pub citation: CitationConfig,
    pub think_filter: ThinkFilterConfig,
    pub sampling: SamplingParams,
    pub logging: sibyl_core::LoggingConfig,
}

impl SibylConfig {
    pub fn validate(&self) -> SibylResult<()> {
        self.retrieval.validate()?;
        self.bandit.validate()?;
        if !(0.0..=1.0).contains(&self.cache.similarity_threshold) {
            return Err(config_error!(
                "cache.similarity_threshold must be in [0, 1]",
                "cache"
            ));
        }
        Ok(())
    }
}

/// Load the engine configuration from an explicit path or the discovered
/// `sibyl.toml`, falling back to defaults when no file exists
pub fn load_config_or_default(explicit: Option<&std::path::Path>) -> SibylResult<SibylConfig> {
    match sibyl_core::discover_config_file(explicit) {
        Some(path) => {
            let config: SibylConfig = sibyl_core::load_toml(&path)?;
            config.validate()?;
            Ok(config)
        }
        None => Ok(SibylConfig::default()),
    }
}

/// Map an error into the typed `Unavailable` kind used for LLM failures
pub fn llm_unavailable(message: impl Into<String>) -> SibylError {
    SibylError::Unavailable {
        message: message.into(),
        source: None,
        context: sibyl_core::ErrorContext::new("llm")
            .with_operation("complete")
            .with_suggestion("Check that the model binding is loaded"),
    }
}
