//! Pipeline coordination
//!
//! `PipelineBuilder` wires the components in dependency order: embedding
//! provider, vector store, retrievers, bandit and reranker, cache, then
//! the coordinator on top. The coordinator owns the ten-step answer flow
//! and routes feedback through the bus to every learner.

use crate::bandit::{ParamBandit, UniformSource};
use crate::cache::SemanticAnswerCache;
use crate::citations::CitationLabeler;
use crate::deep::DeepSearch;
use crate::embeddings::{cosine_similarity, EmbeddingProvider, HashedNgramEmbedder, VectorStore};
use crate::feedback::{FeedbackBus, QaContextStore};
use crate::llm::{strip_think_markers, LlmBinding};
use crate::reranker::OnlineSgdReranker;
use crate::retriever::HybridRetriever;
use crate::types::{AnswerContext, RagAnswer, SibylConfig};
use chrono::{Duration as ChronoDuration, Utc};
use sibyl_core::{
    config_error, AnswerFeedback, Chunk, DocFeedback, ErrorContext, FeedbackReason, SibylError,
    SibylResult, Verdict,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Fallback answer when retrieval produces nothing worth citing
const NO_ANSWER: &str = "I don't know. [1]";

/// Idle window after which unattributed answer contexts are dropped
const CONTEXT_IDLE_SECS: i64 = 600;

/// Builder over the engine's composition
///
/// Components are explicitly owned and injectable; only the LLM binding
/// is mandatory.
pub struct PipelineBuilder {
    config: SibylConfig,
    provider: Option<Arc<dyn EmbeddingProvider>>,
    llm: Option<Arc<dyn LlmBinding>>,
    uniform: Option<Box<dyn UniformSource>>,
}

impl PipelineBuilder {
    pub fn new(config: SibylConfig) -> Self {
        Self {
            config,
            provider: None,
            llm: None,
            uniform: None,
        }
    }

    /// Override the embedding provider (defaults to the hashed embedder)
    pub fn with_embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_llm(mut self, llm: Arc<dyn LlmBinding>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// Inject the bandit's uniform stream (tests, replay)
    pub fn with_uniform_source(mut self, source: Box<dyn UniformSource>) -> Self {
        self.uniform = Some(source);
        self
    }

    pub fn build(self) -> SibylResult<PipelineCoordinator> {
        self.config.validate()?;

        let llm = self
            .llm
            .ok_or_else(|| config_error!("pipeline requires an LLM binding", "pipeline"))?;

        // Initialization order: provider, store, retrievers, learners,
        // cache, coordinator
        let provider = match self.provider {
            Some(p) => p,
            None => Arc::new(HashedNgramEmbedder::new(&self.config.embedding)?),
        };
        let store = Arc::new(VectorStore::new(provider));
        let retriever = Arc::new(HybridRetriever::new(
            Arc::clone(&store),
            self.config.retrieval.clone(),
        )?);
        let deep = DeepSearch::new(Arc::clone(&retriever), self.config.deep_search.clone());

        let bandit = match self.uniform {
            Some(source) => Arc::new(ParamBandit::with_uniform_source(
                self.config.bandit.clone(),
                source,
            )?),
            None => Arc::new(ParamBandit::new(self.config.bandit.clone())?),
        };
        let reranker = Arc::new(OnlineSgdReranker::new(self.config.reranker.clone()));
        let cache = Arc::new(SemanticAnswerCache::new(
            self.config.cache.clone(),
            Arc::clone(&store),
        ));
        let labeler = CitationLabeler::new(self.config.citation.clone());
        let contexts = Arc::new(QaContextStore::new(ChronoDuration::seconds(
            CONTEXT_IDLE_SECS,
        )));
        let bus = Arc::new(FeedbackBus::new());

        // Feedback fan-out: bandit and cache on the answer channel, the
        // reranker on the passage channel
        {
            let bandit = Arc::clone(&bandit);
            bus.subscribe_answer(Arc::new(move |event: &AnswerFeedback| {
                bandit.reward(event.qa_id, event.verdict);
            }));
        }
        {
            let cache = Arc::clone(&cache);
            let contexts = Arc::clone(&contexts);
            bus.subscribe_answer(Arc::new(move |event: &AnswerFeedback| {
                match contexts.get(&event.qa_id) {
                    Some(context) => {
                        cache.observe_answer_feedback(&context, event.verdict);
                        contexts.remove(&event.qa_id);
                    }
                    None => debug!("No answer context for qa {}", event.qa_id),
                }
            }));
        }
        {
            let reranker = Arc::clone(&reranker);
            let contexts = Arc::clone(&contexts);
            let store = Arc::clone(&store);
            bus.subscribe_doc(Arc::new(move |event: &DocFeedback| {
                let (question, embedding) = event
                    .qa_id
                    .and_then(|id| contexts.get(&id))
                    .map(|c| (c.question, c.query_embedding))
                    .unwrap_or_else(|| {
                        (String::new(), vec![0.0; store.provider().dimension()])
                    });
                reranker.observe_feedback(&question, &embedding, &event.chunk, event.verdict);
            }));
        }

        info!("Pipeline assembled with {} bandit arms", self.config.bandit.arms.len());

        Ok(PipelineCoordinator {
            config: self.config,
            store,
            retriever,
            deep,
            bandit,
            reranker,
            cache,
            labeler,
            contexts,
            bus,
            llm,
        })
    }
}

/// Orchestrates bandit, retrieval, reranking, labeling, the LLM call,
/// citation enforcement, and feedback routing
pub struct PipelineCoordinator {
    config: SibylConfig,
    store: Arc<VectorStore>,
    retriever: Arc<HybridRetriever>,
    deep: DeepSearch,
    bandit: Arc<ParamBandit>,
    reranker: Arc<OnlineSgdReranker>,
    cache: Arc<SemanticAnswerCache>,
    labeler: CitationLabeler,
    contexts: Arc<QaContextStore>,
    bus: Arc<FeedbackBus>,
    llm: Arc<dyn LlmBinding>,
}

impl PipelineCoordinator {
    pub fn store(&self) -> &Arc<VectorStore> {
        &self.store
    }

    pub fn retriever(&self) -> &Arc<HybridRetriever> {
        &self.retriever
    }

    pub fn bandit(&self) -> &Arc<ParamBandit> {
        &self.bandit
    }

    pub fn reranker(&self) -> &Arc<OnlineSgdReranker> {
        &self.reranker
    }

    pub fn cache(&self) -> &Arc<SemanticAnswerCache> {
        &self.cache
    }

    pub fn feedback_bus(&self) -> &Arc<FeedbackBus> {
        &self.bus
    }

    pub fn config(&self) -> &SibylConfig {
        &self.config
    }

    fn compose_prompt(&self, question: &str, context: &str) -> String {
        format!(
            "Answer the question from the cited context only.\n\n{}\n\nQuestion: {}\n\nAnswer:",
            context, question
        )
    }

    /// Answer a question with no explicit deadline
    pub async fn answer(&self, question: &str) -> SibylResult<RagAnswer> {
        self.answer_with_deadline(question, None).await
    }

    /// Full answer flow; `deadline` bounds only the LLM call
    ///
    /// Retrieval and learning failures degrade to safe defaults and never
    /// surface. LLM failure and deadline expiry return typed errors
    /// without touching bandit or reranker posteriors.
    pub async fn answer_with_deadline(
        &self,
        question: &str,
        deadline: Option<Duration>,
    ) -> SibylResult<RagAnswer> {
        // Cache first: a verified hit skips retrieval and the bandit
        if let Some((answer, sources)) = self.cache.lookup(question) {
            let qa_id = Uuid::new_v4();
            self.remember(qa_id, question, &answer, &sources);
            return Ok(RagAnswer {
                qa_id,
                answer,
                sources,
                from_cache: true,
            });
        }

        let qa_id = Uuid::new_v4();
        let (cluster, arm) = self.bandit.choose_params(question, Some(qa_id));
        debug!("qa {}: cluster {}, arm {}", qa_id, cluster, arm.id);

        let top_k = arm.params.top_k as usize;
        let outcome = self
            .retriever
            .retrieve_full(question, top_k, arm.params.mmr_lambda);

        let query_embedding = self.store.provider().embed(question);
        let candidates: Vec<Chunk> = outcome.selected.into_iter().map(|s| s.chunk).collect();
        let reranked = self.reranker.rerank(
            question,
            &query_embedding,
            candidates,
            &outcome.bm25_scores,
            top_k,
        );

        // Drop passages below the arm's similarity floor
        let sources: Vec<Chunk> = reranked
            .into_iter()
            .map(|s| s.chunk)
            .filter(|c| {
                cosine_similarity(&query_embedding, &c.embedding) >= arm.params.min_score
            })
            .collect();

        if sources.is_empty() {
            info!("qa {}: no candidate survived, returning fallback", qa_id);
            self.remember(qa_id, question, NO_ANSWER, &[]);
            return Ok(RagAnswer {
                qa_id,
                answer: NO_ANSWER.to_string(),
                sources: Vec::new(),
                from_cache: false,
            });
        }

        let context = self.labeler.labeled_context(&sources);
        let prompt = self.compose_prompt(question, &context);

        let completion = self.llm.complete(&prompt, &self.config.sampling);
        let raw = match deadline {
            Some(limit) => match tokio::time::timeout(limit, completion).await {
                Ok(result) => result?,
                Err(_) => {
                    warn!("qa {}: LLM call exceeded {:?}", qa_id, limit);
                    return Err(SibylError::Timeout {
                        operation: "llm_complete".to_string(),
                        duration_ms: limit.as_millis() as u64,
                        context: ErrorContext::new("pipeline")
                            .with_operation("answer")
                            .with_suggestion("Raise the deadline or use a smaller model"),
                    });
                }
            },
            None => completion.await?,
        };

        let stripped = strip_think_markers(&raw, &self.config.think_filter);
        let answer = self.labeler.enforce_citations(&stripped, sources.len());

        self.remember(qa_id, question, &answer, &sources);
        info!("qa {}: answered with {} sources", qa_id, sources.len());

        Ok(RagAnswer {
            qa_id,
            answer,
            sources,
            from_cache: false,
        })
    }

    fn remember(&self, qa_id: Uuid, question: &str, answer: &str, sources: &[Chunk]) {
        self.contexts.put(AnswerContext {
            qa_id,
            question: question.to_string(),
            query_embedding: self.store.provider().embed(question),
            answer: answer.to_string(),
            sources: sources.to_vec(),
            created_at: Utc::now(),
        });
    }

    /// Multi-round deep search over the corpus
    pub fn deep_search(&self, question: &str) -> Vec<Chunk> {
        self.deep
            .search(question)
            .into_iter()
            .map(|s| s.chunk)
            .collect()
    }

    /// Publish an answer-level verdict
    pub fn feedback_answer(&self, qa_id: Uuid, verdict: Verdict) {
        self.bus.publish_answer(&AnswerFeedback::new(qa_id, verdict));
    }

    /// Publish a passage-level verdict
    pub fn feedback_doc(
        &self,
        qa_id: Option<Uuid>,
        chunk: Chunk,
        verdict: Verdict,
        reason: FeedbackReason,
    ) {
        let mut event = DocFeedback::new(chunk, verdict, reason);
        if let Some(qa_id) = qa_id {
            event = event.with_qa_id(qa_id);
        }
        self.bus.publish_doc(&event);
    }
}
