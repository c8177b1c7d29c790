//! LLM binding contract
//!
//! The engine never talks to a model directly; hosts implement
//! `LlmBinding` over whatever runtime they load (llama.cpp, MLX, a test
//! double). `complete` is the only suspending operation in the whole
//! pipeline. Cancellation is dropping the future; the coordinator wraps
//! calls in a deadline on top.

use crate::types::{llm_unavailable, SamplingParams, ThinkFilterConfig};
use async_trait::async_trait;
use parking_lot::Mutex;
use sibyl_core::SibylResult;
use std::collections::VecDeque;
use std::time::Duration;

/// Contract the pipeline calls to produce a completion from a prompt
#[async_trait]
pub trait LlmBinding: Send + Sync {
    async fn complete(&self, prompt: &str, params: &SamplingParams) -> SibylResult<String>;
}

/// Strip `<think>…</think>` spans from untrusted model output
///
/// Bindings are expected to filter internal monologue themselves; this
/// pass runs defensively on whatever comes back. Complete spans are
/// always removed. For an unterminated `<think>`, up to `max_chars`
/// characters after the marker are treated as monologue and dropped;
/// with no budget configured the whole tail is dropped. The wall-clock
/// deadline in [`ThinkFilterConfig`] applies to streaming bindings, not
/// to this in-memory pass.
pub fn strip_think_markers(text: &str, config: &ThinkFilterConfig) -> String {
    const OPEN: &str = "<think>";
    const CLOSE: &str = "</think>";

    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(open) = rest.find(OPEN) {
        out.push_str(&rest[..open]);
        let after = &rest[open + OPEN.len()..];

        match after.find(CLOSE) {
            Some(close) => {
                rest = &after[close + CLOSE.len()..];
            }
            None => {
                // Unterminated block: drop up to the char budget, keep the rest
                match config.max_chars {
                    Some(budget) => {
                        let byte_cut = after
                            .char_indices()
                            .nth(budget)
                            .map(|(i, _)| i)
                            .unwrap_or(after.len());
                        rest = &after[byte_cut..];
                    }
                    None => {
                        rest = "";
                    }
                }
                out.push_str(rest);
                return out.trim().to_string();
            }
        }
    }

    out.push_str(rest);
    out.trim().to_string()
}

/// Scripted binding for tests and the demo command
///
/// Pops queued responses in order and falls back to a default. Optional
/// latency and failure injection cover the deadline and error paths.
pub struct MockLlm {
    responses: Mutex<VecDeque<String>>,
    default_response: String,
    delay: Option<Duration>,
    fail: bool,
    prompts: Mutex<Vec<String>>,
}

impl MockLlm {
    pub fn new(default_response: &str) -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            default_response: default_response.to_string(),
            delay: None,
            fail: false,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn with_responses(mut self, responses: Vec<String>) -> Self {
        self.responses = Mutex::new(responses.into());
        self
    }

    /// Sleep before answering, to exercise deadlines
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail every call with `Unavailable`
    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    /// Prompts seen so far, in call order
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }
}

#[async_trait]
impl LlmBinding for MockLlm {
    async fn complete(&self, prompt: &str, _params: &SamplingParams) -> SibylResult<String> {
        self.prompts.lock().push(prompt.to_string());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(llm_unavailable("mock binding configured to fail"));
        }

        let queued = self.responses.lock().pop_front();
        Ok(queued.unwrap_or_else(|| self.default_response.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_complete_think_span() {
        let config = ThinkFilterConfig::default();
        let out = strip_think_markers("<think>planning...</think>The answer. [1]", &config);
        assert_eq!(out, "The answer. [1]");
    }

    #[test]
    fn test_strip_multiple_spans() {
        let config = ThinkFilterConfig::default();
        let out = strip_think_markers(
            "<think>a</think>First.<think>b</think> Second.",
            &config,
        );
        assert_eq!(out, "First. Second.");
    }

    #[test]
    fn test_unterminated_without_budget_drops_tail() {
        let config = ThinkFilterConfig::default();
        let out = strip_think_markers("Visible. <think>never closed", &config);
        assert_eq!(out, "Visible.");
    }

    #[test]
    fn test_unterminated_with_budget_keeps_overflow() {
        let config = ThinkFilterConfig {
            max_chars: Some(4),
            deadline_ms: None,
        };
        let out = strip_think_markers("Visible. <think>abcdTail kept", &config);
        assert_eq!(out, "Visible. Tail kept");
    }

    #[test]
    fn test_text_without_markers_untouched() {
        let config = ThinkFilterConfig::default();
        assert_eq!(
            strip_think_markers("Plain answer. [1]", &config),
            "Plain answer. [1]"
        );
    }

    #[tokio::test]
    async fn test_mock_pops_queued_responses() {
        let mock = MockLlm::new("default")
            .with_responses(vec!["first".to_string(), "second".to_string()]);

        let params = SamplingParams::default();
        assert_eq!(mock.complete("p1", &params).await.unwrap(), "first");
        assert_eq!(mock.complete("p2", &params).await.unwrap(), "second");
        assert_eq!(mock.complete("p3", &params).await.unwrap(), "default");
        assert_eq!(mock.prompts().len(), 3);
    }

    #[tokio::test]
    async fn test_mock_failure() {
        let mock = MockLlm::new("x").failing();
        let result = mock.complete("p", &SamplingParams::default()).await;
        assert!(result.is_err());
    }
}
