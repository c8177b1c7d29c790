//! Sampling presets
//!
//! Named parameter bundles callers pick directly, plus `auto`, which
//! sniffs the query for intent cues and resolves to a concrete preset.

use crate::types::SamplingParams;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    Factual,
    Balanced,
    Creative,
    Json,
    Code,
    Auto,
}

impl Preset {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "factual" => Some(Self::Factual),
            "balanced" => Some(Self::Balanced),
            "creative" => Some(Self::Creative),
            "json" => Some(Self::Json),
            "code" => Some(Self::Code),
            "auto" => Some(Self::Auto),
            _ => None,
        }
    }

    /// Resolve `auto` against the query; concrete presets pass through
    pub fn resolve(self, query: &str) -> Self {
        if self != Self::Auto {
            return self;
        }

        let lower = query.to_lowercase();
        let json_cues = lower.contains("json")
            || lower.contains("schema")
            || (lower.contains('{') && lower.contains('}'));
        let code_cues = lower.contains("```")
            || lower.contains("code")
            || lower.contains("function")
            || lower.contains("implement")
            || lower.contains("snippet");

        if json_cues {
            Self::Json
        } else if code_cues {
            Self::Code
        } else if lower.contains("context:") {
            Self::Factual
        } else {
            Self::Balanced
        }
    }

    /// Sampling parameters for a concrete preset
    ///
    /// `Auto` must be resolved first; calling this on `Auto` yields the
    /// balanced parameters.
    pub fn sampling(self) -> SamplingParams {
        match self {
            Self::Factual => SamplingParams {
                temperature: 0.2,
                top_k: 40,
                top_p: 0.9,
                max_new_tokens: 1024,
                stop: Vec::new(),
            },
            Self::Balanced | Self::Auto => SamplingParams::default(),
            Self::Creative => SamplingParams {
                temperature: 1.0,
                top_k: 80,
                top_p: 0.95,
                max_new_tokens: 1536,
                stop: Vec::new(),
            },
            Self::Json => SamplingParams {
                temperature: 0.1,
                top_k: 20,
                top_p: 0.9,
                max_new_tokens: 1024,
                stop: Vec::new(),
            },
            Self::Code => SamplingParams {
                temperature: 0.3,
                top_k: 40,
                top_p: 0.9,
                max_new_tokens: 2048,
                stop: Vec::new(),
            },
        }
    }
}
