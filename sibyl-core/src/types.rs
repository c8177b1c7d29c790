//! Core data structures shared across the Sibyl system

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A document passage with its embedding and provenance
///
/// Chunks are immutable once inserted into a store. Identity for
/// deduplication is the `(content, embedding)` pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    /// Text content of the passage
    pub content: String,
    /// Dense embedding vector
    pub embedding: Vec<f32>,
    /// Title of the source document, if known
    pub source_title: Option<String>,
    /// Path of the source document, if known
    pub source_path: Option<String>,
    /// Page number within the source document
    pub page: Option<u32>,
}

impl Chunk {
    /// Create a chunk with content and embedding only
    pub fn new(content: impl Into<String>, embedding: Vec<f32>) -> Self {
        Self {
            content: content.into(),
            embedding,
            source_title: None,
            source_path: None,
            page: None,
        }
    }

    pub fn with_source(mut self, title: &str, path: &str) -> Self {
        self.source_title = Some(title.to_string());
        self.source_path = Some(path.to_string());
        self
    }

    /// Stable identity key derived from content, used by the hard-negative
    /// cache and feedback routing
    pub fn key(&self) -> String {
        format!("{:016x}", fnv1a_64(self.content.as_bytes()))
    }
}

/// FNV-1a 64-bit hash. Stable across processes, used wherever a cheap
/// deterministic content key is needed.
pub fn fnv1a_64(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut hash = OFFSET;
    for &b in bytes {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

/// User verdict on an answer or a cited passage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Up,
    Down,
}

/// Why a passage was judged the way it was
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackReason {
    Helpful,
    NotRelevant,
    Unknown,
}

/// Answer-level feedback event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerFeedback {
    /// QA exchange this verdict refers to
    pub qa_id: Uuid,
    pub verdict: Verdict,
    /// Free-form tags attached by the caller
    pub tags: Vec<String>,
    pub ts: DateTime<Utc>,
}

impl AnswerFeedback {
    pub fn new(qa_id: Uuid, verdict: Verdict) -> Self {
        Self {
            qa_id,
            verdict,
            tags: Vec::new(),
            ts: Utc::now(),
        }
    }
}

/// Passage-level feedback event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocFeedback {
    /// QA exchange this verdict came from, when known
    pub qa_id: Option<Uuid>,
    /// The judged passage
    pub chunk: Chunk,
    pub verdict: Verdict,
    pub reason: FeedbackReason,
    pub ts: DateTime<Utc>,
}

impl DocFeedback {
    pub fn new(chunk: Chunk, verdict: Verdict, reason: FeedbackReason) -> Self {
        Self {
            qa_id: None,
            chunk,
            verdict,
            reason,
            ts: Utc::now(),
        }
    }

    pub fn with_qa_id(mut self, qa_id: Uuid) -> Self {
        self.qa_id = Some(qa_id);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_key_is_stable() {
        let a = Chunk::new("swift programming", vec![1.0, 0.0]);
        let b = Chunk::new("swift programming", vec![0.0, 1.0]);
        // Key is content-derived only
        assert_eq!(a.key(), b.key());

        let c = Chunk::new("rust programming", vec![1.0, 0.0]);
        assert_ne!(a.key(), c.key());
    }

    #[test]
    fn test_fnv1a_known_value() {
        // FNV-1a of the empty string is the offset basis
        assert_eq!(fnv1a_64(b""), 0xcbf2_9ce4_8422_2325);
    }

    #[test]
    fn test_verdict_serde_roundtrip() {
        let json = serde_json::to_string(&Verdict::Up).unwrap();
        assert_eq!(json, "\"up\"");
        let back: Verdict = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Verdict::Up);
    }
}
