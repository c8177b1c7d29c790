//! Citation labeling and enforcement
//!
//! Builds the numbered context block handed to the model, and post-
//! processes the model's answer so every paragraph ends in at least one
//! valid label. Models drift; the enforcement pass is what guarantees the
//! UI can always link a paragraph back to its sources.

use crate::types::CitationConfig;
use regex::Regex;
use sibyl_core::Chunk;
use std::sync::OnceLock;

const RULES_BLOCK: &str = "CITATION RULES:\n\
    - Cite only the numbered labels listed above.\n\
    - End every paragraph with the labels that support it, like [1] or [2][3].\n\
    - Do not invent labels that are not listed.";

fn label_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[(\d+)\]").unwrap())
}

fn paragraph_split_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n[ \t]*\n").unwrap())
}

/// Builds labeled context blocks and enforces per-paragraph citations
#[derive(Debug, Clone)]
pub struct CitationLabeler {
    config: CitationConfig,
}

impl CitationLabeler {
    pub fn new(config: CitationConfig) -> Self {
        Self { config }
    }

    /// Flatten newlines and clip to the per-chunk limit
    fn clip(&self, content: &str) -> String {
        let flattened: String = content
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        if flattened.chars().count() <= self.config.per_chunk_limit {
            return flattened;
        }
        let clipped: String = flattened.chars().take(self.config.per_chunk_limit).collect();
        format!("{}…", clipped)
    }

    /// The numbered labels block:
    ///
    /// ```text
    /// CITATION LABELS:
    /// [1] <clipped chunk 1 content>
    /// [2] <clipped chunk 2 content>
    /// ```
    pub fn labels_block(&self, chunks: &[Chunk]) -> String {
        let mut block = String::from("CITATION LABELS:");
        for (idx, chunk) in chunks.iter().enumerate() {
            block.push_str(&format!("\n[{}] {}", idx + 1, self.clip(&chunk.content)));
        }
        block
    }

    /// Labels block plus the fixed rules block, ready for the prompt
    pub fn labeled_context(&self, chunks: &[Chunk]) -> String {
        format!("{}\n\n{}", self.labels_block(chunks), RULES_BLOCK)
    }

    /// Valid labels a paragraph mentions, in first-occurrence order,
    /// deduplicated
    fn valid_labels(paragraph: &str, max_label: usize) -> Vec<usize> {
        let mut seen = Vec::new();
        for capture in label_regex().captures_iter(paragraph) {
            if let Ok(n) = capture[1].parse::<usize>() {
                if (1..=max_label).contains(&n) && !seen.contains(&n) {
                    seen.push(n);
                }
            }
        }
        seen
    }

    /// True when the paragraph's trailing text is one or more valid labels
    fn ends_with_valid_label(paragraph: &str, max_label: usize) -> bool {
        let mut rest = paragraph.trim_end();
        let mut stripped = false;
        loop {
            let Some(open) = rest.rfind('[') else { break };
            if !rest.ends_with(']') {
                break;
            }
            let token = &rest[open..];
            let Some(captures) = label_regex().captures(token) else { break };
            // The token must be exactly "[n]"
            if captures.get(0).map(|m| m.as_str()) != Some(token) {
                break;
            }
            let Ok(n) = captures[1].parse::<usize>() else { break };
            if !(1..=max_label).contains(&n) {
                break;
            }
            stripped = true;
            rest = rest[..open].trim_end();
        }
        stripped
    }

    /// Enforce that every non-empty paragraph ends with at least one valid
    /// label in `[1, max_label]`
    ///
    /// Paragraphs already ending in valid labels pass through. Paragraphs
    /// citing valid labels elsewhere get them appended, in first-occurrence
    /// order. Paragraphs citing nothing get `[1]`.
    pub fn enforce_citations(&self, answer: &str, max_label: usize) -> String {
        let max_label = max_label.max(1);
        let normalized = answer.replace("\r\n", "\n");

        let paragraphs: Vec<String> = paragraph_split_regex()
            .split(&normalized)
            .map(|paragraph| {
                let trimmed = paragraph.trim();
                if trimmed.is_empty() {
                    return String::new();
                }

                if Self::ends_with_valid_label(trimmed, max_label) {
                    return trimmed.to_string();
                }

                let cited = Self::valid_labels(trimmed, max_label);
                if cited.is_empty() {
                    format!("{} [1]", trimmed)
                } else {
                    let suffix: String = cited.iter().map(|n| format!("[{}]", n)).collect();
                    format!("{} {}", trimmed, suffix)
                }
            })
            .filter(|p| !p.is_empty())
            .collect();

        paragraphs.join("\n\n")
    }
}

impl Default for CitationLabeler {
    fn default() -> Self {
        Self::new(CitationConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labeler() -> CitationLabeler {
        CitationLabeler::default()
    }

    #[test]
    fn test_labels_block_numbers_and_clips() {
        let labeler = CitationLabeler::new(CitationConfig { per_chunk_limit: 10 });
        let chunks = vec![
            Chunk::new("short", vec![]),
            Chunk::new("a much longer chunk\nwith a newline inside", vec![]),
        ];

        let block = labeler.labels_block(&chunks);
        let lines: Vec<&str> = block.lines().collect();
        assert_eq!(lines[0], "CITATION LABELS:");
        assert_eq!(lines[1], "[1] short");
        assert!(lines[2].starts_with("[2] "));
        assert!(lines[2].ends_with('…'));
        // Newlines are flattened, so the block has exactly one line per chunk
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn test_labeled_context_includes_rules() {
        let context = labeler().labeled_context(&[Chunk::new("content", vec![])]);
        assert!(context.contains("CITATION LABELS:"));
        assert!(context.contains("CITATION RULES:"));
    }

    #[test]
    fn test_valid_ending_left_alone() {
        let out = labeler().enforce_citations("Swift is great. [1]", 3);
        assert_eq!(out, "Swift is great. [1]");

        let multi = labeler().enforce_citations("Swift is great. [1][3]", 3);
        assert_eq!(multi, "Swift is great. [1][3]");
    }

    #[test]
    fn test_mid_paragraph_labels_are_appended() {
        let out = labeler().enforce_citations("As [2] says, Swift [1] is safe.", 3);
        assert_eq!(out, "As [2] says, Swift [1] is safe. [2][1]");
    }

    #[test]
    fn test_no_labels_falls_back_to_one() {
        let out = labeler().enforce_citations("No citations here.", 4);
        assert_eq!(out, "No citations here. [1]");
    }

    #[test]
    fn test_out_of_range_labels_ignored() {
        let out = labeler().enforce_citations("Claims [7] beyond range.", 2);
        assert_eq!(out, "Claims [7] beyond range. [1]");
    }

    #[test]
    fn test_every_paragraph_enforced() {
        let answer = "First paragraph about Swift.\n\nSecond one citing [2] early on.\n\nThird ends right. [1]";
        let out = labeler().enforce_citations(answer, 2);
        let paragraphs: Vec<&str> = out.split("\n\n").collect();
        assert_eq!(paragraphs.len(), 3);
        assert!(paragraphs[0].ends_with("[1]"));
        assert!(paragraphs[1].ends_with("[2]"));
        assert!(paragraphs[2].ends_with("[1]"));
    }

    #[test]
    fn test_blank_heavy_answer() {
        let out = labeler().enforce_citations("\n\n  \n\nOnly real text.\n\n\n", 1);
        assert_eq!(out, "Only real text. [1]");
    }
}
