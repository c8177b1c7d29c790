//! Unicode-aware text analysis
//!
//! The tokenizer feeds BM25 scoring, query expansion, and the hashed
//! embedder. It extracts maximal runs of word characters, covering ASCII
//! identifiers plus CJK ideographs and Japanese kana. No stemming.

/// True for characters that belong to a token
fn is_token_char(c: char) -> bool {
    c.is_ascii_alphanumeric()
        || c == '_'
        // CJK unified ideographs
        || ('\u{4E00}'..='\u{9FFF}').contains(&c)
        // Hiragana
        || ('\u{3040}'..='\u{309F}').contains(&c)
        // Katakana, including the long vowel mark
        || ('\u{30A0}'..='\u{30FF}').contains(&c)
        || c == '々'
        || c == '〆'
        || c == '〤'
}

/// Split text into lowercase tokens
pub fn tokenize(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    let mut tokens = Vec::new();
    let mut current = String::new();

    for c in lowered.chars() {
        if is_token_char(c) {
            current.push(c);
        } else if !current.is_empty() {
            tokens.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

const ENGLISH_STOPWORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "but", "if", "then", "else", "when", "at", "by", "for", "with",
    "about", "into", "through", "during", "before", "after", "above", "below", "to", "from", "up",
    "down", "in", "out", "on", "off", "over", "under", "again", "once", "here", "there", "all",
    "any", "both", "each", "few", "more", "most", "other", "some", "such", "no", "nor", "not",
    "only", "own", "same", "so", "than", "too", "very", "can", "will", "just", "is", "are", "was",
    "were", "be", "been", "being", "have", "has", "had", "having", "do", "does", "did", "doing",
    "of", "it", "its", "this", "that", "these", "those", "i", "you", "he", "she", "they", "we",
    "what", "which", "who", "whom", "how", "why", "where",
];

const JAPANESE_STOPWORDS: &[&str] = &[
    "の", "に", "は", "を", "た", "が", "で", "て", "と", "し", "れ", "さ", "ある", "いる", "も",
    "する", "から", "な", "こと", "として", "です", "ます",
];

/// Check membership in the English or Japanese stopword lists
pub fn is_stopword(token: &str) -> bool {
    ENGLISH_STOPWORDS.contains(&token) || JAPANESE_STOPWORDS.contains(&token)
}

/// Produces a small ordered set of query variants
///
/// Variants are emitted in priority order: the normalized original, a
/// stopword-dropped form, and a naive stem-lite form. Duplicates are
/// removed preserving first occurrence.
#[derive(Debug, Clone)]
pub struct QueryIterator {
    max_variants: usize,
}

impl Default for QueryIterator {
    fn default() -> Self {
        Self { max_variants: 5 }
    }
}

impl QueryIterator {
    pub fn new(max_variants: usize) -> Self {
        Self { max_variants }
    }

    /// Lowercase, collapse whitespace, trim
    pub fn normalize(query: &str) -> String {
        query
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn drop_stopwords(normalized: &str) -> String {
        normalized
            .split_whitespace()
            .filter(|w| !is_stopword(w))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Strip a trailing `es`, `s`, `ing`, `ed`, or `ly` when the remaining
    /// stem keeps at least three characters
    fn stem_lite_word(word: &str) -> &str {
        for suffix in ["es", "s", "ing", "ed", "ly"] {
            if let Some(stem) = word.strip_suffix(suffix) {
                if stem.chars().count() >= 3 {
                    return stem;
                }
            }
        }
        word
    }

    fn stem_lite(normalized: &str) -> String {
        normalized
            .split_whitespace()
            .map(Self::stem_lite_word)
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Produce up to `max_variants` query variants, order-preserving
    pub fn variants(&self, query: &str) -> Vec<String> {
        let normalized = Self::normalize(query);
        if normalized.is_empty() {
            return Vec::new();
        }

        let mut out = vec![normalized.clone()];

        let dropped = Self::drop_stopwords(&normalized);
        if !dropped.is_empty() && dropped != normalized {
            out.push(dropped.clone());
        }

        let stem_source = if dropped.is_empty() { &normalized } else { &dropped };
        let stemmed = Self::stem_lite(stem_source);
        if !stemmed.is_empty() {
            out.push(stemmed);
        }

        let mut seen = std::collections::HashSet::new();
        out.retain(|v| seen.insert(v.clone()));
        out.truncate(self.max_variants);
        out
    }
}
