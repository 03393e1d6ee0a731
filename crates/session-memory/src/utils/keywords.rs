//! Keyword extraction used to compare queries against stored entries

use std::collections::HashSet;

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref WORD_REGEX: Regex = Regex::new(r"\b[a-zA-Z_][a-zA-Z0-9_]*\b").unwrap();
    static ref STOP_WORDS: HashSet<&'static str> = [
        "the", "a", "an", "is", "are", "was", "were", "be", "been", "being",
        "have", "has", "had", "do", "does", "did", "will", "would", "could",
        "should", "may", "might", "must", "shall", "can", "need", "dare",
        "ought", "used", "to", "of", "in", "for", "on", "with", "at", "by",
        "from", "as", "into", "through", "during", "before", "after", "above",
        "below", "between", "under", "again", "further", "then", "once", "here",
        "there", "when", "where", "why", "how", "all", "each", "few", "more",
        "most", "other", "some", "such", "no", "nor", "not", "only", "own",
        "same", "so", "than", "too", "very", "just", "and", "but", "if", "or",
        "because", "until", "while", "this", "that", "these", "those", "what",
        "which", "who", "whom", "it", "its", "i", "me", "my", "we", "our", "you",
        "your", "he", "him", "his", "she", "her", "they", "them", "their",
    ]
    .into_iter()
    .collect();
}

/// Turns free text into a set of lowercase keywords.
#[derive(Debug, Clone)]
pub struct KeywordExtractor {
    min_word_length: usize,
}

impl Default for KeywordExtractor {
    fn default() -> Self {
        Self { min_word_length: 3 }
    }
}

impl KeywordExtractor {
    /// Identifier-like ASCII words, lowercased, minus stop words and short tokens
    pub fn extract(&self, text: &str) -> HashSet<String> {
        let lowered = text.to_lowercase();
        WORD_REGEX
            .find_iter(&lowered)
            .map(|m| m.as_str())
            .filter(|word| word.len() >= self.min_word_length && !STOP_WORDS.contains(word))
            .map(str::to_string)
            .collect()
    }
}
