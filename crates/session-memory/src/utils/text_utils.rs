//! Text helpers shared by reports, retrieval and formatting

use std::borrow::Cow;

/// Char-boundary-safe text operations
pub struct TextUtils;

impl TextUtils {
    /// Count whitespace-delimited words (no allocation)
    pub fn count_words(text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }

        text.split_whitespace().count()
    }

    /// First `max_chars` characters, never splitting a code point
    pub fn take_chars(text: &str, max_chars: usize) -> &str {
        match text.char_indices().nth(max_chars) {
            Some((byte_idx, _)) => &text[..byte_idx],
            None => text,
        }
    }

    /// Truncate to `max_chars` characters with a trailing ellipsis if anything was cut
    pub fn truncate_with_ellipsis(text: &str, max_chars: usize) -> Cow<'_, str> {
        let kept = Self::take_chars(text, max_chars);
        if kept.len() == text.len() {
            Cow::Borrowed(text)
        } else {
            let mut result = String::with_capacity(kept.len() + 3);
            result.push_str(kept);
            result.push_str("...");
            Cow::Owned(result)
        }
    }

    /// One-line preview: the first `max_chars` characters with newlines turned into spaces
    pub fn single_line_preview(text: &str, max_chars: usize) -> String {
        Self::take_chars(text, max_chars).replace('\n', " ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_words_across_whitespace_kinds() {
        assert_eq!(TextUtils::count_words(""), 0);
        assert_eq!(TextUtils::count_words("  one\ttwo\nthree  "), 3);
    }

    #[test]
    fn take_chars_respects_code_points() {
        assert_eq!(TextUtils::take_chars("héllo wörld", 7), "héllo w");
        assert_eq!(TextUtils::take_chars("short", 10), "short");
    }

    #[test]
    fn truncation_only_marks_when_cut() {
        assert_eq!(TextUtils::truncate_with_ellipsis("abc", 3), "abc");
        assert_eq!(TextUtils::truncate_with_ellipsis("abcdef", 3), "abc...");
        assert_eq!(TextUtils::truncate_with_ellipsis("日本語テキスト", 2), "日本...");
    }

    #[test]
    fn preview_is_single_line() {
        assert_eq!(TextUtils::single_line_preview("line one\nline two", 12), "line one lin");
    }
}
