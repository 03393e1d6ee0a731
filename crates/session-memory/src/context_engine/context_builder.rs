//! Renders ranked entries into one budget-constrained context block

use tracing::debug;

use crate::memory_db::MemoryEntry;
use crate::utils::TextUtils;

/// Returned instead of an empty string when there is nothing to render
pub const NO_MEMORIES: &str = "No relevant memories found.";
/// Placed between rendered entries
pub const ENTRY_SEPARATOR: &str = "\n\n---\n\n";
/// Rough tokens-per-character estimate
const TOKENS_PER_CHAR: f64 = 0.25;
/// A truncated tail entry is only worth adding above this many remaining tokens
const MIN_TAIL_TOKENS: usize = 100;

/// Configuration for context building
#[derive(Debug, Clone)]
pub struct ContextBuilderConfig {
    pub max_total_tokens: usize,
    pub include_metadata: bool,
}

impl Default for ContextBuilderConfig {
    fn default() -> Self {
        Self {
            max_total_tokens: 4000,
            include_metadata: true,
        }
    }
}

/// Greedy formatter: entries keep their ranked order and only the tail is ever cut.
#[derive(Debug, Clone, Default)]
pub struct ContextBuilder {
    config: ContextBuilderConfig,
}

impl ContextBuilder {
    pub fn new(config: ContextBuilderConfig) -> Self {
        Self { config }
    }

    pub fn build(&self, entries: &[MemoryEntry]) -> String {
        if entries.is_empty() {
            return NO_MEMORIES.to_string();
        }

        let budget = self.config.max_total_tokens;
        let mut parts: Vec<String> = Vec::new();
        let mut estimated_tokens = 0usize;

        for entry in entries {
            let text = Self::format_entry(entry, self.config.include_metadata);
            let entry_tokens = Self::estimate_tokens(&text);

            if estimated_tokens + entry_tokens > budget {
                let remaining = budget.saturating_sub(estimated_tokens);
                if remaining > MIN_TAIL_TOKENS {
                    let max_chars = (remaining as f64 / TOKENS_PER_CHAR) as usize;
                    parts.push(TextUtils::truncate_with_ellipsis(&text, max_chars).into_owned());
                }
                debug!(
                    "Context budget of {} tokens reached after {} of {} entries",
                    budget,
                    parts.len(),
                    entries.len()
                );
                break;
            }

            parts.push(text);
            estimated_tokens += entry_tokens;
        }

        parts.join(ENTRY_SEPARATOR)
    }

    /// Header line, optional metadata line, then the raw content
    pub fn format_entry(entry: &MemoryEntry, include_metadata: bool) -> String {
        let mut lines = vec![format!(
            "[{}] ({})",
            entry.entry_type.as_str().to_uppercase(),
            entry.timestamp.format("%Y-%m-%d %H:%M")
        )];

        if include_metadata && !entry.metadata.is_empty() {
            let pairs: Vec<String> = entry
                .metadata
                .iter()
                .filter(|(_, value)| is_present(value))
                .map(|(key, value)| match value {
                    serde_json::Value::String(s) => format!("{}={}", key, s),
                    other => format!("{}={}", key, other),
                })
                .collect();
            if !pairs.is_empty() {
                lines.push(format!("  Metadata: {}", pairs.join(", ")));
            }
        }

        lines.push(entry.content.clone());
        lines.join("\n")
    }

    /// Character count times a fixed ratio; not model-accurate
    pub fn estimate_tokens(text: &str) -> usize {
        (text.chars().count() as f64 * TOKENS_PER_CHAR) as usize
    }
}

/// Format entries for inclusion in a downstream prompt
pub fn format_entries_for_context(entries: &[MemoryEntry], max_tokens: usize, include_metadata: bool) -> String {
    ContextBuilder::new(ContextBuilderConfig {
        max_total_tokens: max_tokens,
        include_metadata,
    })
    .build(entries)
}

fn is_present(value: &serde_json::Value) -> bool {
    use serde_json::Value;
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(true, |f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}
