//! Conversation recall: retrieval and formatting, optionally distilled by a text transform.
//!
//! Every operation has a formatted answer it can always produce. When a transform is
//! configured it is tried first; if it is missing, fails or times out the formatted
//! answer is returned together with the reason the richer tier was skipped.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::context_engine::context_builder::format_entries_for_context;
use crate::context_engine::retriever::Retriever;
use crate::error::{MemoryResult, TransformError};
use crate::memory_db::{AsyncMemoryStore, EntryFilter, MemoryEntry, Suspending, TimeRange};
use crate::text_transform::TextTransform;
use crate::utils::TextUtils;

const RELEVANT_MAX_RESULTS: usize = 50;
const SUMMARY_MAX_ENTRIES: usize = 500;
const TOPIC_MAX_RESULTS: usize = 100;
const RECALL_MAX_RESULTS: usize = 30;
const SUMMARY_TOKEN_BUDGET: usize = 6000;
const RECALL_TOKEN_BUDGET: usize = 4000;
const FALLBACK_SUMMARY_CHARS: usize = 2000;
/// Fewer entries than this are returned as-is without asking the transform
const MIN_ENTRIES_FOR_DISTILLING: usize = 4;

pub const NO_RELEVANT_MEMORIES: &str = "No relevant memories found for this query.";
pub const NOTHING_TO_RECALL: &str = "I don't have any memories related to that query.";

fn retrieval_prompt(query: &str, memory: &str) -> String {
    format!(
        "You are reviewing stored session memory to answer a question.

QUESTION: {query}

MEMORY (most relevant first):
{memory}

Pick out what bears on the question, state any direct answer first, keep concrete \
details such as file names, commands and decisions, and say plainly if the memory \
does not answer it.

FINDINGS:"
    )
}

fn summary_prompt(scope: &str, details: &str, memory: &str) -> String {
    format!(
        "You are summarising stored session memory.

SCOPE: {scope}
{details}

MEMORY:
{memory}

Write a compact summary covering decisions taken, code and file changes, important \
technical details and anything left unresolved. Use short sections where it helps.

SUMMARY:"
    )
}

fn recall_prompt(query: &str, verbosity: Verbosity, memory: &str) -> String {
    format!(
        "You are helping someone remember part of an earlier session.

REQUEST: {query}
VERBOSITY: {verbosity}

MEMORY:
{memory}

For brief, answer in one or two sentences. For detailed, give the answer with its \
context. For full, include everything relevant, quoting code or exact wording where useful.

ANSWER:"
    )
}

/// What a summary should cover
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryScope {
    /// The given session, or the most recently active one
    Session(Option<String>),
    Topic(String),
    Range {
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    },
}

impl SummaryScope {
    pub fn name(&self) -> &'static str {
        match self {
            SummaryScope::Session(_) => "session",
            SummaryScope::Topic(_) => "topic",
            SummaryScope::Range { .. } => "range",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verbosity {
    Brief,
    #[default]
    Detailed,
    Full,
}

impl Verbosity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verbosity::Brief => "brief",
            Verbosity::Detailed => "detailed",
            Verbosity::Full => "full",
        }
    }

    /// How many entries, and within what budget, the formatted answer uses
    fn fallback_window(&self) -> (usize, usize) {
        match self {
            Verbosity::Brief => (3, 500),
            Verbosity::Detailed => (10, 2000),
            Verbosity::Full => (usize::MAX, RECALL_TOKEN_BUDGET),
        }
    }
}

impl fmt::Display for Verbosity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Verbosity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "brief" => Ok(Verbosity::Brief),
            "detailed" => Ok(Verbosity::Detailed),
            "full" => Ok(Verbosity::Full),
            other => Err(format!("unknown verbosity '{}'", other)),
        }
    }
}

/// Which tier produced a recall answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecallTier {
    Transformed,
    Formatted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecallOutcome {
    pub text: String,
    pub tier: RecallTier,
    /// Why the transform tier was skipped; `None` when it was used or never applicable
    pub fallback_reason: Option<TransformError>,
}

impl RecallOutcome {
    fn formatted(text: impl Into<String>, fallback_reason: Option<TransformError>) -> Self {
        Self {
            text: text.into(),
            tier: RecallTier::Formatted,
            fallback_reason,
        }
    }

    fn transformed(text: String) -> Self {
        Self {
            text,
            tier: RecallTier::Transformed,
            fallback_reason: None,
        }
    }
}

/// Recall service over the suspending store convention
pub struct ConversationRecall {
    retriever: Retriever<Suspending>,
    transform: Option<Arc<dyn TextTransform>>,
    transform_timeout: Duration,
}

impl ConversationRecall {
    pub fn new(
        retriever: Retriever<Suspending>,
        transform: Option<Arc<dyn TextTransform>>,
        transform_timeout: Duration,
    ) -> Self {
        match &transform {
            Some(t) => info!("Conversation recall using text transform '{}'", t.name()),
            None => info!("Conversation recall running without a text transform"),
        }
        Self {
            retriever,
            transform,
            transform_timeout,
        }
    }

    pub fn store(&self) -> &AsyncMemoryStore {
        self.retriever.store()
    }

    /// Context relevant to `query`, distilled when there is enough material.
    pub async fn retrieve_relevant(
        &self,
        query: &str,
        session_id: Option<String>,
        time_range: TimeRange,
        max_tokens: usize,
    ) -> MemoryResult<RecallOutcome> {
        let filter = EntryFilter {
            session_id,
            time_range,
            ..Default::default()
        };
        let result = self.retriever.retrieve(query, filter, RELEVANT_MAX_RESULTS).await?;
        if result.is_empty() {
            return Ok(RecallOutcome::formatted(NO_RELEVANT_MEMORIES, None));
        }

        let memory = format_entries_for_context(&result.entries, max_tokens, true);
        if result.entries.len() < MIN_ENTRIES_FOR_DISTILLING {
            return Ok(RecallOutcome::formatted(memory, None));
        }

        let prompt = retrieval_prompt(query, &memory);
        Ok(match self.transform_text(&prompt).await {
            Ok(text) => RecallOutcome::transformed(text),
            Err(reason) => RecallOutcome::formatted(memory, Some(reason)),
        })
    }

    /// Summary of a session, topic or time range.
    pub async fn summarize(&self, scope: SummaryScope) -> MemoryResult<RecallOutcome> {
        let (entries, details, session_id) = self.gather(&scope).await?;
        if entries.is_empty() {
            return Ok(RecallOutcome::formatted(
                format!("No entries found for {} summary.", scope.name()),
                None,
            ));
        }

        let memory = format_entries_for_context(&entries, SUMMARY_TOKEN_BUDGET, true);
        let prompt = summary_prompt(scope.name(), &details, &memory);

        let reason = match self.transform_text(&prompt).await {
            Ok(text) => return Ok(RecallOutcome::transformed(text)),
            Err(reason) => reason,
        };

        let text = match session_id {
            Some(id) => self.store().summarize(id).await?,
            None => format!(
                "Summary of {} entries:\n\n{}",
                entries.len(),
                TextUtils::take_chars(&memory, FALLBACK_SUMMARY_CHARS)
            ),
        };
        Ok(RecallOutcome::formatted(text, Some(reason)))
    }

    /// Natural-language recall at the requested verbosity.
    pub async fn recall(
        &self,
        what: &str,
        session_id: Option<String>,
        verbosity: Verbosity,
    ) -> MemoryResult<RecallOutcome> {
        let filter = EntryFilter {
            session_id,
            ..Default::default()
        };
        let result = self.retriever.retrieve(what, filter, RECALL_MAX_RESULTS).await?;
        if result.is_empty() {
            return Ok(RecallOutcome::formatted(NOTHING_TO_RECALL, None));
        }

        let memory = format_entries_for_context(&result.entries, RECALL_TOKEN_BUDGET, true);
        let prompt = recall_prompt(what, verbosity, &memory);

        Ok(match self.transform_text(&prompt).await {
            Ok(text) => RecallOutcome::transformed(text),
            Err(reason) => {
                let (count, budget) = verbosity.fallback_window();
                let shown = &result.entries[..count.min(result.entries.len())];
                RecallOutcome::formatted(format_entries_for_context(shown, budget, true), Some(reason))
            }
        })
    }

    /// Entries in scope, a line describing the scope, and the session when there is exactly one
    async fn gather(&self, scope: &SummaryScope) -> MemoryResult<(Vec<MemoryEntry>, String, Option<String>)> {
        match scope {
            SummaryScope::Session(Some(id)) => {
                let entries = self
                    .store()
                    .list(EntryFilter::for_session(id.clone()), SUMMARY_MAX_ENTRIES, 0)
                    .await?;
                Ok((entries, format!("Session ID: {}", id), Some(id.clone())))
            }
            SummaryScope::Session(None) => match self.store().latest_session_id().await? {
                Some(id) => {
                    let entries = self
                        .store()
                        .list(EntryFilter::for_session(id.clone()), SUMMARY_MAX_ENTRIES, 0)
                        .await?;
                    Ok((entries, format!("Most recent session: {}", id), Some(id)))
                }
                None => Ok((Vec::new(), String::new(), None)),
            },
            SummaryScope::Topic(topic) => {
                let result = self
                    .retriever
                    .retrieve(topic.clone(), EntryFilter::default(), TOPIC_MAX_RESULTS)
                    .await?;
                Ok((result.entries, format!("Topic: {}", topic), None))
            }
            SummaryScope::Range { start, end } => {
                let entries = self
                    .store()
                    .list_between(None, *start, *end, SUMMARY_MAX_ENTRIES)
                    .await?;
                let bound = |t: &Option<DateTime<Utc>>, open: &str| {
                    t.map(|t| t.to_rfc3339()).unwrap_or_else(|| open.to_string())
                };
                let details = format!("Time range: {} to {}", bound(start, "the beginning"), bound(end, "now"));
                Ok((entries, details, None))
            }
        }
    }

    async fn transform_text(&self, prompt: &str) -> Result<String, TransformError> {
        let Some(transform) = &self.transform else {
            return Err(TransformError::Unavailable("no text transform configured".into()));
        };

        debug!("Asking '{}' to distil {} chars of memory", transform.name(), prompt.len());
        let result = match tokio::time::timeout(self.transform_timeout, transform.complete(prompt)).await {
            Ok(result) => result,
            Err(_) => Err(TransformError::TimedOut(self.transform_timeout)),
        };
        if let Err(e) = &result {
            warn!("Falling back to formatted memories: {}", e);
        }
        result
    }
}
