//! Record types and enumerated vocabularies for the memory store
use chrono::{DateTime, Local, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Content longer than this many bytes is split into a truncated row plus an overflow record.
pub const LARGE_CONTENT_THRESHOLD: usize = 10_240;
/// Characters kept in the primary row when content overflows.
pub const TRUNCATED_PREFIX_CHARS: usize = 1_000;
/// Appended to a truncated prefix.
pub const TRUNCATION_MARKER: &str = "...";

/// Kind of recorded event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    UserMessage,
    AssistantMessage,
    ToolCall,
    ToolResult,
    FileOp,
    Decision,
    Summary,
}

impl EntryType {
    pub const ALL: [EntryType; 7] = [
        EntryType::UserMessage,
        EntryType::AssistantMessage,
        EntryType::ToolCall,
        EntryType::ToolResult,
        EntryType::FileOp,
        EntryType::Decision,
        EntryType::Summary,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::UserMessage => "user_message",
            EntryType::AssistantMessage => "assistant_message",
            EntryType::ToolCall => "tool_call",
            EntryType::ToolResult => "tool_result",
            EntryType::FileOp => "file_op",
            EntryType::Decision => "decision",
            EntryType::Summary => "summary",
        }
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntryType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown entry type '{}'", s))
    }
}

/// How much an entry should weigh when ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Importance {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Importance {
    pub const ALL: [Importance; 4] = [
        Importance::Low,
        Importance::Medium,
        Importance::High,
        Importance::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Importance::Low => "low",
            Importance::Medium => "medium",
            Importance::High => "high",
            Importance::Critical => "critical",
        }
    }

    /// Decode a stored value; anything unrecognised is treated as medium.
    pub fn from_stored(s: &str) -> Self {
        s.parse().unwrap_or_default()
    }
}

impl fmt::Display for Importance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Importance {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Importance::ALL
            .iter()
            .copied()
            .find(|i| i.as_str() == s)
            .ok_or_else(|| format!("unknown importance '{}'", s))
    }
}

/// Named wall-clock window, evaluated when a query runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeRange {
    Recent,
    Today,
    Week,
    #[default]
    All,
}

impl TimeRange {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeRange::Recent => "recent",
            TimeRange::Today => "today",
            TimeRange::Week => "week",
            TimeRange::All => "all",
        }
    }

    /// Earliest timestamp inside the window as seen from `now`, or `None` when unbounded.
    pub fn cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            TimeRange::Recent => Some(now - chrono::Duration::hours(1)),
            TimeRange::Today => {
                let local_midnight = now
                    .with_timezone(&Local)
                    .date_naive()
                    .and_hms_opt(0, 0, 0)?;
                Local
                    .from_local_datetime(&local_midnight)
                    .earliest()
                    .map(|dt| dt.with_timezone(&Utc))
            }
            TimeRange::Week => Some(now - chrono::Duration::days(7)),
            TimeRange::All => None,
        }
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "recent" => Ok(TimeRange::Recent),
            "today" => Ok(TimeRange::Today),
            "week" => Ok(TimeRange::Week),
            "all" => Ok(TimeRange::All),
            other => Err(format!("unknown time range '{}'", other)),
        }
    }
}

/// A single recorded unit of session memory. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: String,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub entry_type: EntryType,
    pub content: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    /// Reserved for semantic scoring; the default ranking does not read it.
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub importance: Importance,
}

impl MemoryEntry {
    /// New entry with a fresh id, the current time and medium importance.
    pub fn new(session_id: impl Into<String>, entry_type: EntryType, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            timestamp: Utc::now(),
            entry_type,
            content: content.into(),
            metadata: BTreeMap::new(),
            embedding: None,
            importance: Importance::default(),
        }
    }

    pub fn with_importance(mut self, importance: Importance) -> Self {
        self.importance = importance;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Whether this content must be split into a truncated row and an overflow record.
    pub fn is_oversized(&self) -> bool {
        self.content.len() > LARGE_CONTENT_THRESHOLD
    }

    /// Content as written to the primary row.
    pub fn stored_content(&self) -> String {
        if self.is_oversized() {
            let mut prefix: String = self.content.chars().take(TRUNCATED_PREFIX_CHARS).collect();
            prefix.push_str(TRUNCATION_MARKER);
            prefix
        } else {
            self.content.clone()
        }
    }
}

/// Bookkeeping for one session. `entry_count` is always counted live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub entry_count: u64,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

/// Aggregate counts over the whole store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryStats {
    pub total_entries: u64,
    pub session_count: u64,
    pub entries_by_type: BTreeMap<String, u64>,
    pub storage_size_bytes: u64,
    pub oldest_entry: Option<DateTime<Utc>>,
    pub newest_entry: Option<DateTime<Utc>>,
}

/// AND-combined filters for listing entries. Empty sets mean "no constraint".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntryFilter {
    pub session_id: Option<String>,
    #[serde(default)]
    pub entry_types: Vec<EntryType>,
    #[serde(default)]
    pub importance: Vec<Importance>,
    #[serde(default)]
    pub time_range: TimeRange,
}

impl EntryFilter {
    pub fn for_session(session_id: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id.into()),
            ..Default::default()
        }
    }

    pub fn with_types(mut self, entry_types: impl IntoIterator<Item = EntryType>) -> Self {
        self.entry_types = entry_types.into_iter().collect();
        self
    }

    pub fn with_importance(mut self, importance: impl IntoIterator<Item = Importance>) -> Self {
        self.importance = importance.into_iter().collect();
        self
    }

    pub fn with_time_range(mut self, time_range: TimeRange) -> Self {
        self.time_range = time_range;
        self
    }
}

/// Transient output of a retrieval. `relevance_scores` is parallel to `entries`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub entries: Vec<MemoryEntry>,
    pub query: String,
    pub relevance_scores: Vec<f32>,
    pub retrieval_time_ms: f64,
    pub tokens_used: usize,
}

impl RetrievalResult {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vocabularies_round_trip_through_text() {
        for t in EntryType::ALL {
            assert_eq!(t.as_str().parse::<EntryType>().unwrap(), t);
        }
        for i in Importance::ALL {
            assert_eq!(i.as_str().parse::<Importance>().unwrap(), i);
        }
        assert_eq!("week".parse::<TimeRange>().unwrap(), TimeRange::Week);
        assert!("fortnight".parse::<TimeRange>().is_err());
    }

    #[test]
    fn serde_uses_wire_names() {
        let json = serde_json::to_string(&EntryType::ToolResult).unwrap();
        assert_eq!(json, "\"tool_result\"");
        let json = serde_json::to_string(&Importance::Critical).unwrap();
        assert_eq!(json, "\"critical\"");
    }

    #[test]
    fn unknown_stored_importance_is_medium() {
        assert_eq!(Importance::from_stored("urgent"), Importance::Medium);
        assert_eq!(Importance::from_stored("high"), Importance::High);
    }

    #[test]
    fn oversized_content_keeps_prefix_and_marker() {
        let entry = MemoryEntry::new("s", EntryType::ToolResult, "x".repeat(20_000));
        assert!(entry.is_oversized());
        let stored = entry.stored_content();
        assert_eq!(stored.len(), TRUNCATED_PREFIX_CHARS + TRUNCATION_MARKER.len());
        assert!(stored.ends_with(TRUNCATION_MARKER));
    }

    #[test]
    fn threshold_content_is_not_truncated() {
        let entry = MemoryEntry::new("s", EntryType::ToolResult, "y".repeat(LARGE_CONTENT_THRESHOLD));
        assert!(!entry.is_oversized());
        assert_eq!(entry.stored_content(), entry.content);
    }

    #[test]
    fn time_range_cutoffs() {
        let now = Utc::now();
        assert_eq!(TimeRange::All.cutoff(now), None);
        assert_eq!(TimeRange::Recent.cutoff(now), Some(now - chrono::Duration::hours(1)));
        assert_eq!(TimeRange::Week.cutoff(now), Some(now - chrono::Duration::days(7)));
        let today = TimeRange::Today.cutoff(now).unwrap();
        assert!(today <= now);
        assert!(now - today <= chrono::Duration::hours(25));
    }
}
