//! Human-readable digests derived from stored sessions and statistics

use std::collections::BTreeMap;

use crate::memory_db::schema::{Importance, MemoryEntry, MemoryStats, SessionInfo};
use crate::utils::TextUtils;

/// How many important entries a session digest lists
const MAX_IMPORTANT_ENTRIES: usize = 5;
/// Characters of content shown per important entry
const PREVIEW_CHARS: usize = 100;

/// Render the digest for one session from its info row and its entries (newest first).
pub fn render_session_summary(session: &SessionInfo, entries: &[MemoryEntry]) -> String {
    let mut type_counts: BTreeMap<&str, usize> = BTreeMap::new();
    for entry in entries {
        *type_counts.entry(entry.entry_type.as_str()).or_default() += 1;
    }

    let mut important: Vec<&MemoryEntry> = entries
        .iter()
        .filter(|e| matches!(e.importance, Importance::High | Importance::Critical))
        .collect();
    // Stable: critical first, recency order kept within a level
    important.sort_by(|a, b| b.importance.cmp(&a.importance));

    let hours = (session.last_activity - session.started_at).num_milliseconds() as f64 / 3_600_000.0;

    let mut lines = vec![
        format!("Session: {}", session.session_id),
        format!(
            "Duration: {:.1} hours ({} - {})",
            hours,
            session.started_at.format("%Y-%m-%d %H:%M"),
            session.last_activity.format("%H:%M"),
        ),
        format!("Total entries: {}", session.entry_count),
        String::new(),
        "Entry breakdown:".to_string(),
    ];

    for (entry_type, count) in &type_counts {
        lines.push(format!("  - {}: {}", entry_type, count));
    }

    if !important.is_empty() {
        lines.push(String::new());
        lines.push(format!("Important entries ({}):", important.len()));
        for entry in important.iter().take(MAX_IMPORTANT_ENTRIES) {
            lines.push(format!(
                "  [{}] {}...",
                entry.importance,
                TextUtils::single_line_preview(&entry.content, PREVIEW_CHARS)
            ));
        }
    }

    lines.join("\n")
}

/// Text shown when a digest is requested for an unknown session
pub fn missing_session(session_id: &str) -> String {
    format!("No session found with ID: {}", session_id)
}

/// Status report for the store as a whole plus the caller's current session
pub fn render_status(stats: &MemoryStats, session_id: &str, session: Option<&SessionInfo>) -> String {
    let mut lines = vec![
        "# Memory Status".to_string(),
        String::new(),
        "## Current Session".to_string(),
        format!("- Session ID: {}", session_id),
    ];

    match session {
        Some(session) => {
            let hours = (session.last_activity - session.started_at).num_milliseconds() as f64 / 3_600_000.0;
            lines.push(format!("- Started: {}", session.started_at.format("%Y-%m-%d %H:%M")));
            lines.push(format!("- Duration: {:.1} hours", hours));
            lines.push(format!("- Entries in session: {}", session.entry_count));
        }
        None => lines.push("- Status: New session (no entries yet)".to_string()),
    }

    lines.extend([
        String::new(),
        "## Overall Statistics".to_string(),
        format!("- Total entries: {}", stats.total_entries),
        format!("- Total sessions: {}", stats.session_count),
        format!("- Storage size: {}", format_size(stats.storage_size_bytes)),
    ]);

    if !stats.entries_by_type.is_empty() {
        lines.push(String::new());
        lines.push("## Entry Breakdown".to_string());
        for (entry_type, count) in &stats.entries_by_type {
            lines.push(format!("- {}: {}", entry_type, count));
        }
    }

    if let (Some(oldest), Some(newest)) = (stats.oldest_entry, stats.newest_entry) {
        lines.push(String::new());
        lines.push("## Time Range".to_string());
        lines.push(format!("- Oldest entry: {}", oldest.format("%Y-%m-%d %H:%M")));
        lines.push(format!("- Newest entry: {}", newest.format("%Y-%m-%d %H:%M")));
    }

    lines.join("\n")
}

pub fn format_size(bytes: u64) -> String {
    let kb = bytes as f64 / 1024.0;
    if kb > 1024.0 {
        format!("{:.1} MB", kb / 1024.0)
    } else {
        format!("{:.1} KB", kb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_db::schema::EntryType;
    use chrono::{Duration, TimeZone, Utc};

    fn session(entry_count: u64) -> SessionInfo {
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        SessionInfo {
            session_id: "abc".into(),
            started_at: start,
            last_activity: start + Duration::minutes(90),
            entry_count,
            metadata: Default::default(),
        }
    }

    #[test]
    fn summary_lists_breakdown_and_important_entries() {
        let entries = vec![
            MemoryEntry::new("abc", EntryType::Decision, "Use SQLite\nfor storage").with_importance(Importance::High),
            MemoryEntry::new("abc", EntryType::UserMessage, "hello"),
            MemoryEntry::new("abc", EntryType::ToolResult, "panic in build").with_importance(Importance::Critical),
        ];
        let text = render_session_summary(&session(3), &entries);

        assert!(text.starts_with("Session: abc\nDuration: 1.5 hours (2026-03-01 09:00 - 10:30)"));
        assert!(text.contains("Total entries: 3"));
        assert!(text.contains("  - decision: 1\n  - tool_result: 1\n  - user_message: 1"));
        assert!(text.contains("Important entries (2):"));
        let critical = text.find("[critical] panic in build...").unwrap();
        let high = text.find("[high] Use SQLite for storage...").unwrap();
        assert!(critical < high);
    }

    #[test]
    fn summary_caps_important_entries() {
        let entries: Vec<_> = (0..8)
            .map(|i| MemoryEntry::new("abc", EntryType::Decision, format!("decision {}", i)).with_importance(Importance::High))
            .collect();
        let text = render_session_summary(&session(8), &entries);
        assert!(text.contains("Important entries (8):"));
        assert_eq!(text.matches("[high]").count(), MAX_IMPORTANT_ENTRIES);
    }

    #[test]
    fn status_without_session() {
        let stats = MemoryStats {
            total_entries: 0,
            session_count: 0,
            entries_by_type: Default::default(),
            storage_size_bytes: 4096,
            oldest_entry: None,
            newest_entry: None,
        };
        let text = render_status(&stats, "s1", None);
        assert!(text.contains("- Status: New session (no entries yet)"));
        assert!(text.contains("- Storage size: 4.0 KB"));
        assert!(!text.contains("## Time Range"));
    }

    #[test]
    fn size_switches_to_megabytes() {
        assert_eq!(format_size(3 * 1024 * 1024), "3.0 MB");
    }
}
