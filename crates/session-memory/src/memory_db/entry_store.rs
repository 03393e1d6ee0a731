//! Entry store - the single blocking engine behind both call conventions
use crate::error::{MemoryError, MemoryResult};
use crate::memory_db::report;
use crate::memory_db::schema::*;
use crate::memory_db::MemoryDatabase;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Column list shared by every entry query; `entry_from_row` reads in this order.
const ENTRY_COLUMNS: &str = "id, session_id, timestamp, entry_type, content, metadata, embedding, importance";

/// Authoritative storage operations. Every method blocks the calling thread.
#[derive(Debug, Clone)]
pub struct EntryStore {
    database: Arc<MemoryDatabase>,
}

impl EntryStore {
    pub fn new(database: Arc<MemoryDatabase>) -> Self {
        Self { database }
    }

    pub fn database(&self) -> &Arc<MemoryDatabase> {
        &self.database
    }

    /// Insert an entry, its overflow record if oversized, and advance the session's last activity.
    pub fn add(&self, entry: &MemoryEntry) -> MemoryResult<String> {
        if entry.session_id.is_empty() {
            return Err(MemoryError::InvalidInput("session id must not be empty".into()));
        }

        let timestamp = format_timestamp(&entry.timestamp);
        let metadata = serde_json::to_string(&entry.metadata)?;
        let embedding = match &entry.embedding {
            Some(values) if !values.is_empty() => Some(serde_json::to_string(values)?),
            _ => None,
        };
        let oversized = entry.is_oversized();
        let stored_content = entry.stored_content();

        self.database.with_transaction("add entry", |tx| {
            tx.execute(
                "INSERT INTO entries (id, session_id, timestamp, entry_type, content, metadata, embedding, importance)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    entry.id,
                    entry.session_id,
                    timestamp,
                    entry.entry_type.as_str(),
                    stored_content,
                    metadata,
                    embedding,
                    entry.importance.as_str(),
                ],
            )?;

            if oversized {
                tx.execute(
                    "INSERT INTO large_content (entry_id, content) VALUES (?1, ?2)",
                    params![entry.id, entry.content],
                )?;
            }

            tx.execute(
                "INSERT INTO sessions (session_id, started_at, last_activity) VALUES (?1, ?2, ?2)
                 ON CONFLICT(session_id) DO UPDATE SET last_activity = MAX(last_activity, excluded.last_activity)",
                params![entry.session_id, timestamp],
            )?;
            Ok(())
        })?;

        debug!(
            "Stored {} entry {} for session {}{}",
            entry.entry_type,
            entry.id,
            entry.session_id,
            if oversized { " (overflow)" } else { "" }
        );
        Ok(entry.id.clone())
    }

    /// Fetch one entry. With `full`, truncated content is replaced by its overflow record.
    pub fn get(&self, id: &str, full: bool) -> MemoryResult<Option<MemoryEntry>> {
        self.database.with_conn("get entry", |conn| {
            let mut stmt = conn.prepare(&format!("SELECT {} FROM entries WHERE id = ?1", ENTRY_COLUMNS))?;
            let mut rows = stmt.query([id])?;
            let mut entry = match rows.next()? {
                Some(row) => entry_from_row(row)?,
                None => return Ok(None),
            };

            if full && entry.content.ends_with(TRUNCATION_MARKER) {
                let overflow: Option<String> = conn
                    .query_row(
                        "SELECT content FROM large_content WHERE entry_id = ?1",
                        [id],
                        |row| row.get(0),
                    )
                    .optional()?;
                if let Some(content) = overflow {
                    entry.content = content;
                }
            }
            Ok(Some(entry))
        })
    }

    /// Filtered page of entries, newest first, time range evaluated against the current clock.
    pub fn list(&self, filter: &EntryFilter, limit: usize, offset: usize) -> MemoryResult<Vec<MemoryEntry>> {
        self.list_at(filter, limit, offset, Utc::now())
    }

    /// `list` with the time range evaluated as of `now`.
    pub fn list_at(
        &self,
        filter: &EntryFilter,
        limit: usize,
        offset: usize,
        now: DateTime<Utc>,
    ) -> MemoryResult<Vec<MemoryEntry>> {
        let mut sql = format!("SELECT {} FROM entries WHERE 1=1", ENTRY_COLUMNS);
        let mut values: Vec<SqlValue> = Vec::new();

        if let Some(session_id) = &filter.session_id {
            sql.push_str(" AND session_id = ?");
            values.push(SqlValue::Text(session_id.clone()));
        }
        if !filter.entry_types.is_empty() {
            sql.push_str(&format!(" AND entry_type IN ({})", placeholders(filter.entry_types.len())));
            values.extend(filter.entry_types.iter().map(|t| SqlValue::Text(t.as_str().to_string())));
        }
        if !filter.importance.is_empty() {
            sql.push_str(&format!(" AND importance IN ({})", placeholders(filter.importance.len())));
            values.extend(filter.importance.iter().map(|i| SqlValue::Text(i.as_str().to_string())));
        }
        if let Some(cutoff) = filter.time_range.cutoff(now) {
            sql.push_str(" AND timestamp >= ?");
            values.push(SqlValue::Text(format_timestamp(&cutoff)));
        }

        sql.push_str(" ORDER BY timestamp DESC, id ASC LIMIT ? OFFSET ?");
        values.push(SqlValue::Integer(to_sql_count(limit)));
        values.push(SqlValue::Integer(to_sql_count(offset)));

        self.database
            .with_conn("list entries", |conn| query_entries(conn, &sql, &values))
    }

    /// Entries whose timestamp lies within the given bounds (inclusive), newest first.
    pub fn list_between(
        &self,
        session_id: Option<&str>,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        limit: usize,
    ) -> MemoryResult<Vec<MemoryEntry>> {
        let mut sql = format!("SELECT {} FROM entries WHERE 1=1", ENTRY_COLUMNS);
        let mut values: Vec<SqlValue> = Vec::new();
        if let Some(start) = start {
            sql.push_str(" AND timestamp >= ?");
            values.push(SqlValue::Text(format_timestamp(&start)));
        }
        if let Some(end) = end {
            sql.push_str(" AND timestamp <= ?");
            values.push(SqlValue::Text(format_timestamp(&end)));
        }
        if let Some(session_id) = session_id {
            sql.push_str(" AND session_id = ?");
            values.push(SqlValue::Text(session_id.to_string()));
        }
        sql.push_str(" ORDER BY timestamp DESC, id ASC LIMIT ?");
        values.push(SqlValue::Integer(to_sql_count(limit)));

        self.database
            .with_conn("list entries between", |conn| query_entries(conn, &sql, &values))
    }

    /// Case-sensitive literal substring search over stored content.
    pub fn search(&self, needle: &str, session_id: Option<&str>, limit: usize) -> MemoryResult<Vec<MemoryEntry>> {
        let mut sql = format!("SELECT {} FROM entries WHERE instr(content, ?) > 0", ENTRY_COLUMNS);
        let mut values = vec![SqlValue::Text(needle.to_string())];
        if let Some(session_id) = session_id {
            sql.push_str(" AND session_id = ?");
            values.push(SqlValue::Text(session_id.to_string()));
        }
        sql.push_str(" ORDER BY timestamp DESC, id ASC LIMIT ?");
        values.push(SqlValue::Integer(to_sql_count(limit)));

        self.database
            .with_conn("search entries", |conn| query_entries(conn, &sql, &values))
    }

    /// Session bookkeeping with a live entry count.
    pub fn get_session(&self, session_id: &str) -> MemoryResult<Option<SessionInfo>> {
        self.database
            .with_conn("get session", |conn| query_session(conn, session_id))
    }

    /// Id of the session with the most recent activity.
    pub fn latest_session_id(&self) -> MemoryResult<Option<String>> {
        self.database.with_conn("latest session", |conn| {
            Ok(conn
                .query_row(
                    "SELECT session_id FROM sessions ORDER BY last_activity DESC, session_id ASC LIMIT 1",
                    [],
                    |row| row.get(0),
                )
                .optional()?)
        })
    }

    /// Human-readable digest of one session.
    pub fn summarize(&self, session_id: &str) -> MemoryResult<String> {
        self.database.with_conn("summarize session", |conn| {
            let Some(session) = query_session(conn, session_id)? else {
                return Ok(report::missing_session(session_id));
            };
            let entries = query_entries(
                conn,
                &format!(
                    "SELECT {} FROM entries WHERE session_id = ? ORDER BY timestamp DESC, id ASC",
                    ENTRY_COLUMNS
                ),
                &[SqlValue::Text(session_id.to_string())],
            )?;
            Ok(report::render_session_summary(&session, &entries))
        })
    }

    /// Remove a session with all its entries and overflow records; returns the entries removed.
    pub fn clear_session(&self, session_id: &str) -> MemoryResult<usize> {
        let deleted = self.database.with_transaction("clear session", |tx| {
            tx.execute(
                "DELETE FROM large_content WHERE entry_id IN (SELECT id FROM entries WHERE session_id = ?1)",
                [session_id],
            )?;
            let deleted = tx.execute("DELETE FROM entries WHERE session_id = ?1", [session_id])?;
            tx.execute("DELETE FROM sessions WHERE session_id = ?1", [session_id])?;
            Ok(deleted)
        })?;

        info!("Cleared session {} ({} entries)", session_id, deleted);
        Ok(deleted)
    }

    /// Aggregate counts over the whole store.
    pub fn stats(&self) -> MemoryResult<MemoryStats> {
        self.database.with_conn("stats", |conn| {
            let total_entries: i64 = conn.query_row("SELECT COUNT(*) FROM entries", [], |row| row.get(0))?;
            let session_count: i64 = conn.query_row("SELECT COUNT(*) FROM sessions", [], |row| row.get(0))?;

            let mut entries_by_type = BTreeMap::new();
            let mut stmt = conn.prepare("SELECT entry_type, COUNT(*) FROM entries GROUP BY entry_type")?;
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                let count: i64 = row.get(1)?;
                entries_by_type.insert(row.get::<_, String>(0)?, count as u64);
            }

            let storage_size_bytes: i64 = conn.query_row(
                "SELECT page_count * page_size FROM pragma_page_count(), pragma_page_size()",
                [],
                |row| row.get(0),
            )?;

            let (oldest, newest): (Option<String>, Option<String>) = conn.query_row(
                "SELECT MIN(timestamp), MAX(timestamp) FROM entries",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;

            Ok(MemoryStats {
                total_entries: total_entries as u64,
                session_count: session_count as u64,
                entries_by_type,
                storage_size_bytes: storage_size_bytes as u64,
                oldest_entry: oldest.as_deref().and_then(parse_datetime_safe),
                newest_entry: newest.as_deref().and_then(parse_datetime_safe),
            })
        })
    }
}

fn query_entries(conn: &Connection, sql: &str, values: &[SqlValue]) -> MemoryResult<Vec<MemoryEntry>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params_from_iter(values.iter()))?;
    let mut entries = Vec::new();
    while let Some(row) = rows.next()? {
        entries.push(entry_from_row(row)?);
    }
    Ok(entries)
}

fn query_session(conn: &Connection, session_id: &str) -> MemoryResult<Option<SessionInfo>> {
    let mut stmt = conn.prepare(
        "SELECT s.session_id, s.started_at, s.last_activity, s.metadata,
                (SELECT COUNT(*) FROM entries e WHERE e.session_id = s.session_id)
         FROM sessions s WHERE s.session_id = ?1",
    )?;
    let mut rows = stmt.query([session_id])?;
    match rows.next()? {
        Some(row) => Ok(Some(session_from_row(row)?)),
        None => Ok(None),
    }
}

fn entry_from_row(row: &Row) -> MemoryResult<MemoryEntry> {
    let id: String = row.get(0)?;
    let invalid = |reason: String| MemoryError::InvalidRecord { id: id.clone(), reason };

    let raw_timestamp: String = row.get(2)?;
    let timestamp = parse_datetime_safe(&raw_timestamp)
        .ok_or_else(|| invalid(format!("unparseable timestamp '{}'", raw_timestamp)))?;
    let entry_type = row.get::<_, String>(3)?.parse::<EntryType>().map_err(invalid)?;

    let metadata = match row.get::<_, Option<String>>(5)? {
        Some(json) if !json.trim().is_empty() => serde_json::from_str(&json)?,
        _ => BTreeMap::new(),
    };
    let embedding = match row.get::<_, Option<String>>(6)? {
        Some(json) => serde_json::from_str::<Option<Vec<f32>>>(&json)?,
        None => None,
    };
    let importance = row
        .get::<_, Option<String>>(7)?
        .map(|s| Importance::from_stored(&s))
        .unwrap_or_default();

    Ok(MemoryEntry {
        session_id: row.get(1)?,
        timestamp,
        entry_type,
        content: row.get(4)?,
        metadata,
        embedding,
        importance,
        id,
    })
}

fn session_from_row(row: &Row) -> MemoryResult<SessionInfo> {
    let session_id: String = row.get(0)?;
    let parse = |idx: usize| -> MemoryResult<DateTime<Utc>> {
        let raw: String = row.get(idx)?;
        parse_datetime_safe(&raw).ok_or_else(|| MemoryError::InvalidRecord {
            id: session_id.clone(),
            reason: format!("unparseable timestamp '{}'", raw),
        })
    };
    let started_at = parse(1)?;
    let last_activity = parse(2)?;
    let metadata = match row.get::<_, Option<String>>(3)? {
        Some(json) if !json.trim().is_empty() => serde_json::from_str(&json)?,
        _ => BTreeMap::new(),
    };
    let entry_count: i64 = row.get(4)?;

    Ok(SessionInfo {
        session_id,
        started_at,
        last_activity,
        entry_count: entry_count as u64,
        metadata,
    })
}

/// Fixed-width RFC 3339 UTC text, so lexical order is chronological order.
pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Accepts RFC 3339 as well as the naive forms older writers produced.
pub fn parse_datetime_safe(datetime_str: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(datetime_str) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(datetime_str, format) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }
    None
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

fn to_sql_count(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
