//! session-memory CLI: record, list, search, rank and recall stored session memory.
//! Configuration comes from the environment (and `.env`); see `Config::from_env`.

#[cfg(feature = "cli")]
use anyhow::{Context, Result};
#[cfg(feature = "cli")]
use chrono::{DateTime, Utc};
#[cfg(feature = "cli")]
use clap::{Parser, Subcommand};
#[cfg(feature = "cli")]
use session_memory::{
    config::Config,
    context_engine::{format_entries_for_context, RecallOutcome, SummaryScope, Verbosity},
    memory_db::report,
    telemetry, EntryFilter, EntryType, Importance, MemoryEntry, SharedState, TimeRange,
};

#[cfg(feature = "cli")]
#[derive(Parser)]
#[command(name = "session-memory")]
#[command(about = "Persistent session memory: record, search, rank and recall", long_about = None)]
#[command(version)]
struct Cli {
    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[cfg(feature = "cli")]
#[derive(Subcommand)]
enum Commands {
    /// Record a new entry (session defaults to MEMORY_SESSION_ID).
    Add {
        content: String,
        #[arg(short = 't', long = "type", default_value = "user_message")]
        entry_type: EntryType,
        #[arg(short, long, default_value = "medium")]
        importance: Importance,
        #[arg(short, long)]
        session: Option<String>,
        /// key=value pairs; values that parse as JSON are stored as JSON
        #[arg(short, long = "meta")]
        metadata: Vec<String>,
    },
    /// Fetch one entry by id.
    Get {
        id: String,
        /// Reassemble oversized content
        #[arg(long)]
        full: bool,
    },
    /// List entries, newest first.
    List {
        #[arg(short, long)]
        session: Option<String>,
        #[arg(short = 't', long = "type")]
        types: Vec<EntryType>,
        #[arg(short, long)]
        importance: Vec<Importance>,
        #[arg(short, long, default_value = "all")]
        range: TimeRange,
        #[arg(short, long, default_value = "20")]
        limit: usize,
        #[arg(long, default_value = "0")]
        offset: usize,
    },
    /// Case-sensitive substring search over content.
    Search {
        needle: String,
        #[arg(short, long)]
        session: Option<String>,
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
    /// Show session bookkeeping (defaults to the current session).
    Session { id: Option<String> },
    /// Summarise a session, a topic or a time range.
    Summary {
        #[arg(short, long, conflicts_with_all = ["topic", "start", "end"])]
        session: Option<String>,
        #[arg(long)]
        topic: Option<String>,
        /// RFC 3339 lower bound
        #[arg(long)]
        start: Option<DateTime<Utc>>,
        /// RFC 3339 upper bound
        #[arg(long)]
        end: Option<DateTime<Utc>>,
    },
    /// Delete a session and everything recorded under it.
    Clear {
        session: String,
        #[arg(long)]
        confirm: bool,
    },
    /// Aggregate counts over the whole store.
    Stats,
    /// Markdown status report for the current session and the store.
    Status,
    /// Rank stored entries against a query and print them as context.
    Retrieve {
        query: String,
        #[arg(short, long)]
        session: Option<String>,
        #[arg(short, long, default_value = "all")]
        range: TimeRange,
        #[arg(short = 'n', long, default_value = "10")]
        max_results: usize,
        #[arg(long)]
        max_tokens: Option<usize>,
    },
    /// Answer "what did we ...?" from memory.
    Recall {
        what: String,
        #[arg(short, long)]
        session: Option<String>,
        #[arg(short, long, default_value = "detailed")]
        verbosity: Verbosity,
    },
}

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_tracing();
    let cli = Cli::parse();

    let config = Config::from_env().context("Load configuration from environment (MEMORY_*)")?;
    let state = SharedState::initialize(config).context("Open memory database")?;

    run(&state, cli.command, cli.json).await
}

#[cfg(feature = "cli")]
async fn run(state: &SharedState, command: Commands, json: bool) -> Result<()> {
    match command {
        Commands::Add {
            content,
            entry_type,
            importance,
            session,
            metadata,
        } => {
            let session = session.unwrap_or_else(|| state.session_id.clone());
            let mut entry = MemoryEntry::new(session, entry_type, content).with_importance(importance);
            for pair in metadata {
                let (key, value) = parse_metadata(&pair)?;
                entry = entry.with_metadata(key, value);
            }
            let id = state.async_store.add(entry).await?;
            if json {
                print_json(&serde_json::json!({ "id": id }))?;
            } else {
                println!("{}", id);
            }
        }
        Commands::Get { id, full } => match state.async_store.get(id.clone(), full).await? {
            Some(entry) if json => print_json(&entry)?,
            Some(entry) => println!("{}", format_entries_for_context(&[entry], usize::MAX, true)),
            None => anyhow::bail!("No entry found with ID: {}", id),
        },
        Commands::List {
            session,
            types,
            importance,
            range,
            limit,
            offset,
        } => {
            let filter = EntryFilter {
                session_id: session,
                ..Default::default()
            }
            .with_types(types)
            .with_importance(importance)
            .with_time_range(range);
            let entries = state.async_store.list(filter, limit, offset).await?;
            print_entries(&entries, json)?;
        }
        Commands::Search { needle, session, limit } => {
            let entries = state.async_store.search(needle, session, limit).await?;
            print_entries(&entries, json)?;
        }
        Commands::Session { id } => {
            let id = id.unwrap_or_else(|| state.session_id.clone());
            match state.async_store.get_session(id.clone()).await? {
                Some(session) if json => print_json(&session)?,
                Some(_) => println!("{}", state.async_store.summarize(id).await?),
                None => println!("{}", report::missing_session(&id)),
            }
        }
        Commands::Summary {
            session,
            topic,
            start,
            end,
        } => {
            let scope = match (topic, start, end) {
                (Some(topic), _, _) => SummaryScope::Topic(topic),
                (None, None, None) => SummaryScope::Session(session),
                (None, start, end) => SummaryScope::Range { start, end },
            };
            print_outcome(state.recall.summarize(scope).await?, json)?;
        }
        Commands::Clear { session, confirm } => {
            if !confirm {
                anyhow::bail!("Refusing to clear session {} without --confirm", session);
            }
            let deleted = state.async_store.clear_session(session.clone()).await?;
            if json {
                print_json(&serde_json::json!({ "session_id": session, "deleted": deleted }))?;
            } else {
                println!("Cleared {} entries from session {}", deleted, session);
            }
        }
        Commands::Stats => {
            let stats = state.async_store.stats().await?;
            if json {
                print_json(&stats)?;
            } else {
                println!("Total entries: {}", stats.total_entries);
                println!("Sessions: {}", stats.session_count);
                for (entry_type, count) in &stats.entries_by_type {
                    println!("  - {}: {}", entry_type, count);
                }
                println!("Storage size: {}", report::format_size(stats.storage_size_bytes));
            }
        }
        Commands::Status => {
            let stats = state.async_store.stats().await?;
            let session = state.async_store.get_session(state.session_id.clone()).await?;
            if json {
                print_json(&serde_json::json!({ "session": session, "stats": stats }))?;
            } else {
                println!("{}", report::render_status(&stats, &state.session_id, session.as_ref()));
            }
        }
        Commands::Retrieve {
            query,
            session,
            range,
            max_results,
            max_tokens,
        } => {
            let filter = EntryFilter {
                session_id: session,
                time_range: range,
                ..Default::default()
            };
            let retriever = state.retriever.clone();
            let result = tokio::task::spawn_blocking(move || retriever.retrieve(query, filter, max_results)).await??;
            if json {
                print_json(&result)?;
            } else {
                let budget = max_tokens.unwrap_or(state.retriever.config().max_tokens);
                println!("{}", format_entries_for_context(&result.entries, budget, true));
            }
        }
        Commands::Recall {
            what,
            session,
            verbosity,
        } => {
            print_outcome(state.recall.recall(&what, session, verbosity).await?, json)?;
        }
    }
    Ok(())
}

#[cfg(feature = "cli")]
fn parse_metadata(pair: &str) -> Result<(String, serde_json::Value)> {
    let (key, raw) = pair
        .split_once('=')
        .with_context(|| format!("Metadata '{}' must look like key=value", pair))?;
    let value = serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()));
    Ok((key.trim().to_string(), value))
}

#[cfg(feature = "cli")]
fn print_entries(entries: &[MemoryEntry], json: bool) -> Result<()> {
    if json {
        return print_json(&entries);
    }
    if entries.is_empty() {
        println!("No entries found.");
    }
    for entry in entries {
        println!(
            "{}  {}  {:<17} {:<8} {}",
            entry.id,
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            entry.entry_type,
            entry.importance,
            session_memory::utils::TextUtils::single_line_preview(&entry.content, 80)
        );
    }
    Ok(())
}

#[cfg(feature = "cli")]
fn print_outcome(outcome: RecallOutcome, json: bool) -> Result<()> {
    if json {
        return print_json(&serde_json::json!({
            "text": outcome.text,
            "tier": outcome.tier,
            "fallback_reason": outcome.fallback_reason.map(|e| e.to_string()),
        }));
    }
    println!("{}", outcome.text);
    Ok(())
}

#[cfg(feature = "cli")]
fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(not(feature = "cli"))]
fn main() {
    println!("CLI feature not enabled. Enable with --features cli");
}
