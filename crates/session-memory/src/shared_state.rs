//! Process-wide handles, built once and passed to callers explicitly.
//!
//! Everything here is cheap to clone: both store conventions share one pooled
//! database, and the recall service shares it through its own retriever.

use std::sync::Arc;

use tracing::info;

use crate::{
    config::Config,
    context_engine::{ConversationRecall, Retriever},
    error::MemoryResult,
    memory_db::{AsyncMemoryStore, MemoryDatabase, MemoryStore, Suspending},
    text_transform::build_transform,
};

/// Core shared system state container
#[derive(Clone)]
pub struct SharedState {
    /// Configuration (read-only after initialization)
    pub config: Arc<Config>,

    /// Database connection pool
    pub database: Arc<MemoryDatabase>,

    /// Store handle whose operations return results directly
    pub store: MemoryStore,

    /// Store handle whose operations return futures
    pub async_store: AsyncMemoryStore,

    /// Ranking over the blocking convention
    pub retriever: Retriever,

    pub recall: Arc<ConversationRecall>,

    /// Session new entries are recorded under unless a caller says otherwise
    pub session_id: String,
}

impl SharedState {
    /// Open the configured database and wire every service on top of it
    pub fn initialize(config: Config) -> MemoryResult<Self> {
        let database = Arc::new(MemoryDatabase::open(&config.storage)?);
        Ok(Self::with_database(config, database))
    }

    /// Wire services over an already-open database
    pub fn with_database(config: Config, database: Arc<MemoryDatabase>) -> Self {
        info!("Initializing shared state for session {}", config.session_id);

        let store = MemoryStore::blocking(Arc::clone(&database));
        let async_store: AsyncMemoryStore = store.convention(Suspending);
        let retriever = Retriever::new(store.clone(), config.retrieval.clone());

        let transform = build_transform(&config.transform);
        let recall = ConversationRecall::new(
            Retriever::new(async_store.clone(), config.retrieval.clone()),
            transform,
            config.transform.timeout(),
        );

        Self {
            session_id: config.session_id.clone(),
            config: Arc::new(config),
            database,
            store,
            async_store,
            retriever,
            recall: Arc::new(recall),
        }
    }
}

impl std::fmt::Debug for SharedState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedState")
            .field("session_id", &self.session_id)
            .field("database", &self.database.path())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransformBackend;
    use crate::context_engine::{RecallTier, RetrievalConfig};
    use crate::memory_db::{EntryFilter, EntryType, MemoryEntry, StorageConfig};

    fn config(dir: &std::path::Path) -> Config {
        Config {
            storage: StorageConfig::in_dir(dir),
            session_id: "sess-1".into(),
            retrieval: RetrievalConfig::default(),
            transform: TransformBackend::None,
        }
    }

    #[tokio::test]
    async fn both_conventions_share_one_database() {
        let dir = tempfile::tempdir().unwrap();
        let state = SharedState::initialize(config(dir.path())).unwrap();
        assert_eq!(state.session_id, "sess-1");
        assert!(dir.path().join("memory.db").exists());

        let id = state
            .store
            .add(MemoryEntry::new(&state.session_id, EntryType::Decision, "use WAL mode"))
            .unwrap();
        let fetched = state.async_store.get(id.clone(), false).await.unwrap().unwrap();
        assert_eq!(fetched.content, "use WAL mode");

        let listed = state
            .async_store
            .list(EntryFilter::for_session("sess-1"), 10, 0)
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, id);
    }

    #[tokio::test]
    async fn recall_without_transform_is_formatted() {
        let state = SharedState::with_database(
            config(std::path::Path::new("unused")),
            Arc::new(MemoryDatabase::new_in_memory().unwrap()),
        );
        state
            .store
            .add(MemoryEntry::new("sess-1", EntryType::Decision, "we picked sqlite for storage"))
            .unwrap();

        let outcome = state
            .recall
            .recall("sqlite storage", None, Default::default())
            .await
            .unwrap();
        assert_eq!(outcome.tier, RecallTier::Formatted);
        assert!(outcome.text.contains("we picked sqlite for storage"));
    }

    #[test]
    fn reopening_keeps_entries() {
        let dir = tempfile::tempdir().unwrap();
        {
            let state = SharedState::initialize(config(dir.path())).unwrap();
            state
                .store
                .add(MemoryEntry::new("sess-1", EntryType::UserMessage, "remember me"))
                .unwrap();
        }
        let state = SharedState::initialize(config(dir.path())).unwrap();
        let session = state.store.get_session("sess-1").unwrap().unwrap();
        assert_eq!(session.entry_count, 1);
    }
}
