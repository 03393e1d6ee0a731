//! Memory database module - SQLite-based storage for session entries, sessions and overflow content
pub mod schema;
pub mod migration;
pub mod retry;
pub mod entry_store;
pub mod executor;
pub mod report;
pub use schema::*;
pub use migration::MigrationManager;
pub use retry::RetryPolicy;
pub use entry_store::EntryStore;
pub use executor::{AsyncMemoryStore, Blocking, IoExecutor, MemoryStore, Suspending};
use std::path::{Path, PathBuf};
use std::time::Duration;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, TransactionBehavior};
use tracing::{info, warn};
use crate::error::MemoryResult;

/// File name of the database inside the storage directory
pub const DATABASE_FILE: &str = "memory.db";

/// Typed storage settings
#[derive(Debug, Clone, PartialEq)]
pub struct StorageConfig {
    pub storage_dir: PathBuf,
    pub pool_size: u32,
    pub busy_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_dir: PathBuf::from(".session-memory"),
            pool_size: 4,
            busy_timeout: Duration::from_millis(5000),
            retry: RetryPolicy::default(),
        }
    }
}

impl StorageConfig {
    pub fn in_dir(storage_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage_dir: storage_dir.into(),
            ..Default::default()
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.storage_dir.join(DATABASE_FILE)
    }
}

/// Pooled SQLite database shared by every store handle
pub struct MemoryDatabase {
    pool: Pool<SqliteConnectionManager>,
    retry: RetryPolicy,
    db_path: Option<PathBuf>,
}

impl MemoryDatabase {
    /// Open (creating if needed) the database under `config.storage_dir` and apply migrations
    pub fn open(config: &StorageConfig) -> MemoryResult<Self> {
        std::fs::create_dir_all(&config.storage_dir)?;
        let db_path = config.database_path();
        info!("Opening memory database at: {}", db_path.display());

        let busy_timeout = config.busy_timeout;
        let manager = SqliteConnectionManager::file(&db_path)
            .with_flags(
                rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                    | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                    | rusqlite::OpenFlags::SQLITE_OPEN_FULL_MUTEX,
            )
            .with_init(move |conn| configure_connection(conn, busy_timeout));
        let pool = Pool::builder()
            .max_size(config.pool_size.max(1))
            .build(manager)?;

        let database = Self {
            pool,
            retry: config.retry.clone(),
            db_path: Some(db_path),
        };
        database.retry.run("initialize schema", || {
            let mut conn = database.pool.get()?;
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
            MigrationManager::new(&mut conn).initialize_database()?;
            Ok(())
        })?;

        info!("Memory database initialized successfully");
        Ok(database)
    }

    /// Private in-memory database; a single pooled connection keeps the data alive
    pub fn new_in_memory() -> MemoryResult<Self> {
        let manager = SqliteConnectionManager::memory()
            .with_init(|conn| configure_connection(conn, Duration::from_millis(5000)));
        let pool = Pool::builder()
            .max_size(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .build(manager)?;
        {
            let mut conn = pool.get()?;
            MigrationManager::new(&mut conn).initialize_database()?;
        }
        Ok(Self {
            pool,
            retry: RetryPolicy::default(),
            db_path: None,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    fn get_conn(&self) -> MemoryResult<PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    /// Run a read against a pooled connection, retrying on lock contention
    pub(crate) fn with_conn<T, F>(&self, label: &str, mut f: F) -> MemoryResult<T>
    where
        F: FnMut(&Connection) -> MemoryResult<T>,
    {
        self.retry.run(label, || {
            let conn = self.get_conn()?;
            f(&conn)
        })
    }

    /// Run `f` inside one `BEGIN IMMEDIATE` transaction; the whole transaction is retried on contention
    pub(crate) fn with_transaction<T, F>(&self, label: &str, mut f: F) -> MemoryResult<T>
    where
        F: FnMut(&rusqlite::Transaction<'_>) -> MemoryResult<T>,
    {
        self.retry.run(label, || {
            let mut conn = self.get_conn()?;
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let result = f(&tx)?;
            tx.commit()?;
            Ok(result)
        })
    }
}

fn configure_connection(conn: &mut Connection, busy_timeout: Duration) -> rusqlite::Result<()> {
    conn.busy_timeout(busy_timeout)?;
    conn.execute_batch(
        "PRAGMA foreign_keys = ON;
         PRAGMA synchronous = NORMAL;",
    )
}

impl Drop for MemoryDatabase {
    fn drop(&mut self) {
        if self.db_path.is_none() {
            return;
        }
        if let Ok(conn) = self.pool.get() {
            if let Err(e) = conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(())) {
                warn!("WAL checkpoint on close failed: {}", e);
            }
        }
    }
}

impl std::fmt::Debug for MemoryDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryDatabase")
            .field("db_path", &self.db_path)
            .field("retry", &self.retry)
            .finish()
    }
}
