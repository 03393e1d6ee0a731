//! Call conventions over the entry store.
//!
//! `EntryStore` is the only place storage logic lives. An [`IoExecutor`] decides how a
//! caller waits for it: [`Blocking`] runs the operation on the calling thread,
//! [`Suspending`] moves it onto tokio's blocking pool and hands back a future. Both
//! conventions run the very same closure, so they cannot drift apart.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;

use crate::error::MemoryResult;
use crate::memory_db::entry_store::EntryStore;
use crate::memory_db::schema::{EntryFilter, MemoryEntry, MemoryStats, SessionInfo};
use crate::memory_db::MemoryDatabase;

/// Strategy for waiting on a storage operation.
pub trait IoExecutor: Clone + Send + Sync + 'static {
    /// What a caller receives for an operation producing `T`.
    type Output<T: Send + 'static>;

    fn execute<T, F>(&self, store: &Arc<EntryStore>, op: F) -> Self::Output<T>
    where
        T: Send + 'static,
        F: FnOnce(&EntryStore) -> MemoryResult<T> + Send + 'static;
}

/// Runs on the caller's thread and returns the result directly.
#[derive(Debug, Clone, Copy, Default)]
pub struct Blocking;

impl IoExecutor for Blocking {
    type Output<T: Send + 'static> = MemoryResult<T>;

    fn execute<T, F>(&self, store: &Arc<EntryStore>, op: F) -> MemoryResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&EntryStore) -> MemoryResult<T> + Send + 'static,
    {
        op(store)
    }
}

/// Runs on tokio's blocking pool; the caller's task suspends until it completes.
#[derive(Debug, Clone, Copy, Default)]
pub struct Suspending;

impl IoExecutor for Suspending {
    type Output<T: Send + 'static> = BoxFuture<'static, MemoryResult<T>>;

    fn execute<T, F>(&self, store: &Arc<EntryStore>, op: F) -> BoxFuture<'static, MemoryResult<T>>
    where
        T: Send + 'static,
        F: FnOnce(&EntryStore) -> MemoryResult<T> + Send + 'static,
    {
        let store = Arc::clone(store);
        Box::pin(async move { tokio::task::spawn_blocking(move || op(&store)).await? })
    }
}

/// The storage API under one call convention.
pub struct MemoryStore<E: IoExecutor = Blocking> {
    store: Arc<EntryStore>,
    executor: E,
}

/// Storage API whose operations return futures.
pub type AsyncMemoryStore = MemoryStore<Suspending>;

impl MemoryStore<Blocking> {
    pub fn blocking(database: Arc<MemoryDatabase>) -> Self {
        Self::with_executor(Arc::new(EntryStore::new(database)), Blocking)
    }
}

impl MemoryStore<Suspending> {
    pub fn suspending(database: Arc<MemoryDatabase>) -> Self {
        Self::with_executor(Arc::new(EntryStore::new(database)), Suspending)
    }
}

impl<E: IoExecutor> MemoryStore<E> {
    pub fn with_executor(store: Arc<EntryStore>, executor: E) -> Self {
        Self { store, executor }
    }

    /// Same engine, different call convention.
    pub fn convention<F: IoExecutor>(&self, executor: F) -> MemoryStore<F> {
        MemoryStore::with_executor(Arc::clone(&self.store), executor)
    }

    /// Run an arbitrary engine operation under this convention.
    pub(crate) fn run<T, F>(&self, op: F) -> E::Output<T>
    where
        T: Send + 'static,
        F: FnOnce(&EntryStore) -> MemoryResult<T> + Send + 'static,
    {
        self.executor.execute(&self.store, op)
    }

    pub fn add(&self, entry: MemoryEntry) -> E::Output<String> {
        self.run(move |store| store.add(&entry))
    }

    pub fn get(&self, id: impl Into<String>, full: bool) -> E::Output<Option<MemoryEntry>> {
        let id = id.into();
        self.run(move |store| store.get(&id, full))
    }

    pub fn list(&self, filter: EntryFilter, limit: usize, offset: usize) -> E::Output<Vec<MemoryEntry>> {
        self.run(move |store| store.list(&filter, limit, offset))
    }

    pub fn list_between(
        &self,
        session_id: Option<String>,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        limit: usize,
    ) -> E::Output<Vec<MemoryEntry>> {
        self.run(move |store| store.list_between(session_id.as_deref(), start, end, limit))
    }

    pub fn search(
        &self,
        needle: impl Into<String>,
        session_id: Option<String>,
        limit: usize,
    ) -> E::Output<Vec<MemoryEntry>> {
        let needle = needle.into();
        self.run(move |store| store.search(&needle, session_id.as_deref(), limit))
    }

    pub fn get_session(&self, session_id: impl Into<String>) -> E::Output<Option<SessionInfo>> {
        let session_id = session_id.into();
        self.run(move |store| store.get_session(&session_id))
    }

    pub fn latest_session_id(&self) -> E::Output<Option<String>> {
        self.run(|store| store.latest_session_id())
    }

    pub fn summarize(&self, session_id: impl Into<String>) -> E::Output<String> {
        let session_id = session_id.into();
        self.run(move |store| store.summarize(&session_id))
    }

    pub fn clear_session(&self, session_id: impl Into<String>) -> E::Output<usize> {
        let session_id = session_id.into();
        self.run(move |store| store.clear_session(&session_id))
    }

    pub fn stats(&self) -> E::Output<MemoryStats> {
        self.run(|store| store.stats())
    }
}

impl<E: IoExecutor> Clone for MemoryStore<E> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            executor: self.executor.clone(),
        }
    }
}

impl<E: IoExecutor + std::fmt::Debug> std::fmt::Debug for MemoryStore<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("executor", &self.executor)
            .field("database", self.store.database())
            .finish()
    }
}
