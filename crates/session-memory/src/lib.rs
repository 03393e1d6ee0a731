pub mod config;
pub mod context_engine;
pub mod error;
pub mod memory_db;
pub mod shared_state;
pub mod telemetry;
pub mod text_transform;
pub mod utils;

// Public API exports
pub use config::{Config, TransformBackend};
pub use error::{MemoryError, MemoryResult, TransformError};
pub use shared_state::SharedState;

pub use memory_db::{
    AsyncMemoryStore, Blocking, EntryFilter, EntryType, Importance, IoExecutor, MemoryDatabase, MemoryEntry,
    MemoryStats, MemoryStore, RetrievalResult, SessionInfo, StorageConfig, Suspending, TimeRange,
};

pub use context_engine::{
    format_entries_for_context, ConversationRecall, RecallOutcome, RecallTier, RetrievalConfig, Retriever,
    SemanticSignal, SummaryScope, Verbosity,
};

pub use text_transform::{build_transform, OpenAiCompatibleTransform, TextTransform};
