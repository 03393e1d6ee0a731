//! Context engine module - ranks stored memory and renders it for downstream prompts

pub mod retriever;
pub mod context_builder;
pub mod orchestrator;

pub use retriever::{
    importance_score, temporal_score, RelevanceScorer, RetrievalConfig, Retriever, SemanticSignal,
    StoredEmbeddingSignal,
};
pub use context_builder::{format_entries_for_context, ContextBuilder, ContextBuilderConfig, NO_MEMORIES};
pub use orchestrator::{
    ConversationRecall, RecallOutcome, RecallTier, SummaryScope, Verbosity, NOTHING_TO_RECALL,
    NO_RELEVANT_MEMORIES,
};
