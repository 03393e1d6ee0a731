//! Multi-signal relevance ranking over stored entries

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{MemoryError, MemoryResult};
use crate::memory_db::{
    Blocking, EntryFilter, Importance, IoExecutor, MemoryEntry, MemoryStore, RetrievalResult,
};
use crate::utils::{KeywordExtractor, TextUtils};

/// Candidates fetched per requested result
const OVERSAMPLING_FACTOR: usize = 5;
/// Added to the keyword score when the whole query appears in the content
const PHRASE_BONUS: f32 = 0.3;
/// Keyword score used when the query has no usable keywords
const NEUTRAL_KEYWORD_SCORE: f32 = 0.5;

/// Weights and thresholds for ranking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalConfig {
    pub keyword_weight: f32,
    pub temporal_weight: f32,
    pub importance_weight: f32,
    /// Only counted for entries an attached [`SemanticSignal`] can score
    pub semantic_weight: f32,
    pub min_relevance: f32,
    pub max_tokens: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            keyword_weight: 0.1,
            temporal_weight: 0.3,
            importance_weight: 0.2,
            semantic_weight: 0.4,
            min_relevance: 0.1,
            max_tokens: 4000,
        }
    }
}

impl RetrievalConfig {
    pub fn validate(&self) -> MemoryResult<()> {
        let weights = [
            ("keyword", self.keyword_weight),
            ("temporal", self.temporal_weight),
            ("importance", self.importance_weight),
            ("semantic", self.semantic_weight),
        ];
        for (name, weight) in weights {
            if !weight.is_finite() || weight < 0.0 {
                return Err(MemoryError::InvalidInput(format!(
                    "{} weight must be a non-negative number, got {}",
                    name, weight
                )));
            }
        }
        if self.keyword_weight + self.temporal_weight + self.importance_weight <= 0.0 {
            return Err(MemoryError::InvalidInput(
                "keyword, temporal and importance weights must not all be zero".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.min_relevance) {
            return Err(MemoryError::InvalidInput(format!(
                "minimum relevance must lie in [0, 1], got {}",
                self.min_relevance
            )));
        }
        Ok(())
    }
}

/// Optional fourth ranking signal.
///
/// Returning `None` leaves the semantic weight out of both the weighted sum and the
/// normaliser for that entry, so scoring falls back to the three built-in signals.
pub trait SemanticSignal: Send + Sync {
    /// Similarity in `[0, 1]` between the query and the entry
    fn score(&self, query: &str, entry: &MemoryEntry) -> Option<f32>;
}

/// Cosine similarity between a precomputed query vector and each entry's stored embedding
#[derive(Debug, Clone)]
pub struct StoredEmbeddingSignal {
    query_embedding: Vec<f32>,
}

impl StoredEmbeddingSignal {
    pub fn new(query_embedding: Vec<f32>) -> Self {
        Self { query_embedding }
    }
}

impl SemanticSignal for StoredEmbeddingSignal {
    fn score(&self, _query: &str, entry: &MemoryEntry) -> Option<f32> {
        let embedding = entry.embedding.as_ref()?;
        if embedding.len() != self.query_embedding.len() || embedding.is_empty() {
            return None;
        }

        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;
        for (a, b) in self.query_embedding.iter().zip(embedding) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }
        if norm_a == 0.0 || norm_b == 0.0 {
            return None;
        }

        let cosine = dot / (norm_a.sqrt() * norm_b.sqrt());
        Some(((cosine + 1.0) / 2.0).clamp(0.0, 1.0))
    }
}

/// Pure scoring of candidates; no I/O.
#[derive(Clone)]
pub struct RelevanceScorer {
    config: RetrievalConfig,
    keywords: KeywordExtractor,
    semantic: Option<Arc<dyn SemanticSignal>>,
}

impl RelevanceScorer {
    pub fn new(config: RetrievalConfig) -> Self {
        Self {
            config,
            keywords: KeywordExtractor::default(),
            semantic: None,
        }
    }

    pub fn with_semantic_signal(mut self, signal: Arc<dyn SemanticSignal>) -> Self {
        self.semantic = Some(signal);
        self
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Score, filter and order `candidates` as of `now`; keeps at most `max_results`.
    pub fn rank_at(
        &self,
        query: &str,
        candidates: Vec<MemoryEntry>,
        max_results: usize,
        now: DateTime<Utc>,
    ) -> Vec<(MemoryEntry, f32)> {
        let query_keywords = self.keywords.extract(query);

        let mut scored: Vec<(MemoryEntry, f32)> = candidates
            .into_iter()
            .filter_map(|entry| {
                let score = self.score_at(&entry, query, &query_keywords, now);
                (score >= self.config.min_relevance).then_some((entry, score))
            })
            .collect();

        // Stable: equal scores keep candidate order (newest first, then id)
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(max_results);
        scored
    }

    /// Combined relevance in `[0, 1]`
    pub fn score_at(
        &self,
        entry: &MemoryEntry,
        query: &str,
        query_keywords: &HashSet<String>,
        now: DateTime<Utc>,
    ) -> f32 {
        let mut total = self.config.keyword_weight * self.keyword_score(entry, query, query_keywords)
            + self.config.temporal_weight * temporal_score(entry, now)
            + self.config.importance_weight * importance_score(entry.importance);
        let mut max_weight =
            self.config.keyword_weight + self.config.temporal_weight + self.config.importance_weight;

        if let Some(similarity) = self.semantic.as_ref().and_then(|s| s.score(query, entry)) {
            total += self.config.semantic_weight * similarity.clamp(0.0, 1.0);
            max_weight += self.config.semantic_weight;
        }

        if max_weight > 0.0 {
            total / max_weight
        } else {
            0.0
        }
    }

    /// Jaccard overlap of keyword sets plus a bonus for a literal phrase match
    pub fn keyword_score(&self, entry: &MemoryEntry, query: &str, query_keywords: &HashSet<String>) -> f32 {
        if query_keywords.is_empty() {
            return NEUTRAL_KEYWORD_SCORE;
        }

        let mut entry_text = format!("{} {}", entry.content, entry.entry_type);
        if !entry.metadata.is_empty() {
            let values: Vec<String> = entry
                .metadata
                .values()
                .map(|v| match v {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect();
            entry_text.push(' ');
            entry_text.push_str(&values.join(" "));
        }

        let entry_keywords = self.keywords.extract(&entry_text);
        if entry_keywords.is_empty() {
            return 0.0;
        }

        let intersection = query_keywords.intersection(&entry_keywords).count();
        let union = query_keywords.union(&entry_keywords).count();
        let jaccard = if union == 0 { 0.0 } else { intersection as f32 / union as f32 };

        let phrase_bonus = if entry.content.to_lowercase().contains(&query.to_lowercase()) {
            PHRASE_BONUS
        } else {
            0.0
        };

        (jaccard + phrase_bonus).min(1.0)
    }
}

impl std::fmt::Debug for RelevanceScorer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelevanceScorer")
            .field("config", &self.config)
            .field("semantic", &self.semantic.is_some())
            .finish()
    }
}

/// Step function of entry age
pub fn temporal_score(entry: &MemoryEntry, now: DateTime<Utc>) -> f32 {
    let hours = (now - entry.timestamp).num_milliseconds() as f64 / 3_600_000.0;
    match hours {
        h if h < 1.0 => 1.0,
        h if h < 24.0 => 0.8,
        h if h < 168.0 => 0.5,
        h if h < 720.0 => 0.3,
        _ => 0.1,
    }
}

pub fn importance_score(importance: Importance) -> f32 {
    match importance {
        Importance::Critical => 1.0,
        Importance::High => 0.8,
        Importance::Medium => 0.5,
        Importance::Low => 0.2,
    }
}

/// Fetches candidates through a store and ranks them.
pub struct Retriever<E: IoExecutor = Blocking> {
    store: MemoryStore<E>,
    scorer: Arc<RelevanceScorer>,
}

impl<E: IoExecutor> Retriever<E> {
    pub fn new(store: MemoryStore<E>, config: RetrievalConfig) -> Self {
        Self {
            store,
            scorer: Arc::new(RelevanceScorer::new(config)),
        }
    }

    pub fn with_semantic_signal(mut self, signal: Arc<dyn SemanticSignal>) -> Self {
        let scorer = (*self.scorer).clone().with_semantic_signal(signal);
        self.scorer = Arc::new(scorer);
        self
    }

    pub fn config(&self) -> &RetrievalConfig {
        self.scorer.config()
    }

    pub fn store(&self) -> &MemoryStore<E> {
        &self.store
    }

    /// Rank stored entries matching `filter` against `query`.
    ///
    /// Candidate fetch and scoring run as one storage operation, so a fetch failure
    /// fails the whole call and both conventions rank identically.
    pub fn retrieve(
        &self,
        query: impl Into<String>,
        filter: EntryFilter,
        max_results: usize,
    ) -> E::Output<RetrievalResult> {
        let query = query.into();
        let scorer = Arc::clone(&self.scorer);
        self.store.run(move |store| {
            let started = Instant::now();
            let now = Utc::now();
            let candidates = store.list_at(
                &filter,
                max_results.saturating_mul(OVERSAMPLING_FACTOR),
                0,
                now,
            )?;
            let candidate_count = candidates.len();
            let ranked = scorer.rank_at(&query, candidates, max_results, now);

            let tokens_used = ranked
                .iter()
                .map(|(entry, _)| TextUtils::count_words(&entry.content))
                .sum();
            let (entries, relevance_scores): (Vec<_>, Vec<_>) = ranked.into_iter().unzip();
            let retrieval_time_ms = started.elapsed().as_secs_f64() * 1000.0;

            debug!(
                "Retrieved {} of {} candidates for '{}' in {:.2}ms",
                entries.len(),
                candidate_count,
                query,
                retrieval_time_ms
            );

            Ok(RetrievalResult {
                entries,
                query,
                relevance_scores,
                retrieval_time_ms,
                tokens_used,
            })
        })
    }
}

impl<E: IoExecutor> Clone for Retriever<E> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            scorer: Arc::clone(&self.scorer),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_db::{EntryType, MemoryDatabase, Suspending};
    use chrono::Duration;

    fn retriever() -> Retriever {
        let store = MemoryStore::blocking(Arc::new(MemoryDatabase::new_in_memory().unwrap()));
        Retriever::new(store, RetrievalConfig::default())
    }

    #[test]
    fn default_config_is_valid() {
        assert!(RetrievalConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_bad_weights() {
        let negative = RetrievalConfig {
            temporal_weight: -0.1,
            ..Default::default()
        };
        assert!(negative.validate().is_err());

        let all_zero = RetrievalConfig {
            keyword_weight: 0.0,
            temporal_weight: 0.0,
            importance_weight: 0.0,
            ..Default::default()
        };
        assert!(all_zero.validate().is_err());

        let floor = RetrievalConfig {
            min_relevance: 1.5,
            ..Default::default()
        };
        assert!(floor.validate().is_err());
    }

    #[test]
    fn temporal_steps() {
        let now = Utc::now();
        let aged = |hours: i64| MemoryEntry::new("s", EntryType::Summary, "x").with_timestamp(now - Duration::hours(hours));
        assert_eq!(temporal_score(&aged(0), now), 1.0);
        assert_eq!(temporal_score(&aged(5), now), 0.8);
        assert_eq!(temporal_score(&aged(48), now), 0.5);
        assert_eq!(temporal_score(&aged(300), now), 0.3);
        assert_eq!(temporal_score(&aged(1000), now), 0.1);
    }

    #[test]
    fn keyword_score_neutral_without_keywords() {
        let scorer = RelevanceScorer::new(RetrievalConfig::default());
        let entry = MemoryEntry::new("s", EntryType::Decision, "anything");
        let empty = scorer.keywords.extract("is it the");
        assert!(empty.is_empty());
        assert_eq!(scorer.keyword_score(&entry, "is it the", &empty), 0.5);
    }

    #[test]
    fn keyword_score_reads_metadata_and_phrase() {
        let scorer = RelevanceScorer::new(RetrievalConfig::default());
        let entry = MemoryEntry::new("s", EntryType::FileOp, "edited the parser").with_metadata("path", "src/lexer.rs");
        let query = "lexer";
        let keywords = scorer.keywords.extract(query);
        // entry keywords: edited, parser, file_op, src, lexer
        let score = scorer.keyword_score(&entry, query, &keywords);
        assert!((score - 0.2).abs() < 1e-6);

        let phrase = "edited the parser";
        let keywords = scorer.keywords.extract(phrase);
        let score = scorer.keyword_score(&entry, phrase, &keywords);
        assert!((score - (2.0 / 5.0 + 0.3)).abs() < 1e-6);
    }

    #[test]
    fn semantic_signal_joins_the_normaliser() {
        let now = Utc::now();
        let entry = MemoryEntry::new("s", EntryType::Decision, "x")
            .with_importance(Importance::Critical)
            .with_embedding(vec![1.0, 0.0]);
        let plain = RelevanceScorer::new(RetrievalConfig::default());
        let keywords = HashSet::new();
        // (0.1*0.5 + 0.3*1.0 + 0.2*1.0) / 0.6
        let base = plain.score_at(&entry, "", &keywords, now);
        assert!((base - 0.55 / 0.6).abs() < 1e-6);

        let opposite = plain
            .clone()
            .with_semantic_signal(Arc::new(StoredEmbeddingSignal::new(vec![-1.0, 0.0])));
        let score = opposite.score_at(&entry, "", &keywords, now);
        assert!((score - 0.55 / 1.0).abs() < 1e-6);

        let unscored = MemoryEntry::new("s", EntryType::Decision, "x").with_importance(Importance::Critical);
        assert!((opposite.score_at(&unscored, "", &keywords, now) - base).abs() < 1e-6);
    }

    #[test]
    fn ranks_authentication_decision_above_unrelated_note() {
        let retriever = retriever();
        let a = MemoryEntry::new("s", EntryType::Decision, "Implementing user authentication with JWT tokens")
            .with_importance(Importance::High);
        let b = MemoryEntry::new("s", EntryType::AssistantMessage, "API endpoint documentation")
            .with_importance(Importance::Low);
        retriever.store().add(b.clone()).unwrap();
        retriever.store().add(a.clone()).unwrap();

        let result = retriever.retrieve("authentication JWT", EntryFilter::default(), 10).unwrap();
        let pos_a = result.entries.iter().position(|e| e.id == a.id).unwrap();
        let pos_b = result.entries.iter().position(|e| e.id == b.id).unwrap();
        assert!(pos_a < pos_b);
        assert!(result.relevance_scores[pos_a] > result.relevance_scores[pos_b]);
        assert_eq!(result.tokens_used, 6 + 3);
    }

    #[test]
    fn scores_respect_floor_and_order() {
        let store = MemoryStore::blocking(Arc::new(MemoryDatabase::new_in_memory().unwrap()));
        let config = RetrievalConfig {
            min_relevance: 0.5,
            ..Default::default()
        };
        let retriever = Retriever::new(store, config);
        let now = Utc::now();
        for (i, importance) in Importance::ALL.iter().enumerate() {
            retriever
                .store()
                .add(
                    MemoryEntry::new("s", EntryType::Summary, format!("note {}", i))
                        .with_importance(*importance)
                        .with_timestamp(now - Duration::days(40)),
                )
                .unwrap();
        }
        retriever
            .store()
            .add(MemoryEntry::new("s", EntryType::Summary, "earlier today").with_timestamp(now - Duration::hours(5)))
            .unwrap();
        retriever.store().add(MemoryEntry::new("s", EntryType::Summary, "fresh")).unwrap();

        let result = retriever.retrieve("", EntryFilter::default(), 10).unwrap();
        assert_eq!(result.entries.len(), 2);
        assert_eq!(result.entries.len(), result.relevance_scores.len());
        assert!(result.relevance_scores.iter().all(|s| *s >= 0.5));
        assert!(result.relevance_scores.windows(2).all(|w| w[0] >= w[1]));
        assert_eq!(result.entries[0].content, "fresh");
    }

    #[test]
    fn equal_scores_keep_candidate_order() {
        let scorer = RelevanceScorer::new(RetrievalConfig::default());
        let now = Utc::now();
        let at = now - Duration::minutes(10);
        let candidates: Vec<_> = ["c", "a", "b"]
            .iter()
            .map(|id| {
                let mut entry = MemoryEntry::new("s", EntryType::Summary, "same").with_timestamp(at);
                entry.id = id.to_string();
                entry
            })
            .collect();
        let ranked = scorer.rank_at("", candidates, 3, now);
        let ids: Vec<_> = ranked.iter().map(|(e, _)| e.id.as_str()).collect();
        assert_eq!(ids, ["c", "a", "b"]);
    }

    #[test]
    fn attached_signal_reorders_results() {
        let now = Utc::now();
        let store = MemoryStore::blocking(Arc::new(MemoryDatabase::new_in_memory().unwrap()));
        let aligned = MemoryEntry::new("s", EntryType::Summary, "first")
            .with_embedding(vec![1.0, 0.0])
            .with_timestamp(now - Duration::minutes(2));
        let opposite = MemoryEntry::new("s", EntryType::Summary, "second")
            .with_embedding(vec![-1.0, 0.0])
            .with_timestamp(now - Duration::minutes(1));
        store.add(aligned.clone()).unwrap();
        store.add(opposite.clone()).unwrap();

        // newest first when nothing tells them apart
        let plain = Retriever::new(store.clone(), RetrievalConfig::default());
        let result = plain.retrieve("", EntryFilter::default(), 2).unwrap();
        assert_eq!(result.entries[0].id, opposite.id);
        assert_eq!(result.relevance_scores[0], result.relevance_scores[1]);

        let semantic = plain.with_semantic_signal(Arc::new(StoredEmbeddingSignal::new(vec![1.0, 0.0])));
        assert_eq!(semantic.config(), &RetrievalConfig::default());
        let result = semantic.retrieve("", EntryFilter::default(), 2).unwrap();
        assert_eq!(result.entries[0].id, aligned.id);
        assert_eq!(result.entries[1].id, opposite.id);
        assert!(result.relevance_scores[0] > result.relevance_scores[1]);
    }

    #[test]
    fn zero_results_requested() {
        let retriever = retriever();
        retriever.store().add(MemoryEntry::new("s", EntryType::Summary, "x")).unwrap();
        assert!(retriever.retrieve("x", EntryFilter::default(), 0).unwrap().is_empty());
    }

    #[tokio::test]
    async fn suspending_retrieval_matches_blocking() {
        let blocking = retriever();
        let suspending = Retriever::new(blocking.store().convention(Suspending), RetrievalConfig::default());
        for (content, importance) in [
            ("database migration plan", Importance::High),
            ("lunch order", Importance::Low),
            ("migration rollback steps", Importance::Critical),
        ] {
            blocking
                .store()
                .add(MemoryEntry::new("s", EntryType::Decision, content).with_importance(importance))
                .unwrap();
        }

        let a = blocking.retrieve("migration", EntryFilter::default(), 5).unwrap();
        let b = suspending.retrieve("migration", EntryFilter::default(), 5).await.unwrap();
        let ids = |r: &RetrievalResult| r.entries.iter().map(|e| e.id.clone()).collect::<Vec<_>>();
        assert_eq!(ids(&a), ids(&b));
        assert_eq!(a.relevance_scores, b.relevance_scores);
        assert_eq!(a.tokens_used, b.tokens_used);
    }
}
