use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

use crate::context_engine::RetrievalConfig;
use crate::memory_db::{RetryPolicy, StorageConfig};

/// Which text-transform collaborator to use, with the settings that backend needs
#[derive(Debug, Clone, PartialEq)]
pub enum TransformBackend {
    None,
    OpenAiCompatible {
        url: String,
        model: String,
        api_key: Option<String>,
        timeout: Duration,
    },
}

impl TransformBackend {
    /// Upper bound applied around each transform call
    pub fn timeout(&self) -> Duration {
        match self {
            TransformBackend::None => Duration::from_secs(60),
            TransformBackend::OpenAiCompatible { timeout, .. } => *timeout,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub storage: StorageConfig,
    pub session_id: String,
    pub retrieval: RetrievalConfig,
    pub transform: TransformBackend,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            warn!("Failed to load .env file: {}. Using system environment variables.", e);
        } else {
            info!("Loaded environment variables from .env file");
        }

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key/value source; unset keys take their defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let storage_dir = lookup("MEMORY_STORAGE_DIR").unwrap_or_else(|| ".session-memory".into());
        let session_id = lookup("MEMORY_SESSION_ID")
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()[..8].to_string());

        let retry = RetryPolicy {
            max_attempts: parse_or(&lookup, "MEMORY_RETRY_ATTEMPTS", 5)?,
            initial_delay: Duration::from_millis(parse_or(&lookup, "MEMORY_RETRY_INITIAL_MS", 50)?),
            max_delay: Duration::from_millis(parse_or(&lookup, "MEMORY_RETRY_MAX_MS", 2000)?),
            multiplier: parse_or(&lookup, "MEMORY_RETRY_MULTIPLIER", 2.0)?,
        };

        let storage = StorageConfig {
            storage_dir: PathBuf::from(storage_dir),
            pool_size: parse_or(&lookup, "MEMORY_POOL_SIZE", 4)?,
            busy_timeout: Duration::from_millis(parse_or(&lookup, "MEMORY_BUSY_TIMEOUT_MS", 5000)?),
            retry,
        };

        let retrieval = RetrievalConfig {
            keyword_weight: parse_or(&lookup, "MEMORY_KEYWORD_WEIGHT", 0.1)?,
            temporal_weight: parse_or(&lookup, "MEMORY_TEMPORAL_WEIGHT", 0.3)?,
            importance_weight: parse_or(&lookup, "MEMORY_IMPORTANCE_WEIGHT", 0.2)?,
            semantic_weight: parse_or(&lookup, "MEMORY_SEMANTIC_WEIGHT", 0.4)?,
            min_relevance: parse_or(&lookup, "MEMORY_MIN_RELEVANCE", 0.1)?,
            max_tokens: parse_or(&lookup, "MEMORY_MAX_TOKENS", 4000)?,
        };

        let backend = lookup("MEMORY_TRANSFORM_BACKEND").unwrap_or_else(|| "none".into());
        let transform = match backend.trim().to_lowercase().as_str() {
            "" | "none" => TransformBackend::None,
            "openai_compatible" => TransformBackend::OpenAiCompatible {
                url: lookup("MEMORY_TRANSFORM_URL").context(
                    "MEMORY_TRANSFORM_URL must be set when MEMORY_TRANSFORM_BACKEND=openai_compatible",
                )?,
                model: lookup("MEMORY_TRANSFORM_MODEL").unwrap_or_else(|| "local-llm".into()),
                api_key: lookup("MEMORY_TRANSFORM_API_KEY").filter(|k| !k.is_empty()),
                timeout: Duration::from_secs(parse_or(&lookup, "MEMORY_TRANSFORM_TIMEOUT_SECS", 60)?),
            },
            other => {
                return Err(anyhow::anyhow!(
                    "Unknown MEMORY_TRANSFORM_BACKEND '{}' (expected 'none' or 'openai_compatible')",
                    other
                ))
            }
        };

        let config = Self {
            storage,
            session_id,
            retrieval,
            transform,
        };
        config.validate()?;

        info!(
            "Memory configuration: storage at {}, session {}, pool size {}",
            config.storage.storage_dir.display(),
            config.session_id,
            config.storage.pool_size
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.storage.pool_size == 0 {
            return Err(anyhow::anyhow!("MEMORY_POOL_SIZE must be at least 1"));
        }
        if self.storage.retry.max_attempts == 0 {
            return Err(anyhow::anyhow!("MEMORY_RETRY_ATTEMPTS must be at least 1"));
        }
        if !(self.storage.retry.multiplier >= 1.0) {
            return Err(anyhow::anyhow!("MEMORY_RETRY_MULTIPLIER must be at least 1.0"));
        }
        self.retrieval
            .validate()
            .context("Invalid retrieval configuration")?;
        if let TransformBackend::OpenAiCompatible { url, .. } = &self.transform {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(anyhow::anyhow!("MEMORY_TRANSFORM_URL must be an http(s) URL, got '{}'", url));
            }
        }
        Ok(())
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid value '{}' for {}: {}", raw, key, e)),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.storage, StorageConfig::default());
        assert_eq!(config.retrieval, RetrievalConfig::default());
        assert_eq!(config.transform, TransformBackend::None);
        assert_eq!(config.session_id.len(), 8);
    }

    #[test]
    fn reads_overrides() {
        let config = config_from(&[
            ("MEMORY_STORAGE_DIR", "/tmp/mem"),
            ("MEMORY_SESSION_ID", "abc123"),
            ("MEMORY_POOL_SIZE", "2"),
            ("MEMORY_RETRY_ATTEMPTS", "9"),
            ("MEMORY_MIN_RELEVANCE", "0.25"),
            ("MEMORY_TRANSFORM_BACKEND", "openai_compatible"),
            ("MEMORY_TRANSFORM_URL", "http://127.0.0.1:8081"),
            ("MEMORY_TRANSFORM_TIMEOUT_SECS", "5"),
        ])
        .unwrap();
        assert_eq!(config.storage.storage_dir, PathBuf::from("/tmp/mem"));
        assert_eq!(config.session_id, "abc123");
        assert_eq!(config.storage.pool_size, 2);
        assert_eq!(config.storage.retry.max_attempts, 9);
        assert_eq!(config.retrieval.min_relevance, 0.25);
        assert_eq!(
            config.transform,
            TransformBackend::OpenAiCompatible {
                url: "http://127.0.0.1:8081".into(),
                model: "local-llm".into(),
                api_key: None,
                timeout: Duration::from_secs(5),
            }
        );
        assert_eq!(config.transform.timeout(), Duration::from_secs(5));
    }

    #[test]
    fn openai_backend_requires_url() {
        let err = config_from(&[("MEMORY_TRANSFORM_BACKEND", "openai_compatible")]).unwrap_err();
        assert!(err.to_string().contains("MEMORY_TRANSFORM_URL"));
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(config_from(&[("MEMORY_POOL_SIZE", "0")]).is_err());
        assert!(config_from(&[("MEMORY_POOL_SIZE", "many")]).is_err());
        assert!(config_from(&[("MEMORY_KEYWORD_WEIGHT", "-1")]).is_err());
        assert!(config_from(&[("MEMORY_RETRY_MULTIPLIER", "0.5")]).is_err());
        assert!(config_from(&[("MEMORY_TRANSFORM_BACKEND", "carrier-pigeon")]).is_err());
    }
}
