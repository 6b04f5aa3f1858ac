//! Environment-driven configuration
//!
//! All settings live under the `MNEMON_` prefix. Thresholds are validated
//! at load time so a bad deployment fails before touching either store.

use serde::{Deserialize, Serialize};

use crate::error::{MnemonError, Result};

/// Environment variable prefix
pub const ENV_PREFIX: &str = "MNEMON_";

/// Runtime settings for the memory engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Path to the YAML schema registry
    pub schema_path: String,
    /// Backing storage root for the vector store (":memory:" for tests)
    pub vector_storage_path: String,
    /// Backing storage root for the graph store (":memory:" for tests)
    pub graph_storage_path: String,
    /// Embedding backend: "hashed" or "openai"
    pub embedder_model: String,
    /// Embedding dimension; every indexed vector must match
    pub vector_dimension: usize,
    /// Logical vector collection name
    pub collection_name: String,
    /// Minimum cosine similarity considered related (0..=1)
    pub similarity_threshold: f32,
    /// Results below this score are dropped (0..=1)
    pub score_threshold: f32,
    /// Near-duplicate similarity (0..=1)
    pub high_similarity_threshold: f32,
    /// Bulk operation hint
    pub batch_processing_size: usize,
    /// Timeout applied to outbound embedder calls
    pub request_timeout_secs: u64,
    /// Verbose diagnostics
    pub debug_mode: bool,
    /// Log level hint for the embedding process ("info", "debug", ...)
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            schema_path: "schema.yaml".to_string(),
            vector_storage_path: ":memory:".to_string(),
            graph_storage_path: ":memory:".to_string(),
            embedder_model: "hashed".to_string(),
            vector_dimension: 384,
            collection_name: "memories".to_string(),
            similarity_threshold: 0.3,
            score_threshold: 0.0,
            high_similarity_threshold: 0.92,
            batch_processing_size: 100,
            request_timeout_secs: 30,
            debug_mode: false,
            log_level: "info".to_string(),
        }
    }
}

impl Settings {
    /// Load settings from the process environment, falling back to defaults
    pub fn from_env() -> Result<Self> {
        let defaults = Settings::default();
        let settings = Settings {
            schema_path: env_string("SCHEMA_PATH").unwrap_or(defaults.schema_path),
            vector_storage_path: env_string("VECTOR_STORAGE_PATH")
                .unwrap_or(defaults.vector_storage_path),
            graph_storage_path: env_string("GRAPH_STORAGE_PATH")
                .unwrap_or(defaults.graph_storage_path),
            embedder_model: env_string("EMBEDDER_MODEL").unwrap_or(defaults.embedder_model),
            vector_dimension: env_parse("VECTOR_DIMENSION")?.unwrap_or(defaults.vector_dimension),
            collection_name: env_string("COLLECTION_NAME").unwrap_or(defaults.collection_name),
            similarity_threshold: env_parse("SIMILARITY_THRESHOLD")?
                .unwrap_or(defaults.similarity_threshold),
            score_threshold: env_parse("SCORE_THRESHOLD")?.unwrap_or(defaults.score_threshold),
            high_similarity_threshold: env_parse("HIGH_SIMILARITY_THRESHOLD")?
                .unwrap_or(defaults.high_similarity_threshold),
            batch_processing_size: env_parse("BATCH_PROCESSING_SIZE")?
                .unwrap_or(defaults.batch_processing_size),
            request_timeout_secs: env_parse("REQUEST_TIMEOUT_SECS")?
                .unwrap_or(defaults.request_timeout_secs),
            debug_mode: env_parse("DEBUG_MODE")?.unwrap_or(defaults.debug_mode),
            log_level: env_string("LOG_LEVEL").unwrap_or(defaults.log_level),
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Check invariants the rest of the engine relies on
    pub fn validate(&self) -> Result<()> {
        if self.schema_path.trim().is_empty() {
            return Err(MnemonError::Config("schema_path must not be empty".into()));
        }
        if self.vector_dimension == 0 {
            return Err(MnemonError::Config(
                "vector_dimension must be positive".into(),
            ));
        }
        if self.collection_name.trim().is_empty() {
            return Err(MnemonError::Config(
                "collection_name must not be empty".into(),
            ));
        }
        for (name, value) in [
            ("similarity_threshold", self.similarity_threshold),
            ("score_threshold", self.score_threshold),
            ("high_similarity_threshold", self.high_similarity_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(MnemonError::Config(format!(
                    "{} must be within 0..=1, got {}",
                    name, value
                )));
            }
        }
        if self.batch_processing_size == 0 {
            return Err(MnemonError::Config(
                "batch_processing_size must be positive".into(),
            ));
        }
        Ok(())
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(format!("{}{}", ENV_PREFIX, key))
        .ok()
        .filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match env_string(key) {
        Some(raw) => raw.parse::<T>().map(Some).map_err(|e| {
            MnemonError::Config(format!("invalid {}{}={}: {}", ENV_PREFIX, key, raw, e))
        }),
        None => Ok(None),
    }
}
