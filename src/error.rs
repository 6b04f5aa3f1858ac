//! Error types for Mnemon

use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;

/// Result type alias for Mnemon operations
pub type Result<T> = std::result::Result<T, MnemonError>;

/// Which store side of a dual write succeeded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreSide {
    Vector,
    Graph,
}

impl std::fmt::Display for StoreSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreSide::Vector => write!(f, "vector"),
            StoreSide::Graph => write!(f, "graph"),
        }
    }
}

/// Main error type for Mnemon
#[derive(Error, Debug)]
pub enum MnemonError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Partial write: {side} store updated, the other failed for point {point_id}: {message}")]
    PartialWrite {
        /// The store that was successfully updated
        side: StoreSide,
        /// The id written to the surviving store
        point_id: String,
        message: String,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rusqlite::Error> for MnemonError {
    fn from(e: rusqlite::Error) -> Self {
        MnemonError::Database(e.to_string())
    }
}

/// Serializable error envelope for transport layers
#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelope {
    pub kind: &'static str,
    pub message: String,
    pub operation: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, String>,
}

impl MnemonError {
    /// Stable kind identifier used on the API boundary
    pub fn kind(&self) -> &'static str {
        match self {
            MnemonError::Config(_) => "config",
            MnemonError::Schema(_) => "schema",
            MnemonError::Validation(_) => "validation",
            MnemonError::ResourceExhausted(_) => "resource_exhausted",
            MnemonError::Database(_) => "database",
            MnemonError::PartialWrite { .. } => "partial_write",
            MnemonError::NotFound(_) => "not_found",
            MnemonError::InvalidInput(_) => "invalid_input",
            MnemonError::Serialization(_) => "invalid_input",
            MnemonError::Io(_) => "database",
        }
    }

    /// Check if the error is safe to retry verbatim
    pub fn is_retryable(&self) -> bool {
        matches!(self, MnemonError::Database(_))
    }

    /// Wrap into the envelope reported on the API boundary
    pub fn envelope(
        &self,
        operation: &str,
        context: impl IntoIterator<Item = (String, String)>,
    ) -> ErrorEnvelope {
        ErrorEnvelope {
            kind: self.kind(),
            message: self.to_string(),
            operation: operation.to_string(),
            context: context.into_iter().collect(),
        }
    }
}
