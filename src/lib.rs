//! Mnemon - schema-driven memory engine for AI agents
//!
//! One API over a vector index and a property graph: a declarative schema
//! drives validation and embedding anchors, a single-writer indexer keeps
//! both stores consistent, and a GraphRAG pipeline retrieves with
//! automatic mode selection and neighbor expansion.

pub mod config;
pub mod embedding;
pub mod error;
pub mod hrid;
pub mod indexer;
pub mod schema;
pub mod search;
pub mod service;
pub mod store;
pub mod system;
pub mod types;

pub use config::Settings;
pub use error::{MnemonError, Result};
pub use service::MemoryService;
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
