//! System info and health surface
//!
//! Snapshot of the active schema, both stores, and the embedding contract.
//! Transport layers expose this verbatim.

use std::collections::BTreeMap;
use std::time::Instant;

use serde::Serialize;

use crate::embedding::Embedder;
use crate::schema::SchemaRegistry;
use crate::store::{GraphStore, VectorStore};

/// Health of one store
#[derive(Debug, Clone, Serialize)]
pub struct StoreStatus {
    pub healthy: bool,
    pub latency_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StoreStatus {
    fn probe(check: impl FnOnce() -> crate::error::Result<()>) -> Self {
        let start = Instant::now();
        match check() {
            Ok(()) => Self {
                healthy: true,
                latency_ms: start.elapsed().as_secs_f64() * 1000.0,
                error: None,
            },
            Err(e) => Self {
                healthy: false,
                latency_ms: start.elapsed().as_secs_f64() * 1000.0,
                error: Some(e.to_string()),
            },
        }
    }
}

/// Vector store snapshot
#[derive(Debug, Clone, Serialize)]
pub struct VectorStoreInfo {
    pub status: StoreStatus,
    pub collection: String,
    pub dimension: usize,
    /// -1 when the store is unreachable
    pub points: i64,
}

/// Graph store snapshot
#[derive(Debug, Clone, Serialize)]
pub struct GraphStoreInfo {
    pub status: StoreStatus,
    pub nodes: BTreeMap<String, i64>,
    pub edges: BTreeMap<String, i64>,
}

/// One entity as surfaced to clients
#[derive(Debug, Clone, Serialize)]
pub struct EntitySummary {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub anchor: String,
    pub field_count: usize,
}

/// Active schema summary
#[derive(Debug, Clone, Serialize)]
pub struct SchemaSummary {
    pub version: String,
    pub entities: Vec<EntitySummary>,
    pub predicates: Vec<String>,
}

/// Embedding contract
#[derive(Debug, Clone, Serialize)]
pub struct EmbedderInfo {
    pub model: String,
    pub dimensions: usize,
}

/// Full system snapshot
#[derive(Debug, Clone, Serialize)]
pub struct SystemInfo {
    pub version: &'static str,
    pub schema: SchemaSummary,
    pub vector_store: VectorStoreInfo,
    pub graph_store: GraphStoreInfo,
    pub embedder: EmbedderInfo,
}

/// Collect the snapshot from the live components
pub fn collect(
    registry: &SchemaRegistry,
    embedder: &dyn Embedder,
    vector_store: &dyn VectorStore,
    graph_store: &dyn GraphStore,
    collection: &str,
    dimension: usize,
) -> SystemInfo {
    let schema = SchemaSummary {
        version: registry.version().to_string(),
        entities: registry
            .entities()
            .map(|(name, spec)| EntitySummary {
                name: name.clone(),
                description: spec.description.clone(),
                anchor: spec.anchor.clone(),
                field_count: spec.fields.len(),
            })
            .collect(),
        predicates: registry.relation_names(),
    };

    let vector_status = StoreStatus::probe(|| vector_store.health());
    let points = if vector_status.healthy {
        vector_store.count(collection).unwrap_or(-1)
    } else {
        -1
    };

    let graph_status = StoreStatus::probe(|| graph_store.health());
    let (nodes, edges) = if graph_status.healthy {
        graph_store.counts().unwrap_or_default()
    } else {
        Default::default()
    };

    SystemInfo {
        version: crate::VERSION,
        schema,
        vector_store: VectorStoreInfo {
            status: vector_status,
            collection: collection.to_string(),
            dimension,
            points,
        },
        graph_store: GraphStoreInfo {
            status: graph_status,
            nodes,
            edges,
        },
        embedder: EmbedderInfo {
            model: embedder.name().to_string(),
            dimensions: embedder.dim(),
        },
    }
}
