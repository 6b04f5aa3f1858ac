//! Single-writer dual-store indexer
//!
//! Persists a memory in the vector store and the graph store under one id.
//! The vector upsert goes first (orphans are cheap to delete); a graph
//! failure after a successful vector write surfaces as a partial write
//! naming the surviving side so the caller can compensate. There is no
//! automatic rollback.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::debug;

use crate::embedding::Embedder;
use crate::error::{MnemonError, Result, StoreSide};
use crate::hrid::HridAllocator;
use crate::schema::SchemaRegistry;
use crate::store::{GraphStore, Row, VectorStore};
use crate::types::Memory;

pub struct Indexer {
    registry: Arc<SchemaRegistry>,
    embedder: Arc<dyn Embedder>,
    vector_store: Arc<dyn VectorStore>,
    graph_store: Arc<dyn GraphStore>,
    allocator: Arc<HridAllocator>,
    collection: String,
    dim: usize,
}

impl Indexer {
    pub fn new(
        registry: Arc<SchemaRegistry>,
        embedder: Arc<dyn Embedder>,
        vector_store: Arc<dyn VectorStore>,
        graph_store: Arc<dyn GraphStore>,
        allocator: Arc<HridAllocator>,
        collection: String,
        dim: usize,
    ) -> Self {
        Self {
            registry,
            embedder,
            vector_store,
            graph_store,
            allocator,
            collection,
            dim,
        }
    }

    /// Persist `memory` in both stores. Returns the memory id.
    ///
    /// Indexing is a pure function of `(memory, anchor_text, embedder)`:
    /// identical inputs produce identical vectors and node properties.
    pub fn index(&self, memory: &mut Memory, index_text_override: Option<&str>) -> Result<String> {
        let anchor_text = match index_text_override {
            Some(text) => {
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    return Err(MnemonError::InvalidInput(
                        "index text override is empty".into(),
                    ));
                }
                trimmed.to_string()
            }
            None => self.registry.anchor_text(memory)?,
        };

        if memory.hrid.is_none() {
            memory.hrid = Some(
                self.allocator
                    .next(&memory.memory_type, &memory.user_id)?,
            );
        }
        let hrid = memory.hrid.clone().expect("hrid attached");

        let vector = self.embedder.embed(&anchor_text)?;
        if vector.len() != self.dim {
            return Err(MnemonError::InvalidInput(format!(
                "embedder returned {} dimensions, expected {}",
                vector.len(),
                self.dim
            )));
        }

        let vector_payload = self.vector_payload(memory, &hrid)?;
        self.vector_store
            .upsert(&self.collection, &memory.id, &vector, &vector_payload)?;

        let node_props = self.node_properties(memory, &hrid)?;
        if let Err(e) = self.graph_store.add_node(&memory.memory_type, &node_props) {
            return Err(MnemonError::PartialWrite {
                side: StoreSide::Vector,
                point_id: memory.id.clone(),
                message: e.to_string(),
            });
        }

        self.allocator.assign(&hrid, &memory.id, &memory.user_id)?;
        memory.vector = Some(vector);
        debug!(
            id = memory.id.as_str(),
            hrid = hrid.as_str(),
            memory_type = memory.memory_type.as_str(),
            "indexed memory"
        );
        Ok(memory.id.clone())
    }

    /// The payload stored on the vector point: core fields plus the full
    /// entity payload
    fn vector_payload(&self, memory: &Memory, hrid: &str) -> Result<Value> {
        Ok(json!({
            "id": memory.id,
            "hrid": hrid,
            "user_id": memory.user_id,
            "memory_type": memory.memory_type,
            "tags": memory.tags,
            "created_at": memory.created_at.to_rfc3339(),
            "updated_at": memory.updated_at.to_rfc3339(),
            "is_valid": memory.is_valid,
            "payload": memory.payload,
        }))
    }

    /// Graph node properties: core fields flattened plus the scalar payload
    /// projection. The vector itself never lands on the node.
    pub fn node_properties(&self, memory: &Memory, hrid: &str) -> Result<Row> {
        let entity = self.registry.entity(&memory.memory_type)?;
        let mut props = Row::new();
        props.insert("id".to_string(), json!(memory.id));
        props.insert("hrid".to_string(), json!(hrid));
        props.insert("user_id".to_string(), json!(memory.user_id));
        props.insert("memory_type".to_string(), json!(memory.memory_type));
        props.insert("tags".to_string(), json!(serde_json::to_string(&memory.tags)?));
        props.insert("created_at".to_string(), json!(memory.created_at.to_rfc3339()));
        props.insert("updated_at".to_string(), json!(memory.updated_at.to_rfc3339()));

        for (name, spec) in entity.primitive_fields() {
            if let Some(value) = memory.payload.get(name) {
                let projected = match (value, spec.max_length) {
                    (Value::String(s), Some(max)) if s.chars().count() > max => {
                        Value::String(s.chars().take(max).collect())
                    }
                    _ => value.clone(),
                };
                props.insert(name.clone(), projected);
            }
        }
        Ok(props)
    }

    /// Scalar payload patch for `update_node` (no core fields)
    pub fn node_patch(&self, memory: &Memory) -> Result<Row> {
        let entity = self.registry.entity(&memory.memory_type)?;
        let mut props = Row::new();
        props.insert("updated_at".to_string(), json!(memory.updated_at.to_rfc3339()));
        props.insert("tags".to_string(), json!(serde_json::to_string(&memory.tags)?));
        for (name, _) in entity.primitive_fields() {
            props.insert(
                name.clone(),
                memory.payload.get(name).cloned().unwrap_or(Value::Null),
            );
        }
        Ok(props)
    }
}
