//! Memory service façade
//!
//! Composes the translator, allocator, indexer, stores and retrieval
//! pipeline into the public operation set. Every operation is scoped to a
//! `user_id`; every mutation serializes through one writer lock per
//! process. Errors are logged structured (operation, duration, kind) and
//! re-raised.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::config::Settings;
use crate::embedding::{create_embedder, Embedder};
use crate::error::{MnemonError, Result, StoreSide};
use crate::hrid::{self, HridAllocator};
use crate::indexer::Indexer;
use crate::schema::SchemaRegistry;
use crate::search::{memory_from_payload, RetrievalPipeline};
use crate::store::{GraphStore, SqliteGraphStore, SqliteVectorStore, VectorStore};
use crate::system::{self, SystemInfo};
use crate::types::{
    ListOptions, Memory, Payload, RelationshipInput, SearchOptions, SearchResult,
};

pub struct MemoryService {
    settings: Settings,
    registry: Arc<SchemaRegistry>,
    embedder: Arc<dyn Embedder>,
    vector_store: Arc<dyn VectorStore>,
    graph_store: Arc<dyn GraphStore>,
    allocator: Arc<HridAllocator>,
    indexer: Indexer,
    pipeline: RetrievalPipeline,
    /// Single-writer discipline: all mutations hold this lock
    writer: Mutex<()>,
}

impl MemoryService {
    /// Build a service from injected collaborators
    pub fn new(
        settings: Settings,
        registry: Arc<SchemaRegistry>,
        embedder: Arc<dyn Embedder>,
        vector_store: Arc<dyn VectorStore>,
        graph_store: Arc<dyn GraphStore>,
    ) -> Result<Self> {
        settings.validate()?;
        if embedder.dim() != settings.vector_dimension {
            return Err(MnemonError::Config(format!(
                "embedder produces {} dimensions, settings expect {}",
                embedder.dim(),
                settings.vector_dimension
            )));
        }
        vector_store.ensure_collection(&settings.collection_name, settings.vector_dimension)?;

        let allocator = Arc::new(HridAllocator::new());
        let indexer = Indexer::new(
            registry.clone(),
            embedder.clone(),
            vector_store.clone(),
            graph_store.clone(),
            allocator.clone(),
            settings.collection_name.clone(),
            settings.vector_dimension,
        );
        let pipeline = RetrievalPipeline::new(
            registry.clone(),
            embedder.clone(),
            vector_store.clone(),
            graph_store.clone(),
            settings.collection_name.clone(),
            settings.score_threshold,
        );

        Ok(Self {
            settings,
            registry,
            embedder,
            vector_store,
            graph_store,
            allocator,
            indexer,
            pipeline,
            writer: Mutex::new(()),
        })
    }

    /// Open a service from settings: load the registry, build the embedder,
    /// open both SQLite-backed stores
    pub fn open(settings: Settings) -> Result<Self> {
        let registry = Arc::new(SchemaRegistry::load(&settings.schema_path)?);
        let embedder = create_embedder(&settings)?;
        let vector_store: Arc<dyn VectorStore> =
            Arc::new(SqliteVectorStore::open(&settings.vector_storage_path)?);
        let graph_store: Arc<dyn GraphStore> =
            Arc::new(SqliteGraphStore::open(&settings.graph_storage_path)?);
        Self::new(settings, registry, embedder, vector_store, graph_store)
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    // ------------------------------------------------------------------
    // Memory lifecycle
    // ------------------------------------------------------------------

    /// Validate, allocate an HRID and persist a new memory in both stores
    pub fn add(
        &self,
        user_id: &str,
        memory_type: &str,
        payload: Payload,
        tags: Option<Vec<String>>,
    ) -> Result<Memory> {
        self.traced("add_memory", user_id, || {
            let _writer = self.writer.lock();
            let entity_name = self.registry.entity(memory_type)?.name.clone();
            let cleaned = self.registry.validate_payload(&entity_name, &payload)?;

            let mut tags = tags.unwrap_or_default();
            tags.sort();
            tags.dedup();

            self.recover_counters(user_id, &entity_name)?;
            let mut memory = Memory::new(user_id, &entity_name, cleaned, tags);
            self.indexer.index(&mut memory, None)?;
            info!(
                hrid = memory.hrid.as_deref().unwrap_or(""),
                memory_type = entity_name.as_str(),
                "memory added"
            );
            Ok(memory)
        })
    }

    /// Fetch a memory by HRID
    pub fn get(&self, user_id: &str, hrid: &str) -> Result<Memory> {
        self.traced("get_memory", user_id, || {
            let (memory_type, id) = self.resolve(user_id, hrid)?;
            self.read_memory(user_id, &memory_type, &id, hrid)
        })
    }

    /// Patch-merge into an existing memory. Identity is preserved: same
    /// id, same HRID, `created_at` untouched, `updated_at` advanced. The
    /// anchor is re-embedded only when its text changed.
    pub fn update(
        &self,
        user_id: &str,
        hrid: &str,
        patch: Payload,
        tags: Option<Vec<String>>,
    ) -> Result<Memory> {
        self.traced("update_memory", user_id, || {
            let _writer = self.writer.lock();
            let (memory_type, id) = self.resolve(user_id, hrid)?;
            let mut memory = self.read_memory(user_id, &memory_type, &id, hrid)?;
            let old_anchor = self.registry.anchor_text(&memory)?;

            let mut merged = memory.payload.clone();
            for (name, value) in patch {
                if value.is_null() {
                    merged.remove(&name);
                } else {
                    merged.insert(name, value);
                }
            }
            memory.payload = self.registry.validate_payload(&memory_type, &merged)?;
            if let Some(mut new_tags) = tags {
                new_tags.sort();
                new_tags.dedup();
                memory.tags = new_tags;
            }
            memory.updated_at = Utc::now();

            let new_anchor = self.registry.anchor_text(&memory)?;
            let vector = if new_anchor == old_anchor {
                match self.vector_store.get(&self.settings.collection_name, &id)? {
                    Some(point) => point.vector,
                    None => self.embedder.embed(&new_anchor)?,
                }
            } else {
                self.embedder.embed(&new_anchor)?
            };
            if vector.len() != self.settings.vector_dimension {
                return Err(MnemonError::InvalidInput(format!(
                    "embedder returned {} dimensions, expected {}",
                    vector.len(),
                    self.settings.vector_dimension
                )));
            }

            let point_payload = serde_json::json!({
                "id": memory.id,
                "hrid": hrid,
                "user_id": memory.user_id,
                "memory_type": memory.memory_type,
                "tags": memory.tags,
                "created_at": memory.created_at.to_rfc3339(),
                "updated_at": memory.updated_at.to_rfc3339(),
                "is_valid": memory.is_valid,
                "payload": memory.payload,
            });
            self.vector_store.upsert(
                &self.settings.collection_name,
                &id,
                &vector,
                &point_payload,
            )?;

            let patch_props = self.indexer.node_patch(&memory)?;
            if let Err(e) = self.graph_store.update_node(&memory_type, &id, &patch_props) {
                return Err(MnemonError::PartialWrite {
                    side: StoreSide::Vector,
                    point_id: id.clone(),
                    message: e.to_string(),
                });
            }
            memory.vector = Some(vector);
            Ok(memory)
        })
    }

    /// Remove a memory from both stores and free its HRID. Deleting an
    /// unknown HRID is a no-op.
    pub fn delete(&self, user_id: &str, hrid: &str) -> Result<()> {
        self.traced("delete_memory", user_id, || {
            let _writer = self.writer.lock();
            let (memory_type, id) = match self.resolve(user_id, hrid) {
                Ok(found) => found,
                Err(MnemonError::NotFound(_)) => return Ok(()),
                Err(e) => return Err(e),
            };
            self.graph_store.delete_node(&memory_type, &id)?;
            if let Err(e) = self
                .vector_store
                .delete(&self.settings.collection_name, &[id.clone()])
            {
                return Err(MnemonError::PartialWrite {
                    side: StoreSide::Graph,
                    point_id: id,
                    message: e.to_string(),
                });
            }
            self.allocator.forget(hrid, user_id);
            info!(hrid, "memory deleted");
            Ok(())
        })
    }

    /// List memories through the graph path
    pub fn list(&self, user_id: &str, options: &ListOptions) -> Result<Vec<SearchResult>> {
        self.traced("list_memories", user_id, || self.pipeline.list(user_id, options))
    }

    /// Unified search (vector / graph / hybrid with neighbor expansion)
    pub fn search(&self, user_id: &str, options: &SearchOptions) -> Result<Vec<SearchResult>> {
        self.traced("search_memories", user_id, || {
            self.pipeline.search(user_id, options)
        })
    }

    // ------------------------------------------------------------------
    // Relationships
    // ------------------------------------------------------------------

    /// Add a typed edge between two memories owned by `user_id`.
    /// Duplicate edges are a no-op.
    pub fn add_relationship(&self, user_id: &str, input: &RelationshipInput) -> Result<()> {
        self.traced("add_relationship", user_id, || {
            let _writer = self.writer.lock();
            let (from_type, to_type, predicate) = self.relationship_ends(input)?;
            let (_, from_id) = self.resolve(user_id, &input.from_hrid)?;
            let (_, to_id) = self.resolve(user_id, &input.to_hrid)?;

            self.graph_store
                .ensure_edge_table(&from_type, &predicate, &to_type)?;
            self.graph_store
                .add_edge(&from_type, &to_type, &predicate, &from_id, &to_id, None)?;
            info!(
                from = input.from_hrid.as_str(),
                to = input.to_hrid.as_str(),
                predicate = predicate.as_str(),
                "relationship added"
            );
            Ok(())
        })
    }

    /// Remove a typed edge; absence is a no-op
    pub fn delete_relationship(&self, user_id: &str, input: &RelationshipInput) -> Result<()> {
        self.traced("delete_relationship", user_id, || {
            let _writer = self.writer.lock();
            let (from_type, to_type, predicate) = self.relationship_ends(input)?;
            let (_, from_id) = self.resolve(user_id, &input.from_hrid)?;
            let (_, to_id) = self.resolve(user_id, &input.to_hrid)?;
            self.graph_store
                .delete_edge(&from_type, &to_type, &predicate, &from_id, &to_id)?;
            Ok(())
        })
    }

    // ------------------------------------------------------------------
    // System
    // ------------------------------------------------------------------

    /// Schema, store health and counts
    pub fn system_info(&self) -> SystemInfo {
        system::collect(
            &self.registry,
            self.embedder.as_ref(),
            self.vector_store.as_ref(),
            self.graph_store.as_ref(),
            &self.settings.collection_name,
            self.settings.vector_dimension,
        )
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Resolve an HRID to `(memory_type, id)` within the user scope.
    /// Falls back to scanning the graph store, which also reseeds the
    /// allocator after a restart.
    fn resolve(&self, user_id: &str, hrid_str: &str) -> Result<(String, String)> {
        let memory_type = hrid::type_of(hrid_str)?;
        self.registry.entity(&memory_type)?;
        if let Some(id) = self.allocator.resolve(hrid_str, user_id) {
            return Ok((memory_type, id));
        }
        for (known_hrid, id) in self.graph_store.hrid_map(&memory_type, user_id)? {
            self.allocator.assign(&known_hrid, &id, user_id)?;
        }
        match self.allocator.resolve(hrid_str, user_id) {
            Some(id) => Ok((memory_type, id)),
            None => Err(MnemonError::NotFound(format!(
                "{} for user {:?}",
                hrid_str, user_id
            ))),
        }
    }

    /// Read a full memory: the vector payload is authoritative; the graph
    /// node projection serves when the point is missing or the vector
    /// store errors.
    fn read_memory(
        &self,
        user_id: &str,
        memory_type: &str,
        id: &str,
        hrid_str: &str,
    ) -> Result<Memory> {
        match self.vector_store.get(&self.settings.collection_name, id) {
            Ok(Some(point)) => {
                let memory = memory_from_payload(&point.payload)?;
                if memory.user_id != user_id {
                    return Err(MnemonError::NotFound(format!(
                        "{} for user {:?}",
                        hrid_str, user_id
                    )));
                }
                return Ok(memory);
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "vector read failed, using graph projection"),
        }

        let row = self
            .graph_store
            .get_node(memory_type, id)?
            .ok_or_else(|| {
                MnemonError::NotFound(format!("{} for user {:?}", hrid_str, user_id))
            })?;
        if row.get("user_id").and_then(Value::as_str) != Some(user_id) {
            return Err(MnemonError::NotFound(format!(
                "{} for user {:?}",
                hrid_str, user_id
            )));
        }

        let entity = self.registry.entity(memory_type)?;
        let mut payload = Payload::new();
        for (name, _) in entity.primitive_fields() {
            if let Some(value) = row.get(name) {
                if !value.is_null() {
                    payload.insert(name.clone(), value.clone());
                }
            }
        }
        let tags = row
            .get("tags")
            .and_then(Value::as_str)
            .and_then(|raw| serde_json::from_str::<Vec<String>>(raw).ok())
            .unwrap_or_default();
        let parse_ts = |name: &str| -> Result<chrono::DateTime<Utc>> {
            let raw = row.get(name).and_then(Value::as_str).ok_or_else(|| {
                MnemonError::Database(format!("node {:?} lacks {}", id, name))
            })?;
            chrono::DateTime::parse_from_rfc3339(raw)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| MnemonError::Database(format!("bad timestamp {:?}: {}", raw, e)))
        };

        Ok(Memory {
            id: id.to_string(),
            hrid: Some(hrid_str.to_string()),
            user_id: user_id.to_string(),
            memory_type: memory_type.to_string(),
            payload,
            tags,
            vector: None,
            created_at: parse_ts("created_at")?,
            updated_at: parse_ts("updated_at")?,
            is_valid: true,
            supersedes: None,
            superseded_by: None,
        })
    }

    /// Reseed the HRID counter for `(user, type)` from persisted nodes on
    /// first use
    fn recover_counters(&self, user_id: &str, memory_type: &str) -> Result<()> {
        if self.allocator.has_counter(memory_type, user_id) {
            return Ok(());
        }
        for (known_hrid, id) in self.graph_store.hrid_map(memory_type, user_id)? {
            self.allocator.assign(&known_hrid, &id, user_id)?;
        }
        self.allocator.touch(memory_type, user_id);
        Ok(())
    }

    /// Normalize relationship endpoints: infer types from HRID prefixes,
    /// cross-check explicit hints, verify the catalog allows the triple
    fn relationship_ends(&self, input: &RelationshipInput) -> Result<(String, String, String)> {
        let from_type = self.end_type(&input.from_hrid, input.from_type.as_deref())?;
        let to_type = self.end_type(&input.to_hrid, input.to_type.as_deref())?;
        let predicate = input.predicate.to_uppercase();

        if !self
            .registry
            .relation_allowed(&from_type, &predicate, &to_type)
        {
            return Err(MnemonError::Schema(format!(
                "relation ({}, {}, {}) is not declared; known predicates: {}",
                from_type,
                predicate,
                to_type,
                self.registry.relation_names().join(", ")
            )));
        }
        Ok((from_type, to_type, predicate))
    }

    fn end_type(&self, hrid_str: &str, hint: Option<&str>) -> Result<String> {
        let inferred = hrid::type_of(hrid_str)?;
        if let Some(hint) = hint {
            if !hint.eq_ignore_ascii_case(&inferred) {
                return Err(MnemonError::Validation(format!(
                    "type hint {:?} disagrees with HRID {:?}",
                    hint, hrid_str
                )));
            }
        }
        self.registry.entity(&inferred)?;
        Ok(inferred)
    }

    /// Run an operation with structured logging of outcome and duration
    fn traced<T>(
        &self,
        operation: &'static str,
        user_id: &str,
        f: impl FnOnce() -> Result<T>,
    ) -> Result<T> {
        let start = Instant::now();
        match f() {
            Ok(value) => {
                info!(
                    operation,
                    user_id,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "ok"
                );
                Ok(value)
            }
            Err(e) => {
                error!(
                    operation,
                    user_id,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    kind = e.kind(),
                    error = %e,
                    "operation failed"
                );
                Err(e)
            }
        }
    }
}
