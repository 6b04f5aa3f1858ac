//! Unified retrieval pipeline
//!
//! One entry point over three paths: vector similarity, structural graph
//! selection, and their hybrid. The mode is chosen from the request shape
//! unless forced. Graph failures during search degrade to the vector path
//! silently; results carry their provenance and sort in a stable total
//! order so identical inputs always return identical sequences.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::embedding::Embedder;
use crate::error::{MnemonError, Result};
use crate::hrid;
use crate::schema::SchemaRegistry;
use crate::store::vector::matches_filter;
use crate::store::{Direction, GraphStore, NodeSelect, Row, ScoredPoint, VectorStore};
use crate::types::{
    DetailLevel, FieldFilter, FilterOp, ListOptions, Memory, Payload, ResultSource, SearchMode,
    SearchOptions, SearchResult,
};

/// Score inherited by a neighbor from its seed
pub const NEIGHBOR_SCORE_DECAY: f32 = 0.9;
/// Result cap when the caller does not provide one
pub const DEFAULT_LIMIT: usize = 10;
/// Seeds expanded (and neighbors fetched per seed) when unset
pub const DEFAULT_NEIGHBOR_CAP: usize = 5;

pub struct RetrievalPipeline {
    registry: Arc<SchemaRegistry>,
    embedder: Arc<dyn Embedder>,
    vector_store: Arc<dyn VectorStore>,
    graph_store: Arc<dyn GraphStore>,
    collection: String,
    score_threshold: f32,
}

impl RetrievalPipeline {
    pub fn new(
        registry: Arc<SchemaRegistry>,
        embedder: Arc<dyn Embedder>,
        vector_store: Arc<dyn VectorStore>,
        graph_store: Arc<dyn GraphStore>,
        collection: String,
        score_threshold: f32,
    ) -> Self {
        Self {
            registry,
            embedder,
            vector_store,
            graph_store,
            collection,
            score_threshold,
        }
    }

    /// Run a search for `user_id`
    pub fn search(&self, user_id: &str, options: &SearchOptions) -> Result<Vec<SearchResult>> {
        let mode = self.select_mode(options)?;
        let limit = options.limit.unwrap_or(DEFAULT_LIMIT);
        let cutoff = options
            .modified_within_days
            .map(|days| (Utc::now() - Duration::days(days)).to_rfc3339());

        let mut results = match mode {
            SearchMode::Vector => self.vector_path(user_id, options, limit, cutoff.as_deref())?,
            SearchMode::Graph => {
                match self.graph_path(user_id, options, limit, cutoff.as_deref()) {
                    Ok(results) => results,
                    Err(MnemonError::Database(message)) if options.query.is_some() => {
                        warn!(error = message.as_str(), "graph path failed, vector fallback");
                        self.vector_path(user_id, options, limit, cutoff.as_deref())?
                    }
                    Err(e) => return Err(e),
                }
            }
            SearchMode::Hybrid => {
                let vector_results =
                    self.vector_path(user_id, options, limit, cutoff.as_deref())?;
                match self.graph_path(user_id, options, limit, cutoff.as_deref()) {
                    Ok(graph_results) => merge_hybrid(vector_results, graph_results),
                    Err(MnemonError::Database(message)) => {
                        warn!(error = message.as_str(), "graph path failed, vector fallback");
                        vector_results
                    }
                    Err(e) => return Err(e),
                }
            }
        };

        sort_stable(&mut results);
        results.truncate(limit);

        let neighbor_cap = options.neighbor_cap.unwrap_or(DEFAULT_NEIGHBOR_CAP);
        if neighbor_cap > 0 && !results.is_empty() {
            self.expand_neighbors(user_id, &mut results, options, neighbor_cap);
        }

        for result in &mut results {
            self.project(&mut result.memory, options.include_details, &options.projection);
        }
        sort_stable(&mut results);
        Ok(results)
    }

    /// List memories through the graph path; optional neighbor expansion
    pub fn list(&self, user_id: &str, options: &ListOptions) -> Result<Vec<SearchResult>> {
        if let Some(memory_type) = &options.memory_type {
            self.registry.entity(memory_type)?;
        }
        let limit = options.limit.unwrap_or(DEFAULT_LIMIT);
        let cutoff = options
            .modified_within_days
            .map(|days| (Utc::now() - Duration::days(days)).to_rfc3339());

        let select = NodeSelect {
            user_id: user_id.to_string(),
            node_type: options.memory_type.as_ref().map(|t| t.to_lowercase()),
            updated_after: cutoff,
            limit,
            offset: options.offset.unwrap_or(0),
        };
        let rows = self.graph_store.select_nodes(&select)?;

        let mut results = Vec::new();
        for row in rows {
            let memory = self.memory_from_row(&row)?;
            if let Some(filters) = &options.filters {
                let snapshot = memory_filter_view(&memory);
                if !filters.iter().all(|f| matches_filter(&snapshot, f)) {
                    continue;
                }
            }
            results.push(SearchResult {
                memory,
                score: 1.0,
                distance: None,
                source: ResultSource::Graph,
                metadata: BTreeMap::new(),
            });
        }

        if options.expand_neighbors && !results.is_empty() {
            let neighbor_options = SearchOptions::default();
            self.expand_neighbors(user_id, &mut results, &neighbor_options, DEFAULT_NEIGHBOR_CAP);
        }
        for result in &mut results {
            self.project(&mut result.memory, options.include_details, &options.projection);
        }
        Ok(results)
    }

    fn select_mode(&self, options: &SearchOptions) -> Result<SearchMode> {
        if let Some(mode) = options.mode {
            if matches!(mode, SearchMode::Vector | SearchMode::Hybrid) && options.query.is_none() {
                return Err(MnemonError::Validation(format!(
                    "{:?} mode requires a query",
                    mode
                )));
            }
            return Ok(mode);
        }
        if options.query.as_deref().map_or(false, |q| !q.trim().is_empty()) {
            return Ok(SearchMode::Vector);
        }
        if options.memory_type.is_some() || options.modified_within_days.is_some() {
            return Ok(SearchMode::Graph);
        }
        Err(MnemonError::Validation(
            "nothing to search: provide a query, a type, or a recency window".into(),
        ))
    }

    fn vector_path(
        &self,
        user_id: &str,
        options: &SearchOptions,
        limit: usize,
        cutoff: Option<&str>,
    ) -> Result<Vec<SearchResult>> {
        let query = options
            .query
            .as_deref()
            .ok_or_else(|| MnemonError::Validation("vector search requires a query".into()))?;

        let mut filters = Vec::new();
        if let Some(memory_type) = &options.memory_type {
            let entity = self.registry.entity(memory_type)?;
            filters.push(FieldFilter {
                field: "memory_type".to_string(),
                op: FilterOp::Eq(json!(entity.name)),
            });
        }
        if let Some(cutoff) = cutoff {
            filters.push(FieldFilter {
                field: "updated_at".to_string(),
                op: FilterOp::Range {
                    gt: None,
                    gte: Some(json!(cutoff)),
                    lt: None,
                    lte: None,
                },
            });
        }
        if let Some(caller) = &options.filters {
            filters.extend(caller.iter().cloned());
        }

        let query_vector = self.embedder.embed(query)?;
        let hits =
            self.vector_store
                .search(&self.collection, &query_vector, limit, user_id, &filters)?;

        let mut results = Vec::new();
        for hit in hits {
            if hit.score < self.score_threshold {
                continue;
            }
            results.push(SearchResult {
                memory: self.memory_from_point(&hit)?,
                score: hit.score,
                distance: Some(hit.distance),
                source: ResultSource::Vector,
                metadata: BTreeMap::new(),
            });
        }
        Ok(results)
    }

    fn graph_path(
        &self,
        user_id: &str,
        options: &SearchOptions,
        limit: usize,
        cutoff: Option<&str>,
    ) -> Result<Vec<SearchResult>> {
        if let Some(memory_type) = &options.memory_type {
            self.registry.entity(memory_type)?;
        }
        let select = NodeSelect {
            user_id: user_id.to_string(),
            node_type: options.memory_type.as_ref().map(|t| t.to_lowercase()),
            updated_after: cutoff.map(String::from),
            limit,
            offset: 0,
        };
        let rows = self.graph_store.select_nodes(&select)?;

        let mut memories = Vec::new();
        for row in rows {
            let memory = self.memory_from_row(&row)?;
            if let Some(filters) = &options.filters {
                let snapshot = memory_filter_view(&memory);
                if !filters.iter().all(|f| matches_filter(&snapshot, f)) {
                    continue;
                }
            }
            memories.push(memory);
        }

        // With a query present, rerank candidates by vector similarity
        // restricted to their ids; otherwise every match scores 1.0.
        let scores: BTreeMap<String, f32> = match options.query.as_deref() {
            Some(query) if !memories.is_empty() => {
                let query_vector = self.embedder.embed(query)?;
                let id_filter = vec![FieldFilter {
                    field: "id".to_string(),
                    op: FilterOp::AnyOf(
                        memories.iter().map(|m| json!(m.id)).collect(),
                    ),
                }];
                self.vector_store
                    .search(
                        &self.collection,
                        &query_vector,
                        memories.len(),
                        user_id,
                        &id_filter,
                    )?
                    .into_iter()
                    .map(|hit| (hit.id, hit.score))
                    .collect()
            }
            _ => BTreeMap::new(),
        };
        let reranked = options.query.is_some();

        Ok(memories
            .into_iter()
            .map(|memory| {
                let score = if reranked {
                    scores.get(&memory.id).copied().unwrap_or(0.0)
                } else {
                    1.0
                };
                SearchResult {
                    memory,
                    score,
                    distance: None,
                    source: ResultSource::Graph,
                    metadata: BTreeMap::new(),
                }
            })
            .collect())
    }

    /// Append immediate graph neighbors of the top results. Failures here
    /// never fail the search; an unreachable graph just means no expansion.
    fn expand_neighbors(
        &self,
        user_id: &str,
        results: &mut Vec<SearchResult>,
        options: &SearchOptions,
        cap: usize,
    ) {
        let predicates = options
            .relation_names
            .clone()
            .unwrap_or_else(|| self.registry.relation_names());
        if predicates.is_empty() {
            return;
        }

        let seeds: Vec<(String, String, f32)> = results
            .iter()
            .take(cap)
            .map(|r| {
                (
                    r.memory.memory_type.clone(),
                    r.memory.id.clone(),
                    r.score,
                )
            })
            .collect();

        for (seed_type, seed_id, seed_score) in seeds {
            // Directed predicates traverse outward only; undirected ones
            // accept either endpoint.
            let mut directed_out = Vec::new();
            let mut undirected = Vec::new();
            for pair in self.registry.edge_pairs(Some(&predicates)) {
                if pair.directed && pair.source_type == seed_type {
                    directed_out.push(pair.predicate.clone());
                } else if !pair.directed
                    && (pair.source_type == seed_type || pair.target_type == seed_type)
                {
                    undirected.push(pair.predicate.clone());
                }
            }
            directed_out.sort();
            directed_out.dedup();
            undirected.sort();
            undirected.dedup();

            for (preds, direction) in [
                (directed_out, Direction::Out),
                (undirected, Direction::Any),
            ] {
                if preds.is_empty() {
                    continue;
                }
                let neighbors = match self.graph_store.neighbors(
                    &seed_type,
                    &seed_id,
                    Some(&preds),
                    direction,
                    cap,
                    None,
                ) {
                    Ok(neighbors) => neighbors,
                    Err(e) => {
                        debug!(error = %e, "neighbor expansion skipped");
                        continue;
                    }
                };
                for neighbor in neighbors {
                    if neighbor
                        .properties
                        .get("user_id")
                        .and_then(Value::as_str)
                        != Some(user_id)
                    {
                        continue;
                    }
                    let memory = match self.memory_from_row(&neighbor.properties) {
                        Ok(memory) => memory,
                        Err(e) => {
                            debug!(error = %e, "skipping malformed neighbor row");
                            continue;
                        }
                    };
                    let inherited = seed_score * NEIGHBOR_SCORE_DECAY;
                    if let Some(existing) =
                        results.iter_mut().find(|r| r.memory.id == memory.id)
                    {
                        existing.score = existing.score.max(inherited);
                        continue;
                    }
                    let mut metadata = BTreeMap::new();
                    metadata.insert(
                        "relation_type".to_string(),
                        json!(neighbor.relation_type),
                    );
                    metadata.insert("seed_id".to_string(), json!(seed_id.clone()));
                    results.push(SearchResult {
                        memory,
                        score: inherited,
                        distance: None,
                        source: ResultSource::Neighbor(neighbor.relation_type),
                        metadata,
                    });
                }
            }
        }
    }

    /// Build a full memory from a vector point payload
    fn memory_from_point(&self, point: &ScoredPoint) -> Result<Memory> {
        memory_from_payload(&point.payload)
    }

    /// Build a memory from a graph row, enriching the payload from the
    /// vector point when it is reachable. Graph rows only carry the scalar
    /// projection; the vector payload is authoritative.
    fn memory_from_row(&self, row: &Row) -> Result<Memory> {
        let id = row
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| MnemonError::Database("graph row lacks id".into()))?
            .to_string();

        if let Ok(Some(point)) = self.vector_store.get(&self.collection, &id) {
            return memory_from_payload(&point.payload);
        }

        let memory_type = row
            .get("memory_type")
            .and_then(Value::as_str)
            .ok_or_else(|| MnemonError::Database("graph row lacks memory_type".into()))?
            .to_string();
        let entity = self.registry.entity(&memory_type)?;

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

        Ok(Memory {
            id,
            hrid: row.get("hrid").and_then(Value::as_str).map(String::from),
            user_id: row
                .get("user_id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            memory_type,
            payload,
            tags,
            vector: None,
            created_at: parse_timestamp(row.get("created_at"))?,
            updated_at: parse_timestamp(row.get("updated_at"))?,
            is_valid: true,
            supersedes: None,
            superseded_by: None,
        })
    }

    /// Reduce a result payload to the requested detail level
    fn project(
        &self,
        memory: &mut Memory,
        level: DetailLevel,
        projection: &BTreeMap<String, Vec<String>>,
    ) {
        let anchor = match self.registry.anchor_field(&memory.memory_type) {
            Ok(anchor) => anchor.to_string(),
            Err(_) => return,
        };
        let mut keep: Vec<String> = vec![anchor];
        if level == DetailLevel::Own {
            if let Some(allowed) = projection.get(&memory.memory_type) {
                keep.extend(allowed.iter().cloned());
            } else if projection.is_empty() {
                // No allow-list configured: full payload stays
                return;
            }
        }
        memory.payload.retain(|name, _| keep.contains(name));
        memory.vector = None;
    }
}

/// Merge hybrid results by id, keeping the higher score. A record found by
/// both paths reports `hybrid` provenance.
fn merge_hybrid(
    vector_results: Vec<SearchResult>,
    graph_results: Vec<SearchResult>,
) -> Vec<SearchResult> {
    let mut merged: Vec<SearchResult> = vector_results;
    for graph_result in graph_results {
        match merged
            .iter_mut()
            .find(|r| r.memory.id == graph_result.memory.id)
        {
            Some(existing) => {
                existing.score = existing.score.max(graph_result.score);
                existing.source = ResultSource::Hybrid;
            }
            None => merged.push(graph_result),
        }
    }
    merged
}

/// Stable total order: score descending, HRID index ascending, id ascending
fn sort_stable(results: &mut [SearchResult]) {
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| hrid_sort_key(a).cmp(&hrid_sort_key(b)))
            .then_with(|| a.memory.id.cmp(&b.memory.id))
    });
}

fn hrid_sort_key(result: &SearchResult) -> u64 {
    result
        .memory
        .hrid
        .as_deref()
        .and_then(|h| hrid::to_index(h).ok())
        .unwrap_or(u64::MAX)
}

/// Flatten a memory into the payload shape the filter matcher expects
fn memory_filter_view(memory: &Memory) -> Value {
    json!({
        "id": memory.id,
        "hrid": memory.hrid,
        "user_id": memory.user_id,
        "memory_type": memory.memory_type,
        "tags": memory.tags,
        "created_at": memory.created_at.to_rfc3339(),
        "updated_at": memory.updated_at.to_rfc3339(),
        "payload": memory.payload,
    })
}

/// Rebuild a memory from a vector point payload
pub(crate) fn memory_from_payload(payload: &Value) -> Result<Memory> {
    let text_field = |name: &str| -> Result<String> {
        payload
            .get(name)
            .and_then(Value::as_str)
            .map(String::from)
            .ok_or_else(|| MnemonError::Database(format!("point payload lacks {}", name)))
    };

    let entity_payload: Payload = match payload.get("payload") {
        Some(Value::Object(map)) => map
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        _ => Payload::new(),
    };

    let tags = payload
        .get("tags")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();

    Ok(Memory {
        id: text_field("id")?,
        hrid: payload.get("hrid").and_then(Value::as_str).map(String::from),
        user_id: text_field("user_id")?,
        memory_type: text_field("memory_type")?,
        payload: entity_payload,
        tags,
        vector: None,
        created_at: parse_timestamp(payload.get("created_at"))?,
        updated_at: parse_timestamp(payload.get("updated_at"))?,
        is_valid: payload
            .get("is_valid")
            .and_then(Value::as_bool)
            .unwrap_or(true),
        supersedes: None,
        superseded_by: None,
    })
}

fn parse_timestamp(value: Option<&Value>) -> Result<DateTime<Utc>> {
    let raw = value
        .and_then(Value::as_str)
        .ok_or_else(|| MnemonError::Database("missing timestamp".into()))?;
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| MnemonError::Database(format!("bad timestamp {:?}: {}", raw, e)))
}
