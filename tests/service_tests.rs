//! End-to-end tests over the service façade
//!
//! Exercises the full path: schema validation, HRID allocation, dual-store
//! indexing, retrieval with neighbor expansion, and the documented
//! degradation when the graph store is unreachable.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use pretty_assertions::assert_eq;
use serde_json::{json, Value};

use mnemon::embedding::{Embedder, HashedEmbedder};
use mnemon::error::MnemonError;
use mnemon::schema::SchemaRegistry;
use mnemon::service::MemoryService;
use mnemon::store::{
    Direction, GraphStore, NeighborRow, NodeSelect, Row, SqliteGraphStore, SqliteVectorStore,
    VectorStore,
};
use mnemon::types::{
    ListOptions, Payload, RelationshipInput, ResultSource, SearchMode, SearchOptions,
};
use mnemon::Settings;

const REGISTRY: &str = r#"
version: v1
entities:
  - name: note
    anchor: statement
    fields:
      statement: {type: string, required: true}
  - name: document
    anchor: title
    fields:
      title: {type: string, required: true}
      url: {type: string}
  - name: task
    anchor: statement
    fields:
      statement: {type: string, required: true}
      status:
        type: enum
        choices: [backlog, todo, in_progress, in_review, done, cancelled]
        default: backlog
relations:
  - name: annotation
    directed: true
    predicates: [ANNOTATES]
    source: note
    target: [document, task]
  - name: blocking
    directed: true
    predicates: [BLOCKS]
    source: task
    target: task
"#;

fn settings() -> Settings {
    Settings {
        vector_dimension: 384,
        score_threshold: 0.25,
        ..Default::default()
    }
}

fn service() -> MemoryService {
    service_with_graph(Arc::new(SqliteGraphStore::open_in_memory().unwrap()))
}

fn service_with_graph(graph: Arc<dyn GraphStore>) -> MemoryService {
    let registry = Arc::new(SchemaRegistry::from_yaml(REGISTRY).unwrap());
    let vector: Arc<dyn VectorStore> = Arc::new(SqliteVectorStore::open_in_memory().unwrap());
    MemoryService::new(
        settings(),
        registry,
        Arc::new(HashedEmbedder::new(384)),
        vector,
        graph,
    )
    .unwrap()
}

fn payload(pairs: &[(&str, Value)]) -> Payload {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

// ---------------------------------------------------------------------------
// Scenario: create and vector-search
// ---------------------------------------------------------------------------

#[test]
fn create_then_vector_search() {
    let service = service();
    let memory = service
        .add(
            "u1",
            "note",
            payload(&[("statement", json!("Set up Postgres with Docker"))]),
            None,
        )
        .unwrap();
    assert_eq!(memory.hrid.as_deref(), Some("NOTE_AAA001"));

    let results = service
        .search(
            "u1",
            &SearchOptions {
                query: Some("postgres docker".to_string()),
                limit: Some(5),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(results.len(), 1);
    let hit = &results[0];
    assert_eq!(
        hit.memory.payload["statement"],
        json!("Set up Postgres with Docker")
    );
    assert_eq!(hit.source, ResultSource::Vector);
    assert!(hit.score >= 0.3, "expected score >= 0.3, got {}", hit.score);
}

#[test]
fn search_is_scoped_per_user() {
    let service = service();
    service
        .add("u1", "note", payload(&[("statement", json!("private fact"))]), None)
        .unwrap();
    let results = service
        .search(
            "u2",
            &SearchOptions {
                query: Some("private fact".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
    assert!(results.is_empty());
}

// ---------------------------------------------------------------------------
// Scenario: enum validation
// ---------------------------------------------------------------------------

#[test]
fn enum_violation_lists_legal_choices() {
    let service = service();
    let err = service
        .add(
            "u1",
            "task",
            payload(&[("statement", json!("X")), ("status", json!("completed"))]),
            None,
        )
        .unwrap_err();
    assert_eq!(err.kind(), "validation");
    let msg = err.to_string();
    for choice in ["backlog", "todo", "in_progress", "in_review", "done", "cancelled"] {
        assert!(msg.contains(choice), "missing {:?} in {}", choice, msg);
    }
}

#[test]
fn unknown_type_lists_known_types() {
    let service = service();
    let err = service
        .add("u1", "meeting", payload(&[("statement", json!("x"))]), None)
        .unwrap_err();
    assert_eq!(err.kind(), "validation");
    let msg = err.to_string();
    assert!(msg.contains("note") && msg.contains("document") && msg.contains("task"));
}

#[test]
fn empty_anchor_rejected() {
    let service = service();
    let err = service
        .add("u1", "note", payload(&[("statement", json!("   "))]), None)
        .unwrap_err();
    assert_eq!(err.kind(), "validation");
}

// ---------------------------------------------------------------------------
// Scenario: same predicate, different target types
// ---------------------------------------------------------------------------

#[test]
fn same_predicate_different_targets() {
    let service = service();
    let n1 = service
        .add("u1", "note", payload(&[("statement", json!("annotating"))]), None)
        .unwrap();
    let d1 = service
        .add("u1", "document", payload(&[("title", json!("design doc"))]), None)
        .unwrap();
    let t1 = service
        .add(
            "u1",
            "task",
            payload(&[("statement", json!("implement it"))]),
            None,
        )
        .unwrap();

    for to in [&d1, &t1] {
        service
            .add_relationship(
                "u1",
                &RelationshipInput {
                    from_hrid: n1.hrid.clone().unwrap(),
                    to_hrid: to.hrid.clone().unwrap(),
                    predicate: "ANNOTATES".to_string(),
                    from_type: None,
                    to_type: None,
                },
            )
            .unwrap();
    }

    // Edges landed in two distinct per-pair tables
    let info = service.system_info();
    assert_eq!(info.graph_store.edges["NOTE_ANNOTATES_DOCUMENT"], 1);
    assert_eq!(info.graph_store.edges["NOTE_ANNOTATES_TASK"], 1);

    // Neighbor expansion reaches both targets
    let results = service
        .search(
            "u1",
            &SearchOptions {
                query: Some("annotating".to_string()),
                relation_names: Some(vec!["ANNOTATES".to_string()]),
                ..Default::default()
            },
        )
        .unwrap();
    let neighbor_ids: Vec<&str> = results
        .iter()
        .filter(|r| matches!(r.source, ResultSource::Neighbor(_)))
        .map(|r| r.memory.id.as_str())
        .collect();
    assert!(neighbor_ids.contains(&d1.id.as_str()));
    assert!(neighbor_ids.contains(&t1.id.as_str()));
    for result in &results {
        if let ResultSource::Neighbor(rel) = &result.source {
            assert_eq!(rel, "ANNOTATES");
            assert_eq!(result.metadata["relation_type"], json!("ANNOTATES"));
        }
    }
}

#[test]
fn undeclared_relation_rejected() {
    let service = service();
    let n1 = service
        .add("u1", "note", payload(&[("statement", json!("a"))]), None)
        .unwrap();
    let n2 = service
        .add("u1", "note", payload(&[("statement", json!("b"))]), None)
        .unwrap();
    let err = service
        .add_relationship(
            "u1",
            &RelationshipInput {
                from_hrid: n1.hrid.clone().unwrap(),
                to_hrid: n2.hrid.clone().unwrap(),
                predicate: "BLOCKS".to_string(),
                from_type: None,
                to_type: None,
            },
        )
        .unwrap_err();
    assert_eq!(err.kind(), "schema");
    assert!(err.to_string().contains("ANNOTATES"));
}

#[test]
fn relationship_requires_same_user() {
    let service = service();
    let n1 = service
        .add("u1", "note", payload(&[("statement", json!("mine"))]), None)
        .unwrap();
    let d1 = service
        .add("u2", "document", payload(&[("title", json!("theirs"))]), None)
        .unwrap();
    let err = service
        .add_relationship(
            "u1",
            &RelationshipInput {
                from_hrid: n1.hrid.clone().unwrap(),
                to_hrid: d1.hrid.clone().unwrap(),
                predicate: "ANNOTATES".to_string(),
                from_type: None,
                to_type: None,
            },
        )
        .unwrap_err();
    assert_eq!(err.kind(), "not_found");
}

// ---------------------------------------------------------------------------
// Scenario: update preserves identity and relationships
// ---------------------------------------------------------------------------

#[test]
fn update_preserves_identity_and_relationships() {
    let service = service();
    let t1 = service
        .add(
            "u1",
            "task",
            payload(&[("statement", json!("alpha blocker")), ("status", json!("todo"))]),
            None,
        )
        .unwrap();
    let t2 = service
        .add(
            "u1",
            "task",
            payload(&[("statement", json!("beta follower")), ("status", json!("todo"))]),
            None,
        )
        .unwrap();
    assert_eq!(t1.hrid.as_deref(), Some("TASK_AAA001"));
    assert_eq!(t2.hrid.as_deref(), Some("TASK_AAA002"));

    service
        .add_relationship(
            "u1",
            &RelationshipInput {
                from_hrid: "TASK_AAA001".to_string(),
                to_hrid: "TASK_AAA002".to_string(),
                predicate: "BLOCKS".to_string(),
                from_type: Some("task".to_string()),
                to_type: Some("task".to_string()),
            },
        )
        .unwrap();

    let updated = service
        .update(
            "u1",
            "TASK_AAA001",
            payload(&[("status", json!("in_progress"))]),
            None,
        )
        .unwrap();
    assert_eq!(updated.id, t1.id);
    assert_eq!(updated.hrid.as_deref(), Some("TASK_AAA001"));
    assert_eq!(updated.created_at, t1.created_at);
    assert!(updated.updated_at > t1.updated_at);
    assert_eq!(updated.payload["status"], json!("in_progress"));
    assert_eq!(updated.payload["statement"], json!("alpha blocker"));

    let fetched = service.get("u1", "TASK_AAA001").unwrap();
    assert_eq!(fetched.id, t1.id);
    assert_eq!(fetched.payload["status"], json!("in_progress"));

    // The BLOCKS edge survived the update
    let results = service
        .search(
            "u1",
            &SearchOptions {
                query: Some("alpha blocker".to_string()),
                memory_type: Some("task".to_string()),
                relation_names: Some(vec!["BLOCKS".to_string()]),
                neighbor_cap: Some(1),
                limit: Some(1),
                ..Default::default()
            },
        )
        .unwrap();
    assert!(results
        .iter()
        .any(|r| r.memory.id == t2.id && matches!(r.source, ResultSource::Neighbor(_))));
}

#[test]
fn update_with_same_payload_is_identity_except_updated_at() {
    let service = service();
    let original = service
        .add(
            "u1",
            "task",
            payload(&[("statement", json!("steady")), ("status", json!("todo"))]),
            None,
        )
        .unwrap();
    let updated = service
        .update(
            "u1",
            "TASK_AAA001",
            payload(&[("status", json!("todo"))]),
            None,
        )
        .unwrap();
    assert_eq!(updated.payload, original.payload);
    assert_eq!(updated.tags, original.tags);
    assert_eq!(updated.created_at, original.created_at);
    assert!(updated.updated_at >= original.updated_at);
    // anchor unchanged, vector reused bit for bit
    assert_eq!(updated.vector, original.vector);
}

#[test]
fn update_reembeds_when_anchor_changes() {
    let service = service();
    let original = service
        .add(
            "u1",
            "note",
            payload(&[("statement", json!("first text"))]),
            None,
        )
        .unwrap();
    let updated = service
        .update(
            "u1",
            "NOTE_AAA001",
            payload(&[("statement", json!("completely different words"))]),
            None,
        )
        .unwrap();
    assert_ne!(updated.vector, original.vector);
}

#[test]
fn update_rejects_invalid_patch() {
    let service = service();
    service
        .add(
            "u1",
            "task",
            payload(&[("statement", json!("A")), ("status", json!("todo"))]),
            None,
        )
        .unwrap();
    let err = service
        .update(
            "u1",
            "TASK_AAA001",
            payload(&[("status", json!("paused"))]),
            None,
        )
        .unwrap_err();
    assert_eq!(err.kind(), "validation");
}

// ---------------------------------------------------------------------------
// Round-trips and idempotence
// ---------------------------------------------------------------------------

#[test]
fn add_then_get_roundtrip() {
    let service = service();
    let added = service
        .add(
            "u1",
            "task",
            payload(&[("statement", json!("round trip"))]),
            Some(vec!["b".to_string(), "a".to_string(), "a".to_string()]),
        )
        .unwrap();
    // default injected, tags normalized
    assert_eq!(added.payload["status"], json!("backlog"));
    assert_eq!(added.tags, vec!["a", "b"]);

    let fetched = service.get("u1", added.hrid.as_deref().unwrap()).unwrap();
    assert_eq!(fetched.payload, added.payload);
    assert_eq!(fetched.tags, added.tags);
    assert_eq!(fetched.id, added.id);
}

#[test]
fn duplicate_relationship_is_single_edge() {
    let service = service();
    service
        .add("u1", "task", payload(&[("statement", json!("a"))]), None)
        .unwrap();
    service
        .add("u1", "task", payload(&[("statement", json!("b"))]), None)
        .unwrap();
    let input = RelationshipInput {
        from_hrid: "TASK_AAA001".to_string(),
        to_hrid: "TASK_AAA002".to_string(),
        predicate: "BLOCKS".to_string(),
        from_type: None,
        to_type: None,
    };
    service.add_relationship("u1", &input).unwrap();
    service.add_relationship("u1", &input).unwrap();
    assert_eq!(service.system_info().graph_store.edges["TASK_BLOCKS_TASK"], 1);

    // delete twice: second is a no-op
    service.delete_relationship("u1", &input).unwrap();
    service.delete_relationship("u1", &input).unwrap();
    assert_eq!(service.system_info().graph_store.edges["TASK_BLOCKS_TASK"], 0);
}

#[test]
fn delete_memory_is_idempotent_and_removes_edges() {
    let service = service();
    let t1 = service
        .add("u1", "task", payload(&[("statement", json!("a"))]), None)
        .unwrap();
    service
        .add("u1", "task", payload(&[("statement", json!("b"))]), None)
        .unwrap();
    service
        .add_relationship(
            "u1",
            &RelationshipInput {
                from_hrid: "TASK_AAA001".to_string(),
                to_hrid: "TASK_AAA002".to_string(),
                predicate: "BLOCKS".to_string(),
                from_type: None,
                to_type: None,
            },
        )
        .unwrap();

    service.delete("u1", "TASK_AAA001").unwrap();
    // repeated delete reports success
    service.delete("u1", "TASK_AAA001").unwrap();

    let err = service.get("u1", "TASK_AAA001").unwrap_err();
    assert_eq!(err.kind(), "not_found");

    let info = service.system_info();
    assert_eq!(info.graph_store.nodes["task"], 1);
    assert_eq!(info.graph_store.edges["TASK_BLOCKS_TASK"], 0);
    assert_eq!(info.vector_store.points, 1);
}

#[test]
fn hrids_are_not_reissued_after_delete() {
    let service = service();
    service
        .add("u1", "note", payload(&[("statement", json!("one"))]), None)
        .unwrap();
    service.delete("u1", "NOTE_AAA001").unwrap();
    let next = service
        .add("u1", "note", payload(&[("statement", json!("two"))]), None)
        .unwrap();
    assert_eq!(next.hrid.as_deref(), Some("NOTE_AAA002"));
}

// ---------------------------------------------------------------------------
// Listing
// ---------------------------------------------------------------------------

#[test]
fn list_filters_by_type_and_paginates() {
    let service = service();
    for i in 0..3 {
        service
            .add(
                "u1",
                "task",
                payload(&[("statement", json!(format!("task {}", i)))]),
                None,
            )
            .unwrap();
    }
    service
        .add("u1", "note", payload(&[("statement", json!("a note"))]), None)
        .unwrap();

    let all_tasks = service
        .list(
            "u1",
            &ListOptions {
                memory_type: Some("task".to_string()),
                limit: Some(10),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(all_tasks.len(), 3);
    assert!(all_tasks.iter().all(|r| r.memory.memory_type == "task"));
    assert!(all_tasks.iter().all(|r| r.source == ResultSource::Graph));

    let page = service
        .list(
            "u1",
            &ListOptions {
                memory_type: Some("task".to_string()),
                limit: Some(2),
                offset: Some(2),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(page.len(), 1);

    let recent = service
        .list(
            "u1",
            &ListOptions {
                modified_within_days: Some(1),
                limit: Some(10),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(recent.len(), 4);
}

#[test]
fn list_with_payload_filter() {
    let service = service();
    service
        .add(
            "u1",
            "task",
            payload(&[("statement", json!("a")), ("status", json!("todo"))]),
            None,
        )
        .unwrap();
    service
        .add(
            "u1",
            "task",
            payload(&[("statement", json!("b")), ("status", json!("done"))]),
            None,
        )
        .unwrap();

    let done = service
        .list(
            "u1",
            &ListOptions {
                memory_type: Some("task".to_string()),
                filters: Some(vec![mnemon::types::FieldFilter {
                    field: "status".to_string(),
                    op: mnemon::types::FilterOp::Eq(json!("done")),
                }]),
                limit: Some(10),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(done.len(), 1);
    assert_eq!(done[0].memory.payload["statement"], json!("b"));
}

// ---------------------------------------------------------------------------
// Search modes
// ---------------------------------------------------------------------------

#[test]
fn structural_search_without_query_uses_graph() {
    let service = service();
    service
        .add("u1", "task", payload(&[("statement", json!("alpha"))]), None)
        .unwrap();
    let results = service
        .search(
            "u1",
            &SearchOptions {
                memory_type: Some("task".to_string()),
                neighbor_cap: Some(0),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].source, ResultSource::Graph);
    assert_eq!(results[0].score, 1.0);
}

#[test]
fn search_without_basis_is_rejected() {
    let service = service();
    let err = service.search("u1", &SearchOptions::default()).unwrap_err();
    assert_eq!(err.kind(), "validation");
}

#[test]
fn hybrid_mode_merges_both_paths() {
    let service = service();
    service
        .add(
            "u1",
            "task",
            payload(&[("statement", json!("hybrid search target"))]),
            None,
        )
        .unwrap();
    let results = service
        .search(
            "u1",
            &SearchOptions {
                query: Some("hybrid search target".to_string()),
                memory_type: Some("task".to_string()),
                mode: Some(SearchMode::Hybrid),
                neighbor_cap: Some(0),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].source, ResultSource::Hybrid);
}

// ---------------------------------------------------------------------------
// Graph outage fallback
// ---------------------------------------------------------------------------

/// Graph store wrapper whose failure mode can be toggled mid-test
struct FlakyGraphStore {
    inner: SqliteGraphStore,
    failing: AtomicBool,
}

impl FlakyGraphStore {
    fn check(&self) -> mnemon::Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(MnemonError::Database("graph store unreachable".into()))
        } else {
            Ok(())
        }
    }
}

impl GraphStore for FlakyGraphStore {
    fn ensure_node_table(&self, node_type: &str, properties: &Row) -> mnemon::Result<()> {
        self.check()?;
        self.inner.ensure_node_table(node_type, properties)
    }
    fn add_node(&self, node_type: &str, properties: &Row) -> mnemon::Result<()> {
        self.check()?;
        self.inner.add_node(node_type, properties)
    }
    fn update_node(&self, node_type: &str, id: &str, properties: &Row) -> mnemon::Result<()> {
        self.check()?;
        self.inner.update_node(node_type, id, properties)
    }
    fn get_node(&self, node_type: &str, id: &str) -> mnemon::Result<Option<Row>> {
        self.check()?;
        self.inner.get_node(node_type, id)
    }
    fn ensure_edge_table(
        &self,
        source_type: &str,
        predicate: &str,
        target_type: &str,
    ) -> mnemon::Result<()> {
        self.check()?;
        self.inner.ensure_edge_table(source_type, predicate, target_type)
    }
    fn add_edge(
        &self,
        source_type: &str,
        target_type: &str,
        predicate: &str,
        from_id: &str,
        to_id: &str,
        props: Option<&Row>,
    ) -> mnemon::Result<()> {
        self.check()?;
        self.inner
            .add_edge(source_type, target_type, predicate, from_id, to_id, props)
    }
    fn delete_edge(
        &self,
        source_type: &str,
        target_type: &str,
        predicate: &str,
        from_id: &str,
        to_id: &str,
    ) -> mnemon::Result<()> {
        self.check()?;
        self.inner
            .delete_edge(source_type, target_type, predicate, from_id, to_id)
    }
    fn delete_node(&self, node_type: &str, id: &str) -> mnemon::Result<()> {
        self.check()?;
        self.inner.delete_node(node_type, id)
    }
    fn query(&self, text: &str, params: &[(String, Value)]) -> mnemon::Result<Vec<Row>> {
        self.check()?;
        self.inner.query(text, params)
    }
    fn neighbors(
        &self,
        node_type: &str,
        node_id: &str,
        predicates: Option<&[String]>,
        direction: Direction,
        limit: usize,
        neighbor_type: Option<&str>,
    ) -> mnemon::Result<Vec<NeighborRow>> {
        self.check()?;
        self.inner
            .neighbors(node_type, node_id, predicates, direction, limit, neighbor_type)
    }
    fn select_nodes(&self, select: &NodeSelect) -> mnemon::Result<Vec<Row>> {
        self.check()?;
        self.inner.select_nodes(select)
    }
    fn hrid_map(&self, node_type: &str, user_id: &str) -> mnemon::Result<Vec<(String, String)>> {
        self.check()?;
        self.inner.hrid_map(node_type, user_id)
    }
    fn counts(&self) -> mnemon::Result<(BTreeMap<String, i64>, BTreeMap<String, i64>)> {
        self.check()?;
        self.inner.counts()
    }
    fn health(&self) -> mnemon::Result<()> {
        self.check()?;
        self.inner.health()
    }
}

#[test]
fn graph_outage_falls_back_to_vector_search() {
    let flaky = Arc::new(FlakyGraphStore {
        inner: SqliteGraphStore::open_in_memory().unwrap(),
        failing: AtomicBool::new(false),
    });
    let service = service_with_graph(flaky.clone());

    let n1 = service
        .add("u1", "note", payload(&[("statement", json!("resilient fact"))]), None)
        .unwrap();
    let d1 = service
        .add("u1", "document", payload(&[("title", json!("linked doc"))]), None)
        .unwrap();
    service
        .add_relationship(
            "u1",
            &RelationshipInput {
                from_hrid: n1.hrid.clone().unwrap(),
                to_hrid: d1.hrid.clone().unwrap(),
                predicate: "ANNOTATES".to_string(),
                from_type: None,
                to_type: None,
            },
        )
        .unwrap();

    flaky.failing.store(true, Ordering::SeqCst);

    // Vector search still answers; no neighbor entries appear
    let results = service
        .search(
            "u1",
            &SearchOptions {
                query: Some("resilient fact".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
    assert!(!results.is_empty());
    assert!(results.iter().all(|r| r.source == ResultSource::Vector));

    // Explicit hybrid degrades the same way
    let results = service
        .search(
            "u1",
            &SearchOptions {
                query: Some("resilient fact".to_string()),
                mode: Some(SearchMode::Hybrid),
                ..Default::default()
            },
        )
        .unwrap();
    assert!(!results.is_empty());
    assert!(results.iter().all(|r| r.source == ResultSource::Vector));

    // System info reports the sick store instead of failing
    let info = service.system_info();
    assert!(!info.graph_store.status.healthy);
    assert!(info.vector_store.status.healthy);

    flaky.failing.store(false, Ordering::SeqCst);
    let results = service
        .search(
            "u1",
            &SearchOptions {
                query: Some("resilient fact".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
    assert!(results
        .iter()
        .any(|r| matches!(r.source, ResultSource::Neighbor(_))));
}

// ---------------------------------------------------------------------------
// Deterministic ordering
// ---------------------------------------------------------------------------

/// Embedder that maps every text to the same unit vector, forcing equal
/// scores so ordering falls through to the HRID index.
struct ConstEmbedder {
    dimensions: usize,
}

impl Embedder for ConstEmbedder {
    fn embed(&self, _text: &str) -> mnemon::Result<Vec<f32>> {
        let mut v = vec![0.0; self.dimensions];
        v[0] = 1.0;
        Ok(v)
    }
    fn dim(&self) -> usize {
        self.dimensions
    }
    fn name(&self) -> &str {
        "const"
    }
}

#[test]
fn equal_scores_order_by_hrid_index() {
    let registry = Arc::new(SchemaRegistry::from_yaml(REGISTRY).unwrap());
    let service = MemoryService::new(
        settings(),
        registry,
        Arc::new(ConstEmbedder { dimensions: 384 }),
        Arc::new(SqliteVectorStore::open_in_memory().unwrap()),
        Arc::new(SqliteGraphStore::open_in_memory().unwrap()),
    )
    .unwrap();

    // Insert in an order unrelated to the expected output order
    service
        .add("u1", "document", payload(&[("title", json!("doc"))]), None)
        .unwrap();
    service
        .add("u1", "task", payload(&[("statement", json!("task"))]), None)
        .unwrap();
    service
        .add("u1", "note", payload(&[("statement", json!("note"))]), None)
        .unwrap();

    let run = || {
        service
            .search(
                "u1",
                &SearchOptions {
                    query: Some("anything".to_string()),
                    neighbor_cap: Some(0),
                    ..Default::default()
                },
            )
            .unwrap()
    };

    let first = run();
    assert_eq!(first.len(), 3);
    assert!(first.iter().all(|r| (r.score - 1.0).abs() < 1e-6));

    let indices: Vec<u64> = first
        .iter()
        .map(|r| mnemon::hrid::to_index(r.memory.hrid.as_deref().unwrap()).unwrap())
        .collect();
    let mut sorted = indices.clone();
    sorted.sort_unstable();
    assert_eq!(indices, sorted, "results must ascend by hrid index");

    // Two runs produce identical sequences (ids, scores, sources)
    let second = run();
    let fingerprint = |results: &[mnemon::types::SearchResult]| {
        results
            .iter()
            .map(|r| (r.memory.id.clone(), r.score.to_bits(), r.source.to_string()))
            .collect::<Vec<_>>()
    };
    assert_eq!(fingerprint(&first), fingerprint(&second));
}

// ---------------------------------------------------------------------------
// Projection levels
// ---------------------------------------------------------------------------

#[test]
fn projection_none_keeps_anchor_only() {
    let service = service();
    service
        .add(
            "u1",
            "task",
            payload(&[("statement", json!("projected")), ("status", json!("todo"))]),
            None,
        )
        .unwrap();
    let results = service
        .search(
            "u1",
            &SearchOptions {
                query: Some("projected".to_string()),
                include_details: mnemon::types::DetailLevel::None,
                neighbor_cap: Some(0),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(results.len(), 1);
    let memory = &results[0].memory;
    assert_eq!(memory.payload.len(), 1);
    assert_eq!(memory.payload["statement"], json!("projected"));
    assert!(memory.hrid.is_some());
}

#[test]
fn projection_allow_list_is_honored() {
    let service = service();
    service
        .add(
            "u1",
            "task",
            payload(&[("statement", json!("projected")), ("status", json!("todo"))]),
            None,
        )
        .unwrap();
    let mut projection = BTreeMap::new();
    projection.insert("task".to_string(), vec!["status".to_string()]);
    // unknown type entries are ignored
    projection.insert("ghost".to_string(), vec!["whatever".to_string()]);

    let results = service
        .search(
            "u1",
            &SearchOptions {
                query: Some("projected".to_string()),
                include_details: mnemon::types::DetailLevel::Own,
                projection,
                neighbor_cap: Some(0),
                ..Default::default()
            },
        )
        .unwrap();
    let memory = &results[0].memory;
    assert_eq!(memory.payload.len(), 2);
    assert_eq!(memory.payload["statement"], json!("projected"));
    assert_eq!(memory.payload["status"], json!("todo"));
}

// ---------------------------------------------------------------------------
// Recovery after restart
// ---------------------------------------------------------------------------

#[test]
fn hrid_counters_recover_from_graph_scan() {
    let dir = tempfile::tempdir().unwrap();
    let vector_path = dir.path().join("vector.db");
    let graph_path = dir.path().join("graph.db");
    let schema_path = dir.path().join("schema.yaml");
    std::fs::write(&schema_path, REGISTRY).unwrap();

    let config = Settings {
        schema_path: schema_path.to_string_lossy().into_owned(),
        vector_storage_path: vector_path.to_string_lossy().into_owned(),
        graph_storage_path: graph_path.to_string_lossy().into_owned(),
        vector_dimension: 384,
        ..Default::default()
    };

    {
        let service = MemoryService::open(config.clone()).unwrap();
        service
            .add("u1", "note", payload(&[("statement", json!("first"))]), None)
            .unwrap();
        service
            .add("u1", "note", payload(&[("statement", json!("second"))]), None)
            .unwrap();
    }

    // Fresh process: counters are rebuilt by scanning the graph store
    let service = MemoryService::open(config).unwrap();
    let third = service
        .add("u1", "note", payload(&[("statement", json!("third"))]), None)
        .unwrap();
    assert_eq!(third.hrid.as_deref(), Some("NOTE_AAA003"));

    let first = service.get("u1", "NOTE_AAA001").unwrap();
    assert_eq!(first.payload["statement"], json!("first"));
}
