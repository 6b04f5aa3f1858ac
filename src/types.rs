//! Core types for Mnemon

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Unique identifier for a memory (UUIDv4, lowercase hyphenated).
///
/// The same id is used as the vector point id and the graph node id.
pub type MemoryId = String;

/// Entity-specific payload: validated field name -> value.
///
/// BTreeMap keeps field order deterministic so two runs over the same input
/// build identical node properties.
pub type Payload = BTreeMap<String, Value>;

/// A memory record, persisted in both stores under the same id
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Memory {
    /// Opaque internal identifier, stable for the record's lifetime
    pub id: MemoryId,
    /// Human-readable id of the form `TYPE_AAA000`, unique per (user, type)
    pub hrid: Option<String>,
    /// Tenant scope; every operation filters by it
    pub user_id: String,
    /// Entity name from the active schema (lowercase)
    #[serde(rename = "type")]
    pub memory_type: String,
    /// Schema-validated field values
    #[serde(default)]
    pub payload: Payload,
    /// Tags for categorization (sorted, deduplicated)
    #[serde(default)]
    pub tags: Vec<String>,
    /// Dense embedding of the anchor text (present after indexing)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f32>>,
    /// When the memory was created
    pub created_at: DateTime<Utc>,
    /// When the memory was last updated
    pub updated_at: DateTime<Utc>,
    /// Tombstone flag, reserved for lineage
    #[serde(default = "default_true")]
    pub is_valid: bool,
    /// Reserved lineage reference
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supersedes: Option<MemoryId>,
    /// Reserved lineage reference
    #[serde(skip_serializing_if = "Option::is_none")]
    pub superseded_by: Option<MemoryId>,
}

fn default_true() -> bool {
    true
}

impl Memory {
    /// Build a fresh, unindexed record for `user_id` with the given payload
    pub fn new(user_id: &str, memory_type: &str, payload: Payload, tags: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            hrid: None,
            user_id: user_id.to_string(),
            memory_type: memory_type.to_lowercase(),
            payload,
            tags,
            vector: None,
            created_at: now,
            updated_at: now,
            is_valid: true,
            supersedes: None,
            superseded_by: None,
        }
    }

    /// Read a validated payload field. Unknown fields surface as None;
    /// there is no attribute-style fallback.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.payload.get(field)
    }
}

/// Where a search result came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultSource {
    /// Direct vector similarity hit
    Vector,
    /// Structural graph match
    Graph,
    /// Found by both paths
    Hybrid,
    /// Appended by neighbor expansion over the named predicate
    Neighbor(String),
}

impl Serialize for ResultSource {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ResultSource {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(match s.as_str() {
            "vector" => ResultSource::Vector,
            "graph" => ResultSource::Graph,
            "hybrid" => ResultSource::Hybrid,
            other => match other.strip_prefix("neighbor:") {
                Some(rel) => ResultSource::Neighbor(rel.to_string()),
                None => {
                    return Err(serde::de::Error::custom(format!(
                        "unknown result source: {}",
                        other
                    )))
                }
            },
        })
    }
}

impl std::fmt::Display for ResultSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResultSource::Vector => write!(f, "vector"),
            ResultSource::Graph => write!(f, "graph"),
            ResultSource::Hybrid => write!(f, "hybrid"),
            ResultSource::Neighbor(rel) => write!(f, "neighbor:{}", rel),
        }
    }
}

/// A scored search hit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub memory: Memory,
    /// Similarity in [0, 1]
    pub score: f32,
    /// Raw distance, when the backend reports one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<f32>,
    pub source: ResultSource,
    /// Free-form extras (e.g. `relation_type` for neighbors)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
}

/// Search mode, selected automatically unless forced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Vector,
    Graph,
    Hybrid,
}

impl std::str::FromStr for SearchMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "vector" => Ok(SearchMode::Vector),
            "graph" => Ok(SearchMode::Graph),
            "hybrid" => Ok(SearchMode::Hybrid),
            _ => Err(format!("Unknown search mode: {}", s)),
        }
    }
}

/// How much payload each result carries back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DetailLevel {
    /// Anchor text and core identifiers only
    None,
    /// Anchor text plus fields allow-listed per type in the projection
    #[default]
    #[serde(rename = "self")]
    Own,
}

/// Options for search operations
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchOptions {
    /// Semantic query text; absent for purely structural lookups
    pub query: Option<String>,
    pub limit: Option<usize>,
    /// Restrict to one entity type
    #[serde(alias = "type")]
    pub memory_type: Option<String>,
    /// Only records with `updated_at >= now - N days`
    pub modified_within_days: Option<i64>,
    /// Extra payload filters forwarded to the vector store
    pub filters: Option<Vec<FieldFilter>>,
    /// Force a specific mode instead of automatic selection
    pub mode: Option<SearchMode>,
    /// Relation names eligible for neighbor expansion
    /// (default: every predicate in the catalog)
    pub relation_names: Option<Vec<String>>,
    /// Bounds neighbor expansion: seeds expanded and neighbors per seed
    pub neighbor_cap: Option<usize>,
    #[serde(default)]
    pub include_details: DetailLevel,
    /// Per-type payload allow-list applied at `DetailLevel::Own`
    #[serde(default)]
    pub projection: BTreeMap<String, Vec<String>>,
}

/// A single caller-supplied payload filter condition
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldFilter {
    pub field: String,
    #[serde(flatten)]
    pub op: FilterOp,
}

/// Filter operation forwarded to the vector store
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum FilterOp {
    /// Exact match
    Eq(Value),
    /// Any-of list match
    #[serde(rename = "any")]
    AnyOf(Vec<Value>),
    /// Numeric or RFC 3339 datetime range
    Range {
        #[serde(skip_serializing_if = "Option::is_none")]
        gt: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        gte: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        lt: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        lte: Option<Value>,
    },
}

/// Options for listing memories (graph path, filter + paginate)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListOptions {
    #[serde(alias = "type")]
    pub memory_type: Option<String>,
    pub filters: Option<Vec<FieldFilter>>,
    pub modified_within_days: Option<i64>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    /// Expand graph neighbors of each listed record
    #[serde(default)]
    pub expand_neighbors: bool,
    #[serde(default)]
    pub include_details: DetailLevel,
    #[serde(default)]
    pub projection: BTreeMap<String, Vec<String>>,
}

/// Input for adding a relationship between two memories
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipInput {
    pub from_hrid: String,
    pub to_hrid: String,
    pub predicate: String,
    /// Inferred from the HRID prefix when absent
    pub from_type: Option<String>,
    pub to_type: Option<String>,
}
