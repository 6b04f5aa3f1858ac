//! Schema registry and translator
//!
//! The registry is the single source of truth for entity types, their
//! fields and validations, the anchor field each type embeds, and the
//! relation catalog. It is loaded once from a YAML file and handed to the
//! service as a value; compiled validators are cached inside it.

mod validator;

pub use validator::{EntityValidator, FieldSpec, FieldType};

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{MnemonError, Result};
use crate::types::Memory;

static PREDICATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z][A-Z0-9_]*$").expect("predicate grammar"));
static ENTITY_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z][a-z0-9_]*$").expect("entity grammar"));

/// Wildcard entity name in relation specs
pub const WILDCARD: &str = "*";

/// A normalized entity definition
#[derive(Debug, Clone)]
pub struct EntitySpec {
    pub name: String,
    pub description: Option<String>,
    /// The string field whose value is embedded
    pub anchor: String,
    /// Accept fields beyond the declared set (default closed)
    pub open: bool,
    pub fields: BTreeMap<String, FieldSpec>,
}

impl EntitySpec {
    /// Payload fields projected onto the graph node (declared primitive)
    pub fn primitive_fields(&self) -> impl Iterator<Item = (&String, &FieldSpec)> {
        self.fields.iter().filter(|(_, spec)| {
            matches!(
                spec.field_type,
                FieldType::String
                    | FieldType::Int
                    | FieldType::Float
                    | FieldType::Bool
                    | FieldType::Datetime
                    | FieldType::Date
                    | FieldType::Enum
            )
        })
    }
}

/// A normalized relation definition
#[derive(Debug, Clone)]
pub struct RelationSpec {
    pub name: Option<String>,
    pub description: Option<String>,
    pub directed: bool,
    /// Uppercase predicate identifiers
    pub predicates: Vec<String>,
    /// Allowed source entity names, or `["*"]`
    pub sources: Vec<String>,
    /// Allowed target entity names, or `["*"]`
    pub targets: Vec<String>,
}

impl RelationSpec {
    fn matches_end(allowed: &[String], entity: &str) -> bool {
        allowed.iter().any(|a| a == WILDCARD || a == entity)
    }

    /// Whether this relation declares `(source, predicate, target)`
    pub fn allows(&self, source: &str, predicate: &str, target: &str) -> bool {
        self.predicates.iter().any(|p| p == predicate)
            && Self::matches_end(&self.sources, source)
            && Self::matches_end(&self.targets, target)
    }
}

/// A concrete `(source_type, predicate, target_type)` pairing with its
/// traversal directedness
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EdgePair {
    pub source_type: String,
    pub predicate: String,
    pub target_type: String,
    pub directed: bool,
}

impl EdgePair {
    /// Canonical edge table name: `SOURCE_PREDICATE_TARGET`
    pub fn table_name(&self) -> String {
        edge_table_name(&self.source_type, &self.predicate, &self.target_type)
    }
}

/// Canonical edge table name for a type pairing. The same predicate may
/// connect different pairs without collision.
pub fn edge_table_name(source_type: &str, predicate: &str, target_type: &str) -> String {
    format!(
        "{}_{}_{}",
        source_type.to_uppercase(),
        predicate.to_uppercase(),
        target_type.to_uppercase()
    )
}

/// Internal id policy from the registry file
#[derive(Debug, Clone, Deserialize)]
pub struct IdPolicy {
    #[serde(default = "default_id_kind")]
    pub kind: String,
    #[serde(default = "default_id_field")]
    pub field: String,
}

fn default_id_kind() -> String {
    "uuid".to_string()
}

fn default_id_field() -> String {
    "id".to_string()
}

impl Default for IdPolicy {
    fn default() -> Self {
        Self {
            kind: default_id_kind(),
            field: default_id_field(),
        }
    }
}

/// Vector defaults from the registry file
#[derive(Debug, Clone, Deserialize)]
pub struct VectorDefaults {
    #[serde(default = "default_metric")]
    pub metric: String,
    #[serde(default)]
    pub normalize: bool,
    pub dim: Option<usize>,
}

fn default_metric() -> String {
    "cosine".to_string()
}

/// Timestamp defaults from the registry file
#[derive(Debug, Clone, Deserialize, Default)]
pub struct TimestampDefaults {
    #[serde(default = "default_true")]
    pub auto_create: bool,
    #[serde(default = "default_true")]
    pub auto_update: bool,
}

fn default_true() -> bool {
    true
}

/// Loaded, validated schema registry
#[derive(Debug)]
pub struct SchemaRegistry {
    version: String,
    id_policy: IdPolicy,
    /// Entity names in declaration order
    order: Vec<String>,
    entities: HashMap<String, EntitySpec>,
    validators: HashMap<String, EntityValidator>,
    relations: Vec<RelationSpec>,
    vector_defaults: Option<VectorDefaults>,
    timestamp_defaults: TimestampDefaults,
}

// ---------------------------------------------------------------------------
// Raw YAML shapes
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct RawRegistry {
    #[serde(default = "default_version")]
    version: String,
    #[serde(default)]
    id_policy: Option<IdPolicy>,
    #[serde(default)]
    defaults: Option<RawDefaults>,
    entities: Option<RawEntities>,
    #[serde(default)]
    relations: Vec<RawRelation>,
}

fn default_version() -> String {
    "v1".to_string()
}

#[derive(Deserialize)]
struct RawDefaults {
    vector: Option<VectorDefaults>,
    timestamps: Option<TimestampDefaults>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawEntities {
    List(Vec<RawEntity>),
    Map(serde_yaml::Mapping),
}

#[derive(Deserialize)]
struct RawEntity {
    name: Option<String>,
    description: Option<String>,
    anchor: Option<String>,
    #[serde(default)]
    open: bool,
    fields: Option<RawFields>,
}

// Flat is tried first: a required/optional split fails it (the values are
// lists, not field specs) and falls through to Split.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawFields {
    /// Flat `name -> spec` mapping
    Flat(BTreeMap<String, validator::RawFieldSpec>),
    /// `{required: [...], optional: [...]}` split
    Split {
        #[serde(default)]
        required: Vec<RawFieldItem>,
        #[serde(default)]
        optional: Vec<RawFieldItem>,
    },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawFieldItem {
    /// Bare field name; type defaults to string
    Name(String),
    /// `{name: spec}` single-entry map
    Typed(BTreeMap<String, validator::RawFieldSpec>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    fn into_vec(self) -> Vec<String> {
        match self {
            OneOrMany::One(s) => vec![s],
            OneOrMany::Many(v) => v,
        }
    }
}

#[derive(Deserialize)]
struct RawRelation {
    name: Option<String>,
    description: Option<String>,
    #[serde(default = "default_true")]
    directed: bool,
    predicates: Vec<String>,
    source: OneOrMany,
    target: OneOrMany,
}

// ---------------------------------------------------------------------------
// Loading and normalization
// ---------------------------------------------------------------------------

impl SchemaRegistry {
    /// Read and validate a registry file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            MnemonError::Schema(format!("cannot read registry {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&text)
    }

    /// Parse a registry from YAML text
    pub fn from_yaml(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Err(MnemonError::Schema("registry file is empty".into()));
        }
        let raw: RawRegistry = serde_yaml::from_str(text)
            .map_err(|e| MnemonError::Schema(format!("unparsable registry: {}", e)))?;

        let raw_entities = match raw.entities {
            Some(e) => e,
            None => {
                return Err(MnemonError::Schema(
                    "registry lacks an 'entities' section".into(),
                ))
            }
        };

        let mut order = Vec::new();
        let mut entities: HashMap<String, EntitySpec> = HashMap::new();

        let entity_list: Vec<(Option<String>, RawEntity)> = match raw_entities {
            RawEntities::List(list) => list.into_iter().map(|e| (None, e)).collect(),
            RawEntities::Map(map) => {
                let mut out = Vec::new();
                for (key, value) in map {
                    let name: String = serde_yaml::from_value(key)
                        .map_err(|e| MnemonError::Schema(format!("bad entity key: {}", e)))?;
                    let entity: RawEntity = serde_yaml::from_value(value).map_err(|e| {
                        MnemonError::Schema(format!("bad entity spec for {:?}: {}", name, e))
                    })?;
                    out.push((Some(name), entity));
                }
                out
            }
        };

        if entity_list.is_empty() {
            return Err(MnemonError::Schema("registry declares no entities".into()));
        }

        for (key_name, raw_entity) in entity_list {
            let spec = normalize_entity(key_name, raw_entity)?;
            if entities.contains_key(&spec.name) {
                return Err(MnemonError::Schema(format!(
                    "duplicate entity {:?}",
                    spec.name
                )));
            }
            order.push(spec.name.clone());
            entities.insert(spec.name.clone(), spec);
        }

        let mut relations = Vec::new();
        for raw_rel in raw.relations {
            relations.push(normalize_relation(raw_rel, &entities)?);
        }

        let validators = entities
            .iter()
            .map(|(name, spec)| (name.clone(), EntityValidator::compile(spec)))
            .collect();

        let (vector_defaults, timestamp_defaults) = match raw.defaults {
            Some(d) => (d.vector, d.timestamps.unwrap_or_default()),
            None => (None, TimestampDefaults::default()),
        };

        Ok(Self {
            version: raw.version,
            id_policy: raw.id_policy.unwrap_or_default(),
            order,
            entities,
            validators,
            relations,
            vector_defaults,
            timestamp_defaults,
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn id_policy(&self) -> &IdPolicy {
        &self.id_policy
    }

    pub fn vector_defaults(&self) -> Option<&VectorDefaults> {
        self.vector_defaults.as_ref()
    }

    pub fn timestamp_defaults(&self) -> &TimestampDefaults {
        &self.timestamp_defaults
    }

    /// Entity names in declaration order
    pub fn entity_names(&self) -> &[String] {
        &self.order
    }

    /// Ordered iteration over `(name, spec)`
    pub fn entities(&self) -> impl Iterator<Item = (&String, &EntitySpec)> {
        self.order
            .iter()
            .map(move |name| (name, &self.entities[name]))
    }

    /// Look up an entity, case-insensitively. The error lists known types.
    pub fn entity(&self, name: &str) -> Result<&EntitySpec> {
        let key = name.to_lowercase();
        self.entities.get(&key).ok_or_else(|| {
            MnemonError::Validation(format!(
                "unknown memory type {:?}; known types: {}",
                name,
                self.order.join(", ")
            ))
        })
    }

    /// The string field embedded for `name`
    pub fn anchor_field(&self, name: &str) -> Result<&str> {
        Ok(&self.entity(name)?.anchor)
    }

    /// Anchor text of a memory: the trimmed value of its anchor field
    pub fn anchor_text(&self, memory: &Memory) -> Result<String> {
        let field = self.anchor_field(&memory.memory_type)?;
        match memory.payload.get(field) {
            Some(Value::String(s)) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    Err(MnemonError::Validation(format!(
                        "anchor field {:?} of {:?} is empty",
                        field, memory.memory_type
                    )))
                } else {
                    Ok(trimmed.to_string())
                }
            }
            Some(_) => Err(MnemonError::Validation(format!(
                "anchor field {:?} of {:?} is not a string",
                field, memory.memory_type
            ))),
            None => Err(MnemonError::Validation(format!(
                "anchor field {:?} of {:?} is missing",
                field, memory.memory_type
            ))),
        }
    }

    /// Validate and clean a caller payload for `memory_type`
    pub fn validate_payload(
        &self,
        memory_type: &str,
        payload: &BTreeMap<String, Value>,
    ) -> Result<BTreeMap<String, Value>> {
        let key = self.entity(memory_type)?.name.clone();
        self.validators[&key].validate(payload)
    }

    /// Cached validator for an entity
    pub fn validator(&self, memory_type: &str) -> Result<&EntityValidator> {
        let key = self.entity(memory_type)?.name.clone();
        Ok(&self.validators[&key])
    }

    /// Uppercase predicate identifiers over the union of all relations
    pub fn relation_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .relations
            .iter()
            .flat_map(|r| r.predicates.iter().cloned())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    pub fn relations(&self) -> &[RelationSpec] {
        &self.relations
    }

    /// Whether `(source, predicate, target)` is declared, exactly or by wildcard
    pub fn relation_allowed(&self, source_type: &str, predicate: &str, target_type: &str) -> bool {
        let source = source_type.to_lowercase();
        let target = target_type.to_lowercase();
        let predicate = predicate.to_uppercase();
        self.relations
            .iter()
            .any(|r| r.allows(&source, &predicate, &target))
    }

    /// Directedness of `(source, predicate, target)` if declared
    pub fn directedness(
        &self,
        source_type: &str,
        predicate: &str,
        target_type: &str,
    ) -> Option<bool> {
        let source = source_type.to_lowercase();
        let target = target_type.to_lowercase();
        let predicate = predicate.to_uppercase();
        self.relations
            .iter()
            .find(|r| r.allows(&source, &predicate, &target))
            .map(|r| r.directed)
    }

    /// Concrete `(source, predicate, target)` pairings, wildcards expanded
    /// against the declared entity set, optionally restricted to a predicate
    /// subset. Ordering follows relation declaration then entity order.
    pub fn edge_pairs(&self, predicates: Option<&[String]>) -> Vec<EdgePair> {
        let mut pairs = Vec::new();
        for relation in &self.relations {
            for predicate in &relation.predicates {
                if let Some(wanted) = predicates {
                    if !wanted.iter().any(|w| w.eq_ignore_ascii_case(predicate)) {
                        continue;
                    }
                }
                for source in self.expand_end(&relation.sources) {
                    for target in self.expand_end(&relation.targets) {
                        let pair = EdgePair {
                            source_type: source.clone(),
                            predicate: predicate.clone(),
                            target_type: target,
                            directed: relation.directed,
                        };
                        if !pairs.contains(&pair) {
                            pairs.push(pair);
                        }
                    }
                }
            }
        }
        pairs
    }

    fn expand_end(&self, allowed: &[String]) -> Vec<String> {
        if allowed.iter().any(|a| a == WILDCARD) {
            self.order.clone()
        } else {
            allowed.to_vec()
        }
    }
}

fn normalize_entity(key_name: Option<String>, raw: RawEntity) -> Result<EntitySpec> {
    let name = match (key_name, raw.name) {
        (Some(key), Some(inline)) if !key.eq_ignore_ascii_case(&inline) => {
            return Err(MnemonError::Schema(format!(
                "entity key {:?} disagrees with name {:?}",
                key, inline
            )))
        }
        (Some(key), _) => key,
        (None, Some(inline)) => inline,
        (None, None) => return Err(MnemonError::Schema("entity without a name".into())),
    }
    .to_lowercase();

    if !ENTITY_NAME_RE.is_match(&name) {
        return Err(MnemonError::Schema(format!(
            "invalid entity name {:?} (want lowercase identifier)",
            name
        )));
    }

    let anchor = raw
        .anchor
        .as_deref()
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .ok_or_else(|| MnemonError::Schema(format!("entity {:?} lacks an anchor", name)))?
        .to_string();

    let mut fields: BTreeMap<String, FieldSpec> = BTreeMap::new();
    match raw.fields {
        Some(RawFields::Flat(map)) => {
            for (field_name, raw_spec) in map {
                fields.insert(field_name, raw_spec.normalize(None)?);
            }
        }
        Some(RawFields::Split { required, optional }) => {
            for (items, required_flag) in [(required, true), (optional, false)] {
                for item in items {
                    let (field_name, spec) = match item {
                        RawFieldItem::Name(field_name) => (
                            field_name,
                            validator::RawFieldSpec::bare().normalize(Some(required_flag))?,
                        ),
                        RawFieldItem::Typed(map) => {
                            let mut iter = map.into_iter();
                            let (field_name, raw_spec) = iter.next().ok_or_else(|| {
                                MnemonError::Schema(format!(
                                    "empty field entry in entity {:?}",
                                    name
                                ))
                            })?;
                            if iter.next().is_some() {
                                return Err(MnemonError::Schema(format!(
                                    "field entry in entity {:?} must have exactly one key",
                                    name
                                )));
                            }
                            (field_name, raw_spec.normalize(Some(required_flag))?)
                        }
                    };
                    fields.insert(field_name, spec);
                }
            }
        }
        None => {
            return Err(MnemonError::Schema(format!(
                "entity {:?} declares no fields",
                name
            )))
        }
    }

    match fields.get(&anchor) {
        Some(spec) if spec.field_type == FieldType::String => {}
        Some(spec) => {
            return Err(MnemonError::Schema(format!(
                "anchor {:?} of entity {:?} must be a string field, found {}",
                anchor, name, spec.field_type
            )))
        }
        None => {
            return Err(MnemonError::Schema(format!(
                "anchor {:?} of entity {:?} is not declared",
                anchor, name
            )))
        }
    }

    for (field_name, spec) in &fields {
        if spec.field_type == FieldType::Enum
            && spec.choices.as_ref().map_or(true, |c| c.is_empty())
        {
            return Err(MnemonError::Schema(format!(
                "enum field {:?} of entity {:?} declares no choices",
                field_name, name
            )));
        }
    }

    Ok(EntitySpec {
        name,
        description: raw.description,
        anchor,
        open: raw.open,
        fields,
    })
}

fn normalize_relation(
    raw: RawRelation,
    entities: &HashMap<String, EntitySpec>,
) -> Result<RelationSpec> {
    if raw.predicates.is_empty() {
        return Err(MnemonError::Schema(format!(
            "relation {:?} declares no predicates",
            raw.name.as_deref().unwrap_or("<unnamed>")
        )));
    }
    let mut predicates = Vec::with_capacity(raw.predicates.len());
    for predicate in raw.predicates {
        let upper = predicate.to_uppercase();
        if !PREDICATE_RE.is_match(&upper) {
            return Err(MnemonError::Schema(format!(
                "invalid predicate {:?} (want UPPER_SNAKE identifier)",
                predicate
            )));
        }
        predicates.push(upper);
    }

    let normalize_end = |ends: Vec<String>, side: &str| -> Result<Vec<String>> {
        if ends.is_empty() {
            return Err(MnemonError::Schema(format!(
                "relation {:?} has an empty {} set",
                predicates.join("/"),
                side
            )));
        }
        ends.into_iter()
            .map(|e| {
                let entity = e.to_lowercase();
                if entity != WILDCARD && !entities.contains_key(&entity) {
                    Err(MnemonError::Schema(format!(
                        "relation {} {} references unknown entity {:?}",
                        predicates.join("/"),
                        side,
                        entity
                    )))
                } else {
                    Ok(entity)
                }
            })
            .collect()
    };

    let sources = normalize_end(raw.source.into_vec(), "source")?;
    let targets = normalize_end(raw.target.into_vec(), "target")?;

    Ok(RelationSpec {
        name: raw.name,
        description: raw.description,
        directed: raw.directed,
        predicates,
        sources,
        targets,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Payload;
    use serde_json::json;

    const REGISTRY: &str = r#"
version: v1
id_policy: {kind: uuid, field: id}
defaults:
  vector: {metric: cosine, normalize: true, dim: 16}
  timestamps: {auto_create: true, auto_update: true}
entities:
  - name: note
    anchor: statement
    fields:
      statement: {type: string, required: true, max_length: 4000}
      tags: {type: tags}
  - name: document
    anchor: title
    fields:
      title: {type: string, required: true}
      url: string
  - name: task
    anchor: statement
    fields:
      statement: {type: string, required: true}
      status:
        type: enum
        choices: [backlog, todo, in_progress, in_review, done, cancelled]
        default: backlog
      priority: {type: int}
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

    fn registry() -> SchemaRegistry {
        SchemaRegistry::from_yaml(REGISTRY).unwrap()
    }

    #[test]
    fn test_load_preserves_declaration_order() {
        let reg = registry();
        assert_eq!(reg.entity_names(), &["note", "document", "task"]);
        assert_eq!(reg.version(), "v1");
        assert_eq!(reg.id_policy().kind, "uuid");
        assert_eq!(reg.id_policy().field, "id");
        assert_eq!(reg.vector_defaults().unwrap().dim, Some(16));
    }

    #[test]
    fn test_empty_registry_rejected() {
        assert!(SchemaRegistry::from_yaml("").is_err());
        assert!(SchemaRegistry::from_yaml("version: v1\n").is_err());
        assert!(SchemaRegistry::from_yaml("entities: []\n").is_err());
    }

    #[test]
    fn test_unparsable_registry_rejected() {
        let err = SchemaRegistry::from_yaml("entities: [unterminated").unwrap_err();
        assert_eq!(err.kind(), "schema");
    }

    #[test]
    fn test_entity_lookup_case_insensitive() {
        let reg = registry();
        assert_eq!(reg.entity("Note").unwrap().name, "note");
        assert_eq!(reg.entity("TASK").unwrap().anchor, "statement");
    }

    #[test]
    fn test_unknown_entity_lists_known_types() {
        let reg = registry();
        let err = reg.entity("meeting").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("note"));
        assert!(msg.contains("document"));
        assert!(msg.contains("task"));
    }

    #[test]
    fn test_missing_anchor_rejected_at_load() {
        let yaml = r#"
entities:
  - name: note
    fields:
      statement: {type: string, required: true}
"#;
        let err = SchemaRegistry::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("anchor"));
    }

    #[test]
    fn test_undeclared_anchor_rejected_at_load() {
        let yaml = r#"
entities:
  - name: note
    anchor: body
    fields:
      statement: {type: string, required: true}
"#;
        assert!(SchemaRegistry::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_anchor_text_trims() {
        let reg = registry();
        let mut payload = Payload::new();
        payload.insert("statement".to_string(), json!("  hello world  "));
        let memory = Memory::new("u1", "note", payload, vec![]);
        assert_eq!(reg.anchor_text(&memory).unwrap(), "hello world");
    }

    #[test]
    fn test_anchor_text_empty_rejected() {
        let reg = registry();
        let mut payload = Payload::new();
        payload.insert("statement".to_string(), json!("   "));
        let memory = Memory::new("u1", "note", payload, vec![]);
        let err = reg.anchor_text(&memory).unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[test]
    fn test_anchor_text_non_string_rejected() {
        let reg = registry();
        let mut payload = Payload::new();
        payload.insert("statement".to_string(), json!(42));
        let memory = Memory::new("u1", "note", payload, vec![]);
        assert!(reg.anchor_text(&memory).is_err());
    }

    #[test]
    fn test_entities_mapping_form() {
        let yaml = r#"
entities:
  note:
    anchor: statement
    fields:
      statement: {type: string, required: true}
"#;
        let reg = SchemaRegistry::from_yaml(yaml).unwrap();
        assert_eq!(reg.entity("note").unwrap().anchor, "statement");
    }

    #[test]
    fn test_fields_split_form() {
        let yaml = r#"
entities:
  - name: contact
    anchor: full_name
    fields:
      required:
        - full_name
      optional:
        - email: {type: string, max_length: 200}
        - age: {type: int}
"#;
        let reg = SchemaRegistry::from_yaml(yaml).unwrap();
        let spec = reg.entity("contact").unwrap();
        assert!(spec.fields["full_name"].required);
        assert!(!spec.fields["email"].required);
        assert_eq!(spec.fields["age"].field_type, FieldType::Int);
    }

    #[test]
    fn test_relation_names_union() {
        let reg = registry();
        assert_eq!(reg.relation_names(), vec!["ANNOTATES", "BLOCKS"]);
    }

    #[test]
    fn test_relation_allowed() {
        let reg = registry();
        assert!(reg.relation_allowed("note", "ANNOTATES", "document"));
        assert!(reg.relation_allowed("note", "ANNOTATES", "task"));
        assert!(!reg.relation_allowed("note", "ANNOTATES", "note"));
        assert!(!reg.relation_allowed("document", "ANNOTATES", "task"));
        assert!(reg.relation_allowed("task", "BLOCKS", "task"));
    }

    #[test]
    fn test_relation_wildcard() {
        let yaml = r#"
entities:
  - name: note
    anchor: statement
    fields:
      statement: {type: string, required: true}
  - name: task
    anchor: statement
    fields:
      statement: {type: string, required: true}
relations:
  - predicates: [RELATES_TO]
    directed: false
    source: "*"
    target: "*"
"#;
        let reg = SchemaRegistry::from_yaml(yaml).unwrap();
        assert!(reg.relation_allowed("note", "RELATES_TO", "task"));
        assert!(reg.relation_allowed("task", "relates_to", "task"));
        assert_eq!(reg.edge_pairs(None).len(), 4);
    }

    #[test]
    fn test_relation_unknown_entity_rejected() {
        let yaml = r#"
entities:
  - name: note
    anchor: statement
    fields:
      statement: {type: string, required: true}
relations:
  - predicates: [ANNOTATES]
    source: note
    target: ghost
"#;
        assert!(SchemaRegistry::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_edge_table_name_collision_free() {
        assert_eq!(
            edge_table_name("note", "ANNOTATES", "document"),
            "NOTE_ANNOTATES_DOCUMENT"
        );
        assert_eq!(
            edge_table_name("note", "ANNOTATES", "task"),
            "NOTE_ANNOTATES_TASK"
        );
    }

    #[test]
    fn test_edge_pairs_expand_target_list() {
        let reg = registry();
        let pairs = reg.edge_pairs(Some(&["ANNOTATES".to_string()]));
        let tables: Vec<String> = pairs.iter().map(|p| p.table_name()).collect();
        assert_eq!(tables, vec!["NOTE_ANNOTATES_DOCUMENT", "NOTE_ANNOTATES_TASK"]);
    }

    #[test]
    fn test_directedness() {
        let reg = registry();
        assert_eq!(reg.directedness("task", "BLOCKS", "task"), Some(true));
        assert_eq!(reg.directedness("note", "BLOCKS", "task"), None);
    }

    #[test]
    fn test_enum_without_choices_rejected() {
        let yaml = r#"
entities:
  - name: task
    anchor: statement
    fields:
      statement: {type: string, required: true}
      status: {type: enum}
"#;
        assert!(SchemaRegistry::from_yaml(yaml).is_err());
    }
}
