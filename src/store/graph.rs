//! Graph store adapter
//!
//! Dynamic node tables (one per entity type) and edge tables (one per
//! `SOURCE_PREDICATE_TARGET` pairing), created lazily on first use. Logical
//! column types are inferred from values and recorded in a catalog so the
//! widening policy stays deterministic across restarts.

use std::collections::BTreeMap;
use std::path::Path;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, OpenFlags};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{MnemonError, Result};

static NODE_TABLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z][a-z0-9_]*$").expect("node table grammar"));
static EDGE_TABLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z][A-Z0-9_]*$").expect("edge table grammar"));
static COLUMN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("column grammar"));

/// Node properties the adapter manages itself; `update_node` refuses to
/// touch them.
pub const SYSTEM_COLUMNS: &[&str] = &["id", "user_id", "created_at"];

/// A plain result row
pub type Row = BTreeMap<String, Value>;

/// Traversal direction for neighbor fetches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
    Any,
}

/// A neighbor row: the neighbor's node properties plus the predicate that
/// reached it
#[derive(Debug, Clone)]
pub struct NeighborRow {
    pub properties: Row,
    pub relation_type: String,
}

/// Structural selection the retrieval pipeline issues (assembled into a
/// parametric query by the adapter, which owns the dialect)
#[derive(Debug, Clone, Default)]
pub struct NodeSelect {
    pub user_id: String,
    /// Restrict to one node table; all known tables otherwise
    pub node_type: Option<String>,
    /// Only rows with `updated_at >=` this RFC 3339 instant
    pub updated_after: Option<String>,
    pub limit: usize,
    pub offset: usize,
}

/// Logical column types tracked by the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalType {
    String,
    Double,
    Int64,
    Boolean,
    Timestamp,
}

impl LogicalType {
    fn as_str(&self) -> &'static str {
        match self {
            LogicalType::String => "STRING",
            LogicalType::Double => "DOUBLE",
            LogicalType::Int64 => "INT64",
            LogicalType::Boolean => "BOOLEAN",
            LogicalType::Timestamp => "TIMESTAMP",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "STRING" => Some(LogicalType::String),
            "DOUBLE" => Some(LogicalType::Double),
            "INT64" => Some(LogicalType::Int64),
            "BOOLEAN" => Some(LogicalType::Boolean),
            "TIMESTAMP" => Some(LogicalType::Timestamp),
            _ => None,
        }
    }

    fn sql_type(&self) -> &'static str {
        match self {
            LogicalType::String | LogicalType::Timestamp => "TEXT",
            LogicalType::Double => "REAL",
            LogicalType::Int64 => "INTEGER",
            LogicalType::Boolean => "INTEGER",
        }
    }

    /// Infer the logical type of a JSON value. Strings that parse as
    /// RFC 3339 instants are timestamps.
    fn infer(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(_) => Some(LogicalType::Boolean),
            Value::Number(n) if n.is_i64() || n.is_u64() => Some(LogicalType::Int64),
            Value::Number(_) => Some(LogicalType::Double),
            Value::String(s) => {
                if chrono::DateTime::parse_from_rfc3339(s).is_ok() {
                    Some(LogicalType::Timestamp)
                } else {
                    Some(LogicalType::String)
                }
            }
            _ => None,
        }
    }
}

/// Operations the core requires from a graph store
pub trait GraphStore: Send + Sync {
    /// Create the node table on first use; merge new columns on later calls
    fn ensure_node_table(&self, node_type: &str, properties: &Row) -> Result<()>;

    /// Upsert a node by its `id` property
    fn add_node(&self, node_type: &str, properties: &Row) -> Result<()>;

    /// Direct property update; system columns are never touched
    fn update_node(&self, node_type: &str, id: &str, properties: &Row) -> Result<()>;

    /// Fetch one node by id
    fn get_node(&self, node_type: &str, id: &str) -> Result<Option<Row>>;

    /// Idempotent edge table creation; canonical `SOURCE_PREDICATE_TARGET` name
    fn ensure_edge_table(&self, source_type: &str, predicate: &str, target_type: &str)
        -> Result<()>;

    /// Add an edge; duplicates are a no-op
    fn add_edge(
        &self,
        source_type: &str,
        target_type: &str,
        predicate: &str,
        from_id: &str,
        to_id: &str,
        props: Option<&Row>,
    ) -> Result<()>;

    /// Remove an edge; absence is a no-op
    fn delete_edge(
        &self,
        source_type: &str,
        target_type: &str,
        predicate: &str,
        from_id: &str,
        to_id: &str,
    ) -> Result<()>;

    /// Delete a node and all incident edges
    fn delete_node(&self, node_type: &str, id: &str) -> Result<()>;

    /// Execute a parametric query and return plain rows
    fn query(&self, text: &str, params: &[(String, Value)]) -> Result<Vec<Row>>;

    /// Immediate neighbors of a node over the cataloged edge tables
    fn neighbors(
        &self,
        node_type: &str,
        node_id: &str,
        predicates: Option<&[String]>,
        direction: Direction,
        limit: usize,
        neighbor_type: Option<&str>,
    ) -> Result<Vec<NeighborRow>>;

    /// Structural selection for the retrieval pipeline (core columns only,
    /// ordered by `updated_at` descending then id)
    fn select_nodes(&self, select: &NodeSelect) -> Result<Vec<Row>>;

    /// `(hrid, id)` pairs for a `(user, type)`; used to reseed the HRID
    /// allocator after a restart
    fn hrid_map(&self, node_type: &str, user_id: &str) -> Result<Vec<(String, String)>>;

    /// Node counts per table and edge counts per table
    fn counts(&self) -> Result<(BTreeMap<String, i64>, BTreeMap<String, i64>)>;

    /// Cheap liveness probe
    fn health(&self) -> Result<()>;
}

/// SQLite-backed reference implementation
pub struct SqliteGraphStore {
    conn: Mutex<Connection>,
}

impl SqliteGraphStore {
    /// Open or create the backing database
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = if path.to_str() == Some(":memory:") {
            Connection::open_in_memory()?
        } else {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            Connection::open_with_flags(
                path,
                OpenFlags::SQLITE_OPEN_READ_WRITE
                    | OpenFlags::SQLITE_OPEN_CREATE
                    | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?
        };
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA busy_timeout=30000;
            PRAGMA temp_store=MEMORY;
            "#,
        )?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS node_catalog (
                table_name TEXT NOT NULL,
                column_name TEXT NOT NULL,
                logical_type TEXT NOT NULL,
                PRIMARY KEY (table_name, column_name)
            );
            CREATE TABLE IF NOT EXISTS edge_catalog (
                table_name TEXT PRIMARY KEY,
                source_type TEXT NOT NULL,
                predicate TEXT NOT NULL,
                target_type TEXT NOT NULL
            );
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store for tests
    pub fn open_in_memory() -> Result<Self> {
        Self::open(":memory:")
    }

    fn check_node_type(node_type: &str) -> Result<()> {
        if NODE_TABLE_RE.is_match(node_type) {
            Ok(())
        } else {
            Err(MnemonError::InvalidInput(format!(
                "invalid node type {:?}",
                node_type
            )))
        }
    }

    fn edge_table(source_type: &str, predicate: &str, target_type: &str) -> Result<String> {
        Self::check_node_type(source_type)?;
        Self::check_node_type(target_type)?;
        let table = crate::schema::edge_table_name(source_type, predicate, target_type);
        if EDGE_TABLE_RE.is_match(&table) {
            Ok(table)
        } else {
            Err(MnemonError::InvalidInput(format!(
                "invalid edge table {:?}",
                table
            )))
        }
    }

    fn node_table_exists(conn: &Connection, node_type: &str) -> Result<bool> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM node_catalog WHERE table_name = ?1",
            params![node_type],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn node_columns(conn: &Connection, node_type: &str) -> Result<BTreeMap<String, LogicalType>> {
        let mut stmt = conn.prepare(
            "SELECT column_name, logical_type FROM node_catalog WHERE table_name = ?1",
        )?;
        let rows = stmt.query_map(params![node_type], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut columns = BTreeMap::new();
        for row in rows {
            let (name, logical) = row?;
            let logical = LogicalType::parse(&logical).ok_or_else(|| {
                MnemonError::Database(format!("corrupt catalog type {:?}", logical))
            })?;
            columns.insert(name, logical);
        }
        Ok(columns)
    }

    /// Merge inferred property types into the catalog, creating the table
    /// or adding columns as needed. Widening: INT64 -> DOUBLE and
    /// TIMESTAMP -> STRING; any other change is rejected.
    fn merge_columns(conn: &Connection, node_type: &str, properties: &Row) -> Result<()> {
        let mut existing = Self::node_columns(conn, node_type)?;
        let creating = existing.is_empty();

        let mut inferred: BTreeMap<String, LogicalType> = BTreeMap::new();
        for (name, value) in properties {
            if !COLUMN_RE.is_match(name) {
                return Err(MnemonError::InvalidInput(format!(
                    "invalid property name {:?}",
                    name
                )));
            }
            if let Some(logical) = LogicalType::infer(value) {
                inferred.insert(name.clone(), logical);
            }
        }
        inferred.insert("id".to_string(), LogicalType::String);
        inferred
            .entry("user_id".to_string())
            .or_insert(LogicalType::String);
        inferred
            .entry("created_at".to_string())
            .or_insert(LogicalType::Timestamp);

        if creating {
            let mut columns: Vec<String> = vec!["\"id\" TEXT PRIMARY KEY".to_string()];
            for (name, logical) in &inferred {
                if name != "id" {
                    columns.push(format!("\"{}\" {}", name, logical.sql_type()));
                }
            }
            conn.execute(
                &format!("CREATE TABLE \"{}\" ({})", node_type, columns.join(", ")),
                [],
            )?;
            let mut stmt = conn.prepare(
                "INSERT INTO node_catalog (table_name, column_name, logical_type) VALUES (?1, ?2, ?3)",
            )?;
            for (name, logical) in &inferred {
                stmt.execute(params![node_type, name, logical.as_str()])?;
            }
            debug!(table = node_type, "created node table");
            return Ok(());
        }

        for (name, logical) in inferred {
            match existing.get(&name) {
                None => {
                    conn.execute(
                        &format!(
                            "ALTER TABLE \"{}\" ADD COLUMN \"{}\" {}",
                            node_type,
                            name,
                            logical.sql_type()
                        ),
                        [],
                    )?;
                    conn.execute(
                        "INSERT INTO node_catalog (table_name, column_name, logical_type) VALUES (?1, ?2, ?3)",
                        params![node_type, name, logical.as_str()],
                    )?;
                    existing.insert(name, logical);
                }
                Some(&current) if current == logical => {}
                Some(&current) => {
                    let widened = match (current, logical) {
                        (LogicalType::Int64, LogicalType::Double) => Some(LogicalType::Double),
                        (LogicalType::Double, LogicalType::Int64) => None, // storable as-is
                        (LogicalType::Timestamp, LogicalType::String) => Some(LogicalType::String),
                        (LogicalType::String, LogicalType::Timestamp) => None, // storable as-is
                        _ => {
                            return Err(MnemonError::Database(format!(
                                "column {:?} of table {:?} is {}, refusing value of type {}",
                                name,
                                node_type,
                                current.as_str(),
                                logical.as_str()
                            )))
                        }
                    };
                    if let Some(wider) = widened {
                        warn!(
                            table = node_type,
                            column = name.as_str(),
                            from = current.as_str(),
                            to = wider.as_str(),
                            "widening column type"
                        );
                        conn.execute(
                            "UPDATE node_catalog SET logical_type = ?1 WHERE table_name = ?2 AND column_name = ?3",
                            params![wider.as_str(), node_type, name],
                        )?;
                        existing.insert(name, wider);
                    }
                }
            }
        }
        Ok(())
    }

    fn bind_value(value: &Value) -> Result<rusqlite::types::Value> {
        use rusqlite::types::Value as SqlValue;
        Ok(match value {
            Value::Null => SqlValue::Null,
            Value::Bool(b) => SqlValue::Integer(*b as i64),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    SqlValue::Integer(i)
                } else if let Some(f) = n.as_f64() {
                    SqlValue::Real(f)
                } else {
                    return Err(MnemonError::InvalidInput(format!(
                        "unrepresentable number {}",
                        n
                    )));
                }
            }
            Value::String(s) => SqlValue::Text(s.clone()),
            other => {
                return Err(MnemonError::InvalidInput(format!(
                    "unsupported property value {}",
                    other
                )))
            }
        })
    }

    fn row_value(value: ValueRef<'_>) -> Value {
        match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => Value::from(i),
            ValueRef::Real(f) => serde_json::Number::from_f64(f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(_) => Value::Null,
        }
    }

    fn run_query(conn: &Connection, text: &str, params: &[(String, Value)]) -> Result<Vec<Row>> {
        let mut stmt = conn.prepare(text)?;
        let column_names: Vec<String> =
            stmt.column_names().iter().map(|c| c.to_string()).collect();

        let bound: Vec<(String, rusqlite::types::Value)> = params
            .iter()
            .map(|(name, value)| Ok((name.clone(), Self::bind_value(value)?)))
            .collect::<Result<_>>()?;
        let named: Vec<(&str, &dyn rusqlite::ToSql)> = bound
            .iter()
            .map(|(name, value)| (name.as_str(), value as &dyn rusqlite::ToSql))
            .collect();

        let mut rows = stmt.query(named.as_slice())?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut map = Row::new();
            for (idx, name) in column_names.iter().enumerate() {
                map.insert(name.clone(), Self::row_value(row.get_ref(idx)?));
            }
            out.push(map);
        }
        Ok(out)
    }

    fn edge_tables_for(
        conn: &Connection,
        node_type: &str,
        predicates: Option<&[String]>,
        direction: Direction,
    ) -> Result<Vec<(String, String, String, String, bool)>> {
        // (table, predicate, source_type, target_type, outgoing)
        let mut stmt = conn.prepare(
            "SELECT table_name, predicate, source_type, target_type FROM edge_catalog
             WHERE source_type = ?1 OR target_type = ?1 ORDER BY table_name",
        )?;
        let rows = stmt.query_map(params![node_type], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;
        let mut tables = Vec::new();
        for row in rows {
            let (table, predicate, source_type, target_type) = row?;
            if let Some(wanted) = predicates {
                if !wanted.iter().any(|w| w.eq_ignore_ascii_case(&predicate)) {
                    continue;
                }
            }
            if source_type == node_type
                && matches!(direction, Direction::Out | Direction::Any)
            {
                tables.push((
                    table.clone(),
                    predicate.clone(),
                    source_type.clone(),
                    target_type.clone(),
                    true,
                ));
            }
            if target_type == node_type && matches!(direction, Direction::In | Direction::Any)
            {
                tables.push((table, predicate, source_type, target_type, false));
            }
        }
        Ok(tables)
    }
}

impl GraphStore for SqliteGraphStore {
    fn ensure_node_table(&self, node_type: &str, properties: &Row) -> Result<()> {
        Self::check_node_type(node_type)?;
        let conn = self.conn.lock();
        Self::merge_columns(&conn, node_type, properties)
    }

    fn add_node(&self, node_type: &str, properties: &Row) -> Result<()> {
        Self::check_node_type(node_type)?;
        let id = properties
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| MnemonError::InvalidInput("node requires a string id".into()))?
            .to_string();

        let conn = self.conn.lock();
        Self::merge_columns(&conn, node_type, properties)?;

        let mut columns = Vec::new();
        let mut placeholders = Vec::new();
        let mut updates = Vec::new();
        let mut values: Vec<rusqlite::types::Value> = Vec::new();
        for (idx, (name, value)) in properties.iter().enumerate() {
            columns.push(format!("\"{}\"", name));
            placeholders.push(format!("?{}", idx + 1));
            if name != "id" {
                updates.push(format!("\"{}\" = excluded.\"{}\"", name, name));
            }
            values.push(Self::bind_value(value)?);
        }
        let sql = if updates.is_empty() {
            format!(
                "INSERT OR IGNORE INTO \"{}\" ({}) VALUES ({})",
                node_type,
                columns.join(", "),
                placeholders.join(", ")
            )
        } else {
            format!(
                "INSERT INTO \"{}\" ({}) VALUES ({}) ON CONFLICT (id) DO UPDATE SET {}",
                node_type,
                columns.join(", "),
                placeholders.join(", "),
                updates.join(", ")
            )
        };
        conn.execute(&sql, rusqlite::params_from_iter(values))?;
        debug!(table = node_type, id = id.as_str(), "upserted node");
        Ok(())
    }

    fn update_node(&self, node_type: &str, id: &str, properties: &Row) -> Result<()> {
        Self::check_node_type(node_type)?;
        let conn = self.conn.lock();
        if !Self::node_table_exists(&conn, node_type)? {
            return Err(MnemonError::NotFound(format!(
                "node table {:?} does not exist",
                node_type
            )));
        }
        Self::merge_columns(&conn, node_type, properties)?;

        let mut assignments = Vec::new();
        let mut values: Vec<rusqlite::types::Value> = Vec::new();
        for (name, value) in properties {
            if SYSTEM_COLUMNS.contains(&name.as_str()) {
                continue;
            }
            values.push(Self::bind_value(value)?);
            assignments.push(format!("\"{}\" = ?{}", name, values.len()));
        }
        if assignments.is_empty() {
            return Ok(());
        }
        values.push(rusqlite::types::Value::Text(id.to_string()));
        let sql = format!(
            "UPDATE \"{}\" SET {} WHERE id = ?{}",
            node_type,
            assignments.join(", "),
            values.len()
        );
        let changed = conn.execute(&sql, rusqlite::params_from_iter(values))?;
        if changed == 0 {
            return Err(MnemonError::NotFound(format!(
                "node {:?} in table {:?}",
                id, node_type
            )));
        }
        Ok(())
    }

    fn get_node(&self, node_type: &str, id: &str) -> Result<Option<Row>> {
        Self::check_node_type(node_type)?;
        let conn = self.conn.lock();
        if !Self::node_table_exists(&conn, node_type)? {
            return Ok(None);
        }
        let rows = Self::run_query(
            &conn,
            &format!("SELECT * FROM \"{}\" WHERE id = :id", node_type),
            &[(":id".to_string(), Value::String(id.to_string()))],
        )?;
        Ok(rows.into_iter().next())
    }

    fn ensure_edge_table(
        &self,
        source_type: &str,
        predicate: &str,
        target_type: &str,
    ) -> Result<()> {
        let table = Self::edge_table(source_type, predicate, target_type)?;
        let conn = self.conn.lock();
        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS \"{}\" (
                    from_id TEXT NOT NULL,
                    to_id TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    props TEXT,
                    PRIMARY KEY (from_id, to_id)
                )",
                table
            ),
            [],
        )?;
        conn.execute(
            "INSERT OR IGNORE INTO edge_catalog (table_name, source_type, predicate, target_type)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                table,
                source_type.to_lowercase(),
                predicate.to_uppercase(),
                target_type.to_lowercase()
            ],
        )?;
        Ok(())
    }

    fn add_edge(
        &self,
        source_type: &str,
        target_type: &str,
        predicate: &str,
        from_id: &str,
        to_id: &str,
        props: Option<&Row>,
    ) -> Result<()> {
        let table = Self::edge_table(source_type, predicate, target_type)?;
        let props_json = match props {
            Some(p) if !p.is_empty() => Some(serde_json::to_string(p)?),
            _ => None,
        };
        let conn = self.conn.lock();
        conn.execute(
            &format!(
                "INSERT OR IGNORE INTO \"{}\" (from_id, to_id, created_at, props) VALUES (?1, ?2, ?3, ?4)",
                table
            ),
            params![
                from_id,
                to_id,
                chrono::Utc::now().to_rfc3339(),
                props_json
            ],
        )?;
        Ok(())
    }

    fn delete_edge(
        &self,
        source_type: &str,
        target_type: &str,
        predicate: &str,
        from_id: &str,
        to_id: &str,
    ) -> Result<()> {
        let table = Self::edge_table(source_type, predicate, target_type)?;
        let conn = self.conn.lock();
        let exists: i64 = conn.query_row(
            "SELECT COUNT(*) FROM edge_catalog WHERE table_name = ?1",
            params![table],
            |row| row.get(0),
        )?;
        if exists == 0 {
            return Ok(());
        }
        conn.execute(
            &format!("DELETE FROM \"{}\" WHERE from_id = ?1 AND to_id = ?2", table),
            params![from_id, to_id],
        )?;
        Ok(())
    }

    fn delete_node(&self, node_type: &str, id: &str) -> Result<()> {
        Self::check_node_type(node_type)?;
        let conn = self.conn.lock();
        if !Self::node_table_exists(&conn, node_type)? {
            return Ok(());
        }
        for (table, _, source_type, target_type, _) in
            Self::edge_tables_for(&conn, node_type, None, Direction::Any)?
        {
            if source_type == node_type {
                conn.execute(
                    &format!("DELETE FROM \"{}\" WHERE from_id = ?1", table),
                    params![id],
                )?;
            }
            if target_type == node_type {
                conn.execute(
                    &format!("DELETE FROM \"{}\" WHERE to_id = ?1", table),
                    params![id],
                )?;
            }
        }
        conn.execute(
            &format!("DELETE FROM \"{}\" WHERE id = ?1", node_type),
            params![id],
        )?;
        Ok(())
    }

    fn query(&self, text: &str, params: &[(String, Value)]) -> Result<Vec<Row>> {
        let conn = self.conn.lock();
        Self::run_query(&conn, text, params)
    }

    fn neighbors(
        &self,
        node_type: &str,
        node_id: &str,
        predicates: Option<&[String]>,
        direction: Direction,
        limit: usize,
        neighbor_type: Option<&str>,
    ) -> Result<Vec<NeighborRow>> {
        Self::check_node_type(node_type)?;
        let conn = self.conn.lock();
        let mut out = Vec::new();
        for (table, predicate, source_type, target_type, outgoing) in
            Self::edge_tables_for(&conn, node_type, predicates, direction)?
        {
            let other_type = if outgoing { &target_type } else { &source_type };
            if let Some(wanted) = neighbor_type {
                if !wanted.eq_ignore_ascii_case(other_type) {
                    continue;
                }
            }
            if !Self::node_table_exists(&conn, other_type)? {
                continue;
            }
            let (own_column, other_column) = if outgoing {
                ("from_id", "to_id")
            } else {
                ("to_id", "from_id")
            };
            let sql = format!(
                "SELECT n.* FROM \"{}\" e JOIN \"{}\" n ON n.id = e.{} WHERE e.{} = :id ORDER BY n.id",
                table, other_type, other_column, own_column
            );
            let rows = Self::run_query(
                &conn,
                &sql,
                &[(":id".to_string(), Value::String(node_id.to_string()))],
            )?;
            for properties in rows {
                out.push(NeighborRow {
                    properties,
                    relation_type: predicate.clone(),
                });
                if out.len() >= limit {
                    return Ok(out);
                }
            }
        }
        Ok(out)
    }

    fn select_nodes(&self, select: &NodeSelect) -> Result<Vec<Row>> {
        let conn = self.conn.lock();
        let tables: Vec<String> = match &select.node_type {
            Some(node_type) => {
                Self::check_node_type(node_type)?;
                if Self::node_table_exists(&conn, node_type)? {
                    vec![node_type.clone()]
                } else {
                    vec![]
                }
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT DISTINCT table_name FROM node_catalog ORDER BY table_name",
                )?;
                let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
                rows.collect::<std::result::Result<_, _>>()?
            }
        };
        if tables.is_empty() {
            return Ok(vec![]);
        }

        let mut selects = Vec::new();
        for table in &tables {
            let mut clause = format!(
                "SELECT id, hrid, user_id, memory_type, tags, created_at, updated_at
                 FROM \"{}\" WHERE user_id = :user_id",
                table
            );
            if select.updated_after.is_some() {
                clause.push_str(" AND updated_at >= :updated_after");
            }
            selects.push(clause);
        }
        let mut sql = selects.join(" UNION ALL ");
        sql.push_str(" ORDER BY updated_at DESC, id ASC");
        if select.limit > 0 {
            sql.push_str(&format!(" LIMIT {} OFFSET {}", select.limit, select.offset));
        }

        let mut params_vec = vec![(
            ":user_id".to_string(),
            Value::String(select.user_id.clone()),
        )];
        if let Some(cutoff) = &select.updated_after {
            params_vec.push((":updated_after".to_string(), Value::String(cutoff.clone())));
        }
        Self::run_query(&conn, &sql, &params_vec)
    }

    fn hrid_map(&self, node_type: &str, user_id: &str) -> Result<Vec<(String, String)>> {
        Self::check_node_type(node_type)?;
        let conn = self.conn.lock();
        if !Self::node_table_exists(&conn, node_type)? {
            return Ok(vec![]);
        }
        let mut stmt = conn.prepare(&format!(
            "SELECT hrid, id FROM \"{}\" WHERE user_id = ?1 AND hrid IS NOT NULL",
            node_type
        ))?;
        let rows = stmt.query_map(params![user_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn counts(&self) -> Result<(BTreeMap<String, i64>, BTreeMap<String, i64>)> {
        let conn = self.conn.lock();
        let mut nodes = BTreeMap::new();
        let mut stmt =
            conn.prepare("SELECT DISTINCT table_name FROM node_catalog ORDER BY table_name")?;
        let tables: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<_, _>>()?;
        for table in tables {
            let count: i64 =
                conn.query_row(&format!("SELECT COUNT(*) FROM \"{}\"", table), [], |row| {
                    row.get(0)
                })?;
            nodes.insert(table, count);
        }

        let mut edges = BTreeMap::new();
        let mut stmt = conn.prepare("SELECT table_name FROM edge_catalog ORDER BY table_name")?;
        let tables: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<_, _>>()?;
        for table in tables {
            let count: i64 =
                conn.query_row(&format!("SELECT COUNT(*) FROM \"{}\"", table), [], |row| {
                    row.get(0)
                })?;
            edges.insert(table, count);
        }
        Ok((nodes, edges))
    }

    fn health(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(())
    }
}
