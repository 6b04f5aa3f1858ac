//! Vector store adapter
//!
//! Collection lifecycle, point upsert, filtered cosine search, get and
//! delete. Payloads are opaque JSON objects round-tripped verbatim;
//! datetimes travel as RFC 3339 strings so range filters compare
//! lexicographically.

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags};
use serde_json::Value;

use crate::error::{MnemonError, Result};
use crate::types::{FieldFilter, FilterOp};

/// A stored point
#[derive(Debug, Clone)]
pub struct PointRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: Value,
}

/// A search hit with its cosine score
#[derive(Debug, Clone)]
pub struct ScoredPoint {
    pub id: String,
    /// Cosine similarity clamped to [0, 1]
    pub score: f32,
    /// Raw cosine distance (1 - similarity)
    pub distance: f32,
    pub payload: Value,
}

/// Operations the core requires from a vector store
pub trait VectorStore: Send + Sync {
    /// Idempotent collection creation with cosine metric
    fn ensure_collection(&self, name: &str, dim: usize) -> Result<()>;

    /// Insert or replace the point with `point_id`
    fn upsert(&self, collection: &str, point_id: &str, vector: &[f32], payload: &Value)
        -> Result<()>;

    /// Fetch one point, if present
    fn get(&self, collection: &str, point_id: &str) -> Result<Option<PointRecord>>;

    /// Remove points; missing ids are ignored
    fn delete(&self, collection: &str, point_ids: &[String]) -> Result<()>;

    /// Cosine similarity over points matching the filter conjunction,
    /// scoped to `user_id`
    fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
        user_id: &str,
        filters: &[FieldFilter],
    ) -> Result<Vec<ScoredPoint>>;

    /// Number of points in the collection
    fn count(&self, collection: &str) -> Result<i64>;

    /// Cheap liveness probe
    fn health(&self) -> Result<()>;
}

/// SQLite-backed reference implementation.
///
/// One `collections` catalog plus one `points` table; vectors are stored as
/// little-endian f32 blobs and searched brute-force after payload
/// prefiltering.
pub struct SqliteVectorStore {
    conn: Mutex<Connection>,
}

impl SqliteVectorStore {
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
            CREATE TABLE IF NOT EXISTS collections (
                name TEXT PRIMARY KEY,
                dim INTEGER NOT NULL,
                metric TEXT NOT NULL DEFAULT 'cosine'
            );
            CREATE TABLE IF NOT EXISTS points (
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                vector BLOB NOT NULL,
                payload TEXT NOT NULL,
                PRIMARY KEY (collection, id)
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

    fn collection_dim(&self, conn: &Connection, name: &str) -> Result<usize> {
        conn.query_row(
            "SELECT dim FROM collections WHERE name = ?1",
            params![name],
            |row| row.get::<_, i64>(0),
        )
        .map(|d| d as usize)
        .map_err(|_| MnemonError::Database(format!("unknown collection {:?}", name)))
    }
}

impl VectorStore for SqliteVectorStore {
    fn ensure_collection(&self, name: &str, dim: usize) -> Result<()> {
        let conn = self.conn.lock();
        let existing: Option<i64> = conn
            .query_row(
                "SELECT dim FROM collections WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .ok();
        match existing {
            Some(d) if d as usize == dim => Ok(()),
            Some(d) => Err(MnemonError::Database(format!(
                "collection {:?} exists with dim {}, requested {}",
                name, d, dim
            ))),
            None => {
                conn.execute(
                    "INSERT INTO collections (name, dim) VALUES (?1, ?2)",
                    params![name, dim as i64],
                )?;
                Ok(())
            }
        }
    }

    fn upsert(
        &self,
        collection: &str,
        point_id: &str,
        vector: &[f32],
        payload: &Value,
    ) -> Result<()> {
        let conn = self.conn.lock();
        let dim = self.collection_dim(&conn, collection)?;
        if vector.len() != dim {
            return Err(MnemonError::InvalidInput(format!(
                "vector length {} does not match collection dim {}",
                vector.len(),
                dim
            )));
        }
        conn.execute(
            "INSERT INTO points (collection, id, vector, payload) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (collection, id) DO UPDATE SET vector = excluded.vector, payload = excluded.payload",
            params![
                collection,
                point_id,
                vector_to_blob(vector),
                serde_json::to_string(payload)?
            ],
        )?;
        Ok(())
    }

    fn get(&self, collection: &str, point_id: &str) -> Result<Option<PointRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT id, vector, payload FROM points WHERE collection = ?1 AND id = ?2")?;
        let mut rows = stmt.query(params![collection, point_id])?;
        match rows.next()? {
            Some(row) => {
                let id: String = row.get(0)?;
                let blob: Vec<u8> = row.get(1)?;
                let payload: String = row.get(2)?;
                Ok(Some(PointRecord {
                    id,
                    vector: blob_to_vector(&blob),
                    payload: serde_json::from_str(&payload)?,
                }))
            }
            None => Ok(None),
        }
    }

    fn delete(&self, collection: &str, point_ids: &[String]) -> Result<()> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("DELETE FROM points WHERE collection = ?1 AND id = ?2")?;
        for id in point_ids {
            stmt.execute(params![collection, id])?;
        }
        Ok(())
    }

    fn search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
        user_id: &str,
        filters: &[FieldFilter],
    ) -> Result<Vec<ScoredPoint>> {
        let conn = self.conn.lock();
        let dim = self.collection_dim(&conn, collection)?;
        if vector.len() != dim {
            return Err(MnemonError::InvalidInput(format!(
                "query vector length {} does not match collection dim {}",
                vector.len(),
                dim
            )));
        }

        let mut stmt =
            conn.prepare("SELECT id, vector, payload FROM points WHERE collection = ?1")?;
        let candidates = stmt.query_map(params![collection], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Vec<u8>>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut scored = Vec::new();
        for candidate in candidates {
            let (id, blob, payload_text) = candidate?;
            let payload: Value = serde_json::from_str(&payload_text)?;
            if payload.get("user_id").and_then(Value::as_str) != Some(user_id) {
                continue;
            }
            if !filters.iter().all(|f| matches_filter(&payload, f)) {
                continue;
            }
            let similarity =
                crate::embedding::cosine_similarity(vector, &blob_to_vector(&blob));
            scored.push(ScoredPoint {
                id,
                score: crate::embedding::similarity_to_score(similarity),
                distance: 1.0 - similarity,
                payload,
            });
        }

        // Deterministic: score descending, id ascending on ties
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        scored.truncate(limit);
        Ok(scored)
    }

    fn count(&self, collection: &str) -> Result<i64> {
        let conn = self.conn.lock();
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM points WHERE collection = ?1",
            params![collection],
            |row| row.get(0),
        )?)
    }

    fn health(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(())
    }
}

fn vector_to_blob(vector: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(vector.len() * 4);
    for v in vector {
        blob.extend_from_slice(&v.to_le_bytes());
    }
    blob
}

fn blob_to_vector(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Resolve a filter field against the payload: top-level key first, then
/// one level into the nested entity payload.
fn lookup_field<'a>(payload: &'a Value, field: &str) -> Option<&'a Value> {
    payload
        .get(field)
        .or_else(|| payload.get("payload").and_then(|inner| inner.get(field)))
}

pub(crate) fn matches_filter(payload: &Value, filter: &FieldFilter) -> bool {
    let actual = lookup_field(payload, &filter.field);
    match &filter.op {
        FilterOp::Eq(expected) => actual.map_or(false, |v| value_matches(v, expected)),
        FilterOp::AnyOf(options) => {
            actual.map_or(false, |v| options.iter().any(|o| value_matches(v, o)))
        }
        FilterOp::Range { gt, gte, lt, lte } => {
            use std::cmp::Ordering;
            let value = match actual {
                Some(v) => v,
                None => return false,
            };
            if let Some(b) = gt {
                if compare_values(value, b) != Some(Ordering::Greater) {
                    return false;
                }
            }
            if let Some(b) = gte {
                if !matches!(
                    compare_values(value, b),
                    Some(Ordering::Greater) | Some(Ordering::Equal)
                ) {
                    return false;
                }
            }
            if let Some(b) = lt {
                if compare_values(value, b) != Some(Ordering::Less) {
                    return false;
                }
            }
            if let Some(b) = lte {
                if !matches!(
                    compare_values(value, b),
                    Some(Ordering::Less) | Some(Ordering::Equal)
                ) {
                    return false;
                }
            }
            true
        }
    }
}

/// Equality with two extensions: numbers compare numerically across
/// int/float, and an array value matches when it contains the expected
/// element (tag semantics).
fn value_matches(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Array(items), e) if !e.is_array() => {
            items.iter().any(|item| value_matches(item, e))
        }
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => a == b,
        },
        (a, b) => a == b,
    }
}

/// Order numbers numerically and strings lexicographically (RFC 3339
/// timestamps order correctly this way). Mixed types do not compare.
fn compare_values(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}
