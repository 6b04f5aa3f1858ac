//! Store adapters
//!
//! Thin wrappers over the two persistence engines. The core treats both as
//! injected collaborators behind traits; the reference implementations here
//! run on bundled SQLite so the whole engine works embedded.

pub mod graph;
pub mod vector;

pub use graph::{Direction, GraphStore, NeighborRow, NodeSelect, Row, SqliteGraphStore};
pub use vector::{PointRecord, ScoredPoint, SqliteVectorStore, VectorStore};
