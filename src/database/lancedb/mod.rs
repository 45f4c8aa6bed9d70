// LanceDB vector database module
// One LanceDB table per collection, one row per stored document

#[cfg(test)]
mod tests;

pub mod vector_store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::document::{EmbeddingField, EmbeddingSet, Record};
use crate::{IndexError, Result};

pub use vector_store::VectorStore;

pub(crate) const ID_COLUMN: &str = "id";
pub(crate) const VECTOR_COLUMN: &str = "vector";
pub(crate) const INDEXED_FIELD_COLUMN: &str = "indexed_field";
pub(crate) const RECORD_COLUMN: &str = "record";
pub(crate) const EMBEDDINGS_COLUMN: &str = "embeddings";
pub(crate) const STORED_AT_COLUMN: &str = "stored_at";
pub(crate) const EMBEDDING_BACKEND_COLUMN: &str = "embedding_backend";
pub(crate) const DISTANCE_COLUMN: &str = "_distance";

/// Stored for embedding sets that do not say which backend produced them
pub const UNKNOWN_BACKEND: &str = "unknown";

/// A document as persisted in a collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDocument {
    pub id: String,
    pub collection: String,
    pub record: Record,
    pub embeddings: EmbeddingSet,
    /// Field whose vector is searched
    pub indexed_field: EmbeddingField,
    /// Backend that produced the vectors; scores across backends are not comparable
    pub embedding_backend: String,
    pub stored_at: DateTime<Utc>,
}

/// One hit of a similarity search, before formatting
#[derive(Debug, Clone, PartialEq)]
pub struct RawMatch {
    pub id: String,
    pub record: Record,
    pub indexed_field: EmbeddingField,
    pub embedding_backend: String,
    pub stored_at: DateTime<Utc>,
    /// Cosine similarity in [-1, 1], higher is closer
    pub score: f32,
    /// Cosine distance as reported by LanceDB (`1 - score`)
    pub distance: f32,
}

/// Per-collection summary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionStats {
    pub name: String,
    pub documents: u64,
    pub dimension: usize,
}

/// LanceDB table names: ASCII letters, digits, `_`, `-` and `.`
#[inline]
pub fn is_valid_collection_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

#[inline]
pub fn validate_collection_name(name: &str) -> Result<()> {
    if is_valid_collection_name(name) {
        Ok(())
    } else {
        Err(IndexError::Input(format!(
            "invalid collection name {:?}: use letters, digits, '_', '-' or '.'",
            name
        )))
    }
}
