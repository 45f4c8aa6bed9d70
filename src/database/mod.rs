// Database module
// Vector storage behind the `VectorDatabase` trait, backed by LanceDB

pub mod lancedb;

use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::Result;
use crate::document::{EmbeddingSet, Record};

pub use self::lancedb::{
    CollectionStats, RawMatch, StoredDocument, UNKNOWN_BACKEND, VectorStore,
    is_valid_collection_name, validate_collection_name,
};

/// Persistent, collection-scoped storage with cosine similarity search.
///
/// Collections are independent namespaces created on first write. Lookups on
/// a collection that does not exist behave like lookups on an empty one.
#[async_trait]
pub trait VectorDatabase: Send + Sync {
    /// Store a record with its embeddings under a fresh id
    async fn store(
        &self,
        record: &Record,
        embeddings: &EmbeddingSet,
        collection: &str,
    ) -> Result<String>;

    /// Up to `limit` (capped at 20) closest documents, best match first
    async fn search(
        &self,
        query_vector: &[f32],
        collection: &str,
        limit: usize,
    ) -> Result<Vec<RawMatch>>;

    async fn get(&self, id: &str, collection: &str) -> Result<Option<StoredDocument>>;

    /// Remove a document; unknown ids are ignored
    async fn delete(&self, id: &str, collection: &str) -> Result<()>;

    async fn list_collections(&self) -> Result<BTreeSet<String>>;

    async fn count(&self, collection: &str) -> Result<u64>;

    /// Remove a collection and everything in it; unknown names are ignored
    async fn drop_collection(&self, collection: &str) -> Result<()>;
}
