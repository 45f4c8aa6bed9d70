// Indexer module
// Runs records through embed -> store and queries through embed -> search -> rank


use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::database::{CollectionStats, StoredDocument, VectorDatabase, VectorStore};
use crate::document::{EmbeddingField, EmbeddingSet, Record, normalize};
use crate::embeddings::Embedder;
use crate::search::{SearchHit, SearchRequest, rank};
use crate::{IndexError, Result};

/// A record after embedding, and its id when it was stored
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedRecord {
    pub record: Record,
    pub embeddings: EmbeddingSet,
    pub id: Option<String>,
    pub collection: String,
}

impl ProcessedRecord {
    #[inline]
    pub fn embedded_fields(&self) -> Vec<EmbeddingField> {
        self.embeddings.fields().collect()
    }

    /// The record with an `embeddings` object (`<field>_embedding` keys) and,
    /// once stored, a `database_id`
    #[inline]
    pub fn to_enhanced_json(&self) -> Value {
        let mut fields = self.record.as_map().clone();

        if !self.embeddings.is_empty() {
            let vectors: Map<String, Value> = self
                .embeddings
                .iter()
                .map(|(field, vector)| (format!("{}_embedding", field), Value::from(vector)))
                .collect();
            fields.insert("embeddings".to_string(), Value::Object(vectors));
        }

        if let Some(id) = &self.id {
            fields.insert("database_id".to_string(), Value::String(id.clone()));
        }

        Value::Object(fields)
    }

    /// Like [`ProcessedRecord::to_enhanced_json`] with each vector replaced
    /// by a `<N-dimensional vector>` placeholder
    #[inline]
    pub fn to_summary_json(&self) -> Value {
        let mut value = self.to_enhanced_json();

        if let Some(Value::Object(vectors)) = value.get_mut("embeddings") {
            for vector in vectors.values_mut() {
                let len = vector.as_array().map_or(0, Vec::len);
                *vector = Value::String(format!("<{}-dimensional vector>", len));
            }
        }

        value
    }
}

/// Snapshot of the pipeline for status output
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexStatus {
    pub backend: String,
    pub dimension: usize,
    pub collections: Vec<CollectionSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionSummary {
    pub name: String,
    pub documents: u64,
    pub dimension: usize,
}

impl From<CollectionStats> for CollectionSummary {
    #[inline]
    fn from(stats: CollectionStats) -> Self {
        Self {
            name: stats.name,
            documents: stats.documents,
            dimension: stats.dimension,
        }
    }
}

/// Semantic indexing pipeline over a shared embedder and vector store
pub struct Indexer {
    config: Config,
    embedder: Arc<Embedder>,
    store: Arc<VectorStore>,
}

impl Indexer {
    /// Create an indexer with the embedder and store described by `config`
    #[inline]
    pub async fn new(config: Config) -> Result<Self> {
        config
            .validate()
            .map_err(|e| IndexError::Config(e.to_string()))?;

        let store = VectorStore::new(&config).await?;
        let embedder = Embedder::new(&config.embedding);

        Ok(Self::with_parts(config, Arc::new(embedder), Arc::new(store)))
    }

    #[inline]
    pub fn with_parts(config: Config, embedder: Arc<Embedder>, store: Arc<VectorStore>) -> Self {
        Self {
            config,
            embedder,
            store,
        }
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[inline]
    pub fn embedder(&self) -> &Arc<Embedder> {
        &self.embedder
    }

    #[inline]
    pub fn store(&self) -> &Arc<VectorStore> {
        &self.store
    }

    /// Embed the record's text fields and, when `store` is set, persist it.
    ///
    /// A record with nothing to embed is still returned when not storing.
    #[inline]
    pub async fn process_record(
        &self,
        record: Record,
        collection: &str,
        store: bool,
    ) -> Result<ProcessedRecord> {
        let embedder = Arc::clone(&self.embedder);
        let (record, embeddings) = tokio::task::spawn_blocking(move || {
            let embeddings = normalize(&record, &embedder)?;
            Ok::<_, IndexError>((record, embeddings))
        })
        .await
        .map_err(|e| IndexError::Other(anyhow::anyhow!("embedding task failed: {}", e)))??;

        if embeddings.is_empty() {
            warn!("No text fields found for embedding");
        } else {
            debug!(
                "Embedded {} field(s) with {} dimensions",
                embeddings.len(),
                self.embedder.dimension()
            );
        }

        let id = if store {
            let id = self.store.store(&record, &embeddings, collection).await?;
            info!("Stored record as {} in '{}'", id, collection);
            Some(id)
        } else {
            None
        };

        Ok(ProcessedRecord {
            record,
            embeddings,
            id,
            collection: collection.to_string(),
        })
    }

    /// Parse `json` into a record and process it
    #[inline]
    pub async fn process_json(
        &self,
        json: &str,
        collection: &str,
        store: bool,
    ) -> Result<ProcessedRecord> {
        let record = Record::from_json_str(json)?;
        self.process_record(record, collection, store).await
    }

    /// Embed the query and return the closest documents, best first
    #[inline]
    pub async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchHit>> {
        request.validate()?;

        let limit = request.effective_limit();
        if limit == 0 {
            return Ok(Vec::new());
        }

        let (query_vector, query_backend) = self.embed_query(&request.query).await?;
        let matches = self
            .store
            .search(&query_vector, &request.collection, limit)
            .await?;

        let foreign = matches
            .iter()
            .filter(|m| m.embedding_backend != query_backend)
            .count();
        if foreign > 0 {
            warn!(
                "{} match(es) in '{}' were embedded by another backend than the query ({}), scores may not be comparable",
                foreign, request.collection, query_backend
            );
        }

        info!(
            "Query {:?} matched {} document(s) in '{}'",
            request.query,
            matches.len(),
            request.collection
        );
        Ok(rank(matches, self.config.search.snippet_length))
    }

    /// Search with the configured default limit and collection
    #[inline]
    pub async fn query(&self, text: &str) -> Result<Vec<SearchHit>> {
        let request = SearchRequest::new(text)
            .with_limit(self.config.search.default_limit)
            .with_collection(self.config.search.default_collection.clone());
        self.search(&request).await
    }

    #[inline]
    pub async fn list_collections(&self) -> Result<BTreeSet<String>> {
        self.store.list_collections().await
    }

    #[inline]
    pub async fn get_document(&self, id: &str, collection: &str) -> Result<StoredDocument> {
        self.store
            .get(id, collection)
            .await?
            .ok_or_else(|| IndexError::NotFound(format!("document {} in '{}'", id, collection)))
    }

    #[inline]
    pub async fn delete_document(&self, id: &str, collection: &str) -> Result<()> {
        self.store.delete(id, collection).await
    }

    #[inline]
    pub async fn drop_collection(&self, collection: &str) -> Result<()> {
        self.store.drop_collection(collection).await
    }

    /// Active backend and per-collection counts. Resolves the backend if it
    /// has not been used yet.
    #[inline]
    pub async fn status(&self) -> Result<IndexStatus> {
        let embedder = Arc::clone(&self.embedder);
        let backend = tokio::task::spawn_blocking(move || embedder.backend_name().to_string())
            .await
            .map_err(|e| IndexError::Other(anyhow::anyhow!("backend check failed: {}", e)))?;

        let collections = self
            .store
            .collection_stats()
            .await?
            .into_iter()
            .map(CollectionSummary::from)
            .collect();

        Ok(IndexStatus {
            backend,
            dimension: self.embedder.dimension(),
            collections,
        })
    }

    /// Query vector and the name of the backend that produced it
    async fn embed_query(&self, text: &str) -> Result<(Vec<f32>, String)> {
        let embedder = Arc::clone(&self.embedder);
        let text = text.to_string();
        tokio::task::spawn_blocking(move || {
            let (vector, backend) = embedder.embed_with_backend(&text);
            (vector, backend.to_string())
        })
        .await
        .map_err(|e| IndexError::Other(anyhow::anyhow!("embedding task failed: {}", e)))
    }
}
