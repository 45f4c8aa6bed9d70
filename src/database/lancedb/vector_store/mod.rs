#[cfg(test)]
mod tests;

use super::{
    CollectionStats, DISTANCE_COLUMN, EMBEDDING_BACKEND_COLUMN, EMBEDDINGS_COLUMN, ID_COLUMN,
    INDEXED_FIELD_COLUMN, RECORD_COLUMN, RawMatch, STORED_AT_COLUMN, StoredDocument,
    UNKNOWN_BACKEND, VECTOR_COLUMN, validate_collection_name,
};
use crate::config::{Config, MAX_SEARCH_LIMIT};
use crate::database::VectorDatabase;
use crate::document::{EmbeddingField, EmbeddingSet, Record};
use crate::{IndexError, Result};
use arrow::array::{
    Array, FixedSizeListArray, Float32Array, Int64Array, RecordBatchIterator, StringArray,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use lancedb::{
    Connection, DistanceType, Table,
    query::{ExecutableQuery, QueryBase, Select},
};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Vector database store using LanceDB for similarity search
pub struct VectorStore {
    connection: Connection,
    path: PathBuf,
    /// Serializes collection creation so concurrent first writes agree on one table
    create_lock: Mutex<()>,
}

impl VectorStore {
    /// Open the store under the configured base directory
    #[inline]
    pub async fn new(config: &Config) -> Result<Self> {
        Self::open(config.vector_database_path()).await
    }

    /// Open (creating if needed) the store at `db_path`
    #[inline]
    pub async fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        debug!("Initializing LanceDB at path: {:?}", db_path);

        std::fs::create_dir_all(&db_path)
            .map_err(|e| store_error("Failed to create vector database directory", e))?;

        let uri = format!("file://{}", db_path.display());
        let connection = lancedb::connect(&uri)
            .execute()
            .await
            .map_err(|e| store_error("Failed to connect to LanceDB", e))?;

        info!("Vector store opened at {:?}", db_path);
        Ok(Self {
            connection,
            path: db_path,
            create_lock: Mutex::new(()),
        })
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Name, size and vector dimension of every collection
    #[inline]
    pub async fn collection_stats(&self) -> Result<Vec<CollectionStats>> {
        let mut stats = Vec::new();

        for name in self.list_collections().await? {
            let table = self.open_table(&name).await?;
            let documents = table
                .count_rows(None)
                .await
                .map_err(|e| store_error("Failed to count rows", e))?;
            let dimension = vector_dimension(&table).await?;

            stats.push(CollectionStats {
                name,
                documents: documents as u64,
                dimension,
            });
        }

        Ok(stats)
    }

    /// Check that every collection opens, has a usable vector column and can
    /// be counted. Problems are logged and reported as `false`.
    #[inline]
    pub async fn validate_integrity(&self) -> Result<bool> {
        debug!("Validating database integrity");

        let names = match self.list_collections().await {
            Ok(names) => names,
            Err(e) => {
                error!("Failed to list collections during integrity check: {}", e);
                return Ok(false);
            }
        };

        let mut healthy = true;
        for name in &names {
            let table = match self.open_table(name).await {
                Ok(table) => table,
                Err(e) => {
                    error!("Failed to open collection '{}': {}", name, e);
                    healthy = false;
                    continue;
                }
            };

            if let Err(e) = vector_dimension(&table).await {
                error!("Collection '{}' has an invalid schema: {}", name, e);
                healthy = false;
                continue;
            }

            match table.count_rows(None).await {
                Ok(count) => debug!("Collection '{}' passed, {} rows", name, count),
                Err(e) => {
                    error!("Failed to count rows in '{}': {}", name, e);
                    healthy = false;
                }
            }
        }

        if healthy {
            info!("Integrity check passed for {} collection(s)", names.len());
        }
        Ok(healthy)
    }

    async fn open_table(&self, name: &str) -> Result<Table> {
        self.connection
            .open_table(name)
            .execute()
            .await
            .map_err(|e| store_error(&format!("Failed to open collection '{}'", name), e))
    }

    /// Open a collection, `None` if it was never created
    async fn find_collection(&self, name: &str) -> Result<Option<Table>> {
        match self.connection.open_table(name).execute().await {
            Ok(table) => Ok(Some(table)),
            Err(lancedb::Error::TableNotFound { .. }) => Ok(None),
            Err(e) => Err(store_error(
                &format!("Failed to open collection '{}'", name),
                e,
            )),
        }
    }

    /// Open the collection, creating it with `dimension`-wide vectors if absent
    async fn ensure_collection(&self, name: &str, dimension: usize) -> Result<Table> {
        let _guard = self.create_lock.lock().await;

        if let Some(table) = self.find_collection(name).await? {
            return Ok(table);
        }

        info!(
            "Creating collection '{}' with {} dimensions",
            name, dimension
        );
        match self
            .connection
            .create_empty_table(name, document_schema(dimension)?)
            .execute()
            .await
        {
            Ok(table) => Ok(table),
            // Another process created it first
            Err(lancedb::Error::TableAlreadyExists { .. }) => self.open_table(name).await,
            Err(e) => Err(store_error(
                &format!("Failed to create collection '{}'", name),
                e,
            )),
        }
    }

    /// Parse the rows of a similarity search
    async fn collect_matches(
        mut results: lancedb::arrow::SendableRecordBatchStream,
    ) -> Result<Vec<RawMatch>> {
        let mut matches = Vec::new();

        while let Some(batch) = results
            .try_next()
            .await
            .map_err(|e| store_error("Failed to read result stream", e))?
        {
            matches.extend(matches_from_batch(&batch)?);
        }

        Ok(matches)
    }

    /// Parse full documents from a plain (non-vector) query
    async fn collect_documents(
        mut results: lancedb::arrow::SendableRecordBatchStream,
        collection: &str,
    ) -> Result<Vec<StoredDocument>> {
        let mut documents = Vec::new();

        while let Some(batch) = results
            .try_next()
            .await
            .map_err(|e| store_error("Failed to read result stream", e))?
        {
            let ids = string_column(&batch, ID_COLUMN)?;
            let fields = string_column(&batch, INDEXED_FIELD_COLUMN)?;
            let records = string_column(&batch, RECORD_COLUMN)?;
            let embeddings = string_column(&batch, EMBEDDINGS_COLUMN)?;
            let backends = string_column(&batch, EMBEDDING_BACKEND_COLUMN)?;
            let stored_ats = int64_column(&batch, STORED_AT_COLUMN)?;

            for row in 0..batch.num_rows() {
                let embedding_set: EmbeddingSet = serde_json::from_str(embeddings.value(row))
                    .map_err(|e| store_error("Corrupt embeddings column", e))?;

                documents.push(StoredDocument {
                    id: ids.value(row).to_string(),
                    collection: collection.to_string(),
                    record: parse_record(records.value(row))?,
                    embeddings: embedding_set,
                    indexed_field: parse_field(fields.value(row))?,
                    embedding_backend: backends.value(row).to_string(),
                    stored_at: parse_timestamp(stored_ats.value(row))?,
                });
            }
        }

        Ok(documents)
    }
}

#[async_trait]
impl VectorDatabase for VectorStore {
    #[inline]
    async fn store(
        &self,
        record: &Record,
        embeddings: &EmbeddingSet,
        collection: &str,
    ) -> Result<String> {
        validate_collection_name(collection)?;

        let (indexed_field, vector) = embeddings.search_vector().ok_or_else(|| {
            IndexError::Input(
                "record has no title, description or content to embed".to_string(),
            )
        })?;
        let dimension = vector.len();

        let table = self.ensure_collection(collection, dimension).await?;
        let expected = vector_dimension(&table).await?;
        if expected != dimension {
            return Err(IndexError::DimensionMismatch {
                expected,
                actual: dimension,
            });
        }

        let id = Uuid::new_v4().to_string();
        let row = DocumentRow {
            id: &id,
            vector,
            indexed_field,
            record: serde_json::to_string(record)?,
            embeddings: serde_json::to_string(embeddings)?,
            embedding_backend: embeddings.backend().unwrap_or(UNKNOWN_BACKEND),
            stored_at: Utc::now(),
        };
        let batch = row.into_batch(dimension)?;

        // A single batch is a single commit: readers see all of it or none
        let schema = batch.schema();
        let reader = RecordBatchIterator::new(std::iter::once(Ok(batch)), schema);
        table
            .add(reader)
            .execute()
            .await
            .map_err(|e| store_error("Failed to insert document", e))?;

        info!(
            "Stored document {} in collection '{}' (indexed field: {})",
            id, collection, indexed_field
        );
        Ok(id)
    }

    #[inline]
    async fn search(
        &self,
        query_vector: &[f32],
        collection: &str,
        limit: usize,
    ) -> Result<Vec<RawMatch>> {
        validate_collection_name(collection)?;

        let limit = limit.min(MAX_SEARCH_LIMIT);
        debug!(
            "Searching collection '{}' with limit: {}",
            collection, limit
        );
        if limit == 0 {
            return Ok(Vec::new());
        }

        let Some(table) = self.find_collection(collection).await? else {
            debug!("Collection '{}' does not exist", collection);
            return Ok(Vec::new());
        };

        let rows = table
            .count_rows(None)
            .await
            .map_err(|e| store_error("Failed to count rows", e))?;
        if rows == 0 {
            return Ok(Vec::new());
        }

        let expected = vector_dimension(&table).await?;
        if query_vector.len() != expected {
            return Err(IndexError::DimensionMismatch {
                expected,
                actual: query_vector.len(),
            });
        }

        // Rank every row so equal scores can be ordered deterministically below
        let results = table
            .vector_search(query_vector)
            .map_err(|e| store_error("Failed to create vector search", e))?
            .column(VECTOR_COLUMN)
            .distance_type(DistanceType::Cosine)
            .select(Select::columns(&[
                ID_COLUMN,
                INDEXED_FIELD_COLUMN,
                RECORD_COLUMN,
                EMBEDDING_BACKEND_COLUMN,
                STORED_AT_COLUMN,
            ]))
            .limit(rows)
            .execute()
            .await
            .map_err(|e| store_error("Failed to execute search", e))?;

        let mut matches = Self::collect_matches(results).await?;
        matches.sort_by(rank_order);
        matches.truncate(limit);

        debug!("Found {} matches in '{}'", matches.len(), collection);
        Ok(matches)
    }

    #[inline]
    async fn get(&self, id: &str, collection: &str) -> Result<Option<StoredDocument>> {
        validate_collection_name(collection)?;

        let Some(table) = self.find_collection(collection).await? else {
            return Ok(None);
        };

        let results = table
            .query()
            .only_if(id_predicate(id))
            .limit(1)
            .execute()
            .await
            .map_err(|e| store_error("Failed to query document", e))?;

        let documents = Self::collect_documents(results, collection).await?;
        Ok(documents.into_iter().next())
    }

    #[inline]
    async fn delete(&self, id: &str, collection: &str) -> Result<()> {
        validate_collection_name(collection)?;

        let Some(table) = self.find_collection(collection).await? else {
            debug!(
                "Collection '{}' does not exist, nothing to delete",
                collection
            );
            return Ok(());
        };

        table
            .delete(&id_predicate(id))
            .await
            .map_err(|e| store_error("Failed to delete document", e))?;

        info!("Deleted document {} from collection '{}'", id, collection);
        Ok(())
    }

    #[inline]
    async fn list_collections(&self) -> Result<BTreeSet<String>> {
        let names = self
            .connection
            .table_names()
            .execute()
            .await
            .map_err(|e| store_error("Failed to list collections", e))?;

        Ok(names.into_iter().collect())
    }

    #[inline]
    async fn count(&self, collection: &str) -> Result<u64> {
        validate_collection_name(collection)?;

        match self.find_collection(collection).await? {
            Some(table) => table
                .count_rows(None)
                .await
                .map(|n| n as u64)
                .map_err(|e| store_error("Failed to count rows", e)),
            None => Ok(0),
        }
    }

    #[inline]
    async fn drop_collection(&self, collection: &str) -> Result<()> {
        validate_collection_name(collection)?;

        let _guard = self.create_lock.lock().await;
        if !self.list_collections().await?.contains(collection) {
            debug!("Collection '{}' does not exist, nothing to drop", collection);
            return Ok(());
        }

        self.connection
            .drop_table(collection)
            .await
            .map_err(|e| store_error(&format!("Failed to drop collection '{}'", collection), e))?;

        info!("Dropped collection '{}'", collection);
        Ok(())
    }
}

/// Columns of one document row before conversion to Arrow
struct DocumentRow<'a> {
    id: &'a str,
    vector: &'a [f32],
    indexed_field: EmbeddingField,
    record: String,
    embeddings: String,
    embedding_backend: &'a str,
    stored_at: DateTime<Utc>,
}

impl DocumentRow<'_> {
    fn into_batch(self, dimension: usize) -> Result<RecordBatch> {
        let item = Arc::new(Field::new("item", DataType::Float32, false));
        let values = Float32Array::from(self.vector.to_vec());
        let vector_array =
            FixedSizeListArray::try_new(item, arrow_dimension(dimension)?, Arc::new(values), None)
                .map_err(|e| store_error("Failed to create vector array", e))?;

        let arrays: Vec<Arc<dyn Array>> = vec![
            Arc::new(StringArray::from(vec![self.id])),
            Arc::new(vector_array),
            Arc::new(StringArray::from(vec![self.indexed_field.as_str()])),
            Arc::new(StringArray::from(vec![self.record])),
            Arc::new(StringArray::from(vec![self.embeddings])),
            Arc::new(StringArray::from(vec![self.embedding_backend])),
            Arc::new(Int64Array::from(vec![self.stored_at.timestamp_micros()])),
        ];

        RecordBatch::try_new(document_schema(dimension)?, arrays)
            .map_err(|e| store_error("Failed to create record batch", e))
    }
}

/// Schema shared by every collection table
fn document_schema(dimension: usize) -> Result<Arc<Schema>> {
    let width = arrow_dimension(dimension)?;

    Ok(Arc::new(Schema::new(vec![
        Field::new(ID_COLUMN, DataType::Utf8, false),
        Field::new(
            VECTOR_COLUMN,
            DataType::FixedSizeList(
                Arc::new(Field::new("item", DataType::Float32, false)),
                width,
            ),
            false,
        ),
        Field::new(INDEXED_FIELD_COLUMN, DataType::Utf8, false),
        Field::new(RECORD_COLUMN, DataType::Utf8, false),
        Field::new(EMBEDDINGS_COLUMN, DataType::Utf8, false),
        Field::new(EMBEDDING_BACKEND_COLUMN, DataType::Utf8, false),
        Field::new(STORED_AT_COLUMN, DataType::Int64, false),
    ])))
}

/// Vector width of an existing collection, read from its schema
async fn vector_dimension(table: &Table) -> Result<usize> {
    let schema = table
        .schema()
        .await
        .map_err(|e| store_error("Failed to get table schema", e))?;

    let field = schema
        .field_with_name(VECTOR_COLUMN)
        .map_err(|e| store_error("Collection has no vector column", e))?;

    match field.data_type() {
        DataType::FixedSizeList(_, size) => usize::try_from(*size)
            .map_err(|e| store_error("Invalid vector column width", e)),
        other => Err(IndexError::StoreUnavailable(format!(
            "vector column has unexpected type {}",
            other
        ))),
    }
}

/// Rows of one similarity-search batch; every row must carry a distance
fn matches_from_batch(batch: &RecordBatch) -> Result<Vec<RawMatch>> {
    let ids = string_column(batch, ID_COLUMN)?;
    let fields = string_column(batch, INDEXED_FIELD_COLUMN)?;
    let records = string_column(batch, RECORD_COLUMN)?;
    let backends = string_column(batch, EMBEDDING_BACKEND_COLUMN)?;
    let stored_ats = int64_column(batch, STORED_AT_COLUMN)?;
    let distances = float32_column(batch, DISTANCE_COLUMN)?;

    (0..batch.num_rows())
        .map(|row| {
            if distances.is_null(row) {
                return Err(IndexError::StoreUnavailable(format!(
                    "Null {} in search results",
                    DISTANCE_COLUMN
                )));
            }
            let distance = distances.value(row);

            Ok(RawMatch {
                id: ids.value(row).to_string(),
                record: parse_record(records.value(row))?,
                indexed_field: parse_field(fields.value(row))?,
                embedding_backend: backends.value(row).to_string(),
                stored_at: parse_timestamp(stored_ats.value(row))?,
                score: (1.0 - distance).clamp(-1.0, 1.0),
                distance,
            })
        })
        .collect()
}

/// Best first, then oldest first, then by id
fn rank_order(a: &RawMatch, b: &RawMatch) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.stored_at.cmp(&b.stored_at))
        .then_with(|| a.id.cmp(&b.id))
}

fn id_predicate(id: &str) -> String {
    format!("{} = '{}'", ID_COLUMN, id.replace('\'', "''"))
}

fn arrow_dimension(dimension: usize) -> Result<i32> {
    i32::try_from(dimension)
        .map_err(|_| IndexError::Input(format!("vector dimension {} is too large", dimension)))
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .ok_or_else(|| IndexError::StoreUnavailable(format!("Missing {} column", name)))?
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| IndexError::StoreUnavailable(format!("Invalid {} column type", name)))
}

fn int64_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a Int64Array> {
    batch
        .column_by_name(name)
        .ok_or_else(|| IndexError::StoreUnavailable(format!("Missing {} column", name)))?
        .as_any()
        .downcast_ref::<Int64Array>()
        .ok_or_else(|| IndexError::StoreUnavailable(format!("Invalid {} column type", name)))
}

fn float32_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a Float32Array> {
    batch
        .column_by_name(name)
        .ok_or_else(|| IndexError::StoreUnavailable(format!("Missing {} column", name)))?
        .as_any()
        .downcast_ref::<Float32Array>()
        .ok_or_else(|| IndexError::StoreUnavailable(format!("Invalid {} column type", name)))
}

fn parse_record(json: &str) -> Result<Record> {
    Record::from_json_str(json).map_err(|e| store_error("Corrupt record column", e))
}

fn parse_field(name: &str) -> Result<EmbeddingField> {
    EmbeddingField::parse(name).ok_or_else(|| {
        IndexError::StoreUnavailable(format!("Unknown indexed field '{}'", name))
    })
}

fn parse_timestamp(micros: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros).ok_or_else(|| {
        warn!("Stored timestamp {} is out of range", micros);
        IndexError::StoreUnavailable(format!("Invalid stored_at value {}", micros))
    })
}

fn store_error(context: &str, error: impl Display) -> IndexError {
    IndexError::StoreUnavailable(format!("{}: {}", context, error))
}
