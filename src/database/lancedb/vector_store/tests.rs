use super::*;
use crate::document::normalize;
use crate::embeddings::Embedder;
use serde_json::json;
use tempfile::TempDir;

const DIMENSION: usize = 32;

async fn create_test_store() -> (VectorStore, TempDir) {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config = Config::with_base_dir(temp_dir.path());
    let store = VectorStore::new(&config)
        .await
        .expect("should create vector store");
    (store, temp_dir)
}

fn page(title: &str, content: &str) -> Record {
    Record::new()
        .with_field("title", title)
        .with_field("url", format!("https://example.com/{}", title.to_lowercase()))
        .with_field("content", content)
}

fn embed(record: &Record) -> EmbeddingSet {
    normalize(record, &Embedder::mock(DIMENSION)).expect("should normalize record")
}

async fn store_page(store: &VectorStore, title: &str, content: &str, collection: &str) -> String {
    let record = page(title, content);
    store
        .store(&record, &embed(&record), collection)
        .await
        .expect("should store document")
}

fn query_vector(text: &str) -> Vec<f32> {
    Embedder::mock(DIMENSION).embed(text)
}

#[tokio::test]
async fn vector_store_initialization() {
    let (store, temp_dir) = create_test_store().await;

    assert!(store.path().starts_with(temp_dir.path()));
    assert!(store.path().exists());
    assert!(
        store
            .list_collections()
            .await
            .expect("should list collections")
            .is_empty()
    );
}

#[tokio::test]
async fn store_creates_collection_and_returns_unique_ids() {
    let (store, _temp_dir) = create_test_store().await;

    let first = store_page(&store, "Rust", "Ownership and borrowing", "docs").await;
    let second = store_page(&store, "Rust", "Ownership and borrowing", "docs").await;

    assert_ne!(first, second, "duplicates should get distinct ids");
    assert!(Uuid::parse_str(&first).is_ok());
    assert_eq!(store.count("docs").await.expect("should count"), 2);
}

#[tokio::test]
async fn store_rejects_empty_embedding_set() {
    let (store, _temp_dir) = create_test_store().await;
    let record = Record::new().with_field("url", "https://example.com");

    let result = store.store(&record, &EmbeddingSet::new(), "docs").await;

    assert!(matches!(result, Err(IndexError::Input(_))));
    assert!(
        !store
            .list_collections()
            .await
            .expect("should list collections")
            .contains("docs"),
        "a rejected store should not create the collection"
    );
}

#[tokio::test]
async fn store_rejects_dimension_mismatch() {
    let (store, _temp_dir) = create_test_store().await;
    store_page(&store, "Wide", "thirty two dimensions", "docs").await;

    let record = page("Narrow", "sixteen dimensions");
    let narrow = normalize(&record, &Embedder::mock(16)).expect("should normalize record");
    let result = store.store(&record, &narrow, "docs").await;

    match result {
        Err(IndexError::DimensionMismatch { expected, actual }) => {
            assert_eq!(expected, DIMENSION);
            assert_eq!(actual, 16);
        }
        other => panic!("expected dimension mismatch, got {:?}", other),
    }
    assert_eq!(store.count("docs").await.expect("should count"), 1);
}

#[tokio::test]
async fn search_returns_stored_document_first() {
    let (store, _temp_dir) = create_test_store().await;
    store_page(&store, "Cats", "Cats are small furry pets that purr", "docs").await;
    let target = store_page(&store, "Rust", "Rust is a systems programming language", "docs").await;
    store_page(&store, "Bread", "Knead the dough and let it rise", "docs").await;

    let matches = store
        .search(
            &query_vector("Rust is a systems programming language"),
            "docs",
            3,
        )
        .await
        .expect("should search");

    assert_eq!(matches.len(), 3);
    assert_eq!(matches[0].id, target);
    assert!((matches[0].score - 1.0).abs() < 1e-4, "score {}", matches[0].score);
    assert!((matches[0].score + matches[0].distance - 1.0).abs() < 1e-6);
    assert_eq!(matches[0].indexed_field, EmbeddingField::Content);
    for pair in matches.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
}

#[tokio::test]
async fn search_unknown_or_empty_collection_is_empty() {
    let (store, _temp_dir) = create_test_store().await;

    let unknown = store
        .search(&query_vector("anything"), "missing", 5)
        .await
        .expect("should search unknown collection");
    assert!(unknown.is_empty());

    let id = store_page(&store, "Only", "the only document", "docs").await;
    store.delete(&id, "docs").await.expect("should delete");

    let emptied = store
        .search(&query_vector("the only document"), "docs", 5)
        .await
        .expect("should search empty collection");
    assert!(emptied.is_empty());
}

#[tokio::test]
async fn search_limit_is_clamped() {
    let (store, _temp_dir) = create_test_store().await;
    for i in 0..22 {
        store_page(&store, &format!("Page{}", i), &format!("page number {}", i), "docs").await;
    }

    let capped = store
        .search(&query_vector("page number"), "docs", 100)
        .await
        .expect("should search");
    assert_eq!(capped.len(), MAX_SEARCH_LIMIT);

    let zero = store
        .search(&query_vector("page number"), "docs", 0)
        .await
        .expect("should search");
    assert!(zero.is_empty());

    let two = store
        .search(&query_vector("page number"), "docs", 2)
        .await
        .expect("should search");
    assert_eq!(two.len(), 2);
}

#[tokio::test]
async fn equal_scores_are_ordered_by_insertion() {
    let (store, _temp_dir) = create_test_store().await;
    let first = store_page(&store, "Same", "identical content", "docs").await;
    let second = store_page(&store, "Same", "identical content", "docs").await;
    let third = store_page(&store, "Same", "identical content", "docs").await;

    for _ in 0..3 {
        let matches = store
            .search(&query_vector("identical content"), "docs", 5)
            .await
            .expect("should search");
        let ids: Vec<&str> = matches.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec![first.as_str(), second.as_str(), third.as_str()]);
    }
}

#[tokio::test]
async fn search_rejects_query_dimension_mismatch() {
    let (store, _temp_dir) = create_test_store().await;
    store_page(&store, "Doc", "some content", "docs").await;

    let result = store.search(&[0.5_f32; 8], "docs", 5).await;

    assert!(matches!(
        result,
        Err(IndexError::DimensionMismatch {
            expected: DIMENSION,
            actual: 8
        })
    ));
}

#[tokio::test]
async fn collections_do_not_cross_match() {
    let (store, _temp_dir) = create_test_store().await;
    let a = store_page(&store, "Alpha", "shared words here", "a").await;
    let b = store_page(&store, "Beta", "shared words here", "b").await;

    let in_a = store
        .search(&query_vector("shared words here"), "a", 5)
        .await
        .expect("should search");
    let in_b = store
        .search(&query_vector("shared words here"), "b", 5)
        .await
        .expect("should search");

    assert_eq!(in_a.len(), 1);
    assert_eq!(in_a[0].id, a);
    assert_eq!(in_b.len(), 1);
    assert_eq!(in_b[0].id, b);

    let names = store.list_collections().await.expect("should list");
    assert_eq!(
        names,
        BTreeSet::from(["a".to_string(), "b".to_string()])
    );
}

#[tokio::test]
async fn get_round_trips_record_and_embeddings() {
    let (store, _temp_dir) = create_test_store().await;
    let record = Record::from_value(json!({
        "title": "Round trip",
        "url": "https://example.com/round-trip",
        "description": null,
        "content": "Everything comes back",
        "tags": ["a", "b"],
        "depth": 3
    }))
    .expect("should build record");
    let embeddings = embed(&record);

    let id = store
        .store(&record, &embeddings, "docs")
        .await
        .expect("should store");
    let stored = store
        .get(&id, "docs")
        .await
        .expect("should get")
        .expect("document should exist");

    assert_eq!(stored.id, id);
    assert_eq!(stored.collection, "docs");
    assert_eq!(stored.record, record);
    assert_eq!(stored.embeddings, embeddings);
    assert_eq!(stored.indexed_field, EmbeddingField::Content);
    assert_eq!(stored.embedding_backend, "hash");
    assert!(stored.stored_at <= Utc::now());
}

#[tokio::test]
async fn search_reports_embedding_backend_per_row() {
    let (store, _temp_dir) = create_test_store().await;
    let record = page("Model", "embedded by the real model");
    let mut from_model = EmbeddingSet::new();
    from_model
        .insert_from(
            EmbeddingField::Content,
            query_vector("embedded by the real model"),
            "ollama",
        )
        .expect("should insert vector");
    let mut untagged = EmbeddingSet::new();
    untagged
        .insert(EmbeddingField::Content, query_vector("no provenance"))
        .expect("should insert vector");

    let tagged_id = store
        .store(&record, &from_model, "docs")
        .await
        .expect("should store");
    let untagged_id = store
        .store(&record, &untagged, "docs")
        .await
        .expect("should store");
    let hashed_id = store_page(&store, "Hashed", "embedded locally", "docs").await;

    let matches = store
        .search(&query_vector("embedded"), "docs", 5)
        .await
        .expect("should search");
    let backend_of = |id: &str| {
        matches
            .iter()
            .find(|m| m.id == id)
            .map(|m| m.embedding_backend.clone())
            .expect("document should match")
    };

    assert_eq!(backend_of(&tagged_id), "ollama");
    assert_eq!(backend_of(&untagged_id), UNKNOWN_BACKEND);
    assert_eq!(backend_of(&hashed_id), "hash");
}

#[tokio::test]
async fn get_missing_document_is_none() {
    let (store, _temp_dir) = create_test_store().await;
    store_page(&store, "Doc", "content", "docs").await;

    assert!(
        store
            .get("no-such-id", "docs")
            .await
            .expect("should get")
            .is_none()
    );
    assert!(
        store
            .get("no-such-id", "missing")
            .await
            .expect("should get")
            .is_none()
    );
    assert!(
        store
            .get("it's quoted", "docs")
            .await
            .expect("quotes in ids should be escaped")
            .is_none()
    );
}

#[tokio::test]
async fn delete_is_idempotent() {
    let (store, _temp_dir) = create_test_store().await;
    let keep = store_page(&store, "Keep", "stays around", "docs").await;
    let gone = store_page(&store, "Gone", "goes away", "docs").await;

    store.delete(&gone, "docs").await.expect("should delete");
    store
        .delete(&gone, "docs")
        .await
        .expect("second delete should be a no-op");
    store
        .delete("unknown", "missing")
        .await
        .expect("unknown collection should be a no-op");

    let matches = store
        .search(&query_vector("goes away"), "docs", 5)
        .await
        .expect("should search");
    assert!(matches.iter().all(|m| m.id != gone));
    assert!(matches.iter().any(|m| m.id == keep));
    assert!(store.get(&gone, "docs").await.expect("should get").is_none());
}

#[tokio::test]
async fn documents_persist_across_reopen() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let path = temp_dir.path().join("vectors");

    let id = {
        let store = VectorStore::open(&path).await.expect("should open store");
        store_page(&store, "Durable", "written to disk", "docs").await
    };

    let reopened = VectorStore::open(&path).await.expect("should reopen store");
    let stored = reopened
        .get(&id, "docs")
        .await
        .expect("should get")
        .expect("document should survive reopen");
    assert_eq!(stored.record.title(), Some("Durable"));
    assert!(path.join("docs.lance").exists());
}

#[tokio::test]
async fn concurrent_stores_share_one_collection() {
    let (store, _temp_dir) = create_test_store().await;
    let store = Arc::new(store);

    let mut handles = Vec::new();
    for i in 0..4 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            let record = page(&format!("Page{}", i), &format!("concurrent write {}", i));
            store.store(&record, &embed(&record), "shared").await
        }));
    }

    let mut ids = BTreeSet::new();
    for handle in handles {
        let id = handle
            .await
            .expect("task should not panic")
            .expect("should store");
        ids.insert(id);
    }

    assert_eq!(ids.len(), 4);
    assert_eq!(store.count("shared").await.expect("should count"), 4);
}

#[tokio::test]
async fn invalid_collection_names_are_rejected() {
    let (store, _temp_dir) = create_test_store().await;
    let record = page("Doc", "content");

    for name in ["", "has space", "slash/name", "quote'name"] {
        let result = store.store(&record, &embed(&record), name).await;
        assert!(
            matches!(result, Err(IndexError::Input(_))),
            "{:?} should be rejected",
            name
        );
        assert!(store.search(&query_vector("x"), name, 5).await.is_err());
    }
}

#[tokio::test]
async fn drop_collection_removes_documents() {
    let (store, _temp_dir) = create_test_store().await;
    store_page(&store, "Doc", "content", "docs").await;
    store_page(&store, "Other", "content", "other").await;

    store
        .drop_collection("docs")
        .await
        .expect("should drop collection");
    store
        .drop_collection("docs")
        .await
        .expect("dropping twice should be a no-op");

    let names = store.list_collections().await.expect("should list");
    assert_eq!(names, BTreeSet::from(["other".to_string()]));
    assert_eq!(store.count("docs").await.expect("should count"), 0);
}

#[tokio::test]
async fn collection_stats_and_integrity() {
    let (store, _temp_dir) = create_test_store().await;
    store_page(&store, "One", "first", "docs").await;
    store_page(&store, "Two", "second", "docs").await;

    let stats = store.collection_stats().await.expect("should get stats");
    assert_eq!(
        stats,
        vec![CollectionStats {
            name: "docs".to_string(),
            documents: 2,
            dimension: DIMENSION,
        }]
    );

    assert!(
        store
            .validate_integrity()
            .await
            .expect("should validate integrity")
    );
}

#[test]
fn rank_order_breaks_ties_by_time_then_id() {
    let base = Utc::now();
    let hit = |id: &str, score: f32, offset: i64| RawMatch {
        id: id.to_string(),
        record: Record::new(),
        indexed_field: EmbeddingField::Content,
        embedding_backend: "hash".to_string(),
        stored_at: base + chrono::Duration::microseconds(offset),
        score,
        distance: 1.0 - score,
    };

    let mut matches = vec![
        hit("c", 0.5, 0),
        hit("b", 0.5, 0),
        hit("a", 0.5, 1),
        hit("z", 0.9, 5),
    ];
    matches.sort_by(rank_order);

    let ids: Vec<&str> = matches.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["z", "b", "c", "a"]);
}

#[test]
fn id_predicate_escapes_quotes() {
    assert_eq!(id_predicate("abc"), "id = 'abc'");
    assert_eq!(id_predicate("it's"), "id = 'it''s'");
}

#[test]
fn document_schema_has_fixed_width_vectors() {
    let schema = document_schema(DIMENSION).expect("should build schema");

    match schema
        .field_with_name(VECTOR_COLUMN)
        .expect("should have vector column")
        .data_type()
    {
        DataType::FixedSizeList(_, size) => assert_eq!(*size, DIMENSION as i32),
        other => panic!("unexpected vector type {:?}", other),
    }
    assert_eq!(schema.fields().len(), 7);
}

/// A search batch as LanceDB returns it: only the selected columns plus `_distance`
fn search_batch(distance: Option<Arc<dyn Array>>) -> RecordBatch {
    let mut fields = vec![
        Field::new(ID_COLUMN, DataType::Utf8, false),
        Field::new(INDEXED_FIELD_COLUMN, DataType::Utf8, false),
        Field::new(RECORD_COLUMN, DataType::Utf8, false),
        Field::new(EMBEDDING_BACKEND_COLUMN, DataType::Utf8, false),
        Field::new(STORED_AT_COLUMN, DataType::Int64, false),
    ];
    let mut arrays: Vec<Arc<dyn Array>> = vec![
        Arc::new(StringArray::from(vec!["doc-1"])),
        Arc::new(StringArray::from(vec!["content"])),
        Arc::new(StringArray::from(vec![r#"{"title":"Doc"}"#])),
        Arc::new(StringArray::from(vec!["ollama"])),
        Arc::new(Int64Array::from(vec![Utc::now().timestamp_micros()])),
    ];
    if let Some(distance) = distance {
        fields.push(Field::new(DISTANCE_COLUMN, DataType::Float32, true));
        arrays.push(distance);
    }

    RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays).expect("should build batch")
}

#[test]
fn matches_parse_from_selected_columns() {
    let batch = search_batch(Some(Arc::new(Float32Array::from(vec![0.25_f32]))));

    let matches = matches_from_batch(&batch).expect("should parse matches");

    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].id, "doc-1");
    assert_eq!(matches[0].record.title(), Some("Doc"));
    assert_eq!(matches[0].indexed_field, EmbeddingField::Content);
    assert_eq!(matches[0].embedding_backend, "ollama");
    assert!((matches[0].score - 0.75).abs() < 1e-6);
    assert!((matches[0].distance - 0.25).abs() < 1e-6);
}

#[test]
fn matches_without_distance_are_rejected() {
    let missing = matches_from_batch(&search_batch(None));
    assert!(
        matches!(missing, Err(IndexError::StoreUnavailable(ref msg)) if msg.contains(DISTANCE_COLUMN)),
        "got {:?}",
        missing
    );

    let null = matches_from_batch(&search_batch(Some(Arc::new(Float32Array::from(vec![
        None::<f32>,
    ])))));
    assert!(matches!(null, Err(IndexError::StoreUnavailable(_))));

    let wrong_type = matches_from_batch(&search_batch(Some(Arc::new(Int64Array::from(vec![
        1_i64,
    ])))));
    assert!(matches!(wrong_type, Err(IndexError::StoreUnavailable(_))));
}
