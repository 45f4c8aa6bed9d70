use super::*;

#[test]
fn accepts_table_style_names() {
    for name in ["scraped_content", "a", "docs-2024", "v1.2", "ABC_def-9.x"] {
        assert!(is_valid_collection_name(name), "{:?} should be valid", name);
        assert!(validate_collection_name(name).is_ok());
    }
}

#[test]
fn rejects_other_names() {
    for name in ["", "with space", "slash/name", "back\\slash", "quote'd", "ünïcode", "semi;colon"] {
        assert!(!is_valid_collection_name(name), "{:?} should be invalid", name);
        assert!(matches!(
            validate_collection_name(name),
            Err(IndexError::Input(_))
        ));
    }
}

#[test]
fn stored_document_serialization() {
    let mut embeddings = EmbeddingSet::new();
    embeddings
        .insert(EmbeddingField::Title, vec![0.5, -0.5])
        .expect("should insert vector");

    let document = StoredDocument {
        id: "doc-1".to_string(),
        collection: "docs".to_string(),
        record: Record::new().with_field("title", "Hello"),
        embeddings,
        indexed_field: EmbeddingField::Title,
        embedding_backend: "ollama".to_string(),
        stored_at: DateTime::from_timestamp_micros(1_700_000_000_000_000)
            .expect("should build timestamp"),
    };

    let json = serde_json::to_string(&document).expect("can serialize json");
    let deserialized: StoredDocument = serde_json::from_str(&json).expect("can parse json");

    assert_eq!(document, deserialized);
}
