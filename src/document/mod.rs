//! Records and their embeddings
//!
//! A [`Record`] is a scraped page as a JSON object. [`normalize`] picks the
//! embeddable text fields out of it and turns them into an [`EmbeddingSet`].


use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::embeddings::Embedder;
use crate::{IndexError, Result};

/// Fields with a known meaning; only title, description and content are embedded
pub const RECOGNIZED_FIELDS: [&str; 5] = ["title", "url", "description", "last_modified", "content"];

/// A text field that gets its own embedding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingField {
    Title,
    Description,
    Content,
}

impl EmbeddingField {
    pub const ALL: [Self; 3] = [Self::Title, Self::Description, Self::Content];

    /// Which vector gets indexed for search, best first
    pub const SEARCH_PREFERENCE: [Self; 3] = [Self::Content, Self::Description, Self::Title];

    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Title => "title",
            Self::Description => "description",
            Self::Content => "content",
        }
    }

    #[inline]
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.as_str() == name)
    }
}

impl fmt::Display for EmbeddingField {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A scraped page: a JSON object with `title`, `url`, `description`,
/// `last_modified`, `content` and any extra fields.
///
/// Recognized fields must be strings or null. Extra fields are kept as-is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct Record {
    fields: Map<String, Value>,
}

impl Record {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(fields) = value else {
            return Err(IndexError::Input(format!(
                "record must be a JSON object, got {}",
                json_type_name(&value)
            )));
        };

        for name in RECOGNIZED_FIELDS {
            match fields.get(name) {
                None | Some(Value::Null | Value::String(_)) => {}
                Some(other) => {
                    return Err(IndexError::Input(format!(
                        "field '{}' must be a string, got {}",
                        name,
                        json_type_name(other)
                    )));
                }
            }
        }

        Ok(Self { fields })
    }

    #[inline]
    pub fn from_json_str(json: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(json)
            .map_err(|e| IndexError::Input(format!("invalid JSON: {}", e)))?;
        Self::from_value(value)
    }

    /// Set a string field, builder style
    #[inline]
    #[must_use]
    pub fn with_field(mut self, name: &str, value: impl Into<String>) -> Self {
        self.fields
            .insert(name.to_string(), Value::String(value.into()));
        self
    }

    #[inline]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// The field as a string, if it is one
    #[inline]
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }

    /// The field as text worth embedding: a string that is not blank
    #[inline]
    pub fn text(&self, name: &str) -> Option<&str> {
        self.get_str(name).filter(|s| !s.trim().is_empty())
    }

    #[inline]
    pub fn title(&self) -> Option<&str> {
        self.get_str("title")
    }

    #[inline]
    pub fn url(&self) -> Option<&str> {
        self.get_str("url")
    }

    #[inline]
    pub fn content(&self) -> Option<&str> {
        self.get_str("content")
    }

    #[inline]
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.fields
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl TryFrom<Value> for Record {
    type Error = IndexError;

    #[inline]
    fn try_from(value: Value) -> Result<Self> {
        Self::from_value(value)
    }
}

impl From<Record> for Value {
    #[inline]
    fn from(record: Record) -> Self {
        Self::Object(record.fields)
    }
}

/// Backend name for a set whose vectors came from more than one backend
pub const MIXED_BACKEND: &str = "mixed";

/// One vector per embedded field, all of the same dimension, plus the name of
/// the backend that produced them
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "EmbeddingSetRepr", into = "EmbeddingSetRepr")]
pub struct EmbeddingSet {
    vectors: BTreeMap<EmbeddingField, Vec<f32>>,
    backend: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct EmbeddingSetRepr {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    backend: Option<String>,
    vectors: BTreeMap<EmbeddingField, Vec<f32>>,
}

impl EmbeddingSet {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a vector; it must match the dimension of those already present
    #[inline]
    pub fn insert(&mut self, field: EmbeddingField, vector: Vec<f32>) -> Result<()> {
        if vector.is_empty() {
            return Err(IndexError::Input(format!(
                "embedding for '{}' is empty",
                field
            )));
        }

        if let Some(expected) = self.dimension() {
            if vector.len() != expected {
                return Err(IndexError::DimensionMismatch {
                    expected,
                    actual: vector.len(),
                });
            }
        }

        self.vectors.insert(field, vector);
        Ok(())
    }

    /// Add a vector produced by `backend`
    #[inline]
    pub fn insert_from(
        &mut self,
        field: EmbeddingField,
        vector: Vec<f32>,
        backend: &str,
    ) -> Result<()> {
        self.insert(field, vector)?;

        self.backend = Some(match self.backend.take() {
            Some(current) if current != backend => MIXED_BACKEND.to_string(),
            Some(current) => current,
            None => backend.to_string(),
        });
        Ok(())
    }

    /// Backend that produced the vectors, [`MIXED_BACKEND`] when several did,
    /// `None` when unknown
    #[inline]
    pub fn backend(&self) -> Option<&str> {
        self.backend.as_deref()
    }

    #[inline]
    pub fn get(&self, field: EmbeddingField) -> Option<&[f32]> {
        self.vectors.get(&field).map(Vec::as_slice)
    }

    #[inline]
    pub fn contains(&self, field: EmbeddingField) -> bool {
        self.vectors.contains_key(&field)
    }

    #[inline]
    pub fn fields(&self) -> impl Iterator<Item = EmbeddingField> + '_ {
        self.vectors.keys().copied()
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = (EmbeddingField, &[f32])> + '_ {
        self.vectors.iter().map(|(f, v)| (*f, v.as_slice()))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Shared dimension of the vectors, `None` when empty
    #[inline]
    pub fn dimension(&self) -> Option<usize> {
        self.vectors.values().next().map(Vec::len)
    }

    /// The vector that gets indexed: content, else description, else title
    #[inline]
    pub fn search_vector(&self) -> Option<(EmbeddingField, &[f32])> {
        EmbeddingField::SEARCH_PREFERENCE
            .into_iter()
            .find_map(|field| self.get(field).map(|v| (field, v)))
    }
}

impl TryFrom<EmbeddingSetRepr> for EmbeddingSet {
    type Error = IndexError;

    fn try_from(repr: EmbeddingSetRepr) -> Result<Self> {
        let mut set = Self::new();
        for (field, vector) in repr.vectors {
            set.insert(field, vector)?;
        }
        set.backend = repr.backend;
        Ok(set)
    }
}

impl From<EmbeddingSet> for EmbeddingSetRepr {
    fn from(set: EmbeddingSet) -> Self {
        Self {
            backend: set.backend,
            vectors: set.vectors,
        }
    }
}

/// Embed every non-blank title, description and content field of `record`.
///
/// Absent, null and blank fields are left out of the set.
#[inline]
pub fn normalize(record: &Record, embedder: &Embedder) -> Result<EmbeddingSet> {
    let mut set = EmbeddingSet::new();

    for field in EmbeddingField::ALL {
        if let Some(text) = record.text(field.as_str()) {
            debug!("Embedding field '{}' ({} chars)", field, text.chars().count());
            let (vector, backend) = embedder.embed_with_backend(text);
            set.insert_from(field, vector, backend)?;
        }
    }

    debug!("Embedded {} field(s)", set.len());
    Ok(set)
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
