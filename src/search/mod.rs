// Search result ranking
// Turns raw similarity matches into the ordered hits callers see


use serde::{Deserialize, Serialize};

use crate::config::{DEFAULT_COLLECTION, DEFAULT_SEARCH_LIMIT, MAX_SEARCH_LIMIT};
use crate::database::RawMatch;
use crate::Result;

const ELLIPSIS: &str = "...";

/// One formatted search result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub title: String,
    pub url: String,
    pub snippet: String,
    /// Cosine similarity, higher is more similar
    pub score: f32,
}

/// A query as accepted from JSON: `{"query": ..., "limit"?: 5, "collection"?: "scraped_content"}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default = "default_collection")]
    pub collection: String,
}

fn default_limit() -> usize {
    DEFAULT_SEARCH_LIMIT
}

fn default_collection() -> String {
    DEFAULT_COLLECTION.to_string()
}

impl SearchRequest {
    #[inline]
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            limit: DEFAULT_SEARCH_LIMIT,
            collection: DEFAULT_COLLECTION.to_string(),
        }
    }

    #[inline]
    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    /// The requested limit, capped at `MAX_SEARCH_LIMIT`
    #[inline]
    pub fn effective_limit(&self) -> usize {
        self.limit.min(MAX_SEARCH_LIMIT)
    }

    /// Blank queries are allowed; they embed like any other text
    #[inline]
    pub fn validate(&self) -> Result<()> {
        crate::database::validate_collection_name(&self.collection)
    }
}

/// Format matches in the order given. Empty in, empty out.
#[inline]
pub fn rank(matches: Vec<RawMatch>, snippet_length: usize) -> Vec<SearchHit> {
    matches
        .into_iter()
        .map(|m| SearchHit {
            title: m.record.title().unwrap_or_default().to_string(),
            url: m.record.url().unwrap_or_default().to_string(),
            snippet: m
                .record
                .content()
                .map(|content| snippet(content, snippet_length))
                .unwrap_or_default(),
            score: m.score,
            id: m.id,
        })
        .collect()
}

/// First `max_chars` characters of `text`, with `...` appended when cut
#[inline]
pub fn snippet(text: &str, max_chars: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max_chars).collect();

    if chars.next().is_some() {
        head + ELLIPSIS
    } else {
        head
    }
}
