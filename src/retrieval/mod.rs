//! Retrieval backend abstraction.
//!
//! The pipeline only needs ranked text chunks for a query; the vector index
//! itself is an external collaborator. [`InMemoryRetriever`] is a keyword
//! stand-in for offline runs and tests.

mod memory;

pub use memory::{chunk_text, InMemoryRetriever, CHUNK_OVERLAP, CHUNK_SIZE};

/// Collection searched by callers outside any workflow.
pub const DEFAULT_COLLECTION: &str = "default";

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A ranked piece of supporting context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub content: String,
    /// Where the chunk came from (document id, collection, chunk index)
    pub source: serde_json::Value,
    /// Relevance in [0, 1]
    pub relevance: f64,
}

/// A document handed to the retriever for indexing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDocument {
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl SourceDocument {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            metadata: serde_json::Value::Null,
        }
    }
}

/// Trait for retrieval backends.
///
/// Documents live in named collections, one per workflow. A query only ever
/// sees the collection it names.
///
/// # Postconditions
/// - `retrieve` never fails; an empty corpus or no match gives an empty list
/// - results are ordered by descending relevance, all `>= min_relevance`
/// - every result was indexed under `collection`
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(&self, collection: &str, query: &str, top_k: usize, min_relevance: f64) -> Vec<RetrievedChunk>;

    /// Add documents to `collection`, returning the number of chunks stored.
    async fn index(&self, _collection: &str, _documents: &[SourceDocument]) -> usize {
        0
    }
}

/// Join retrieved chunks into a prompt context block.
pub fn render_context(chunks: &[RetrievedChunk]) -> String {
    chunks
        .iter()
        .map(|c| c.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}
