//! Keyword-overlap retriever over chunked in-memory documents.

use std::collections::HashSet;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::RwLock;

use super::{RetrievedChunk, Retriever, SourceDocument};

/// Chunk length in characters.
pub const CHUNK_SIZE: usize = 1000;

/// Characters shared by consecutive chunks.
pub const CHUNK_OVERLAP: usize = 200;

/// Split `text` into windows of `size` chars, consecutive windows sharing `overlap` chars.
///
/// # Preconditions
/// - `overlap < size` (otherwise windows advance by one char)
pub fn chunk_text(text: &str, size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() || size == 0 {
        return Vec::new();
    }
    let step = size.saturating_sub(overlap).max(1);

    let mut chunks = Vec::new();
    let mut start = 0;
    loop {
        let end = (start + size).min(chars.len());
        chunks.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start += step;
    }
    chunks
}

fn terms(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

struct StoredChunk {
    collection: String,
    content: String,
    terms: HashSet<String>,
    source: serde_json::Value,
}

/// In-memory retriever.
///
/// Relevance is the share of distinct query terms present in a chunk. Ties keep
/// insertion order. Chunks are tagged with their collection and filtered by it.
pub struct InMemoryRetriever {
    chunk_size: usize,
    overlap: usize,
    chunks: RwLock<Vec<StoredChunk>>,
}

impl InMemoryRetriever {
    pub fn new() -> Self {
        Self::with_chunking(CHUNK_SIZE, CHUNK_OVERLAP)
    }

    pub fn with_chunking(chunk_size: usize, overlap: usize) -> Self {
        Self {
            chunk_size,
            overlap,
            chunks: RwLock::new(Vec::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.chunks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for InMemoryRetriever {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Retriever for InMemoryRetriever {
    async fn retrieve(&self, collection: &str, query: &str, top_k: usize, min_relevance: f64) -> Vec<RetrievedChunk> {
        let query_terms = terms(query);
        if query_terms.is_empty() || top_k == 0 {
            return Vec::new();
        }

        let chunks = self.chunks.read().await;
        let mut scored: Vec<RetrievedChunk> = chunks
            .iter()
            .filter(|chunk| chunk.collection == collection)
            .filter_map(|chunk| {
                let hits = query_terms.iter().filter(|t| chunk.terms.contains(*t)).count();
                let relevance = hits as f64 / query_terms.len() as f64;
                (hits > 0 && relevance >= min_relevance).then(|| RetrievedChunk {
                    content: chunk.content.clone(),
                    source: chunk.source.clone(),
                    relevance,
                })
            })
            .collect();

        // stable sort keeps insertion order on ties
        scored.sort_by(|a, b| b.relevance.total_cmp(&a.relevance));
        scored.truncate(top_k);
        tracing::debug!(
            collection,
            query_terms = query_terms.len(),
            results = scored.len(),
            "Retrieved context"
        );
        scored
    }

    async fn index(&self, collection: &str, documents: &[SourceDocument]) -> usize {
        let mut stored = 0;
        let mut chunks = self.chunks.write().await;
        for doc in documents {
            for (idx, content) in chunk_text(&doc.content, self.chunk_size, self.overlap)
                .into_iter()
                .enumerate()
            {
                chunks.push(StoredChunk {
                    collection: collection.to_string(),
                    terms: terms(&content),
                    content,
                    source: json!({
                        "collection": collection,
                        "document_id": doc.id,
                        "chunk": idx,
                        "metadata": doc.metadata,
                    }),
                });
                stored += 1;
            }
        }
        tracing::info!(collection, documents = documents.len(), chunks = stored, "Indexed documents");
        stored
    }
}
