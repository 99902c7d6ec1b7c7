//! Retrieval collaborator used by the Research stage.

use std::sync::Arc;

use async_trait::async_trait;
use copilot_shared::{CopilotError, Result, RetrievedChunk};
use copilot_storage::Storage;
use tracing::debug;

/// Returns up to `top_k` indexed fragments most similar to `query`.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<RetrievedChunk>>;
}

/// [`Retriever`] over one collection of the local chunk index.
pub struct CollectionRetriever {
    storage: Arc<Storage>,
    collection: String,
}

impl CollectionRetriever {
    pub fn new(storage: Arc<Storage>, collection: impl Into<String>) -> Self {
        Self {
            storage,
            collection: collection.into(),
        }
    }
}

#[async_trait]
impl Retriever for CollectionRetriever {
    async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<RetrievedChunk>> {
        let hits = self
            .storage
            .search(&self.collection, query, top_k)
            .await
            .map_err(|e| CopilotError::Retrieval(e.to_string()))?;

        debug!(collection = %self.collection, hits = hits.len(), "retrieved fragments");

        Ok(hits
            .into_iter()
            .map(|hit| RetrievedChunk {
                content: hit.content,
                citation: Some(hit.citation),
            })
            .collect())
    }
}
